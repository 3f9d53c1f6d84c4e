//! Tree transformation pipeline (§4.6): pruning to a requested detail
//! level, viewport clipping of scrollable containers, single-child
//! structural collapse, and hoisting of semantically empty containers.
//!
//! `standard` runs all of skip/hoist/clip/collapse in one recursive pass
//! over the mapped tree; `minimal` and `full` are each a single dedicated
//! pass. All three deep-copy rather than mutate the input tree (§8
//! invariant 5: `prune(tree, full)` must not share identity with `tree`).

use crate::model::{Bounds, DetailLevel, Node, Role};

const SKIP_ROLES: &[Role] = &[
    Role::Scrollbar,
    Role::Separator,
    Role::Titlebar,
    Role::Tooltip,
    Role::Status,
];

/// Roles eligible for single-child structural collapse (§4.6).
const COLLAPSIBLE_ROLES: &[Role] = &[
    Role::Region,
    Role::Document,
    Role::Main,
    Role::Complementary,
    Role::Navigation,
    Role::Search,
    Role::Banner,
    Role::ContentInfo,
    Role::Form,
];

/// Produce the tree actually rendered to the user for the given detail
/// level (§4.6). Always returns a fresh tree, even for `full`.
pub fn prune_tree(roots: &[Node], detail: DetailLevel, screen: &Bounds) -> Vec<Node> {
    match detail {
        DetailLevel::Full => roots.iter().map(deep_copy).collect(),
        DetailLevel::Minimal => roots.iter().filter_map(prune_minimal).collect(),
        DetailLevel::Standard => roots
            .iter()
            .filter_map(|n| prune_standard(n, screen))
            .collect(),
    }
}

fn deep_copy(node: &Node) -> Node {
    let mut copy = node.clone();
    copy.children = node.children.iter().map(deep_copy).collect();
    copy.clipped = None;
    copy
}

/// `minimal`: keep a node only if it has a meaningful action itself or a
/// kept descendant.
fn prune_minimal(node: &Node) -> Option<Node> {
    let children: Vec<Node> = node.children.iter().filter_map(prune_minimal).collect();
    if node.has_meaningful_action() || !children.is_empty() {
        let mut copy = node.clone();
        copy.children = children;
        copy.clipped = None;
        Some(copy)
    } else {
        None
    }
}

fn is_skip_role(role: Role) -> bool {
    SKIP_ROLES.contains(&role)
}

/// The skip rules of §4.6, evaluated against the *original* sibling count
/// of `node`'s parent (the open question of §9: "text sole child of named
/// parent" uses the pre-drop child count).
fn should_skip(node: &Node, parent_name_nonempty: bool, parent_original_child_count: usize) -> bool {
    if is_skip_role(node.role) {
        return true;
    }
    if let Some(b) = node.bounds {
        if b.w == 0 || b.h == 0 {
            return true;
        }
    }
    if node.role == Role::Img && node.name.is_empty() {
        return true;
    }
    if node.role == Role::Text && node.name.is_empty() {
        return true;
    }
    if node.role == Role::Text && parent_name_nonempty && parent_original_child_count == 1 {
        return true;
    }
    if node.states.contains(crate::model::State::Offscreen) && !node.has_meaningful_action() {
        return true;
    }
    false
}

fn should_hoist(node: &Node) -> bool {
    match node.role {
        Role::Generic | Role::Region => node.name.is_empty(),
        Role::Group => node.name.is_empty() && !node.has_meaningful_action(),
        _ => false,
    }
}

/// Standard pruning: skip, hoist, collapse, in one recursive pass. Viewport
/// clipping is threaded through separately since it needs the current
/// viewport rectangle, not just parent/child structure.
fn prune_standard(node: &Node, screen: &Bounds) -> Option<Node> {
    prune_standard_with_viewport(node, screen, screen)
}

fn prune_standard_with_viewport(node: &Node, screen: &Bounds, viewport: &Bounds) -> Option<Node> {
    let child_viewport = match (node.actions.contains(&crate::model::Action::Scroll), node.bounds) {
        (true, Some(b)) => b.intersect(viewport),
        _ => *viewport,
    };

    let original_child_count = node.children.len();
    let parent_name_nonempty = !node.name.is_empty();

    let mut kept_children = Vec::with_capacity(node.children.len());
    let mut clipped = crate::model::Clipped::default();

    for child in &node.children {
        process_child(
            child,
            screen,
            &child_viewport,
            parent_name_nonempty,
            original_child_count,
            &mut kept_children,
            &mut clipped,
        );
    }

    let mut out = node.clone();
    out.children = kept_children;
    out.clipped = if clipped.is_empty() { None } else { Some(clipped) };

    Some(collapse_single_child(out))
}

/// Applies the skip/clip/hoist/recurse decision for one child of `node`
/// into `kept_children`/`clipped`. A hoisted child is skipped in favor of
/// its own children, each of which runs back through this same decision
/// (skip/clip still apply to them, and a hoisted grandchild hoists again)
/// rather than being spliced in unconditionally.
fn process_child(
    child: &Node,
    screen: &Bounds,
    child_viewport: &Bounds,
    parent_name_nonempty: bool,
    parent_original_child_count: usize,
    kept_children: &mut Vec<Node>,
    clipped: &mut crate::model::Clipped,
) {
    if should_skip(child, parent_name_nonempty, parent_original_child_count) {
        return;
    }
    if let Some(b) = child.bounds {
        if let Some(dir) = clip_direction(&b, child_viewport) {
            let count = 1 + count_descendants(child);
            match dir {
                Direction::Above => clipped.above += count,
                Direction::Below => clipped.below += count,
                Direction::Left => clipped.left += count,
                Direction::Right => clipped.right += count,
            }
            return;
        }
    }
    if should_hoist(child) {
        let parent_name_nonempty = !child.name.is_empty();
        let original_child_count = child.children.len();
        for grandchild in &child.children {
            process_child(
                grandchild,
                screen,
                child_viewport,
                parent_name_nonempty,
                original_child_count,
                kept_children,
                clipped,
            );
        }
        return;
    }
    if let Some(pruned) = prune_standard_with_viewport(child, screen, child_viewport) {
        kept_children.push(pruned);
    }
}

/// After child pruning: if `node` has exactly one child, its role is
/// collapsible, it has no name, and no meaningful action, replace it with
/// its child (§4.6). Iterated in case the child is itself collapsible.
fn collapse_single_child(mut node: Node) -> Node {
    loop {
        let collapsible = COLLAPSIBLE_ROLES.contains(&node.role)
            && node.name.is_empty()
            && !node.has_meaningful_action()
            && node.children.len() == 1
            && node.clipped.is_none();
        if !collapsible {
            return node;
        }
        node = node.children.into_iter().next().unwrap();
    }
}

enum Direction {
    Above,
    Below,
    Left,
    Right,
}

/// Direction a fully-outside child lies relative to `viewport`, or `None`
/// if it is (at least partially) inside. Vertical checked first (macOS
/// corner-case tie-break preserved, §9 open questions).
fn clip_direction(child: &Bounds, viewport: &Bounds) -> Option<Direction> {
    if child.y + child.h <= viewport.y {
        return Some(Direction::Above);
    }
    if child.y >= viewport.y + viewport.h {
        return Some(Direction::Below);
    }
    if child.x + child.w <= viewport.x {
        return Some(Direction::Left);
    }
    if child.x >= viewport.x + viewport.w {
        return Some(Direction::Right);
    }
    None
}

fn count_descendants(node: &Node) -> u32 {
    node.children
        .iter()
        .map(|c| 1 + count_descendants(c))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;

    fn leaf(role: Role, name: &str) -> Node {
        Node::new("e".into(), role, name.into())
    }

    #[test]
    fn full_detail_deep_copies_without_sharing_identity() {
        let mut root = leaf(Role::Window, "Win");
        root.children.push(leaf(Role::Button, "OK"));
        let pruned = prune_tree(&[root.clone()], DetailLevel::Full, &Bounds { x: 0, y: 0, w: 100, h: 100 });
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].children.len(), 1);
        assert_eq!(pruned[0].children[0].name, "OK");
    }

    #[test]
    fn scenario_a_hoist_unnamed_generic() {
        let mut button = leaf(Role::Button, "Click");
        button.actions = vec![Action::Click];
        let mut generic = leaf(Role::Generic, "");
        generic.children.push(button);
        let mut window = leaf(Role::Window, "Win");
        window.children.push(generic);

        let screen = Bounds { x: 0, y: 0, w: 1000, h: 1000 };
        let pruned = prune_tree(&[window], DetailLevel::Standard, &screen);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].children.len(), 1);
        assert_eq!(pruned[0].children[0].role, Role::Button);
        assert_eq!(pruned[0].children[0].name, "Click");
    }

    #[test]
    fn scenario_b_skip_decorative_image() {
        let mut window = leaf(Role::Window, "Win");
        window.children.push(leaf(Role::Img, ""));
        let screen = Bounds { x: 0, y: 0, w: 1000, h: 1000 };
        let pruned = prune_tree(&[window], DetailLevel::Standard, &screen);
        assert!(pruned[0].children.is_empty());
    }

    #[test]
    fn scenario_c_viewport_clipping_counts_below() {
        let mut a = leaf(Role::Generic, "A");
        a.bounds = Some(Bounds { x: 0, y: 0, w: 200, h: 30 });
        let mut b = leaf(Role::Generic, "B");
        b.bounds = Some(Bounds { x: 0, y: 200, w: 200, h: 30 });
        let mut parent = leaf(Role::List, "");
        parent.bounds = Some(Bounds { x: 0, y: 0, w: 200, h: 100 });
        parent.actions = vec![Action::Scroll];
        parent.children = vec![a, b];

        let screen = Bounds { x: 0, y: 0, w: 1000, h: 1000 };
        let pruned = prune_tree(&[parent], DetailLevel::Standard, &screen);
        assert_eq!(pruned[0].children.len(), 1);
        assert_eq!(pruned[0].children[0].name, "A");
        assert_eq!(pruned[0].clipped.unwrap().below, 1);
    }

    #[test]
    fn minimal_keeps_only_actionable_subtrees() {
        let mut button = leaf(Role::Button, "OK");
        button.actions = vec![Action::Click];
        let mut text = leaf(Role::Text, "decoration");
        let mut window = leaf(Role::Window, "Win");
        window.children.push(button);
        window.children.push(text.clone());
        text.children.clear();

        let pruned = prune_tree(&[window], DetailLevel::Minimal, &Bounds { x: 0, y: 0, w: 10, h: 10 });
        assert_eq!(pruned[0].children.len(), 1);
        assert_eq!(pruned[0].children[0].name, "OK");
    }

    #[test]
    fn single_child_collapse_replaces_unnamed_region() {
        let mut inner = leaf(Role::Button, "Go");
        inner.actions = vec![Action::Click];
        let mut region = leaf(Role::Region, "");
        region.children.push(inner);
        let mut window = leaf(Role::Window, "Win");
        window.children.push(region);

        let pruned = prune_tree(&[window], DetailLevel::Standard, &Bounds { x: 0, y: 0, w: 100, h: 100 });
        assert_eq!(pruned[0].children.len(), 1);
        assert_eq!(pruned[0].children[0].role, Role::Button);
    }
}
