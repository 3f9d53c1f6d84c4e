//! Semantic tree search (§4.8): role-synonym expansion plus fuzzy name
//! matching over the unpruned tree, with a scoring formula the caller can
//! treat as a relevance-ranked shortlist rather than an exact filter.

use unicode_normalization::UnicodeNormalization;

use crate::model::{Node, Role, State};

const NOISE_WORDS: &[&str] = &[
    "the", "a", "an", "this", "that", "for", "in", "on", "of", "with", "to", "and", "or", "is", "it", "its", "my",
    "your",
];

/// Natural-language phrases (and every canonical role, mapped to itself)
/// resolving to a set of canonical roles. Entries are listed longest-phrase
/// first is not required: lookup is by exact joined-token match, and the
/// scanning in [`parse_role_span`] tries longer spans before shorter ones.
fn role_synonyms(phrase: &str) -> Option<Vec<Role>> {
    let set: &[Role] = match phrase {
        "search bar" | "searchbar" | "search box" | "searchbox" => &[Role::Search, Role::Searchbox, Role::Textbox, Role::Combobox],
        "btn" | "button" => &[Role::Button],
        "link" | "anchor" => &[Role::Link],
        "checkbox" | "check box" => &[Role::Checkbox],
        "radio" | "radio button" => &[Role::Radio],
        "dropdown" | "combo box" | "combobox" | "select" => &[Role::Combobox],
        "textbox" | "text box" | "text field" | "input" | "textfield" => &[Role::Textbox, Role::Searchbox],
        "tab" => &[Role::Tab],
        "menu" => &[Role::Menu, Role::Menubar],
        "menu item" | "menuitem" => &[Role::MenuItem, Role::MenuItemCheckbox, Role::MenuItemRadio],
        "slider" => &[Role::Slider],
        "switch" | "toggle" => &[Role::Switch],
        "dialog" | "modal" | "popup" => &[Role::Dialog, Role::AlertDialog],
        "window" => &[Role::Window],
        "heading" | "title" => &[Role::Heading],
        "list" => &[Role::List],
        "list item" | "listitem" => &[Role::ListItem],
        "table" => &[Role::Table],
        "tree" => &[Role::Tree],
        "tree item" | "treeitem" => &[Role::TreeItem],
        "progress bar" | "progressbar" | "progress" => &[Role::Progressbar],
        "spin button" | "spinbutton" | "stepper" => &[Role::Spinbutton],
        "toolbar" => &[Role::Toolbar],
        "tooltip" => &[Role::Tooltip],
        "image" | "picture" | "img" => &[Role::Img],
        "group" => &[Role::Group],
        "region" => &[Role::Region],
        "alert" => &[Role::Alert],
        "status" => &[Role::Status],
        "document" => &[Role::Document],
        "form" => &[Role::Form],
        "navigation" | "nav" => &[Role::Navigation],
        "banner" | "header" => &[Role::Banner],
        "contentinfo" | "footer" => &[Role::ContentInfo],
        "main" => &[Role::Main],
        "complementary" | "sidebar" => &[Role::Complementary],
        _ => return Role::from_str(phrase).map(|r| vec![r]),
    };
    Some(set.to_vec())
}

fn tokenize(s: &str) -> Vec<String> {
    let decomposed: String = s.nfd().filter(|c| !is_combining_mark(*c)).collect();
    decomposed
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

/// Find the longest contiguous 1-to-3-token substring of `tokens` that
/// resolves in the role-synonym table, returning `(roles, consumed_span)`.
fn parse_role_span(tokens: &[String]) -> Option<(Vec<Role>, (usize, usize))> {
    for span_len in (1..=3.min(tokens.len())).rev() {
        for start in 0..=tokens.len().saturating_sub(span_len) {
            let joined = tokens[start..start + span_len].join(" ");
            if let Some(roles) = role_synonyms(&joined) {
                return Some((roles, (start, start + span_len)));
            }
        }
    }
    None
}

/// Resolve target roles from a free-text fragment when no exact phrase
/// matched a contiguous span: try each remaining token individually, else
/// (for queries ≥ 3 chars) any canonical role containing it as a substring.
fn resolve_roles_from_tokens(tokens: &[String]) -> Option<Vec<Role>> {
    for t in tokens {
        if let Some(roles) = role_synonyms(t) {
            return Some(roles);
        }
    }
    let joined: String = tokens.join(" ");
    if joined.len() >= 3 {
        let matches: Vec<Role> = Role::ALL.iter().copied().filter(|r| r.as_str().contains(joined.as_str())).collect();
        if !matches.is_empty() {
            return Some(matches);
        }
    }
    None
}

pub struct ParsedQuery {
    pub roles: Vec<Role>,
    pub name_tokens: Vec<String>,
}

/// Tokenize and split a free-form query into a target role set and the
/// remaining name-query tokens (§4.8).
pub fn parse_query(query: &str) -> ParsedQuery {
    let tokens = tokenize(query);

    let (roles, name_tokens) = if let Some((roles, (start, end))) = parse_role_span(&tokens) {
        let mut remaining = Vec::new();
        remaining.extend_from_slice(&tokens[..start]);
        remaining.extend_from_slice(&tokens[end..]);
        (roles, remaining)
    } else if let Some(roles) = resolve_roles_from_tokens(&tokens) {
        (roles, tokens.clone())
    } else {
        (Vec::new(), tokens)
    };

    let name_tokens: Vec<String> = name_tokens.into_iter().filter(|t| !NOISE_WORDS.contains(&t.as_str())).collect();

    ParsedQuery { roles, name_tokens }
}

#[derive(Debug, Clone)]
pub struct FindRequest {
    pub query: Option<String>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub state: Option<State>,
    pub limit: usize,
    pub threshold: f64,
}

impl Default for FindRequest {
    fn default() -> Self {
        FindRequest { query: None, role: None, name: None, state: None, limit: 5, threshold: 0.15 }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub node: Node,
    pub score: f64,
}

fn name_score(name_tokens: &[String], name: &str, description: &Option<String>, value: &Option<String>, placeholder: Option<&str>) -> f64 {
    if name_tokens.is_empty() {
        return 0.0;
    }
    let name_lower = name.to_lowercase();
    let name_tokens_of_node = tokenize(name);
    let joined_query = name_tokens.join(" ");

    let substring_score = if name_lower == joined_query {
        1.0
    } else if name_lower.contains(&joined_query) {
        0.85
    } else {
        0.0
    };

    let mut token_sum = 0.0;
    for qt in name_tokens {
        let mut best = 0.0f64;
        for nt in &name_tokens_of_node {
            let s = if nt == qt {
                1.0
            } else if nt.starts_with(qt.as_str()) {
                0.7
            } else if qt.starts_with(nt.as_str()) {
                0.5
            } else if nt.contains(qt.as_str()) {
                0.6
            } else {
                0.0
            };
            if s > best {
                best = s;
            }
        }
        token_sum += best;
    }
    let token_level_score = token_sum / name_tokens.len() as f64;

    let mut score = substring_score.max(token_level_score);
    if score > 0.0 {
        let overlap_count = name_tokens.iter().filter(|qt| name_tokens_of_node.contains(qt)).count();
        let overlap = if name_tokens_of_node.is_empty() { 0.0 } else { overlap_count as f64 / name_tokens_of_node.len() as f64 };
        score *= 0.85 + 0.15 * overlap;
    }

    let mut side_boost = 0.0;
    let side_fields = [description.as_deref(), value.as_deref(), placeholder];
    for field in side_fields.into_iter().flatten() {
        let field_tokens = tokenize(field);
        let overlap = name_tokens.iter().filter(|qt| field_tokens.contains(qt)).count();
        if overlap > 0 {
            side_boost += 0.05;
        }
    }
    score += side_boost.min(0.15);

    score.min(1.0)
}

struct Ancestor<'a> {
    name: &'a str,
    role: Role,
}

fn score_node(node: &Node, ancestors: &[Ancestor], parsed: &ParsedQuery, state: Option<State>) -> f64 {
    if let Some(st) = state {
        if !node.states.contains(st) {
            return 0.0;
        }
    }

    let mut total = 0.0;

    if !parsed.roles.is_empty() {
        if !parsed.roles.contains(&node.role) {
            return 0.0;
        }
        total += 0.35;
    }

    let ns = name_score(&parsed.name_tokens, &node.name, &node.description, &node.value, node.attributes.placeholder.as_deref());

    if !parsed.name_tokens.is_empty() {
        if ns == 0.0 {
            return 0.0;
        }
        total += ns * 0.5;
    } else if !parsed.roles.is_empty() {
        total += 0.15;
    }

    if state.is_some() {
        total += 0.1;
    }

    if !parsed.name_tokens.is_empty() && ancestors.iter().any(|a| {
        let anc_tokens = tokenize(a.name);
        parsed.name_tokens.iter().any(|qt| anc_tokens.contains(qt))
    }) {
        total += 0.1;
    }

    if !parsed.roles.is_empty() && ancestors.iter().any(|a| parsed.roles.contains(&a.role)) {
        total += 0.1;
    }

    if node.has_meaningful_action() {
        total += 0.05;
    }

    if !node.states.contains(State::Offscreen) {
        total += 0.05;
    }

    if node.states.contains(State::Focused) {
        total += 0.02;
    }

    total.min(1.0)
}

fn walk<'a>(node: &'a Node, ancestors: &mut Vec<Ancestor<'a>>, parsed: &ParsedQuery, state: Option<State>, threshold: f64, out: &mut Vec<SearchHit>) {
    let score = score_node(node, ancestors, parsed, state);
    if score >= threshold {
        out.push(SearchHit { node: node.without_children(), score });
    }
    ancestors.push(Ancestor { name: &node.name, role: node.role });
    for child in &node.children {
        walk(child, ancestors, parsed, state, threshold, out);
    }
    ancestors.pop();
}

/// Run a search over the unpruned tree per §4.8, returning a stable-sorted,
/// score-descending, limit-bounded list of children-stripped hits.
pub fn search_tree(roots: &[Node], request: &FindRequest) -> Vec<SearchHit> {
    let mut parsed = if let Some(q) = &request.query {
        parse_query(q)
    } else {
        ParsedQuery { roles: Vec::new(), name_tokens: Vec::new() }
    };

    if let Some(role) = &request.role {
        if let Some(roles) = role_synonyms(&role.to_lowercase()) {
            parsed.roles = roles;
        } else if let Some(r) = Role::from_str(&role.to_lowercase()) {
            parsed.roles = vec![r];
        }
    }

    if let Some(name) = &request.name {
        parsed.name_tokens = tokenize(name).into_iter().filter(|t| !NOISE_WORDS.contains(&t.as_str())).collect();
    }

    let mut hits = Vec::new();
    let mut ancestors: Vec<Ancestor> = Vec::new();
    for root in roots {
        walk(root, &mut ancestors, &parsed, request.state, request.threshold, &mut hits);
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(request.limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Node};

    #[test]
    fn law_11_role_filter_excludes_other_roles() {
        let mut root = Node::new("e0".into(), Role::Window, "Win".into());
        let mut btn = Node::new("e1".into(), Role::Button, "Submit".into());
        btn.actions = vec![Action::Click];
        let mut chk = Node::new("e2".into(), Role::Checkbox, "Submit".into());
        chk.actions = vec![Action::Toggle];
        root.children = vec![btn, chk];

        let req = FindRequest { role: Some("button".into()), ..Default::default() };
        let hits = search_tree(&[root], &req);
        assert!(hits.iter().all(|h| h.node.role == Role::Button));
    }

    #[test]
    fn law_12_exact_name_ranks_above_substring() {
        let mut root = Node::new("e0".into(), Role::Window, "Win".into());
        let exact = Node::new("e1".into(), Role::Button, "Submit".into());
        let substr = Node::new("e2".into(), Role::Button, "Submit Form".into());
        root.children = vec![exact, substr];

        let req = FindRequest { query: Some("Submit".into()), ..Default::default() };
        let hits = search_tree(&[root], &req);
        assert!(hits.len() >= 2);
        assert_eq!(hits[0].node.name, "Submit");
    }

    #[test]
    fn scenario_e_search_bar_synonym_resolves() {
        let mut root = Node::new("e0".into(), Role::Window, "Win".into());
        root.children = vec![
            Node::new("e1".into(), Role::Textbox, "Search".into()),
            Node::new("e2".into(), Role::Button, "Go".into()),
            Node::new("e3".into(), Role::Checkbox, "Remember".into()),
        ];

        let req = FindRequest { query: Some("search bar".into()), threshold: 0.0, ..Default::default() };
        let hits = search_tree(&[root], &req);
        assert!(hits.iter().any(|h| matches!(h.node.role, Role::Searchbox | Role::Textbox | Role::Combobox | Role::Search)));
    }

    #[test]
    fn state_hard_filter_zeroes_score() {
        let mut node = Node::new("e1".into(), Role::Checkbox, "Agree".into());
        node.states = Default::default();
        let req = FindRequest { query: Some("agree".into()), state: Some(State::Checked), threshold: 0.0, ..Default::default() };
        let hits = search_tree(std::slice::from_ref(&node), &req);
        assert!(hits.is_empty());
    }

    #[test]
    fn tokenize_strips_combining_marks() {
        let tokens = tokenize("café");
        assert_eq!(tokens, vec!["cafe"]);
    }
}
