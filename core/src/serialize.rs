//! Output serializers (§4.7): the JSON envelope, the byte-budgeted compact
//! text format built for LLM context windows, and the window-overview text.

use crate::model::{Envelope, Node, WindowInfo};

/// Default byte budget for [`serialize_compact`].
pub const DEFAULT_MAX_CHARS: usize = 40_000;

const TRUNCATION_SUFFIX: &str = "\n# OUTPUT TRUNCATED — exceeded character limit.\n# Use find(name=...) to locate specific elements instead.\n# Or use snapshot_app(app='<title>') to target a specific window.\n";

const NAME_MAX: usize = 80;
const VALUE_MAX: usize = 120;

/// Serialize an envelope to JSON exactly per §3; `_clipped` never appears
/// since [`crate::model::Node::clipped`] carries `#[serde(skip)]`.
pub fn serialize_json(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

fn escape_and_truncate(s: &str, max_chars: usize) -> String {
    let truncated = crate::model::truncate_chars(s, max_chars);
    let ellipsis = if s.chars().count() > max_chars { "…" } else { "" };
    let escaped = serde_json::to_string(&truncated).unwrap_or_else(|_| "\"\"".to_string());
    // serde_json::to_string already wraps in quotes; splice the ellipsis
    // in before the closing quote so it reads as part of the string.
    let mut escaped = escaped;
    if !ellipsis.is_empty() {
        escaped.pop();
        escaped.push_str(ellipsis);
        escaped.push('"');
    }
    escaped
}

fn format_node_line(node: &Node) -> String {
    let mut line = format!("[{}] {} {}", node.id, node.role.as_str(), escape_and_truncate(&node.name, NAME_MAX));

    let has_meaningful = node.has_meaningful_action();
    if has_meaningful {
        if let Some(b) = node.bounds {
            line.push_str(&format!(" @{},{} {}x{}", b.x, b.y, b.w, b.h));
        }
    }

    if !node.states.is_empty() {
        let states: Vec<&str> = node.states.iter().map(|s| s.as_str()).collect();
        line.push_str(&format!(" {{{}}}", states.join(",")));
    }

    let printed_actions: Vec<&str> = node
        .actions
        .iter()
        .filter(|a| !matches!(a, crate::model::Action::Focus))
        .map(|a| a.as_str())
        .collect();
    if !printed_actions.is_empty() {
        line.push_str(&format!(" [{}]", printed_actions.join(",")));
    }

    if let Some(v) = &node.value {
        line.push_str(&format!(" val={}", escape_and_truncate(v, VALUE_MAX)));
    }

    if !node.attributes.is_empty() {
        line.push_str(&format!(" ({})", compact_attributes(node)));
    }

    line
}

fn compact_attributes(node: &Node) -> String {
    let a = &node.attributes;
    let mut parts = Vec::new();
    if let Some(v) = a.level {
        parts.push(format!("level={v}"));
    }
    if a.value_min.is_some() || a.value_max.is_some() || a.value_now.is_some() {
        let min = a.value_min.map(|v| v.to_string()).unwrap_or_default();
        let max = a.value_max.map(|v| v.to_string()).unwrap_or_default();
        let now = a.value_now.map(|v| v.to_string()).unwrap_or_default();
        parts.push(format!("range={now}/{min}..{max}"));
    }
    if let Some(o) = a.orientation {
        parts.push(format!("orientation={:?}", o).to_lowercase());
    }
    if let Some(u) = &a.url {
        parts.push(format!("url={}", crate::model::truncate_chars(u, 60)));
    }
    if let Some(p) = &a.placeholder {
        parts.push(format!("placeholder={p}"));
    }
    if let Some((pos, size)) = a.pos_in_set.zip(a.set_size) {
        parts.push(format!("{pos}/{size}"));
    }
    parts.join(" ")
}

fn write_tree(out: &mut String, nodes: &[Node], depth: usize) {
    for node in nodes {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format_node_line(node));
        out.push('\n');
        write_tree(out, &node.children, depth + 1);
        if let Some(clipped) = node.clipped {
            if !clipped.is_empty() {
                out.push_str(&"  ".repeat(depth + 1));
                out.push_str(&format!("# {} more items — scroll {} to see\n", clipped.total(), clipped_directions(&clipped)));
            }
        }
    }
}

fn clipped_directions(c: &crate::model::Clipped) -> String {
    let mut dirs = Vec::new();
    if c.above > 0 {
        dirs.push("up");
    }
    if c.below > 0 {
        dirs.push("down");
    }
    if c.left > 0 {
        dirs.push("left");
    }
    if c.right > 0 {
        dirs.push("right");
    }
    dirs.join("/")
}

/// Render the compact text header (§4.7).
fn write_header(out: &mut String, envelope: &Envelope, node_count: usize, unpruned_count: usize, open_windows: Option<&[WindowInfo]>) {
    out.push_str(&format!(
        "# CUP {} | {} | {}x{}\n",
        envelope.version,
        envelope.platform.as_str(),
        envelope.screen.w,
        envelope.screen.h
    ));
    if let Some(app) = &envelope.app {
        if let Some(name) = &app.name {
            out.push_str(&format!("# app: {name}\n"));
        }
    }
    out.push_str(&format!("# {} nodes ({} before pruning)\n", node_count, unpruned_count));
    if let Some(tools) = &envelope.tools {
        if !tools.is_empty() {
            out.push_str(&format!("# {} WebMCP tool(s) available\n", tools.len()));
        }
    }
    if let Some(windows) = open_windows {
        if !windows.is_empty() {
            out.push_str("# --- open windows ---\n");
            for w in windows {
                let fg = if w.foreground.unwrap_or(false) { " [fg]" } else { "" };
                out.push_str(&format!("#   {}{}\n", w.title, fg));
            }
        }
    }
}

fn count_nodes(nodes: &[Node]) -> usize {
    nodes.iter().map(|n| 1 + count_nodes(&n.children)).sum()
}

/// Serialize `envelope` (pruned tree already installed as `envelope.tree`)
/// to compact text, enforcing `max_chars` per §4.7/§6.
pub fn serialize_compact(envelope: &Envelope, unpruned_count: usize, max_chars: usize) -> String {
    let mut out = String::new();
    let node_count = count_nodes(&envelope.tree);
    write_header(&mut out, envelope, node_count, unpruned_count, envelope.windows.as_deref());
    write_tree(&mut out, &envelope.tree, 0);

    if out.chars().count() <= max_chars {
        return out;
    }

    let mut budget_bytes = 0usize;
    let mut cut_at = 0usize;
    for (idx, ch) in out.char_indices() {
        if out[..idx].chars().count() >= max_chars {
            break;
        }
        if ch == '\n' {
            cut_at = idx + 1;
        }
        budget_bytes = idx + ch.len_utf8();
    }
    let _ = budget_bytes;
    let mut truncated = out[..cut_at].to_string();
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}

/// Render the independent window-overview text (§4.7), oblivious to tree
/// transformation — it summarizes `windows`, not any captured tree.
pub fn serialize_overview(platform: crate::model::Platform, screen: &crate::model::ScreenInfo, windows: &[WindowInfo]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# CUP {} | {} | {}x{}\n", crate::model::ENVELOPE_VERSION, platform.as_str(), screen.w, screen.h));
    out.push_str(&format!("# overview | {} windows\n", windows.len()));
    for w in windows {
        let marker = if w.foreground.unwrap_or(false) { "* " } else { "  " };
        let mut line = format!("{}{}", marker, w.title);
        if let Some(pid) = w.pid {
            line.push_str(&format!(" (pid:{pid})"));
        }
        if let Some(b) = w.bounds {
            line.push_str(&format!(" @{},{} {}x{}", b.x, b.y, b.w, b.h));
        }
        if let Some(url) = &w.url {
            line.push_str(&format!(" url:{}", crate::model::truncate_chars(url, 60)));
        }
        out.push('\n');
        out.push_str(&line);
    }
    if !windows.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, AppInfo, Bounds, Platform, Role, ScreenInfo, Scope};

    fn sample_envelope(tree: Vec<Node>) -> Envelope {
        Envelope {
            version: crate::model::ENVELOPE_VERSION.to_string(),
            platform: Platform::Windows,
            timestamp: 0,
            screen: ScreenInfo { w: 1920, h: 1080, scale: None },
            scope: Some(Scope::Foreground),
            app: Some(AppInfo { name: Some("Notepad".into()), pid: Some(42), bundle_id: None }),
            tree,
            windows: None,
            tools: None,
        }
    }

    #[test]
    fn scenario_d_compact_line_format() {
        let mut node = Node::new("e14".into(), Role::Button, "Submit".into());
        node.bounds = Some(Bounds { x: 100, y: 50, w: 80, h: 30 });
        node.actions = vec![Action::Click];
        let line = format_node_line(&node);
        assert_eq!(line, "[e14] button \"Submit\" @100,50 80x30 [click]");
    }

    #[test]
    fn focus_elided_from_printed_actions() {
        let mut node = Node::new("e1".into(), Role::Button, "X".into());
        node.actions = vec![Action::Focus];
        let line = format_node_line(&node);
        assert!(!line.contains('['));
    }

    #[test]
    fn json_roundtrips_envelope_fields() {
        let node = Node::new("e0".into(), Role::Window, "Win".into());
        let env = sample_envelope(vec![node]);
        let json = serialize_json(&env).unwrap();
        assert!(json.contains("\"version\":\"0.1.0\""));
        assert!(!json.contains("_clipped"));
    }

    #[test]
    fn scenario_c_clipped_hint_line() {
        let mut child = Node::new("e1".into(), Role::Generic, "A".into());
        child.bounds = Some(Bounds { x: 0, y: 0, w: 200, h: 30 });
        let mut parent = Node::new("e0".into(), Role::List, "".into());
        parent.clipped = Some(crate::model::Clipped { above: 0, below: 1, left: 0, right: 0 });
        parent.children = vec![child];
        let env = sample_envelope(vec![parent]);
        let text = serialize_compact(&env, 2, DEFAULT_MAX_CHARS);
        assert!(text.contains("# 1 more items — scroll down to see"));
    }

    #[test]
    fn byte_budget_truncates_with_fixed_suffix() {
        let mut roots = Vec::new();
        for i in 0..500 {
            roots.push(Node::new(format!("e{i}"), Role::Text, format!("node number {i} with some padding text")));
        }
        let env = sample_envelope(roots);
        let text = serialize_compact(&env, 500, 200);
        assert!(text.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn overview_marks_foreground_window() {
        let windows = vec![
            WindowInfo { title: "Bg".into(), pid: Some(1), bundle_id: None, foreground: Some(false), bounds: None, url: None },
            WindowInfo { title: "Fg".into(), pid: Some(2), bundle_id: None, foreground: Some(true), bounds: None, url: None },
        ];
        let text = serialize_overview(Platform::Macos, &ScreenInfo { w: 100, h: 100, scale: None }, &windows);
        assert!(text.contains("* Fg"));
        assert!(text.contains("  Bg"));
    }
}
