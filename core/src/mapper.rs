//! Canonical mapping (§4.3): raw per-platform attributes → canonical role,
//! states, actions, attributes, plus the O(n) tree reassembly and stats
//! accumulation (§4.3-4.5) that turn a flat pre-order stream into a
//! `Node` tree with sequential `e<N>` identifiers.

use std::collections::BTreeMap;

use crate::model::{
    truncate_chars, Action, Attributes, Autocomplete, Bounds, Live, Node, Orientation, Role,
    State, MAX_STR_LEN, MAX_URL_LEN,
};
use crate::platform::{CaptureStats, NativeRef, PlatformAttrs, RawNode, WindowCapture};

/// Non-schema ARIA role strings that collapse onto the canonical vocabulary
/// (the refinement rule "generic|group|text|region + a recognized ARIA role
/// → that ARIA role, after mapping through a fixed table", §4.3).
fn aria_role_to_canonical(aria: &str) -> Option<Role> {
    match aria {
        "alert" => Some(Role::Alert),
        "alertdialog" => Some(Role::AlertDialog),
        "application" => Some(Role::Application),
        "banner" => Some(Role::Banner),
        "blockquote" => Some(Role::Blockquote),
        "button" => Some(Role::Button),
        "caption" => Some(Role::Caption),
        "cell" => Some(Role::Cell),
        "checkbox" => Some(Role::Checkbox),
        "code" => Some(Role::Code),
        "columnheader" => Some(Role::ColumnHeader),
        "combobox" => Some(Role::Combobox),
        "complementary" => Some(Role::Complementary),
        "contentinfo" => Some(Role::ContentInfo),
        "deletion" => Some(Role::Deletion),
        "dialog" => Some(Role::Dialog),
        "document" => Some(Role::Document),
        "emphasis" => Some(Role::Emphasis),
        "figure" => Some(Role::Figure),
        "form" => Some(Role::Form),
        "grid" => Some(Role::Grid),
        "group" => Some(Role::Group),
        "heading" => Some(Role::Heading),
        "img" => Some(Role::Img),
        "insertion" => Some(Role::Insertion),
        "link" => Some(Role::Link),
        "list" => Some(Role::List),
        "listitem" => Some(Role::ListItem),
        "log" => Some(Role::Log),
        "main" => Some(Role::Main),
        "marquee" => Some(Role::Marquee),
        "math" => Some(Role::Math),
        "menu" => Some(Role::Menu),
        "menubar" => Some(Role::Menubar),
        "menuitem" => Some(Role::MenuItem),
        "menuitemcheckbox" => Some(Role::MenuItemCheckbox),
        "menuitemradio" => Some(Role::MenuItemRadio),
        "navigation" => Some(Role::Navigation),
        "none" | "presentation" => Some(Role::None),
        "note" => Some(Role::Note),
        "option" => Some(Role::Option),
        "paragraph" => Some(Role::Paragraph),
        "progressbar" => Some(Role::Progressbar),
        "radio" => Some(Role::Radio),
        "region" => Some(Role::Region),
        "row" => Some(Role::Row),
        "rowheader" => Some(Role::RowHeader),
        "scrollbar" => Some(Role::Scrollbar),
        "search" => Some(Role::Search),
        "searchbox" => Some(Role::Searchbox),
        "separator" => Some(Role::Separator),
        "slider" => Some(Role::Slider),
        "spinbutton" => Some(Role::Spinbutton),
        "status" => Some(Role::Status),
        "strong" => Some(Role::Strong),
        "subscript" => Some(Role::Subscript),
        "superscript" => Some(Role::Superscript),
        "switch" => Some(Role::Switch),
        "tab" => Some(Role::Tab),
        "table" => Some(Role::Table),
        "tablist" => Some(Role::Tablist),
        "tabpanel" => Some(Role::Tabpanel),
        "textbox" => Some(Role::Textbox),
        "timer" => Some(Role::Timer),
        "toolbar" => Some(Role::Toolbar),
        "tooltip" => Some(Role::Tooltip),
        "tree" => Some(Role::Tree),
        "treeitem" => Some(Role::TreeItem),
        _ => None,
    }
}

/// UIA `ControlType` friendly names (as emitted by `control_type_name()` in
/// `platform::windows`) → canonical role.
fn uia_role_to_canonical(control_type: &str) -> Role {
    match control_type {
        "Button" => Role::Button,
        "CheckBox" => Role::Checkbox,
        "ComboBox" => Role::Combobox,
        "Edit" => Role::Textbox,
        "Hyperlink" => Role::Link,
        "Image" => Role::Img,
        "ListItem" => Role::ListItem,
        "List" => Role::List,
        "Menu" => Role::Menu,
        "MenuBar" => Role::Menubar,
        "MenuItem" => Role::MenuItem,
        "ProgressBar" => Role::Progressbar,
        "RadioButton" => Role::Radio,
        "ScrollBar" => Role::Scrollbar,
        "Slider" => Role::Slider,
        "Spinner" => Role::Spinbutton,
        "StatusBar" => Role::Status,
        "Tab" => Role::Tablist,
        "TabItem" => Role::Tab,
        "Table" | "DataGrid" => Role::Table,
        "Text" => Role::Text,
        "ToolBar" => Role::Toolbar,
        "ToolTip" => Role::Tooltip,
        "Tree" => Role::Tree,
        "TreeItem" => Role::TreeItem,
        "Window" => Role::Window,
        "Pane" => Role::Generic,
        "Group" => Role::Group,
        "Document" => Role::Document,
        "Header" | "HeaderItem" => Role::RowHeader,
        "Separator" => Role::Separator,
        "TitleBar" => Role::Titlebar,
        "Custom" => Role::Generic,
        _ => Role::Generic,
    }
}

/// AX `role`(+`subrole`) → canonical role. Subrole overrides the base role
/// when recognized (§4.3).
fn ax_role_to_canonical(role: &str, subrole: &str) -> Role {
    if let Some(r) = match subrole {
        "AXCloseButton" | "AXZoomButton" | "AXMinimizeButton" => Some(Role::Button),
        "AXSearchField" => Some(Role::Searchbox),
        "AXContentList" => Some(Role::List),
        _ => None,
    } {
        return r;
    }
    match role {
        "AXButton" => Role::Button,
        "AXCheckBox" => Role::Checkbox,
        "AXComboBox" => Role::Combobox,
        "AXTextField" | "AXTextArea" => Role::Textbox,
        "AXLink" => Role::Link,
        "AXImage" => Role::Img,
        "AXList" => Role::List,
        "AXMenu" => Role::Menu,
        "AXMenuBar" => Role::Menubar,
        "AXMenuItem" => Role::MenuItem,
        "AXProgressIndicator" => Role::Progressbar,
        "AXRadioButton" => Role::Radio,
        "AXScrollBar" => Role::Scrollbar,
        "AXSlider" => Role::Slider,
        "AXIncrementor" => Role::Spinbutton,
        "AXTabGroup" => Role::Tablist,
        "AXTable" | "AXOutline" => Role::Table,
        "AXStaticText" => Role::Text,
        "AXHeading" => Role::Heading,
        "AXToolbar" => Role::Toolbar,
        "AXWindow" => Role::Window,
        "AXGroup" => Role::Group,
        "AXRow" => Role::Row,
        "AXCell" => Role::Cell,
        "AXColumn" => Role::ColumnHeader,
        "AXSplitGroup" | "AXUnknown" => Role::Generic,
        _ => Role::Generic,
    }
}

/// AT-SPI role names ("push-button") → canonical role.
fn atspi_role_to_canonical(role: &str) -> Role {
    match role {
        "push-button" => Role::Button,
        "check-box" => Role::Checkbox,
        "combo-box" => Role::Combobox,
        "entry" | "text" => Role::Textbox,
        "link" => Role::Link,
        "icon" | "image" => Role::Img,
        "list" => Role::List,
        "list-item" => Role::ListItem,
        "menu" => Role::Menu,
        "menu-bar" => Role::Menubar,
        "menu-item" => Role::MenuItem,
        "check-menu-item" => Role::MenuItemCheckbox,
        "radio-menu-item" => Role::MenuItemRadio,
        "progress-bar" => Role::Progressbar,
        "radio-button" => Role::Radio,
        "scroll-bar" => Role::Scrollbar,
        "slider" => Role::Slider,
        "spin-button" => Role::Spinbutton,
        "statusbar" => Role::Status,
        "page-tab-list" => Role::Tablist,
        "page-tab" => Role::Tab,
        "table" => Role::Table,
        "table-cell" => Role::Cell,
        "label" | "static" => Role::Text,
        "heading" => Role::Heading,
        "tool-bar" => Role::Toolbar,
        "tool-tip" => Role::Tooltip,
        "tree" => Role::Tree,
        "tree-item" => Role::TreeItem,
        "frame" | "window" => Role::Window,
        "panel" => Role::Generic,
        "filler" => Role::Generic,
        "separator" => Role::Separator,
        "dialog" => Role::Dialog,
        "document-frame" | "document-web" => Role::Document,
        _ => Role::Generic,
    }
}

/// CDP accessibility role names → canonical role.
fn cdp_role_to_canonical(role: &str) -> Role {
    match role {
        "button" => Role::Button,
        "checkbox" => Role::Checkbox,
        "combobox" => Role::Combobox,
        "textbox" | "searchbox" => Role::Textbox,
        "link" => Role::Link,
        "image" | "img" => Role::Img,
        "list" => Role::List,
        "listitem" => Role::ListItem,
        "menu" => Role::Menu,
        "menubar" => Role::Menubar,
        "menuitem" => Role::MenuItem,
        "menuitemcheckbox" => Role::MenuItemCheckbox,
        "menuitemradio" => Role::MenuItemRadio,
        "progressbar" => Role::Progressbar,
        "radio" => Role::Radio,
        "scrollbar" => Role::Scrollbar,
        "slider" => Role::Slider,
        "spinbutton" => Role::Spinbutton,
        "status" => Role::Status,
        "tablist" => Role::Tablist,
        "tab" => Role::Tab,
        "tabpanel" => Role::Tabpanel,
        "table" => Role::Table,
        "cell" | "gridcell" => Role::Cell,
        "columnheader" => Role::ColumnHeader,
        "rowheader" => Role::RowHeader,
        "row" => Role::Row,
        "grid" => Role::Grid,
        "text" | "statictext" | "LineBreak" => Role::Text,
        "heading" => Role::Heading,
        "toolbar" => Role::Toolbar,
        "tooltip" => Role::Tooltip,
        "tree" => Role::Tree,
        "treeitem" => Role::TreeItem,
        "WebArea" | "RootWebArea" => Role::Document,
        "generic" | "GenericContainer" | "none" => Role::Generic,
        "group" => Role::Group,
        "dialog" => Role::Dialog,
        "alert" => Role::Alert,
        "alertdialog" => Role::AlertDialog,
        "banner" => Role::Banner,
        "navigation" => Role::Navigation,
        "main" => Role::Main,
        "contentinfo" => Role::ContentInfo,
        "complementary" => Role::Complementary,
        "form" => Role::Form,
        "search" => Role::Search,
        "switch" => Role::Switch,
        _ => Role::Generic,
    }
}

/// One platform-tagged raw → canonical role lookup, then the §4.3
/// refinement rules shared across all four platforms.
fn map_role(platform_tag: &str, attrs: &PlatformAttrs) -> Role {
    let base = match platform_tag {
        "windows" => uia_role_to_canonical(&attrs.role_native),
        "macos" => ax_role_to_canonical(&attrs.role_native, attrs.string("subrole").unwrap_or("")),
        "linux" => atspi_role_to_canonical(&attrs.role_native),
        "web" => cdp_role_to_canonical(&attrs.role_native),
        _ => Role::Generic,
    };

    let refined = match base {
        Role::Generic | Role::Group | Role::Text | Role::Region => attrs
            .string("ariaRole")
            .or_else(|| attrs.string("aria_role"))
            .and_then(aria_role_to_canonical)
            .unwrap_or(base),
        other => other,
    };

    if platform_tag == "windows" && attrs.role_native == "Pane" && !attrs.name.is_empty() {
        return Role::Region;
    }
    if platform_tag == "linux" && attrs.role_native == "panel" && !attrs.name.is_empty() {
        return Role::Region;
    }
    if refined == Role::MenuItem {
        if attrs.bool("hasTogglePattern") {
            return Role::MenuItemCheckbox;
        }
        if attrs.bool("hasSelectionItemPattern") {
            return Role::MenuItemRadio;
        }
    }
    refined
}

fn map_states(platform_tag: &str, role: Role, attrs: &PlatformAttrs, bounds: Option<&Bounds>, screen: &Bounds) -> enumset::EnumSet<State> {
    let mut states = enumset::EnumSet::new();

    if attrs.bool("isOffscreen") || attrs.bool("atspiVisibleNotShowing") {
        states.insert(State::Offscreen);
    }
    if let Some(b) = bounds {
        if b.entirely_outside(screen) {
            states.insert(State::Offscreen);
        }
    }
    if attrs.bool("isEnabled_present") && !attrs.bool("isEnabled") {
        states.insert(State::Disabled);
    }
    if attrs.bool("disabled") {
        states.insert(State::Disabled);
    }
    if attrs.bool("hasKeyboardFocus") || attrs.bool("focused") {
        states.insert(State::Focused);
    }
    if attrs.bool("isSelected") || attrs.bool("selected") {
        states.insert(State::Selected);
    }
    if attrs.bool("isRequiredForForm") || attrs.bool("required") {
        states.insert(State::Required);
    }
    if attrs.bool("isModal") || attrs.bool("modal") {
        states.insert(State::Modal);
    }
    if attrs.bool("busy") {
        states.insert(State::Busy);
    }
    if attrs.bool("hidden") {
        states.insert(State::Hidden);
    }
    if attrs.bool("multiselectable") {
        states.insert(State::Multiselectable);
    }

    match attrs.string("toggleState") {
        Some("On") if role == Role::Button => {
            states.insert(State::Pressed);
        }
        Some("On") => {
            states.insert(State::Checked);
        }
        Some("Indeterminate") => {
            states.insert(State::Mixed);
        }
        _ => {}
    }
    if attrs.bool("checked") {
        states.insert(State::Checked);
    }
    if attrs.bool("pressed") {
        states.insert(State::Pressed);
    }

    match attrs.string("expandCollapseState") {
        Some("Expanded") => {
            states.insert(State::Expanded);
        }
        Some("Collapsed") => {
            states.insert(State::Collapsed);
        }
        _ => {}
    }
    if attrs.bool("expanded") {
        states.insert(State::Expanded);
    }

    let is_text_input = matches!(role, Role::Textbox | Role::Searchbox | Role::Combobox | Role::Spinbutton);
    if is_text_input {
        if attrs.bool("valueIsReadOnly") || attrs.bool("isReadOnly") || attrs.bool("readonly") {
            states.insert(State::Readonly);
        } else if attrs.bool("hasValuePattern") || attrs.bool("editable") {
            states.insert(State::Editable);
        }
    }

    let _ = platform_tag;
    states
}

fn map_actions(platform_tag: &str, role: Role, attrs: &PlatformAttrs) -> Vec<Action> {
    let mut actions = Vec::new();

    let non_interactive_text = matches!(role, Role::Text | Role::Heading)
        && (attrs.role_native == "AXStaticText"
            || attrs.role_native == "AXHeading"
            || attrs.role_native == "static"
            || attrs.role_native == "label");
    if non_interactive_text {
        return actions;
    }

    let is_text_input = matches!(role, Role::Textbox | Role::Searchbox | Role::Spinbutton);

    if platform_tag == "macos" {
        match attrs.string("axPress") {
            Some(_) if attrs.bool("hasTogglePattern") => actions.push(Action::Toggle),
            Some(_) if attrs.bool("hasSelectionItemPattern") => actions.push(Action::Select),
            Some(_) => actions.push(Action::Click),
            None => {}
        }
    } else if attrs.bool("hasInvokePattern") || attrs.bool("clickable") {
        actions.push(Action::Click);
        let click_like_cdp = platform_tag == "web"
            && matches!(role, Role::Button | Role::MenuItem | Role::Tab | Role::Link);
        if click_like_cdp {
            actions.push(Action::Rightclick);
            actions.push(Action::Doubleclick);
        }
    }

    if attrs.bool("hasTogglePattern") || attrs.string("toggleState").is_some() {
        if !actions.contains(&Action::Toggle) {
            actions.push(Action::Toggle);
        }
    }

    if attrs.bool("hasExpandCollapsePattern") {
        actions.push(Action::Expand);
        actions.push(Action::Collapse);
    }

    let writable_value = attrs.bool("hasValuePattern") && !attrs.bool("valueIsReadOnly");
    if writable_value {
        if is_text_input {
            actions.push(Action::Type);
            actions.push(Action::Setvalue);
        } else {
            actions.push(Action::Setvalue);
        }
    }

    if attrs.bool("hasSelectionItemPattern") && !actions.contains(&Action::Select) {
        actions.push(Action::Select);
    }

    if attrs.bool("hasScrollPattern") {
        actions.push(Action::Scroll);
    }

    if attrs.bool("hasRangeValuePattern") {
        actions.push(Action::Increment);
        actions.push(Action::Decrement);
    }

    actions.dedup();

    if actions.is_empty() && (attrs.bool("isKeyboardFocusable") || attrs.bool("focusable")) {
        actions.push(Action::Focus);
    }

    actions
}

fn map_attributes(role: Role, attrs: &PlatformAttrs) -> Attributes {
    let mut a = Attributes::default();

    if role == Role::Heading {
        a.level = attrs
            .number("level")
            .map(|n| n as i64)
            .or_else(|| attrs.string("level").and_then(|s| s.parse().ok()));
    }
    if role == Role::Link {
        a.url = attrs.string("url").map(|s| truncate_chars(s, MAX_URL_LEN));
    }
    let is_text_input = matches!(role, Role::Textbox | Role::Searchbox | Role::Combobox);
    if is_text_input {
        a.placeholder = attrs.string("placeholder").map(|s| truncate_chars(s, MAX_STR_LEN));
        a.autocomplete = attrs.string("autocomplete").and_then(|s| match s {
            "inline" => Some(Autocomplete::Inline),
            "list" => Some(Autocomplete::List),
            "both" => Some(Autocomplete::Both),
            "none" => Some(Autocomplete::None),
            _ => None,
        });
    }
    let is_range = matches!(role, Role::Slider | Role::Progressbar | Role::Spinbutton);
    if is_range {
        a.value_min = attrs.number("valueMin");
        a.value_max = attrs.number("valueMax");
        a.value_now = attrs.number("valueNow");
    }
    let wants_orientation = matches!(
        role,
        Role::Scrollbar | Role::Slider | Role::Separator | Role::Toolbar | Role::Tablist
    );
    if wants_orientation {
        a.orientation = attrs.string("orientation").and_then(|s| match s {
            "horizontal" => Some(Orientation::Horizontal),
            "vertical" => Some(Orientation::Vertical),
            _ => None,
        });
    }
    a.row_index = attrs.number("rowIndex").map(|n| n as i64);
    a.col_index = attrs.number("colIndex").map(|n| n as i64);
    a.row_count = attrs.number("rowCount").map(|n| n as i64);
    a.col_count = attrs.number("colCount").map(|n| n as i64);
    a.pos_in_set = attrs.number("posInSet").map(|n| n as i64);
    a.set_size = attrs.number("setSize").map(|n| n as i64);
    a.live = attrs.string("live").and_then(|s| match s {
        "polite" => Some(Live::Polite),
        "assertive" => Some(Live::Assertive),
        "off" => Some(Live::Off),
        _ => None,
    });
    a.key_shortcut = attrs.string("keyShortcut").map(|s| truncate_chars(s, MAX_STR_LEN));
    a.roledescription = attrs.string("roledescription").map(|s| truncate_chars(s, MAX_STR_LEN));

    a
}

/// One mapped element, still flat, carrying the original depth for
/// reassembly.
struct MappedNode {
    depth: usize,
    node: Node,
    native_ref: NativeRef,
}

fn map_one(platform_tag: &str, raw: &RawNode, screen: &Bounds, id: String) -> MappedNode {
    let attrs = &raw.attrs;
    let role = map_role(platform_tag, attrs);
    let name = truncate_chars(&attrs.name, MAX_STR_LEN);

    let mut node = Node::new(id, role, name);
    if !attrs.description.is_empty() {
        node.description = Some(truncate_chars(&attrs.description, MAX_STR_LEN));
    }
    if !attrs.value.is_empty() {
        node.value = Some(truncate_chars(&attrs.value, MAX_STR_LEN));
    }
    node.bounds = attrs.bounds.filter(|b| !b.is_degenerate());
    node.states = map_states(platform_tag, role, attrs, node.bounds.as_ref(), screen);
    node.actions = map_actions(platform_tag, role, attrs);
    node.attributes = map_attributes(role, attrs);

    let mut platform_map = BTreeMap::new();
    platform_map.insert(
        platform_tag.to_owned(),
        serde_json::json!({ "nativeRole": attrs.role_native }),
    );
    node.platform = platform_map;

    MappedNode {
        depth: raw.depth,
        node,
        native_ref: raw.native_ref.clone(),
    }
}

/// Stack-based O(n) reassembly (§4.3): pop until the top has `depth <
/// current`, attach current as child of the new top (or as a fresh root),
/// push current.
fn reassemble(mapped: Vec<MappedNode>) -> Vec<Node> {
    let mut roots = Vec::new();
    // Stack of (depth, node); popped nodes are spliced back into their
    // parent's children when the stack empties down past them.
    let mut stack: Vec<(usize, Node)> = Vec::new();

    for item in mapped {
        while let Some((top_depth, _)) = stack.last() {
            if *top_depth < item.depth {
                break;
            }
            let (_, finished) = stack.pop().unwrap();
            match stack.last_mut() {
                Some((_, parent)) => parent.children.push(finished),
                None => roots.push(finished),
            }
        }
        stack.push((item.depth, item.node));
    }
    while let Some((_, finished)) = stack.pop() {
        match stack.last_mut() {
            Some((_, parent)) => parent.children.push(finished),
            None => roots.push(finished),
        }
    }
    roots
}

/// Result of mapping one window's capture: its root-level nodes (normally
/// exactly one, the window root), the id→native-ref entries contributed,
/// and the stats to merge into the session-wide total.
pub struct MappedWindow {
    pub roots: Vec<Node>,
    pub refs: BTreeMap<String, NativeRef>,
    pub stats: CaptureStats,
}

/// Maps and reassembles one window's flat capture, allocating sequential
/// `e<N>` ids starting at `next_id` (§4.4). Returns the next free id index
/// for the caller to continue allocating across windows.
pub fn map_window(
    platform_tag: &str,
    capture: WindowCapture,
    screen: &Bounds,
    next_id: &mut u64,
) -> MappedWindow {
    let mut refs = BTreeMap::new();
    let mut mapped = Vec::with_capacity(capture.nodes.len());

    for raw in &capture.nodes {
        let id = format!("e{next_id}");
        *next_id += 1;
        let m = map_one(platform_tag, raw, screen, id.clone());
        refs.insert(id, m.native_ref.clone());
        mapped.push(m);
    }

    let roots = reassemble(mapped);

    MappedWindow {
        roots,
        refs,
        stats: capture.stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformAttrs;

    fn raw(depth: usize, role: &str, name: &str) -> RawNode {
        let mut attrs = PlatformAttrs::default();
        attrs.role_native = role.to_owned();
        attrs.name = name.to_owned();
        RawNode {
            depth,
            attrs,
            native_ref: NativeRef::Windows { hwnd: 1, node_index: vec![] },
        }
    }

    #[test]
    fn reassemble_rebuilds_parent_child_from_depths() {
        let screen = Bounds { x: 0, y: 0, w: 1000, h: 1000 };
        let mut next_id = 0;
        let capture = WindowCapture {
            nodes: vec![raw(0, "Window", "Root"), raw(1, "Pane", ""), raw(2, "Button", "OK"), raw(1, "Button", "Cancel")],
            stats: CaptureStats::default(),
        };
        let mapped = map_window("windows", capture, &screen, &mut next_id);
        assert_eq!(mapped.roots.len(), 1);
        let root = &mapped.roots[0];
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].children.len(), 1);
        assert_eq!(root.children[0].children[0].name, "OK");
        assert_eq!(root.children[1].name, "Cancel");
    }

    #[test]
    fn ids_are_sequential_across_windows() {
        let screen = Bounds { x: 0, y: 0, w: 1000, h: 1000 };
        let mut next_id = 0;
        let capture_a = WindowCapture { nodes: vec![raw(0, "Window", "A")], stats: CaptureStats::default() };
        let capture_b = WindowCapture { nodes: vec![raw(0, "Window", "B")], stats: CaptureStats::default() };
        let mapped_a = map_window("windows", capture_a, &screen, &mut next_id);
        let mapped_b = map_window("windows", capture_b, &screen, &mut next_id);
        assert_eq!(mapped_a.roots[0].id, "e0");
        assert_eq!(mapped_b.roots[0].id, "e1");
    }

    #[test]
    fn pane_with_name_becomes_region() {
        let mut attrs = PlatformAttrs::default();
        attrs.role_native = "Pane".to_owned();
        attrs.name = "Sidebar".to_owned();
        assert_eq!(map_role("windows", &attrs), Role::Region);
    }

    #[test]
    fn menu_item_with_toggle_becomes_menuitemcheckbox() {
        let mut attrs = PlatformAttrs::default();
        attrs.role_native = "MenuItem".to_owned();
        attrs.bools.insert("hasTogglePattern", true);
        assert_eq!(map_role("windows", &attrs), Role::MenuItemCheckbox);
    }

    #[test]
    fn toggle_state_on_maps_to_pressed_for_button_and_checked_otherwise() {
        let screen = Bounds { x: 0, y: 0, w: 1000, h: 1000 };
        let mut attrs = PlatformAttrs::default();
        attrs.strings.insert("toggleState", "On".to_owned());
        let button_states = map_states("windows", Role::Button, &attrs, None, &screen);
        assert!(button_states.contains(State::Pressed));
        let checkbox_states = map_states("windows", Role::Checkbox, &attrs, None, &screen);
        assert!(checkbox_states.contains(State::Checked));
    }

    #[test]
    fn offscreen_bounds_outside_screen_sets_offscreen_state() {
        let screen = Bounds { x: 0, y: 0, w: 1000, h: 1000 };
        let bounds = Bounds { x: 2000, y: 0, w: 10, h: 10 };
        let attrs = PlatformAttrs::default();
        let states = map_states("windows", Role::Button, &attrs, Some(&bounds), &screen);
        assert!(states.contains(State::Offscreen));
    }

    #[test]
    fn writable_value_on_text_input_yields_type_and_setvalue() {
        let mut attrs = PlatformAttrs::default();
        attrs.bools.insert("hasValuePattern", true);
        let actions = map_actions("windows", Role::Textbox, &attrs);
        assert!(actions.contains(&Action::Type));
        assert!(actions.contains(&Action::Setvalue));
    }

    #[test]
    fn focusable_with_no_other_actions_yields_focus_only() {
        let mut attrs = PlatformAttrs::default();
        attrs.bools.insert("isKeyboardFocusable", true);
        let actions = map_actions("windows", Role::Generic, &attrs);
        assert_eq!(actions, vec![Action::Focus]);
    }

    #[test]
    fn non_interactive_static_text_has_no_actions() {
        let mut attrs = PlatformAttrs::default();
        attrs.role_native = "AXStaticText".to_owned();
        attrs.bools.insert("isKeyboardFocusable", true);
        let actions = map_actions("macos", Role::Text, &attrs);
        assert!(actions.is_empty());
    }
}
