//! The canonical node model: the 72-role/16-state/16-action vocabulary that
//! every platform adapter is normalized into, plus the envelope that wraps a
//! captured tree for serialization.
//!
//! `states` uses `enumset::EnumSet` the way `accesskit_schema` represents its
//! state bitset -- a dense, `Copy`, serializable set over a fixed enum,
//! cheaper than a `HashSet<State>` and with no insertion-order ambiguity
//! (spec calls the set "insertion-order-irrelevant").

use std::collections::BTreeMap;

use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};

/// Maximum length for most truncated string attributes.
pub const MAX_STR_LEN: usize = 200;
/// Maximum length for `url` attributes specifically.
pub const MAX_URL_LEN: usize = 500;

/// Truncate `s` to at most `max_chars` Unicode scalar values.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_owned()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// The canonical role vocabulary. The glossary's prose count ("59") does not
/// match its own enumeration (72 distinct tags); this enum implements the
/// literal enumeration -- see DESIGN.md's open-question log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Alert,
    AlertDialog,
    Application,
    Banner,
    Blockquote,
    Button,
    Caption,
    Cell,
    Checkbox,
    Code,
    ColumnHeader,
    Combobox,
    Complementary,
    ContentInfo,
    Deletion,
    Dialog,
    Document,
    Emphasis,
    Figure,
    Form,
    Generic,
    Grid,
    Group,
    Heading,
    Img,
    Insertion,
    Link,
    List,
    ListItem,
    Log,
    Main,
    Marquee,
    Math,
    Menu,
    Menubar,
    MenuItem,
    MenuItemCheckbox,
    MenuItemRadio,
    Navigation,
    None,
    Note,
    Option,
    Paragraph,
    Progressbar,
    Radio,
    Region,
    Row,
    RowHeader,
    Scrollbar,
    Search,
    Searchbox,
    Separator,
    Slider,
    Spinbutton,
    Status,
    Strong,
    Subscript,
    Superscript,
    Switch,
    Tab,
    Table,
    Tablist,
    Tabpanel,
    Text,
    Textbox,
    Timer,
    Titlebar,
    Toolbar,
    Tooltip,
    Tree,
    TreeItem,
    Window,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Alert => "alert",
            Role::AlertDialog => "alertdialog",
            Role::Application => "application",
            Role::Banner => "banner",
            Role::Blockquote => "blockquote",
            Role::Button => "button",
            Role::Caption => "caption",
            Role::Cell => "cell",
            Role::Checkbox => "checkbox",
            Role::Code => "code",
            Role::ColumnHeader => "columnheader",
            Role::Combobox => "combobox",
            Role::Complementary => "complementary",
            Role::ContentInfo => "contentinfo",
            Role::Deletion => "deletion",
            Role::Dialog => "dialog",
            Role::Document => "document",
            Role::Emphasis => "emphasis",
            Role::Figure => "figure",
            Role::Form => "form",
            Role::Generic => "generic",
            Role::Grid => "grid",
            Role::Group => "group",
            Role::Heading => "heading",
            Role::Img => "img",
            Role::Insertion => "insertion",
            Role::Link => "link",
            Role::List => "list",
            Role::ListItem => "listitem",
            Role::Log => "log",
            Role::Main => "main",
            Role::Marquee => "marquee",
            Role::Math => "math",
            Role::Menu => "menu",
            Role::Menubar => "menubar",
            Role::MenuItem => "menuitem",
            Role::MenuItemCheckbox => "menuitemcheckbox",
            Role::MenuItemRadio => "menuitemradio",
            Role::Navigation => "navigation",
            Role::None => "none",
            Role::Note => "note",
            Role::Option => "option",
            Role::Paragraph => "paragraph",
            Role::Progressbar => "progressbar",
            Role::Radio => "radio",
            Role::Region => "region",
            Role::Row => "row",
            Role::RowHeader => "rowheader",
            Role::Scrollbar => "scrollbar",
            Role::Search => "search",
            Role::Searchbox => "searchbox",
            Role::Separator => "separator",
            Role::Slider => "slider",
            Role::Spinbutton => "spinbutton",
            Role::Status => "status",
            Role::Strong => "strong",
            Role::Subscript => "subscript",
            Role::Superscript => "superscript",
            Role::Switch => "switch",
            Role::Tab => "tab",
            Role::Table => "table",
            Role::Tablist => "tablist",
            Role::Tabpanel => "tabpanel",
            Role::Text => "text",
            Role::Textbox => "textbox",
            Role::Timer => "timer",
            Role::Titlebar => "titlebar",
            Role::Toolbar => "toolbar",
            Role::Tooltip => "tooltip",
            Role::Tree => "tree",
            Role::TreeItem => "treeitem",
            Role::Window => "window",
        }
    }

    /// All 72 canonical roles, in glossary order.
    pub const ALL: &'static [Role] = &[
        Role::Alert,
        Role::AlertDialog,
        Role::Application,
        Role::Banner,
        Role::Blockquote,
        Role::Button,
        Role::Caption,
        Role::Cell,
        Role::Checkbox,
        Role::Code,
        Role::ColumnHeader,
        Role::Combobox,
        Role::Complementary,
        Role::ContentInfo,
        Role::Deletion,
        Role::Dialog,
        Role::Document,
        Role::Emphasis,
        Role::Figure,
        Role::Form,
        Role::Generic,
        Role::Grid,
        Role::Group,
        Role::Heading,
        Role::Img,
        Role::Insertion,
        Role::Link,
        Role::List,
        Role::ListItem,
        Role::Log,
        Role::Main,
        Role::Marquee,
        Role::Math,
        Role::Menu,
        Role::Menubar,
        Role::MenuItem,
        Role::MenuItemCheckbox,
        Role::MenuItemRadio,
        Role::Navigation,
        Role::None,
        Role::Note,
        Role::Option,
        Role::Paragraph,
        Role::Progressbar,
        Role::Radio,
        Role::Region,
        Role::Row,
        Role::RowHeader,
        Role::Scrollbar,
        Role::Search,
        Role::Searchbox,
        Role::Separator,
        Role::Slider,
        Role::Spinbutton,
        Role::Status,
        Role::Strong,
        Role::Subscript,
        Role::Superscript,
        Role::Switch,
        Role::Tab,
        Role::Table,
        Role::Tablist,
        Role::Tabpanel,
        Role::Text,
        Role::Textbox,
        Role::Timer,
        Role::Titlebar,
        Role::Toolbar,
        Role::Tooltip,
        Role::Tree,
        Role::TreeItem,
        Role::Window,
    ];

    pub fn from_str(s: &str) -> Option<Role> {
        Self::ALL.iter().copied().find(|r| r.as_str() == s)
    }
}

/// The 16 canonical state tags, stored as an `enumset::EnumSet`.
#[derive(Debug, EnumSetType, Serialize, Deserialize)]
pub enum State {
    Busy,
    Checked,
    Collapsed,
    Disabled,
    Editable,
    Expanded,
    Focused,
    Hidden,
    Mixed,
    Modal,
    Multiselectable,
    Offscreen,
    Pressed,
    Readonly,
    Required,
    Selected,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Busy => "busy",
            State::Checked => "checked",
            State::Collapsed => "collapsed",
            State::Disabled => "disabled",
            State::Editable => "editable",
            State::Expanded => "expanded",
            State::Focused => "focused",
            State::Hidden => "hidden",
            State::Mixed => "mixed",
            State::Modal => "modal",
            State::Multiselectable => "multiselectable",
            State::Offscreen => "offscreen",
            State::Pressed => "pressed",
            State::Readonly => "readonly",
            State::Required => "required",
            State::Selected => "selected",
        }
    }
}

/// The element-level action vocabulary (15 tags) plus the session-level
/// `PressKeys` action, kept in the same enum because the dispatcher's
/// `Action::parse`/`as_str` surface and `UNKNOWN_ACTION` check are shared
/// between both (spec.md's "valid actions are exactly" list names both).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Click,
    Collapse,
    Decrement,
    Dismiss,
    Doubleclick,
    Expand,
    Focus,
    Increment,
    Longpress,
    PressKeys,
    Rightclick,
    Scroll,
    Select,
    Setvalue,
    Toggle,
    Type,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Click => "click",
            Action::Collapse => "collapse",
            Action::Decrement => "decrement",
            Action::Dismiss => "dismiss",
            Action::Doubleclick => "doubleclick",
            Action::Expand => "expand",
            Action::Focus => "focus",
            Action::Increment => "increment",
            Action::Longpress => "longpress",
            Action::PressKeys => "press_keys",
            Action::Rightclick => "rightclick",
            Action::Scroll => "scroll",
            Action::Select => "select",
            Action::Setvalue => "setvalue",
            Action::Toggle => "toggle",
            Action::Type => "type",
        }
    }

    pub fn from_str(s: &str) -> Option<Action> {
        match s {
            "click" => Some(Action::Click),
            "collapse" => Some(Action::Collapse),
            "decrement" => Some(Action::Decrement),
            "dismiss" => Some(Action::Dismiss),
            "doubleclick" => Some(Action::Doubleclick),
            "expand" => Some(Action::Expand),
            "focus" => Some(Action::Focus),
            "increment" => Some(Action::Increment),
            "longpress" => Some(Action::Longpress),
            "press_keys" => Some(Action::PressKeys),
            "rightclick" => Some(Action::Rightclick),
            "scroll" => Some(Action::Scroll),
            "select" => Some(Action::Select),
            "setvalue" => Some(Action::Setvalue),
            "toggle" => Some(Action::Toggle),
            "type" => Some(Action::Type),
            _ => Option::None,
        }
    }

    /// Any action other than `focus` (spec's "meaningful action").
    pub fn is_meaningful(self) -> bool {
        !matches!(self, Action::Focus)
    }
}

/// Integer screen-pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl Bounds {
    pub fn is_degenerate(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// Whether `self` falls entirely outside `screen`.
    pub fn entirely_outside(&self, screen: &Bounds) -> bool {
        self.x + self.w <= screen.x
            || self.x >= screen.x + screen.w
            || self.y + self.h <= screen.y
            || self.y >= screen.y + screen.h
    }

    pub fn intersect(&self, other: &Bounds) -> Bounds {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.w).min(other.x + other.w);
        let y1 = (self.y + self.h).min(other.y + other.h);
        Bounds {
            x: x0,
            y: y0,
            w: (x1 - x0).max(0),
            h: (y1 - y0).max(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Live {
    Polite,
    Assertive,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Autocomplete {
    Inline,
    List,
    Both,
    None,
}

/// The recognized `attributes` keys (§3). All fields optional; string fields
/// are truncated at mapping time (200 chars, 500 for `url`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    #[serde(rename = "valueMin", skip_serializing_if = "Option::is_none")]
    pub value_min: Option<f64>,
    #[serde(rename = "valueMax", skip_serializing_if = "Option::is_none")]
    pub value_max: Option<f64>,
    #[serde(rename = "valueNow", skip_serializing_if = "Option::is_none")]
    pub value_now: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(rename = "rowIndex", skip_serializing_if = "Option::is_none")]
    pub row_index: Option<i64>,
    #[serde(rename = "colIndex", skip_serializing_if = "Option::is_none")]
    pub col_index: Option<i64>,
    #[serde(rename = "rowCount", skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(rename = "colCount", skip_serializing_if = "Option::is_none")]
    pub col_count: Option<i64>,
    #[serde(rename = "posInSet", skip_serializing_if = "Option::is_none")]
    pub pos_in_set: Option<i64>,
    #[serde(rename = "setSize", skip_serializing_if = "Option::is_none")]
    pub set_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<Live>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autocomplete: Option<Autocomplete>,
    #[serde(rename = "keyShortcut", skip_serializing_if = "Option::is_none")]
    pub key_shortcut: Option<String>,
    #[serde(rename = "roledescription", skip_serializing_if = "Option::is_none")]
    pub roledescription: Option<String>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self == &Attributes::default()
    }
}

/// Transient viewport-clipping counters. Never serialized to JSON (§4.6);
/// only read by the compact-text emitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Clipped {
    pub above: u32,
    pub below: u32,
    pub left: u32,
    pub right: u32,
}

impl Clipped {
    pub fn is_empty(&self) -> bool {
        self.above == 0 && self.below == 0 && self.left == 0 && self.right == 0
    }

    pub fn total(&self) -> u32 {
        self.above + self.below + self.left + self.right
    }
}

/// A semantic UI element. See spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub role: Role,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(skip_serializing_if = "EnumSet::is_empty")]
    pub states: EnumSet<State>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    pub children: Vec<Node>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub platform: BTreeMap<String, serde_json::Value>,

    /// Never serialized (manual `Serialize` would be needed to *guarantee*
    /// omission from arbitrary consumers, but every emitter in this crate
    /// is hand-written and none of them read this field except the
    /// compact-text serializer).
    #[serde(skip)]
    pub clipped: Option<Clipped>,
}

impl Node {
    pub fn new(id: String, role: Role, name: String) -> Self {
        Node {
            id,
            role,
            name,
            description: Option::None,
            value: Option::None,
            bounds: Option::None,
            states: EnumSet::empty(),
            actions: Vec::new(),
            attributes: Attributes::default(),
            children: Vec::new(),
            platform: BTreeMap::new(),
            clipped: Option::None,
        }
    }

    pub fn has_meaningful_action(&self) -> bool {
        self.actions.iter().any(|a| a.is_meaningful())
    }

    /// A copy of `self` with `children` stripped, for search results (§4.8).
    pub fn without_children(&self) -> Node {
        Node {
            children: Vec::new(),
            clipped: Option::None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Macos,
    Linux,
    Web,
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Macos => "macos",
            Platform::Linux => "linux",
            Platform::Web => "web",
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Overview,
    Foreground,
    Desktop,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Minimal,
    Standard,
    Full,
}

impl Default for DetailLevel {
    fn default() -> Self {
        DetailLevel::Standard
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub w: i64,
    pub h: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(rename = "bundleId", skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowInfo {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(rename = "bundleId", skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// The top-level envelope document (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    pub platform: Platform,
    pub timestamp: i64,
    pub screen: ScreenInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<AppInfo>,
    pub tree: Vec<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows: Option<Vec<WindowInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolInfo>>,
}

pub const ENVELOPE_VERSION: &str = "0.1.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for &role in Role::ALL {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
    }

    #[test]
    fn role_all_has_72_entries() {
        // The glossary prose says 59; its own enumeration lists 72. We honor
        // the literal list (see DESIGN.md).
        assert_eq!(Role::ALL.len(), 72);
    }

    #[test]
    fn action_round_trips_through_str() {
        for a in [
            Action::Click,
            Action::Collapse,
            Action::Decrement,
            Action::Dismiss,
            Action::Doubleclick,
            Action::Expand,
            Action::Focus,
            Action::Increment,
            Action::Longpress,
            Action::PressKeys,
            Action::Rightclick,
            Action::Scroll,
            Action::Select,
            Action::Setvalue,
            Action::Toggle,
            Action::Type,
        ] {
            assert_eq!(Action::from_str(a.as_str()), Some(a));
        }
    }

    #[test]
    fn focus_is_not_meaningful() {
        assert!(!Action::Focus.is_meaningful());
        assert!(Action::Click.is_meaningful());
    }

    #[test]
    fn bounds_entirely_outside_detects_all_four_directions() {
        let screen = Bounds { x: 0, y: 0, w: 1000, h: 1000 };
        assert!(Bounds { x: -100, y: 0, w: 50, h: 50 }.entirely_outside(&screen));
        assert!(Bounds { x: 1000, y: 0, w: 50, h: 50 }.entirely_outside(&screen));
        assert!(Bounds { x: 0, y: -100, w: 50, h: 50 }.entirely_outside(&screen));
        assert!(Bounds { x: 0, y: 1000, w: 50, h: 50 }.entirely_outside(&screen));
        assert!(!Bounds { x: 500, y: 500, w: 50, h: 50 }.entirely_outside(&screen));
    }

    #[test]
    fn clipped_total_sums_all_directions() {
        let c = Clipped { above: 1, below: 2, left: 3, right: 4 };
        assert_eq!(c.total(), 10);
    }

    #[test]
    fn node_without_children_drops_subtree() {
        let mut n = Node::new("e0".into(), Role::Button, "Submit".into());
        n.children.push(Node::new("e1".into(), Role::Text, "x".into()));
        let stripped = n.without_children();
        assert!(stripped.children.is_empty());
    }
}
