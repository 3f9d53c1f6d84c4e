//! Session state machine, request types, and the action dispatcher (§3,
//! §4.8, §5): the one place that ties platform capture, canonical mapping,
//! tree transformation, serialization, and search together behind a single
//! `fresh -> loaded -> loaded'` state machine.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{ActionResult, CupError};
use crate::mapper::map_window;
use crate::model::{
    Action, AppInfo, Bounds, DetailLevel, Envelope, Node, Platform, Scope, WindowInfo, ENVELOPE_VERSION,
};
use crate::platform::{NativeRef, PlatformAdapter, WindowMetadata};
use crate::search::{search_tree, FindRequest, SearchHit};
use crate::serialize::{serialize_compact, serialize_json, DEFAULT_MAX_CHARS};
use crate::transform::prune_tree;

/// §9: "explicit structures" replacing the source's duck-typed option bags.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub scope: Scope,
    pub app_filter: Option<String>,
    pub max_depth: usize,
    pub detail: DetailLevel,
    pub output: OutputRequest,
}

#[derive(Debug, Clone, Default)]
pub struct OutputRequest {
    pub compact: bool,
    pub max_chars: usize,
}

impl Default for SnapshotRequest {
    fn default() -> Self {
        SnapshotRequest {
            scope: Scope::Foreground,
            app_filter: None,
            max_depth: 0,
            detail: DetailLevel::default(),
            output: OutputRequest { compact: false, max_chars: DEFAULT_MAX_CHARS },
        }
    }
}

/// One batch/execute action's parameters, tagged per action kind (§9).
#[derive(Debug, Clone)]
pub enum ActionParams {
    None,
    Value(String),
    Direction(String),
    Keys(String),
    Wait(u64),
}

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub element_id: Option<String>,
    pub action: Action,
    pub params: ActionParams,
}

/// The boundary form of [`ExecuteRequest`]: callers outside the core (the
/// CLI, the MCP server) hand the action across as a plain string rather
/// than the typed `Action` enum. `resolve` is where §4.8's "all other
/// action names fail with `unknown-action`" rule actually lives.
#[derive(Debug, Clone)]
pub struct RawExecuteRequest {
    pub element_id: Option<String>,
    pub action: String,
    pub params: ActionParams,
}

impl RawExecuteRequest {
    pub fn resolve(self) -> Result<ExecuteRequest, CupError> {
        match Action::from_str(&self.action) {
            Some(action) => Ok(ExecuteRequest { element_id: self.element_id, action, params: self.params }),
            None => Err(CupError::UnknownAction(format!("Unknown action: {}", self.action))),
        }
    }
}

/// `fresh` (no snapshot) -> `loaded` (snapshot present) -> `loaded'` (a
/// second snapshot superseded the first) (§4.8 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Loaded,
    LoadedPrime,
}

/// The session triple (§3/§5): the unpruned tree (search target), the
/// pruned tree (display target), and the id->native-ref map (action
/// target). Replaced atomically on every `snapshot()`.
pub struct Session {
    adapter: Box<dyn PlatformAdapter + Send>,
    platform: Platform,
    state: SessionState,
    screen: Bounds,
    unpruned: Vec<Node>,
    pruned: Vec<Node>,
    refs: BTreeMap<String, NativeRef>,
    last_foreground: Option<WindowMetadata>,
    last_app: Option<AppInfo>,
    last_windows: Vec<WindowInfo>,
}

impl Session {
    pub fn new(adapter: Box<dyn PlatformAdapter + Send>) -> Result<Self, CupError> {
        adapter.initialize()?;
        let platform = adapter.platform();
        Ok(Session {
            adapter,
            platform,
            state: SessionState::Fresh,
            screen: Bounds { x: 0, y: 0, w: 0, h: 0 },
            unpruned: Vec::new(),
            pruned: Vec::new(),
            refs: BTreeMap::new(),
            last_foreground: None,
            last_app: None,
            last_windows: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn windows_for_scope(&self, request: &SnapshotRequest) -> Result<Vec<WindowMetadata>, CupError> {
        let mut windows = match request.scope {
            Scope::Overview => Vec::new(),
            Scope::Foreground => self.adapter.get_foreground_window()?.into_iter().collect(),
            Scope::Desktop => self.adapter.get_desktop_window()?.into_iter().collect(),
            Scope::Full => self.adapter.get_all_windows()?,
        };

        if let Some(filter) = &request.app_filter {
            let needle = filter.to_lowercase();
            windows.retain(|w| w.title.to_lowercase().contains(&needle));
        }

        Ok(windows)
    }

    /// Capture, map, and (for display) prune a fresh snapshot, atomically
    /// replacing the session triple (§4.4).
    pub fn snapshot(&mut self, request: &SnapshotRequest) -> Result<Envelope, CupError> {
        let (w, h, scale) = self.adapter.get_screen_info()?;
        self.screen = Bounds { x: 0, y: 0, w, h };

        let window_list = self.adapter.get_window_list()?;
        self.last_windows = window_list
            .iter()
            .map(|m| WindowInfo {
                title: m.title.clone(),
                pid: m.pid,
                bundle_id: m.bundle_id.clone(),
                foreground: Some(m.foreground),
                bounds: m.bounds,
                url: m.url.clone(),
            })
            .collect();

        let target_windows = self.windows_for_scope(request)?;
        self.last_foreground = target_windows.first().cloned();
        self.last_app = self.last_foreground.as_ref().map(|m| AppInfo {
            name: Some(m.title.clone()),
            pid: m.pid,
            bundle_id: m.bundle_id.clone(),
        });

        let platform_tag = self.platform.as_str();
        let captures = self.adapter.capture_tree(&target_windows, request.max_depth)?;

        let mut next_id: u64 = 0;
        let mut roots = Vec::new();
        let mut refs = BTreeMap::new();
        for capture in captures {
            let mapped = map_window(platform_tag, capture, &self.screen, &mut next_id);
            roots.extend(mapped.roots);
            refs.extend(mapped.refs);
        }

        self.unpruned = roots;
        self.refs = refs;
        self.pruned = prune_tree(&self.unpruned, request.detail, &self.screen);
        self.state = match self.state {
            SessionState::Fresh => SessionState::Loaded,
            SessionState::Loaded | SessionState::LoadedPrime => SessionState::LoadedPrime,
        };

        Ok(Envelope {
            version: ENVELOPE_VERSION.to_string(),
            platform: self.platform,
            timestamp: current_millis(),
            screen: crate::model::ScreenInfo { w, h, scale: scale.filter(|s| (*s - 1.0).abs() > f64::EPSILON) },
            scope: Some(request.scope),
            app: self.last_app.clone(),
            tree: self.pruned.clone(),
            windows: if matches!(request.scope, Scope::Full | Scope::Overview) { Some(self.last_windows.clone()) } else { None },
            tools: None,
        })
    }

    /// Render the envelope currently held by the session to compact text.
    pub fn compact_text(&self, envelope: &Envelope, max_chars: usize) -> String {
        serialize_compact(envelope, self.unpruned.len(), max_chars)
    }

    pub fn json(&self, envelope: &Envelope) -> Result<String, serde_json::Error> {
        serialize_json(envelope)
    }

    /// `find` auto-snapshots `scope=foreground` when the session is fresh
    /// (§4.8 state machine).
    pub fn find(&mut self, request: &FindRequest) -> Result<Vec<SearchHit>, CupError> {
        if self.state == SessionState::Fresh {
            self.snapshot(&SnapshotRequest { scope: Scope::Foreground, ..Default::default() })?;
        }
        Ok(search_tree(&self.unpruned, request))
    }

    /// Entry point for callers that only have the action as a raw string
    /// (the CLI/MCP boundary, §1's "deliberately out of scope" layer);
    /// unrecognized names surface as `unknown-action` rather than panicking
    /// on an unmatched `Action` variant.
    pub fn execute_named(&self, request: RawExecuteRequest) -> ActionResult {
        match request.resolve() {
            Ok(req) => self.execute(&req),
            Err(e) => ActionResult::from_error(&e),
        }
    }

    /// Route one action to its platform handler, never raising (§7): every
    /// failure mode surfaces as `ActionResult { success: false, .. }`.
    pub fn execute(&self, request: &ExecuteRequest) -> ActionResult {
        if matches!(request.action, Action::PressKeys) {
            let combo = match &request.params {
                ActionParams::Keys(k) => k.clone(),
                _ => return ActionResult::fail("press_keys requires keys"),
            };
            return match dispatch_press_keys(self.platform, &combo, self.last_foreground.as_ref()) {
                Ok(msg) => ActionResult::ok(msg),
                Err(e) => ActionResult::from_error(&e),
            };
        }

        let element_id = match &request.element_id {
            Some(id) => id,
            None => return ActionResult::fail("element_id required"),
        };

        let native_ref = match self.refs.get(element_id) {
            Some(r) => r,
            None => return ActionResult::fail(format!("element {element_id} not found")),
        };

        if let Err(e) = validate_params(request.action, &request.params) {
            return ActionResult::from_error(&e);
        }

        match dispatch_native(native_ref, request.action, &request.params) {
            Ok(msg) => ActionResult::ok(msg),
            Err(e) => ActionResult::from_error(&e),
        }
    }

    /// Execute an ordered batch; `wait` is clamped to `[50, 5000]` ms and
    /// execution stops at the first non-successful result (§4.8).
    pub fn execute_batch(&self, batch: &[ExecuteRequest]) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(batch.len());
        for req in batch {
            let result = if let ActionParams::Wait(ms) = req.params {
                let clamped = ms.clamp(50, 5000);
                std::thread::sleep(std::time::Duration::from_millis(clamped));
                ActionResult::ok(format!("Waited {clamped}ms"))
            } else {
                self.execute(req)
            };
            let stop = !result.success;
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }
}

/// Milliseconds since the Unix epoch for the envelope's `timestamp` field
/// (§3). Falls back to 0 only if the system clock is set before the epoch.
fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn validate_params(action: Action, params: &ActionParams) -> Result<(), CupError> {
    match action {
        Action::Type | Action::Setvalue => match params {
            ActionParams::Value(v) if !v.is_empty() => Ok(()),
            _ => Err(CupError::InvalidParams("action requires value".into())),
        },
        Action::Scroll => match params {
            ActionParams::Direction(d) if matches!(d.as_str(), "up" | "down" | "left" | "right") => Ok(()),
            _ => Err(CupError::InvalidParams("scroll requires direction in {up,down,left,right}".into())),
        },
        _ => Ok(()),
    }
}

fn dispatch_native(native_ref: &NativeRef, action: Action, params: &ActionParams) -> Result<String, CupError> {
    match native_ref {
        NativeRef::Windows { hwnd, node_index } => dispatch_windows(*hwnd, node_index, action, params),
        NativeRef::Macos { pid, path } => dispatch_macos(*pid, path, action, params),
        NativeRef::Linux { bus_name, object_path } => dispatch_linux(bus_name, object_path, action, params),
        NativeRef::Web { ws_url, backend_id } => dispatch_web(ws_url, *backend_id, action, params),
    }
}

#[cfg(target_os = "windows")]
fn dispatch_windows(hwnd: isize, path: &[u32], action: Action, params: &ActionParams) -> Result<String, CupError> {
    use crate::platform::windows as w;
    match action {
        Action::Click => w::click(hwnd, path),
        Action::Toggle => w::toggle(hwnd, path),
        Action::Setvalue => value_param(params).and_then(|v| w::set_value(hwnd, path, v)),
        Action::Type => value_param(params).and_then(|v| w::type_text(hwnd, path, v)),
        Action::Expand => w::expand_collapse(hwnd, path, true),
        Action::Collapse => w::expand_collapse(hwnd, path, false),
        Action::Select => w::select(hwnd, path),
        Action::Scroll => direction_param(params).and_then(|d| w::scroll(hwnd, path, d)),
        Action::Increment => w::increment_decrement(hwnd, path, true),
        Action::Decrement => w::increment_decrement(hwnd, path, false),
        Action::Focus => w::focus(hwnd, path),
        Action::Rightclick => w::rightclick(hwnd, path),
        Action::Doubleclick => w::doubleclick(hwnd, path),
        Action::Longpress => w::longpress(hwnd, path),
        Action::Dismiss => w::dismiss(hwnd, path),
        Action::PressKeys => unreachable!("handled before ref resolution"),
    }
}

#[cfg(not(target_os = "windows"))]
fn dispatch_windows(_hwnd: isize, _path: &[u32], _action: Action, _params: &ActionParams) -> Result<String, CupError> {
    Err(CupError::PlatformUnsupported("windows native ref on a non-Windows build".into()))
}

#[cfg(target_os = "macos")]
fn dispatch_macos(pid: u32, path: &[usize], action: Action, params: &ActionParams) -> Result<String, CupError> {
    use crate::platform::macos as m;
    match action {
        Action::Click => m::click(pid, path),
        Action::Toggle => m::toggle(pid, path),
        Action::Setvalue => value_param(params).and_then(|v| m::set_value(pid, path, v)),
        Action::Type => value_param(params).and_then(|v| m::type_text(pid, path, v)),
        Action::Expand => m::expand_collapse(pid, path, true),
        Action::Collapse => m::expand_collapse(pid, path, false),
        Action::Select => m::select(pid, path),
        Action::Scroll => direction_param(params).and_then(|d| m::scroll(pid, path, d)),
        Action::Increment => m::increment_decrement(pid, path, true),
        Action::Decrement => m::increment_decrement(pid, path, false),
        Action::Focus => m::focus(pid, path),
        Action::Rightclick => m::rightclick(pid, path),
        Action::Doubleclick => m::doubleclick(pid, path),
        Action::Longpress => m::longpress(pid, path),
        Action::Dismiss => m::dismiss(pid, path),
        Action::PressKeys => unreachable!("handled before ref resolution"),
    }
}

#[cfg(not(target_os = "macos"))]
fn dispatch_macos(_pid: u32, _path: &[usize], _action: Action, _params: &ActionParams) -> Result<String, CupError> {
    Err(CupError::PlatformUnsupported("macos native ref on a non-macOS build".into()))
}

#[cfg(target_os = "linux")]
fn dispatch_linux(bus_name: &str, object_path: &str, action: Action, params: &ActionParams) -> Result<String, CupError> {
    use crate::platform::linux as l;
    match action {
        Action::Click => l::click(bus_name, object_path),
        Action::Toggle => l::toggle(bus_name, object_path),
        Action::Setvalue => value_param(params).and_then(|v| l::set_value(bus_name, object_path, v)),
        Action::Type => value_param(params).and_then(|v| l::type_text(bus_name, object_path, v)),
        Action::Expand => l::expand_collapse(bus_name, object_path, true),
        Action::Collapse => l::expand_collapse(bus_name, object_path, false),
        Action::Select => l::select(bus_name, object_path),
        Action::Scroll => direction_param(params).and_then(|d| l::scroll(bus_name, object_path, d)),
        Action::Increment => l::increment_decrement(bus_name, object_path, true),
        Action::Decrement => l::increment_decrement(bus_name, object_path, false),
        Action::Focus => l::focus(bus_name, object_path),
        Action::Rightclick => l::rightclick(bus_name, object_path),
        Action::Doubleclick => l::doubleclick(bus_name, object_path),
        Action::Longpress => l::longpress(bus_name, object_path),
        Action::Dismiss => l::dismiss(bus_name, object_path),
        Action::PressKeys => unreachable!("handled before ref resolution"),
    }
}

#[cfg(not(target_os = "linux"))]
fn dispatch_linux(_bus_name: &str, _object_path: &str, _action: Action, _params: &ActionParams) -> Result<String, CupError> {
    Err(CupError::PlatformUnsupported("linux native ref on a non-Linux build".into()))
}

fn dispatch_web(ws_url: &str, backend_id: i64, action: Action, params: &ActionParams) -> Result<String, CupError> {
    use crate::platform::web as web;
    match action {
        Action::Click => web::click(ws_url, backend_id),
        Action::Toggle => web::toggle(ws_url, backend_id),
        Action::Setvalue => value_param(params).and_then(|v| web::set_value(ws_url, backend_id, v)),
        Action::Type => value_param(params).and_then(|v| web::type_text(ws_url, backend_id, v)),
        Action::Expand => web::expand_collapse(ws_url, backend_id, true),
        Action::Collapse => web::expand_collapse(ws_url, backend_id, false),
        Action::Select => web::select(ws_url, backend_id),
        Action::Scroll => direction_param(params).and_then(|d| web::scroll(ws_url, backend_id, d)),
        Action::Increment => web::increment_decrement(ws_url, backend_id, true),
        Action::Decrement => web::increment_decrement(ws_url, backend_id, false),
        Action::Focus => web::focus(ws_url, backend_id),
        Action::Rightclick => web::rightclick(ws_url, backend_id),
        Action::Doubleclick => web::doubleclick(ws_url, backend_id),
        Action::Longpress => web::longpress(ws_url, backend_id),
        Action::Dismiss => web::dismiss(ws_url, backend_id),
        Action::PressKeys => unreachable!("handled before ref resolution"),
    }
}

fn value_param(params: &ActionParams) -> Result<&str, CupError> {
    match params {
        ActionParams::Value(v) => Ok(v.as_str()),
        _ => Err(CupError::InvalidParams("action requires value".into())),
    }
}

fn direction_param(params: &ActionParams) -> Result<&str, CupError> {
    match params {
        ActionParams::Direction(d) => Ok(d.as_str()),
        _ => Err(CupError::InvalidParams("action requires direction".into())),
    }
}

// ---------------------------------------------------------------------------
// Key combo parsing (§4.8) and per-platform key dispatch.
// ---------------------------------------------------------------------------

const MODIFIER_NAMES: &[&str] = &["ctrl", "alt", "shift", "meta"];

fn normalize_key_token(token: &str) -> String {
    let t = token.trim().to_lowercase();
    match t.as_str() {
        "return" => "enter".to_string(),
        "esc" => "escape".to_string(),
        "del" => "delete".to_string(),
        "bs" => "backspace".to_string(),
        "cmd" | "super" | "win" => "meta".to_string(),
        "pgup" => "pageup".to_string(),
        "pgdn" => "pagedown".to_string(),
        other => other.to_string(),
    }
}

/// `parseCombo("Ctrl+Shift+P")` -> `(["ctrl","shift"], ["p"])` (§8 property 9).
/// If no main keys remain after pulling out modifiers, the modifiers
/// themselves become the main keys and carry no modifier mask.
pub fn parse_combo(combo: &str) -> (Vec<String>, Vec<String>) {
    let tokens: Vec<String> = combo.split('+').map(normalize_key_token).filter(|t| !t.is_empty()).collect();

    let (modifiers, mains): (Vec<String>, Vec<String>) = tokens.into_iter().partition(|t| MODIFIER_NAMES.contains(&t.as_str()));

    if mains.is_empty() {
        (Vec::new(), modifiers)
    } else {
        (modifiers, mains)
    }
}

fn windows_vk_code(key: &str) -> Option<u16> {
    Some(match key {
        "ctrl" => 0x11,
        "alt" => 0x12,
        "shift" => 0x10,
        "meta" => 0x5B,
        "enter" => 0x0D,
        "escape" => 0x1B,
        "tab" => 0x09,
        "space" => 0x20,
        "backspace" => 0x08,
        "delete" => 0x2E,
        "insert" => 0x2D,
        "home" => 0x24,
        "end" => 0x23,
        "pageup" => 0x21,
        "pagedown" => 0x22,
        "up" => 0x26,
        "down" => 0x28,
        "left" => 0x25,
        "right" => 0x27,
        "f1" => 0x70,
        "f2" => 0x71,
        "f3" => 0x72,
        "f4" => 0x73,
        "f5" => 0x74,
        "f6" => 0x75,
        "f7" => 0x76,
        "f8" => 0x77,
        "f9" => 0x78,
        "f10" => 0x79,
        "f11" => 0x7A,
        "f12" => 0x7B,
        k if k.len() == 1 => {
            let c = k.chars().next().unwrap();
            if c.is_ascii_alphabetic() {
                c.to_ascii_uppercase() as u16
            } else if c.is_ascii_digit() {
                c as u16
            } else {
                return None;
            }
        }
        _ => return None,
    })
}

/// xdotool's own keysym naming, distinct from this crate's canonical names.
fn xdotool_keysym(key: &str) -> String {
    match key {
        "ctrl" => "ctrl".to_string(),
        "alt" => "alt".to_string(),
        "shift" => "shift".to_string(),
        "meta" => "super".to_string(),
        "enter" => "Return".to_string(),
        "escape" => "Escape".to_string(),
        "tab" => "Tab".to_string(),
        "space" => "space".to_string(),
        "backspace" => "BackSpace".to_string(),
        "delete" => "Delete".to_string(),
        "insert" => "Insert".to_string(),
        "home" => "Home".to_string(),
        "end" => "End".to_string(),
        "pageup" => "Page_Up".to_string(),
        "pagedown" => "Page_Down".to_string(),
        "up" => "Up".to_string(),
        "down" => "Down".to_string(),
        "left" => "Left".to_string(),
        "right" => "Right".to_string(),
        k if k.len() == 1 => k.to_string(),
        other => other.to_string(),
    }
}

/// CDP's `key` field naming for `Input.dispatchKeyEvent`.
fn cdp_key_name(key: &str) -> String {
    match key {
        "enter" => "Enter".to_string(),
        "escape" => "Escape".to_string(),
        "tab" => "Tab".to_string(),
        "space" => " ".to_string(),
        "backspace" => "Backspace".to_string(),
        "delete" => "Delete".to_string(),
        "insert" => "Insert".to_string(),
        "home" => "Home".to_string(),
        "end" => "End".to_string(),
        "pageup" => "PageUp".to_string(),
        "pagedown" => "PageDown".to_string(),
        "up" => "ArrowUp".to_string(),
        "down" => "ArrowDown".to_string(),
        "left" => "ArrowLeft".to_string(),
        "right" => "ArrowRight".to_string(),
        "meta" => "Meta".to_string(),
        "ctrl" => "Control".to_string(),
        "alt" => "Alt".to_string(),
        "shift" => "Shift".to_string(),
        other => other.to_string(),
    }
}

fn cdp_modifier_mask(modifiers: &[String]) -> u8 {
    let mut mask = 0u8;
    for m in modifiers {
        mask |= match m.as_str() {
            "alt" => 1,
            "ctrl" => 2,
            "meta" => 4,
            "shift" => 8,
            _ => 0,
        };
    }
    mask
}

fn dispatch_press_keys(platform: Platform, combo: &str, foreground: Option<&WindowMetadata>) -> Result<String, CupError> {
    let (modifiers, mains) = parse_combo(combo);

    match platform {
        Platform::Windows => {
            #[cfg(target_os = "windows")]
            {
                let mut codes = Vec::new();
                for m in &modifiers {
                    codes.push(windows_vk_code(m).ok_or_else(|| CupError::InvalidParams(format!("unknown key {m}")))?);
                }
                for k in &mains {
                    codes.push(windows_vk_code(k).ok_or_else(|| CupError::InvalidParams(format!("unknown key {k}")))?);
                }
                crate::platform::windows::send_hotkey_raw(&codes);
                Ok(format!("Pressed: {combo}"))
            }
            #[cfg(not(target_os = "windows"))]
            {
                Err(CupError::PlatformUnsupported("windows key dispatch on a non-Windows build".into()))
            }
        }
        Platform::Macos => {
            #[cfg(target_os = "macos")]
            {
                crate::platform::macos::press_keys(combo)
            }
            #[cfg(not(target_os = "macos"))]
            {
                Err(CupError::PlatformUnsupported("macos key dispatch on a non-macOS build".into()))
            }
        }
        Platform::Linux => {
            #[cfg(target_os = "linux")]
            {
                let joined: Vec<String> = modifiers.iter().chain(mains.iter()).map(|k| xdotool_keysym(k)).collect();
                crate::platform::linux::press_keys(&joined.join("+"))
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err(CupError::PlatformUnsupported("linux key dispatch on a non-Linux build".into()))
            }
        }
        Platform::Web => {
            let ws_url = match foreground.map(|m| &m.handle) {
                Some(crate::platform::WindowHandle::Web { ws_url }) => ws_url.clone(),
                _ => return Err(CupError::InvalidParams("no active web page for key dispatch".into())),
            };
            let mask = cdp_modifier_mask(&modifiers);
            let key = mains.last().map(|k| cdp_key_name(k)).unwrap_or_default();
            crate::platform::web::press_keys(&ws_url, mask, &key)
        }
        Platform::Android | Platform::Ios => Err(CupError::PlatformUnsupported(format!("{} has no adapter", platform.as_str()))),
    }
}

/// Process-wide convenience session (§9: "a convenience wrapper that lazily
/// creates a process-wide default session is acceptable but must not leak
/// across concurrent independent callers"). Each call locks the same
/// mutex, so operations interleave safely but callers who need isolation
/// should construct their own [`Session`] instead of using this.
static DEFAULT_SESSION: OnceLock<Mutex<Session>> = OnceLock::new();

pub fn default_session() -> Result<&'static Mutex<Session>, CupError> {
    if let Some(s) = DEFAULT_SESSION.get() {
        return Ok(s);
    }
    let adapter = current_platform_adapter()?;
    let session = Session::new(adapter)?;
    Ok(DEFAULT_SESSION.get_or_init(|| Mutex::new(session)))
}

fn current_platform_adapter() -> Result<Box<dyn PlatformAdapter + Send>, CupError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(crate::platform::windows::WindowsAdapter::default()))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(crate::platform::macos::MacosAdapter::default()))
    }
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(crate::platform::linux::LinuxAdapter::default()))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        Err(CupError::PlatformUnsupported("no adapter for this host OS".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_9_parse_combo_is_case_and_space_insensitive() {
        assert_eq!(parse_combo("Ctrl+Shift+P"), parse_combo("ctrl + shift + p"));
        assert_eq!(parse_combo("ctrl+shift+p"), (vec!["ctrl".to_string(), "shift".to_string()], vec!["p".to_string()]));
    }

    #[test]
    fn parse_combo_aliases_normalize() {
        let (mods, mains) = parse_combo("cmd+Return");
        assert_eq!(mods, vec!["meta"]);
        assert_eq!(mains, vec!["enter"]);
    }

    #[test]
    fn parse_combo_modifier_only_becomes_main_key() {
        let (mods, mains) = parse_combo("ctrl");
        assert!(mods.is_empty());
        assert_eq!(mains, vec!["ctrl"]);
    }

    #[test]
    fn scenario_f_unknown_element_fails_with_not_found_message() {
        struct NullAdapter;
        impl PlatformAdapter for NullAdapter {
            fn platform(&self) -> Platform {
                Platform::Windows
            }
            fn initialize(&self) -> Result<(), CupError> {
                Ok(())
            }
            fn get_screen_info(&self) -> Result<(i64, i64, Option<f64>), CupError> {
                Ok((1920, 1080, None))
            }
            fn get_foreground_window(&self) -> Result<Option<WindowMetadata>, CupError> {
                Ok(None)
            }
            fn get_all_windows(&self) -> Result<Vec<WindowMetadata>, CupError> {
                Ok(Vec::new())
            }
            fn get_window_list(&self) -> Result<Vec<WindowMetadata>, CupError> {
                Ok(Vec::new())
            }
            fn get_desktop_window(&self) -> Result<Option<WindowMetadata>, CupError> {
                Ok(None)
            }
            fn capture_tree(&self, _windows: &[WindowMetadata], _max_depth: usize) -> Result<Vec<crate::platform::WindowCapture>, CupError> {
                Ok(Vec::new())
            }
        }

        let session = Session::new(Box::new(NullAdapter)).unwrap();
        let result = session.execute(&ExecuteRequest { element_id: Some("e99".into()), action: Action::Click, params: ActionParams::None });
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));

        let result = session.execute(&ExecuteRequest { element_id: Some("e14".into()), action: Action::Type, params: ActionParams::None });
        assert!(!result.success);

        let result = session.execute(&ExecuteRequest { element_id: Some("e14".into()), action: Action::Focus, params: ActionParams::None });
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));

        let result = session.execute_named(RawExecuteRequest {
            element_id: Some("e14".into()),
            action: "fly".into(),
            params: ActionParams::None,
        });
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Unknown action"));
    }

    #[test]
    fn batch_stops_on_first_failure() {
        struct NullAdapter;
        impl PlatformAdapter for NullAdapter {
            fn platform(&self) -> Platform {
                Platform::Windows
            }
            fn initialize(&self) -> Result<(), CupError> {
                Ok(())
            }
            fn get_screen_info(&self) -> Result<(i64, i64, Option<f64>), CupError> {
                Ok((1920, 1080, None))
            }
            fn get_foreground_window(&self) -> Result<Option<WindowMetadata>, CupError> {
                Ok(None)
            }
            fn get_all_windows(&self) -> Result<Vec<WindowMetadata>, CupError> {
                Ok(Vec::new())
            }
            fn get_window_list(&self) -> Result<Vec<WindowMetadata>, CupError> {
                Ok(Vec::new())
            }
            fn get_desktop_window(&self) -> Result<Option<WindowMetadata>, CupError> {
                Ok(None)
            }
            fn capture_tree(&self, _windows: &[WindowMetadata], _max_depth: usize) -> Result<Vec<crate::platform::WindowCapture>, CupError> {
                Ok(Vec::new())
            }
        }

        let session = Session::new(Box::new(NullAdapter)).unwrap();
        let batch = vec![
            ExecuteRequest { element_id: Some("missing".into()), action: Action::Click, params: ActionParams::None },
            ExecuteRequest { element_id: Some("also-missing".into()), action: Action::Click, params: ActionParams::None },
        ];
        let results = session.execute_batch(&batch);
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
    }
}
