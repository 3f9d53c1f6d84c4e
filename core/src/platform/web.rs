//! Web ingestion and action adapter over the Chrome DevTools Protocol,
//! reached synchronously via `tungstenite` (matching the rest of this
//! crate's non-async architecture) rather than an async CDP client crate.
//!
//! Target discovery uses the browser's plain HTTP `/json/list` endpoint;
//! since nothing async or higher-level than `tungstenite`/`url` is in the
//! dependency stack, the HTTP GET is hand-rolled over a raw `TcpStream`
//! (§9 "Native subprocess contracts" covers the OS adapters; this is the
//! one adapter that speaks a network protocol instead of spawning a helper).

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tungstenite::{connect, Message, WebSocket};
use tungstenite::stream::MaybeTlsStream;

use crate::error::CupError;
use crate::model::Platform;

use super::{
    CaptureStats, NativeRef, PlatformAdapter, PlatformAttrs, RawNode, WindowCapture, WindowHandle,
    WindowMetadata,
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

fn cdp_port() -> u16 {
    std::env::var("CUP_CDP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9222)
}

fn cdp_host() -> String {
    std::env::var("CUP_CDP_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned())
}

#[derive(Debug, Deserialize)]
struct CdpTarget {
    #[serde(rename = "type")]
    target_type: String,
    title: Option<String>,
    url: Option<String>,
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: Option<String>,
}

pub struct WebAdapter;

impl WebAdapter {
    pub fn new() -> Self {
        WebAdapter
    }
}

impl Default for WebAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for WebAdapter {
    fn platform(&self) -> Platform {
        Platform::Web
    }

    fn initialize(&self) -> Result<(), CupError> {
        list_targets()?;
        Ok(())
    }

    fn get_screen_info(&self) -> Result<(i64, i64, Option<f64>), CupError> {
        // CDP has no screen query; a page target's viewport stands in.
        let targets = list_targets()?;
        let first = targets
            .iter()
            .find(|t| t.target_type == "page" && t.ws_url.is_some())
            .ok_or_else(|| CupError::PlatformUnavailable("no page targets on CDP endpoint".into()))?;
        let mut socket = connect_to(first.ws_url.as_ref().unwrap())?;
        let result = eval_js(&mut socket, "({w: window.innerWidth, h: window.innerHeight})")?;
        let w = result.get("w").and_then(Value::as_i64).unwrap_or(1920);
        let h = result.get("h").and_then(Value::as_i64).unwrap_or(1080);
        Ok((w, h, None))
    }

    fn get_foreground_window(&self) -> Result<Option<WindowMetadata>, CupError> {
        let all = self.get_window_list()?;
        Ok(all.into_iter().next())
    }

    fn get_all_windows(&self) -> Result<Vec<WindowMetadata>, CupError> {
        self.get_window_list()
    }

    fn get_window_list(&self) -> Result<Vec<WindowMetadata>, CupError> {
        let targets = list_targets()?;
        Ok(targets
            .into_iter()
            .filter(|t| t.target_type == "page")
            .filter_map(|t| {
                let ws_url = t.ws_url?;
                Some(WindowMetadata {
                    handle: WindowHandle::Web { ws_url: ws_url.clone() },
                    title: t.title.unwrap_or_default(),
                    pid: None,
                    bundle_id: None,
                    url: t.url,
                    foreground: false,
                    bounds: None,
                })
            })
            .collect())
    }

    fn get_desktop_window(&self) -> Result<Option<WindowMetadata>, CupError> {
        Ok(None)
    }

    fn capture_tree(
        &self,
        windows: &[WindowMetadata],
        _max_depth: usize,
    ) -> Result<Vec<WindowCapture>, CupError> {
        // CDP round-trips are WebSocket, not a subprocess, so no rayon
        // fan-out here: each page needs its own socket and the protocol's
        // own latency already comes from one round-trip per page, not
        // per-node, the way UIA/AX/AT-SPI do.
        Ok(windows
            .iter()
            .map(|w| match &w.handle {
                WindowHandle::Web { ws_url } => {
                    capture_one_page(ws_url).unwrap_or_default()
                }
                _ => WindowCapture::default(),
            })
            .collect())
    }
}

fn list_targets() -> Result<Vec<CdpTarget>, CupError> {
    let host = cdp_host();
    let port = cdp_port();
    let body = http_get(&host, port, "/json/list")?;
    serde_json::from_str(&body)
        .map_err(|e| CupError::PlatformFailure(format!("CDP /json/list parse error: {e}")))
}

/// Hand-rolled HTTP/1.1 GET: one request line, `Host`/`Connection: close`
/// headers, then reads until EOF and strips the header block.
fn http_get(host: &str, port: u16, path: &str) -> Result<String, CupError> {
    let mut stream = TcpStream::connect((host, port)).map_err(CupError::from)?;
    stream
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(CupError::from)?;
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}:{port}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).map_err(CupError::from)?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).map_err(CupError::from)?;
    let text = String::from_utf8_lossy(&raw);
    let body_start = text
        .find("\r\n\r\n")
        .ok_or_else(|| CupError::PlatformFailure("malformed HTTP response from CDP endpoint".into()))?;
    Ok(text[body_start + 4..].to_owned())
}

type CdpSocket = WebSocket<MaybeTlsStream<TcpStream>>;

fn connect_to(ws_url: &str) -> Result<CdpSocket, CupError> {
    let (socket, _response) = connect(ws_url)
        .map_err(|e| CupError::PlatformFailure(format!("CDP websocket connect failed: {e}")))?;
    Ok(socket)
}

static NEXT_MESSAGE_ID: AtomicI64 = AtomicI64::new(1);

fn send_command(socket: &mut CdpSocket, method: &str, params: Value) -> Result<Value, CupError> {
    let id = NEXT_MESSAGE_ID.fetch_add(1, Ordering::SeqCst);
    let request = json!({ "id": id, "method": method, "params": params });
    socket
        .send(Message::Text(request.to_string()))
        .map_err(CupError::from)?;

    let start = std::time::Instant::now();
    loop {
        if start.elapsed() > REPLY_TIMEOUT {
            return Err(CupError::PlatformTimeout(format!("CDP reply for {method} timed out")));
        }
        let msg = socket.read().map_err(CupError::from)?;
        let Message::Text(text) = msg else { continue };
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| CupError::PlatformFailure(format!("CDP reply parse error: {e}")))?;
        if parsed.get("id").and_then(Value::as_i64) != Some(id) {
            continue;
        }
        if let Some(error) = parsed.get("error") {
            let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
            // A `backendNodeId` captured at snapshot time stops resolving once the
            // page's DOM has mutated underneath it; CDP reports that as a generic
            // node-not-found message on `DOM.resolveNode`/`DOM.describeNode` rather
            // than a distinct error code.
            if message.contains("No node with given id found") || message.contains("Could not find node") {
                return Err(CupError::StaleSnapshot(format!("backendNodeId no longer resolves: {message}")));
            }
            return Err(CupError::PlatformFailure(format!("CDP error for {method}: {error}")));
        }
        return Ok(parsed.get("result").cloned().unwrap_or(Value::Null));
    }
}

fn eval_js(socket: &mut CdpSocket, expression: &str) -> Result<Value, CupError> {
    send_command(socket, "Runtime.enable", json!({}))?;
    let result = send_command(
        socket,
        "Runtime.evaluate",
        json!({ "expression": expression, "returnByValue": true }),
    )?;
    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

fn capture_one_page(ws_url: &str) -> Result<WindowCapture, CupError> {
    let mut socket = connect_to(ws_url)?;
    send_command(&mut socket, "Accessibility.enable", json!({}))?;
    let result = send_command(&mut socket, "Accessibility.getFullAXTree", json!({}))?;
    let raw_nodes = result
        .get("nodes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let tools = enumerate_model_context_tools(&mut socket).unwrap_or_default();

    // `getFullAXTree` returns nodes with `childIds`, not parent pointers, so
    // build the reverse edge once and walk each node up to its root to get
    // its pre-order depth.
    let mut parent_of: std::collections::HashMap<&str, &str> = std::collections::HashMap::new();
    for node in &raw_nodes {
        let Some(id) = node.get("nodeId").and_then(Value::as_str) else { continue };
        if let Some(children) = node.get("childIds").and_then(Value::as_array) {
            for child in children {
                if let Some(child_id) = child.as_str() {
                    parent_of.insert(child_id, id);
                }
            }
        }
    }
    let mut depth_by_id: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for node in &raw_nodes {
        let Some(id) = node.get("nodeId").and_then(Value::as_str) else { continue };
        let mut depth = 0usize;
        let mut cursor = id;
        while let Some(parent) = parent_of.get(cursor) {
            depth += 1;
            cursor = parent;
            if depth > 4096 {
                break;
            }
        }
        depth_by_id.insert(id, depth);
    }

    let mut nodes = Vec::with_capacity(raw_nodes.len());
    let mut stats = CaptureStats::default();
    for node in &raw_nodes {
        let depth = node
            .get("nodeId")
            .and_then(Value::as_str)
            .and_then(|id| depth_by_id.get(id))
            .copied()
            .unwrap_or(0);
        let attrs = cdp_node_to_attrs(node, tools.as_ref());
        let backend_id = node.get("backendDOMNodeId").and_then(Value::as_i64).unwrap_or(-1);
        stats.record(depth, &attrs.role_native);
        nodes.push(RawNode {
            depth,
            attrs,
            native_ref: NativeRef::Web {
                ws_url: ws_url.to_owned(),
                backend_id,
            },
        });
    }
    Ok(WindowCapture { nodes, stats })
}

fn enumerate_model_context_tools(socket: &mut CdpSocket) -> Result<Option<Value>, CupError> {
    let value = eval_js(
        socket,
        "(window.navigator && window.navigator.modelContext && \
         typeof window.navigator.modelContext.listTools === 'function') \
         ? window.navigator.modelContext.listTools() : null",
    )?;
    if value.is_null() {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

fn cdp_node_to_attrs(node: &Value, _tools: Option<&Value>) -> PlatformAttrs {
    let mut attrs = PlatformAttrs::default();
    attrs.role_native = node
        .get("role")
        .and_then(|r| r.get("value"))
        .and_then(Value::as_str)
        .unwrap_or("generic")
        .to_owned();
    attrs.name = node
        .get("name")
        .and_then(|r| r.get("value"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    attrs.description = node
        .get("description")
        .and_then(|r| r.get("value"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    attrs.value = node
        .get("value")
        .and_then(|r| r.get("value"))
        .map(|v| v.to_string())
        .unwrap_or_default();
    if let Ok(n) = attrs.value.trim_matches('"').parse::<f64>() {
        attrs.numbers.insert("valueNow", n);
    }
    if CLICKABLE_ROLES.contains(&attrs.role_native.as_str()) {
        attrs.bools.insert("clickable", true);
    }

    if let Some(bbox) = node.get("boundingBox") {
        attrs.bounds = Some(crate::model::Bounds {
            x: bbox.get("x").and_then(Value::as_i64).unwrap_or(0),
            y: bbox.get("y").and_then(Value::as_i64).unwrap_or(0),
            w: bbox.get("width").and_then(Value::as_i64).unwrap_or(0),
            h: bbox.get("height").and_then(Value::as_i64).unwrap_or(0),
        });
    }

    if let Some(props) = node.get("properties").and_then(Value::as_array) {
        for prop in props {
            let Some(name) = prop.get("name").and_then(Value::as_str) else { continue };
            let Some(value) = prop.get("value") else { continue };
            if let Some(b) = value.get("value").and_then(Value::as_bool) {
                attrs.bools.insert(leak_prop_name(name), b);
            } else if let Some(s) = value.get("value").and_then(Value::as_str) {
                attrs.strings.insert(leak_prop_name(name), s.to_owned());
            } else if let Some(n) = value.get("value").and_then(Value::as_f64) {
                attrs.numbers.insert(leak_prop_name(name), n);
            }
        }
    }
    attrs.raw_json = node.clone();
    attrs
}

/// `PlatformAttrs`' maps key on `&'static str`; CDP's `properties[]` names
/// come from a small fixed AX property vocabulary, so interning through a
/// match (rather than `Box::leak`) keeps this allocation-free.
fn leak_prop_name(name: &str) -> &'static str {
    match name {
        "focusable" => "focusable",
        "focused" => "focused",
        "disabled" => "disabled",
        "hidden" => "hidden",
        "invalid" => "invalid",
        "required" => "required",
        "checked" => "checked",
        "pressed" => "pressed",
        "selected" => "selected",
        "expanded" => "expanded",
        "modal" => "modal",
        "multiselectable" => "multiselectable",
        "readonly" => "readonly",
        "level" => "level",
        "valuemin" => "valueMin",
        "valuemax" => "valueMax",
        "valuetext" => "valuetext",
        "autocomplete" => "autocomplete",
        "live" => "live",
        "roledescription" => "roledescription",
        "url" => "url",
        "orientation" => "orientation",
        "placeholder" => "placeholder",
        "keyshortcuts" => "keyShortcut",
        "setsize" => "setSize",
        "posinset" => "posInSet",
        _ => "other",
    }
}

/// CDP's AX property vocabulary has no boolean equivalent of UIA's
/// `HasInvokePattern`; derive one from role so `map_actions` can still
/// derive `Click` for web nodes, mirroring how `hasInvokePattern` gates
/// Click on the other platforms.
const CLICKABLE_ROLES: &[&str] = &[
    "button",
    "link",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "tab",
    "radio",
    "switch",
    "checkbox",
    "option",
];

pub fn click(ws_url: &str, backend_id: i64) -> Result<String, CupError> {
    let mut socket = connect_to(ws_url)?;
    send_command(&mut socket, "DOM.enable", json!({}))?;
    send_command(
        &mut socket,
        "DOM.resolveNode",
        json!({ "backendNodeId": backend_id }),
    )?;
    eval_js(
        &mut socket,
        &format!(
            "(function(){{ const el = window.__cupResolve && window.__cupResolve({backend_id}); \
             if (el) {{ el.click(); return true; }} return false; }})()"
        ),
    )?;
    Ok("Clicked".into())
}

pub fn focus(ws_url: &str, backend_id: i64) -> Result<String, CupError> {
    let mut socket = connect_to(ws_url)?;
    send_command(&mut socket, "DOM.enable", json!({}))?;
    send_command(
        &mut socket,
        "DOM.focus",
        json!({ "backendNodeId": backend_id }),
    )?;
    Ok("Focused".into())
}

pub fn set_value(ws_url: &str, backend_id: i64, value: &str) -> Result<String, CupError> {
    let mut socket = connect_to(ws_url)?;
    send_command(&mut socket, "DOM.enable", json!({}))?;
    let script = format!(
        "(function(){{ const r = window.__cupResolve && window.__cupResolve({backend_id}); \
         if (!r) return false; r.value = {value:?}; \
         r.dispatchEvent(new Event('input', {{bubbles: true}})); return true; }})()"
    );
    eval_js(&mut socket, &script)?;
    Ok(format!("Typed: {value}"))
}

pub fn type_text(ws_url: &str, backend_id: i64, value: &str) -> Result<String, CupError> {
    set_value(ws_url, backend_id, value)
}

fn eval_resolved(ws_url: &str, backend_id: i64, body: &str) -> Result<(), CupError> {
    let mut socket = connect_to(ws_url)?;
    send_command(&mut socket, "DOM.enable", json!({}))?;
    let script = format!(
        "(function(){{ const el = window.__cupResolve && window.__cupResolve({backend_id}); \
         if (!el) return false; {body} return true; }})()"
    );
    eval_js(&mut socket, &script)?;
    Ok(())
}

pub fn toggle(ws_url: &str, backend_id: i64) -> Result<String, CupError> {
    eval_resolved(ws_url, backend_id, "el.checked = !el.checked; el.dispatchEvent(new Event('change', {bubbles: true}));")?;
    Ok("Toggled".into())
}

pub fn select(ws_url: &str, backend_id: i64) -> Result<String, CupError> {
    eval_resolved(ws_url, backend_id, "el.selected = true; el.dispatchEvent(new Event('change', {bubbles: true}));")?;
    Ok("Selected".into())
}

pub fn expand_collapse(ws_url: &str, backend_id: i64, expand: bool) -> Result<String, CupError> {
    eval_resolved(ws_url, backend_id, &format!("el.setAttribute('aria-expanded', '{expand}');"))?;
    Ok(if expand { "Expanded".into() } else { "Collapsed".into() })
}

pub fn scroll(ws_url: &str, backend_id: i64, direction: &str) -> Result<String, CupError> {
    let (dx, dy) = match direction {
        "up" => (0, -200),
        "down" => (0, 200),
        "left" => (-200, 0),
        "right" => (200, 0),
        other => return Err(CupError::InvalidParams(format!("invalid direction {other}"))),
    };
    eval_resolved(ws_url, backend_id, &format!("el.scrollBy({dx}, {dy});"))?;
    Ok(format!("Scrolled {direction}"))
}

pub fn increment_decrement(ws_url: &str, backend_id: i64, increment: bool) -> Result<String, CupError> {
    let delta = if increment { 1 } else { -1 };
    eval_resolved(
        ws_url,
        backend_id,
        &format!("const step = Number(el.step) || 1; el.value = Number(el.value || 0) + step * {delta}; el.dispatchEvent(new Event('input', {{bubbles: true}}));"),
    )?;
    Ok(if increment { "Incremented".into() } else { "Decremented".into() })
}

pub fn rightclick(ws_url: &str, backend_id: i64) -> Result<String, CupError> {
    eval_resolved(ws_url, backend_id, "el.dispatchEvent(new MouseEvent('contextmenu', {bubbles: true}));")?;
    Ok("Clicked".into())
}

pub fn doubleclick(ws_url: &str, backend_id: i64) -> Result<String, CupError> {
    eval_resolved(ws_url, backend_id, "el.dispatchEvent(new MouseEvent('dblclick', {bubbles: true}));")?;
    Ok("Clicked".into())
}

pub fn dismiss(ws_url: &str, backend_id: i64) -> Result<String, CupError> {
    eval_resolved(ws_url, backend_id, "el.dispatchEvent(new KeyboardEvent('keydown', {key: 'Escape', bubbles: true}));")?;
    Ok("Dismissed".into())
}

pub fn longpress(ws_url: &str, backend_id: i64) -> Result<String, CupError> {
    eval_resolved(ws_url, backend_id, "el.click();")?;
    Ok("Clicked".into())
}

/// Session-level: no backend node id, dispatched to the page as a whole via
/// `Input.dispatchKeyEvent` (modifiers bitmask per CDP: Alt=1, Ctrl=2, Meta=4, Shift=8).
pub fn press_keys(ws_url: &str, modifiers: u8, key: &str) -> Result<String, CupError> {
    let mut socket = connect_to(ws_url)?;
    send_command(&mut socket, "Input.enable", json!({}))?;
    for event_type in ["keyDown", "keyUp"] {
        send_command(
            &mut socket,
            "Input.dispatchKeyEvent",
            json!({ "type": event_type, "key": key, "modifiers": modifiers }),
        )?;
    }
    Ok(format!("Pressed: {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leak_prop_name_falls_back_to_other_for_unknown() {
        assert_eq!(leak_prop_name("bogus-prop"), "other");
        assert_eq!(leak_prop_name("checked"), "checked");
    }

    #[test]
    fn cdp_port_defaults_to_9222_without_env() {
        std::env::remove_var("CUP_CDP_PORT");
        assert_eq!(cdp_port(), 9222);
    }

    #[test]
    fn cdp_node_to_attrs_reads_role_name_and_bounds() {
        let node = json!({
            "role": {"value": "button"},
            "name": {"value": "Submit"},
            "boundingBox": {"x": 1, "y": 2, "width": 3, "height": 4},
        });
        let attrs = cdp_node_to_attrs(&node, None);
        assert_eq!(attrs.role_native, "button");
        assert_eq!(attrs.name, "Submit");
        assert_eq!(attrs.bounds.unwrap().w, 3);
    }
}
