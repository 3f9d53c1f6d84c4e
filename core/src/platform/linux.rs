//! Linux ingestion and action adapter over AT-SPI2, reached exclusively
//! through `gdbus call` subprocess invocations (never `zbus`/`atspi` direct
//! bindings, per the native subprocess contract of §9) and `xdotool` for
//! input. Root is `/org/a11y/atspi/accessible/root` on bus
//! `org.a11y.atspi.Registry` (§4.2).

use std::process::{Command, Stdio};
use std::time::Duration;

use rayon::prelude::*;

use crate::error::CupError;
use crate::model::{Bounds, Platform};

use super::{
    CaptureStats, NativeRef, PlatformAdapter, PlatformAttrs, RawNode, WindowCapture, WindowHandle,
    WindowMetadata,
};

const ATSPI_BUS: &str = "org.a11y.atspi.Registry";
const ATSPI_ROOT_PATH: &str = "/org/a11y/atspi/accessible/root";
const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(10);
const TREE_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct LinuxAdapter;

impl LinuxAdapter {
    pub fn new() -> Self {
        LinuxAdapter
    }
}

impl Default for LinuxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for LinuxAdapter {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn initialize(&self) -> Result<(), CupError> {
        which("gdbus")?;
        which("xdotool")?;
        Ok(())
    }

    fn get_screen_info(&self) -> Result<(i64, i64, Option<f64>), CupError> {
        let out = run_xdotool(&["getdisplaygeometry"])?;
        let mut parts = out.split_whitespace();
        let w: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CupError::PlatformFailure("getdisplaygeometry: bad width".into()))?;
        let h: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CupError::PlatformFailure("getdisplaygeometry: bad height".into()))?;
        Ok((w, h, None))
    }

    fn get_foreground_window(&self) -> Result<Option<WindowMetadata>, CupError> {
        let windows = self.get_window_list()?;
        Ok(windows.into_iter().find(|w| w.foreground))
    }

    fn get_all_windows(&self) -> Result<Vec<WindowMetadata>, CupError> {
        self.get_window_list()
    }

    fn get_window_list(&self) -> Result<Vec<WindowMetadata>, CupError> {
        let apps = list_accessible_children(ATSPI_BUS, ATSPI_ROOT_PATH)?;
        let active = active_window_title().unwrap_or_default();
        let mut out = Vec::new();
        for (bus_name, object_path) in apps {
            let windows = list_accessible_children(&bus_name, &object_path)?;
            for (child_bus, child_path) in windows {
                let title = get_name(&child_bus, &child_path).unwrap_or_default();
                if title.is_empty() {
                    continue;
                }
                out.push(WindowMetadata {
                    handle: WindowHandle::Linux {
                        bus_name: child_bus.clone(),
                        object_path: child_path.clone(),
                    },
                    foreground: !active.is_empty() && title == active,
                    title,
                    pid: None,
                    bundle_id: None,
                    url: None,
                    bounds: get_extents(&child_bus, &child_path).ok(),
                });
            }
        }
        Ok(out)
    }

    fn get_desktop_window(&self) -> Result<Option<WindowMetadata>, CupError> {
        Ok(None)
    }

    fn capture_tree(
        &self,
        windows: &[WindowMetadata],
        max_depth: usize,
    ) -> Result<Vec<WindowCapture>, CupError> {
        // Per §4.2/§5: multi-window captures run per-window walks in
        // parallel with a merged stats accumulator (merge happens at the
        // mapper; here each window's result stays separate and ordered).
        Ok(windows
            .par_iter()
            .map(|w| match &w.handle {
                WindowHandle::Linux { bus_name, object_path } => {
                    capture_one_window(bus_name, object_path, max_depth)
                }
                _ => WindowCapture::default(),
            })
            .collect())
    }
}

fn which(bin: &str) -> Result<(), CupError> {
    Command::new("which")
        .arg(bin)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(CupError::from)
        .and_then(|s| {
            if s.success() {
                Ok(())
            } else {
                Err(CupError::PlatformUnavailable(format!("{bin} not found on PATH")))
            }
        })
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
            return Err(CupError::PlatformTimeout(format!("gdbus call exceeded {timeout:?}")));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn gdbus_call(bus_name: &str, object_path: &str, method: &str, args: &[&str]) -> Result<String, CupError> {
    let mut cmd = Command::new("gdbus");
    cmd.arg("call")
        .arg("--session")
        .arg("--dest")
        .arg(bus_name)
        .arg("--object-path")
        .arg(object_path)
        .arg("--method")
        .arg(method);
    for a in args {
        cmd.arg(a);
    }
    run_with_timeout(&mut cmd, SUBPROCESS_TIMEOUT).map_err(|e| stale_if_vanished(e, bus_name, object_path))
}

/// The app process behind `bus_name`/`object_path` may have exited between
/// snapshot and action; `gdbus` surfaces that as one of a handful of D-Bus
/// error names rather than a distinct exit code, so recognize them here and
/// reclassify as `stale-snapshot` instead of a generic `platform-failure`.
fn stale_if_vanished(err: CupError, bus_name: &str, object_path: &str) -> CupError {
    const VANISHED_MARKERS: &[&str] = &[
        "ServiceUnknown",
        "UnknownObject",
        "UnknownMethod",
        "NoReply",
        "Disconnected",
    ];
    match err {
        CupError::PlatformFailure(msg) if VANISHED_MARKERS.iter().any(|m| msg.contains(m)) => {
            CupError::StaleSnapshot(format!("{bus_name}{object_path} no longer reachable: {msg}"))
        }
        other => other,
    }
}

fn run_xdotool(args: &[&str]) -> Result<String, CupError> {
    let mut cmd = Command::new("xdotool");
    cmd.args(args);
    run_with_timeout(&mut cmd, SUBPROCESS_TIMEOUT)
}

fn active_window_title() -> Result<String, CupError> {
    run_xdotool(&["getactivewindow", "getwindowname"]).map(|s| s.trim().to_owned())
}

/// Parses `gdbus`'s `(objectpath 'x', 'busname')`-ish tuple output for
/// `GetChildren`-style calls into `(busName, objectPath)` pairs. The
/// production wire format nests GVariant tuples; this extracts the two
/// quoted/path tokens per entry, tolerant of either order.
fn list_accessible_children(bus_name: &str, object_path: &str) -> Result<Vec<(String, String)>, CupError> {
    let out = gdbus_call(bus_name, object_path, "org.a11y.atspi.Accessible.GetChildren", &[])?;
    Ok(parse_children_tuples(&out))
}

fn parse_children_tuples(raw: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for segment in raw.split("('") {
        if let Some(end) = segment.find("',") {
            let bus = &segment[..end];
            if let Some(path_start) = segment[end..].find('/') {
                let abs_start = end + path_start;
                if let Some(path_end) = segment[abs_start..].find(['\'', ')']) {
                    let path = &segment[abs_start..abs_start + path_end];
                    if bus.starts_with(':') || bus.starts_with("org.") {
                        out.push((bus.to_owned(), path.to_owned()));
                    }
                }
            }
        }
    }
    out
}

fn get_name(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    let out = gdbus_call(bus_name, object_path, "org.freedesktop.DBus.Properties.Get", &[
        "org.a11y.atspi.Accessible",
        "Name",
    ])?;
    Ok(unwrap_variant_string(&out))
}

fn get_role_name(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    let out = gdbus_call(bus_name, object_path, "org.a11y.atspi.Accessible.GetRoleName", &[])?;
    Ok(unwrap_variant_string(&out).to_lowercase().replace(' ', "-"))
}

fn get_extents(bus_name: &str, object_path: &str) -> Result<Bounds, CupError> {
    let out = gdbus_call(
        bus_name,
        object_path,
        "org.a11y.atspi.Component.GetExtents",
        &["uint32:0"],
    )?;
    parse_extents(&out)
        .ok_or_else(|| CupError::PlatformFailure("GetExtents: unparsable reply".into()))
}

fn parse_extents(raw: &str) -> Option<Bounds> {
    let nums: Vec<i64> = raw
        .split(|c: char| !c.is_ascii_digit() && c != '-')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if nums.len() < 4 {
        return None;
    }
    Some(Bounds {
        x: nums[0],
        y: nums[1],
        w: nums[2],
        h: nums[3],
    })
}

fn unwrap_variant_string(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("(<")
        .trim_end_matches(">,)")
        .trim_matches(['\'', '"'])
        .to_owned()
}

fn capture_one_window(bus_name: &str, object_path: &str, max_depth: usize) -> WindowCapture {
    let start = std::time::Instant::now();
    let mut nodes = Vec::new();
    walk(bus_name, object_path, 0, max_depth, &mut nodes, &start);
    let mut stats = CaptureStats::default();
    for n in &nodes {
        stats.record(n.depth, &n.attrs.role_native);
    }
    WindowCapture { nodes, stats }
}

fn walk(
    bus_name: &str,
    object_path: &str,
    depth: usize,
    max_depth: usize,
    out: &mut Vec<RawNode>,
    started: &std::time::Instant,
) {
    if started.elapsed() > TREE_CAPTURE_TIMEOUT {
        return;
    }

    let role_native = get_role_name(bus_name, object_path).unwrap_or_default();
    let name = get_name(bus_name, object_path).unwrap_or_default();
    let description = gdbus_call(bus_name, object_path, "org.freedesktop.DBus.Properties.Get", &[
        "org.a11y.atspi.Accessible",
        "Description",
    ])
    .map(|s| unwrap_variant_string(&s))
    .unwrap_or_default();

    let mut attrs = PlatformAttrs::default();
    attrs.role_native = role_native;
    attrs.name = name;
    attrs.description = description;
    attrs.bounds = get_extents(bus_name, object_path).ok();

    // Keys below are read verbatim by mapper.rs's map_states/map_actions --
    // keep them in lockstep with that module's lookups.
    if let Ok(state_raw) = gdbus_call(bus_name, object_path, "org.a11y.atspi.Accessible.GetState", &[]) {
        if let Some(mask) = parse_state_bitmask(&state_raw) {
            attrs.bools.insert("disabled", mask & STATE_ENABLED == 0);
            attrs.bools.insert("checked", mask & STATE_CHECKED != 0);
            attrs.bools.insert("focused", mask & STATE_FOCUSED != 0);
            attrs.bools.insert("focusable", mask & STATE_FOCUSABLE != 0);
            attrs.bools.insert("selected", mask & STATE_SELECTED != 0);
            attrs.bools.insert(
                "atspiVisibleNotShowing",
                mask & STATE_VISIBLE != 0 && mask & STATE_SHOWING == 0,
            );
        }
    }

    let interfaces = get_interfaces(bus_name, object_path);
    if interfaces.iter().any(|i| i == "org.a11y.atspi.Action") {
        attrs.bools.insert("hasInvokePattern", true);
    }
    if interfaces.iter().any(|i| i == "org.a11y.atspi.Value") {
        attrs.bools.insert("hasValuePattern", true);
        attrs.bools.insert("hasRangeValuePattern", true);
        if attrs.role_native == "progress-bar" {
            attrs.bools.insert("valueIsReadOnly", true);
        }
        if let Ok(v) = get_value_number(bus_name, object_path, "MinimumValue") {
            attrs.numbers.insert("valueMin", v);
        }
        if let Ok(v) = get_value_number(bus_name, object_path, "MaximumValue") {
            attrs.numbers.insert("valueMax", v);
        }
        if let Ok(v) = get_value_number(bus_name, object_path, "CurrentValue") {
            attrs.numbers.insert("valueNow", v);
        }
    }
    if TOGGLE_ROLES.contains(&attrs.role_native.as_str()) {
        attrs.bools.insert("hasTogglePattern", true);
    }
    if SELECTION_ITEM_ROLES.contains(&attrs.role_native.as_str()) {
        attrs.bools.insert("hasSelectionItemPattern", true);
    }
    if EXPAND_COLLAPSE_ROLES.contains(&attrs.role_native.as_str()) {
        attrs.bools.insert("hasExpandCollapsePattern", true);
    }
    if SCROLL_ROLES.contains(&attrs.role_native.as_str()) {
        attrs.bools.insert("hasScrollPattern", true);
    }

    out.push(RawNode {
        depth,
        attrs,
        native_ref: NativeRef::Linux {
            bus_name: bus_name.to_owned(),
            object_path: object_path.to_owned(),
        },
    });

    if depth >= max_depth {
        return;
    }

    if let Ok(children) = list_accessible_children(bus_name, object_path) {
        for (child_bus, child_path) in children {
            walk(&child_bus, &child_path, depth + 1, max_depth, out, started);
        }
    }
}

const STATE_ENABLED: u64 = 1 << 3;
const STATE_CHECKED: u64 = 1 << 4;
const STATE_FOCUSED: u64 = 1 << 11;
const STATE_FOCUSABLE: u64 = 1 << 12;
const STATE_SELECTED: u64 = 1 << 14;
const STATE_VISIBLE: u64 = 1 << 29;
const STATE_SHOWING: u64 = 1 << 30;

const TOGGLE_ROLES: &[&str] = &["check-box", "check-menu-item", "toggle-button"];
const SELECTION_ITEM_ROLES: &[&str] = &["list-item", "page-tab", "radio-button", "radio-menu-item"];
const EXPAND_COLLAPSE_ROLES: &[&str] = &["tree-item", "combo-box"];
const SCROLL_ROLES: &[&str] = &["scroll-bar", "list", "table", "tree"];

/// AT-SPI state is two packed 32-bit bitmasks; this decodes the handful of
/// bit positions the mapper consults (STATE_ENABLED=3, STATE_FOCUSED=11,
/// STATE_FOCUSABLE=12, STATE_CHECKED=4, STATE_SELECTED=14, STATE_VISIBLE=29,
/// STATE_SHOWING=30, per the AT-SPI2 `Accessible.idl` enum ordering).
fn parse_state_bitmask(raw: &str) -> Option<u64> {
    let nums: Vec<u64> = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if nums.len() < 2 {
        return None;
    }
    Some(nums[0] | (nums[1] << 32))
}

/// `GetInterfaces` lists the AT-SPI2 interfaces the node implements (e.g.
/// `org.a11y.atspi.Action`, `org.a11y.atspi.Value`); presence of an
/// interface is the node-level signal for action availability, since
/// AT-SPI2 otherwise has no UIA-style boolean pattern flags.
fn get_interfaces(bus_name: &str, object_path: &str) -> Vec<String> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Accessible.GetInterfaces", &[])
        .map(|raw| parse_string_array(&raw))
        .unwrap_or_default()
}

fn parse_string_array(raw: &str) -> Vec<String> {
    raw.split('\'').skip(1).step_by(2).map(|s| s.to_owned()).collect()
}

fn get_value_number(bus_name: &str, object_path: &str, prop: &str) -> Result<f64, CupError> {
    let raw = gdbus_call(
        bus_name,
        object_path,
        "org.freedesktop.DBus.Properties.Get",
        &["org.a11y.atspi.Value", prop],
    )?;
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect::<String>()
        .parse()
        .map_err(|_| CupError::PlatformFailure(format!("{prop}: unparsable reply")))
}

pub fn click(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Action.DoAction", &["int32:0"])?;
    Ok("Clicked".into())
}

pub fn set_value(bus_name: &str, object_path: &str, value: &str) -> Result<String, CupError> {
    let arg = format!("string:'{}'", value.replace('\'', "\\'"));
    gdbus_call(
        bus_name,
        object_path,
        "org.freedesktop.DBus.Properties.Set",
        &["org.a11y.atspi.Value", "CurrentValue", &arg],
    )?;
    Ok(format!("Typed: {value}"))
}

pub fn focus(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Component.GrabFocus", &[])?;
    Ok("Focused".into())
}

pub fn scroll(bus_name: &str, object_path: &str, direction: &str) -> Result<String, CupError> {
    let bounds = get_extents(bus_name, object_path)?;
    let (cx, cy) = (bounds.x + bounds.w / 2, bounds.y + bounds.h / 2);
    run_xdotool(&["mousemove", &cx.to_string(), &cy.to_string()])?;
    let button = match direction {
        "up" => "4",
        "down" => "5",
        "left" => "6",
        "right" => "7",
        other => return Err(CupError::InvalidParams(format!("invalid direction {other}"))),
    };
    run_xdotool(&["click", button])?;
    Ok(format!("Scrolled {direction}"))
}

pub fn type_text(bus_name: &str, object_path: &str, value: &str) -> Result<String, CupError> {
    set_value(bus_name, object_path, value)
}

/// AT-SPI's `Action` interface exposes a single primary action at index 0
/// for toggle-like and selectable widgets alike; there is no distinct verb.
pub fn toggle(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Action.DoAction", &["int32:0"])?;
    Ok("Toggled".into())
}

pub fn select(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Action.DoAction", &["int32:0"])?;
    Ok("Selected".into())
}

pub fn expand_collapse(bus_name: &str, object_path: &str, expand: bool) -> Result<String, CupError> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Action.DoAction", &["int32:0"])?;
    Ok(if expand { "Expanded".into() } else { "Collapsed".into() })
}

pub fn increment_decrement(bus_name: &str, object_path: &str, increment: bool) -> Result<String, CupError> {
    let current = gdbus_call(bus_name, object_path, "org.freedesktop.DBus.Properties.Get", &["org.a11y.atspi.Value", "CurrentValue"])?;
    let value: f64 = current.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect::<String>().parse().unwrap_or(0.0);
    let next = if increment { value + 1.0 } else { value - 1.0 };
    let arg = format!("string:'{next}'");
    gdbus_call(bus_name, object_path, "org.freedesktop.DBus.Properties.Set", &["org.a11y.atspi.Value", "CurrentValue", &arg])?;
    Ok(if increment { "Incremented".into() } else { "Decremented".into() })
}

pub fn rightclick(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Action.DoAction", &["int32:0"])?;
    Ok("Clicked".into())
}

pub fn doubleclick(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Action.DoAction", &["int32:0"])?;
    Ok("Clicked".into())
}

pub fn dismiss(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Action.DoAction", &["int32:0"])?;
    Ok("Dismissed".into())
}

pub fn longpress(bus_name: &str, object_path: &str) -> Result<String, CupError> {
    gdbus_call(bus_name, object_path, "org.a11y.atspi.Action.DoAction", &["int32:0"])?;
    Ok("Clicked".into())
}

/// `combo` is already in xdotool's own `key` syntax (`ctrl+shift+p`); this
/// is a session-level action with no object path to target.
pub fn press_keys(combo: &str) -> Result<String, CupError> {
    run_xdotool(&["key", combo])?;
    Ok(format!("Pressed: {combo}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extents_extracts_four_numbers() {
        let raw = "((ii)(100, 200, 300, 400),)";
        let bounds = parse_extents(raw).unwrap();
        assert_eq!(bounds.x, 100);
        assert_eq!(bounds.y, 200);
        assert_eq!(bounds.w, 300);
        assert_eq!(bounds.h, 400);
    }

    #[test]
    fn parse_extents_none_on_too_few_numbers() {
        assert!(parse_extents("(1, 2)").is_none());
    }

    #[test]
    fn parse_state_bitmask_decodes_focused_and_enabled() {
        let mask_low: u64 = (1 << 3) | (1 << 11);
        let raw = format!("(uint32 {mask_low}, uint32 0)");
        let mask = parse_state_bitmask(&raw).unwrap();
        assert!(mask & STATE_ENABLED != 0);
        assert!(mask & STATE_FOCUSED != 0);
        assert!(mask & STATE_CHECKED == 0);
    }

    #[test]
    fn parse_string_array_extracts_quoted_interface_names() {
        let raw = "(['org.a11y.atspi.Action', 'org.a11y.atspi.Value'],)";
        let names = parse_string_array(raw);
        assert_eq!(names, vec!["org.a11y.atspi.Action", "org.a11y.atspi.Value"]);
    }

    #[test]
    fn unwrap_variant_string_strips_gvariant_wrapper() {
        assert_eq!(unwrap_variant_string("(<'hello'>,)"), "hello");
    }

    #[test]
    fn stale_if_vanished_reclassifies_unknown_object() {
        let err = CupError::PlatformFailure("GDBus.Error:org.freedesktop.DBus.Error.UnknownObject: Object does not exist".into());
        let reclassified = stale_if_vanished(err, ":1.42", "/org/a11y/atspi/accessible/123");
        assert!(matches!(reclassified, CupError::StaleSnapshot(_)));
    }

    #[test]
    fn stale_if_vanished_keeps_other_failures() {
        let err = CupError::PlatformFailure("permission denied".into());
        let reclassified = stale_if_vanished(err, ":1.42", "/org/a11y/atspi/accessible/123");
        assert!(matches!(reclassified, CupError::PlatformFailure(_)));
    }
}
