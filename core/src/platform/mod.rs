//! The platform adapter contract (§4.1) and the types shared by every
//! per-OS implementation: [`PlatformAdapter`], the raw flat pre-order node
//! stream, and the opaque native-reference union.
//!
//! Only the adapter for the current `target_os` is compiled; the web/CDP
//! adapter has no OS dependency and is always available.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CupError;
use crate::model::{Bounds, Platform};

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

pub mod web;

pub mod helper_cache;

/// A platform-opaque window handle plus the lightweight metadata every
/// adapter can produce without walking the accessibility tree.
#[derive(Debug, Clone)]
pub struct WindowMetadata {
    pub handle: WindowHandle,
    pub title: String,
    pub pid: Option<u32>,
    pub bundle_id: Option<String>,
    pub url: Option<String>,
    pub foreground: bool,
    pub bounds: Option<Bounds>,
}

/// The opaque per-platform window handle. Adapters downcast their own
/// variant; cross-platform code treats this as inert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowHandle {
    Windows(isize),
    Macos(u32),
    Linux { bus_name: String, object_path: String },
    Web { ws_url: String },
}

/// The native reference a node's `id` resolves to for action dispatch (§9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum NativeRef {
    Windows { hwnd: isize, node_index: Vec<u32> },
    Macos { pid: u32, path: Vec<usize> },
    Linux { bus_name: String, object_path: String },
    Web { ws_url: String, backend_id: i64 },
}

/// One element as reported by the platform ingestion pass, before canonical
/// mapping. `depth` is the pre-order depth used by the mapper's stack-based
/// tree reassembly (§4.3); `attrs` is the platform-specific attribute bag the
/// mapper's per-platform table consults.
#[derive(Debug, Clone)]
pub struct RawNode {
    pub depth: usize,
    pub attrs: PlatformAttrs,
    pub native_ref: NativeRef,
}

/// Platform-specific raw attributes, carried loosely typed (string/bool/f64
/// keyed maps) rather than one struct per platform field: the native APIs
/// expose overlapping-but-not-identical property sets and the mapper only
/// ever reads attributes by name, same as the teacher's `TreeElementSnapshot`
/// being read field-by-field in `tree/mod.rs` and re-keyed in `query.rs`.
#[derive(Debug, Clone, Default)]
pub struct PlatformAttrs {
    pub role_native: String,
    pub name: String,
    pub description: String,
    pub value: String,
    pub bounds: Option<Bounds>,
    pub bools: BTreeMap<&'static str, bool>,
    pub strings: BTreeMap<&'static str, String>,
    pub numbers: BTreeMap<&'static str, f64>,
    pub raw_json: serde_json::Value,
}

impl PlatformAttrs {
    pub fn bool(&self, key: &str) -> bool {
        self.bools.get(key).copied().unwrap_or(false)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.strings.get(key).map(|s| s.as_str())
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.numbers.get(key).copied()
    }
}

/// `{nodes, maxDepth, roles}` accumulated during reassembly (§4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureStats {
    pub nodes: usize,
    #[serde(rename = "maxDepth")]
    pub max_depth: usize,
    pub roles: BTreeMap<String, usize>,
}

impl CaptureStats {
    pub fn record(&mut self, depth: usize, native_role: &str) {
        self.nodes += 1;
        self.max_depth = self.max_depth.max(depth);
        *self.roles.entry(native_role.to_owned()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: CaptureStats) {
        self.nodes += other.nodes;
        self.max_depth = self.max_depth.max(other.max_depth);
        for (role, count) in other.roles {
            *self.roles.entry(role).or_insert(0) += count;
        }
    }
}

/// A single window's capture result: its own flat stream plus stats,
/// kept separate per window so the mapper can assign one root per window
/// and callers can merge deterministically in input order (§5).
#[derive(Debug, Clone, Default)]
pub struct WindowCapture {
    pub nodes: Vec<RawNode>,
    pub stats: CaptureStats,
}

/// Every platform implements this contract (§4.1).
pub trait PlatformAdapter {
    fn platform(&self) -> Platform;

    /// Idempotent setup (COM apartment join, D-Bus connection warm-up, ...).
    fn initialize(&self) -> Result<(), CupError>;

    fn get_screen_info(&self) -> Result<(i64, i64, Option<f64>), CupError>;

    fn get_foreground_window(&self) -> Result<Option<WindowMetadata>, CupError>;

    fn get_all_windows(&self) -> Result<Vec<WindowMetadata>, CupError>;

    /// Near-instant: no tree walking, just enumeration + metadata.
    fn get_window_list(&self) -> Result<Vec<WindowMetadata>, CupError>;

    fn get_desktop_window(&self) -> Result<Option<WindowMetadata>, CupError>;

    /// Walk each window's accessibility tree. A window that has died or
    /// denies access contributes an empty [`WindowCapture`]; this is not
    /// fatal to the overall call (§4.1 failure policy).
    fn capture_tree(
        &self,
        windows: &[WindowMetadata],
        max_depth: usize,
    ) -> Result<Vec<WindowCapture>, CupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_stats_merge_sums_roles_and_takes_max_depth() {
        let mut a = CaptureStats {
            nodes: 3,
            max_depth: 2,
            roles: BTreeMap::from([("Button".to_owned(), 1), ("Pane".to_owned(), 2)]),
        };
        let b = CaptureStats {
            nodes: 5,
            max_depth: 4,
            roles: BTreeMap::from([("Button".to_owned(), 2)]),
        };
        a.merge(b);
        assert_eq!(a.nodes, 8);
        assert_eq!(a.max_depth, 4);
        assert_eq!(a.roles["Button"], 3);
        assert_eq!(a.roles["Pane"], 2);
    }

    #[test]
    fn platform_attrs_missing_keys_return_defaults() {
        let attrs = PlatformAttrs::default();
        assert!(!attrs.bool("IsEnabled"));
        assert!(attrs.string("ClassName").is_none());
        assert!(attrs.number("ValueMin").is_none());
    }
}
