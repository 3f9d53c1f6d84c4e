//! `cup_core` -- canonical cross-platform UI accessibility tree, search, and
//! action dispatch.
//!
//! Ingests the platform's native accessibility surface (Windows UI
//! Automation, macOS `AXUIElement`, Linux AT-SPI2 over D-Bus, or a page's
//! Chrome DevTools Protocol target) into one canonical node model, then
//! serves it through a pruning/serialization pipeline and a search + action
//! dispatcher that agents drive without ever touching a native API
//! themselves.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`model`] | Canonical `Node`/`Envelope` types (§3) |
//! | [`error`] | `CupError` taxonomy + `ActionResult` (§7) |
//! | [`platform`] | Per-OS ingestion adapters + native-ref union (§4.1-4.5) |
//! | [`mapper`] | Flat capture -> canonical tree reassembly (§4.3-4.4) |
//! | [`transform`] | Pruning rules: full / minimal / standard (§4.6) |
//! | [`serialize`] | JSON, compact text, and overview serializers (§4.7) |
//! | [`search`] | Role-synonym + fuzzy-name search scoring (§4.8) |
//! | [`session`] | State machine, request types, action dispatcher (§4.8, §5) |
//! | [`com`] | `COMGuard` RAII wrapper for COM apartment init (Windows only) |

#[cfg(target_os = "windows")]
pub mod com;
pub mod error;
pub mod mapper;
pub mod model;
pub mod platform;
pub mod search;
pub mod serialize;
pub mod session;
pub mod transform;
