//! Event Registry
//!
//! Observation points beside the value listeners of a store:
//!
//! - [`lifecycle`]: hooks run when a store gains its first listener, loses
//!   its last one, is written, or has just notified.
//! - [`path`]: listeners keyed by a location inside a structured value,
//!   fired by containers through [`emit_path_change`].

pub mod lifecycle;
pub mod path;

pub use lifecycle::{
    on_activate, on_deactivate, on_mount, on_post_notify, on_pre_write, ActivateOutcome, Cleanup, Lifecycle,
};
pub use path::{emit_path_change, listen_keys, listen_path, Path, PathEvent, PathSegment};
