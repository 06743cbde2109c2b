//! Renderer-facing access to a gridlink session.
//!
//! Two halves, matching the daemon's two surfaces:
//!
//! - [`GridObserver`] maps the shared grid segment read-only and copies out
//!   complete frames; it never blocks the daemon and never sees a torn frame.
//! - [`ControlLink`] carries the discrete events (input, resize, plugin
//!   loads) over the control socket and streams daemon announcements back.
//!
//! The intended host loop: connect a [`ControlLink`], attach a
//! [`GridObserver`] on [`DaemonMessage::SegmentReady`], poll
//! [`GridObserver::snapshot`] per render frame, and re-attach whenever a new
//! `SegmentReady` arrives or the snapshot reports a stale segment.
//!
//! [`DaemonMessage::SegmentReady`]: gridlink_protocol::DaemonMessage::SegmentReady

pub mod control;
pub mod observer;

pub use control::{Backoff, ControlLink, LinkError, LinkEvent};
pub use observer::{AttachError, GridObserver};

pub use gridlink_protocol::{ControlMessage, DaemonMessage, GridSnapshot, PackedCell, StyleFlags};
