//! Cross-process contract between the gridlink daemon and its clients.
//!
//! This crate defines everything both processes must agree on byte-for-byte:
//!
//! - **Layout**: `#[repr(C)]` cell/slot/state structures placed in the shared
//!   memory segment, with explicit field order and explicit padding.
//! - **Store**: the single-writer double-buffer (seqlock) protocol used to
//!   publish complete frames without ever blocking the writer or handing the
//!   reader a torn frame.
//! - **Frame**: the length-prefixed control-channel wire format for discrete
//!   events (resize, input, plugin load) that cannot be expressed as grid
//!   mutations.
//!
//! # Safety
//!
//! The raw-pointer seqlock core lives in [`store`]. The shared segment is an
//! explicit, audited boundary: exactly one writer for its lifetime, readers
//! validated against a magic value, and every cross-process access funneled
//! through [`store::FramePublisher`] / [`store::FrameReader`]. The daemon and
//! client each carry exactly one unsafe call site, where a mapped segment is
//! handed to those constructors.

pub mod frame;
pub mod layout;
pub mod store;

pub use frame::{ControlMessage, DaemonMessage, FrameError, MAX_FRAME_LEN, check_body_len};
pub use layout::{
    CELLS_PER_SLOT, GridSlot, MAX_COLS, MAX_ROWS, PackedCell, SHARED_STATE_MAGIC, SHM_PATH_BASE,
    SHM_PATH_ENV, SOCKET_PATH, SOCKET_PATH_ENV, SharedState, StyleFlags, shm_path_base,
    shm_path_for_epoch, socket_path,
};
pub use store::{
    FramePublisher, FrameReader, FrameRef, GridSnapshot, SNAPSHOT_RETRY_LIMIT, StoreError,
};
