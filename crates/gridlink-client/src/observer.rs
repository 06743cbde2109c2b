//! Read-only attachment to the daemon's shared grid segment.
//!
//! Attaching is expected to fail while no daemon is running; that is a
//! recoverable condition the host can retry, not a crash. Once attached,
//! [`GridObserver::snapshot`] hands out complete frames via the store's
//! retry-and-fallback protocol.

use std::error::Error;
use std::fmt;

use shared_memory::{Shmem, ShmemConf};
use tracing::{debug, info, warn};

use gridlink_protocol::{
    FrameReader, GridSnapshot, SharedState, StoreError, shm_path_base,
};

/// Why an attachment attempt failed.
#[derive(Debug)]
pub enum AttachError {
    /// The named segment does not exist; the daemon is not running or has
    /// not created it yet.
    DaemonNotRunning { segment: String },
    /// The segment exists but is smaller than the shared layout requires.
    SegmentTooSmall { found: usize, need: usize },
    /// The segment header failed validation (magic or dimensions).
    InvalidHeader(StoreError),
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::DaemonNotRunning { segment } => {
                write!(f, "segment {segment} not found; is the daemon running?")
            }
            AttachError::SegmentTooSmall { found, need } => {
                write!(f, "segment is {found} bytes, layout requires {need}")
            }
            AttachError::InvalidHeader(err) => write!(f, "segment header invalid: {err}"),
        }
    }
}

impl Error for AttachError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AttachError::InvalidHeader(err) => Some(err),
            _ => None,
        }
    }
}

/// A reader mapped onto one live segment epoch.
///
/// When the daemon resizes, it recreates the segment under a new name and
/// announces it over the control channel; the host then drops this observer
/// and attaches a fresh one. A snapshot returning [`StoreError::Stale`] means
/// the mapping outlived its segment the same way.
pub struct GridObserver {
    reader: FrameReader,
    name: String,
    // The reader's pointer aims into this mapping; declaration order keeps
    // the mapping alive until the reader is gone.
    _shmem: Shmem,
}

impl fmt::Debug for GridObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridObserver")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl GridObserver {
    /// Attach to the default segment name (honoring the env override).
    pub fn attach_default() -> Result<Self, AttachError> {
        Self::attach(&shm_path_base())
    }

    /// Attach to a named segment, validating size and header.
    pub fn attach(name: &str) -> Result<Self, AttachError> {
        let shmem = ShmemConf::new().os_id(name).open().map_err(|err| {
            debug!(segment = name, %err, "segment open failed");
            AttachError::DaemonNotRunning {
                segment: name.to_string(),
            }
        })?;

        let need = SharedState::segment_size();
        if shmem.len() < need {
            return Err(AttachError::SegmentTooSmall {
                found: shmem.len(),
                need,
            });
        }

        let state = shmem.as_ptr().cast::<SharedState>();
        // SAFETY: the mapping is at least segment_size() bytes and outlives
        // the reader (owned below it in this struct).
        let reader = unsafe { FrameReader::attach(state) }.map_err(AttachError::InvalidHeader)?;

        info!(
            segment = name,
            cols = reader.cols(),
            rows = reader.rows(),
            "attached to grid segment"
        );
        Ok(Self {
            reader,
            name: name.to_string(),
            _shmem: shmem,
        })
    }

    /// Segment name this observer is mapped onto.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cols(&self) -> u16 {
        self.reader.cols()
    }

    pub fn rows(&self) -> u16 {
        self.reader.rows()
    }

    /// Sequence number of the most recently committed frame.
    pub fn sequence(&self) -> u64 {
        self.reader.sequence()
    }

    /// Consume the advisory dirty flag; cheap poll for "anything new?".
    pub fn take_dirty(&self) -> bool {
        self.reader.take_dirty()
    }

    /// Copy the latest complete frame.
    ///
    /// [`StoreError::Stale`] means the segment was recreated underneath this
    /// mapping; drop the observer and re-attach.
    pub fn snapshot(&mut self) -> Result<&GridSnapshot, StoreError> {
        match self.reader.snapshot() {
            Ok(snap) => Ok(snap),
            Err(err @ StoreError::Stale { .. }) => {
                warn!(segment = %self.name, %err, "segment is stale");
                Err(err)
            }
            Err(err @ StoreError::Contended) => {
                warn!(segment = %self.name, "snapshot retries exhausted");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
