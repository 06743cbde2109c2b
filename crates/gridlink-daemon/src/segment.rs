//! Shared grid segment ownership.
//!
//! The daemon creates one OS shared-memory segment per grid epoch and is its
//! only writer. A resize tears the segment down and creates a fresh one under
//! the next epoch name; clients learn the new name over the control channel.

use anyhow::{Context, Result, bail};
use shared_memory::{Shmem, ShmemConf, ShmemError};
use tracing::{info, warn};

use gridlink_protocol::{FramePublisher, FrameRef, SHM_PATH_ENV, SharedState, shm_path_for_epoch};

/// An owned, mapped segment with its publisher handle.
///
/// Not `Send`: lives in the daemon's main task for its whole lifetime.
pub struct Segment {
    publisher: FramePublisher,
    name: String,
    epoch: u32,
    // Dropping the mapping invalidates the publisher's pointer, so the
    // field order keeps the publisher above and this below.
    _shmem: Shmem,
}

impl Segment {
    /// Create (or reclaim) the segment for `epoch` and initialize its header.
    ///
    /// A leftover segment from a crashed daemon is reopened and reused;
    /// every other creation failure is fatal for the daemon.
    pub fn create(base: &str, epoch: u32, cols: u16, rows: u16) -> Result<Self> {
        let name = shm_path_for_epoch(base, epoch);
        let size = SharedState::segment_size();

        let shmem = match ShmemConf::new().size(size).os_id(&name).create() {
            Ok(shmem) => {
                info!(segment = %name, size, "created shared grid segment");
                shmem
            }
            Err(ShmemError::MappingIdExists) => {
                warn!(segment = %name, "segment already exists, reclaiming");
                let shmem = ShmemConf::new()
                    .os_id(&name)
                    .open()
                    .with_context(|| format!("reopening existing segment {name}"))?;
                if shmem.len() < size {
                    bail!(
                        "existing segment {name} is {} bytes, need {size}; \
                         remove it (rm -f /dev/shm{name}) and restart",
                        shmem.len()
                    );
                }
                shmem
            }
            Err(ShmemError::MapCreateFailed(os_err)) => {
                bail!(
                    "creating segment {name} failed with OS error {os_err}; \
                     /dev/shm may be unavailable, set {SHM_PATH_ENV} to relocate"
                );
            }
            Err(err) => {
                return Err(err).with_context(|| format!("creating segment {name}"));
            }
        };

        let state = shmem.as_ptr().cast::<SharedState>();
        // SAFETY: the mapping is at least segment_size() bytes, stays alive
        // as long as `_shmem` (owned below the publisher), and this daemon
        // is the segment's only writer.
        let publisher = unsafe {
            std::ptr::write_bytes(state, 0, 1);
            FramePublisher::init(state, cols, rows)
        };

        Ok(Self {
            publisher,
            name,
            epoch,
            _shmem: shmem,
        })
    }

    /// OS name of this segment, as announced to clients.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn cols(&self) -> u16 {
        self.publisher.cols()
    }

    pub fn rows(&self) -> u16 {
        self.publisher.rows()
    }

    /// Whether a resize to these dimensions requires a new segment epoch.
    /// Resizing to the current dimensions keeps the segment untouched.
    pub fn needs_rebuild(&self, cols: u16, rows: u16) -> bool {
        (cols, rows) != (self.cols(), self.rows())
    }

    /// Commit a complete frame.
    pub fn publish(&mut self, frame: FrameRef<'_>) {
        self.publisher.publish(frame);
    }
}
