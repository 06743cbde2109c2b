//! Single-writer double-buffer frame store.
//!
//! The daemon owns exactly one [`FramePublisher`] per segment and is the only
//! writer for the segment's lifetime. It always writes into the slot the
//! sequence number does *not* select (`1 - (sequence & 1)`), then commits by
//! incrementing the sequence with release ordering. Readers copy the stable
//! slot (`sequence & 1`), re-read the sequence, and retry on a mismatch, so a
//! frame handed out is always one complete published frame and never a blend.
//!
//! This is the only module in the project that touches raw pointers. Both
//! handles are constructed from a `*mut SharedState` whose validity the
//! caller guarantees for the handle's lifetime.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU8, AtomicU64, Ordering, fence};
use std::error::Error;
use std::fmt;

use bytemuck::Zeroable;

use crate::layout::{MAX_COLS, MAX_ROWS, PackedCell, SHARED_STATE_MAGIC, SharedState};

/// Snapshot attempts before the reader gives up and serves the last frame it
/// successfully copied.
pub const SNAPSHOT_RETRY_LIMIT: usize = 8;

/// Errors surfaced by the store handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No frame has been published into the segment yet.
    Empty,
    /// The segment header does not carry the expected magic value.
    BadMagic { found: u64 },
    /// The header dimensions exceed the slot capacity.
    Dimensions { cols: u16, rows: u16 },
    /// The sequence number moved backwards; the segment was torn down or
    /// recreated underneath this reader.
    Stale { last_seen: u64, found: u64 },
    /// Every retry raced a concurrent publish and no earlier frame is
    /// available to fall back to.
    Contended,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Empty => write!(f, "no frame published yet"),
            StoreError::BadMagic { found } => {
                write!(f, "segment magic mismatch (found {found:#018x})")
            }
            StoreError::Dimensions { cols, rows } => {
                write!(f, "segment dimensions {cols}x{rows} exceed slot capacity")
            }
            StoreError::Stale { last_seen, found } => write!(
                f,
                "sequence regressed from {last_seen} to {found}; segment was recreated"
            ),
            StoreError::Contended => {
                write!(f, "snapshot retries exhausted with no fallback frame")
            }
        }
    }
}

impl Error for StoreError {}

/// Borrowed view of one frame to publish.
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    /// Row-major cells, exactly `cols * rows` entries.
    pub cells: &'a [PackedCell],
    pub cursor_col: u16,
    pub cursor_row: u16,
}

/// One consistent copy of a published frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSnapshot {
    /// Sequence number the frame was committed under.
    pub sequence: u64,
    pub cols: u16,
    pub rows: u16,
    pub cursor_col: u16,
    pub cursor_row: u16,
    /// Row-major cells, `cols * rows` entries.
    pub cells: Vec<PackedCell>,
}

impl GridSnapshot {
    /// Cell at the given position, if in bounds.
    pub fn cell(&self, col: u16, row: u16) -> Option<&PackedCell> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        self.cells.get(row as usize * self.cols as usize + col as usize)
    }
}

/// Writer half of the store. Exactly one per segment.
pub struct FramePublisher {
    state: NonNull<SharedState>,
    cols: u16,
    rows: u16,
}

// The handle is a unique writer over a raw mapping; moving it across threads
// is sound because all cross-process synchronization goes through the
// sequence atomic.
unsafe impl Send for FramePublisher {}

impl FramePublisher {
    /// Take ownership of a freshly created segment and initialize its header.
    ///
    /// # Safety
    ///
    /// `state` must point to a writable, zero-initialized mapping of at least
    /// [`SharedState::segment_size`] bytes that stays valid and unaliased by
    /// other writers for the lifetime of the returned handle.
    pub unsafe fn init(state: *mut SharedState, cols: u16, rows: u16) -> Self {
        debug_assert!((cols as usize) <= MAX_COLS && (rows as usize) <= MAX_ROWS);
        let state = NonNull::new(state).expect("segment pointer must be non-null");
        unsafe {
            let header = &mut *state.as_ptr();
            header.cols = cols;
            header.rows = rows;
            header.cursor_col = 0;
            header.cursor_row = 0;
            header.dirty = 0;
            // Publish magic last so a racing reader never validates a
            // half-initialized header.
            seq_atomic(state.as_ptr()).store(0, Ordering::Release);
            core::ptr::write_volatile(&mut header.magic, SHARED_STATE_MAGIC);
        }
        Self { state, cols, rows }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Sequence number of the most recently committed frame.
    pub fn sequence(&self) -> u64 {
        seq_atomic(self.state.as_ptr()).load(Ordering::Relaxed)
    }

    /// Write a complete frame into the inactive slot and commit it.
    ///
    /// Never blocks and never waits for readers.
    pub fn publish(&mut self, frame: FrameRef<'_>) {
        let live = self.cols as usize * self.rows as usize;
        assert_eq!(frame.cells.len(), live, "frame cell count mismatch");

        let seq = seq_atomic(self.state.as_ptr());
        // Single writer, so a relaxed load of our own counter is exact.
        let current = seq.load(Ordering::Relaxed);
        let target = 1 - (current & 1) as usize;

        unsafe {
            let header = &mut *self.state.as_ptr();
            let slot = &mut header.buffers[target];
            core::ptr::copy_nonoverlapping(frame.cells.as_ptr(), slot.cells.as_mut_ptr(), live);
            slot.cursor_col = frame.cursor_col;
            slot.cursor_row = frame.cursor_row;
            slot.generation = current + 1;
            header.cursor_col = frame.cursor_col;
            header.cursor_row = frame.cursor_row;
        }

        // Commit: the increment makes `target` the stable slot.
        seq.store(current + 1, Ordering::Release);
        dirty_atomic(self.state.as_ptr()).store(1, Ordering::Relaxed);
    }
}

/// Reader half of the store. Any number may coexist.
#[derive(Debug)]
pub struct FrameReader {
    state: NonNull<SharedState>,
    cols: u16,
    rows: u16,
    scratch: Vec<PackedCell>,
    last_good: Option<GridSnapshot>,
    last_seq: u64,
}

unsafe impl Send for FrameReader {}

impl FrameReader {
    /// Attach to an existing segment, validating its header.
    ///
    /// # Safety
    ///
    /// `state` must point to a readable mapping of at least
    /// [`SharedState::segment_size`] bytes that stays valid for the lifetime
    /// of the returned handle.
    pub unsafe fn attach(state: *const SharedState) -> Result<Self, StoreError> {
        let state =
            NonNull::new(state as *mut SharedState).expect("segment pointer must be non-null");
        let (magic, cols, rows) = unsafe {
            let header = &*state.as_ptr();
            (
                core::ptr::read_volatile(&header.magic),
                header.cols,
                header.rows,
            )
        };
        if magic != SHARED_STATE_MAGIC {
            return Err(StoreError::BadMagic { found: magic });
        }
        if cols as usize > MAX_COLS || rows as usize > MAX_ROWS || cols == 0 || rows == 0 {
            return Err(StoreError::Dimensions { cols, rows });
        }
        Ok(Self {
            state,
            cols,
            rows,
            scratch: vec![PackedCell::zeroed(); cols as usize * rows as usize],
            last_good: None,
            last_seq: 0,
        })
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Sequence number of the most recently committed frame.
    pub fn sequence(&self) -> u64 {
        seq_atomic(self.state.as_ptr()).load(Ordering::Acquire)
    }

    /// Consume the advisory dirty flag. Returns whether new data was
    /// published since the last call.
    pub fn take_dirty(&self) -> bool {
        dirty_atomic(self.state.as_ptr()).swap(0, Ordering::Relaxed) != 0
    }

    /// Copy the latest consistent frame.
    ///
    /// Retries up to [`SNAPSHOT_RETRY_LIMIT`] times when a publish races the
    /// copy, then falls back to the last frame successfully read.
    pub fn snapshot(&mut self) -> Result<&GridSnapshot, StoreError> {
        self.snapshot_with(|| {})
    }

    // Test seam: `between` runs after the slot copy and before the
    // sequence re-check, so tests can force a racing publish.
    fn snapshot_with(&mut self, mut between: impl FnMut()) -> Result<&GridSnapshot, StoreError> {
        let seq = seq_atomic(self.state.as_ptr());
        let live = self.cols as usize * self.rows as usize;

        for _ in 0..SNAPSHOT_RETRY_LIMIT {
            let s1 = seq.load(Ordering::Acquire);
            if s1 == 0 {
                return Err(StoreError::Empty);
            }
            if s1 < self.last_seq {
                return Err(StoreError::Stale {
                    last_seen: self.last_seq,
                    found: s1,
                });
            }

            let stable = (s1 & 1) as usize;
            let (cursor_col, cursor_row) = unsafe {
                let slot = &(*self.state.as_ptr()).buffers[stable];
                core::ptr::copy_nonoverlapping(
                    slot.cells.as_ptr(),
                    self.scratch.as_mut_ptr(),
                    live,
                );
                (slot.cursor_col, slot.cursor_row)
            };

            between();

            // The copy's plain loads must complete before the re-check, or
            // a racing publish could slip between them unnoticed.
            fence(Ordering::Acquire);
            let s2 = seq.load(Ordering::Relaxed);
            if s1 == s2 {
                self.last_seq = s1;
                let snap = self.last_good.insert(GridSnapshot {
                    sequence: s1,
                    cols: self.cols,
                    rows: self.rows,
                    cursor_col,
                    cursor_row,
                    cells: self.scratch.clone(),
                });
                return Ok(snap);
            }
        }

        self.last_good.as_ref().ok_or(StoreError::Contended)
    }
}

fn seq_atomic(state: *const SharedState) -> &'static AtomicU64 {
    // `sequence` is 8-aligned (checked in layout tests) and only ever
    // accessed through this cast on either side of the segment.
    unsafe { AtomicU64::from_ptr(&raw const (*state).sequence as *mut u64) }
}

fn dirty_atomic(state: *const SharedState) -> &'static AtomicU8 {
    unsafe { AtomicU8::from_ptr(&raw const (*state).dirty as *mut u8) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StyleFlags;

    fn fresh_state() -> Box<SharedState> {
        bytemuck::zeroed_box::<SharedState>()
    }

    fn uniform_frame(cols: u16, rows: u16, ch: char) -> Vec<PackedCell> {
        vec![PackedCell::new(ch, 0xFFCC_CCCC, 0xFF00_0000, StyleFlags::empty());
            cols as usize * rows as usize]
    }

    #[test]
    fn snapshot_before_first_publish_is_empty() {
        let mut state = fresh_state();
        let ptr = &mut *state as *mut SharedState;
        let _publisher = unsafe { FramePublisher::init(ptr, 4, 2) };
        let mut reader = unsafe { FrameReader::attach(ptr) }.unwrap();
        assert_eq!(reader.snapshot().unwrap_err(), StoreError::Empty);
    }

    #[test]
    fn publish_then_snapshot_roundtrip() {
        let mut state = fresh_state();
        let ptr = &mut *state as *mut SharedState;
        let mut publisher = unsafe { FramePublisher::init(ptr, 4, 2) };
        let mut reader = unsafe { FrameReader::attach(ptr) }.unwrap();

        let cells = uniform_frame(4, 2, 'a');
        publisher.publish(FrameRef {
            cells: &cells,
            cursor_col: 3,
            cursor_row: 1,
        });

        let snap = reader.snapshot().unwrap();
        assert_eq!(snap.sequence, 1);
        assert_eq!((snap.cursor_col, snap.cursor_row), (3, 1));
        assert_eq!(snap.cells, cells);
        assert_eq!(snap.cell(3, 1).unwrap().codepoint, 'a' as u32);
        assert!(snap.cell(4, 0).is_none());
    }

    #[test]
    fn sequence_is_monotonic_and_slots_alternate() {
        let mut state = fresh_state();
        let ptr = &mut *state as *mut SharedState;
        let mut publisher = unsafe { FramePublisher::init(ptr, 2, 1) };
        let mut reader = unsafe { FrameReader::attach(ptr) }.unwrap();

        for (i, ch) in ['a', 'b', 'c', 'd'].into_iter().enumerate() {
            let cells = uniform_frame(2, 1, ch);
            publisher.publish(FrameRef {
                cells: &cells,
                cursor_col: 0,
                cursor_row: 0,
            });
            let snap = reader.snapshot().unwrap();
            assert_eq!(snap.sequence, i as u64 + 1);
            assert_eq!(snap.cells[0].codepoint, ch as u32);
        }
        // Both slots have been written; generations must differ by one.
        assert_eq!(state.buffers[0].generation.abs_diff(state.buffers[1].generation), 1);
    }

    #[test]
    fn dirty_flag_is_set_on_publish_and_consumed_once() {
        let mut state = fresh_state();
        let ptr = &mut *state as *mut SharedState;
        let mut publisher = unsafe { FramePublisher::init(ptr, 1, 1) };
        let reader = unsafe { FrameReader::attach(ptr) }.unwrap();

        assert!(!reader.take_dirty());
        publisher.publish(FrameRef {
            cells: &uniform_frame(1, 1, 'x'),
            cursor_col: 0,
            cursor_row: 0,
        });
        assert!(reader.take_dirty());
        assert!(!reader.take_dirty());
    }

    #[test]
    fn contended_snapshot_falls_back_to_last_good() {
        let mut state = fresh_state();
        let ptr = &mut *state as *mut SharedState;
        let mut publisher = unsafe { FramePublisher::init(ptr, 2, 1) };
        let mut reader = unsafe { FrameReader::attach(ptr) }.unwrap();

        publisher.publish(FrameRef {
            cells: &uniform_frame(2, 1, 'a'),
            cursor_col: 0,
            cursor_row: 0,
        });
        assert_eq!(reader.snapshot().unwrap().sequence, 1);

        // Force a publish between every copy and its re-check so no retry
        // can ever validate.
        let snap = reader
            .snapshot_with(|| {
                publisher.publish(FrameRef {
                    cells: &uniform_frame(2, 1, 'z'),
                    cursor_col: 1,
                    cursor_row: 0,
                });
            })
            .unwrap();
        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.cells[0].codepoint, 'a' as u32);
    }

    #[test]
    fn contended_snapshot_without_fallback_errors() {
        let mut state = fresh_state();
        let ptr = &mut *state as *mut SharedState;
        let mut publisher = unsafe { FramePublisher::init(ptr, 2, 1) };
        let mut reader = unsafe { FrameReader::attach(ptr) }.unwrap();

        publisher.publish(FrameRef {
            cells: &uniform_frame(2, 1, 'a'),
            cursor_col: 0,
            cursor_row: 0,
        });

        let err = reader
            .snapshot_with(|| {
                publisher.publish(FrameRef {
                    cells: &uniform_frame(2, 1, 'z'),
                    cursor_col: 0,
                    cursor_row: 0,
                });
            })
            .unwrap_err();
        assert_eq!(err, StoreError::Contended);
    }

    #[test]
    fn sequence_regression_is_reported_stale() {
        let mut state = fresh_state();
        let ptr = &mut *state as *mut SharedState;
        let mut publisher = unsafe { FramePublisher::init(ptr, 1, 1) };
        let mut reader = unsafe { FrameReader::attach(ptr) }.unwrap();

        for _ in 0..3 {
            publisher.publish(FrameRef {
                cells: &uniform_frame(1, 1, 'a'),
                cursor_col: 0,
                cursor_row: 0,
            });
        }
        assert_eq!(reader.snapshot().unwrap().sequence, 3);

        // Simulate the daemon recreating the segment in place.
        seq_atomic(ptr).store(1, Ordering::Release);
        assert_eq!(
            reader.snapshot().unwrap_err(),
            StoreError::Stale {
                last_seen: 3,
                found: 1
            }
        );
    }

    #[test]
    fn attach_rejects_bad_magic_and_bad_dimensions() {
        let mut state = fresh_state();
        let ptr = &mut *state as *mut SharedState;
        match unsafe { FrameReader::attach(ptr) } {
            Err(StoreError::BadMagic { found: 0 }) => {}
            other => panic!("expected BadMagic, got {other:?}"),
        }

        state.magic = SHARED_STATE_MAGIC;
        state.cols = (MAX_COLS + 1) as u16;
        state.rows = 1;
        let ptr = &mut *state as *mut SharedState;
        match unsafe { FrameReader::attach(ptr) } {
            Err(StoreError::Dimensions { .. }) => {}
            other => panic!("expected Dimensions, got {other:?}"),
        }
    }
}
