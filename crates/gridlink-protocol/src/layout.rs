//! Shared-memory data layout.
//!
//! Every structure here is `#[repr(C)]` with explicit field order and explicit
//! padding so the byte layout is identical in both processes regardless of how
//! each binary was compiled. Cells are `bytemuck::Pod`, which also gives the
//! compile-time guarantee that no implicit padding sneaked in.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// Default name for the grid segment. A resize recreates the segment under
/// this base with a bumped `.N` epoch suffix.
pub const SHM_PATH_BASE: &str = "/gridlink_grid_v1";

/// Environment variable overriding [`SHM_PATH_BASE`]. Useful in sandboxes
/// where `/dev/shm` naming is restricted.
pub const SHM_PATH_ENV: &str = "GRIDLINK_SHM_PATH";

/// Default control-channel socket path.
pub const SOCKET_PATH: &str = "/tmp/gridlink.sock";

/// Environment variable overriding [`SOCKET_PATH`].
pub const SOCKET_PATH_ENV: &str = "GRIDLINK_SOCKET_PATH";

/// Upper bound on grid columns. Slots are sized for the maximum; the live
/// dimensions are recorded in the [`SharedState`] header.
pub const MAX_COLS: usize = 200;

/// Upper bound on grid rows.
pub const MAX_ROWS: usize = 100;

/// Cell capacity of one buffer slot.
pub const CELLS_PER_SLOT: usize = MAX_COLS * MAX_ROWS;

/// Sentinel written into the segment header at creation.
///
/// A reader that does not find this value is looking at an uninitialized,
/// foreign, or torn-down segment and must not interpret the rest.
pub const SHARED_STATE_MAGIC: u64 = 0x4752_4944_4c4e_4b31; // "GRIDLNK1"

bitflags! {
    /// Text style bits stored in [`PackedCell::flags`].
    ///
    /// Bits are independent and freely composable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StyleFlags: u8 {
        const BOLD      = 1 << 0;
        const DIM       = 1 << 1;
        const ITALIC    = 1 << 2;
        const UNDERLINE = 1 << 3;
        const INVERSE   = 1 << 4;
    }
}

/// One terminal cell, exactly 16 bytes.
///
/// `codepoint == 0` denotes an empty/untouched cell. Colors are packed RGBA.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct PackedCell {
    pub codepoint: u32,
    /// Foreground color, packed RGBA.
    pub fg: u32,
    /// Background color, packed RGBA.
    pub bg: u32,
    /// [`StyleFlags`] bits.
    pub flags: u8,
    pub _padding: [u8; 3],
}

impl PackedCell {
    /// An empty cell carrying the given colors.
    pub const fn blank(fg: u32, bg: u32) -> Self {
        Self {
            codepoint: 0,
            fg,
            bg,
            flags: 0,
            _padding: [0; 3],
        }
    }

    /// Build a cell from a character and attributes.
    pub const fn new(ch: char, fg: u32, bg: u32, flags: StyleFlags) -> Self {
        Self {
            codepoint: ch as u32,
            fg,
            bg,
            flags: flags.bits(),
            _padding: [0; 3],
        }
    }

    /// Whether this cell has never been written (or was erased).
    pub const fn is_empty(&self) -> bool {
        self.codepoint == 0
    }

    /// Decode the style bits, dropping any bits a newer writer may have set.
    pub const fn style(&self) -> StyleFlags {
        StyleFlags::from_bits_truncate(self.flags)
    }
}

/// One complete published frame.
///
/// A slot is only ever written by the daemon while it is the *inactive* slot;
/// once the sequence number selecting it is committed it is immutable until
/// the writer cycles back around.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct GridSlot {
    /// Publish counter at the time this frame was written.
    pub generation: u64,
    pub cursor_col: u16,
    pub cursor_row: u16,
    pub _padding: [u8; 4],
    /// Row-major cells; only the leading `cols * rows` entries are meaningful.
    pub cells: [PackedCell; CELLS_PER_SLOT],
}

/// Root object of the shared segment.
///
/// `sequence` strictly increases for the lifetime of the segment. Its low bit
/// selects the stable slot: `sequence & 1` is the slot the writer most
/// recently completed, and `1 - (sequence & 1)` is the slot it will target
/// next. Readers must never treat the target slot as authoritative.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct SharedState {
    pub magic: u64,
    /// Seqlock counter. Accessed atomically by both sides (see `store`).
    pub sequence: u64,
    /// Live grid dimensions, fixed for the segment's lifetime.
    pub cols: u16,
    pub rows: u16,
    /// Advisory cursor mirror of the latest published frame.
    pub cursor_col: u16,
    pub cursor_row: u16,
    /// Advisory new-data flag for polling readers.
    pub dirty: u8,
    pub _padding: [u8; 7],
    pub buffers: [GridSlot; 2],
}

impl SharedState {
    /// Total segment size in bytes.
    pub const fn segment_size() -> usize {
        core::mem::size_of::<Self>()
    }
}

/// Resolve the segment base name, honoring the environment override.
pub fn shm_path_base() -> String {
    std::env::var(SHM_PATH_ENV).unwrap_or_else(|_| SHM_PATH_BASE.to_string())
}

/// Segment name for a given epoch. Epoch 0 is the bare base name so a fresh
/// daemon and a fresh client agree without any handshake.
pub fn shm_path_for_epoch(base: &str, epoch: u32) -> String {
    if epoch == 0 {
        base.to_string()
    } else {
        format!("{base}.{epoch}")
    }
}

/// Resolve the control socket path, honoring the environment override.
pub fn socket_path() -> std::path::PathBuf {
    std::env::var(SOCKET_PATH_ENV)
        .unwrap_or_else(|_| SOCKET_PATH.to_string())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, size_of};

    #[test]
    fn packed_cell_is_16_bytes() {
        assert_eq!(size_of::<PackedCell>(), 16);
        assert_eq!(align_of::<PackedCell>(), 4);
    }

    #[test]
    fn grid_slot_layout() {
        // 8 (generation) + 2 + 2 + 4 (cursor + padding) + cells.
        assert_eq!(
            size_of::<GridSlot>(),
            16 + CELLS_PER_SLOT * size_of::<PackedCell>()
        );
    }

    #[test]
    fn shared_state_layout() {
        // 32-byte header followed by exactly two slots.
        assert_eq!(size_of::<SharedState>(), 32 + 2 * size_of::<GridSlot>());
        assert_eq!(align_of::<SharedState>(), 8);
    }

    #[test]
    fn sequence_field_is_atomically_accessible() {
        // The store casts &sequence to &AtomicU64; it must be 8-aligned.
        assert_eq!(core::mem::offset_of!(SharedState, sequence) % 8, 0);
    }

    #[test]
    fn style_flags_compose_independently() {
        let all = StyleFlags::BOLD | StyleFlags::ITALIC | StyleFlags::UNDERLINE;
        assert!(all.contains(StyleFlags::BOLD));
        assert!(all.contains(StyleFlags::ITALIC));
        assert!(!all.contains(StyleFlags::INVERSE));

        let cell = PackedCell::new('x', 0, 0, all);
        assert_eq!(cell.style(), all);
    }

    #[test]
    fn blank_cell_is_empty() {
        assert!(PackedCell::blank(0xFFFF_FFFF, 0xFF00_0000).is_empty());
        assert!(!PackedCell::new('a', 0, 0, StyleFlags::empty()).is_empty());
    }

    #[test]
    fn epoch_zero_is_bare_base_name() {
        assert_eq!(shm_path_for_epoch("/g", 0), "/g");
        assert_eq!(shm_path_for_epoch("/g", 3), "/g.3");
    }
}
