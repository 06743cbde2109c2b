//! Terminal emulation engine.
//!
//! Turns a raw PTY byte stream into cell mutations on a grid. The engine is
//! pure state: no I/O, no shared memory, and its output is a deterministic
//! function of the byte stream fed so far. Replaying the same bytes from a
//! fresh engine reproduces the same grid.
//!
//! Layering:
//!
//! - [`parser`] — escape-sequence state machine, bytes in, [`Action`]s out.
//! - [`grid`] — the mutable cell matrix with erase/scroll primitives.
//! - [`term`] — applies actions to the grid: cursor, wrap, scroll, SGR.

#![forbid(unsafe_code)]

pub mod grid;
pub mod parser;
pub mod term;

pub use grid::Grid;
pub use parser::{Action, Parser};
pub use term::{DEFAULT_BG, DEFAULT_FG, Terminal, TextAttrs};
