//! Escape-sequence state machine.
//!
//! Converts an output byte stream into a sequence of actions for the
//! terminal. The machine is an explicit tagged state enum; every unrecognized
//! sequence is consumed to completion and surfaced as a raw [`Action::Raw`]
//! that the terminal drops, so malformed input can never wedge the parser
//! away from ground state. Partial escape sequences and split multi-byte
//! UTF-8 characters persist across `feed` calls.

/// Parser output actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print one character (ASCII or decoded multi-byte UTF-8).
    Print(char),
    /// Line feed (`\n`, VT, FF).
    LineFeed,
    /// Carriage return (`\r`).
    CarriageReturn,
    /// Horizontal tab (`\t`).
    Tab,
    /// Backspace (`\x08`).
    Backspace,
    /// Bell (`\x07`).
    Bell,
    /// CUU: cursor up by count (default 1).
    CursorUp(u16),
    /// CUD: cursor down by count (default 1).
    CursorDown(u16),
    /// CUF: cursor right by count (default 1).
    CursorRight(u16),
    /// CUB: cursor left by count (default 1).
    CursorLeft(u16),
    /// CHA: cursor to absolute column, 0-indexed.
    CursorColumn(u16),
    /// CUP/HVP: cursor to absolute 0-indexed position.
    CursorPosition { row: u16, col: u16 },
    /// ED: erase in display, mode 0/1/2.
    EraseInDisplay(u8),
    /// EL: erase in line, mode 0/1/2.
    EraseInLine(u8),
    /// SGR parameters, interpreted statefully by the terminal.
    Sgr(Vec<u16>),
    /// Save cursor position and attributes (`CSI s` / `ESC 7`).
    SaveCursor,
    /// Restore cursor position and attributes (`CSI u` / `ESC 8`).
    RestoreCursor,
    /// A complete sequence the engine does not interpret, captured verbatim.
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Esc,
    Csi,
    Osc,
    /// Saw ESC inside an OSC string; `ESC \` (ST) terminates it.
    OscEsc,
    /// Collecting continuation bytes of a multi-byte UTF-8 character;
    /// `pending` counts how many are still expected.
    Utf8 { pending: u8 },
}

/// Streaming VT parser. Cheap to construct, never fails.
#[derive(Debug, Clone)]
pub struct Parser {
    state: State,
    seq: Vec<u8>,
    utf8: [u8; 4],
    utf8_len: u8,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            seq: Vec::new(),
            utf8: [0; 4],
            utf8_len: 0,
        }
    }

    /// Feed a chunk of bytes, returning the completed actions.
    ///
    /// State carried by incomplete sequences survives to the next call, so
    /// splitting a stream at any byte boundary yields the same actions as
    /// feeding it whole.
    #[must_use]
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Action> {
        let mut out = Vec::new();
        for &b in bytes {
            if let Some(action) = self.step(b) {
                out.push(action);
            }
        }
        out
    }

    fn step(&mut self, b: u8) -> Option<Action> {
        match self.state {
            State::Ground => self.step_ground(b),
            State::Esc => self.step_esc(b),
            State::Csi => self.step_csi(b),
            State::Osc => self.step_osc(b),
            State::OscEsc => self.step_osc_esc(b),
            State::Utf8 { pending } => self.step_utf8(b, pending),
        }
    }

    fn step_ground(&mut self, b: u8) -> Option<Action> {
        match b {
            b'\n' | 0x0B | 0x0C => Some(Action::LineFeed),
            b'\r' => Some(Action::CarriageReturn),
            b'\t' => Some(Action::Tab),
            0x08 => Some(Action::Backspace),
            0x07 => Some(Action::Bell),
            0x1b => {
                self.state = State::Esc;
                self.seq.clear();
                self.seq.push(0x1b);
                None
            }
            0x20..=0x7E => Some(Action::Print(b as char)),
            // Leading bytes of 2/3/4-byte UTF-8 sequences. 0xC0/0xC1 are
            // overlong and 0xF5..=0xFF lie outside Unicode; both fall to
            // the ignore arm below.
            0xC2..=0xDF => self.start_utf8(b, 1),
            0xE0..=0xEF => self.start_utf8(b, 2),
            0xF0..=0xF4 => self.start_utf8(b, 3),
            _ => None,
        }
    }

    fn start_utf8(&mut self, b: u8, pending: u8) -> Option<Action> {
        self.utf8[0] = b;
        self.utf8_len = 1;
        self.state = State::Utf8 { pending };
        None
    }

    fn step_utf8(&mut self, b: u8, pending: u8) -> Option<Action> {
        if !(0x80..=0xBF).contains(&b) {
            // Not a continuation byte. Drop the partial character and
            // reprocess this byte from ground.
            self.state = State::Ground;
            self.utf8_len = 0;
            return self.step_ground(b);
        }
        let idx = self.utf8_len as usize;
        if idx < 4 {
            self.utf8[idx] = b;
            self.utf8_len += 1;
        }
        if pending > 1 {
            self.state = State::Utf8 { pending: pending - 1 };
            return None;
        }
        self.state = State::Ground;
        let len = self.utf8_len as usize;
        self.utf8_len = 0;
        core::str::from_utf8(&self.utf8[..len])
            .ok()
            .and_then(|s| s.chars().next())
            .map(Action::Print)
    }

    fn step_esc(&mut self, b: u8) -> Option<Action> {
        self.seq.push(b);
        match b {
            b'[' => {
                self.state = State::Csi;
                None
            }
            b']' => {
                self.state = State::Osc;
                None
            }
            b'7' => self.finish(Action::SaveCursor),
            b'8' => self.finish(Action::RestoreCursor),
            _ => {
                self.state = State::Ground;
                Some(Action::Raw(self.take_seq()))
            }
        }
    }

    fn step_csi(&mut self, b: u8) -> Option<Action> {
        self.seq.push(b);
        // ECMA-48: a byte in 0x40..=0x7E terminates the sequence.
        if (0x40..=0x7E).contains(&b) {
            self.state = State::Ground;
            let seq = self.take_seq();
            return Some(decode_csi(&seq).unwrap_or(Action::Raw(seq)));
        }
        None
    }

    fn step_osc(&mut self, b: u8) -> Option<Action> {
        self.seq.push(b);
        match b {
            // BEL-terminated. OSC strings carry no grid semantics here.
            0x07 => {
                self.state = State::Ground;
                Some(Action::Raw(self.take_seq()))
            }
            0x1b => {
                self.state = State::OscEsc;
                None
            }
            _ => None,
        }
    }

    fn step_osc_esc(&mut self, b: u8) -> Option<Action> {
        self.seq.push(b);
        if b == b'\\' {
            self.state = State::Ground;
            return Some(Action::Raw(self.take_seq()));
        }
        self.state = State::Osc;
        None
    }

    fn finish(&mut self, action: Action) -> Option<Action> {
        self.state = State::Ground;
        self.seq.clear();
        Some(action)
    }

    fn take_seq(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.seq)
    }
}

fn decode_csi(seq: &[u8]) -> Option<Action> {
    if seq.len() < 3 || seq[0] != 0x1b || seq[1] != b'[' {
        return None;
    }
    let terminator = *seq.last()?;
    let param_bytes = &seq[2..seq.len() - 1];
    // DEC private sequences (`?` prefix) are outside this engine's scope.
    if param_bytes.first() == Some(&b'?') {
        return None;
    }
    let params = parse_params(param_bytes)?;
    let first = params.first().copied();

    match terminator {
        b'A' => Some(Action::CursorUp(count_or_one(first))),
        b'B' => Some(Action::CursorDown(count_or_one(first))),
        b'C' => Some(Action::CursorRight(count_or_one(first))),
        b'D' => Some(Action::CursorLeft(count_or_one(first))),
        b'G' => Some(Action::CursorColumn(count_or_one(first).saturating_sub(1))),
        b'H' | b'f' => {
            // 1-indexed on the wire; a 0 parameter means 1.
            let row = first.unwrap_or(1).max(1) - 1;
            let col = params.get(1).copied().unwrap_or(1).max(1) - 1;
            Some(Action::CursorPosition { row, col })
        }
        b'J' => {
            let mode = first.unwrap_or(0);
            (mode <= 2).then_some(Action::EraseInDisplay(mode as u8))
        }
        b'K' => {
            let mode = first.unwrap_or(0);
            (mode <= 2).then_some(Action::EraseInLine(mode as u8))
        }
        b'm' => Some(Action::Sgr(params)),
        b's' => Some(Action::SaveCursor),
        b'u' => Some(Action::RestoreCursor),
        _ => None,
    }
}

fn parse_params(bytes: &[u8]) -> Option<Vec<u16>> {
    if bytes.is_empty() {
        return Some(Vec::new());
    }
    let s = core::str::from_utf8(bytes).ok()?;
    let mut out = Vec::new();
    for part in s.split(';') {
        if part.is_empty() {
            out.push(0);
            continue;
        }
        let value = part.parse::<u32>().ok()?;
        out.push(value.min(u32::from(u16::MAX)) as u16);
    }
    Some(out)
}

fn count_or_one(value: Option<u16>) -> u16 {
    value.unwrap_or(1).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Ground state ───────────────────────────────────────────────

    #[test]
    fn printable_ascii_emits_print() {
        let mut p = Parser::new();
        assert_eq!(p.feed(b"ok"), vec![Action::Print('o'), Action::Print('k')]);
    }

    #[test]
    fn c0_controls_emit_dedicated_actions() {
        let mut p = Parser::new();
        assert_eq!(
            p.feed(b"\x07\x08\t\r\n"),
            vec![
                Action::Bell,
                Action::Backspace,
                Action::Tab,
                Action::CarriageReturn,
                Action::LineFeed,
            ]
        );
    }

    #[test]
    fn unhandled_c0_controls_are_dropped() {
        let mut p = Parser::new();
        assert!(p.feed(&[0x00, 0x01, 0x0E, 0x1F]).is_empty());
    }

    // ── UTF-8 ──────────────────────────────────────────────────────

    #[test]
    fn multibyte_characters_decode() {
        let mut p = Parser::new();
        assert_eq!(
            p.feed("é中🎉".as_bytes()),
            vec![
                Action::Print('é'),
                Action::Print('中'),
                Action::Print('🎉'),
            ]
        );
    }

    #[test]
    fn utf8_split_across_feeds() {
        let mut p = Parser::new();
        assert!(p.feed(&[0xF0]).is_empty());
        assert!(p.feed(&[0x9F]).is_empty());
        assert!(p.feed(&[0x8E]).is_empty());
        assert_eq!(p.feed(&[0x89]), vec![Action::Print('🎉')]);
    }

    #[test]
    fn invalid_continuation_reprocesses_from_ground() {
        let mut p = Parser::new();
        assert_eq!(p.feed(&[0xC3, b'a']), vec![Action::Print('a')]);
    }

    #[test]
    fn overlong_and_out_of_range_leads_are_ignored() {
        let mut p = Parser::new();
        assert!(p.feed(&[0xC0, 0xC1, 0xF5, 0xFF]).is_empty());
    }

    #[test]
    fn escape_aborts_partial_utf8() {
        let mut p = Parser::new();
        // 0x1b is not a continuation byte; it restarts in ground as ESC.
        assert_eq!(p.feed(&[0xE4, 0x1b, b'7']), vec![Action::SaveCursor]);
    }

    // ── CSI ────────────────────────────────────────────────────────

    #[test]
    fn cursor_moves_decode_with_defaults() {
        let mut p = Parser::new();
        assert_eq!(
            p.feed(b"\x1b[2A\x1b[B\x1b[3C\x1b[0D"),
            vec![
                Action::CursorUp(2),
                Action::CursorDown(1),
                Action::CursorRight(3),
                Action::CursorLeft(1),
            ]
        );
    }

    #[test]
    fn cup_is_zero_indexed() {
        let mut p = Parser::new();
        assert_eq!(
            p.feed(b"\x1b[5;10H"),
            vec![Action::CursorPosition { row: 4, col: 9 }]
        );
        assert_eq!(
            p.feed(b"\x1b[H"),
            vec![Action::CursorPosition { row: 0, col: 0 }]
        );
        assert_eq!(
            p.feed(b"\x1b[0;0f"),
            vec![Action::CursorPosition { row: 0, col: 0 }]
        );
    }

    #[test]
    fn cha_is_zero_indexed() {
        let mut p = Parser::new();
        assert_eq!(p.feed(b"\x1b[5G"), vec![Action::CursorColumn(4)]);
        assert_eq!(p.feed(b"\x1b[G"), vec![Action::CursorColumn(0)]);
    }

    #[test]
    fn erase_modes_decode() {
        let mut p = Parser::new();
        assert_eq!(
            p.feed(b"\x1b[J\x1b[1J\x1b[2J\x1b[K\x1b[2K"),
            vec![
                Action::EraseInDisplay(0),
                Action::EraseInDisplay(1),
                Action::EraseInDisplay(2),
                Action::EraseInLine(0),
                Action::EraseInLine(2),
            ]
        );
    }

    #[test]
    fn sgr_params_pass_through() {
        let mut p = Parser::new();
        assert_eq!(p.feed(b"\x1b[31m"), vec![Action::Sgr(vec![31])]);
        assert_eq!(p.feed(b"\x1b[m"), vec![Action::Sgr(vec![])]);
        assert_eq!(
            p.feed(b"\x1b[38;2;12;34;56m"),
            vec![Action::Sgr(vec![38, 2, 12, 34, 56])]
        );
    }

    #[test]
    fn save_restore_both_spellings() {
        let mut p = Parser::new();
        assert_eq!(
            p.feed(b"\x1b7\x1b8\x1b[s\x1b[u"),
            vec![
                Action::SaveCursor,
                Action::RestoreCursor,
                Action::SaveCursor,
                Action::RestoreCursor,
            ]
        );
    }

    #[test]
    fn csi_split_across_feeds() {
        let mut p = Parser::new();
        assert!(p.feed(b"\x1b[3").is_empty());
        assert_eq!(p.feed(b"1m"), vec![Action::Sgr(vec![31])]);
    }

    // ── Unknown sequences ──────────────────────────────────────────

    #[test]
    fn unknown_csi_is_captured_raw() {
        let mut p = Parser::new();
        assert_eq!(
            p.feed(b"\x1b[?25l"),
            vec![Action::Raw(b"\x1b[?25l".to_vec())]
        );
        assert_eq!(p.feed(b"\x1b[5X"), vec![Action::Raw(b"\x1b[5X".to_vec())]);
    }

    #[test]
    fn unknown_esc_is_captured_raw() {
        let mut p = Parser::new();
        assert_eq!(p.feed(b"\x1bc"), vec![Action::Raw(b"\x1bc".to_vec())]);
    }

    #[test]
    fn osc_strings_are_consumed_whole() {
        let mut p = Parser::new();
        assert_eq!(
            p.feed(b"\x1b]0;title\x07x"),
            vec![
                Action::Raw(b"\x1b]0;title\x07".to_vec()),
                Action::Print('x'),
            ]
        );
        assert_eq!(
            p.feed(b"\x1b]2;hi\x1b\\"),
            vec![Action::Raw(b"\x1b]2;hi\x1b\\".to_vec())]
        );
    }

    #[test]
    fn esc_inside_osc_does_not_terminate_early() {
        let mut p = Parser::new();
        // ESC followed by something other than backslash stays in the string.
        assert!(p.feed(b"\x1b]0;a\x1bb").is_empty());
        assert_eq!(
            p.feed(b"\x07"),
            vec![Action::Raw(b"\x1b]0;a\x1bb\x07".to_vec())]
        );
    }

    #[test]
    fn parser_recovers_to_ground_after_any_sequence() {
        let mut p = Parser::new();
        let _ = p.feed(b"\x1b[?1049h\x1b]0;x\x07\x1bZ");
        assert_eq!(p.feed(b"a"), vec![Action::Print('a')]);
    }
}
