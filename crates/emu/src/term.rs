//! Host terminal bridge and guest termios state.

use std::collections::VecDeque;

/// What the embedder supplies: an output sink, a non-blocking stdin
/// queue with an EOF flag, and an optional window size. The run loop
/// yields to the embedder whenever the queue runs dry.
pub trait TerminalBridge {
    /// Guest stdout/stderr bytes.
    fn term_write(&mut self, bytes: &[u8]);

    fn stdin_has_data(&self) -> bool;

    fn stdin_eof(&self) -> bool;

    /// Drain up to `buf.len()` queued bytes; never blocks.
    fn stdin_read(&mut self, buf: &mut [u8]) -> usize;

    /// Bytes currently queued (FIONREAD).
    fn stdin_len(&self) -> usize;

    /// (rows, cols) for TIOCGWINSZ.
    fn winsize(&self) -> (u16, u16) {
        (24, 80)
    }
}

/// Queue-backed bridge: the embedder pushes stdin bytes and collects
/// output. This is what the CLI and the tests build on.
#[derive(Debug, Default)]
pub struct QueueTerminal {
    stdin: VecDeque<u8>,
    eof: bool,
    output: Vec<u8>,
    /// Mirror output to the host's stdout as it arrives.
    pub echo: bool,
    pub rows: u16,
    pub cols: u16,
}

impl QueueTerminal {
    pub fn new() -> Self {
        QueueTerminal {
            stdin: VecDeque::new(),
            eof: false,
            output: Vec::new(),
            echo: false,
            rows: 24,
            cols: 80,
        }
    }

    pub fn push_stdin(&mut self, bytes: &[u8]) {
        self.stdin.extend(bytes);
    }

    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}

impl TerminalBridge for QueueTerminal {
    fn term_write(&mut self, bytes: &[u8]) {
        if self.echo {
            // Live mode: straight to the host terminal, nothing kept.
            use std::io::Write;
            let _ = std::io::stdout().write_all(bytes);
            let _ = std::io::stdout().flush();
        } else {
            self.output.extend_from_slice(bytes);
        }
    }

    fn stdin_has_data(&self) -> bool {
        !self.stdin.is_empty()
    }

    fn stdin_eof(&self) -> bool {
        self.eof && self.stdin.is_empty()
    }

    fn stdin_read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.stdin.len());
        for slot in buf[..n].iter_mut() {
            *slot = self.stdin.pop_front().unwrap();
        }
        n
    }

    fn stdin_len(&self) -> usize {
        self.stdin.len()
    }

    fn winsize(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }
}

/// A queue terminal shared between the emulator and its embedder: the
/// embedder keeps a clone to push stdin bytes while the core owns the
/// bridge half.
#[derive(Debug, Clone, Default)]
pub struct SharedTerminal(pub std::rc::Rc<std::cell::RefCell<QueueTerminal>>);

impl SharedTerminal {
    pub fn new(queue: QueueTerminal) -> Self {
        SharedTerminal(std::rc::Rc::new(std::cell::RefCell::new(queue)))
    }

    pub fn push_stdin(&self, bytes: &[u8]) {
        self.0.borrow_mut().push_stdin(bytes);
    }

    pub fn set_eof(&self) {
        self.0.borrow_mut().set_eof();
    }

    pub fn take_output(&self) -> Vec<u8> {
        self.0.borrow_mut().take_output()
    }
}

impl TerminalBridge for SharedTerminal {
    fn term_write(&mut self, bytes: &[u8]) {
        self.0.borrow_mut().term_write(bytes);
    }

    fn stdin_has_data(&self) -> bool {
        self.0.borrow().stdin_has_data()
    }

    fn stdin_eof(&self) -> bool {
        self.0.borrow().stdin_eof()
    }

    fn stdin_read(&mut self, buf: &mut [u8]) -> usize {
        self.0.borrow_mut().stdin_read(buf)
    }

    fn stdin_len(&self) -> usize {
        self.0.borrow().stdin_len()
    }

    fn winsize(&self) -> (u16, u16) {
        self.0.borrow().winsize()
    }
}

/// Persistent termios for the shared controlling terminal. Stored so a
/// guest shell can flip into raw mode and read it back.
#[derive(Debug, Clone)]
pub struct TermiosState {
    pub c_iflag: u32,
    pub c_oflag: u32,
    pub c_cflag: u32,
    pub c_lflag: u32,
    pub c_line: u8,
    pub c_cc: [u8; 19],
    pub c_ispeed: u32,
    pub c_ospeed: u32,
}

impl Default for TermiosState {
    fn default() -> Self {
        TermiosState {
            c_iflag: 0x0500,  // ICRNL | IXON
            c_oflag: 0x0005,  // OPOST | ONLCR
            c_cflag: 0x00bf,  // CS8 | CREAD | CLOCAL
            c_lflag: 0x8a3b,  // ECHO|ICANON|ISIG|IEXTEN|ECHOCTL|ECHOKE|ECHOE
            c_line: 0,
            c_cc: [0; 19],
            c_ispeed: 38400,
            c_ospeed: 38400,
        }
    }
}

impl TermiosState {
    /// Canonical mode and echo both off.
    pub fn is_raw(&self) -> bool {
        self.c_lflag & 0x0002 == 0 // ICANON
    }

    pub fn serialize(&self) -> [u8; 44] {
        let mut buf = [0u8; 44];
        buf[0..4].copy_from_slice(&self.c_iflag.to_le_bytes());
        buf[4..8].copy_from_slice(&self.c_oflag.to_le_bytes());
        buf[8..12].copy_from_slice(&self.c_cflag.to_le_bytes());
        buf[12..16].copy_from_slice(&self.c_lflag.to_le_bytes());
        buf[16] = self.c_line;
        buf[17..36].copy_from_slice(&self.c_cc);
        buf[36..40].copy_from_slice(&self.c_ispeed.to_le_bytes());
        buf[40..44].copy_from_slice(&self.c_ospeed.to_le_bytes());
        buf
    }

    pub fn deserialize(&mut self, buf: &[u8; 44]) {
        self.c_iflag = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        self.c_oflag = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        self.c_cflag = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        self.c_lflag = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        self.c_line = buf[16];
        self.c_cc.copy_from_slice(&buf[17..36]);
        self.c_ispeed = u32::from_le_bytes(buf[36..40].try_into().unwrap());
        self.c_ospeed = u32::from_le_bytes(buf[40..44].try_into().unwrap());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termios_round_trips_and_tracks_raw_mode() {
        let mut t = TermiosState::default();
        assert!(!t.is_raw());
        let mut raw = t.serialize();
        // Clear ICANON|ECHO in lflag.
        let lflag = u32::from_le_bytes(raw[12..16].try_into().unwrap()) & !0x000a;
        raw[12..16].copy_from_slice(&lflag.to_le_bytes());
        t.deserialize(&raw);
        assert!(t.is_raw());
    }

    #[test]
    fn queue_drains_in_order() {
        let mut q = QueueTerminal::new();
        q.push_stdin(b"hello\n");
        let mut buf = [0u8; 4];
        assert_eq!(q.stdin_read(&mut buf), 4);
        assert_eq!(&buf, b"hell");
        assert_eq!(q.stdin_len(), 2);
        assert!(!q.stdin_eof());
        q.set_eof();
        assert!(!q.stdin_eof()); // bytes still queued
        let mut rest = [0u8; 8];
        assert_eq!(q.stdin_read(&mut rest), 2);
        assert!(q.stdin_eof());
    }
}
