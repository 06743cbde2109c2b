//! PTY ownership.
//!
//! Spawns the configured shell into a PTY and bridges its output into the
//! async runtime: a dedicated blocking thread reads the master side and
//! forwards chunks over a channel, so the publish path never blocks on the
//! PTY and the PTY never blocks on a slow client.

use std::io::{self, Read, Write};
use std::thread;

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

const READ_BUF_LEN: usize = 8192;
const CHANNEL_DEPTH: usize = 64;

/// Output-side events from the PTY reader thread.
#[derive(Debug)]
pub enum PtyEvent {
    /// A chunk of raw shell output.
    Output(Vec<u8>),
    /// The slave side closed; the shell is gone or going.
    Eof,
    /// A non-transient read error.
    ReadError(io::Error),
}

/// A live shell session on a PTY.
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    events: mpsc::Receiver<PtyEvent>,
    reader_thread: Option<thread::JoinHandle<()>>,
}

impl PtySession {
    /// Spawn `shell` into a fresh PTY of the given size.
    pub fn spawn(shell: &str, cols: u16, rows: u16) -> io::Result<Self> {
        let pty_system = portable_pty::native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(portable_pty_error)?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");

        let child = pair.slave.spawn_command(cmd).map_err(portable_pty_error)?;
        let mut reader = pair.master.try_clone_reader().map_err(portable_pty_error)?;
        let writer = pair.master.take_writer().map_err(portable_pty_error)?;
        debug!(shell, cols, rows, pid = ?child.process_id(), "spawned shell");

        let (tx, events) = mpsc::channel(CHANNEL_DEPTH);
        let reader_thread = thread::spawn(move || {
            let mut buf = [0u8; READ_BUF_LEN];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        let _ = tx.blocking_send(PtyEvent::Eof);
                        break;
                    }
                    Ok(n) => {
                        trace!(bytes = n, "pty output");
                        if tx.blocking_send(PtyEvent::Output(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        let _ = tx.blocking_send(PtyEvent::ReadError(err));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            master: pair.master,
            child,
            writer,
            events,
            reader_thread: Some(reader_thread),
        })
    }

    /// Next output event. `None` after the reader thread has shut down.
    pub async fn recv(&mut self) -> Option<PtyEvent> {
        self.events.recv().await
    }

    /// Forward input bytes (keystrokes, paste) to the shell.
    pub fn write_input(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    /// Propagate a grid resize to the PTY so the shell sees SIGWINCH.
    pub fn resize(&mut self, cols: u16, rows: u16) -> io::Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(portable_pty_error)
    }

    /// Reap the child and return its exit code.
    pub fn wait_exit_code(&mut self) -> io::Result<i32> {
        let status = self.child.wait()?;
        Ok(status.exit_code() as i32)
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let _ = self.child.kill();
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

fn portable_pty_error<E: std::fmt::Display>(err: E) -> io::Error {
    io::Error::other(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_shell_output_arrives_as_events() {
        let mut session = PtySession::spawn("/bin/sh", 80, 24).expect("spawn");
        session.write_input(b"printf gridlink-ready; exit\n").expect("input");

        let mut collected = Vec::new();
        while let Some(event) = session.recv().await {
            match event {
                PtyEvent::Output(bytes) => collected.extend_from_slice(&bytes),
                PtyEvent::Eof => break,
                PtyEvent::ReadError(err) => panic!("read error: {err}"),
            }
            if collected
                .windows(b"gridlink-ready".len())
                .any(|w| w == b"gridlink-ready")
            {
                break;
            }
        }

        assert!(
            collected
                .windows(b"gridlink-ready".len())
                .any(|w| w == b"gridlink-ready"),
            "expected marker in shell output"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_code_is_reaped_after_eof() {
        let mut session = PtySession::spawn("/bin/sh", 80, 24).expect("spawn");
        session.write_input(b"exit 3\n").expect("input");

        while let Some(event) = session.recv().await {
            if matches!(event, PtyEvent::Eof) {
                break;
            }
        }
        assert_eq!(session.wait_exit_code().expect("wait"), 3);
    }
}
