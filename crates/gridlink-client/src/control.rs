//! Control-channel link to the daemon.
//!
//! Send is fire-and-forget over the shared writer half; receive runs in a
//! dedicated task that decodes daemon frames into [`LinkEvent`]s. When the
//! connection drops the link enters a capped exponential-backoff reconnect
//! loop while the daemon keeps the session alive.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use gridlink_protocol::{ControlMessage, DaemonMessage, FrameError, check_body_len};

/// Reconnect policy: base delay doubles per failed attempt up to the cap.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl Backoff {
    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.cap)
    }
}

/// Link failures surfaced to the host.
#[derive(Debug)]
pub enum LinkError {
    /// No live connection; the daemon side is gone or not yet reconnected.
    PeerGone,
    /// Every connect attempt failed.
    ConnectFailed { attempts: u32, last: io::Error },
    Io(io::Error),
    Frame(FrameError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::PeerGone => write!(f, "control peer is gone"),
            LinkError::ConnectFailed { attempts, last } => {
                write!(f, "connect failed after {attempts} attempts: {last}")
            }
            LinkError::Io(err) => write!(f, "control channel i/o error: {err}"),
            LinkError::Frame(err) => write!(f, "control channel framing error: {err}"),
        }
    }
}

impl Error for LinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LinkError::ConnectFailed { last, .. } => Some(last),
            LinkError::Io(err) => Some(err),
            LinkError::Frame(err) => Some(err),
            LinkError::PeerGone => None,
        }
    }
}

/// Daemon-side activity delivered through [`ControlLink::recv`].
#[derive(Debug)]
pub enum LinkEvent {
    Message(DaemonMessage),
    /// Connection lost; a reconnect loop is running.
    Disconnected,
    /// Reconnect succeeded. Resend state the daemon may have missed
    /// (resize is idempotent on both sides).
    Reconnected,
    /// Reconnect attempts exhausted; the link is closed for good.
    Closed,
}

type SharedWriter = Arc<Mutex<Option<OwnedWriteHalf>>>;

/// Client end of the control channel.
#[derive(Debug)]
pub struct ControlLink {
    writer: SharedWriter,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl ControlLink {
    /// Connect to the daemon's control socket with the default backoff.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        Self::connect_with(path, Backoff::default()).await
    }

    /// Connect with an explicit reconnect policy.
    pub async fn connect_with(path: impl AsRef<Path>, backoff: Backoff) -> Result<Self, LinkError> {
        let path = path.as_ref().to_path_buf();
        let stream = connect_with_backoff(&path, backoff).await?;
        let (read_half, write_half) = stream.into_split();

        let writer: SharedWriter = Arc::new(Mutex::new(Some(write_half)));
        let (events_tx, events) = mpsc::unbounded_channel();
        tokio::spawn(receive_task(
            path,
            backoff,
            read_half,
            writer.clone(),
            events_tx,
        ));

        Ok(Self { writer, events })
    }

    /// Fire-and-forget send. Fails fast with [`LinkError::PeerGone`] while
    /// disconnected; the caller decides whether the message was worth
    /// retransmitting after [`LinkEvent::Reconnected`].
    pub async fn send(&self, msg: &ControlMessage) -> Result<(), LinkError> {
        let frame = msg.encode().map_err(LinkError::Frame)?;
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(LinkError::PeerGone);
        };
        match writer.write_all(&frame).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // The receive task notices the broken stream independently;
                // dropping the writer here just stops further sends early.
                debug!(%err, "control send failed");
                *guard = None;
                Err(LinkError::PeerGone)
            }
        }
    }

    /// Next daemon event. `None` once the receive task has shut down.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }
}

async fn connect_with_backoff(path: &Path, backoff: Backoff) -> Result<UnixStream, LinkError> {
    let mut delay = backoff.base;
    let mut attempts = 0;
    loop {
        match UnixStream::connect(path).await {
            Ok(stream) => {
                info!(socket = %path.display(), "connected to daemon");
                return Ok(stream);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= backoff.max_attempts {
                    return Err(LinkError::ConnectFailed {
                        attempts,
                        last: err,
                    });
                }
                debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, %err,
                    "connect failed, retrying");
                sleep(delay).await;
                delay = backoff.next_delay(delay);
            }
        }
    }
}

/// Reads daemon frames until the stream breaks, then reconnects.
async fn receive_task(
    path: PathBuf,
    backoff: Backoff,
    mut reader: OwnedReadHalf,
    writer: SharedWriter,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    loop {
        match read_frame(&mut reader).await {
            Ok(msg) => {
                if events.send(LinkEvent::Message(msg)).is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(%err, "control stream closed");
                writer.lock().await.take();
                if events.send(LinkEvent::Disconnected).is_err() {
                    return;
                }
                match connect_with_backoff(&path, backoff).await {
                    Ok(stream) => {
                        let (read_half, write_half) = stream.into_split();
                        reader = read_half;
                        *writer.lock().await = Some(write_half);
                        if events.send(LinkEvent::Reconnected).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "reconnect attempts exhausted, closing link");
                        let _ = events.send(LinkEvent::Closed);
                        return;
                    }
                }
            }
        }
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Result<DaemonMessage, LinkError> {
    let len = reader.read_u32_le().await.map_err(LinkError::Io)? as usize;
    check_body_len(len).map_err(LinkError::Frame)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(LinkError::Io)?;
    DaemonMessage::decode(&body).map_err(LinkError::Frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    fn quick_backoff() -> Backoff {
        Backoff {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(4),
            max_attempts: 3,
        }
    }

    async fn read_control_message(stream: &mut UnixStream) -> ControlMessage {
        let len = stream.read_u32_le().await.unwrap() as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        ControlMessage::decode(&body).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        let mut delay = backoff.base;
        let mut observed = Vec::new();
        for _ in 0..8 {
            observed.push(delay.as_millis());
            delay = backoff.next_delay(delay);
        }
        assert_eq!(observed, [100, 200, 400, 800, 1600, 3200, 5000, 5000]);
    }

    #[tokio::test]
    async fn connect_fails_after_bounded_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nobody-home.sock");

        let err = ControlLink::connect_with(&path, quick_backoff())
            .await
            .unwrap_err();
        match err {
            LinkError::ConnectFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn ping_pong_over_the_link() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            assert!(matches!(
                read_control_message(&mut stream).await,
                ControlMessage::Ping
            ));
            let frame = DaemonMessage::Pong.encode().unwrap();
            stream.write_all(&frame).await.unwrap();
            stream
        });

        let mut link = ControlLink::connect_with(&path, quick_backoff())
            .await
            .unwrap();
        link.send(&ControlMessage::Ping).await.unwrap();

        match link.recv().await.unwrap() {
            LinkEvent::Message(DaemonMessage::Pong) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        drop(server);
    }

    #[tokio::test]
    async fn dropped_connection_reports_disconnect_then_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut link = ControlLink::connect_with(
            &path,
            Backoff {
                base: Duration::from_millis(1),
                cap: Duration::from_millis(4),
                max_attempts: 50,
            },
        )
        .await
        .unwrap();

        let (first, _) = listener.accept().await.unwrap();
        drop(first);

        assert!(matches!(link.recv().await.unwrap(), LinkEvent::Disconnected));

        // Listener still bound, so the reconnect loop lands here.
        let (_second, _) = listener.accept().await.unwrap();
        assert!(matches!(link.recv().await.unwrap(), LinkEvent::Reconnected));

        link.send(&ControlMessage::Detach).await.unwrap();
    }

    #[tokio::test]
    async fn send_while_disconnected_is_peer_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut link = ControlLink::connect_with(&path, quick_backoff())
            .await
            .unwrap();
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        drop(listener);

        assert!(matches!(link.recv().await.unwrap(), LinkEvent::Disconnected));
        // The reconnect loop is still backing off against a dead socket.
        assert!(matches!(
            link.send(&ControlMessage::Ping).await,
            Err(LinkError::PeerGone)
        ));
    }
}
