//! Control-channel server.
//!
//! One Unix socket listener, one read task per connected client, and a
//! registry of writer halves for broadcasting daemon announcements. Client
//! messages are funneled into the main loop over a channel; the grid path
//! never runs through here.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use gridlink_protocol::{ControlMessage, DaemonMessage, check_body_len};

pub type ClientId = u64;

/// Client activity surfaced to the daemon's main loop.
#[derive(Debug)]
pub enum ControlEvent {
    Connected(ClientId),
    Message(ClientId, ControlMessage),
    Disconnected(ClientId),
}

#[derive(Clone)]
struct ClientSender(Arc<Mutex<OwnedWriteHalf>>);

impl ClientSender {
    async fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.0.lock().await;
        writer.write_all(frame).await
    }
}

/// Writer halves of all connected clients.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<ClientId, ClientSender>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Fire-and-forget send to one client. A send failure only logs; the
    /// read task owns disconnect detection.
    pub async fn send_to(&self, id: ClientId, msg: &DaemonMessage) {
        let Some(sender) = self.clients.lock().await.get(&id).cloned() else {
            return;
        };
        match msg.encode() {
            Ok(frame) => {
                if let Err(err) = sender.send_frame(&frame).await {
                    warn!(client = id, %err, "send to client failed");
                }
            }
            Err(err) => warn!(client = id, %err, "unencodable daemon message"),
        }
    }

    /// Fire-and-forget send to every connected client.
    pub async fn broadcast(&self, msg: &DaemonMessage) {
        let frame = match msg.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "unencodable daemon message");
                return;
            }
        };
        let clients: Vec<(ClientId, ClientSender)> = self
            .clients
            .lock()
            .await
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();
        for (id, sender) in clients {
            if let Err(err) = sender.send_frame(&frame).await {
                warn!(client = id, %err, "broadcast to client failed");
            }
        }
    }

    async fn insert(&self, id: ClientId, sender: ClientSender) {
        self.clients.lock().await.insert(id, sender);
    }

    async fn remove(&self, id: ClientId) {
        self.clients.lock().await.remove(&id);
    }
}

/// Accepts clients and spawns their read tasks.
pub struct ControlServer {
    listener: UnixListener,
    registry: ClientRegistry,
    events: mpsc::UnboundedSender<ControlEvent>,
    next_id: AtomicU64,
}

impl ControlServer {
    /// Bind the control socket, replacing a stale socket file from a
    /// previous run. The socket is private to the owning user.
    pub fn bind(
        path: &Path,
        registry: ClientRegistry,
        events: mpsc::UnboundedSender<ControlEvent>,
    ) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("removing stale socket {}", path.display()))?;
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("binding control socket {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
                .with_context(|| format!("restricting socket permissions {}", path.display()))?;
        }

        info!(socket = %path.display(), "control channel listening");
        Ok(Self {
            listener,
            registry,
            events,
            next_id: AtomicU64::new(1),
        })
    }

    /// Accept loop. Runs until the daemon shuts down.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    self.attach_client(id, stream).await;
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                }
            }
        }
    }

    async fn attach_client(&self, id: ClientId, stream: UnixStream) {
        let (read_half, write_half) = stream.into_split();
        self.registry
            .insert(id, ClientSender(Arc::new(Mutex::new(write_half))))
            .await;
        info!(client = id, "client connected");
        let _ = self.events.send(ControlEvent::Connected(id));

        let registry = self.registry.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            read_loop(id, read_half, &events).await;
            registry.remove(id).await;
            info!(client = id, "client disconnected");
            let _ = events.send(ControlEvent::Disconnected(id));
        });
    }
}

/// Reads length-prefixed frames until EOF, error, or protocol violation.
async fn read_loop(
    id: ClientId,
    mut reader: tokio::net::unix::OwnedReadHalf,
    events: &mpsc::UnboundedSender<ControlEvent>,
) {
    loop {
        let len = match reader.read_u32_le().await {
            Ok(len) => len as usize,
            // EOF between frames is the normal goodbye.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return,
            Err(err) => {
                warn!(client = id, %err, "client read failed");
                return;
            }
        };
        if let Err(err) = check_body_len(len) {
            warn!(client = id, %err, "dropping client");
            return;
        }

        let mut body = vec![0u8; len];
        if let Err(err) = reader.read_exact(&mut body).await {
            warn!(client = id, %err, "client read failed mid-frame");
            return;
        }

        match ControlMessage::decode(&body) {
            Ok(msg) => {
                debug!(client = id, ?msg, "control message");
                if events.send(ControlEvent::Message(id, msg)).is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(client = id, %err, "undecodable frame, dropping client");
                return;
            }
        }
    }
}
