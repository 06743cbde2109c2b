//! gridlink daemon.
//!
//! Owns the shell session end to end: spawns the shell into a PTY, feeds its
//! output through the terminal engine, publishes each completed frame into
//! the shared grid segment, and serves the control channel that clients use
//! for input, resize, and lifecycle events.

mod config;
mod control;
mod pty;
mod segment;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use gridlink_engine::Terminal;
use gridlink_protocol::{ControlMessage, DaemonMessage, FrameRef, MAX_COLS, MAX_ROWS};

use crate::config::Config;
use crate::control::{ClientRegistry, ControlEvent, ControlServer};
use crate::pty::{PtyEvent, PtySession};
use crate::segment::Segment;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load()?;
    info!(
        shell = %config.shell,
        cols = config.cols,
        rows = config.rows,
        "starting gridlink daemon"
    );
    run(config).await
}

async fn run(config: Config) -> Result<()> {
    let mut term = Terminal::new(config.cols, config.rows);
    let mut segment = Segment::create(&config.shm_path, 0, term.cols(), term.rows())?;
    let mut pty =
        PtySession::spawn(&config.shell, term.cols(), term.rows()).context("spawning shell")?;

    let registry = ClientRegistry::new();
    let (events_tx, mut control_events) = mpsc::unbounded_channel();
    let server = ControlServer::bind(&config.socket_path, registry.clone(), events_tx)?;
    tokio::spawn(server.run());

    loop {
        tokio::select! {
            event = pty.recv() => match event {
                Some(PtyEvent::Output(bytes)) => {
                    term.feed(&bytes);
                    publish_frame(&mut segment, &term);
                }
                Some(PtyEvent::ReadError(err)) => {
                    warn!(%err, "pty read failed, closing session");
                    close_session(&mut segment, &term, &mut pty, &registry).await;
                    return Ok(());
                }
                Some(PtyEvent::Eof) | None => {
                    close_session(&mut segment, &term, &mut pty, &registry).await;
                    return Ok(());
                }
            },
            event = control_events.recv() => match event {
                Some(event) => {
                    handle_control_event(
                        event,
                        &config,
                        &mut term,
                        &mut segment,
                        &mut pty,
                        &registry,
                    )
                    .await?;
                }
                None => {
                    warn!("control server gone, shutting down");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                registry
                    .broadcast(&DaemonMessage::SessionClosed { exit_code: 0 })
                    .await;
                return Ok(());
            }
        }
    }
}

/// Publish the terminal's current grid as one complete frame.
fn publish_frame(segment: &mut Segment, term: &Terminal) {
    let (cursor_col, cursor_row) = term.cursor();
    segment.publish(FrameRef {
        cells: term.cells(),
        cursor_col,
        cursor_row,
    });
}

/// Final frame, exit code, and the goodbye broadcast.
async fn close_session(
    segment: &mut Segment,
    term: &Terminal,
    pty: &mut PtySession,
    registry: &ClientRegistry,
) {
    publish_frame(segment, term);
    let exit_code = match pty.wait_exit_code() {
        Ok(code) => code,
        Err(err) => {
            warn!(%err, "could not reap shell");
            -1
        }
    };
    info!(exit_code, "shell exited");
    registry
        .broadcast(&DaemonMessage::SessionClosed { exit_code })
        .await;
}

async fn handle_control_event(
    event: ControlEvent,
    config: &Config,
    term: &mut Terminal,
    segment: &mut Segment,
    pty: &mut PtySession,
    registry: &ClientRegistry,
) -> Result<()> {
    match event {
        ControlEvent::Connected(id) => {
            registry
                .send_to(
                    id,
                    &DaemonMessage::SegmentReady {
                        cols: term.cols(),
                        rows: term.rows(),
                        path: segment.name().to_string(),
                    },
                )
                .await;
        }
        ControlEvent::Disconnected(id) => {
            // Session keeps running; clients come and go.
            debug!(client = id, "client left");
        }
        ControlEvent::Message(id, msg) => match msg {
            ControlMessage::Resize { cols, rows } => {
                handle_resize(config, term, segment, pty, registry, cols, rows).await?;
            }
            ControlMessage::Input { bytes } => {
                if let Err(err) = pty.write_input(&bytes) {
                    warn!(client = id, %err, "forwarding input failed");
                }
            }
            ControlMessage::LoadPlugin { path } => {
                if std::path::Path::new(&path).exists() {
                    info!(client = id, %path, "plugin load requested");
                } else {
                    warn!(client = id, %path, "plugin path does not exist, ignoring");
                }
            }
            ControlMessage::Ping => {
                registry.send_to(id, &DaemonMessage::Pong).await;
            }
            ControlMessage::Detach => {
                info!(client = id, "client detaching");
            }
        },
    }
    Ok(())
}

/// Resize the PTY and grid, then recreate the segment under the next epoch.
///
/// A resize to the current dimensions is a no-op, so clients may retransmit
/// freely after a reconnect.
async fn handle_resize(
    config: &Config,
    term: &mut Terminal,
    segment: &mut Segment,
    pty: &mut PtySession,
    registry: &ClientRegistry,
    cols: u16,
    rows: u16,
) -> Result<()> {
    let cols = cols.clamp(1, MAX_COLS as u16);
    let rows = rows.clamp(1, MAX_ROWS as u16);
    if !segment.needs_rebuild(cols, rows) {
        debug!(cols, rows, "resize to current dimensions, ignoring");
        return Ok(());
    }

    if let Err(err) = pty.resize(cols, rows) {
        warn!(%err, "pty resize failed, keeping current dimensions");
        return Ok(());
    }
    term.resize(cols, rows);

    let epoch = segment.epoch().wrapping_add(1);
    *segment = Segment::create(&config.shm_path, epoch, cols, rows)?;
    publish_frame(segment, term);
    info!(cols, rows, segment = segment.name(), "resized");

    registry
        .broadcast(&DaemonMessage::SegmentReady {
            cols,
            rows,
            path: segment.name().to_string(),
        })
        .await;
    Ok(())
}
