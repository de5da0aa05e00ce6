//! Accept loop and per-connection task (§5, §10.4).
//!
//! Grounded in the legacy TCP server's shape: a `TcpListener` accept loop,
//! a `tokio::sync::watch` shutdown signal broadcast to every connection
//! task, and a `JoinSet` the main task drains on shutdown.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::dispatcher::{self, DispatchOutcome};
use crate::error::CtcpError;
use crate::link::TcpLink;
use crate::logcapture::LogCaptor;
use crate::session::SessionManager;

/// Poll interval for draining a connection's active capture jobs between
/// client requests.
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run the accept loop until `shutdown` fires, spawning one task per
/// connection.
///
/// # Errors
///
/// Returns [`std::io::Error`] if the listener cannot be bound.
pub async fn run(
    bind: SocketAddr,
    recv_timeout: Duration,
    packet_data_max_len: usize,
    session: Arc<dyn SessionManager>,
    captor: Arc<dyn LogCaptor>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(%bind, "ctcpd listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let session = Arc::clone(&session);
                let captor = Arc::clone(&captor);
                let mut shutdown_rx = shutdown_rx.clone();
                tasks.spawn(async move {
                    handle_connection(
                        stream,
                        peer,
                        recv_timeout,
                        packet_data_max_len,
                        session,
                        captor,
                        &mut shutdown_rx,
                    )
                    .await;
                });
            }
            () = shutdown_signal() => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
                break;
            }
        }
    }

    while tasks.join_next().await.is_some() {}
    Ok(())
}

#[instrument(skip(stream, session, captor, shutdown), fields(%peer))]
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    recv_timeout: Duration,
    packet_data_max_len: usize,
    session: Arc<dyn SessionManager>,
    captor: Arc<dyn LogCaptor>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) {
    info!("connection accepted");
    let mut link = TcpLink::new(stream, packet_data_max_len);
    let mut running_jobs: HashSet<(u32, u16)> = HashSet::new();

    loop {
        tokio::select! {
            outcome = dispatcher::process_once(&mut link, session.as_ref(), recv_timeout) => {
                match outcome {
                    Ok(DispatchOutcome::Responded(Some(transition))) => {
                        if transition.running {
                            running_jobs.insert((transition.sgid, transition.jd));
                        } else {
                            running_jobs.remove(&(transition.sgid, transition.jd));
                        }
                    }
                    Ok(DispatchOutcome::Responded(None) | DispatchOutcome::Dropped(_)) => {}
                    Err(CtcpError::Timeout) => {
                        warn!("connection idle past recv timeout, closing");
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, "connection-fatal error");
                        break;
                    }
                }
            }
            () = tokio::time::sleep(CAPTURE_POLL_INTERVAL), if !running_jobs.is_empty() => {
                for &(sgid, jd) in &running_jobs {
                    if let Err(err) = dispatcher::drain_captured_data(
                        &mut link,
                        session.as_ref(),
                        captor.as_ref(),
                        sgid,
                        jd,
                        packet_data_max_len,
                    )
                    .await
                    {
                        error!(error = %err, sgid, jd, "capture push failed");
                        return;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("closing connection for shutdown");
                    break;
                }
            }
        }
    }
}

/// Resolve once SIGTERM or Ctrl-C is received.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        #[expect(clippy::expect_used, reason = "failure here means the process cannot be signalled at all")]
        let mut term =
            signal(SignalKind::terminate()).expect("installing a SIGTERM handler should never fail");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
