//! The single-threaded cooperative event loop. One task owns `GatewayState`
//! outright for the life of the process — there is no `Arc`/`Mutex`/`dashmap`
//! here, by construction.

use std::time::{Duration, Instant};

use futures_util::future::{select_all, FutureExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::dispatch;
use crate::session::{ClientSession, SessionId};
use crate::state::GatewayState;

const NOTIFICATION_POLL_TIMEOUT: Duration = Duration::from_millis(50);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Runs until every listener is gone (never, in practice) or the process is
/// signaled to stop via `shutdown`.
pub async fn run(state: &mut GatewayState, listeners: Vec<TcpListener>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
    let mut last_keepalive = Instant::now();

    'outer: loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        // Drain every notification currently queued before touching clients,
        // so channel/member state is current before we process client
        // commands that might reference it. Only once a client is connected
        // — with none connected, registration (§4.4 step 2) hasn't run
        // `LoadOrgsAndChannels` yet, and draining here would materialize
        // channels and emit JOINs into an empty client set ahead of it.
        if !state.clients.is_empty() {
            loop {
                match state.backend.poll_notification(NOTIFICATION_POLL_TIMEOUT).await {
                    Ok(Some(notification)) => dispatch::handle(state, notification).await,
                    Ok(None) => break,
                    Err(err) => {
                        debug!(%err, "poll_notification failed");
                        break;
                    }
                }
            }
        }

        accept_ready_connections(state, &listeners).await;

        process_clients(state).await;

        if last_keepalive.elapsed() >= KEEPALIVE_INTERVAL {
            run_keepalive(state);
            last_keepalive = Instant::now();
        }

        if listeners.is_empty() {
            break 'outer;
        }
    }

    info!("event loop stopped");
}

/// Accepts every connection ready right now without blocking the tick;
/// never waits longer than one notification-poll interval for a new one.
async fn accept_ready_connections(state: &mut GatewayState, listeners: &[TcpListener]) {
    if listeners.is_empty() {
        return;
    }
    let accept_futs: Vec<_> = listeners.iter().map(|l| l.accept().boxed()).collect();
    let timeout = tokio::time::sleep(Duration::from_millis(1));
    tokio::pin!(timeout);

    tokio::select! {
        (result, _idx, _rest) = select_all(accept_futs) => {
            match result {
                Ok((stream, addr)) => {
                    let id = state.next_session_id();
                    let session = ClientSession::new(id, stream, addr);
                    debug!(?id, %addr, "accepted connection");
                    state.clients.insert(id, session);
                }
                Err(err) => debug!(%err, "accept failed"),
            }
        }
        _ = &mut timeout => {}
    }
}

/// Remove-process-reinsert: each session is pulled out of `state.clients`
/// by id so its handler gets an owned `&mut ClientSession` alongside a full
/// `&mut GatewayState`, without aliasing the same map it came from.
async fn process_clients(state: &mut GatewayState) {
    let ids: Vec<SessionId> = state.clients.keys().copied().collect();
    for id in ids {
        let Some(mut session) = state.clients.remove(&id) else { continue };

        match session.try_read_lines() {
            Ok(lines) => {
                for line in lines {
                    crate::session::handle_line(state, &mut session, &line).await;
                    if session.quit_reason.is_some() {
                        break;
                    }
                }
            }
            Err(err) => {
                debug!(?id, %err, "read error, disconnecting");
                let reason = if err.kind() == std::io::ErrorKind::UnexpectedEof { "EOT".to_string() } else { err.to_string() };
                session.quit_reason.get_or_insert(reason);
            }
        }

        if let Some(reason) = session.quit_reason.clone() {
            session.message(&format!("ERROR :{}", reason));
            let _ = session.try_flush_write();
            continue;
        }

        if let Err(err) = session.try_flush_write() {
            debug!(?id, %err, "write error, disconnecting");
            continue;
        }

        state.clients.insert(id, session);
    }
}

fn run_keepalive(state: &mut GatewayState) {
    let ids: Vec<SessionId> = state.clients.keys().copied().collect();
    let gateway_name = state.gateway_name.clone();
    for id in ids {
        let Some(mut session) = state.clients.remove(&id) else { continue };
        let timed_out = session.check_aliveness(&gateway_name);
        if timed_out {
            session.message("ERROR :ping timeout");
            let _ = session.try_flush_write();
            continue;
        }
        let _ = session.try_flush_write();
        state.clients.insert(id, session);
    }
}
