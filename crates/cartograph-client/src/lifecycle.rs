//! Reachability probe for the cartography service
//!
//! The client never starts the service. It only waits, with exponential
//! backoff, for an already-launched one to answer a handshake.

use std::path::Path;
use std::time::{Duration, Instant};

use cartograph_protocol::{codes, Method, Response};
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Endpoint;
use crate::error::{Error, Result};
use crate::transport::Transport;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const INITIAL_DELAY: Duration = Duration::from_millis(50);
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Check that the socket exists and the service answers a handshake
pub async fn is_responsive(socket: &Path) -> bool {
    if !socket.exists() {
        return false;
    }

    let transport = Transport::new(&Endpoint::new(socket, PROBE_TIMEOUT));
    let outcome = transport.send(Method::Handshake, codec::handshake_params()).await;
    transport.close().await;

    match outcome {
        Ok(Response::Result(_)) => true,
        Ok(Response::Error(err)) => {
            debug!(code = %err.code, "Service rejected handshake probe");
            false
        }
        Err(e) => {
            debug!(error = %e, "Socket exists but handshake failed");
            false
        }
    }
}

/// Wait until the service at `socket` is responsive or `timeout` elapses
///
/// Retries with exponential backoff capped at one second.
pub async fn ensure_reachable(socket: &Path, timeout: Duration) -> Result<()> {
    if is_responsive(socket).await {
        debug!(socket = %socket.display(), "Service already reachable");
        return Ok(());
    }

    info!(socket = %socket.display(), "Waiting for cartography service");
    let start = Instant::now();
    let mut delay = INITIAL_DELAY;
    let mut attempt = 0u32;

    while start.elapsed() < timeout {
        let remaining = timeout.saturating_sub(start.elapsed());
        tokio::time::sleep(delay.min(remaining)).await;
        attempt += 1;

        if is_responsive(socket).await {
            info!(attempts = attempt, "Service ready");
            return Ok(());
        }

        delay = std::cmp::min(delay * 2, MAX_DELAY);
        if attempt > 5 {
            warn!(attempts = attempt, "Service not ready, retrying...");
        }
    }

    Err(Error::setup(
        codes::START_TIMEOUT,
        format!(
            "Service at {} did not respond within {:.1}s. \
             Check that it is running and that the socket path is correct.",
            socket.display(),
            timeout.as_secs_f64()
        ),
    ))
}
