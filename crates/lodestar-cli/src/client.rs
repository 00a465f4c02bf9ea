//! Control plane connection helpers.
//!
//! Dialing is blocking with a timeout: the call returns a usable channel
//! or an error once the deadline passes. No caller ever sleeps and hopes.

use std::time::Duration;

use anyhow::{Context, anyhow};
use tonic::transport::{Channel, Endpoint};

use lodestar_core::CONTROL_PLANE_PORT;

/// Dial timeout for normal commands.
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Dial timeout for status checks.
pub(crate) const STATUS_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// The control plane endpoint.
pub(crate) fn endpoint() -> String {
    format!("http://127.0.0.1:{CONTROL_PLANE_PORT}")
}

/// Blocking dial: returns once the channel is usable, retrying inside the
/// deadline while the daemon is still coming up.
pub(crate) async fn connect(timeout: Duration) -> anyhow::Result<Channel> {
    let endpoint = Endpoint::from_shared(endpoint())
        .context("invalid control plane endpoint")?
        .connect_timeout(timeout);

    let deadline = tokio::time::Instant::now() + timeout;
    tokio::time::timeout_at(deadline, async {
        loop {
            match endpoint.connect().await {
                Ok(channel) => return Ok(channel),
                Err(e) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(anyhow!(e));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    })
    .await
    .map_err(|_| {
        anyhow!(
            "control plane did not become reachable within {}s — is the daemon running? \
             (try `lodestar server start`)",
            timeout.as_secs()
        )
    })?
}
