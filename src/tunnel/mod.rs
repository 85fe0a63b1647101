//! tunnel
//!
//! Public URLs for a local stack through an ngrok agent.
//!
//! # Architecture
//!
//! The agent is started as a background process pointed at the stack's
//! primary port. Its public URL is not printed in a stable format, so it is
//! read from the agent's local inspection API instead:
//!
//! ```text
//! GET <api_url>/api/tunnels
//! { "tunnels": [ { "public_url": "https://…", "proto": "https", … } ] }
//! ```
//!
//! [`wait_for_public_url`] polls a [`TunnelInspector`] until an `https`
//! tunnel appears or the timeout expires.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::core::process::{self, BackgroundProcess, ProcessError};

/// Default ngrok inspection API.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:4040";

/// Delay between inspection API polls.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors from starting or inspecting a tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The agent binary could not be started.
    #[error("cannot start tunnel agent: {0}")]
    Spawn(#[from] ProcessError),

    /// The agent exited before a tunnel came up.
    #[error("tunnel agent exited early (exit code {code:?}); check its authtoken and logs")]
    Exited { code: Option<i32> },

    /// The inspection API answered with something unexpected.
    #[error("tunnel inspection API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// No public URL appeared in time.
    #[error("no public tunnel URL after {}s", waited.as_secs())]
    Timeout { waited: Duration },

    #[error("tunnel inspection request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Source of the agent's current tunnels.
#[async_trait]
pub trait TunnelInspector: Send + Sync {
    /// The `https` public URL, if a tunnel is up yet.
    async fn public_url(&self) -> Result<Option<String>, TunnelError>;
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<TunnelEntry>,
}

#[derive(Debug, Deserialize)]
struct TunnelEntry {
    public_url: String,
    #[serde(default)]
    proto: String,
}

/// Reads tunnels from ngrok's local inspection API.
#[derive(Debug, Clone)]
pub struct NgrokInspector {
    client: Client,
    api_url: String,
}

impl NgrokInspector {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn tunnels_url(&self) -> String {
        format!("{}/api/tunnels", self.api_url)
    }
}

#[async_trait]
impl TunnelInspector for NgrokInspector {
    async fn public_url(&self) -> Result<Option<String>, TunnelError> {
        let response = match self.client.get(self.tunnels_url()).send().await {
            Ok(response) => response,
            // The agent's API is not listening until it finishes starting.
            Err(e) if e.is_connect() => {
                debug!(error = %e, "inspection API not up yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TunnelError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let list: TunnelList = response.json().await.map_err(|e| TunnelError::Api {
            status: status.as_u16(),
            message: format!("unexpected response body: {}", e),
        })?;
        Ok(list
            .tunnels
            .into_iter()
            .find(|t| t.proto == "https" || t.public_url.starts_with("https://"))
            .map(|t| t.public_url))
    }
}

/// Poll `inspector` until an https URL appears.
///
/// # Errors
///
/// [`TunnelError::Timeout`] once `timeout` has passed; API errors as-is.
pub async fn wait_for_public_url(
    inspector: &dyn TunnelInspector,
    timeout: Duration,
) -> Result<String, TunnelError> {
    poll_until_up(inspector, timeout, || Ok(())).await
}

/// Poll until a URL appears, calling `still_alive` before every attempt.
async fn poll_until_up(
    inspector: &dyn TunnelInspector,
    timeout: Duration,
    mut still_alive: impl FnMut() -> Result<(), TunnelError>,
) -> Result<String, TunnelError> {
    let deadline = Instant::now() + timeout;
    loop {
        still_alive()?;
        if let Some(url) = inspector.public_url().await? {
            info!(url = %url, "tunnel is up");
            return Ok(url);
        }
        if Instant::now() >= deadline {
            return Err(TunnelError::Timeout { waited: timeout });
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// A running tunnel agent.
#[derive(Debug)]
pub struct Tunnel {
    pub public_url: String,
    pub port: u16,
    agent: BackgroundProcess,
}

impl Tunnel {
    /// Start `binary http <port>` and wait for its public URL.
    ///
    /// The agent is stopped again if no URL appears.
    pub async fn open(
        binary: &str,
        port: u16,
        inspector: &dyn TunnelInspector,
        timeout: Duration,
    ) -> Result<Self, TunnelError> {
        let port_arg = port.to_string();
        let mut agent = process::spawn_background(binary, &["http", &port_arg, "--log=stdout"])?;
        info!(binary, port, "started tunnel agent");

        let polled = poll_until_up(inspector, timeout, || match agent.try_exit()? {
            Some(code) => Err(TunnelError::Exited { code }),
            None => Ok(()),
        })
        .await;

        match polled {
            Ok(public_url) => Ok(Self {
                public_url,
                port,
                agent,
            }),
            Err(e) => {
                agent.kill();
                Err(e)
            }
        }
    }

    /// Block until the agent exits.
    pub fn wait(self) -> Result<Option<i32>, TunnelError> {
        Ok(self.agent.wait()?)
    }

    /// Stop the agent.
    pub fn close(self) {
        self.agent.kill();
    }
}
