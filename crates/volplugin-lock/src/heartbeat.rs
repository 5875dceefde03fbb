//! Mount reporting to the coordinator.
//!
//! Each mounted volume gets a heartbeat task that periodically POSTs its
//! `UseMount` to `/mount-report`, which refreshes the lock on the
//! coordinator's side. Tasks are tracked by name in a [`StopRegistry`].

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::{debug, error};

use volplugin_common::{StopHandle, StopSignal};

use crate::error::HeartbeatError;
use crate::reason::Reason;
use crate::registry::StopRegistry;
use crate::uses::UseMount;

/// Request timeout for coordinator calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const MOUNT_ENDPOINT: &str = "mount";
const MOUNT_REPORT_ENDPOINT: &str = "mount-report";
const UNMOUNT_ENDPOINT: &str = "unmount";

/// HTTP client for the coordinator's mount endpoints.
#[derive(Clone)]
pub struct HeartbeatClient {
    http: Client,
    master: String,
    stops: StopRegistry,
}

impl HeartbeatClient {
    /// Client for the coordinator at `master`, either `host:port` or a full
    /// base URL.
    pub fn new(master: &str) -> Result<Self, HeartbeatError> {
        Self::with_timeout(master, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(master: &str, timeout: Duration) -> Result<Self, HeartbeatError> {
        let http = Client::builder().timeout(timeout).build()?;

        let master = if master.starts_with("http://") || master.starts_with("https://") {
            master.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", master.trim_end_matches('/'))
        };

        Ok(Self {
            http,
            master,
            stops: StopRegistry::new(),
        })
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    async fn report(&self, endpoint: &str, payload: &UseMount) -> Result<(), HeartbeatError> {
        let mut payload = payload.clone();
        payload.reason = Reason::Mount;
        let content = serde_json::to_vec(&payload)?;

        let response = self
            .http
            .post(format!("{}/{}", self.master, endpoint))
            .header(CONTENT_TYPE, "application/json")
            .body(content)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(HeartbeatError::NotFound);
        }

        if status != StatusCode::OK {
            return Err(HeartbeatError::RequestFailed {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        Ok(())
    }

    /// Report a new mount.
    pub async fn report_mount(&self, payload: &UseMount) -> Result<(), HeartbeatError> {
        let result = self.report(MOUNT_ENDPOINT, payload).await;
        debug!(volume = %payload.volume, ok = result.is_ok(), "Reported mount");
        result
    }

    /// Refresh the mount, and with it the lock.
    pub async fn report_mount_status(&self, payload: &UseMount) -> Result<(), HeartbeatError> {
        let result = self.report(MOUNT_REPORT_ENDPOINT, payload).await;
        debug!(volume = %payload.volume, ok = result.is_ok(), "Reported mount status");
        result
    }

    /// Report an unmount, which frees the lock.
    pub async fn report_unmount(&self, payload: &UseMount) -> Result<(), HeartbeatError> {
        let result = self.report(UNMOUNT_ENDPOINT, payload).await;
        debug!(volume = %payload.volume, ok = result.is_ok(), "Reported unmount");
        result
    }

    /// Report the mount every `ttl / 4` until `stop` fires.
    ///
    /// A `NotFound` answer means the lock was already cleared and is
    /// ignored. Other failures are logged and the loop keeps going.
    pub async fn heartbeat_mount(&self, ttl: Duration, payload: UseMount, mut stop: StopSignal) {
        let interval = ttl / 4;

        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = tokio::time::sleep(interval) => {
                    debug!(volume = %payload.volume, "Reporting mount");

                    match self.report_mount_status(&payload).await {
                        Ok(()) => {}
                        Err(HeartbeatError::NotFound) => {
                            debug!(volume = %payload.volume, "Mount not known to master");
                        }
                        Err(e) => {
                            error!(
                                "Could not report mount for host {:?} to master {:?}: {}",
                                payload.hostname, self.master, e
                            );
                        }
                    }
                }
            }
        }

        debug!(volume = %payload.volume, "Heartbeat stopped");
    }

    /// Spawn a heartbeat for `payload` and register it under `name`,
    /// replacing any heartbeat already running there.
    pub async fn start_heartbeat(&self, name: &str, ttl: Duration, payload: UseMount) {
        let client = self.clone();
        let handle = StopHandle::spawn(move |stop| async move {
            client.heartbeat_mount(ttl, payload, stop).await;
        });

        self.add_stop_chan(name, handle).await;
    }

    /// Track `handle` under `name`. A loop already registered there is
    /// stopped, and waited for, first.
    pub async fn add_stop_chan(&self, name: &str, handle: StopHandle) {
        self.stops.add(name, handle).await;
    }

    /// Stop and forget the loop registered under `name`.
    pub async fn remove_stop_chan(&self, name: &str) {
        self.stops.remove(name).await;
    }

    pub fn is_heartbeating(&self, name: &str) -> bool {
        self.stops.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_url() {
        let client = HeartbeatClient::new("localhost:9005").unwrap();
        assert_eq!(client.master(), "http://localhost:9005");

        let client = HeartbeatClient::new("https://master.example/").unwrap();
        assert_eq!(client.master(), "https://master.example");
    }
}
