//! Bridge-backed session: liveness via PING, reopen via the full
//! handshake, backoff from the `wait_time` attribute.

use defectsync_bridge::client::{BridgeClient, Credentials};
use defectsync_bridge::proto::{BridgeReply, BridgeRequest};
use defectsync_core::{OfflineWait, Session, WaitTime};
use defectsync_types::TrackResult;
use tracing::debug;

/// Owns the bridge client and its credentials so reconnection needs no
/// caller involvement.
#[derive(Debug)]
pub struct BridgeSession {
    client: BridgeClient,
    credentials: Credentials,
    wait: WaitTime,
}

impl BridgeSession {
    pub fn new(client: BridgeClient, credentials: Credentials, wait: WaitTime) -> Self {
        Self {
            client,
            credentials,
            wait,
        }
    }

    /// The tracker token for per-server commands. `None` while closed.
    pub fn tracker_token(&self) -> Option<&str> {
        self.client.tracker_token()
    }

    /// Open-generation counter; project bindings compare it to notice a
    /// reconnect.
    pub fn generation(&self) -> u64 {
        self.client.generation()
    }

    /// Sends one command on the open connection.
    pub fn send(&mut self, request: BridgeRequest) -> TrackResult<BridgeReply> {
        self.client.send(request)
    }

    pub fn close(&mut self) {
        self.client.close();
    }
}

impl Session for BridgeSession {
    fn is_connected(&mut self) -> bool {
        // ping() discards a half-dead transport as a side effect, so a
        // false here leaves the client cleanly closed.
        self.client.is_open() && self.client.ping()
    }

    fn ensure_connected(&mut self) -> TrackResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        debug!("bridge session reopening");
        self.client.open(&self.credentials)
    }

    fn offline_wait(&mut self) -> OfflineWait {
        if self.is_connected() {
            OfflineWait::Online
        } else {
            self.wait.offline_hint()
        }
    }
}
