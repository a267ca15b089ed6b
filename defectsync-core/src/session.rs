//! Session lifecycle: liveness, reconnection, and backoff hints.
//!
//! A session hides reconnection from the layers above it. The contract:
//! operations run against a session that believes it is connected; when an
//! operation fails with a transport error, the caller re-establishes the
//! session once and retries once. Looping belongs to the host engine, which
//! paces itself with [`OfflineWait`] hints.

use defectsync_types::{Attributes, TrackResult};
use tracing::debug;

/// How long the engine should wait before retrying a disconnected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineWait {
    /// The session is healthy; nothing to wait for.
    Online,
    /// Wait this many seconds before the next attempt.
    Seconds(u32),
    /// Defer to the engine's own configured default backoff.
    EngineDefault,
}

/// The connector-configured `wait_time` attribute.
///
/// A configured value of -1 means "use the engine's default", not "retry
/// forever"; valid explicit values are 1..=600 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTime(Option<u32>);

impl WaitTime {
    pub const DEFAULT_SECONDS: u32 = 10;

    /// Reads the `wait_time` attribute, falling back to the default when
    /// unset. Validation has already rejected out-of-range values.
    pub fn from_attributes(attrs: &Attributes) -> Self {
        match attrs.get_int_or("wait_time", i64::from(Self::DEFAULT_SECONDS)) {
            -1 => Self(None),
            n if (1..=600).contains(&n) => Self(Some(n as u32)),
            _ => Self(Some(Self::DEFAULT_SECONDS)),
        }
    }

    /// The hint reported while the session is offline.
    pub fn offline_hint(&self) -> OfflineWait {
        match self.0 {
            Some(seconds) => OfflineWait::Seconds(seconds),
            None => OfflineWait::EngineDefault,
        }
    }

    /// Validation shared by every connector carrying a `wait_time`
    /// attribute. Returns the error text for the configuration tool.
    pub fn validate(value: Option<&str>) -> Option<String> {
        let Some(value) = value.filter(|v| defectsync_types::looks_like_integer(v)) else {
            return Some("Wait time: Must be a positive integer, or -1.".into());
        };
        match value.parse::<i64>() {
            Ok(0) => Some("Wait time: Must not be zero.".into()),
            Ok(n) if n < -1 => Some("Wait time: Must not be less than -1.".into()),
            Ok(n) if n > 600 => Some("Wait time: Must be less than 10 minutes.".into()),
            Ok(_) => None,
            Err(_) => Some("Wait time: Must be a positive integer, or -1.".into()),
        }
    }
}

/// Connectivity owned by a connector: connect, probe, reconnect.
pub trait Session {
    /// Whether the session is currently usable. Probes the transport when
    /// the session believes it is connected, demoting it on failure; never
    /// forces a fresh handshake. May close and discard a half-dead
    /// transport as a side effect.
    fn is_connected(&mut self) -> bool;

    /// Establishes the session if it is not currently valid. The returned
    /// error's continuable flag reflects whether retrying makes sense
    /// (malformed credentials do not become valid by retrying).
    fn ensure_connected(&mut self) -> TrackResult<()>;

    /// The backoff hint for the engine. [`OfflineWait::Online`] when the
    /// session is healthy.
    fn offline_wait(&mut self) -> OfflineWait;
}

/// Runs `op` against the session, and on a transport failure re-establishes
/// the session once and retries once.
///
/// Retries are deliberately single-shot per call: the engine's own
/// retry/backoff loop stays authoritative, and a second transport failure
/// surfaces to it unchanged.
pub fn retry_once<S, T, F>(session: &mut S, mut op: F) -> TrackResult<T>
where
    S: Session + ?Sized,
    F: FnMut(&mut S) -> TrackResult<T>,
{
    match op(session) {
        Err(err) if err.is_transport() => {
            debug!(error = %err, "transport failure, reconnecting once");
            session.ensure_connected()?;
            op(session)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use defectsync_types::TrackError;

    /// Session that fails transport until reconnected.
    struct Flaky {
        connected: bool,
        connects: u32,
        calls: u32,
    }

    impl Session for Flaky {
        fn is_connected(&mut self) -> bool {
            self.connected
        }

        fn ensure_connected(&mut self) -> TrackResult<()> {
            self.connected = true;
            self.connects += 1;
            Ok(())
        }

        fn offline_wait(&mut self) -> OfflineWait {
            if self.connected {
                OfflineWait::Online
            } else {
                OfflineWait::Seconds(10)
            }
        }
    }

    #[test]
    fn retry_once_reconnects_and_retries() {
        let mut session = Flaky { connected: false, connects: 0, calls: 0 };
        let result = retry_once(&mut session, |s| {
            s.calls += 1;
            if s.connected {
                Ok("data")
            } else {
                Err(TrackError::severed("gone"))
            }
        });
        assert_eq!(result.unwrap(), "data");
        assert_eq!(session.connects, 1);
        assert_eq!(session.calls, 2);
    }

    #[test]
    fn retry_once_leaves_local_errors_alone() {
        let mut session = Flaky { connected: true, connects: 0, calls: 0 };
        let result: TrackResult<()> =
            retry_once(&mut session, |s| {
                s.calls += 1;
                Err(TrackError::Query("no such field".into()))
            });
        assert!(matches!(result, Err(TrackError::Query(_))));
        assert_eq!(session.connects, 0);
        assert_eq!(session.calls, 1);
    }

    #[test]
    fn retry_once_is_single_shot() {
        let mut session = Flaky { connected: false, connects: 0, calls: 0 };
        let result: TrackResult<()> = retry_once(&mut session, |s| {
            s.calls += 1;
            Err(TrackError::severed("still gone"))
        });
        assert!(result.is_err());
        assert_eq!(session.connects, 1);
        assert_eq!(session.calls, 2);
    }

    #[test]
    fn wait_time_parsing() {
        let dflt = WaitTime::from_attributes(&Attributes::new());
        assert_eq!(dflt.offline_hint(), OfflineWait::Seconds(10));

        let engine = WaitTime::from_attributes(&Attributes::new().with("wait_time", "-1"));
        assert_eq!(engine.offline_hint(), OfflineWait::EngineDefault);

        let thirty = WaitTime::from_attributes(&Attributes::new().with("wait_time", "30"));
        assert_eq!(thirty.offline_hint(), OfflineWait::Seconds(30));
    }

    #[test]
    fn wait_time_validation_messages() {
        assert!(WaitTime::validate(Some("10")).is_none());
        assert!(WaitTime::validate(Some("-1")).is_none());
        assert!(WaitTime::validate(Some("0")).unwrap().contains("zero"));
        assert!(WaitTime::validate(Some("-2")).unwrap().contains("-1"));
        assert!(WaitTime::validate(Some("601")).unwrap().contains("10 minutes"));
        assert!(WaitTime::validate(Some("ten")).is_some());
        assert!(WaitTime::validate(None).is_some());
    }
}
