//! The bridge connection state machine.
//!
//! `Closed -> Opening -> Connected`, back to `Closed` on any failure. The
//! open sequence is handshake (CONNECT, expecting a session token) then
//! login (LOGIN, expecting a tracker token); a failure at either step tears
//! the transport down completely — no partial-open state survives.
//!
//! One request is in flight at a time; there is no pipelining and no
//! reconnection inside a call. A dead transport surfaces as a severed
//! connection error and stays dead until the session layer reopens it.

use crate::frame::{read_frame, write_frame};
use crate::proto::{BridgeReply, BridgeRequest, NamedValue, commands};
use defectsync_types::{TrackError, TrackResult};
use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, warn};

/// Where the helper process listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEndpoint {
    host: String,
    port: u16,
}

impl BridgeEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port`.
    pub fn parse(s: &str) -> TrackResult<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            TrackError::Configuration(format!("bridge endpoint '{s}' is not host:port"))
        })?;
        if host.is_empty() {
            return Err(TrackError::Configuration(format!(
                "bridge endpoint '{s}' has no host"
            )));
        }
        let port = port.parse().map_err(|_| {
            TrackError::Configuration(format!("bridge endpoint '{s}' has a bad port"))
        })?;
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for BridgeEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Credentials forwarded to the tracker behind the bridge.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub url: String,
    pub user: String,
    pub password: String,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Closed,
    Opening,
    Connected,
}

#[derive(Debug)]
struct Conn {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

/// Synchronous client for one bridge connection.
#[derive(Debug)]
pub struct BridgeClient {
    endpoint: BridgeEndpoint,
    timeout: Duration,
    state: BridgeState,
    conn: Option<Conn>,
    session_token: Option<String>,
    tracker_token: Option<String>,
    generation: u64,
}

impl BridgeClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(endpoint: BridgeEndpoint) -> Self {
        Self::with_timeout(endpoint, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: BridgeEndpoint, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            state: BridgeState::Closed,
            conn: None,
            session_token: None,
            tracker_token: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == BridgeState::Connected
    }

    /// The tracker token returned by LOGIN, passed back in per-server
    /// commands.
    pub fn tracker_token(&self) -> Option<&str> {
        self.tracker_token.as_deref()
    }

    /// Bumped on every successful open. Layers that cache bridge-side
    /// handles (project bindings) compare generations to notice a
    /// reconnect.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Opens the transport and performs the two-step handshake. Any
    /// failure tears the connection down entirely and reports why.
    pub fn open(&mut self, credentials: &Credentials) -> TrackResult<()> {
        if self.is_open() {
            return Ok(());
        }
        self.state = BridgeState::Opening;

        let conn = match self.dial() {
            Ok(conn) => conn,
            Err(err) => {
                self.state = BridgeState::Closed;
                return Err(TrackError::severed(format!(
                    "unable to reach bridge at {}: {err}",
                    self.endpoint
                )));
            }
        };
        self.conn = Some(conn);

        // Handshake: a parameterless CONNECT must yield a session token.
        let session_token = match self.expect_string(BridgeRequest::new(commands::CONNECT)) {
            Ok(token) => token,
            Err(err) => {
                self.teardown();
                return Err(absent_or(err, "invalid or no response to CONNECT request"));
            }
        };

        // Login: credentials travel as arguments; the reply's first string
        // is the tracker token scoped to this session.
        let login = BridgeRequest::new(commands::LOGIN)
            .arg("TRACKER_URL", &credentials.url)
            .arg("TRACKER_USER", &credentials.user)
            .arg("TRACKER_PASSWORD", &credentials.password);
        let tracker_token = match self.expect_string(login) {
            Ok(token) => token,
            Err(err) => {
                self.teardown();
                return Err(absent_or(err, "invalid or no response to LOGIN request"));
            }
        };

        self.session_token = Some(session_token);
        self.tracker_token = Some(tracker_token);
        self.state = BridgeState::Connected;
        self.generation += 1;
        debug!(endpoint = %self.endpoint, generation = self.generation, "bridge opened");
        Ok(())
    }

    /// Sends a liveness probe. Anything but the exact expected reply —
    /// including a transport error — means "not alive", and the dead
    /// transport is discarded so the next open starts fresh.
    pub fn ping(&mut self) -> bool {
        if self.conn.is_none() {
            return false;
        }
        match self.exchange(BridgeRequest::new(commands::PING)) {
            Ok(reply) if reply.first_string() == Some(commands::PONG) => true,
            Ok(_) | Err(_) => {
                debug!(endpoint = %self.endpoint, "ping failed, discarding transport");
                self.teardown();
                false
            }
        }
    }

    /// Sends one command and returns its reply with the error-wins rule
    /// applied. Requires an open connection; never reconnects mid-call.
    pub fn send(&mut self, request: BridgeRequest) -> TrackResult<BridgeReply> {
        if !self.is_open() {
            return Err(TrackError::severed("bridge transport is closed"));
        }
        self.exchange(request)?.into_result()
    }

    /// Orderly close: best-effort SHUTDOWN, then drop the transport.
    /// Idempotent; never errors.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            let request = BridgeRequest::new(commands::SHUTDOWN);
            if let Ok(payload) = serde_json::to_vec(&request) {
                // The helper acknowledges with CLOSING; ignore either way.
                let _ = write_frame(&mut conn.writer, &payload);
                let _ = read_frame(&mut conn.reader);
            }
        }
        self.teardown();
    }

    fn dial(&self) -> std::io::Result<Conn> {
        let mut last_err = None;
        for addr in (self.endpoint.host.as_str(), self.endpoint.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    let reader = BufReader::new(stream.try_clone()?);
                    return Ok(Conn {
                        reader,
                        writer: stream,
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
        }))
    }

    /// One raw request/response exchange. Transport and parse failures
    /// discard the connection: once framing is in doubt nothing on this
    /// transport can be trusted.
    fn exchange(&mut self, request: BridgeRequest) -> TrackResult<BridgeReply> {
        let payload = serde_json::to_vec(&request)
            .map_err(|err| TrackError::Protocol(format!("unencodable request: {err}")))?;

        let io_result = match self.conn.as_mut() {
            None => return Err(TrackError::severed("bridge transport is closed")),
            Some(conn) => write_frame(&mut conn.writer, &payload)
                .and_then(|()| read_frame(&mut conn.reader)),
        };

        let reply_bytes = match io_result {
            Ok(bytes) => bytes,
            Err(err) => {
                self.teardown();
                return Err(TrackError::severed(format!(
                    "{} exchange failed: {err}",
                    request.command
                )));
            }
        };

        match serde_json::from_slice(&reply_bytes) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                self.teardown();
                Err(TrackError::Protocol(format!(
                    "unparseable reply to {}: {err}",
                    request.command
                )))
            }
        }
    }

    /// Exchange expecting a non-empty first result string.
    fn expect_string(&mut self, request: BridgeRequest) -> TrackResult<String> {
        let command = request.command.clone();
        let reply = self.exchange(request)?.into_result()?;
        reply
            .first_string()
            .map(str::to_string)
            .ok_or_else(|| TrackError::severed(format!("{command} returned no token")))
    }

    fn teardown(&mut self) {
        if self.conn.is_some() {
            debug!(endpoint = %self.endpoint, "bridge transport discarded");
        }
        self.conn = None;
        self.session_token = None;
        self.tracker_token = None;
        self.state = BridgeState::Closed;
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if self.conn.is_some() {
            self.close();
        }
    }
}

/// Prefers the reply's own error message; falls back to `context` when the
/// transport died without explaining itself.
fn absent_or(err: TrackError, context: &str) -> TrackError {
    match &err {
        TrackError::Connection { message, .. } if !message.is_empty() => err,
        TrackError::Protocol(_) => err,
        _ => {
            warn!(context, "bridge open failed without a message");
            TrackError::severed(context)
        }
    }
}

/// Builds the argument list for a LIST_DEFECTS request; shared by the
/// restbridge connector and the mock server tests.
pub fn list_defects_args(
    proj_token: &str,
    mod_date_field: &str,
    date: &str,
    mod_by_field: Option<&str>,
    exclude_user: Option<&str>,
    max_rows: Option<u32>,
) -> Vec<NamedValue> {
    vec![
        NamedValue::new("PROJID", proj_token),
        NamedValue::new("MODDATE", mod_date_field),
        NamedValue::new("DATE", date),
        NamedValue::new("MODBY", mod_by_field.unwrap_or("")),
        NamedValue::new("USER", exclude_user.unwrap_or("")),
        NamedValue::new("MAX", max_rows.map_or_else(|| "0".to_string(), |n| n.to_string())),
    ]
}
