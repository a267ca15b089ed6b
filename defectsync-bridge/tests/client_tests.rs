//! End-to-end tests of the bridge client against the mock server.

use defectsync_bridge::client::{BridgeClient, BridgeEndpoint, BridgeState, Credentials};
use defectsync_bridge::mock::{MockBridgeServer, MockTracker};
use defectsync_bridge::proto::{BridgeRequest, commands};
use pretty_assertions::assert_eq;

fn credentials() -> Credentials {
    Credentials {
        url: "https://tracker.example/".into(),
        user: "replicator".into(),
        password: "secret".into(),
    }
}

// ── open / handshake ──────────────────────────────────────────────

#[test]
fn open_performs_handshake_and_login() {
    let server = MockBridgeServer::start(MockTracker::default()).unwrap();
    let mut client = BridgeClient::new(server.endpoint());

    client.open(&credentials()).unwrap();
    assert_eq!(client.state(), BridgeState::Connected);
    assert!(client.tracker_token().is_some());
    assert_eq!(client.generation(), 1);
}

#[test]
fn rejected_login_tears_down_completely() {
    let tracker = MockTracker {
        reject_logins: true,
        ..MockTracker::default()
    };
    let server = MockBridgeServer::start(tracker).unwrap();
    let mut client = BridgeClient::new(server.endpoint());

    let err = client.open(&credentials()).unwrap_err();
    assert!(!err.continuable());
    assert_eq!(client.state(), BridgeState::Closed);
    assert!(client.tracker_token().is_none());
}

#[test]
fn unreachable_endpoint_reports_severed() {
    // Bind-then-drop leaves a port nothing listens on.
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut client = BridgeClient::with_timeout(
        BridgeEndpoint::new("127.0.0.1", port),
        std::time::Duration::from_millis(300),
    );
    let err = client.open(&credentials()).unwrap_err();
    assert!(!err.continuable());
    assert_eq!(client.state(), BridgeState::Closed);
}

// ── liveness ──────────────────────────────────────────────────────

#[test]
fn ping_answers_while_alive() {
    let server = MockBridgeServer::start(MockTracker::default()).unwrap();
    let mut client = BridgeClient::new(server.endpoint());
    client.open(&credentials()).unwrap();
    assert!(client.ping());
    assert!(client.ping());
}

#[test]
fn dead_helper_fails_ping_then_reopen_succeeds() {
    let server = MockBridgeServer::start(MockTracker::default()).unwrap();
    let mut client = BridgeClient::new(server.endpoint());
    client.open(&credentials()).unwrap();

    server.disconnect_all();
    assert!(!client.ping());
    assert_eq!(client.state(), BridgeState::Closed);

    // The listener survived; a fresh open must succeed with a new
    // generation rather than reusing the dead transport.
    client.open(&credentials()).unwrap();
    assert_eq!(client.generation(), 2);
    assert!(client.ping());
}

// ── send ──────────────────────────────────────────────────────────

#[test]
fn send_requires_open_connection() {
    let server = MockBridgeServer::start(MockTracker::default()).unwrap();
    let mut client = BridgeClient::new(server.endpoint());
    let err = client
        .send(BridgeRequest::new(commands::LIST_PROJECTS))
        .unwrap_err();
    assert!(!err.continuable());
}

#[test]
fn send_surfaces_error_shape_with_flag() {
    let server = MockBridgeServer::start(MockTracker::default()).unwrap();
    let mut client = BridgeClient::new(server.endpoint());
    client.open(&credentials()).unwrap();

    let err = client
        .send(BridgeRequest::new(commands::GET_PROJECT).arg("PROJECT", "NOPE"))
        .unwrap_err();
    assert!(err.continuable());
    // A backend-reported error leaves the transport usable.
    assert!(client.ping());
}

#[test]
fn send_runs_the_vocabulary() {
    let tracker = {
        let mut t = MockTracker::default();
        t.seed_defect("1001", &[("Status", "open"), ("Severity", "high")]);
        t
    };
    let server = MockBridgeServer::start(tracker).unwrap();
    let mut client = BridgeClient::new(server.endpoint());
    client.open(&credentials()).unwrap();

    let projects = client
        .send(BridgeRequest::new(commands::LIST_PROJECTS))
        .unwrap();
    assert_eq!(projects.strings, ["CORE"]);

    let reply = client
        .send(BridgeRequest::new(commands::GET_DEFECT).arg("PROJID", "proj-CORE").arg("DEFECT", "1001"))
        .unwrap();
    let status = reply
        .fields
        .iter()
        .find(|f| f.name == "Status")
        .map(|f| f.value.as_str());
    assert_eq!(status, Some("open"));
}

#[test]
fn close_is_idempotent() {
    let server = MockBridgeServer::start(MockTracker::default()).unwrap();
    let mut client = BridgeClient::new(server.endpoint());
    client.open(&credentials()).unwrap();
    client.close();
    client.close();
    assert_eq!(client.state(), BridgeState::Closed);
}
