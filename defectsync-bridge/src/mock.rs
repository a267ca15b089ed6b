//! In-process mock bridge server for connector tests.
//!
//! Speaks the real framing and vocabulary over a loopback listener, backed
//! by an in-memory defect store. Tests reach into the shared state to seed
//! defects and to assert on what the connector sent (segment filters,
//! referenced fields, save counts). `disconnect_all` simulates the helper
//! process dying mid-session.

use crate::client::BridgeEndpoint;
use crate::frame::{read_frame, write_frame};
use crate::proto::{BridgeReply, BridgeRequest, NamedValue, commands};
use defectsync_types::FieldDescriptor;
use std::collections::BTreeMap;
use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use uuid::Uuid;

/// The mock tracker behind the bridge.
#[derive(Debug, Clone)]
pub struct MockTracker {
    pub server_version: String,
    /// Preformatted date string handed back for GET_SERVER_DATE.
    pub server_date: String,
    pub projects: Vec<String>,
    pub catalog: Vec<FieldDescriptor>,
    pub defects: BTreeMap<String, BTreeMap<String, String>>,
    pub next_id: u32,
    /// Last SEGMENT_FILTERS payload: (filter text, project list).
    pub segment_filter: Option<(String, String)>,
    /// Last REFERENCED_FIELDS payload.
    pub referenced_fields: Vec<String>,
    /// When set, LOGIN fails with a non-continuable error.
    pub reject_logins: bool,
    /// Number of SAVE_DEFECT commands processed.
    pub saves: u32,
    /// Number of CREATE_DEFECT commands processed.
    pub creates: u32,
}

impl Default for MockTracker {
    fn default() -> Self {
        Self {
            server_version: "MockTracker 9.1".into(),
            server_date: "2006/05/06 12:34:56".into(),
            projects: vec!["CORE".into()],
            catalog: Vec::new(),
            defects: BTreeMap::new(),
            next_id: 1000,
            segment_filter: None,
            referenced_fields: Vec::new(),
            reject_logins: false,
            saves: 0,
            creates: 0,
        }
    }
}

impl MockTracker {
    /// Seeds a defect, returning its id.
    pub fn seed_defect(&mut self, id: &str, fields: &[(&str, &str)]) -> String {
        let map = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.defects.insert(id.to_string(), map);
        id.to_string()
    }
}

/// A running mock bridge on a loopback port.
pub struct MockBridgeServer {
    addr: SocketAddr,
    state: Arc<Mutex<MockTracker>>,
    live: Arc<Mutex<Vec<TcpStream>>>,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl MockBridgeServer {
    pub fn start(tracker: MockTracker) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(tracker));
        let live = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let accept_state = Arc::clone(&state);
        let accept_live = Arc::clone(&live);
        let accept_stop = Arc::clone(&stop);
        let accept_thread = std::thread::spawn(move || {
            for stream in listener.incoming() {
                if accept_stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                if let Ok(clone) = stream.try_clone() {
                    accept_live.lock().unwrap().push(clone);
                }
                let conn_state = Arc::clone(&accept_state);
                std::thread::spawn(move || serve_connection(stream, conn_state));
            }
        });

        Ok(Self {
            addr,
            state,
            live,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn endpoint(&self) -> BridgeEndpoint {
        BridgeEndpoint::new("127.0.0.1", self.addr.port())
    }

    /// The shared tracker state, for seeding and assertions.
    pub fn state(&self) -> Arc<Mutex<MockTracker>> {
        Arc::clone(&self.state)
    }

    /// Severs every live connection, as if the helper process died. The
    /// listener stays up, so a fresh open() succeeds.
    pub fn disconnect_all(&self) {
        let mut live = self.live.lock().unwrap();
        for stream in live.drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockBridgeServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.disconnect_all();
        // Wake the blocking accept so the thread notices the stop flag.
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn serve_connection(stream: TcpStream, state: Arc<Mutex<MockTracker>>) {
    let mut writer = match stream.try_clone() {
        Ok(clone) => clone,
        Err(_) => return,
    };
    let mut reader = BufReader::new(stream);
    let mut logged_in = false;

    loop {
        let Ok(payload) = read_frame(&mut reader) else { return };
        let Ok(request) = serde_json::from_slice::<BridgeRequest>(&payload) else {
            return;
        };
        let closing = request.command == commands::SHUTDOWN;
        let reply = dispatch(&request, &state, &mut logged_in);
        let Ok(bytes) = serde_json::to_vec(&reply) else { return };
        if write_frame(&mut writer, &bytes).is_err() {
            return;
        }
        if closing {
            return;
        }
    }
}

fn dispatch(
    request: &BridgeRequest,
    state: &Arc<Mutex<MockTracker>>,
    logged_in: &mut bool,
) -> BridgeReply {
    let mut tracker = state.lock().unwrap();
    match request.command.as_str() {
        commands::CONNECT => BridgeReply::one_string(Uuid::new_v4().to_string()),
        commands::LOGIN => {
            if tracker.reject_logins {
                return BridgeReply::error("tracker login rejected", false);
            }
            let complete = ["TRACKER_URL", "TRACKER_USER", "TRACKER_PASSWORD"]
                .iter()
                .all(|key| request.get_arg(key).is_some_and(|v| !v.is_empty()));
            if complete {
                *logged_in = true;
                BridgeReply::one_string(Uuid::new_v4().to_string())
            } else {
                BridgeReply::error("incomplete tracker credentials", false)
            }
        }
        commands::SHUTDOWN => BridgeReply::one_string(commands::CLOSING),
        commands::PING => BridgeReply::one_string(commands::PONG),
        _ if !*logged_in => BridgeReply::error("not logged in", false),
        commands::GET_SERVER_VERSION => BridgeReply::one_string(tracker.server_version.clone()),
        commands::GET_SERVER_DATE => BridgeReply::one_string(tracker.server_date.clone()),
        commands::LIST_PROJECTS => BridgeReply::strings(tracker.projects.clone()),
        commands::GET_PROJECT => match request.get_arg("PROJECT") {
            Some(name) if tracker.projects.iter().any(|p| p == name) => {
                BridgeReply::one_string(format!("proj-{name}"))
            }
            Some(name) => BridgeReply::error(format!("unknown project: {name}"), true),
            None => BridgeReply::error("GET_PROJECT without PROJECT", true),
        },
        commands::LIST_FIELDS => BridgeReply::descs(tracker.catalog.clone()),
        commands::REFERENCED_FIELDS => {
            tracker.referenced_fields = request
                .args
                .iter()
                .filter(|a| a.name.starts_with('F'))
                .map(|a| a.value.clone())
                .collect();
            BridgeReply::one_string(commands::OK)
        }
        commands::SEGMENT_FILTERS => {
            let filter = request.get_arg("SEGMENT_FILTER").unwrap_or("").to_string();
            let projects = request.get_arg("PROJECT_LIST").unwrap_or("").to_string();
            tracker.segment_filter = Some((filter, projects));
            BridgeReply::one_string(commands::OK)
        }
        commands::LIST_DEFECTS => {
            let max: usize = request
                .get_arg("MAX")
                .and_then(|m| m.parse().ok())
                .unwrap_or(0);
            let mut ids: Vec<String> = tracker.defects.keys().cloned().collect();
            if max > 0 {
                ids.truncate(max);
            }
            BridgeReply::strings(ids)
        }
        commands::NEW_DEFECT => {
            BridgeReply::fields(vec![NamedValue::new("DefectID", defectsync_types::NEW_RECORD_ID)])
        }
        commands::GET_DEFECT => match request.get_arg("DEFECT") {
            Some(id) => match tracker.defects.get(id) {
                Some(fields) => BridgeReply::fields(
                    fields
                        .iter()
                        .map(|(name, value)| NamedValue::new(name, value))
                        .collect(),
                ),
                None => BridgeReply::error(format!("no such defect: {id}"), true),
            },
            None => BridgeReply::error("GET_DEFECT without DEFECT", true),
        },
        commands::CREATE_DEFECT => {
            tracker.creates += 1;
            let id = tracker.next_id.to_string();
            tracker.next_id += 1;
            let fields = field_args(request);
            tracker.defects.insert(id.clone(), fields);
            BridgeReply::one_string(id)
        }
        commands::SAVE_DEFECT => {
            let Some(id) = request.get_arg("DEFECTID").map(str::to_string) else {
                return BridgeReply::error("SAVE_DEFECT without DEFECTID", true);
            };
            tracker.saves += 1;
            match tracker.defects.get_mut(&id) {
                Some(existing) => {
                    for (name, value) in field_args(request) {
                        if name != "DEFECTID" {
                            existing.insert(name, value);
                        }
                    }
                    BridgeReply::one_string(id)
                }
                None => BridgeReply::error(format!("no such defect: {id}"), true),
            }
        }
        other => BridgeReply::error(format!("unknown command: {other}"), true),
    }
}

fn field_args(request: &BridgeRequest) -> BTreeMap<String, String> {
    request
        .args
        .iter()
        .filter(|a| a.name != "PROJID" && a.name != "DEFECTID")
        .map(|a| (a.name.clone(), a.value.clone()))
        .collect()
}
