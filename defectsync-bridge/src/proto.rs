//! Request and reply shapes of the bridge vocabulary.
//!
//! A request is a command name plus name/value arguments. A reply carries
//! up to four result shapes — plain strings, name/value pairs, field
//! descriptors, and an error. The error shape is authoritative: when
//! present it decides the outcome even if other shapes are also populated.

use defectsync_types::{FieldDescriptor, TrackError, TrackResult};
use serde::{Deserialize, Serialize};

/// Command names of the bridge vocabulary.
pub mod commands {
    /// Parameterless handshake; replies with a session token.
    pub const CONNECT: &str = "CONNECT";
    /// Credential login; replies with a tracker token.
    pub const LOGIN: &str = "LOGIN";
    /// Orderly close; the helper replies `CLOSING` and drops the link.
    pub const SHUTDOWN: &str = "SHUTDOWN";
    /// Liveness probe; the only valid reply is exactly `PONG`.
    pub const PING: &str = "PING";
    pub const GET_SERVER_VERSION: &str = "GET_SERVER_VERSION";
    pub const GET_SERVER_DATE: &str = "GET_SERVER_DATE";
    pub const LIST_PROJECTS: &str = "LIST_PROJECTS";
    pub const GET_PROJECT: &str = "GET_PROJECT";
    pub const LIST_FIELDS: &str = "LIST_FIELDS";
    pub const REFERENCED_FIELDS: &str = "REFERENCED_FIELDS";
    pub const SEGMENT_FILTERS: &str = "SEGMENT_FILTERS";
    pub const LIST_DEFECTS: &str = "LIST_DEFECTS";
    pub const NEW_DEFECT: &str = "NEW_DEFECT";
    pub const GET_DEFECT: &str = "GET_DEFECT";
    pub const CREATE_DEFECT: &str = "CREATE_DEFECT";
    pub const SAVE_DEFECT: &str = "SAVE_DEFECT";

    /// Expected reply string to [`PING`].
    pub const PONG: &str = "PONG";
    /// Reply string acknowledging [`SHUTDOWN`].
    pub const CLOSING: &str = "CLOSING";
    /// Generic acknowledgement string.
    pub const OK: &str = "OK";
}

/// One name/value argument or result pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: String,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<NamedValue>,
}

impl BridgeRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push(NamedValue::new(name, value));
        self
    }

    pub fn with_args(mut self, args: Vec<NamedValue>) -> Self {
        self.args.extend(args);
        self
    }

    /// The first argument with this name.
    pub fn get_arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

/// The error shape of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    pub message: String,
    pub continuable: bool,
}

/// A reply frame. Exactly one shape is meaningful per command, but the
/// parser accepts all four and lets the error shape win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeReply {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<NamedValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub descs: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl BridgeReply {
    pub fn strings(values: Vec<String>) -> Self {
        Self {
            strings: values,
            ..Self::default()
        }
    }

    pub fn one_string(value: impl Into<String>) -> Self {
        Self::strings(vec![value.into()])
    }

    pub fn fields(fields: Vec<NamedValue>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn descs(descs: Vec<FieldDescriptor>) -> Self {
        Self {
            descs,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>, continuable: bool) -> Self {
        Self {
            error: Some(ReplyError {
                message: message.into(),
                continuable,
            }),
            ..Self::default()
        }
    }

    /// Applies the error-wins rule: a populated error shape turns the reply
    /// into a connection error carrying the helper's continuable flag.
    pub fn into_result(self) -> TrackResult<Self> {
        match self.error {
            Some(err) => Err(TrackError::Connection {
                message: err.message,
                continuable: err.continuable,
            }),
            None => Ok(self),
        }
    }

    /// The first result string, when non-empty. Handshake and save replies
    /// carry their payload here.
    pub fn first_string(&self) -> Option<&str> {
        self.strings.first().map(String::as_str).filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_compactly() {
        let request = BridgeRequest::new(commands::PING);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"command":"PING"}"#);
        let back: BridgeRequest = serde_json::from_str(&json).unwrap();
        assert!(back.args.is_empty());
    }

    #[test]
    fn request_args_lookup() {
        let request = BridgeRequest::new(commands::GET_PROJECT)
            .arg("TRACKER", "token")
            .arg("PROJECT", "Core");
        assert_eq!(request.get_arg("PROJECT"), Some("Core"));
        assert_eq!(request.get_arg("MISSING"), None);
    }

    #[test]
    fn error_shape_is_authoritative() {
        let reply = BridgeReply {
            strings: vec!["would-be-result".into()],
            error: Some(ReplyError {
                message: "tracker refused".into(),
                continuable: true,
            }),
            ..BridgeReply::default()
        };
        let err = reply.into_result().unwrap_err();
        assert!(err.continuable());
    }

    #[test]
    fn non_continuable_error_propagates_flag() {
        let err = BridgeReply::error("session expired", false)
            .into_result()
            .unwrap_err();
        assert!(!err.continuable());
    }

    #[test]
    fn first_string_skips_empty() {
        assert_eq!(BridgeReply::one_string("").first_string(), None);
        assert_eq!(
            BridgeReply::one_string("token").first_string(),
            Some("token")
        );
    }

    #[test]
    fn reply_roundtrips_descs() {
        use defectsync_types::{FieldAccess, FieldDescriptor};
        let reply = BridgeReply::descs(vec![FieldDescriptor::select(
            "Status",
            FieldAccess::ReadWrite,
            vec!["Open".into()],
        )]);
        let json = serde_json::to_string(&reply).unwrap();
        let back: BridgeReply = serde_json::from_str(&json).unwrap();
        assert_eq!(back.descs.len(), 1);
        assert_eq!(back.descs[0].select_values, ["Open"]);
    }
}
