//! Framed request/response protocol for out-of-process tracker bridges.
//!
//! Backends that cannot be reached by a library call are driven through a
//! helper process speaking this protocol over TCP: a strictly synchronous
//! exchange of length-prefixed JSON frames with a small command vocabulary.
//!
//! Layering: [`frame`] moves byte frames, [`proto`] defines the request and
//! reply shapes, [`client`] owns the connection state machine (handshake,
//! login, liveness probe, teardown). Reconnection is *not* done here — a
//! dead transport surfaces as an error and the session layer above decides
//! when to reopen.
//!
//! The [`mock`] module provides an in-process bridge server backed by an
//! in-memory defect store, used by connector tests.

pub mod client;
pub mod frame;
pub mod mock;
pub mod proto;

pub use client::{BridgeClient, BridgeEndpoint, BridgeState, Credentials};
pub use proto::{BridgeReply, BridgeRequest, NamedValue, ReplyError, commands};
