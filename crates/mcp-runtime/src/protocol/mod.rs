//! JSON-RPC protocol machinery: codec, handshake, correlation, routing.

pub mod codec;
pub mod dispatcher;
pub mod negotiation;
pub mod pending;

pub use dispatcher::{Dispatcher, NotificationRouter, ServerIdentity};
pub use negotiation::{NegotiatedSession, Negotiator, SessionPhase};
pub use pending::PendingRequests;
