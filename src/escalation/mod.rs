//! Escalation of critical anomalies to a voice-call service

pub mod client;
pub mod dispatcher;

pub use client::{CallReceipt, CallRequest, CallTransport, EscalationError, HttpCallTransport};
pub use dispatcher::{DispatchOutcome, EscalationDispatcher};
