//! HTTP surface over the reminder engine: manual retry, cancel, delete,
//! audit history, status counts and the chat session.

pub mod routes;
pub mod state;
