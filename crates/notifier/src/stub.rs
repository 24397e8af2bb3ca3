//! In-process channel that records sends instead of contacting a provider.
//!
//! Used by tests and local runs without provider credentials.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use courier_common::types::ConnectionState;

use crate::channel::{ChannelClient, ChannelError, SendReceipt};

#[derive(Debug, Clone)]
enum Behaviour {
    Fail(String),
    Hang,
    Panic,
}

#[derive(Debug)]
struct StubState {
    status: ConnectionState,
    sent: Vec<(String, String)>,
    status_checks: usize,
    hang_status: bool,
    fail_all: Option<String>,
    per_address: HashMap<String, Behaviour>,
}

pub struct StubChannel {
    inner: Mutex<StubState>,
}

impl StubChannel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StubState {
                status: ConnectionState::Connected,
                sent: Vec::new(),
                status_checks: 0,
                hang_status: false,
                fail_all: None,
                per_address: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_status(&self, status: ConnectionState) {
        self.state().status = status;
    }

    /// Every send fails with `reason` until cleared.
    pub fn fail_all(&self, reason: impl Into<String>) {
        self.state().fail_all = Some(reason.into());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_all = None;
        state.per_address.clear();
    }

    pub fn fail_address(&self, address: &str, reason: impl Into<String>) {
        self.state()
            .per_address
            .insert(address.to_string(), Behaviour::Fail(reason.into()));
    }

    /// Sends to `address` never complete.
    pub fn hang_address(&self, address: &str) {
        self.state()
            .per_address
            .insert(address.to_string(), Behaviour::Hang);
    }

    /// Sends to `address` panic.
    pub fn panic_on_address(&self, address: &str) {
        self.state()
            .per_address
            .insert(address.to_string(), Behaviour::Panic);
    }

    /// Successful sends as `(address, text)` pairs, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.state().sent.clone()
    }

    /// Status checks never complete.
    pub fn hang_status(&self) {
        self.state().hang_status = true;
    }

    pub fn status_checks(&self) -> usize {
        self.state().status_checks
    }
}

impl Default for StubChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelClient for StubChannel {
    async fn status(&self) -> ConnectionState {
        let (status, hang) = {
            let mut state = self.state();
            state.status_checks += 1;
            (state.status, state.hang_status)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        status
    }

    async fn send(&self, address: &str, text: &str) -> Result<SendReceipt, ChannelError> {
        let behaviour = {
            let state = self.state();
            state
                .fail_all
                .clone()
                .map(Behaviour::Fail)
                .or_else(|| state.per_address.get(address).cloned())
        };

        match behaviour {
            Some(Behaviour::Fail(reason)) => Err(ChannelError::Rejected {
                status: 500,
                body: reason,
            }),
            Some(Behaviour::Hang) => std::future::pending().await,
            Some(Behaviour::Panic) => panic!("stub channel panicked sending to {address}"),
            None => {
                let mut state = self.state();
                state.sent.push((address.to_string(), text.to_string()));
                Ok(SendReceipt {
                    external_id: Some(format!("stub-{}", state.sent.len())),
                })
            }
        }
    }
}
