//! Due-reminder poller and the scheduler binary's wiring.

pub mod poller;
pub mod session;

pub use poller::{ReminderPoller, TickSummary};
