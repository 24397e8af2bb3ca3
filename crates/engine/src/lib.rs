//! Reminder delivery engine.
//!
//! A claimed reminder flows through [`processor::ReminderProcessor`]:
//! recipients are resolved, [`dispatcher::Dispatcher`] sends to each of them
//! in order, [`outcome`] folds the per-recipient results into the next
//! reminder state, and [`audit::AuditRecorder`] writes the trail. Operations
//! invoked from the API layer live in [`retry`] and [`lifecycle`].

pub mod audit;
pub mod clock;
pub mod dispatcher;
pub mod lifecycle;
pub mod outcome;
pub mod pacing;
pub mod processor;
pub mod retry;
pub mod store;
