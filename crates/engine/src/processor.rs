//! Processing of a single claimed reminder.
//!
//! 1. Resolve the reminder's recipients
//! 2. Dispatch to each of them (via `Dispatcher`)
//! 3. Aggregate the results into the next state (via `outcome`)
//! 4. Persist that state under the pass's claim, which releases it
//! 5. Append the audit event for the pass, once step 4 has applied
//!
//! Steps 1-3 run under a catch-all: an error or a panic there still ends in
//! steps 4 and 5, with the caught message as the failure reason. When the
//! claim was lost in the meantime (recovered as stale and taken again), step 4
//! changes nothing and no event is written for this pass.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use courier_common::error::AppError;
use courier_common::types::Reminder;

use crate::audit::{AuditRecorder, ProcessingPass};
use crate::clock::Clock;
use crate::dispatcher::{DispatchReport, Dispatcher, panic_message};
use crate::outcome::{self, Finalization};
use crate::store::{ClientDirectory, ReminderStore};

pub struct ReminderProcessor {
    store: Arc<dyn ReminderStore>,
    directory: Arc<dyn ClientDirectory>,
    dispatcher: Dispatcher,
    recorder: AuditRecorder,
    clock: Arc<dyn Clock>,
}

impl ReminderProcessor {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        directory: Arc<dyn ClientDirectory>,
        dispatcher: Dispatcher,
        recorder: AuditRecorder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            dispatcher,
            recorder,
            clock,
        }
    }

    /// Run one processing pass on a reminder the caller has already claimed.
    ///
    /// Never fails: the result of the pass is the returned `Finalization`,
    /// which has also been written to the store when possible.
    pub async fn process(&self, reminder: Reminder) -> Finalization {
        let pass = self.recorder.start_pass(reminder.id);
        tracing::info!(
            reminder_id = %reminder.id,
            correlation_id = %pass.correlation_id,
            channel = %reminder.channel,
            attempt = reminder.retry_count + 1,
            "Processing reminder"
        );

        let delivery = AssertUnwindSafe(self.deliver(&reminder))
            .catch_unwind()
            .await;

        let now = self.clock.now();
        let finalization = match delivery {
            Ok(Ok(report)) => outcome::aggregate(&reminder, &report, now),
            Ok(Err(e)) => {
                tracing::error!(
                    reminder_id = %reminder.id,
                    correlation_id = %pass.correlation_id,
                    error = %e,
                    "Reminder processing failed"
                );
                outcome::aborted(&reminder, &e.to_string(), now)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    reminder_id = %reminder.id,
                    correlation_id = %pass.correlation_id,
                    panic = %message,
                    "Reminder processing panicked"
                );
                outcome::aborted(&reminder, &format!("processing panicked: {message}"), now)
            }
        };

        if self.finalize(&reminder, &pass, &finalization).await {
            self.recorder.record_pass(&pass, &finalization).await;
        }

        tracing::info!(
            reminder_id = %reminder.id,
            correlation_id = %pass.correlation_id,
            status = %finalization.status,
            retry_count = finalization.retry_count,
            "Processed reminder"
        );

        finalization
    }

    /// Write the pass outcome under the claim it was taken with.
    async fn finalize(
        &self,
        reminder: &Reminder,
        pass: &ProcessingPass,
        finalization: &Finalization,
    ) -> bool {
        let Some(claimed_at) = reminder.claimed_at else {
            tracing::error!(
                reminder_id = %reminder.id,
                correlation_id = %pass.correlation_id,
                "Processed a reminder that was never claimed; outcome not applied"
            );
            return false;
        };

        match self.store.finalize(reminder.id, claimed_at, finalization).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::error!(
                    reminder_id = %reminder.id,
                    correlation_id = %pass.correlation_id,
                    status = %finalization.status,
                    "Claim was lost before finalizing; outcome not applied"
                );
                false
            }
            // The claim stays held until stale-claim recovery returns it.
            Err(e) => {
                tracing::error!(
                    reminder_id = %reminder.id,
                    correlation_id = %pass.correlation_id,
                    error = %e,
                    "Failed to persist reminder outcome"
                );
                false
            }
        }
    }

    async fn deliver(&self, reminder: &Reminder) -> Result<DispatchReport, AppError> {
        let recipients = self.directory.resolve_recipients(reminder.id).await?;
        Ok(self.dispatcher.dispatch(reminder, &recipients).await)
    }
}
