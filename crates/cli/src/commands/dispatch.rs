use std::sync::Arc;

use approvo_db::{DispatchReport, LoggingPostApprovalCallback, OutboxDispatcher};

use crate::commands::{run_with_pool, CommandResult};

/// Safety valve for `--drain` against a producer that never stops.
const MAX_DRAIN_PASSES: usize = 1_000;

pub fn run(drain: bool, batch_size: Option<u32>) -> CommandResult {
    let result = run_with_pool("dispatch", |config, pool| async move {
        let mut dispatcher =
            OutboxDispatcher::sql_backed(pool, &config.approvals, Arc::new(LoggingPostApprovalCallback));
        if let Some(batch_size) = batch_size {
            dispatcher = dispatcher.with_batch_size(batch_size);
        }

        let mut total = DispatchReport::default();
        for _ in 0..MAX_DRAIN_PASSES {
            let pass = dispatcher
                .dispatch_pending()
                .await
                .map_err(|error| ("dispatch", error.to_string(), 9u8))?;
            accumulate(&mut total, pass);
            if !drain || pass.is_idle() {
                break;
            }
        }
        Ok(total)
    });

    match result {
        Ok(report) => CommandResult::success_with_data(
            "dispatch",
            format!(
                "claimed {} outbox events: {} delivered, {} failed, {} stranded",
                report.claimed, report.delivered, report.failed, report.stranded
            ),
            &report,
        ),
        Err(failure) => failure,
    }
}

fn accumulate(total: &mut DispatchReport, pass: DispatchReport) {
    total.claimed += pass.claimed;
    total.delivered += pass.delivered;
    total.failed += pass.failed;
    total.notifications += pass.notifications;
    total.stranded += pass.stranded;
}
