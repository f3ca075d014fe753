use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use approvo_core::config::ApprovalsConfig;
use approvo_core::domain::workflow::ROLE_DIRECTOR;
use approvo_core::events::{
    approval_needed_notification, director_escalation_notification, requester_notification,
    OutboundEvent,
};
use approvo_core::ports::{CollaboratorError, Notifier, PostApprovalCallback, UserDirectory};

use crate::repositories::{outbox, OutboxRecord, RepositoryError, SqlNotifier, SqlUserDirectory};
use crate::DbPool;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
    pub notifications: usize,
    /// Claimed rows whose outcome could not be recorded; they stay
    /// `dispatching` and show up in health and doctor output.
    pub stranded: usize,
}

impl DispatchReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }
}

/// Post-approval hook that only records the purchase in the log. Used when
/// no purchasing system is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingPostApprovalCallback;

#[async_trait]
impl PostApprovalCallback for LoggingPostApprovalCallback {
    async fn on_purchase_approved(&self, entity_id: &str) -> Result<(), CollaboratorError> {
        info!(
            event_name = "approval.purchase.approved",
            entity_id,
            "purchase approved; post-approval processing recorded"
        );
        Ok(())
    }
}

/// Delivers committed outbox rows. Each row is claimed, attempted once and
/// then marked delivered or failed; nothing is retried and a failure never
/// touches the approval state that produced it.
#[derive(Clone)]
pub struct OutboxDispatcher {
    pool: DbPool,
    directory: Arc<dyn UserDirectory>,
    notifier: Arc<dyn Notifier>,
    callback: Arc<dyn PostApprovalCallback>,
    batch_size: u32,
}

impl OutboxDispatcher {
    pub fn new(
        pool: DbPool,
        directory: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
        callback: Arc<dyn PostApprovalCallback>,
    ) -> Self {
        Self { pool, directory, notifier, callback, batch_size: 50 }
    }

    /// Directory and notifier backed by the same database.
    pub fn sql_backed(
        pool: DbPool,
        config: &ApprovalsConfig,
        callback: Arc<dyn PostApprovalCallback>,
    ) -> Self {
        let secs = i64::try_from(config.notification_dedup_window_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        let window = chrono::Duration::seconds(secs);
        Self::new(
            pool.clone(),
            Arc::new(SqlUserDirectory::new(pool.clone())),
            Arc::new(SqlNotifier::new(pool, window)),
            callback,
        )
        .with_batch_size(config.dispatch_batch_size)
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn dispatch_pending(&self) -> Result<DispatchReport, RepositoryError> {
        let pending = {
            let mut conn = self.pool.acquire().await?;
            outbox::list_pending(&mut conn, self.batch_size).await?
        };

        let mut report = DispatchReport::default();
        for record in pending {
            let claimed = {
                let mut conn = self.pool.acquire().await?;
                outbox::claim(&mut conn, &record.id).await?
            };
            if !claimed {
                continue;
            }
            report.claimed += 1;

            let result = self.deliver(&record.event).await;
            if let Err(failure) = &result {
                error!(
                    event_name = "approval.outbox.failed",
                    outbox_id = %record.id,
                    request_id = %record.request_id,
                    event_kind = record.event.kind(),
                    error = %failure,
                    "side effect failed; it will not be retried"
                );
            }

            // Delivery already happened; a bookkeeping failure strands only this row.
            if let Err(finish_error) = self.finish(&record.id, &result).await {
                error!(
                    event_name = "approval.outbox.finish_error",
                    outbox_id = %record.id,
                    request_id = %record.request_id,
                    error = %finish_error,
                    "outbox row left in dispatching"
                );
                report.stranded += 1;
                continue;
            }
            match result {
                Ok(sent) => {
                    report.delivered += 1;
                    report.notifications += sent;
                }
                Err(_) => report.failed += 1,
            }
        }

        if !report.is_idle() {
            info!(
                event_name = "approval.outbox.dispatched",
                claimed = report.claimed,
                delivered = report.delivered,
                failed = report.failed,
                notifications = report.notifications,
                stranded = report.stranded,
                "outbox batch dispatched"
            );
        }
        Ok(report)
    }

    async fn finish(
        &self,
        id: &str,
        result: &Result<usize, CollaboratorError>,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        match result {
            Ok(_) => outbox::mark_delivered(&mut conn, id, Utc::now()).await,
            Err(failure) => {
                outbox::mark_failed(&mut conn, id, &failure.to_string(), Utc::now()).await
            }
        }
    }

    async fn deliver(&self, event: &OutboundEvent) -> Result<usize, CollaboratorError> {
        match event {
            OutboundEvent::ApprovalNeeded { request, approver_role, step_name } => {
                let recipients = self.directory.find_users_by_role(approver_role).await?;
                if recipients.is_empty() {
                    warn!(
                        event_name = "approval.outbox.no_recipients",
                        request_id = %request.request_id,
                        approver_role = %approver_role,
                        step_name = %step_name,
                        "no active user holds the role of the active step"
                    );
                    return Ok(0);
                }
                self.notifier.notify(&approval_needed_notification(request, recipients)).await
            }
            OutboundEvent::DirectorEscalation { request, reason } => {
                let recipients = self.directory.find_users_by_role(ROLE_DIRECTOR).await?;
                if recipients.is_empty() {
                    warn!(
                        event_name = "approval.outbox.no_recipients",
                        request_id = %request.request_id,
                        approver_role = ROLE_DIRECTOR,
                        "escalated request has no active director to notify"
                    );
                    return Ok(0);
                }
                self.notifier
                    .notify(&director_escalation_notification(request, reason, recipients))
                    .await
            }
            OutboundEvent::RequestCompleted { request } => match requester_notification(request) {
                Some(notification) => self.notifier.notify(&notification).await,
                None => Ok(0),
            },
            OutboundEvent::PurchaseApproved { entity_id, .. } => {
                self.callback.on_purchase_approved(entity_id).await?;
                Ok(0)
            }
        }
    }

    /// Drains the outbox on every signal and at least once per `interval`
    /// until `shutdown` flips or its sender goes away.
    pub fn spawn(
        self,
        interval: Duration,
        signal: Arc<Notify>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(failure) = self.dispatch_pending().await {
                    warn!(
                        event_name = "approval.outbox.dispatch_error",
                        error = %failure,
                        "outbox dispatch pass failed"
                    );
                }

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = signal.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!(event_name = "approval.outbox.stopped", "outbox dispatcher stopped");
        })
    }
}

/// Pending rows for inspection without dispatching them.
pub async fn peek_pending(pool: &DbPool, limit: u32) -> Result<Vec<OutboxRecord>, RepositoryError> {
    let mut conn = pool.acquire().await?;
    outbox::list_pending(&mut conn, limit).await
}
