use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::approvals::roles::normalize_role;
use crate::domain::approval::{ApprovalPriority, ApprovalRequestId, UserId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("user directory unavailable: {0}")]
    Directory(String),
    #[error("notification delivery failed: {0}")]
    Notification(String),
    #[error("post-approval callback failed: {0}")]
    Callback(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: UserId,
    pub name: String,
    pub role: String,
    pub is_active: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Active users whose role exactly matches `role`, case-insensitively.
    async fn find_users_by_role(&self, role: &str) -> Result<Vec<UserId>, CollaboratorError>;

    /// `None` when the user is unknown.
    async fn get_user_role(&self, user_id: &UserId) -> Result<Option<String>, CollaboratorError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalPending,
    ApprovalApproved,
    ApprovalRejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalPending => "approval_pending",
            Self::ApprovalApproved => "approval_approved",
            Self::ApprovalRejected => "approval_rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "approval_pending" => Some(Self::ApprovalPending),
            "approval_approved" => Some(Self::ApprovalApproved),
            "approval_rejected" => Some(Self::ApprovalRejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_ids: Vec<UserId>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: ApprovalPriority,
    pub request_id: ApprovalRequestId,
    pub payload: Value,
    /// Skip recipients that already got the same kind for this request
    /// within the dedup window.
    pub deduplicate: bool,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns how many recipients actually received a new notification.
    async fn notify(&self, notification: &Notification) -> Result<usize, CollaboratorError>;
}

#[async_trait]
pub trait PostApprovalCallback: Send + Sync {
    async fn on_purchase_approved(&self, entity_id: &str) -> Result<(), CollaboratorError>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryUserDirectory {
    users: BTreeMap<String, DirectoryUser>,
}

impl InMemoryUserDirectory {
    pub fn with_user(self, user_id: impl Into<String>, role: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let name = user_id.clone();
        self.with_directory_user(DirectoryUser {
            id: UserId(user_id),
            name,
            role: role.into(),
            is_active: true,
        })
    }

    pub fn with_directory_user(mut self, user: DirectoryUser) -> Self {
        self.users.insert(user.id.0.clone(), user);
        self
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_users_by_role(&self, role: &str) -> Result<Vec<UserId>, CollaboratorError> {
        let wanted = normalize_role(role);
        Ok(self
            .users
            .values()
            .filter(|user| user.is_active && normalize_role(&user.role) == wanted)
            .map(|user| user.id.clone())
            .collect())
    }

    async fn get_user_role(&self, user_id: &UserId) -> Result<Option<String>, CollaboratorError> {
        Ok(self.users.get(&user_id.0).map(|user| user.role.clone()))
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { sent: Arc::default(), failing: true }
    }

    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<usize, CollaboratorError> {
        if self.failing {
            return Err(CollaboratorError::Notification("notifier offline".to_owned()));
        }
        let recipients = notification.user_ids.len();
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(recipients)
    }
}

#[derive(Clone, Default)]
pub struct RecordingPostApprovalCallback {
    entity_ids: Arc<Mutex<Vec<String>>>,
}

impl RecordingPostApprovalCallback {
    pub fn entity_ids(&self) -> Vec<String> {
        match self.entity_ids.lock() {
            Ok(ids) => ids.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl PostApprovalCallback for RecordingPostApprovalCallback {
    async fn on_purchase_approved(&self, entity_id: &str) -> Result<(), CollaboratorError> {
        match self.entity_ids.lock() {
            Ok(mut ids) => ids.push(entity_id.to_owned()),
            Err(poisoned) => poisoned.into_inner().push(entity_id.to_owned()),
        }
        Ok(())
    }
}
