pub mod connection;
pub mod dispatcher;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use dispatcher::{DispatchReport, LoggingPostApprovalCallback, OutboxDispatcher};
pub use fixtures::{DemoSeed, SeedResult, VerificationResult};
pub use repositories::{RepositoryError, RequestFilter, RequestScope};
pub use service::{ApprovalService, ServiceError};
