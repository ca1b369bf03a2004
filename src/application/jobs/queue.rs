use async_trait::async_trait;
use uuid::Uuid;

use crate::application::repos::RepoError;

use super::context::JobWorkerContext;
use super::payload::{BanJobPayload, PurgeJobPayload};

/// Accepts invalidation batches for asynchronous, at-least-once execution.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns the queued job id.
    async fn enqueue_purge(&self, payload: PurgeJobPayload) -> Result<String, RepoError>;

    async fn enqueue_ban(&self, payload: BanJobPayload) -> Result<String, RepoError>;
}

/// Runs every batch immediately on the caller's task.
#[derive(Clone)]
pub struct InlineJobQueue {
    context: JobWorkerContext,
}

impl InlineJobQueue {
    pub fn new(context: JobWorkerContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JobQueue for InlineJobQueue {
    async fn enqueue_purge(&self, payload: PurgeJobPayload) -> Result<String, RepoError> {
        self.context
            .purge_batch(&payload.uris, payload.debug)
            .await;
        Ok(Uuid::new_v4().to_string())
    }

    async fn enqueue_ban(&self, payload: BanJobPayload) -> Result<String, RepoError> {
        self.context.ban_batch(&payload.bans, payload.debug).await;
        Ok(Uuid::new_v4().to_string())
    }
}
