//! Postgres-backed job queue and the worker monitor draining it.

use std::sync::Arc;

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::application::jobs::{
    BanJobPayload, JobKind, JobQueue, JobWorkerContext, PurgeJobPayload, process_ban_job,
    process_purge_job,
};
use crate::application::repos::RepoError;
use crate::config::JobsSettings;

use super::db::{PostgresRepositories, map_sqlx_error};

/// Retries are the queue's job; the engine never fails a batch itself.
const MAX_ATTEMPTS: i32 = 5;
const PRIORITY: i32 = 0;

#[derive(Clone)]
pub struct ApalisJobQueue {
    repositories: Arc<PostgresRepositories>,
}

impl ApalisJobQueue {
    pub fn new(repositories: Arc<PostgresRepositories>) -> Self {
        Self { repositories }
    }

    async fn push<P: Serialize>(&self, kind: JobKind, payload: &P) -> Result<String, RepoError> {
        let payload = serde_json::to_value(payload)
            .map_err(|err| RepoError::from_persistence(err.to_string()))?;

        let id: String = sqlx::query_scalar(
            r#"
            SELECT (apalis.push_job($1, $2::json, $3, $4, $5, $6)).id
            "#,
        )
        .bind(kind.as_str())
        .bind(payload)
        .bind("Pending")
        .bind(OffsetDateTime::now_utc())
        .bind(MAX_ATTEMPTS)
        .bind(PRIORITY)
        .fetch_one(self.repositories.pool())
        .await
        .map_err(map_sqlx_error)?;

        info!(job_id = %id, job_type = kind.as_str(), "job enqueued");
        Ok(id)
    }
}

#[async_trait]
impl JobQueue for ApalisJobQueue {
    async fn enqueue_purge(&self, payload: PurgeJobPayload) -> Result<String, RepoError> {
        self.push(JobKind::Purge, &payload).await
    }

    async fn enqueue_ban(&self, payload: BanJobPayload) -> Result<String, RepoError> {
        self.push(JobKind::Ban, &payload).await
    }
}

pub fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    context: JobWorkerContext,
    jobs: &JobsSettings,
) -> tokio::task::JoinHandle<()> {
    let purge_storage: PostgresStorage<PurgeJobPayload> = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobKind::Purge.as_str()),
    );
    let ban_storage: PostgresStorage<BanJobPayload> = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(JobKind::Ban.as_str()),
    );

    let purge_concurrency = jobs.purge_concurrency.get() as usize;
    let ban_concurrency = jobs.ban_concurrency.get() as usize;

    let purge_worker = WorkerBuilder::new("purge-worker")
        .concurrency(purge_concurrency)
        .data(context.clone())
        .backend(purge_storage)
        .build_fn(process_purge_job);
    let ban_worker = WorkerBuilder::new("ban-worker")
        .concurrency(ban_concurrency)
        .data(context)
        .backend(ban_storage)
        .build_fn(process_ban_job);

    let monitor = Monitor::new().register(purge_worker).register(ban_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    })
}
