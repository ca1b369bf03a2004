//! Entry points tying resolution, fanout, dispatch and the job queue together.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::bindings::BindingEvaluator;
use crate::application::dispatch::{DispatchError, DispatchResult, HostBanList, read_ban_lists};
use crate::application::jobs::{BanJobPayload, JobQueue, JobWorkerContext, PurgeJobPayload};
use crate::application::repos::{BindingFilter, BindingsRepo, RepoError, UriTrackingRepo};
use crate::application::resolver::{Resolution, UriResolver};
use crate::domain::bindings::{Binding, BindingCount, NewBinding};
use crate::domain::content::{ContentGraph, ContentSnapshot};
use crate::domain::hosts::HostRegistry;
use crate::domain::targets::{BanDescriptor, BanRequest, InvalidationTarget};
use crate::domain::types::{HostId, ItemId, LocaleId, SectionId, TypeId};

/// Generated URIs for a test purge when the caller names none.
pub const DEFAULT_TEST_URIS: usize = 10;
pub const MAX_TEST_URIS: usize = 500;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("bans are not supported by this installation")]
    BansDisabled,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// Change notifications are ignored when false.
    pub purge_enabled: bool,
    /// Default for the "include related items" flag.
    pub purge_related: bool,
    pub bans_supported: bool,
}

/// Everything one change notification invalidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub purge: Vec<InvalidationTarget>,
    pub bans: Vec<BanRequest>,
}

impl InvalidationPlan {
    pub fn is_empty(&self) -> bool {
        self.purge.is_empty() && self.bans.is_empty()
    }
}

impl From<Resolution> for InvalidationPlan {
    fn from(resolution: Resolution) -> Self {
        Self {
            purge: resolution.purge,
            bans: resolution.bans.into_iter().map(BanRequest::from).collect(),
        }
    }
}

/// Result of [`InvalidationService::on_change`]: queued job ids and the plan behind them.
#[derive(Debug, Clone, Default)]
pub struct QueuedChange {
    pub jobs: Vec<String>,
    pub plan: InvalidationPlan,
}

/// Result of [`InvalidationService::test_purge`].
#[derive(Debug, Clone, Default)]
pub struct TestPurge {
    pub uris: Vec<String>,
    pub responses: Vec<DispatchResult>,
}

/// What the bindings of one section/type evaluate to, plus any dispatch results.
#[derive(Debug, Clone, Default)]
pub struct BindingsCheck {
    pub purge: Vec<InvalidationTarget>,
    pub bans: Vec<BanDescriptor>,
    pub responses: Vec<DispatchResult>,
}

#[derive(Clone)]
pub struct InvalidationService {
    settings: ServiceSettings,
    resolver: UriResolver,
    bindings: Arc<dyn BindingsRepo>,
    tracking: Arc<dyn UriTrackingRepo>,
    queue: Arc<dyn JobQueue>,
    workers: JobWorkerContext,
}

impl InvalidationService {
    pub fn new(
        settings: ServiceSettings,
        resolver: UriResolver,
        bindings: Arc<dyn BindingsRepo>,
        tracking: Arc<dyn UriTrackingRepo>,
        queue: Arc<dyn JobQueue>,
        workers: JobWorkerContext,
    ) -> Self {
        Self {
            settings,
            resolver,
            bindings,
            tracking,
            queue,
            workers,
        }
    }

    pub fn settings(&self) -> ServiceSettings {
        self.settings
    }

    pub fn registry(&self) -> &HostRegistry {
        self.workers.fanout.registry()
    }

    /// Resolve `items` into purge targets and ban requests. Tracked URIs are only read.
    pub async fn plan(
        &self,
        items: &[ContentSnapshot],
        graph: &dyn ContentGraph,
        include_related: Option<bool>,
    ) -> Result<InvalidationPlan, ServiceError> {
        let resolution = self.resolve(items, graph, include_related).await?;
        Ok(InvalidationPlan::from(resolution))
    }

    /// Plan and enqueue at most one purge job and one ban job. Tracked URIs are
    /// consumed only after their job was accepted, so a failure leaves them stored.
    pub async fn on_change(
        &self,
        items: &[ContentSnapshot],
        graph: &dyn ContentGraph,
        include_related: Option<bool>,
        debug: bool,
    ) -> Result<QueuedChange, ServiceError> {
        if !self.settings.purge_enabled {
            debug!(items = items.len(), "purging disabled; change ignored");
            return Ok(QueuedChange::default());
        }

        let mut resolution = self.resolve(items, graph, include_related).await?;
        let tracked = std::mem::take(&mut resolution.tracked);
        let plan = InvalidationPlan::from(resolution);
        if plan.is_empty() {
            debug!(items = items.len(), "change resolved to nothing");
            return Ok(QueuedChange {
                jobs: Vec::new(),
                plan,
            });
        }

        let mut jobs = Vec::new();
        if !plan.purge.is_empty() {
            let payload = PurgeJobPayload::new(plan.purge.clone(), debug);
            jobs.push(self.queue.enqueue_purge(payload).await?);
        }
        if !plan.bans.is_empty() {
            let payload = BanJobPayload::new(plan.bans.clone(), debug);
            jobs.push(self.queue.enqueue_ban(payload).await?);
        }

        // Leftover records only cause a repeated, harmless purge next time.
        if let Err(err) = self.resolver.consume_tracked(&tracked).await {
            warn!(error = %err, "could not consume tracked uris");
        }

        info!(
            items = items.len(),
            purge = plan.purge.len(),
            bans = plan.bans.len(),
            jobs = jobs.len(),
            "invalidation queued"
        );
        Ok(QueuedChange { jobs, plan })
    }

    async fn resolve(
        &self,
        items: &[ContentSnapshot],
        graph: &dyn ContentGraph,
        include_related: Option<bool>,
    ) -> Result<Resolution, ServiceError> {
        let include_related = include_related.unwrap_or(self.settings.purge_related);
        Ok(self
            .resolver
            .resolve_all(items, graph, None, include_related)
            .await?)
    }

    /// Purge one URI on every host (or `host`) and locale, synchronously.
    pub async fn purge_uri(&self, uri: &str, host: Option<HostId>) -> Vec<DispatchResult> {
        if let Some(unknown) = self.unknown_host(host.as_ref()) {
            return vec![unknown];
        }

        let target = InvalidationTarget::element(uri, None).for_host(host);
        self.workers.purge_batch(&[target], true).await
    }

    /// Ban `query` on every host (or `host`), synchronously.
    pub async fn ban_query(
        &self,
        query: &str,
        is_full_query: bool,
        host: Option<HostId>,
    ) -> Result<Vec<DispatchResult>, ServiceError> {
        if !self.settings.bans_supported {
            return Err(ServiceError::BansDisabled);
        }
        if let Some(unknown) = self.unknown_host(host.as_ref()) {
            return Ok(vec![unknown]);
        }

        let request = BanRequest::new(query, is_full_query, host);
        Ok(self.workers.ban_batch(&[request], true).await)
    }

    /// Purge `uris` synchronously with every result logged. With no URIs,
    /// `count` unique `/?n=<uuid>` URIs are generated so each request misses the cache.
    pub async fn test_purge(
        &self,
        uris: Vec<String>,
        count: usize,
        host: Option<HostId>,
    ) -> TestPurge {
        let uris = if uris.is_empty() {
            cache_busting_uris(count.min(MAX_TEST_URIS))
        } else {
            uris
        };
        let targets: Vec<InvalidationTarget> = uris
            .iter()
            .map(|uri| InvalidationTarget::element(uri, None))
            .map(|target| target.for_host(host.clone()))
            .collect();
        let uris = targets.iter().map(|target| target.uri.clone()).collect();

        if let Some(unknown) = self.unknown_host(host.as_ref()) {
            return TestPurge {
                uris,
                responses: vec![unknown],
            };
        }

        info!(uris = targets.len(), "test purge");
        let responses = self.workers.purge_batch(&targets, true).await;
        TestPurge { uris, responses }
    }

    /// Evaluate the PURGE and BAN bindings of a section/type. With `dispatch`,
    /// the result is purged and banned synchronously.
    pub async fn test_bindings(
        &self,
        section_id: SectionId,
        type_id: TypeId,
        dispatch: bool,
    ) -> Result<BindingsCheck, ServiceError> {
        let evaluator = BindingEvaluator::new(Arc::clone(&self.bindings));
        let purge = evaluator.purge_targets(section_id, type_id).await?;
        let bans = evaluator.ban_descriptors(section_id, type_id).await?;

        let mut responses = Vec::new();
        if dispatch {
            if !bans.is_empty() && !self.settings.bans_supported {
                return Err(ServiceError::BansDisabled);
            }
            if !purge.is_empty() {
                responses.extend(self.workers.purge_batch(&purge, true).await);
            }
            if !bans.is_empty() {
                let requests: Vec<BanRequest> =
                    bans.iter().cloned().map(BanRequest::from).collect();
                responses.extend(self.workers.ban_batch(&requests, true).await);
            }
        }

        Ok(BindingsCheck {
            purge,
            bans,
            responses,
        })
    }

    pub async fn ban_lists(&self, host: Option<&HostId>) -> Vec<HostBanList> {
        read_ban_lists(self.registry(), self.workers.admin.as_ref(), host).await
    }

    pub async fn record_uri(
        &self,
        item_id: ItemId,
        uri: &str,
        locale: Option<LocaleId>,
    ) -> Result<(), ServiceError> {
        if uri.trim().is_empty() {
            return Err(RepoError::invalid_input("uri must not be empty").into());
        }
        Ok(self.tracking.record_uri(item_id, uri, locale).await?)
    }

    pub async fn forget_uri(&self, uri: &str) -> Result<bool, ServiceError> {
        Ok(self.tracking.forget_uri(uri).await?)
    }

    pub async fn list_bindings(
        &self,
        section_id: SectionId,
        filter: &BindingFilter,
    ) -> Result<Vec<Binding>, ServiceError> {
        Ok(self.bindings.list_bindings(section_id, filter).await?)
    }

    pub async fn replace_bindings(
        &self,
        section_id: SectionId,
        bindings_by_type: BTreeMap<TypeId, Vec<NewBinding>>,
    ) -> Result<Vec<Binding>, ServiceError> {
        Ok(self
            .bindings
            .replace_bindings(section_id, bindings_by_type)
            .await?)
    }

    pub async fn binding_counts(&self) -> Result<Vec<BindingCount>, ServiceError> {
        Ok(self.bindings.binding_counts().await?)
    }

    fn unknown_host(&self, host: Option<&HostId>) -> Option<DispatchResult> {
        let host = host?;
        if self.registry().get(host).is_some() {
            return None;
        }
        Some(DispatchResult::from(DispatchError::Configuration {
            message: format!("unknown host `{host}`"),
        }))
    }
}

fn cache_busting_uris(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| format!("/?n={}", Uuid::new_v4().simple()))
        .collect()
}
