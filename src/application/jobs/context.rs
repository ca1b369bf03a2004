use std::sync::Arc;

use tracing::{info, warn};

use crate::application::dispatch::{AdminTransport, BanDispatcher, DispatchResult, PurgeDispatcher};
use crate::application::fanout::HostFanout;
use crate::domain::targets::{BanRequest, InvalidationTarget};
use crate::domain::types::LocaleId;

/// Shared context passed to job workers and manual dispatch calls.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub fanout: Arc<HostFanout>,
    pub purger: PurgeDispatcher,
    pub admin: Arc<dyn AdminTransport>,
    pub sites: Vec<LocaleId>,
    pub log_all: bool,
}

impl JobWorkerContext {
    /// Fan out and purge every target. Per-URL failures are reported, never raised.
    pub async fn purge_batch(
        &self,
        targets: &[InvalidationTarget],
        debug: bool,
    ) -> Vec<DispatchResult> {
        let expanded = self.fanout.expand_all(targets);
        let results = self
            .purger
            .clone()
            .with_log_all(self.log_all || debug)
            .purge(&expanded)
            .await;
        summarize("purge", &results);
        results
    }

    /// Dispatch every ban through one dispatcher, so admin sessions live for this batch only.
    pub async fn ban_batch(&self, requests: &[BanRequest], debug: bool) -> Vec<DispatchResult> {
        let mut dispatcher = BanDispatcher::new(
            Arc::clone(self.fanout.registry()),
            Arc::clone(&self.admin),
            self.sites.clone(),
        )
        .with_log_all(self.log_all || debug);

        let results = dispatcher.ban_all(requests).await;
        summarize("ban", &results);
        results
    }
}

fn summarize(kind: &'static str, results: &[DispatchResult]) {
    let failed = results.iter().filter(|result| !result.is_ok()).count();
    if failed > 0 {
        warn!(
            target = "application::jobs",
            kind,
            total = results.len(),
            failed,
            "dispatch batch finished with failures"
        );
    } else {
        info!(
            target = "application::jobs",
            kind,
            total = results.len(),
            "dispatch batch finished"
        );
    }
}
