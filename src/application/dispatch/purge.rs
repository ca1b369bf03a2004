//! HTTP PURGE dispatch.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::fanout::ExpandedTarget;

use super::error::DispatchError;
use super::result::DispatchResult;
use super::{METRIC_DISPATCH_MS, METRIC_PURGE_TOTAL};

/// Status line of a PURGE response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeResponse {
    pub status: u16,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum PurgeTransportError {
    /// The request never produced a response (connect, timeout, reset).
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Other(String),
}

/// Sends one PURGE request with the given logical `Host` header and no body.
#[async_trait]
pub trait PurgeTransport: Send + Sync {
    async fn send_purge(
        &self,
        url: &str,
        host_name: &str,
    ) -> Result<PurgeResponse, PurgeTransportError>;
}

#[derive(Clone)]
pub struct PurgeDispatcher {
    transport: Arc<dyn PurgeTransport>,
    concurrency: usize,
    log_all: bool,
}

impl PurgeDispatcher {
    pub fn new(transport: Arc<dyn PurgeTransport>) -> Self {
        Self {
            transport,
            concurrency: 1,
            log_all: false,
        }
    }

    /// Number of URLs in flight at once; results keep input order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_log_all(mut self, log_all: bool) -> Self {
        self.log_all = log_all;
        self
    }

    /// One result per URL. A failed URL never stops the rest.
    pub async fn purge(&self, targets: &[ExpandedTarget]) -> Vec<DispatchResult> {
        if self.concurrency == 1 {
            let mut results = Vec::with_capacity(targets.len());
            for target in targets {
                results.push(self.purge_one(target).await);
            }
            return results;
        }

        // The stream owns its targets and dispatcher handles so the future stays `Send`.
        let dispatcher = self.clone();
        stream::iter(targets.to_vec())
            .map(move |target| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.purge_one(&target).await }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn purge_one(&self, target: &ExpandedTarget) -> DispatchResult {
        let started_at = Instant::now();

        if self.log_all {
            info!(host_id = %target.host_id, url = %target.url, "sending purge");
        } else {
            debug!(host_id = %target.host_id, url = %target.url, "sending purge");
        }

        let result = match self
            .transport
            .send_purge(&target.url, &target.host_name)
            .await
        {
            Ok(response) => {
                let message = format!("{} {}", target.url, response.reason);
                let code = if response.status == 200 {
                    DispatchResult::OK
                } else {
                    i32::from(response.status)
                };
                DispatchResult::new(code, message)
            }
            Err(PurgeTransportError::Transport(message)) => DispatchResult::from(
                DispatchError::Transport {
                    host_id: target.host_id.clone(),
                    message,
                },
            ),
            Err(PurgeTransportError::Other(message)) => DispatchResult::from(
                DispatchError::general(format!("Error on \"{}\": {message}", target.host_id)),
            ),
        }
        .with_data("host", target.host_id.as_str())
        .with_data("url", target.url.as_str());

        if !result.is_ok() {
            warn!(
                host_id = %target.host_id,
                url = %target.url,
                code = result.code,
                message = %result.message,
                "purge failed"
            );
        }

        counter!(METRIC_PURGE_TOTAL, "outcome" => result.outcome()).increment(1);
        histogram!(METRIC_DISPATCH_MS, "kind" => "purge")
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::domain::types::HostId;

    #[derive(Default)]
    struct ScriptedTransport {
        sent: Mutex<Vec<(String, String)>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl PurgeTransport for ScriptedTransport {
        async fn send_purge(
            &self,
            url: &str,
            host_name: &str,
        ) -> Result<PurgeResponse, PurgeTransportError> {
            self.sent
                .lock()
                .unwrap()
                .push((url.to_string(), host_name.to_string()));

            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
            // `/slow-<ms>` paths answer after that many milliseconds.
            if let Some(delay) = url
                .rsplit_once("/slow-")
                .and_then(|(_, ms)| ms.parse::<u64>().ok())
            {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if url.contains("down") {
                return Err(PurgeTransportError::Transport("connection refused".into()));
            }
            if url.contains("broken") {
                return Err(PurgeTransportError::Other("invalid url".into()));
            }
            if url.contains("missing") {
                return Ok(PurgeResponse {
                    status: 404,
                    reason: "Not Found".to_string(),
                });
            }
            Ok(PurgeResponse {
                status: 200,
                reason: "OK".to_string(),
            })
        }
    }

    fn target(url: &str) -> ExpandedTarget {
        ExpandedTarget {
            host_id: HostId::new("www"),
            host_name: "cache.example".to_string(),
            locale: None,
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn classifies_each_outcome_without_aborting() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = PurgeDispatcher::new(transport.clone());

        let results = dispatcher
            .purge(&[
                target("https://down.example/a"),
                target("https://example.com/missing"),
                target("https://example.com/ok"),
                target("https://broken.example/b"),
            ])
            .await;

        let codes: Vec<_> = results.iter().map(|result| result.code).collect();
        assert_eq!(
            codes,
            vec![
                DispatchResult::ERROR_CURL,
                404,
                DispatchResult::OK,
                DispatchResult::ERROR_GENERAL
            ]
        );
        assert_eq!(results[1].message, "https://example.com/missing Not Found");
        assert_eq!(results[2].message, "https://example.com/ok OK");
        assert!(results[0].message.contains("www"));
        assert!(results[3].message.contains("invalid url"));

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|(_, host)| host == "cache.example"));
    }

    #[tokio::test]
    async fn concurrent_dispatch_keeps_result_order() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = PurgeDispatcher::new(transport.clone()).with_concurrency(4);

        // Earlier URLs answer last.
        let delays = [40, 5, 30, 0, 20, 10, 0, 15];
        let targets: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(index, delay)| target(&format!("https://example.com/{index}/slow-{delay}")))
            .collect();
        let results = dispatcher.purge(&targets).await;

        assert_eq!(results.len(), targets.len());
        for (index, result) in results.iter().enumerate() {
            assert_eq!(result.data.get("url"), Some(&targets[index].url));
            assert!(result.is_ok());
        }
        let peak = transport.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= 4, "peak in flight: {peak}");
    }

    #[tokio::test]
    async fn sequential_dispatch_sends_one_at_a_time() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = PurgeDispatcher::new(transport.clone());

        let targets = [
            target("https://example.com/a/slow-10"),
            target("https://example.com/b/slow-0"),
        ];
        let results = dispatcher.purge(&targets).await;

        assert_eq!(results.len(), 2);
        assert_eq!(transport.peak_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_runs_on_a_spawned_task() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = PurgeDispatcher::new(transport).with_concurrency(2);
        let targets = vec![
            target("https://example.com/a"),
            target("https://example.com/b"),
        ];

        let results = tokio::spawn(async move { dispatcher.purge(&targets).await })
            .await
            .expect("task joined");

        assert!(results.iter().all(DispatchResult::is_ok));
    }
}
