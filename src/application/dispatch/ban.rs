//! BAN dispatch over the cache servers' admin sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::hosts::{AdminEndpoint, Host, HostRegistry};
use crate::domain::targets::BanRequest;
use crate::domain::types::{HostId, LocaleId};

use super::error::DispatchError;
use super::result::DispatchResult;
use super::{METRIC_BAN_TOTAL, METRIC_DISPATCH_MS};

/// Prefix turning a URL pattern into a host-scoped ban expression.
pub const BAN_PREFIX: &str = "req.http.host == ${hostname} && req.url ~ ";

const HOSTNAME_TOKEN: &str = "${hostname}";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("could not connect to {address}: {message}")]
    Connect { address: String, message: String },
    #[error("connection to {address} timed out")]
    Timeout { address: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("admin socket i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected admin reply: {0}")]
    Protocol(String),
}

/// Reply of the remote admin channel to an add-ban command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanReply {
    Added,
    Rejected { code: i32, messages: Vec<String> },
}

/// One entry of a cache server's ban list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanListEntry {
    pub time: String,
    pub refs: u64,
    pub completed: bool,
    pub spec: String,
}

/// An authenticated admin connection.
#[async_trait]
pub trait AdminSession: Send {
    /// `Ok(None)` means the command went unanswered.
    async fn add_ban(&mut self, expression: &str) -> Result<Option<BanReply>, AdminError>;

    async fn ban_list(&mut self) -> Result<Vec<BanListEntry>, AdminError>;
}

#[async_trait]
pub trait AdminTransport: Send + Sync {
    async fn connect(&self, endpoint: &AdminEndpoint)
    -> Result<Box<dyn AdminSession>, AdminError>;
}

/// Build the ban expression for `host`: prefix URL patterns, then substitute
/// `${hostname}` and every `${baseUrl-<locale>}` the host has a URL for.
pub fn build_ban_expression(
    host: &Host,
    sites: &[LocaleId],
    query: &str,
    is_full_query: bool,
) -> String {
    let mut expression = if is_full_query {
        query.to_string()
    } else {
        format!("{BAN_PREFIX}{query}")
    };

    expression = expression.replace(HOSTNAME_TOKEN, &host.host_name);
    for site in sites {
        if let Some(url) = host.url_for(site) {
            expression = expression.replace(&format!("${{baseUrl-{site}}}"), url);
        }
    }
    expression
}

/// Whether `expression` fits on one admin command line.
pub fn is_single_line(expression: &str) -> bool {
    !expression.contains(['\r', '\n'])
}

/// Backslashes are doubled on the admin command channel.
pub fn escape_for_admin(expression: &str) -> String {
    expression.replace('\\', "\\\\")
}

/// Dispatches bans for one batch. Admin sessions are cached per admin IP for
/// the lifetime of the dispatcher; failed connects are never cached.
pub struct BanDispatcher {
    registry: Arc<HostRegistry>,
    transport: Arc<dyn AdminTransport>,
    sites: Vec<LocaleId>,
    sessions: HashMap<String, Box<dyn AdminSession>>,
    log_all: bool,
}

impl BanDispatcher {
    pub fn new(
        registry: Arc<HostRegistry>,
        transport: Arc<dyn AdminTransport>,
        sites: Vec<LocaleId>,
    ) -> Self {
        Self {
            registry,
            transport,
            sites,
            sessions: HashMap::new(),
            log_all: false,
        }
    }

    pub fn with_log_all(mut self, log_all: bool) -> Self {
        self.log_all = log_all;
        self
    }

    /// One result per host matching the request's host filter.
    pub async fn ban(&mut self, request: &BanRequest) -> Vec<DispatchResult> {
        let registry = Arc::clone(&self.registry);
        if registry.is_empty() {
            warn!(query = %request.query, "no cache hosts configured; nothing to ban");
            return Vec::new();
        }

        let mut results = Vec::new();
        for host in registry.matching(request.host.as_ref()) {
            let started_at = Instant::now();
            let result = match host.admin.as_ref() {
                Some(admin) => self.send_admin(host, admin, request).await,
                None => {
                    let result = DispatchResult::from(DispatchError::Unsupported {
                        host_id: host.id.clone(),
                    });
                    warn!(host_id = %host.id, message = %result.message, "ban skipped");
                    result
                }
            }
            .with_data("host", host.id.as_str());

            counter!(METRIC_BAN_TOTAL, "outcome" => result.outcome()).increment(1);
            histogram!(METRIC_DISPATCH_MS, "kind" => "ban")
                .record(started_at.elapsed().as_secs_f64() * 1000.0);
            results.push(result);
        }
        results
    }

    pub async fn ban_all(&mut self, requests: &[BanRequest]) -> Vec<DispatchResult> {
        let mut results = Vec::new();
        for request in requests {
            results.extend(self.ban(request).await);
        }
        results
    }

    async fn send_admin(
        &mut self,
        host: &Host,
        admin: &AdminEndpoint,
        request: &BanRequest,
    ) -> DispatchResult {
        let expression =
            build_ban_expression(host, &self.sites, &request.query, request.is_full_query);

        // A line break would end the command early and smuggle in another one.
        if !is_single_line(&expression) {
            let result = DispatchResult::from(DispatchError::general(format!(
                "Ban error: expression for '{}' must be a single line",
                host.id
            )))
            .with_data("expression", expression);
            error!(host_id = %host.id, message = %result.message, "ban refused");
            return result;
        }

        if self.log_all {
            info!(
                host_id = %host.id,
                admin_ip = %admin.ip,
                expression = %expression,
                "adding ban"
            );
        } else {
            debug!(
                host_id = %host.id,
                admin_ip = %admin.ip,
                expression = %expression,
                "adding ban"
            );
        }

        let reply = match self.session_for(admin).await {
            Ok(session) => session.add_ban(&escape_for_admin(&expression)).await,
            Err(err) => Err(err),
        };
        if !matches!(reply, Ok(Some(_))) {
            // A session that went silent or failed mid-command is not reused.
            self.sessions.remove(&admin.ip);
        }

        let result = match reply {
            Ok(Some(BanReply::Added)) => {
                DispatchResult::ok(format!("BAN \"{expression}\" added successfully"))
            }
            Ok(Some(BanReply::Rejected { code, messages })) => {
                DispatchResult::from(DispatchError::Protocol { code, messages })
            }
            Ok(None) => DispatchResult::from(DispatchError::general(format!(
                "Ban error: could not send to '{}'",
                admin.ip
            ))),
            Err(err) => DispatchResult::from(DispatchError::general(format!("Ban error: {err}"))),
        }
        .with_data("expression", expression);

        if !result.is_ok() {
            error!(
                host_id = %host.id,
                admin_ip = %admin.ip,
                code = result.code,
                message = %result.message,
                "ban failed"
            );
        }
        result
    }

    async fn session_for(
        &mut self,
        admin: &AdminEndpoint,
    ) -> Result<&mut Box<dyn AdminSession>, AdminError> {
        if !self.sessions.contains_key(&admin.ip) {
            let session = self.transport.connect(admin).await?;
            self.sessions.insert(admin.ip.clone(), session);
        }
        self.sessions
            .get_mut(&admin.ip)
            .ok_or_else(|| AdminError::Protocol(format!("no session for {}", admin.ip)))
    }
}

/// Ban list of one admin-capable host, or why it could not be read.
#[derive(Debug, Clone)]
pub struct HostBanList {
    pub host_id: HostId,
    pub host_name: String,
    pub entries: Result<Vec<BanListEntry>, String>,
}

/// Read the ban list of every admin-capable host matching `filter`.
pub async fn read_ban_lists(
    registry: &HostRegistry,
    transport: &dyn AdminTransport,
    filter: Option<&HostId>,
) -> Vec<HostBanList> {
    let mut lists = Vec::new();
    for host in registry.matching(filter) {
        let Some(admin) = host.admin.as_ref() else {
            continue;
        };

        let entries = match transport.connect(admin).await {
            Ok(mut session) => session.ban_list().await,
            Err(err) => Err(err),
        }
        .map_err(|err| {
            warn!(host_id = %host.id, error = %err, "could not read ban list");
            err.to_string()
        });

        lists.push(HostBanList {
            host_id: host.id.clone(),
            host_name: host.host_name.clone(),
            entries,
        });
    }
    lists
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::domain::hosts::{HostDefinition, HostUrls, SiteLayout};

    #[derive(Default)]
    struct Recorder {
        connects: Mutex<Vec<String>>,
        bans: Arc<Mutex<Vec<String>>>,
        refuse_first_connects: Mutex<usize>,
    }

    struct RecordingSession {
        bans: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AdminSession for RecordingSession {
        async fn add_ban(&mut self, expression: &str) -> Result<Option<BanReply>, AdminError> {
            self.bans.lock().unwrap().push(expression.to_string());
            if expression.contains("silent") {
                return Ok(None);
            }
            if expression.contains("bad") {
                return Ok(Some(BanReply::Rejected {
                    code: 106,
                    messages: vec!["Syntax error".to_string()],
                }));
            }
            Ok(Some(BanReply::Added))
        }

        async fn ban_list(&mut self) -> Result<Vec<BanListEntry>, AdminError> {
            Ok(vec![BanListEntry {
                time: "1700000000.000000".to_string(),
                refs: 1,
                completed: false,
                spec: "req.url ~ .".to_string(),
            }])
        }
    }

    #[async_trait]
    impl AdminTransport for Recorder {
        async fn connect(
            &self,
            endpoint: &AdminEndpoint,
        ) -> Result<Box<dyn AdminSession>, AdminError> {
            self.connects.lock().unwrap().push(endpoint.ip.clone());
            let mut refusals = self.refuse_first_connects.lock().unwrap();
            if *refusals > 0 {
                *refusals -= 1;
                return Err(AdminError::Connect {
                    address: format!("{}:{}", endpoint.ip, endpoint.port),
                    message: "connection refused".to_string(),
                });
            }
            Ok(Box::new(RecordingSession {
                bans: self.bans.clone(),
            }))
        }
    }

    fn layout() -> SiteLayout {
        SiteLayout {
            sites: vec![LocaleId::new("en")],
            default_site_url: "https://example.com".to_string(),
        }
    }

    fn varnish(id: &str, admin: bool) -> HostDefinition {
        HostDefinition {
            id: HostId::new(id),
            host_name: "cache1".to_string(),
            urls: HostUrls::PerLocale(BTreeMap::from([(
                LocaleId::new("en"),
                "https://example.com".to_string(),
            )])),
            admin_ip: admin.then(|| "10.0.0.1".to_string()),
            admin_port: admin.then_some(6082),
            admin_secret: admin.then(|| "secret".to_string()),
        }
    }

    fn dispatcher(
        definitions: Vec<HostDefinition>,
        transport: Arc<Recorder>,
    ) -> BanDispatcher {
        BanDispatcher::new(
            Arc::new(HostRegistry::new(definitions, &layout())),
            transport,
            vec![LocaleId::new("en"), LocaleId::new("de")],
        )
    }

    #[test]
    fn templating_prefixes_url_patterns() {
        let registry = HostRegistry::new(vec![varnish("varnish1", true)], &layout());
        let host = registry.get(&HostId::new("varnish1")).expect("host");

        assert_eq!(
            build_ban_expression(host, &[LocaleId::new("en")], ".*\\.jpg$", false),
            "req.http.host == cache1 && req.url ~ .*\\.jpg$"
        );
    }

    #[test]
    fn templating_substitutes_known_base_urls_only() {
        let registry = HostRegistry::new(vec![varnish("varnish1", true)], &layout());
        let host = registry.get(&HostId::new("varnish1")).expect("host");
        let sites = [LocaleId::new("en"), LocaleId::new("de")];

        let expression = build_ban_expression(
            host,
            &sites,
            "obj.http.x-url ~ ${baseUrl-en} || obj.http.x-url ~ ${baseUrl-de}",
            true,
        );
        assert_eq!(
            expression,
            "obj.http.x-url ~ https://example.com || obj.http.x-url ~ ${baseUrl-de}"
        );
    }

    #[test]
    fn escaping_doubles_backslashes() {
        assert_eq!(escape_for_admin(".*\\.pdf"), ".*\\\\.pdf");
    }

    #[tokio::test]
    async fn admin_ban_reports_expression() {
        let transport = Arc::new(Recorder::default());
        let mut dispatcher = dispatcher(vec![varnish("varnish1", true)], transport.clone());

        let results = dispatcher
            .ban(&BanRequest::new(
                ".*\\.pdf",
                false,
                Some(HostId::new("varnish1")),
            ))
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert!(
            results[0]
                .message
                .contains("req.http.host == cache1 && req.url ~ .*\\.pdf")
        );
        assert_eq!(
            transport.bans.lock().unwrap().as_slice(),
            ["req.http.host == cache1 && req.url ~ .*\\\\.pdf"]
        );
    }

    #[tokio::test]
    async fn host_without_admin_credentials_is_unsupported() {
        let transport = Arc::new(Recorder::default());
        let mut dispatcher = dispatcher(vec![varnish("www", false)], transport.clone());

        let results = dispatcher.ban(&BanRequest::new("^/", false, None)).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, DispatchResult::ERROR_GENERAL);
        assert!(results[0].message.contains("not yet supported"));
        assert!(transport.connects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replies_map_to_results() {
        let transport = Arc::new(Recorder::default());
        let mut dispatcher = dispatcher(vec![varnish("varnish1", true)], transport);

        let rejected = dispatcher.ban(&BanRequest::new("bad", true, None)).await;
        assert_eq!(rejected[0].code, 106);
        assert_eq!(rejected[0].message, "Ban error: 106 - 'Syntax error'");

        let silent = dispatcher.ban(&BanRequest::new("silent", true, None)).await;
        assert_eq!(silent[0].code, DispatchResult::ERROR_GENERAL);
        assert_eq!(silent[0].message, "Ban error: could not send to '10.0.0.1'");
    }

    #[tokio::test]
    async fn sessions_are_reused_and_failed_connects_retried() {
        let transport = Arc::new(Recorder::default());
        *transport.refuse_first_connects.lock().unwrap() = 1;
        let mut dispatcher = dispatcher(vec![varnish("varnish1", true)], transport.clone());

        let requests = [
            BanRequest::new("^/a", false, None),
            BanRequest::new("^/b", false, None),
            BanRequest::new("^/c", false, None),
        ];
        let results = dispatcher.ban_all(&requests).await;

        assert_eq!(results[0].code, DispatchResult::ERROR_GENERAL);
        assert!(results[0].message.starts_with("Ban error: could not connect"));
        assert!(results[1].is_ok());
        assert!(results[2].is_ok());
        // One refused connect, one successful connect reused for the last ban.
        assert_eq!(transport.connects.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn silent_session_is_dropped_and_reconnected() {
        let transport = Arc::new(Recorder::default());
        let mut dispatcher = dispatcher(vec![varnish("varnish1", true)], transport.clone());

        let requests = [
            BanRequest::new("silent", true, None),
            BanRequest::new("req.url ~ ^/b", true, None),
            BanRequest::new("req.url ~ ^/c", true, None),
        ];
        let results = dispatcher.ban_all(&requests).await;

        assert_eq!(results[0].code, DispatchResult::ERROR_GENERAL);
        assert!(results[1].is_ok());
        assert!(results[2].is_ok());
        // The unanswered session is replaced once, then reused.
        assert_eq!(transport.connects.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn multi_line_expressions_are_never_sent() {
        let transport = Arc::new(Recorder::default());
        let mut dispatcher = dispatcher(vec![varnish("varnish1", true)], transport.clone());

        let results = dispatcher
            .ban_all(&[
                BanRequest::new("req.url ~ a\nban.list", true, None),
                BanRequest::new("req.url ~ b\r", true, None),
                BanRequest::new("req.url ~ c", true, None),
            ])
            .await;

        assert_eq!(results[0].code, DispatchResult::ERROR_GENERAL);
        assert!(results[0].message.contains("single line"));
        assert_eq!(results[1].code, DispatchResult::ERROR_GENERAL);
        assert!(results[2].is_ok());
        assert_eq!(transport.bans.lock().unwrap().as_slice(), ["req.url ~ c"]);
    }

    #[test]
    fn single_line_check_rejects_breaks() {
        assert!(is_single_line("req.url ~ ^/a"));
        assert!(!is_single_line("req.url ~ a\nban.list"));
        assert!(!is_single_line("req.url ~ a\r"));
    }

    #[tokio::test]
    async fn ban_lists_cover_admin_hosts_only() {
        let transport = Arc::new(Recorder::default());
        let registry = HostRegistry::new(
            vec![varnish("varnish1", true), varnish("www", false)],
            &layout(),
        );

        let lists = read_ban_lists(&registry, transport.as_ref(), None).await;
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].host_id, HostId::new("varnish1"));
        assert_eq!(lists[0].entries.as_ref().map(Vec::len), Ok(1));
    }
}
