#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use sluice::application::bindings::BindingEvaluator;
use sluice::application::dispatch::{AdminTransport, PurgeDispatcher};
use sluice::application::fanout::HostFanout;
use sluice::application::jobs::{InlineJobQueue, JobQueue, JobWorkerContext};
use sluice::application::resolver::{ResolverSettings, UriResolver};
use sluice::application::service::{InvalidationService, ServiceSettings};
use sluice::domain::hosts::{HostDefinition, HostRegistry, HostUrls, SiteLayout};
use sluice::domain::types::{HostId, LocaleId};
use sluice::infra::memory::InMemoryRepositories;
use sluice::infra::purge_http::ReqwestPurgeTransport;
use sluice::infra::varnish::{VarnishCliTransport, challenge_response};

pub const CHALLENGE: &str = "qwertyuiopasdfghjklzxcvbnmqwerty";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPurge {
    pub method: String,
    pub path: String,
    pub host: String,
}

type Recorded = Arc<Mutex<Vec<RecordedPurge>>>;

/// HTTP server recording every request; `/missing` answers 404.
pub struct PurgeRecorder {
    pub base_url: String,
    requests: Recorded,
}

impl PurgeRecorder {
    pub async fn start() -> Self {
        let requests: Recorded = Arc::default();
        let app = Router::new().fallback(record).with_state(requests.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind recorder");
        let addr = listener.local_addr().expect("recorder addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("recorder serves");
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedPurge> {
        self.requests.lock().expect("recorder lock").clone()
    }
}

async fn record(State(requests): State<Recorded>, request: Request) -> StatusCode {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let path = request.uri().path().to_string();

    requests.lock().expect("recorder lock").push(RecordedPurge {
        method: request.method().to_string(),
        path: path.clone(),
        host,
    });

    if path.ends_with("/missing") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    }
}

/// Admin-socket server speaking the Varnish CLI framing with challenge auth.
/// Bans containing `syntax-error` are rejected with status 106. With
/// `replies_per_connection`, each connection is closed after that many ban replies.
pub struct FakeVarnish {
    pub port: u16,
    bans: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeVarnish {
    pub async fn start(secret: &str) -> Self {
        Self::start_with(secret, None).await
    }

    pub async fn start_with(secret: &str, replies_per_connection: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind admin");
        let port = listener.local_addr().expect("admin addr").port();
        let bans: Arc<Mutex<Vec<String>>> = Arc::default();
        let connections = Arc::new(AtomicUsize::new(0));

        let secret = secret.to_string();
        let accepted_bans = bans.clone();
        let accepted = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let secret = secret.clone();
                let bans = accepted_bans.clone();
                tokio::spawn(async move {
                    let _ = serve_cli(stream, &secret, bans, replies_per_connection).await;
                });
            }
        });

        Self {
            port,
            bans,
            connections,
        }
    }

    pub fn bans(&self) -> Vec<String> {
        self.bans.lock().expect("bans lock").clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn frame(status: u16, body: &str) -> String {
    format!("{status} {:<8}\n{body}\n", body.len())
}

async fn serve_cli(
    stream: TcpStream,
    secret: &str,
    bans: Arc<Mutex<Vec<String>>>,
    replies_per_connection: Option<usize>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write
        .write_all(frame(107, &format!("{CHALLENGE}\n\nAuthentication required.")).as_bytes())
        .await?;

    let Some(auth) = lines.next_line().await? else {
        return Ok(());
    };
    let expected = challenge_response(CHALLENGE, secret);
    if auth.strip_prefix("auth ") != Some(expected.as_str()) {
        write
            .write_all(frame(107, "Authentication failed.").as_bytes())
            .await?;
        return Ok(());
    }
    write.write_all(frame(200, "Welcome").as_bytes()).await?;

    let mut ban_replies = 0;
    while let Some(line) = lines.next_line().await? {
        if replies_per_connection == Some(ban_replies) {
            break;
        }
        let reply = if line == "ban.list" {
            let entries: Vec<String> = bans
                .lock()
                .expect("bans lock")
                .iter()
                .map(|spec| format!("1700000000.000000     0 -  {spec}"))
                .collect();
            frame(200, &format!("Present bans:\n{}", entries.join("\n")))
        } else if let Some(expression) = line.strip_prefix("ban ") {
            ban_replies += 1;
            if expression.contains("syntax-error") {
                frame(106, "Syntax error\nnear syntax-error")
            } else {
                bans.lock()
                    .expect("bans lock")
                    .push(expression.to_string());
                frame(200, "")
            }
        } else {
            frame(101, "Unknown request.")
        };
        write.write_all(reply.as_bytes()).await?;
    }
    Ok(())
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

pub fn locale(id: &str) -> LocaleId {
    LocaleId::new(id)
}

pub fn host(id: &str, host_name: &str, urls: HostUrls) -> HostDefinition {
    HostDefinition {
        id: HostId::new(id),
        host_name: host_name.to_string(),
        urls,
        admin_ip: None,
        admin_port: None,
        admin_secret: None,
    }
}

pub fn with_admin(mut definition: HostDefinition, port: u16, secret: &str) -> HostDefinition {
    definition.admin_ip = Some("127.0.0.1".to_string());
    definition.admin_port = Some(port);
    definition.admin_secret = Some(secret.to_string());
    definition
}

pub fn per_locale(urls: &[(&str, String)]) -> HostUrls {
    HostUrls::PerLocale(
        urls.iter()
            .map(|(site, url)| (locale(site), url.clone()))
            .collect(),
    )
}

pub fn default_settings() -> ServiceSettings {
    ServiceSettings {
        purge_enabled: true,
        purge_related: false,
        bans_supported: true,
    }
}

pub struct Harness {
    pub service: InvalidationService,
    pub store: Arc<InMemoryRepositories>,
}

/// Service wired to the real HTTP and admin-socket transports, in-memory
/// stores and an inline job queue.
pub fn harness(
    hosts: Vec<HostDefinition>,
    sites: &[&str],
    settings: ServiceSettings,
) -> Harness {
    let sites: Vec<LocaleId> = sites.iter().map(|site| locale(site)).collect();
    let registry = Arc::new(HostRegistry::new(
        hosts,
        &SiteLayout {
            sites: sites.clone(),
            default_site_url: "http://localhost".to_string(),
        },
    ));

    let transport = ReqwestPurgeTransport::new(Duration::from_secs(5)).expect("http client");
    let admin: Arc<dyn AdminTransport> =
        Arc::new(VarnishCliTransport::new(Duration::from_secs(2)));
    let workers = JobWorkerContext {
        fanout: Arc::new(HostFanout::new(registry, false)),
        purger: PurgeDispatcher::new(Arc::new(transport)),
        admin,
        sites: sites.clone(),
        log_all: false,
    };

    let store = Arc::new(InMemoryRepositories::new());
    let queue: Arc<dyn JobQueue> = Arc::new(InlineJobQueue::new(workers.clone()));
    let resolver = UriResolver::new(
        ResolverSettings {
            sites,
            respect_item_locale: false,
            purge_uri_map: BTreeMap::new(),
        },
        BindingEvaluator::new(store.clone()),
        store.clone(),
    );

    let service = InvalidationService::new(
        settings,
        resolver,
        store.clone(),
        store.clone(),
        queue,
        workers,
    );

    Harness { service, store }
}
