//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    BanArgs, BansArgs, CliArgs, Command, DatabaseOverride, MigrateArgs, PurgeArgs, ServeArgs,
    ServeOverrides,
};

use std::{
    collections::{BTreeMap, BTreeSet},
    net::SocketAddr,
    num::NonZeroU32,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::hosts::{HostDefinition, HostUrls, SiteLayout};
use crate::domain::types::{HostId, LocaleId};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "sluice";
const ENV_PREFIX: &str = "SLUICE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3300;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_JOB_PURGE_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_BAN_CONCURRENCY: u32 = 1;
const DEFAULT_SITE: &str = "default";
const DEFAULT_SITE_URL: &str = "http://localhost";
const DEFAULT_ADMIN_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_PURGE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PURGE_CONCURRENCY: u32 = 1;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub jobs: JobsSettings,
    pub invalidation: InvalidationSettings,
    /// Sorted by host id.
    pub hosts: Vec<HostDefinition>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub purge_concurrency: NonZeroU32,
    pub ban_concurrency: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct InvalidationSettings {
    pub sites: Vec<LocaleId>,
    pub default_site_url: String,
    pub add_trailing_slashes: bool,
    pub purge_enabled: bool,
    pub purge_related: bool,
    pub bans_supported: bool,
    pub log_all: bool,
    pub respect_item_locale: bool,
    pub admin_connect_timeout: Duration,
    pub purge_timeout: Duration,
    pub purge_concurrency: NonZeroU32,
    pub purge_uri_map: BTreeMap<String, Vec<String>>,
}

impl InvalidationSettings {
    pub fn site_layout(&self) -> SiteLayout {
        SiteLayout {
            sites: self.sites.clone(),
            default_site_url: self.default_site_url.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        Some(Command::Purge(_) | Command::Ban(_) | Command::Bans(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    jobs: RawJobsSettings,
    invalidation: RawInvalidationSettings,
    hosts: BTreeMap<String, RawHostSettings>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(value) = overrides.jobs_purge_concurrency {
            self.jobs.purge_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_ban_concurrency {
            self.jobs.ban_concurrency = Some(value);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            jobs,
            invalidation,
            hosts,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let jobs = build_jobs_settings(jobs)?;
        let invalidation = build_invalidation_settings(invalidation)?;
        let hosts = build_host_definitions(hosts)?;

        Ok(Self {
            server,
            logging,
            database,
            jobs,
            invalidation,
            hosts,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;
    let api_token = non_blank(server.api_token);

    Ok(ServerSettings { addr, api_token })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        max_connections: non_zero_u32(max_connections.into(), "database.max_connections")?,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let purge = jobs
        .purge_concurrency
        .unwrap_or(DEFAULT_JOB_PURGE_CONCURRENCY);
    let ban = jobs.ban_concurrency.unwrap_or(DEFAULT_JOB_BAN_CONCURRENCY);

    Ok(JobsSettings {
        purge_concurrency: non_zero_u32(purge.into(), "jobs.purge_concurrency")?,
        ban_concurrency: non_zero_u32(ban.into(), "jobs.ban_concurrency")?,
    })
}

fn build_invalidation_settings(
    raw: RawInvalidationSettings,
) -> Result<InvalidationSettings, LoadError> {
    let mut seen = BTreeSet::new();
    let mut sites = Vec::new();
    for site in raw.sites.unwrap_or_default() {
        let site = site.trim().to_string();
        if site.is_empty() {
            return Err(LoadError::invalid(
                "invalidation.sites",
                "site ids must not be blank",
            ));
        }
        if seen.insert(site.clone()) {
            sites.push(LocaleId::new(site));
        }
    }
    if sites.is_empty() {
        sites.push(LocaleId::new(DEFAULT_SITE));
    }

    let default_site_url =
        non_blank(raw.default_site_url).unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
    validate_base_url(&default_site_url)
        .map_err(|reason| LoadError::invalid("invalidation.default_site_url", reason))?;

    let admin_connect_timeout = positive_seconds(
        raw.admin_connect_timeout_seconds
            .unwrap_or(DEFAULT_ADMIN_CONNECT_TIMEOUT_SECS),
        "invalidation.admin_connect_timeout_seconds",
    )?;
    let purge_timeout = positive_seconds(
        raw.purge_timeout_seconds
            .unwrap_or(DEFAULT_PURGE_TIMEOUT_SECS),
        "invalidation.purge_timeout_seconds",
    )?;
    let purge_concurrency = non_zero_u32(
        raw.purge_concurrency
            .unwrap_or(DEFAULT_PURGE_CONCURRENCY)
            .into(),
        "invalidation.purge_concurrency",
    )?;

    Ok(InvalidationSettings {
        sites,
        default_site_url,
        add_trailing_slashes: raw.add_trailing_slashes.unwrap_or(false),
        purge_enabled: raw.purge_enabled.unwrap_or(true),
        purge_related: raw.purge_related.unwrap_or(false),
        bans_supported: raw.bans_supported.unwrap_or(false),
        log_all: raw.log_all.unwrap_or(false),
        respect_item_locale: raw.respect_item_locale.unwrap_or(false),
        admin_connect_timeout,
        purge_timeout,
        purge_concurrency,
        purge_uri_map: raw.purge_uri_map,
    })
}

fn build_host_definitions(
    hosts: BTreeMap<String, RawHostSettings>,
) -> Result<Vec<HostDefinition>, LoadError> {
    hosts
        .into_iter()
        .map(|(id, host)| build_host_definition(id, host))
        .collect()
}

fn build_host_definition(id: String, host: RawHostSettings) -> Result<HostDefinition, LoadError> {
    let host_name = non_blank(host.host_name).ok_or_else(|| {
        LoadError::invalid("hosts.host_name", format!("host `{id}` has no host_name"))
    })?;

    let urls = match host.urls {
        None => HostUrls::Unset,
        Some(RawHostUrls::Shared(url)) => {
            let url = url.trim().to_string();
            if !url.is_empty() {
                validate_base_url(&url).map_err(|reason| {
                    LoadError::invalid("hosts.urls", format!("host `{id}`: {reason}"))
                })?;
            }
            HostUrls::Shared(url)
        }
        Some(RawHostUrls::PerLocale(map)) => {
            let mut urls = BTreeMap::new();
            for (locale, url) in map {
                let url = url.trim().to_string();
                if url.is_empty() {
                    continue;
                }
                validate_base_url(&url).map_err(|reason| {
                    LoadError::invalid("hosts.urls", format!("host `{id}`, `{locale}`: {reason}"))
                })?;
                urls.insert(LocaleId::new(locale.trim()), url);
            }
            HostUrls::PerLocale(urls)
        }
    };

    Ok(HostDefinition {
        id: HostId::new(id),
        host_name,
        urls,
        admin_ip: non_blank(host.admin_ip),
        admin_port: host.admin_port,
        admin_secret: non_blank(host.admin_secret),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    api_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    purge_concurrency: Option<u32>,
    ban_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidationSettings {
    sites: Option<Vec<String>>,
    default_site_url: Option<String>,
    add_trailing_slashes: Option<bool>,
    purge_enabled: Option<bool>,
    purge_related: Option<bool>,
    bans_supported: Option<bool>,
    log_all: Option<bool>,
    respect_item_locale: Option<bool>,
    admin_connect_timeout_seconds: Option<u64>,
    purge_timeout_seconds: Option<u64>,
    purge_concurrency: Option<u32>,
    purge_uri_map: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHostSettings {
    host_name: Option<String>,
    urls: Option<RawHostUrls>,
    admin_ip: Option<String>,
    admin_port: Option<u16>,
    admin_secret: Option<String>,
}

/// One URL for every site, or a table keyed by site id.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawHostUrls {
    Shared(String),
    PerLocale(BTreeMap<String, String>),
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn validate_base_url(value: &str) -> Result<(), String> {
    let url = Url::parse(value).map_err(|err| format!("invalid url `{value}`: {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme `{other}` in `{value}`")),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
