use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the sluice binary.
#[derive(Debug, Parser)]
#[command(
    name = "sluice",
    version,
    about = "Reverse-proxy cache invalidation service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SLUICE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP API and the job workers.
    Serve(Box<ServeArgs>),
    /// Purge one URI on every configured host and locale.
    Purge(PurgeArgs),
    /// Send one ban to every admin-capable host.
    Ban(BanArgs),
    /// Print the ban list of every admin-capable host.
    Bans(BansArgs),
    /// Apply database migrations.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the purge worker concurrency.
    #[arg(long = "jobs-purge-concurrency", value_name = "COUNT")]
    pub jobs_purge_concurrency: Option<u32>,

    /// Override the ban worker concurrency.
    #[arg(long = "jobs-ban-concurrency", value_name = "COUNT")]
    pub jobs_ban_concurrency: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    /// URI to purge, e.g. `/blog/post-1` or `__home__`.
    #[arg(value_name = "URI")]
    pub uri: String,

    /// Only purge on this host id.
    #[arg(long, value_name = "ID")]
    pub host: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct BanArgs {
    /// URL pattern, or a complete ban expression with `--full`.
    #[arg(value_name = "QUERY")]
    pub query: String,

    /// Send `QUERY` as a complete ban expression.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub full: bool,

    /// Only ban on this host id.
    #[arg(long, value_name = "ID")]
    pub host: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct BansArgs {
    /// Only list bans of this host id.
    #[arg(long, value_name = "ID")]
    pub host: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}
