use std::{process, sync::Arc};

use sluice::{
    application::{
        bindings::BindingEvaluator,
        dispatch::{AdminTransport, DispatchResult, PurgeDispatcher},
        error::AppError,
        fanout::HostFanout,
        jobs::{InlineJobQueue, JobQueue, JobWorkerContext},
        repos::{BindingsRepo, UriTrackingRepo},
        resolver::{ResolverSettings, UriResolver, normalize_uri_map},
        service::{InvalidationService, ServiceSettings},
    },
    config,
    domain::{hosts::HostRegistry, types::HostId},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiState},
        jobs::{ApalisJobQueue, spawn_job_monitor},
        memory::InMemoryRepositories,
        purge_http::ReqwestPurgeTransport,
        telemetry,
        varnish::VarnishCliTransport,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Purge(args) => run_purge(settings, args).await,
        config::Command::Ban(args) => run_ban(settings, args).await,
        config::Command::Bans(args) => run_bans(settings, args).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let workers = build_worker_context(&settings)?;
    let repositories = init_repositories(&settings).await?;

    let (service, monitor_handle) = match repositories.clone() {
        Some(repositories) => {
            let queue: Arc<dyn JobQueue> = Arc::new(ApalisJobQueue::new(repositories.clone()));
            let service = build_service(
                &settings,
                repositories.clone(),
                repositories.clone(),
                queue,
                workers.clone(),
            );
            let handle = spawn_job_monitor(repositories, workers, &settings.jobs);
            (service, Some(handle))
        }
        None => {
            warn!("no database configured; using in-memory stores and inline jobs");
            let store = Arc::new(InMemoryRepositories::new());
            let queue: Arc<dyn JobQueue> = Arc::new(InlineJobQueue::new(workers.clone()));
            let service = build_service(&settings, store.clone(), store, queue, workers);
            (service, None)
        }
    };

    let api_state = ApiState {
        service: Arc::new(service),
        db: repositories,
        api_token: settings.server.api_token.as_deref().map(Arc::from),
    };

    let result = serve_http(&settings, api_state).await;

    if let Some(handle) = monitor_handle {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_purge(settings: config::Settings, args: config::PurgeArgs) -> Result<(), AppError> {
    let service = build_standalone_service(&settings)?;
    let results = service.purge_uri(&args.uri, host_arg(args.host)).await;
    report_results(&results)
}

async fn run_ban(settings: config::Settings, args: config::BanArgs) -> Result<(), AppError> {
    let service = build_standalone_service(&settings)?;
    let results = service
        .ban_query(&args.query, args.full, host_arg(args.host))
        .await?;
    report_results(&results)
}

async fn run_bans(settings: config::Settings, args: config::BansArgs) -> Result<(), AppError> {
    let service = build_standalone_service(&settings)?;
    let host = host_arg(args.host);
    let lists = service.ban_lists(host.as_ref()).await;

    if lists.is_empty() {
        println!("no admin-capable hosts configured");
        return Ok(());
    }

    let mut failed = 0usize;
    for list in &lists {
        println!("{} ({})", list.host_id, list.host_name);
        match &list.entries {
            Ok(entries) => {
                for entry in entries {
                    let flag = if entry.completed { "C" } else { "-" };
                    println!("  {} {:>5} {}  {}", entry.time, entry.refs, flag, entry.spec);
                }
            }
            Err(message) => {
                failed += 1;
                println!("  error: {message}");
            }
        }
    }

    if failed > 0 {
        return Err(AppError::unexpected(format!(
            "{failed} of {} hosts could not be read",
            lists.len()
        )));
    }
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    if init_repositories(&settings).await?.is_none() {
        return Err(InfraError::configuration("database url is not configured").into());
    }
    info!("migrations applied");
    Ok(())
}

fn report_results(results: &[DispatchResult]) -> Result<(), AppError> {
    for result in results {
        println!("{result}");
    }

    let failed = results.iter().filter(|result| !result.is_ok()).count();
    if failed > 0 {
        return Err(AppError::unexpected(format!(
            "{failed} of {} dispatches failed",
            results.len()
        )));
    }
    Ok(())
}

fn host_arg(host: Option<String>) -> Option<HostId> {
    host.filter(|host| !host.trim().is_empty()).map(HostId::new)
}

/// Connect and migrate when a database URL is configured.
async fn init_repositories(
    settings: &config::Settings,
) -> Result<Option<Arc<PostgresRepositories>>, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        return Ok(None);
    };

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool).await?;

    Ok(Some(Arc::new(PostgresRepositories::new(pool))))
}

fn build_worker_context(settings: &config::Settings) -> Result<JobWorkerContext, AppError> {
    let invalidation = &settings.invalidation;
    let registry = Arc::new(HostRegistry::new(
        settings.hosts.clone(),
        &invalidation.site_layout(),
    ));
    if registry.is_empty() {
        warn!("no cache hosts configured; purges and bans will do nothing");
    }

    let fanout = Arc::new(HostFanout::new(registry, invalidation.add_trailing_slashes));
    let transport = ReqwestPurgeTransport::new(invalidation.purge_timeout)?;
    let purger = PurgeDispatcher::new(Arc::new(transport))
        .with_concurrency(invalidation.purge_concurrency.get() as usize)
        .with_log_all(invalidation.log_all);
    let admin: Arc<dyn AdminTransport> =
        Arc::new(VarnishCliTransport::new(invalidation.admin_connect_timeout));

    Ok(JobWorkerContext {
        fanout,
        purger,
        admin,
        sites: invalidation.sites.clone(),
        log_all: invalidation.log_all,
    })
}

fn build_service(
    settings: &config::Settings,
    bindings: Arc<dyn BindingsRepo>,
    tracking: Arc<dyn UriTrackingRepo>,
    queue: Arc<dyn JobQueue>,
    workers: JobWorkerContext,
) -> InvalidationService {
    let invalidation = &settings.invalidation;
    let resolver = UriResolver::new(
        ResolverSettings {
            sites: invalidation.sites.clone(),
            respect_item_locale: invalidation.respect_item_locale,
            purge_uri_map: normalize_uri_map(invalidation.purge_uri_map.clone()),
        },
        BindingEvaluator::new(bindings.clone()),
        tracking.clone(),
    );

    InvalidationService::new(
        ServiceSettings {
            purge_enabled: invalidation.purge_enabled,
            purge_related: invalidation.purge_related,
            bans_supported: invalidation.bans_supported,
        },
        resolver,
        bindings,
        tracking,
        queue,
        workers,
    )
}

/// Service for one-shot commands: manual dispatch needs no stores.
fn build_standalone_service(settings: &config::Settings) -> Result<InvalidationService, AppError> {
    let workers = build_worker_context(settings)?;
    let store = Arc::new(InMemoryRepositories::new());
    let queue: Arc<dyn JobQueue> = Arc::new(InlineJobQueue::new(workers.clone()));
    Ok(build_service(settings, store.clone(), store, queue, workers))
}

async fn serve_http(settings: &config::Settings, api_state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(api_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "listening");

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
