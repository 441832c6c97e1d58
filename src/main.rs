use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use cache_cascade::{
    application::{
        error::AppError,
        invalidation::{CacheInvalidation, SignalOutcome},
        jobs::{CacheQueueContext, process_cache_queue_job, run_tick},
    },
    cascade::{
        CacheQueue, CacheSignal, FileQueueStore, FlagGate, InvalidatorRegistry, MemoryQueueStore,
        QueueStore, encode_queue, request_scope,
    },
    config::{self, QueueBackend},
    infra::{db::PgQueueStore, error::InfraError, telemetry},
    invalidators::{
        CloudflareInvalidator, ObjectCache, ObjectCacheInvalidator, PageCache,
        PageCacheInvalidator,
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
        .unwrap_or(config::Command::Run(config::RunArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let runtime = build_runtime(&settings).await?;

    match command {
        config::Command::Run(_) => run_scheduler(&settings, runtime).await,
        config::Command::Process => run_process(runtime).await,
        config::Command::Status => run_status(runtime).await,
        config::Command::Clear => run_clear(runtime).await,
        config::Command::Dispatch(args) => run_dispatch(runtime, args.signal).await,
    }
}

/// Everything a command needs, wired once per process.
struct Runtime {
    queue: Arc<CacheQueue>,
    routing: Arc<CacheInvalidation>,
    // Owns the page cache so routing listeners stay attached for the process lifetime.
    _page_cache: Arc<PageCache>,
}

async fn build_runtime(settings: &config::Settings) -> Result<Runtime, AppError> {
    let store = build_store(&settings.queue.backend).await?;

    let object_cache = Arc::new(ObjectCache::new(&settings.object_cache));
    let page_cache = Arc::new(PageCache::new());

    let registry = InvalidatorRegistry::new()
        .with(Arc::new(ObjectCacheInvalidator::new(object_cache)))
        .with(Arc::new(PageCacheInvalidator::new(
            page_cache.clone(),
            &settings.page_cache,
        )))
        .with(Arc::new(CloudflareInvalidator::new(
            settings.cloudflare.clone(),
        )));

    for (slug, available) in &settings.cascade.availability {
        if registry.resolve(slug).is_none() {
            warn!(slug = %slug, "Availability override for unregistered invalidator");
        }
        registry.set_availability_override(slug, Some(*available));
    }

    info!(
        invalidators = ?registry.slugs(),
        key = settings.cascade.queue_key(),
        "Invalidators registered"
    );

    let queue = Arc::new(
        CacheQueue::new(store, Arc::new(registry))
            .with_key(settings.cascade.queue_key())
            .with_gate(FlagGate::new(settings.cascade.should_flag)),
    );

    let routing = Arc::new(CacheInvalidation::new(
        queue.clone(),
        settings.cascade.mode,
    ));
    routing.attach(&page_cache);

    Ok(Runtime {
        queue,
        routing,
        _page_cache: page_cache,
    })
}

async fn build_store(backend: &QueueBackend) -> Result<Arc<dyn QueueStore>, AppError> {
    match backend {
        QueueBackend::Memory => {
            warn!("Using the in-memory queue store; the cascade does not survive restarts");
            Ok(Arc::new(MemoryQueueStore::new()))
        }
        QueueBackend::File { directory } => {
            tokio::fs::create_dir_all(directory)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            info!(directory = %directory.display(), "Using the file queue store");
            Ok(Arc::new(FileQueueStore::new(directory.clone())))
        }
        QueueBackend::Postgres {
            url,
            max_connections,
        } => {
            let pool = PgQueueStore::connect(url, max_connections.get()).await?;
            PgQueueStore::run_migrations(&pool).await?;
            let store = PgQueueStore::new(pool);
            store.health_check().await?;
            info!("Using the postgres queue store");
            Ok(Arc::new(store))
        }
    }
}

async fn run_scheduler(settings: &config::Settings, runtime: Runtime) -> Result<(), AppError> {
    info!(schedule = %settings.scheduler.expression, "Starting cache queue scheduler");

    let context = CacheQueueContext {
        queue: runtime.queue.clone(),
    };
    let worker = WorkerBuilder::new("cache-queue-worker")
        .data(context)
        .backend(CronStream::new(settings.scheduler.schedule.clone()))
        .build_fn(process_cache_queue_job);

    Monitor::new()
        .register(worker)
        .run_with_signal(tokio::signal::ctrl_c())
        .await
        .map_err(|err| AppError::from(InfraError::scheduler(err.to_string())))?;

    info!("Cache queue scheduler stopped");
    Ok(())
}

async fn run_process(runtime: Runtime) -> Result<(), AppError> {
    let outcome = run_tick(&runtime.queue).await;
    info!(outcome = ?outcome, "Tick finished");
    Ok(())
}

async fn run_status(runtime: Runtime) -> Result<(), AppError> {
    let items = runtime.queue.pending().await?;
    let document = serde_json::to_string_pretty(&encode_queue(&items))
        .map_err(|err| AppError::unexpected(format!("failed to render queue: {err}")))?;
    println!("{document}");
    info!(items = items.len(), key = runtime.queue.key(), "Queue status");
    Ok(())
}

async fn run_clear(runtime: Runtime) -> Result<(), AppError> {
    if runtime.queue.clear_all().await {
        Ok(())
    } else {
        Err(AppError::unexpected("failed to clear the queue"))
    }
}

async fn run_dispatch(runtime: Runtime, signal: CacheSignal) -> Result<(), AppError> {
    let (outcome, persisted) = request_scope(async {
        let outcome = runtime.routing.handle(signal).await;
        (outcome, runtime.queue.finish_request().await)
    })
    .await;

    match outcome {
        SignalOutcome::Unrouted => {
            return Err(AppError::validation(format!(
                "signal `{signal}` has no route in {:?} mode",
                runtime.routing.mode()
            )));
        }
        outcome => {
            info!(signal = %signal, outcome = ?outcome, persisted, "Signal dispatched");
        }
    }
    Ok(())
}
