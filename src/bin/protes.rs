use anyhow::Result;
use protes::{
    config::{Config, QueueAdapterType, TaskStoreType},
    forwarding::{ForwardingSettings, TaskRuns},
    http::{context::WebContext, server::build_router},
    middleware::{
        MiddlewarePipeline, MiddlewareRegistry,
        resolver::{DnsHostResolver, HttpGeoLocator},
    },
    queue_adapter::{MpscQueueAdapter, QueueAdapter, RedisQueueAdapter},
    service_info::ServiceInfoManager,
    storage::{
        InMemoryServiceInfoStore, InMemoryTaskStore, RedisTaskStore, TaskStore, create_redis_pool,
    },
    tasks::{TrackerRegistry, TrackerTask, TrackingJob, spawn_cancellable_task},
};
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let version = protes::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "protes=info,tower_http=info".into()),
    );

    // Configure output format based on environment
    let fmt_layer = if std::env::var("JSON_LOGS").is_ok_and(|v| v != "false") {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let config = Config::new()?;
    tracing::info!(
        version = %version,
        backends = config.tes.service_list.len(),
        "Starting protes"
    );

    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(config.user_agent.clone())
        .timeout(*config.http_client_timeout.as_ref())
        .build()?;

    let registry = MiddlewareRegistry::with_builtin(
        config.tes.service_list.clone(),
        Arc::new(DnsHostResolver::default()),
        Arc::new(HttpGeoLocator::new(
            http_client.clone(),
            config.middlewares.geolocation_base_url.clone(),
        )),
    );
    let pipeline = MiddlewarePipeline::from_config(&config.middlewares, &registry)?;
    tracing::info!(slots = ?pipeline.describe(), "Middleware pipeline ready");

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let redis_pool = match &config.storage.redis_url {
        Some(redis_url) => {
            let pool = create_redis_pool(redis_url)?;
            tracing::info!("Redis pool created successfully");
            Some(pool)
        }
        None => {
            tracing::info!("Redis not configured");
            None
        }
    };

    let task_store: Arc<dyn TaskStore> = match (config.storage.task_store, &redis_pool) {
        (TaskStoreType::Redis, Some(pool)) => {
            tracing::info!(prefix = %config.storage.redis_key_prefix, "Using Redis task store");
            Arc::new(RedisTaskStore::new(
                pool.clone(),
                config.storage.redis_key_prefix.clone(),
            ))
        }
        _ => {
            tracing::info!("Using in-memory task store");
            Arc::new(InMemoryTaskStore::new())
        }
    };

    let tracking_queue: Arc<dyn QueueAdapter<TrackingJob>> =
        match (config.storage.queue_adapter, &redis_pool) {
            (QueueAdapterType::Redis, Some(pool)) => {
                let queue = RedisQueueAdapter::<TrackingJob>::new(
                    pool.clone(),
                    config.storage.redis_worker_id.clone(),
                    Some(config.storage.redis_queue_prefix.clone()),
                );
                let recovered = queue.recover_worker_queue().await?;
                tracing::info!(
                    worker_id = %queue.worker_id(),
                    recovered,
                    "Using Redis tracking queue"
                );
                Arc::new(queue)
            }
            _ => {
                tracing::info!(buffer = config.polling.queue_size, "Using MPSC tracking queue");
                Arc::new(MpscQueueAdapter::<TrackingJob>::new(config.polling.queue_size))
            }
        };
    let tracker_registry = TrackerRegistry::new(token.clone());

    let service_info = ServiceInfoManager::new(
        Arc::new(InMemoryServiceInfoStore::new()),
        config.service_info.clone(),
    );
    service_info.sync().await?;

    let task_runs = TaskRuns::new(
        task_store.clone(),
        pipeline,
        tracking_queue.clone(),
        tracker_registry.clone(),
        http_client.clone(),
        ForwardingSettings::from_config(&config),
    );

    let web_context = WebContext::new(config.clone(), task_runs, service_info, http_client.clone());

    // Start the tracker pool
    {
        let tracker_task = TrackerTask::new(
            tracking_queue,
            task_store,
            tracker_registry,
            http_client,
            config.polling.clone(),
            *config.http_client_timeout.as_ref(),
            token.clone(),
        );
        spawn_cancellable_task(&tracker, token.clone(), "tracker_pool", move |_| {
            tracker_task.run()
        });
    }

    let router = build_router(web_context);
    let port = *config.http_port.as_ref();

    // Setup signal handler
    {
        let signal_tracker = tracker.clone();
        let signal_token = token.clone();

        tracing::info!("Starting signal handler task");
        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = signal::ctrl_c().await {
                    tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                () = signal_token.cancelled() => {
                    tracing::info!("Signal handler task shutting down gracefully");
                },
                _ = terminate => {
                    tracing::info!("Received SIGTERM signal, initiating shutdown");
                },
                _ = ctrl_c => {
                    tracing::info!("Received Ctrl+C signal, initiating shutdown");
                },
            }

            signal_tracker.close();
            signal_token.cancel();
            tracing::info!("Signal handler task completed");
        });
    }

    // Start HTTP server
    spawn_cancellable_task(&tracker, token.clone(), "http_server", move |cancel_token| {
        let version = version.clone();

        async move {
            let listener = TcpListener::bind(format!("0.0.0.0:{}", port))
                .await
                .map_err(|e| anyhow::anyhow!("Failed to bind to port {}: {}", port, e))?;

            tracing::info!(port = port, version = %version, "HTTP server listening");

            let shutdown_token = cancel_token.clone();
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                })
                .await
                .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

            Ok(())
        }
    });

    tracing::info!("Waiting for all tasks to complete...");
    tracker.wait().await;

    tracing::info!("All tasks completed, application shutting down");
    Ok(())
}
