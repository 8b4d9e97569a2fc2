use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gpu_worker::{
    AppConfig, Dispatcher, build_router,
    config::{LogFormat, WorkerMode},
    worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(AppConfig::from_env()?);
    init_tracing(config.log_format);

    tracing::info!(
        device = %config.device,
        cache_dir = %config.model_cache_dir.display(),
        backend = ?config.model_backend,
        "starting gpu worker"
    );
    let dispatcher = Arc::new(Dispatcher::from_config(config.as_ref())?);

    match config.worker_mode {
        WorkerMode::Http => {
            let router = build_router(config.clone(), dispatcher.clone());
            let listener = TcpListener::bind(config.listen_addr).await?;
            let addr = listener.local_addr()?;
            tracing::info!(%addr, "REST server ready");

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        WorkerMode::Queue => {
            tracing::info!("reading jobs from stdin");
            let stdin = BufReader::new(tokio::io::stdin());
            worker::run(dispatcher.as_ref(), stdin, tokio::io::stdout()).await?;
        }
    }

    dispatcher.shutdown().await;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().with_target(false).compact())
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining");
}
