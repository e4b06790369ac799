//! Onboarding service binary.
//!
//! Connects to Redpanda, answers onboarding operations on the service queue
//! and shuts down gracefully on Ctrl+C or SIGTERM.

use onboarding_rpc_redpanda::RedpandaBroker;
use onboarding_rpc_runtime::metrics::MetricsServer;
use onboarding_service::{
    Backend, Backends, ConsoleMailer, InMemoryOnboardingStore, MailBackend, OnboardingNode,
    ServiceConfig,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "info,onboarding_service=debug,onboarding_rpc_runtime=debug";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting onboarding service");

    let config = ServiceConfig::from_env();
    config.validate()?;
    info!(
        queue = %config.rpc.service_queue,
        employee_service = %config.rpc.employee_service_queue,
        mail_service = %config.rpc.mail_service_queue,
        call_timeout_ms = config.rpc.call_timeout_ms,
        "Configuration loaded"
    );

    // Recorder must be installed before anything records
    if config.metrics.enabled {
        MetricsServer::new(config.metrics.socket_addr()?).serve()?;
    }

    let mut builder = RedpandaBroker::builder()
        .brokers(config.redpanda.brokers.as_str())
        .producer_acks(config.redpanda.producer_acks.as_str())
        .auto_offset_reset(config.redpanda.auto_offset_reset.as_str())
        .buffer_size(config.rpc.dispatch_buffer);
    if let Some(group) = &config.redpanda.consumer_group {
        builder = builder.consumer_group(group.as_str());
    }
    let broker = Arc::new(builder.build()?);

    let store = Arc::new(InMemoryOnboardingStore::new());
    let backends = Backends {
        mailer: match config.rpc.mail_backend.parse::<MailBackend>()? {
            MailBackend::Console => Backend::Local(Arc::new(ConsoleMailer::new())),
            MailBackend::Remote => Backend::Remote,
        },
        directory: Backend::Remote,
        planner: store.clone(),
        board: store,
    };

    let node = OnboardingNode::start(broker, &config.rpc, backends).await?;
    info!(queue = %node.queue(), "Onboarding service ready");

    shutdown_signal().await;

    node.shutdown(config.rpc.shutdown_grace()).await;
    info!("Onboarding service stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down gracefully"),
        () = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}
