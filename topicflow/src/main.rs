use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use topicflow_core::Coordinator;
use topicflow_kafka::KafkaBroker;
use topicflow_processors::{DefaultProcessorProvider, LogDocumentSink, LogMetricSink};

use crate::config::Settings;

mod config;
mod server;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let env_vars: HashMap<String, String> = env::vars().collect();
    let settings = Settings::try_from(env_vars)?;
    info!(
        brokers = ?settings.consumer.brokers,
        consumer_group = %settings.consumer.consumer_group,
        "Starting topicflow"
    );

    let server_token = CancellationToken::new();
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], settings.metrics_port));
    let server_handle = tokio::spawn(server::start_metrics_server(
        metrics_addr,
        server_token.clone(),
    ));

    let broker = KafkaBroker::new(&settings.kafka())?;
    let provider = DefaultProcessorProvider::new(
        Arc::new(LogMetricSink),
        Arc::new(LogDocumentSink),
        settings.aggregation.clone(),
    )?;
    let mut coordinator = Coordinator::new(settings.consumer.clone(), broker, provider);
    coordinator.start().await?;

    tokio::select! {
        _ = shutdown_signal() => {},
        _ = coordinator.cancelled() => warn!("Coordinator stopped on its own"),
    }

    let result = coordinator.stop().await;

    server_token.cancel();
    match server_handle.await {
        Ok(Err(e)) => error!(?e, "Metrics server failed"),
        Err(e) => error!(?e, "Metrics server task failed"),
        Ok(Ok(())) => {}
    }

    result?;
    info!("Gracefully stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!(?e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                error!(?e, "Failed to install terminate signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
