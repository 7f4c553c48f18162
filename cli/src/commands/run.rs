// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `policy-host run` - wire the Azure adapters into a [`Host`] and run it
//! until the process is asked to stop.

use anyhow::{Context, Result};
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use policy_host_core::application::metrics::register_metrics;
use policy_host_core::application::{Host, HostComponents};
use policy_host_core::config::HostConfig;
use policy_host_core::credentials::AccessTokenProvider;
use policy_host_core::infrastructure::policy_loader::load_alias_table;
use policy_host_core::infrastructure::{
    create_blob_store, AzureQueueClient, CommandPolicyRunner, EventGridSubscription,
    ManagedIdentityTokenProvider, StaticTokenProvider,
};

pub async fn execute(metrics_listen: Option<SocketAddr>) -> Result<()> {
    let config = match HostConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Configuration error:".red().bold(), e);
            return Err(e).context("Invalid host configuration");
        }
    };

    if let Some(addr) = metrics_listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("Failed to start metrics listener on {}", addr))?;
        info!(%addr, "Serving Prometheus metrics");
    }
    register_metrics();

    let host = build_host(config)?;

    info!(
        policy_storage = %host.config().policy_storage,
        queue = %host.config().queue_name,
        scratch_dir = %host.scratch_dir().display(),
        "Starting policy host"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    host.run(shutdown).await.context("Policy host stopped with an error")?;

    info!("Policy host stopped");
    Ok(())
}

/// Construct the production adapters and the host from `config`
pub fn build_host(config: HostConfig) -> Result<Host> {
    let aliases = load_alias_table(config.aliases_file.as_deref())
        .context("Failed to load operation aliases")?;

    let credentials: Arc<dyn AccessTokenProvider> = match &config.access_token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        None => Arc::new(
            ManagedIdentityTokenProvider::new()
                .context("Failed to create managed identity credentials")?,
        ),
    };

    let blob_store =
        create_blob_store(&config.policy_storage).context("Invalid POLICY_STORAGE")?;

    let queue = Arc::new(
        AzureQueueClient::from_storage_account(
            &config.queue_storage,
            &config.queue_name,
            credentials.clone(),
        )
        .context("Failed to create queue client")?,
    );

    let subscription = Arc::new(
        EventGridSubscription::new(
            config.queue_storage.clone(),
            config.queue_name.clone(),
            credentials,
        )
        .context("Failed to create Event Grid client")?,
    );

    let run_options = config
        .run_options()
        .context("Failed to prepare runner options")?;
    let runner = Arc::new(
        CommandPolicyRunner::new(config.runner_command.clone(), run_options)
            .with_timeout(config.run_timeout),
    );

    let host = Host::new(
        config,
        HostComponents {
            blob_store,
            queue,
            subscription,
            runner,
            aliases,
        },
    )
    .context("Failed to create policy host")?;

    Ok(host)
}

/// Resolve once SIGINT or SIGTERM arrives
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
