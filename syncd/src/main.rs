// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use syncd::adapters::cli;
use syncd::config::{self, ConfigReport};
use syncd::daemon::{Daemon, Integration};
use syncd::logging;

fn log_config_report(report: &ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => tracing::info!(
            "config path: {} (source={}, present={})",
            path.display(),
            source.as_str(),
            report.config_file_present
        ),
        (Some(path), None) => tracing::info!(
            "config path: {} (present={})",
            path.display(),
            report.config_file_present
        ),
        (None, _) => tracing::info!("config path: (none)"),
    }
    tracing::info!(
        "config database_path: {} (source={})",
        report.database_path.value.display(),
        report.database_path.source.as_str()
    );
    tracing::info!(
        "config provider_id: {} (source={})",
        report.provider_id.value,
        report.provider_id.source.as_str()
    );
    tracing::info!(
        "config orchestrator_url: {} (source={})",
        report.orchestrator_url.value,
        report.orchestrator_url.source.as_str()
    );
    tracing::info!(
        "config reconcile_interval_secs: {} (source={})",
        report.reconcile_interval_secs.value,
        report.reconcile_interval_secs.source.as_str()
    );
    tracing::info!(
        "config launch_user_instances: {} (source={})",
        report.launch_user_instances.value,
        report.launch_user_instances.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli::ParsedOpts {
        opts,
        verbose_override,
    } = cli::parse_opts();
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            database_path: opts.database_path,
            reconcile_interval_secs: opts.reconcile_interval_secs,
            verbose: verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let cancel = CancellationToken::new();
    let daemon = Daemon::start(&config, Integration::default(), cancel.clone()).await?;
    tracing::info!("syncd running for provider {}", config.provider_id);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    cancel.cancel();
    daemon.wait().await;
    Ok(())
}
