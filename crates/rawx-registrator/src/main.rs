#![warn(missing_docs)]

//! `blob-registrator` entry point.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use rawx_registrator::cli::Cli;
use rawx_registrator::source::read_service_id;
use rawx_registrator::{
    logging, ProgressReporter, ProxyMetadataClient, ReconciliationEngine, RegistratorConfig, ScanContext,
    VolumeChunkSource, VolumeLock,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    logging::init_logging(&config.log)?;

    let root = logging::root_span(&config.log);
    let result = run(cli, config).instrument(root.clone()).await;
    if let Err(err) = &result {
        error!(parent: &root, error = %format!("{err:#}"), "blob registrator failed");
    }
    result
}

fn resolve_service_id(config: &RegistratorConfig, volume: &Path) -> Result<String> {
    if let Some(id) = &config.service_id {
        return Ok(id.clone());
    }
    read_service_id(volume)
        .with_context(|| format!("cannot read the service address of {}", volume.display()))?
        .ok_or_else(|| {
            anyhow!(
                "{} carries no rawx service address, pass --service-id",
                volume.display()
            )
        })
}

async fn run(cli: Cli, config: RegistratorConfig) -> Result<()> {
    let volume = cli.volume.clone();
    if !volume.is_dir() {
        bail!("volume {} is not a directory", volume.display());
    }

    let service_id = resolve_service_id(&config, &volume)?;
    let mode = cli.mode(&config);
    let ctx = Arc::new(ScanContext::new(cli.namespace.clone(), volume.clone(), service_id));

    info!(
        parent: ctx.span(),
        %mode,
        proxy = %config.proxy_url,
        lock = config.lock,
        report_interval_secs = config.report_interval_secs,
        "blob registrator starting"
    );

    // Held until the end of this function, past the final summary.
    let _lock = if config.lock {
        Some(VolumeLock::acquire(&volume)?)
    } else {
        None
    };

    let client = ProxyMetadataClient::new(&ctx, &config.proxy_url, config.request_timeout())?;
    let engine = ReconciliationEngine::new(Arc::clone(&ctx), Arc::new(client), config.engine_config(mode));
    let source = VolumeChunkSource::new(volume).resume_after(cli.resume_after.clone());

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(shutdown_signal(cancel.clone()));

    let reporter_stop = CancellationToken::new();
    let reporter = ProgressReporter::new(engine.state(), config.report_interval());
    let reporter_handle = reporter.spawn(reporter_stop.clone(), ctx.span().clone());

    let result = engine.run(&source, cancel).await;

    reporter_stop.cancel();
    if let Err(err) = reporter_handle.await {
        warn!(parent: ctx.span(), error = %err, "progress reporter aborted");
    }
    signals.abort();

    let summary = result?;
    let label = if summary.cancelled { "interrupted" } else { "summary" };
    ProgressReporter::log_snapshot(&summary.snapshot, label);
    if summary.cancelled {
        if let Some(marker) = &summary.snapshot.checkpoint {
            info!(parent: ctx.span(), resume_after = %marker.display(), "rerun with --resume-after to continue");
        }
    }
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
    warn!("stop requested, finishing in-flight chunks");
    cancel.cancel();
}
