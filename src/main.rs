use anyhow::Context;
use clap::Parser;
use npm_sync::client::NpmClient;
use npm_sync::config::{Settings, SyncConfig};
use npm_sync::reconcile::{PassReport, Reconciler};
use npm_sync::watch::{ConfigWatcher, SyncLoop};
use npm_sync::{PKG_NAME, VERSION};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();

    // RUST_LOG wins over --log-level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("npm_sync={}", settings.log_level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    print_startup_banner(&config);

    let client = NpmClient::new(&config.npm_url, config.request_timeout)
        .context("Failed to create HTTP client")?;
    let reconciler = Reconciler::new(
        client,
        config.credentials.clone(),
        config.source.clone(),
        config.policy,
    );
    let mut run_pass = || reconciler.run_pass();

    let mut sync = SyncLoop::new(config.debounce);
    let report = sync
        .initial_pass(&mut run_pass)
        .await
        .context("Initial synchronization failed")?;

    if let Some(report) = &report {
        if !report.is_clean() {
            warn!(failed = ?report.failed, "Some hosts failed to synchronize");
        }
    }

    if config.once {
        once_outcome(report.as_ref())?;
        info!("Synchronization completed successfully");
        return Ok(());
    }

    let mut watcher = ConfigWatcher::start(&config.source, config.poll_interval)
        .context("Failed to watch desired-state source")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    sync.run(watcher.events(), shutdown_rx, run_pass).await;

    drop(watcher);
    info!(passes = sync.passes(), "Watcher stopped, shutdown complete");
    Ok(())
}

/// A single-pass run only succeeds if a document was found and every host
/// was synchronized.
fn once_outcome(report: Option<&PassReport>) -> anyhow::Result<()> {
    let Some(report) = report else {
        anyhow::bail!("No desired-state document found, nothing was synchronized");
    };

    if !report.is_clean() {
        anyhow::bail!(
            "{} host(s) failed to synchronize: {}",
            report.failed.len(),
            report.failed.join(", ")
        );
    }

    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C will stop the watcher");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), finishing current pass and shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, finishing current pass and shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C, finishing current pass and shutting down...");
    }
}

fn print_startup_banner(config: &SyncConfig) {
    info!(name = PKG_NAME, version = VERSION, "Starting proxy host sync");
    info!(
        npm_url = %config.npm_url,
        identity = %config.credentials.identity,
        source = %config.source.display(),
        "Remote and desired-state source"
    );
    info!(
        once = config.once,
        debounce_ms = config.debounce.as_millis() as u64,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        request_timeout_secs = config.request_timeout.as_secs(),
        "Sync loop settings"
    );
    info!(
        certificate_fallback = config.policy.certificate_fallback,
        continue_on_error = config.policy.continue_on_error,
        "Reconcile policy"
    );
}
