//! `pgfilterproxy serve` - run the proxy until told to stop.

use anyhow::Context;
use pgfilter_audit::AuditLogger;
use pgfilter_core::{FilePolicySource, PolicyStore, ProxyConfig};
use pgfilter_proxy::FilterProxy;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    tracing::info!(config = %config_path.display(), "Loading configuration");

    // Audit settings are read once; everything else comes from the store.
    let config = ProxyConfig::from_path(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let audit = AuditLogger::new(&config.audit).context("Failed to set up audit logging")?;
    let store = policy_store(&config_path, &config)?;

    let policy = store.snapshot();
    tracing::info!(
        listen = %policy.listen_address,
        target = %policy.target_address,
        fingerprints = policy.allowed_fingerprints.len(),
        commands = policy.allowed_commands.len(),
        ignore_unix_timestamps = policy.ignore_unix_timestamps,
        audit = audit.is_enabled(),
        "Starting pgfilter proxy"
    );

    let proxy = Arc::new(FilterProxy::new(store, audit));
    let listener = proxy.bind().await?;

    let mut server = tokio::spawn({
        let proxy = proxy.clone();
        async move { proxy.serve(listener).await }
    });

    tokio::select! {
        result = &mut server => {
            // The accept loop only ends by itself on a fatal listener error.
            result??;
            return Ok(());
        }
        signal = wait_for_shutdown(&proxy) => signal?,
    }

    proxy.shutdown().await;
    server.await??;
    Ok(())
}

/// The initial policy comes from the already parsed `config`; the file is
/// only read again on reload.
fn policy_store(config_path: &Path, config: &ProxyConfig) -> anyhow::Result<Arc<PolicyStore>> {
    let policy = config
        .to_policy()
        .with_context(|| format!("Invalid policy in {}", config_path.display()))?;
    let source = Arc::new(FilePolicySource::new(config_path));
    Ok(Arc::new(PolicyStore::new(policy, source)))
}

/// Reload on SIGHUP until SIGINT or SIGTERM arrives.
#[cfg(unix)]
async fn wait_for_shutdown(proxy: &FilterProxy) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::info!("Received SIGHUP, reloading configuration");
                if proxy.reload_policy().await.is_err() {
                    tracing::warn!("Continuing with the previous policy");
                }
            }
            _ = interrupt.recv() => {
                tracing::info!("Received SIGINT");
                return Ok(());
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM");
                return Ok(());
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_proxy: &FilterProxy) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C");
    Ok(())
}
