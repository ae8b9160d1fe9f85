use std::path::Path;
use std::sync::Arc;

use application::ipsec_service_impl::IpsecAppService;
use domain::ipsec::entity::{ClusterNode, DatapathSettings, KeyEpoch, RemoteEndpoint};
use infrastructure::config::AgentConfig;
use infrastructure::constants::CONFIG_WATCH_DEBOUNCE;
use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Everything `IpsecAppService::reload` needs, derived from one config.
#[derive(Debug)]
pub struct DesiredState {
    pub nodes: Vec<ClusterNode>,
    pub endpoints: Vec<RemoteEndpoint>,
    pub key: KeyEpoch,
    pub settings: DatapathSettings,
}

/// Convert the `ipsec` section into domain values.
///
/// Device names are resolved through `resolve_ifindex`. A disabled
/// datapath needs no devices and gets index 0 for both.
pub fn desired_state(
    config: &AgentConfig,
    resolve_ifindex: impl Fn(&str) -> std::io::Result<u32>,
) -> anyhow::Result<DesiredState> {
    let ipsec = &config.ipsec;

    let resolve = |dev: &str| -> anyhow::Result<u32> {
        if !ipsec.enabled || dev.trim().is_empty() {
            return Ok(0);
        }
        resolve_ifindex(dev).map_err(|e| anyhow::anyhow!("cannot resolve device '{dev}': {e}"))
    };
    let net_ifindex = resolve(&ipsec.net_device)?;
    let host_ifindex = resolve(&ipsec.host_device)?;

    Ok(DesiredState {
        nodes: ipsec.to_domain_nodes()?,
        endpoints: ipsec.to_domain_endpoints()?,
        key: ipsec.key_epoch()?,
        settings: ipsec.datapath_settings(net_ifindex, host_ifindex)?,
    })
}

/// Interface index from `/sys/class/net/<dev>/ifindex`.
pub fn sysfs_ifindex(dev: &str) -> std::io::Result<u32> {
    let path = Path::new("/sys/class/net").join(dev).join("ifindex");
    let raw = std::fs::read_to_string(path)?;
    raw.trim()
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Push `config` into the service.
pub async fn apply_config(
    config: &AgentConfig,
    ipsec_service: &RwLock<IpsecAppService>,
) -> anyhow::Result<()> {
    let state = desired_state(config, sysfs_ifindex)?;
    ipsec_service.write().await.reload(
        state.nodes,
        state.endpoints,
        state.key,
        state.settings,
    )?;
    Ok(())
}

/// Watch the config file and SIGHUP, re-applying the `ipsec` section on
/// each trigger.
///
/// Returns the `JoinHandle` so the caller can await cleanup on shutdown.
pub fn spawn_reload_task(
    config_path: String,
    initial: AgentConfig,
    ipsec_service: Arc<RwLock<IpsecAppService>>,
    metrics: Arc<dyn MetricsPort>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (notify_tx, mut notify_rx) = tokio::sync::mpsc::channel::<()>(4);

        let tx_for_watcher = notify_tx.clone();
        let mut debouncer = match new_debouncer(
            CONFIG_WATCH_DEBOUNCE,
            move |res: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                if let Ok(events) = res
                    && events.iter().any(|e| e.kind == DebouncedEventKind::Any)
                {
                    let _ = tx_for_watcher.blocking_send(());
                }
            },
        ) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "failed to create file watcher, only SIGHUP reloads");
                None
            }
        };

        if let Some(ref mut d) = debouncer {
            match d
                .watcher()
                .watch(Path::new(&config_path), notify::RecursiveMode::NonRecursive)
            {
                Ok(()) => tracing::info!(path = %config_path, "config file watcher started"),
                Err(e) => tracing::warn!(
                    path = %config_path,
                    error = %e,
                    "failed to watch config file, only SIGHUP reloads"
                ),
            }
        }

        let mut sighup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGHUP handler");
                    None
                }
            };

        let mut current = initial;
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    tracing::info!("config watcher shutting down");
                    break;
                }
                Some(()) = notify_rx.recv() => {
                    tracing::info!("config file change detected, reloading");
                }
                Some(()) = recv_sighup(&mut sighup) => {
                    tracing::info!("SIGHUP received, reloading configuration");
                }
            }

            if let Some(next) =
                perform_reload(Path::new(&config_path), &current, &ipsec_service, &*metrics).await
            {
                current = next;
            }
        }

        drop(debouncer);
    })
}

async fn recv_sighup(sighup: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match sighup {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

/// One reload attempt. Returns the new config when it was applied.
///
/// A rejected config leaves the running state untouched.
pub(crate) async fn perform_reload(
    config_path: &Path,
    current: &AgentConfig,
    ipsec_service: &RwLock<IpsecAppService>,
    metrics: &dyn MetricsPort,
) -> Option<AgentConfig> {
    let config = match AgentConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "config reload rejected");
            metrics.record_config_reload("ipsec", "failure");
            return None;
        }
    };

    if config.agent.interfaces != current.agent.interfaces {
        tracing::warn!(
            running = ?current.agent.interfaces,
            configured = ?config.agent.interfaces,
            "interface changes take effect after a restart"
        );
    }

    if let Err(e) = apply_config(&config, ipsec_service).await {
        tracing::warn!(error = %e, "config reload rejected");
        metrics.record_config_reload("ipsec", "failure");
        return None;
    }

    metrics.record_config_reload("ipsec", "success");
    tracing::info!(
        path = %config_path.display(),
        nodes = config.ipsec.nodes.len(),
        endpoints = config.ipsec.endpoints.len(),
        key_index = config.ipsec.key_index,
        "configuration reloaded"
    );
    Some(config)
}
