use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use adapters::ebpf::{DropEventReader, EbpfLoader, IpsecMapManager, MetricsReader};
use adapters::http::server::run_http_server;
use adapters::http::state::AppState;
use application::drop_pipeline::DropPipeline;
use application::ipsec_service_impl::IpsecAppService;
use aya::programs::TcAttachType;
use domain::ipsec::engine::IpsecEngine;
use ebpf_common::ipsec::DropEvent;
use infrastructure::config::AgentConfig;
use infrastructure::constants::{
    DROP_EVENT_CHANNEL_CAPACITY, GRACEFUL_SHUTDOWN_TIMEOUT, TC_IPSEC_EGRESS, TC_IPSEC_INGRESS,
    TC_IPSEC_PROGRAM,
};
use infrastructure::logging::{init_logging, root_span};
use infrastructure::metrics::AgentMetrics;
use ports::secondary::metrics_port::{MetricsPort, ProgramMetrics};
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use crate::cli::Cli;

/// Run the agent startup sequence and block until shutdown.
pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    // ── 1. Load config ──────────────────────────────────────────────
    let config = AgentConfig::load(Path::new(&cli.config))?;

    // ── 2. Initialize logging ───────────────────────────────────────
    // CLI flags take precedence over config file
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;
    let _root_span = root_span().entered();

    info!(
        config_path = %cli.config,
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        "xfrmgate agent starting"
    );

    // ── 3. Metrics and IPsec state ──────────────────────────────────
    let metrics = Arc::new(AgentMetrics::new());
    let metrics_port = Arc::clone(&metrics) as Arc<dyn MetricsPort>;

    let ipsec_svc = Arc::new(RwLock::new(IpsecAppService::new(
        IpsecEngine::default(),
        None,
        Arc::clone(&metrics_port),
    )));
    crate::reload::apply_config(&config, &ipsec_svc).await?;
    {
        let svc = ipsec_svc.read().await;
        info!(
            enabled = config.ipsec.enabled,
            key_index = svc.local_key().get(),
            nodes = svc.node_count(),
            endpoints = svc.endpoint_count(),
            "IPsec state initialized"
        );
    }

    // ── 4. Cancellation token ───────────────────────────────────────
    let cancel_token = crate::shutdown::create_shutdown_token();

    // ── 5. HTTP server ──────────────────────────────────────────────
    let ebpf_loaded = Arc::new(AtomicBool::new(false));
    let app_state = Arc::new(AppState::new(
        Arc::clone(&metrics),
        Arc::clone(&ebpf_loaded),
        Arc::clone(&ipsec_svc),
    ));
    let http_bind = config.agent.bind_address.clone();
    let http_port = config.agent.metrics_port;
    let http_shutdown = cancel_token.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = run_http_server(
            app_state,
            &http_bind,
            http_port,
            http_shutdown.cancelled_owned(),
        )
        .await
        {
            tracing::error!(error = %e, "HTTP server failed");
        }
    });

    // ── 6. Drop pipeline ────────────────────────────────────────────
    let (drop_tx, drop_rx) = mpsc::channel::<DropEvent>(DROP_EVENT_CHANNEL_CAPACITY);
    let pipeline = DropPipeline::new(Arc::clone(&metrics_port));
    let pipeline_handle = tokio::spawn(pipeline.run(drop_rx, cancel_token.clone()));

    // ── 7. Load tc-ipsec (graceful degradation) ─────────────────────
    let ebpf_dir = resolve_ebpf_program_dir(&config);
    let loader = match try_load_tc_ipsec(&ebpf_dir, &config) {
        Ok(mut loader) => {
            metrics.set_ebpf_program_status(TC_IPSEC_EGRESS, true);
            metrics.set_ebpf_program_status(TC_IPSEC_INGRESS, true);

            match IpsecMapManager::new(loader.ebpf_mut()) {
                Ok(map_manager) => ipsec_svc.write().await.set_map_port(Box::new(map_manager)),
                Err(e) => warn!("IPsec maps not available: {e}"),
            }

            match MetricsReader::new(loader.ebpf_mut(), "IPSEC_METRICS") {
                Ok(reader) => {
                    tokio::spawn(crate::ebpf_metrics::run_kernel_metrics_loop(
                        reader,
                        Arc::clone(&metrics_port),
                        Duration::from_secs(config.ipsec.metrics_interval_secs),
                        cancel_token.clone(),
                    ));
                }
                Err(e) => warn!("IPSEC_METRICS not available: {e}"),
            }

            match DropEventReader::new(loader.ebpf_mut(), Arc::clone(&metrics_port)) {
                Ok(reader) => {
                    tokio::spawn(reader.run(drop_tx.clone(), cancel_token.clone()));
                }
                Err(e) => warn!("IPSEC_EVENTS not available: {e}"),
            }

            ebpf_loaded.store(true, Ordering::Relaxed);
            info!(
                interfaces = ?config.agent.interfaces,
                dir = %ebpf_dir,
                "eBPF tc-ipsec active"
            );
            Some(loader)
        }
        Err(e) => {
            warn!("tc-ipsec load failed (degraded mode): {e}");
            metrics.set_ebpf_program_status(TC_IPSEC_EGRESS, false);
            metrics.set_ebpf_program_status(TC_IPSEC_INGRESS, false);
            None
        }
    };

    // ── 8. Config hot-reload ────────────────────────────────────────
    let reload_handle = crate::reload::spawn_reload_task(
        cli.config.clone(),
        config,
        Arc::clone(&ipsec_svc),
        Arc::clone(&metrics_port),
        cancel_token.clone(),
    );

    // ── 9. Ready, wait for cancellation ───────────────────────────
    info!("agent ready, waiting for shutdown signal");
    cancel_token.cancelled().await;

    // ── 10. Ordered shutdown sequence ──────────────────────────────
    info!("shutdown phase 1: draining HTTP connections");
    let _ = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, http_handle).await;

    info!("shutdown phase 2: stopping config watcher");
    let _ = tokio::time::timeout(Duration::from_secs(1), reload_handle).await;

    info!("shutdown phase 3: detaching eBPF programs");
    drop(loader);

    info!("shutdown phase 4: draining drop events");
    drop(drop_tx);
    let _ = tokio::time::timeout(Duration::from_secs(2), pipeline_handle).await;

    info!("agent stopped");
    Ok(())
}

/// Load the tc-ipsec object and attach both classifiers on every
/// configured interface.
fn try_load_tc_ipsec(ebpf_dir: &str, config: &AgentConfig) -> anyhow::Result<EbpfLoader> {
    let program_bytes = read_ebpf_program(ebpf_dir, TC_IPSEC_PROGRAM)?;
    let mut loader = EbpfLoader::load(&program_bytes)?;

    for iface in &config.agent.interfaces {
        loader.attach_tc_program(TC_IPSEC_EGRESS, iface, TcAttachType::Egress)?;
        loader.attach_tc_program(TC_IPSEC_INGRESS, iface, TcAttachType::Ingress)?;
    }
    Ok(loader)
}

/// Resolve the directory containing compiled eBPF program binaries.
///
/// Precedence: `EBPF_PROGRAM_DIR` env var > `agent.ebpf_program_dir` config
/// > production default (`/usr/local/lib/xfrmgate`)
/// > dev fallback (`target/bpfel-unknown-none/release`).
fn resolve_ebpf_program_dir(config: &AgentConfig) -> String {
    use infrastructure::constants::{DEFAULT_EBPF_PROGRAM_DIR, DEFAULT_EBPF_PROGRAM_DIR_DEV};

    if let Ok(dir) = std::env::var("EBPF_PROGRAM_DIR") {
        return dir;
    }
    if let Some(ref dir) = config.agent.ebpf_program_dir {
        return dir.clone();
    }
    if Path::new(DEFAULT_EBPF_PROGRAM_DIR).is_dir() {
        DEFAULT_EBPF_PROGRAM_DIR.to_string()
    } else {
        DEFAULT_EBPF_PROGRAM_DIR_DEV.to_string()
    }
}

fn read_ebpf_program(dir: &str, name: &str) -> anyhow::Result<Vec<u8>> {
    let path = Path::new(dir).join(name);
    std::fs::read(&path)
        .map_err(|e| anyhow::anyhow!("failed to read eBPF program '{}': {e}", path.display()))
}
