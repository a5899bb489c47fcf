use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use gardener_scaling::config::{LeaderElectionConfig, OperatorConfig};
use gardener_scaling::health::{HealthState, run_health_server};
use gardener_scaling::store::{KubeStore, ObjectStore};
use gardener_scaling::volume::{PrometheusMetricsSource, VolumeAutoscaler, VolumeDefaults};
use gardener_scaling::{run_controller_scoped, run_volume_autoscaler};

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = OperatorConfig::parse();
    config.validate()?;

    // install_default() fails if a provider is already installed, which is fine
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gardener_scaling=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting gardener-scaling");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());

    // Probes must answer even while waiting for leadership
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_renewal_handle = if config.leader_election.disable_leader_election {
        warn!("Leader election disabled, assuming a single replica");
        None
    } else {
        Some(acquire_leadership(client.clone(), &config.leader_election).await)
    };

    health_state.set_ready(true).await;

    let controller_handle = if config.disable_coordinator {
        info!("ApiServerAutoscaler controller disabled");
        None
    } else {
        let client = client.clone();
        let tuning = config.tuning.clone();
        let health_state = health_state.clone();
        let namespace = config.watch_namespace.clone();
        Some(tokio::spawn(async move {
            run_controller_scoped(client, tuning, Some(health_state), namespace.as_deref()).await;
        }))
    };

    let volume_handle = if config.disable_volume_autoscaler {
        info!("PVC autoscaler disabled");
        None
    } else {
        let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
        let metrics_source = Arc::new(PrometheusMetricsSource::new(
            &config.volume.prometheus_address,
            config.volume.metrics_timeout,
        )?);
        let autoscaler = VolumeAutoscaler::new(
            store,
            metrics_source,
            VolumeDefaults::from_config(&config.volume)?,
        )
        .with_namespace(config.volume.namespace.clone())
        .with_health(health_state.clone());
        let interval = config.volume.scan_interval;
        Some(tokio::spawn(async move {
            run_volume_autoscaler(autoscaler, interval).await;
        }))
    };

    tokio::select! {
        _ = wait_optional(controller_handle) => {
            error!("ApiServerAutoscaler controller task exited");
        }
        _ = wait_optional(volume_handle) => {
            error!("PVC autoscaler task exited");
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Lease renewal only exits via process::exit() or panic
        _ = wait_optional(lease_renewal_handle) => {
            error!("Lease renewal task exited");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false).await;
            info!("Marked operator as not ready");

            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Block until this replica holds the lease, then keep renewing it
///
/// Losing the lease exits the process so Kubernetes restarts it into a new
/// election.
async fn acquire_leadership(client: Client, config: &LeaderElectionConfig) -> JoinHandle<()> {
    let holder_id = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });
    let renew_interval = config.lease_ttl / 3;

    info!(
        holder_id = %holder_id,
        namespace = %namespace,
        lease_name = %config.lease_name,
        "Initializing leader election"
    );

    let lease_lock = LeaseLock::new(
        client,
        &namespace,
        LeaseLockParams {
            holder_id,
            lease_name: config.lease_name.clone(),
            lease_ttl: config.lease_ttl,
        },
    );

    info!("Waiting to acquire leadership...");
    loop {
        match lease_lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                break;
            }
            Ok(_) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(renew_interval).await;
    }

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(renew_interval).await;

            match lease_lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    error!("Lost leadership! Shutting down...");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("Failed to renew lease: {}. Shutting down...", e);
                    std::process::exit(1);
                }
            }
        }
    })
}

/// Resolve when the task ends, never if there is no task
async fn wait_optional(handle: Option<JoinHandle<()>>) {
    match handle {
        Some(handle) => {
            if let Err(e) = handle.await {
                error!("Task panicked: {}", e);
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
