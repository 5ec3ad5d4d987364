use clap::Parser;
use miette::WrapErr;
use pvcviewer_core::{EventKind, RelationChange};
use pvcviewer_reconciler::{CertificateBundle, Charm, CharmConfig, Collaborators};
use pvcviewer_runtime::{ApiClient, ApiClientConfig, HookTools, PebbleClient};
use pvcviewer_storage::RedbBackend;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pvcviewer", about = "PVC Viewer operator charm")]
struct Cli {
    /// Unit or application name ("pvcviewer-operator/0" or "pvcviewer-operator")
    #[arg(long, env = "JUJU_UNIT_NAME")]
    app_name: String,
    /// Juju model name, also the Kubernetes namespace
    #[arg(long, env = "JUJU_MODEL_NAME")]
    model_name: String,
    #[arg(long, env = "JUJU_MODEL_UUID")]
    model_uuid: Option<String>,
    /// Hook to handle; falls back to JUJU_HOOK_NAME
    #[arg(long, env = "JUJU_DISPATCH_PATH")]
    event: Option<String>,
    /// Path to the redb state file
    #[arg(long, default_value = ".pvcviewer-state.redb")]
    state_path: String,
    /// Workload container name
    #[arg(long, default_value = "pvcviewer-operator")]
    container: String,
    /// Pebble socket of the workload container; defaults to the socket Juju
    /// mounts for `--container`
    #[arg(long)]
    pebble_socket: Option<String>,
    /// Kubernetes API URL; defaults to the in-cluster service address
    #[arg(long)]
    kube_api_url: Option<String>,
    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Application part of a unit name
fn app_name_from_unit(unit: &str) -> &str {
    unit.split('/').next().unwrap_or(unit)
}

fn pebble_client(cli: &Cli) -> PebbleClient {
    match &cli.pebble_socket {
        Some(socket) => PebbleClient::new(&cli.container, socket),
        None => PebbleClient::for_container(&cli.container),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let hook = cli
        .event
        .clone()
        .or_else(|| std::env::var("JUJU_HOOK_NAME").ok())
        .ok_or_else(|| {
            miette::miette!("No event to handle: set JUJU_DISPATCH_PATH or pass --event")
        })?;

    let event = match EventKind::from_hook(&hook) {
        Ok(event) => event,
        Err(e) => {
            warn!("Ignoring event: {}", e);
            return Ok(());
        }
    };

    run(&cli, event).await
}

async fn run(cli: &Cli, event: EventKind) -> miette::Result<()> {
    let app_name = app_name_from_unit(&cli.app_name);
    info!(
        "pvcviewer {} handling {} for {} in {}",
        env!("CARGO_PKG_VERSION"),
        event,
        app_name,
        cli.model_name
    );

    let store = RedbBackend::new(&cli.state_path)
        .wrap_err_with(|| format!("failed to open state file {}", cli.state_path))?;
    let certs = CertificateBundle::load_or_generate(&store, app_name, &cli.model_name)
        .wrap_err("failed to load webhook certificates")?;

    let api_config = ApiClientConfig::in_cluster(cli.kube_api_url.as_deref())?;
    let cluster = ApiClient::new(api_config)?;

    let mut unit = HookTools::new();
    if let EventKind::Relation {
        change: RelationChange::Broken,
        ..
    } = &event
    {
        if let Ok(relation_id) = std::env::var("JUJU_RELATION_ID") {
            unit = unit.with_broken_relation(relation_id);
        }
    }

    let config = CharmConfig {
        app_name: app_name.to_string(),
        model_name: cli.model_name.clone(),
        model_uuid: cli.model_uuid.clone(),
    };
    let charm = Charm::build(
        &config,
        certs,
        Collaborators {
            cluster: Arc::new(cluster),
            container: Arc::new(pebble_client(cli)),
            unit: Arc::new(unit),
        },
    )?;

    charm.dispatch(&event).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_name_from_unit() {
        assert_eq!(app_name_from_unit("pvcviewer-operator/0"), "pvcviewer-operator");
        assert_eq!(app_name_from_unit("pvcviewer-operator"), "pvcviewer-operator");
    }

    #[test]
    fn test_pebble_socket_follows_container() {
        let cli = Cli::parse_from([
            "pvcviewer",
            "--app-name",
            "pvcviewer-operator",
            "--model-name",
            "kubeflow",
            "--container",
            "manager",
        ]);
        assert_eq!(
            pebble_client(&cli).socket_path(),
            std::path::Path::new("/charm/containers/manager/pebble.socket")
        );

        let cli = Cli::parse_from([
            "pvcviewer",
            "--app-name",
            "pvcviewer-operator",
            "--model-name",
            "kubeflow",
            "--pebble-socket",
            "/tmp/pebble.socket",
        ]);
        assert_eq!(
            pebble_client(&cli).socket_path(),
            std::path::Path::new("/tmp/pebble.socket")
        );
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from([
            "pvcviewer",
            "--app-name",
            "pvcviewer-operator/0",
            "--model-name",
            "kubeflow",
            "--event",
            "hooks/install",
        ]);
        assert_eq!(cli.container, "pvcviewer-operator");
        assert_eq!(cli.state_path, ".pvcviewer-state.redb");
        assert!(!cli.log_json);
        assert!(cli.pebble_socket.is_none());
        assert_eq!(
            EventKind::from_hook(cli.event.as_deref().unwrap()).unwrap(),
            EventKind::Install
        );
    }
}
