use clap::Parser;
use log::{error, info, warn};
use portwarden::configuration::config::Config;
use portwarden::configuration::types::ForwardTarget;
use portwarden::error_handling::types::ForwardError;
use portwarden::session_management::{Advisory, AdvisoryKind, ForwardEvent, ForwardManager};
use portwarden::web_interface::WebServer;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};

#[derive(Parser)]
#[command(name = "portwarden")]
#[command(version)]
#[command(about = "Supervisor for kubectl port-forward tunnels")]
struct Args {
    /// TOML file with settings and the forwards to start
    config_file: PathBuf,

    /// Forwarding tool to launch instead of the configured one
    #[arg(long, env = "PORTWARDEN_KUBECTL")]
    kubectl: Option<String>,

    /// Serve the status API on this loopback port (enables it)
    #[arg(long)]
    web_ui_port: Option<u16>,

    /// Validate the configuration file and exit
    #[arg(long, action = clap::ArgAction::SetTrue)]
    check: bool,
}

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration from {:?}", args.config_file);
    let mut config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(kubectl) = args.kubectl {
        config.settings.kubectl_path = kubectl;
    }
    if let Some(port) = args.web_ui_port {
        config.web_ui.enabled = true;
        config.web_ui.port = port;
    }

    if args.check {
        println!(
            "Configuration OK: {} forward(s), kubectl '{}'",
            config.forwards.len(),
            config.settings.kubectl_path
        );
        return;
    }
    info!("Configuration imported successfully");

    let manager = ForwardManager::new(config.forward_settings());
    let logger = spawn_event_logger(&manager);

    if config.web_ui.enabled {
        let server = WebServer::new(manager.clone());
        let port = config.web_ui.port;
        tokio::spawn(async move {
            if let Err(e) = server.start(port).await {
                error!("Status API stopped: {}", e);
            }
        });
    }

    start_configured(&manager, &config).await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received"),
        Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
    }

    manager.shutdown().await;
    logger.abort();
    info!("All forwards stopped, exiting");
}

/// Starts every configured forward concurrently. Failures are logged with
/// their remedy; the others still start.
async fn start_configured(manager: &ForwardManager, config: &Config) {
    let mut starts = JoinSet::new();
    for spec in config.forwards.iter().cloned() {
        let manager = manager.clone();
        starts.spawn(async move {
            let target = spec.target();
            (target, manager.start_forward(spec).await)
        });
    }

    while let Some(joined) = starts.join_next().await {
        match joined {
            Ok((target, Ok(view))) => info!(
                "[{}] {} ready on 127.0.0.1:{}",
                view.id, target, view.local_port
            ),
            Ok((target, Err(e))) => report_start_failure(&target, &e),
            Err(e) => error!("Start task failed: {}", e),
        }
    }
}

fn report_start_failure(target: &ForwardTarget, err: &ForwardError) {
    let remedy = match err {
        ForwardError::SpawnFailed {
            binary_missing: true,
            ..
        } => Some("install kubectl or set --kubectl"),
        ForwardError::PortInUse {
            suggestion: Some(_),
            ..
        } => Some("use the suggested port"),
        other => other.failure_kind().map(|k| k.remedy()),
    };
    match remedy {
        Some(remedy) => error!("Could not start {}: {} ({})", target, err, remedy),
        None => error!("Could not start {}: {}", target, err),
    }
}

fn advisory_hint(advisory: &Advisory) -> &'static str {
    match advisory.kind {
        AdvisoryKind::Failure(kind) => kind.remedy(),
        AdvisoryKind::AbnormalExit => "start the forward again",
        AdvisoryKind::Timeout => "check that the cluster is reachable",
    }
}

/// Logs every change event and advisory until the streams close.
fn spawn_event_logger(manager: &ForwardManager) -> JoinHandle<()> {
    let mut events = manager.subscribe();
    let mut advisories = manager.subscribe_advisories();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(ForwardEvent::Added { id, view }) => info!(
                        "[{}] added {} {}/{} 127.0.0.1:{} -> {}",
                        id, view.resource_kind, view.namespace, view.resource_name,
                        view.local_port, view.remote_port
                    ),
                    Ok(ForwardEvent::Updated { id, view }) => info!("[{}] now {}", id, view.state),
                    Ok(ForwardEvent::Removed { id }) => info!("[{}] removed", id),
                    Err(RecvError::Lagged(missed)) => warn!("Missed {} forward events", missed),
                    Err(RecvError::Closed) => break,
                },
                advisory = advisories.recv() => match advisory {
                    Ok(advisory) => warn!(
                        "[{}] {}: {} ({})",
                        advisory.session_id,
                        advisory.target,
                        advisory.message,
                        advisory_hint(&advisory)
                    ),
                    Err(RecvError::Lagged(missed)) => warn!("Missed {} advisories", missed),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}
