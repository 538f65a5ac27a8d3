//! Subcommand handlers.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use hostlink_config::Config;
use hostlink_core::HostLink;
use hostlink_protocols::{ExternalInstance, HostLinkError, RunningObjectRegistry};

use crate::cli::Commands;

#[cfg(windows)]
fn open_registry() -> Result<Arc<dyn RunningObjectRegistry>, HostLinkError> {
    Ok(Arc::new(hostlink_com::RotRegistry::new()))
}

#[cfg(not(windows))]
fn open_registry() -> Result<Arc<dyn RunningObjectRegistry>, HostLinkError> {
    Err(HostLinkError::Unsupported(
        "the running object table is only available on Windows".to_string(),
    ))
}

pub(crate) fn build_link(config: Config) -> Result<HostLink, HostLinkError> {
    let registry = open_registry()?;
    Ok(HostLink::builder(registry).config(config).build())
}

pub(crate) async fn handle_command(
    command: Commands,
    link: &HostLink,
) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Discover { json } => discover(link, json).await,
        Commands::Connect { pid } => connect(link, pid).await,
        Commands::Exec {
            pid,
            command,
            args,
            timeout_ms,
        } => exec(link, pid, &command, &args, timeout_ms.map(Duration::from_millis)).await,
        Commands::Query { pid, path } => query(link, pid, &path).await,
        Commands::Health { pid } => health(link, pid).await,
        Commands::Watch => watch(link).await,
    }
}

fn print_instances(instances: &[ExternalInstance]) {
    if instances.is_empty() {
        println!("No running instances found.");
        return;
    }
    println!("{:<8} {:<10} {:<20} SOLUTION", "PID", "VERSION", "STARTED");
    for instance in instances {
        println!(
            "{:<8} {:<10} {:<20} {}",
            instance.process_id,
            instance.version,
            instance.start_time.format("%Y-%m-%d %H:%M:%S"),
            instance.active_solution
        );
    }
}

async fn discover(link: &HostLink, json: bool) -> Result<(), Box<dyn Error>> {
    let report = link.scan().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report.instances)?);
    } else {
        print_instances(&report.instances);
        if !report.skipped.is_empty() {
            println!("({} registry entries skipped, see log)", report.skipped.len());
        }
    }
    Ok(())
}

async fn connect(link: &HostLink, pid: u32) -> Result<(), Box<dyn Error>> {
    let instance = link.connect(pid).await?;
    println!("{}", serde_json::to_string_pretty(&instance)?);
    Ok(())
}

async fn exec(
    link: &HostLink,
    pid: u32,
    command: &str,
    args: &str,
    timeout: Option<Duration>,
) -> Result<(), Box<dyn Error>> {
    link.connect(pid).await?;
    let outcome = link.execute(pid, command, args, timeout).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match outcome.failure() {
        Some(failure) => Err(format!("{}: {}", failure.code, failure.description).into()),
        None => Ok(()),
    }
}

async fn query(link: &HostLink, pid: u32, path: &str) -> Result<(), Box<dyn Error>> {
    link.connect(pid).await?;
    let outcome = link.query_property(pid, path, None).await;
    if let Some(failure) = outcome.failure() {
        return Err(format!("{}: {}", failure.code, failure.description).into());
    }
    println!("{}", outcome.value().map(String::as_str).unwrap_or_default());
    Ok(())
}

async fn health(link: &HostLink, pid: u32) -> Result<(), Box<dyn Error>> {
    link.connect(pid).await?;
    if link.is_healthy(pid).await {
        println!("Process {} is healthy", pid);
        Ok(())
    } else {
        Err(format!("Process {} is not responding", pid).into())
    }
}

async fn watch(link: &HostLink) -> Result<(), Box<dyn Error>> {
    for instance in link.discover().await? {
        if let Err(e) = link.connect(instance.process_id).await {
            warn!("Could not connect to process {}: {}", instance.process_id, e);
        }
    }
    print_instances(&link.list_tracked_instances());

    if !link.start_monitor() {
        warn!("Health monitor is disabled; watching without probes");
    }
    info!("Watching {} instance(s), press Ctrl-C to stop", link.list_tracked_instances().len());

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");

    if let Some(report) = link.health_report().await {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
