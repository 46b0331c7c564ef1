//! # printfleet-hub
//!
//! Fleet hub binary. Wires settings, logging, the machine registry, and the
//! action server together and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use printfleet_core::{BroadcastHub, MachineId};
use printfleet_machines::{
    ConfigurationStore, ConnectionOptions, ConnectionRegistry, JsonFileConfigurationStore, MemoryConfigurationStore,
    MemoryFileStore, SIMULATED_DISCRIMINATOR, SimulatedFactory, StoredConfiguration,
};
use printfleet_server::{FleetContext, ServerConfig, fleet_server, spawn_state_bridge};
use printfleet_settings::FleetSettings;

/// 3D printer fleet hub.
#[derive(Parser, Debug)]
#[command(name = "printfleet-hub", about = "3D printer fleet hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.printfleet/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// JSON file of stored machine configurations (overrides settings).
    #[arg(long)]
    configurations: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Register this many simulated machines.
    #[arg(long, default_value_t = 0)]
    simulate: usize,
}

impl Cli {
    /// Settings from file and environment, with command line overrides.
    fn settings(&self) -> Result<FleetSettings> {
        let path = self.settings.clone().unwrap_or_else(printfleet_settings::settings_path);
        let mut settings = printfleet_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(path) = &self.configurations {
            settings.machines.configurations_path = Some(path.display().to_string());
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn configuration_store(settings: &FleetSettings) -> Arc<dyn ConfigurationStore> {
    match &settings.machines.configurations_path {
        Some(path) => Arc::new(JsonFileConfigurationStore::new(printfleet_settings::resolve_data_path(path))),
        None => Arc::new(MemoryConfigurationStore::new()),
    }
}

/// Configurations of `count` simulated machines, `sim-1` onwards.
fn simulated_machines(count: usize) -> Vec<StoredConfiguration> {
    (1..=count)
        .map(|n| {
            StoredConfiguration::new(
                MachineId::from(format!("sim-{n}")),
                SIMULATED_DISCRIMINATOR,
                serde_json::json!({"Nickname": format!("Simulated {n}")}),
            )
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if printfleet_settings::init_settings(cli.settings()?).is_err() {
        anyhow::bail!("settings were already initialized");
    }
    let settings = printfleet_settings::get_settings();

    let logs = printfleet_logging::init_subscriber_with_hub(&settings.logging.level, settings.logging.history_capacity);
    let metrics = match printfleet_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(error) => {
            tracing::warn!(%error, "metrics recorder unavailable");
            None
        }
    };

    let machine_settings = &settings.machines;
    let machines = ConnectionRegistry::new(
        configuration_store(settings),
        Arc::new(BroadcastHub::new(machine_settings.event_history_capacity)),
    )
    .with_file_store(Arc::new(MemoryFileStore::new(machine_settings.files_max_bytes)))
    .with_options(ConnectionOptions {
        connect_timeout: Duration::from_millis(machine_settings.connect_timeout_ms),
        operation_timeout: Duration::from_millis(machine_settings.operation_timeout_ms),
    });
    let _ = machines.register_factory(Arc::new(SimulatedFactory::new()));
    let machines = Arc::new(machines);

    let loaded = machines
        .load_from_store()
        .await
        .context("Failed to load machine configurations")?;
    let simulated = machines.load_from_configurations(&simulated_machines(cli.simulate));
    tracing::info!(loaded, simulated, "fleet registered");

    let mut ctx = FleetContext::new(Arc::clone(&machines), logs);
    ctx.log_queue_capacity = settings.logging.subscriber_queue_capacity;
    let config = ServerConfig::from(&settings.server);
    let shutdown_timeout = config.shutdown_timeout;
    let mut server = fleet_server(config, &ctx);
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }
    let shutdown = Arc::clone(server.shutdown());

    shutdown.track(tokio::spawn(Arc::clone(&machines).run_reconnect_sweep(
        Duration::from_secs(machine_settings.reconnect_interval_secs.max(1)),
        shutdown.token(),
    )));
    shutdown.track(spawn_state_bridge(
        &machines,
        Arc::clone(server.sessions()),
        machine_settings.event_queue_capacity,
        shutdown.token(),
    ));

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    shutdown.track(handle);
    tracing::info!(
        "printfleet hub listening on http://{addr} ({} actions, {} machines)",
        server.actions().len(),
        machines.len()
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    shutdown.graceful_shutdown(shutdown_timeout).await;
    machines.disconnect_all().await;
    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["printfleet-hub"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert_eq!(cli.simulate, 0);
    }

    #[test]
    fn cli_overrides_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 7000}, "logging": {"level": "warn"}}"#).unwrap();

        let cli = Cli::parse_from([
            "printfleet-hub",
            "--settings",
            path.to_str().unwrap(),
            "--port",
            "7100",
            "--configurations",
            "/tmp/machines.json",
            "--simulate",
            "3",
        ]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.server.port, 7100);
        assert_eq!(settings.logging.level, "warn");
        assert_eq!(
            settings.machines.configurations_path.as_deref(),
            Some("/tmp/machines.json")
        );
        assert_eq!(cli.simulate, 3);
    }

    #[test]
    fn missing_settings_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "printfleet-hub",
            "--settings",
            dir.path().join("absent.json").to_str().unwrap(),
        ]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.server.ws_path, "/ws");
    }

    #[test]
    fn simulated_machines_are_numbered() {
        let machines = simulated_machines(2);
        assert_eq!(machines.len(), 2);
        assert_eq!(machines[1].id.as_str(), "sim-2");
        assert_eq!(machines[0].discrimination, SIMULATED_DISCRIMINATOR);
    }
}
