//! Subcommand bodies.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::{error, info, warn};

use watersim_core::bridge::{Bridge, ExitReason};
use watersim_core::codec::RegisterCodec;
use watersim_core::config::BridgeConfig;
use watersim_core::engine::NetworkState;
use watersim_core::entity::RecordView;
use watersim_core::register_map::{Direction, MapError, RegisterMap, RegisterMapConfig};
use watersim_core::stop::StopSignal;
use watersim_core::transport::{
    MemoryTransport, RegisterIoError, RegisterTransport, TransportError, read_floats,
};
use watersim_data::{DataLoadError, load_bridge_config, load_network};
use watersim_modbus::{ModbusTcpConfig, ModbusTcpTransport};

/// Printed when the user interrupts a run.
pub const INTERRUPT_MESSAGE: &str = ">--- Program interrupted by user ---";

/// Errors that stop a command before or outside the bridge loop.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Data(#[from] DataLoadError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    RegisterIo(#[from] RegisterIoError),
}

// ===========================================================================
// Option overrides
// ===========================================================================

/// Layout flags shared by `run` and `layout`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutFlags {
    pub extended: bool,
    pub setpoints: bool,
    pub base_address: Option<u16>,
}

impl LayoutFlags {
    /// Flags only ever switch features on; absent flags keep file values.
    pub fn apply(&self, map: &mut RegisterMapConfig) {
        if self.extended {
            map.view = RecordView::Extended;
        }
        if self.setpoints {
            map.setpoints = true;
        }
        if let Some(base) = self.base_address {
            map.base_address = base;
        }
    }
}

/// Everything `run` needs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub network: PathBuf,
    pub modbus: ModbusTcpConfig,
    pub config: Option<PathBuf>,
    pub interval_ms: Option<u64>,
    pub max_iterations: Option<u64>,
    pub dry_run: bool,
    pub layout: LayoutFlags,
}

/// Load the config file, if any, then apply command-line overrides.
pub fn resolve_bridge_config(options: &RunOptions) -> Result<BridgeConfig, CliError> {
    let mut config = match &options.config {
        Some(path) => load_bridge_config(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(ms) = options.interval_ms {
        config.pacing_ms = ms;
    }
    if options.max_iterations.is_some() {
        config.max_iterations = options.max_iterations;
    }
    options.layout.apply(&mut config.map);
    Ok(config)
}

// ===========================================================================
// run
// ===========================================================================

pub fn run(options: &RunOptions) -> Result<ExitCode, CliError> {
    let engine = load_network(&options.network)?;
    let config = resolve_bridge_config(options)?;

    let transport: Box<dyn RegisterTransport> = if options.dry_run {
        info!("dry run: publishing to an in-process register bank");
        Box::new(MemoryTransport::with_size(u16::MAX as usize + 1))
    } else {
        Box::new(ModbusTcpTransport::new(options.modbus.clone()))
    };

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_stop.raise()) {
        warn!(error = %err, "cannot install the interrupt handler");
    }

    info!(
        network = %options.network.display(),
        pacing_ms = config.pacing_ms,
        view = ?config.map.view,
        setpoints = config.map.setpoints,
        "starting bridge"
    );

    let mut bridge = Bridge::new(engine, transport, config);
    match bridge.run(&stop) {
        Ok(ExitReason::Interrupted) => {
            info!("{INTERRUPT_MESSAGE}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(ExitReason::IterationLimit) => {
            let stats = bridge.stats();
            info!(
                iterations = stats.iterations,
                skipped = stats.skipped,
                registers_written = stats.registers_written,
                "run complete"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!(subsystem = err.subsystem(), "{} failure: {err}", err.subsystem());
            Ok(ExitCode::FAILURE)
        }
    }
}

// ===========================================================================
// layout
// ===========================================================================

/// Render the register map as a table.
pub fn render_layout(map: &RegisterMap) -> String {
    let mut out = format!(
        "{:>7}  {:>5}  {:<16}  {:<10}  {}\n",
        "address", "width", "entity", "field", "direction"
    );
    for entry in map.entries() {
        let direction = match entry.direction {
            Direction::ReadOnly => "read-only",
            Direction::Writable => "writable",
        };
        out.push_str(&format!(
            "{:>7}  {:>5}  {:<16}  {:<10}  {}\n",
            entry.address, entry.width, entry.entity_id, entry.field, direction
        ));
    }
    out.push_str(&format!(
        "{} entries, {} registers\n",
        map.len(),
        map.register_count()
    ));
    out
}

pub fn layout(network: &Path, flags: &LayoutFlags) -> Result<ExitCode, CliError> {
    let engine = load_network(network)?;
    let mut config = RegisterMapConfig::default();
    flags.apply(&mut config);
    let map = RegisterMap::build(engine.topology(), &config)?;
    print!("{}", render_layout(&map));
    Ok(ExitCode::SUCCESS)
}

// ===========================================================================
// read
// ===========================================================================

pub fn read(modbus: ModbusTcpConfig, address: u16, count: u16) -> Result<ExitCode, CliError> {
    let mut transport = ModbusTcpTransport::new(modbus);
    transport.connect()?;
    let result = read_floats(&mut transport, address, count, &RegisterCodec::default());
    if let Err(err) = transport.close() {
        warn!(error = %err, "closing transport failed");
    }
    for (i, value) in result?.iter().enumerate() {
        println!("{:>5}  {value}", address as usize + 2 * i);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use watersim_core::topology::{LinkKind, NetworkTopology, NodeKind};

    fn options() -> RunOptions {
        RunOptions {
            network: PathBuf::from("net.toml"),
            modbus: ModbusTcpConfig::default(),
            config: None,
            interval_ms: None,
            max_iterations: None,
            dry_run: true,
            layout: LayoutFlags::default(),
        }
    }

    #[test]
    fn defaults_without_flags() {
        let config = resolve_bridge_config(&options()).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let mut opts = options();
        opts.interval_ms = Some(10);
        opts.max_iterations = Some(3);
        opts.layout = LayoutFlags {
            extended: true,
            setpoints: true,
            base_address: Some(40),
        };
        let config = resolve_bridge_config(&opts).unwrap();
        assert_eq!(config.pacing_ms, 10);
        assert_eq!(config.max_iterations, Some(3));
        assert_eq!(config.map.view, RecordView::Extended);
        assert!(config.map.setpoints);
        assert_eq!(config.map.base_address, 40);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let mut opts = options();
        opts.config = Some(PathBuf::from("/nonexistent/watersim/bridge.toml"));
        assert!(matches!(
            resolve_bridge_config(&opts),
            Err(CliError::Data(DataLoadError::Io(_)))
        ));
    }

    #[test]
    fn layout_table_lists_every_entry() {
        let mut topo = NetworkTopology::new();
        topo.add_node("T1", NodeKind::Tank).unwrap();
        topo.add_link("PU1", LinkKind::Pump).unwrap();
        let config = RegisterMapConfig {
            setpoints: true,
            ..Default::default()
        };
        let map = RegisterMap::build(&topo, &config).unwrap();
        let table = render_layout(&map);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), map.len() + 2);
        assert!(lines[1].contains("T1") && lines[1].contains("pressure"));
        assert!(lines[map.len()].contains("power") && lines[map.len()].contains("writable"));
        assert_eq!(lines.last(), Some(&"6 entries, 11 registers"));
    }
}
