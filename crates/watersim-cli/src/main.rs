//! Watersim CLI
//!
//! Publishes a simulated water network as Modbus holding registers.
//!
//! # Example
//!
//! ```bash
//! # Bridge a network to a local Modbus server, one iteration per second
//! watersim run networks/test.toml --host 127.0.0.1 --port 5020
//!
//! # Print the register layout, with setpoint registers
//! watersim layout networks/test.toml --setpoints
//!
//! # Read four floats starting at register 0
//! watersim read --address 0 --count 4 --port 5020
//! ```

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use commands::{LayoutFlags, RunOptions};
use watersim_modbus::ModbusTcpConfig;

/// Watersim
///
/// Steps a hydraulic network forever and serves its state over Modbus TCP.
#[derive(Parser, Debug)]
#[command(name = "watersim")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge until interrupted
    Run {
        /// Network definition (.toml, .ron or .json)
        network: PathBuf,

        #[command(flatten)]
        endpoint: EndpointArgs,

        /// Wall-clock pause between iterations, in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Bridge configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Publish to an in-process register bank instead of the network
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many iterations
        #[arg(long)]
        max_iterations: Option<u64>,

        #[command(flatten)]
        layout: LayoutArgs,
    },

    /// Print the register map of a network
    Layout {
        /// Network definition (.toml, .ron or .json)
        network: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,
    },

    /// Read floats from a remote register bank
    Read {
        /// First holding register, 0-based
        #[arg(long)]
        address: u16,

        /// Number of floats (two registers each)
        #[arg(long, default_value = "1")]
        count: u16,

        #[command(flatten)]
        endpoint: EndpointArgs,
    },
}

#[derive(Args, Debug)]
struct EndpointArgs {
    /// Modbus server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Modbus server port
    #[arg(long, default_value = "502")]
    port: u16,

    /// Modbus unit identifier
    #[arg(long, default_value = "1")]
    unit_id: u8,
}

impl EndpointArgs {
    fn into_config(self) -> ModbusTcpConfig {
        ModbusTcpConfig {
            host: self.host,
            port: self.port,
            unit_id: self.unit_id,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct LayoutArgs {
    /// Also publish tank geometry and link flows
    #[arg(long)]
    extended: bool,

    /// Make pump power and valve settings writable
    #[arg(long)]
    setpoints: bool,

    /// Address of the first register
    #[arg(long)]
    base_address: Option<u16>,
}

impl From<LayoutArgs> for LayoutFlags {
    fn from(args: LayoutArgs) -> Self {
        LayoutFlags {
            extended: args.extended,
            setpoints: args.setpoints,
            base_address: args.base_address,
        }
    }
}

const DEFAULT_LOG_FILTER: &str =
    "warn,watersim_core=info,watersim_data=info,watersim_modbus=info,watersim=info";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            network,
            endpoint,
            interval_ms,
            config,
            dry_run,
            max_iterations,
            layout,
        } => commands::run(&RunOptions {
            network,
            modbus: endpoint.into_config(),
            config,
            interval_ms,
            max_iterations,
            dry_run,
            layout: layout.into(),
        }),
        Command::Layout { network, layout } => commands::layout(&network, &layout.into()),
        Command::Read {
            address,
            count,
            endpoint,
        } => commands::read(endpoint.into_config(), address, count),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["watersim", "run", "net.toml"]).unwrap();
        let Command::Run {
            network,
            endpoint,
            interval_ms,
            dry_run,
            layout,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(network, PathBuf::from("net.toml"));
        assert_eq!(endpoint.into_config(), ModbusTcpConfig::default());
        assert_eq!(interval_ms, None);
        assert!(!dry_run);
        assert_eq!(LayoutFlags::from(layout), LayoutFlags::default());
    }

    #[test]
    fn run_with_every_flag() {
        let cli = Cli::try_parse_from([
            "watersim",
            "run",
            "net.json",
            "--host",
            "10.0.0.5",
            "--port",
            "5020",
            "--unit-id",
            "7",
            "--interval-ms",
            "250",
            "--dry-run",
            "--max-iterations",
            "12",
            "--setpoints",
            "--extended",
            "--base-address",
            "100",
        ])
        .unwrap();
        let Command::Run {
            endpoint,
            interval_ms,
            dry_run,
            max_iterations,
            layout,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        let modbus = endpoint.into_config();
        assert_eq!((modbus.host.as_str(), modbus.port, modbus.unit_id), ("10.0.0.5", 5020, 7));
        assert_eq!(interval_ms, Some(250));
        assert!(dry_run);
        assert_eq!(max_iterations, Some(12));
        assert_eq!(
            LayoutFlags::from(layout),
            LayoutFlags {
                extended: true,
                setpoints: true,
                base_address: Some(100),
            }
        );
    }

    #[test]
    fn read_requires_an_address() {
        assert!(Cli::try_parse_from(["watersim", "read"]).is_err());
        let args = ["watersim", "read", "--address", "4", "--count", "2"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Command::Read { address: 4, count: 2, .. }));
    }
}
