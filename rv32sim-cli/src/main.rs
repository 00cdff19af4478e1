use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::filter::EnvFilter;

use rv32sim::machine::{Machine, MachineConfig};
use rv32sim::selftest;
use rv32sim_gdb::GdbServer;

/// A memory window given on the command line as `base:size`, both hex.
#[derive(Debug, Clone, Copy)]
struct Region {
    base: u32,
    size: u32,
}

fn parse_region(value: &str) -> Result<Region, String> {
    let (base, size) = value
        .split_once(':')
        .ok_or_else(|| format!("`{value}` is not of the form base:size"))?;
    let base = u32::from_str_radix(base.trim_start_matches("0x"), 16)
        .map_err(|err| format!("bad base address: {err}"))?;
    let size = u32::from_str_radix(size.trim_start_matches("0x"), 16)
        .map_err(|err| format!("bad size: {err}"))?;
    Ok(Region { base, size })
}

#[derive(clap::Parser)]
#[clap(name = "rv32sim", about = "An RV32IM machine simulator", version)]
struct Cli {
    /// Run the built-in instruction tests and exit.
    #[clap(short = 't', long)]
    test: bool,

    /// Verbose logging of GDB remote-protocol traffic.
    #[clap(short = 'd', long)]
    debug: bool,

    /// Enable the GDB server, optionally on a specific port (e.g. -g=1234).
    #[clap(
        short = 'g',
        long,
        value_name = "PORT",
        require_equals = true,
        num_args = 0..=1,
        default_missing_value = "3333"
    )]
    gdb: Option<u16>,

    /// Override the RAM mapping (hex base:size).
    #[clap(short = 'r', long, value_name = "BASE:SIZE", value_parser = parse_region)]
    ram: Option<Region>,

    /// Override the flash mapping (hex base:size).
    #[clap(short = 'f', long, value_name = "BASE:SIZE", value_parser = parse_region)]
    flash: Option<Region>,

    /// ELF or raw binary image to execute.
    image: Option<PathBuf>,
}

fn setup_logging(debug_rsp: bool) {
    let default = if debug_rsp {
        "info,rv32sim_gdb=debug"
    } else {
        "info"
    };
    // RV32SIM_LOG overrides the flag-derived default.
    let filter = match std::env::var("RV32SIM_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(default),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.debug);

    if cli.test {
        selftest::run().context("built-in instruction tests failed")?;
        println!("all built-in instruction tests passed");
        return Ok(());
    }

    let mut config = MachineConfig::default();
    if let Some(ram) = cli.ram {
        config.ram_base = ram.base;
        config.ram_size = ram.size;
    }
    if let Some(flash) = cli.flash {
        config.flash_base = flash.base;
        config.flash_size = flash.size;
    }

    let image = cli
        .image
        .context("no program image given (expected an ELF or raw binary path)")?;

    let mut machine = Machine::new(config);
    machine
        .load_program(&image)
        .with_context(|| format!("loading {} failed", image.display()))?;
    machine.hart_mut().reset();

    if let Some(port) = cli.gdb {
        let server = GdbServer::new(port, cli.debug).context("starting the GDB server failed")?;
        server.run(machine.hart_mut())?;
    } else {
        let reason = machine.hart_mut().run(None);
        tracing::info!(?reason, "execution stopped at pc {:#010x}", machine.hart().pc());
    }

    machine.shutdown();
    Ok(())
}
