use clap::{Parser, Subcommand};

mod common;
mod config;
mod console;
mod drive;
mod get_log;
mod hexdump;
mod monitor;
mod parsedump;
mod simulate;

use config::ToolConfig;

trait ToolRun {
    fn run(&self, config: &ToolConfig) -> anyhow::Result<()>;
}

/// Talk to an RP2040 motor and power controller.
#[derive(Parser, Debug)]
#[command(version, about)]
struct ToolOptions {
    /// More logging. Repeat for even more.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML file with [link] and [serial] sections.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(Subcommand, Debug)]
enum ToolCommand {
    /// Poll the controller and print its telemetry.
    Monitor(monitor::MonitorOpts),
    /// Run the motors for a while, then coast.
    Drive(drive::DriveOpts),
    /// Print the controller's log buffer.
    GetLog(get_log::GetLogOpts),
    /// Interactive command line.
    Console(console::ConsoleOpts),
    /// Pretend to be a controller, over TCP.
    Simulate(simulate::SimulateOpts),
    /// Run a capture of received bytes through the frame assembler.
    ParseDump(parsedump::ParseDumpOpts),
}

impl ToolRun for ToolCommand {
    fn run(&self, config: &ToolConfig) -> anyhow::Result<()> {
        use ToolCommand::*;
        match self {
            Monitor(o) => o.run(config),
            Drive(o) => o.run(config),
            GetLog(o) => o.run(config),
            Console(o) => o.run(config),
            Simulate(o) => o.run(config),
            ParseDump(o) => o.run(config),
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() -> anyhow::Result<()> {
    let opts = ToolOptions::parse();
    init_logging(opts.verbose);
    let config = ToolConfig::load(opts.config.as_deref())?;
    opts.command.run(&config)
}
