use std::time::Duration;

use rp2040lib::TelemetrySubscriber;

#[derive(clap::Args, Debug)]
pub struct MonitorOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
    /// Milliseconds between printouts.
    #[arg(short, long, default_value_t = 1000)]
    interval: u64,
    /// Stop after this many printouts.
    #[arg(short = 'n', long)]
    count: Option<usize>,
    /// Also print link counters.
    #[arg(short, long)]
    stats: bool,
}

/// Controller log lines go to stdout as they arrive.
struct LogPrinter;

impl TelemetrySubscriber for LogPrinter {
    fn on_log_line(&mut self, line: &str) {
        println!("log: {}", line);
    }
}

impl crate::ToolRun for MonitorOpts {
    fn run(&self, config: &crate::config::ToolConfig) -> anyhow::Result<()> {
        anyhow::ensure!(self.interval > 0, "interval must be positive");

        let mut link = crate::common::RunningLink::open(&self.port, config)?;
        link.handle.subscribe(Box::new(LogPrinter));
        link.handle.start_publishing();

        let mut printed = 0;
        loop {
            if let Some(count) = self.count {
                if printed >= count {
                    break;
                }
            }

            std::thread::sleep(Duration::from_millis(self.interval));
            link = link.check()?;

            match link.handle.state() {
                Some(state) => println!("{}", crate::common::format_state(&state)),
                None => println!("(no telemetry yet)"),
            }
            if self.stats {
                println!("{}", crate::common::format_stats(&link.handle));
            }
            println!();
            printed += 1;
        }

        link.stop()
    }
}
