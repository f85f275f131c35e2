use std::sync::{Arc, Mutex};

use rp2040lib::TelemetrySubscriber;

#[derive(clap::Args, Debug)]
pub struct GetLogOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

struct Collect(Arc<Mutex<Vec<String>>>);

impl TelemetrySubscriber for Collect {
    fn on_log_line(&mut self, line: &str) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push(line.to_owned());
        }
    }
}

impl crate::ToolRun for GetLogOpts {
    fn run(&self, config: &crate::config::ToolConfig) -> anyhow::Result<()> {
        let lines = Arc::new(Mutex::new(Vec::new()));

        let link = crate::common::RunningLink::open(&self.port, config)?;
        link.handle.subscribe(Box::new(Collect(lines.clone())));
        link.handle.start_publishing();
        link.handle.get_log();

        // the cycle in progress, then the one carrying our request
        let timeout = link.handle.response_timeout() * 3;
        let link = link.wait_cycles(2, timeout)?;
        link.stop()?;

        let lines = lines
            .lock()
            .map_err(|_| anyhow::anyhow!("log collector poisoned"))?;
        if lines.is_empty() {
            eprintln!("Controller log is empty.");
        }
        for line in lines.iter() {
            println!("{}", line);
        }
        Ok(())
    }
}
