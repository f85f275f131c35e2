use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustyline::{error::ReadlineError, DefaultEditor, ExternalPrinter};

use rp2040lib::protocol::{Command, MotorLevels};
use rp2040lib::{LinkHandle, TelemetrySubscriber, WheelSample};

/// Minimum time between printed wheel samples while watching.
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

const HELP: &str = "\
commands:
  motors <left> <right>   set motor levels, each -1 to 1 (alias: m)
  coast                   stop driving, free-wheel
  brake                   stop driving, short the motors
  log                     fetch the controller log
  reset                   reset controller state
  state                   print the latest telemetry
  stats                   print link counters
  watch                   toggle printing wheel samples
  help                    this message
  quit                    leave (also ctrl-d)";

#[derive(clap::Args, Debug)]
pub struct ConsoleOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
}

impl crate::ToolRun for ConsoleOpts {
    fn run(&self, config: &crate::config::ToolConfig) -> anyhow::Result<()> {
        let link = crate::common::RunningLink::open(&self.port, config)?;
        Console::new(link).run()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Send(Command),
    State,
    Stats,
    Watch,
    Help,
    Quit,
    Nothing,
}

pub fn parse_command(line: &str) -> anyhow::Result<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(ConsoleCommand::Nothing);
    };
    let rest: Vec<&str> = words.collect();

    let no_args = |cmd: ConsoleCommand| -> anyhow::Result<ConsoleCommand> {
        anyhow::ensure!(rest.is_empty(), "`{}` takes no arguments", first);
        Ok(cmd)
    };

    match first {
        "motors" | "m" => {
            anyhow::ensure!(rest.len() == 2, "usage: motors <left> <right>");
            let mut levels = [0.0f32; 2];
            for (level, word) in levels.iter_mut().zip(rest.iter()) {
                *level = word
                    .parse()
                    .map_err(|_| anyhow::anyhow!("not a number: {}", word))?;
                anyhow::ensure!(
                    (-1.0..=1.0).contains(&*level),
                    "level {} is outside -1..1",
                    word
                );
            }
            Ok(ConsoleCommand::Send(Command::SetMotorLevels(
                MotorLevels::new(levels[0], levels[1]),
            )))
        }
        "coast" => no_args(ConsoleCommand::Send(Command::SetMotorLevels(
            MotorLevels::coast(),
        ))),
        "brake" => no_args(ConsoleCommand::Send(Command::SetMotorLevels(
            MotorLevels::brake(),
        ))),
        "log" => no_args(ConsoleCommand::Send(Command::GetLog)),
        "reset" => no_args(ConsoleCommand::Send(Command::ResetState)),
        "state" => no_args(ConsoleCommand::State),
        "stats" => no_args(ConsoleCommand::Stats),
        "watch" => no_args(ConsoleCommand::Watch),
        "help" | "?" => no_args(ConsoleCommand::Help),
        "quit" | "exit" => no_args(ConsoleCommand::Quit),
        other => anyhow::bail!("unknown command `{}`, try `help`", other),
    }
}

/// Prints log lines, and wheel samples when watching, above the prompt.
struct ConsolePrinter<P> {
    printer: P,
    watch: Arc<AtomicBool>,
    last_wheels: Option<Instant>,
}

impl<P> ConsolePrinter<P>
where
    P: ExternalPrinter,
{
    fn print(&mut self, msg: String) {
        if let Err(e) = self.printer.print(msg) {
            log::warn!("console print failed: {}", e);
        }
    }
}

impl<P> TelemetrySubscriber for ConsolePrinter<P>
where
    P: ExternalPrinter + Send,
{
    fn on_wheels(&mut self, sample: &WheelSample) {
        if !self.watch.load(Ordering::Relaxed) {
            return;
        }
        if let Some(last) = self.last_wheels {
            if sample.timestamp.duration_since(last) < WATCH_INTERVAL {
                return;
            }
        }
        self.last_wheels = Some(sample.timestamp);
        self.print(format!(
            "wheels: {} / {} ({:.1} mm / {:.1} mm)",
            sample.counts.left,
            sample.counts.right,
            sample.distance_mm.left,
            sample.distance_mm.right
        ));
    }

    fn on_log_line(&mut self, line: &str) {
        self.print(format!("log: {}", line));
    }
}

pub struct Console {
    link: crate::common::RunningLink,
    watch: Arc<AtomicBool>,
}

impl Console {
    pub fn new(link: crate::common::RunningLink) -> Self {
        Self {
            link,
            watch: Arc::new(AtomicBool::new(false)),
        }
    }

    fn handle(&self) -> &LinkHandle {
        &self.link.handle
    }

    pub fn run(self) -> anyhow::Result<()> {
        let mut rl = DefaultEditor::new()?;

        let printer = rl.create_external_printer()?;
        self.handle().subscribe(Box::new(ConsolePrinter {
            printer,
            watch: self.watch.clone(),
            last_wheels: None,
        }));
        self.handle().start_publishing();
        eprintln!("Connected. Type `help` for commands.");

        let mut console = self;
        loop {
            console.link = console.link.check()?;

            let line = match rl.readline("> ") {
                Ok(line) => line,
                Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
                Err(e) => Err(e)?,
            };
            if !line.trim().is_empty() {
                rl.add_history_entry(&line)?;
            }

            match parse_command(&line) {
                Ok(ConsoleCommand::Quit) => break,
                Ok(cmd) => console.execute(cmd),
                Err(e) => eprintln!("{}", e),
            }
        }

        console.link.handle.send(Command::SetMotorLevels(MotorLevels::coast()));
        let timeout = console.link.handle.response_timeout() * 2;
        console.link.wait_cycles(2, timeout)?.stop()
    }

    fn execute(&self, cmd: ConsoleCommand) {
        match cmd {
            ConsoleCommand::Send(command) => self.handle().send(command),
            ConsoleCommand::State => match self.handle().state() {
                Some(state) => println!("{}", crate::common::format_state(&state)),
                None => println!("no telemetry yet"),
            },
            ConsoleCommand::Stats => println!("{}", crate::common::format_stats(self.handle())),
            ConsoleCommand::Watch => {
                let was = self.watch.fetch_xor(true, Ordering::Relaxed);
                println!("watch {}", if was { "off" } else { "on" });
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit | ConsoleCommand::Nothing => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn motors() {
        let cmd = parse_command("m 0.5 -1").unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Send(Command::SetMotorLevels(MotorLevels::new(0.5, -1.0)))
        );
        assert!(parse_command("motors 0.5").is_err());
        assert!(parse_command("motors 2 0").is_err());
        assert!(parse_command("motors fast slow").is_err());
    }

    #[test]
    fn simple_commands() {
        assert_eq!(
            parse_command("  log ").unwrap(),
            ConsoleCommand::Send(Command::GetLog)
        );
        assert_eq!(
            parse_command("reset").unwrap(),
            ConsoleCommand::Send(Command::ResetState)
        );
        assert_eq!(parse_command("").unwrap(), ConsoleCommand::Nothing);
        assert_eq!(parse_command("quit").unwrap(), ConsoleCommand::Quit);
        assert!(parse_command("state now").is_err());
        assert!(parse_command("fly").is_err());
    }
}
