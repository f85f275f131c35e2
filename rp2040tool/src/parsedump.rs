use rp2040lib::protocol::{decode_log, DeviceState, Opcode};
use rp2040lib::{Resynchronizer, VerifiedFrame};

#[derive(clap::Args, Debug)]
pub struct ParseDumpOpts {
    /// File holding bytes received from a controller.
    dump: String,
    /// Feed the file in pieces of this size, like a serial port would.
    #[arg(long, default_value_t = 64)]
    chunk: usize,
    /// Fail if any part of the dump could not be framed.
    #[arg(long)]
    strict: bool,
}

fn print_frame(index: usize, frame: &VerifiedFrame) {
    println!(
        "frame {}: {}, {} bytes",
        index,
        frame.opcode,
        frame.payload.len()
    );

    match frame.opcode {
        Opcode::GetLog => {
            for line in decode_log(&frame.payload) {
                println!("  log: {}", line);
            }
        }
        Opcode::SetMotorLevels | Opcode::ResetState | Opcode::GetState => {
            match DeviceState::decode(&frame.payload) {
                Ok(state) => {
                    for line in crate::common::format_state(&state).lines() {
                        println!("  {}", line);
                    }
                }
                Err(e) => {
                    println!("  {}", e);
                    crate::hexdump::hexdump_prefix("  ", &frame.payload);
                }
            }
        }
        Opcode::Ack | Opcode::Nack => {
            if !frame.payload.is_empty() {
                crate::hexdump::hexdump_prefix("  ", &frame.payload);
            }
        }
    }
    println!();
}

impl crate::ToolRun for ParseDumpOpts {
    fn run(&self, config: &crate::config::ToolConfig) -> anyhow::Result<()> {
        anyhow::ensure!(self.chunk > 0, "chunk size must be positive");
        let rawdata = std::fs::read(&self.dump)?;
        let resync = Resynchronizer::new(&config.link);

        let mut count = 0;
        for chunk in rawdata.chunks(self.chunk) {
            let feed = resync.feed(chunk);
            for frame in feed.frames.iter() {
                print_frame(count, frame);
                count += 1;
            }
            if feed.escalated {
                println!("!!! persistent desync");
                println!();
            }
        }

        let health = resync.health();
        println!(
            "{} frames, {} desyncs, {} overflows, {} ambiguous, {} bytes left over",
            health.frames, health.desyncs, health.overflows, health.ambiguous, health.buffered
        );

        if self.strict {
            anyhow::ensure!(health.desyncs == 0, "dump contains corrupt frames");
            anyhow::ensure!(health.buffered == 0, "dump ends in a partial frame");
        }
        Ok(())
    }
}
