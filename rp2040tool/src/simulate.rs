use std::io::{Read, Write};

use rp2040lib::protocol::{DeviceState, Marker, MessageSerialize, Opcode, COMMAND_FRAME_LEN};

#[derive(clap::Args, Debug, Clone)]
pub struct SimulateOpts {
    #[arg(default_value = "localhost:8855")]
    bind: String,
    /// Line noise bytes to send before every reply.
    #[arg(long, default_value_t = 0)]
    garbage: usize,
    /// Break the stop marker of every Nth reply.
    #[arg(long)]
    corrupt_every: Option<u64>,
    /// Battery voltage to report, in millivolts.
    #[arg(long, default_value_t = 3900)]
    battery_mv: i16,
}

impl crate::ToolRun for SimulateOpts {
    fn run(&self, _config: &crate::config::ToolConfig) -> anyhow::Result<()> {
        let listener = std::net::TcpListener::bind(&self.bind)?;
        log::info!("listening on {}", self.bind);

        loop {
            let (stream, addr) = listener.accept()?;
            log::info!("connected to {}", addr);

            // a read timeout keeps a dead connection from hanging forever
            stream.set_read_timeout(Some(std::time::Duration::from_secs(1)))?;
            stream.set_nodelay(true)?;

            let mut sim = Simulator::new(self);
            match sim.serve(stream) {
                Ok(()) => log::info!("disconnected from {}", addr),
                Err(e) => log::warn!("connection to {} failed: {}", addr, e),
            }
        }
    }
}

/// Find the next command frame in `input`.
///
/// Returns the number of bytes used up, and the opcode byte and payload
/// if a whole frame was there. Opcode bytes are not checked here.
fn next_command(input: &[u8]) -> (usize, Option<(u8, [u8; 2])>) {
    let Some(start) = input.iter().position(|b| *b == Marker::Start.byte()) else {
        return (input.len(), None);
    };
    let Some(frame) = input.get(start..start + COMMAND_FRAME_LEN) else {
        return (start, None);
    };
    if frame[4] != Marker::Stop.byte() {
        // not a frame after all, try the next start marker
        return (start + 1, None);
    }
    (start + COMMAND_FRAME_LEN, Some((frame[1], [frame[2], frame[3]])))
}

/// Encoder counts per command cycle for a DRV8830 CONTROL value.
fn wheel_step(control: u8) -> i32 {
    let speed = (control >> 2) as i32 / 4;
    match control & 0x03 {
        0b01 => speed,
        0b10 => -speed,
        _ => 0,
    }
}

struct Simulator<'a> {
    opts: &'a SimulateOpts,
    state: DeviceState,
    log: Vec<String>,
    replies: u64,
    buffer: Vec<u8>,
}

impl<'a> Simulator<'a> {
    fn new(opts: &'a SimulateOpts) -> Self {
        let mut state = DeviceState::default();
        state.battery.voltage_mv = opts.battery_mv;
        state.battery.temperature = 2981;
        state.battery.state_of_health = 100;
        state.charger.usb_charger_mv = 5000;

        Self {
            opts,
            state,
            log: vec!["simulator started".to_owned()],
            replies: 0,
            buffer: Vec::new(),
        }
    }

    fn serve<F>(&mut self, mut stream: F) -> anyhow::Result<()>
    where
        F: Read + Write,
    {
        let mut buf = [0u8; 256];
        loop {
            let amt = match stream.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(amt) => amt,
                Err(e) => match e.kind() {
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => continue,
                    std::io::ErrorKind::UnexpectedEof => return Ok(()),
                    _ => anyhow::bail!(e),
                },
            };

            let reply = self.receive(&buf[..amt]);
            if !reply.is_empty() {
                stream.write_all(&reply)?;
                stream.flush()?;
            }
        }
    }

    /// Take in received bytes and produce everything to send back.
    fn receive(&mut self, data: &[u8]) -> Vec<u8> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::new();
        loop {
            let (used, command) = next_command(&self.buffer);
            self.buffer.drain(..used);
            match command {
                Some((opcode, payload)) => out.extend(self.respond(opcode, payload)),
                None if used == 0 => break,
                None => {}
            }
        }
        out
    }

    fn respond(&mut self, opcode: u8, payload: [u8; 2]) -> Vec<u8> {
        log::debug!("command {:#04x} {:02x?}", opcode, payload);
        let mut reply = match Opcode::from_byte(opcode) {
            Some(Opcode::GetLog) => {
                let mut text = self.log.join("\n");
                text.push('\n');
                self.log.clear();
                text.as_str().frame_vec(Opcode::GetLog)
            }
            Some(Opcode::SetMotorLevels) => {
                self.state.motors.control.left = payload[0];
                self.state.motors.control.right = payload[1];
                self.step();
                self.state.frame_vec(Opcode::SetMotorLevels)
            }
            Some(Opcode::ResetState) => {
                self.state.motors = Default::default();
                self.log.push("state reset".to_owned());
                self.state.frame_vec(Opcode::ResetState)
            }
            Some(Opcode::GetState) => {
                self.step();
                self.state.frame_vec(Opcode::GetState)
            }
            Some(Opcode::Ack) | Some(Opcode::Nack) | None => {
                self.log.push(format!("bad command {:#04x}", opcode));
                b"".frame_vec(Opcode::Nack)
            }
        };

        self.replies += 1;
        if let Some(n) = self.opts.corrupt_every {
            if n > 0 && self.replies % n == 0 {
                if let Some(last) = reply.last_mut() {
                    *last = 0x00;
                }
            }
        }

        let mut out = self.noise();
        out.append(&mut reply);
        out
    }

    fn step(&mut self) {
        let motors = &mut self.state.motors;
        motors.encoder_counts.left = motors
            .encoder_counts
            .left
            .wrapping_add(wheel_step(motors.control.left));
        motors.encoder_counts.right = motors
            .encoder_counts
            .right
            .wrapping_add(wheel_step(motors.control.right));
    }

    fn noise(&self) -> Vec<u8> {
        (0..self.opts.garbage)
            .map(|i| (self.replies as usize * 31 + i * 7) as u8)
            .map(|b| if b == Marker::Start.byte() { 0 } else { b })
            .collect()
    }
}
