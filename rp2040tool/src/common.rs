use std::io::{Read, Write};
use std::time::Duration;

use rp2040lib::protocol::{DeviceState, BAUD_RATE};
use rp2040lib::transport::{spawn_reader, FromStd, IoTransport};
use rp2040lib::{Link, LinkConfig, LinkHandle, WheelSample};

use crate::config::{SerialConfig, ToolConfig};

/// How long a plain file read waits at end of file before trying again.
const FILE_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(clap::Args, Debug, Clone, Default)]
pub struct SerialPortArgs {
    /// Serial port, file, or host:port. Defaults to the first port found.
    port: Option<String>,
    #[arg(short, long)]
    baud: Option<u32>,
    /// Treat the port as a plain file. Reads at end of file wait for more
    /// data instead of closing the link.
    #[arg(long)]
    plain_file: bool,
    /// Treat the port as a TCP address, as served by `simulate`.
    #[arg(long)]
    tcp: bool,
}

#[derive(Debug)]
pub enum SerialPort {
    Serial(Box<dyn serialport::SerialPort>),
    File(std::fs::File),
    Tcp(std::net::TcpStream),
}

pub fn default_serial_port() -> String {
    if let Ok(infos) = serialport::available_ports() {
        for info in infos {
            #[cfg(target_os = "macos")]
            if info.port_name.ends_with(".Bluetooth-Incoming-Port") {
                // these ports are almost always *not* what we want
                continue;
            }

            #[cfg(target_os = "macos")]
            if info.port_name.starts_with("/dev/tty.") {
                // tty. ports have flow control, use cu. ports instead
                continue;
            }

            return info.port_name.clone();
        }
    }

    // the RP2040 USB CDC device, usually
    "/dev/ttyACM0".to_owned()
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Serial(port) => port.read(buf),
            Self::File(port) => match port.read(buf)? {
                // a plain file may still be growing, wait for more like
                // a serial port would
                0 if !buf.is_empty() => {
                    std::thread::sleep(FILE_POLL_INTERVAL);
                    Err(std::io::ErrorKind::TimedOut.into())
                }
                amt => Ok(amt),
            },
            Self::Tcp(port) => port.read(buf),
        }
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Serial(port) => port.write(buf),
            Self::File(port) => port.write(buf),
            Self::Tcp(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Serial(port) => port.flush(),
            Self::File(port) => port.flush(),
            Self::Tcp(port) => port.flush(),
        }
    }
}

impl SerialPort {
    /// A second handle on the same port, so reads and writes can happen
    /// on different threads.
    pub fn try_clone(&self) -> anyhow::Result<Self> {
        Ok(match self {
            Self::Serial(port) => Self::Serial(port.try_clone()?),
            Self::File(port) => Self::File(port.try_clone()?),
            Self::Tcp(port) => Self::Tcp(port.try_clone()?),
        })
    }
}

impl SerialPortArgs {
    /// Flags win over the `[serial]` section of the config file.
    pub fn resolve(&self, config: &SerialConfig) -> SerialConfig {
        SerialConfig {
            port: self.port.clone().or_else(|| config.port.clone()),
            baud: self.baud.or(config.baud),
            plain_file: self.plain_file || config.plain_file,
            tcp: self.tcp || config.tcp,
        }
    }

    pub fn open(&self, config: &ToolConfig) -> anyhow::Result<SerialPort> {
        let serial = self.resolve(&config.serial);
        let name = serial.port.unwrap_or_else(default_serial_port);
        let write_timeout = config.link.write_timeout();
        log::debug!("opening {}", name);

        if serial.tcp {
            let port = std::net::TcpStream::connect(&name)?;
            port.set_nodelay(true)?;
            // short read timeout so the reader notices shutdown
            port.set_read_timeout(Some(Duration::from_secs(1)))?;
            port.set_write_timeout(Some(write_timeout))?;
            Ok(SerialPort::Tcp(port))
        } else if serial.plain_file {
            let port = std::fs::File::options()
                .read(true)
                .write(true)
                .open(&name)?;
            Ok(SerialPort::File(port))
        } else {
            let baud = serial.baud.unwrap_or(BAUD_RATE);
            let mut port = serialport::new(&name, baud).open()?;
            port.set_timeout(Duration::from_secs(1).min(write_timeout))?;
            Ok(SerialPort::Serial(port))
        }
    }
}

/// A link running on its own threads, talking to a port.
#[derive(Debug)]
pub struct RunningLink {
    pub handle: LinkHandle,
    scheduler: std::thread::JoinHandle<rp2040lib::Result<()>>,
}

impl RunningLink {
    pub fn start(port: SerialPort, config: &LinkConfig) -> anyhow::Result<Self> {
        let link = Link::new(config.clone())?;
        let handle = link.handle();

        let reader = port.try_clone()?;
        // the reader thread is left to exit on its own
        spawn_reader(FromStd::new(reader), link.inbound())?;
        let scheduler = link.spawn(IoTransport::new_std(port))?;

        Ok(Self { handle, scheduler })
    }

    pub fn open(args: &SerialPortArgs, config: &ToolConfig) -> anyhow::Result<Self> {
        Self::start(args.open(config)?, &config.link)
    }

    /// True once the scheduler has stopped, for any reason.
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Bail out with the link's error if it stopped on its own.
    pub fn check(self) -> anyhow::Result<Self> {
        if self.is_finished() {
            self.join()?;
            anyhow::bail!("link stopped unexpectedly");
        }
        Ok(self)
    }

    /// Stop the link and wait for the scheduler.
    pub fn stop(self) -> anyhow::Result<()> {
        self.handle.shutdown();
        self.join()
    }

    fn join(self) -> anyhow::Result<()> {
        self.scheduler
            .join()
            .map_err(|_| anyhow::anyhow!("scheduler thread panicked"))??;
        Ok(())
    }

    /// Wait until `cycles` more scheduler cycles have finished.
    pub fn wait_cycles(self, cycles: u64, timeout: Duration) -> anyhow::Result<Self> {
        let target = self.handle.stats().cycles + cycles;
        let deadline = std::time::Instant::now() + timeout;
        let mut link = self;
        while link.handle.stats().cycles < target {
            anyhow::ensure!(
                std::time::Instant::now() < deadline,
                "timed out waiting for the controller"
            );
            std::thread::sleep(Duration::from_millis(5));
            link = link.check()?;
        }
        Ok(link)
    }
}

pub fn confirm(prompt: &str, yes: bool) -> anyhow::Result<()> {
    if yes {
        return Ok(());
    }

    let ok = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    anyhow::ensure!(ok, "cancelled");
    Ok(())
}

pub fn drive_bar(duration: Duration) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(duration.as_millis() as u64);
    let style = indicatif::ProgressStyle::with_template(
        "({spinner}) [{wide_bar}] ({elapsed_precise} / {msg})",
    )
    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
    .progress_chars("=> ")
    .tick_strings(&[">>>  ", ">>  >", ">  >>", "  >>>", " >>> ", "-----"]);
    bar.set_style(style);
    bar.set_message(format!("{:.1}s", duration.as_secs_f64()));
    bar
}

/// Human readable telemetry, one line per subsystem.
pub fn format_state(state: &DeviceState) -> String {
    let b = &state.battery;
    let c = &state.charger;
    let m = &state.motors;
    let wheels = WheelSample::from_state(std::time::Instant::now(), state);

    let wireless = if c.wireless_attached {
        format!("attached ({:.3} V)", c.wireless_vrect_voltage())
    } else {
        "detached".to_owned()
    };

    format!(
        "battery  {:.3} V  {:.1} K  health {}%  safety {:#04x}  flags {:#06x}\n\
         charger  usb {:.3} V  wireless {}  details {:#010x}\n\
         wheels   left {} ({:.1} mm)  right {} ({:.1} mm)\n\
         drivers  control {:#04x} {:#04x}  fault {:#04x} {:#04x}",
        b.voltage(),
        b.temperature_kelvin(),
        b.state_of_health,
        b.safety_status,
        b.flags,
        c.usb_charger_voltage(),
        wireless,
        c.chg_details,
        m.encoder_counts.left,
        wheels.distance_mm.left,
        m.encoder_counts.right,
        wheels.distance_mm.right,
        m.control.left,
        m.control.right,
        m.faults.left,
        m.faults.right,
    )
}

/// One line of link counters.
pub fn format_stats(handle: &LinkHandle) -> String {
    let s = handle.stats();
    let h = handle.health();
    format!(
        "cycles {}  sent {}  polls {}  frames {}  missed {}  late {}  nacks {}  \
         desyncs {}  escalations {}  overflows {}  ambiguous {}",
        s.cycles,
        s.commands_sent,
        s.polls,
        s.frames_dispatched,
        s.missed_responses,
        s.late_frames,
        s.nacks,
        h.desyncs,
        h.escalations,
        h.overflows,
        h.ambiguous,
    )
}
