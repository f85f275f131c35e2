use std::time::{Duration, Instant};

use rp2040lib::protocol::MotorLevels;

/// How often the motor command is repeated while driving.
const RESEND_INTERVAL: Duration = Duration::from_millis(50);

#[derive(clap::Args, Debug)]
pub struct DriveOpts {
    #[command(flatten)]
    port: crate::common::SerialPortArgs,
    /// Left motor level, from -1 to 1.
    #[arg(short, long, allow_negative_numbers = true)]
    left: f32,
    /// Right motor level, from -1 to 1.
    #[arg(short, long, allow_negative_numbers = true)]
    right: f32,
    /// Seconds to drive for.
    #[arg(short, long, default_value_t = 1.0)]
    seconds: f64,
    /// Brake at the end instead of coasting.
    #[arg(long)]
    brake: bool,
    /// Do not ask for confirmation.
    #[arg(short, long)]
    yes: bool,
}

impl DriveOpts {
    fn check(&self) -> anyhow::Result<Duration> {
        for (name, level) in [("left", self.left), ("right", self.right)] {
            anyhow::ensure!(
                level.is_finite() && (-1.0..=1.0).contains(&level),
                "{} level {} is outside -1..1",
                name,
                level
            );
        }
        anyhow::ensure!(
            self.seconds.is_finite() && self.seconds > 0.0,
            "drive time must be positive"
        );
        Ok(Duration::from_secs_f64(self.seconds))
    }

    fn levels(&self) -> MotorLevels {
        MotorLevels::new(self.left, self.right)
    }

    fn finish(&self) -> MotorLevels {
        if self.brake {
            MotorLevels::brake()
        } else {
            MotorLevels::coast()
        }
    }
}

impl crate::ToolRun for DriveOpts {
    fn run(&self, config: &crate::config::ToolConfig) -> anyhow::Result<()> {
        let duration = self.check()?;
        let levels = self.levels();
        let [left, right] = levels.control_values();

        eprintln!(
            "Driving left {:+.2} ({:#04x}), right {:+.2} ({:#04x}) for {:.1}s.",
            self.left, left, self.right, right, self.seconds
        );
        crate::common::confirm("Make sure the wheels are free. Continue?", self.yes)?;

        let mut link = crate::common::RunningLink::open(&self.port, config)?;
        let response_timeout = link.handle.response_timeout();
        link = link.wait_cycles(1, response_timeout * 2)?;
        let before = link.handle.state();

        let bar = crate::common::drive_bar(duration);
        let start = Instant::now();
        while start.elapsed() < duration {
            link.handle.send(rp2040lib::protocol::Command::SetMotorLevels(levels));
            std::thread::sleep(RESEND_INTERVAL.min(duration.saturating_sub(start.elapsed())));
            bar.set_position(start.elapsed().as_millis() as u64);
            if link.is_finished() {
                bar.abandon();
                return link.check().map(|_| ());
            }
        }
        bar.finish();

        link.handle
            .send(rp2040lib::protocol::Command::SetMotorLevels(self.finish()));
        // our command, then one poll to pick up the final counts
        link = link.wait_cycles(2, response_timeout * 3)?;

        if let (Some(before), Some(after)) = (before, link.handle.state()) {
            let counts = after.motors.encoder_counts;
            let delta = rp2040lib::protocol::Pair::new(
                counts.left.wrapping_sub(before.motors.encoder_counts.left),
                counts.right.wrapping_sub(before.motors.encoder_counts.right),
            );
            let mm = delta.map(|c| c as f64 * rp2040lib::MM_PER_COUNT);
            println!(
                "left {} counts ({:.1} mm), right {} counts ({:.1} mm)",
                delta.left, mm.left, delta.right, mm.right
            );
        }

        link.stop()
    }
}
