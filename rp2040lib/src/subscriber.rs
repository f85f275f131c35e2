use std::time::Instant;

use crate::protocol::{DeviceState, Pair};
use crate::LinkHealth;

/// Wheel diameter is 60 mm, and the encoders give 128 counts per turn.
pub const MM_PER_COUNT: f64 = 2.0 * std::f64::consts::PI * 30.0 / 128.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySample {
    pub timestamp: Instant,
    /// Volts.
    pub voltage: f64,
    /// Kelvin.
    pub temperature: f64,
    pub state_of_health: u8,
    pub safety_status: u8,
    pub flags: i16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargerSample {
    pub timestamp: Instant,
    pub wireless_attached: bool,
    /// Volts.
    pub usb_charger_voltage: f64,
    /// Volts.
    pub wireless_vrect_voltage: f64,
    pub chg_details: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelSample {
    pub timestamp: Instant,
    pub counts: Pair<i32>,
    /// Millimetres travelled since controller reset.
    pub distance_mm: Pair<f64>,
    pub control: Pair<u8>,
    pub faults: Pair<u8>,
}

impl BatterySample {
    pub fn from_state(timestamp: Instant, state: &DeviceState) -> Self {
        let b = &state.battery;
        Self {
            timestamp,
            voltage: b.voltage(),
            temperature: b.temperature_kelvin(),
            state_of_health: b.state_of_health,
            safety_status: b.safety_status,
            flags: b.flags,
        }
    }
}

impl ChargerSample {
    pub fn from_state(timestamp: Instant, state: &DeviceState) -> Self {
        let c = &state.charger;
        Self {
            timestamp,
            wireless_attached: c.wireless_attached,
            usb_charger_voltage: c.usb_charger_voltage(),
            wireless_vrect_voltage: c.wireless_vrect_voltage(),
            chg_details: c.chg_details,
        }
    }
}

impl WheelSample {
    pub fn from_state(timestamp: Instant, state: &DeviceState) -> Self {
        let m = &state.motors;
        Self {
            timestamp,
            counts: m.encoder_counts,
            distance_mm: m.encoder_counts.map(|c| c as f64 * MM_PER_COUNT),
            control: m.control,
            faults: m.faults,
        }
    }
}

/// Receives decoded telemetry. Every method defaults to doing nothing.
///
/// Samples and log lines arrive on the scheduler thread, so keep them
/// short.
pub trait TelemetrySubscriber: Send {
    fn on_battery(&mut self, _sample: &BatterySample) {}
    fn on_charger(&mut self, _sample: &ChargerSample) {}
    fn on_wheels(&mut self, _sample: &WheelSample) {}
    fn on_log_line(&mut self, _line: &str) {}

    /// The inbound stream hit the bad packet threshold. Called from the
    /// thread delivering bytes, whether or not publishing is started.
    fn on_persistent_desync(&mut self, _health: &LinkHealth) {}
}

impl<F> TelemetrySubscriber for F
where
    F: FnMut(&WheelSample) + Send,
{
    fn on_wheels(&mut self, sample: &WheelSample) {
        self(sample)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PublisherState {
    #[default]
    Stopped,
    Started,
}

/// The set of subscribers, and whether they currently get samples.
#[derive(Default)]
pub struct Publishers {
    state: PublisherState,
    subscribers: Vec<Box<dyn TelemetrySubscriber>>,
}

impl core::fmt::Debug for Publishers {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Publishers")
            .field("state", &self.state)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl Publishers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn TelemetrySubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = PublisherState::Started;
    }

    pub fn stop(&mut self) {
        self.state = PublisherState::Stopped;
    }

    /// Forward a decoded state to every subscriber, if started.
    pub fn publish_state(&mut self, timestamp: Instant, state: &DeviceState) {
        if self.state != PublisherState::Started {
            return;
        }

        let battery = BatterySample::from_state(timestamp, state);
        let charger = ChargerSample::from_state(timestamp, state);
        let wheels = WheelSample::from_state(timestamp, state);
        for sub in self.subscribers.iter_mut() {
            sub.on_battery(&battery);
            sub.on_charger(&charger);
            sub.on_wheels(&wheels);
        }
    }

    /// Forward a firmware log line, if started.
    pub fn publish_log(&mut self, line: &str) {
        if self.state != PublisherState::Started {
            return;
        }
        for sub in self.subscribers.iter_mut() {
            sub.on_log_line(line);
        }
    }

    /// Report a persistent desync to every subscriber.
    pub fn publish_desync(&mut self, health: &LinkHealth) {
        for sub in self.subscribers.iter_mut() {
            sub.on_persistent_desync(health);
        }
    }
}
