use super::serialize::Serializer;
use super::{Marker, Opcode, COMMAND_FRAME_LEN};

/// Full-scale voltage of the DRV8830 motor drivers.
pub const MOTOR_MAX_VOLTAGE: f32 = 5.06;

/// Voltages at or below this magnitude are sent as zero. The scaling below
/// would otherwise land on a reserved register value.
pub const MOTOR_DEAD_ZONE: f32 = 0.49;

/// DRV8830 VSET step, in volts, before the 64/4 scaling.
const VSET_STEP: f64 = 1.285;

const IN1_BIT: u8 = 0;
const IN2_BIT: u8 = 1;

/// Requested motor levels, each in `[-1, 1]` (full reverse to full forward).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct MotorLevels {
    pub left: f32,
    pub right: f32,
    pub brake_left: bool,
    pub brake_right: bool,
}

impl MotorLevels {
    pub const fn new(left: f32, right: f32) -> Self {
        Self {
            left,
            right,
            brake_left: false,
            brake_right: false,
        }
    }

    /// Both motors unpowered, free-wheeling.
    pub const fn coast() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Both motors shorted to brake.
    pub const fn brake() -> Self {
        Self {
            left: 0.0,
            right: 0.0,
            brake_left: true,
            brake_right: true,
        }
    }

    /// The two DRV8830 CONTROL register values, left then right.
    pub fn control_values(&self) -> [u8; 2] {
        [
            motor_control_value(self.left, self.brake_left),
            motor_control_value(self.right, self.brake_right),
        ]
    }
}

/// Encode a normalized motor level into a DRV8830 CONTROL register value.
///
/// Bits 2-7 hold VSET, bit 0 is IN1 and bit 1 is IN2. The motors are
/// mounted mirrored, so the level is negated before scaling.
pub fn motor_control_value(level: f32, brake: bool) -> u8 {
    let mut voltage = -level * MOTOR_MAX_VOLTAGE;
    if !voltage.is_finite() || voltage.abs() <= MOTOR_DEAD_ZONE {
        voltage = 0.0;
    }
    let voltage = voltage.clamp(-MOTOR_MAX_VOLTAGE, MOTOR_MAX_VOLTAGE);

    let mut value = 0u8;
    if voltage != 0.0 {
        // numerator in f32, division in f64, truncated. this matches the
        // firmware's own conversion table bit for bit
        let vset = (64.0 * voltage.abs()) as f64 / (4.0 * VSET_STEP) - 1.0;
        value = (vset.floor() as u8) << 2;
    }

    if brake {
        value | (1 << IN1_BIT) | (1 << IN2_BIT)
    } else if voltage < 0.0 {
        (value | (1 << IN1_BIT)) & !(1 << IN2_BIT)
    } else if voltage > 0.0 {
        (value | (1 << IN2_BIT)) & !(1 << IN1_BIT)
    } else {
        // coast: IN1 = IN2 = 0
        0
    }
}

/// Commands the host can send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    GetLog,
    SetMotorLevels(MotorLevels),
    ResetState,
    GetState,
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::GetLog => Opcode::GetLog,
            Self::SetMotorLevels(_) => Opcode::SetMotorLevels,
            Self::ResetState => Opcode::ResetState,
            Self::GetState => Opcode::GetState,
        }
    }

    /// The two payload bytes. Unused bytes are zero.
    pub fn payload(&self) -> [u8; 2] {
        match self {
            Self::SetMotorLevels(levels) => levels.control_values(),
            _ => [0; 2],
        }
    }

    /// Encode into the fixed 5-byte command frame.
    pub fn encode(&self) -> [u8; COMMAND_FRAME_LEN] {
        encode(self.opcode(), self.payload())
    }

    /// Serialize the fixed 5-byte command frame.
    pub fn frame<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        ser.write_bytes(&self.encode())
    }
}

/// Build a command frame: `[START][opcode][payload 0][payload 1][STOP]`.
pub fn encode(opcode: Opcode, payload: [u8; 2]) -> [u8; COMMAND_FRAME_LEN] {
    [
        Marker::Start.byte(),
        opcode.byte(),
        payload[0],
        payload[1],
        Marker::Stop.byte(),
    ]
}

/// Build a `SET_MOTOR_LEVELS` frame.
pub fn encode_motor_levels(
    left: f32,
    right: f32,
    brake_left: bool,
    brake_right: bool,
) -> [u8; COMMAND_FRAME_LEN] {
    Command::SetMotorLevels(MotorLevels {
        left,
        right,
        brake_left,
        brake_right,
    })
    .encode()
}
