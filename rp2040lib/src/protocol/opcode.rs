/// Frame delimiters.
///
/// These share byte values with the controller's command enumeration, but on
/// the host side they are never opcodes: an inbound frame whose opcode byte
/// is a marker value is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Marker {
    Start = 0xfe,
    Stop = 0xff,
}

impl Marker {
    pub const fn byte(self) -> u8 {
        self as u8
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0xfe => Some(Self::Start),
            0xff => Some(Self::Stop),
            _ => None,
        }
    }

    /// Returns [true] if `data` contains any delimiter value.
    pub fn any_in(data: &[u8]) -> bool {
        data.iter().any(|b| Self::from_byte(*b).is_some())
    }
}

/// One-byte command / response discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Opcode {
    GetLog = 0x00,
    SetMotorLevels = 0x01,
    ResetState = 0x02,
    GetState = 0x03,
    Nack = 0xfc,
    Ack = 0xfd,
}

impl Opcode {
    pub const ALL: [Opcode; 6] = [
        Opcode::GetLog,
        Opcode::SetMotorLevels,
        Opcode::ResetState,
        Opcode::GetState,
        Opcode::Nack,
        Opcode::Ack,
    ];

    pub const fn byte(self) -> u8 {
        self as u8
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::GetLog),
            0x01 => Some(Self::SetMotorLevels),
            0x02 => Some(Self::ResetState),
            0x03 => Some(Self::GetState),
            0xfc => Some(Self::Nack),
            0xfd => Some(Self::Ack),
            _ => None,
        }
    }

    /// Responses to these opcodes carry a telemetry payload.
    pub const fn carries_telemetry(self) -> bool {
        matches!(
            self,
            Self::SetMotorLevels | Self::ResetState | Self::GetState
        )
    }
}

/// A byte that is not a known opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("unknown opcode {0:#04x}")]
pub struct UnknownOpcode(pub u8);

impl TryFrom<u8> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        Self::from_byte(b).ok_or(UnknownOpcode(b))
    }
}

impl core::fmt::Display for Opcode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let name = match self {
            Self::GetLog => "GET_LOG",
            Self::SetMotorLevels => "SET_MOTOR_LEVELS",
            Self::ResetState => "RESET_STATE",
            Self::GetState => "GET_STATE",
            Self::Nack => "NACK",
            Self::Ack => "ACK",
        };
        f.write_str(name)
    }
}
