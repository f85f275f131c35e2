use nom::number::complete::{le_i16, le_i32, u8 as byte};
use nom::IResult;

use super::serialize::{MessageSerialize, Serializer};
use crate::{Error, Result};

/// Length of the telemetry payload answered to `GET_STATE`,
/// `SET_MOTOR_LEVELS` and `RESET_STATE`.
pub const TELEMETRY_LEN: usize = 29;

/// A left/right pair of anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pair<T> {
    pub left: T,
    pub right: T,
}

impl<T> Pair<T> {
    pub const fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    pub fn map<F, U>(self, mut f: F) -> Pair<U>
    where
        F: FnMut(T) -> U,
    {
        Pair {
            left: f(self.left),
            right: f(self.right),
        }
    }
}

/// Motor driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MotorState {
    /// Echo of the DRV8830 CONTROL registers.
    pub control: Pair<u8>,
    /// DRV8830 FAULT registers.
    pub faults: Pair<u8>,
    /// Quadrature encoder counts since controller reset.
    pub encoder_counts: Pair<i32>,
}

/// Fuel gauge (bq27441) readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BatteryDetails {
    pub voltage_mv: i16,
    pub safety_status: u8,
    /// In units of 0.1 K.
    pub temperature: i16,
    pub state_of_health: u8,
    pub flags: i16,
}

impl BatteryDetails {
    /// Battery voltage in volts.
    pub fn voltage(&self) -> f64 {
        self.voltage_mv as f64 / 1000.0
    }

    /// Temperature in kelvin.
    pub fn temperature_kelvin(&self) -> f64 {
        self.temperature as f64 / 10.0
    }
}

/// Charger (MAX77976 / NCP3901) readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChargerDetails {
    /// Raw MAX77976 CHG_DETAILS registers.
    pub chg_details: i32,
    pub wireless_attached: bool,
    pub usb_charger_mv: i16,
    pub wireless_vrect_mv: i16,
}

impl ChargerDetails {
    /// USB charger input voltage in volts.
    pub fn usb_charger_voltage(&self) -> f64 {
        self.usb_charger_mv as f64 / 1000.0
    }

    /// Wireless receiver rectifier voltage in volts.
    pub fn wireless_vrect_voltage(&self) -> f64 {
        self.wireless_vrect_mv as f64 / 1000.0
    }
}

/// Latest decoded controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceState {
    pub motors: MotorState,
    pub battery: BatteryDetails,
    pub charger: ChargerDetails,
}

fn pair<'a, O>(
    parser: impl Fn(&'a [u8]) -> IResult<&'a [u8], O>,
) -> impl Fn(&'a [u8]) -> IResult<&'a [u8], Pair<O>> {
    move |input| {
        let (input, left) = parser(input)?;
        let (input, right) = parser(input)?;
        Ok((input, Pair { left, right }))
    }
}

impl DeviceState {
    /// Parse the fixed little-endian telemetry layout. Trailing bytes are
    /// left in the returned input.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, control) = pair(byte)(input)?;
        let (input, faults) = pair(byte)(input)?;
        let (input, encoder_counts) = pair(le_i32)(input)?;

        let (input, voltage_mv) = le_i16(input)?;
        let (input, safety_status) = byte(input)?;
        let (input, temperature) = le_i16(input)?;
        let (input, state_of_health) = byte(input)?;
        let (input, flags) = le_i16(input)?;

        let (input, chg_details) = le_i32(input)?;
        let (input, wireless_attached) = byte(input)?;
        let (input, usb_charger_mv) = le_i16(input)?;
        let (input, wireless_vrect_mv) = le_i16(input)?;

        Ok((
            input,
            DeviceState {
                motors: MotorState {
                    control,
                    faults,
                    encoder_counts,
                },
                battery: BatteryDetails {
                    voltage_mv,
                    safety_status,
                    temperature,
                    state_of_health,
                    flags,
                },
                charger: ChargerDetails {
                    chg_details,
                    wireless_attached: wireless_attached == 1,
                    usb_charger_mv,
                    wireless_vrect_mv,
                },
            },
        ))
    }

    /// Decode a telemetry payload from a verified frame.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        match Self::parse(payload) {
            Ok((_, state)) => Ok(state),
            Err(_) => Err(Error::Decode {
                len: payload.len(),
                expected: TELEMETRY_LEN,
            }),
        }
    }
}

impl MessageSerialize for DeviceState {
    fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        let motors = &self.motors;
        ser.write_u8(motors.control.left)?;
        ser.write_u8(motors.control.right)?;
        ser.write_u8(motors.faults.left)?;
        ser.write_u8(motors.faults.right)?;
        ser.write_le_i32(motors.encoder_counts.left)?;
        ser.write_le_i32(motors.encoder_counts.right)?;

        let battery = &self.battery;
        ser.write_le_i16(battery.voltage_mv)?;
        ser.write_u8(battery.safety_status)?;
        ser.write_le_i16(battery.temperature)?;
        ser.write_u8(battery.state_of_health)?;
        ser.write_le_i16(battery.flags)?;

        let charger = &self.charger;
        ser.write_le_i32(charger.chg_details)?;
        ser.write_u8(charger.wireless_attached as u8)?;
        ser.write_le_i16(charger.usb_charger_mv)?;
        ser.write_le_i16(charger.wireless_vrect_mv)
    }
}

/// Split a `GET_LOG` payload into its text lines.
///
/// The firmware sends plain ASCII. Anything else is replaced rather than
/// rejected, and empty lines are dropped.
pub fn decode_log(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .lines()
        .map(|l| l.trim_end_matches('\0'))
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod test {
    use super::super::{parse, Opcode, MAX_PAYLOAD};
    use super::*;

    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    impl Arbitrary for DeviceState {
        fn arbitrary(g: &mut Gen) -> Self {
            Self {
                motors: MotorState {
                    control: Pair::new(u8::arbitrary(g), u8::arbitrary(g)),
                    faults: Pair::new(u8::arbitrary(g), u8::arbitrary(g)),
                    encoder_counts: Pair::new(i32::arbitrary(g), i32::arbitrary(g)),
                },
                battery: BatteryDetails {
                    voltage_mv: i16::arbitrary(g),
                    safety_status: u8::arbitrary(g),
                    temperature: i16::arbitrary(g),
                    state_of_health: u8::arbitrary(g),
                    flags: i16::arbitrary(g),
                },
                charger: ChargerDetails {
                    chg_details: i32::arbitrary(g),
                    wireless_attached: bool::arbitrary(g),
                    usb_charger_mv: i16::arbitrary(g),
                    wireless_vrect_mv: i16::arbitrary(g),
                },
            }
        }
    }

    #[quickcheck]
    fn roundtrip_telemetry_frame(state: DeviceState) -> bool {
        let frame = state.frame_vec(Opcode::GetState);
        let (amt, res) = parse(&frame, MAX_PAYLOAD);
        if amt != frame.len() {
            return false;
        }
        match res.ok() {
            Some((Opcode::GetState, payload)) => {
                payload.len() == TELEMETRY_LEN && DeviceState::decode(payload).ok() == Some(state)
            }
            _ => false,
        }
    }

    #[test]
    fn decode_known_layout() {
        let payload = [
            0x79, 0xfa, // control
            0x01, 0x02, // faults
            0x78, 0x56, 0x34, 0x12, // encoder left
            0xfe, 0xff, 0xff, 0xff, // encoder right
            0x68, 0x10, // 4200 mV
            0x05, // safety status
            0xb9, 0x0b, // 3001 (0.1 K)
            0x63, // state of health
            0x0c, 0x80, // flags
            0xef, 0xbe, 0xad, 0xde, // chg details
            0x01, // wireless attached
            0x88, 0x13, // 5000 mV
            0xd0, 0x07, // 2000 mV
        ];
        assert_eq!(payload.len(), TELEMETRY_LEN);

        let state = DeviceState::decode(&payload).unwrap();
        assert_eq!(state.motors.control, Pair::new(0x79, 0xfa));
        assert_eq!(state.motors.faults, Pair::new(0x01, 0x02));
        assert_eq!(state.motors.encoder_counts, Pair::new(0x12345678, -2));
        assert_eq!(state.battery.voltage_mv, 4200);
        assert_eq!(state.battery.safety_status, 5);
        assert_eq!(state.battery.temperature, 3001);
        assert_eq!(state.battery.state_of_health, 0x63);
        assert_eq!(state.battery.flags, 0x800c_u16 as i16);
        assert_eq!(state.charger.chg_details, 0xdeadbeef_u32 as i32);
        assert!(state.charger.wireless_attached);
        assert_eq!(state.charger.usb_charger_mv, 5000);
        assert_eq!(state.charger.wireless_vrect_mv, 2000);

        assert_eq!(state.battery.voltage(), 4.2);
        assert_eq!(state.battery.temperature_kelvin(), 300.1);
        assert_eq!(state.charger.usb_charger_voltage(), 5.0);
        assert_eq!(state.charger.wireless_vrect_voltage(), 2.0);
    }

    #[test]
    fn wireless_attached_is_exactly_one() {
        let mut state = DeviceState::default();
        state.charger.wireless_attached = true;
        let mut payload = Vec::new();
        state.payload(&mut payload).unwrap();
        payload[24] = 2;
        assert!(!DeviceState::decode(&payload).unwrap().charger.wireless_attached);
    }

    #[test]
    fn decode_short_payload() {
        assert!(matches!(
            DeviceState::decode(&[0; TELEMETRY_LEN - 1]),
            Err(Error::Decode {
                len: 28,
                expected: TELEMETRY_LEN
            })
        ));
    }

    #[test]
    fn decode_ignores_trailing() {
        let mut payload = vec![0; TELEMETRY_LEN + 3];
        payload[4] = 7;
        let state = DeviceState::decode(&payload).unwrap();
        assert_eq!(state.motors.encoder_counts.left, 7);
    }

    #[test]
    fn log_lines() {
        assert_eq!(
            decode_log(b"boot ok\nmotor init\r\n\nbattery low\0\0"),
            vec!["boot ok", "motor init", "battery low"]
        );
        assert!(decode_log(b"").is_empty());
    }
}
