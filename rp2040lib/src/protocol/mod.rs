pub const BAUD_RATE: u32 = 115200;

/// Outbound command frames are always this long.
pub const COMMAND_FRAME_LEN: usize = 5;

/// Inbound frame header: start marker, opcode, u16 length.
pub const HEADER_LEN: usize = 4;

/// Sanity ceiling for the length field of an inbound frame.
pub const MAX_PAYLOAD: usize = 2048;

mod opcode;
pub use opcode::*;

mod command;
pub use command::*;

pub mod parse;
pub use parse::{Desync, FrameResult};

pub mod serialize;
pub use serialize::{MessageSerialize, Serializer};

mod telemetry;
pub use telemetry::*;

/// Find the next inbound frame in `input`, skipping data before it.
///
/// Returns the *number of consumed bytes* and what was found. See
/// [parse::frame_raw] for the details.
pub fn parse(input: &[u8], max_payload: usize) -> (usize, FrameResult<'_>) {
    parse::frame_raw(input, max_payload)
}

/// Serialize a command into its fixed 5-byte frame.
pub fn serialize<W>(writer: &mut W, command: &Command) -> std::io::Result<()>
where
    W: std::io::Write,
{
    let mut ser = serialize::SerializerWrap::new(writer);
    command.frame(&mut ser)
}
