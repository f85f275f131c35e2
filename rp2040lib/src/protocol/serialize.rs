use core::convert::Infallible;

use super::{Marker, Opcode};

/// A trait for serializing frames.
pub trait Serializer {
    type Error;

    fn write_u8(&mut self, val: u8) -> Result<(), Self::Error>;

    // everything else can be written in terms of write_u8

    // Note: specialize these in SerializerLength and &mut S too, if
    // you add a method here.

    fn write_bytes(&mut self, val: &[u8]) -> Result<(), Self::Error> {
        for b in val.iter() {
            self.write_u8(*b)?;
        }
        Ok(())
    }

    fn write_marker(&mut self, marker: Marker) -> Result<(), Self::Error> {
        self.write_u8(marker.byte())
    }

    fn write_le_u16(&mut self, val: u16) -> Result<(), Self::Error> {
        self.write_bytes(&val.to_le_bytes())
    }

    fn write_le_i16(&mut self, val: i16) -> Result<(), Self::Error> {
        self.write_le_u16(val as u16)
    }

    fn write_le_u32(&mut self, val: u32) -> Result<(), Self::Error> {
        self.write_bytes(&val.to_le_bytes())
    }

    fn write_le_i32(&mut self, val: i32) -> Result<(), Self::Error> {
        self.write_le_u32(val as u32)
    }
}

impl<S> Serializer for &mut S
where
    S: Serializer,
{
    type Error = S::Error;

    fn write_u8(&mut self, val: u8) -> Result<(), Self::Error> {
        (*self).write_u8(val)
    }

    fn write_bytes(&mut self, val: &[u8]) -> Result<(), Self::Error> {
        (*self).write_bytes(val)
    }

    fn write_le_u16(&mut self, val: u16) -> Result<(), Self::Error> {
        (*self).write_le_u16(val)
    }

    fn write_le_i16(&mut self, val: i16) -> Result<(), Self::Error> {
        (*self).write_le_i16(val)
    }

    fn write_le_u32(&mut self, val: u32) -> Result<(), Self::Error> {
        (*self).write_le_u32(val)
    }

    fn write_le_i32(&mut self, val: i32) -> Result<(), Self::Error> {
        (*self).write_le_i32(val)
    }
}

impl Serializer for Vec<u8> {
    type Error = Infallible;

    fn write_u8(&mut self, val: u8) -> Result<(), Self::Error> {
        self.push(val);
        Ok(())
    }

    fn write_bytes(&mut self, val: &[u8]) -> Result<(), Self::Error> {
        self.extend_from_slice(val);
        Ok(())
    }
}

/// Wrap an std::io::Write to become a Serializer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SerializerWrap<T> {
    inner: T,
}

impl<T> SerializerWrap<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn done(self) -> T {
        self.inner
    }
}

impl<T> Serializer for SerializerWrap<T>
where
    T: std::io::Write,
{
    type Error = std::io::Error;

    fn write_u8(&mut self, val: u8) -> Result<(), Self::Error> {
        self.inner.write_all(&[val])
    }

    fn write_bytes(&mut self, val: &[u8]) -> Result<(), Self::Error> {
        self.inner.write_all(val)
    }
}

/// A serializer that only counts bytes written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SerializerLength {
    len: usize,
}

impl SerializerLength {
    pub fn new() -> Self {
        SerializerLength { len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Serializer for SerializerLength {
    type Error = Infallible;

    fn write_u8(&mut self, _val: u8) -> Result<(), Self::Error> {
        self.len += 1;
        Ok(())
    }

    fn write_bytes(&mut self, val: &[u8]) -> Result<(), Self::Error> {
        self.len += val.len();
        Ok(())
    }

    fn write_le_u16(&mut self, _val: u16) -> Result<(), Self::Error> {
        self.len += 2;
        Ok(())
    }

    fn write_le_i16(&mut self, _val: i16) -> Result<(), Self::Error> {
        self.len += 2;
        Ok(())
    }

    fn write_le_u32(&mut self, _val: u32) -> Result<(), Self::Error> {
        self.len += 4;
        Ok(())
    }

    fn write_le_i32(&mut self, _val: i32) -> Result<(), Self::Error> {
        self.len += 4;
        Ok(())
    }
}

/// A trait for payloads the controller sends back in variable-length
/// frames.
///
/// The host never sends these, but the simulator and the tests need to
/// produce them.
pub trait MessageSerialize {
    /// Serialize just the payload.
    ///
    /// For this to work correctly, it *must* perform the same actions
    /// every time it is called with the same message. That means no
    /// IO, no funny business.
    fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer;

    /// Serialize the payload into a full frame, with opcode, length
    /// header and start/stop markers.
    fn frame<S>(&self, opcode: Opcode, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        // run it once to get a length
        let mut len_ser = SerializerLength::new();
        match self.payload(&mut len_ser) {
            Ok(()) => {}
            Err(e) => match e {},
        }
        let len = len_ser.len() as u16;

        ser.write_marker(Marker::Start)?;
        ser.write_u8(opcode.byte())?;
        ser.write_le_u16(len)?;
        self.payload(ser)?;
        ser.write_marker(Marker::Stop)
    }

    /// Convenience wrapper around [MessageSerialize::frame] producing a
    /// fresh buffer.
    fn frame_vec(&self, opcode: Opcode) -> Vec<u8> {
        let mut out = Vec::new();
        match self.frame(opcode, &mut out) {
            Ok(()) => out,
            Err(e) => match e {},
        }
    }
}

/// A raw payload, sent as-is.
impl MessageSerialize for [u8] {
    fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        ser.write_bytes(self)
    }
}

/// Log text, as answered to `GET_LOG`.
impl MessageSerialize for str {
    fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        ser.write_bytes(self.as_bytes())
    }
}
