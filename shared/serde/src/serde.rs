use crate::{ByteReader, ByteWriter, SerdeErr};

/// A type that can be written to and read from the wire
pub trait Serde: Sized {
    /// Serialize Self to a ByteWriter
    fn ser(&self, writer: &mut ByteWriter);

    /// Parse Self from a ByteReader
    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr>;

    /// Return length of value in bytes
    fn byte_length(&self) -> usize;
}

/// Implemented by types whose encoded size never changes
pub trait ConstByteLength {
    fn const_byte_length() -> usize;
}
