use crate::{ByteReader, ByteWriter, ConstByteLength, Serde, SerdeErr};

macro_rules! impl_serde_for_uint {
    ($type:ty, $write:ident, $read:ident) => {
        impl Serde for $type {
            fn ser(&self, writer: &mut ByteWriter) {
                writer.$write(*self);
            }

            fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
                reader.$read()
            }

            fn byte_length(&self) -> usize {
                std::mem::size_of::<$type>()
            }
        }

        impl ConstByteLength for $type {
            fn const_byte_length() -> usize {
                std::mem::size_of::<$type>()
            }
        }
    };
}

impl_serde_for_uint!(u8, write_u8, read_u8);
impl_serde_for_uint!(u16, write_u16, read_u16);
impl_serde_for_uint!(u32, write_u32, read_u32);
impl_serde_for_uint!(u64, write_u64, read_u64);

impl Serde for bool {
    fn ser(&self, writer: &mut ByteWriter) {
        writer.write_u8(u8::from(*self));
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SerdeErr::InvalidValue {
                type_name: "bool",
                value: u64::from(other),
            }),
        }
    }

    fn byte_length(&self) -> usize {
        1
    }
}

impl ConstByteLength for bool {
    fn const_byte_length() -> usize {
        1
    }
}

impl<T: Serde> Serde for Option<T> {
    fn ser(&self, writer: &mut ByteWriter) {
        match self {
            Some(value) => {
                true.ser(writer);
                value.ser(writer);
            }
            None => false.ser(writer),
        }
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        if bool::de(reader)? {
            Ok(Some(T::de(reader)?))
        } else {
            Ok(None)
        }
    }

    fn byte_length(&self) -> usize {
        1 + self.as_ref().map_or(0, |value| value.byte_length())
    }
}

// Byte strings carry a u32 length prefix
impl Serde for Vec<u8> {
    fn ser(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.len() as u32);
        writer.write_bytes(self);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let length = reader.read_u32()? as usize;
        Ok(reader.read_bytes(length)?.to_vec())
    }

    fn byte_length(&self) -> usize {
        4 + self.len()
    }
}

impl Serde for String {
    fn ser(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.len() as u32);
        writer.write_bytes(self.as_bytes());
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let length = reader.read_u32()? as usize;
        let bytes = reader.read_bytes(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SerdeErr::InvalidUtf8)
    }

    fn byte_length(&self) -> usize {
        4 + self.len()
    }
}
