use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::PacketComponent,
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSQuestion {
    /// Query name in trailing-dot form, case preserved from the wire
    pub name: String,
    pub qtype: DNSResourceType,
    pub qclass: DNSResourceClass,
}

impl DNSQuestion {
    pub fn new(name: impl Into<String>, qtype: DNSResourceType) -> Self {
        Self {
            name: name.into(),
            qtype,
            qclass: DNSResourceClass::IN,
        }
    }
}

impl PacketComponent for DNSQuestion {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        self.write_name(writer, &self.name)?;
        writer.write_var::<u16>(16, self.qtype.into())?;
        writer.write_var::<u16>(16, self.qclass.into())?;
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<(), ParseError> {
        let name = self
            .read_name(reader, packet)
            .map_err(|_| ParseError::InvalidQuestionSection)?;
        let qtype = reader.read_var::<u16>(16)?.into();
        let qclass = reader.read_var::<u16>(16)?.into();
        *self = DNSQuestion {
            name,
            qtype,
            qclass,
        };
        Ok(())
    }
}
