use std::net::{Ipv4Addr, Ipv6Addr};

use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, decode_name, encode_name},
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSResource {
    /// Owner name in trailing-dot form
    pub name: String,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdata: DNSResourceData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DNSResourceData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(String),
    CNAME(String),
    SOA(SoaData),
    /// Record data for types this server does not interpret
    Raw(Vec<u8>),
}

impl Default for DNSResourceData {
    fn default() -> Self {
        DNSResourceData::Raw(Vec::new())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SoaData {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl DNSResource {
    pub fn a(name: impl Into<String>, ttl: u32, addr: Ipv4Addr) -> Self {
        Self::with_data(name, DNSResourceType::A, ttl, DNSResourceData::A(addr))
    }

    pub fn ns(name: impl Into<String>, ttl: u32, target: impl Into<String>) -> Self {
        Self::with_data(name, DNSResourceType::NS, ttl, DNSResourceData::NS(target.into()))
    }

    pub fn cname(name: impl Into<String>, ttl: u32, target: impl Into<String>) -> Self {
        Self::with_data(
            name,
            DNSResourceType::CNAME,
            ttl,
            DNSResourceData::CNAME(target.into()),
        )
    }

    pub fn soa(name: impl Into<String>, ttl: u32, soa: SoaData) -> Self {
        Self::with_data(name, DNSResourceType::SOA, ttl, DNSResourceData::SOA(soa))
    }

    fn with_data(
        name: impl Into<String>,
        rtype: DNSResourceType,
        ttl: u32,
        rdata: DNSResourceData,
    ) -> Self {
        Self {
            name: name.into(),
            rtype,
            rclass: DNSResourceClass::IN,
            ttl,
            rdata,
        }
    }

    fn encode_rdata(&self) -> Result<Vec<u8>, ParseError> {
        let bytes = match &self.rdata {
            DNSResourceData::A(addr) => addr.octets().to_vec(),
            DNSResourceData::AAAA(addr) => addr.octets().to_vec(),
            DNSResourceData::NS(target) | DNSResourceData::CNAME(target) => encode_name(target)?,
            DNSResourceData::SOA(soa) => {
                let mut out = encode_name(&soa.mname)?;
                out.extend_from_slice(&encode_name(&soa.rname)?);
                for value in [soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum] {
                    out.extend_from_slice(&value.to_be_bytes());
                }
                out
            }
            DNSResourceData::Raw(bytes) => bytes.clone(),
        };

        if bytes.len() > u16::MAX as usize {
            return Err(ParseError::InvalidRData(self.rtype));
        }
        Ok(bytes)
    }
}

impl PacketComponent for DNSResource {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        let rdata = self.encode_rdata()?;
        self.write_name(writer, &self.name)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.rclass.into())?;
        writer.write_var::<u32>(32, self.ttl)?;
        writer.write_var::<u16>(16, rdata.len() as u16)?;
        writer.write_bytes(&rdata)?;
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<(), ParseError> {
        self.name = self.read_name(reader, packet)?;
        self.rtype = reader.read_var::<u16>(16)?.into();
        self.rclass = reader.read_var::<u16>(16)?.into();
        self.ttl = reader.read_var::<u32>(32)?;
        let rdlength = reader.read_var::<u16>(16)?;
        let mut buf = vec![0_u8; rdlength as usize];
        reader.read_bytes(&mut buf)?;
        self.rdata = parse_rdata(self.rtype, buf, packet)?;
        Ok(())
    }
}

fn parse_rdata(
    rtype: DNSResourceType,
    buf: Vec<u8>,
    packet: &[u8],
) -> Result<DNSResourceData, ParseError> {
    let invalid = || ParseError::InvalidRData(rtype);

    let data = match rtype {
        DNSResourceType::A => {
            let octets: [u8; 4] = buf.as_slice().try_into().map_err(|_| invalid())?;
            DNSResourceData::A(Ipv4Addr::from(octets))
        }
        DNSResourceType::AAAA => {
            let octets: [u8; 16] = buf.as_slice().try_into().map_err(|_| invalid())?;
            DNSResourceData::AAAA(Ipv6Addr::from(octets))
        }
        DNSResourceType::NS | DNSResourceType::CNAME => {
            let (target, end) = decode_name(&buf, 0, packet)?;
            if end != buf.len() {
                return Err(invalid());
            }
            if rtype == DNSResourceType::NS {
                DNSResourceData::NS(target)
            } else {
                DNSResourceData::CNAME(target)
            }
        }
        DNSResourceType::SOA => {
            let (mname, pos) = decode_name(&buf, 0, packet)?;
            let (rname, pos) = decode_name(&buf, pos, packet)?;
            let timers = buf.get(pos..).filter(|t| t.len() == 20).ok_or_else(invalid)?;
            let mut values = timers
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]));
            let mut next = || values.next().ok_or_else(invalid);
            DNSResourceData::SOA(SoaData {
                mname,
                rname,
                serial: next()?,
                refresh: next()?,
                retry: next()?,
                expire: next()?,
                minimum: next()?,
            })
        }
        _ => DNSResourceData::Raw(buf),
    };

    Ok(data)
}
