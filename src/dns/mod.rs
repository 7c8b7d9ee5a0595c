pub mod common;
pub mod enums;
pub mod header;
pub mod question;
pub mod resource;

use bitstream_io::{BigEndian, BitReader, BitWriter};
use common::PacketComponent;
use enums::DNSResourceType;
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use thiserror::Error;
use tracing::trace;

/// Largest reply sent over UDP to clients that do not advertise more
pub const MAX_UDP_PAYLOAD: usize = 512;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid DNS header")]
    InvalidHeader,
    #[error("Invalid DNS label")]
    InvalidLabel,
    #[error("DNS name too long")]
    NameTooLong,
    #[error("Compression pointer loop")]
    PointerLoop,
    #[error("Invalid question section")]
    InvalidQuestionSection,
    #[error("Invalid {0} record data")]
    InvalidRData(DNSResourceType),
    #[error("Too many records in {0} section")]
    SectionTooLarge(&'static str),
    #[error("Invalid bit stream: {0}")]
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl DNSPacket {
    /// A single-question query with recursion desired.
    pub fn query(id: u16, name: impl Into<String>, qtype: DNSResourceType) -> Self {
        let mut packet = DNSPacket::default();
        packet.header.id = id;
        packet.header.rd = true;
        packet.questions.push(DNSQuestion::new(name, qtype));
        packet.header.qdcount = 1;
        packet
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        let mut reader = BitReader::<_, BigEndian>::new(buf);
        let mut packet = DNSPacket::default();
        packet
            .header
            .read(&mut reader, buf)
            .map_err(|_| ParseError::InvalidHeader)?;

        for _ in 0..packet.header.qdcount {
            let mut question = DNSQuestion::default();
            question.read(&mut reader, buf)?;
            packet.questions.push(question);
        }

        for _ in 0..packet.header.ancount {
            let mut answer = DNSResource::default();
            answer.read(&mut reader, buf)?;
            packet.answers.push(answer);
        }

        for _ in 0..packet.header.nscount {
            let mut authority = DNSResource::default();
            authority.read(&mut reader, buf)?;
            packet.authorities.push(authority);
        }

        for _ in 0..packet.header.arcount {
            let mut resource = DNSResource::default();
            resource.read(&mut reader, buf)?;
            packet.resources.push(resource);
        }

        Ok(packet)
    }

    /// Encodes the message. Header counts are taken from the sections, not
    /// from the stored header.
    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::new();
        let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);

        let mut header = self.header.clone();
        header.qdcount = section_count(self.questions.len(), "question")?;
        header.ancount = section_count(self.answers.len(), "answer")?;
        header.nscount = section_count(self.authorities.len(), "authority")?;
        header.arcount = section_count(self.resources.len(), "additional")?;
        header.write(&mut writer)?;

        for question in self.questions.iter() {
            question.write(&mut writer)?;
        }

        for answer in self.answers.iter() {
            answer.write(&mut writer)?;
        }

        for authority in self.authorities.iter() {
            authority.write(&mut writer)?;
        }

        for resource in self.resources.iter() {
            resource.write(&mut writer)?;
        }

        Ok(buf)
    }

    /// Header and questions only, with TC set, for replies that do not fit
    /// in a datagram.
    pub fn truncated(&self) -> Self {
        let mut header = self.header.clone();
        header.tc = true;
        header.ancount = 0;
        header.nscount = 0;
        header.arcount = 0;
        DNSPacket {
            header,
            questions: self.questions.clone(),
            ..Default::default()
        }
    }
}

fn section_count(len: usize, section: &'static str) -> Result<u16, ParseError> {
    u16::try_from(len).map_err(|_| ParseError::SectionTooLarge(section))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::resource::{DNSResourceData, SoaData};
    use std::net::Ipv4Addr;

    fn query_bytes(name: &str, qtype: u16) -> Vec<u8> {
        let mut packet = vec![0xbe, 0xef, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        packet.extend_from_slice(&common::encode_name(name).unwrap());
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x01]);
        packet
    }

    #[test]
    fn test_parse_query() {
        let packet = DNSPacket::parse(&query_bytes("www.example.com.", 1)).unwrap();
        assert_eq!(packet.header.id, 0xbeef);
        assert!(packet.header.rd);
        assert!(!packet.header.qr);
        assert_eq!(packet.questions.len(), 1);
        assert_eq!(packet.questions[0].name, "www.example.com.");
        assert_eq!(packet.questions[0].qtype, DNSResourceType::A);
    }

    #[test]
    fn test_short_buffer_is_invalid_header() {
        assert!(matches!(
            DNSPacket::parse(&[0x12, 0x34, 0x01]),
            Err(ParseError::InvalidHeader)
        ));
    }

    #[test]
    fn test_truncated_question_is_rejected() {
        let mut bytes = query_bytes("www.example.com.", 1);
        bytes.truncate(bytes.len() - 3);
        assert!(DNSPacket::parse(&bytes).is_err());
    }

    #[test]
    fn test_serialize_sets_counts_from_sections() {
        let mut packet = DNSPacket::query(7, "example.com.", DNSResourceType::SOA);
        packet.header.qr = true;
        packet.authorities.push(DNSResource::soa(
            "example.com.",
            60,
            SoaData {
                mname: "ns1.example.com.".to_string(),
                rname: "hostmaster.example.com.".to_string(),
                serial: 1_700_000_000,
                refresh: 86400,
                retry: 7200,
                expire: 86400,
                minimum: 60,
            },
        ));
        packet.answers.push(DNSResource::a(
            "example.com.",
            300,
            Ipv4Addr::new(192, 0, 2, 1),
        ));

        let bytes = packet.serialize().unwrap();
        // ANCOUNT and NSCOUNT
        assert_eq!(&bytes[6..10], &[0, 1, 0, 1]);

        let parsed = DNSPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.answers, packet.answers);
        assert_eq!(parsed.authorities, packet.authorities);
    }

    #[test]
    fn test_parse_compressed_answer() {
        // Reply for NS example.com. with the target compressed against the question
        let mut bytes = vec![0x00, 0x01, 0x81, 0x80, 0, 1, 0, 1, 0, 0, 0, 0];
        bytes.extend_from_slice(b"\x07example\x03com\x00\x00\x02\x00\x01");
        bytes.extend_from_slice(b"\xc0\x0c\x00\x02\x00\x01\x00\x00\x0e\x10");
        bytes.extend_from_slice(&[0x00, 0x06]);
        bytes.extend_from_slice(b"\x03ns1\xc0\x0c");

        let packet = DNSPacket::parse(&bytes).unwrap();
        assert_eq!(packet.answers.len(), 1);
        assert_eq!(packet.answers[0].name, "example.com.");
        assert_eq!(packet.answers[0].ttl, 3600);
        assert_eq!(
            packet.answers[0].rdata,
            DNSResourceData::NS("ns1.example.com.".to_string())
        );
    }

    #[test]
    fn test_truncated_keeps_questions_only() {
        let mut packet = DNSPacket::query(9, "example.com.", DNSResourceType::A);
        packet
            .answers
            .push(DNSResource::a("example.com.", 300, Ipv4Addr::LOCALHOST));
        let truncated = packet.truncated();
        assert!(truncated.header.tc);
        assert_eq!(truncated.questions, packet.questions);
        assert!(truncated.answers.is_empty());
    }
}
