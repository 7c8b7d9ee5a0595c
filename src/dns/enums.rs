use std::fmt;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DNSResourceType {
    #[default]
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    OPT,
    IXFR,
    AXFR,
    ANY,
    Unknown(u16),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DNSResourceClass {
    #[default]
    IN,
    CS,
    CH,
    HS,
    ANY,
    /// Anything else, including the UDP payload size carried by OPT records
    Unknown(u16),
}

/// Response codes from RFC 1035 section 4.1.1
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    NoError = 0,
    FormatError = 1,
    ServerFailure = 2,
    NameError = 3,
    NotImplemented = 4,
    Refused = 5,
}

impl ResponseCode {
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl From<u16> for DNSResourceClass {
    fn from(value: u16) -> Self {
        match value {
            1 => DNSResourceClass::IN,
            2 => DNSResourceClass::CS,
            3 => DNSResourceClass::CH,
            4 => DNSResourceClass::HS,
            255 => DNSResourceClass::ANY,
            x => DNSResourceClass::Unknown(x),
        }
    }
}

impl From<DNSResourceClass> for u16 {
    fn from(value: DNSResourceClass) -> Self {
        match value {
            DNSResourceClass::IN => 1,
            DNSResourceClass::CS => 2,
            DNSResourceClass::CH => 3,
            DNSResourceClass::HS => 4,
            DNSResourceClass::ANY => 255,
            DNSResourceClass::Unknown(x) => x,
        }
    }
}

impl From<u16> for DNSResourceType {
    fn from(value: u16) -> Self {
        match value {
            1 => DNSResourceType::A,
            2 => DNSResourceType::NS,
            5 => DNSResourceType::CNAME,
            6 => DNSResourceType::SOA,
            12 => DNSResourceType::PTR,
            15 => DNSResourceType::MX,
            16 => DNSResourceType::TXT,
            28 => DNSResourceType::AAAA,
            33 => DNSResourceType::SRV,
            41 => DNSResourceType::OPT,
            251 => DNSResourceType::IXFR,
            252 => DNSResourceType::AXFR,
            255 => DNSResourceType::ANY,
            x => DNSResourceType::Unknown(x),
        }
    }
}

impl From<DNSResourceType> for u16 {
    fn from(value: DNSResourceType) -> Self {
        match value {
            DNSResourceType::A => 1,
            DNSResourceType::NS => 2,
            DNSResourceType::CNAME => 5,
            DNSResourceType::SOA => 6,
            DNSResourceType::PTR => 12,
            DNSResourceType::MX => 15,
            DNSResourceType::TXT => 16,
            DNSResourceType::AAAA => 28,
            DNSResourceType::SRV => 33,
            DNSResourceType::OPT => 41,
            DNSResourceType::IXFR => 251,
            DNSResourceType::AXFR => 252,
            DNSResourceType::ANY => 255,
            DNSResourceType::Unknown(x) => x,
        }
    }
}

impl fmt::Display for DNSResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DNSResourceType::Unknown(x) => write!(f, "TYPE{}", x),
            other => write!(f, "{:?}", other),
        }
    }
}
