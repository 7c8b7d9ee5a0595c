use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::ParseError;

/// Longest encoded domain name, including length octets
pub const MAX_NAME_LEN: usize = 255;
/// Longest single label
pub const MAX_LABEL_LEN: usize = 63;
/// Compression pointers followed before a name is rejected as a loop
const MAX_POINTER_HOPS: usize = 32;

pub trait PacketComponent {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    /// `packet` is the whole message, needed to follow compression pointers.
    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<(), ParseError>;

    fn read_name<E: Endianness>(
        &self,
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<String, ParseError> {
        // Collect the raw wire form up to the terminator or first pointer,
        // then decode it against the full packet.
        let mut raw = Vec::new();
        loop {
            let len = reader.read_var::<u8>(8)?;
            raw.push(len);
            match len & 0xC0 {
                0x00 if len == 0 => break,
                0x00 => {
                    let mut buf = vec![0; len as usize];
                    reader.read_bytes(&mut buf)?;
                    raw.extend_from_slice(&buf);
                }
                0xC0 => {
                    raw.push(reader.read_var::<u8>(8)?);
                    break;
                }
                _ => return Err(ParseError::InvalidLabel),
            }
            if raw.len() > MAX_NAME_LEN {
                return Err(ParseError::NameTooLong);
            }
        }

        decode_name(&raw, 0, packet).map(|(name, _)| name)
    }

    fn write_name<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
        name: &str,
    ) -> Result<(), ParseError> {
        writer.write_bytes(&encode_name(name)?)?;
        Ok(())
    }
}

/// Decodes a possibly compressed name starting at `start` in `bytes`.
///
/// Pointers are resolved against `packet`. Returns the name in
/// trailing-dot form and the offset in `bytes` just past the name.
pub fn decode_name(bytes: &[u8], start: usize, packet: &[u8]) -> Result<(String, usize), ParseError> {
    let mut labels: Vec<String> = Vec::new();
    let mut src = bytes;
    let mut pos = start;
    let mut resume = None;
    let mut hops = 0;
    let mut encoded_len = 1;

    loop {
        let len = *src.get(pos).ok_or(ParseError::InvalidLabel)?;
        match len & 0xC0 {
            0x00 if len == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let label = src
                    .get(pos + 1..pos + 1 + len as usize)
                    .ok_or(ParseError::InvalidLabel)?;
                encoded_len += label.len() + 1;
                if encoded_len > MAX_NAME_LEN {
                    return Err(ParseError::NameTooLong);
                }
                labels.push(escape_label(label));
                pos += 1 + len as usize;
            }
            0xC0 => {
                let low = *src.get(pos + 1).ok_or(ParseError::InvalidLabel)?;
                if resume.is_none() {
                    resume = Some(pos + 2);
                }
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(ParseError::PointerLoop);
                }
                pos = (((len & 0x3F) as usize) << 8) | low as usize;
                src = packet;
            }
            _ => return Err(ParseError::InvalidLabel),
        }
    }

    Ok((labels_to_name(&labels), resume.unwrap_or(pos)))
}

/// Uncompressed wire form of `name`, given in presentation form: `\.` and
/// `\\` stand for a literal dot and backslash inside a label, `\DDD` for the
/// octet with decimal value DDD. The trailing dot is optional.
pub fn encode_name(name: &str) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(name.len() + 2);
    if name != "." {
        for label in split_labels(name)? {
            if label.len() > MAX_LABEL_LEN {
                return Err(ParseError::InvalidLabel);
            }
            out.push(label.len() as u8);
            out.extend_from_slice(&label);
        }
    }
    out.push(0);

    if out.len() > MAX_NAME_LEN {
        return Err(ParseError::NameTooLong);
    }
    Ok(out)
}

/// Raw label octets of a presentation-form name. Empty labels are rejected.
fn split_labels(name: &str) -> Result<Vec<Vec<u8>>, ParseError> {
    let bytes = name.as_bytes();
    let mut labels = Vec::new();
    let mut label = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => {
                let digits = bytes
                    .get(pos + 1..pos + 4)
                    .filter(|d| d.iter().all(u8::is_ascii_digit));
                match digits {
                    Some(d) => {
                        let value = d
                            .iter()
                            .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'));
                        label.push(u8::try_from(value).map_err(|_| ParseError::InvalidLabel)?);
                        pos += 4;
                    }
                    None => {
                        label.push(*bytes.get(pos + 1).ok_or(ParseError::InvalidLabel)?);
                        pos += 2;
                    }
                }
            }
            b'.' => {
                if label.is_empty() {
                    return Err(ParseError::InvalidLabel);
                }
                labels.push(std::mem::take(&mut label));
                pos += 1;
            }
            byte => {
                label.push(byte);
                pos += 1;
            }
        }
    }

    if !label.is_empty() {
        labels.push(label);
    }
    Ok(labels)
}

/// Presentation form of one label. Printable ASCII is kept as is, dots and
/// backslashes are escaped, every other octet becomes `\DDD`.
fn escape_label(label: &[u8]) -> String {
    let mut out = String::with_capacity(label.len());
    for &byte in label {
        match byte {
            b'.' | b'\\' => {
                out.push('\\');
                out.push(byte as char);
            }
            0x21..=0x7E => out.push(byte as char),
            _ => out.push_str(&format!("\\{:03}", byte)),
        }
    }
    out
}

/// Appends the root dot when missing. An escaped trailing dot is part of
/// the last label and does not count.
pub fn to_fqdn(name: &str) -> String {
    if is_absolute(name) {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

fn is_absolute(name: &str) -> bool {
    match name.strip_suffix('.') {
        Some(rest) => rest.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 0,
        None => false,
    }
}

fn labels_to_name(labels: &[String]) -> String {
    if labels.is_empty() {
        return ".".to_string();
    }
    let mut name = labels.join(".");
    name.push('.');
    name
}
