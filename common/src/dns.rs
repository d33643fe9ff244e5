//! Forged DNS answers for the provisioning access point.
//!
//! Every well-formed single-question query is answered with one A record that
//! points at the gateway itself, so clients probing for a captive portal land
//! on the local configuration page.

use std::net::Ipv4Addr;

use thiserror::Error;

pub const HEADER_LEN: usize = 12;
pub const ANSWER_LEN: usize = 16;
pub const MAX_DATAGRAM_LEN: usize = 512;

const FLAG_QR: u16 = 0x8000;
const OPCODE_SHIFT: u16 = 11;
const OPCODE_MASK: u16 = 0x0f;
const OPCODE_QUERY: u8 = 0;

const QUESTION_NAME_POINTER: [u8; 2] = [0xc0, HEADER_LEN as u8];
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;
const ANSWER_TTL_SECS: u32 = 1;
const IPV4_RDLENGTH: u16 = 4;

const OFFSET_ID: usize = 0;
const OFFSET_FLAGS: usize = 2;
const OFFSET_QDCOUNT: usize = 4;
const OFFSET_ANCOUNT: usize = 6;
const OFFSET_NSCOUNT: usize = 8;
const OFFSET_ARCOUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),
    #[error("message is a response, not a query")]
    NotAQuery,
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(u8),
    #[error("unexpected record counts (qd={qd}, an={an}, ns={ns}, ar={ar})")]
    UnexpectedCounts { qd: u16, an: u16, ns: u16, ar: u16 },
    #[error("question section is malformed")]
    MalformedQuestion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl DnsHeader {
    pub fn parse(message: &[u8]) -> Result<Self, DnsError> {
        if message.len() < HEADER_LEN {
            return Err(DnsError::Truncated(message.len()));
        }
        Ok(Self {
            id: read_u16(message, OFFSET_ID)?,
            flags: read_u16(message, OFFSET_FLAGS)?,
            qd_count: read_u16(message, OFFSET_QDCOUNT)?,
            an_count: read_u16(message, OFFSET_ANCOUNT)?,
            ns_count: read_u16(message, OFFSET_NSCOUNT)?,
            ar_count: read_u16(message, OFFSET_ARCOUNT)?,
        })
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags >> OPCODE_SHIFT) & OPCODE_MASK) as u8
    }
}

/// Builds the redirect answer for `query`, or says why it must be dropped.
pub fn forge_redirect(query: &[u8], answer_ip: Ipv4Addr) -> Result<Vec<u8>, DnsError> {
    let header = DnsHeader::parse(query)?;

    if header.is_response() {
        return Err(DnsError::NotAQuery);
    }
    if header.opcode() != OPCODE_QUERY {
        return Err(DnsError::UnsupportedOpcode(header.opcode()));
    }
    if header.qd_count != 1 || header.an_count != 0 || header.ns_count != 0 || header.ar_count != 0
    {
        return Err(DnsError::UnexpectedCounts {
            qd: header.qd_count,
            an: header.an_count,
            ns: header.ns_count,
            ar: header.ar_count,
        });
    }
    question_end(query, HEADER_LEN)?;

    let mut response = Vec::with_capacity(query.len() + ANSWER_LEN);
    response.extend_from_slice(query);
    write_u16(&mut response, OFFSET_FLAGS, header.flags | FLAG_QR)?;
    write_u16(&mut response, OFFSET_ANCOUNT, header.qd_count)?;

    response.extend_from_slice(&QUESTION_NAME_POINTER);
    response.extend_from_slice(&TYPE_A.to_be_bytes());
    response.extend_from_slice(&CLASS_IN.to_be_bytes());
    response.extend_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
    response.extend_from_slice(&IPV4_RDLENGTH.to_be_bytes());
    response.extend_from_slice(&answer_ip.octets());

    Ok(response)
}

/// Walks one question entry starting at `offset` and returns the offset just
/// past its type and class fields.
fn question_end(message: &[u8], mut offset: usize) -> Result<usize, DnsError> {
    loop {
        let len = *message.get(offset).ok_or(DnsError::MalformedQuestion)?;
        match len {
            0 => {
                offset += 1;
                break;
            }
            len if len & 0xc0 == 0xc0 => {
                message
                    .get(offset + 1)
                    .ok_or(DnsError::MalformedQuestion)?;
                offset += 2;
                break;
            }
            len if len & 0xc0 != 0 => return Err(DnsError::MalformedQuestion),
            len => offset += 1 + len as usize,
        }
    }

    let end = offset + 4;
    if end > message.len() {
        return Err(DnsError::MalformedQuestion);
    }
    Ok(end)
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, DnsError> {
    let bytes = buf
        .get(offset..offset + 2)
        .ok_or(DnsError::Truncated(buf.len()))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) -> Result<(), DnsError> {
    let len = buf.len();
    let slot = buf
        .get_mut(offset..offset + 2)
        .ok_or(DnsError::Truncated(len))?;
    slot.copy_from_slice(&value.to_be_bytes());
    Ok(())
}
