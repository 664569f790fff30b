//! DNS message header and question decoding.
//!
//! Only the parts needed for correlation are decoded: header flags, RCODE
//! and the first question. Answer sections are never touched.

use std::fmt;

use thiserror::Error;

const HEADER_LEN: usize = 12;
const FLAG_QR: u16 = 0x8000;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 16;

/// Why a payload could not be decoded as a DNS message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message truncated at offset {0}")]
    Truncated(usize),
    #[error("message carries no question")]
    NoQuestion,
    #[error("label of {0} octets exceeds 63")]
    LabelTooLong(usize),
    #[error("name exceeds 255 octets")]
    NameTooLong,
    #[error("too many compression pointers")]
    PointerLoop,
    #[error("reserved label type {0:#04x}")]
    BadLabel(u8),
}

/// DNS record types (RFC 1035 Section 3.2.2, RFC 3596, RFC 9460).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Naptr,
    Ds,
    Rrsig,
    Dnskey,
    Svcb,
    Https,
    Any,
    Unknown(u16),
}

impl RecordType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::A,
            2 => Self::Ns,
            5 => Self::Cname,
            6 => Self::Soa,
            12 => Self::Ptr,
            15 => Self::Mx,
            16 => Self::Txt,
            28 => Self::Aaaa,
            33 => Self::Srv,
            35 => Self::Naptr,
            43 => Self::Ds,
            46 => Self::Rrsig,
            48 => Self::Dnskey,
            64 => Self::Svcb,
            65 => Self::Https,
            255 => Self::Any,
            n => Self::Unknown(n),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Ns => 2,
            Self::Cname => 5,
            Self::Soa => 6,
            Self::Ptr => 12,
            Self::Mx => 15,
            Self::Txt => 16,
            Self::Aaaa => 28,
            Self::Srv => 33,
            Self::Naptr => 35,
            Self::Ds => 43,
            Self::Rrsig => 46,
            Self::Dnskey => 48,
            Self::Svcb => 64,
            Self::Https => 65,
            Self::Any => 255,
            Self::Unknown(n) => n,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::A => "A",
            Self::Ns => "NS",
            Self::Cname => "CNAME",
            Self::Soa => "SOA",
            Self::Ptr => "PTR",
            Self::Mx => "MX",
            Self::Txt => "TXT",
            Self::Aaaa => "AAAA",
            Self::Srv => "SRV",
            Self::Naptr => "NAPTR",
            Self::Ds => "DS",
            Self::Rrsig => "RRSIG",
            Self::Dnskey => "DNSKEY",
            Self::Svcb => "SVCB",
            Self::Https => "HTTPS",
            Self::Any => "ANY",
            Self::Unknown(n) => return write!(f, "TYPE{n}"),
        };
        f.write_str(name)
    }
}

/// Response codes (RFC 1035 Section 4.1.1, RFC 2136).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rcode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    YxDomain,
    YxRrset,
    NxRrset,
    NotAuth,
    NotZone,
    Other(u8),
}

impl Rcode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NoError,
            1 => Self::FormErr,
            2 => Self::ServFail,
            3 => Self::NxDomain,
            4 => Self::NotImp,
            5 => Self::Refused,
            6 => Self::YxDomain,
            7 => Self::YxRrset,
            8 => Self::NxRrset,
            9 => Self::NotAuth,
            10 => Self::NotZone,
            n => Self::Other(n),
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NOERROR",
            Self::FormErr => "FORMERR",
            Self::ServFail => "SERVFAIL",
            Self::NxDomain => "NXDOMAIN",
            Self::NotImp => "NOTIMP",
            Self::Refused => "REFUSED",
            Self::YxDomain => "YXDOMAIN",
            Self::YxRrset => "YXRRSET",
            Self::NxRrset => "NXRRSET",
            Self::NotAuth => "NOTAUTH",
            Self::NotZone => "NOTZONE",
            Self::Other(n) => return write!(f, "RCODE{n}"),
        };
        f.write_str(name)
    }
}

/// A DNS question section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Presentation form without the trailing root dot; empty for the root.
    pub name: String,
    pub qtype: RecordType,
    pub qclass: u16,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = match self.qclass {
            1 => "IN".to_string(),
            3 => "CH".to_string(),
            4 => "HS".to_string(),
            255 => "ANY".to_string(),
            n => format!("CLASS{n}"),
        };
        write!(f, "{}. {} {}", self.name, class, self.qtype)
    }
}

/// A decoded DNS message header and its first question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub id: u16,
    pub flags: u16,
    pub question: Question,
}

impl DnsMessage {
    /// Decode a message from its wire form.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::Truncated(data.len()));
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let qdcount = u16::from_be_bytes([data[4], data[5]]);
        if qdcount == 0 {
            return Err(DecodeError::NoQuestion);
        }

        let mut pos = HEADER_LEN;
        let name = read_name(data, &mut pos)?;

        if pos + 4 > data.len() {
            return Err(DecodeError::Truncated(data.len()));
        }
        let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);

        Ok(Self {
            id,
            flags,
            question: Question {
                name,
                qtype: RecordType::from_u16(qtype),
                qclass,
            },
        })
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags >> 11) & 0x0F) as u8
    }

    pub fn rcode(&self) -> Rcode {
        Rcode::from_u8((self.flags & 0x0F) as u8)
    }

    /// Encode the header and question back to wire format.
    ///
    /// Counts other than QDCOUNT are written as zero. The name is read in
    /// the presentation form produced by [`DnsMessage::parse`], escapes
    /// included. Labels longer than 63 octets are cut to 63.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + self.question.name.len() + 6);

        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
        data.extend_from_slice(&[0x00; 6]); // ANCOUNT, NSCOUNT, ARCOUNT

        for label in wire_labels(&self.question.name) {
            let len = label.len().min(MAX_LABEL_LEN);
            data.push(len as u8);
            data.extend_from_slice(&label[..len]);
        }
        data.push(0);
        data.extend_from_slice(&self.question.qtype.to_u16().to_be_bytes());
        data.extend_from_slice(&self.question.qclass.to_be_bytes());

        data
    }
}

/// Read a possibly compressed name starting at `*pos` (RFC 1035 Section 4.1.4).
///
/// On return `*pos` points just past the name as it appears at the original
/// position, i.e. past the first pointer if one was followed.
fn read_name(data: &[u8], pos: &mut usize) -> Result<String, DecodeError> {
    let mut name = String::new();
    let mut wire_len = 1; // root label
    let mut cursor = *pos;
    let mut resume_at = None;
    let mut jumps = 0;

    loop {
        let &len = data.get(cursor).ok_or(DecodeError::Truncated(cursor))?;

        match len & 0xC0 {
            0x00 => {}
            0xC0 => {
                let &low = data.get(cursor + 1).ok_or(DecodeError::Truncated(cursor))?;
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(DecodeError::PointerLoop);
                }
                if resume_at.is_none() {
                    resume_at = Some(cursor + 2);
                }
                cursor = (usize::from(len & 0x3F) << 8) | usize::from(low);
                continue;
            }
            _ => return Err(DecodeError::BadLabel(len)),
        }

        let len = usize::from(len);
        cursor += 1;
        if len == 0 {
            break;
        }
        if len > MAX_LABEL_LEN {
            return Err(DecodeError::LabelTooLong(len));
        }

        let label = data
            .get(cursor..cursor + len)
            .ok_or(DecodeError::Truncated(cursor))?;
        wire_len += len + 1;
        if wire_len > MAX_NAME_LEN {
            return Err(DecodeError::NameTooLong);
        }

        if !name.is_empty() {
            name.push('.');
        }
        push_label(&mut name, label);
        cursor += len;
    }

    *pos = resume_at.unwrap_or(cursor);
    Ok(name)
}

/// Append a label in presentation form, escaping as in RFC 4343.
fn push_label(name: &mut String, label: &[u8]) {
    for &b in label {
        match b {
            b'.' | b'\\' => {
                name.push('\\');
                name.push(char::from(b));
            }
            0x21..=0x7E => name.push(char::from(b)),
            _ => name.push_str(&format!("\\{b:03}")),
        }
    }
}

/// Split a presentation-form name into wire labels, undoing [`push_label`].
fn wire_labels(name: &str) -> Vec<Vec<u8>> {
    let mut labels = Vec::new();
    if name.is_empty() {
        return labels;
    }

    let bytes = name.as_bytes();
    let mut label = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                labels.push(std::mem::take(&mut label));
                i += 1;
            }
            b'\\' => {
                let decimal = bytes
                    .get(i + 1..i + 4)
                    .filter(|digits| digits.iter().all(u8::is_ascii_digit))
                    .and_then(|digits| std::str::from_utf8(digits).ok())
                    .and_then(|digits| digits.parse::<u8>().ok());
                match (decimal, bytes.get(i + 1)) {
                    (Some(value), _) => {
                        label.push(value);
                        i += 4;
                    }
                    (None, Some(&escaped)) => {
                        label.push(escaped);
                        i += 2;
                    }
                    (None, None) => {
                        label.push(b'\\');
                        i += 1;
                    }
                }
            }
            b => {
                label.push(b);
                i += 1;
            }
        }
    }
    labels.push(label);
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_bytes(id: u16, flags: u16, labels: &[&[u8]], qtype: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&id.to_be_bytes());
        data.extend_from_slice(&flags.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        for label in labels {
            data.push(label.len() as u8);
            data.extend_from_slice(label);
        }
        data.push(0);
        data.extend_from_slice(&qtype.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01]);
        data
    }

    #[test]
    fn parse_query() {
        let data = query_bytes(0x1234, 0x0100, &[b"www", b"example", b"com"], 1);

        let msg = DnsMessage::parse(&data).unwrap();

        assert_eq!(msg.id, 0x1234);
        assert!(!msg.is_response());
        assert_eq!(msg.opcode(), 0);
        assert_eq!(msg.question.name, "www.example.com");
        assert_eq!(msg.question.qtype, RecordType::A);
        assert_eq!(msg.question.to_string(), "www.example.com. IN A");
    }

    #[test]
    fn parse_response_rcode() {
        let data = query_bytes(7, 0x8183, &[b"missing", b"example"], 28);

        let msg = DnsMessage::parse(&data).unwrap();

        assert!(msg.is_response());
        assert_eq!(msg.rcode(), Rcode::NxDomain);
        assert_eq!(msg.rcode().to_string(), "NXDOMAIN");
        assert_eq!(msg.question.qtype.to_string(), "AAAA");
    }

    #[test]
    fn parse_root_question() {
        let data = query_bytes(1, 0x0000, &[], 2);

        let msg = DnsMessage::parse(&data).unwrap();

        assert_eq!(msg.question.name, "");
        assert_eq!(msg.question.to_string(), ". IN NS");
    }

    #[test]
    fn parse_follows_compression_pointer() {
        // Question name points at a copy stored after the question.
        let mut data = vec![0, 1, 0x81, 0x80, 0, 1, 0, 0, 0, 0, 0, 0];
        data.extend_from_slice(&[0xC0, 18]); // pointer to offset 18
        data.extend_from_slice(&[0x00, 0x10, 0x00, 0x01]); // TXT IN
        data.extend_from_slice(&[4, b't', b'e', b's', b't', 0]);

        let msg = DnsMessage::parse(&data).unwrap();

        assert_eq!(msg.question.name, "test");
        assert_eq!(msg.question.qtype, RecordType::Txt);
    }

    #[test]
    fn parse_rejects_pointer_loop() {
        let mut data = vec![0, 1, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        data.extend_from_slice(&[0xC0, 12, 0, 1, 0, 1]);

        assert_eq!(DnsMessage::parse(&data), Err(DecodeError::PointerLoop));
    }

    #[test]
    fn parse_rejects_short_header() {
        assert_eq!(
            DnsMessage::parse(&[0, 1, 2]),
            Err(DecodeError::Truncated(3))
        );
    }

    #[test]
    fn parse_rejects_missing_question() {
        let data = [0u8, 1, 0x81, 0x80, 0, 0, 0, 0, 0, 0, 0, 0];

        assert_eq!(DnsMessage::parse(&data), Err(DecodeError::NoQuestion));
    }

    #[test]
    fn parse_rejects_truncated_label() {
        let mut data = query_bytes(1, 0x0100, &[b"example"], 1);
        data.truncate(16);

        assert!(matches!(
            DnsMessage::parse(&data),
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn parse_rejects_missing_qtype() {
        let mut data = query_bytes(1, 0x0100, &[b"example"], 1);
        data.truncate(data.len() - 3);

        assert!(matches!(
            DnsMessage::parse(&data),
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn parse_rejects_reserved_label_type() {
        let mut data = vec![0, 1, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        data.extend_from_slice(&[0x41, 0, 0, 1, 0, 1]);

        assert_eq!(DnsMessage::parse(&data), Err(DecodeError::BadLabel(0x41)));
    }

    #[test]
    fn parse_rejects_long_name() {
        let label = [b'a'; 63];
        let labels: Vec<&[u8]> = (0..5).map(|_| &label[..]).collect();
        let data = query_bytes(1, 0x0100, &labels, 1);

        assert_eq!(DnsMessage::parse(&data), Err(DecodeError::NameTooLong));
    }

    #[test]
    fn labels_are_escaped() {
        let data = query_bytes(1, 0x0100, &[b"a.b", b"c d", b"x\\"], 16);

        let msg = DnsMessage::parse(&data).unwrap();

        assert_eq!(msg.question.name, "a\\.b.c\\032d.x\\\\");
    }

    #[test]
    fn unknown_type_and_class_render_numerically() {
        let q = Question {
            name: "example.com".into(),
            qtype: RecordType::from_u16(4242),
            qclass: 42,
        };

        assert_eq!(q.to_string(), "example.com. CLASS42 TYPE4242");
    }

    #[test]
    fn to_bytes_parses_back() {
        let msg = DnsMessage {
            id: 99,
            flags: 0x0100,
            question: Question {
                name: "mail.example.org".into(),
                qtype: RecordType::Mx,
                qclass: 1,
            },
        };

        assert_eq!(DnsMessage::parse(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn escaped_names_survive_encoding() {
        let data = query_bytes(1, 0x0100, &[b"a.b", b"c d", b"x\\"], 16);
        let msg = DnsMessage::parse(&data).unwrap();

        assert_eq!(msg.to_bytes(), data);
        assert_eq!(DnsMessage::parse(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn oversized_label_is_cut_not_wrapped() {
        let msg = DnsMessage {
            id: 1,
            flags: 0x0100,
            question: Question {
                name: format!("{}.com", "a".repeat(300)),
                qtype: RecordType::A,
                qclass: 1,
            },
        };

        let parsed = DnsMessage::parse(&msg.to_bytes()).unwrap();

        assert_eq!(parsed.question.name, format!("{}.com", "a".repeat(63)));
    }
}
