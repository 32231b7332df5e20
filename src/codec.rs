//! DNS wire codec
//!
//! Byte-level parsing, validation, and synthesis for DNS messages. The
//! sinkhole never interprets records beyond the question section: the
//! response is the query echoed with the response bits set, ANCOUNT forced
//! to 1, and a single A record appended. Everything after the question
//! section (authority, additional, EDNS OPT) rides along bit-for-bit,
//! which is how transaction IDs and EDNS cookies round-trip.
//!
//! # Message layout
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+
//! |   ID   | FLAGS  |QDCOUNT |ANCOUNT |NSCOUNT |ARCOUNT |   12-byte header
//! +--------+--------+--------+--------+--------+--------+
//! | QNAME (length-prefixed labels, 0-terminated)        |
//! | QTYPE  | QCLASS |                                    \  question(s)
//! +--------+--------+-----------------------------------+
//! | answer / authority / additional (echoed, opaque)    |
//! +-----------------------------------------------------+
//! ```
//!
//! The synthesized answer appended to the copy:
//!
//! ```text
//! C0 0C | 00 01 | 00 01 | <TTL:4> | 00 04 | <IPv4:4>
//! name    type A  class IN                  rdata
//! ```

use std::net::Ipv4Addr;

use thiserror::Error;

/// Size of the fixed DNS header
pub const DNS_HEADER_SIZE: usize = 12;

/// Maximum DNS message size (RFC 1035 TCP limit)
pub const MAX_MESSAGE_SIZE: usize = 65_535;

/// Wire size of the synthesized answer record
pub const ANSWER_RECORD_SIZE: usize = 16;

/// Maximum label length (RFC 1035)
const MAX_LABEL_LENGTH: usize = 63;

/// Structural defects in a DNS message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Shorter than the 12-byte header
    #[error("message too short: {len} bytes (minimum: {DNS_HEADER_SIZE})")]
    TooShort {
        /// Actual message length
        len: usize,
    },

    /// QDCOUNT is zero
    #[error("no questions in message")]
    NoQuestions,

    /// Opcode field is not QUERY (0)
    #[error("unsupported opcode: {opcode}")]
    UnsupportedOpcode {
        /// The rejected opcode value (0-15)
        opcode: u8,
    },

    /// A question's name or fixed fields overflow the buffer
    #[error("malformed question section")]
    MalformedQuestion,

    /// QR bit set on an inbound query
    #[error("query has the response bit set")]
    UnexpectedResponse,

    /// QR bit clear on an outbound response
    #[error("response bit not set")]
    NotAResponse,

    /// Synthesis would exceed the 65535-byte message limit
    #[error("message would exceed {MAX_MESSAGE_SIZE} bytes")]
    Oversize,
}

/// The six 16-bit header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Transaction ID
    pub id: u16,
    /// Flag word (QR/opcode/AA/TC/RD/RA/Z/RCODE)
    pub flags: u16,
    /// Question count
    pub qdcount: u16,
    /// Answer count
    pub ancount: u16,
    /// Authority count
    pub nscount: u16,
    /// Additional count
    pub arcount: u16,
}

/// One parsed question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// QNAME as a dotted name
    pub name: String,
    /// QTYPE
    pub qtype: u16,
    /// QCLASS
    pub qclass: u16,
}

/// Parse the fixed header, if present
#[must_use]
pub fn parse_header(bytes: &[u8]) -> Option<Header> {
    if bytes.len() < DNS_HEADER_SIZE {
        return None;
    }
    Some(Header {
        id: be16(bytes, 0),
        flags: be16(bytes, 2),
        qdcount: be16(bytes, 4),
        ancount: be16(bytes, 6),
        nscount: be16(bytes, 8),
        arcount: be16(bytes, 10),
    })
}

/// Validate an inbound query
///
/// Checks, in order: minimum length, QR bit clear, QDCOUNT ≥ 1, opcode 0,
/// and that every question terminates inside the buffer with its QTYPE and
/// QCLASS intact. No pointer decompression is attempted; a compression
/// pointer inside a question name is rejected as malformed.
///
/// # Errors
///
/// Returns the first [`WireError`] encountered.
pub fn validate_query(bytes: &[u8]) -> Result<(), WireError> {
    if bytes.len() < DNS_HEADER_SIZE {
        return Err(WireError::TooShort { len: bytes.len() });
    }
    if bytes[2] & 0x80 != 0 {
        return Err(WireError::UnexpectedResponse);
    }
    if be16(bytes, 4) == 0 {
        return Err(WireError::NoQuestions);
    }
    let opcode = (bytes[2] >> 3) & 0x0F;
    if opcode != 0 {
        return Err(WireError::UnsupportedOpcode { opcode });
    }
    end_of_questions(bytes).map(|_| ())
}

/// Validate an outbound response
///
/// Same structural checks as a query, except the QR bit must be set and
/// the opcode is not constrained.
///
/// # Errors
///
/// Returns the first [`WireError`] encountered.
pub fn validate_response(bytes: &[u8]) -> Result<(), WireError> {
    if bytes.len() < DNS_HEADER_SIZE {
        return Err(WireError::TooShort { len: bytes.len() });
    }
    if be16(bytes, 4) == 0 {
        return Err(WireError::NoQuestions);
    }
    if bytes[2] & 0x80 == 0 {
        return Err(WireError::NotAResponse);
    }
    Ok(())
}

/// Synthesize the fixed A-record response for a query
///
/// The query is copied verbatim, then:
/// - byte 2 gets the QR bit (`|= 0x80`), byte 3 the RA bit (`|= 0x80`)
/// - ANCOUNT is forced to 1
/// - one answer is appended: a `C0 0C` pointer to the QNAME, type A,
///   class IN, the given TTL, and the given IPv4 address as RDATA
///
/// Everything else, including trailing authority/additional sections, is
/// preserved byte-for-byte.
///
/// # Errors
///
/// Returns `TooShort` for a headerless query and `Oversize` when the
/// appended answer would push the message past [`MAX_MESSAGE_SIZE`].
pub fn synthesize_response(
    query: &[u8],
    answer_ip: Ipv4Addr,
    answer_ttl: u32,
) -> Result<Vec<u8>, WireError> {
    if query.len() < DNS_HEADER_SIZE {
        return Err(WireError::TooShort { len: query.len() });
    }
    if query.len() + ANSWER_RECORD_SIZE > MAX_MESSAGE_SIZE {
        return Err(WireError::Oversize);
    }

    let mut response = Vec::with_capacity(query.len() + ANSWER_RECORD_SIZE);
    response.extend_from_slice(query);
    response[2] |= 0x80; // QR
    response[3] |= 0x80; // RA
    response[6] = 0x00;
    response[7] = 0x01; // ANCOUNT = 1

    response.extend_from_slice(&[0xC0, 0x0C]); // name pointer to QNAME
    response.extend_from_slice(&[0x00, 0x01]); // type A
    response.extend_from_slice(&[0x00, 0x01]); // class IN
    response.extend_from_slice(&answer_ttl.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x04]);
    response.extend_from_slice(&answer_ip.octets());

    Ok(response)
}

/// The question-section slice used as the cache key
///
/// Returns the bytes from offset 12 up to and including the last
/// question's QCLASS, so two queries differing only in transaction ID or
/// in trailing sections share a fingerprint. `None` when the question
/// section cannot be delimited.
#[must_use]
pub fn question_fingerprint(bytes: &[u8]) -> Option<&[u8]> {
    let end = end_of_questions(bytes).ok()?;
    Some(&bytes[DNS_HEADER_SIZE..end])
}

/// Parse every question for the human-readable request log
///
/// Stops at the first malformed question; whatever parsed before it is
/// returned.
#[must_use]
pub fn questions(bytes: &[u8]) -> Vec<Question> {
    let mut result = Vec::new();
    let Some(header) = parse_header(bytes) else {
        return result;
    };

    let mut offset = DNS_HEADER_SIZE;
    for _ in 0..header.qdcount {
        let Some((name, after_name)) = parse_name(bytes, offset) else {
            break;
        };
        if after_name + 4 > bytes.len() {
            break;
        }
        result.push(Question {
            name,
            qtype: be16(bytes, after_name),
            qclass: be16(bytes, after_name + 2),
        });
        offset = after_name + 4;
    }
    result
}

/// Display name for a QTYPE value
#[must_use]
pub fn qtype_name(qtype: u16) -> String {
    match qtype {
        1 => "A".to_string(),
        2 => "NS".to_string(),
        5 => "CNAME".to_string(),
        6 => "SOA".to_string(),
        12 => "PTR".to_string(),
        15 => "MX".to_string(),
        16 => "TXT".to_string(),
        28 => "AAAA".to_string(),
        33 => "SRV".to_string(),
        41 => "OPT".to_string(),
        255 => "ANY".to_string(),
        other => format!("TYPE{other}"),
    }
}

/// Display name for a QCLASS value
#[must_use]
pub fn qclass_name(qclass: u16) -> String {
    match qclass {
        1 => "IN".to_string(),
        3 => "CH".to_string(),
        4 => "HS".to_string(),
        255 => "ANY".to_string(),
        other => format!("CLASS{other}"),
    }
}

/// Canonical hex dump: 16 bytes per row with an ASCII gutter
///
/// ```
/// use dns_sinkhole::codec::hex_dump;
///
/// let dump = hex_dump(b"this is a test\n");
/// assert!(dump.starts_with("00000000  74 68 69 73"));
/// assert!(dump.contains("|this is a test.|"));
/// ```
#[must_use]
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 16);
    for (row, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:08x} ", row * 16));
        for i in 0..16 {
            if i % 8 == 0 {
                out.push(' ');
            }
            match chunk.get(i) {
                Some(b) => out.push_str(&format!("{b:02x} ")),
                None => out.push_str("   "),
            }
        }
        out.push('|');
        for &b in chunk {
            out.push(if (0x20..0x7f).contains(&b) {
                b as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}

/// Find the byte offset one past the last question
///
/// Walks `QDCOUNT` length-prefixed names; each must 0-terminate inside
/// the buffer and leave four bytes for QTYPE + QCLASS.
fn end_of_questions(bytes: &[u8]) -> Result<usize, WireError> {
    if bytes.len() < DNS_HEADER_SIZE {
        return Err(WireError::TooShort { len: bytes.len() });
    }
    let qdcount = be16(bytes, 4);
    if qdcount == 0 {
        return Err(WireError::NoQuestions);
    }

    let mut offset = DNS_HEADER_SIZE;
    for _ in 0..qdcount {
        offset = skip_name(bytes, offset).ok_or(WireError::MalformedQuestion)?;
        offset = offset
            .checked_add(4)
            .filter(|&end| end <= bytes.len())
            .ok_or(WireError::MalformedQuestion)?;
    }
    Ok(offset)
}

/// Skip one length-prefixed name, returning the offset after its 0 byte
fn skip_name(bytes: &[u8], mut offset: usize) -> Option<usize> {
    loop {
        let len = *bytes.get(offset)? as usize;
        if len == 0 {
            return Some(offset + 1);
        }
        if len > MAX_LABEL_LENGTH {
            // Also rejects compression pointers (0xC0 prefix), which are
            // not valid inside an uncompressed question name.
            return None;
        }
        offset = offset.checked_add(1 + len)?;
        if offset >= bytes.len() {
            return None;
        }
    }
}

/// Parse one name into dotted form, returning it with the next offset
fn parse_name(bytes: &[u8], mut offset: usize) -> Option<(String, usize)> {
    let mut labels: Vec<&str> = Vec::new();
    loop {
        let len = *bytes.get(offset)? as usize;
        if len == 0 {
            offset += 1;
            break;
        }
        if len > MAX_LABEL_LENGTH {
            return None;
        }
        let label = bytes.get(offset + 1..offset + 1 + len)?;
        labels.push(std::str::from_utf8(label).ok()?);
        offset += 1 + len;
    }
    if labels.is_empty() {
        return None;
    }
    Some((labels.join("."), offset))
}

#[inline]
fn be16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A-record query for example.com, transaction id 0x0001
    fn example_com_query() -> Vec<u8> {
        let mut q = vec![
            0x00, 0x01, // ID
            0x01, 0x00, // flags: RD
            0x00, 0x01, // QDCOUNT
            0x00, 0x00, // ANCOUNT
            0x00, 0x00, // NSCOUNT
            0x00, 0x00, // ARCOUNT
        ];
        q.extend_from_slice(&[
            0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00,
        ]);
        q.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A IN
        q
    }

    fn raw_query(id: u16, domain: &str, qtype: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&id.to_be_bytes());
        data.extend_from_slice(&[0x01, 0x00]);
        data.extend_from_slice(&[0x00, 0x01]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        for label in domain.split('.') {
            data.push(u8::try_from(label.len()).unwrap());
            data.extend_from_slice(label.as_bytes());
        }
        data.push(0x00);
        data.extend_from_slice(&qtype.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01]);
        data
    }

    // ========================================================================
    // Header Tests
    // ========================================================================

    #[test]
    fn test_parse_header() {
        let header = parse_header(&example_com_query()).unwrap();
        assert_eq!(header.id, 0x0001);
        assert_eq!(header.flags, 0x0100);
        assert_eq!(header.qdcount, 1);
        assert_eq!(header.ancount, 0);
        assert_eq!(header.nscount, 0);
        assert_eq!(header.arcount, 0);
    }

    #[test]
    fn test_parse_header_too_short() {
        assert!(parse_header(&[0u8; 11]).is_none());
        assert!(parse_header(&[]).is_none());
    }

    // ========================================================================
    // Query Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_query_ok() {
        assert_eq!(validate_query(&example_com_query()), Ok(()));
    }

    #[test]
    fn test_validate_query_too_short() {
        assert_eq!(
            validate_query(&[0u8; 5]),
            Err(WireError::TooShort { len: 5 })
        );
    }

    #[test]
    fn test_validate_query_no_questions() {
        let mut q = example_com_query();
        q[4] = 0;
        q[5] = 0;
        assert_eq!(validate_query(&q), Err(WireError::NoQuestions));
    }

    #[test]
    fn test_validate_query_bad_opcode() {
        let mut q = example_com_query();
        q[2] |= 0x28; // opcode 5 (UPDATE)
        assert_eq!(
            validate_query(&q),
            Err(WireError::UnsupportedOpcode { opcode: 5 })
        );
    }

    #[test]
    fn test_validate_query_response_bit_set() {
        let mut q = example_com_query();
        q[2] |= 0x80;
        assert_eq!(validate_query(&q), Err(WireError::UnexpectedResponse));
    }

    #[test]
    fn test_validate_query_header_only_with_qdcount() {
        // 12 header bytes claiming one question, with no question bytes.
        let mut q = vec![0u8; 12];
        q[5] = 0x01;
        assert_eq!(validate_query(&q), Err(WireError::MalformedQuestion));
    }

    #[test]
    fn test_validate_query_truncated_name() {
        let mut q = example_com_query();
        q.truncate(16); // cuts inside "example"
        assert_eq!(validate_query(&q), Err(WireError::MalformedQuestion));
    }

    #[test]
    fn test_validate_query_missing_qtype_qclass() {
        let mut q = example_com_query();
        let len = q.len();
        q.truncate(len - 3); // name intact, fixed fields truncated
        assert_eq!(validate_query(&q), Err(WireError::MalformedQuestion));
    }

    #[test]
    fn test_validate_query_compression_pointer_rejected() {
        let mut q = vec![0u8; 12];
        q[5] = 0x01;
        q.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);
        assert_eq!(validate_query(&q), Err(WireError::MalformedQuestion));
    }

    #[test]
    fn test_validate_query_multiple_questions() {
        let mut q = example_com_query();
        q[5] = 0x02;
        q.extend_from_slice(&[0x03, b'o', b'r', b'g', 0x00, 0x00, 0x01, 0x00, 0x01]);
        assert_eq!(validate_query(&q), Ok(()));
    }

    // ========================================================================
    // Response Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_response_requires_qr() {
        let q = example_com_query();
        assert_eq!(validate_response(&q), Err(WireError::NotAResponse));

        let mut r = q;
        r[2] |= 0x80;
        assert_eq!(validate_response(&r), Ok(()));
    }

    #[test]
    fn test_validate_response_too_short() {
        assert_eq!(
            validate_response(&[0u8; 3]),
            Err(WireError::TooShort { len: 3 })
        );
    }

    // ========================================================================
    // Synthesis Tests
    // ========================================================================

    #[test]
    fn test_synthesize_golden_bytes() {
        let query = example_com_query();
        let response =
            synthesize_response(&query, Ipv4Addr::new(127, 0, 0, 1), 300).unwrap();

        // Header: id preserved, flags 0x8180, QDCOUNT 1, ANCOUNT 1
        assert_eq!(&response[0..2], &[0x00, 0x01]);
        assert_eq!(&response[2..4], &[0x81, 0x80]);
        assert_eq!(&response[4..6], &[0x00, 0x01]);
        assert_eq!(&response[6..8], &[0x00, 0x01]);
        assert_eq!(&response[8..12], &[0x00, 0x00, 0x00, 0x00]);

        // Question echoed untouched
        assert_eq!(&response[12..query.len()], &query[12..]);

        // Appended answer: C0 0C | A | IN | TTL 300 | RDLENGTH 4 | 127.0.0.1
        assert_eq!(
            &response[query.len()..],
            &[
                0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x01, 0x2C, 0x00, 0x04, 0x7F,
                0x00, 0x00, 0x01
            ]
        );
    }

    #[test]
    fn test_synthesize_preserves_trailing_sections() {
        // An EDNS OPT record in the additional section must survive
        // untouched, in place, ahead of the appended answer.
        let mut query = example_com_query();
        query[11] = 0x01; // ARCOUNT = 1
        let opt: &[u8] = &[0x00, 0x00, 0x29, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        query.extend_from_slice(opt);

        let response = synthesize_response(&query, Ipv4Addr::LOCALHOST, 300).unwrap();
        let opt_at = query.len() - opt.len();
        assert_eq!(&response[opt_at..query.len()], opt);
        assert_eq!(response[11], 0x01); // ARCOUNT preserved
        assert_eq!(response.len(), query.len() + ANSWER_RECORD_SIZE);
    }

    #[test]
    fn test_synthesize_custom_ip_and_ttl() {
        let query = example_com_query();
        let response =
            synthesize_response(&query, Ipv4Addr::new(10, 20, 30, 40), 86_400).unwrap();
        let answer = &response[query.len()..];
        assert_eq!(&answer[6..10], &86_400u32.to_be_bytes());
        assert_eq!(&answer[12..16], &[10, 20, 30, 40]);
    }

    #[test]
    fn test_synthesize_rejects_short_query() {
        assert_eq!(
            synthesize_response(&[0u8; 4], Ipv4Addr::LOCALHOST, 300),
            Err(WireError::TooShort { len: 4 })
        );
    }

    #[test]
    fn test_synthesize_rejects_oversize() {
        let query = vec![0u8; MAX_MESSAGE_SIZE - ANSWER_RECORD_SIZE + 1];
        assert_eq!(
            synthesize_response(&query, Ipv4Addr::LOCALHOST, 300),
            Err(WireError::Oversize)
        );
    }

    #[test]
    fn test_validate_then_synthesize_then_validate_response() {
        // Round-trip law: a valid query always synthesizes a valid response.
        for qtype in [1u16, 6, 16, 28, 255] {
            let query = raw_query(0xBEEF, "round.trip.example", qtype);
            assert_eq!(validate_query(&query), Ok(()));
            let response = synthesize_response(&query, Ipv4Addr::LOCALHOST, 300).unwrap();
            assert_eq!(validate_response(&response), Ok(()));
        }
    }

    // ========================================================================
    // Fingerprint Tests
    // ========================================================================

    #[test]
    fn test_fingerprint_spans_question_section() {
        let query = example_com_query();
        let fp = question_fingerprint(&query).unwrap();
        assert_eq!(fp, &query[12..]);
        assert_eq!(fp.len(), 13 + 4); // name + qtype + qclass
    }

    #[test]
    fn test_fingerprint_ignores_transaction_id() {
        let a = raw_query(0x1111, "example.com", 1);
        let b = raw_query(0x2222, "example.com", 1);
        assert_eq!(
            question_fingerprint(&a).unwrap(),
            question_fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_ignores_trailing_opt() {
        let plain = raw_query(0x1234, "example.org", 6);
        let mut with_opt = plain.clone();
        with_opt[11] = 0x01;
        with_opt.extend_from_slice(&[0x00, 0x00, 0x29, 0x04, 0xD0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            question_fingerprint(&plain).unwrap(),
            question_fingerprint(&with_opt).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_differs_on_qtype() {
        let a = raw_query(0x0001, "example.com", 1);
        let soa = raw_query(0x0001, "example.com", 6);
        assert_ne!(
            question_fingerprint(&a).unwrap(),
            question_fingerprint(&soa).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_malformed_is_none() {
        assert!(question_fingerprint(&[0u8; 6]).is_none());
        let mut header_only = vec![0u8; 12];
        header_only[5] = 0x01;
        assert!(question_fingerprint(&header_only).is_none());
    }

    // ========================================================================
    // Question Parsing Tests
    // ========================================================================

    #[test]
    fn test_questions_single() {
        let parsed = questions(&example_com_query());
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "example.com");
        assert_eq!(parsed[0].qtype, 1);
        assert_eq!(parsed[0].qclass, 1);
    }

    #[test]
    fn test_questions_multiple() {
        let mut q = example_com_query();
        q[5] = 0x02;
        q.extend_from_slice(&[0x03, b'o', b'r', b'g', 0x00, 0x00, 0x06, 0x00, 0x01]);
        let parsed = questions(&q);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].name, "org");
        assert_eq!(parsed[1].qtype, 6);
    }

    #[test]
    fn test_questions_malformed_returns_prefix() {
        let mut q = example_com_query();
        q[5] = 0x02; // claims a second question that is not there
        let parsed = questions(&q);
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_questions_empty_on_garbage() {
        assert!(questions(&[0xFF; 8]).is_empty());
    }

    // ========================================================================
    // Display Name Tests
    // ========================================================================

    #[test]
    fn test_qtype_names() {
        assert_eq!(qtype_name(1), "A");
        assert_eq!(qtype_name(6), "SOA");
        assert_eq!(qtype_name(28), "AAAA");
        assert_eq!(qtype_name(41), "OPT");
        assert_eq!(qtype_name(999), "TYPE999");
    }

    #[test]
    fn test_qclass_names() {
        assert_eq!(qclass_name(1), "IN");
        assert_eq!(qclass_name(3), "CH");
        assert_eq!(qclass_name(77), "CLASS77");
    }

    // ========================================================================
    // Hex Dump Tests
    // ========================================================================

    #[test]
    fn test_hex_dump_full_row() {
        let dump = hex_dump(b"this is a test..");
        assert_eq!(
            dump,
            "00000000  74 68 69 73 20 69 73 20  61 20 74 65 73 74 2e 2e |this is a test..|\n"
        );
    }

    #[test]
    fn test_hex_dump_partial_row_padded() {
        let dump = hex_dump(&[0x00, 0x01, 0x02]);
        let line = dump.lines().next().unwrap();
        assert!(line.starts_with("00000000  00 01 02 "));
        assert!(line.ends_with("|...|"));
        // The ASCII gutter starts at a fixed column.
        assert_eq!(line.find('|'), Some(10 + 16 * 3 + 1));
    }

    #[test]
    fn test_hex_dump_multiple_rows() {
        let dump = hex_dump(&[0xAA; 20]);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("00000010  aa aa aa aa"));
    }

    #[test]
    fn test_hex_dump_empty() {
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_hex_dump_nonprintable_dots() {
        let dump = hex_dump(&[0x00, 0x1F, 0x7F, b'a']);
        assert!(dump.contains("|...a|"));
    }
}
