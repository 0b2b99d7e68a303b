use super::be_u16;
use crate::types::MessageType;

const DNS_HEADER_LEN: usize = 12;
/// Largest message guaranteed to fit a plain UDP datagram.
const DNS_MAX_MESSAGE_LEN: usize = 512;
const DNS_MAX_QUESTIONS: u16 = 10;
const DNS_MAX_RESOURCE_RECORDS: u32 = 25;

/// Classify a DNS message from its 12-byte header.
///
/// Standard queries only: the opcode and the reserved Z bit must be zero,
/// and the record counts must be plausible for a single-datagram message.
/// The QR bit decides between query (request) and answer (response).
pub fn infer_dns(buf: &[u8]) -> MessageType {
    if !(DNS_HEADER_LEN..=DNS_MAX_MESSAGE_LEN).contains(&buf.len()) {
        return MessageType::Unknown;
    }

    let field = |at| be_u16(buf, at).unwrap_or_default();
    let flags = field(2);
    let questions = field(4);
    let answers = field(6);
    let authorities = field(8);
    let additionals = field(10);

    let qr = (flags >> 15) & 0x1;
    let opcode = (flags >> 11) & 0xf;
    let zero = (flags >> 6) & 0x1;

    if zero != 0 || opcode != 0 {
        return MessageType::Unknown;
    }

    if questions == 0 || questions > DNS_MAX_QUESTIONS {
        return MessageType::Unknown;
    }

    let records = u32::from(questions)
        + u32::from(answers)
        + u32::from(authorities)
        + u32::from(additionals);
    if records > DNS_MAX_RESOURCE_RECORDS {
        return MessageType::Unknown;
    }

    if qr == 0 {
        MessageType::Request
    } else {
        MessageType::Response
    }
}
