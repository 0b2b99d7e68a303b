use crate::types::MessageType;

/// Shortest classifiable message: `GET x HTTP/1.1\r\n` is 16 bytes.
pub const MIN_HTTP_MESSAGE_LEN: usize = 16;

const REQUEST_METHODS: [&[u8]; 5] = [b"GET", b"HEAD", b"POST", b"PUT", b"DELETE"];

/// Classify an HTTP/1.x start line by its leading token.
pub fn infer_http(buf: &[u8]) -> MessageType {
    if buf.len() < MIN_HTTP_MESSAGE_LEN {
        return MessageType::Unknown;
    }

    if buf.starts_with(b"HTTP") {
        return MessageType::Response;
    }

    if REQUEST_METHODS.iter().any(|method| buf.starts_with(method)) {
        return MessageType::Request;
    }

    MessageType::Unknown
}
