//! Carried header bytes between consecutive observations
//!
//! MySQL and Kafka servers commonly read a 4-byte length header with one
//! syscall and the message body with the next. Classification of the body
//! alone fails, so the last 4-byte observation is kept and glued back onto the
//! following payload when its encoded length matches.

/// Trailing-byte cache for one connection.
///
/// `record()` runs after every classification attempt, matched or not. The
/// cached bytes only count as a candidate header while the most recent
/// observation was exactly 4 bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderCarry {
    prev_count:            usize,
    prev_buf:              [u8; 4],
    prepend_length_header: bool,
}

impl HeaderCarry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the length of `buf`, and its bytes when it is a bare 4-byte
    /// header candidate.
    pub fn record(&mut self, buf: &[u8]) {
        self.prev_count = buf.len();
        if let Ok(header) = <[u8; 4]>::try_from(buf) {
            self.prev_buf = header;
        }
    }

    /// Length of the previous observation.
    pub fn prev_count(&self) -> usize {
        self.prev_count
    }

    /// Last 4-byte payload seen on this connection.
    pub fn prefix(&self) -> [u8; 4] {
        self.prev_buf
    }

    /// Set for exactly one observation: the one where Kafka was first inferred
    /// from a body whose length header arrived separately.
    pub fn prepend_length_header(&self) -> bool {
        self.prepend_length_header
    }

    /// The stripped header to glue in front of the current payload, if the
    /// downstream reader has to reconstruct it.
    pub fn length_header(&self) -> Option<[u8; 4]> {
        self.prepend_length_header.then_some(self.prev_buf)
    }

    /// Drop the prepend flag ahead of a new observation.
    pub fn clear_prepend(&mut self) {
        self.prepend_length_header = false;
    }

    pub(crate) fn set_prepend(&mut self) {
        self.prepend_length_header = true;
    }

    /// Cached header as a little-endian word, when it announces exactly
    /// `count` body bytes.
    pub(crate) fn carried_le(&self, count: usize) -> Option<[u8; 4]> {
        let announced = u32::from_le_bytes(self.prev_buf) as usize;
        (self.prev_count == 4 && announced == count).then_some(self.prev_buf)
    }

    /// Same check against a big-endian signed length.
    pub(crate) fn carried_be(&self, count: usize) -> bool {
        let announced = i32::from_be_bytes(self.prev_buf);
        self.prev_count == 4 && usize::try_from(announced).is_ok_and(|len| len == count)
    }
}
