//! Newline framing of an arbitrary byte stream.

/// Carry-over beyond this many bytes without a newline is treated as noise and dropped.
pub const MAX_PENDING_BYTES: usize = 16 * 1024;

/// Splits incoming byte chunks into `\n`-terminated lines.
///
/// A trailing partial line is kept until a later chunk completes it. Lines are
/// decoded lossily: binary noise on the wire becomes replacement characters
/// instead of an error.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
    overflows: u64,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them, without the newline.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING_BYTES {
            tracing::debug!(bytes = self.pending.len(), "Discarding unterminated line");
            self.pending.clear();
            self.overflows += 1;
        }

        lines
    }

    /// Take the unterminated remainder, e.g. when the stream hits EOF.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of times an oversized partial line was discarded.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_line_carried_across_reads() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"{\"t\":1,").is_empty());
        assert_eq!(framer.pending_len(), 7);

        let lines = framer.push(b"\"h\":2.0}\n{\"t\":2");
        assert_eq!(lines, vec!["{\"t\":1,\"h\":2.0}".to_string()]);
        assert_eq!(framer.take_partial().as_deref(), Some("{\"t\":2"));
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"a\r\n\nb\nc");
        assert_eq!(lines, vec!["a\r".to_string(), String::new(), "b".to_string()]);
        assert_eq!(framer.take_partial().as_deref(), Some("c"));
    }

    #[test]
    fn test_binary_noise_does_not_fail() {
        let mut framer = LineFramer::new();
        let lines = framer.push(&[0xff, 0xfe, b'x', b'\n']);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with('x'));
    }

    #[test]
    fn test_unterminated_flood_is_dropped() {
        let mut framer = LineFramer::new();
        let junk = vec![b'z'; MAX_PENDING_BYTES + 1];
        assert!(framer.push(&junk).is_empty());
        assert_eq!(framer.pending_len(), 0);
        assert_eq!(framer.overflows(), 1);
        assert_eq!(framer.push(b"ok\n"), vec!["ok".to_string()]);
    }
}
