//! Line framing between the byte stream and protocol lines.
//!
//! Inbound lines are split on `\n`, decoded lossily (invalid UTF-8 never
//! fails), stripped of the CTCP marker byte and of one leading `:`.
//! Outbound commands get the `\r\n` terminator appended.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// CTCP delimiter. Removed everywhere in inbound lines.
pub const CTCP_MARKER: char = '\x01';

/// Leading marker of the sender prefix.
pub const PREFIX_MARKER: char = ':';

pub const LINE_TERMINATOR: &str = "\r\n";

/// Decode one raw line (terminator already removed or not).
///
/// Never fails: anything that is not a well-formed protocol line is passed
/// through as opaque text.
pub fn decode(raw: &str) -> String {
    let raw = raw.trim_end_matches(['\r', '\n']);
    let line: String = raw.chars().filter(|&c| c != CTCP_MARKER).collect();
    match line.strip_prefix(PREFIX_MARKER) {
        Some(rest) => rest.to_string(),
        None => line,
    }
}

/// Encode a command for the wire.
pub fn encode(command: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(command.len() + LINE_TERMINATOR.len());
    out.extend_from_slice(command.as_bytes());
    out.extend_from_slice(LINE_TERMINATOR.as_bytes());
    out
}

/// Reads decoded lines from a buffered byte stream.
///
/// The partial-line buffer lives in the reader, so [`LineReader::read_line`]
/// can be raced in `select!` without losing bytes.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(512),
        }
    }

    /// Next decoded line, or `None` on end of stream.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let n = self.inner.read_until(b'\n', &mut self.buf).await?;
        if n == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = decode(&String::from_utf8_lossy(&self.buf));
        self.buf.clear();
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_every_ctcp_marker() {
        assert_eq!(
            decode(":bob!b@h PRIVMSG bot :\x01ACTION waves\x01"),
            "bob!b@h PRIVMSG bot :ACTION waves"
        );
        assert_eq!(decode("a\x01b\x01\x01c"), "abc");
    }

    #[test]
    fn strips_exactly_one_prefix_marker() {
        assert_eq!(decode(":server 001 bot :Welcome"), "server 001 bot :Welcome");
        assert_eq!(decode("::odd"), ":odd");
        assert_eq!(decode("PING :token"), "PING :token");
    }

    #[test]
    fn removes_line_terminator() {
        assert_eq!(decode(":srv NOTICE * :hi\r\n"), "srv NOTICE * :hi");
    }

    #[test]
    fn encode_appends_crlf() {
        assert_eq!(encode("NICK bot"), b"NICK bot\r\n".to_vec());
    }

    #[tokio::test]
    async fn reader_survives_invalid_utf8_and_eof_without_newline() {
        let data: &[u8] = b":srv 001 bot :hi\r\nbad \xff byte\r\ntail";
        let mut reader = LineReader::new(data);
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("srv 001 bot :hi"));
        assert_eq!(
            reader.read_line().await.unwrap().as_deref(),
            Some("bad \u{fffd} byte")
        );
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("tail"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }
}
