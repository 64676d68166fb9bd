use crate::protocol::error::{NodepoolError, Result};
use crate::protocol::{Request, Response};

/// Record separator on the wire.
pub const DELIMITER: u8 = b'\n';

/// JSON codec for newline-delimited RPC messages
///
/// Every message is one JSON object followed by a single `\n`. The encoded
/// JSON never contains a raw newline (serde_json escapes them inside strings),
/// so the delimiter is unambiguous.
///
/// # Example
///
/// ```
/// use nodepool_common::transport::JsonLineCodec;
/// use nodepool_common::protocol::{Request, Response};
/// use serde_json::json;
///
/// let request = Request::new(1, "Node.List", json!({"Start": null, "Count": 100}));
/// let line = JsonLineCodec::encode_request(&request).unwrap();
/// assert_eq!(line.last(), Some(&b'\n'));
///
/// let response = JsonLineCodec::decode_response(br#"{"id":1,"result":{"addresses":[]}}"#).unwrap();
/// assert_eq!(response.id, 1);
/// ```
pub struct JsonLineCodec;

impl JsonLineCodec {
    /// Encode a request as one delimited line
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(request)?;
        line.push(DELIMITER);
        Ok(line)
    }

    /// Decode a request from one line (without the delimiter)
    pub fn decode_request(data: &[u8]) -> Result<Request> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encode a response as one delimited line
    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(response)?;
        line.push(DELIMITER);
        Ok(line)
    }

    /// Decode a response from one line (without the delimiter)
    ///
    /// Parse failures are reported as [`NodepoolError::Protocol`]; they
    /// concern this segment only.
    pub fn decode_response(data: &[u8]) -> Result<Response> {
        serde_json::from_slice(data).map_err(|e| {
            NodepoolError::Protocol(format!(
                "unparsable segment ({} bytes): {}",
                data.len(),
                e
            ))
        })
    }
}

/// Largest line accepted from a peer, delimiter excluded
pub const MAX_LINE_LEN: usize = 100 * 1024 * 1024;

/// Reassembles newline-delimited messages from arbitrarily split reads.
///
/// Bytes are buffered until a delimiter arrives. Each call to
/// [`push`](Self::push) yields every segment completed by the new bytes, in
/// order, and keeps the trailing partial segment for the next call. Working
/// on bytes rather than `str` keeps multi-byte characters split across reads
/// intact.
#[derive(Debug)]
pub struct LineAccumulator {
    partial: Vec<u8>,
    max_line_len: usize,
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::with_max_line_len(MAX_LINE_LEN)
    }
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            partial: Vec::new(),
            max_line_len,
        }
    }

    /// Feed newly read bytes, returning the complete segments they finish.
    ///
    /// Empty segments (blank lines, a bare `\r`) are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`NodepoolError::Protocol`] once a line grows past the maximum
    /// length. The oversized partial line is discarded.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut segments = Vec::new();
        let mut rest = data;

        while let Some(pos) = rest.iter().position(|b| *b == DELIMITER) {
            let (head, tail) = rest.split_at(pos);
            self.append(head)?;
            let mut segment = std::mem::take(&mut self.partial);
            if segment.last() == Some(&b'\r') {
                segment.pop();
            }
            if !segment.is_empty() {
                segments.push(segment);
            }
            rest = &tail[1..];
        }

        self.append(rest)?;
        Ok(segments)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let len = self.partial.len() + bytes.len();
        if len > self.max_line_len {
            self.partial = Vec::new();
            return Err(NodepoolError::Protocol(format!(
                "line of {} bytes exceeds the {} byte limit",
                len, self.max_line_len
            )));
        }
        self.partial.extend_from_slice(bytes);
        Ok(())
    }

    /// Bytes held back waiting for a delimiter
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }
}
