use std::collections::HashMap;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::error::SocketError;

/// Upper bound on a single frame body. FreeSWITCH bodies are small text
/// blocks; anything larger is treated as a corrupted stream.
const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// One protocol frame: a header block plus an optional body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl Frame {
    /// Return a header value by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Return the `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }
}

/// Read the next frame from the stream.
///
/// Returns `Ok(None)` on a clean EOF before any header line was read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, SocketError>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = HashMap::new();
    let mut line = String::new();
    let mut seen_header = false;

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if seen_header {
                return Err(SocketError::Disconnected);
            }
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            // Blank lines between frames are tolerated.
            if seen_header {
                break;
            }
            continue;
        }

        let (key, value) = split_header(trimmed)?;
        headers.insert(key.to_string(), value.to_string());
        seen_header = true;
    }

    let body = match headers.get("Content-Length") {
        Some(raw) => {
            let len: usize = raw
                .trim()
                .parse()
                .map_err(|_| SocketError::Malformed(format!("bad Content-Length {raw:?}")))?;
            if len > MAX_BODY_LEN {
                return Err(SocketError::Malformed(format!(
                    "Content-Length {len} exceeds limit"
                )));
            }
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf).await?;
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
        None => None,
    };

    Ok(Some(Frame { headers, body }))
}

/// Parse a `Key: Value` header block, one header per line.
///
/// Values are percent-decoded, matching the encoding of `text/event-plain`
/// bodies.
pub fn parse_header_block(block: &str) -> Result<HashMap<String, String>, SocketError> {
    let mut headers = HashMap::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (key, value) = split_header(line)?;
        let decoded = percent_encoding::percent_decode_str(value).decode_utf8_lossy();
        headers.insert(key.to_string(), decoded.into_owned());
    }

    Ok(headers)
}

fn split_header(line: &str) -> Result<(&str, &str), SocketError> {
    let (key, value) = line
        .split_once(':')
        .ok_or_else(|| SocketError::Malformed(format!("header without colon: {line:?}")))?;
    Ok((key.trim(), value.trim()))
}
