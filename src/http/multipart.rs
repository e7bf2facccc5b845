//! Multipart/related body decoding.
//!
//! Sub-parts are separated by `--<boundary>`; the terminal separator
//! is `--<boundary>--`. Each part carries its own `key: value` headers
//! up to a blank line, followed by a raw byte stream. The decoder is an
//! explicit state machine over the complete body; malformed streams
//! are rejected rather than truncated silently.

use super::request::Headers;
use super::response::Part;
use bytes::Bytes;
use thiserror::Error;

/// Errors produced while decoding a multipart stream.
#[derive(Debug, Error, PartialEq)]
pub enum MultipartError {
    /// The stream did not start with the expected boundary marker.
    #[error("expected boundary \"--{0}\" at start of stream")]
    MissingBoundary(String),

    /// The stream ended inside a part or boundary.
    #[error("malformed multipart stream: {0}")]
    Malformed(&'static str),
}

/// Extracts the `boundary=` parameter from a multipart content type,
/// stripping optional quotes.
pub fn boundary_from_mime(mime: &str) -> Option<String> {
    for param in mime.split(';').skip(1) {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("boundary=") {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

enum State {
    ExpectBoundary,
    ReadHeaders,
    ReadBody,
    Done,
}

/// Decodes a boundary-delimited multipart body into its parts.
pub fn decode_multipart(body: &[u8], boundary: &str) -> Result<Vec<Part>, MultipartError> {
    let delim: Vec<u8> = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();
    let mut pos = 0usize;
    let mut state = State::ExpectBoundary;
    let mut headers = Headers::new();

    loop {
        match state {
            State::ExpectBoundary => {
                if body.len() < pos + delim.len() || body[pos..pos + delim.len()] != delim[..] {
                    return Err(MultipartError::MissingBoundary(boundary.to_string()));
                }
                pos += delim.len();
                // terminal boundary is followed by "--"
                if body[pos..].starts_with(b"--") {
                    state = State::Done;
                } else {
                    pos = skip_newline(body, pos)
                        .ok_or(MultipartError::Malformed("boundary not followed by newline"))?;
                    headers = Headers::new();
                    state = State::ReadHeaders;
                }
            }

            State::ReadHeaders => {
                let (line, next) =
                    read_line(body, pos).ok_or(MultipartError::Malformed("unterminated headers"))?;
                pos = next;
                if line.is_empty() {
                    state = State::ReadBody;
                } else if let Some(colon) = line.iter().position(|&b| b == b':') {
                    let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
                    let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
                    if !name.is_empty() {
                        headers.add(&name, value);
                    }
                }
                // header lines without a colon are skipped
            }

            State::ReadBody => {
                let (body_end, delim_start) = find_body_end(body, pos, &delim)
                    .ok_or(MultipartError::Malformed("unterminated part body"))?;
                parts.push(Part::new(
                    std::mem::take(&mut headers),
                    Bytes::copy_from_slice(&body[pos..body_end]),
                ));
                pos = delim_start;
                state = State::ExpectBoundary;
            }

            State::Done => return Ok(parts),
        }
    }
}

/// Advances past a single `\n` or `\r\n`.
fn skip_newline(body: &[u8], pos: usize) -> Option<usize> {
    match body.get(pos)? {
        b'\n' => Some(pos + 1),
        b'\r' if body.get(pos + 1) == Some(&b'\n') => Some(pos + 2),
        _ => None,
    }
}

/// Reads one header line, returning (line-without-terminator, next-pos).
fn read_line(body: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = &body[pos..];
    let nl = rest.iter().position(|&b| b == b'\n')?;
    let mut line = &rest[..nl];
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    Some((line, pos + nl + 1))
}

/// Scans forward for the next `\n--boundary` (or `\r\n--boundary`).
/// Returns (end-of-body, start-of-delimiter); the newline preceding the
/// delimiter belongs to the delimiter, not the body.
fn find_body_end(body: &[u8], from: usize, delim: &[u8]) -> Option<(usize, usize)> {
    let mut i = from;
    while i < body.len() {
        if body[i] == b'\n' && body[i + 1..].starts_with(delim) {
            let body_end = if i > from && body[i - 1] == b'\r' { i - 1 } else { i };
            return Some((body_end, i + 1));
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_from_mime() {
        assert_eq!(
            boundary_from_mime("multipart/related; boundary=wcs"),
            Some("wcs".to_string())
        );
        assert_eq!(
            boundary_from_mime("multipart/mixed; charset=utf-8; boundary=\"frontier\""),
            Some("frontier".to_string())
        );
        assert_eq!(boundary_from_mime("multipart/related"), None);
        assert_eq!(boundary_from_mime("image/png"), None);
    }

    #[test]
    fn test_two_part_wcs_payload() {
        let payload: &[u8] =
            b"--wcs\nContent-Type: image/tiff\n\n\x01\x02\x03\x04\x05\x06\x07\x08\n--wcs\nContent-Type: text/plain\n\nhello\n--wcs--";
        let parts = decode_multipart(payload, "wcs").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].headers.get("Content-Type"), Some("image/tiff"));
        assert_eq!(parts[0].size(), 8);
        assert_eq!(parts[1].headers.get("content-type"), Some("text/plain"));
        assert_eq!(parts[1].body.as_ref(), b"hello");
    }

    #[test]
    fn test_crlf_line_endings() {
        let payload: &[u8] =
            b"--b\r\nContent-Type: text/plain\r\nX-Custom: 1\r\n\r\nbody bytes\r\n--b--";
        let parts = decode_multipart(payload, "b").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].headers.get("x-custom"), Some("1"));
        assert_eq!(parts[0].body.as_ref(), b"body bytes");
    }

    #[test]
    fn test_missing_leading_boundary_rejected() {
        let payload = b"not a boundary\n--wcs--";
        assert_eq!(
            decode_multipart(payload, "wcs"),
            Err(MultipartError::MissingBoundary("wcs".to_string()))
        );
    }

    #[test]
    fn test_unterminated_body_rejected() {
        let payload = b"--wcs\nContent-Type: text/plain\n\nno terminal boundary here";
        assert!(matches!(
            decode_multipart(payload, "wcs"),
            Err(MultipartError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_stream_with_terminal_only() {
        let payload = b"--wcs--";
        let parts = decode_multipart(payload, "wcs").unwrap();
        assert!(parts.is_empty());
    }
}
