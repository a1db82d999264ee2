//! RESP2 framing shared by the region store server and the Redis-backed
//! counter store.
//!
//! `RespCodec` plugs into `tokio_util::codec::Framed`. The server side also
//! accepts inline commands (`PING\r\n`) so a store can be poked with `nc`.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt::Write;
use tokio_util::codec::{Decoder, Encoder};

// TigerStyle: Explicit limits with _MAX suffix
const BULK_LEN_MAX: usize = 1024 * 1024;
const ARRAY_LEN_MAX: usize = 1024;
const ARRAY_DEPTH_MAX: usize = 8;
const LINE_LEN_MAX: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    #[inline]
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    #[inline]
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    #[inline]
    pub fn nil() -> Self {
        RespValue::BulkString(None)
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        RespValue::Error(msg.into())
    }

    /// Command frame as sent by clients: an array of bulk strings.
    pub fn command<S: AsRef<[u8]>>(parts: &[S]) -> Self {
        RespValue::Array(Some(
            parts.iter().map(|p| RespValue::bulk(p.as_ref())).collect(),
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid RESP frame: {0}")]
    Invalid(String),
}

#[derive(Debug)]
enum ParseError {
    Incomplete,
    Invalid(String),
}

type ParseResult<T> = Result<(T, usize), ParseError>;

/// Codec for RESP2 frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct RespCodec {
    accept_inline: bool,
}

impl RespCodec {
    /// Codec for the server side of a connection (inline commands allowed).
    pub fn server() -> Self {
        RespCodec { accept_inline: true }
    }

    /// Codec for the client side of a connection.
    pub fn client() -> Self {
        RespCodec {
            accept_inline: false,
        }
    }
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = RespError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        if src.is_empty() {
            return Ok(None);
        }

        match parse_frame(src, self.accept_inline, 0) {
            Ok((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            Err(ParseError::Incomplete) => Ok(None),
            Err(ParseError::Invalid(msg)) => Err(RespError::Invalid(msg)),
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = RespError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), RespError> {
        encode_value(&item, dst);
        Ok(())
    }
}

fn parse_frame(input: &[u8], accept_inline: bool, depth: usize) -> ParseResult<RespValue> {
    match input[0] {
        b'+' => {
            let (line, consumed) = parse_line(input)?;
            Ok((
                RespValue::SimpleString(String::from_utf8_lossy(line).into_owned()),
                consumed,
            ))
        }
        b'-' => {
            let (line, consumed) = parse_line(input)?;
            Ok((
                RespValue::Error(String::from_utf8_lossy(line).into_owned()),
                consumed,
            ))
        }
        b':' => {
            let (line, consumed) = parse_line(input)?;
            Ok((RespValue::Integer(parse_int(line)?), consumed))
        }
        b'$' => parse_bulk_string(input),
        b'*' => parse_array(input, depth),
        _ if accept_inline && depth == 0 => parse_inline(input),
        other => Err(ParseError::Invalid(format!(
            "unknown RESP type byte: 0x{:02x}",
            other
        ))),
    }
}

/// Returns the line after the type byte and the bytes consumed including CRLF.
fn parse_line(input: &[u8]) -> ParseResult<&[u8]> {
    match memchr::memmem::find(input, b"\r\n") {
        Some(pos) => Ok((&input[1..pos], pos + 2)),
        None if input.len() > LINE_LEN_MAX => {
            Err(ParseError::Invalid("line exceeds maximum length".to_string()))
        }
        None => Err(ParseError::Incomplete),
    }
}

fn parse_int(line: &[u8]) -> Result<i64, ParseError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            ParseError::Invalid(format!(
                "invalid integer: {}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn parse_bulk_string(input: &[u8]) -> ParseResult<RespValue> {
    let (line, header_len) = parse_line(input)?;
    let len = parse_int(line)?;

    if len == -1 {
        return Ok((RespValue::BulkString(None), header_len));
    }
    if len < 0 || len as usize > BULK_LEN_MAX {
        return Err(ParseError::Invalid(format!("invalid bulk length: {}", len)));
    }

    let start = header_len;
    let end = start + len as usize;
    if end + 2 > input.len() {
        return Err(ParseError::Incomplete);
    }
    if &input[end..end + 2] != b"\r\n" {
        return Err(ParseError::Invalid(
            "bulk string not terminated by CRLF".to_string(),
        ));
    }

    Ok((RespValue::bulk(&input[start..end]), end + 2))
}

fn parse_array(input: &[u8], depth: usize) -> ParseResult<RespValue> {
    if depth >= ARRAY_DEPTH_MAX {
        return Err(ParseError::Invalid("array nesting too deep".to_string()));
    }

    let (line, header_len) = parse_line(input)?;
    let len = parse_int(line)?;

    if len == -1 {
        return Ok((RespValue::Array(None), header_len));
    }
    if len < 0 || len as usize > ARRAY_LEN_MAX {
        return Err(ParseError::Invalid(format!("invalid array length: {}", len)));
    }

    let mut elements = Vec::with_capacity(len as usize);
    let mut offset = header_len;
    for _ in 0..len {
        if offset >= input.len() {
            return Err(ParseError::Incomplete);
        }
        let (value, consumed) = parse_frame(&input[offset..], false, depth + 1)?;
        elements.push(value);
        offset += consumed;
    }

    Ok((RespValue::Array(Some(elements)), offset))
}

/// Inline command: whitespace separated words terminated by CRLF.
fn parse_inline(input: &[u8]) -> ParseResult<RespValue> {
    let pos = match memchr::memmem::find(input, b"\r\n") {
        Some(pos) => pos,
        None if input.len() > LINE_LEN_MAX => {
            return Err(ParseError::Invalid("inline command too long".to_string()))
        }
        None => return Err(ParseError::Incomplete),
    };

    let line = String::from_utf8_lossy(&input[..pos]);
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Err(ParseError::Invalid("empty inline command".to_string()));
    }

    Ok((RespValue::command(&words), pos + 2))
}

fn encode_value(value: &RespValue, dst: &mut BytesMut) {
    // Writing into BytesMut cannot fail
    match value {
        RespValue::SimpleString(s) => {
            let _ = write!(dst, "+{}\r\n", s);
        }
        RespValue::Error(s) => {
            let _ = write!(dst, "-{}\r\n", s);
        }
        RespValue::Integer(n) => {
            let _ = write!(dst, ":{}\r\n", n);
        }
        RespValue::BulkString(None) => dst.put_slice(b"$-1\r\n"),
        RespValue::BulkString(Some(data)) => {
            let _ = write!(dst, "${}\r\n", data.len());
            dst.put_slice(data);
            dst.put_slice(b"\r\n");
        }
        RespValue::Array(None) => dst.put_slice(b"*-1\r\n"),
        RespValue::Array(Some(elements)) => {
            let _ = write!(dst, "*{}\r\n", elements.len());
            for element in elements {
                encode_value(element, dst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut RespCodec, input: &[u8]) -> Vec<RespValue> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(value) = codec.decode(&mut buf).unwrap() {
            out.push(value);
        }
        out
    }

    #[test]
    fn test_decode_scalars() {
        let mut codec = RespCodec::client();
        let values = decode_all(&mut codec, b"+PONG\r\n:42\r\n-ERR boom\r\n$-1\r\n");
        assert_eq!(
            values,
            vec![
                RespValue::pong(),
                RespValue::Integer(42),
                RespValue::error("ERR boom"),
                RespValue::nil(),
            ]
        );
    }

    #[test]
    fn test_decode_bulk_with_embedded_crlf() {
        let mut codec = RespCodec::client();
        let values = decode_all(&mut codec, b"$4\r\na\r\nb\r\n");
        assert_eq!(values, vec![RespValue::bulk(&b"a\r\nb"[..])]);
    }

    #[test]
    fn test_incomplete_frame_is_not_consumed() {
        let mut codec = RespCodec::client();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nke"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"y\r\n");
        let value = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value, RespValue::command(&["GET", "key"]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_type_byte_rejected_by_client() {
        let mut codec = RespCodec::client();
        let mut buf = BytesMut::from(&b"hello\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(RespError::Invalid(_))));
    }

    #[test]
    fn test_inline_command_accepted_by_server() {
        let mut codec = RespCodec::server();
        let values = decode_all(&mut codec, b"PFCOUNT post:1:uniques\r\nPING\r\n");
        assert_eq!(
            values,
            vec![
                RespValue::command(&["PFCOUNT", "post:1:uniques"]),
                RespValue::command(&["PING"]),
            ]
        );
    }

    #[test]
    fn test_bulk_length_limit() {
        let mut codec = RespCodec::server();
        let mut buf = BytesMut::from(&b"$99999999\r\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(RespError::Invalid(_))));
    }

    #[test]
    fn test_encode_command_frame() {
        let mut codec = RespCodec::client();
        let mut dst = BytesMut::new();
        codec
            .encode(RespValue::command(&["GET", "post:1:likes"]), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], b"*2\r\n$3\r\nGET\r\n$12\r\npost:1:likes\r\n");
    }
}
