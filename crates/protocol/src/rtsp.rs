//! Minimal RTSP 1.0 message codec.
//!
//! Wire shape:
//!
//! ```text
//! OPTIONS * RTSP/1.0\r\n
//! CSeq: 1\r\n
//! Require: org.wfa.wfd1.0\r\n
//! \r\n
//! ```
//!
//! Headers keep insertion order and serialize byte-for-byte, so a
//! constructed request has exactly one wire form. `Content-Length` is
//! appended automatically when a body is present. Parsing is
//! incremental: feed a growing buffer, get back a message plus the
//! number of bytes consumed once a full head and body have arrived.

use std::fmt::Write as _;

use thiserror::Error;

pub const RTSP_VERSION: &str = "RTSP/1.0";

/// The WFD extension token carried in Require/Public headers.
pub const WFD_FEATURE: &str = "org.wfa.wfd1.0";

#[derive(Debug, Error)]
pub enum RtspError {
    #[error("malformed start line: {0:?}")]
    MalformedStartLine(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeaderLine(String),
    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    GetParameter,
    SetParameter,
    Setup,
    Play,
    Pause,
    Teardown,
    Extension(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Options => "OPTIONS",
            Method::GetParameter => "GET_PARAMETER",
            Method::SetParameter => "SET_PARAMETER",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::Extension(name) => name,
        }
    }

    fn from_token(tok: &str) -> Method {
        match tok {
            "OPTIONS" => Method::Options,
            "GET_PARAMETER" => Method::GetParameter,
            "SET_PARAMETER" => Method::SetParameter,
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "PAUSE" => Method::Pause,
            "TEARDOWN" => Method::Teardown,
            other => Method::Extension(other.to_string()),
        }
    }
}

/// Insertion-ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn write_to(&self, out: &mut String) {
        for (name, value) in &self.0 {
            let _ = write!(out, "{name}: {value}\r\n");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Request target; `*` for session-independent OPTIONS.
    pub uri: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Headers::default(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn cseq(&self) -> Option<u32> {
        self.headers.get("CSeq").and_then(|v| v.trim().parse().ok())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut head = String::new();
        let _ = write!(head, "{} {} {RTSP_VERSION}\r\n", self.method.as_str(), self.uri);
        self.headers.write_to(&mut head);
        if !self.body.is_empty() && self.headers.get("Content-Length").is_none() {
            let _ = write!(head, "Content-Length: {}\r\n", self.body.len());
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: Headers::default(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn cseq(&self) -> Option<u32> {
        self.headers.get("CSeq").and_then(|v| v.trim().parse().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut head = String::new();
        let _ = write!(head, "{RTSP_VERSION} {} {}\r\n", self.status, self.reason);
        self.headers.write_to(&mut head);
        if !self.body.is_empty() && self.headers.get("Content-Length").is_none() {
            let _ = write!(head, "Content-Length: {}\r\n", self.body.len());
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        453 => "Not Enough Bandwidth",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtspMessage {
    Request(Request),
    Response(Response),
}

impl RtspMessage {
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            RtspMessage::Request(r) => r.serialize(),
            RtspMessage::Response(r) => r.serialize(),
        }
    }
}

/// Result of feeding a buffer to [`parse`].
#[derive(Debug)]
pub enum ParseOutcome {
    /// A full message and the number of bytes it occupied.
    Complete(RtspMessage, usize),
    /// More bytes are needed.
    Incomplete,
}

/// Incrementally parse one message from the front of `buf`.
pub fn parse(buf: &[u8]) -> Result<ParseOutcome, RtspError> {
    let Some(head_end) = find_head_end(buf) else {
        return Ok(ParseOutcome::Incomplete);
    };
    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| RtspError::MalformedStartLine(String::from_utf8_lossy(&buf[..32.min(buf.len())]).into_owned()))?;

    let mut lines = head.split("\r\n");
    let start = lines
        .next()
        .ok_or_else(|| RtspError::MalformedStartLine(String::new()))?;

    let mut headers = Headers::default();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RtspError::MalformedHeaderLine(line.to_string()))?;
        headers.push(name.trim(), value.trim());
    }

    let body_len = match headers.get("Content-Length") {
        Some(v) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| RtspError::InvalidContentLength(v.to_string()))?,
        None => 0,
    };
    let total = head_end + 4 + body_len;
    if buf.len() < total {
        return Ok(ParseOutcome::Incomplete);
    }
    let body = buf[head_end + 4..total].to_vec();

    let msg = if let Some(rest) = start.strip_prefix(RTSP_VERSION) {
        let mut tok = rest.trim_start().splitn(2, ' ');
        let status = tok
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| RtspError::MalformedStartLine(start.to_string()))?;
        let reason = tok.next().unwrap_or("").to_string();
        RtspMessage::Response(Response {
            status,
            reason,
            headers,
            body,
        })
    } else {
        let mut tok = start.split_ascii_whitespace();
        let method = tok
            .next()
            .map(Method::from_token)
            .ok_or_else(|| RtspError::MalformedStartLine(start.to_string()))?;
        let uri = tok
            .next()
            .ok_or_else(|| RtspError::MalformedStartLine(start.to_string()))?
            .to_string();
        match tok.next() {
            Some(RTSP_VERSION) => {}
            _ => return Err(RtspError::MalformedStartLine(start.to_string())),
        }
        RtspMessage::Request(Request {
            method,
            uri,
            headers,
            body,
        })
    };

    Ok(ParseOutcome::Complete(msg, total))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_star_exact_bytes() {
        let req = Request::new(Method::Options, "*")
            .header("CSeq", "1")
            .header("Require", WFD_FEATURE);
        assert_eq!(
            req.serialize(),
            b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\nRequire: org.wfa.wfd1.0\r\n\r\n"
        );
    }

    #[test]
    fn header_order_is_insertion_order() {
        let req = Request::new(Method::Play, "rtsp://h/wfd1.0/streamid=0")
            .header("CSeq", "7")
            .header("Session", "abc")
            .header("User-Agent", "x");
        let text = String::from_utf8(req.serialize()).unwrap();
        let cseq = text.find("CSeq").unwrap();
        let session = text.find("Session").unwrap();
        let agent = text.find("User-Agent").unwrap();
        assert!(cseq < session && session < agent);
    }

    #[test]
    fn body_adds_content_length() {
        let req = Request::new(Method::SetParameter, "rtsp://h/wfd1.0")
            .header("CSeq", "4")
            .header("Content-Type", "text/parameters")
            .body("wfd_trigger_method: SETUP\r\n");
        let text = String::from_utf8(req.serialize()).unwrap();
        assert!(text.contains("Content-Length: 27\r\n"));
        assert!(text.ends_with("\r\n\r\nwfd_trigger_method: SETUP\r\n"));
    }

    #[test]
    fn empty_body_has_no_content_length() {
        let req = Request::new(Method::GetParameter, "rtsp://localhost/wfd1.0")
            .header("CSeq", "9");
        let text = String::from_utf8(req.serialize()).unwrap();
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn request_roundtrip() {
        let req = Request::new(Method::GetParameter, "rtsp://192.0.2.1/wfd1.0")
            .header("CSeq", "2")
            .header("Content-Type", "text/parameters")
            .body("wfd_audio_codecs\r\n");
        let bytes = req.serialize();
        match parse(&bytes).unwrap() {
            ParseOutcome::Complete(RtspMessage::Request(parsed), used) => {
                assert_eq!(used, bytes.len());
                assert_eq!(parsed, req);
            }
            other => panic!("expected complete request, got {other:?}"),
        }
    }

    #[test]
    fn response_roundtrip() {
        let resp = Response::ok()
            .header("CSeq", "2")
            .header("Public", "OPTIONS, PLAY")
            .body("x: y\r\n");
        let bytes = resp.serialize();
        match parse(&bytes).unwrap() {
            ParseOutcome::Complete(RtspMessage::Response(parsed), used) => {
                assert_eq!(used, bytes.len());
                assert_eq!(parsed, resp);
            }
            other => panic!("expected complete response, got {other:?}"),
        }
    }

    #[test]
    fn incremental_parse_waits_for_body() {
        let req = Request::new(Method::SetParameter, "rtsp://h/wfd1.0")
            .header("CSeq", "3")
            .body("wfd_standby\r\n");
        let bytes = req.serialize();
        // Feed everything but the last byte
        match parse(&bytes[..bytes.len() - 1]).unwrap() {
            ParseOutcome::Incomplete => {}
            other => panic!("expected incomplete, got {other:?}"),
        }
        match parse(&bytes).unwrap() {
            ParseOutcome::Complete(_, used) => assert_eq!(used, bytes.len()),
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn incremental_parse_waits_for_head() {
        match parse(b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n").unwrap() {
            ParseOutcome::Incomplete => {}
            other => panic!("expected incomplete, got {other:?}"),
        }
    }

    #[test]
    fn two_pipelined_messages() {
        let a = Request::new(Method::Options, "*").header("CSeq", "1").serialize();
        let b = Request::new(Method::Play, "rtsp://h/wfd1.0/streamid=0")
            .header("CSeq", "2")
            .serialize();
        let mut buf = a.clone();
        buf.extend_from_slice(&b);
        let ParseOutcome::Complete(RtspMessage::Request(first), used) = parse(&buf).unwrap()
        else {
            panic!("expected request");
        };
        assert_eq!(first.method, Method::Options);
        assert_eq!(used, a.len());
        let ParseOutcome::Complete(RtspMessage::Request(second), _) = parse(&buf[used..]).unwrap()
        else {
            panic!("expected request");
        };
        assert_eq!(second.method, Method::Play);
    }

    #[test]
    fn unknown_method_is_extension() {
        let bytes = b"ANNOUNCE rtsp://h/x RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let ParseOutcome::Complete(RtspMessage::Request(req), _) = parse(bytes).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(req.method, Method::Extension("ANNOUNCE".to_string()));
    }

    #[test]
    fn malformed_start_line_rejected() {
        match parse(b"garbage\r\n\r\n") {
            Err(RtspError::MalformedStartLine(_)) => {}
            other => panic!("expected malformed start line, got {other:?}"),
        }
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let bytes = b"OPTIONS * RTSP/1.0\r\ncseq: 5\r\nuser-agent: SinkX/1.0\r\n\r\n";
        let ParseOutcome::Complete(RtspMessage::Request(req), _) = parse(bytes).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(req.cseq(), Some(5));
        assert_eq!(req.headers.get("User-Agent"), Some("SinkX/1.0"));
    }
}
