use std::fmt;

use crate::error::{SipParseError, SipResult};
use crate::header::{HeaderName, Headers};
use crate::method::Method;
use crate::status::StatusCode;
use crate::uri::Uri;

/// A parsed SIP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub request_uri: Uri,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// A parsed SIP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// The `To`/`From` tag plus display-name-and-URI portion of an address header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressHeader {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub tag: Option<String>,
}

impl fmt::Display for AddressHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}

impl AddressHeader {
    pub fn new(uri: Uri) -> Self {
        Self {
            display_name: None,
            uri,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn parse(raw: &str) -> SipResult<AddressHeader> {
        let raw = raw.trim();
        let mut tag = None;
        let (addr_part, params_part) = match raw.find(';') {
            Some(idx) => (&raw[..idx], Some(&raw[idx + 1..])),
            None => (raw, None),
        };
        if let Some(params) = params_part {
            for pair in params.split(';') {
                if let Some(v) = pair.trim().strip_prefix("tag=") {
                    tag = Some(v.to_string());
                }
            }
        }

        let addr_part = addr_part.trim();
        let (display_name, uri_str) = if let Some(start) = addr_part.find('<') {
            let name = addr_part[..start].trim().trim_matches('"');
            let name = if name.is_empty() { None } else { Some(name.to_string()) };
            let end = addr_part.rfind('>').unwrap_or(addr_part.len());
            (name, &addr_part[start..=end.min(addr_part.len() - 1)])
        } else {
            (None, addr_part)
        };

        let uri = Uri::parse(uri_str)?;
        Ok(AddressHeader {
            display_name,
            uri,
            tag,
        })
    }
}

/// Parsed `CSeq` header: sequence number and method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
}

/// Parsed `Via` header: protocol, sent-by address/port, branch, and the
/// `received`/`rport` parameters a server fills in from the observed source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub transport: String,
    pub host: String,
    pub port: Option<u16>,
    pub branch: Option<String>,
    pub received: Option<String>,
    pub rport: Option<u16>,
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if let Some(branch) = &self.branch {
            write!(f, ";branch={}", branch)?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={}", received)?;
        }
        if let Some(rport) = self.rport {
            write!(f, ";rport={}", rport)?;
        }
        Ok(())
    }
}

impl Via {
    pub fn new(transport: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            host: host.into(),
            port: None,
            branch: None,
            received: None,
            rport: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn parse(raw: &str) -> SipResult<Via> {
        let raw = raw.trim();
        let rest = raw
            .split_once("SIP/2.0/")
            .map(|(_, r)| r)
            .ok_or_else(|| SipParseError::MalformedHeader(raw.to_string()))?;
        let mut segments = rest.split(';');
        let sent_by = segments
            .next()
            .ok_or_else(|| SipParseError::MalformedHeader(raw.to_string()))?;
        let mut sent_by_parts = sent_by.trim().splitn(2, ' ');
        let transport = sent_by_parts
            .next()
            .ok_or_else(|| SipParseError::MalformedHeader(raw.to_string()))?
            .to_string();
        let hostport = sent_by_parts.next().unwrap_or_default().trim();
        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse::<u16>().ok()),
            None => (hostport.to_string(), None),
        };

        let mut via = Via {
            transport,
            host,
            port,
            branch: None,
            received: None,
            rport: None,
        };

        for param in segments {
            let param = param.trim();
            if let Some(v) = param.strip_prefix("branch=") {
                via.branch = Some(v.to_string());
            } else if let Some(v) = param.strip_prefix("received=") {
                via.received = Some(v.to_string());
            } else if let Some(v) = param.strip_prefix("rport=") {
                via.rport = v.parse().ok();
            } else if param == "rport" {
                via.rport = via.rport.or(Some(0));
            }
        }

        Ok(via)
    }
}

impl Request {
    pub fn new(method: Method, request_uri: Uri) -> Self {
        Self {
            method,
            request_uri,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get(&HeaderName::CallId)
    }

    pub fn from_header(&self) -> Option<SipResult<AddressHeader>> {
        self.headers.get(&HeaderName::From).map(AddressHeader::parse)
    }

    pub fn to_header(&self) -> Option<SipResult<AddressHeader>> {
        self.headers.get(&HeaderName::To).map(AddressHeader::parse)
    }

    pub fn cseq(&self) -> Option<(u32, Method)> {
        let raw = self.headers.get(&HeaderName::CSeq)?;
        let mut parts = raw.split_whitespace();
        let seq: u32 = parts.next()?.parse().ok()?;
        let method: Method = parts.next()?.parse().ok()?;
        Some((seq, method))
    }

    pub fn top_via(&self) -> Option<SipResult<Via>> {
        self.headers.get(&HeaderName::Via).map(Via::parse)
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers
            .set(HeaderName::ContentType, content_type.to_string());
        self.headers
            .set(HeaderName::ContentLength, body.len().to_string());
        self.body = body;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{} {} SIP/2.0\r\n", self.method, self.request_uri);
        for (name, value) in self.headers.iter() {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        if self.headers.get(&HeaderName::ContentLength).is_none() {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    pub fn parse(data: &[u8]) -> SipResult<Request> {
        let text = std::str::from_utf8(data).map_err(|_| SipParseError::Truncated)?;
        let (head, body) = split_head_body(text);
        let mut lines = head.lines();
        let request_line = lines.next().ok_or(SipParseError::Truncated)?;
        let mut parts = request_line.splitn(3, ' ');
        let method_str = parts
            .next()
            .ok_or_else(|| SipParseError::MalformedRequestLine(request_line.to_string()))?;
        let uri_str = parts
            .next()
            .ok_or_else(|| SipParseError::MalformedRequestLine(request_line.to_string()))?;
        let method: Method = method_str.parse().unwrap();
        let request_uri = Uri::parse(uri_str)?;
        let headers = parse_headers(lines)?;
        Ok(Request {
            method,
            request_uri,
            headers,
            body: body.as_bytes().to_vec(),
        })
    }
}

impl Response {
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn from_status(status: StatusCode) -> Self {
        let reason = status.default_reason().to_string();
        Self::new(status, reason)
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get(&HeaderName::CallId)
    }

    pub fn to_header(&self) -> Option<SipResult<AddressHeader>> {
        self.headers.get(&HeaderName::To).map(AddressHeader::parse)
    }

    pub fn from_header(&self) -> Option<SipResult<AddressHeader>> {
        self.headers.get(&HeaderName::From).map(AddressHeader::parse)
    }

    pub fn contact(&self) -> Option<SipResult<AddressHeader>> {
        self.headers.get(&HeaderName::Contact).map(AddressHeader::parse)
    }

    pub fn top_via(&self) -> Option<SipResult<Via>> {
        self.headers.get(&HeaderName::Via).map(Via::parse)
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers
            .set(HeaderName::ContentType, content_type.to_string());
        self.headers
            .set(HeaderName::ContentLength, body.len().to_string());
        self.body = body;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("SIP/2.0 {} {}\r\n", self.status.0, self.reason);
        for (name, value) in self.headers.iter() {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        if self.headers.get(&HeaderName::ContentLength).is_none() {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    pub fn parse(data: &[u8]) -> SipResult<Response> {
        let text = std::str::from_utf8(data).map_err(|_| SipParseError::Truncated)?;
        let (head, body) = split_head_body(text);
        let mut lines = head.lines();
        let status_line = lines.next().ok_or(SipParseError::Truncated)?;
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts
            .next()
            .ok_or_else(|| SipParseError::MalformedStatusLine(status_line.to_string()))?;
        let code: u16 = parts
            .next()
            .ok_or_else(|| SipParseError::MalformedStatusLine(status_line.to_string()))?
            .parse()
            .map_err(|_| SipParseError::MalformedStatusLine(status_line.to_string()))?;
        let reason = parts.next().unwrap_or_default().to_string();
        let headers = parse_headers(lines)?;
        Ok(Response {
            status: StatusCode(code),
            reason,
            headers,
            body: body.as_bytes().to_vec(),
        })
    }
}

fn split_head_body(text: &str) -> (&str, &str) {
    match text.find("\r\n\r\n") {
        Some(idx) => (&text[..idx], &text[idx + 4..]),
        None => match text.find("\n\n") {
            Some(idx) => (&text[..idx], &text[idx + 2..]),
            None => (text, ""),
        },
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> SipResult<Headers> {
    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SipParseError::MalformedHeader(line.to_string()))?;
        headers.push(HeaderName::parse(name.trim()), value.trim().to_string());
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_header_with_tag() {
        let addr = AddressHeader::parse("\"Alice\" <sip:alice@example.com>;tag=abc123").unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("Alice"));
        assert_eq!(addr.tag.as_deref(), Some("abc123"));
        assert_eq!(addr.uri.user.as_deref(), Some("alice"));
    }

    #[test]
    fn parses_via_with_received_and_rport() {
        let via = Via::parse("SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bK1;received=203.0.113.4;rport=33000")
            .unwrap();
        assert_eq!(via.transport, "UDP");
        assert_eq!(via.received.as_deref(), Some("203.0.113.4"));
        assert_eq!(via.rport, Some(33000));
    }

    #[test]
    fn round_trips_request_encode_parse() {
        let mut req = Request::new(Method::Invite, Uri::parse("sip:1000@proxy").unwrap());
        req.headers.push(HeaderName::CallId, "abc-123");
        req.headers.push(HeaderName::CSeq, "1 INVITE");
        let encoded = req.encode();
        let decoded = Request::parse(&encoded).unwrap();
        assert_eq!(decoded.call_id(), Some("abc-123"));
        assert_eq!(decoded.cseq(), Some((1, Method::Invite)));
    }

    #[test]
    fn response_encode_includes_status_line() {
        let resp = Response::from_status(StatusCode::RINGING);
        let encoded = String::from_utf8(resp.encode()).unwrap();
        assert!(encoded.starts_with("SIP/2.0 180 Ringing\r\n"));
    }
}
