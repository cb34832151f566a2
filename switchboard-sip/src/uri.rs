use std::collections::BTreeMap;
use std::fmt;

use crate::error::{SipParseError, SipResult};

/// A `sip:` or `sips:` URI.
///
/// Deliberately narrow: enough to carry user/host/port/transport and the few
/// parameters the signaling core reads or writes (`tag`, `transport`), not a
/// general-purpose RFC 3261 URI parser (no headers-in-URI, no escaping table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub secure: bool,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: BTreeMap<String, String>,
}

impl Uri {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            secure: false,
            user: None,
            host: host.into(),
            port: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    pub fn transport(&self) -> Option<&str> {
        self.param("transport")
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 5061 } else { 5060 })
    }

    /// Returns a copy with the user part replaced, preserving everything
    /// else — used to build a binding's effective contact.
    pub fn with_user_preserved(&self, user: Option<&str>, host: &str, port: u16) -> Uri {
        Uri {
            secure: self.secure,
            user: user.map(|u| u.to_string()),
            host: host.to_string(),
            port: Some(port),
            params: self.params.clone(),
        }
    }

    pub fn parse(input: &str) -> SipResult<Uri> {
        let input = input.trim();
        let input = input.trim_start_matches('<').trim_end_matches('>');
        if let Some(rest) = input.strip_prefix("sips:") {
            parse_rest(rest, true)
        } else if let Some(rest) = input.strip_prefix("sip:") {
            parse_rest(rest, false)
        } else {
            Err(SipParseError::MalformedUri(input.to_string()))
        }
    }
}

fn parse_rest(rest: &str, secure: bool) -> SipResult<Uri> {
    // rest: [user@]host[:port][;param=value]*
    let mut parts = rest.splitn(2, ';');
    let userhost = parts.next().unwrap();
    let param_str = parts.next();

    let (user, hostport) = match userhost.split_once('@') {
        Some((u, h)) => (Some(u.to_string()), h),
        None => (None, userhost),
    };

    let (host, port) = if let Some(idx) = hostport.rfind(':') {
        // Avoid splitting an IPv6 literal; this crate does not target IPv6.
        let (h, p) = hostport.split_at(idx);
        let p = &p[1..];
        match p.parse::<u16>() {
            Ok(port) => (h.to_string(), Some(port)),
            Err(_) => (hostport.to_string(), None),
        }
    } else {
        (hostport.to_string(), None)
    };

    if host.is_empty() {
        return Err(SipParseError::MalformedUri(rest.to_string()));
    }

    let mut params = BTreeMap::new();
    if let Some(param_str) = param_str {
        for pair in param_str.split(';') {
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((k, v)) => {
                    params.insert(k.to_string(), v.to_string());
                }
                None => {
                    params.insert(pair.to_string(), String::new());
                }
            }
        }
    }

    Ok(Uri {
        secure,
        user,
        host,
        port,
        params,
    })
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if self.secure { "sips:" } else { "sip:" })?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (k, v) in &self.params {
            if v.is_empty() {
                write!(f, ";{}", k)?;
            } else {
                write!(f, ";{}={}", k, v)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_uri() {
        let uri = Uri::parse("sip:alice@example.com:5060;transport=udp").unwrap();
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, Some(5060));
        assert_eq!(uri.transport(), Some("udp"));
    }

    #[test]
    fn parses_uri_without_user() {
        let uri = Uri::parse("sip:proxy.example.com").unwrap();
        assert!(uri.user.is_none());
        assert_eq!(uri.port_or_default(), 5060);
    }

    #[test]
    fn round_trips_through_display() {
        let uri = Uri::parse("sip:bob@10.0.0.1:5080").unwrap();
        assert_eq!(uri.to_string(), "sip:bob@10.0.0.1:5080");
    }

    #[test]
    fn effective_contact_preserves_user_part() {
        let original = Uri::parse("sip:carol@192.168.0.50:5060").unwrap();
        let effective = original.with_user_preserved(Some("carol"), "203.0.113.9", 33000);
        assert_eq!(effective.to_string(), "sip:carol@203.0.113.9:33000");
    }
}
