use std::fmt;

/// Header names the core reads or writes. Anything else round-trips through
/// `Other` untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeaderName {
    Via,
    From,
    To,
    CallId,
    CSeq,
    Contact,
    MaxForwards,
    ContentType,
    ContentLength,
    Expires,
    MinExpires,
    UserAgent,
    Other(String),
}

impl HeaderName {
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Via => "Via",
            HeaderName::From => "From",
            HeaderName::To => "To",
            HeaderName::CallId => "Call-ID",
            HeaderName::CSeq => "CSeq",
            HeaderName::Contact => "Contact",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::ContentType => "Content-Type",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::Expires => "Expires",
            HeaderName::MinExpires => "Min-Expires",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Other(s) => s,
        }
    }

    pub fn parse(raw: &str) -> HeaderName {
        match raw.to_ascii_lowercase().as_str() {
            "via" | "v" => HeaderName::Via,
            "from" | "f" => HeaderName::From,
            "to" | "t" => HeaderName::To,
            "call-id" | "i" => HeaderName::CallId,
            "cseq" => HeaderName::CSeq,
            "contact" | "m" => HeaderName::Contact,
            "max-forwards" => HeaderName::MaxForwards,
            "content-type" | "c" => HeaderName::ContentType,
            "content-length" | "l" => HeaderName::ContentLength,
            "expires" => HeaderName::Expires,
            "min-expires" => HeaderName::MinExpires,
            "user-agent" => HeaderName::UserAgent,
            _ => HeaderName::Other(raw.to_string()),
        }
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered, possibly-repeating header list.
///
/// SIP allows multiple `Via` headers (one per hop); everything else the core
/// cares about appears at most once. Order of insertion is preserved so
/// encoding round-trips in the order the core built it.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(HeaderName, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: HeaderName, value: impl Into<String>) -> &mut Self {
        self.entries.push((name, value.into()));
        self
    }

    /// Replace all existing occurrences of `name` with a single new value.
    pub fn set(&mut self, name: HeaderName, value: impl Into<String>) -> &mut Self {
        self.entries.retain(|(n, _)| n != &name);
        self.entries.push((name, value.into()));
        self
    }

    pub fn get(&self, name: &HeaderName) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(HeaderName, String)> {
        self.entries.iter()
    }

    pub fn remove(&mut self, name: &HeaderName) {
        self.entries.retain(|(n, _)| n != name);
    }
}
