use std::fmt;
use std::str::FromStr;

/// SIP request method.
///
/// This system accepts REGISTER, INVITE, ACK, BYE and CANCEL; `Other` exists
/// so the transport layer can still decode and reject (rather than choke on)
/// anything else that arrives on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Other(String),
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Other(s) => s,
        }
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "REGISTER" => Method::Register,
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_methods() {
        for (text, method) in [
            ("INVITE", Method::Invite),
            ("BYE", Method::Bye),
            ("CANCEL", Method::Cancel),
        ] {
            assert_eq!(text.parse::<Method>().unwrap(), method);
            assert_eq!(method.as_str(), text);
        }
    }

    #[test]
    fn unknown_method_is_preserved() {
        let m: Method = "PUBLISH".parse().unwrap();
        assert_eq!(m, Method::Other("PUBLISH".to_string()));
    }
}
