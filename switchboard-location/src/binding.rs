use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use switchboard_sip::Uri;

/// Transport the REGISTER (or API call) arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
            TransportKind::Ws => "WS",
            TransportKind::Wss => "WSS",
        }
    }
}

/// Where a binding came from: the SIP REGISTER path, or a direct API call on
/// behalf of an external proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingSource {
    Sip,
    Api { external_proxy: String },
}

/// A single registration binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub aor: String,
    pub binding_id: String,
    pub contact_uri: Uri,
    pub received_ip: Option<String>,
    pub received_port: Option<u16>,
    pub transport: TransportKind,
    pub path: Vec<String>,
    pub instance_id: Option<String>,
    pub q_value: f32,
    pub expires_seconds: u32,
    pub expires_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub call_id: String,
    pub cseq: u32,
    pub user_agent: Option<String>,
    pub source: BindingSource,
}

impl Binding {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// First 16 hex digits of SHA-256 over `contact_uri[;instance_id]`.
    pub fn compute_binding_id(contact_uri: &str, instance_id: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(contact_uri.as_bytes());
        if let Some(instance) = instance_id {
            hasher.update(b";");
            hasher.update(instance.as_bytes());
        }
        let digest = hasher.finalize();
        hex::encode(digest)[..16].to_string()
    }

    /// The URI actually dialed: the registrant's observed source address
    /// when present (NAT-aware), preserving the registered user part;
    /// otherwise the contact URI verbatim.
    pub fn effective_contact(&self) -> Uri {
        match (&self.received_ip, self.received_port) {
            (Some(ip), Some(port)) if !ip.is_empty() => {
                let user = self.contact_uri.user.as_deref();
                self.contact_uri
                    .with_user_preserved(user, ip, port)
                    .with_param("transport", self.transport.as_str().to_lowercase())
            }
            _ => self.contact_uri.clone(),
        }
    }

    pub fn expires_at_from(registered_at: DateTime<Utc>, expires_seconds: u32) -> DateTime<Utc> {
        registered_at + ChronoDuration::seconds(expires_seconds as i64)
    }
}

/// Input to `LocationStore::register`.
#[derive(Debug, Clone)]
pub struct RegisterBinding {
    pub aor: String,
    pub contact_uri: Uri,
    pub received_ip: Option<String>,
    pub received_port: Option<u16>,
    pub transport: TransportKind,
    pub path: Vec<String>,
    pub instance_id: Option<String>,
    pub q_value: Option<f32>,
    pub expires_seconds: u32,
    pub call_id: String,
    pub cseq: u32,
    pub user_agent: Option<String>,
    pub source: BindingSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_id_depends_on_instance_id() {
        let without = Binding::compute_binding_id("sip:alice@10.0.0.1:5060", None);
        let with_instance = Binding::compute_binding_id("sip:alice@10.0.0.1:5060", Some("abc"));
        assert_ne!(without, with_instance);
        assert_eq!(without.len(), 16);
    }

    #[test]
    fn effective_contact_preserves_user_and_uses_received_source() {
        let binding = Binding {
            aor: "sip:alice@example.com".to_string(),
            binding_id: "x".to_string(),
            contact_uri: Uri::parse("sip:alice@192.168.1.5:5060").unwrap(),
            received_ip: Some("203.0.113.9".to_string()),
            received_port: Some(33000),
            transport: TransportKind::Udp,
            path: vec![],
            instance_id: None,
            q_value: 1.0,
            expires_seconds: 3600,
            expires_at: Utc::now(),
            registered_at: Utc::now(),
            call_id: "abc".to_string(),
            cseq: 1,
            user_agent: None,
            source: BindingSource::Sip,
        };
        let effective = binding.effective_contact();
        assert_eq!(effective.user.as_deref(), Some("alice"));
        assert_eq!(effective.host, "203.0.113.9");
        assert_eq!(effective.port, Some(33000));
    }

    #[test]
    fn effective_contact_falls_back_to_contact_uri_without_received_source() {
        let binding = Binding {
            aor: "sip:bob@example.com".to_string(),
            binding_id: "x".to_string(),
            contact_uri: Uri::parse("sip:bob@203.0.113.9:5060").unwrap(),
            received_ip: None,
            received_port: None,
            transport: TransportKind::Udp,
            path: vec![],
            instance_id: None,
            q_value: 1.0,
            expires_seconds: 3600,
            expires_at: Utc::now(),
            registered_at: Utc::now(),
            call_id: "abc".to_string(),
            cseq: 1,
            user_agent: None,
            source: BindingSource::Sip,
        };
        assert_eq!(binding.effective_contact(), binding.contact_uri);
    }
}
