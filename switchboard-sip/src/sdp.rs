use std::net::Ipv4Addr;

use crate::error::{SipParseError, SipResult};

/// One negotiated or offered codec: RTP payload type plus encoding name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    pub payload_type: u8,
    pub name: String,
    pub clock_rate: u32,
}

impl Codec {
    pub fn pcmu() -> Codec {
        Codec {
            payload_type: 0,
            name: "PCMU".to_string(),
            clock_rate: 8000,
        }
    }

    pub fn pcma() -> Codec {
        Codec {
            payload_type: 8,
            name: "PCMA".to_string(),
            clock_rate: 8000,
        }
    }
}

/// A single `m=` media section: one audio stream with its codec list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    pub codecs: Vec<Codec>,
}

/// A bare-bones SDP body: origin/connection address plus one audio media
/// section. The signaling core only reads the remote RTP endpoint and codec
/// list and writes the same shape back out; it never interprets attributes
/// beyond `rtpmap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpBody {
    pub origin_addr: Ipv4Addr,
    pub connection_addr: Ipv4Addr,
    pub session_id: u64,
    pub session_version: u64,
    pub media: Vec<MediaDescription>,
}

impl SdpBody {
    /// The first audio media section's listening port, if present.
    pub fn audio_port(&self) -> Option<u16> {
        self.media
            .iter()
            .find(|m| m.media_type == "audio")
            .map(|m| m.port)
    }

    pub fn audio_codecs(&self) -> Vec<Codec> {
        self.media
            .iter()
            .find(|m| m.media_type == "audio")
            .map(|m| m.codecs.clone())
            .unwrap_or_default()
    }

    pub fn offer(local_addr: Ipv4Addr, port: u16, codecs: &[Codec]) -> SdpBody {
        SdpBody {
            origin_addr: local_addr,
            connection_addr: local_addr,
            session_id: 0,
            session_version: 0,
            media: vec![MediaDescription {
                media_type: "audio".to_string(),
                port,
                protocol: "RTP/AVP".to_string(),
                codecs: codecs.to_vec(),
            }],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str("v=0\r\n");
        out.push_str(&format!(
            "o=- {} {} IN IP4 {}\r\n",
            self.session_id, self.session_version, self.origin_addr
        ));
        out.push_str("s=switchboard\r\n");
        out.push_str(&format!("c=IN IP4 {}\r\n", self.connection_addr));
        out.push_str("t=0 0\r\n");
        for media in &self.media {
            let payloads = media
                .codecs
                .iter()
                .map(|c| c.payload_type.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(&format!(
                "m={} {} {} {}\r\n",
                media.media_type, media.port, media.protocol, payloads
            ));
            for codec in &media.codecs {
                out.push_str(&format!(
                    "a=rtpmap:{} {}/{}\r\n",
                    codec.payload_type, codec.name, codec.clock_rate
                ));
            }
        }
        out.into_bytes()
    }

    pub fn parse(data: &[u8]) -> SipResult<SdpBody> {
        let text = std::str::from_utf8(data).map_err(|_| SipParseError::Truncated)?;
        let mut origin_addr = Ipv4Addr::UNSPECIFIED;
        let mut connection_addr = Ipv4Addr::UNSPECIFIED;
        let mut session_id = 0u64;
        let mut session_version = 0u64;
        let mut media: Vec<MediaDescription> = Vec::new();

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(rest) = line.strip_prefix("o=") {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                if parts.len() >= 6 {
                    session_id = parts[1].parse().unwrap_or(0);
                    session_version = parts[2].parse().unwrap_or(0);
                    origin_addr = parts[5].parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
                }
            } else if let Some(rest) = line.strip_prefix("c=") {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                if parts.len() >= 3 {
                    connection_addr = parts[2].parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
                }
            } else if let Some(rest) = line.strip_prefix("m=") {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                if parts.len() < 3 {
                    return Err(SipParseError::MalformedSdp(line.to_string()));
                }
                let media_type = parts[0].to_string();
                let port: u16 = parts[1]
                    .parse()
                    .map_err(|_| SipParseError::MalformedSdp(line.to_string()))?;
                let protocol = parts[2].to_string();
                let codecs = parts[3..]
                    .iter()
                    .filter_map(|pt| pt.parse::<u8>().ok())
                    .map(|payload_type| Codec {
                        payload_type,
                        name: default_codec_name(payload_type),
                        clock_rate: 8000,
                    })
                    .collect();
                media.push(MediaDescription {
                    media_type,
                    port,
                    protocol,
                    codecs,
                });
            } else if let Some(rest) = line.strip_prefix("a=rtpmap:") {
                let mut parts = rest.splitn(2, ' ');
                let pt: u8 = match parts.next().and_then(|p| p.parse().ok()) {
                    Some(pt) => pt,
                    None => continue,
                };
                let codec_part = parts.next().unwrap_or_default();
                let mut codec_parts = codec_part.split('/');
                let name = codec_parts.next().unwrap_or_default().to_string();
                let clock_rate: u32 = codec_parts.next().and_then(|r| r.parse().ok()).unwrap_or(8000);
                if let Some(last_media) = media.last_mut() {
                    if let Some(existing) = last_media.codecs.iter_mut().find(|c| c.payload_type == pt) {
                        existing.name = name;
                        existing.clock_rate = clock_rate;
                    }
                }
            }
        }

        if connection_addr == Ipv4Addr::UNSPECIFIED && origin_addr != Ipv4Addr::UNSPECIFIED {
            connection_addr = origin_addr;
        }

        Ok(SdpBody {
            origin_addr,
            connection_addr,
            session_id,
            session_version,
            media,
        })
    }
}

fn default_codec_name(payload_type: u8) -> String {
    match payload_type {
        0 => "PCMU".to_string(),
        8 => "PCMA".to_string(),
        9 => "G722".to_string(),
        18 => "G729".to_string(),
        other => format!("payload-{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_offer() {
        let sdp = SdpBody::offer(Ipv4Addr::new(10, 0, 0, 1), 40000, &[Codec::pcmu(), Codec::pcma()]);
        let encoded = sdp.encode();
        let decoded = SdpBody::parse(&encoded).unwrap();
        assert_eq!(decoded.audio_port(), Some(40000));
        assert_eq!(decoded.audio_codecs().len(), 2);
        assert_eq!(decoded.connection_addr, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn parses_rtpmap_without_explicit_names_in_m_line() {
        let raw = b"v=0\r\no=- 1 1 IN IP4 192.168.1.10\r\ns=-\r\nc=IN IP4 192.168.1.10\r\nt=0 0\r\nm=audio 40000 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
        let sdp = SdpBody::parse(raw).unwrap();
        assert_eq!(sdp.audio_codecs()[0].name, "PCMU");
    }
}
