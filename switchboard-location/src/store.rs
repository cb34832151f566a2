use std::time::Duration;

use chrono::Utc;
use switchboard_ttl::TtlStore;
use tracing::{debug, info};

use crate::binding::{Binding, RegisterBinding};
use crate::error::{LocationError, LocationResult};

/// Key into the underlying TTL store: `(aor, binding_id)`.
type Key = (String, String);

/// AOR → bindings, with per-binding expiry, q-value priority, and
/// NAT-aware effective contact resolution.
#[derive(Clone)]
pub struct LocationStore {
    min_expires: u32,
    bindings: TtlStore<Key, Binding>,
}

impl LocationStore {
    pub fn new(min_expires: u32) -> Self {
        Self {
            min_expires,
            bindings: TtlStore::with_eviction_callback(std::sync::Arc::new(|key, binding| {
                debug!(
                    aor = %key.0,
                    binding_id = %key.1,
                    contact = %binding.contact_uri,
                    "registration binding expired and was swept"
                );
            })),
        }
    }

    pub fn start_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        self.bindings.start_sweeper(interval)
    }

    pub fn register(&self, input: RegisterBinding) -> LocationResult<Binding> {
        if input.expires_seconds < self.min_expires {
            return Err(LocationError::IntervalTooBrief {
                min: self.min_expires,
            });
        }

        let binding_id =
            Binding::compute_binding_id(&input.contact_uri.to_string(), input.instance_id.as_deref());
        let key = (input.aor.clone(), binding_id.clone());

        if let Some(existing) = self.bindings.get(&key) {
            if existing.call_id == input.call_id && input.cseq <= existing.cseq {
                return Err(LocationError::StaleCSeq {
                    call_id: input.call_id,
                    expected: existing.cseq,
                    got: input.cseq,
                });
            }
        }

        let registered_at = Utc::now();
        let expires_at = Binding::expires_at_from(registered_at, input.expires_seconds);

        let binding = Binding {
            aor: input.aor.clone(),
            binding_id: binding_id.clone(),
            contact_uri: input.contact_uri,
            received_ip: input.received_ip,
            received_port: input.received_port,
            transport: input.transport,
            path: input.path,
            instance_id: input.instance_id,
            q_value: input.q_value.unwrap_or(1.0),
            expires_seconds: input.expires_seconds,
            expires_at,
            registered_at,
            call_id: input.call_id,
            cseq: input.cseq,
            user_agent: input.user_agent,
            source: input.source,
        };

        self.bindings
            .set(key, binding.clone(), Duration::from_secs(input.expires_seconds as u64));

        info!(aor = %binding.aor, binding_id = %binding.binding_id, contact = %binding.contact_uri, "binding registered");
        Ok(binding)
    }

    pub fn unregister(&self, aor: &str, binding_id: &str, wildcard: bool) -> LocationResult<()> {
        if wildcard {
            let keys: Vec<Key> = self
                .bindings
                .all()
                .into_iter()
                .filter(|((a, _), _)| a == aor)
                .map(|(k, _)| k)
                .collect();
            for key in keys {
                self.bindings.delete(&key);
            }
            info!(aor = %aor, "wildcard unregister");
            Ok(())
        } else {
            let key = (aor.to_string(), binding_id.to_string());
            match self.bindings.delete(&key) {
                Some(_) => {
                    info!(aor = %aor, binding_id = %binding_id, "binding unregistered");
                    Ok(())
                }
                None => Err(LocationError::NotFound {
                    aor: aor.to_string(),
                    binding_id: binding_id.to_string(),
                }),
            }
        }
    }

    /// All non-expired bindings for `aor`, sorted by q-value descending,
    /// ties broken by most-recently-registered first.
    pub fn lookup(&self, aor: &str) -> Vec<Binding> {
        let mut matches: Vec<Binding> = self
            .bindings
            .all()
            .into_iter()
            .filter(|((a, _), _)| a == aor)
            .map(|(_, b)| b)
            .collect();
        matches.sort_by(|a, b| {
            b.q_value
                .partial_cmp(&a.q_value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.registered_at.cmp(&a.registered_at))
        });
        matches
    }

    pub fn lookup_one(&self, aor: &str) -> Option<Binding> {
        self.lookup(aor).into_iter().next()
    }

    /// Scans all bindings whose AOR user-part equals `user`, sorted by
    /// q-value descending, ties broken by most-recently-registered first.
    pub fn lookup_by_user(&self, user: &str) -> Vec<Binding> {
        let mut matches: Vec<Binding> = self
            .bindings
            .all()
            .into_iter()
            .map(|(_, b)| b)
            .filter(|b| aor_user_part(&b.aor).as_deref() == Some(user))
            .collect();
        matches.sort_by(|a, b| {
            b.q_value
                .partial_cmp(&a.q_value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.registered_at.cmp(&a.registered_at))
        });
        matches
    }

    /// The single best binding for `user` under the same q-value/recency
    /// ordering as `lookup_one` uses for AOR lookups.
    pub fn lookup_one_by_user(&self, user: &str) -> Option<Binding> {
        self.lookup_by_user(user).into_iter().next()
    }

    pub fn list(&self) -> Vec<Binding> {
        self.bindings.all().into_iter().map(|(_, b)| b).collect()
    }

    pub fn list_by_aor(&self, aor: &str) -> Vec<Binding> {
        self.lookup(aor)
    }

    pub fn count(&self) -> usize {
        self.bindings.len()
    }

    pub fn count_aors(&self) -> usize {
        let mut aors: Vec<String> = self.bindings.all().into_iter().map(|(k, _)| k.0).collect();
        aors.sort();
        aors.dedup();
        aors.len()
    }

    pub fn has(&self, aor: &str) -> bool {
        !self.lookup(aor).is_empty()
    }
}

fn aor_user_part(aor: &str) -> Option<String> {
    switchboard_sip::Uri::parse(aor)
        .ok()
        .and_then(|uri| uri.user)
}
