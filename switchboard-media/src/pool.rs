use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::node::MediaNodeClient;
use crate::types::{
    BridgeHandleId, CreateSessionRequest, DestroyReason, DrainMode, MediaNodeId, PlayAudioEvent,
    SessionHandle, SessionId,
};
use switchboard_sip::Codec;

/// Thresholds controlling how quickly a pool member flips healthy/unhealthy.
/// Defaults: 3 consecutive failures to go unhealthy, 2 consecutive
/// successes to come back.
#[derive(Debug, Clone, Copy)]
pub struct MediaPoolConfig {
    pub health_check_interval: Duration,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

impl Default for MediaPoolConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(5),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
    None,
    Draining(DrainMode),
}

struct PoolMember {
    id: MediaNodeId,
    client: Arc<dyn MediaNodeClient>,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    drain: RwLock<DrainState>,
    session_count: AtomicUsize,
}

/// Read-only snapshot of a pool member's admin-visible status: healthy,
/// drain state, session count.
#[derive(Debug, Clone)]
pub struct MediaNodeStatus {
    pub id: MediaNodeId,
    pub healthy: bool,
    pub draining: Option<DrainMode>,
    pub session_count: usize,
}

/// A pool of control channels to N media nodes, providing affinity,
/// round-robin selection among healthy members, and background health
/// probing.
pub struct MediaPool {
    members: Vec<Arc<PoolMember>>,
    rr_counter: AtomicUsize,
    affinity: DashMap<SessionId, usize>,
    bridge_affinity: DashMap<BridgeHandleId, usize>,
    config: MediaPoolConfig,
}

impl MediaPool {
    /// Construct a pool over `members`. Each member's `health()` is probed
    /// once; a failing member is marked unhealthy and construction proceeds
    /// as long as at least one member is healthy, otherwise
    /// `NoHealthyManagers` is returned.
    pub async fn new(
        members: Vec<(MediaNodeId, Arc<dyn MediaNodeClient>)>,
        config: MediaPoolConfig,
    ) -> MediaResult<Arc<Self>> {
        let mut pool_members = Vec::with_capacity(members.len());
        let mut any_healthy = false;

        for (id, client) in members {
            let healthy = client.health().await.is_ok();
            any_healthy |= healthy;
            if !healthy {
                warn!(node = %id, "media node failed initial health probe, marking unhealthy");
            }
            pool_members.push(Arc::new(PoolMember {
                id,
                client,
                healthy: AtomicBool::new(healthy),
                consecutive_failures: AtomicU32::new(0),
                consecutive_successes: AtomicU32::new(0),
                drain: RwLock::new(DrainState::None),
                session_count: AtomicUsize::new(0),
            }));
        }

        if !any_healthy {
            return Err(MediaError::NoHealthyManagers);
        }

        Ok(Arc::new(Self {
            members: pool_members,
            rr_counter: AtomicUsize::new(0),
            affinity: DashMap::new(),
            bridge_affinity: DashMap::new(),
            config,
        }))
    }

    /// Spawn the background health checker.
    pub fn start_health_checker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.health_check_interval);
            loop {
                ticker.tick().await;
                pool.probe_all().await;
            }
        })
    }

    async fn probe_all(&self) {
        for member in &self.members {
            let ok = member.client.health().await.is_ok();
            if ok {
                let successes = member.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
                member.consecutive_failures.store(0, Ordering::Relaxed);
                if !member.healthy.load(Ordering::Acquire) && successes >= self.config.healthy_threshold {
                    member.healthy.store(true, Ordering::Release);
                    info!(node = %member.id, "media node became healthy");
                }
            } else {
                let failures = member.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                member.consecutive_successes.store(0, Ordering::Relaxed);
                if member.healthy.load(Ordering::Acquire) && failures >= self.config.unhealthy_threshold {
                    member.healthy.store(false, Ordering::Release);
                    warn!(node = %member.id, "media node became unhealthy");
                }
            }
        }
    }

    async fn pick_member(&self) -> MediaResult<Arc<PoolMember>> {
        let eligible: Vec<usize> = futures_select_eligible(&self.members).await;
        if eligible.is_empty() {
            return Err(MediaError::NoHealthyManagers);
        }
        let pick = self.rr_counter.fetch_add(1, Ordering::Relaxed) % eligible.len();
        Ok(self.members[eligible[pick]].clone())
    }

    fn member_index(&self, member: &Arc<PoolMember>) -> usize {
        self.members
            .iter()
            .position(|m| Arc::ptr_eq(m, member))
            .expect("member belongs to this pool")
    }

    pub async fn create_session(&self, request: CreateSessionRequest) -> MediaResult<SessionHandle> {
        let member = self.pick_member().await?;
        let handle = member.client.create_session(request).await?;
        member.session_count.fetch_add(1, Ordering::Relaxed);
        self.affinity.insert(handle.session_id, self.member_index(&member));
        debug!(session = %handle.session_id, node = %member.id, "created media session");
        Ok(handle)
    }

    pub async fn create_session_pending_remote(
        &self,
        call_id: &str,
        offered_codecs: &[Codec],
    ) -> MediaResult<SessionHandle> {
        let member = self.pick_member().await?;
        let handle = member
            .client
            .create_session_pending_remote(call_id, offered_codecs)
            .await?;
        member.session_count.fetch_add(1, Ordering::Relaxed);
        self.affinity.insert(handle.session_id, self.member_index(&member));
        debug!(session = %handle.session_id, node = %member.id, "created pending-remote media session");
        Ok(handle)
    }

    fn member_for_session(&self, session_id: SessionId) -> MediaResult<Arc<PoolMember>> {
        let idx = self
            .affinity
            .get(&session_id)
            .ok_or_else(|| MediaError::NoManagerForSession(session_id.to_string()))?;
        Ok(self.members[*idx].clone())
    }

    pub async fn update_session_remote(
        &self,
        session_id: SessionId,
        addr: IpAddr,
        port: u16,
    ) -> MediaResult<()> {
        let member = self.member_for_session(session_id)?;
        member.client.update_session_remote(session_id, addr, port).await
    }

    /// Destroys the session and releases its affinity entry. A second call
    /// with the same `session_id` returns `NoManagerForSession`: destroying
    /// an already-destroyed session is an error, not a silent no-op.
    pub async fn destroy_session(&self, session_id: SessionId, reason: DestroyReason) -> MediaResult<()> {
        let member = self.member_for_session(session_id)?;
        let result = member.client.destroy_session(session_id, reason).await;
        self.affinity.remove(&session_id);
        member.session_count.fetch_sub(1, Ordering::Relaxed);
        result
    }

    pub async fn play_audio(
        &self,
        session_id: SessionId,
        audio_file: &str,
        loop_playback: bool,
    ) -> MediaResult<mpsc::Receiver<PlayAudioEvent>> {
        let member = self.member_for_session(session_id)?;
        member.client.play_audio(session_id, audio_file, loop_playback).await
    }

    pub async fn stop_audio(&self, session_id: SessionId) -> MediaResult<()> {
        let member = self.member_for_session(session_id)?;
        member.client.stop_audio(session_id).await
    }

    /// Bridges two sessions. Both must have been created on (and still have
    /// affinity to) the same pool member — a media node can only forward
    /// RTP between sessions it owns locally.
    pub async fn bridge_media(&self, session_a: SessionId, session_b: SessionId) -> MediaResult<BridgeHandleId> {
        let member_a = self.member_for_session(session_a)?;
        let member_b = self.member_for_session(session_b)?;
        if !Arc::ptr_eq(&member_a, &member_b) {
            return Err(MediaError::NoManagerForSession(session_b.to_string()));
        }
        let bridge_id = member_a.client.bridge_media(session_a, session_b).await?;
        self.bridge_affinity.insert(bridge_id, self.member_index(&member_a));
        Ok(bridge_id)
    }

    pub async fn unbridge_media(&self, bridge_id: BridgeHandleId) -> MediaResult<()> {
        let idx = self
            .bridge_affinity
            .get(&bridge_id)
            .ok_or_else(|| MediaError::NoManagerForBridge(bridge_id.to_string()))?;
        let member = self.members[*idx].clone();
        drop(idx);
        let result = member.client.unbridge_media(bridge_id).await;
        self.bridge_affinity.remove(&bridge_id);
        result
    }

    pub async fn health(&self) -> Vec<MediaNodeStatus> {
        self.status().await
    }

    pub async fn status(&self) -> Vec<MediaNodeStatus> {
        let mut statuses = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let draining = match *member.drain.read().await {
                DrainState::None => None,
                DrainState::Draining(mode) => Some(mode),
            };
            statuses.push(MediaNodeStatus {
                id: member.id.clone(),
                healthy: member.healthy.load(Ordering::Acquire),
                draining,
                session_count: member.session_count.load(Ordering::Relaxed),
            });
        }
        statuses
    }

    pub async fn drain(&self, node_id: &MediaNodeId, mode: DrainMode) -> MediaResult<()> {
        let member = self
            .members
            .iter()
            .find(|m| &m.id == node_id)
            .ok_or_else(|| MediaError::NoManagerForSession(node_id.to_string()))?;
        *member.drain.write().await = DrainState::Draining(mode);
        info!(node = %node_id, mode = ?mode, "media node drain requested");
        Ok(())
    }

    pub async fn cancel_drain(&self, node_id: &MediaNodeId) -> MediaResult<()> {
        let member = self
            .members
            .iter()
            .find(|m| &m.id == node_id)
            .ok_or_else(|| MediaError::NoManagerForSession(node_id.to_string()))?;
        *member.drain.write().await = DrainState::None;
        info!(node = %node_id, "media node drain canceled");
        Ok(())
    }
}

/// Returns the indices of members that are both healthy and not draining,
/// for round-robin selection. Draining members keep serving existing
/// sessions (affinity lookups bypass this filter) but are skipped for new
/// `create_session` calls.
async fn futures_select_eligible(members: &[Arc<PoolMember>]) -> Vec<usize> {
    let mut eligible = Vec::with_capacity(members.len());
    for (idx, member) in members.iter().enumerate() {
        if !member.healthy.load(Ordering::Acquire) {
            continue;
        }
        let draining = matches!(*member.drain.read().await, DrainState::Draining(_));
        if !draining {
            eligible.push(idx);
        }
    }
    eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use switchboard_sip::Codec;

    /// An in-memory `MediaNodeClient` test double. Each instance can be
    /// flipped unhealthy to exercise the pool's failover behavior.
    struct MockNode {
        healthy: StdAtomicBool,
        sessions: DashMap<SessionId, ()>,
    }

    impl MockNode {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                healthy: StdAtomicBool::new(healthy),
                sessions: DashMap::new(),
            })
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::Relaxed);
        }
    }

    #[async_trait::async_trait]
    impl MediaNodeClient for MockNode {
        async fn create_session(&self, _request: CreateSessionRequest) -> MediaResult<SessionHandle> {
            let session_id = SessionId::new();
            self.sessions.insert(session_id, ());
            Ok(SessionHandle {
                session_id,
                local_addr: Ipv4Addr::LOCALHOST.into(),
                local_port: 20000,
                sdp_body: Vec::new(),
                selected_codec: Codec::pcmu(),
            })
        }

        async fn create_session_pending_remote(
            &self,
            _call_id: &str,
            _offered_codecs: &[Codec],
        ) -> MediaResult<SessionHandle> {
            self.create_session(CreateSessionRequest {
                call_id: String::new(),
                remote_addr: Ipv4Addr::UNSPECIFIED.into(),
                remote_port: 0,
                offered_codecs: Vec::new(),
            })
            .await
        }

        async fn update_session_remote(
            &self,
            _session_id: SessionId,
            _addr: IpAddr,
            _port: u16,
        ) -> MediaResult<()> {
            Ok(())
        }

        async fn destroy_session(&self, session_id: SessionId, _reason: DestroyReason) -> MediaResult<()> {
            self.sessions.remove(&session_id);
            Ok(())
        }

        async fn play_audio(
            &self,
            _session_id: SessionId,
            _audio_file: &str,
            _loop_playback: bool,
        ) -> MediaResult<mpsc::Receiver<PlayAudioEvent>> {
            let (tx, rx) = mpsc::channel(4);
            let _ = tx.send(PlayAudioEvent::Completed).await;
            Ok(rx)
        }

        async fn stop_audio(&self, _session_id: SessionId) -> MediaResult<()> {
            Ok(())
        }

        async fn bridge_media(&self, _session_a: SessionId, _session_b: SessionId) -> MediaResult<BridgeHandleId> {
            Ok(BridgeHandleId::new())
        }

        async fn unbridge_media(&self, _bridge_id: BridgeHandleId) -> MediaResult<()> {
            Ok(())
        }

        async fn health(&self) -> MediaResult<()> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(MediaError::NodeError {
                    node: "mock".to_string(),
                    message: "unhealthy".to_string(),
                })
            }
        }
    }

    fn request() -> CreateSessionRequest {
        CreateSessionRequest {
            call_id: "call-1".to_string(),
            remote_addr: Ipv4Addr::new(203, 0, 113, 9).into(),
            remote_port: 30000,
            offered_codecs: vec![Codec::pcmu()],
        }
    }

    #[tokio::test]
    async fn construction_fails_when_no_member_is_healthy() {
        let members: Vec<(MediaNodeId, Arc<dyn MediaNodeClient>)> = vec![(
            MediaNodeId("node-a".to_string()),
            MockNode::new(false) as Arc<dyn MediaNodeClient>,
        )];
        let err = MediaPool::new(members, MediaPoolConfig::default()).await.unwrap_err();
        assert!(matches!(err, MediaError::NoHealthyManagers));
    }

    #[tokio::test]
    async fn round_robins_across_healthy_members() {
        let members: Vec<(MediaNodeId, Arc<dyn MediaNodeClient>)> = vec![
            (MediaNodeId("a".to_string()), MockNode::new(true) as Arc<dyn MediaNodeClient>),
            (MediaNodeId("b".to_string()), MockNode::new(true) as Arc<dyn MediaNodeClient>),
        ];
        let pool = MediaPool::new(members, MediaPoolConfig::default()).await.unwrap();

        let mut picked = std::collections::HashSet::new();
        for _ in 0..4 {
            let handle = pool.create_session(request()).await.unwrap();
            let idx = *pool.affinity.get(&handle.session_id).unwrap();
            picked.insert(idx);
        }
        assert_eq!(picked.len(), 2, "round robin should have used both members");
    }

    #[tokio::test]
    async fn affinity_persists_across_session_operations() {
        let members: Vec<(MediaNodeId, Arc<dyn MediaNodeClient>)> = vec![(
            MediaNodeId("only".to_string()),
            MockNode::new(true) as Arc<dyn MediaNodeClient>,
        )];
        let pool = MediaPool::new(members, MediaPoolConfig::default()).await.unwrap();

        let handle = pool.create_session(request()).await.unwrap();
        pool.update_session_remote(handle.session_id, Ipv4Addr::LOCALHOST.into(), 4000)
            .await
            .unwrap();
        pool.destroy_session(handle.session_id, DestroyReason::Normal)
            .await
            .unwrap();

        let err = pool
            .update_session_remote(handle.session_id, Ipv4Addr::LOCALHOST.into(), 4000)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NoManagerForSession(_)));
    }

    #[tokio::test]
    async fn unknown_session_is_no_manager_for_session() {
        let members: Vec<(MediaNodeId, Arc<dyn MediaNodeClient>)> = vec![(
            MediaNodeId("only".to_string()),
            MockNode::new(true) as Arc<dyn MediaNodeClient>,
        )];
        let pool = MediaPool::new(members, MediaPoolConfig::default()).await.unwrap();
        let err = pool.stop_audio(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, MediaError::NoManagerForSession(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn health_checker_flips_member_unhealthy_after_threshold_failures() {
        let node = MockNode::new(true);
        let members: Vec<(MediaNodeId, Arc<dyn MediaNodeClient>)> =
            vec![(MediaNodeId("flaky".to_string()), node.clone() as Arc<dyn MediaNodeClient>)];
        let config = MediaPoolConfig {
            health_check_interval: Duration::from_millis(10),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        };
        let pool = MediaPool::new(members, config).await.unwrap();

        node.set_healthy(false);
        for _ in 0..3 {
            pool.probe_all().await;
        }

        let status = pool.status().await;
        assert!(!status[0].healthy);

        let err = pool.create_session(request()).await.unwrap_err();
        assert!(matches!(err, MediaError::NoHealthyManagers));
    }

    #[tokio::test]
    async fn draining_member_is_excluded_from_round_robin_but_keeps_affinity() {
        let node_id = MediaNodeId("drain-me".to_string());
        let members: Vec<(MediaNodeId, Arc<dyn MediaNodeClient>)> = vec![(
            node_id.clone(),
            MockNode::new(true) as Arc<dyn MediaNodeClient>,
        )];
        let pool = MediaPool::new(members, MediaPoolConfig::default()).await.unwrap();

        let handle = pool.create_session(request()).await.unwrap();
        pool.drain(&node_id, DrainMode::Graceful).await.unwrap();

        let err = pool.create_session(request()).await.unwrap_err();
        assert!(matches!(err, MediaError::NoHealthyManagers));

        pool.stop_audio(handle.session_id).await.unwrap();
    }

    #[tokio::test]
    async fn bridging_sessions_on_different_members_is_rejected() {
        let members: Vec<(MediaNodeId, Arc<dyn MediaNodeClient>)> = vec![
            (MediaNodeId("a".to_string()), MockNode::new(true) as Arc<dyn MediaNodeClient>),
            (MediaNodeId("b".to_string()), MockNode::new(true) as Arc<dyn MediaNodeClient>),
        ];
        let pool = MediaPool::new(members, MediaPoolConfig::default()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            handles.push(pool.create_session(request()).await.unwrap());
        }
        let idx_a = *pool.affinity.get(&handles[0].session_id).unwrap();
        let idx_b = *pool.affinity.get(&handles[1].session_id).unwrap();

        if idx_a == idx_b {
            let bridge = pool.bridge_media(handles[0].session_id, handles[1].session_id).await;
            assert!(bridge.is_ok());
        } else {
            let err = pool
                .bridge_media(handles[0].session_id, handles[1].session_id)
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::NoManagerForSession(_)));
        }
    }
}
