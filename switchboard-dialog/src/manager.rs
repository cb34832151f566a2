use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use switchboard_sip::{Request, StatusCode};
use switchboard_transport::Transport;
use switchboard_ttl::TtlStore;
use tracing::{debug, info, warn};

use crate::dialog::{Dialog, DialogState, DialogTerminated, TerminateReason};
use crate::error::{DialogError, DialogResult};
use crate::responses::{build_bye, build_response};

/// A Dialog wrapped for sharing: handles go out to callers (C5/C6/C7) so
/// they can read current state without going back through the manager.
pub type DialogHandle = Arc<Mutex<Dialog>>;

#[derive(Debug, Clone, Copy)]
pub struct DialogManagerConfig {
    pub active_ttl: Duration,
    pub terminated_ttl: Duration,
    pub ack_timeout: Duration,
}

impl Default for DialogManagerConfig {
    fn default() -> Self {
        Self {
            active_ttl: Duration::from_secs(4 * 60 * 60),
            terminated_ttl: Duration::from_secs(32),
            ack_timeout: Duration::from_secs(32),
        }
    }
}

/// Owns every live dialog, keyed by Call-ID.
pub struct DialogManager {
    dialogs: TtlStore<String, DialogHandle>,
    transport: Arc<dyn Transport>,
    config: DialogManagerConfig,
}

impl DialogManager {
    pub fn new(transport: Arc<dyn Transport>, config: DialogManagerConfig) -> Arc<Self> {
        let dialogs = TtlStore::with_eviction_callback(Arc::new(|call_id: String, _handle| {
            debug!(call_id, "dialog evicted from retention window");
        }));
        Arc::new(Self {
            dialogs,
            transport,
            config,
        })
    }

    pub fn start_sweeper(&self, interval: Duration) {
        self.dialogs.start_sweeper(interval);
    }

    /// `create_from_invite`: on a duplicate Call-ID that is non-terminal,
    /// returns the existing Dialog (retransmission / re-INVITE idempotence).
    pub fn create_from_invite(&self, request: Request, source: SocketAddr) -> DialogResult<DialogHandle> {
        let call_id = request
            .call_id()
            .ok_or_else(|| DialogError::Malformed("missing Call-ID".to_string()))?
            .to_string();

        if let Some(existing) = self.dialogs.get(&call_id) {
            if !existing.lock().is_terminal() {
                debug!(call_id, "retransmitted INVITE matched existing non-terminal dialog");
                return Ok(existing);
            }
        }

        let dialog = Arc::new(Mutex::new(Dialog::new(call_id.clone(), request, source)));
        self.dialogs.set(call_id, dialog.clone(), self.config.active_ttl);
        Ok(dialog)
    }

    /// Registers the callback fired exactly once when `dialog` terminates.
    pub fn set_on_terminate(
        &self,
        dialog: &DialogHandle,
        callback: Arc<dyn Fn(DialogTerminated) + Send + Sync>,
    ) {
        dialog.lock().on_terminate = Some(callback);
    }

    pub fn get(&self, call_id: &str) -> Option<DialogHandle> {
        self.dialogs.get(&call_id.to_string())
    }

    pub fn list(&self) -> Vec<DialogHandle> {
        self.dialogs.all().into_iter().map(|(_, v)| v).collect()
    }

    pub fn count(&self) -> usize {
        self.dialogs.len()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Dialog)) {
        for (_, handle) in self.dialogs.all() {
            f(&handle.lock());
        }
    }

    /// `send_trying`: precondition `Initial`; best-effort 100, transition Early.
    pub async fn send_trying(&self, dialog: &DialogHandle) -> DialogResult<()> {
        let (request, source) = {
            let guard = dialog.lock();
            if guard.state != DialogState::Initial {
                return Err(DialogError::InvalidState {
                    entity: "dialog".to_string(),
                    from: guard.state.to_string(),
                    to: "early".to_string(),
                });
            }
            (guard.invite.clone(), guard.invite_source)
        };

        let response = build_response(&request, StatusCode::TRYING, None);
        self.send_response_best_effort(&response, source).await;
        dialog.lock().transition(DialogState::Early);
        Ok(())
    }

    /// `send_progress`: precondition `Initial|Early`; best-effort 183+SDP, stay Early.
    pub async fn send_progress(&self, dialog: &DialogHandle, sdp: &[u8]) -> DialogResult<()> {
        let (request, source) = {
            let guard = dialog.lock();
            if !matches!(guard.state, DialogState::Initial | DialogState::Early) {
                return Err(DialogError::InvalidState {
                    entity: "dialog".to_string(),
                    from: guard.state.to_string(),
                    to: "early".to_string(),
                });
            }
            (guard.invite.clone(), guard.invite_source)
        };

        let response = build_response(&request, StatusCode::SESSION_PROGRESS, None)
            .with_body("application/sdp", sdp.to_vec());
        self.send_response_best_effort(&response, source).await;
        dialog.lock().transition(DialogState::Early);
        Ok(())
    }

    /// `send_ok`: precondition `Initial|Early`; 200+SDP, transition WaitingAck,
    /// spawn the ACK-timeout watcher. A send failure transitions the dialog
    /// straight to `Terminated(error)` instead.
    pub async fn send_ok(self: &Arc<Self>, dialog: &DialogHandle, sdp: &[u8]) -> DialogResult<()> {
        let (request, source, local_tag) = {
            let guard = dialog.lock();
            if !matches!(guard.state, DialogState::Initial | DialogState::Early) {
                return Err(DialogError::InvalidState {
                    entity: "dialog".to_string(),
                    from: guard.state.to_string(),
                    to: "waiting-ack".to_string(),
                });
            }
            (guard.invite.clone(), guard.invite_source, Dialog::generate_local_tag())
        };

        let response = build_response(&request, StatusCode::OK, Some(&local_tag))
            .with_body("application/sdp", sdp.to_vec());

        if let Err(e) = self.transport.send_response(&response, source).await {
            warn!(error = %e, "failed to send 200 OK, terminating dialog");
            self.terminate(&request.call_id().unwrap_or_default().to_string(), TerminateReason::Error)
                .await?;
            return Err(e.into());
        }

        {
            let mut guard = dialog.lock();
            guard.local_tag = Some(local_tag);
            guard.final_response = Some(response);
            guard.transition(DialogState::WaitingAck);
        }

        let manager = self.clone();
        let call_id = request.call_id().unwrap_or_default().to_string();
        let dialog_for_watcher = dialog.clone();
        let ack_timeout = self.config.ack_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(ack_timeout).await;
            let still_waiting = dialog_for_watcher.lock().state == DialogState::WaitingAck;
            if still_waiting {
                debug!(call_id, "ACK timeout, terminating dialog");
                let _ = manager.terminate(&call_id, TerminateReason::Timeout).await;
            }
        });

        Ok(())
    }

    /// `reject`: precondition `Initial|Early`; sends `status` as the INVITE's
    /// final response and terminates the dialog with no BYE. Used for
    /// failures discovered before any 200 OK went out (bad SDP, no media
    /// capacity, and the like).
    pub async fn reject(self: &Arc<Self>, call_id: &str, status: StatusCode) -> DialogResult<()> {
        let Some(dialog) = self.dialogs.get(&call_id.to_string()) else {
            return Err(DialogError::NotFound(call_id.to_string()));
        };

        let (request, source) = {
            let guard = dialog.lock();
            if !matches!(guard.state, DialogState::Initial | DialogState::Early) {
                return Err(DialogError::InvalidState {
                    entity: "dialog".to_string(),
                    from: guard.state.to_string(),
                    to: "terminated".to_string(),
                });
            }
            (guard.invite.clone(), guard.invite_source)
        };

        let response = build_response(&request, status, None);
        self.send_response_best_effort(&response, source).await;
        self.terminate(call_id, TerminateReason::Error).await
    }

    /// `confirm_with_ack`: precondition `WaitingAck`; ACK in `Confirmed` is a
    /// retransmission and silently accepted.
    pub async fn confirm_with_ack(&self, request: &Request) -> DialogResult<()> {
        let call_id = request
            .call_id()
            .ok_or_else(|| DialogError::Malformed("missing Call-ID".to_string()))?;
        let dialog = self
            .dialogs
            .get(&call_id.to_string())
            .ok_or_else(|| DialogError::NotFound(call_id.to_string()))?;

        let mut guard = dialog.lock();
        match guard.state {
            DialogState::WaitingAck => {
                guard.transition(DialogState::Confirmed);
                Ok(())
            }
            DialogState::Confirmed => Ok(()),
            other => Err(DialogError::InvalidState {
                entity: "dialog".to_string(),
                from: other.to_string(),
                to: "confirmed".to_string(),
            }),
        }
    }

    /// `handle_incoming_bye`: respond 200 and terminate(remote-bye); a
    /// missing dialog gets a fire-and-forget 481 and is not an error.
    pub async fn handle_incoming_bye(self: &Arc<Self>, request: &Request, source: SocketAddr) -> DialogResult<()> {
        let call_id = request
            .call_id()
            .ok_or_else(|| DialogError::Malformed("missing Call-ID".to_string()))?
            .to_string();

        let Some(dialog) = self.dialogs.get(&call_id) else {
            let response = build_response(request, StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST, None);
            self.send_response_best_effort(&response, source).await;
            return Ok(());
        };

        let response = build_response(request, StatusCode::OK, None);
        self.send_response_best_effort(&response, source).await;
        dialog.lock().cancel_token.cancel();
        self.terminate(&call_id, TerminateReason::RemoteBye).await
    }

    /// `handle_incoming_cancel`: precondition `Early|WaitingAck`; 200 to the
    /// CANCEL, 487 to the original INVITE, terminate(cancel). Any other
    /// observed state yields a fire-and-forget 481 to the CANCEL.
    pub async fn handle_incoming_cancel(self: &Arc<Self>, request: &Request, source: SocketAddr) -> DialogResult<()> {
        let call_id = request
            .call_id()
            .ok_or_else(|| DialogError::Malformed("missing Call-ID".to_string()))?
            .to_string();

        let Some(dialog) = self.dialogs.get(&call_id) else {
            let response = build_response(request, StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST, None);
            self.send_response_best_effort(&response, source).await;
            return Ok(());
        };

        let (state, invite, invite_source) = {
            let guard = dialog.lock();
            (guard.state, guard.invite.clone(), guard.invite_source)
        };

        if !matches!(state, DialogState::Early | DialogState::WaitingAck) {
            let response = build_response(request, StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST, None);
            self.send_response_best_effort(&response, source).await;
            return Ok(());
        }

        let cancel_ok = build_response(request, StatusCode::OK, None);
        self.send_response_best_effort(&cancel_ok, source).await;

        let terminated_invite = build_response(&invite, StatusCode::REQUEST_TERMINATED, None);
        self.send_response_best_effort(&terminated_invite, invite_source).await;

        self.terminate(&call_id, TerminateReason::Cancel).await
    }

    /// `terminate`: if `Confirmed` and `reason=local-bye`, sends BYE first.
    /// A second call for an already-terminated dialog is a no-op.
    pub async fn terminate(self: &Arc<Self>, call_id: &str, reason: TerminateReason) -> DialogResult<()> {
        let Some(dialog) = self.dialogs.get(&call_id.to_string()) else {
            return Err(DialogError::NotFound(call_id.to_string()));
        };

        let already_terminal = dialog.lock().is_terminal();
        if already_terminal {
            return Ok(());
        }

        if reason == TerminateReason::LocalBye {
            let (confirmed, invite, local_tag, remote_tag, invite_source) = {
                let guard = dialog.lock();
                (
                    guard.state == DialogState::Confirmed,
                    guard.invite.clone(),
                    guard.local_tag.clone(),
                    guard.remote_tag.clone(),
                    guard.invite_source,
                )
            };
            if confirmed {
                if let Some(local_tag) = local_tag {
                    let bye = build_bye(&invite, &local_tag, remote_tag.as_deref(), 1);
                    if let Err(e) = self.transport.send_request(&bye, invite_source).await {
                        warn!(call_id, error = %e, "failed to send BYE, continuing termination");
                    }
                }
            }
        }

        let (callback, terminated) = {
            let mut guard = dialog.lock();
            guard.terminate_reason = reason;
            guard.transition(DialogState::Terminated);
            guard.cancel_token.cancel();
            let callback = guard.on_terminate.clone();
            let terminated = DialogTerminated {
                call_id: call_id.to_string(),
                reason,
                session_id: guard.session_id.clone(),
            };
            (callback, terminated)
        };

        self.dialogs
            .set(call_id.to_string(), dialog, self.config.terminated_ttl);

        info!(call_id, reason = %reason, "dialog terminated");

        if let Some(callback) = callback {
            callback(terminated);
        }

        Ok(())
    }

    async fn send_response_best_effort(&self, response: &switchboard_sip::Response, destination: SocketAddr) {
        if let Err(e) = self.transport.send_response(response, destination).await {
            warn!(status = response.status.0, error = %e, "best-effort response send failed");
        }
    }
}
