use std::net::SocketAddr;
use std::sync::Arc;

use switchboard_b2bua::{BridgeRegistry, LegRegistry, ResponseRouter};
use switchboard_dialog::DialogManager;
use switchboard_dialplan::SharedDialplanEngine;
use switchboard_location::LocationStore;
use switchboard_media::MediaPool;
use switchboard_transport::Transport;

/// Every shared handle an ingress handler needs, bundled so handlers take
/// one argument instead of seven. Cloning is cheap: every field is an `Arc`.
#[derive(Clone)]
pub struct ServerContext {
    pub transport: Arc<dyn Transport>,
    pub dialog_manager: Arc<DialogManager>,
    pub location_store: Arc<LocationStore>,
    pub media_pool: Arc<MediaPool>,
    pub legs: Arc<LegRegistry>,
    pub bridges: Arc<BridgeRegistry>,
    pub response_router: Arc<ResponseRouter>,
    pub dialplan: SharedDialplanEngine,
    pub advertise_addr: SocketAddr,
    pub min_expires: u32,
}
