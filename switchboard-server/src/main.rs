mod admin;
mod config;
mod context;
mod error;
mod ingress;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use switchboard_b2bua::{BridgeRegistry, LegRegistry, ResponseRouter};
use switchboard_dialog::{DialogManager, DialogManagerConfig};
use switchboard_location::LocationStore;
use switchboard_media::{MediaNodeId, MediaPool, MediaPoolConfig, TcpMediaNodeClient};
use switchboard_sip::Method;
use switchboard_transport::{IncomingMessage, Transport, UdpTransport};

use config::{Cli, ServerConfig};
use context::ServerContext;
use error::{ServerError, ServerResult};

#[tokio::main]
async fn main() -> ServerResult<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(sip_port = config.sip_port, admin_port = config.admin_port, "starting switchboard");

    let advertise_ip = config.resolve_advertise_addr()?;
    let sip_bind_addr = SocketAddr::new(config.bind_addr, config.sip_port);
    let admin_bind_addr = SocketAddr::new(config.bind_addr, config.admin_port);
    let advertise_addr = SocketAddr::new(advertise_ip, config.sip_port);

    let (transport, mut incoming) = UdpTransport::bind(sip_bind_addr).await?;
    let transport: Arc<dyn Transport> = transport;
    info!(local_addr = %transport.local_addr()?, "SIP transport bound");

    let media_pool = connect_media_pool(&config).await?;
    media_pool.start_health_checker();

    let location_store = Arc::new(LocationStore::new(config.min_expires));
    location_store.start_sweeper(Duration::from_secs(60));

    let dialog_manager = DialogManager::new(transport.clone(), DialogManagerConfig::default());
    dialog_manager.start_sweeper(Duration::from_secs(30));

    let dialplan = load_dialplan(&config)?;

    let ctx = ServerContext {
        transport: transport.clone(),
        dialog_manager,
        location_store,
        media_pool,
        legs: Arc::new(LegRegistry::new()),
        bridges: Arc::new(BridgeRegistry::new()),
        response_router: Arc::new(ResponseRouter::new()),
        dialplan,
        advertise_addr,
        min_expires: config.min_expires,
    };

    let admin_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = admin::serve(admin_ctx, admin_bind_addr).await {
            error!(error = %e, "admin HTTP server exited");
        }
    });
    info!(addr = %admin_bind_addr, "admin HTTP surface listening");

    let mut shutdown = shutdown_signal();
    loop {
        tokio::select! {
            message = incoming.recv() => {
                let Some(message) = message else {
                    warn!("transport receive channel closed, stopping");
                    break;
                };
                let ctx = ctx.clone();
                tokio::spawn(async move { dispatch(&ctx, message).await });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, draining in-flight dialogs");
                break;
            }
        }
    }

    drain_active_dialogs(&ctx).await;
    transport.close().await?;
    Ok(())
}

async fn dispatch(ctx: &ServerContext, message: IncomingMessage) {
    match message {
        IncomingMessage::Request { request, source } => match request.method {
            Method::Register => {
                let response = ingress::handle_register(ctx, request, source).await;
                if let Err(e) = ctx.transport.send_response(&response, source).await {
                    warn!(error = %e, "failed to send REGISTER response");
                }
            }
            Method::Invite => ingress::handle_invite(ctx, request, source).await,
            Method::Ack => ingress::handle_ack(ctx, request).await,
            Method::Bye => ingress::handle_bye(ctx, request, source).await,
            Method::Cancel => ingress::handle_cancel(ctx, request, source).await,
            other => {
                warn!(method = %other, "unsupported method, not handled");
            }
        },
        IncomingMessage::Response { response, source } => {
            ingress::handle_response(ctx, response, source).await;
        }
    }
}

async fn connect_media_pool(config: &ServerConfig) -> ServerResult<Arc<MediaPool>> {
    let connect_timeout = Duration::from_secs(config.media_connect_timeout_secs);
    let mut members = Vec::with_capacity(config.media_nodes.len());

    for node_addr in &config.media_nodes {
        let addr: SocketAddr = node_addr
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid media_nodes entry {}: {}", node_addr, e)))?;
        let client = tokio::time::timeout(connect_timeout, TcpMediaNodeClient::connect(node_addr.clone(), addr))
            .await
            .map_err(|_| ServerError::Config(format!("timed out connecting to media node {}", node_addr)))??;
        members.push((MediaNodeId(node_addr.clone()), client as Arc<dyn switchboard_media::MediaNodeClient>));
    }

    Ok(MediaPool::new(members, MediaPoolConfig::default()).await?)
}

fn load_dialplan(config: &ServerConfig) -> ServerResult<switchboard_dialplan::SharedDialplanEngine> {
    let registry = switchboard_dialplan::ActionRegistry::with_builtins();
    let engine = match &config.dialplan_path {
        Some(path) => switchboard_dialplan::DialplanEngine::from_path(path, registry)?,
        None => {
            warn!("no dialplan_path configured, starting with zero routes");
            switchboard_dialplan::DialplanEngine::new(Vec::new(), registry)
        }
    };
    Ok(Arc::new(engine))
}

/// Resolves when either Ctrl-C or, on Unix, SIGTERM arrives.
fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.ok();
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    })
}

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Gives in-flight dialogs a grace period to terminate naturally (BYE,
/// CANCEL, ACK timeout), then force-terminates whatever is still active with
/// a local BYE so media sessions and bridges are released before exit.
async fn drain_active_dialogs(ctx: &ServerContext) {
    if ctx.dialog_manager.count() == 0 {
        return;
    }
    info!(count = ctx.dialog_manager.count(), grace_secs = SHUTDOWN_GRACE.as_secs(), "waiting for dialogs to end naturally");

    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while ctx.dialog_manager.count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let dialogs = ctx.dialog_manager.list();
    if dialogs.is_empty() {
        return;
    }
    info!(count = dialogs.len(), "grace period elapsed, force-terminating remaining dialogs");
    for dialog in dialogs {
        let call_id = dialog.lock().call_id.clone();
        if let Err(e) = ctx
            .dialog_manager
            .terminate(&call_id, switchboard_dialog::TerminateReason::LocalBye)
            .await
        {
            warn!(call_id, error = %e, "failed to terminate dialog during shutdown");
        }
    }
}
