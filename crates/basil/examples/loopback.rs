//! Loopback demo
//!
//! Runs a tiny space service and a viewer in one process over TCP:
//! - the viewer opens a session
//! - creates an item carrying Instance and Assembly abilities
//! - probes the service with an alive check
//!
//! Run with `RUST_LOG=debug cargo run --example loopback` to see the traffic.

use anyhow::Result;
use basil::proto::abilities::{AbAssembly, AbInstance, AbItem, AbOpenSession};
use basil::{
    handler_fn, AbilityList, AliveCheckHandler, BasilConnection, BasilError, BasilListener,
    ConnectionBuilder, ConnectionConfig, Message, Op, OpDispatcher,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

fn space_service() -> OpDispatcher {
    let next_item = Arc::new(AtomicU64::new(1));
    OpDispatcher::new()
        .with_handler(
            Op::OpenSessionReq,
            handler_fn(|request: Message, _| async move {
                let session = AbOpenSession::new().with_server_version("loopback-1");
                Ok::<_, BasilError>(Some(request.make_response().with_props(session.properties())))
            }),
        )
        .with_handler(
            Op::CreateItemReq,
            handler_fn(move |request: Message, _| {
                let id = format!("item-{}", next_item.fetch_add(1, Ordering::Relaxed));
                async move {
                    info!(%id, abilities = ?request.i_props.get_strings("abilities"), "Creating item");
                    let reply = request
                        .make_response()
                        .with_props(AbItem::new().with_id(id).properties());
                    Ok::<_, BasilError>(Some(reply))
                }
            }),
        )
        .with_handler(Op::AliveCheckReq, AliveCheckHandler::new())
}

async fn run_viewer(viewer: BasilConnection) -> Result<()> {
    let session = viewer.open_session(AbOpenSession::new().with_client_auth("viewer").properties()).await?;
    info!(server_version = ?AbOpenSession::get_server_version(&session.i_props), "Session open");

    let item = AbilityList::new()
        .with(
            AbAssembly::new()
                .with_asset_url("https://example.org/models/duck.glb")
                .with_asset_loader("gltf"),
        )
        .with(AbInstance::new().with_pos([0.0, 1.5, -3.0]).with_rot([0.0, 0.0, 0.0, 1.0]));
    let created = viewer.create_item(item.properties()).await?;
    info!(id = ?AbItem::get_id(&created.i_props), "Item created");

    let alive = viewer.alive_check().await?;
    info!(props = ?alive.i_props, "Alive check answered");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let listener = BasilListener::bind("127.0.0.1:0", ConnectionConfig::default())
        .await?
        .with_processor(Arc::new(space_service()));
    let addr = listener.local_addr()?;
    info!(%addr, "Space service listening");

    let service = tokio::spawn(async move { listener.accept().await });
    let viewer = ConnectionBuilder::new(addr.to_string()).connect().await?;
    let service = service.await??;

    run_viewer(viewer.clone()).await?;

    viewer.close();
    service.close();
    Ok(())
}
