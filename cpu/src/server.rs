//! HTTP surface of the CPU: dispatch and interrupt delivery.

use std::sync::Arc;

use serde::Serialize;
use simnix_shared::config::CpuConfig;
use simnix_shared::pcb::Pcb;
use simnix_shared::rpc;
use simnix_shared::wire::{ApiResponse, InterruptRequest};
use tracing::info;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::bus::HttpMemory;
use crate::engine::{self, InterruptLine};

struct Context {
    memory: HttpMemory,
    page_size: u32,
    interrupts: InterruptLine,
    /// Serializes dispatches: only one PCB occupies the engine at a time.
    exec_slot: tokio::sync::Mutex<()>,
}

fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

async fn handle_dispatch(pcb: Pcb, ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    let _slot = ctx.exec_slot.lock().await;
    info!(pid = pcb.pid, pc = pcb.pc, quantum = pcb.quantum_remaining, "pcb dispatched");
    let done = engine::run_slice(pcb, &ctx.memory, ctx.page_size, &ctx.interrupts).await;
    Ok(json_reply(StatusCode::OK, &done))
}

async fn handle_interrupt(
    request: InterruptRequest,
    ctx: Arc<Context>,
) -> Result<impl Reply, Rejection> {
    info!(pid = request.pid, kind = ?request.kind, "interrupt received");
    ctx.interrupts.raise(request);
    Ok(json_reply(StatusCode::ACCEPTED, &ApiResponse::ok("interrupt latched")))
}

pub async fn run(cfg: CpuConfig) -> anyhow::Result<()> {
    let memory = HttpMemory::new(rpc::client(), cfg.memory.base_url());
    // The MMU needs the frame size to split spans; memory owns that
    // number, so ask once at startup.
    let page_size = memory
        .page_size()
        .await
        .map_err(|e| anyhow::anyhow!("querying page size from memory at {}: {e}", cfg.memory))?;
    info!(page_size, "cpu online");

    let ctx = Arc::new(Context {
        memory,
        page_size,
        interrupts: InterruptLine::default(),
        exec_slot: tokio::sync::Mutex::new(()),
    });
    let with_ctx = warp::any().map(move || ctx.clone());

    let dispatch = warp::path("dispatch")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx.clone())
        .and_then(handle_dispatch);

    let interrupt = warp::path("interrupt")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx)
        .and_then(handle_interrupt);

    let routes = dispatch.or(interrupt);

    warp::serve(routes).run(([0, 0, 0, 0], cfg.port)).await;
    Ok(())
}
