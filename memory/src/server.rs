//! HTTP surface of the memory manager.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use simnix_shared::config::MemoryConfig;
use simnix_shared::error::{ErrorBody, SimError};
use simnix_shared::pcb::Pid;
use simnix_shared::wire::{
    ApiResponse, FetchQuery, InstructionReply, LoadInstructionsRequest, PageSizeReply, ReadReply,
    ReadRequest, ResizeRequest, TranslateQuery, TranslateReply, WriteRequest,
};
use tokio::time::sleep;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::store::MemoryStore;

struct Context {
    store: Mutex<MemoryStore>,
    instructions_path: PathBuf,
    delay: Duration,
}

impl Context {
    /// Simulated access latency, applied before every reply.
    async fn access_delay(&self) {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
    }
}

fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(err: &SimError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_reply(status, &ErrorBody::from_error(err))
}

async fn handle_load(
    req: LoadInstructionsRequest,
    ctx: Arc<Context>,
) -> Result<impl Reply, Rejection> {
    ctx.access_delay().await;
    let path = ctx.instructions_path.join(&req.path);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) => {
            warn!(pid = req.pid, path = %path.display(), error = %e, "instruction load failed");
            return Ok(error_reply(&SimError::LoadFailure));
        }
    };
    let count = ctx.store.lock().unwrap().load(req.pid, &text);
    info!(pid = req.pid, instructions = count, "process image loaded");
    Ok(json_reply(
        StatusCode::OK,
        &ApiResponse::ok(format!("{count} instructions loaded")),
    ))
}

async fn handle_fetch(query: FetchQuery, ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    ctx.access_delay().await;
    let store = ctx.store.lock().unwrap();
    match store.instruction(query.pid, query.pc) {
        Ok(line) => Ok(json_reply(
            StatusCode::OK,
            &InstructionReply {
                instruction: line.to_string(),
            },
        )),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_resize(req: ResizeRequest, ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    ctx.access_delay().await;
    let result = ctx.store.lock().unwrap().resize(req.pid, req.size);
    match result {
        Ok(()) => {
            info!(pid = req.pid, size = req.size, "process resized");
            Ok(json_reply(StatusCode::OK, &ApiResponse::ok("resized")))
        }
        Err(e) => {
            warn!(pid = req.pid, size = req.size, error = %e, "resize rejected");
            Ok(error_reply(&e))
        }
    }
}

async fn handle_translate(
    query: TranslateQuery,
    ctx: Arc<Context>,
) -> Result<impl Reply, Rejection> {
    ctx.access_delay().await;
    let result = ctx.store.lock().unwrap().translate(query.pid, query.address);
    match result {
        Ok(physical_address) => Ok(json_reply(
            StatusCode::OK,
            &TranslateReply { physical_address },
        )),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_read(req: ReadRequest, ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    ctx.access_delay().await;
    let store = ctx.store.lock().unwrap();
    match store.read(req.address, req.size) {
        Ok(data) => Ok(json_reply(
            StatusCode::OK,
            &ReadReply {
                data: data.to_vec(),
            },
        )),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_write(req: WriteRequest, ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    ctx.access_delay().await;
    let result = ctx.store.lock().unwrap().write(req.address, &req.data);
    match result {
        Ok(()) => Ok(json_reply(StatusCode::OK, &ApiResponse::ok("written"))),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_page_size(ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    let page_size = ctx.store.lock().unwrap().page_size();
    Ok(json_reply(StatusCode::OK, &PageSizeReply { page_size }))
}

async fn handle_free(pid: Pid, ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    ctx.access_delay().await;
    let result = ctx.store.lock().unwrap().free(pid);
    match result {
        Ok(()) => {
            info!(pid, "process memory freed");
            Ok(json_reply(StatusCode::OK, &ApiResponse::ok("freed")))
        }
        Err(e) => Ok(error_reply(&e)),
    }
}

pub async fn run(cfg: MemoryConfig) -> anyhow::Result<()> {
    let frames = cfg.memory_size / cfg.page_size;
    info!(
        memory_size = cfg.memory_size,
        page_size = cfg.page_size,
        frames,
        "memory manager ready"
    );

    let ctx = Arc::new(Context {
        store: Mutex::new(MemoryStore::new(cfg.memory_size, cfg.page_size)),
        instructions_path: cfg.instructions_path.clone(),
        delay: Duration::from_millis(cfg.delay_ms),
    });
    let with_ctx = warp::any().map(move || ctx.clone());

    let load = warp::path("instructions")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx.clone())
        .and_then(handle_load);

    let fetch = warp::path("instructions")
        .and(warp::get())
        .and(warp::query())
        .and(with_ctx.clone())
        .and_then(handle_fetch);

    let resize = warp::path("resize")
        .and(warp::patch())
        .and(warp::body::json())
        .and(with_ctx.clone())
        .and_then(handle_resize);

    let translate = warp::path("translate")
        .and(warp::get())
        .and(warp::query())
        .and(with_ctx.clone())
        .and_then(handle_translate);

    let read = warp::path("read")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx.clone())
        .and_then(handle_read);

    let write = warp::path("write")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx.clone())
        .and_then(handle_write);

    let page_size = warp::path("page-size")
        .and(warp::get())
        .and(with_ctx.clone())
        .and_then(handle_page_size);

    let free = warp::path!("process" / Pid)
        .and(warp::delete())
        .and(with_ctx)
        .and_then(handle_free);

    let routes = load
        .or(fetch)
        .or(resize)
        .or(translate)
        .or(read)
        .or(write)
        .or(page_size)
        .or(free);

    warp::serve(routes).run(([0, 0, 0, 0], cfg.port)).await;
    Ok(())
}
