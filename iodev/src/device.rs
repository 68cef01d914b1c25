//! Device behavior: sleep, stdin reads, stdout writes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use simnix_shared::config::IoConfig;
use simnix_shared::error::{ErrorBody, SimError};
use simnix_shared::pcb::PhysChunk;
use simnix_shared::rpc::{self, HttpClient};
use simnix_shared::wire::{
    ApiResponse, IoSleepRequest, IoStdinRequest, IoStdoutRequest, ReadReply, ReadRequest,
    RegisterDeviceRequest, WriteRequest,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tracing::info;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

struct Context {
    cfg: IoConfig,
    http: HttpClient,
    /// One job at a time; concurrent requests queue on this lock.
    busy: tokio::sync::Mutex<()>,
}

fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(err: &SimError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_reply(status, &ErrorBody::from_error(err))
}

async fn handle_sleep(req: IoSleepRequest, ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    let _job = ctx.busy.lock().await;
    info!(pid = req.pid, units = req.units, "sleep operation started");
    sleep(Duration::from_millis(
        req.units as u64 * ctx.cfg.unit_work_ms,
    ))
    .await;
    info!(pid = req.pid, "sleep operation complete");
    Ok(json_reply(StatusCode::OK, &ApiResponse::ok("slept")))
}

async fn handle_stdin(req: IoStdinRequest, ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    let _job = ctx.busy.lock().await;
    info!(pid = req.pid, size = req.size, "waiting for console input");

    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    if let Err(e) = reader.read_line(&mut line).await {
        return Ok(error_reply(&SimError::Transport(format!(
            "reading stdin: {e}"
        ))));
    }

    // Exactly `size` bytes land in memory: truncated or zero-padded.
    let mut bytes = line.trim_end_matches('\n').as_bytes().to_vec();
    bytes.resize(req.size as usize, 0);

    if let Err(e) = write_span(&ctx, &req.span, &bytes).await {
        return Ok(error_reply(&e));
    }
    info!(pid = req.pid, "input stored");
    Ok(json_reply(StatusCode::OK, &ApiResponse::ok("input stored")))
}

async fn handle_stdout(req: IoStdoutRequest, ctx: Arc<Context>) -> Result<impl Reply, Rejection> {
    let _job = ctx.busy.lock().await;
    let bytes = match read_span(&ctx, &req.span).await {
        Ok(bytes) => bytes,
        Err(e) => return Ok(error_reply(&e)),
    };
    let text = String::from_utf8_lossy(&bytes);
    println!("{text}");
    info!(pid = req.pid, bytes = bytes.len(), "output written");
    Ok(json_reply(StatusCode::OK, &ApiResponse::ok("output written")))
}

async fn write_span(ctx: &Context, span: &[PhysChunk], bytes: &[u8]) -> Result<(), SimError> {
    let base = ctx.cfg.memory.base_url();
    let mut offset = 0usize;
    for chunk in span {
        let piece = bytes
            .get(offset..offset + chunk.len as usize)
            .ok_or_else(|| SimError::BadRequest("span is larger than the payload".to_string()))?
            .to_vec();
        offset += chunk.len as usize;
        let _: ApiResponse = rpc::post_json(
            &ctx.http,
            &format!("{base}/write"),
            &WriteRequest {
                address: chunk.address,
                data: piece,
            },
        )
        .await?;
    }
    Ok(())
}

async fn read_span(ctx: &Context, span: &[PhysChunk]) -> Result<Vec<u8>, SimError> {
    let base = ctx.cfg.memory.base_url();
    let mut bytes = Vec::new();
    for chunk in span {
        let reply: ReadReply = rpc::post_json(
            &ctx.http,
            &format!("{base}/read"),
            &ReadRequest {
                address: chunk.address,
                size: chunk.len,
            },
        )
        .await?;
        bytes.extend(reply.data);
    }
    Ok(bytes)
}

/// Announce this device to the kernel.
pub async fn register(cfg: &IoConfig, http: &HttpClient) -> Result<(), SimError> {
    let request = RegisterDeviceRequest {
        name: cfg.name.clone(),
        kind: cfg.kind,
        address: format!("{}:{}", cfg.host, cfg.port),
    };
    let _: ApiResponse = rpc::post_json(
        http,
        &format!("{}/io/register", cfg.kernel.base_url()),
        &request,
    )
    .await?;
    info!(name = %cfg.name, kind = ?cfg.kind, "registered with kernel");
    Ok(())
}

pub async fn run(cfg: IoConfig) -> anyhow::Result<()> {
    let http = rpc::client();
    register(&cfg, &http)
        .await
        .map_err(|e| anyhow::anyhow!("registering with kernel at {}: {e}", cfg.kernel))?;

    let port = cfg.port;
    let ctx = Arc::new(Context {
        cfg,
        http,
        busy: tokio::sync::Mutex::new(()),
    });
    let with_ctx = warp::any().map(move || ctx.clone());

    let sleep_route = warp::path!("io" / "sleep")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx.clone())
        .and_then(handle_sleep);

    let stdin_route = warp::path!("io" / "stdin")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx.clone())
        .and_then(handle_stdin);

    let stdout_route = warp::path!("io" / "stdout")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx)
        .and_then(handle_stdout);

    let routes = sleep_route.or(stdin_route).or(stdout_route);

    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
    Ok(())
}
