//! External HTTP surface of the kernel.

use std::sync::Arc;

use serde::Serialize;
use simnix_shared::config::KernelConfig;
use simnix_shared::error::{ErrorBody, SimError};
use simnix_shared::pcb::Pid;
use simnix_shared::wire::{
    ApiResponse, CreateProcessReply, CreateProcessRequest, ProcessStateReply,
    RegisterDeviceRequest,
};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::scheduler::Kernel;

fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(err: &SimError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_reply(status, &ErrorBody::from_error(err))
}

async fn handle_create(
    req: CreateProcessRequest,
    kernel: Arc<Kernel>,
) -> Result<impl Reply, Rejection> {
    match kernel.create_process(&req.path).await {
        Ok(pid) => Ok(json_reply(StatusCode::OK, &CreateProcessReply { pid })),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_delete(pid: Pid, kernel: Arc<Kernel>) -> Result<impl Reply, Rejection> {
    match kernel.terminate(pid).await {
        Ok(()) => Ok(json_reply(
            StatusCode::OK,
            &ApiResponse::ok(format!("process {pid} terminated")),
        )),
        Err(e) => Ok(error_reply(&e)),
    }
}

async fn handle_get_state(pid: Pid, kernel: Arc<Kernel>) -> Result<impl Reply, Rejection> {
    let state = kernel.state.lock().unwrap().process_state(pid);
    match state {
        Some(state) => Ok(json_reply(StatusCode::OK, &ProcessStateReply { pid, state })),
        None => Ok(error_reply(&SimError::NotFound)),
    }
}

async fn handle_list(kernel: Arc<Kernel>) -> Result<impl Reply, Rejection> {
    let list: Vec<ProcessStateReply> = kernel
        .state
        .lock()
        .unwrap()
        .list()
        .into_iter()
        .map(|(pid, state)| ProcessStateReply { pid, state })
        .collect();
    Ok(json_reply(StatusCode::OK, &list))
}

async fn handle_pause(kernel: Arc<Kernel>) -> Result<impl Reply, Rejection> {
    kernel.state.lock().unwrap().pause();
    Ok(json_reply(StatusCode::OK, &ApiResponse::ok("scheduling paused")))
}

async fn handle_resume(kernel: Arc<Kernel>) -> Result<impl Reply, Rejection> {
    if kernel.state.lock().unwrap().resume() {
        kernel.wakeup.notify_one();
    }
    Ok(json_reply(StatusCode::OK, &ApiResponse::ok("scheduling resumed")))
}

async fn handle_register_device(
    req: RegisterDeviceRequest,
    kernel: Arc<Kernel>,
) -> Result<impl Reply, Rejection> {
    kernel.state.lock().unwrap().register_device(req);
    Ok(json_reply(StatusCode::OK, &ApiResponse::ok("device registered")))
}

pub async fn run(cfg: KernelConfig, kernel: Arc<Kernel>) -> anyhow::Result<()> {
    let with_kernel = {
        let kernel = kernel.clone();
        warp::any().map(move || kernel.clone())
    };

    let create = warp::path("process")
        .and(warp::path::end())
        .and(warp::put())
        .and(warp::body::json())
        .and(with_kernel.clone())
        .and_then(handle_create);

    let delete = warp::path!("process" / Pid)
        .and(warp::delete())
        .and(with_kernel.clone())
        .and_then(handle_delete);

    let get_state = warp::path!("process" / Pid)
        .and(warp::get())
        .and(with_kernel.clone())
        .and_then(handle_get_state);

    let list = warp::path("process")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_kernel.clone())
        .and_then(handle_list);

    let pause = warp::path!("plan" / "pause")
        .and(warp::post())
        .and(with_kernel.clone())
        .and_then(handle_pause);

    let resume = warp::path!("plan" / "resume")
        .and(warp::post())
        .and(with_kernel.clone())
        .and_then(handle_resume);

    let register = warp::path!("io" / "register")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_kernel)
        .and_then(handle_register_device);

    let routes = create
        .or(delete)
        .or(get_state)
        .or(list)
        .or(pause)
        .or(resume)
        .or(register);

    warp::serve(routes).run(([0, 0, 0, 0], cfg.port)).await;
    Ok(())
}
