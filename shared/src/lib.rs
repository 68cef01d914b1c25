//! Shared contract between the simnix services.
//!
//! The kernel, CPU, and memory manager are independent processes that only
//! agree on what lives in this crate: the process control block and its
//! wire representation, the request/response payloads, the error taxonomy,
//! and the configuration shapes each service loads at startup.

pub mod config;
pub mod error;
pub mod pcb;
pub mod rpc;
pub mod wire;
