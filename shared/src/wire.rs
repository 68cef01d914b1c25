//! Request and response payloads for every wire operation.

use serde::{Deserialize, Serialize};

use crate::pcb::{DeviceOp, PhysChunk, Pid, ProcessState};

/// Generic acknowledgement reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        ApiResponse {
            success: true,
            message: message.into(),
        }
    }
}

// ---- kernel -> memory ----

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadInstructionsRequest {
    pub pid: Pid,
    /// Path of the pseudocode file, relative to the memory manager's
    /// configured instructions directory.
    pub path: String,
}

// ---- cpu -> memory ----

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchQuery {
    pub pid: Pid,
    pub pc: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstructionReply {
    pub instruction: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub pid: Pid,
    /// New process size in bytes, not pages.
    pub size: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateQuery {
    pub pid: Pid,
    pub address: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateReply {
    pub physical_address: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadRequest {
    pub address: u32,
    pub size: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadReply {
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WriteRequest {
    pub address: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PageSizeReply {
    pub page_size: u32,
}

// ---- kernel external surface ----

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateProcessRequest {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateProcessReply {
    pub pid: Pid,
}

/// Also used as the element of the process-list reply.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessStateReply {
    pub pid: Pid,
    pub state: ProcessState,
}

// ---- kernel -> cpu ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptKind {
    /// Terminate the process at the next instruction boundary.
    Kill,
    /// Force a quantum-style eviction at the next instruction boundary.
    Preempt,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InterruptRequest {
    /// Interrupts are ignored unless this matches the executing pid.
    pub pid: Pid,
    pub kind: InterruptKind,
}

// ---- devices ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceKind {
    GenSleep,
    Stdin,
    Stdout,
}

/// Sent by a device to the kernel at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    pub name: String,
    pub kind: DeviceKind,
    /// `host:port` the kernel dials for requests to this device.
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IoSleepRequest {
    pub pid: Pid,
    pub units: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IoStdinRequest {
    pub pid: Pid,
    pub span: Vec<PhysChunk>,
    pub size: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IoStdoutRequest {
    pub pid: Pid,
    pub span: Vec<PhysChunk>,
}

impl DeviceKind {
    /// Whether this device kind can serve the given operation.
    pub fn serves(self, op: &DeviceOp) -> bool {
        matches!(
            (self, op),
            (DeviceKind::GenSleep, DeviceOp::Sleep { .. })
                | (DeviceKind::Stdin, DeviceOp::StdinRead { .. })
                | (DeviceKind::Stdout, DeviceOp::StdoutWrite { .. })
        )
    }
}
