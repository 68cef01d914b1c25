//! Process control block and register file.
//!
//! The PCB is the unit of custody in the system: the kernel owns it while
//! the process is queued, the CPU owns it while the process executes, and
//! the whole struct travels over the wire on every dispatch. No service
//! ever mutates a PCB it does not currently hold.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Process identifier. Assigned monotonically by the kernel, starting at 1.
pub type Pid = u32;

/// Declared width of a CPU register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// 8-bit register (AX, BX, CX, DX).
    Byte,
    /// 32-bit register (EAX..EDX, SI, DI).
    Word,
}

impl Width {
    pub fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Word => 4,
        }
    }

    /// Largest value the width can hold.
    pub fn mask(self) -> u32 {
        match self {
            Width::Byte => u8::MAX as u32,
            Width::Word => u32::MAX,
        }
    }
}

/// Names of the registers a process program can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Register {
    Ax,
    Bx,
    Cx,
    Dx,
    Eax,
    Ebx,
    Ecx,
    Edx,
    Si,
    Di,
}

impl Register {
    /// Declared width. Writes through [`Registers::store`] truncate to it.
    pub fn width(self) -> Width {
        match self {
            Register::Ax | Register::Bx | Register::Cx | Register::Dx => Width::Byte,
            _ => Width::Word,
        }
    }

    /// Parse an operand token (`"AX"`, `"EDX"`, ...).
    pub fn from_name(name: &str) -> Option<Register> {
        Some(match name {
            "AX" => Register::Ax,
            "BX" => Register::Bx,
            "CX" => Register::Cx,
            "DX" => Register::Dx,
            "EAX" => Register::Eax,
            "EBX" => Register::Ebx,
            "ECX" => Register::Ecx,
            "EDX" => Register::Edx,
            "SI" => Register::Si,
            "DI" => Register::Di,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Ax => "AX",
            Register::Bx => "BX",
            Register::Cx => "CX",
            Register::Dx => "DX",
            Register::Eax => "EAX",
            Register::Ebx => "EBX",
            Register::Ecx => "ECX",
            Register::Edx => "EDX",
            Register::Si => "SI",
            Register::Di => "DI",
        }
    }
}

/// Fixed-layout register file. Narrow registers are real `u8` fields, so a
/// PCB arriving over the wire with an out-of-range value is rejected during
/// deserialization instead of being silently coerced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct Registers {
    pub ax: u8,
    pub bx: u8,
    pub cx: u8,
    pub dx: u8,
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub si: u32,
    pub di: u32,
}

impl Registers {
    /// Read a register, zero-extended to 32 bits.
    pub fn load(&self, reg: Register) -> u32 {
        match reg {
            Register::Ax => self.ax as u32,
            Register::Bx => self.bx as u32,
            Register::Cx => self.cx as u32,
            Register::Dx => self.dx as u32,
            Register::Eax => self.eax,
            Register::Ebx => self.ebx,
            Register::Ecx => self.ecx,
            Register::Edx => self.edx,
            Register::Si => self.si,
            Register::Di => self.di,
        }
    }

    /// Write a register, truncating the value to the register's declared
    /// width. This is the only write path into the register file.
    pub fn store(&mut self, reg: Register, value: u32) {
        match reg {
            Register::Ax => self.ax = value as u8,
            Register::Bx => self.bx = value as u8,
            Register::Cx => self.cx = value as u8,
            Register::Dx => self.dx = value as u8,
            Register::Eax => self.eax = value,
            Register::Ebx => self.ebx = value,
            Register::Ecx => self.ecx = value,
            Register::Edx => self.edx = value,
            Register::Si => self.si = value,
            Register::Di => self.di = value,
        }
    }
}

/// Lifecycle state of a process. Queue membership in the kernel must always
/// match this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    New,
    Ready,
    Exec,
    Blocked,
    Exit,
}

/// A contiguous run of physical memory, produced by the MMU when it
/// resolves a logical span. A single logical access can map to several
/// chunks when it straddles page boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysChunk {
    pub address: u32,
    pub len: u32,
}

/// What a blocking device operation asks the device to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceOp {
    /// Burn `units` work units of wall-clock time.
    Sleep { units: u32 },
    /// Read `size` bytes from the device's stdin into the resolved span.
    StdinRead { span: Vec<PhysChunk>, size: u32 },
    /// Print the bytes behind the resolved span.
    StdoutWrite { span: Vec<PhysChunk> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceOp {
    Wait,
    Signal,
}

/// Payload of a syscall eviction: what the process is asking the kernel
/// for. Resource operations never leave the kernel; device operations are
/// forwarded to the registered device collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyscallRequest {
    Resource { name: String, op: ResourceOp },
    Device { name: String, op: DeviceOp },
}

/// Why the CPU stopped executing a process. Set by the CPU before the PCB
/// is returned; routed on by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvictionReason {
    /// Not evicted yet (freshly created, or sitting in a queue).
    None,
    /// Quantum reached zero at an instruction boundary.
    Quantum,
    /// The program executed EXIT.
    Exit,
    /// A blocking syscall; the payload names the resource or device.
    #[serde(rename = "BLOCKING_SYSCALL")]
    Syscall(SyscallRequest),
    /// Decode or execution fault; the string is the diagnostic detail.
    #[serde(rename = "INVALID_INSTRUCTION")]
    Fault(String),
}

/// Process control block: the full scheduling and execution state of one
/// process, serialized whole on every custody transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pcb {
    pub pid: Pid,
    /// Index into the process's instruction list.
    pub pc: u32,
    /// Instructions left before mandatory preemption.
    pub quantum_remaining: u32,
    pub registers: Registers,
    pub state: ProcessState,
    pub eviction_reason: EvictionReason,
    /// Resource name -> instances currently held.
    pub held_resources: BTreeMap<String, u32>,
    /// Resource this process is blocked waiting for, if any.
    pub requested_resource: Option<String>,
}

impl Pcb {
    /// Fresh PCB in state NEW with a zeroed register file.
    pub fn new(pid: Pid, quantum: u32) -> Self {
        Pcb {
            pid,
            pc: 0,
            quantum_remaining: quantum,
            registers: Registers::default(),
            state: ProcessState::New,
            eviction_reason: EvictionReason::None,
            held_resources: BTreeMap::new(),
            requested_resource: None,
        }
    }
}
