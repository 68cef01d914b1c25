//! The instruction cycle.
//!
//! One call to [`run_slice`] owns the PCB for the whole slice: fetch the
//! line at `pc`, decode, execute, repeat. The loop only stops at
//! instruction boundaries — quantum expiry, a blocking syscall, EXIT, a
//! fault, or a latched external interrupt — and always hands back a
//! well-formed PCB. No failure in here may leave the kernel's dispatch
//! call unanswered.

use std::sync::Mutex;

use simnix_shared::error::SimError;
use simnix_shared::pcb::{
    DeviceOp, EvictionReason, Pcb, Pid, ResourceOp, SyscallRequest, Width,
};
use simnix_shared::wire::{InterruptKind, InterruptRequest};
use tracing::{debug, info};

use crate::bus::MemoryBus;
use crate::isa::{self, Instruction};
use crate::mmu;

/// Latch for externally requested interrupts. Raised by the kernel over
/// the wire, consumed by the engine strictly at instruction boundaries.
#[derive(Default)]
pub struct InterruptLine {
    pending: Mutex<Option<InterruptRequest>>,
}

impl InterruptLine {
    pub fn raise(&self, request: InterruptRequest) {
        *self.pending.lock().unwrap() = Some(request);
    }

    /// Take the pending interrupt if it targets `pid`. An interrupt for
    /// any other pid is stale (the process already left the CPU) and is
    /// dropped.
    pub fn take_for(&self, pid: Pid) -> Option<InterruptKind> {
        let mut pending = self.pending.lock().unwrap();
        match pending.take() {
            Some(request) if request.pid == pid => Some(request.kind),
            _ => None,
        }
    }
}

/// What executing one instruction did.
enum Step {
    /// Fall through to the next instruction.
    Next,
    /// The instruction set `pc` itself.
    Jump,
    /// EXIT was decoded.
    Exit,
    /// Blocking syscall; `pc` already points past the instruction.
    Syscall(SyscallRequest),
    /// The process faulted.
    Fault(String),
}

/// Run one execution slice. Returns the PCB with `eviction_reason` set.
pub async fn run_slice<B: MemoryBus>(
    mut pcb: Pcb,
    bus: &B,
    page_size: u32,
    interrupts: &InterruptLine,
) -> Pcb {
    pcb.eviction_reason = EvictionReason::None;

    loop {
        if let Some(kind) = interrupts.take_for(pcb.pid) {
            info!(pid = pcb.pid, ?kind, "interrupt at instruction boundary");
            pcb.eviction_reason = match kind {
                InterruptKind::Kill => EvictionReason::Exit,
                InterruptKind::Preempt => EvictionReason::Quantum,
            };
            break;
        }

        let line = match bus.fetch_instruction(pcb.pid, pcb.pc).await {
            Ok(line) => line,
            Err(SimError::OutOfBounds) => {
                pcb.eviction_reason = EvictionReason::Fault(format!(
                    "program counter {} outside the loaded image",
                    pcb.pc
                ));
                break;
            }
            Err(SimError::NotFound) => {
                pcb.eviction_reason =
                    EvictionReason::Fault(format!("no image loaded for pid {}", pcb.pid));
                break;
            }
            Err(e) => {
                pcb.eviction_reason = EvictionReason::Fault(format!("instruction fetch: {e}"));
                break;
            }
        };
        debug!(pid = pcb.pid, pc = pcb.pc, instruction = %line, "fetch");

        let instruction = match isa::decode(&line) {
            Ok(instruction) => instruction,
            Err(detail) => {
                pcb.eviction_reason = EvictionReason::Fault(detail);
                break;
            }
        };

        match execute(&mut pcb, instruction, bus, page_size).await {
            Step::Next => pcb.pc += 1,
            Step::Jump => {}
            Step::Exit => {
                pcb.eviction_reason = EvictionReason::Exit;
                break;
            }
            Step::Syscall(request) => {
                pcb.pc += 1;
                pcb.eviction_reason = EvictionReason::Syscall(request);
                break;
            }
            Step::Fault(detail) => {
                pcb.eviction_reason = EvictionReason::Fault(detail);
                break;
            }
        }

        // Quantum accounting happens once per executed instruction, only
        // at the boundary we just crossed.
        pcb.quantum_remaining = pcb.quantum_remaining.saturating_sub(1);
        if pcb.quantum_remaining == 0 {
            pcb.eviction_reason = EvictionReason::Quantum;
            break;
        }
    }

    info!(pid = pcb.pid, reason = ?pcb.eviction_reason, "slice finished");
    pcb
}

async fn execute<B: MemoryBus>(
    pcb: &mut Pcb,
    instruction: Instruction,
    bus: &B,
    page_size: u32,
) -> Step {
    match instruction {
        Instruction::Set { reg, value } => {
            pcb.registers.store(reg, value);
            Step::Next
        }
        Instruction::Sum { dst, src } => {
            // Performed at the wider of the two widths; `load` widens to
            // 32 bits and `store` truncates back to dst's width.
            let value = pcb.registers.load(dst).wrapping_add(pcb.registers.load(src));
            pcb.registers.store(dst, value);
            Step::Next
        }
        Instruction::Sub { dst, src } => {
            let value = pcb
                .registers
                .load(dst)
                .saturating_sub(pcb.registers.load(src));
            pcb.registers.store(dst, value);
            Step::Next
        }
        Instruction::Jnz { reg, target } => {
            if pcb.registers.load(reg) != 0 {
                pcb.pc = target;
                Step::Jump
            } else {
                Step::Next
            }
        }
        Instruction::Resize { size } => match bus.resize(pcb.pid, size).await {
            Ok(()) => Step::Next,
            Err(SimError::OutOfMemory) => Step::Fault("out of memory".to_string()),
            Err(e) => Step::Fault(format!("resize: {e}")),
        },
        Instruction::MovIn { reg, address } => {
            let width = reg.width();
            let chunks =
                match mmu::resolve_span(bus, page_size, pcb.pid, address, width.bytes()).await {
                    Ok(chunks) => chunks,
                    Err(e) => return fault_at(address, e),
                };
            let mut bytes = Vec::with_capacity(width.bytes() as usize);
            for chunk in chunks {
                match bus.read(chunk.address, chunk.len).await {
                    Ok(piece) => bytes.extend(piece),
                    Err(e) => return fault_at(address, e),
                }
            }
            let value = match width {
                Width::Byte => bytes[0] as u32,
                Width::Word => u32::from_le_bytes(bytes.try_into().expect("span length is 4")),
            };
            pcb.registers.store(reg, value);
            Step::Next
        }
        Instruction::MovOut { address, reg } => {
            let width = reg.width();
            let value = pcb.registers.load(reg);
            let bytes = &value.to_le_bytes()[..width.bytes() as usize];
            let chunks =
                match mmu::resolve_span(bus, page_size, pcb.pid, address, width.bytes()).await {
                    Ok(chunks) => chunks,
                    Err(e) => return fault_at(address, e),
                };
            let mut offset = 0usize;
            for chunk in chunks {
                let piece = bytes[offset..offset + chunk.len as usize].to_vec();
                offset += chunk.len as usize;
                if let Err(e) = bus.write(chunk.address, piece).await {
                    return fault_at(address, e);
                }
            }
            Step::Next
        }
        Instruction::Wait { resource } => Step::Syscall(SyscallRequest::Resource {
            name: resource,
            op: ResourceOp::Wait,
        }),
        Instruction::Signal { resource } => Step::Syscall(SyscallRequest::Resource {
            name: resource,
            op: ResourceOp::Signal,
        }),
        Instruction::IoGenSleep { device, units } => Step::Syscall(SyscallRequest::Device {
            name: device,
            op: DeviceOp::Sleep { units },
        }),
        Instruction::IoStdinRead { device, addr, size } => {
            let address = pcb.registers.load(addr);
            let size = pcb.registers.load(size);
            match mmu::resolve_span(bus, page_size, pcb.pid, address, size).await {
                Ok(span) => Step::Syscall(SyscallRequest::Device {
                    name: device,
                    op: DeviceOp::StdinRead { span, size },
                }),
                Err(e) => fault_at(address, e),
            }
        }
        Instruction::IoStdoutWrite { device, addr, size } => {
            let address = pcb.registers.load(addr);
            let size = pcb.registers.load(size);
            match mmu::resolve_span(bus, page_size, pcb.pid, address, size).await {
                Ok(span) => Step::Syscall(SyscallRequest::Device {
                    name: device,
                    op: DeviceOp::StdoutWrite { span },
                }),
                Err(e) => fault_at(address, e),
            }
        }
        Instruction::Exit => Step::Exit,
    }
}

fn fault_at(address: u32, err: SimError) -> Step {
    Step::Fault(format!("memory access at {address}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use simnix_shared::pcb::ProcessState;

    use super::*;

    const PAGE: u32 = 16;

    /// In-process stand-in for the memory service: a fixed program, one
    /// identity-mapped page table, and a small RAM.
    struct FakeMemory {
        program: Vec<&'static str>,
        pages: u32,
        ram: Mutex<HashMap<u32, u8>>,
        resize_result: Result<(), SimError>,
    }

    impl FakeMemory {
        fn with_program(program: Vec<&'static str>) -> Self {
            FakeMemory {
                program,
                pages: 2,
                ram: Mutex::new(HashMap::new()),
                resize_result: Ok(()),
            }
        }
    }

    impl MemoryBus for FakeMemory {
        async fn fetch_instruction(&self, _pid: Pid, pc: u32) -> Result<String, SimError> {
            self.program
                .get(pc as usize)
                .map(|l| l.to_string())
                .ok_or(SimError::OutOfBounds)
        }

        async fn translate(&self, _pid: Pid, logical: u32) -> Result<u32, SimError> {
            if logical / PAGE < self.pages {
                Ok(logical)
            } else {
                Err(SimError::SegmentationFault)
            }
        }

        async fn read(&self, address: u32, len: u32) -> Result<Vec<u8>, SimError> {
            let ram = self.ram.lock().unwrap();
            Ok((address..address + len)
                .map(|a| ram.get(&a).copied().unwrap_or(0))
                .collect())
        }

        async fn write(&self, address: u32, data: Vec<u8>) -> Result<(), SimError> {
            let mut ram = self.ram.lock().unwrap();
            for (i, byte) in data.into_iter().enumerate() {
                ram.insert(address + i as u32, byte);
            }
            Ok(())
        }

        async fn resize(&self, _pid: Pid, _size: u32) -> Result<(), SimError> {
            self.resize_result.clone()
        }
    }

    fn pcb(quantum: u32) -> Pcb {
        let mut pcb = Pcb::new(1, quantum);
        pcb.state = ProcessState::Exec;
        pcb
    }

    async fn run(program: Vec<&'static str>, quantum: u32) -> Pcb {
        let bus = FakeMemory::with_program(program);
        run_slice(pcb(quantum), &bus, PAGE, &InterruptLine::default()).await
    }

    #[tokio::test]
    async fn set_sum_exit_scenario() {
        let done = run(vec!["SET AX 5", "SUM AX AX", "EXIT"], 5).await;
        assert_eq!(done.registers.ax, 10);
        assert_eq!(done.eviction_reason, EvictionReason::Exit);
        assert_eq!(done.pc, 2);
    }

    #[tokio::test]
    async fn quantum_law() {
        // Infinite loop: at most `quantum` instructions run.
        let done = run(vec!["SET BX 1", "JNZ BX 0"], 4).await;
        assert_eq!(done.eviction_reason, EvictionReason::Quantum);
        assert_eq!(done.quantum_remaining, 0);
    }

    #[tokio::test]
    async fn sub_saturates_at_zero() {
        let done = run(vec!["SET AX 3", "SET BX 7", "SUB AX BX", "EXIT"], 10).await;
        assert_eq!(done.registers.ax, 0);
        assert_eq!(done.eviction_reason, EvictionReason::Exit);
    }

    #[tokio::test]
    async fn mixed_width_sum_truncates_into_narrow_destination() {
        // EAX = 300; AX += EAX happens at 32 bits and truncates to 8.
        let done = run(vec!["SET EAX 300", "SET AX 10", "SUM AX EAX", "EXIT"], 10).await;
        assert_eq!(done.registers.ax, (300u32 + 10) as u8);
        assert_eq!(done.registers.eax, 300);
    }

    #[tokio::test]
    async fn jnz_falls_through_on_zero() {
        let done = run(vec!["JNZ AX 0", "EXIT"], 5).await;
        assert_eq!(done.eviction_reason, EvictionReason::Exit);
        assert_eq!(done.pc, 1);
    }

    #[tokio::test]
    async fn mov_round_trip_through_translation() {
        let done = run(
            vec!["SET EAX 305419896", "MOV_OUT 14 EAX", "MOV_IN EBX 14", "EXIT"],
            10,
        )
        .await;
        // 0x12345678 written little-endian across the page boundary at 16.
        assert_eq!(done.registers.ebx, 0x1234_5678);
        assert_eq!(done.eviction_reason, EvictionReason::Exit);
    }

    #[tokio::test]
    async fn segfault_is_a_process_fault() {
        let done = run(vec!["MOV_IN EAX 100", "EXIT"], 5).await;
        match done.eviction_reason {
            EvictionReason::Fault(detail) => assert!(detail.contains("segmentation fault")),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_opcode_faults_without_crashing() {
        let done = run(vec!["FROBNICATE 1 2"], 5).await;
        assert!(matches!(done.eviction_reason, EvictionReason::Fault(_)));
    }

    #[tokio::test]
    async fn pc_past_end_faults() {
        let done = run(vec!["SET AX 1"], 5).await;
        match done.eviction_reason {
            EvictionReason::Fault(detail) => assert!(detail.contains("program counter")),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocking_syscall_advances_pc_before_evicting() {
        let done = run(vec!["IO_GEN_SLEEP tape 3", "EXIT"], 5).await;
        assert_eq!(done.pc, 1);
        assert_eq!(
            done.eviction_reason,
            EvictionReason::Syscall(SyscallRequest::Device {
                name: "tape".to_string(),
                op: DeviceOp::Sleep { units: 3 },
            })
        );
    }

    #[tokio::test]
    async fn wait_evicts_with_resource_request() {
        let done = run(vec!["WAIT disk"], 5).await;
        assert_eq!(
            done.eviction_reason,
            EvictionReason::Syscall(SyscallRequest::Resource {
                name: "disk".to_string(),
                op: ResourceOp::Wait,
            })
        );
    }

    #[tokio::test]
    async fn failed_resize_faults_the_process() {
        let mut bus = FakeMemory::with_program(vec!["RESIZE 64"]);
        bus.resize_result = Err(SimError::OutOfMemory);
        let done = run_slice(pcb(5), &bus, PAGE, &InterruptLine::default()).await;
        match done.eviction_reason {
            EvictionReason::Fault(detail) => assert!(detail.contains("out of memory")),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn kill_interrupt_honored_at_boundary() {
        let bus = FakeMemory::with_program(vec!["SET BX 1", "JNZ BX 0"]);
        let interrupts = InterruptLine::default();
        interrupts.raise(InterruptRequest {
            pid: 1,
            kind: InterruptKind::Kill,
        });
        let done = run_slice(pcb(100), &bus, PAGE, &interrupts).await;
        assert_eq!(done.eviction_reason, EvictionReason::Exit);
    }

    #[tokio::test]
    async fn stale_interrupt_for_other_pid_is_dropped() {
        let bus = FakeMemory::with_program(vec!["EXIT"]);
        let interrupts = InterruptLine::default();
        interrupts.raise(InterruptRequest {
            pid: 42,
            kind: InterruptKind::Kill,
        });
        let done = run_slice(pcb(5), &bus, PAGE, &interrupts).await;
        assert_eq!(done.eviction_reason, EvictionReason::Exit);
        assert_eq!(done.pc, 0);
        assert!(interrupts.take_for(42).is_none());
    }

    #[tokio::test]
    async fn stdin_read_resolves_span_before_eviction() {
        let done = run(
            vec!["SET SI 14", "SET DI 4", "IO_STDIN_READ teclado SI DI"],
            10,
        )
        .await;
        match done.eviction_reason {
            EvictionReason::Syscall(SyscallRequest::Device {
                op: DeviceOp::StdinRead { span, size },
                ..
            }) => {
                assert_eq!(size, 4);
                let spans: Vec<(u32, u32)> = span.iter().map(|c| (c.address, c.len)).collect();
                assert_eq!(spans, vec![(14, 2), (16, 2)]);
            }
            other => panic!("expected stdin syscall, got {other:?}"),
        }
    }

    #[test]
    fn interrupt_latch_replaces_previous() {
        let interrupts = InterruptLine::default();
        interrupts.raise(InterruptRequest {
            pid: 1,
            kind: InterruptKind::Preempt,
        });
        interrupts.raise(InterruptRequest {
            pid: 1,
            kind: InterruptKind::Kill,
        });
        assert_eq!(interrupts.take_for(1), Some(InterruptKind::Kill));
        assert_eq!(interrupts.take_for(1), None);
    }
}
