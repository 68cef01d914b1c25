//! The scheduler state machine.
//!
//! Everything the kernel mutates lives in one [`SchedulerState`] behind
//! one lock: the four process queues, the EXEC slot, the resource
//! counters, the device registry, and the pause flag. Methods here are
//! synchronous and never perform I/O; operations that need the network
//! (freeing memory, driving a device) are returned as [`SideEffect`]s for
//! the caller to run after releasing the lock.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use simnix_shared::config::{KernelConfig, SchedulingPolicy};
use simnix_shared::pcb::{DeviceOp, EvictionReason, Pcb, Pid, ProcessState, ResourceOp, SyscallRequest};
use simnix_shared::wire::{DeviceKind, RegisterDeviceRequest};
use tracing::{info, warn};

/// Deferred I/O produced by a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Tell the memory manager to drop the process image and frames.
    FreeMemory { pid: Pid },
    /// Drive one request against a registered device.
    DeviceRequest {
        pid: Pid,
        address: String,
        op: DeviceOp,
    },
}

/// Result of an external termination request.
#[derive(Debug, PartialEq)]
pub enum KillOutcome {
    /// The process was queued somewhere and is now terminated.
    Removed(Vec<SideEffect>),
    /// The process is executing; the kill is recorded and will be honored
    /// at the next instruction boundary.
    Deferred,
    NotFound,
}

/// Per-resource counter plus the FIFO of blocked waiters.
struct ResourceState {
    available: u32,
    waiters: VecDeque<Pid>,
}

struct DeviceEntry {
    kind: DeviceKind,
    address: String,
}

pub struct SchedulerState {
    policy: SchedulingPolicy,
    quantum: u32,
    multiprogramming: usize,
    next_pid: Pid,
    paused: bool,
    /// NEW processes awaiting admission, oldest first.
    new_queue: VecDeque<Pcb>,
    ready: VecDeque<Pcb>,
    /// VRR only: syscall returners with quantum left, served first.
    priority_ready: VecDeque<Pcb>,
    blocked: Vec<Pcb>,
    /// Snapshot of the PCB currently at the CPU; custody is the CPU's.
    running: Option<Pcb>,
    /// Terminated PCBs, retained for state queries.
    terminated: Vec<Pcb>,
    resources: BTreeMap<String, ResourceState>,
    devices: HashMap<String, DeviceEntry>,
    /// Kills requested while the target was executing.
    pending_kill: HashSet<Pid>,
}

impl SchedulerState {
    pub fn new(cfg: &KernelConfig) -> Self {
        let resources = cfg
            .resources
            .iter()
            .cloned()
            .zip(cfg.resource_instances.iter().copied())
            .map(|(name, available)| {
                (
                    name,
                    ResourceState {
                        available,
                        waiters: VecDeque::new(),
                    },
                )
            })
            .collect();
        SchedulerState {
            policy: cfg.policy,
            quantum: cfg.quantum,
            multiprogramming: cfg.multiprogramming,
            next_pid: 0,
            paused: false,
            new_queue: VecDeque::new(),
            ready: VecDeque::new(),
            priority_ready: VecDeque::new(),
            blocked: Vec::new(),
            running: None,
            terminated: Vec::new(),
            resources,
            devices: HashMap::new(),
            pending_kill: HashSet::new(),
        }
    }

    pub fn alloc_pid(&mut self) -> Pid {
        self.next_pid += 1;
        self.next_pid
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn enqueue_new(&mut self, pcb: Pcb) {
        info!(pid = pcb.pid, "process created in NEW");
        self.new_queue.push_back(pcb);
    }

    fn admitted_count(&self) -> usize {
        self.ready.len() + self.priority_ready.len() + usize::from(self.running.is_some())
    }

    /// Long-term scheduling: admit the oldest NEW processes while the
    /// multiprogramming degree allows.
    pub fn admit(&mut self) {
        while !self.new_queue.is_empty() && self.admitted_count() < self.multiprogramming {
            let mut pcb = self.new_queue.pop_front().expect("checked nonempty");
            pcb.state = ProcessState::Ready;
            info!(pid = pcb.pid, "process admitted to READY");
            self.ready.push_back(pcb);
        }
    }

    /// Short-term scheduling: pick the next PCB to run and mark the EXEC
    /// slot busy. Returns `None` while paused, while the CPU is busy, or
    /// when nothing is ready.
    pub fn take_next(&mut self) -> Option<Pcb> {
        if self.paused || self.running.is_some() {
            return None;
        }
        let mut pcb = self
            .priority_ready
            .pop_front()
            .or_else(|| self.ready.pop_front())?;
        pcb.state = ProcessState::Exec;
        pcb.eviction_reason = EvictionReason::None;
        pcb.quantum_remaining = match self.policy {
            SchedulingPolicy::Fifo => u32::MAX,
            SchedulingPolicy::RoundRobin => self.quantum,
            // VRR: syscall returners keep their remainder; anything
            // coming off the plain ready queue was already topped up.
            SchedulingPolicy::VirtualRoundRobin => pcb.quantum_remaining.max(1),
        };
        self.running = Some(pcb.clone());
        Some(pcb)
    }

    /// Route a PCB handed back by the CPU. This is the only entry point
    /// that clears the EXEC slot.
    pub fn on_cpu_return(&mut self, mut pcb: Pcb) -> Vec<SideEffect> {
        self.running = None;

        if self.pending_kill.remove(&pcb.pid) {
            pcb.eviction_reason = EvictionReason::Fault("terminated by request".to_string());
            return self.finalize(pcb);
        }

        match pcb.eviction_reason.clone() {
            EvictionReason::Exit => self.finalize(pcb),
            EvictionReason::Fault(detail) => {
                warn!(pid = pcb.pid, %detail, "process faulted");
                self.finalize(pcb)
            }
            EvictionReason::Quantum => {
                pcb.state = ProcessState::Ready;
                pcb.quantum_remaining = self.quantum;
                info!(pid = pcb.pid, "quantum expired, back to READY");
                self.ready.push_back(pcb);
                Vec::new()
            }
            EvictionReason::Syscall(SyscallRequest::Resource { name, op }) => match op {
                ResourceOp::Wait => self.wait_resource(pcb, name),
                ResourceOp::Signal => self.signal_resource(pcb, name),
            },
            EvictionReason::Syscall(SyscallRequest::Device { name, op }) => {
                self.device_request(pcb, name, op)
            }
            EvictionReason::None => {
                warn!(pid = pcb.pid, "cpu returned pcb without an eviction reason");
                pcb.state = ProcessState::Ready;
                self.ready.push_back(pcb);
                Vec::new()
            }
        }
    }

    fn wait_resource(&mut self, mut pcb: Pcb, name: String) -> Vec<SideEffect> {
        let Some(resource) = self.resources.get_mut(&name) else {
            pcb.eviction_reason = EvictionReason::Fault(format!("unknown resource {name}"));
            return self.finalize(pcb);
        };
        if resource.available > 0 {
            resource.available -= 1;
            *pcb.held_resources.entry(name).or_insert(0) += 1;
            self.requeue_after_syscall(pcb);
        } else {
            info!(pid = pcb.pid, resource = %name, "blocked waiting for resource");
            resource.waiters.push_back(pcb.pid);
            pcb.requested_resource = Some(name);
            pcb.state = ProcessState::Blocked;
            self.blocked.push(pcb);
        }
        Vec::new()
    }

    fn signal_resource(&mut self, mut pcb: Pcb, name: String) -> Vec<SideEffect> {
        if !self.resources.contains_key(&name) {
            pcb.eviction_reason = EvictionReason::Fault(format!("unknown resource {name}"));
            return self.finalize(pcb);
        }
        match pcb.held_resources.get_mut(&name) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    pcb.held_resources.remove(&name);
                }
                self.release_one(&name);
            }
            // Signaling a resource the process never acquired releases
            // nothing; the held/available accounting stays bounded.
            None => warn!(pid = pcb.pid, resource = %name, "signal without a held instance"),
        }
        self.requeue_after_syscall(pcb);
        Vec::new()
    }

    /// Hand one freed instance of `name` to the oldest waiter, or return
    /// it to the free pool.
    fn release_one(&mut self, name: &str) {
        let resource = self.resources.get_mut(name).expect("resource exists");
        match resource.waiters.pop_front() {
            Some(waiter) => {
                let index = self
                    .blocked
                    .iter()
                    .position(|p| p.pid == waiter)
                    .expect("waiter is in the blocked set");
                let mut woken = self.blocked.swap_remove(index);
                *woken.held_resources.entry(name.to_string()).or_insert(0) += 1;
                woken.requested_resource = None;
                info!(pid = woken.pid, resource = name, "resource granted, unblocked");
                self.requeue_after_syscall(woken);
            }
            None => resource.available += 1,
        }
    }

    fn device_request(&mut self, mut pcb: Pcb, name: String, op: DeviceOp) -> Vec<SideEffect> {
        match self.devices.get(&name) {
            Some(device) if device.kind.serves(&op) => {
                let pid = pcb.pid;
                let address = device.address.clone();
                pcb.state = ProcessState::Blocked;
                info!(pid, device = %name, "blocked on device");
                self.blocked.push(pcb);
                vec![SideEffect::DeviceRequest { pid, address, op }]
            }
            Some(_) => {
                pcb.eviction_reason =
                    EvictionReason::Fault(format!("device {name} cannot serve this operation"));
                self.finalize(pcb)
            }
            None => {
                pcb.eviction_reason = EvictionReason::Fault(format!("unknown device {name}"));
                self.finalize(pcb)
            }
        }
    }

    /// Re-enter the ready queues after a granted syscall or a completed
    /// device operation.
    fn requeue_after_syscall(&mut self, mut pcb: Pcb) {
        pcb.state = ProcessState::Ready;
        match self.policy {
            SchedulingPolicy::VirtualRoundRobin if pcb.quantum_remaining > 0 => {
                self.priority_ready.push_back(pcb);
            }
            _ => {
                pcb.quantum_remaining = self.quantum;
                self.ready.push_back(pcb);
            }
        }
    }

    /// A device finished its operation for `pid`. Returns `false` when the
    /// process no longer exists (terminated while blocked) and the
    /// completion must be discarded.
    pub fn complete_io(&mut self, pid: Pid) -> bool {
        match self.blocked.iter().position(|p| p.pid == pid) {
            Some(index) => {
                let pcb = self.blocked.swap_remove(index);
                info!(pid, "device operation complete, unblocked");
                self.requeue_after_syscall(pcb);
                true
            }
            None => false,
        }
    }

    /// A device round trip failed; the blocked process faults.
    pub fn device_failed(&mut self, pid: Pid, detail: String) -> Vec<SideEffect> {
        match self.blocked.iter().position(|p| p.pid == pid) {
            Some(index) => {
                let mut pcb = self.blocked.swap_remove(index);
                pcb.eviction_reason = EvictionReason::Fault(detail);
                self.finalize(pcb)
            }
            None => Vec::new(),
        }
    }

    /// External termination. Finds the process wherever it lives.
    pub fn request_kill(&mut self, pid: Pid) -> KillOutcome {
        if self.running.as_ref().is_some_and(|p| p.pid == pid) {
            self.pending_kill.insert(pid);
            return KillOutcome::Deferred;
        }
        if let Some(index) = self.new_queue.iter().position(|p| p.pid == pid) {
            let pcb = self.new_queue.remove(index).expect("index just found");
            return KillOutcome::Removed(self.finalize(pcb));
        }
        if let Some(index) = self.ready.iter().position(|p| p.pid == pid) {
            let pcb = self.ready.remove(index).expect("index just found");
            return KillOutcome::Removed(self.finalize(pcb));
        }
        if let Some(index) = self.priority_ready.iter().position(|p| p.pid == pid) {
            let pcb = self.priority_ready.remove(index).expect("index just found");
            return KillOutcome::Removed(self.finalize(pcb));
        }
        if let Some(index) = self.blocked.iter().position(|p| p.pid == pid) {
            let pcb = self.blocked.swap_remove(index);
            // Drop it from any waiter list before releasing what it held.
            for resource in self.resources.values_mut() {
                resource.waiters.retain(|w| *w != pid);
            }
            return KillOutcome::Removed(self.finalize(pcb));
        }
        KillOutcome::NotFound
    }

    /// Move a PCB to the terminated set, releasing everything it held.
    fn finalize(&mut self, mut pcb: Pcb) -> Vec<SideEffect> {
        let held = std::mem::take(&mut pcb.held_resources);
        for (name, count) in held {
            for _ in 0..count {
                self.release_one(&name);
            }
        }
        pcb.requested_resource = None;
        pcb.state = ProcessState::Exit;
        info!(pid = pcb.pid, reason = ?pcb.eviction_reason, "process terminated");
        let pid = pcb.pid;
        self.terminated.push(pcb);
        vec![SideEffect::FreeMemory { pid }]
    }

    /// The dispatch round trip failed; put the snapshot back at the head
    /// of the ready queue so nothing is lost.
    pub fn recover_running(&mut self) {
        if let Some(mut pcb) = self.running.take() {
            warn!(pid = pcb.pid, "recovering pcb after failed dispatch");
            pcb.state = ProcessState::Ready;
            self.ready.push_front(pcb);
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
        info!("scheduling paused");
    }

    /// Returns true when the call actually resumed a paused scheduler.
    pub fn resume(&mut self) -> bool {
        let was_paused = self.paused;
        self.paused = false;
        if was_paused {
            info!("scheduling resumed");
        }
        was_paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn register_device(&mut self, req: RegisterDeviceRequest) {
        info!(name = %req.name, kind = ?req.kind, address = %req.address, "device registered");
        self.devices.insert(
            req.name,
            DeviceEntry {
                kind: req.kind,
                address: req.address,
            },
        );
    }

    pub fn process_state(&self, pid: Pid) -> Option<ProcessState> {
        self.list().into_iter().find(|(p, _)| *p == pid).map(|(_, s)| s)
    }

    /// Consistent snapshot of every process and its state, sorted by pid.
    pub fn list(&self) -> Vec<(Pid, ProcessState)> {
        let mut all: Vec<(Pid, ProcessState)> = self
            .new_queue
            .iter()
            .chain(self.ready.iter())
            .chain(self.priority_ready.iter())
            .chain(self.blocked.iter())
            .chain(self.running.iter())
            .chain(self.terminated.iter())
            .map(|p| (p.pid, p.state))
            .collect();
        all.sort_by_key(|(pid, _)| *pid);
        all
    }

    /// Total free instances of a resource (for tests and diagnostics).
    pub fn available(&self, name: &str) -> Option<u32> {
        self.resources.get(name).map(|r| r.available)
    }
}
