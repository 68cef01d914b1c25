//! The kernel's long-running side: process creation, termination, and the
//! admission/dispatch loop.
//!
//! The loop is one tokio task. It never holds the state lock across an
//! `.await`: it takes a PCB out under the lock, performs the blocking
//! dispatch round trip with the lock released, then re-locks to route the
//! result. Everything else the kernel does (creation, completions,
//! queries) interleaves freely with an in-flight dispatch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use simnix_shared::config::KernelConfig;
use simnix_shared::error::SimError;
use simnix_shared::pcb::{Pcb, Pid};
use simnix_shared::rpc::{self, HttpClient};
use simnix_shared::wire::{
    ApiResponse, InterruptKind, InterruptRequest, LoadInstructionsRequest,
};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::devices;
use crate::state::{KillOutcome, SchedulerState, SideEffect};

pub struct Kernel {
    pub state: Mutex<SchedulerState>,
    /// Woken on any event that could make new work dispatchable.
    pub wakeup: Notify,
    http: HttpClient,
    cpu_base: String,
    memory_base: String,
}

impl Kernel {
    pub fn new(cfg: &KernelConfig) -> Arc<Self> {
        Arc::new(Kernel {
            state: Mutex::new(SchedulerState::new(cfg)),
            wakeup: Notify::new(),
            http: rpc::client(),
            cpu_base: cfg.cpu.base_url(),
            memory_base: cfg.memory.base_url(),
        })
    }

    /// Create a process from a pseudocode file. The PCB is only queued
    /// once memory confirms the image loaded.
    pub async fn create_process(&self, path: &str) -> Result<Pid, SimError> {
        let (pid, quantum) = {
            let mut state = self.state.lock().unwrap();
            (state.alloc_pid(), state.quantum())
        };

        let _: ApiResponse = rpc::post_json(
            &self.http,
            &format!("{}/instructions", self.memory_base),
            &LoadInstructionsRequest {
                pid,
                path: path.to_string(),
            },
        )
        .await?;

        self.state.lock().unwrap().enqueue_new(Pcb::new(pid, quantum));
        self.wakeup.notify_one();
        Ok(pid)
    }

    /// Terminate a process wherever it currently lives.
    pub async fn terminate(self: &Arc<Self>, pid: Pid) -> Result<(), SimError> {
        let outcome = self.state.lock().unwrap().request_kill(pid);
        match outcome {
            KillOutcome::Removed(effects) => {
                self.run_effects(effects);
                self.wakeup.notify_one();
                Ok(())
            }
            KillOutcome::Deferred => {
                // Recorded; make the CPU stop at the next boundary. If the
                // interrupt cannot be delivered the kill still lands when
                // the slice ends on its own.
                let request = InterruptRequest {
                    pid,
                    kind: InterruptKind::Kill,
                };
                if let Err(e) = rpc::post_json::<_, ApiResponse>(
                    &self.http,
                    &format!("{}/interrupt", self.cpu_base),
                    &request,
                )
                .await
                {
                    warn!(pid, error = %e, "could not deliver kill interrupt");
                }
                Ok(())
            }
            KillOutcome::NotFound => Err(SimError::NotFound),
        }
    }

    /// Admission + dispatch loop. Runs for the life of the service.
    pub async fn run_scheduler(self: Arc<Self>) {
        loop {
            let job = {
                let mut state = self.state.lock().unwrap();
                if state.is_paused() {
                    None
                } else {
                    state.admit();
                    state.take_next()
                }
            };

            let Some(pcb) = job else {
                self.wakeup.notified().await;
                continue;
            };

            let pid = pcb.pid;
            info!(pid, "dispatching to cpu");
            match rpc::post_json::<Pcb, Pcb>(
                &self.http,
                &format!("{}/dispatch", self.cpu_base),
                &pcb,
            )
            .await
            {
                Ok(returned) => {
                    let effects = self.state.lock().unwrap().on_cpu_return(returned);
                    self.run_effects(effects);
                }
                Err(e) => {
                    error!(pid, error = %e, "dispatch round trip failed");
                    self.state.lock().unwrap().recover_running();
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    /// Run deferred I/O produced by a state transition. Each effect gets
    /// its own task so the caller never waits on the network.
    pub fn run_effects(self: &Arc<Self>, effects: Vec<SideEffect>) {
        for effect in effects {
            let kernel = self.clone();
            match effect {
                SideEffect::FreeMemory { pid } => {
                    tokio::spawn(async move {
                        let url = format!("{}/process/{pid}", kernel.memory_base);
                        if let Err(e) = rpc::delete_json::<ApiResponse>(&kernel.http, &url).await {
                            warn!(pid, error = %e, "freeing process memory failed");
                        }
                    });
                }
                SideEffect::DeviceRequest { pid, address, op } => {
                    tokio::spawn(async move {
                        match devices::perform(&kernel.http, &address, pid, op).await {
                            Ok(()) => {
                                if kernel.state.lock().unwrap().complete_io(pid) {
                                    kernel.wakeup.notify_one();
                                } else {
                                    info!(pid, "discarding completion for terminated process");
                                }
                            }
                            Err(e) => {
                                warn!(pid, error = %e, "device request failed");
                                let effects = kernel
                                    .state
                                    .lock()
                                    .unwrap()
                                    .device_failed(pid, format!("device request failed: {e}"));
                                kernel.run_effects(effects);
                                kernel.wakeup.notify_one();
                            }
                        }
                    });
                }
            }
        }
    }
}
