//! Round trips against registered device collaborators.
//!
//! A device's reply to the request *is* the completion signal: the kernel
//! spawns one of these per blocking device syscall and unblocks the
//! process when the call comes back.

use simnix_shared::error::SimError;
use simnix_shared::pcb::{DeviceOp, Pid};
use simnix_shared::rpc::{self, HttpClient};
use simnix_shared::wire::{ApiResponse, IoSleepRequest, IoStdinRequest, IoStdoutRequest};

/// Perform one device operation against the device at `address`
/// (`host:port`). Blocks until the device reports completion.
pub async fn perform(
    client: &HttpClient,
    address: &str,
    pid: Pid,
    op: DeviceOp,
) -> Result<(), SimError> {
    let base = format!("http://{address}");
    let _: ApiResponse = match op {
        DeviceOp::Sleep { units } => {
            rpc::post_json(client, &format!("{base}/io/sleep"), &IoSleepRequest { pid, units })
                .await?
        }
        DeviceOp::StdinRead { span, size } => {
            rpc::post_json(
                client,
                &format!("{base}/io/stdin"),
                &IoStdinRequest { pid, span, size },
            )
            .await?
        }
        DeviceOp::StdoutWrite { span } => {
            rpc::post_json(
                client,
                &format!("{base}/io/stdout"),
                &IoStdoutRequest { pid, span },
            )
            .await?
        }
    };
    Ok(())
}
