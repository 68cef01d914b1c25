//! Error taxonomy shared by every service.
//!
//! Domain errors cross the wire as an [`ErrorBody`] with a stable code
//! string; clients map the code back into a [`SimError`]. Anything that is
//! not a domain error (socket trouble, malformed JSON from a peer) is a
//! `Transport` error and never fatal to the receiving service.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Unknown pid, device, or resource. Reported to the caller, never
    /// fatal to a service.
    NotFound,
    /// No free frame while growing a page table. The operation fails with
    /// no partial effect.
    OutOfMemory,
    /// Logical address outside the process's page table. Fatal to the
    /// process, not to any service.
    SegmentationFault,
    /// Program counter or physical address outside the valid range.
    OutOfBounds,
    /// Instruction source missing or unreadable; process creation fails
    /// before any PCB is queued.
    LoadFailure,
    /// Malformed request rejected at the service boundary.
    BadRequest(String),
    /// Client-side plumbing failure talking to a peer service.
    Transport(String),
}

impl SimError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            SimError::NotFound => "NOT_FOUND",
            SimError::OutOfMemory => "OUT_OF_MEMORY",
            SimError::SegmentationFault => "SEGMENTATION_FAULT",
            SimError::OutOfBounds => "OUT_OF_BOUNDS",
            SimError::LoadFailure => "LOAD_FAILURE",
            SimError::BadRequest(_) => "BAD_REQUEST",
            SimError::Transport(_) => "TRANSPORT",
        }
    }

    /// HTTP status the service replies with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            SimError::NotFound | SimError::LoadFailure => 404,
            SimError::OutOfMemory => 507,
            SimError::SegmentationFault | SimError::OutOfBounds => 422,
            SimError::BadRequest(_) => 400,
            SimError::Transport(_) => 502,
        }
    }

    /// Rebuild a typed error from a wire code.
    pub fn from_code(code: &str, message: &str) -> SimError {
        match code {
            "NOT_FOUND" => SimError::NotFound,
            "OUT_OF_MEMORY" => SimError::OutOfMemory,
            "SEGMENTATION_FAULT" => SimError::SegmentationFault,
            "OUT_OF_BOUNDS" => SimError::OutOfBounds,
            "LOAD_FAILURE" => SimError::LoadFailure,
            "BAD_REQUEST" => SimError::BadRequest(message.to_string()),
            _ => SimError::Transport(format!("{code}: {message}")),
        }
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::NotFound => write!(f, "not found"),
            SimError::OutOfMemory => write!(f, "out of memory"),
            SimError::SegmentationFault => write!(f, "segmentation fault"),
            SimError::OutOfBounds => write!(f, "out of bounds"),
            SimError::LoadFailure => write!(f, "instruction source could not be loaded"),
            SimError::BadRequest(detail) => write!(f, "bad request: {detail}"),
            SimError::Transport(detail) => write!(f, "transport failure: {detail}"),
        }
    }
}

impl std::error::Error for SimError {}

/// JSON body every service uses for error replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn from_error(err: &SimError) -> Self {
        ErrorBody {
            error: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn into_error(self) -> SimError {
        SimError::from_code(&self.error, &self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for err in [
            SimError::NotFound,
            SimError::OutOfMemory,
            SimError::SegmentationFault,
            SimError::OutOfBounds,
            SimError::LoadFailure,
        ] {
            let body = ErrorBody::from_error(&err);
            assert_eq!(body.into_error(), err);
        }
    }
}
