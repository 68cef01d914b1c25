//! I/O device collaborator.
//!
//! A thin shim with no scheduling logic: it registers itself with the
//! kernel at startup and serves one request at a time. Its reply to a
//! request is the completion signal the kernel is waiting on.

pub mod device;
