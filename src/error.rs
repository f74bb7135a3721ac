// Error types for the hotplug-passthru tool
//
// Every failure the sequencer can hit ends up here; main maps all of them
// to exit status 1.

use thiserror::Error;

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while talking to the management endpoint or running a plan
#[derive(Debug, Error)]
pub enum Error {
    /// Transport level failure (connect, TLS, timeout, body read)
    #[error("HTTP error")]
    Http(#[from] reqwest::Error),

    /// A response body did not match the expected shape
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// The endpoint answered with a fault object
    #[error("{method} failed with HTTP {status}: {fault}: {message}")]
    Fault {
        method: String,
        status: u16,
        fault: String,
        message: String,
    },

    /// Login succeeded but the session header was missing
    #[error("login response carried no vmware-api-session-id header")]
    MissingSession,

    #[error("failed to get VM with name {0}")]
    VmNotFound(String),

    /// Address not advertised by the host as passthrough capable
    #[error("can not get device with PCI address {0}")]
    DeviceNotOnHost(String),

    /// Address not attached to the VM as a passthrough device
    #[error("no passthrough device with PCI address {address} on VM {vm}")]
    DeviceNotAttached { address: String, vm: String },

    /// A reconfigure task finished in the error state
    #[error("task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("invalid PCI address '{0}', expected DDDD:BB:SS.F")]
    InvalidPciAddress(String),
}

impl Error {
    /// Process exit status reported for this error
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// The error followed by every underlying cause, joined with ": "
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            report.push_str(": ");
            report.push_str(&cause.to_string());
            source = cause.source();
        }
        report
    }
}
