use crate::platform::TagCheckFault;
use thiserror::Error;

/// Process exit code for any failed precondition.
pub const EXIT_FAILURE: u8 = 1;

/// Errors that abort an experiment before or during setup.
///
/// None of these are recoverable: without tagging hardware in synchronous mode the timing
/// samples carry no meaning, so there is no degraded mode.
#[derive(Debug, Error)]
pub enum Error {
    /// The CPU or kernel lacks memory tagging support.
    #[error("memory tagging is not supported on this system")]
    CapabilityUnavailable,
    /// Enabling synchronous tag checking failed.
    #[error("failed to enable synchronous tag checking: {0}")]
    ConfigurationFailure(#[source] std::io::Error),
    /// The memory subsystem refused the tagged mapping.
    #[error("failed to allocate tagged region of {size} bytes: {source}")]
    AllocationFailure {
        /// Requested size in bytes
        size: usize,
        /// Error reported by the allocator
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The probe configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A setup access was rejected by a platform reporting tag faults in-process.
    #[error(transparent)]
    TagCheck(#[from] TagCheckFault),
}

impl Error {
    /// Exit code the binary reports for this error.
    pub fn exit_code(&self) -> u8 {
        EXIT_FAILURE
    }
}

/// Result type for tiktag operations.
pub type Result<T> = std::result::Result<T, Error>;
