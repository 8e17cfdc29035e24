use std::fmt;

/// Failure kinds surfaced by the RHI. Fallible calls return these and log a
/// human-readable message at the emission site; callers treat everything but
/// `DeviceRemoved` as recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhiError {
    /// Malformed descriptor, out-of-range slot, mismatched layout/set.
    InvalidArgument,
    /// Descriptor heap growth failure or upload memory limit exceeded.
    OutOfResources,
    /// Unsupported transition or command issued in the wrong recording state.
    StatePolicyViolation,
    /// The backend reported a failure.
    NativeFailure,
    /// The device was lost; subsequent submits are refused.
    DeviceRemoved,
    /// API misuse, e.g. a volatile constant buffer read before its first
    /// write in the current recording.
    UsageBug,
}

impl fmt::Display for RhiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RhiError::InvalidArgument => "invalid argument",
            RhiError::OutOfResources => "out of resources",
            RhiError::StatePolicyViolation => "state policy violation",
            RhiError::NativeFailure => "native failure",
            RhiError::DeviceRemoved => "device removed",
            RhiError::UsageBug => "usage bug",
        };
        f.write_str(text)
    }
}

impl std::error::Error for RhiError {}

pub type RhiResult<T> = Result<T, RhiError>;
