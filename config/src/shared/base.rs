use thiserror::Error;

/// Errors produced when validating configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The bounded channel must be able to hold at least one message.
    #[error("channel capacity must be greater than zero")]
    ZeroChannelCapacity,

    /// The grace period must be non-zero, otherwise adapters are force-killed
    /// without any chance to exit voluntarily.
    #[error("adapter grace period must be greater than zero")]
    ZeroGracePeriod,

    /// An attempt duration bound of zero would cancel every attempt on start.
    #[error("max attempt duration must be greater than zero when set")]
    ZeroMaxAttemptDuration,
}
