use thiserror::Error;

/// Broad error categories, used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The user typed something wrong; show a hint and let them retry.
    Input,
    /// The remote authority could not be reached or answered garbage.
    Network,
    /// Entitlement is gone; the user must re-activate.
    Fatal,
    /// Local persistence failed.
    Storage,
}

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("invalid activation code format: {0}")]
    Format(String),
    #[error("invalid day count '{0}': trial length must be between 1 and 365 days")]
    InvalidDayCount(String),
    #[error("activation code was issued for a different machine (this machine's code is {expected})")]
    MachineMismatch { expected: String },
    #[error("unable to determine machine identity: {0}")]
    MachineIdentity(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("activation rejected: {0}")]
    Rejected(String),
    #[error("license has been deactivated: {0}")]
    Revoked(String),
    #[error("system clock manipulation detected")]
    Tamper,
    #[error("a trial has already been used on this machine")]
    TrialAlreadyUsed,
    #[error("a full license is already active on this machine")]
    AlreadyLicensed,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format(_)
            | Self::InvalidDayCount(_)
            | Self::MachineMismatch { .. }
            | Self::TrialAlreadyUsed
            | Self::AlreadyLicensed
            | Self::Rejected(_) => ErrorKind::Input,
            Self::Network(_) => ErrorKind::Network,
            Self::Revoked(_) | Self::Tamper | Self::MachineIdentity(_) => ErrorKind::Fatal,
            Self::Storage(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// True when the error ends the current entitlement.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

pub type LicenseResult<T> = Result<T, LicenseError>;
