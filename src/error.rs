use std::fmt;

#[derive(Debug)]
pub enum MirrorError {
    /// Bad command-line configuration (invalid monitor index, source ==
    /// target, non-positive SDR white level). Reported before any device
    /// initialization.
    InvalidConfig(String),

    /// Desktop duplication could not be established for the source
    /// monitor at all. Fatal.
    DuplicationUnavailable(String),

    /// The duplication interface was invalidated (mode change, secure
    /// desktop, GPU reset). Recoverable by rebuilding the interface.
    AccessLost,

    /// No desktop frame arrived within the per-iteration timeout.
    Timeout,

    /// The capture thread produced no frame within the startup window.
    FirstFrameTimeout,

    /// The desktop texture arrived in a format the mirror does not
    /// handle (neither an 8-bit sRGB container nor 16-bit linear float).
    UnsupportedFormat(String),

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorErrorClass {
    InvalidInput,
    Transient,
    Fatal,
}

impl MirrorError {
    pub fn class(&self) -> MirrorErrorClass {
        match self {
            Self::InvalidConfig(_) => MirrorErrorClass::InvalidInput,
            Self::AccessLost | Self::Timeout => MirrorErrorClass::Transient,
            Self::DuplicationUnavailable(_)
            | Self::FirstFrameTimeout
            | Self::UnsupportedFormat(_)
            | Self::Platform(_) => MirrorErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), MirrorErrorClass::Transient)
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(message) => write!(f, "invalid configuration: {message}"),
            Self::DuplicationUnavailable(message) => {
                write!(f, "desktop duplication unavailable: {message}")
            }
            Self::AccessLost => write!(f, "desktop duplication access lost"),
            Self::Timeout => write!(f, "no desktop frame arrived within the timeout"),
            Self::FirstFrameTimeout => write!(
                f,
                "no frame arrived from the source monitor within 5 seconds"
            ),
            Self::UnsupportedFormat(format) => {
                write!(f, "unsupported desktop texture format: {format}")
            }
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_lost_is_retryable() {
        assert!(MirrorError::AccessLost.is_retryable());
        assert!(MirrorError::Timeout.is_retryable());
    }

    #[test]
    fn configuration_and_init_errors_are_not_retryable() {
        assert!(!MirrorError::InvalidConfig("source == target".into()).is_retryable());
        assert!(!MirrorError::FirstFrameTimeout.is_retryable());
        assert_eq!(
            MirrorError::UnsupportedFormat("R10G10B10A2".into()).class(),
            MirrorErrorClass::Fatal
        );
    }
}
