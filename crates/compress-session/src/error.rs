use std::io;

use thiserror::Error;

/// Raw status codes returned to fixed-ABI callers.
pub mod errno {
    pub const EIO: i32 = 5;
    pub const ENOENT: i32 = 2;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
    pub const ENODEV: i32 = 19;
    pub const ENETRESET: i32 = 102;
}

/// Failure reported by the compressed-audio driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The DSP subsystem restarted while a call was in flight.
    #[error("compress device was reset")]
    Reset,
    #[error("compress driver call `{op}` failed: {reason}")]
    Failed { op: &'static str, reason: String },
}

impl DriverError {
    pub fn failed(op: &'static str, reason: impl Into<String>) -> Self {
        DriverError::Failed {
            op,
            reason: reason.into(),
        }
    }

    pub fn is_reset(&self) -> bool {
        matches!(self, DriverError::Reset)
    }
}

/// Failure reported by the mixer control plane.
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("mixer control `{control}` rejected value: {reason}")]
    Rejected { control: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sound card unavailable: {0}")]
    DeviceState(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Mixer(#[from] MixerError),
    #[error("session graph: {0}")]
    Graph(String),
    #[error("payload encoding failed")]
    Payload(#[source] io::Error),
}

impl SessionError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SessionError::InvalidArgument(msg.into())
    }

    /// Negative status code for this error.
    pub fn errno(&self) -> i32 {
        let code = match self {
            SessionError::InvalidArgument(_) => errno::EINVAL,
            SessionError::OutOfMemory(_) => errno::ENOMEM,
            SessionError::NotFound(_) => errno::ENOENT,
            SessionError::DeviceState(_) => errno::ENODEV,
            SessionError::Driver(DriverError::Reset) => errno::ENETRESET,
            SessionError::Driver(DriverError::Failed { .. }) => errno::EIO,
            SessionError::Mixer(MixerError::Rejected { .. }) => errno::EINVAL,
            SessionError::Graph(_) => errno::EIO,
            SessionError::Payload(err) if err.kind() == io::ErrorKind::OutOfMemory => {
                errno::ENOMEM
            }
            SessionError::Payload(_) => errno::EINVAL,
        };
        -code
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::OutOfMemory {
            SessionError::OutOfMemory(err.to_string())
        } else {
            SessionError::Payload(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_is_negative_and_specific() {
        assert_eq!(SessionError::invalid("x").errno(), -22);
        assert_eq!(SessionError::Driver(DriverError::Reset).errno(), -102);
        assert_eq!(SessionError::NotFound("c".into()).errno(), -2);
        assert_eq!(SessionError::DeviceState("offline".into()).errno(), -19);
        let rejected = MixerError::Rejected {
            control: "c".into(),
            reason: "r".into(),
        };
        assert_eq!(SessionError::Mixer(rejected).errno(), -22);
    }

    #[test]
    fn io_out_of_memory_maps_to_out_of_memory() {
        let err: SessionError = io::Error::new(io::ErrorKind::OutOfMemory, "oom").into();
        assert!(matches!(err, SessionError::OutOfMemory(_)));
        assert_eq!(err.errno(), -12);

        let err: SessionError = io::Error::new(io::ErrorKind::InvalidInput, "bad").into();
        assert!(matches!(err, SessionError::Payload(_)));
    }
}
