use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HrvError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("channel closed")]
    Closed,
    #[error("device disconnected")]
    Disconnected,
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("protocol parse error: {0}")]
    ProtocolParse(String),
    #[error("trace error: {0}")]
    Trace(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("export error: {0}")]
    Export(String),
}

impl HrvError {
    /// Whether a read error only means "nothing arrived yet".
    ///
    /// Closed or broken channels are never transient, so sentinel waits must
    /// re-raise them instead of polling again.
    pub fn is_transient(&self) -> bool {
        match self {
            HrvError::Io(e) => is_transient_io(e),
            HrvError::Serial(e) => matches!(
                e.kind(),
                serialport::ErrorKind::Io(io::ErrorKind::TimedOut)
                    | serialport::ErrorKind::Io(io::ErrorKind::WouldBlock)
                    | serialport::ErrorKind::Io(io::ErrorKind::Interrupted)
            ),
            _ => false,
        }
    }

    /// Transport-level failures abort the session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HrvError::Io(_) | HrvError::Serial(_) | HrvError::Closed | HrvError::Disconnected
        )
    }
}

pub(crate) fn is_transient_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

pub type Result<T> = std::result::Result<T, HrvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_transient() {
        let err = HrvError::from(io::Error::new(io::ErrorKind::TimedOut, "poll"));
        assert!(err.is_transient());
        assert!(err.is_transport());
    }

    #[test]
    fn test_closed_is_not_transient() {
        assert!(!HrvError::Closed.is_transient());
        assert!(!HrvError::Disconnected.is_transient());
        let broken = HrvError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(!broken.is_transient());
        assert!(broken.is_transport());
    }

    #[test]
    fn test_parse_errors_are_not_transport() {
        let err = HrvError::ProtocolParse("bad".into());
        assert!(!err.is_transport());
        assert_eq!(err.to_string(), "protocol parse error: bad");
    }
}
