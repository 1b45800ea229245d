use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Calibration or configuration input is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// No device was found, or the device could not be opened or started.
    #[error("device error: {0}")]
    Device(String),
    /// A single grab produced invalid, null or mismatched data.
    #[error("acquisition error: {0}")]
    Acquisition(String),
}

impl Error {
    /// Whether the capture loop may skip this failure and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Acquisition(_))
    }

    /// Any runtime failure while reading a frame only loses that frame.
    pub(crate) fn during_grab(self) -> Self {
        match self {
            Error::Acquisition(_) => self,
            other => Error::Acquisition(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grab_failures_become_recoverable() {
        let e = Error::Device("usb reset".to_string()).during_grab();
        assert!(e.is_recoverable());
        assert!(e.to_string().contains("usb reset"));
        assert!(!Error::Device("x".to_string()).is_recoverable());
    }
}
