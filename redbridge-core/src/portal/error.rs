use thiserror::Error;

pub type PortalResult<T> = Result<T, PortalError>;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("missing configuration: {0}")]
    MissingConfiguration(&'static str),
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("field not found: {0}")]
    FieldNotFound(String),
    #[error("portal rejected the automation credentials")]
    CredentialRejected,
    #[error("login outcome could not be determined: {0}")]
    AmbiguousLogin(String),
    #[error("navigation failed: {0}")]
    NavigationFailed(String),
    #[error("no rendered option matched '{target}' in {field}")]
    OptionNotFound { field: String, target: String },
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Whether a failure is worth a bounded retry or needs a human.
///
/// A structural mismatch means the portal's DOM no longer looks the way
/// the locator map expects; retrying cannot fix that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Structural,
}

impl PortalError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PortalError::Timeout(_) => ErrorClass::Transient,
            PortalError::Io(_) => ErrorClass::Transient,
            PortalError::Cdp(err) => {
                let text = err.to_string().to_lowercase();
                if text.contains("timeout") || text.contains("connection") {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Structural
                }
            }
            _ => ErrorClass::Structural,
        }
    }
}

impl From<tokio::task::JoinError> for PortalError {
    fn from(err: tokio::task::JoinError) -> Self {
        PortalError::Configuration(err.to_string())
    }
}
