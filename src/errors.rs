use thiserror::Error;

/// The tagged failure type returned by every fallible operation in the
/// subsystem.
///
/// Structured variants carry enough information for the classifier to pick a
/// category without looking at message text. `Bridge`, `Server` and
/// `External` carry raw text from collaborators that only expose strings,
/// and are classified through the substring rule table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Device bridge error: {0}")]
    Bridge(String),

    #[error("Automation server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{type_name}: {message}")]
    External { type_name: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Stable name of the failure kind, fed to the classifier alongside the
    /// message.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Network(_) => "NetworkError",
            Self::Timeout { .. } => "TimeoutError",
            Self::SessionInvalid(_) => "InvalidSessionIdException",
            Self::ResourceExhausted(_) => "ResourceExhaustedError",
            Self::Bridge(_) => "BridgeError",
            Self::Server(_) => "ServerError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
            Self::External { type_name, .. } => type_name,
            Self::Internal(_) => "InternalError",
        }
    }

    /// Message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Network(m)
            | Self::SessionInvalid(m)
            | Self::ResourceExhausted(m)
            | Self::Bridge(m)
            | Self::Server(m)
            | Self::Config(m)
            | Self::Io(m)
            | Self::Internal(m) => m.clone(),
            Self::Timeout { operation, seconds } => {
                format!("{} exceeded {}s", operation, seconds)
            }
            Self::External { message, .. } => message.clone(),
        }
    }

    pub fn external(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }
}

impl From<std::io::Error> for GuardError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => Self::Network(e.to_string()),
            std::io::ErrorKind::TimedOut => Self::Timeout {
                operation: "io".to_string(),
                seconds: 0,
            },
            _ => Self::Io(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for GuardError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                operation: e
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "http request".to_string()),
                seconds: 0,
            }
        } else if e.is_connect() {
            Self::Network(e.to_string())
        } else {
            Self::Server(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_ISSUES_REMAIN: u8 = 3;
pub const EXIT_NETWORK_ERROR: u8 = 4;

/// Determine the appropriate process exit code for an error.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(guard_err) = e.downcast_ref::<GuardError>() {
        return match guard_err {
            GuardError::Config(_) => EXIT_CONFIG_ERROR,
            GuardError::Network(_) | GuardError::Timeout { .. } | GuardError::Server(_) => {
                EXIT_NETWORK_ERROR
            }
            _ => EXIT_ERROR,
        };
    }

    // Config loading wraps toml/io errors in anyhow context
    let msg = e.to_string().to_lowercase();
    if msg.contains("config") {
        return EXIT_CONFIG_ERROR;
    }

    EXIT_ERROR
}
