use thiserror::Error;

/// Unified error type for all radiowarden-netlink operations.
///
/// Variants carry the operation and interface involved so the caller can log
/// something actionable without re-wrapping.
#[derive(Error, Debug)]
pub enum NetlinkError {
    #[error("Interface '{name}' not found. Verify interface exists with 'ip link show'.")]
    InterfaceNotFound { name: String },

    #[error("Failed to get interface index for '{interface}': {reason}")]
    InterfaceIndexError { interface: String, reason: String },

    #[error("Invalid argument: {parameter} = '{value}': {reason}")]
    InvalidArgument {
        parameter: String,
        value: String,
        reason: String,
    },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Netlink protocol error during {operation}: {reason}")]
    NetlinkProtocol { operation: String, reason: String },

    #[error("Failed to parse {what}: {reason}")]
    ParseError { what: String, reason: String },

    #[error("Permission denied: {operation}. Root privileges required.")]
    PermissionDenied { operation: String },

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, NetlinkError>;

impl NetlinkError {
    /// Create an IO error with context, promoting EPERM/EACCES to a clearer variant.
    pub fn io_error(operation: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                operation: operation.into(),
            };
        }
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a netlink protocol error with context.
    pub fn netlink_error(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetlinkProtocol {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}
