use core::fmt;

/// Every way the update pipeline can fail.
///
/// None of these are fatal to the device. Stage-1 and the direct-flash path
/// answer any of them with a reboot; Stage-2 and the factory loader answer
/// them by discarding the staged image and booting the previous firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaError {
    /// Connect failure, bad HTTP status, unknown/zero length or short transfer.
    Transfer(String),
    /// Open/read/write/remove failure on removable storage or the record store.
    Storage(String),
    /// Begin/write/finalize failure of a flash write session, or boot-pointer update.
    Flash(String),
    /// The partition chosen for writing is the one currently executing.
    PartitionConflict { label: String, address: u32 },
    /// Malformed or incomplete control-channel command.
    Protocol(String),
    /// Stage-1 transfer stopped by a `cancel_update` command.
    Cancelled,
}

pub type Result<T> = core::result::Result<T, OtaError>;

impl OtaError {
    pub fn kind(&self) -> &'static str {
        match self {
            OtaError::Transfer(_) => "TransferError",
            OtaError::Storage(_) => "StorageError",
            OtaError::Flash(_) => "FlashError",
            OtaError::PartitionConflict { .. } => "PartitionConflictError",
            OtaError::Protocol(_) => "ProtocolError",
            OtaError::Cancelled => "Cancelled",
        }
    }

    /// Integrity violations are logged louder than ordinary failures.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, OtaError::PartitionConflict { .. })
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        OtaError::Transfer(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        OtaError::Storage(message.into())
    }

    pub fn flash(message: impl Into<String>) -> Self {
        OtaError::Flash(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        OtaError::Protocol(message.into())
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaError::Transfer(msg) => write!(f, "transfer failed: {}", msg),
            OtaError::Storage(msg) => write!(f, "storage failed: {}", msg),
            OtaError::Flash(msg) => write!(f, "flash failed: {}", msg),
            OtaError::PartitionConflict { label, address } => write!(
                f,
                "partition conflict: update target '{}' @ 0x{:x} is the running partition",
                label, address
            ),
            OtaError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            OtaError::Cancelled => write!(f, "update cancelled"),
        }
    }
}

impl std::error::Error for OtaError {}

impl From<std::io::Error> for OtaError {
    fn from(err: std::io::Error) -> Self {
        OtaError::Storage(err.to_string())
    }
}
