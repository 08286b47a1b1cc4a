use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Ready,
    Connected,
    Starting,
    Downloading,
    Updating,
    Error,
    Cancelled,
}

/// Payload of the status characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: StatusKind,
    pub message: String,
    pub progress: u8,
    pub version: String,
}

impl StatusReport {
    pub fn new(status: StatusKind, message: impl Into<String>, progress: u8, version: &str) -> Self {
        Self { status, message: message.into(), progress: progress.min(100), version: version.to_string() }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"status":"error"}"#))
    }
}
