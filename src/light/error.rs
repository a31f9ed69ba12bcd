use thiserror::Error;

/// Failures signaled by the light client. Connection and framing problems are
/// contained locally and surfaced as events; they never fail an in-flight
/// command, which settles through its own timeout instead.
#[derive(Error, Debug)]
pub enum LightError {
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    #[error("request {id} ({method}) timed out")]
    Timeout { id: i64, method: String },
    #[error("method '{0}' is not supported by this device")]
    UnsupportedMethod(String),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("get_prop result carries {received} values for {requested} requested properties")]
    PropertyCountMismatch { requested: usize, received: usize },
    #[error("device error {code}: {message}")]
    Device { code: i64, message: String },
}
