use thiserror::Error;

/// §7 `InverterRPCFailure` — fire-and-forget by contract; callers log and move on.
#[derive(Debug, Error)]
pub enum InverterError {
    #[error("inverter request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("inverter returned an error: {0}")]
    Rpc(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// §7 switch RPC failures — also fire-and-forget.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("switch {endpoint} request timed out")]
    Timeout { endpoint: String },
    #[error("switch {endpoint} returned an error: {message}")]
    Rpc { endpoint: String, message: String },
    #[error("transport error talking to {endpoint}: {source}")]
    Transport { endpoint: String, #[source] source: reqwest::Error },
}

/// §7 sensor-bus read failures, distinguished from staleness (handled in
/// `data_manager`).
#[derive(Debug, Error)]
pub enum SensorBusError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
