use thiserror::Error;

/// Errors produced by the transport layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// No usable transport; the emission is logged and dropped, never
    /// retried.
    #[error("Transport unavailable")]
    Unavailable,
}
