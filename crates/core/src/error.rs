/// Errors raised by the pure domain layer before anything touches the
/// network.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
}
