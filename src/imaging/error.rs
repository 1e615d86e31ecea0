use thiserror::Error;

/// Failure inside the imaging layer.
///
/// Which HTTP category a variant maps to depends on the direction: a
/// `Decode` of an upload is the caller's fault, a `Decode` of a stored
/// master is ours. The request boundary decides.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImagingError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("transform failed: {0}")]
    Transform(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("imaging unavailable: {0}")]
    Unavailable(String),
}
