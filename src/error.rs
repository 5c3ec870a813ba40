/// Errors shared by the protocol and session layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A read yielded fewer bytes than one full bus frame.
    #[error("short frame: expected {expected} bytes, received {received}")]
    ShortFrame { expected: usize, received: usize },
    /// An I/O error from the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
