//! Policy for I/O errors on established client connections.
//!
//! Peers hang up all the time; a reset or a write into a closed pipe is
//! routine and must not take the server down. Any other transport error is
//! returned so the caller can treat it as fatal.

use std::io;

/// Connection-reset and broken-pipe.
pub fn is_benign(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
    )
}

/// Swallows benign errors and hands every other error back.
pub fn absorb_benign(error: io::Error) -> io::Result<()> {
    if is_benign(&error) {
        tracing::trace!(error = %error, "Peer closed connection");
        Ok(())
    } else {
        Err(error)
    }
}
