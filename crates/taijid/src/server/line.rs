//! Bounded line reads shared by client and console sessions.
//!
//! Lines are read as raw bytes so that peers sending non-UTF-8 text are
//! not mistaken for broken connections.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::SessionError;

/// Reads one `\n`-terminated line into `buf`, replacing its contents.
///
/// Returns `Ok(false)` at end of stream. Trailing bytes without a newline
/// before EOF do not form a line and also yield `Ok(false)`.
///
/// # Errors
///
/// - `SessionError::LineTooLong` if `max` bytes arrive without a newline
/// - `SessionError::Io` if the socket read fails
pub(super) async fn read_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> Result<bool, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = u64::try_from(max).unwrap_or(u64::MAX);
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;

    if buf.ends_with(b"\n") {
        return Ok(true);
    }
    if read >= max {
        return Err(SessionError::LineTooLong { max });
    }
    Ok(false)
}
