//! Record framing over a byte stream.
//!
//! Every record is exactly [`RECORD_LEN`] bytes, so no length prefix is
//! needed: a reader pulls one fixed-size block per message.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::message::{Message, RECORD_LEN};

/// Read one record from the stream.
///
/// Returns `None` on a clean EOF before the first byte. EOF in the middle of
/// a record is reported as [`io::ErrorKind::UnexpectedEof`].
pub async fn read_record<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Option<Message>> {
    let mut record = [0u8; RECORD_LEN];
    let mut filled = 0;
    while filled < RECORD_LEN {
        let n = reader.read(&mut record[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("record truncated after {filled} of {RECORD_LEN} bytes"),
            ));
        }
        filled += n;
    }
    Ok(Some(Message::decode(&record)))
}

/// Write one record to the stream and flush it.
pub async fn write_record<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> io::Result<()> {
    writer.write_all(&msg.encode()).await?;
    writer.flush().await
}
