use std::{io, net::SocketAddr};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Command a client sends to end its own session.
pub const EXIT_COMMAND: &str = "exit";

/// Reads one `\n`-terminated line, without its terminator.
///
/// Returns `Ok(None)` once the peer has closed its side of the stream. Bytes
/// that are not valid UTF-8 are replaced rather than failing the read, so a
/// client speaking a single-byte encoding still gets its lines through.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes = reader.read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&buf);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

/// Writes `line` followed by `\n` and flushes.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

pub fn is_exit_command(text: &str) -> bool {
    text.eq_ignore_ascii_case(EXIT_COMMAND)
}

/// Line relayed to the other peers when `sender` says `text`.
pub fn chat_line(sender: SocketAddr, text: &str) -> String {
    format!("[{sender}]: {text}")
}

pub fn joined_notice(peer: SocketAddr) -> String {
    format!("peer connected: {peer}")
}

pub fn left_notice(peer: SocketAddr) -> String {
    format!("peer disconnected: {peer}")
}
