//! Cross-platform local socket transport
//!
//! Abstracts Unix domain sockets (Unix/macOS) and named pipes (Windows)
//! using the interprocess crate. Frames are a little-endian `u32` length
//! followed by a JSON-encoded [`ChannelEvent`].

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::common::paths;

use super::protocol::ChannelEvent;

/// Maximum frame size (10 MB)
const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

#[cfg(unix)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(windows)]
pub mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::{GenericNamespaced, ListenerOptions};
}

use platform::*;

pub use platform::Stream;

/// Create a listener for incoming connections
pub async fn create_listener() -> io::Result<Listener> {
    // Ensure socket directory exists (Unix) and clean up stale socket
    paths::ensure_socket_dir()?;
    paths::remove_socket()?;

    let name = paths::socket_name();

    #[cfg(unix)]
    let listener = {
        let name = name.to_fs_name::<GenericFilePath>()?;
        ListenerOptions::new().name(name).create_tokio()?
    };

    #[cfg(windows)]
    let listener = {
        let name = name.to_ns_name::<GenericNamespaced>()?;
        ListenerOptions::new().name(name).create_tokio()?
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = paths::socket_path();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Connect to the host's socket
pub async fn connect() -> io::Result<Stream> {
    let name = paths::socket_name();

    #[cfg(unix)]
    let stream = {
        let name = name.to_fs_name::<GenericFilePath>()?;
        Stream::connect(name).await?
    };

    #[cfg(windows)]
    let stream = {
        let name = name.to_ns_name::<GenericNamespaced>()?;
        Stream::connect(name).await?
    };

    Ok(stream)
}

/// Whether a failed connect means no host is listening
pub fn is_not_running(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

/// Send a length-prefixed message
pub async fn send_message<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "Message too large"));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed message
pub async fn recv_message<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > MAX_MESSAGE_SIZE {
        // Skip the body so the next read starts on a frame boundary
        let mut body = (&mut *reader).take(len as u64);
        let skipped = tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
        if skipped < len as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Stream ended inside an oversized frame",
            ));
        }
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// Encode and send one event
pub async fn send_event<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    event: &ChannelEvent,
) -> io::Result<()> {
    let json = serde_json::to_vec(event)?;
    send_message(writer, &json).await
}

/// Receive and decode one event
///
/// A frame that is not a valid event yields `InvalidData`; the stream stays
/// usable because the whole frame has been consumed.
pub async fn recv_event<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<ChannelEvent> {
    let data = recv_message(reader).await?;
    serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_missing_or_refused_socket_means_not_running() {
        assert!(is_not_running(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(is_not_running(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(!is_not_running(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_event_frame_round_trip() {
        let (mut writer, server) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(server);

        send_event(&mut writer, &ChannelEvent::DebugStep).await.unwrap();
        let event = recv_event(&mut reader).await.unwrap();
        assert_eq!(event, ChannelEvent::DebugStep);
    }

    #[tokio::test]
    async fn test_garbage_frame_is_invalid_data_and_stream_continues() {
        let (mut writer, server) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(server);

        send_message(&mut writer, b"{\"event\":\"no-such-event\"}").await.unwrap();
        send_event(&mut writer, &ChannelEvent::Shutdown).await.unwrap();

        let err = recv_event(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(recv_event(&mut reader).await.unwrap(), ChannelEvent::Shutdown);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_skipped_and_stream_stays_in_sync() {
        let mut data = Vec::new();
        data.extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_le_bytes());
        data.extend(std::iter::repeat(b'x').take(MAX_MESSAGE_SIZE as usize + 1));
        send_event(&mut data, &ChannelEvent::Shutdown).await.unwrap();
        let mut reader = std::io::Cursor::new(data);

        let err = recv_event(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(recv_event(&mut reader).await.unwrap(), ChannelEvent::Shutdown);
    }

    #[tokio::test]
    async fn test_truncated_oversized_frame_ends_the_stream() {
        let mut data = Vec::new();
        data.extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_le_bytes());
        data.extend_from_slice(b"short");
        let mut reader = std::io::Cursor::new(data);

        let err = recv_message(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
