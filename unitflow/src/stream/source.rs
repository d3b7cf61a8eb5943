//! Byte-source adapters that drive a [`ByteStream`] from local input.
//!
//! A source reads fixed-size buffers sequentially, enqueues each one as a
//! chunk, and closes the stream at end of input. The final chunk may be
//! shorter than the buffer size. The produced sequence is not restartable.
//!
//! Sources use a capacity-1 stream so each chunk waits for the previous one
//! to be consumed; a paced consumer therefore observes exactly ⌈n/b⌉ data
//! reads for content of length `n` and buffer size `b`.

use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use super::ByteStream;

/// Spawn a source that streams a file in `buf_size`-byte chunks.
///
/// The returned stream closes once the file is exhausted or the read task
/// fails; read errors are logged and truncate the stream.
pub fn spawn_file_source(path: impl Into<PathBuf>, buf_size: usize) -> ByteStream {
    let stream = ByteStream::bounded(1);
    let out = stream.clone();
    let path = path.into();
    tokio::spawn(async move {
        let result = async {
            let file = tokio::fs::File::open(&path).await?;
            pump_reader(file, buf_size, &stream).await
        }
        .await;
        if let Err(error) = result {
            warn!(path = %path.display(), %error, "file source aborted");
        }
        stream.close();
    });
    out
}

/// Spawn a source that streams an arbitrary async reader in fixed-size
/// chunks.
pub fn spawn_reader_source<R>(reader: R, buf_size: usize) -> ByteStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let stream = ByteStream::bounded(1);
    let out = stream.clone();
    tokio::spawn(async move {
        if let Err(error) = pump_reader(reader, buf_size, &stream).await {
            warn!(%error, "reader source aborted");
        }
        stream.close();
    });
    out
}

/// Pump a reader into an existing stream, one buffer-sized chunk at a time.
///
/// Returns once the reader hits end of input or the consumer closes the
/// stream. Does not close the stream itself.
pub async fn pump_reader<R>(
    mut reader: R,
    buf_size: usize,
    stream: &ByteStream,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buf_size.max(1)];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        if stream.enqueue(chunk).await.is_err() {
            // Consumer closed early; nothing left to deliver to.
            return Ok(());
        }
    }
}
