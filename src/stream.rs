//! Bridges an async byte stream to blocking file I/O.
//!
//! Filesystem syscalls block; the HTTP layer does not. A bounded channel
//! carries chunks to (or from) a dedicated blocking worker, the same shape the
//! teacher used for its NFS read/write tasks: a bounded queue, a worker spawned
//! onto the blocking pool, and a sentinel that tells the worker to stop.

use std::path::Path;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::StorageResult;

const CHANNEL_DEPTH: usize = 8;
const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Consumes `chunks` and writes them sequentially to `path`. If `append` is
/// false the file is created (truncating any existing content); if true,
/// bytes are appended (the upload-session use case).
pub async fn write_stream<S>(path: &Path, append: bool, mut chunks: S) -> StorageResult<u64>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await?;

    let (tx, mut rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);

    let writer = tokio::spawn(async move {
        let mut written: u64 = 0;
        while let Some(chunk) = rx.recv().await {
            if chunk.is_empty() {
                break;
            }
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok::<u64, std::io::Error>(written)
    });

    let mut send_failed = false;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if tx.send(chunk).await.is_err() {
            send_failed = true;
            break;
        }
    }
    if !send_failed {
        // Zero-length sentinel: tells the worker no more data is coming.
        let _ = tx.send(Bytes::new()).await;
    }
    drop(tx);

    let written = writer.await.map_err(|e| std::io::Error::other(e.to_string()))??;
    Ok(written)
}

/// Produces the contents of `path` as a sequence of `chunk_size`-sized chunks.
/// `chunk_size == 0` means "use the filesystem's block size".
pub fn read_stream(
    path: &Path,
    chunk_size: usize,
) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin {
    let path = path.to_path_buf();
    let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(CHANNEL_DEPTH);

    tokio::spawn(async move {
        let result = async {
            let mut file = tokio::fs::File::open(&path).await?;
            let mut buf = vec![0u8; chunk_size];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    // consumer dropped the stream: stop reading promptly
                    return Ok(());
                }
            }
            Ok::<(), std::io::Error>(())
        }
        .await;
        if let Err(err) = result {
            let _ = tx.send(Err(err)).await;
        }
    });

    tokio_stream_from_receiver(rx)
}

fn tokio_stream_from_receiver(
    rx: mpsc::Receiver<std::io::Result<Bytes>>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin {
    tokio_stream::wrappers::ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn write_stream_concatenates_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);

        let written = write_stream(&path, false, chunks).await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn write_stream_append_extends_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let chunks = stream::iter(vec![Ok(Bytes::from_static(b"def"))]);
        write_stream(&path, true, chunks).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn read_stream_yields_requested_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.bin");
        tokio::fs::write(&path, vec![7u8; 10]).await.unwrap();

        let mut stream = read_stream(&path, 4);
        let mut total = Vec::new();
        let mut chunk_lens = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            chunk_lens.push(chunk.len());
            total.extend_from_slice(&chunk);
        }
        assert_eq!(total, vec![7u8; 10]);
        assert_eq!(chunk_lens, vec![4, 4, 2]);
    }
}
