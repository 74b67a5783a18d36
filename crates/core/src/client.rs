//! Upload client for the Zenodo deposition API

use crate::config::{DepositTarget, UploadConfig};
use crate::error::{Error, Result, UploadFailure};
use crate::model::UploadTask;
use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Response, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Longest slice of an error body kept in failure reasons
const MAX_ERROR_BODY: usize = 200;

/// Transfers one file to a deposit.
///
/// `on_chunk` receives the size of every chunk handed to the transport, in
/// order. Implementations keep no state between calls.
#[async_trait]
pub trait UploadClient: Send + Sync {
    async fn upload(
        &self,
        task: &UploadTask,
        target: &DepositTarget,
        on_chunk: &mut (dyn FnMut(u64) + Send),
    ) -> std::result::Result<(), UploadFailure>;
}

/// Zenodo client: resolves the deposit bucket, then streams the file into it.
///
/// The bucket of a deposition is looked up once and reused for every later
/// file and attempt.
pub struct ZenodoClient {
    http_client: Client,
    chunk_size: usize,
    buckets: Mutex<HashMap<String, Url>>,
}

impl ZenodoClient {
    /// Create a new client with the given chunk size and per-request timeout
    pub fn new(chunk_size: usize, timeout: Duration) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("Chunk size cannot be zero".to_string()));
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("zenodo-upload/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::HttpClient(e.to_string()))?;

        Ok(Self {
            http_client,
            chunk_size,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Self::new(config.chunk_size(), config.timeout())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// File bucket of the deposition, fetched on first use
    pub async fn bucket_url(&self, target: &DepositTarget) -> std::result::Result<Url, UploadFailure> {
        let deposition_url = target.deposition_url();
        if let Some(bucket) = self.cached_bucket(&deposition_url) {
            return Ok(bucket);
        }

        let bucket = self
            .fetch_bucket_url(target, &deposition_url)
            .await
            .map_err(|failure| failure.context(format!("looking up deposit {}", target.deposit_id)))?;

        if let Ok(mut buckets) = self.buckets.lock() {
            buckets.insert(deposition_url, bucket.clone());
        }
        Ok(bucket)
    }

    fn cached_bucket(&self, deposition_url: &str) -> Option<Url> {
        self.buckets.lock().ok()?.get(deposition_url).cloned()
    }

    async fn fetch_bucket_url(
        &self,
        target: &DepositTarget,
        deposition_url: &str,
    ) -> std::result::Result<Url, UploadFailure> {
        let response = self
            .http_client
            .get(deposition_url)
            .bearer_auth(&target.access_token)
            .send()
            .await?;

        let deposition: Deposition = check_status(response).await?.json().await?;

        let bucket = deposition
            .links
            .bucket
            .ok_or_else(|| UploadFailure::fatal("no file bucket (already published?)"))?;

        Url::parse(&bucket)
            .map_err(|e| UploadFailure::fatal(format!("invalid bucket URL {}: {}", bucket, e)))
    }
}

#[async_trait]
impl UploadClient for ZenodoClient {
    async fn upload(
        &self,
        task: &UploadTask,
        target: &DepositTarget,
        on_chunk: &mut (dyn FnMut(u64) + Send),
    ) -> std::result::Result<(), UploadFailure> {
        let mut url = self.bucket_url(target).await?;
        url.path_segments_mut()
            .map_err(|_| UploadFailure::fatal("bucket URL cannot take a file name"))?
            .pop_if_empty()
            .push(&task.relative_name);

        let file = File::open(&task.path).await.map_err(|e| {
            UploadFailure::fatal(format!("cannot open {}: {}", task.path.display(), e))
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| UploadFailure::fatal(format!("cannot stat {}: {}", task.path.display(), e)))?
            .len();

        let content_type = mime_guess::from_path(&task.path)
            .first_or_octet_stream()
            .to_string();

        tracing::debug!(file = %task.relative_name, %url, size, "sending file");

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let body = Body::wrap_stream(ChunkStream::new(file, self.chunk_size, progress_tx));

        let request = self
            .http_client
            .put(url)
            .bearer_auth(&target.access_token)
            .header(CONTENT_LENGTH, size)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send();
        let request = async { check_status(request.await?).await };
        tokio::pin!(request);

        // Report chunks on this task while the body is being sent
        let sent = loop {
            tokio::select! {
                biased;
                Some(delta) = progress_rx.recv() => on_chunk(delta),
                sent = &mut request => break sent,
            }
        };
        while let Ok(delta) = progress_rx.try_recv() {
            on_chunk(delta);
        }

        sent.map_err(|failure| failure.context(format!("uploading {}", task.relative_name)))?;
        Ok(())
    }
}

/// Map non-2xx responses to a classified failure
async fn check_status(response: Response) -> std::result::Result<Response, UploadFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();

    Err(UploadFailure::from_status(status, &body)
        .unwrap_or_else(|| UploadFailure::fatal(format!("unexpected HTTP {}", status))))
}

/// Deposition resource, reduced to what uploading needs
#[derive(Debug, Deserialize)]
struct Deposition {
    links: DepositionLinks,
}

#[derive(Debug, Deserialize)]
struct DepositionLinks {
    bucket: Option<String>,
}

/// Reads a file in fixed-size chunks and reports each chunk's size.
///
/// Every chunk but the last is exactly `chunk_size` bytes long.
struct ChunkStream {
    file: File,
    chunk: Vec<u8>,
    filled: usize,
    chunk_size: usize,
    progress: mpsc::UnboundedSender<u64>,
    eof: bool,
}

impl ChunkStream {
    fn new(file: File, chunk_size: usize, progress: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            file,
            chunk: vec![0u8; chunk_size],
            filled: 0,
            chunk_size,
            progress,
            eof: false,
        }
    }
}

impl Stream for ChunkStream {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        while !this.eof && this.filled < this.chunk_size {
            let mut buf = ReadBuf::new(&mut this.chunk[this.filled..]);
            match Pin::new(&mut this.file).poll_read(cx, &mut buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => {
                    this.eof = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Ok(())) => {
                    let n = buf.filled().len();
                    if n == 0 {
                        this.eof = true;
                    }
                    this.filled += n;
                }
            }
        }

        if this.filled == 0 {
            return Poll::Ready(None);
        }

        let next = if this.eof { Vec::new() } else { vec![0u8; this.chunk_size] };
        let mut chunk = std::mem::replace(&mut this.chunk, next);
        chunk.truncate(this.filled);
        this.filled = 0;

        // The receiver is gone only when the upload was abandoned
        let _ = this.progress.send(chunk.len() as u64);

        Poll::Ready(Some(Ok(chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn chunks_of(content: &[u8], chunk_size: usize) -> (Vec<usize>, Vec<u64>, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, content).unwrap();

        let file = File::open(&path).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chunks: Vec<Vec<u8>> = ChunkStream::new(file, chunk_size, tx)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        let mut deltas = Vec::new();
        while let Ok(delta) = rx.try_recv() {
            deltas.push(delta);
        }

        let sizes = chunks.iter().map(Vec::len).collect();
        (sizes, deltas, chunks.concat())
    }

    #[tokio::test]
    async fn test_chunk_stream_exact_chunks() {
        let content: Vec<u8> = (0..100u8).collect();
        let (sizes, deltas, joined) = chunks_of(&content, 25).await;

        assert_eq!(sizes, vec![25, 25, 25, 25]);
        assert_eq!(deltas, vec![25, 25, 25, 25]);
        assert_eq!(joined, content);
    }

    #[tokio::test]
    async fn test_chunk_stream_short_tail() {
        let content = vec![7u8; 60];
        let (sizes, deltas, _) = chunks_of(&content, 25).await;

        assert_eq!(sizes, vec![25, 25, 10]);
        assert_eq!(deltas, vec![25, 25, 10]);
    }

    #[tokio::test]
    async fn test_chunk_stream_empty_file() {
        let (sizes, deltas, _) = chunks_of(&[], 25).await;
        assert!(sizes.is_empty());
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(ZenodoClient::new(0, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_from_config() {
        let client = ZenodoClient::from_config(&UploadConfig::default()).unwrap();
        assert_eq!(client.chunk_size(), 1024 * 1024);
    }
}
