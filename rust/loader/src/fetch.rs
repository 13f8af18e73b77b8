// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Asset transfer as a lazy stream of progress events.
//!
//! A fetch ends with [`FetchEvent::Complete`] carrying the whole buffer, or
//! with an error. Dropping the stream stops the transfer and frees what was
//! buffered so far.

use std::path::PathBuf;

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::{Client, Url};
use tokio::io::AsyncReadExt;

use crate::error::FetchError;

/// Read size for local files
const FILE_CHUNK_SIZE: usize = 256 * 1024;
/// Largest buffer reserved up front from a Content-Length header
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// Bytes received so far, and the expected total when known
    Progress { loaded: u64, total: Option<u64> },
    /// The complete asset
    Complete(Bytes),
}

pub type FetchStream = BoxStream<'static, Result<FetchEvent, FetchError>>;

/// Source of asset bytes
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> FetchStream;

    /// One full-buffer transfer without progress reporting
    fn fetch_all(&self, url: &str) -> BoxFuture<'static, Result<Bytes, FetchError>> {
        let mut events = self.fetch(url);
        Box::pin(async move {
            while let Some(event) = events.next().await {
                if let FetchEvent::Complete(bytes) = event? {
                    return Ok(bytes);
                }
            }
            Err(FetchError::Incomplete)
        })
    }
}

/// HTTP(S) fetcher streaming the response body
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn http_stream(
    client: Client,
    url: String,
) -> impl Stream<Item = Result<FetchEvent, FetchError>> + Send + 'static {
    try_stream! {
        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            Err::<(), _>(FetchError::Status { status: status.as_u16(), url: url.clone() })?;
        }

        let total = response.content_length();
        tracing::debug!(url = %url, total = ?total, "receiving asset");
        yield FetchEvent::Progress { loaded: 0, total };

        let mut body = BytesMut::with_capacity(total.unwrap_or(0).min(MAX_PREALLOC) as usize);
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            body.extend_from_slice(&chunk);
            yield FetchEvent::Progress { loaded: body.len() as u64, total };
        }

        yield FetchEvent::Complete(body.freeze());
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> FetchStream {
        http_stream(self.client.clone(), url.to_string()).boxed()
    }
}

/// Local file fetcher for `file://` URLs and plain paths
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl FileFetcher {
    pub fn new() -> Self {
        Self
    }

    /// Filesystem path of a `file://` URL or a plain path
    pub fn resolve(url: &str) -> Result<PathBuf, FetchError> {
        if url.starts_with("file:") {
            let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
            parsed
                .to_file_path()
                .map_err(|_| FetchError::InvalidUrl(url.to_string()))
        } else {
            Ok(PathBuf::from(url))
        }
    }
}

fn file_stream(path: PathBuf) -> impl Stream<Item = Result<FetchEvent, FetchError>> + Send + 'static {
    try_stream! {
        let mut file = tokio::fs::File::open(&path).await?;
        let total = file.metadata().await?.len();
        yield FetchEvent::Progress { loaded: 0, total: Some(total) };

        let mut body = BytesMut::with_capacity(total as usize);
        loop {
            body.reserve(FILE_CHUNK_SIZE);
            let read = file.read_buf(&mut body).await?;
            if read == 0 {
                break;
            }
            yield FetchEvent::Progress { loaded: body.len() as u64, total: Some(total) };
        }

        yield FetchEvent::Complete(body.freeze());
    }
}

impl AssetFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> FetchStream {
        match Self::resolve(url) {
            Ok(path) => file_stream(path).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }
}

/// Dispatches on the URL scheme: HTTP(S) to [`HttpFetcher`], `file://` and
/// scheme-less paths to [`FileFetcher`]
#[derive(Debug, Clone, Default)]
pub struct SchemeFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl SchemeFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssetFetcher for SchemeFetcher {
    fn fetch(&self, url: &str) -> FetchStream {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            self.http.fetch(url)
        } else if lower.starts_with("file:") || !lower.contains("://") {
            self.file.fetch(url)
        } else {
            let error = FetchError::UnsupportedScheme(url.to_string());
            stream::once(async move { Err(error) }).boxed()
        }
    }
}
