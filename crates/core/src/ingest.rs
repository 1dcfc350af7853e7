use crate::error::IngestError;
use crate::models::SourceDocument;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::Url;

const FALLBACK_FILENAME: &str = "document.pdf";

/// Loads the `documents` field of a request: an http(s) URL, a `file://` URL, or a local path.
///
/// Local sources can be switched off with [`DocumentFetcher::remote_only`] when the
/// source string comes from an untrusted caller.
#[derive(Debug, Clone)]
pub struct DocumentFetcher {
    client: Client,
    allow_local: bool,
}

impl DocumentFetcher {
    pub fn new(timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            allow_local: true,
        })
    }

    /// Rejects `file://` URLs and filesystem paths; only http(s) is fetched.
    pub fn remote_only(mut self) -> Self {
        self.allow_local = false;
        self
    }

    pub fn allows_local(&self) -> bool {
        self.allow_local
    }

    pub async fn fetch(&self, source: &str) -> Result<SourceDocument, IngestError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(IngestError::InvalidArgument(
                "document source is empty".to_string(),
            ));
        }

        match Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self.download(url).await,
            _ if !self.allow_local => Err(IngestError::InvalidArgument(
                "only http(s) document urls are accepted".to_string(),
            )),
            Ok(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|_| {
                    IngestError::InvalidArgument(format!("not a local file url: {source}"))
                })?;
                load_local(&path, source).await
            }
            _ => load_local(Path::new(source), source).await,
        }
    }

    async fn download(&self, url: Url) -> Result<SourceDocument, IngestError> {
        let response = self.client.get(url.clone()).send().await?;

        if response.status() != StatusCode::OK {
            return Err(IngestError::Download {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await?.to_vec();
        info!(url = %url, bytes = bytes.len(), "document downloaded");

        Ok(SourceDocument {
            document_id: digest_bytes(&bytes),
            filename: filename_from_url(&url),
            source: url.to_string(),
            bytes,
        })
    }
}

async fn load_local(path: &Path, source: &str) -> Result<SourceDocument, IngestError> {
    let bytes = tokio::fs::read(path).await?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string();

    Ok(SourceDocument {
        document_id: digest_bytes(&bytes),
        filename,
        source: source.to_string(),
        bytes,
    })
}

pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
