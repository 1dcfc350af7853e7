use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Turns raw PDF bytes into page-ordered text.
pub trait PdfExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError>;
}

#[derive(Debug, Default)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::Extraction(error.to_string()))?;

        if document.trailer.get(b"Encrypt").is_ok() {
            return Err(IngestError::Extraction("pdf is encrypted".to_string()));
        }

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::Extraction(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::Extraction(
                "pdf had no readable page text".to_string(),
            ));
        }

        Ok(pages)
    }
}

impl PdfExtractor for LopdfExtractor {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let pages = self.extract_pages(bytes)?;
        Ok(join_pages(&pages))
    }
}

/// Secondary parser; `pdf-extract` handles some font encodings lopdf skips.
#[derive(Debug, Default)]
pub struct PdfExtractExtractor;

impl PdfExtractor for PdfExtractExtractor {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError> {
        // pdf-extract panics on some malformed inputs.
        let outcome = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
        match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text),
            Ok(Ok(_)) => Err(IngestError::Extraction(
                "pdf had no readable text".to_string(),
            )),
            Ok(Err(error)) => Err(IngestError::Extraction(error.to_string())),
            Err(_) => Err(IngestError::Extraction(
                "pdf-extract aborted on malformed input".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl OcrEndpointConfig {
    /// Reads `LLM_OCR_ENDPOINT` and `LLM_OCR_API_KEY`; `None` when no endpoint is set.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("LLM_OCR_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = std::env::var("LLM_OCR_API_KEY").ok().and_then(|value| {
            let key = value.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        Some(Self {
            endpoint,
            api_key,
            timeout: Duration::from_secs(60),
        })
    }
}

/// Last-resort extractor that ships the PDF to a multimodal OCR endpoint.
///
/// Uses the blocking client, which must be created and dropped off the async
/// runtime, so one is built per call on the extraction thread.
pub struct OcrEndpointExtractor {
    config: OcrEndpointConfig,
}

impl OcrEndpointExtractor {
    pub fn new(config: OcrEndpointConfig) -> Self {
        Self { config }
    }
}

impl PdfExtractor for OcrEndpointExtractor {
    fn name(&self) -> &'static str {
        "ocr-endpoint"
    }

    fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(bytes),
            source_path: "upload.pdf".to_string(),
        };

        let client = Client::builder().timeout(self.config.timeout).build()?;
        let mut request = client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "multimodal OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json()?;
        let pages = payload_to_pages(&payload)?;
        Ok(join_pages(&pages))
    }
}

/// Tries each backend in order and returns the first non-empty text.
pub struct ExtractorChain {
    backends: Vec<Box<dyn PdfExtractor>>,
}

impl ExtractorChain {
    pub fn new(backends: Vec<Box<dyn PdfExtractor>>) -> Self {
        Self { backends }
    }

    /// lopdf, then pdf-extract, then the OCR endpoint when `LLM_OCR_ENDPOINT` is set.
    pub fn with_defaults() -> Self {
        let mut backends: Vec<Box<dyn PdfExtractor>> =
            vec![Box::new(LopdfExtractor), Box::new(PdfExtractExtractor)];

        if let Some(config) = OcrEndpointConfig::from_env() {
            backends.push(Box::new(OcrEndpointExtractor::new(config)));
        }

        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }

    pub fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        if self.backends.is_empty() {
            return Err(IngestError::Extraction(
                "no pdf extractor configured".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for backend in &self.backends {
            match backend.extract_text(bytes) {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(backend = backend.name(), chars = text.len(), "pdf text extracted");
                    return Ok(text);
                }
                Ok(_) => failures.push(format!("{}: no text found", backend.name())),
                Err(error) => {
                    warn!(backend = backend.name(), %error, "pdf extractor failed, trying next");
                    failures.push(format!("{}: {error}", backend.name()));
                }
            }
        }

        Err(IngestError::Extraction(failures.join("; ")))
    }
}

impl Default for ExtractorChain {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn payload_to_pages(payload: &LlmOcrResponse) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let mut listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_ref().map(|value| value.trim().to_string())?;
                if text.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: page.page.unwrap_or(1),
                        text,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            listed.sort_by_key(|page| page.number);
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(
        "multimodal OCR response was empty".to_string(),
    ))
}
