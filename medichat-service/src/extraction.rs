use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use medichat_core::GenerationError;
use medichat_core::gemini::{GeminiClient, Part};
use thiserror::Error;
use tracing::info;

const EXTRACTION_PROMPT: &str = "Attached is an image of a clinical report.
Go over the clinical report and identify biomarkers that show slight or large abnormalities. \
Then summarize the report in 100 words. You may increase the word limit if the report has multiple pages. \
Do not output the patient's name, dates or other identifying details. \
Make sure to include the numerical values and key details from the report, including the report title.
## Summary: ";

/// Upload types the report extractor accepts
pub const SUPPORTED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "application/pdf"];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("unsupported report type: {0}")]
    UnsupportedType(String),

    #[error("text extraction failed: {0}")]
    Provider(#[from] GenerationError),
}

/// A decoded `data:<mime>;base64,<payload>` upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime_type: String,
    pub data: String,
}

impl DataUrl {
    /// Parse and validate an uploaded report. Only JPEG, PNG and WebP images
    /// and PDFs are accepted.
    pub fn parse(raw: &str) -> Result<Self, ExtractionError> {
        let rest = raw
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| ExtractionError::InvalidUpload("expected a data URL".into()))?;

        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| ExtractionError::InvalidUpload("missing data URL payload".into()))?;

        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| ExtractionError::InvalidUpload("payload must be base64".into()))?
            .to_ascii_lowercase();

        if !SUPPORTED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(ExtractionError::UnsupportedType(mime_type));
        }

        if data.is_empty() {
            return Err(ExtractionError::InvalidUpload("empty payload".into()));
        }
        STANDARD
            .decode(data)
            .map_err(|e| ExtractionError::InvalidUpload(format!("bad base64 payload: {e}")))?;

        Ok(Self {
            mime_type,
            data: data.to_string(),
        })
    }
}

/// Turns an uploaded report into plain report text
#[async_trait]
pub trait ReportExtractor: Send + Sync {
    async fn extract(&self, upload: &DataUrl) -> Result<String, ExtractionError>;
}

pub struct GeminiReportExtractor {
    client: GeminiClient,
}

impl GeminiReportExtractor {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReportExtractor for GeminiReportExtractor {
    async fn extract(&self, upload: &DataUrl) -> Result<String, ExtractionError> {
        info!(
            mime_type = %upload.mime_type,
            payload_chars = upload.data.len(),
            "Extracting report text"
        );

        let text = self
            .client
            .generate(vec![
                Part::text(EXTRACTION_PROMPT),
                Part::inline_data(upload.mime_type.clone(), upload.data.clone()),
            ])
            .await?;

        info!(chars = text.len(), "Report text extracted");
        Ok(text)
    }
}
