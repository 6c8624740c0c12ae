//! PDF download and text extraction.
//!
//! Open-access PDFs are fetched with a dedicated client (longer timeout,
//! redirects followed) and run through `lopdf`. Extraction quality varies
//! with the PDF's encoding; callers treat failures as "no full text" and
//! fall back to the abstract.

use std::time::Duration;

use tracing::debug;

use crate::error::SourceError;

/// PDF download timeout.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Hard cap on extracted text, far above what the summarizer consumes.
const MAX_EXTRACTED_CHARS: usize = 500_000;

/// Builds the client used for PDF downloads.
///
/// # Errors
///
/// Returns [`SourceError::Pdf`] if the client cannot be constructed.
pub fn download_client() -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| SourceError::Pdf {
            message: format!("failed to build download client: {e}"),
        })
}

/// Downloads a PDF and extracts its text.
///
/// # Errors
///
/// Returns [`SourceError::Pdf`] when the download fails, the payload is
/// not a parseable PDF, or no text could be extracted.
pub async fn download_and_extract(
    client: &reqwest::Client,
    pdf_url: &str,
) -> Result<String, SourceError> {
    let response = client
        .get(pdf_url)
        .send()
        .await
        .map_err(|e| SourceError::Pdf {
            message: format!("download failed: {e}"),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Pdf {
            message: format!("download returned HTTP {}", status.as_u16()),
        });
    }

    let bytes = response.bytes().await.map_err(|e| SourceError::Pdf {
        message: format!("download body failed: {e}"),
    })?;

    debug!(url = pdf_url, bytes = bytes.len(), "pdf downloaded");
    extract_pdf_text(&bytes)
}

/// Extracts text from in-memory PDF bytes.
///
/// # Errors
///
/// Returns [`SourceError::Pdf`] on parse failure or when the document
/// yields no text (scanned pages, unsupported encodings).
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, SourceError> {
    let document = lopdf::Document::load_mem(bytes).map_err(|e| SourceError::Pdf {
        message: format!("pdf parse failed: {e}"),
    })?;

    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    let mut text = document
        .extract_text(&pages)
        .map_err(|e| SourceError::Pdf {
            message: format!("text extraction failed: {e}"),
        })?;

    if text.trim().is_empty() {
        return Err(SourceError::Pdf {
            message: "no extractable text (scanned or image-only pdf)".to_string(),
        });
    }

    if text.len() > MAX_EXTRACTED_CHARS {
        text.truncate(MAX_EXTRACTED_CHARS);
    }
    Ok(text)
}
