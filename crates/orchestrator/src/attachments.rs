//! Attachment classification for simple-chat turns.
//!
//! Attachments arrive as data URIs. Images are forwarded to the model as
//! image content; PDFs go through the external text-extraction collaborator;
//! everything else is decoded as UTF-8 text.

use base64::Engine;

use citeflow_core::error::Error;

/// What to do with an attachment, decided by media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Pdf,
    Text,
}

pub fn classify(media_type: &str) -> AttachmentKind {
    if media_type.starts_with("image/") {
        AttachmentKind::Image
    } else if media_type == "application/pdf" {
        AttachmentKind::Pdf
    } else {
        AttachmentKind::Text
    }
}

/// A decoded `data:` URI.
#[derive(Debug, Clone)]
pub struct DecodedAttachment {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Parse a `data:<media-type>;base64,<payload>` URI.
pub fn decode_data_url(data_url: &str) -> Result<DecodedAttachment, Error> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| Error::InvalidRequest("attachment is not a data URI".into()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::InvalidRequest("data URI has no payload".into()))?;

    let media_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| Error::InvalidRequest("data URI payload must be base64".into()))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| Error::InvalidRequest(format!("invalid base64 payload: {e}")))?;

    Ok(DecodedAttachment {
        media_type: media_type.to_string(),
        bytes,
    })
}

/// External text-extraction collaborator. Pure over its input; the real
/// implementation lives outside the core.
pub trait TextExtraction: Send + Sync {
    fn extract_pdf_text(&self, bytes: &[u8]) -> Result<String, Error>;
}

/// Fallback extractor that decodes bytes as UTF-8, used where no real PDF
/// extractor is wired in.
pub struct Utf8TextExtraction;

impl TextExtraction for Utf8TextExtraction {
    fn extract_pdf_text(&self, bytes: &[u8]) -> Result<String, Error> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}
