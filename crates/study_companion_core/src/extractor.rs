//! crates/study_companion_core/src/extractor.rs
//!
//! Turns an uploaded file into text or inline image parts for the model.
//!
//! PDFs with a real text layer are sent as text. Scans and other low-text PDFs are
//! rasterized instead, since the model can read page images directly.

use base64::Engine;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{ExtractedContent, ImagePart, SourceKind, UploadedFile};
use crate::error::ExtractionError;
use crate::ports::PdfEngine;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Tunables for the text-versus-scan decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionPolicy {
    /// Below this many non-whitespace characters a PDF is treated as a scan.
    pub min_meaningful_chars: usize,
    /// How many leading pages of a scan are rasterized.
    pub max_scan_pages: usize,
    pub render_scale: f32,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            min_meaningful_chars: 100,
            max_scan_pages: 5,
            render_scale: 1.5,
        }
    }
}

/// Maps a file to `(kind, image mime type)` using the magic bytes first, then the
/// browser-reported MIME type, then the extension.
pub fn detect_source_kind(file: &UploadedFile) -> Result<(SourceKind, Option<String>), ExtractionError> {
    if let Some(mime) = sniff_image_mime(&file.bytes) {
        return Ok((SourceKind::Image, Some(mime.to_string())));
    }
    if file.bytes.starts_with(PDF_MAGIC) {
        return Ok((SourceKind::Pdf, None));
    }

    let mime = file.mime_type.as_deref().unwrap_or_default().to_ascii_lowercase();
    if mime == "application/pdf" {
        return Ok((SourceKind::Pdf, None));
    }
    if mime.starts_with("image/") {
        return Ok((SourceKind::Image, Some(mime)));
    }

    let extension = file
        .file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => Ok((SourceKind::Pdf, None)),
        "png" => Ok((SourceKind::Image, Some("image/png".into()))),
        "jpg" | "jpeg" => Ok((SourceKind::Image, Some("image/jpeg".into()))),
        "gif" => Ok((SourceKind::Image, Some("image/gif".into()))),
        "webp" => Ok((SourceKind::Image, Some("image/webp".into()))),
        "bmp" => Ok((SourceKind::Image, Some("image/bmp".into()))),
        _ => Err(ExtractionError::Unsupported(file.file_name.clone())),
    }
}

fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if is_bmp(bytes) {
        Some("image/bmp")
    } else {
        None
    }
}

/// `BM` alone is too weak a signature, so the DIB header size must be a known one too.
fn is_bmp(bytes: &[u8]) -> bool {
    if bytes.len() < 18 || !bytes.starts_with(b"BM") {
        return false;
    }
    let header_size = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
    matches!(header_size, 12 | 40 | 52 | 56 | 64 | 108 | 124)
}

fn meaningful_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Extracts content from uploaded files through the opaque PDF engine.
#[derive(Clone)]
pub struct Extractor {
    pdf: Arc<dyn PdfEngine>,
    policy: ExtractionPolicy,
}

impl Extractor {
    pub fn new(pdf: Arc<dyn PdfEngine>, policy: ExtractionPolicy) -> Self {
        Self { pdf, policy }
    }

    pub async fn extract(&self, file: &UploadedFile) -> Result<ExtractedContent, ExtractionError> {
        if file.bytes.is_empty() {
            return Err(ExtractionError::Empty);
        }
        match detect_source_kind(file)? {
            (SourceKind::Image, mime) => {
                debug!("Sending '{}' to the model as an inline image.", file.file_name);
                Ok(ExtractedContent::Image {
                    parts: vec![ImagePart {
                        mime_type: mime.unwrap_or_else(|| "image/png".to_string()),
                        base64_data: base64::engine::general_purpose::STANDARD.encode(&file.bytes),
                    }],
                })
            }
            (SourceKind::Pdf, _) => self.extract_pdf(file).await,
        }
    }

    async fn extract_pdf(&self, file: &UploadedFile) -> Result<ExtractedContent, ExtractionError> {
        let pages = self.pdf.page_texts(&file.bytes).await?;
        let text = pages
            .iter()
            .map(|page| page.trim())
            .collect::<Vec<_>>()
            .join("\n\n");
        let chars = meaningful_chars(&text);

        if chars >= self.policy.min_meaningful_chars {
            info!(
                "Extracted {} characters of text from {} pages of '{}'.",
                chars,
                pages.len(),
                file.file_name
            );
            return Ok(ExtractedContent::Text {
                content: text.trim().to_string(),
            });
        }

        info!(
            "'{}' has only {} characters of text; rasterizing up to {} pages.",
            file.file_name, chars, self.policy.max_scan_pages
        );
        let parts = self
            .pdf
            .render_pages(&file.bytes, self.policy.max_scan_pages, self.policy.render_scale)
            .await?;
        if parts.is_empty() {
            return Err(ExtractionError::Empty);
        }
        Ok(ExtractedContent::Image { parts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPdfEngine;
    use bytes::Bytes;

    fn file(name: &str, mime: Option<&str>, bytes: &'static [u8]) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            mime_type: mime.map(str::to_string),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[test]
    fn detects_kinds_from_magic_mime_and_extension() {
        let png = file("x.bin", None, &[0x89, b'P', b'N', b'G', 0x0D]);
        assert_eq!(
            detect_source_kind(&png).unwrap(),
            (SourceKind::Image, Some("image/png".into()))
        );
        let pdf = file("upload", None, b"%PDF-1.7 ...");
        assert_eq!(detect_source_kind(&pdf).unwrap().0, SourceKind::Pdf);
        let by_mime = file("scan", Some("image/jpeg"), b"....");
        assert_eq!(detect_source_kind(&by_mime).unwrap().1.as_deref(), Some("image/jpeg"));
        let by_ext = file("Notes.PDF", None, b"....");
        assert_eq!(detect_source_kind(&by_ext).unwrap().0, SourceKind::Pdf);
        let unknown = file("notes.docx", None, b"PK..");
        assert!(matches!(
            detect_source_kind(&unknown),
            Err(ExtractionError::Unsupported(_))
        ));
    }

    #[test]
    fn bmp_needs_a_real_header() {
        let mut header = vec![0u8; 26];
        header[..2].copy_from_slice(b"BM");
        header[14] = 40;
        let bmp = UploadedFile {
            file_name: "scan".into(),
            mime_type: None,
            bytes: Bytes::from(header),
        };
        assert_eq!(detect_source_kind(&bmp).unwrap().1.as_deref(), Some("image/bmp"));

        let prose = file("notes.txt", Some("text/plain"), b"BMW owners manual, chapter one");
        assert!(matches!(
            detect_source_kind(&prose),
            Err(ExtractionError::Unsupported(_))
        ));
        let pdf = file("report.pdf", None, b"BM notes exported without a header");
        assert_eq!(detect_source_kind(&pdf).unwrap().0, SourceKind::Pdf);
    }

    #[tokio::test]
    async fn images_are_passed_through_inline() {
        let extractor = Extractor::new(Arc::new(MockPdfEngine::default()), ExtractionPolicy::default());
        let content = extractor
            .extract(&file("photo.jpg", Some("image/jpeg"), b"\xFF\xD8\xFFdata"))
            .await
            .unwrap();
        let ExtractedContent::Image { parts } = content else {
            panic!("expected image parts");
        };
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].mime_type, "image/jpeg");
        assert_eq!(parts[0].base64_data, "/9j/ZGF0YQ==");
    }

    #[tokio::test]
    async fn text_pdf_pages_are_joined_with_blank_lines() {
        let page = "word ".repeat(30);
        let engine = MockPdfEngine::with_pages(vec![page.clone(), page.clone()]);
        let extractor = Extractor::new(Arc::new(engine.clone()), ExtractionPolicy::default());
        let content = extractor.extract(&file("a.pdf", None, b"%PDF-1.4")).await.unwrap();
        assert_eq!(
            content,
            ExtractedContent::Text {
                content: format!("{}\n\n{}", page.trim(), page.trim())
            }
        );
        assert_eq!(engine.render_calls(), 0);
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let extractor = Extractor::new(Arc::new(MockPdfEngine::default()), ExtractionPolicy::default());
        let result = extractor.extract(&file("a.pdf", None, b"")).await;
        assert!(matches!(result, Err(ExtractionError::Empty)));
    }

    #[tokio::test]
    async fn engine_failures_propagate() {
        let engine = MockPdfEngine::unavailable();
        let extractor = Extractor::new(Arc::new(engine), ExtractionPolicy::default());
        let result = extractor.extract(&file("a.pdf", None, b"%PDF-1.4")).await;
        assert!(matches!(result, Err(ExtractionError::DependencyUnavailable(_))));
    }
}
