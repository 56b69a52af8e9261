//! services/api/src/adapters/pdfium.rs
//!
//! The adapter for the `PdfEngine` port, backed by the pdfium library through
//! `pdfium-render`. pdfium is bound at call time and all work runs on the blocking
//! pool, since rendering is CPU bound and pdfium handles are not shared across tasks.

use async_trait::async_trait;
use base64::Engine;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use study_companion_core::{ports::PdfEngine, ExtractionError, ImagePart};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct PdfiumEngine {
    /// Directory to look in first; the system library is the fallback.
    library_dir: Option<PathBuf>,
}

impl PdfiumEngine {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    /// Binds a fresh pdfium instance for one operation.
    fn with_pdfium<F, R>(&self, f: F) -> Result<R, ExtractionError>
    where
        F: FnOnce(&Pdfium) -> Result<R, ExtractionError>,
    {
        let bindings = match &self.library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
                .or_else(|_| Pdfium::bind_to_system_library()),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| {
            warn!("pdfium could not be loaded: {}", e);
            ExtractionError::DependencyUnavailable(e.to_string())
        })?;
        f(&Pdfium::new(bindings))
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R, ExtractionError>
    where
        F: FnOnce(&PdfiumEngine) -> Result<R, ExtractionError> + Send + 'static,
        R: Send + 'static,
    {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| ExtractionError::Unreadable(format!("PDF worker failed: {}", e)))?
    }
}

fn unreadable(e: PdfiumError) -> ExtractionError {
    ExtractionError::Unreadable(e.to_string())
}

/// Encodes a rendered page as a base64 PNG.
fn encode_png(bitmap: &PdfBitmap) -> Result<ImagePart, ExtractionError> {
    let width = bitmap.width() as u32;
    let height = bitmap.height() as u32;
    let rgba = image::RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes()).ok_or_else(|| {
        ExtractionError::Unreadable("rendered page has an unexpected buffer size".to_string())
    })?;

    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(rgba)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| ExtractionError::Unreadable(format!("PNG encoding failed: {}", e)))?;

    Ok(ImagePart {
        mime_type: "image/png".to_string(),
        base64_data: base64::engine::general_purpose::STANDARD.encode(png),
    })
}

#[async_trait]
impl PdfEngine for PdfiumEngine {
    async fn page_texts(&self, pdf: &[u8]) -> Result<Vec<String>, ExtractionError> {
        let bytes = pdf.to_vec();
        self.run_blocking(move |engine| {
            engine.with_pdfium(|pdfium| {
                let document = pdfium
                    .load_pdf_from_byte_slice(&bytes, None)
                    .map_err(unreadable)?;
                let mut pages = Vec::new();
                for page in document.pages().iter() {
                    pages.push(page.text().map_err(unreadable)?.all());
                }
                debug!("Read text from {} pages.", pages.len());
                Ok(pages)
            })
        })
        .await
    }

    async fn render_pages(
        &self,
        pdf: &[u8],
        max_pages: usize,
        scale: f32,
    ) -> Result<Vec<ImagePart>, ExtractionError> {
        let bytes = pdf.to_vec();
        self.run_blocking(move |engine| {
            engine.with_pdfium(|pdfium| {
                let document = pdfium
                    .load_pdf_from_byte_slice(&bytes, None)
                    .map_err(unreadable)?;
                let config = PdfRenderConfig::new().scale_page_by_factor(scale);
                let mut parts = Vec::new();
                for page in document.pages().iter().take(max_pages) {
                    let bitmap = page.render_with_config(&config).map_err(unreadable)?;
                    parts.push(encode_png(&bitmap)?);
                }
                debug!("Rendered {} pages at scale {}.", parts.len(), scale);
                Ok(parts)
            })
        })
        .await
    }
}
