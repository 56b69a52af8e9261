pub mod llm;
pub mod pdfium;

pub use llm::OpenAiStudyAdapter;
pub use pdfium::PdfiumEngine;
