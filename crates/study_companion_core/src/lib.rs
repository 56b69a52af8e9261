pub mod domain;
pub mod error;
pub mod extractor;
pub mod library;
pub mod markdown;
pub mod mock;
pub mod orchestrator;
pub mod ports;
pub mod prompts;
pub mod quiz;
pub mod quiz_session;

pub use domain::{
    ChatMessage, ChatSession, ChatTurn, ContentPart, Document, ExtractedContent, ImagePart,
    ModelChoice, ProcessingState, Sender, SourceKind, TurnRole, UploadedFile,
};
pub use error::{
    ChatRequestError, ExtractionError, GenerationError, LibraryError, QuizActionError,
    QuizFormatError,
};
pub use extractor::{detect_source_kind, ExtractionPolicy, Extractor};
pub use library::{apply_events, DocumentEvent, DocumentEventKind, Library, TurnOutcome, TurnTicket};
pub use orchestrator::{DocumentProcessor, ModelCatalog, ProcessingError, ProcessingJob};
pub use ports::{ChatService, GenerationService, PdfEngine, PortError, PortResult, TextStream};
pub use quiz::{starts_like_quiz_block, try_parse_quiz, QuizData, QuizQuestion, QuizScan};
pub use quiz_session::{AnswerFeedback, QuizPhase, QuizSession, UserAnswer};
