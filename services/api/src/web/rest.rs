//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::{extraction_error_response, library_error_response};
use crate::web::{chat_task::chat_process_detached, protocol::TurnStatus, state::AppState};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use study_companion_core::{
    detect_source_kind, markdown, markdown::Block, AnswerFeedback, ChatMessage, Document,
    LibraryError, ModelChoice, ProcessingJob, ProcessingState, QuizPhase, QuizSession, Sender,
    SourceKind, UploadedFile, UserAnswer,
};
use tracing::{error, info};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

type ApiResult<T> = Result<T, (StatusCode, String)>;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        upload_document_handler,
        list_documents_handler,
        get_document_handler,
        delete_document_handler,
        select_document_handler,
        set_model_handler,
        send_message_handler,
        get_quiz_handler,
        select_option_handler,
        submit_answer_handler,
        next_question_handler,
        restart_quiz_handler,
        export_summary_handler,
        crate::web::ws_handler::ws_handler,
    ),
    components(schemas(
        UploadResponse,
        LibraryView,
        DocumentListItem,
        DocumentView,
        MessageView,
        QuizView,
        QuestionView,
        SelectDocumentRequest,
        SetModelRequest,
        SendMessageRequest,
        SendMessageResponse,
        SelectOptionRequest,
    )),
    tags(
        (name = "Study Companion API", description = "Upload documents, chat about them and take quizzes.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub document_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct DocumentListItem {
    pub id: Uuid,
    pub file_name: String,
    #[schema(value_type = String)]
    pub source_kind: SourceKind,
    #[schema(value_type = String)]
    pub processing_state: ProcessingState,
    #[schema(value_type = String)]
    pub model: ModelChoice,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct LibraryView {
    pub documents: Vec<DocumentListItem>,
    pub active_document_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub default_model: ModelChoice,
}

/// A transcript entry with its markdown pre-rendered into blocks.
#[derive(Serialize, ToSchema)]
pub struct MessageView {
    pub id: u64,
    #[schema(value_type = String)]
    pub sender: Sender,
    pub text: String,
    pub pending: bool,
    #[schema(value_type = Vec<Object>)]
    pub blocks: Vec<Block>,
}

/// The question being answered, without its correct answer.
#[derive(Serialize, ToSchema)]
pub struct QuestionView {
    pub index: usize,
    pub question_text: String,
    pub options: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct QuizView {
    pub title: String,
    pub total: usize,
    #[schema(value_type = Object)]
    pub phase: QuizPhase,
    pub current_question: Option<QuestionView>,
    /// Present once the current answer has been submitted.
    #[schema(value_type = Option<Object>)]
    pub feedback: Option<AnswerFeedback>,
    #[schema(value_type = Vec<Object>)]
    pub answers: Vec<UserAnswer>,
    pub score: usize,
    /// Present on the results screen.
    pub percentage: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct DocumentView {
    pub id: Uuid,
    pub file_name: String,
    #[schema(value_type = String)]
    pub source_kind: SourceKind,
    #[schema(value_type = String)]
    pub processing_state: ProcessingState,
    pub error_message: Option<String>,
    #[schema(value_type = String)]
    pub model: ModelChoice,
    pub summary: Option<String>,
    #[schema(value_type = Option<Vec<Object>>)]
    pub summary_blocks: Option<Vec<Block>>,
    pub preset_questions: Option<Vec<String>>,
    pub chat_history: Vec<MessageView>,
    pub turn_in_flight: bool,
    pub quiz: Option<QuizView>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, ToSchema)]
pub struct SelectDocumentRequest {
    pub document_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct SetModelRequest {
    #[schema(value_type = String)]
    pub model: ModelChoice,
}

#[derive(Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Serialize, ToSchema)]
pub struct SendMessageResponse {
    pub message_id: u64,
    #[schema(value_type = String)]
    pub status: TurnStatus,
    pub text: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SelectOptionRequest {
    pub option: usize,
}

#[derive(Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    #[default]
    Plain,
    Html,
    Markdown,
}

#[derive(Deserialize, IntoParams)]
pub struct SummaryQuery {
    /// `plain` (default), `html` or `markdown`.
    #[param(value_type = Option<String>)]
    pub format: Option<SummaryFormat>,
}

//=========================================================================================
// View Builders
//=========================================================================================

fn message_view(message: &ChatMessage) -> MessageView {
    MessageView {
        id: message.id,
        sender: message.sender,
        text: message.text.clone(),
        pending: message.pending,
        blocks: markdown::render(&message.text),
    }
}

pub fn quiz_view(session: &QuizSession) -> QuizView {
    QuizView {
        title: session.quiz().title.clone(),
        total: session.total(),
        phase: session.phase(),
        current_question: session.current_question().map(|(index, q)| QuestionView {
            index,
            question_text: q.question_text.clone(),
            options: q.options.clone(),
        }),
        feedback: session.feedback(),
        answers: session.answers().to_vec(),
        score: session.score(),
        percentage: session.is_finished().then(|| session.percentage()),
    }
}

pub fn document_view(document: &Document) -> DocumentView {
    DocumentView {
        id: document.id,
        file_name: document.file_name.clone(),
        source_kind: document.source_kind,
        processing_state: document.processing_state,
        error_message: document.error_message.clone(),
        model: document.model,
        summary: document.summary.clone(),
        summary_blocks: document.summary.as_deref().map(markdown::render),
        preset_questions: document.preset_questions.clone(),
        chat_history: document.chat_history.iter().map(message_view).collect(),
        turn_in_flight: document.is_turn_in_flight(),
        quiz: document.quiz.as_ref().map(quiz_view),
        created_at: document.created_at,
    }
}

fn list_item(document: &Document) -> DocumentListItem {
    DocumentListItem {
        id: document.id,
        file_name: document.file_name.clone(),
        source_kind: document.source_kind,
        processing_state: document.processing_state,
        model: document.model,
        created_at: document.created_at,
    }
}

/// Parses the optional `model` form field.
pub fn parse_model_field(value: &str) -> Result<ModelChoice, (StatusCode, String)> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fast" => Ok(ModelChoice::Fast),
        "pro" => Ok(ModelChoice::Pro),
        other => Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown model '{}'; expected 'fast' or 'pro'", other),
        )),
    }
}

//=========================================================================================
// Document Handlers
//=========================================================================================

/// Upload a PDF or image and start processing it.
///
/// Accepts a multipart/form-data request with a `file` part and an optional
/// `model` part (`fast` or `pro`). The new document becomes the active one.
#[utoipa::path(
    post,
    path = "/documents",
    request_body(content_type = "multipart/form-data", description = "The document to upload."),
    responses(
        (status = 201, description = "Document accepted; processing has started", body = UploadResponse),
        (status = 400, description = "Bad request (e.g., missing or empty file)"),
        (status = 413, description = "File too large"),
        (status = 415, description = "Unsupported file type")
    )
)]
pub async fn upload_document_handler(
    State(app_state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut upload: Option<UploadedFile> = None;
    let mut model: Option<ModelChoice> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        match field.name() {
            Some("model") => {
                let value = field.text().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read model field: {}", e),
                    )
                })?;
                model = Some(parse_model_field(&value)?);
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or("untitled").to_string();
                let mime_type = field.content_type().map(str::to_string);
                let bytes: Bytes = field.bytes().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read file bytes: {}", e),
                    )
                })?;
                upload = Some(UploadedFile {
                    file_name,
                    mime_type,
                    bytes,
                });
            }
            _ => {}
        }
    }

    let Some(file) = upload else {
        return Err((
            StatusCode::BAD_REQUEST,
            "Multipart form must include a file".to_string(),
        ));
    };
    if file.bytes.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "The uploaded file is empty".to_string()));
    }
    if file.bytes.len() > app_state.config.max_upload_bytes {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "The file exceeds the {} byte upload limit",
                app_state.config.max_upload_bytes
            ),
        ));
    }
    let (source_kind, _) = detect_source_kind(&file).map_err(extraction_error_response)?;

    let (document_id, cancellation_token, model) = {
        let mut library = app_state.library.lock().await;
        let (id, token) = library.add_document(file.file_name.clone(), source_kind, model);
        let model = library.get(id).map(|d| d.model).map_err(library_error_response)?;
        (id, token, model)
    };
    info!(
        "Accepted '{}' ({} bytes) as document {}.",
        file.file_name,
        file.bytes.len(),
        document_id
    );

    let processor = app_state.processor.clone();
    let events = app_state.events.clone();
    tokio::spawn(async move {
        processor
            .process(
                ProcessingJob {
                    document_id,
                    file,
                    model,
                    cancellation_token,
                },
                events,
            )
            .await;
    });

    Ok((StatusCode::CREATED, Json(UploadResponse { document_id })))
}

/// List every open document with the active selection and default model.
#[utoipa::path(
    get,
    path = "/documents",
    responses((status = 200, description = "The document library", body = LibraryView))
)]
pub async fn list_documents_handler(State(app_state): State<Arc<AppState>>) -> Json<LibraryView> {
    let library = app_state.library.lock().await;
    Json(LibraryView {
        documents: library.documents().iter().map(list_item).collect(),
        active_document_id: library.active(),
        default_model: library.default_model(),
    })
}

/// Everything the UI renders for one document.
#[utoipa::path(
    get,
    path = "/documents/{id}",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "The document", body = DocumentView),
        (status = 404, description = "Document not found")
    )
)]
pub async fn get_document_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentView>> {
    let library = app_state.library.lock().await;
    let document = library.get(id).map_err(library_error_response)?;
    Ok(Json(document_view(document)))
}

/// Remove a document, cancelling any processing or chat still running for it.
#[utoipa::path(
    delete,
    path = "/documents/{id}",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 204, description = "Document removed"),
        (status = 404, description = "Document not found")
    )
)]
pub async fn delete_document_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    app_state
        .library
        .lock()
        .await
        .remove(id)
        .map_err(library_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/library/active",
    request_body = SelectDocumentRequest,
    responses(
        (status = 204, description = "Active document changed"),
        (status = 404, description = "Document not found")
    )
)]
pub async fn select_document_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<SelectDocumentRequest>,
) -> ApiResult<StatusCode> {
    app_state
        .library
        .lock()
        .await
        .select(request.document_id)
        .map_err(library_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Set the model used for documents uploaded from now on.
#[utoipa::path(
    put,
    path = "/library/model",
    request_body = SetModelRequest,
    responses((status = 204, description = "Default model changed"))
)]
pub async fn set_model_handler(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<SetModelRequest>,
) -> StatusCode {
    app_state.library.lock().await.set_default_model(request.model);
    StatusCode::NO_CONTENT
}

//=========================================================================================
// Chat Handlers
//=========================================================================================

/// Send a chat message and wait for the whole reply.
///
/// The WebSocket at `/documents/{id}/chat` streams the same turn incrementally.
#[utoipa::path(
    post,
    path = "/documents/{id}/messages",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "The finished turn", body = SendMessageResponse),
        (status = 404, description = "Document not found"),
        (status = 409, description = "Document not ready, or a reply is still being generated")
    )
)]
pub async fn send_message_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Json<SendMessageResponse>> {
    let text = request.text.trim().to_string();
    if text.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message text is empty".to_string()));
    }
    // The turn outlives a dropped request so the document is never left mid-turn.
    let report = chat_process_detached(app_state, id, text, None)
        .await
        .map_err(|e| {
            error!("Chat turn task for document {} failed: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Chat turn failed".to_string(),
            )
        })?
        .map_err(library_error_response)?;
    Ok(Json(SendMessageResponse {
        message_id: report.message_id,
        status: TurnStatus::from(&report.outcome),
        text: report.text,
    }))
}

/// Plain text, HTML or raw markdown of the summary, for the clipboard or export.
#[utoipa::path(
    get,
    path = "/documents/{id}/summary",
    params(("id" = Uuid, Path, description = "Document id"), SummaryQuery),
    responses(
        (status = 200, description = "The summary in the requested format", body = String, content_type = "text/plain"),
        (status = 404, description = "Document not found"),
        (status = 409, description = "The summary is not ready yet")
    )
)]
pub async fn export_summary_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<impl IntoResponse> {
    let library = app_state.library.lock().await;
    let document = library.get(id).map_err(library_error_response)?;
    let summary = document.summary.as_deref().ok_or_else(|| {
        library_error_response(LibraryError::NotReady(document.processing_state))
    })?;

    let (content_type, body) = match query.format.unwrap_or_default() {
        SummaryFormat::Plain => (
            "text/plain; charset=utf-8",
            markdown::to_plain_text(&markdown::render(summary)),
        ),
        SummaryFormat::Html => (
            "text/html; charset=utf-8",
            markdown::to_html(&markdown::render(summary)),
        ),
        SummaryFormat::Markdown => ("text/markdown; charset=utf-8", summary.to_string()),
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body))
}

//=========================================================================================
// Quiz Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/documents/{id}/quiz",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "The current quiz", body = QuizView),
        (status = 404, description = "No such document or no quiz yet")
    )
)]
pub async fn get_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QuizView>> {
    let library = app_state.library.lock().await;
    let quiz = library.quiz(id).map_err(library_error_response)?;
    Ok(Json(quiz_view(quiz)))
}

#[utoipa::path(
    post,
    path = "/documents/{id}/quiz/select",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = SelectOptionRequest,
    responses(
        (status = 200, description = "Option selected", body = QuizView),
        (status = 400, description = "Option out of range"),
        (status = 409, description = "Not answering a question")
    )
)]
pub async fn select_option_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SelectOptionRequest>,
) -> ApiResult<Json<QuizView>> {
    let mut library = app_state.library.lock().await;
    let quiz = library
        .select_option(id, request.option)
        .map_err(library_error_response)?;
    Ok(Json(quiz_view(quiz)))
}

/// Grade the selected option and reveal the answer and explanation.
#[utoipa::path(
    post,
    path = "/documents/{id}/quiz/submit",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Answer graded", body = QuizView),
        (status = 409, description = "Nothing selected, or not answering")
    )
)]
pub async fn submit_answer_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QuizView>> {
    let mut library = app_state.library.lock().await;
    let answer = library.submit_answer(id).map_err(library_error_response)?;
    info!(
        "Question {} on document {} answered {}.",
        answer.question_index + 1,
        id,
        if answer.is_correct { "correctly" } else { "incorrectly" }
    );
    let quiz = library.quiz(id).map_err(library_error_response)?;
    Ok(Json(quiz_view(quiz)))
}

#[utoipa::path(
    post,
    path = "/documents/{id}/quiz/next",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Moved to the next question or the results", body = QuizView),
        (status = 409, description = "The current answer has not been submitted")
    )
)]
pub async fn next_question_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QuizView>> {
    let mut library = app_state.library.lock().await;
    let quiz = library.next_question(id).map_err(library_error_response)?;
    Ok(Json(quiz_view(quiz)))
}

#[utoipa::path(
    post,
    path = "/documents/{id}/quiz/restart",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "Back at the first question", body = QuizView),
        (status = 404, description = "No such document or no quiz yet")
    )
)]
pub async fn restart_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QuizView>> {
    let mut library = app_state.library.lock().await;
    let quiz = library.restart_quiz(id).map_err(|e| {
        error!("Quiz restart failed: {}", e);
        library_error_response(e)
    })?;
    Ok(Json(quiz_view(quiz)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_companion_core::{QuizData, QuizQuestion};

    #[test]
    fn model_field_accepts_both_tiers() {
        assert_eq!(parse_model_field(" Pro ").unwrap(), ModelChoice::Pro);
        assert_eq!(parse_model_field("fast").unwrap(), ModelChoice::Fast);
        assert_eq!(
            parse_model_field("turbo").unwrap_err().0,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn summary_format_defaults_to_plain() {
        let query: SummaryQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.format.unwrap_or_default(), SummaryFormat::Plain);
        let query: SummaryQuery = serde_json::from_str(r#"{"format":"html"}"#).unwrap();
        assert_eq!(query.format, Some(SummaryFormat::Html));
    }

    #[test]
    fn quiz_view_hides_feedback_until_submitted() {
        let mut session = QuizSession::new(QuizData {
            title: "T".into(),
            questions: vec![QuizQuestion {
                question_text: "Q".into(),
                options: vec!["a".into(), "b".into()],
                correct_answer_index: 1,
                explanation: "E".into(),
            }],
        });
        let view = quiz_view(&session);
        assert!(view.feedback.is_none());
        assert_eq!(view.current_question.as_ref().map(|q| q.index), Some(0));
        assert!(view.percentage.is_none());

        session.select_option(1).unwrap();
        session.submit().unwrap();
        let view = quiz_view(&session);
        assert_eq!(view.feedback.as_ref().map(|f| f.correct_answer_index), Some(1));

        session.next().unwrap();
        let view = quiz_view(&session);
        assert!(view.current_question.is_none());
        assert_eq!(view.percentage, Some(100));
    }

    #[test]
    fn document_view_renders_markdown() {
        let mut document = Document::new("a.pdf".into(), SourceKind::Pdf, ModelChoice::Fast);
        document.summary = Some("# Title\n\n* **point**".into());
        let view = document_view(&document);
        assert_eq!(view.summary_blocks.as_ref().map(Vec::len), Some(2));
        assert!(view.chat_history.is_empty());
        assert!(!view.turn_in_flight);
    }
}
