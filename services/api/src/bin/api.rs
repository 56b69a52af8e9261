//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{OpenAiStudyAdapter, PdfiumEngine},
    config::Config,
    error::ApiError,
    web::{
        delete_document_handler, export_summary_handler, get_document_handler, get_quiz_handler,
        list_documents_handler, next_question_handler, restart_quiz_handler, rest::ApiDoc,
        select_document_handler, select_option_handler, send_message_handler, set_model_handler,
        state::AppState, submit_answer_handler, upload_document_handler, ws_handler,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use study_companion_core::{
    apply_events, DocumentProcessor, ExtractionPolicy, Extractor, Library, ModelCatalog,
    ModelChoice,
};
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.gemini_api_key)
        .with_api_base(&config.llm_api_base);
    let llm_adapter = Arc::new(OpenAiStudyAdapter::new(Client::with_config(openai_config)));
    let pdf_engine = Arc::new(PdfiumEngine::new(config.pdfium_library_dir.clone()));

    let processor = DocumentProcessor::new(
        Extractor::new(pdf_engine, ExtractionPolicy::default()),
        llm_adapter.clone(),
        llm_adapter.clone(),
        ModelCatalog {
            fast: config.fast_model.clone(),
            pro: config.pro_model.clone(),
        },
    );
    info!(
        "Models: fast = '{}', pro = '{}'.",
        config.fast_model, config.pro_model
    );

    // --- 3. Build the Shared AppState ---
    let library = Arc::new(Mutex::new(Library::new(ModelChoice::Fast)));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(apply_events(library.clone(), events_rx));

    let app_state = Arc::new(AppState {
        library,
        processor,
        chat: llm_adapter,
        events: events_tx,
        config: config.clone(),
    });

    // --- 4. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    let api_router = Router::new()
        .route(
            "/documents",
            post(upload_document_handler).get(list_documents_handler),
        )
        .route(
            "/documents/{id}",
            get(get_document_handler).delete(delete_document_handler),
        )
        .route("/documents/{id}/messages", post(send_message_handler))
        .route("/documents/{id}/chat", get(ws_handler))
        .route("/documents/{id}/summary", get(export_summary_handler))
        .route("/documents/{id}/quiz", get(get_quiz_handler))
        .route("/documents/{id}/quiz/select", post(select_option_handler))
        .route("/documents/{id}/quiz/submit", post(submit_answer_handler))
        .route("/documents/{id}/quiz/next", post(next_question_handler))
        .route("/documents/{id}/quiz/restart", post(restart_quiz_handler))
        .route("/library/active", put(select_document_handler))
        .route("/library/model", put(set_model_handler))
        // Multipart framing needs a little room on top of the file itself.
        .layer(DefaultBodyLimit::max(config.max_upload_bytes + 64 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
