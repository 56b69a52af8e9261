pub mod chat_task;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers to make them easily accessible
// to the binary that builds the web server router.
pub use rest::{
    delete_document_handler, export_summary_handler, get_document_handler, get_quiz_handler,
    list_documents_handler, next_question_handler, restart_quiz_handler, select_document_handler,
    select_option_handler, send_message_handler, set_model_handler, submit_answer_handler,
    upload_document_handler,
};
pub use ws_handler::ws_handler;
