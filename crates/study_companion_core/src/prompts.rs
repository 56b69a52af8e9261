//! crates/study_companion_core/src/prompts.rs
//!
//! Every instruction sent to the model and every canned message shown to the user.

use serde_json::json;

/// The fixed persona for the per-document chat session.
pub const SYSTEM_INSTRUCTIONS: &str = r#"You are a friendly, encouraging study companion helping a student understand ONE document.

The first user turn of this conversation contains the document (as text or as page images). Everything you say must be grounded in that document.

Your role:
- Explain ideas from the document clearly, using simple language first and more detail when asked.
- Use markdown: short paragraphs, **bold** for key terms, bullet lists for steps or enumerations, `code` for formulas or code.
- Keep answers focused. A few short paragraphs is usually enough.

Scope:
- ONLY answer questions about the content of the document.
- If a question is not covered by the document, reply with: "I'm sorry, but I can only answer questions about the document you've uploaded. Is there something in it you'd like to explore?"
- Never invent facts that are not supported by the document.

Quizzes:
When the user asks for a quiz, test, or practice questions, reply with ONLY a quiz block and nothing else: no greeting, no explanation, no markdown fences:
<quiz_data>
{"title": "Quiz title", "questions": [{"questionText": "…", "options": ["…", "…", "…", "…"], "correctAnswerIndex": 0, "explanation": "…"}]}
</quiz_data>
Rules for the quiz block:
- The content between the tags must be a single valid JSON object.
- Write 5 questions unless the user asks for a different number.
- Each question has 2 to 4 options; "correctAnswerIndex" is the 0-based index of the correct option.
- "explanation" briefly says why the correct option is right, citing the document."#;

/// The scripted first model turn that acknowledges the seeded document.
pub const SEED_ACKNOWLEDGEMENT: &str =
    "Got it! I've read the document carefully and I'm ready to answer your questions about it.";

/// Leads the first user turn when the document is text.
pub const DOCUMENT_TEXT_PREAMBLE: &str = "Here is the document I want to study:";

/// Leads the first user turn when the document is a set of images.
pub const DOCUMENT_IMAGES_PREAMBLE: &str =
    "Here are the pages of the document I want to study. Read them carefully:";

pub const SUMMARY_PROMPT: &str = r#"Summarize the attached document for a student who is about to study it.

Format the summary in markdown:
- Start with a level-1 heading (# ) containing a short title for the document.
- Follow with a one-paragraph overview.
- Use level-2 headings (## ) for the main sections and bullet lists (* ) for key points; nest sub-points by indenting them.
- Put **key terms** in bold and formulas or code in `backticks`.
- End with a `## Key Takeaways` section of 3 to 5 bullets.

Only use information from the document. Do not add a preamble such as 'Here is a summary'."#;

pub const QUESTIONS_PROMPT: &str = r#"Based on the attached document, write exactly 5 short questions a student might ask to start studying it.

Requirements:
- Each question starts with a single relevant emoji followed by a space.
- Each question contains exactly one key phrase wrapped in **double asterisks**.
- Keep each question under 12 words.
- Exactly one of the questions must ask for a quiz on the document (for example "🧠 Can you **quiz me** on this?").

Return a JSON array of 5 strings and nothing else."#;

/// The first bot message shown once a document is ready.
pub const GREETING: &str = "Hi! I've read your document. Ask me anything about it, or pick one of the suggested questions to get started.";

pub const CHAT_ERROR_APOLOGY: &str =
    "I'm sorry, something went wrong while I was answering. Please try again.";

pub const QUIZ_FORMAT_APOLOGY: &str =
    "I'm sorry, there was an error in the format of the quiz I created. Please ask me for a quiz again.";

pub const QUIZ_CRAFTING: &str = "Crafting your quiz… ✍️";

pub fn quiz_ready(title: &str, questions: usize) -> String {
    format!("Your quiz **{title}** is ready! It has {questions} questions. Good luck! 🍀")
}

/// Used when the generated starter questions cannot be parsed.
pub const FALLBACK_QUESTIONS: [&str; 5] = [
    "💡 What is the **main idea** of this document?",
    "📝 Can you **summarize the key points**?",
    "🔍 What are the **most important terms** here?",
    "🤔 How does this **apply in practice**?",
    "🧠 Can you **create a quiz** for me?",
];

pub fn fallback_questions() -> Vec<String> {
    FALLBACK_QUESTIONS.iter().map(|q| q.to_string()).collect()
}

/// JSON schema for the starter question list.
pub fn questions_schema() -> serde_json::Value {
    json!({
        "type": "array",
        "items": { "type": "string" },
        "minItems": 5,
        "maxItems": 5
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prompt_asks_for_the_takeaways_section() {
        assert!(SUMMARY_PROMPT.contains("## Key Takeaways"));
        assert!(SUMMARY_PROMPT.ends_with("'Here is a summary'."));
    }

    #[test]
    fn fallback_list_has_five_questions() {
        assert_eq!(fallback_questions().len(), 5);
        assert_eq!(questions_schema()["maxItems"], 5);
    }
}
