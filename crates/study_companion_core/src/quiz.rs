//! crates/study_companion_core/src/quiz.rs
//!
//! Detects and validates the `<quiz_data>` block the model embeds in a chat reply
//! when the user asks for a quiz.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::QuizFormatError;

pub const QUIZ_OPEN_TAG: &str = "<quiz_data>";
pub const QUIZ_CLOSE_TAG: &str = "</quiz_data>";

static QUIZ_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<quiz_data>(.*?)</quiz_data>").expect("quiz block pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizData {
    pub title: String,
    pub questions: Vec<QuizQuestion>,
}

impl QuizData {
    /// Checks that there is at least one question and every answer index is in range.
    pub fn validate(&self) -> Result<(), QuizFormatError> {
        if self.questions.is_empty() {
            return Err(QuizFormatError::NoQuestions);
        }
        for (question, q) in self.questions.iter().enumerate() {
            if q.correct_answer_index >= q.options.len() {
                return Err(QuizFormatError::AnswerOutOfRange {
                    question,
                    index: q.correct_answer_index,
                    options: q.options.len(),
                });
            }
        }
        Ok(())
    }

    /// Serializes the quiz into the delimited block format the model is asked to produce.
    pub fn to_block(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{QUIZ_OPEN_TAG}{}{QUIZ_CLOSE_TAG}",
            serde_json::to_string(self)?
        ))
    }
}

/// The result of scanning a chat reply for a quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizScan {
    NotFound,
    Found(QuizData),
    Malformed(QuizFormatError),
}

/// Scans `response` for the first `<quiz_data>…</quiz_data>` block and parses it.
pub fn try_parse_quiz(response: &str) -> QuizScan {
    let Some(inner) = QUIZ_BLOCK.captures(response).and_then(|caps| caps.get(1)) else {
        return QuizScan::NotFound;
    };
    let quiz = match serde_json::from_str::<QuizData>(inner.as_str().trim()) {
        Ok(quiz) => quiz,
        Err(e) => return QuizScan::Malformed(QuizFormatError::InvalidJson(e.to_string())),
    };
    match quiz.validate() {
        Ok(()) => QuizScan::Found(quiz),
        Err(e) => QuizScan::Malformed(e),
    }
}

/// True while a partial reply still reads as the start of a `<quiz_data>` block, so
/// streamed text can be held back until it is clearly ordinary prose.
pub fn starts_like_quiz_block(partial: &str) -> bool {
    let partial = partial.trim_start();
    partial.starts_with(QUIZ_OPEN_TAG) || QUIZ_OPEN_TAG.starts_with(partial)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QuizData {
        QuizData {
            title: "Cells".into(),
            questions: vec![QuizQuestion {
                question_text: "What is the powerhouse of the cell?".into(),
                options: vec!["Nucleus".into(), "Mitochondria".into(), "Ribosome".into()],
                correct_answer_index: 1,
                explanation: "Mitochondria produce ATP.".into(),
            }],
        }
    }

    #[test]
    fn finds_quiz_surrounded_by_text() {
        let reply = r#"Sure! <quiz_data>{"title":"T","questions":[{"questionText":"Q","options":["a","b"],"correctAnswerIndex":1,"explanation":"E"}]}</quiz_data>"#;
        let QuizScan::Found(quiz) = try_parse_quiz(reply) else {
            panic!("expected a quiz");
        };
        assert_eq!(quiz.title, "T");
        assert_eq!(quiz.questions.len(), 1);
        assert_eq!(quiz.questions[0].correct_answer_index, 1);
    }

    #[test]
    fn block_may_span_lines() {
        let reply = "<quiz_data>\n{\n \"title\": \"T\",\n \"questions\": [{\"questionText\": \"Q\", \"options\": [\"x\"], \"correctAnswerIndex\": 0, \"explanation\": \"\"}]\n}\n</quiz_data>";
        assert!(matches!(try_parse_quiz(reply), QuizScan::Found(_)));
    }

    #[test]
    fn plain_reply_has_no_quiz() {
        assert_eq!(try_parse_quiz("The answer is 42."), QuizScan::NotFound);
        // Tags are case-sensitive.
        assert_eq!(try_parse_quiz("<QUIZ_DATA>{}</QUIZ_DATA>"), QuizScan::NotFound);
    }

    #[test]
    fn invalid_json_is_malformed_not_missing() {
        let scan = try_parse_quiz("<quiz_data>{not valid json</quiz_data>");
        assert!(matches!(
            scan,
            QuizScan::Malformed(QuizFormatError::InvalidJson(_))
        ));
    }

    #[test]
    fn out_of_range_answer_is_rejected() {
        let mut quiz = sample();
        quiz.questions[0].correct_answer_index = 3;
        let block = quiz.to_block().expect("serializes");
        assert_eq!(
            try_parse_quiz(&block),
            QuizScan::Malformed(QuizFormatError::AnswerOutOfRange {
                question: 0,
                index: 3,
                options: 3
            })
        );
    }

    #[test]
    fn empty_question_list_is_rejected() {
        let block = "<quiz_data>{\"title\":\"T\",\"questions\":[]}</quiz_data>";
        assert_eq!(
            try_parse_quiz(block),
            QuizScan::Malformed(QuizFormatError::NoQuestions)
        );
    }

    #[test]
    fn block_format_parses_back_to_the_same_quiz() {
        let quiz = sample();
        let block = quiz.to_block().expect("serializes");
        assert_eq!(try_parse_quiz(&block), QuizScan::Found(quiz));
    }

    #[test]
    fn negative_index_is_invalid_json_for_usize() {
        let block = "<quiz_data>{\"title\":\"T\",\"questions\":[{\"questionText\":\"Q\",\"options\":[\"a\"],\"correctAnswerIndex\":-1,\"explanation\":\"\"}]}</quiz_data>";
        assert!(matches!(try_parse_quiz(block), QuizScan::Malformed(_)));
    }

    #[test]
    fn malformed_scan_can_be_cloned() {
        let scan = try_parse_quiz("<quiz_data>{not json</quiz_data>");
        assert!(matches!(scan.clone(), QuizScan::Malformed(QuizFormatError::InvalidJson(_))));
        assert_eq!(scan.clone(), scan);
    }

    #[test]
    fn partial_replies_are_held_only_while_they_may_open_a_quiz() {
        assert!(starts_like_quiz_block(""));
        assert!(starts_like_quiz_block("\n<quiz"));
        assert!(starts_like_quiz_block("<quiz_data>{\"title\""));
        assert!(!starts_like_quiz_block("<b>"));
        assert!(!starts_like_quiz_block("Sure, here you go."));
    }
}
