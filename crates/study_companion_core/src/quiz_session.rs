//! crates/study_companion_core/src/quiz_session.rs
//!
//! The state machine that drives one quiz: answering, submitted, results.

use serde::Serialize;

use crate::error::QuizActionError;
use crate::quiz::{QuizData, QuizQuestion};

/// Where the user is within the quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum QuizPhase {
    Answering {
        question_index: usize,
        selected: Option<usize>,
    },
    Submitted {
        question_index: usize,
    },
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserAnswer {
    pub question_index: usize,
    pub selected_option_index: usize,
    pub is_correct: bool,
}

/// What the user sees after submitting an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerFeedback {
    pub is_correct: bool,
    pub selected_option_index: usize,
    pub correct_answer_index: usize,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSession {
    quiz: QuizData,
    phase: QuizPhase,
    answers: Vec<UserAnswer>,
}

impl QuizSession {
    /// Starts a session at the first question. `quiz` must already be validated.
    pub fn new(quiz: QuizData) -> Self {
        Self {
            quiz,
            phase: QuizPhase::Answering {
                question_index: 0,
                selected: None,
            },
            answers: Vec::new(),
        }
    }

    pub fn quiz(&self) -> &QuizData {
        &self.quiz
    }

    pub fn phase(&self) -> QuizPhase {
        self.phase
    }

    pub fn answers(&self) -> &[UserAnswer] {
        &self.answers
    }

    pub fn total(&self) -> usize {
        self.quiz.questions.len()
    }

    /// The question being answered or reviewed; `None` on the results screen.
    pub fn current_question(&self) -> Option<(usize, &QuizQuestion)> {
        let index = match self.phase {
            QuizPhase::Answering { question_index, .. } | QuizPhase::Submitted { question_index } => {
                question_index
            }
            QuizPhase::Results => return None,
        };
        self.quiz.questions.get(index).map(|q| (index, q))
    }

    pub fn select_option(&mut self, option: usize) -> Result<(), QuizActionError> {
        let QuizPhase::Answering {
            question_index,
            selected,
        } = &mut self.phase
        else {
            return Err(QuizActionError::NotAnswering);
        };
        let options = self.quiz.questions[*question_index].options.len();
        if option >= options {
            return Err(QuizActionError::OptionOutOfRange {
                index: option,
                options,
            });
        }
        *selected = Some(option);
        Ok(())
    }

    /// Grades the selected option. Without a selection nothing changes.
    pub fn submit(&mut self) -> Result<&UserAnswer, QuizActionError> {
        let QuizPhase::Answering {
            question_index,
            selected,
        } = self.phase
        else {
            return Err(QuizActionError::NotAnswering);
        };
        let selected = selected.ok_or(QuizActionError::NothingSelected)?;
        let question = &self.quiz.questions[question_index];
        self.answers.push(UserAnswer {
            question_index,
            selected_option_index: selected,
            is_correct: selected == question.correct_answer_index,
        });
        self.phase = QuizPhase::Submitted { question_index };
        Ok(&self.answers[self.answers.len() - 1])
    }

    /// The correct answer and explanation, revealed once the current answer is submitted.
    pub fn feedback(&self) -> Option<AnswerFeedback> {
        let QuizPhase::Submitted { question_index } = self.phase else {
            return None;
        };
        let answer = self
            .answers
            .iter()
            .rev()
            .find(|a| a.question_index == question_index)?;
        let question = &self.quiz.questions[question_index];
        Some(AnswerFeedback {
            is_correct: answer.is_correct,
            selected_option_index: answer.selected_option_index,
            correct_answer_index: question.correct_answer_index,
            explanation: question.explanation.clone(),
        })
    }

    pub fn next(&mut self) -> Result<(), QuizActionError> {
        let QuizPhase::Submitted { question_index } = self.phase else {
            return Err(QuizActionError::NotSubmitted);
        };
        let next = question_index + 1;
        self.phase = if next < self.total() {
            QuizPhase::Answering {
                question_index: next,
                selected: None,
            }
        } else {
            QuizPhase::Results
        };
        Ok(())
    }

    pub fn restart(&mut self) {
        self.answers.clear();
        self.phase = QuizPhase::Answering {
            question_index: 0,
            selected: None,
        };
    }

    pub fn score(&self) -> usize {
        self.answers.iter().filter(|a| a.is_correct).count()
    }

    /// `round(score / total × 100)`.
    pub fn percentage(&self) -> u32 {
        if self.total() == 0 {
            return 0;
        }
        (self.score() as f64 / self.total() as f64 * 100.0).round() as u32
    }

    pub fn is_finished(&self) -> bool {
        self.phase == QuizPhase::Results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiz(correct: &[usize]) -> QuizData {
        QuizData {
            title: "Quiz".into(),
            questions: correct
                .iter()
                .enumerate()
                .map(|(i, &c)| QuizQuestion {
                    question_text: format!("Q{i}"),
                    options: vec!["a".into(), "b".into(), "c".into()],
                    correct_answer_index: c,
                    explanation: format!("because {i}"),
                })
                .collect(),
        }
    }

    #[test]
    fn correct_submission_is_graded_correct() {
        let mut session = QuizSession::new(quiz(&[1]));
        session.select_option(1).unwrap();
        let answer = *session.submit().unwrap();
        assert!(answer.is_correct);
        let feedback = session.feedback().unwrap();
        assert_eq!(feedback.correct_answer_index, 1);
        assert_eq!(feedback.explanation, "because 0");
    }

    #[test]
    fn submit_without_selection_changes_nothing() {
        let mut session = QuizSession::new(quiz(&[0, 1]));
        let before = session.clone();
        assert_eq!(session.submit().unwrap_err(), QuizActionError::NothingSelected);
        assert_eq!(session, before);
    }

    #[test]
    fn selection_is_only_legal_while_answering() {
        let mut session = QuizSession::new(quiz(&[0]));
        assert!(matches!(
            session.select_option(7),
            Err(QuizActionError::OptionOutOfRange { index: 7, options: 3 })
        ));
        session.select_option(0).unwrap();
        session.submit().unwrap();
        assert_eq!(session.select_option(1), Err(QuizActionError::NotAnswering));
        assert_eq!(session.answers().len(), 1);
    }

    #[test]
    fn next_requires_a_submitted_answer() {
        let mut session = QuizSession::new(quiz(&[0, 0]));
        assert_eq!(session.next(), Err(QuizActionError::NotSubmitted));
        assert!(session.feedback().is_none());
    }

    #[test]
    fn full_run_scores_correct_answers() {
        let mut session = QuizSession::new(quiz(&[0, 1, 2]));
        for pick in [0, 0, 2] {
            session.select_option(pick).unwrap();
            session.submit().unwrap();
            session.next().unwrap();
        }
        assert!(session.is_finished());
        assert!(session.current_question().is_none());
        let correct = session.answers().iter().filter(|a| a.is_correct).count();
        assert_eq!(session.score(), correct);
        assert_eq!(session.score(), 2);
        assert_eq!(session.percentage(), 67);
        assert_eq!(session.next(), Err(QuizActionError::NotSubmitted));
    }

    #[test]
    fn restart_returns_to_first_question_from_any_state() {
        let mut session = QuizSession::new(quiz(&[0, 1]));
        session.restart();
        assert_eq!(
            session.phase(),
            QuizPhase::Answering {
                question_index: 0,
                selected: None
            }
        );

        session.select_option(2).unwrap();
        session.submit().unwrap();
        session.restart();
        assert!(session.answers().is_empty());

        for _ in 0..2 {
            session.select_option(0).unwrap();
            session.submit().unwrap();
            session.next().unwrap();
        }
        assert!(session.is_finished());
        session.restart();
        assert_eq!(
            session.phase(),
            QuizPhase::Answering {
                question_index: 0,
                selected: None
            }
        );
        assert!(session.answers().is_empty());
        assert_eq!(session.score(), 0);
    }
}
