use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::QuizError;
use crate::models::*;
use crate::quiz_store::QuizStore;
use crate::{log_service_error, log_service_start, log_service_success, log_validation};

pub const CORRECT_MESSAGE: &str = "Correct";
pub const INCORRECT_MESSAGE: &str = "Incorrect";

/// Scores each stored question against the submission that names it.
///
/// A question is correct only when an answer with its id exists and that
/// answer is a JSON boolean equal to the key. Anything else counts as a miss.
pub fn score_answers(questions: &[StoredQuestion], answers: &[SubmittedAnswer]) -> Vec<QuestionResult> {
    questions
        .iter()
        .map(|question| {
            let is_correct = answers
                .iter()
                .find(|answer| answer_targets(answer, question.quiz_id))
                .and_then(|answer| answer.answer.as_bool())
                .is_some_and(|value| value == question.is_true_statement);

            QuestionResult {
                quiz_id: question.quiz_id,
                lesson_id: question.lesson_id,
                is_correct,
                message: if is_correct { CORRECT_MESSAGE } else { INCORRECT_MESSAGE }.to_string(),
            }
        })
        .collect()
}

fn answer_targets(answer: &SubmittedAnswer, quiz_id: Uuid) -> bool {
    match &answer.quiz_id {
        Value::String(raw) => Uuid::parse_str(raw).is_ok_and(|id| id == quiz_id),
        _ => false,
    }
}

/// Validates a submission, scores it and records the outcome.
#[derive(Clone)]
pub struct QuizGrader {
    store: Arc<dyn QuizStore>,
    allow_regrade: bool,
}

impl QuizGrader {
    pub fn new(store: Arc<dyn QuizStore>, allow_regrade: bool) -> Self {
        Self { store, allow_regrade }
    }

    pub async fn grade(&self, user_id: i64, request: CheckQuizRequest) -> Result<GradingReport, QuizError> {
        log_service_start!("quiz_grader", "grade", user_id = user_id);

        let raw_session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| invalid("sessionId is required"))?;
        let answers = request
            .answers
            .filter(|answers| !answers.is_empty())
            .ok_or_else(|| invalid("answers must be a non-empty array"))?;

        let session_id = Uuid::parse_str(raw_session_id.trim())
            .map_err(|_| QuizError::SessionNotFound(raw_session_id.clone()))?;

        let session = self
            .store
            .find_session(session_id)
            .await
            .map_err(|e| self.failed(user_id, e))?
            .filter(|session| session.user_id == user_id)
            .ok_or_else(|| QuizError::SessionNotFound(raw_session_id.clone()))?;

        let questions = self
            .store
            .session_questions(session_id)
            .await
            .map_err(|e| self.failed(user_id, e))?;
        if questions.is_empty() {
            return Err(QuizError::SessionNotFound(raw_session_id));
        }

        if answers.len() != questions.len() {
            let error = QuizError::AnswerCountMismatch {
                expected: questions.len(),
                received: answers.len(),
            };
            log_validation!(failure, "check_quiz", error = error);
            return Err(error);
        }

        if session.graded_at.is_some() && !self.allow_regrade {
            return Err(QuizError::AlreadyGraded(session_id));
        }

        let results = score_answers(&questions, &answers);
        let score = results.iter().filter(|result| result.is_correct).count() as i64;
        let total = questions.len() as i64;

        let now = Utc::now();
        let record = ScoreRecord {
            score_id: Uuid::new_v4(),
            user_id,
            session_id,
            correct_count: score,
            total_questions: total,
            scored_at: now,
        };
        let wrong_answers: Vec<WrongAnswerRecord> = results
            .iter()
            .filter(|result| !result.is_correct)
            .map(|result| WrongAnswerRecord {
                user_id,
                quiz_id: result.quiz_id,
                session_id,
                lesson_id: result.lesson_id,
                recorded_at: now,
            })
            .collect();

        let recorded = self
            .store
            .record_grading(&record, &wrong_answers, self.allow_regrade)
            .await
            .map_err(|e| self.failed(user_id, e))?;

        // Another submission for the same session committed first.
        if !recorded {
            return Err(QuizError::AlreadyGraded(session_id));
        }

        log_service_success!("quiz_grader", "grade", format!("session {} scored {}/{}", session_id, score, total));

        Ok(GradingReport { score, total, results })
    }

    fn failed(&self, user_id: i64, error: anyhow::Error) -> QuizError {
        log_service_error!("quiz_grader", "grade", user_id = user_id, error = error);
        QuizError::GradingFailed(error)
    }
}

fn invalid(message: &str) -> QuizError {
    QuizError::InvalidRequest(message.to_string())
}
