use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonLevel {
    pub level_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCategory {
    pub category_id: i64,
    pub level_id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub lesson_id: i64,
    pub category_id: i64,
    pub word: String,
    pub animation_path: Option<String>,
}

/// A lesson the user finished, as read for quiz generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedLesson {
    pub user_lesson_id: i64,
    pub lesson_id: i64,
    pub word: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    InProgress,
    Completed,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::InProgress => "in_progress",
            LessonStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(LessonStatus::InProgress),
            "completed" => Some(LessonStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLesson {
    pub user_lesson_id: i64,
    pub user_id: i64,
    pub lesson_id: i64,
    pub status: LessonStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSession {
    pub session_id: Uuid,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
}

/// One persisted true/false question. The answer key never changes after insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizQuestion {
    pub quiz_id: Uuid,
    pub session_id: Uuid,
    pub position: i64,
    pub user_lesson_id: i64,
    pub lesson_id: i64,
    pub question: String,
    pub is_true_statement: bool,
}

/// A session question joined with its source lesson, as read back for grading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredQuestion {
    pub quiz_id: Uuid,
    pub lesson_id: i64,
    pub is_true_statement: bool,
    pub word: String,
    pub animation_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRecord {
    pub score_id: Uuid,
    pub user_id: i64,
    pub session_id: Uuid,
    pub correct_count: i64,
    pub total_questions: i64,
    pub scored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrongAnswerRecord {
    pub user_id: i64,
    pub quiz_id: Uuid,
    pub session_id: Uuid,
    pub lesson_id: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Wrong-answer row joined with lesson and category for the review screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongAnswerEntry {
    pub wrong_answer_id: i64,
    pub quiz_id: Uuid,
    pub session_id: Uuid,
    pub lesson_id: i64,
    pub category_id: i64,
    pub category: String,
    pub word: String,
    pub animation_path: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Per-lesson status for the progress screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub lesson_id: i64,
    pub status: LessonStatus,
}

/// The lesson after the user's most recent completion, with its category and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextLesson {
    pub lesson_id: i64,
    pub word: String,
    pub animation_path: Option<String>,
    pub category_id: i64,
    pub category: String,
    pub level_id: Option<i64>,
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedLesson {
    pub saved_id: i64,
    pub lesson_id: i64,
    pub word: String,
    pub animation_path: Option<String>,
    pub saved_at: DateTime<Utc>,
}

// Quiz wire types

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizItem {
    pub quiz_id: Uuid,
    pub question: String,
    pub check_answer: bool,
    pub lesson_id: i64,
    pub animation_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuiz {
    pub session_id: Uuid,
    pub quizzes: Vec<QuizItem>,
}

#[derive(Debug, Clone)]
pub enum GenerateOutcome {
    Created(GeneratedQuiz),
    /// Fewer completions than a full quiz needs; nothing was persisted.
    Insufficient { available: usize, required: usize },
}

/// One client answer. Both fields are kept as raw JSON so that a wrong type is
/// scored as incorrect instead of rejecting the whole submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    #[serde(default, rename = "quizId", alias = "quiz_id", alias = "questionId")]
    pub quiz_id: serde_json::Value,
    #[serde(default)]
    pub answer: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckQuizRequest {
    #[serde(default, rename = "sessionId", alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub answers: Option<Vec<SubmittedAnswer>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub quiz_id: Uuid,
    pub lesson_id: i64,
    pub is_correct: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingReport {
    pub score: i64,
    pub total: i64,
    pub results: Vec<QuestionResult>,
}

// Lesson progress wire types

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonRequest {
    #[serde(alias = "lesson_id")]
    pub lesson_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartLessonOutcome {
    Started,
    AlreadyInProgress,
    AlreadyCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveLessonOutcome {
    Saved,
    AlreadySaved,
}

#[derive(Debug, Clone)]
pub enum ContinueLessonOutcome {
    Next(NextLesson),
    NoCompletedLesson,
    NoNextLesson,
}
