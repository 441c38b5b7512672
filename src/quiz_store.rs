use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::Database;
use crate::models::*;

/// Persistence seen by the quiz generator and grader.
#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn completed_lessons_on(&self, user_id: i64, day: NaiveDate) -> Result<Vec<CompletedLesson>>;

    /// Catalog words usable as decoys, i.e. not in `learned`.
    async fn decoy_words(&self, learned: &[String]) -> Result<Vec<String>>;

    async fn lesson_media(&self, lesson_ids: &[i64]) -> Result<HashMap<i64, Option<String>>>;

    /// All-or-nothing: either the session and every question become visible, or none do.
    async fn create_session_with_questions(&self, session: &QuizSession, questions: &[QuizQuestion]) -> Result<()>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<QuizSession>>;

    async fn session_questions(&self, session_id: Uuid) -> Result<Vec<StoredQuestion>>;

    /// Returns false when nothing was written because the session is already graded.
    async fn record_grading(
        &self,
        score: &ScoreRecord,
        wrong_answers: &[WrongAnswerRecord],
        allow_regrade: bool,
    ) -> Result<bool>;
}

#[async_trait]
impl QuizStore for Database {
    async fn completed_lessons_on(&self, user_id: i64, day: NaiveDate) -> Result<Vec<CompletedLesson>> {
        Database::completed_lessons_on(self, user_id, day).await
    }

    async fn decoy_words(&self, learned: &[String]) -> Result<Vec<String>> {
        self.catalog_words_excluding(learned).await
    }

    async fn lesson_media(&self, lesson_ids: &[i64]) -> Result<HashMap<i64, Option<String>>> {
        Ok(Database::lesson_media(self, lesson_ids).await?.into_iter().collect())
    }

    async fn create_session_with_questions(&self, session: &QuizSession, questions: &[QuizQuestion]) -> Result<()> {
        Database::create_session_with_questions(self, session, questions).await
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<QuizSession>> {
        self.get_session(session_id).await
    }

    async fn session_questions(&self, session_id: Uuid) -> Result<Vec<StoredQuestion>> {
        Database::session_questions(self, session_id).await
    }

    async fn record_grading(
        &self,
        score: &ScoreRecord,
        wrong_answers: &[WrongAnswerRecord],
        allow_regrade: bool,
    ) -> Result<bool> {
        Database::record_grading(self, score, wrong_answers, allow_regrade).await
    }
}
