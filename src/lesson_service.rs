use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::database::Database;
use crate::media::MediaResolver;
use crate::models::*;
use crate::notifications::{ProgressEvent, ProgressNotifier};

/// Progress after a lesson completion, as published to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub completed_categories: Vec<i64>,
    pub completed_lesson_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteLessonOutcome {
    Completed(ProgressSnapshot),
    AlreadyCompleted,
    NotStarted,
}

/// Lesson catalog, per-user progress and the review screens.
#[derive(Clone)]
pub struct LessonService {
    db: Database,
    media: MediaResolver,
    notifier: ProgressNotifier,
}

impl LessonService {
    pub fn new(db: Database, media: MediaResolver, notifier: ProgressNotifier) -> Self {
        Self { db, media, notifier }
    }

    // Catalog
    pub async fn create_category(&self, name: &str) -> Result<LessonCategory> {
        self.db.create_category(name).await
    }

    pub async fn create_lesson(&self, category_id: i64, word: &str, animation_path: Option<&str>) -> Result<Lesson> {
        self.db.create_lesson(category_id, word, animation_path).await
    }

    pub async fn categories_in_level(&self, level_id: i64) -> Result<Vec<LessonCategory>> {
        self.db.categories_in_level(level_id).await
    }

    pub async fn lessons_in_category(&self, category_id: i64) -> Result<Vec<Lesson>> {
        let lessons = self.db.lessons_in_category(category_id).await?;
        Ok(lessons
            .into_iter()
            .map(|lesson| Lesson {
                animation_path: self.media.resolve_optional(lesson.animation_path.as_deref()),
                ..lesson
            })
            .collect())
    }

    // Progress
    /// Returns `None` when the lesson does not exist.
    pub async fn start_lesson(&self, user_id: i64, lesson_id: i64) -> Result<Option<StartLessonOutcome>> {
        let Some(lesson) = self.db.get_lesson(lesson_id).await? else {
            return Ok(None);
        };

        if let Some(existing) = self.db.get_user_lesson(user_id, lesson_id).await? {
            return Ok(Some(match existing.status {
                LessonStatus::InProgress => StartLessonOutcome::AlreadyInProgress,
                LessonStatus::Completed => StartLessonOutcome::AlreadyCompleted,
            }));
        }

        self.db.start_user_lesson(user_id, &lesson, Utc::now()).await?;
        Ok(Some(StartLessonOutcome::Started))
    }

    /// Marks an in-progress lesson completed and publishes the new progress.
    /// A lesson finished earlier keeps its original completion date.
    pub async fn complete_lesson(&self, user_id: i64, lesson_id: i64) -> Result<CompleteLessonOutcome> {
        if !self.db.complete_user_lesson(user_id, lesson_id, Utc::now()).await? {
            return Ok(match self.db.get_user_lesson(user_id, lesson_id).await? {
                Some(existing) if existing.status == LessonStatus::Completed => {
                    CompleteLessonOutcome::AlreadyCompleted
                }
                _ => CompleteLessonOutcome::NotStarted,
            });
        }

        let snapshot = ProgressSnapshot {
            completed_categories: self.db.completed_categories(user_id).await?,
            completed_lesson_ids: self.db.completed_lesson_ids(user_id).await?,
        };

        self.notifier.publish(ProgressEvent::CategoryUpdated {
            user_id,
            categories: snapshot.completed_categories.clone(),
        });
        self.notifier.publish(ProgressEvent::ProgressUpdated {
            user_id,
            lesson_ids: snapshot.completed_lesson_ids.clone(),
        });

        Ok(CompleteLessonOutcome::Completed(snapshot))
    }

    pub async fn completed_categories(&self, user_id: i64) -> Result<Vec<i64>> {
        self.db.completed_categories(user_id).await
    }

    pub async fn lesson_statuses(&self, user_id: i64) -> Result<Vec<LessonProgress>> {
        self.db.lesson_statuses(user_id).await
    }

    pub async fn continue_lesson(&self, user_id: i64) -> Result<ContinueLessonOutcome> {
        Ok(match self.db.next_lesson_after_last_completed(user_id).await? {
            ContinueLessonOutcome::Next(next) => ContinueLessonOutcome::Next(NextLesson {
                animation_path: self.media.resolve_optional(next.animation_path.as_deref()),
                ..next
            }),
            other => other,
        })
    }

    // Wrong-answer review
    pub async fn wrong_answers(&self, user_id: i64) -> Result<Vec<WrongAnswerEntry>> {
        let entries = self.db.wrong_answers_for_user(user_id).await?;
        Ok(entries
            .into_iter()
            .map(|entry| WrongAnswerEntry {
                animation_path: self.media.resolve_optional(entry.animation_path.as_deref()),
                ..entry
            })
            .collect())
    }

    pub async fn delete_wrong_answer(&self, user_id: i64, wrong_answer_id: i64) -> Result<bool> {
        self.db.delete_wrong_answer(user_id, wrong_answer_id).await
    }

    // Saved lessons
    /// Returns `None` when the lesson does not exist.
    pub async fn save_lesson(&self, user_id: i64, lesson_id: i64) -> Result<Option<SaveLessonOutcome>> {
        if self.db.get_lesson(lesson_id).await?.is_none() {
            return Ok(None);
        }

        Ok(Some(if self.db.save_lesson(user_id, lesson_id, Utc::now()).await? {
            SaveLessonOutcome::Saved
        } else {
            SaveLessonOutcome::AlreadySaved
        }))
    }

    pub async fn saved_lessons(&self, user_id: i64) -> Result<Vec<SavedLesson>> {
        let saved = self.db.saved_lessons_for_user(user_id).await?;
        Ok(saved
            .into_iter()
            .map(|lesson| SavedLesson {
                animation_path: self.media.resolve_optional(lesson.animation_path.as_deref()),
                ..lesson
            })
            .collect())
    }

    pub async fn delete_saved_lesson(&self, user_id: i64, lesson_id: i64) -> Result<bool> {
        self.db.delete_saved_lesson(user_id, lesson_id).await
    }
}
