use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::time::Instant;
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let db = Database { pool };
        db.migrate().await?;
        log_db_operation!(info, "migrate", "schema ready");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lesson_levels (
                level_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lesson_categories (
                category_id INTEGER PRIMARY KEY AUTOINCREMENT,
                level_id INTEGER,
                name TEXT NOT NULL,
                FOREIGN KEY (level_id) REFERENCES lesson_levels(level_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lessons (
                lesson_id INTEGER PRIMARY KEY AUTOINCREMENT,
                category_id INTEGER NOT NULL,
                word TEXT NOT NULL,
                animation_path TEXT,
                FOREIGN KEY (category_id) REFERENCES lesson_categories(category_id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_lessons (
                user_lesson_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                lesson_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'in_progress',
                started_at TEXT NOT NULL,
                completed_at TEXT,
                UNIQUE (user_id, lesson_id),
                FOREIGN KEY (lesson_id) REFERENCES lessons(lesson_id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quiz_sessions (
                session_id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                graded_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quizzes (
                quiz_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                user_lesson_id INTEGER NOT NULL,
                lesson_id INTEGER NOT NULL,
                question TEXT NOT NULL,
                check_answer INTEGER NOT NULL,
                FOREIGN KEY (session_id) REFERENCES quiz_sessions(session_id) ON DELETE CASCADE,
                FOREIGN KEY (lesson_id) REFERENCES lessons(lesson_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quiz_scores (
                score_id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                correct_count INTEGER NOT NULL,
                total_questions INTEGER NOT NULL,
                scored_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES quiz_sessions(session_id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saved_lessons (
                saved_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                lesson_id INTEGER NOT NULL,
                saved_at TEXT NOT NULL,
                UNIQUE (user_id, lesson_id),
                FOREIGN KEY (lesson_id) REFERENCES lessons(lesson_id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One row per (user, quiz); repeat misses only move recorded_at.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wrong_answers (
                wrong_answer_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                quiz_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                lesson_id INTEGER NOT NULL,
                recorded_at TEXT NOT NULL,
                UNIQUE (user_id, quiz_id),
                FOREIGN KEY (quiz_id) REFERENCES quizzes(quiz_id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Catalog operations
    pub async fn create_level(&self, name: &str) -> Result<LessonLevel> {
        let result = sqlx::query("INSERT INTO lesson_levels (name) VALUES (?1)")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(LessonLevel {
            level_id: result.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    pub async fn create_category(&self, name: &str) -> Result<LessonCategory> {
        self.insert_category(None, name).await
    }

    pub async fn create_category_in_level(&self, level_id: i64, name: &str) -> Result<LessonCategory> {
        self.insert_category(Some(level_id), name).await
    }

    async fn insert_category(&self, level_id: Option<i64>, name: &str) -> Result<LessonCategory> {
        let result = sqlx::query("INSERT INTO lesson_categories (level_id, name) VALUES (?1, ?2)")
            .bind(level_id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(LessonCategory {
            category_id: result.last_insert_rowid(),
            level_id,
            name: name.to_string(),
        })
    }

    pub async fn categories_in_level(&self, level_id: i64) -> Result<Vec<LessonCategory>> {
        let rows = sqlx::query("SELECT * FROM lesson_categories WHERE level_id = ?1 ORDER BY category_id")
            .bind(level_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| LessonCategory {
                category_id: row.get("category_id"),
                level_id: row.get("level_id"),
                name: row.get("name"),
            })
            .collect())
    }

    pub async fn create_lesson(
        &self,
        category_id: i64,
        word: &str,
        animation_path: Option<&str>,
    ) -> Result<Lesson> {
        let result = sqlx::query(
            "INSERT INTO lessons (category_id, word, animation_path) VALUES (?1, ?2, ?3)",
        )
        .bind(category_id)
        .bind(word)
        .bind(animation_path)
        .execute(&self.pool)
        .await?;

        Ok(Lesson {
            lesson_id: result.last_insert_rowid(),
            category_id,
            word: word.to_string(),
            animation_path: animation_path.map(str::to_string),
        })
    }

    pub async fn get_lesson(&self, lesson_id: i64) -> Result<Option<Lesson>> {
        let row = sqlx::query("SELECT * FROM lessons WHERE lesson_id = ?1")
            .bind(lesson_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row_to_lesson(&row)))
    }

    pub async fn lessons_in_category(&self, category_id: i64) -> Result<Vec<Lesson>> {
        let rows = sqlx::query("SELECT * FROM lessons WHERE category_id = ?1 ORDER BY lesson_id")
            .bind(category_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_lesson).collect())
    }

    /// Distinct catalog words except the given ones.
    pub async fn catalog_words_excluding(&self, excluded: &[String]) -> Result<Vec<String>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT DISTINCT word FROM lessons");
        if !excluded.is_empty() {
            builder.push(" WHERE word NOT IN (");
            let mut separated = builder.separated(", ");
            for word in excluded {
                separated.push_bind(word.clone());
            }
            separated.push_unseparated(")");
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("word")).collect())
    }

    pub async fn lesson_media(&self, lesson_ids: &[i64]) -> Result<Vec<(i64, Option<String>)>> {
        if lesson_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT lesson_id, animation_path FROM lessons WHERE lesson_id IN (");
        let mut separated = builder.separated(", ");
        for id in lesson_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("lesson_id"), row.get("animation_path")))
            .collect())
    }

    // User lesson progress
    pub async fn get_user_lesson(&self, user_id: i64, lesson_id: i64) -> Result<Option<UserLesson>> {
        let row = sqlx::query("SELECT * FROM user_lessons WHERE user_id = ?1 AND lesson_id = ?2")
            .bind(user_id)
            .bind(lesson_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_user_lesson(&row)).transpose()
    }

    pub async fn start_user_lesson(
        &self,
        user_id: i64,
        lesson: &Lesson,
        started_at: DateTime<Utc>,
    ) -> Result<UserLesson> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_lessons (user_id, lesson_id, category_id, status, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(user_id)
        .bind(lesson.lesson_id)
        .bind(lesson.category_id)
        .bind(LessonStatus::InProgress.as_str())
        .bind(started_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(UserLesson {
            user_lesson_id: result.last_insert_rowid(),
            user_id,
            lesson_id: lesson.lesson_id,
            status: LessonStatus::InProgress,
            started_at,
            completed_at: None,
        })
    }

    /// Moves an in-progress lesson to completed. Returns false when the user
    /// never started the lesson or already completed it; `completed_at` of a
    /// finished lesson is never rewritten.
    pub async fn complete_user_lesson(
        &self,
        user_id: i64,
        lesson_id: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_lessons
            SET status = ?1, completed_at = ?2
            WHERE user_id = ?3 AND lesson_id = ?4 AND status = ?5
            "#,
        )
        .bind(LessonStatus::Completed.as_str())
        .bind(completed_at.to_rfc3339())
        .bind(user_id)
        .bind(lesson_id)
        .bind(LessonStatus::InProgress.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn completed_lesson_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT lesson_id FROM user_lessons WHERE user_id = ?1 AND status = ?2 ORDER BY lesson_id",
        )
        .bind(user_id)
        .bind(LessonStatus::Completed.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("lesson_id")).collect())
    }

    /// Categories in which the user has completed every lesson.
    pub async fn completed_categories(&self, user_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT l.category_id
            FROM lessons l
            LEFT JOIN user_lessons ul
                ON ul.lesson_id = l.lesson_id AND ul.user_id = ?1 AND ul.status = ?2
            GROUP BY l.category_id
            HAVING COUNT(*) = COUNT(ul.user_lesson_id)
            ORDER BY l.category_id
            "#,
        )
        .bind(user_id)
        .bind(LessonStatus::Completed.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("category_id")).collect())
    }

    pub async fn lesson_statuses(&self, user_id: i64) -> Result<Vec<LessonProgress>> {
        let rows = sqlx::query(
            r#"
            SELECT l.lesson_id, ul.status
            FROM lessons l
            JOIN user_lessons ul ON ul.lesson_id = l.lesson_id
            WHERE ul.user_id = ?1
            ORDER BY l.lesson_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(LessonProgress {
                    lesson_id: row.get("lesson_id"),
                    status: LessonStatus::parse(&status)
                        .ok_or_else(|| anyhow!("unknown lesson status '{}'", status))?,
                })
            })
            .collect()
    }

    /// The lesson with the next id after the user's most recently completed one.
    pub async fn next_lesson_after_last_completed(&self, user_id: i64) -> Result<ContinueLessonOutcome> {
        let last: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT lesson_id FROM user_lessons
            WHERE user_id = ?1 AND status = ?2
            ORDER BY completed_at DESC, user_lesson_id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(LessonStatus::Completed.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(last) = last else {
            return Ok(ContinueLessonOutcome::NoCompletedLesson);
        };

        let row = sqlx::query(
            r#"
            SELECT l.lesson_id, l.word, l.animation_path, lc.category_id, lc.name AS category,
                   lv.level_id, lv.name AS level
            FROM lessons l
            JOIN lesson_categories lc ON lc.category_id = l.category_id
            LEFT JOIN lesson_levels lv ON lv.level_id = lc.level_id
            WHERE l.lesson_id > ?1
            ORDER BY l.lesson_id
            LIMIT 1
            "#,
        )
        .bind(last)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => ContinueLessonOutcome::Next(NextLesson {
                lesson_id: row.get("lesson_id"),
                word: row.get("word"),
                animation_path: row.get("animation_path"),
                category_id: row.get("category_id"),
                category: row.get("category"),
                level_id: row.get("level_id"),
                level: row.get("level"),
            }),
            None => ContinueLessonOutcome::NoNextLesson,
        })
    }

    pub async fn completed_lessons_on(&self, user_id: i64, day: NaiveDate) -> Result<Vec<CompletedLesson>> {
        let start = Instant::now();
        let rows = sqlx::query(
            r#"
            SELECT ul.user_lesson_id, l.lesson_id, l.word
            FROM user_lessons ul
            JOIN lessons l ON ul.lesson_id = l.lesson_id
            WHERE ul.user_id = ?1
              AND ul.status = ?2
              AND substr(ul.completed_at, 1, 10) = ?3
            ORDER BY ul.user_lesson_id
            "#,
        )
        .bind(user_id)
        .bind(LessonStatus::Completed.as_str())
        .bind(day.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        let lessons: Vec<CompletedLesson> = rows
            .iter()
            .map(|row| CompletedLesson {
                user_lesson_id: row.get("user_lesson_id"),
                lesson_id: row.get("lesson_id"),
                word: row.get("word"),
            })
            .collect();

        log_db_operation!(
            debug,
            "completed_lessons_on",
            count = lessons.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(lessons)
    }

    // Quiz sessions
    /// Writes the session row and all of its questions in one transaction.
    pub async fn create_session_with_questions(
        &self,
        session: &QuizSession,
        questions: &[QuizQuestion],
    ) -> Result<()> {
        if questions.is_empty() {
            bail!("refusing to create quiz session {} without questions", session.session_id);
        }

        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quiz_sessions (session_id, user_id, created_at, graded_at) VALUES (?1, ?2, ?3, NULL)",
        )
        .bind(session.session_id.to_string())
        .bind(session.user_id)
        .bind(session.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO quizzes (quiz_id, session_id, position, user_lesson_id, lesson_id, question, check_answer) ",
        );
        builder.push_values(questions.iter(), |mut row, question| {
            row.push_bind(question.quiz_id.to_string())
                .push_bind(question.session_id.to_string())
                .push_bind(question.position)
                .push_bind(question.user_lesson_id)
                .push_bind(question.lesson_id)
                .push_bind(question.question.clone())
                .push_bind(i64::from(question.is_true_statement));
        });
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;

        log_db_operation!(
            debug,
            "create_session_with_questions",
            count = questions.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(())
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<QuizSession>> {
        let row = sqlx::query("SELECT * FROM quiz_sessions WHERE session_id = ?1")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(QuizSession {
                session_id: Uuid::parse_str(&row.get::<String, _>("session_id"))?,
                user_id: row.get("user_id"),
                created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
                graded_at: row
                    .get::<Option<String>, _>("graded_at")
                    .map(|s| parse_timestamp(&s))
                    .transpose()?,
            })),
            None => Ok(None),
        }
    }

    pub async fn session_questions(&self, session_id: Uuid) -> Result<Vec<StoredQuestion>> {
        let rows = sqlx::query(
            r#"
            SELECT q.quiz_id, q.check_answer, q.lesson_id, l.word, l.animation_path
            FROM quizzes q
            JOIN lessons l ON q.lesson_id = l.lesson_id
            WHERE q.session_id = ?1
            ORDER BY q.position
            "#,
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut questions = Vec::with_capacity(rows.len());
        for row in rows {
            questions.push(StoredQuestion {
                quiz_id: Uuid::parse_str(&row.get::<String, _>("quiz_id"))?,
                lesson_id: row.get("lesson_id"),
                is_true_statement: row.get::<i64, _>("check_answer") == 1,
                word: row.get("word"),
                animation_path: row.get("animation_path"),
            });
        }

        Ok(questions)
    }

    /// Marks the session graded, stores the score and upserts the misses in one
    /// transaction. Returns false without writing anything when the session was
    /// already graded and `allow_regrade` is off.
    pub async fn record_grading(
        &self,
        score: &ScoreRecord,
        wrong_answers: &[WrongAnswerRecord],
        allow_regrade: bool,
    ) -> Result<bool> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE quiz_sessions
            SET graded_at = ?1
            WHERE session_id = ?2 AND (graded_at IS NULL OR ?3 = 1)
            "#,
        )
        .bind(score.scored_at.to_rfc3339())
        .bind(score.session_id.to_string())
        .bind(i64::from(allow_regrade))
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO quiz_scores (score_id, user_id, session_id, correct_count, total_questions, scored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(score.score_id.to_string())
        .bind(score.user_id)
        .bind(score.session_id.to_string())
        .bind(score.correct_count)
        .bind(score.total_questions)
        .bind(score.scored_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if !wrong_answers.is_empty() {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO wrong_answers (user_id, quiz_id, session_id, lesson_id, recorded_at) ",
            );
            builder.push_values(wrong_answers.iter(), |mut row, wrong| {
                row.push_bind(wrong.user_id)
                    .push_bind(wrong.quiz_id.to_string())
                    .push_bind(wrong.session_id.to_string())
                    .push_bind(wrong.lesson_id)
                    .push_bind(wrong.recorded_at.to_rfc3339());
            });
            builder.push(" ON CONFLICT(user_id, quiz_id) DO UPDATE SET recorded_at = excluded.recorded_at");
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        log_db_operation!(
            debug,
            "record_grading",
            count = wrong_answers.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(true)
    }

    pub async fn scores_for_session(&self, session_id: Uuid) -> Result<Vec<ScoreRecord>> {
        let rows = sqlx::query("SELECT * FROM quiz_scores WHERE session_id = ?1 ORDER BY scored_at")
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut scores = Vec::with_capacity(rows.len());
        for row in rows {
            scores.push(ScoreRecord {
                score_id: Uuid::parse_str(&row.get::<String, _>("score_id"))?,
                user_id: row.get("user_id"),
                session_id: Uuid::parse_str(&row.get::<String, _>("session_id"))?,
                correct_count: row.get("correct_count"),
                total_questions: row.get("total_questions"),
                scored_at: parse_timestamp(&row.get::<String, _>("scored_at"))?,
            });
        }

        Ok(scores)
    }

    // Wrong-answer review
    pub async fn wrong_answers_for_user(&self, user_id: i64) -> Result<Vec<WrongAnswerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT wa.wrong_answer_id, wa.quiz_id, wa.session_id, wa.lesson_id, wa.recorded_at,
                   l.word, l.animation_path, lc.category_id, lc.name AS category
            FROM wrong_answers wa
            JOIN lessons l ON l.lesson_id = wa.lesson_id
            JOIN lesson_categories lc ON lc.category_id = l.category_id
            WHERE wa.user_id = ?1
            ORDER BY wa.recorded_at DESC, wa.wrong_answer_id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(WrongAnswerEntry {
                wrong_answer_id: row.get("wrong_answer_id"),
                quiz_id: Uuid::parse_str(&row.get::<String, _>("quiz_id"))?,
                session_id: Uuid::parse_str(&row.get::<String, _>("session_id"))?,
                lesson_id: row.get("lesson_id"),
                category_id: row.get("category_id"),
                category: row.get("category"),
                word: row.get("word"),
                animation_path: row.get("animation_path"),
                recorded_at: parse_timestamp(&row.get::<String, _>("recorded_at"))?,
            });
        }

        Ok(entries)
    }

    pub async fn delete_wrong_answer(&self, user_id: i64, wrong_answer_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM wrong_answers WHERE user_id = ?1 AND wrong_answer_id = ?2")
            .bind(user_id)
            .bind(wrong_answer_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // Saved lessons
    /// Returns false when the lesson was already saved by this user.
    pub async fn save_lesson(&self, user_id: i64, lesson_id: i64, saved_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO saved_lessons (user_id, lesson_id, saved_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (user_id, lesson_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(lesson_id)
        .bind(saved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn saved_lessons_for_user(&self, user_id: i64) -> Result<Vec<SavedLesson>> {
        let rows = sqlx::query(
            r#"
            SELECT s.saved_id, s.lesson_id, s.saved_at, l.word, l.animation_path
            FROM saved_lessons s
            JOIN lessons l ON l.lesson_id = s.lesson_id
            WHERE s.user_id = ?1
            ORDER BY s.saved_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut saved = Vec::with_capacity(rows.len());
        for row in rows {
            saved.push(SavedLesson {
                saved_id: row.get("saved_id"),
                lesson_id: row.get("lesson_id"),
                word: row.get("word"),
                animation_path: row.get("animation_path"),
                saved_at: parse_timestamp(&row.get::<String, _>("saved_at"))?,
            });
        }

        Ok(saved)
    }

    pub async fn delete_saved_lesson(&self, user_id: i64, lesson_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM saved_lessons WHERE user_id = ?1 AND lesson_id = ?2")
            .bind(user_id)
            .bind(lesson_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn row_to_lesson(row: &sqlx::sqlite::SqliteRow) -> Lesson {
    Lesson {
        lesson_id: row.get("lesson_id"),
        category_id: row.get("category_id"),
        word: row.get("word"),
        animation_path: row.get("animation_path"),
    }
}

fn row_to_user_lesson(row: &sqlx::sqlite::SqliteRow) -> Result<UserLesson> {
    let status: String = row.get("status");
    Ok(UserLesson {
        user_lesson_id: row.get("user_lesson_id"),
        user_id: row.get("user_id"),
        lesson_id: row.get("lesson_id"),
        status: LessonStatus::parse(&status).ok_or_else(|| anyhow!("unknown lesson status '{}'", status))?,
        started_at: parse_timestamp(&row.get::<String, _>("started_at"))?,
        completed_at: row
            .get::<Option<String>, _>("completed_at")
            .map(|s| parse_timestamp(&s))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seeded_db() -> (Database, Lesson, Lesson) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let category = db.create_category("Greetings").await.unwrap();
        let hello = db.create_lesson(category.category_id, "hello", Some("gs://bucket/hello.mp4")).await.unwrap();
        let thanks = db.create_lesson(category.category_id, "thanks", None).await.unwrap();
        (db, hello, thanks)
    }

    #[tokio::test]
    async fn test_completed_lessons_only_include_today() {
        let (db, hello, thanks) = seeded_db().await;
        let now = Utc::now();

        db.start_user_lesson(7, &hello, now).await.unwrap();
        db.complete_user_lesson(7, hello.lesson_id, now).await.unwrap();
        db.start_user_lesson(7, &thanks, now - Duration::days(2)).await.unwrap();
        db.complete_user_lesson(7, thanks.lesson_id, now - Duration::days(2)).await.unwrap();

        let today = db.completed_lessons_on(7, now.date_naive()).await.unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].word, "hello");

        let other_user = db.completed_lessons_on(8, now.date_naive()).await.unwrap();
        assert!(other_user.is_empty());
    }

    #[tokio::test]
    async fn test_recompleting_an_old_lesson_keeps_its_date() {
        let (db, hello, _) = seeded_db().await;
        let now = Utc::now();
        let three_days_ago = now - Duration::days(3);

        db.start_user_lesson(7, &hello, three_days_ago).await.unwrap();
        assert!(db.complete_user_lesson(7, hello.lesson_id, three_days_ago).await.unwrap());
        assert!(!db.complete_user_lesson(7, hello.lesson_id, now).await.unwrap());

        assert!(db.completed_lessons_on(7, now.date_naive()).await.unwrap().is_empty());
        let stored = db.get_user_lesson(7, hello.lesson_id).await.unwrap().unwrap();
        assert_eq!(stored.completed_at.unwrap().date_naive(), three_days_ago.date_naive());
    }

    #[tokio::test]
    async fn test_in_progress_lessons_are_not_completed() {
        let (db, hello, _) = seeded_db().await;
        let now = Utc::now();
        db.start_user_lesson(7, &hello, now).await.unwrap();

        let today = db.completed_lessons_on(7, now.date_naive()).await.unwrap();
        assert!(today.is_empty());
        assert!(!db.complete_user_lesson(7, 9999, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_catalog_words_excluding() {
        let (db, _, _) = seeded_db().await;
        let words = db.catalog_words_excluding(&["hello".to_string()]).await.unwrap();
        assert_eq!(words, vec!["thanks".to_string()]);

        let all = db.catalog_words_excluding(&[]).await.unwrap();
        assert_eq!(all.len(), 2);

        // Same word taught in a second category
        let manners = db.create_category("Manners").await.unwrap();
        db.create_lesson(manners.category_id, "thanks", None).await.unwrap();
        let words = db.catalog_words_excluding(&["hello".to_string()]).await.unwrap();
        assert_eq!(words, vec!["thanks".to_string()]);
    }

    #[tokio::test]
    async fn test_categories_in_level() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let beginner = db.create_level("Beginner").await.unwrap();
        let advanced = db.create_level("Advanced").await.unwrap();
        let greetings = db.create_category_in_level(beginner.level_id, "Greetings").await.unwrap();
        db.create_category_in_level(advanced.level_id, "Idioms").await.unwrap();
        db.create_category("Unleveled").await.unwrap();

        let categories = db.categories_in_level(beginner.level_id).await.unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].category_id, greetings.category_id);
        assert_eq!(categories[0].level_id, Some(beginner.level_id));
        assert!(db.categories_in_level(999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lesson_statuses_and_next_lesson() {
        let (db, hello, thanks) = seeded_db().await;
        let now = Utc::now();

        assert!(matches!(
            db.next_lesson_after_last_completed(7).await.unwrap(),
            ContinueLessonOutcome::NoCompletedLesson
        ));

        db.start_user_lesson(7, &hello, now).await.unwrap();
        db.start_user_lesson(7, &thanks, now).await.unwrap();
        db.complete_user_lesson(7, hello.lesson_id, now).await.unwrap();

        assert_eq!(
            db.lesson_statuses(7).await.unwrap(),
            vec![
                LessonProgress { lesson_id: hello.lesson_id, status: LessonStatus::Completed },
                LessonProgress { lesson_id: thanks.lesson_id, status: LessonStatus::InProgress },
            ]
        );
        assert!(db.lesson_statuses(8).await.unwrap().is_empty());

        match db.next_lesson_after_last_completed(7).await.unwrap() {
            ContinueLessonOutcome::Next(next) => {
                assert_eq!(next.lesson_id, thanks.lesson_id);
                assert_eq!(next.category, "Greetings");
                assert_eq!(next.level, None);
            }
            other => panic!("expected a next lesson, got {:?}", other),
        }

        db.complete_user_lesson(7, thanks.lesson_id, now + Duration::seconds(1)).await.unwrap();
        assert!(matches!(
            db.next_lesson_after_last_completed(7).await.unwrap(),
            ContinueLessonOutcome::NoNextLesson
        ));
    }

    #[tokio::test]
    async fn test_saved_lessons_are_per_user_and_unique() {
        let (db, hello, thanks) = seeded_db().await;
        let now = Utc::now();

        assert!(db.save_lesson(7, hello.lesson_id, now).await.unwrap());
        assert!(!db.save_lesson(7, hello.lesson_id, now).await.unwrap());
        assert!(db.save_lesson(7, thanks.lesson_id, now).await.unwrap());
        assert!(db.save_lesson(8, hello.lesson_id, now).await.unwrap());

        let saved = db.saved_lessons_for_user(7).await.unwrap();
        assert_eq!(saved.iter().map(|s| s.word.as_str()).collect::<Vec<_>>(), vec!["hello", "thanks"]);

        assert!(db.delete_saved_lesson(7, hello.lesson_id).await.unwrap());
        assert!(!db.delete_saved_lesson(7, hello.lesson_id).await.unwrap());
        assert_eq!(db.saved_lessons_for_user(7).await.unwrap().len(), 1);
        assert_eq!(db.saved_lessons_for_user(8).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_categories_require_every_lesson() {
        let (db, hello, thanks) = seeded_db().await;
        let now = Utc::now();

        db.start_user_lesson(7, &hello, now).await.unwrap();
        db.complete_user_lesson(7, hello.lesson_id, now).await.unwrap();
        assert!(db.completed_categories(7).await.unwrap().is_empty());

        db.start_user_lesson(7, &thanks, now).await.unwrap();
        db.complete_user_lesson(7, thanks.lesson_id, now).await.unwrap();
        assert_eq!(db.completed_categories(7).await.unwrap(), vec![hello.category_id]);
        assert_eq!(
            db.completed_lesson_ids(7).await.unwrap(),
            vec![hello.lesson_id, thanks.lesson_id]
        );
    }

    #[tokio::test]
    async fn test_session_without_questions_is_rejected() {
        let (db, _, _) = seeded_db().await;
        let session = QuizSession {
            session_id: Uuid::new_v4(),
            user_id: 7,
            created_at: Utc::now(),
            graded_at: None,
        };

        assert!(db.create_session_with_questions(&session, &[]).await.is_err());
        assert!(db.get_session(session.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_question_insert_leaves_no_session() {
        let (db, hello, _) = seeded_db().await;
        let session = QuizSession {
            session_id: Uuid::new_v4(),
            user_id: 7,
            created_at: Utc::now(),
            graded_at: None,
        };
        let question = QuizQuestion {
            quiz_id: Uuid::new_v4(),
            session_id: session.session_id,
            position: 0,
            user_lesson_id: 1,
            lesson_id: hello.lesson_id,
            question: "hello".to_string(),
            is_true_statement: true,
        };
        // Same quiz id twice violates the primary key inside the transaction.
        let result = db
            .create_session_with_questions(&session, &[question.clone(), question])
            .await;

        assert!(result.is_err());
        assert!(db.get_session(session.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_answer_upsert_keeps_one_row() {
        let (db, hello, _) = seeded_db().await;
        let session = QuizSession {
            session_id: Uuid::new_v4(),
            user_id: 7,
            created_at: Utc::now(),
            graded_at: None,
        };
        let question = QuizQuestion {
            quiz_id: Uuid::new_v4(),
            session_id: session.session_id,
            position: 0,
            user_lesson_id: 1,
            lesson_id: hello.lesson_id,
            question: "hello".to_string(),
            is_true_statement: true,
        };
        db.create_session_with_questions(&session, &[question.clone()]).await.unwrap();

        let first_time = Utc::now() - Duration::minutes(5);
        for (offset, recorded_at) in [first_time, Utc::now()].into_iter().enumerate() {
            let score = ScoreRecord {
                score_id: Uuid::new_v4(),
                user_id: 7,
                session_id: session.session_id,
                correct_count: 0,
                total_questions: 1,
                scored_at: recorded_at,
            };
            let wrong = WrongAnswerRecord {
                user_id: 7,
                quiz_id: question.quiz_id,
                session_id: session.session_id,
                lesson_id: hello.lesson_id,
                recorded_at,
            };
            let written = db.record_grading(&score, &[wrong], true).await.unwrap();
            assert!(written, "write {} should be recorded", offset);
        }

        let wrong = db.wrong_answers_for_user(7).await.unwrap();
        assert_eq!(wrong.len(), 1);
        assert!(wrong[0].recorded_at > first_time);
        assert_eq!(db.scores_for_session(session.session_id).await.unwrap().len(), 2);
    }
}
