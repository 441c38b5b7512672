use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

use crate::config::QuizConfig;
use crate::errors::QuizError;
use crate::media::MediaResolver;
use crate::models::*;
use crate::quiz_store::QuizStore;
use crate::{log_service_error, log_service_start, log_service_success, log_service_warn};

/// Prompt used for a false statement when the catalog ran out of decoys.
pub const MISSING_DECOY_WORD: &str = "unknown word";

/// A question before it gets ids and is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    pub user_lesson_id: i64,
    pub lesson_id: i64,
    pub question: String,
    pub is_true_statement: bool,
}

/// Uniformly picks up to `count` lessons, in random order.
pub fn select_learned<R: Rng + ?Sized>(completed: &[CompletedLesson], count: usize, rng: &mut R) -> Vec<CompletedLesson> {
    completed.choose_multiple(rng, count).cloned().collect()
}

/// Uniformly picks up to `count` decoys from the pool without reusing a pool entry.
pub fn select_decoys<R: Rng + ?Sized>(pool: &[String], count: usize, rng: &mut R) -> Vec<String> {
    pool.choose_multiple(rng, count).cloned().collect()
}

/// Pairs learned lesson `i` with decoy `i` and flips a fair coin per pair to
/// decide which word the prompt shows.
pub fn pair_questions<R: Rng + ?Sized>(
    learned: &[CompletedLesson],
    decoys: &[String],
    rng: &mut R,
) -> Vec<QuestionDraft> {
    learned
        .iter()
        .enumerate()
        .map(|(index, lesson)| {
            let is_true_statement = rng.gen_bool(0.5);
            let question = if is_true_statement {
                lesson.word.clone()
            } else {
                decoys
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| MISSING_DECOY_WORD.to_string())
            };

            QuestionDraft {
                user_lesson_id: lesson.user_lesson_id,
                lesson_id: lesson.lesson_id,
                question,
                is_true_statement,
            }
        })
        .collect()
}

/// Builds a daily true/false quiz from the lessons a user completed today.
#[derive(Clone)]
pub struct QuizGenerator {
    store: Arc<dyn QuizStore>,
    media: MediaResolver,
    question_count: usize,
    rng: Arc<Mutex<StdRng>>,
}

impl QuizGenerator {
    pub fn new(store: Arc<dyn QuizStore>, media: MediaResolver, config: &QuizConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(store, media, config.question_count, rng)
    }

    pub fn with_rng(store: Arc<dyn QuizStore>, media: MediaResolver, question_count: usize, rng: StdRng) -> Self {
        Self {
            store,
            media,
            question_count,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    pub fn question_count(&self) -> usize {
        self.question_count
    }

    pub async fn generate(&self, user_id: i64) -> Result<GenerateOutcome, QuizError> {
        self.generate_at(user_id, Utc::now()).await
    }

    /// Same as [`generate`](Self::generate) with an explicit clock; "today" is `now`'s UTC date.
    pub async fn generate_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<GenerateOutcome, QuizError> {
        let start = Instant::now();
        log_service_start!("quiz_generator", "generate", user_id = user_id);

        let completed = self
            .store
            .completed_lessons_on(user_id, now.date_naive())
            .await
            .map_err(|e| self.failed(user_id, e))?;

        let learned = self.draw(|rng| select_learned(&completed, self.question_count, rng));

        if learned.is_empty() {
            return Err(QuizError::NoEligibleContent);
        }

        if learned.len() < self.question_count {
            log_service_warn!(
                "quiz_generator",
                "generate",
                format!("only {} of {} words learned today", learned.len(), self.question_count)
            );
            return Ok(GenerateOutcome::Insufficient {
                available: learned.len(),
                required: self.question_count,
            });
        }

        let learned_today: Vec<String> = completed.iter().map(|lesson| lesson.word.clone()).collect();
        let decoy_pool = self
            .store
            .decoy_words(&learned_today)
            .await
            .map_err(|e| self.failed(user_id, e))?;

        if decoy_pool.len() < learned.len() {
            log_service_warn!(
                "quiz_generator",
                "generate",
                format!("decoy pool has {} words for {} questions", decoy_pool.len(), learned.len())
            );
        }

        let drafts = self.draw(|rng| {
            let decoys = select_decoys(&decoy_pool, learned.len(), rng);
            pair_questions(&learned, &decoys, rng)
        });

        let lesson_ids: Vec<i64> = learned.iter().map(|lesson| lesson.lesson_id).collect();
        let media = self
            .store
            .lesson_media(&lesson_ids)
            .await
            .map_err(|e| self.failed(user_id, e))?;

        let session = QuizSession {
            session_id: Uuid::new_v4(),
            user_id,
            created_at: now,
            graded_at: None,
        };
        let questions: Vec<QuizQuestion> = drafts
            .into_iter()
            .enumerate()
            .map(|(position, draft)| QuizQuestion {
                quiz_id: Uuid::new_v4(),
                session_id: session.session_id,
                position: position as i64,
                user_lesson_id: draft.user_lesson_id,
                lesson_id: draft.lesson_id,
                question: draft.question,
                is_true_statement: draft.is_true_statement,
            })
            .collect();

        self.store
            .create_session_with_questions(&session, &questions)
            .await
            .map_err(|e| self.failed(user_id, e))?;

        let quizzes = questions
            .iter()
            .map(|question| QuizItem {
                quiz_id: question.quiz_id,
                question: question.question.clone(),
                check_answer: question.is_true_statement,
                lesson_id: question.lesson_id,
                animation_path: self
                    .media
                    .resolve_optional(media.get(&question.lesson_id).and_then(|path| path.as_deref())),
            })
            .collect::<Vec<_>>();

        log_service_success!(
            "quiz_generator",
            "generate",
            session_id = session.session_id,
            question_count = quizzes.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );

        Ok(GenerateOutcome::Created(GeneratedQuiz {
            session_id: session.session_id,
            quizzes,
        }))
    }

    fn draw<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // A panic elsewhere cannot leave the generator in an invalid state.
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }

    fn failed(&self, user_id: i64, error: anyhow::Error) -> QuizError {
        log_service_error!("quiz_generator", "generate", user_id = user_id, error = error);
        QuizError::GenerationFailed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::{HashMap, HashSet};

    fn lessons(words: &[&str]) -> Vec<CompletedLesson> {
        words
            .iter()
            .enumerate()
            .map(|(i, word)| CompletedLesson {
                user_lesson_id: 100 + i as i64,
                lesson_id: 1 + i as i64,
                word: word.to_string(),
            })
            .collect()
    }

    #[derive(Default)]
    struct FakeStore {
        completed: Vec<CompletedLesson>,
        catalog: Vec<String>,
        fail_create: bool,
        created: Mutex<Vec<(QuizSession, Vec<QuizQuestion>)>>,
    }

    #[async_trait]
    impl QuizStore for FakeStore {
        async fn completed_lessons_on(&self, _user_id: i64, _day: NaiveDate) -> Result<Vec<CompletedLesson>> {
            Ok(self.completed.clone())
        }

        async fn decoy_words(&self, learned: &[String]) -> Result<Vec<String>> {
            Ok(self.catalog.iter().filter(|w| !learned.contains(w)).cloned().collect())
        }

        async fn lesson_media(&self, lesson_ids: &[i64]) -> Result<HashMap<i64, Option<String>>> {
            Ok(lesson_ids
                .iter()
                .map(|id| (*id, Some(format!("gs://bucket/anim/{}.mp4", id))))
                .collect())
        }

        async fn create_session_with_questions(&self, session: &QuizSession, questions: &[QuizQuestion]) -> Result<()> {
            if self.fail_create {
                anyhow::bail!("database is locked");
            }
            self.created.lock().unwrap().push((session.clone(), questions.to_vec()));
            Ok(())
        }

        async fn find_session(&self, _session_id: Uuid) -> Result<Option<QuizSession>> {
            Ok(None)
        }

        async fn session_questions(&self, _session_id: Uuid) -> Result<Vec<StoredQuestion>> {
            Ok(Vec::new())
        }

        async fn record_grading(&self, _score: &ScoreRecord, _wrong: &[WrongAnswerRecord], _allow: bool) -> Result<bool> {
            Ok(true)
        }
    }

    fn generator(store: Arc<FakeStore>, seed: u64) -> QuizGenerator {
        QuizGenerator::with_rng(store, MediaResolver::new("bucket"), 5, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_pairing_is_positional() {
        let learned = lessons(&["a", "b", "c", "d", "e"]);
        let decoys: Vec<String> = ["v", "w", "x", "y", "z"].iter().map(|s| s.to_string()).collect();
        let mut rng = StdRng::seed_from_u64(3);

        let drafts = pair_questions(&learned, &decoys, &mut rng);
        assert_eq!(drafts.len(), 5);
        for (i, draft) in drafts.iter().enumerate() {
            let expected = if draft.is_true_statement { &learned[i].word } else { &decoys[i] };
            assert_eq!(&draft.question, expected);
            assert_eq!(draft.lesson_id, learned[i].lesson_id);
            assert_eq!(draft.user_lesson_id, learned[i].user_lesson_id);
        }
    }

    #[test]
    fn test_fair_coin_balance() {
        let words: Vec<String> = (0..4000).map(|i| format!("w{}", i)).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let learned = lessons(&refs);
        let decoys: Vec<String> = (0..4000).map(|i| format!("d{}", i)).collect();
        let mut rng = StdRng::seed_from_u64(42);

        let drafts = pair_questions(&learned, &decoys, &mut rng);
        let trues = drafts.iter().filter(|d| d.is_true_statement).count();
        let ratio = trues as f64 / drafts.len() as f64;
        assert!((0.45..0.55).contains(&ratio), "true ratio was {}", ratio);
    }

    #[test]
    fn test_short_decoy_pool_uses_placeholder() {
        let learned = lessons(&["a", "b", "c"]);
        let decoys = vec!["z".to_string()];
        let mut rng = StdRng::seed_from_u64(11);

        for draft in pair_questions(&learned, &decoys, &mut rng).iter().skip(1) {
            if !draft.is_true_statement {
                assert_eq!(draft.question, MISSING_DECOY_WORD);
            }
        }
    }

    #[test]
    fn test_selection_is_without_replacement() {
        let pool: Vec<String> = (0..10).map(|i| format!("d{}", i)).collect();
        let mut rng = StdRng::seed_from_u64(5);
        let picked = select_decoys(&pool, 5, &mut rng);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(picked.len(), 5);
        assert_eq!(unique.len(), 5);

        assert_eq!(select_decoys(&pool[..2], 5, &mut rng).len(), 2);
    }

    #[tokio::test]
    async fn test_generates_five_questions_with_valid_prompts() {
        let store = Arc::new(FakeStore {
            completed: lessons(&["apple", "bread", "cat", "dog", "egg", "fish", "grape"]),
            catalog: ["apple", "house", "moon", "river", "stone", "tree", "wind"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..Default::default()
        });
        let learned_today: HashSet<String> = store.completed.iter().map(|l| l.word.clone()).collect();

        for seed in 0..20 {
            let outcome = generator(store.clone(), seed).generate(9).await.unwrap();
            let GenerateOutcome::Created(quiz) = outcome else {
                panic!("expected a created quiz");
            };
            assert_eq!(quiz.quizzes.len(), 5);

            for item in &quiz.quizzes {
                let source = store.completed.iter().find(|l| l.lesson_id == item.lesson_id).unwrap();
                if item.check_answer {
                    assert_eq!(item.question, source.word);
                } else {
                    assert!(!learned_today.contains(&item.question), "decoy {} was learned today", item.question);
                }
                assert_eq!(
                    item.animation_path.as_deref(),
                    Some(format!("https://firebasestorage.googleapis.com/v0/b/bucket/o/{}.mp4?alt=media", item.lesson_id).as_str())
                );
            }
        }

        assert_eq!(store.created.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_no_completions_is_no_eligible_content() {
        let store = Arc::new(FakeStore::default());
        let result = generator(store.clone(), 1).generate(9).await;

        assert!(matches!(result, Err(QuizError::NoEligibleContent)));
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shortfall_creates_no_session() {
        for count in 1..5 {
            let words: Vec<String> = (0..count).map(|i| format!("w{}", i)).collect();
            let refs: Vec<&str> = words.iter().map(String::as_str).collect();
            let store = Arc::new(FakeStore {
                completed: lessons(&refs),
                catalog: vec!["x".to_string(); 10],
                ..Default::default()
            });

            let outcome = generator(store.clone(), 2).generate(9).await.unwrap();
            assert!(matches!(
                outcome,
                GenerateOutcome::Insufficient { available, required: 5 } if available == count
            ));
            assert!(store.created.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_generation_failed() {
        let store = Arc::new(FakeStore {
            completed: lessons(&["a", "b", "c", "d", "e"]),
            catalog: vec!["z".to_string(); 5],
            fail_create: true,
            ..Default::default()
        });

        let result = generator(store, 4).generate(9).await;
        assert!(matches!(result, Err(QuizError::GenerationFailed(_))));
    }

    #[tokio::test]
    async fn test_same_seed_same_quiz() {
        let store = Arc::new(FakeStore {
            completed: lessons(&["a", "b", "c", "d", "e", "f", "g", "h"]),
            catalog: (0..20).map(|i| format!("d{}", i)).collect(),
            ..Default::default()
        });

        let first = generator(store.clone(), 77).generate(1).await.unwrap();
        let second = generator(store, 77).generate(1).await.unwrap();
        let (GenerateOutcome::Created(first), GenerateOutcome::Created(second)) = (first, second) else {
            panic!("expected created quizzes");
        };

        let prompts = |quiz: &GeneratedQuiz| -> Vec<(String, bool, i64)> {
            quiz.quizzes.iter().map(|q| (q.question.clone(), q.check_answer, q.lesson_id)).collect()
        };
        assert_eq!(prompts(&first), prompts(&second));
    }
}
