pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod lesson_service;
pub mod logging;
pub mod media;
pub mod models;
pub mod notifications;
pub mod quiz_generator;
pub mod quiz_grader;
pub mod quiz_store;

pub use api::{AppState, create_router};
pub use auth::{AuthKeys, AuthUser, Claims};
pub use config::{Config, QuizConfig};
pub use database::Database;
pub use errors::*;
pub use lesson_service::{CompleteLessonOutcome, LessonService, ProgressSnapshot};
pub use media::MediaResolver;
pub use models::*;
pub use notifications::{ProgressEvent, ProgressNotifier};
pub use quiz_generator::QuizGenerator;
pub use quiz_grader::QuizGrader;
pub use quiz_store::QuizStore;
