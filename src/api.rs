use axum::{
    Extension, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{
        Json,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post, put},
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthKeys, AuthUser, require_auth},
    config::QuizConfig,
    database::Database,
    errors::{ApiError, ErrorContext, QuizError},
    lesson_service::{CompleteLessonOutcome, LessonService, ProgressSnapshot},
    media::MediaResolver,
    models::*,
    notifications::ProgressNotifier,
    quiz_generator::QuizGenerator,
    quiz_grader::QuizGrader,
    quiz_store::QuizStore,
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorBody>)>;

#[derive(Clone)]
pub struct AppState {
    pub generator: QuizGenerator,
    pub grader: QuizGrader,
    pub lessons: LessonService,
    pub notifier: ProgressNotifier,
    pub auth: AuthKeys,
}

impl AppState {
    pub fn new(db: Database, quiz: &QuizConfig, media: MediaResolver, auth: AuthKeys) -> Self {
        let store: Arc<dyn QuizStore> = Arc::new(db.clone());
        let notifier = ProgressNotifier::new();

        Self {
            generator: QuizGenerator::new(store.clone(), media.clone(), quiz),
            grader: QuizGrader::new(store, quiz.allow_regrade),
            lessons: LessonService::new(db, media, notifier.clone()),
            notifier,
            auth,
        }
    }
}

/// Body of every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuizResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quizzes: Option<Vec<QuizItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct CheckQuizResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: GradingReport,
}

fn rejected_body(operation: &str, rejection: JsonRejection) -> (StatusCode, Json<ErrorBody>) {
    let error = ApiError::ValidationError(format!("Malformed request body: {}", rejection.body_text()));
    error.to_response_with_context(ErrorContext::new(operation, "request_body"))
}

fn quiz_failure(operation: &str, resource_id: Option<&str>, error: QuizError) -> (StatusCode, Json<ErrorBody>) {
    let user_message = match &error {
        QuizError::GenerationFailed(_) => Some("Failed to generate the quiz. Please try again."),
        QuizError::GradingFailed(_) => Some("Failed to grade the quiz. Please try again."),
        _ => None,
    };

    let mut context = ErrorContext::new(operation, "quiz_session");
    if let Some(id) = resource_id {
        context = context.with_id(id);
    }
    if let Some(message) = user_message {
        context = context.with_user_message(message);
    }

    ApiError::from(error).to_response_with_context(context)
}

// Quiz endpoints
pub async fn generate_quiz(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<GenerateQuizResponse>> {
    log_api_start!("generate_quiz", user_id = user.user_id);

    match state.generator.generate(user.user_id).await {
        Ok(GenerateOutcome::Created(quiz)) => {
            log_api_success!(
                "generate_quiz",
                user_id = user.user_id,
                session_id = quiz.session_id,
                format!("{} questions", quiz.quizzes.len())
            );
            Ok(Json(GenerateQuizResponse {
                success: true,
                session_id: Some(quiz.session_id),
                quizzes: Some(quiz.quizzes),
                message: None,
            }))
        }
        Ok(GenerateOutcome::Insufficient { available, required }) => {
            log_api_warn!("generate_quiz", user_id = user.user_id, "not enough lessons completed today");
            Ok(Json(GenerateQuizResponse {
                success: true,
                session_id: None,
                quizzes: None,
                message: Some(format!(
                    "You learned {} words today. Complete {} lessons to take the quiz.",
                    available, required
                )),
            }))
        }
        Err(e) => Err(quiz_failure("generate_quiz", None, e)),
    }
}

pub async fn check_quiz(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CheckQuizRequest>, JsonRejection>,
) -> ApiResult<Json<CheckQuizResponse>> {
    let Json(request) = payload.map_err(|rejection| rejected_body("check_quiz", rejection))?;
    let session_id = request.session_id.clone();
    log_api_start!("check_quiz", user_id = user.user_id);

    match state.grader.grade(user.user_id, request).await {
        Ok(report) => {
            log_api_success!(
                "check_quiz",
                user_id = user.user_id,
                format!("scored {}/{}", report.score, report.total)
            );
            Ok(Json(CheckQuizResponse { success: true, report }))
        }
        Err(e) => Err(quiz_failure("check_quiz", session_id.as_deref(), e)),
    }
}

// Wrong-answer review endpoints
pub async fn get_wrong_answers(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ApiResponse<Vec<WrongAnswerEntry>>>> {
    log_api_start!("get_wrong_answers", user_id = user.user_id);

    match state.lessons.wrong_answers(user.user_id).await {
        Ok(entries) => {
            log_api_success!("get_wrong_answers", user_id = user.user_id, count = entries.len(), "listed");
            Ok(Json(ApiResponse::success(entries)))
        }
        Err(e) => {
            log_api_error!("get_wrong_answers", user_id = user.user_id, error = e, "store failure");
            Err(ApiError::DatabaseError(e).to_response_with_context(ErrorContext::new("get_wrong_answers", "wrong_answer")))
        }
    }
}

pub async fn delete_wrong_answer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    log_api_start!("delete_wrong_answer", user_id = user.user_id);
    let context = ErrorContext::new("delete_wrong_answer", "wrong_answer").with_id(&id.to_string());

    match state.lessons.delete_wrong_answer(user.user_id, id).await {
        Ok(true) => {
            log_api_success!("delete_wrong_answer", user_id = user.user_id, "deleted");
            Ok(Json(ApiResponse::message("Wrong answer deleted")))
        }
        Ok(false) => Err(ApiError::NotFound(format!("Wrong answer '{}' not found", id)).to_response_with_context(context)),
        Err(e) => Err(ApiError::DatabaseError(e).to_response_with_context(context)),
    }
}

// Lesson endpoints
pub async fn get_level_categories(
    State(state): State<AppState>,
    Path(level_id): Path<i64>,
) -> ApiResult<Json<ApiResponse<Vec<LessonCategory>>>> {
    match state.lessons.categories_in_level(level_id).await {
        Ok(categories) => {
            info!(level_id, count = categories.len(), "Categories retrieved");
            Ok(Json(ApiResponse::success(categories)))
        }
        Err(e) => {
            let context = ErrorContext::new("get_level_categories", "lesson_level").with_id(&level_id.to_string());
            Err(ApiError::DatabaseError(e).to_response_with_context(context))
        }
    }
}

pub async fn get_topics(
    State(state): State<AppState>,
    Path(category_id): Path<i64>,
) -> ApiResult<Json<ApiResponse<Vec<Lesson>>>> {
    match state.lessons.lessons_in_category(category_id).await {
        Ok(lessons) => {
            info!(category_id, count = lessons.len(), "Lessons retrieved");
            Ok(Json(ApiResponse::success(lessons)))
        }
        Err(e) => {
            let context = ErrorContext::new("get_topics", "lesson_category").with_id(&category_id.to_string());
            Err(ApiError::DatabaseError(e).to_response_with_context(context))
        }
    }
}

pub async fn start_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<LessonRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<()>>)> {
    let Json(request) = payload.map_err(|rejection| rejected_body("start_lesson", rejection))?;
    let lesson_id = required_lesson_id("start_lesson", request)?;
    log_api_start!("start_lesson", user_id = user.user_id);
    let context = ErrorContext::new("start_lesson", "lesson").with_id(&lesson_id.to_string());

    match state.lessons.start_lesson(user.user_id, lesson_id).await {
        Ok(Some(StartLessonOutcome::Started)) => {
            log_api_success!("start_lesson", user_id = user.user_id, "started");
            Ok((StatusCode::CREATED, Json(ApiResponse::message("Lesson started"))))
        }
        Ok(Some(StartLessonOutcome::AlreadyInProgress)) => {
            Ok((StatusCode::OK, Json(ApiResponse::message("Lesson is already in progress"))))
        }
        Ok(Some(StartLessonOutcome::AlreadyCompleted)) => {
            Ok((StatusCode::OK, Json(ApiResponse::message("Lesson is already completed"))))
        }
        Ok(None) => Err(ApiError::NotFound(format!("Lesson {} not found", lesson_id)).to_response_with_context(context)),
        Err(e) => Err(ApiError::DatabaseError(e).to_response_with_context(context)),
    }
}

pub async fn complete_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<LessonRequest>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<ProgressSnapshot>>> {
    let Json(request) = payload.map_err(|rejection| rejected_body("complete_lesson", rejection))?;
    let lesson_id = required_lesson_id("complete_lesson", request)?;
    log_api_start!("complete_lesson", user_id = user.user_id);
    let context = ErrorContext::new("complete_lesson", "user_lesson").with_id(&lesson_id.to_string());

    match state.lessons.complete_lesson(user.user_id, lesson_id).await {
        Ok(CompleteLessonOutcome::Completed(snapshot)) => {
            log_api_success!("complete_lesson", user_id = user.user_id, "completed");
            Ok(Json(ApiResponse {
                success: true,
                data: Some(snapshot),
                message: Some("Lesson completed".to_string()),
            }))
        }
        Ok(CompleteLessonOutcome::AlreadyCompleted) => {
            log_api_warn!("complete_lesson", user_id = user.user_id, "lesson already completed");
            Ok(Json(ApiResponse::message("Lesson is already completed")))
        }
        Ok(CompleteLessonOutcome::NotStarted) => Err(ApiError::NotFound(format!("No progress found for lesson {}", lesson_id))
            .to_response_with_context(context.with_user_message("Lesson was never started"))),
        Err(e) => Err(ApiError::DatabaseError(e).to_response_with_context(context)),
    }
}

pub async fn get_completed_categories(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ApiResponse<Vec<i64>>>> {
    match state.lessons.completed_categories(user.user_id).await {
        Ok(categories) => {
            log_api_success!(
                "completed_categories",
                user_id = user.user_id,
                count = categories.len(),
                "listed"
            );
            Ok(Json(ApiResponse::success(categories)))
        }
        Err(e) => Err(ApiError::DatabaseError(e)
            .to_response_with_context(ErrorContext::new("completed_categories", "lesson_category"))),
    }
}

pub async fn get_lesson_statuses(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ApiResponse<Vec<LessonProgress>>>> {
    match state.lessons.lesson_statuses(user.user_id).await {
        Ok(statuses) => {
            log_api_success!("lesson_statuses", user_id = user.user_id, count = statuses.len(), "listed");
            Ok(Json(ApiResponse::success(statuses)))
        }
        Err(e) => Err(ApiError::DatabaseError(e).to_response_with_context(ErrorContext::new("lesson_statuses", "user_lesson"))),
    }
}

pub async fn continue_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ApiResponse<NextLesson>>> {
    log_api_start!("continue_lesson", user_id = user.user_id);
    let context = ErrorContext::new("continue_lesson", "lesson");

    match state.lessons.continue_lesson(user.user_id).await {
        Ok(ContinueLessonOutcome::Next(next)) => {
            log_api_success!("continue_lesson", user_id = user.user_id, "next lesson found");
            Ok(Json(ApiResponse::success(next)))
        }
        Ok(ContinueLessonOutcome::NoCompletedLesson) => {
            Err(ApiError::NotFound("No recently completed lesson".to_string()).to_response_with_context(context))
        }
        Ok(ContinueLessonOutcome::NoNextLesson) => {
            Err(ApiError::NotFound("No next lesson available".to_string()).to_response_with_context(context))
        }
        Err(e) => Err(ApiError::DatabaseError(e).to_response_with_context(context)),
    }
}

fn required_lesson_id(operation: &str, request: LessonRequest) -> ApiResult<i64> {
    request.lesson_id.ok_or_else(|| {
        ApiError::ValidationError("lessonId is required".to_string())
            .to_response_with_context(ErrorContext::new(operation, "lesson"))
    })
}

// Saved lessons
pub async fn save_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<LessonRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<()>>)> {
    let Json(request) = payload.map_err(|rejection| rejected_body("save_lesson", rejection))?;
    let lesson_id = required_lesson_id("save_lesson", request)?;
    log_api_start!("save_lesson", user_id = user.user_id);
    let context = ErrorContext::new("save_lesson", "saved_lesson").with_id(&lesson_id.to_string());

    match state.lessons.save_lesson(user.user_id, lesson_id).await {
        Ok(Some(SaveLessonOutcome::Saved)) => {
            log_api_success!("save_lesson", user_id = user.user_id, "saved");
            Ok((StatusCode::CREATED, Json(ApiResponse::message("Lesson saved"))))
        }
        Ok(Some(SaveLessonOutcome::AlreadySaved)) => {
            Ok((StatusCode::OK, Json(ApiResponse::message("Lesson is already saved"))))
        }
        Ok(None) => Err(ApiError::NotFound(format!("Lesson {} not found", lesson_id)).to_response_with_context(context)),
        Err(e) => Err(ApiError::DatabaseError(e).to_response_with_context(context)),
    }
}

pub async fn get_saved_lessons(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ApiResponse<Vec<SavedLesson>>>> {
    match state.lessons.saved_lessons(user.user_id).await {
        Ok(saved) => {
            log_api_success!("saved_lessons", user_id = user.user_id, count = saved.len(), "listed");
            Ok(Json(ApiResponse::success(saved)))
        }
        Err(e) => Err(ApiError::DatabaseError(e).to_response_with_context(ErrorContext::new("saved_lessons", "saved_lesson"))),
    }
}

pub async fn delete_saved_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(lesson_id): Path<i64>,
) -> ApiResult<Json<ApiResponse<()>>> {
    let context = ErrorContext::new("delete_saved_lesson", "saved_lesson").with_id(&lesson_id.to_string());

    match state.lessons.delete_saved_lesson(user.user_id, lesson_id).await {
        Ok(true) => {
            log_api_success!("delete_saved_lesson", user_id = user.user_id, "deleted");
            Ok(Json(ApiResponse::message("Saved lesson deleted")))
        }
        Ok(false) => {
            Err(ApiError::NotFound(format!("Saved lesson {} not found", lesson_id)).to_response_with_context(context))
        }
        Err(e) => Err(ApiError::DatabaseError(e).to_response_with_context(context)),
    }
}

// Progress stream
pub async fn progress_events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(user_id = user.user_id, "Progress stream opened");
    let receiver = state.notifier.subscribe();

    let events = stream::unfold((receiver, user.user_id), |(mut receiver, user_id)| async move {
        loop {
            match receiver.recv().await {
                Ok(event) if event.user_id() == user_id => {
                    let sse = Event::default()
                        .event(event.name())
                        .json_data(&event)
                        .unwrap_or_else(|_| Event::default().event(event.name()));
                    return Some((Ok::<_, Infallible>(sse), (receiver, user_id)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id, skipped, "Progress stream lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        // Quiz routes
        .route("/quiz/generate", get(generate_quiz))
        .route("/quiz/check", post(check_quiz))
        .route("/quiz/wrong-answers", get(get_wrong_answers))
        .route("/quiz/wrong-answers/:id", delete(delete_wrong_answer))

        // Lesson routes
        .route("/lessons/start", post(start_lesson))
        .route("/lessons/complete", put(complete_lesson))
        .route("/lessons/continue", get(continue_lesson))
        .route("/lessons/progress/categories", post(get_completed_categories))
        .route("/lessons/progress/topics", post(get_lesson_statuses))

        // Saved lessons
        .route("/review/saved", get(get_saved_lessons).post(save_lesson))
        .route("/review/saved/:lesson_id", delete(delete_saved_lesson))

        // Progress events
        .route("/events/progress", get(progress_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Catalog browsing is public; both routes share the `:id` segment
    Router::new()
        .route("/health", get(health))
        .route("/lessons/:id/categories", get(get_level_categories))
        .route("/lessons/:id/topics", get(get_topics))
        .merge(protected)
        .with_state(state)
}
