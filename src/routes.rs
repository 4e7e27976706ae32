use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use std::{collections::HashMap, sync::Arc};
use parking_lot::RwLock;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use uuid::Uuid;

use crate::{
    controller::{ControllerError, Session},
    encoder::{EncodeError, ImageMime, SourceImage},
    gemini::ImageEditor,
    models::{DataUriUpload, ErrorBody, PromptUpdate, SessionView},
};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Uuid, Arc<Session>>>>,
    pub editor: Arc<dyn ImageEditor>,
}

impl AppState {
    pub fn new(editor: Arc<dyn ImageEditor>) -> Self {
        Self { sessions: Arc::default(), editor }
    }

    fn session(&self, id: Uuid) -> Result<Arc<Session>, ApiError> {
        self.sessions.read().get(&id).cloned().ok_or(ApiError::NotFound)
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/image", post(upload_image))
        .route("/api/sessions/:id/image/data-uri", post(upload_data_uri))
        .route("/api/sessions/:id/prompt", put(update_prompt))
        .route("/api/sessions/:id/submit", post(submit_edit))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    UnsupportedMedia(String),
    Busy(SessionView),
    Rejected(SessionView),
}

impl From<EncodeError> for ApiError {
    fn from(e: EncodeError) -> Self {
        match e {
            EncodeError::UnsupportedMime(_) => ApiError::UnsupportedMedia(e.to_string()),
            _ => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::BadRequest(error) => (StatusCode::BAD_REQUEST, Json(ErrorBody { error })).into_response(),
            ApiError::UnsupportedMedia(error) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, Json(ErrorBody { error })).into_response(),
            ApiError::Busy(view) => (StatusCode::CONFLICT, Json(view)).into_response(),
            ApiError::Rejected(view) => (StatusCode::UNPROCESSABLE_ENTITY, Json(view)).into_response(),
        }
    }
}

fn controller_error(session: &Session, err: ControllerError) -> ApiError {
    match err {
        ControllerError::Busy => ApiError::Busy(session.view()),
        ControllerError::MissingImage | ControllerError::EmptyPrompt => ApiError::Rejected(session.view()),
    }
}

pub async fn health() -> &'static str { "ok" }

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    let session = Arc::new(Session::new(state.editor.clone()));
    let view = session.view();
    state.sessions.write().insert(session.id, session);
    tracing::info!("🆕 Created session {}", view.id);
    (StatusCode::CREATED, Json(view))
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.session(id)?.view()))
}

pub async fn delete_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.sessions.write().remove(&id).ok_or(ApiError::NotFound)?;
    tracing::info!("🗑️ Closed session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Accepts exactly one file part. Text fields and empty file inputs (`filename=""`) are ignored.
pub async fn upload_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.session(id)?;

    let mut selected: Option<SourceImage> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.body_text()))? {
        if field.file_name().map_or(true, str::is_empty) {
            continue;
        }
        if selected.is_some() {
            return Err(ApiError::BadRequest("exactly one image file may be uploaded".into()));
        }
        let mime: ImageMime = field.content_type().unwrap_or_default().parse()?;
        let name = field.file_name().unwrap_or("image").to_string();
        let data = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
        tracing::info!("📤 Received '{}' ({}, {} bytes) for session {}", name, mime, data.len(), id);
        selected = Some(SourceImage::from_bytes(name, mime, data));
    }

    let image = selected.ok_or_else(|| ApiError::BadRequest("no image file in upload".into()))?;
    session.select_image(image).map(Json).map_err(|e| controller_error(&session, e))
}

pub async fn upload_data_uri(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<DataUriUpload>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.session(id)?;
    let image = SourceImage::from_data_uri(body.name.unwrap_or_else(|| "image".to_string()), body.data_uri)?;
    session.select_image(image).map(Json).map_err(|e| controller_error(&session, e))
}

pub async fn update_prompt(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<PromptUpdate>,
) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.session(id)?.set_instruction(body.prompt)))
}

/// Adapter failures are workflow state, so they come back as 200 with `state: "failed"`.
pub async fn submit_edit(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    let session = state.session(id)?;
    tracing::info!("🎯 Submitting edit for session {}", id);
    session.submit().await.map(Json).map_err(|e| controller_error(&session, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{format_data_uri, tests::{png_fixture, PNG_1X1_B64}};
    use crate::gemini::EditError;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{header, Request};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    #[derive(Default)]
    struct EchoEditor { calls: AtomicUsize }

    #[async_trait]
    impl ImageEditor for EchoEditor {
        async fn generate_edit(&self, image: &SourceImage, instruction: &str) -> Result<String, EditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if instruction.contains("refuse") {
                return Err(EditError::NoImageProduced);
            }
            image.preview_uri().ok_or_else(|| EditError::Transport("unreadable".into()))
        }
    }

    fn app() -> (Router, Arc<EchoEditor>) {
        let editor = Arc::new(EchoEditor::default());
        (router(AppState::new(editor.clone()), 1024 * 1024), editor)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_request(uri: &str, files: &[(&str, &str, &[u8])]) -> Request<Body> {
        let boundary = "robo-test-boundary";
        let mut body = Vec::new();
        for (name, mime, bytes) in files {
            body.extend_from_slice(format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {mime}\r\n\r\n"
            ).as_bytes());
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn create(app: &Router) -> String {
        let (status, view) = send(app, Request::builder().method("POST").uri("/api/sessions").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(view["state"], "idle");
        view["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = app();
        let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (app, _) = app();
        let uri = format!("/api/sessions/{}", Uuid::new_v4());
        let (status, _) = send(&app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submit_without_image_is_rejected_without_a_call() {
        let (app, editor) = app();
        let id = create(&app).await;
        let (status, view) = send(&app, Request::builder().method("POST").uri(format!("/api/sessions/{id}/submit")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(view["error"], "Please upload an image first.");
        assert_eq!(view["state"], "idle");
        assert_eq!(editor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn multipart_upload_then_submit() {
        let (app, editor) = app();
        let id = create(&app).await;
        let png = png_fixture();

        let (status, view) = send(&app, multipart_request(&format!("/api/sessions/{id}/image"), &[("pixel.png", "image/png", png.as_slice())])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], "image_selected");
        assert_eq!(view["image_name"], "pixel.png");
        assert_eq!(view["image_mime"], "image/png");
        assert_eq!(view["can_submit"], true);

        let (status, view) = send(&app, Request::builder().method("POST").uri(format!("/api/sessions/{id}/submit")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], "succeeded");
        assert_eq!(view["result"], format!("data:image/png;base64,{PNG_1X1_B64}"));
        assert_eq!(view["error"], serde_json::Value::Null);
        assert_eq!(editor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected() {
        let (app, editor) = app();
        let id = create(&app).await;
        let upload = json!({ "name": "pixel.png", "dataUri": format_data_uri("image/png", PNG_1X1_B64) });
        let (status, _) = send(&app, json_request("POST", &format!("/api/sessions/{id}/image/data-uri"), upload)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, view) = send(&app, json_request("PUT", &format!("/api/sessions/{id}/prompt"), json!({ "prompt": "  " }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["can_submit"], false);

        let (status, view) = send(&app, Request::builder().method("POST").uri(format!("/api/sessions/{id}/submit")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(view["error"], "Please enter a text prompt describing your edit.");
        assert_eq!(editor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refusal_is_reported_as_failed_state() {
        let (app, _) = app();
        let id = create(&app).await;
        let upload = json!({ "dataUri": format_data_uri("image/png", PNG_1X1_B64) });
        send(&app, json_request("POST", &format!("/api/sessions/{id}/image/data-uri"), upload)).await;
        send(&app, json_request("PUT", &format!("/api/sessions/{id}/prompt"), json!({ "prompt": "please refuse" }))).await;

        let (status, view) = send(&app, Request::builder().method("POST").uri(format!("/api/sessions/{id}/submit")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], "failed");
        assert_eq!(view["result"], serde_json::Value::Null);
        assert_eq!(view["error"], "No image was generated in the response. The model may have refused the request.");
    }

    #[tokio::test]
    async fn unsupported_upload_type_is_415() {
        let (app, _) = app();
        let id = create(&app).await;
        let (status, body) = send(&app, multipart_request(&format!("/api/sessions/{id}/image"), &[("anim.gif", "image/gif", &b"GIF89a"[..])])).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body["error"].as_str().unwrap().contains("image/gif"));
    }

    #[tokio::test]
    async fn empty_file_input_counts_as_no_selection() {
        let (app, _) = app();
        let id = create(&app).await;
        let request = multipart_request(
            &format!("/api/sessions/{id}/image"),
            &[("", "application/octet-stream", &b""[..])],
        );
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "no image file in upload");
    }

    #[tokio::test]
    async fn two_files_are_rejected() {
        let (app, _) = app();
        let id = create(&app).await;
        let png = png_fixture();
        let request = multipart_request(
            &format!("/api/sessions/{id}/image"),
            &[("a.png", "image/png", png.as_slice()), ("b.png", "image/png", png.as_slice())],
        );
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, view) = send(&app, Request::builder().uri(format!("/api/sessions/{id}")).body(Body::empty()).unwrap()).await;
        assert_eq!(view["has_image"], false);
    }

    #[tokio::test]
    async fn deleted_session_is_gone() {
        let (app, _) = app();
        let id = create(&app).await;
        let delete = || Request::builder().method("DELETE").uri(format!("/api/sessions/{id}")).body(Body::empty()).unwrap();
        assert_eq!(send(&app, delete()).await.0, StatusCode::NO_CONTENT);
        assert_eq!(send(&app, delete()).await.0, StatusCode::NOT_FOUND);
    }
}
