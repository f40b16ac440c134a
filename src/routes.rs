use std::{future::Future, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use parking_lot::RwLock;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    codec,
    error::{ApiError, FlowError},
    gallery::{download_name, GalleryEntry},
    models::{
        EditPosterRequest, GallerySaveRequest, GeneratePosterRequest, ImageInput, InputView, PosterView, Session,
        Slot, SuggestRequest, SuggestResponse,
    },
    pipeline::{GenerateInput, Pipeline, StatusView},
};

pub const POSTER_DOWNLOAD_NAME: &str = "ai-poster.png";

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<RwLock<Session>>,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { session: Arc::default(), pipeline: Arc::new(pipeline) }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/inputs", get(list_inputs))
        .route("/api/inputs/products", post(add_products))
        .route("/api/inputs/products/:id", delete(remove_product))
        .route("/api/inputs/reference", put(set_reference).delete(clear_reference))
        .route("/api/inputs/logo", put(set_logo).delete(clear_logo))
        .route("/api/previews/:id", get(input_preview))
        .route("/api/concept/suggest", post(suggest_concept))
        .route("/api/poster", get(get_poster))
        .route("/api/poster/generate", post(generate_poster))
        .route("/api/poster/edit", post(edit_poster))
        .route("/api/poster/upload", post(upload_poster))
        .route("/api/poster/download", get(download_poster))
        .route("/api/history/undo", post(undo))
        .route("/api/history/redo", post(redo))
        .route("/api/session/reset", post(start_over))
        .route("/api/status", get(status))
        .route("/api/gallery", get(list_gallery).post(save_to_gallery))
        .route("/api/gallery/:index/download", get(download_gallery_entry))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

/// Runs a flow on its own task so a dropped connection does not cancel it midway.
async fn run_detached<T, F>(flow: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, FlowError>> + Send + 'static,
{
    tokio::spawn(flow)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

async fn read_images(mut multipart: Multipart) -> Result<Vec<ImageInput>, ApiError> {
    let mut inputs = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.to_string()))? {
        let name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let input = ImageInput::new(bytes).map_err(|e| {
            tracing::warn!("⚠️ Rejected upload '{}': {}", name, e);
            e
        })?;
        inputs.push(input);
    }
    if inputs.is_empty() {
        return Err(ApiError::BadRequest("no image file in upload".into()));
    }
    Ok(inputs)
}

async fn read_single_image(multipart: Multipart) -> Result<ImageInput, ApiError> {
    let mut inputs = read_images(multipart).await?;
    Ok(inputs.swap_remove(0))
}

pub async fn list_inputs(State(state): State<AppState>) -> Json<Vec<InputView>> {
    Json(state.session.read().inputs.views())
}

pub async fn add_products(State(state): State<AppState>, multipart: Multipart) -> Result<Json<Vec<InputView>>, ApiError> {
    let inputs = read_images(multipart).await?;
    let mut guard = state.session.write();
    let views: Vec<InputView> = inputs.into_iter().map(|i| guard.inputs.add_product(i)).collect();
    tracing::info!("📸 Added {} product image(s), {} total", views.len(), guard.inputs.products().len());
    Ok(Json(views))
}

pub async fn remove_product(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    if state.session.write().inputs.remove_product(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("no product image {id}")))
    }
}

pub async fn set_reference(State(state): State<AppState>, multipart: Multipart) -> Result<Json<InputView>, ApiError> {
    let input = read_single_image(multipart).await?;
    let view = input.view(Slot::Reference);
    state.session.write().inputs.set_reference(input);
    Ok(Json(view))
}

pub async fn clear_reference(State(state): State<AppState>) -> StatusCode {
    state.session.write().inputs.clear_reference();
    StatusCode::NO_CONTENT
}

pub async fn set_logo(State(state): State<AppState>, multipart: Multipart) -> Result<Json<InputView>, ApiError> {
    let input = read_single_image(multipart).await?;
    let view = input.view(Slot::Logo);
    state.session.write().inputs.set_logo(input);
    Ok(Json(view))
}

pub async fn clear_logo(State(state): State<AppState>) -> StatusCode {
    state.session.write().inputs.clear_logo();
    StatusCode::NO_CONTENT
}

pub async fn input_preview(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    let found = state
        .session
        .read()
        .inputs
        .find(id)
        .map(|input| (input.media_type.clone(), input.raw.clone()));
    match found {
        Some((media_type, raw)) => ([(header::CONTENT_TYPE, media_type)], raw).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn suggest_concept(
    State(state): State<AppState>,
    Json(body): Json<SuggestRequest>,
) -> Result<Json<SuggestResponse>, ApiError> {
    let (products, reference) = {
        let guard = state.session.read();
        (guard.inputs.products().to_vec(), guard.inputs.reference().cloned())
    };
    let pipeline = state.pipeline.clone();
    let concept = run_detached(async move { pipeline.suggest(products, body.hint, reference).await }).await?;
    Ok(Json(SuggestResponse { concept }))
}

pub async fn generate_poster(
    State(state): State<AppState>,
    Json(body): Json<GeneratePosterRequest>,
) -> Result<Json<PosterView>, ApiError> {
    let input = GenerateInput::from_slots(&state.session.read().inputs, body.concept, body.aspect_ratio);
    tracing::info!("🚀 Generating {} poster for concept: {}", input.aspect_ratio, input.concept);
    let view = run_detached(async move { state.pipeline.generate(&state.session, input).await }).await?;
    Ok(Json(view))
}

pub async fn edit_poster(
    State(state): State<AppState>,
    Json(body): Json<EditPosterRequest>,
) -> Result<Json<PosterView>, ApiError> {
    let view = run_detached(async move { state.pipeline.edit(&state.session, body.instruction).await }).await?;
    Ok(Json(view))
}

pub async fn upload_poster(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<PosterView>, ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest("no image file in upload".into()))?;
    let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.pipeline.upload_for_editing(&state.session, bytes)?))
}

pub async fn get_poster(State(state): State<AppState>) -> Json<PosterView> {
    Json(state.session.read().poster_view())
}

pub async fn download_poster(State(state): State<AppState>) -> Result<Response, ApiError> {
    let current = state.session.read().history.current().cloned();
    let artifact = current.ok_or_else(|| ApiError::NotFound("no poster to download".into()))?;
    let bytes = codec::decode(artifact.image())?;
    Ok(attachment(artifact.media_type(), POSTER_DOWNLOAD_NAME, bytes))
}

fn attachment(media_type: &str, file_name: &str, bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, media_type.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
        ],
        bytes,
    )
        .into_response()
}

pub async fn undo(State(state): State<AppState>) -> Result<Json<PosterView>, ApiError> {
    state.pipeline.gate().ensure_idle()?;
    let mut guard = state.session.write();
    guard.history.undo();
    Ok(Json(guard.poster_view()))
}

pub async fn redo(State(state): State<AppState>) -> Result<Json<PosterView>, ApiError> {
    state.pipeline.gate().ensure_idle()?;
    let mut guard = state.session.write();
    guard.history.redo();
    Ok(Json(guard.poster_view()))
}

pub async fn start_over(State(state): State<AppState>) -> Result<Json<PosterView>, ApiError> {
    state.pipeline.gate().ensure_idle()?;
    let mut guard = state.session.write();
    guard.start_over();
    tracing::info!("🔄 Session reset");
    Ok(Json(guard.poster_view()))
}

pub async fn status(State(state): State<AppState>) -> Json<StatusView> {
    Json(state.pipeline.gate().status())
}

#[derive(Debug, Serialize)]
pub struct GalleryView {
    pub saved: bool,
    pub entries: Vec<GalleryEntry>,
}

pub async fn list_gallery(State(state): State<AppState>) -> Json<Vec<GalleryEntry>> {
    Json(state.session.read().gallery.entries().to_vec())
}

pub async fn save_to_gallery(
    State(state): State<AppState>,
    Json(body): Json<GallerySaveRequest>,
) -> Json<GalleryView> {
    let mut guard = state.session.write();
    let saved = guard.gallery.save(body.reference);
    Json(GalleryView { saved, entries: guard.gallery.entries().to_vec() })
}

pub async fn download_gallery_entry(
    Path(index): Path<usize>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let reference = state
        .session
        .read()
        .gallery
        .get(index)
        .map(|entry| entry.reference.clone())
        .ok_or_else(|| ApiError::NotFound(format!("no saved poster at {index}")))?;
    let image = codec::parse_data_url(&reference)?;
    let bytes = codec::decode(&image)?;
    Ok(attachment(&image.media_type, &download_name(index), bytes))
}
