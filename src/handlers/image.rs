// src/handlers/image.rs
use crate::error::ApiError;
use crate::models::{
    AnalyzeImageResponse, CaptionResponse, ChatResponse, ImageQuestionRequest, DEFAULT_SESSION_ID,
};
use crate::preprocess::preprocess_image;
use crate::vision_client::VisualQa;
use crate::AppState;
use axum::{
    extract::{multipart::Multipart, DefaultBodyLimit, Extension},
    response::Json,
    routing::post,
    Router,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

// 16MB max upload size
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub fn image_routes() -> Router {
    Router::new()
        .route("/analyze-image", post(analyze_image))
        .route("/get-caption", post(get_caption))
        .route("/image-question", post(image_question))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

struct ImageUpload {
    data: Vec<u8>,
    original_name: String,
    session_id: String,
}

/// Pulls the `image` file and optional `session_id` text field out of a
/// multipart body.
async fn read_image_upload(mut multipart: Multipart) -> Result<ImageUpload, ApiError> {
    let mut image: Option<(Vec<u8>, String)> = None;
    let mut session_id = DEFAULT_SESSION_ID.to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("image") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                if filename.is_empty() {
                    return Err(ApiError::Validation("No image selected".to_string()));
                }
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("failed to read upload: {}", e)))?;
                image = Some((data.to_vec(), filename));
            }
            Some("session_id") => {
                if let Ok(value) = field.text().await {
                    if !value.trim().is_empty() {
                        session_id = value.trim().to_string();
                    }
                }
            }
            _ => continue,
        }
    }

    let (data, original_name) =
        image.ok_or_else(|| ApiError::Validation("No image provided".to_string()))?;

    Ok(ImageUpload {
        data,
        original_name,
        session_id,
    })
}

/// Keeps only a safe alphanumeric extension from the client's filename.
fn sanitized_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

/// Writes the upload under a generated unique filename, discarding the
/// client-supplied name entirely.
async fn save_upload(upload_dir: &Path, upload: &ImageUpload) -> Result<PathBuf, ApiError> {
    fs::create_dir_all(upload_dir).await?;

    let filename = match sanitized_extension(&upload.original_name) {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    };
    let path = upload_dir.join(filename);

    let mut file = fs::File::create(&path).await?;
    file.write_all(&upload.data).await?;
    file.flush().await?;

    tracing::info!(
        "Saved upload '{}' -> {} ({} bytes)",
        upload.original_name,
        path.display(),
        upload.data.len()
    );
    Ok(path)
}

async fn analyze_image(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<AnalyzeImageResponse>, ApiError> {
    let upload = read_image_upload(multipart).await?;
    let path = save_upload(&state.upload_dir, &upload).await?;

    preprocess_image(&path)?;

    let mut analysis = state.vision.classify(&path).await?;

    // Caption is extra context; its failure does not fail the analysis.
    match state.vision.caption(&path).await {
        Ok(caption) => analysis.caption = Some(caption),
        Err(e) => tracing::warn!("Captioning failed for {}: {}", path.display(), e),
    }

    let session = state.sessions.get_or_create(&upload.session_id).await;
    session.lock().await.record_image_context(&analysis);

    Ok(Json(AnalyzeImageResponse {
        success: true,
        descriptions: analysis.descriptions,
        summary: analysis.summary,
        caption: analysis.caption,
        image_path: path.display().to_string(),
    }))
}

async fn get_caption(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<CaptionResponse>, ApiError> {
    let upload = read_image_upload(multipart).await?;
    let path = save_upload(&state.upload_dir, &upload).await?;

    let caption = state.vision.caption(&path).await?;

    Ok(Json(CaptionResponse {
        success: true,
        caption,
        image_path: path.display().to_string(),
    }))
}

/// Maps a client-supplied image path back into the upload directory. Only
/// the final filename component is honored, so traversal cannot escape it.
fn resolve_upload_path(upload_dir: &Path, image_path: &str) -> Result<PathBuf, ApiError> {
    let filename = Path::new(image_path)
        .file_name()
        .ok_or_else(|| ApiError::Validation("Invalid image path".to_string()))?;
    Ok(upload_dir.join(filename))
}

async fn image_question(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ImageQuestionRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.image_path.trim().is_empty() || req.question.trim().is_empty() {
        return Err(ApiError::Validation(
            "Image path and question required".to_string(),
        ));
    }

    let full_path = resolve_upload_path(&state.upload_dir, &req.image_path)?;
    if !fs::try_exists(&full_path).await.unwrap_or(false) {
        return Err(ApiError::NotFound(format!(
            "Image not found: {}",
            req.image_path
        )));
    }

    // The dedicated model wins when it is loaded and answers; anything else
    // degrades to the chat model with the stored image context.
    if let VisualQa::Available(client) = &state.visual_qa {
        match client.answer(&full_path, &req.question).await {
            Ok(answer) => {
                return Ok(Json(ChatResponse {
                    success: true,
                    response: answer,
                }))
            }
            Err(e) => tracing::warn!("Visual QA failed, falling back to chat model: {}", e),
        }
    }

    let session = state.sessions.get_or_create(&req.session_id).await;
    let response = session.lock().await.answer_about_image(&req.question).await?;

    Ok(Json(ChatResponse {
        success: true,
        response,
    }))
}
