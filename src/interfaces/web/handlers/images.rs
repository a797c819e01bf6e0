use axum::{Json, extract::State, extract::rejection::JsonRejection};
use tracing::info;

use super::super::{ApiError, AppState};
use crate::core::protocol::{GenerateImageRequest, ImageEditRequest, ImageTaskResponse};
use crate::core::tasks::ImageJob;

pub async fn generate_image_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<ImageTaskResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::from_rejection)?;
    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt is required"));
    }

    info!(
        "Text-to-image request, size {}",
        request.size.as_deref().unwrap_or("default")
    );
    let completed = state
        .images
        .run(ImageJob::Generate(request))
        .await
        .map_err(|e| ApiError::from_job("Image generation", e))?;

    Ok(Json(ImageTaskResponse {
        message: "Image generation successful".to_string(),
        results: completed.results,
        task_id: completed.task_id,
        details: completed.details,
    }))
}

pub async fn image_edit_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<ImageEditRequest>, JsonRejection>,
) -> Result<Json<ImageTaskResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::from_rejection)?;
    if request.base_image_data.trim().is_empty() || request.prompt().is_none() {
        return Err(ApiError::bad_request(
            "base_image_data and edit_prompt are required",
        ));
    }

    let function = request.function().to_string();
    info!(
        "Image edit ({}) request, size {}",
        function,
        request.size.as_deref().unwrap_or("default")
    );
    let completed = state
        .images
        .run(ImageJob::Edit(request))
        .await
        .map_err(|e| ApiError::from_job(&format!("Image edit ({})", function), e))?;

    Ok(Json(ImageTaskResponse {
        message: format!("Image edit ({}) successful", function),
        results: completed.results,
        task_id: completed.task_id,
        details: completed.details,
    }))
}
