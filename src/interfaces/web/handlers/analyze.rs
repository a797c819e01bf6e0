use axum::{Json, extract::State, extract::rejection::JsonRejection};
use tracing::info;

use super::super::{ApiError, AppState};
use crate::core::protocol::{AnalysisDetails, AnalyzeImageRequest, AnalyzeImageResponse};

pub async fn analyze_image_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeImageRequest>, JsonRejection>,
) -> Result<Json<AnalyzeImageResponse>, ApiError> {
    let Json(request) = payload.map_err(ApiError::from_rejection)?;
    if request.image_data_b64.trim().is_empty() {
        return Err(ApiError::bad_request("imageDataB64 is required"));
    }

    info!("Image analysis request");
    let analysis = state
        .assistant
        .analyze_image(&request.image_data_b64, request.question())
        .await
        .map_err(|e| ApiError::from_chat("Image analysis", e))?;

    Ok(Json(AnalyzeImageResponse {
        message: "Image analysis successful".to_string(),
        analysis: analysis.text,
        details: AnalysisDetails {
            model: analysis.model,
            usage: analysis.usage,
        },
    }))
}
