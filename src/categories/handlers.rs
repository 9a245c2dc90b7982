use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::CategoryRequest;
use super::repo_types::Category;
use super::services;
use crate::{
    auth::AuthUser,
    error::{ApiResponse, AppError},
    state::AppState,
};

pub fn category_routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/:id",
            get(get_category).put(rename_category).delete(delete_category),
        )
}

fn required_name(body: Result<Json<CategoryRequest>, JsonRejection>) -> Result<String, AppError> {
    let Json(body) = body.map_err(|e| AppError::validation(e.body_text()))?;
    body.required_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::validation("Name is required"))
}

#[instrument(skip(state))]
pub async fn list_categories(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ApiResponse<Vec<Category>>>, AppError> {
    Ok(ApiResponse::ok(services::list_categories(&state, user_id).await?))
}

#[instrument(skip(state, body))]
pub async fn create_category(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<CategoryRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Category>>, AppError> {
    let name = required_name(body)?;
    let category = services::create_category(&state, user_id, &name).await?;
    Ok(ApiResponse::ok_with_message(category, "Category created successfully"))
}

#[instrument(skip(state))]
pub async fn get_category(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Category>>, AppError> {
    Ok(ApiResponse::ok(services::get_category(&state, id, user_id).await?))
}

#[instrument(skip(state, body))]
pub async fn rename_category(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    body: Result<Json<CategoryRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Category>>, AppError> {
    let name = required_name(body)?;
    let category = services::rename_category(&state, id, user_id, &name).await?;
    Ok(ApiResponse::ok_with_message(category, "Category updated successfully"))
}

#[instrument(skip(state))]
pub async fn delete_category(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    services::delete_category(&state, id, user_id).await?;
    Ok(ApiResponse::message("Category deleted successfully"))
}
