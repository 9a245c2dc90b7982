use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use super::dto::{ImageUploads, ListQuery, NewRecipeForm, RecipeAction, UploadFile};
use super::repo_types::Recipe;
use super::services;
use crate::{
    auth::AuthUser,
    error::{ApiResponse, AppError},
    state::AppState,
};

pub fn recipe_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/recipes/:id",
            get(get_recipe).patch(patch_recipe).delete(delete_recipe),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

#[instrument(skip(state))]
pub async fn list_recipes(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<Recipe>>>, AppError> {
    let recipes = services::list_recipes(&state, user_id, q.category_id).await?;
    Ok(ApiResponse::ok(recipes))
}

#[instrument(skip(state))]
pub async fn get_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Recipe>>, AppError> {
    let recipe = services::load_recipe(&state, id, user_id).await?;
    Ok(ApiResponse::ok(recipe))
}

#[instrument(skip(state))]
pub async fn delete_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    services::delete_recipe(&state, id, user_id).await?;
    Ok(ApiResponse::message("Recipe deleted"))
}

/// POST /recipes (multipart): name, description?, category_id, file
#[instrument(skip(state, mp))]
pub async fn create_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut form = NewRecipeForm::default();
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "name" => form.name = Some(field.text().await.map_err(bad_multipart)?),
            "description" => form.description = Some(field.text().await.map_err(bad_multipart)?),
            "category_id" | "categoryId" => {
                form.category_id = Some(field.text().await.map_err(bad_multipart)?)
            }
            "file" => form.file = Some(read_file(field).await?),
            _ => {}
        }
    }

    let recipe = services::create_recipe(&state, user_id, form).await?;
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/v1/recipes/{}", recipe.id))],
        ApiResponse::ok(recipe),
    ))
}

/// PATCH /recipes/:id
/// multipart: `file` and `galleryFiles`; otherwise JSON `{action?, ...payload}`
#[instrument(skip(state, req))]
pub async fn patch_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    req: Request,
) -> Result<Response, AppError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let mp = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        let uploads = read_uploads(mp).await?;
        let outcome = services::upload_images(&state, id, user_id, uploads).await?;
        return Ok(ApiResponse::ok(outcome).into_response());
    }

    let Json(body) = Json::<Value>::from_request(req, &state)
        .await
        .map_err(|e| AppError::validation(e.body_text()))?;
    let action = RecipeAction::from_body(body)?;
    let recipe = services::apply_action(&state, id, user_id, action).await?;
    Ok(ApiResponse::ok(recipe).into_response())
}

async fn read_uploads(mut mp: Multipart) -> Result<ImageUploads, AppError> {
    let mut uploads = ImageUploads::default();
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => uploads.main = Some(read_file(field).await?),
            "galleryFiles" | "galleryFiles[]" | "gallery_files" => {
                uploads.gallery.push(read_file(field).await?)
            }
            _ => {}
        }
    }
    Ok(uploads)
}

async fn read_file(field: axum::extract::multipart::Field<'_>) -> Result<UploadFile, AppError> {
    let file_name = field.file_name().map(|s| s.to_string());
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field.bytes().await.map_err(bad_multipart)?;
    Ok(UploadFile {
        file_name,
        content_type,
        body,
    })
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::validation(e.body_text())
}
