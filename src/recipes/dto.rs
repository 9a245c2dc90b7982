use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::repo_types::Recipe;
use crate::error::AppError;

/// One discrete edit submitted as JSON against `PATCH /recipes/:id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeAction {
    Like,
    AddIngredient(String),
    DeleteIngredient(usize),
    AddStep(String),
    DeleteStep(usize),
    AddNote(String),
    DeleteNote(usize),
    SetMainImage(String),
    DeleteGalleryImage(String),
    /// No `action` tag: assign the provided fields directly.
    UpdateFields(FieldUpdate),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FieldUpdate {
    pub name: Option<String>,
    /// Absent leaves the description alone, `null` clears it.
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
}

fn present<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(de).map(Some)
}

/// Accepted spellings of the image handle, checked in this order.
const IMAGE_ID_KEYS: [&str; 3] = ["storage_id", "storageId", "public_id"];

impl RecipeAction {
    /// Validates a flat `{action?, ...payload}` body into a typed action.
    pub fn from_body(body: Value) -> Result<Self, AppError> {
        let tag = match body.get("action") {
            None | Some(Value::Null) => {
                let fields: FieldUpdate = serde_json::from_value(body)
                    .map_err(|e| AppError::validation(format!("Invalid fields: {}", e)))?;
                if let Some(name) = &fields.name {
                    if name.trim().is_empty() {
                        return Err(AppError::validation("Name is required"));
                    }
                }
                return Ok(RecipeAction::UpdateFields(fields));
            }
            Some(Value::String(tag)) => tag.as_str(),
            Some(other) => return Err(AppError::InvalidAction(other.to_string())),
        };

        let action = match tag {
            "like" => RecipeAction::Like,
            "add-ingredient" => RecipeAction::AddIngredient(required_text(&body, "ingredient")?),
            "delete-ingredient" => RecipeAction::DeleteIngredient(required_index(&body)?),
            "add-step" => RecipeAction::AddStep(required_text(&body, "step")?),
            "delete-step" => RecipeAction::DeleteStep(required_index(&body)?),
            "add-note" => RecipeAction::AddNote(required_text(&body, "note")?),
            "delete-note" => RecipeAction::DeleteNote(required_index(&body)?),
            "set-main-image" => RecipeAction::SetMainImage(required_image(&body)?),
            "delete-gallery-image" => RecipeAction::DeleteGalleryImage(required_image(&body)?),
            other => return Err(AppError::InvalidAction(other.to_string())),
        };
        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecipeAction::Like => "like",
            RecipeAction::AddIngredient(_) => "add-ingredient",
            RecipeAction::DeleteIngredient(_) => "delete-ingredient",
            RecipeAction::AddStep(_) => "add-step",
            RecipeAction::DeleteStep(_) => "delete-step",
            RecipeAction::AddNote(_) => "add-note",
            RecipeAction::DeleteNote(_) => "delete-note",
            RecipeAction::SetMainImage(_) => "set-main-image",
            RecipeAction::DeleteGalleryImage(_) => "delete-gallery-image",
            RecipeAction::UpdateFields(_) => "update-fields",
        }
    }
}

fn required_text(body: &Value, field: &str) -> Result<String, AppError> {
    match body.get(field).and_then(Value::as_str).map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(AppError::validation(format!("{} is required", field))),
    }
}

fn required_index(body: &Value) -> Result<usize, AppError> {
    body.get("index")
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| AppError::validation("index must be a non-negative integer"))
}

fn required_image(body: &Value) -> Result<String, AppError> {
    let image = body
        .get("image")
        .ok_or_else(|| AppError::validation("image is required"))?;
    match IMAGE_ID_KEYS
        .iter()
        .find_map(|key| image.get(*key))
        .and_then(Value::as_str)
    {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(AppError::validation("image.storage_id is required")),
    }
}

/// Which multipart field a file arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadField {
    File,
    GalleryFiles,
}

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: Option<String>,
    pub content_type: String,
    pub body: Bytes,
}

/// Multipart `PATCH` payload: optional new primary image plus gallery files.
#[derive(Debug, Default)]
pub struct ImageUploads {
    pub main: Option<UploadFile>,
    pub gallery: Vec<UploadFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFailure {
    pub field: UploadField,
    /// Position within the field, in submission order.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub message: String,
}

/// What a multipart `PATCH` answers with: the persisted recipe and the
/// files that did not make it.
#[derive(Debug, Serialize)]
pub struct UploadOutcome {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub upload_failures: Vec<UploadFailure>,
}

/// Multipart `POST /recipes` payload.
#[derive(Debug, Default)]
pub struct NewRecipeForm {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub file: Option<UploadFile>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default, alias = "categoryId")]
    pub category_id: Option<Uuid>,
}
