use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// An image held by the storage gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub storage_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// The recipe aggregate. Loaded, mutated and written back as one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<ImageRef>,
    pub gallery: Vec<ImageRef>,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
    pub notes: Vec<Note>,
    pub likes: i64,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Recipe {
    pub fn new(
        user_id: Uuid,
        category_id: Uuid,
        name: String,
        description: Option<String>,
        image: ImageRef,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            user_id,
            category_id: Some(category_id),
            name,
            description,
            image: Some(image),
            gallery: Vec::new(),
            ingredients: Vec::new(),
            steps: Vec::new(),
            notes: Vec::new(),
            likes: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if `storage_id` is the primary image or sits in the gallery.
    pub fn references(&self, storage_id: &str) -> bool {
        self.image.as_ref().is_some_and(|i| i.storage_id == storage_id)
            || self.gallery.iter().any(|i| i.storage_id == storage_id)
    }

    /// Every asset this recipe owns, primary first.
    pub fn storage_ids(&self) -> Vec<String> {
        self.image
            .iter()
            .chain(self.gallery.iter())
            .map(|i| i.storage_id.clone())
            .collect()
    }
}

#[derive(Debug, FromRow)]
pub struct RecipeRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub image_storage_id: Option<String>,
    pub gallery: Json<Vec<ImageRef>>,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
    pub notes: Json<Vec<Note>>,
    pub likes: i64,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<RecipeRow> for Recipe {
    fn from(r: RecipeRow) -> Self {
        let image = match (r.image_url, r.image_storage_id) {
            (Some(url), Some(storage_id)) => Some(ImageRef { url, storage_id }),
            _ => None,
        };
        Self {
            id: r.id,
            user_id: r.user_id,
            category_id: r.category_id,
            name: r.name,
            description: r.description,
            image,
            gallery: r.gallery.0,
            ingredients: r.ingredients,
            steps: r.steps,
            notes: r.notes.0,
            likes: r.likes,
            version: r.version,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
