use tracing::{info, warn};
use uuid::Uuid;

use super::repo_types::Category;
use crate::{
    error::{AppError, Missing},
    state::AppState,
};

pub async fn create_category(st: &AppState, user_id: Uuid, name: &str) -> Result<Category, AppError> {
    let category = Category::new(user_id, name.to_string());
    st.categories.insert(&category).await?;
    info!(category_id = %category.id, %user_id, "category created");
    Ok(category)
}

pub async fn get_category(st: &AppState, id: Uuid, user_id: Uuid) -> Result<Category, AppError> {
    st.categories
        .find(id, user_id)
        .await?
        .ok_or(AppError::NotFound(Missing::Category))
}

pub async fn list_categories(st: &AppState, user_id: Uuid) -> Result<Vec<Category>, AppError> {
    Ok(st.categories.list(user_id).await?)
}

pub async fn rename_category(
    st: &AppState,
    id: Uuid,
    user_id: Uuid,
    name: &str,
) -> Result<Category, AppError> {
    st.categories
        .rename(id, user_id, name)
        .await?
        .ok_or(AppError::NotFound(Missing::Category))
}

/// Deletes the category, then detaches its recipes. The two writes are
/// not atomic; a crash in between leaves recipes pointing at a deleted
/// category, which readers treat as uncategorised.
pub async fn delete_category(st: &AppState, id: Uuid, user_id: Uuid) -> Result<(), AppError> {
    if !st.categories.delete(id, user_id).await? {
        return Err(AppError::NotFound(Missing::Category));
    }
    let detached = match st.recipes.clear_category(id).await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, category_id = %id, "category deleted but recipes still reference it");
            return Err(e.into());
        }
    };
    info!(category_id = %id, detached, "category deleted");
    Ok(())
}
