use anyhow::Context;
use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::repo_types::{Recipe, RecipeRow};

const RECIPE_COLUMNS: &str = r#"
    id, user_id, category_id, name, description, image_url, image_storage_id,
    gallery, ingredients, steps, notes, likes, version, created_at, updated_at
"#;

#[async_trait]
pub trait RecipeRepo: Send + Sync {
    async fn insert(&self, recipe: &Recipe) -> anyhow::Result<()>;

    /// Owner-scoped lookup; another owner's recipe is indistinguishable from none.
    async fn find(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Recipe>>;

    async fn list(&self, user_id: Uuid, category_id: Option<Uuid>) -> anyhow::Result<Vec<Recipe>>;

    /// Rewrites the whole document if its stored version still equals
    /// `recipe.version`. Returns the stored snapshot, or `None` when the
    /// version moved on (or the row is gone).
    async fn save(&self, recipe: &Recipe) -> anyhow::Result<Option<Recipe>>;

    async fn delete(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Recipe>>;

    /// Detaches every recipe from `category_id`; returns how many changed.
    async fn clear_category(&self, category_id: Uuid) -> anyhow::Result<u64>;
}

pub struct PgRecipeRepo {
    db: PgPool,
}

impl PgRecipeRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecipeRepo for PgRecipeRepo {
    async fn insert(&self, recipe: &Recipe) -> anyhow::Result<()> {
        let (image_url, image_storage_id) = match &recipe.image {
            Some(i) => (Some(i.url.clone()), Some(i.storage_id.clone())),
            None => (None, None),
        };
        sqlx::query(
            r#"
            INSERT INTO recipes (id, user_id, category_id, name, description, image_url,
                                 image_storage_id, gallery, ingredients, steps, notes,
                                 likes, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(recipe.id)
        .bind(recipe.user_id)
        .bind(recipe.category_id)
        .bind(&recipe.name)
        .bind(&recipe.description)
        .bind(image_url)
        .bind(image_storage_id)
        .bind(Json(&recipe.gallery))
        .bind(recipe.ingredients.clone())
        .bind(recipe.steps.clone())
        .bind(Json(&recipe.notes))
        .bind(recipe.likes)
        .bind(recipe.version)
        .bind(recipe.created_at)
        .bind(recipe.updated_at)
        .execute(&self.db)
        .await
        .context("insert recipe")?;
        Ok(())
    }

    async fn find(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Recipe>> {
        let row = sqlx::query_as::<_, RecipeRow>(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("find recipe")?;
        Ok(row.map(Recipe::from))
    }

    async fn list(&self, user_id: Uuid, category_id: Option<Uuid>) -> anyhow::Result<Vec<Recipe>> {
        let rows = sqlx::query_as::<_, RecipeRow>(&format!(
            r#"
            SELECT {RECIPE_COLUMNS}
              FROM recipes
             WHERE user_id = $1
               AND ($2::uuid IS NULL OR category_id = $2)
             ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .bind(category_id)
        .fetch_all(&self.db)
        .await
        .context("list recipes")?;
        Ok(rows.into_iter().map(Recipe::from).collect())
    }

    async fn save(&self, recipe: &Recipe) -> anyhow::Result<Option<Recipe>> {
        let (image_url, image_storage_id) = match &recipe.image {
            Some(i) => (Some(i.url.clone()), Some(i.storage_id.clone())),
            None => (None, None),
        };
        let row = sqlx::query_as::<_, RecipeRow>(&format!(
            r#"
            UPDATE recipes
               SET category_id = $3, name = $4, description = $5, image_url = $6,
                   image_storage_id = $7, gallery = $8, ingredients = $9, steps = $10,
                   notes = $11, likes = $12, version = version + 1, updated_at = now()
             WHERE id = $1 AND version = $2
            RETURNING {RECIPE_COLUMNS}
            "#
        ))
        .bind(recipe.id)
        .bind(recipe.version)
        .bind(recipe.category_id)
        .bind(&recipe.name)
        .bind(&recipe.description)
        .bind(image_url)
        .bind(image_storage_id)
        .bind(Json(&recipe.gallery))
        .bind(recipe.ingredients.clone())
        .bind(recipe.steps.clone())
        .bind(Json(&recipe.notes))
        .bind(recipe.likes)
        .fetch_optional(&self.db)
        .await
        .context("save recipe")?;
        Ok(row.map(Recipe::from))
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Recipe>> {
        let row = sqlx::query_as::<_, RecipeRow>(&format!(
            "DELETE FROM recipes WHERE id = $1 AND user_id = $2 RETURNING {RECIPE_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("delete recipe")?;
        Ok(row.map(Recipe::from))
    }

    async fn clear_category(&self, category_id: Uuid) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE recipes
               SET category_id = NULL, version = version + 1, updated_at = now()
             WHERE category_id = $1
            "#,
        )
        .bind(category_id)
        .execute(&self.db)
        .await
        .context("clear recipe category")?;
        Ok(res.rows_affected())
    }
}
