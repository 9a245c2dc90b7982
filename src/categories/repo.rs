use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::Category;

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn insert(&self, category: &Category) -> anyhow::Result<()>;
    async fn find(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Category>>;
    async fn list(&self, user_id: Uuid) -> anyhow::Result<Vec<Category>>;
    async fn rename(&self, id: Uuid, user_id: Uuid, name: &str) -> anyhow::Result<Option<Category>>;
    /// Returns false when nothing owned by `user_id` matched.
    async fn delete(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<bool>;
}

pub struct PgCategoryRepo {
    db: PgPool,
}

impl PgCategoryRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CategoryRepo for PgCategoryRepo {
    async fn insert(&self, category: &Category) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO categories (id, user_id, name, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(category.id)
        .bind(category.user_id)
        .bind(&category.name)
        .bind(category.created_at)
        .execute(&self.db)
        .await
        .context("insert category")?;
        Ok(())
    }

    async fn find(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Category>> {
        let row = sqlx::query_as::<_, Category>(
            r#"
            SELECT id, user_id, name, created_at
              FROM categories
             WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("find category")?;
        Ok(row)
    }

    async fn list(&self, user_id: Uuid) -> anyhow::Result<Vec<Category>> {
        let rows = sqlx::query_as::<_, Category>(
            r#"
            SELECT id, user_id, name, created_at
              FROM categories
             WHERE user_id = $1
             ORDER BY name ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .context("list categories")?;
        Ok(rows)
    }

    async fn rename(&self, id: Uuid, user_id: Uuid, name: &str) -> anyhow::Result<Option<Category>> {
        let row = sqlx::query_as::<_, Category>(
            r#"
            UPDATE categories
               SET name = $3
             WHERE id = $1 AND user_id = $2
            RETURNING id, user_id, name, created_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.db)
        .await
        .context("rename category")?;
        Ok(row)
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM categories WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await
            .context("delete category")?;
        Ok(res.rows_affected() > 0)
    }
}
