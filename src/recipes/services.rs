use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{
    ImageUploads, NewRecipeForm, RecipeAction, UploadFailure, UploadField, UploadFile,
    UploadOutcome,
};
use super::repo_types::{ImageRef, Note, Recipe};
use crate::{
    error::{AppError, Missing},
    state::AppState,
};

pub async fn load_recipe(st: &AppState, id: Uuid, user_id: Uuid) -> Result<Recipe, AppError> {
    st.recipes
        .find(id, user_id)
        .await?
        .ok_or(AppError::NotFound(Missing::Recipe))
}

pub async fn list_recipes(
    st: &AppState,
    user_id: Uuid,
    category_id: Option<Uuid>,
) -> Result<Vec<Recipe>, AppError> {
    Ok(st.recipes.list(user_id, category_id).await?)
}

async fn persist(st: &AppState, recipe: &Recipe) -> Result<Recipe, AppError> {
    match st.recipes.save(recipe).await? {
        Some(saved) => Ok(saved),
        None => {
            warn!(recipe_id = %recipe.id, version = recipe.version, "write conflict");
            Err(AppError::Conflict)
        }
    }
}

/// Applies one typed action to the in-memory aggregate. Storage side
/// effects are the caller's job and must already have happened.
pub fn apply(recipe: &mut Recipe, action: RecipeAction) -> Result<(), AppError> {
    match action {
        RecipeAction::Like => recipe.likes += 1,
        RecipeAction::AddIngredient(text) => recipe.ingredients.push(text),
        RecipeAction::DeleteIngredient(index) => remove_at(&mut recipe.ingredients, index),
        RecipeAction::AddStep(text) => recipe.steps.push(text),
        RecipeAction::DeleteStep(index) => remove_at(&mut recipe.steps, index),
        RecipeAction::AddNote(text) => recipe.notes.push(Note {
            text,
            created_at: OffsetDateTime::now_utc(),
        }),
        RecipeAction::DeleteNote(index) => remove_at(&mut recipe.notes, index),
        RecipeAction::SetMainImage(storage_id) => {
            let pos = gallery_position(recipe, &storage_id)?;
            let chosen = recipe.gallery.remove(pos);
            if let Some(previous) = recipe.image.replace(chosen) {
                recipe.gallery.push(previous);
            }
        }
        RecipeAction::DeleteGalleryImage(storage_id) => {
            recipe.gallery.retain(|img| img.storage_id != storage_id);
        }
        RecipeAction::UpdateFields(fields) => {
            if let Some(name) = fields.name {
                recipe.name = name.trim().to_string();
            }
            if let Some(description) = fields.description {
                recipe.description = description;
            }
        }
    }
    Ok(())
}

/// Out-of-range indexes leave the list untouched.
fn remove_at<T>(items: &mut Vec<T>, index: usize) {
    if index < items.len() {
        items.remove(index);
    }
}

fn gallery_position(recipe: &Recipe, storage_id: &str) -> Result<usize, AppError> {
    recipe
        .gallery
        .iter()
        .position(|img| img.storage_id == storage_id)
        .ok_or(AppError::NotFound(Missing::GalleryImage))
}

/// Load, mutate and persist for a JSON action.
pub async fn apply_action(
    st: &AppState,
    id: Uuid,
    user_id: Uuid,
    action: RecipeAction,
) -> Result<Recipe, AppError> {
    let mut recipe = load_recipe(st, id, user_id).await?;
    let name = action.name();

    // The asset goes first: a failed delete leaves the reference intact.
    let saved = if let RecipeAction::DeleteGalleryImage(storage_id) = &action {
        gallery_position(&recipe, storage_id)?;
        st.storage
            .delete(storage_id)
            .await
            .map_err(AppError::Storage)?;
        detach_deleted_asset(st, recipe, storage_id).await?
    } else {
        apply(&mut recipe, action)?;
        persist(st, &recipe).await?
    };
    info!(recipe_id = %id, action = name, version = saved.version, "recipe action applied");
    Ok(saved)
}

/// Drops every reference to an asset that is already gone from storage.
/// A version conflict here cannot surface as 409, so the edit is reapplied
/// to a fresh copy until it lands or nothing references the asset anymore.
async fn detach_deleted_asset(
    st: &AppState,
    mut recipe: Recipe,
    storage_id: &str,
) -> Result<Recipe, AppError> {
    loop {
        if !recipe.references(storage_id) {
            return Ok(recipe);
        }
        recipe.gallery.retain(|img| img.storage_id != storage_id);
        if recipe.image.as_ref().is_some_and(|img| img.storage_id == storage_id) {
            recipe.image = None;
        }
        match st.recipes.save(&recipe).await? {
            Some(saved) => return Ok(saved),
            None => {
                warn!(recipe_id = %recipe.id, storage_id, "write conflict after asset delete; reapplying");
                recipe = load_recipe(st, recipe.id, recipe.user_id).await?;
            }
        }
    }
}

/// Uploads every file, records the ones that fail, and persists whatever
/// succeeded in one write.
pub async fn upload_images(
    st: &AppState,
    id: Uuid,
    user_id: Uuid,
    uploads: ImageUploads,
) -> Result<UploadOutcome, AppError> {
    let mut recipe = load_recipe(st, id, user_id).await?;
    let mut failures = Vec::new();
    let mut uploaded: Vec<String> = Vec::new();
    let mut superseded: Option<ImageRef> = None;

    if let Some(file) = uploads.main.filter(|f| !f.body.is_empty()) {
        match upload_one(st, &recipe, None, &file).await {
            Ok(image) => {
                uploaded.push(image.storage_id.clone());
                superseded = recipe.image.replace(image);
            }
            Err(message) => failures.push(UploadFailure {
                field: UploadField::File,
                index: 0,
                file_name: file.file_name,
                message,
            }),
        }
    }

    for (index, file) in uploads.gallery.into_iter().enumerate() {
        if file.body.is_empty() {
            continue;
        }
        match upload_one(st, &recipe, superseded.as_ref(), &file).await {
            Ok(image) => {
                uploaded.push(image.storage_id.clone());
                recipe.gallery.push(image);
            }
            Err(message) => failures.push(UploadFailure {
                field: UploadField::GalleryFiles,
                index,
                file_name: file.file_name,
                message,
            }),
        }
    }

    if uploaded.is_empty() {
        return Ok(UploadOutcome {
            recipe,
            upload_failures: failures,
        });
    }

    let saved = match persist(st, &recipe).await {
        Ok(saved) => saved,
        Err(e) => {
            // Nothing references the new assets yet.
            if let Err(cleanup) = st.storage.delete_many(&uploaded).await {
                warn!(error = %cleanup, orphaned = ?uploaded, "cleanup after failed save");
            }
            return Err(e);
        }
    };

    if let Some(previous) = superseded {
        if let Err(e) = st.storage.delete(&previous.storage_id).await {
            warn!(error = %e, storage_id = %previous.storage_id, "previous main image orphaned");
        }
    }

    info!(
        recipe_id = %id,
        uploaded = uploaded.len(),
        failed = failures.len(),
        "recipe images uploaded"
    );
    Ok(UploadOutcome {
        recipe: saved,
        upload_failures: failures,
    })
}

/// `superseded` is the primary being replaced in this request; it is
/// deleted after the save, so its id counts as taken too.
async fn upload_one(
    st: &AppState,
    recipe: &Recipe,
    superseded: Option<&ImageRef>,
    file: &UploadFile,
) -> Result<ImageRef, String> {
    let stored = st
        .storage
        .upload(file.body.clone(), &file.content_type)
        .await
        .map_err(|e| {
            warn!(error = %e, recipe_id = %recipe.id, file_name = ?file.file_name, "upload failed");
            "Upload failed".to_string()
        })?;
    let taken = recipe.references(&stored.storage_id)
        || superseded.is_some_and(|prev| prev.storage_id == stored.storage_id);
    if taken {
        warn!(storage_id = %stored.storage_id, "gateway returned an id already in use");
        return Err("Duplicate storage id".into());
    }
    Ok(ImageRef {
        url: stored.url,
        storage_id: stored.storage_id,
    })
}

/// Removes the document first, then every asset it owned.
pub async fn delete_recipe(st: &AppState, id: Uuid, user_id: Uuid) -> Result<(), AppError> {
    let deleted = st
        .recipes
        .delete(id, user_id)
        .await?
        .ok_or(AppError::NotFound(Missing::Recipe))?;

    let ids = deleted.storage_ids();
    if !ids.is_empty() {
        if let Err(e) = st.storage.delete_many(&ids).await {
            warn!(error = %e, recipe_id = %id, orphaned = ?ids, "asset cleanup failed");
            return Err(AppError::Storage(e));
        }
    }
    info!(recipe_id = %id, assets = ids.len(), "recipe deleted");
    Ok(())
}

pub async fn create_recipe(
    st: &AppState,
    user_id: Uuid,
    form: NewRecipeForm,
) -> Result<Recipe, AppError> {
    let name = form
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::validation("Name is required"))?;
    let category_id = form
        .category_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::validation("Category is required"))?;
    let category_id = Uuid::parse_str(category_id)
        .map_err(|_| AppError::validation("Category id is malformed"))?;
    let file = form
        .file
        .filter(|f| !f.body.is_empty())
        .ok_or_else(|| AppError::validation("Image is required"))?;

    st.categories
        .find(category_id, user_id)
        .await?
        .ok_or(AppError::NotFound(Missing::Category))?;

    let stored = st
        .storage
        .upload(file.body, &file.content_type)
        .await
        .map_err(AppError::Storage)?;

    let image_id = stored.storage_id.clone();
    let description = form.description.filter(|d| !d.trim().is_empty());
    let recipe = Recipe::new(
        user_id,
        category_id,
        name,
        description,
        ImageRef {
            url: stored.url,
            storage_id: stored.storage_id,
        },
    );

    if let Err(e) = st.recipes.insert(&recipe).await {
        if let Err(cleanup) = st.storage.delete(&image_id).await {
            warn!(error = %cleanup, "new recipe image orphaned");
        }
        return Err(e.into());
    }
    info!(recipe_id = %recipe.id, %user_id, "recipe created");
    Ok(recipe)
}

#[cfg(test)]
mod dispatcher_tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::categories::repo::memory::MemoryCategoryRepo;
    use crate::categories::repo_types::Category;
    use crate::recipes::dto::FieldUpdate;
    use crate::recipes::repo::{memory::MemoryRecipeRepo, RecipeRepo};
    use crate::storage::{fake::FakeStorage, StorageClient, StoredObject};

    struct Fixture {
        st: AppState,
        storage: Arc<FakeStorage>,
        owner: Uuid,
        category: Uuid,
    }

    async fn fixture(ids: &[&str]) -> Fixture {
        let storage = Arc::new(FakeStorage::with_ids(ids.iter().copied()));
        let st = AppState::fake_with_storage(storage.clone());
        let owner = Uuid::new_v4();
        let category = Category::new(owner, "Soups".into());
        st.categories.insert(&category).await.unwrap();
        Fixture {
            st,
            storage,
            owner,
            category: category.id,
        }
    }

    fn image(id: &str) -> ImageRef {
        ImageRef {
            url: format!("https://fake.local/{}", id),
            storage_id: id.into(),
        }
    }

    async fn seed(fx: &Fixture, primary: &str) -> Recipe {
        let recipe = Recipe::new(fx.owner, fx.category, "Soup".into(), None, image(primary));
        fx.st.recipes.insert(&recipe).await.unwrap();
        recipe
    }

    fn file(body: &'static [u8]) -> UploadFile {
        UploadFile {
            file_name: Some("photo.jpg".into()),
            content_type: "image/jpeg".into(),
            body: Bytes::from_static(body),
        }
    }

    fn bare(primary: Option<ImageRef>, gallery: &[&str]) -> Recipe {
        let mut r = Recipe::new(Uuid::new_v4(), Uuid::new_v4(), "Stew".into(), None, image("x"));
        r.image = primary;
        r.gallery = gallery.iter().map(|id| image(id)).collect();
        r
    }

    #[test]
    fn list_edits_keep_order_except_at_removed_index() {
        let mut r = bare(None, &[]);
        for i in ["flour", "eggs", "milk", "salt"] {
            apply(&mut r, RecipeAction::AddIngredient(i.into())).unwrap();
        }
        apply(&mut r, RecipeAction::DeleteIngredient(1)).unwrap();
        assert_eq!(r.ingredients, vec!["flour", "milk", "salt"]);

        apply(&mut r, RecipeAction::AddStep("mix".into())).unwrap();
        apply(&mut r, RecipeAction::AddStep("bake".into())).unwrap();
        apply(&mut r, RecipeAction::DeleteStep(0)).unwrap();
        assert_eq!(r.steps, vec!["bake"]);

        apply(&mut r, RecipeAction::AddNote("too salty".into())).unwrap();
        assert_eq!(r.notes.len(), 1);
        assert_eq!(r.notes[0].text, "too salty");
        apply(&mut r, RecipeAction::DeleteNote(0)).unwrap();
        assert!(r.notes.is_empty());
    }

    #[test]
    fn out_of_range_delete_is_a_no_op() {
        let mut r = bare(None, &[]);
        apply(&mut r, RecipeAction::AddStep("stir".into())).unwrap();
        apply(&mut r, RecipeAction::DeleteStep(5)).unwrap();
        assert_eq!(r.steps, vec!["stir"]);
    }

    #[test]
    fn like_is_monotonic() {
        let mut r = bare(None, &[]);
        for _ in 0..5 {
            apply(&mut r, RecipeAction::Like).unwrap();
        }
        assert_eq!(r.likes, 5);
    }

    #[test]
    fn set_main_image_swaps_and_round_trips() {
        let mut r = bare(Some(image("img1")), &["g1", "g2"]);
        apply(&mut r, RecipeAction::SetMainImage("g1".into())).unwrap();
        assert_eq!(r.image.as_ref().unwrap().storage_id, "g1");
        assert_eq!(r.gallery.len(), 2);
        assert!(r.gallery.iter().any(|i| i.storage_id == "img1"));

        apply(&mut r, RecipeAction::SetMainImage("img1".into())).unwrap();
        assert_eq!(r.image.as_ref().unwrap().storage_id, "img1");
        let mut ids: Vec<_> = r.gallery.iter().map(|i| i.storage_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["g1", "g2"]);
    }

    #[test]
    fn set_main_image_without_previous_primary_shrinks_gallery() {
        let mut r = bare(None, &["g1", "g2"]);
        apply(&mut r, RecipeAction::SetMainImage("g2".into())).unwrap();
        assert_eq!(r.image.as_ref().unwrap().storage_id, "g2");
        assert_eq!(r.gallery.len(), 1);
    }

    #[test]
    fn set_main_image_requires_gallery_membership() {
        let mut r = bare(Some(image("img1")), &["g1"]);
        let before = r.clone();
        let err = apply(&mut r, RecipeAction::SetMainImage("nope".into())).unwrap_err();
        assert!(matches!(err, AppError::NotFound(Missing::GalleryImage)));
        assert_eq!(r, before);
    }

    #[test]
    fn field_update_touches_only_given_fields() {
        let mut r = bare(None, &[]);
        r.description = Some("old".into());
        apply(
            &mut r,
            RecipeAction::UpdateFields(FieldUpdate {
                name: Some("Chili".into()),
                description: None,
            }),
        )
        .unwrap();
        assert_eq!(r.name, "Chili");
        assert_eq!(r.description.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn action_is_persisted_and_bumps_version() {
        let fx = fixture(&[]).await;
        let r = seed(&fx, "img1").await;
        let saved = apply_action(&fx.st, r.id, fx.owner, RecipeAction::Like).await.unwrap();
        assert_eq!(saved.likes, 1);
        assert_eq!(saved.version, r.version + 1);
        let reloaded = load_recipe(&fx.st, r.id, fx.owner).await.unwrap();
        assert_eq!(reloaded.likes, 1);
    }

    #[tokio::test]
    async fn other_owner_sees_not_found() {
        let fx = fixture(&[]).await;
        let r = seed(&fx, "img1").await;
        let err = apply_action(&fx.st, r.id, Uuid::new_v4(), RecipeAction::Like)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(Missing::Recipe)));
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let fx = fixture(&[]).await;
        let r = seed(&fx, "img1").await;
        apply_action(&fx.st, r.id, fx.owner, RecipeAction::Like).await.unwrap();

        let mut stale = r.clone();
        apply(&mut stale, RecipeAction::AddStep("late".into())).unwrap();
        let err = persist(&fx.st, &stale).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict));
        let current = load_recipe(&fx.st, r.id, fx.owner).await.unwrap();
        assert!(current.steps.is_empty());
    }

    #[tokio::test]
    async fn delete_gallery_image_removes_asset_then_reference() {
        let fx = fixture(&["g1"]).await;
        let r = seed(&fx, "img1").await;
        upload_images(
            &fx.st,
            r.id,
            fx.owner,
            ImageUploads {
                main: None,
                gallery: vec![file(b"jpeg")],
            },
        )
        .await
        .unwrap();

        let saved = apply_action(
            &fx.st,
            r.id,
            fx.owner,
            RecipeAction::DeleteGalleryImage("g1".into()),
        )
        .await
        .unwrap();
        assert!(saved.gallery.is_empty());
        assert_eq!(fx.storage.deleted(), vec!["g1"]);
    }

    #[tokio::test]
    async fn delete_gallery_image_ignores_foreign_ids() {
        let fx = fixture(&[]).await;
        let r = seed(&fx, "img1").await;
        let err = apply_action(
            &fx.st,
            r.id,
            fx.owner,
            RecipeAction::DeleteGalleryImage("someone-elses".into()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(Missing::GalleryImage)));
        assert!(fx.storage.deleted().is_empty());
    }

    #[tokio::test]
    async fn failed_storage_delete_keeps_gallery_reference() {
        let storage = Arc::new(FakeStorage::failing_deletes());
        let st = AppState::fake_with_storage(storage.clone());
        let owner = Uuid::new_v4();
        let mut r = Recipe::new(owner, Uuid::new_v4(), "Soup".into(), None, image("img1"));
        r.gallery.push(image("g1"));
        st.recipes.insert(&r).await.unwrap();

        let err = apply_action(&st, r.id, owner, RecipeAction::DeleteGalleryImage("g1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        let current = load_recipe(&st, r.id, owner).await.unwrap();
        assert_eq!(current.gallery.len(), 1);
    }

    /// Commits a like to the same recipe while the asset delete is in flight.
    struct RacingStorage {
        recipes: Arc<dyn RecipeRepo>,
        recipe_id: Uuid,
        owner: Uuid,
        inner: FakeStorage,
    }

    #[async_trait]
    impl StorageClient for RacingStorage {
        async fn upload(&self, body: Bytes, ct: &str) -> anyhow::Result<StoredObject> {
            self.inner.upload(body, ct).await
        }
        async fn delete(&self, storage_id: &str) -> anyhow::Result<()> {
            if let Some(mut current) = self.recipes.find(self.recipe_id, self.owner).await? {
                current.likes += 1;
                self.recipes.save(&current).await?;
            }
            self.inner.delete(storage_id).await
        }
        async fn delete_many(&self, ids: &[String]) -> anyhow::Result<()> {
            self.inner.delete_many(ids).await
        }
    }

    #[tokio::test]
    async fn concurrent_write_during_gallery_delete_still_detaches_asset() {
        let owner = Uuid::new_v4();
        let mut r = Recipe::new(owner, Uuid::new_v4(), "Soup".into(), None, image("img1"));
        r.gallery = vec![image("g1"), image("g2")];
        let recipes: Arc<dyn RecipeRepo> = Arc::new(MemoryRecipeRepo::default());
        recipes.insert(&r).await.unwrap();

        let storage = Arc::new(RacingStorage {
            recipes: recipes.clone(),
            recipe_id: r.id,
            owner,
            inner: FakeStorage::default(),
        });
        let st = AppState::from_parts(
            recipes,
            Arc::new(MemoryCategoryRepo::default()),
            storage.clone(),
            AppState::fake().config,
        );

        let saved = apply_action(&st, r.id, owner, RecipeAction::DeleteGalleryImage("g1".into()))
            .await
            .unwrap();
        assert_eq!(storage.inner.deleted(), vec!["g1"]);
        let ids: Vec<_> = saved.gallery.iter().map(|i| i.storage_id.as_str()).collect();
        assert_eq!(ids, vec!["g2"]);
        assert_eq!(saved.likes, 1);

        let current = load_recipe(&st, r.id, owner).await.unwrap();
        assert!(!current.references("g1"));
        assert_eq!(current.likes, 1);
    }

    #[tokio::test]
    async fn detaching_an_already_detached_asset_is_done() {
        let fx = fixture(&[]).await;
        let r = seed(&fx, "img1").await;
        let saved = detach_deleted_asset(&fx.st, r.clone(), "g9").await.unwrap();
        assert_eq!(saved, r);
    }

    #[tokio::test]
    async fn failed_asset_cleanup_still_removes_recipe() {
        let storage = Arc::new(FakeStorage::failing_deletes());
        let st = AppState::fake_with_storage(storage.clone());
        let owner = Uuid::new_v4();
        let mut r = Recipe::new(owner, Uuid::new_v4(), "Soup".into(), None, image("img1"));
        r.gallery.push(image("g1"));
        st.recipes.insert(&r).await.unwrap();

        let err = delete_recipe(&st, r.id, owner).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(
            load_recipe(&st, r.id, owner).await,
            Err(AppError::NotFound(Missing::Recipe))
        ));
    }

    #[tokio::test]
    async fn gallery_upload_cannot_reuse_replaced_primary_id() {
        let fx = fixture(&["img2", "img1"]).await;
        let r = seed(&fx, "img1").await;
        let out = upload_images(
            &fx.st,
            r.id,
            fx.owner,
            ImageUploads {
                main: Some(file(b"jpeg")),
                gallery: vec![file(b"jpeg")],
            },
        )
        .await
        .unwrap();

        assert_eq!(out.recipe.image.as_ref().unwrap().storage_id, "img2");
        assert!(out.recipe.gallery.is_empty());
        assert_eq!(out.upload_failures.len(), 1);
        assert_eq!(out.upload_failures[0].field, UploadField::GalleryFiles);
        assert_eq!(out.upload_failures[0].message, "Duplicate storage id");
        assert_eq!(fx.storage.deleted(), vec!["img1"]);
    }

    #[tokio::test]
    async fn new_main_image_replaces_and_deletes_previous() {
        let fx = fixture(&["img2"]).await;
        let r = seed(&fx, "img1").await;
        let out = upload_images(
            &fx.st,
            r.id,
            fx.owner,
            ImageUploads {
                main: Some(file(b"jpeg")),
                gallery: vec![],
            },
        )
        .await
        .unwrap();
        assert!(out.upload_failures.is_empty());
        assert_eq!(out.recipe.image.unwrap().storage_id, "img2");
        assert_eq!(fx.storage.deleted(), vec!["img1"]);
    }

    #[tokio::test]
    async fn failed_main_upload_keeps_previous_image() {
        let fx = fixture(&[]).await;
        let r = seed(&fx, "img1").await;
        let out = upload_images(
            &fx.st,
            r.id,
            fx.owner,
            ImageUploads {
                main: Some(file(b"FAIL")),
                gallery: vec![],
            },
        )
        .await
        .unwrap();
        assert_eq!(out.upload_failures.len(), 1);
        assert_eq!(out.upload_failures[0].field, UploadField::File);
        assert_eq!(out.recipe.image.unwrap().storage_id, "img1");
        assert!(fx.storage.deleted().is_empty());
    }

    #[tokio::test]
    async fn gallery_batch_reports_per_file_failures() {
        let fx = fixture(&["g1", "g2"]).await;
        let r = seed(&fx, "img1").await;
        let out = upload_images(
            &fx.st,
            r.id,
            fx.owner,
            ImageUploads {
                main: None,
                gallery: vec![file(b"a"), file(b""), file(b"FAIL"), file(b"b")],
            },
        )
        .await
        .unwrap();

        let ids: Vec<_> = out.recipe.gallery.iter().map(|i| i.storage_id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2"]);
        assert_eq!(out.upload_failures.len(), 1);
        assert_eq!(out.upload_failures[0].index, 2);
        assert_eq!(out.upload_failures[0].field, UploadField::GalleryFiles);

        let persisted = load_recipe(&fx.st, r.id, fx.owner).await.unwrap();
        assert_eq!(persisted.gallery, out.recipe.gallery);
    }

    #[tokio::test]
    async fn deleting_recipe_deletes_every_asset() {
        let fx = fixture(&[]).await;
        let mut r = Recipe::new(fx.owner, fx.category, "Soup".into(), None, image("img1"));
        r.gallery = vec![image("g1"), image("g2")];
        fx.st.recipes.insert(&r).await.unwrap();

        delete_recipe(&fx.st, r.id, fx.owner).await.unwrap();
        let mut deleted = fx.storage.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["g1", "g2", "img1"]);
        assert!(matches!(
            load_recipe(&fx.st, r.id, fx.owner).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_requires_owned_category_and_image() {
        let fx = fixture(&["img1"]).await;
        let form = NewRecipeForm {
            name: Some("Borscht".into()),
            description: Some("beet soup".into()),
            category_id: Some(fx.category.to_string()),
            file: Some(file(b"jpeg")),
        };
        let created = create_recipe(&fx.st, fx.owner, form).await.unwrap();
        assert_eq!(created.image.as_ref().unwrap().storage_id, "img1");
        assert_eq!(created.category_id, Some(fx.category));

        let foreign = NewRecipeForm {
            name: Some("Borscht".into()),
            category_id: Some(Uuid::new_v4().to_string()),
            file: Some(file(b"jpeg")),
            ..Default::default()
        };
        assert!(matches!(
            create_recipe(&fx.st, fx.owner, foreign).await,
            Err(AppError::NotFound(Missing::Category))
        ));

        let imageless = NewRecipeForm {
            name: Some("Borscht".into()),
            category_id: Some(fx.category.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            create_recipe(&fx.st, fx.owner, imageless).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(fx.storage.uploaded(), vec!["img1"]);
    }

    #[tokio::test]
    async fn end_to_end_edit_and_delete() {
        let fx = fixture(&["img1", "g1"]).await;
        let created = create_recipe(
            &fx.st,
            fx.owner,
            NewRecipeForm {
                name: Some("Soup".into()),
                category_id: Some(fx.category.to_string()),
                file: Some(file(b"jpeg")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let id = created.id;

        let r = apply_action(&fx.st, id, fx.owner, RecipeAction::AddIngredient("salt".into()))
            .await
            .unwrap();
        assert_eq!(r.ingredients, vec!["salt"]);
        let r = apply_action(&fx.st, id, fx.owner, RecipeAction::DeleteIngredient(0))
            .await
            .unwrap();
        assert!(r.ingredients.is_empty());

        let out = upload_images(
            &fx.st,
            id,
            fx.owner,
            ImageUploads {
                main: None,
                gallery: vec![file(b"jpeg")],
            },
        )
        .await
        .unwrap();
        assert_eq!(out.recipe.gallery[0].storage_id, "g1");

        let r = apply_action(&fx.st, id, fx.owner, RecipeAction::SetMainImage("g1".into()))
            .await
            .unwrap();
        assert_eq!(r.image.as_ref().unwrap().storage_id, "g1");
        let ids: Vec<_> = r.gallery.iter().map(|i| i.storage_id.as_str()).collect();
        assert_eq!(ids, vec!["img1"]);

        delete_recipe(&fx.st, id, fx.owner).await.unwrap();
        let deleted = fx.storage.deleted();
        assert!(deleted.contains(&"g1".to_string()));
        assert!(deleted.contains(&"img1".to_string()));
    }
}
