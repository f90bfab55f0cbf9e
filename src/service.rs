/// Classifieds service: the operations the request layer calls.
///
/// Wires a `ClassifiedsStore` to the ranking engine, enforces who may do what,
/// and logs the outcome of every call. Authentication happens upstream; callers
/// pass the resolved `Actor`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::errors::ClassifiedsError;
use crate::search::fields::{advertisement_fields, category_fields};
use crate::search::request::validate_page;
use crate::search::{
    AdvertisementField, CategoryField, RankedPage, RankingEngine, SearchRequest, SearchableField,
};
use crate::store::{
    validate_advertisement, Advertisement, AdvertisementDraft, Category, ClassifiedsStore, Comment,
    CreateCategory, CreateComment, Reaction, UpdateAdvertisement, UpdateCategory,
};

/// The authenticated user behind a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Actor {
            user_id: user_id.into(),
            is_staff: false,
            is_superuser: false,
        }
    }

    pub fn staff(user_id: impl Into<String>) -> Self {
        Actor {
            is_staff: true,
            ..Actor::user(user_id)
        }
    }

    pub fn superuser(user_id: impl Into<String>) -> Self {
        Actor {
            is_superuser: true,
            ..Actor::user(user_id)
        }
    }

    /// Site-level moderation rights.
    pub fn is_site_moderator(&self) -> bool {
        self.is_staff || self.is_superuser
    }
}

/// Category of a new advertisement: an existing id, or a category created inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryRef {
    Existing(String),
    New(CreateCategory),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAdvertisement {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    pub category: CategoryRef,
}

/// Parse a JSON patch into an update struct.
///
/// Update structs reject unknown keys, so a patch touching a non-editable
/// field fails here as `InvalidInput`.
pub fn parse_patch<T: DeserializeOwned>(patch: Value) -> Result<T, ClassifiedsError> {
    if !patch.is_object() {
        return Err(ClassifiedsError::invalid("data", "Update data must be a JSON object."));
    }
    serde_json::from_value(patch).map_err(|e| ClassifiedsError::invalid("data", e.to_string()))
}

pub struct ClassifiedsService {
    store: Arc<dyn ClassifiedsStore>,
    engine: RankingEngine,
    category_fields: Vec<SearchableField<CategoryField>>,
    advertisement_fields: Vec<SearchableField<AdvertisementField>>,
}

impl ClassifiedsService {
    pub fn new(store: Arc<dyn ClassifiedsStore>, config: &EngineConfig) -> Self {
        ClassifiedsService {
            store,
            engine: RankingEngine::new(config),
            category_fields: category_fields(),
            advertisement_fields: advertisement_fields(),
        }
    }

    // --- search ---

    pub async fn search_categories(
        &self,
        request: &SearchRequest,
    ) -> Result<RankedPage<Category>, ClassifiedsError> {
        tracing::info!(
            operation = "search_categories",
            query = ?request.query,
            page = ?request.page_no,
            "Service call"
        );
        let result = match request.validate() {
            Ok(params) => match self.store.list_categories().await {
                Ok(corpus) => self.engine.rank(corpus, &params, &self.category_fields),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        finish_search("search_categories", result)
    }

    /// Search active advertisements. Inactive ones never enter the corpus.
    pub async fn search_advertisements(
        &self,
        request: &SearchRequest,
    ) -> Result<RankedPage<Advertisement>, ClassifiedsError> {
        tracing::info!(
            operation = "search_advertisements",
            query = ?request.query,
            page = ?request.page_no,
            "Service call"
        );
        let result = match request.validate() {
            Ok(params) => match self.store.active_advertisements().await {
                Ok(corpus) => self.engine.rank(corpus, &params, &self.advertisement_fields),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        finish_search("search_advertisements", result)
    }

    // --- listing ---

    pub async fn list_categories(
        &self,
        page: u32,
    ) -> Result<RankedPage<Category>, ClassifiedsError> {
        let result = self.list_categories_page(page).await;
        finish_search("list_categories", result)
    }

    async fn list_categories_page(
        &self,
        page: u32,
    ) -> Result<RankedPage<Category>, ClassifiedsError> {
        let page = validate_page(i64::from(page))?;
        let categories = self.store.list_categories().await?;
        if categories.is_empty() {
            return Err(ClassifiedsError::not_found("No categories exist."));
        }
        Ok(self.engine.page_of(categories, page))
    }

    pub async fn list_advertisements(
        &self,
        page: u32,
    ) -> Result<RankedPage<Advertisement>, ClassifiedsError> {
        let result = self.list_advertisements_page(page).await;
        finish_search("list_advertisements", result)
    }

    async fn list_advertisements_page(
        &self,
        page: u32,
    ) -> Result<RankedPage<Advertisement>, ClassifiedsError> {
        let page = validate_page(i64::from(page))?;
        let advertisements = self.store.active_advertisements().await?;
        if advertisements.is_empty() {
            return Err(ClassifiedsError::not_found("No advertisements exist."));
        }
        Ok(self.engine.page_of(advertisements, page))
    }

    // --- categories ---

    /// Look a category up by id or by name; exactly one must be given.
    pub async fn get_category(
        &self,
        id: Option<&str>,
        name: Option<&str>,
    ) -> Result<Category, ClassifiedsError> {
        let id = id.map(str::trim).filter(|s| !s.is_empty());
        let name = name.map(str::trim).filter(|s| !s.is_empty());
        let result = match (id, name) {
            (Some(id), None) => self.store.get_category(id).await,
            (None, Some(name)) => self.store.find_category_by_name(name).await,
            (Some(_), Some(_)) => Err(ClassifiedsError::invalid(
                "category",
                "Provide either a category ID or a name, not both.",
            )),
            (None, None) => Err(ClassifiedsError::invalid(
                "category",
                "Category ID or name must be provided.",
            )),
        };
        finish("get_category", result)
    }

    pub async fn create_category(
        &self,
        actor: &Actor,
        input: CreateCategory,
    ) -> Result<Category, ClassifiedsError> {
        tracing::info!(
            operation = "create_category",
            user_id = %actor.user_id,
            name = %input.name,
            "Service call"
        );
        let result = self.store.create_category(input).await;
        finish("create_category", result)
    }

    pub async fn update_category(
        &self,
        actor: &Actor,
        id: &str,
        input: UpdateCategory,
    ) -> Result<Category, ClassifiedsError> {
        tracing::info!(
            operation = "update_category",
            user_id = %actor.user_id,
            category_id = %id,
            "Service call"
        );
        let result = match require_site_moderator(actor, "update categories") {
            Ok(()) if input.is_empty() => {
                Err(ClassifiedsError::invalid("data", "No fields to update."))
            }
            Ok(()) => self.store.update_category(id, input).await,
            Err(e) => Err(e),
        };
        finish("update_category", result)
    }

    pub async fn delete_category(&self, actor: &Actor, id: &str) -> Result<(), ClassifiedsError> {
        tracing::info!(
            operation = "delete_category",
            user_id = %actor.user_id,
            category_id = %id,
            "Service call"
        );
        let result = match require_site_moderator(actor, "delete categories") {
            Ok(()) => self.store.delete_category(id).await,
            Err(e) => Err(e),
        };
        finish("delete_category", result)
    }

    // --- advertisements ---

    /// Fetch one advertisement. Inactive ones are reported missing unless the
    /// actor may manage them.
    pub async fn get_advertisement(
        &self,
        actor: Option<&Actor>,
        id: &str,
    ) -> Result<Advertisement, ClassifiedsError> {
        let result = self.visible_advertisement(actor, id).await;
        finish("get_advertisement", result)
    }

    /// Create an advertisement, creating its category in the same transaction
    /// when given inline. New advertisements wait inactive for approval.
    pub async fn create_advertisement(
        &self,
        actor: &Actor,
        input: CreateAdvertisement,
    ) -> Result<Advertisement, ClassifiedsError> {
        tracing::info!(
            operation = "create_advertisement",
            user_id = %actor.user_id,
            title = %input.title,
            "Service call"
        );
        let result = self.create_advertisement_inner(actor, input).await;
        finish("create_advertisement", result)
    }

    async fn create_advertisement_inner(
        &self,
        actor: &Actor,
        input: CreateAdvertisement,
    ) -> Result<Advertisement, ClassifiedsError> {
        validate_advertisement(&input.title, input.price_cents)?;
        let draft = AdvertisementDraft {
            title: input.title,
            description: input.description,
            price_cents: input.price_cents,
        };
        match input.category {
            CategoryRef::Existing(id) => {
                self.store.create_advertisement(&actor.user_id, draft.in_category(id)).await
            }
            CategoryRef::New(category) => {
                self.store
                    .create_advertisement_with_category(&actor.user_id, category, draft)
                    .await
            }
        }
    }

    pub async fn update_advertisement(
        &self,
        actor: &Actor,
        id: &str,
        input: UpdateAdvertisement,
    ) -> Result<Advertisement, ClassifiedsError> {
        tracing::info!(
            operation = "update_advertisement",
            user_id = %actor.user_id,
            advertisement_id = %id,
            "Service call"
        );
        let result = self.update_advertisement_inner(actor, id, input).await;
        finish("update_advertisement", result)
    }

    async fn update_advertisement_inner(
        &self,
        actor: &Actor,
        id: &str,
        input: UpdateAdvertisement,
    ) -> Result<Advertisement, ClassifiedsError> {
        if input.is_empty() {
            return Err(ClassifiedsError::invalid("data", "No fields to update."));
        }
        let ad = self.visible_advertisement(Some(actor), id).await?;
        self.require_manager(actor, &ad, "update this advertisement").await?;
        self.store.update_advertisement(id, input).await
    }

    pub async fn delete_advertisement(
        &self,
        actor: &Actor,
        id: &str,
    ) -> Result<(), ClassifiedsError> {
        tracing::info!(
            operation = "delete_advertisement",
            user_id = %actor.user_id,
            advertisement_id = %id,
            "Service call"
        );
        let result = self.delete_advertisement_inner(actor, id).await;
        finish("delete_advertisement", result)
    }

    async fn delete_advertisement_inner(
        &self,
        actor: &Actor,
        id: &str,
    ) -> Result<(), ClassifiedsError> {
        let ad = self.visible_advertisement(Some(actor), id).await?;
        self.require_manager(actor, &ad, "delete this advertisement").await?;
        self.store.delete_advertisement(id).await
    }

    /// Site moderation: publish or withdraw an advertisement.
    pub async fn approve_advertisement(
        &self,
        actor: &Actor,
        id: &str,
        active: bool,
    ) -> Result<Advertisement, ClassifiedsError> {
        tracing::info!(
            operation = "approve_advertisement",
            user_id = %actor.user_id,
            advertisement_id = %id,
            active,
            "Service call"
        );
        let result = match require_site_moderator(actor, "approve advertisements") {
            Ok(()) => self.store.set_advertisement_active(id, active).await,
            Err(e) => Err(e),
        };
        finish("approve_advertisement", result)
    }

    /// Grant a user moderation rights on one advertisement (creator or superuser only).
    pub async fn add_moderator(
        &self,
        actor: &Actor,
        advertisement_id: &str,
        user_id: &str,
    ) -> Result<(), ClassifiedsError> {
        tracing::info!(
            operation = "add_moderator",
            user_id = %actor.user_id,
            advertisement_id = %advertisement_id,
            moderator = %user_id,
            "Service call"
        );
        let result = self.add_moderator_inner(actor, advertisement_id, user_id).await;
        finish("add_moderator", result)
    }

    async fn add_moderator_inner(
        &self,
        actor: &Actor,
        advertisement_id: &str,
        user_id: &str,
    ) -> Result<(), ClassifiedsError> {
        let ad = self.visible_advertisement(Some(actor), advertisement_id).await?;
        if ad.creator_id != actor.user_id && !actor.is_superuser {
            return Err(ClassifiedsError::unauthorized(
                "User is not authorized to add moderators to this advertisement.",
            ));
        }
        self.store.add_moderator(advertisement_id, user_id).await
    }

    // --- engagement ---

    pub async fn add_comment(
        &self,
        actor: &Actor,
        advertisement_id: &str,
        content: &str,
    ) -> Result<Comment, ClassifiedsError> {
        tracing::info!(
            operation = "add_comment",
            user_id = %actor.user_id,
            advertisement_id = %advertisement_id,
            "Service call"
        );
        let result = match self.visible_advertisement(Some(actor), advertisement_id).await {
            Ok(_) => {
                self.store
                    .add_comment(CreateComment {
                        advertisement_id: advertisement_id.to_string(),
                        user_id: actor.user_id.clone(),
                        content: content.to_string(),
                    })
                    .await
            }
            Err(e) => Err(e),
        };
        finish("add_comment", result)
    }

    /// Remove a comment. Allowed for its author, the advertisement's creator,
    /// and superusers.
    pub async fn delete_comment(
        &self,
        actor: &Actor,
        comment_id: &str,
    ) -> Result<(), ClassifiedsError> {
        tracing::info!(
            operation = "delete_comment",
            user_id = %actor.user_id,
            comment_id = %comment_id,
            "Service call"
        );
        let result = self.delete_comment_inner(actor, comment_id).await;
        finish("delete_comment", result)
    }

    async fn delete_comment_inner(
        &self,
        actor: &Actor,
        comment_id: &str,
    ) -> Result<(), ClassifiedsError> {
        let comment = self.store.get_comment(comment_id).await?;
        if comment.user_id != actor.user_id && !actor.is_superuser {
            let ad = self.store.get_advertisement(&comment.advertisement_id).await?;
            if ad.creator_id != actor.user_id {
                return Err(ClassifiedsError::unauthorized(
                    "User is not authorized to delete this comment.",
                ));
            }
        }
        self.store.delete_comment(comment_id).await
    }

    pub async fn like_advertisement(
        &self,
        actor: &Actor,
        advertisement_id: &str,
    ) -> Result<Reaction, ClassifiedsError> {
        tracing::info!(
            operation = "like_advertisement",
            user_id = %actor.user_id,
            advertisement_id = %advertisement_id,
            "Service call"
        );
        let result = match self.visible_advertisement(Some(actor), advertisement_id).await {
            Ok(_) => self.store.like_advertisement(&actor.user_id, advertisement_id).await,
            Err(e) => Err(e),
        };
        finish("like_advertisement", result)
    }

    pub async fn save_advertisement(
        &self,
        actor: &Actor,
        advertisement_id: &str,
    ) -> Result<Reaction, ClassifiedsError> {
        tracing::info!(
            operation = "save_advertisement",
            user_id = %actor.user_id,
            advertisement_id = %advertisement_id,
            "Service call"
        );
        let result = match self.visible_advertisement(Some(actor), advertisement_id).await {
            Ok(_) => self.store.save_advertisement(&actor.user_id, advertisement_id).await,
            Err(e) => Err(e),
        };
        finish("save_advertisement", result)
    }

    // --- access rules ---

    async fn can_manage(
        &self,
        actor: &Actor,
        ad: &Advertisement,
    ) -> Result<bool, ClassifiedsError> {
        if actor.is_superuser || ad.creator_id == actor.user_id {
            return Ok(true);
        }
        let moderators = self.store.moderators(&ad.id).await?;
        Ok(moderators.iter().any(|m| m == &actor.user_id))
    }

    async fn require_manager(
        &self,
        actor: &Actor,
        ad: &Advertisement,
        action: &str,
    ) -> Result<(), ClassifiedsError> {
        if self.can_manage(actor, ad).await? {
            Ok(())
        } else {
            Err(ClassifiedsError::unauthorized(format!("User is not authorized to {}.", action)))
        }
    }

    async fn visible_advertisement(
        &self,
        actor: Option<&Actor>,
        id: &str,
    ) -> Result<Advertisement, ClassifiedsError> {
        if id.trim().is_empty() {
            return Err(ClassifiedsError::invalid("id", "Advertisement ID must be provided."));
        }
        let ad = self.store.get_advertisement(id).await?;
        if ad.is_active {
            return Ok(ad);
        }
        let visible = match actor {
            Some(actor) => self.can_manage(actor, &ad).await?,
            None => false,
        };
        if visible {
            Ok(ad)
        } else {
            Err(ClassifiedsError::not_found(format!(
                "Advertisement with ID {} does not exist or is inactive.",
                id
            )))
        }
    }
}

fn require_site_moderator(actor: &Actor, action: &str) -> Result<(), ClassifiedsError> {
    if actor.is_site_moderator() {
        Ok(())
    } else {
        Err(ClassifiedsError::unauthorized(format!("User is not authorized to {}.", action)))
    }
}

fn finish<T>(
    operation: &'static str,
    result: Result<T, ClassifiedsError>,
) -> Result<T, ClassifiedsError> {
    match &result {
        Ok(_) => tracing::info!(operation, "Service call succeeded"),
        Err(e) => tracing::warn!(operation, code = e.code(), error = %e, "Service call failed"),
    }
    result
}

fn finish_search<T>(
    operation: &'static str,
    result: Result<RankedPage<T>, ClassifiedsError>,
) -> Result<RankedPage<T>, ClassifiedsError> {
    match &result {
        Ok(page) => match &page.query {
            Some(q) => tracing::info!(
                operation,
                total = page.total,
                page = page.page,
                "Found {} matching the query '{}'",
                page.total,
                q
            ),
            None => tracing::info!(
                operation,
                total = page.total,
                page = page.page,
                "Listed {} items",
                page.total
            ),
        },
        Err(e) => tracing::warn!(operation, code = e.code(), error = %e, "Service call failed"),
    }
    result
}
