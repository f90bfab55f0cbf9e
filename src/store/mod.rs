/// Classifieds store abstraction layer
///
/// Provides the ClassifiedsStore trait and the record types it persists.
/// Two backends implement it: PostgreSQL for deployments and SQLite for local
/// files and tests.
///
/// Comment, like and save lifecycle methods are the only writers of an
/// advertisement's popularity score: each runs its row mutation and the
/// matching score delta in one transaction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ClassifiedsError;
use crate::scoring::ScoreAggregator;

pub mod postgres;
pub mod sqlite;

/// A classifieds category. Names are unique and stored trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCategory {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial category update. Only non-None fields are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCategory {
    pub name: Option<String>,
    /// `Some(None)` (JSON `null`) clears the description.
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
}

impl UpdateCategory {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }
}

/// An advertisement with its category name joined in for search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub creator_id: String,
    /// Price in minor currency units (cents)
    pub price_cents: i64,
    pub category_id: String,
    pub category_name: String,
    /// Popularity counter, written only through score events
    pub score: i64,
    /// Inactive advertisements are hidden from public listing and search
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Store-level input for a new advertisement; the category is already resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAdvertisement {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    pub category_id: String,
}

impl NewAdvertisement {
    pub fn into_parts(self) -> (String, AdvertisementDraft) {
        let draft = AdvertisementDraft {
            title: self.title,
            description: self.description,
            price_cents: self.price_cents,
        };
        (self.category_id, draft)
    }
}

/// Creator-supplied advertisement fields, before a category is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisementDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
}

impl AdvertisementDraft {
    pub fn in_category(self, category_id: impl Into<String>) -> NewAdvertisement {
        NewAdvertisement {
            title: self.title,
            description: self.description,
            price_cents: self.price_cents,
            category_id: category_id.into(),
        }
    }
}

/// Partial advertisement update over the editable fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAdvertisement {
    pub title: Option<String>,
    /// `Some(None)` (JSON `null`) clears the description.
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub price_cents: Option<i64>,
    pub category_id: Option<String>,
}

impl UpdateAdvertisement {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.price_cents.is_none()
            && self.category_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub advertisement_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateComment {
    pub advertisement_id: String,
    pub user_id: String,
    pub content: String,
}

/// A user's like or save of an advertisement; unique per (user, advertisement).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: String,
    pub user_id: String,
    pub advertisement_id: String,
    pub created_at: DateTime<Utc>,
}

/// Core abstraction for classifieds persistence.
///
/// All implementations must be Send + Sync to support concurrent access.
/// Corpus loads (`list_categories`, `active_advertisements`) are single queries
/// so a search never scores against a torn snapshot.
#[async_trait]
pub trait ClassifiedsStore: Send + Sync {
    /// Create a category. Duplicate names are a Conflict.
    async fn create_category(&self, input: CreateCategory) -> Result<Category, ClassifiedsError>;

    async fn get_category(&self, id: &str) -> Result<Category, ClassifiedsError>;

    /// Case-insensitive exact name lookup.
    async fn find_category_by_name(&self, name: &str) -> Result<Category, ClassifiedsError>;

    /// All categories, ordered by name ascending.
    async fn list_categories(&self) -> Result<Vec<Category>, ClassifiedsError>;

    async fn update_category(
        &self,
        id: &str,
        input: UpdateCategory,
    ) -> Result<Category, ClassifiedsError>;

    /// Delete a category and, by cascade, its advertisements.
    async fn delete_category(&self, id: &str) -> Result<(), ClassifiedsError>;

    /// Create an advertisement. New advertisements start inactive with score 0.
    async fn create_advertisement(
        &self,
        creator_id: &str,
        input: NewAdvertisement,
    ) -> Result<Advertisement, ClassifiedsError>;

    /// Create a category and an advertisement in it, in one transaction.
    async fn create_advertisement_with_category(
        &self,
        creator_id: &str,
        category: CreateCategory,
        draft: AdvertisementDraft,
    ) -> Result<Advertisement, ClassifiedsError>;

    async fn get_advertisement(&self, id: &str) -> Result<Advertisement, ClassifiedsError>;

    /// Active advertisements, newest first (id ascending on equal timestamps).
    async fn active_advertisements(&self) -> Result<Vec<Advertisement>, ClassifiedsError>;

    async fn update_advertisement(
        &self,
        id: &str,
        input: UpdateAdvertisement,
    ) -> Result<Advertisement, ClassifiedsError>;

    /// Moderation toggle.
    async fn set_advertisement_active(
        &self,
        id: &str,
        active: bool,
    ) -> Result<Advertisement, ClassifiedsError>;

    /// Delete an advertisement and, by cascade, its comments, likes and saves.
    async fn delete_advertisement(&self, id: &str) -> Result<(), ClassifiedsError>;

    async fn add_moderator(
        &self,
        advertisement_id: &str,
        user_id: &str,
    ) -> Result<(), ClassifiedsError>;

    async fn moderators(&self, advertisement_id: &str) -> Result<Vec<String>, ClassifiedsError>;

    /// Insert a comment and apply `CommentAdded` in the same transaction.
    async fn add_comment(&self, input: CreateComment) -> Result<Comment, ClassifiedsError>;

    async fn get_comment(&self, id: &str) -> Result<Comment, ClassifiedsError>;

    /// Delete a comment and apply `CommentRemoved` in the same transaction.
    async fn delete_comment(&self, id: &str) -> Result<(), ClassifiedsError>;

    /// Record a like and apply `LikeAdded`. A repeated like is a Conflict.
    async fn like_advertisement(
        &self,
        user_id: &str,
        advertisement_id: &str,
    ) -> Result<Reaction, ClassifiedsError>;

    /// Record a save and apply `SaveAdded`. A repeated save is a Conflict.
    async fn save_advertisement(
        &self,
        user_id: &str,
        advertisement_id: &str,
    ) -> Result<Reaction, ClassifiedsError>;
}

/// Open the backend named by `database_url`.
///
/// `sqlite:` URLs (including `sqlite::memory:`) select SQLite, which always
/// migrates; anything else is treated as a PostgreSQL URL.
pub async fn open_store(
    database_url: &str,
    aggregator: ScoreAggregator,
    run_migrations: bool,
) -> Result<Arc<dyn ClassifiedsStore>, ClassifiedsError> {
    if database_url == "sqlite::memory:" {
        let store = sqlite::SqliteClassifiedsStore::in_memory(aggregator).await?;
        tracing::info!("In-memory SQLite store initialized");
        return Ok(Arc::new(store));
    }
    if database_url.starts_with("sqlite:") {
        let store = sqlite::SqliteClassifiedsStore::new(database_url, aggregator).await?;
        tracing::info!(database_url = %database_url, "SQLite store initialized");
        return Ok(Arc::new(store));
    }
    let store =
        postgres::PostgresClassifiedsStore::new(database_url, aggregator, run_migrations).await?;
    tracing::info!("PostgreSQL store initialized");
    Ok(Arc::new(store))
}

/// Trim and lower-case a category name; empty names are rejected.
pub fn normalize_category_name(name: &str) -> Result<String, ClassifiedsError> {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(ClassifiedsError::invalid("name", "Category name cannot be empty."));
    }
    Ok(normalized)
}

pub fn validate_comment_content(content: &str) -> Result<(), ClassifiedsError> {
    if content.trim().is_empty() {
        return Err(ClassifiedsError::invalid("content", "Comment content cannot be empty."));
    }
    Ok(())
}

pub fn validate_advertisement(title: &str, price_cents: i64) -> Result<(), ClassifiedsError> {
    if title.trim().is_empty() {
        return Err(ClassifiedsError::invalid("title", "Advertisement title cannot be empty."));
    }
    if price_cents < 0 {
        return Err(ClassifiedsError::invalid("price_cents", "Price cannot be negative."));
    }
    Ok(())
}

/// Map a unique-constraint violation to a Conflict with a domain message.
pub(crate) fn conflict_on_unique(e: sqlx::Error, message: &str) -> ClassifiedsError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ClassifiedsError::conflict(message)
        }
        _ => ClassifiedsError::from(e),
    }
}

/// Map constraint failures of a row referencing an advertisement.
///
/// The foreign key reports a missing advertisement, so engagement writes can
/// open their transaction with the insert itself.
pub(crate) fn engagement_error(
    e: sqlx::Error,
    advertisement_id: &str,
    duplicate_message: Option<&str>,
) -> ClassifiedsError {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => ClassifiedsError::not_found(
            format!("Advertisement with ID {} does not exist.", advertisement_id),
        ),
        sqlx::Error::Database(db) if db.is_unique_violation() => match duplicate_message {
            Some(message) => ClassifiedsError::conflict(message),
            None => ClassifiedsError::from(e),
        },
        _ => ClassifiedsError::from(e),
    }
}

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_name_normalized() {
        assert_eq!(normalize_category_name("  Home Garden ").unwrap(), "home garden");
        assert!(normalize_category_name("   ").is_err());
    }

    #[test]
    fn test_comment_content_required() {
        assert!(validate_comment_content("\n ").is_err());
        assert!(validate_comment_content("still available?").is_ok());
    }

    #[test]
    fn test_update_description_null_clears() {
        let absent: UpdateAdvertisement = serde_json::from_str(r#"{"title": "Bike"}"#).unwrap();
        assert_eq!(absent.description, None);

        let cleared: UpdateAdvertisement =
            serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));
        assert!(!cleared.is_empty());

        let set: UpdateCategory = serde_json::from_str(r#"{"description": "Bikes"}"#).unwrap();
        assert_eq!(set.description, Some(Some("Bikes".to_string())));
    }

    #[test]
    fn test_advertisement_validation() {
        assert!(validate_advertisement("bike", 0).is_ok());
        assert!(validate_advertisement(" ", 100).is_err());
        assert!(validate_advertisement("bike", -1).is_err());
    }
}
