/// SQLite-backed implementation of ClassifiedsStore
///
/// Uses sqlx with WAL mode for local files, and an in-memory database for tests.
/// Runs migrations automatically on initialization.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
        SqliteRow, SqliteSynchronous,
    },
    Row, Sqlite, Transaction,
};
use uuid::Uuid;

use crate::errors::ClassifiedsError;
use crate::scoring::{ScoreAggregator, ScoreCounter, ScoreEvent};
use crate::store::{
    conflict_on_unique, engagement_error, normalize_category_name, validate_advertisement,
    validate_comment_content, Advertisement, AdvertisementDraft, Category, ClassifiedsStore,
    Comment, CreateCategory, CreateComment, NewAdvertisement, Reaction, UpdateAdvertisement,
    UpdateCategory,
};

const ADVERTISEMENT_SELECT: &str = "SELECT a.id, a.title, a.description, a.creator_id, \
     a.price_cents, a.category_id, c.name AS category_name, a.score, a.is_active, \
     a.created_at, a.updated_at \
     FROM advertisements a JOIN categories c ON c.id = a.category_id";

/// SQLite-backed classifieds store using sqlx connection pool.
///
/// Transactions that write always open with the write itself. A deferred
/// transaction that reads first cannot wait out a concurrent writer in WAL
/// mode (SQLITE_BUSY_SNAPSHOT), while a leading write goes through the busy
/// handler.
pub struct SqliteClassifiedsStore {
    pool: SqlitePool,
    aggregator: ScoreAggregator,
}

impl SqliteClassifiedsStore {
    /// Open (or create) the database at db_path and run pending migrations.
    pub async fn new(db_path: &str, aggregator: ScoreAggregator) -> Result<Self, ClassifiedsError> {
        // Strip "sqlite://" prefix if present for SqliteConnectOptions
        let path = db_path.strip_prefix("sqlite://").unwrap_or(db_path);

        let opts = path
            .parse::<SqliteConnectOptions>()
            .map_err(|e| {
                ClassifiedsError::Config(format!("Invalid database_url '{}': {}", db_path, e))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await.map_err(|e| {
            ClassifiedsError::Persistence(format!("Failed to connect to database: {}", e))
        })?;

        Self::from_pool(pool, aggregator).await
    }

    /// Private in-memory database. A single connection keeps every caller on
    /// the same database and serializes writers.
    pub async fn in_memory(aggregator: ScoreAggregator) -> Result<Self, ClassifiedsError> {
        let opts = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()
            .map_err(|e| ClassifiedsError::Config(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| {
                ClassifiedsError::Persistence(format!("Failed to open in-memory database: {}", e))
            })?;

        Self::from_pool(pool, aggregator).await
    }

    async fn from_pool(
        pool: SqlitePool,
        aggregator: ScoreAggregator,
    ) -> Result<Self, ClassifiedsError> {
        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;
        Ok(SqliteClassifiedsStore { pool, aggregator })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_reaction(
        &self,
        table: &'static str,
        user_id: &str,
        advertisement_id: &str,
        event: ScoreEvent,
        duplicate_message: &str,
    ) -> Result<Reaction, ClassifiedsError> {
        let id = Uuid::new_v4().to_string();
        let now = now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, user_id, advertisement_id, created_at) VALUES (?, ?, ?, ?)",
            table
        ))
        .bind(&id)
        .bind(user_id)
        .bind(advertisement_id)
        .bind(timestamp(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| engagement_error(e, advertisement_id, Some(duplicate_message)))?;

        self.aggregator.apply(&mut tx, &event).await?;
        tx.commit().await?;

        Ok(Reaction {
            id,
            user_id: user_id.to_string(),
            advertisement_id: advertisement_id.to_string(),
            created_at: now,
        })
    }
}

/// Score increments run on the caller's open transaction.
#[async_trait]
impl<'c> ScoreCounter for Transaction<'c, Sqlite> {
    async fn increment(
        &mut self,
        advertisement_id: &str,
        delta: i64,
    ) -> Result<(), ClassifiedsError> {
        let result = sqlx::query("UPDATE advertisements SET score = score + ? WHERE id = ?")
            .bind(delta)
            .bind(advertisement_id)
            .execute(&mut **self)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ClassifiedsError::Persistence(format!(
                "Score update failed: advertisement {} no longer exists",
                advertisement_id
            )));
        }
        Ok(())
    }
}

/// Current time truncated to the stored precision.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, ClassifiedsError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ClassifiedsError::Persistence(format!("Parse {} '{}': {}", column, raw, e)))
}

async fn insert_category(
    conn: &mut SqliteConnection,
    input: CreateCategory,
) -> Result<Category, ClassifiedsError> {
    let name = normalize_category_name(&input.name)?;
    let id = Uuid::new_v4().to_string();
    let now = now();

    sqlx::query(
        "INSERT INTO categories (id, name, description, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&name)
    .bind(&input.description)
    .bind(timestamp(&now))
    .bind(timestamp(&now))
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, &format!("Category '{}' already exists.", name)))?;

    Ok(Category {
        id,
        name,
        description: input.description,
        created_at: now,
        updated_at: now,
    })
}

async fn insert_advertisement(
    conn: &mut SqliteConnection,
    creator_id: &str,
    category: Category,
    draft: AdvertisementDraft,
) -> Result<Advertisement, ClassifiedsError> {
    let id = Uuid::new_v4().to_string();
    let now = now();

    sqlx::query(
        "INSERT INTO advertisements \
         (id, title, description, creator_id, price_cents, category_id, score, is_active, \
         created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
    )
    .bind(&id)
    .bind(&draft.title)
    .bind(&draft.description)
    .bind(creator_id)
    .bind(draft.price_cents)
    .bind(&category.id)
    .bind(timestamp(&now))
    .bind(timestamp(&now))
    .execute(&mut *conn)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => ClassifiedsError::not_found(
            format!("Category with ID {} does not exist.", category.id),
        ),
        _ => ClassifiedsError::from(e),
    })?;

    Ok(Advertisement {
        id,
        title: draft.title,
        description: draft.description,
        creator_id: creator_id.to_string(),
        price_cents: draft.price_cents,
        category_id: category.id,
        category_name: category.name,
        score: 0,
        is_active: false,
        created_at: now,
        updated_at: now,
    })
}

fn row_to_category(row: &SqliteRow) -> Result<Category, ClassifiedsError> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Category {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

fn row_to_advertisement(row: &SqliteRow) -> Result<Advertisement, ClassifiedsError> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Advertisement {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        creator_id: row.try_get("creator_id")?,
        price_cents: row.try_get("price_cents")?,
        category_id: row.try_get("category_id")?,
        category_name: row.try_get("category_name")?,
        score: row.try_get("score")?,
        is_active: row.try_get("is_active")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

fn row_to_comment(row: &SqliteRow) -> Result<Comment, ClassifiedsError> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Comment {
        id: row.try_get("id")?,
        advertisement_id: row.try_get("advertisement_id")?,
        user_id: row.try_get("user_id")?,
        content: row.try_get("content")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

#[async_trait]
impl ClassifiedsStore for SqliteClassifiedsStore {
    async fn create_category(&self, input: CreateCategory) -> Result<Category, ClassifiedsError> {
        let mut conn = self.pool.acquire().await?;
        insert_category(&mut conn, input).await
    }

    async fn get_category(&self, id: &str) -> Result<Category, ClassifiedsError> {
        let row = sqlx::query(
            "SELECT id, name, description, created_at, updated_at FROM categories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            ClassifiedsError::not_found(format!("Category with ID {} does not exist.", id))
        })?;

        row_to_category(&row)
    }

    async fn find_category_by_name(&self, name: &str) -> Result<Category, ClassifiedsError> {
        // Names are stored lower-cased, so a normalized key is a case-insensitive match.
        let key = name.trim().to_lowercase();
        let row = sqlx::query(
            "SELECT id, name, description, created_at, updated_at FROM categories WHERE name = ?",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            ClassifiedsError::not_found(format!("Category with name {} does not exist.", name))
        })?;

        row_to_category(&row)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, ClassifiedsError> {
        let rows = sqlx::query(
            "SELECT id, name, description, created_at, updated_at FROM categories \
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_category).collect()
    }

    async fn update_category(
        &self,
        id: &str,
        input: UpdateCategory,
    ) -> Result<Category, ClassifiedsError> {
        let existing = self.get_category(id).await?;

        let name = match input.name {
            Some(ref n) => normalize_category_name(n)?,
            None => existing.name,
        };
        let description = match input.description {
            Some(description) => description,
            None => existing.description,
        };
        let now = now();

        sqlx::query("UPDATE categories SET name = ?, description = ?, updated_at = ? WHERE id = ?")
            .bind(&name)
            .bind(&description)
            .bind(timestamp(&now))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_on_unique(e, &format!("Category '{}' already exists.", name)))?;

        Ok(Category {
            id: existing.id,
            name,
            description,
            created_at: existing.created_at,
            updated_at: now,
        })
    }

    async fn delete_category(&self, id: &str) -> Result<(), ClassifiedsError> {
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ClassifiedsError::not_found(format!(
                "Category with ID {} does not exist.",
                id
            )));
        }
        Ok(())
    }

    async fn create_advertisement(
        &self,
        creator_id: &str,
        input: NewAdvertisement,
    ) -> Result<Advertisement, ClassifiedsError> {
        validate_advertisement(&input.title, input.price_cents)?;
        let (category_id, draft) = input.into_parts();
        let category = self.get_category(&category_id).await?;

        let mut conn = self.pool.acquire().await?;
        insert_advertisement(&mut conn, creator_id, category, draft).await
    }

    async fn create_advertisement_with_category(
        &self,
        creator_id: &str,
        category: CreateCategory,
        draft: AdvertisementDraft,
    ) -> Result<Advertisement, ClassifiedsError> {
        validate_advertisement(&draft.title, draft.price_cents)?;

        let mut tx = self.pool.begin().await?;
        let category = insert_category(&mut tx, category).await?;
        let ad = insert_advertisement(&mut tx, creator_id, category, draft).await?;
        tx.commit().await?;
        Ok(ad)
    }

    async fn get_advertisement(&self, id: &str) -> Result<Advertisement, ClassifiedsError> {
        let row = sqlx::query(&format!("{} WHERE a.id = ?", ADVERTISEMENT_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                ClassifiedsError::not_found(format!("Advertisement with ID {} does not exist.", id))
            })?;

        row_to_advertisement(&row)
    }

    async fn active_advertisements(&self) -> Result<Vec<Advertisement>, ClassifiedsError> {
        let rows = sqlx::query(&format!(
            "{} WHERE a.is_active = 1 ORDER BY a.created_at DESC, a.id ASC",
            ADVERTISEMENT_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_advertisement).collect()
    }

    async fn update_advertisement(
        &self,
        id: &str,
        input: UpdateAdvertisement,
    ) -> Result<Advertisement, ClassifiedsError> {
        let existing = self.get_advertisement(id).await?;

        let title = input.title.unwrap_or(existing.title);
        let price_cents = input.price_cents.unwrap_or(existing.price_cents);
        validate_advertisement(&title, price_cents)?;
        let description = match input.description {
            Some(description) => description,
            None => existing.description,
        };
        let category_id = match input.category_id {
            Some(ref cid) => self.get_category(cid).await?.id,
            None => existing.category_id,
        };

        sqlx::query(
            "UPDATE advertisements \
             SET title = ?, description = ?, price_cents = ?, category_id = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&title)
        .bind(&description)
        .bind(price_cents)
        .bind(&category_id)
        .bind(timestamp(&now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_advertisement(id).await
    }

    async fn set_advertisement_active(
        &self,
        id: &str,
        active: bool,
    ) -> Result<Advertisement, ClassifiedsError> {
        let result =
            sqlx::query("UPDATE advertisements SET is_active = ?, updated_at = ? WHERE id = ?")
                .bind(active)
                .bind(timestamp(&now()))
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(ClassifiedsError::not_found(format!(
                "Advertisement with ID {} does not exist.",
                id
            )));
        }
        self.get_advertisement(id).await
    }

    async fn delete_advertisement(&self, id: &str) -> Result<(), ClassifiedsError> {
        let result = sqlx::query("DELETE FROM advertisements WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ClassifiedsError::not_found(format!(
                "Advertisement with ID {} does not exist.",
                id
            )));
        }
        Ok(())
    }

    async fn add_moderator(
        &self,
        advertisement_id: &str,
        user_id: &str,
    ) -> Result<(), ClassifiedsError> {
        sqlx::query(
            "INSERT INTO advertisement_moderators (advertisement_id, user_id) VALUES (?, ?) \
             ON CONFLICT (advertisement_id, user_id) DO NOTHING",
        )
        .bind(advertisement_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| engagement_error(e, advertisement_id, None))?;
        Ok(())
    }

    async fn moderators(&self, advertisement_id: &str) -> Result<Vec<String>, ClassifiedsError> {
        let rows = sqlx::query(
            "SELECT user_id FROM advertisement_moderators WHERE advertisement_id = ? \
             ORDER BY user_id",
        )
        .bind(advertisement_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("user_id").map_err(ClassifiedsError::from))
            .collect()
    }

    async fn add_comment(&self, input: CreateComment) -> Result<Comment, ClassifiedsError> {
        validate_comment_content(&input.content)?;
        let id = Uuid::new_v4().to_string();
        let now = now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO comments (id, advertisement_id, user_id, content, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&input.advertisement_id)
        .bind(&input.user_id)
        .bind(&input.content)
        .bind(timestamp(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| engagement_error(e, &input.advertisement_id, None))?;

        let event = ScoreEvent::CommentAdded {
            advertisement_id: input.advertisement_id.clone(),
        };
        self.aggregator.apply(&mut tx, &event).await?;
        tx.commit().await?;

        Ok(Comment {
            id,
            advertisement_id: input.advertisement_id,
            user_id: input.user_id,
            content: input.content,
            created_at: now,
        })
    }

    async fn get_comment(&self, id: &str) -> Result<Comment, ClassifiedsError> {
        let row = sqlx::query(
            "SELECT id, advertisement_id, user_id, content, created_at FROM comments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            ClassifiedsError::not_found(format!("Comment with ID {} does not exist.", id))
        })?;

        row_to_comment(&row)
    }

    async fn delete_comment(&self, id: &str) -> Result<(), ClassifiedsError> {
        let mut tx = self.pool.begin().await?;

        let advertisement_id: String =
            sqlx::query_scalar("DELETE FROM comments WHERE id = ? RETURNING advertisement_id")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| {
                    ClassifiedsError::not_found(format!("Comment with ID {} does not exist.", id))
                })?;

        let event = ScoreEvent::CommentRemoved { advertisement_id };
        self.aggregator.apply(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn like_advertisement(
        &self,
        user_id: &str,
        advertisement_id: &str,
    ) -> Result<Reaction, ClassifiedsError> {
        let event = ScoreEvent::LikeAdded {
            advertisement_id: advertisement_id.to_string(),
        };
        self.insert_reaction(
            "likes",
            user_id,
            advertisement_id,
            event,
            "Advertisement already liked by this user.",
        )
        .await
    }

    async fn save_advertisement(
        &self,
        user_id: &str,
        advertisement_id: &str,
    ) -> Result<Reaction, ClassifiedsError> {
        let event = ScoreEvent::SaveAdded {
            advertisement_id: advertisement_id.to_string(),
        };
        self.insert_reaction(
            "saved_advertisements",
            user_id,
            advertisement_id,
            event,
            "Advertisement already saved by this user.",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scoring::ScoreWeights;

    async fn create_test_store() -> SqliteClassifiedsStore {
        SqliteClassifiedsStore::in_memory(ScoreAggregator::default())
            .await
            .expect("Failed to create in-memory store")
    }

    async fn seed_ad(store: &SqliteClassifiedsStore) -> Advertisement {
        let category = store
            .create_category(CreateCategory {
                name: "Furniture".to_string(),
                description: None,
            })
            .await
            .expect("Failed to create category");
        store
            .create_advertisement(
                "seller",
                NewAdvertisement {
                    title: "Oak table".to_string(),
                    description: Some("Solid oak, seats six".to_string()),
                    price_cents: 12_000,
                    category_id: category.id,
                },
            )
            .await
            .expect("Failed to create advertisement")
    }

    async fn score_of(store: &SqliteClassifiedsStore, id: &str) -> i64 {
        store.get_advertisement(id).await.expect("advertisement should exist").score
    }

    #[tokio::test]
    async fn test_category_roundtrip_and_normalization() {
        let store = create_test_store().await;

        let created = store
            .create_category(CreateCategory {
                name: "  Electric Vehicles ".to_string(),
                description: Some("Cars and bikes".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(created.name, "electric vehicles");

        let fetched = store.get_category(&created.id).await.unwrap();
        assert_eq!(fetched, created);

        let by_name = store.find_category_by_name("ELECTRIC vehicles").await.unwrap();
        assert_eq!(by_name.id, created.id);
    }

    #[tokio::test]
    async fn test_duplicate_category_is_conflict() {
        let store = create_test_store().await;
        let input = CreateCategory {
            name: "books".to_string(),
            description: None,
        };
        store.create_category(input.clone()).await.unwrap();

        let again = store
            .create_category(CreateCategory {
                name: " BOOKS".to_string(),
                description: None,
            })
            .await;
        assert!(matches!(again, Err(ClassifiedsError::Conflict { .. })), "got {:?}", again);
    }

    #[tokio::test]
    async fn test_categories_listed_by_name() {
        let store = create_test_store().await;
        for name in ["toys", "books", "music"] {
            store
                .create_category(CreateCategory {
                    name: name.to_string(),
                    description: None,
                })
                .await
                .unwrap();
        }
        let names: Vec<String> =
            store.list_categories().await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["books", "music", "toys"]);
    }

    #[tokio::test]
    async fn test_new_advertisement_is_inactive() {
        let store = create_test_store().await;
        let ad = seed_ad(&store).await;

        assert!(!ad.is_active);
        assert_eq!(ad.score, 0);
        assert_eq!(ad.category_name, "furniture");
        assert!(store.active_advertisements().await.unwrap().is_empty());

        let approved = store.set_advertisement_active(&ad.id, true).await.unwrap();
        assert!(approved.is_active);
        assert_eq!(store.active_advertisements().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_comment_lifecycle_moves_score() {
        let store = create_test_store().await;
        let ad = seed_ad(&store).await;

        let first = store
            .add_comment(CreateComment {
                advertisement_id: ad.id.clone(),
                user_id: "alice".to_string(),
                content: "Is it still available?".to_string(),
            })
            .await
            .unwrap();
        store
            .add_comment(CreateComment {
                advertisement_id: ad.id.clone(),
                user_id: "bob".to_string(),
                content: "Would you take 100?".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(score_of(&store, &ad.id).await, 2);

        store.delete_comment(&first.id).await.unwrap();
        assert_eq!(score_of(&store, &ad.id).await, 1);

        let missing = store.delete_comment(&first.id).await;
        assert!(matches!(missing, Err(ClassifiedsError::NotFound { .. })));
        assert_eq!(score_of(&store, &ad.id).await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_like_is_rejected_without_score_change() {
        let store = create_test_store().await;
        let ad = seed_ad(&store).await;

        store.like_advertisement("alice", &ad.id).await.unwrap();
        let again = store.like_advertisement("alice", &ad.id).await;

        assert!(matches!(again, Err(ClassifiedsError::Conflict { .. })), "got {:?}", again);
        assert_eq!(score_of(&store, &ad.id).await, 1);
    }

    #[tokio::test]
    async fn test_save_uses_save_weight() {
        let store = SqliteClassifiedsStore::in_memory(ScoreAggregator::with_weights(ScoreWeights {
            comment: 1,
            like: 2,
            save: 4,
        }))
        .await
        .unwrap();
        let ad = seed_ad(&store).await;

        store.save_advertisement("alice", &ad.id).await.unwrap();
        store.like_advertisement("alice", &ad.id).await.unwrap();

        assert_eq!(score_of(&store, &ad.id).await, 6);
    }

    #[tokio::test]
    async fn test_comment_on_missing_advertisement_leaves_nothing_behind() {
        let store = create_test_store().await;

        let result = store
            .add_comment(CreateComment {
                advertisement_id: "missing".to_string(),
                user_id: "alice".to_string(),
                content: "hello".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ClassifiedsError::NotFound { .. })));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_failed_score_update_rolls_back_mutation() {
        let store = create_test_store().await;
        let ad = seed_ad(&store).await;
        let aggregator = ScoreAggregator::default();

        let mut tx = store.pool().begin().await.unwrap();
        sqlx::query(
            "INSERT INTO comments (id, advertisement_id, user_id, content, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind("c-1")
        .bind(&ad.id)
        .bind("alice")
        .bind("orphaned")
        .bind(timestamp(&now()))
        .execute(&mut *tx)
        .await
        .unwrap();

        let event = ScoreEvent::CommentAdded {
            advertisement_id: "gone".to_string(),
        };
        let failed = aggregator.apply(&mut tx, &event).await;
        assert!(matches!(failed, Err(ClassifiedsError::Persistence(_))));
        drop(tx);

        let orphan = store.get_comment("c-1").await;
        assert!(matches!(orphan, Err(ClassifiedsError::NotFound { .. })));
        assert_eq!(score_of(&store, &ad.id).await, 0);
    }

    #[tokio::test]
    async fn test_delete_category_cascades() {
        let store = create_test_store().await;
        let ad = seed_ad(&store).await;
        store.like_advertisement("alice", &ad.id).await.unwrap();

        store.delete_category(&ad.category_id).await.unwrap();

        let gone = store.get_advertisement(&ad.id).await;
        assert!(matches!(gone, Err(ClassifiedsError::NotFound { .. })));
        let likes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(likes, 0);
    }

    #[tokio::test]
    async fn test_update_advertisement_partial() {
        let store = create_test_store().await;
        let ad = seed_ad(&store).await;

        let updated = store
            .update_advertisement(
                &ad.id,
                UpdateAdvertisement {
                    price_cents: Some(9_500),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.price_cents, 9_500);
        assert_eq!(updated.title, "Oak table");
        assert_eq!(updated.description, ad.description);
        assert!(updated.updated_at >= ad.updated_at);
    }

    #[tokio::test]
    async fn test_moderators() {
        let store = create_test_store().await;
        let ad = seed_ad(&store).await;

        store.add_moderator(&ad.id, "mod-b").await.unwrap();
        store.add_moderator(&ad.id, "mod-a").await.unwrap();
        store.add_moderator(&ad.id, "mod-a").await.unwrap();

        assert_eq!(store.moderators(&ad.id).await.unwrap(), vec!["mod-a", "mod-b"]);
        let missing = store.add_moderator("missing", "mod-a").await;
        assert!(matches!(missing, Err(ClassifiedsError::NotFound { .. })), "got {:?}", missing);
    }

    #[tokio::test]
    async fn test_like_on_missing_advertisement_is_not_found() {
        let store = create_test_store().await;

        let result = store.like_advertisement("alice", "missing").await;
        assert!(matches!(result, Err(ClassifiedsError::NotFound { .. })), "got {:?}", result);

        let likes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(likes, 0);
    }

    #[tokio::test]
    async fn test_update_can_clear_description() {
        let store = create_test_store().await;
        let ad = seed_ad(&store).await;

        let updated = store
            .update_advertisement(
                &ad.id,
                UpdateAdvertisement {
                    description: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description, None);
        assert_eq!(updated.title, "Oak table");

        let category = store
            .update_category(
                &ad.category_id,
                UpdateCategory {
                    description: Some(Some("Tables and chairs".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(category.description.as_deref(), Some("Tables and chairs"));

        let cleared = store
            .update_category(
                &ad.category_id,
                UpdateCategory {
                    description: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.description, None);
        assert_eq!(store.get_category(&ad.category_id).await.unwrap().description, None);
    }

    #[tokio::test]
    async fn test_inline_category_rolls_back_with_failed_advertisement() {
        let store = create_test_store().await;
        sqlx::query(
            "CREATE TRIGGER reject_ads BEFORE INSERT ON advertisements \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let result = store
            .create_advertisement_with_category(
                "seller",
                CreateCategory {
                    name: "Boats".to_string(),
                    description: None,
                },
                AdvertisementDraft {
                    title: "Kayak".to_string(),
                    description: None,
                    price_cents: 30_000,
                },
            )
            .await;
        assert!(matches!(result, Err(ClassifiedsError::Persistence(_))), "got {:?}", result);

        let category = store.find_category_by_name("boats").await;
        assert!(matches!(category, Err(ClassifiedsError::NotFound { .. })), "got {:?}", category);
    }

    #[tokio::test]
    async fn test_inline_category_created_with_advertisement() {
        let store = create_test_store().await;

        let ad = store
            .create_advertisement_with_category(
                "seller",
                CreateCategory {
                    name: "Boats".to_string(),
                    description: Some("Anything that floats".to_string()),
                },
                AdvertisementDraft {
                    title: "Kayak".to_string(),
                    description: None,
                    price_cents: 30_000,
                },
            )
            .await
            .unwrap();

        let category = store.find_category_by_name("boats").await.unwrap();
        assert_eq!(ad.category_id, category.id);
        assert_eq!(ad.category_name, "boats");
        assert!(!ad.is_active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_engagement_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("classifieds.db").display());
        let weights = ScoreWeights {
            comment: 1,
            like: 2,
            save: 1,
        };
        let store = Arc::new(
            SqliteClassifiedsStore::new(&url, ScoreAggregator::with_weights(weights))
                .await
                .unwrap(),
        );
        let ad = seed_ad(&store).await;

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let ad_id = ad.id.clone();
            handles.push(tokio::spawn(async move {
                store.like_advertisement(&format!("user-{}", i), &ad_id).await.map(|_| ())
            }));
        }
        for i in 0..8 {
            let store = store.clone();
            let ad_id = ad.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add_comment(CreateComment {
                        advertisement_id: ad_id,
                        user_id: format!("user-{}", i),
                        content: "Still available?".to_string(),
                    })
                    .await
                    .map(|_| ())
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(score_of(&store, &ad.id).await, 32 * 2 + 8);
        let likes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(likes, 32);
    }
}
