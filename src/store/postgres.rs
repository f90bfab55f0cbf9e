/// PostgreSQL-backed implementation of ClassifiedsStore
///
/// Uses sqlx with PgPool for connection pooling and production-grade persistence.
/// Supports optional migration execution on startup.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{
    postgres::{PgConnection, PgPool, PgPoolOptions, PgRow},
    Postgres, Row, Transaction,
};
use std::time::Duration;
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

/// PostgreSQL-backed classifieds store using sqlx connection pool.
pub struct PostgresClassifiedsStore {
    pool: PgPool,
    aggregator: ScoreAggregator,
}

impl PostgresClassifiedsStore {
    /// Connect to the PostgreSQL database at database_url.
    ///
    /// If run_migrations is true, automatically runs pending migrations on startup.
    pub async fn new(
        database_url: &str,
        aggregator: ScoreAggregator,
        run_migrations: bool,
    ) -> Result<Self, ClassifiedsError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| {
                ClassifiedsError::Persistence(format!("Failed to connect to database: {}", e))
            })?;

        if run_migrations {
            sqlx::migrate!("./migrations/postgres").run(&pool).await?;
        }

        Ok(PostgresClassifiedsStore { pool, aggregator })
    }

    pub fn pool(&self) -> &PgPool {
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
            "INSERT INTO {} (id, user_id, advertisement_id, created_at) VALUES ($1, $2, $3, $4)",
            table
        ))
        .bind(&id)
        .bind(user_id)
        .bind(advertisement_id)
        .bind(now)
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

/// Row-level atomic increment inside the caller's transaction.
#[async_trait]
impl<'c> ScoreCounter for Transaction<'c, Postgres> {
    async fn increment(
        &mut self,
        advertisement_id: &str,
        delta: i64,
    ) -> Result<(), ClassifiedsError> {
        let result = sqlx::query("UPDATE advertisements SET score = score + $1 WHERE id = $2")
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

// TIMESTAMPTZ keeps microseconds
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

async fn insert_category(
    conn: &mut PgConnection,
    input: CreateCategory,
) -> Result<Category, ClassifiedsError> {
    let name = normalize_category_name(&input.name)?;
    let id = Uuid::new_v4().to_string();
    let now = now();

    sqlx::query(
        "INSERT INTO categories (id, name, description, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&id)
    .bind(&name)
    .bind(&input.description)
    .bind(now)
    .bind(now)
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
    conn: &mut PgConnection,
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
         VALUES ($1, $2, $3, $4, $5, $6, 0, FALSE, $7, $8)",
    )
    .bind(&id)
    .bind(&draft.title)
    .bind(&draft.description)
    .bind(creator_id)
    .bind(draft.price_cents)
    .bind(&category.id)
    .bind(now)
    .bind(now)
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

/// PostgreSQL native types map directly (TIMESTAMPTZ -> DateTime<Utc>, BOOLEAN -> bool).
fn row_to_category(row: &PgRow) -> Result<Category, ClassifiedsError> {
    Ok(Category {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_advertisement(row: &PgRow) -> Result<Advertisement, ClassifiedsError> {
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
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_comment(row: &PgRow) -> Result<Comment, ClassifiedsError> {
    Ok(Comment {
        id: row.try_get("id")?,
        advertisement_id: row.try_get("advertisement_id")?,
        user_id: row.try_get("user_id")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ClassifiedsStore for PostgresClassifiedsStore {
    async fn create_category(&self, input: CreateCategory) -> Result<Category, ClassifiedsError> {
        let mut conn = self.pool.acquire().await?;
        insert_category(&mut conn, input).await
    }

    async fn get_category(&self, id: &str) -> Result<Category, ClassifiedsError> {
        let row = sqlx::query(
            "SELECT id, name, description, created_at, updated_at FROM categories WHERE id = $1",
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
        let row = sqlx::query(
            "SELECT id, name, description, created_at, updated_at FROM categories \
             WHERE lower(name) = lower($1)",
        )
        .bind(name.trim())
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
        let name = input.name.as_deref().map(normalize_category_name).transpose()?;
        let set_description = input.description.is_some();

        // $2 distinguishes "leave as is" from "set to NULL"
        let row = sqlx::query(
            "UPDATE categories SET name = COALESCE($1, name), \
             description = CASE WHEN $2 THEN $3 ELSE description END, \
             updated_at = $4 WHERE id = $5 \
             RETURNING id, name, description, created_at, updated_at",
        )
        .bind(&name)
        .bind(set_description)
        .bind(input.description.flatten())
        .bind(now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "A category with that name already exists."))?
        .ok_or_else(|| {
            ClassifiedsError::not_found(format!("Category with ID {} does not exist.", id))
        })?;

        row_to_category(&row)
    }

    async fn delete_category(&self, id: &str) -> Result<(), ClassifiedsError> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
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
        let row = sqlx::query(&format!("{} WHERE a.id = $1", ADVERTISEMENT_SELECT))
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
            "{} WHERE a.is_active = TRUE ORDER BY a.created_at DESC, a.id ASC",
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
            "UPDATE advertisements SET title = $1, description = $2, price_cents = $3, \
             category_id = $4, updated_at = $5 WHERE id = $6",
        )
        .bind(&title)
        .bind(&description)
        .bind(price_cents)
        .bind(&category_id)
        .bind(now())
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
            sqlx::query("UPDATE advertisements SET is_active = $1, updated_at = $2 WHERE id = $3")
                .bind(active)
                .bind(now())
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
        let result = sqlx::query("DELETE FROM advertisements WHERE id = $1")
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
            "INSERT INTO advertisement_moderators (advertisement_id, user_id) VALUES ($1, $2) \
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
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT user_id FROM advertisement_moderators WHERE advertisement_id = $1 \
             ORDER BY user_id",
        )
        .bind(advertisement_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn add_comment(&self, input: CreateComment) -> Result<Comment, ClassifiedsError> {
        validate_comment_content(&input.content)?;
        let id = Uuid::new_v4().to_string();
        let now = now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO comments (id, advertisement_id, user_id, content, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&id)
        .bind(&input.advertisement_id)
        .bind(&input.user_id)
        .bind(&input.content)
        .bind(now)
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
            "SELECT id, advertisement_id, user_id, content, created_at FROM comments WHERE id = $1",
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
            sqlx::query_scalar("DELETE FROM comments WHERE id = $1 RETURNING advertisement_id")
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
