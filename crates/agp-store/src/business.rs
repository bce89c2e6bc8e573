// SPDX-License-Identifier: MIT OR Apache-2.0

//! Owner-scoped business profile CRUD and public discovery listing
//!.
//!
//! Slug ids are generated via [`agp_core::slug::to_slug`], with a random
//! 4-hex-digit collision suffix retried once on a unique-constraint race
//! (the same pattern `agp-vault`'s `ensure_user_key` uses for DEK rows).

use agp_core::slug::{to_slug, with_collision_suffix};
use agp_core::{Business, BusinessStatus};
use agp_error::{AgpError, ErrorCode};
use sqlx::{Row, SqlitePool};

fn status_str(status: BusinessStatus) -> &'static str {
    match status {
        BusinessStatus::Active => "active",
        BusinessStatus::Suspended => "suspended",
        BusinessStatus::Deleted => "deleted",
    }
}

fn parse_status(raw: &str) -> BusinessStatus {
    match raw {
        "suspended" => BusinessStatus::Suspended,
        "deleted" => BusinessStatus::Deleted,
        _ => BusinessStatus::Active,
    }
}

fn row_to_business(row: sqlx::sqlite::SqliteRow) -> Business {
    let preferences: Option<String> = row.get("preferences");
    Business {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        platform: row.get("platform"),
        location: row.get("location"),
        description: row.get("description"),
        category: row.get("category"),
        preferences: preferences.and_then(|s| serde_json::from_str(&s).ok()),
        status: parse_status(&row.get::<String, _>("status")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Persistent store for [`Business`] profiles.
#[derive(Clone)]
pub struct BusinessStore {
    pool: SqlitePool,
}

impl BusinessStore {
    /// Construct a store over `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a business, deriving its slug id from `name`. On a unique-id
    /// collision the insert is retried once with a fresh random suffix.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on persistent database failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        owner_id: &str,
        name: &str,
        platform: &str,
        location: Option<String>,
        description: Option<String>,
        category: Option<String>,
        preferences: Option<serde_json::Value>,
    ) -> Result<Business, AgpError> {
        let base_slug = to_slug(name);
        let business = Business {
            id: base_slug.clone(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            platform: platform.to_string(),
            location,
            description,
            category,
            preferences,
            status: BusinessStatus::Active,
        };

        match self.insert(&business).await {
            Ok(()) => Ok(business),
            Err(e) if is_unique_violation(&e) => {
                let retried = Business {
                    id: with_collision_suffix(&base_slug),
                    ..business
                };
                self.insert(&retried)
                    .await
                    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to insert business after retry").with_source(e))?;
                Ok(retried)
            }
            Err(e) => Err(AgpError::new(ErrorCode::Internal, "failed to insert business").with_source(e)),
        }
    }

    async fn insert(&self, business: &Business) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO businesses
                (id, owner_id, name, platform, location, description, category, preferences, status,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        )
        .bind(&business.id)
        .bind(&business.owner_id)
        .bind(&business.name)
        .bind(&business.platform)
        .bind(&business.location)
        .bind(&business.description)
        .bind(&business.category)
        .bind(business.preferences.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()))
        .bind(status_str(business.status))
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one business by id, regardless of status.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn get(&self, id: &str) -> Result<Option<Business>, AgpError> {
        let row = sqlx::query(
            "SELECT id, owner_id, name, platform, location, description, category, preferences, status
             FROM businesses WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load business").with_source(e))?;
        Ok(row.map(row_to_business))
    }

    /// Fetch one business by id only if it is [`BusinessStatus::Active`]
    /// (the gateway's resolution path).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn get_active(&self, id: &str) -> Result<Option<Business>, AgpError> {
        Ok(self.get(id).await?.filter(|b| b.status == BusinessStatus::Active))
    }

    /// List every business owned by `owner_id`, regardless of status.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Business>, AgpError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, name, platform, location, description, category, preferences, status
             FROM businesses WHERE owner_id = ?1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to list businesses").with_source(e))?;
        Ok(rows.into_iter().map(row_to_business).collect())
    }

    /// Public discovery listing: every `active` business, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn list_public(&self) -> Result<Vec<Business>, AgpError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, name, platform, location, description, category, preferences, status
             FROM businesses WHERE status = 'active' ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to list public businesses").with_source(e))?;
        Ok(rows.into_iter().map(row_to_business).collect())
    }

    /// Update mutable profile fields of a business owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::BusinessNotFound`] if no row matches
    /// `(id, owner_id)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &self,
        id: &str,
        owner_id: &str,
        name: Option<String>,
        location: Option<String>,
        description: Option<String>,
        category: Option<String>,
        preferences: Option<serde_json::Value>,
    ) -> Result<(), AgpError> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE businesses SET
                name = COALESCE(?1, name),
                location = COALESCE(?2, location),
                description = COALESCE(?3, description),
                category = COALESCE(?4, category),
                preferences = COALESCE(?5, preferences),
                updated_at = ?6
             WHERE id = ?7 AND owner_id = ?8",
        )
        .bind(name)
        .bind(location)
        .bind(description)
        .bind(category)
        .bind(preferences.map(|v| serde_json::to_string(&v).unwrap_or_default()))
        .bind(&now)
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to update business").with_source(e))?;

        if result.rows_affected() == 0 {
            return Err(AgpError::new(ErrorCode::BusinessNotFound, "business not found for this owner"));
        }
        Ok(())
    }

    /// Set a business's lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::BusinessNotFound`] if no row matches
    /// `(id, owner_id)`.
    pub async fn set_status(&self, id: &str, owner_id: &str, status: BusinessStatus) -> Result<(), AgpError> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE businesses SET status = ?1, updated_at = ?2 WHERE id = ?3 AND owner_id = ?4")
            .bind(status_str(status))
            .bind(&now)
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to update business status").with_source(e))?;

        if result.rows_affected() == 0 {
            return Err(AgpError::new(ErrorCode::BusinessNotFound, "business not found for this owner"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> BusinessStore {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        BusinessStore::new(pool)
    }

    #[tokio::test]
    async fn create_derives_slug_id() {
        let store = memory_store().await;
        let business = store
            .create("owner-1", "Joe's Pizza", "stripe", None, None, None, None)
            .await
            .unwrap();
        assert_eq!(business.id, "joe-s-pizza");
    }

    #[tokio::test]
    async fn name_collision_gets_a_suffix() {
        let store = memory_store().await;
        let first = store.create("owner-1", "Joe's Pizza", "stripe", None, None, None, None).await.unwrap();
        let second = store.create("owner-2", "Joe's Pizza", "stripe", None, None, None, None).await.unwrap();
        assert_eq!(first.id, "joe-s-pizza");
        assert_ne!(second.id, first.id);
        assert!(second.id.starts_with("joe-s-pizza-"));
    }

    #[tokio::test]
    async fn list_public_only_returns_active() {
        let store = memory_store().await;
        let business = store.create("owner-1", "Suspended Shop", "stripe", None, None, None, None).await.unwrap();
        store.set_status(&business.id, "owner-1", BusinessStatus::Suspended).await.unwrap();
        assert!(store.list_public().await.unwrap().is_empty());
    }
}
