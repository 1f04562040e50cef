use chrono::Utc;

use crate::db::Database;
use crate::models::Feed;
use crate::{Error, Result};

/// Repository for Feed rows
#[derive(Clone)]
pub struct FeedRepository {
    db: Database,
}

impl FeedRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        url: &str,
        title: &str,
        description: Option<&str>,
        image_url: Option<&str>,
        author: Option<&str>,
    ) -> Result<Feed> {
        let now = Utc::now();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feed (url, title, description, image_url, author, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            RETURNING id
            "#,
        )
        .bind(url)
        .bind(title)
        .bind(description)
        .bind(image_url)
        .bind(author)
        .bind(now)
        .fetch_one(self.db.pool())
        .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| Error::Database(sqlx::Error::RowNotFound))
    }

    pub async fn get_by_id(&self, feed_id: i64) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feed WHERE id = ?1")
            .bind(feed_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(feed)
    }

    pub async fn get_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feed WHERE url = ?1")
            .bind(url)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(feed)
    }

    pub async fn list(&self) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT * FROM feed ORDER BY title")
            .fetch_all(self.db.pool())
            .await?;

        Ok(feeds)
    }

    pub async fn update_last_polled(&self, feed_id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query("UPDATE feed SET last_polled_at = ?1, updated_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(feed_id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    pub async fn set_custom_title(&self, feed_id: i64, custom_title: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE feed SET custom_title = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(custom_title)
            .bind(Utc::now())
            .bind(feed_id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    /// Delete a feed; episodes cascade
    pub async fn delete(&self, feed_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM feed WHERE id = ?1")
            .bind(feed_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
