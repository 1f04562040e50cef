use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::models::{Episode, EpisodeStatus};
use crate::{Error, Result};

/// Fields for inserting a newly discovered episode
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub guid: String,
    pub title: String,
    pub description: Option<String>,
    pub audio_url: String,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub transcript_url: Option<String>,
}

/// Repository for Episode rows
#[derive(Clone)]
pub struct EpisodeRepository {
    db: Database,
}

impl EpisodeRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, feed_id: i64, episode: &NewEpisode) -> Result<Episode> {
        let now = Utc::now();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO episode (
                feed_id, guid, title, description, audio_url,
                duration_seconds, published_at, status, transcript_url,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            RETURNING id
            "#,
        )
        .bind(feed_id)
        .bind(&episode.guid)
        .bind(&episode.title)
        .bind(&episode.description)
        .bind(&episode.audio_url)
        .bind(episode.duration_seconds)
        .bind(episode.published_at)
        .bind(EpisodeStatus::New)
        .bind(&episode.transcript_url)
        .bind(now)
        .fetch_one(self.db.pool())
        .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| Error::Database(sqlx::Error::RowNotFound))
    }

    pub async fn get_by_id(&self, episode_id: i64) -> Result<Option<Episode>> {
        let episode = sqlx::query_as::<_, Episode>("SELECT * FROM episode WHERE id = ?1")
            .bind(episode_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(episode)
    }

    pub async fn exists(&self, feed_id: i64, guid: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM episode WHERE feed_id = ?1 AND guid = ?2")
                .bind(feed_id)
                .bind(guid)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(found.is_some())
    }

    pub async fn list_by_feed(&self, feed_id: i64, limit: i64) -> Result<Vec<Episode>> {
        let episodes = sqlx::query_as::<_, Episode>(
            r#"
            SELECT * FROM episode
            WHERE feed_id = ?1
            ORDER BY published_at DESC
            LIMIT ?2
            "#,
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(episodes)
    }

    pub async fn list_by_status(&self, status: EpisodeStatus, limit: i64) -> Result<Vec<Episode>> {
        let episodes = sqlx::query_as::<_, Episode>(
            r#"
            SELECT * FROM episode
            WHERE status = ?1
            ORDER BY created_at ASC
            LIMIT ?2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(episodes)
    }

    pub async fn update_status(
        &self,
        episode_id: i64,
        status: EpisodeStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE episode SET status = ?1, error_message = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(status)
        .bind(error_message)
        .bind(Utc::now())
        .bind(episode_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    pub async fn update_audio_path(&self, episode_id: i64, audio_path: &str) -> Result<()> {
        sqlx::query("UPDATE episode SET audio_path = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(audio_path)
            .bind(Utc::now())
            .bind(episode_id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    pub async fn update_transcript_path(
        &self,
        episode_id: i64,
        transcript_path: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE episode SET transcript_path = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(transcript_path)
            .bind(Utc::now())
            .bind(episode_id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    pub async fn count_by_status(&self) -> Result<Vec<(EpisodeStatus, i64)>> {
        let counts = sqlx::query_as::<_, (EpisodeStatus, i64)>(
            "SELECT status, COUNT(*) FROM episode GROUP BY status",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(counts)
    }

    pub async fn delete(&self, episode_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM episode WHERE id = ?1")
            .bind(episode_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
