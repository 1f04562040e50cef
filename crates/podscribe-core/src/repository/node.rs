use chrono::Utc;
use rand::RngCore;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{NodeStatus, WorkerNode};
use crate::{Error, Result};

/// Repository for remote worker node identity and liveness.
///
/// Sole writer of `worker_node` rows.
#[derive(Clone)]
pub struct NodeRepository {
    db: Database,
}

impl NodeRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a new node, minting its identity.
    ///
    /// The generated API key is the node's only proof of identity from
    /// here on; registration itself is unauthenticated by design.
    pub async fn register(
        &self,
        name: &str,
        url: &str,
        model: Option<&str>,
        backend: Option<&str>,
    ) -> Result<WorkerNode> {
        let node_id = Uuid::new_v4().to_string();
        let api_key = generate_api_key();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO worker_node (
                id, name, url, api_key, model, backend, status,
                last_heartbeat, priority, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 10, ?8, ?8)
            "#,
        )
        .bind(&node_id)
        .bind(name)
        .bind(url)
        .bind(&api_key)
        .bind(model)
        .bind(backend)
        .bind(NodeStatus::Online)
        .bind(now)
        .execute(self.db.pool())
        .await?;

        self.get_by_id(&node_id)
            .await?
            .ok_or_else(|| Error::Database(sqlx::Error::RowNotFound))
    }

    pub async fn get_by_id(&self, node_id: &str) -> Result<Option<WorkerNode>> {
        let node = sqlx::query_as::<_, WorkerNode>("SELECT * FROM worker_node WHERE id = ?1")
            .bind(node_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(node)
    }

    /// Look up a node by its API key
    pub async fn get_by_api_key(&self, api_key: &str) -> Result<Option<WorkerNode>> {
        let node = sqlx::query_as::<_, WorkerNode>("SELECT * FROM worker_node WHERE api_key = ?1")
            .bind(api_key)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(node)
    }

    pub async fn list(&self) -> Result<Vec<WorkerNode>> {
        let nodes = sqlx::query_as::<_, WorkerNode>(
            "SELECT * FROM worker_node ORDER BY priority ASC, name ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(nodes)
    }

    /// Record a heartbeat, reviving offline nodes and refreshing the
    /// reported model/backend when the node sends them
    pub async fn update_heartbeat(
        &self,
        node_id: &str,
        model: Option<&str>,
        backend: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE worker_node
            SET last_heartbeat = ?1,
                status = CASE WHEN status = ?2 THEN ?3 ELSE status END,
                model = COALESCE(?4, model),
                backend = COALESCE(?5, backend),
                updated_at = ?1
            WHERE id = ?6
            "#,
        )
        .bind(now)
        .bind(NodeStatus::Offline)
        .bind(NodeStatus::Online)
        .bind(model)
        .bind(backend)
        .bind(node_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    pub async fn update_status(
        &self,
        node_id: &str,
        status: NodeStatus,
        current_job_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE worker_node
            SET status = ?1, current_job_id = ?2, updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(status)
        .bind(current_job_id)
        .bind(Utc::now())
        .bind(node_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Mark a node offline. Returns the job it was holding, if any.
    pub async fn mark_offline(&self, node_id: &str) -> Result<Option<i64>> {
        let node = self.get_by_id(node_id).await?;
        let Some(node) = node else { return Ok(None) };

        sqlx::query(
            r#"
            UPDATE worker_node
            SET status = ?1, current_job_id = NULL, updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(NodeStatus::Offline)
        .bind(Utc::now())
        .bind(node_id)
        .execute(self.db.pool())
        .await?;

        Ok(node.current_job_id)
    }

    pub async fn delete(&self, node_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM worker_node WHERE id = ?1")
            .bind(node_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_by_name(&self, name: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM worker_node WHERE name = ?1")
            .bind(name)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }
}

/// 32 random bytes, hex-encoded
fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> NodeRepository {
        let db = Database::in_memory().await.unwrap();
        NodeRepository::new(db)
    }

    #[tokio::test]
    async fn test_register_mints_identity() {
        let repo = setup().await;

        let node = repo
            .register("gpu-1", "http://gpu-1:8001", Some("large-v3"), Some("cuda"))
            .await
            .unwrap();

        assert_eq!(node.name, "gpu-1");
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.api_key.len(), 64);
        assert!(Uuid::parse_str(&node.id).is_ok());

        let other = repo
            .register("gpu-2", "http://gpu-2:8001", None, None)
            .await
            .unwrap();
        assert_ne!(node.api_key, other.api_key);
    }

    #[tokio::test]
    async fn test_get_by_api_key() {
        let repo = setup().await;
        let node = repo.register("gpu-1", "http://gpu-1", None, None).await.unwrap();

        let found = repo.get_by_api_key(&node.api_key).await.unwrap().unwrap();
        assert_eq!(found.id, node.id);
        assert!(repo.get_by_api_key("bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_revives_offline_node() {
        let repo = setup().await;
        let node = repo.register("gpu-1", "http://gpu-1", None, None).await.unwrap();

        repo.update_status(&node.id, NodeStatus::Offline, None)
            .await
            .unwrap();
        repo.update_heartbeat(&node.id, Some("medium"), None)
            .await
            .unwrap();

        let node = repo.get_by_id(&node.id).await.unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.model.as_deref(), Some("medium"));
        assert!(node.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_busy_status() {
        let repo = setup().await;
        let node = repo.register("gpu-1", "http://gpu-1", None, None).await.unwrap();

        repo.update_status(&node.id, NodeStatus::Busy, Some(7)).await.unwrap();
        repo.update_heartbeat(&node.id, None, None).await.unwrap();

        let node = repo.get_by_id(&node.id).await.unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Busy);
        assert_eq!(node.current_job_id, Some(7));
    }

    #[tokio::test]
    async fn test_mark_offline_returns_held_job() {
        let repo = setup().await;
        let node = repo.register("gpu-1", "http://gpu-1", None, None).await.unwrap();

        repo.update_status(&node.id, NodeStatus::Busy, Some(42)).await.unwrap();

        let held = repo.mark_offline(&node.id).await.unwrap();
        assert_eq!(held, Some(42));

        let node = repo.get_by_id(&node.id).await.unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Offline);
        assert!(node.current_job_id.is_none());
    }

    #[tokio::test]
    async fn test_delete_by_name() {
        let repo = setup().await;
        repo.register("gpu-1", "http://a", None, None).await.unwrap();
        repo.register("gpu-1", "http://b", None, None).await.unwrap();

        assert_eq!(repo.delete_by_name("gpu-1").await.unwrap(), 2);
        assert!(repo.list().await.unwrap().is_empty());
    }
}
