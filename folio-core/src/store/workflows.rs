use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::workflows::templates::BuiltinWorkflow;

/// A stored node-graph template.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkflowTemplateRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub workflow_json: String,
    pub is_builtin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTemplateRecord {
    /// Parse the stored node-graph.
    pub fn graph(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.workflow_json)?)
    }
}

/// Repository for workflow templates.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    pool: SqlitePool,
}

impl WorkflowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Option<WorkflowTemplateRecord>> {
        let row = sqlx::query_as::<_, WorkflowTemplateRecord>(
            "SELECT id, name, description, category, workflow_json, is_builtin, \
             created_at, updated_at FROM workflow_templates WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Resolve a template graph by id, failing with `NotFound` when absent.
    pub async fn graph(&self, id: &str) -> Result<Value> {
        let record = self
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("workflow template {id}")))?;
        record.graph()
    }

    /// Insert the builtin templates that are not present yet, keyed by name.
    pub async fn seed_builtins(&self, builtins: &[BuiltinWorkflow]) -> Result<usize> {
        let mut created = 0;

        for builtin in builtins {
            let existing: Option<String> = sqlx::query_scalar(
                "SELECT id FROM workflow_templates WHERE name = ? AND is_builtin = 1",
            )
            .bind(builtin.name)
            .fetch_optional(&self.pool)
            .await?;
            if existing.is_some() {
                continue;
            }

            let now = Utc::now();
            sqlx::query(
                "INSERT INTO workflow_templates \
                 (id, name, description, category, workflow_json, is_builtin, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(builtin.name)
            .bind(builtin.description)
            .bind(builtin.category)
            .bind(serde_json::to_string(&builtin.graph)?)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            created += 1;
        }

        if created > 0 {
            info!("seeded {created} builtin workflow templates");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::templates;

    async fn test_store() -> (WorkflowStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", tmp.path().join("test.db").display());
        let pool = crate::store::connect(&url).await.unwrap();
        crate::store::run_migrations(&pool).await.unwrap();
        (WorkflowStore::new(pool), tmp)
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let (store, _tmp) = test_store().await;
        let first = store.seed_builtins(templates::builtin_workflows()).await.unwrap();
        assert!(first > 0);
        let second = store.seed_builtins(templates::builtin_workflows()).await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn graph_resolves_seeded_templates() {
        let (store, _tmp) = test_store().await;
        store.seed_builtins(templates::builtin_workflows()).await.unwrap();

        let id: String = sqlx::query_scalar(
            "SELECT id FROM workflow_templates WHERE category = 'txt2img' LIMIT 1",
        )
        .fetch_one(&store.pool)
        .await
        .unwrap();

        let graph = store.graph(&id).await.unwrap();
        assert!(graph.get("3").is_some(), "expected a sampler node");
    }

    #[tokio::test]
    async fn graph_for_unknown_id_is_not_found() {
        let (store, _tmp) = test_store().await;
        let err = store.graph("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
