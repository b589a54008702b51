use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::path::PathBuf;
use tracing::warn;

use super::{StoreResult, case::collect_json_files};
use crate::models::{KnowledgeItem, KnowledgeSummary};

/// Reference-document excerpts. Write-once on admin upload, read-only after.
///
/// `find` matches the classification triple by exact equality; an empty
/// result is a valid, common state and never an error.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn find(
        &self,
        archetype_id: &str,
        region_id: &str,
        category_id: &str,
    ) -> StoreResult<Vec<KnowledgeItem>>;

    async fn save(&self, item: &KnowledgeItem) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<KnowledgeSummary>>;
}

/// In-memory store, used in tests and as the no-persistence fallback.
pub struct InMemoryKnowledgeStore {
    items: DashMap<String, KnowledgeItem>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn find(
        &self,
        archetype_id: &str,
        region_id: &str,
        category_id: &str,
    ) -> StoreResult<Vec<KnowledgeItem>> {
        Ok(self
            .items
            .iter()
            .filter(|item| {
                item.archetype_id == archetype_id
                    && item.region_id == region_id
                    && item.category_id == category_id
            })
            .map(|item| item.clone())
            .collect())
    }

    async fn save(&self, item: &KnowledgeItem) -> StoreResult<()> {
        self.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<KnowledgeSummary>> {
        Ok(self.items.iter().map(|item| (&*item).into()).collect())
    }
}

/// Knowledge store over a triple-keyed directory tree:
/// `<root>/<archetype_id>/<region_id>/<category_id>/<item_id>.json`.
pub struct FileKnowledgeStore {
    root: PathBuf,
}

impl FileKnowledgeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn triple_dir(&self, archetype_id: &str, region_id: &str, category_id: &str) -> PathBuf {
        self.root
            .join(super::case::sanitize_path_component(archetype_id))
            .join(super::case::sanitize_path_component(region_id))
            .join(super::case::sanitize_path_component(category_id))
    }

    async fn load_items(&self, dir: &std::path::Path) -> StoreResult<Vec<KnowledgeItem>> {
        let mut items = Vec::new();
        for path in collect_json_files(dir).await? {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<KnowledgeItem>(&content) {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping malformed knowledge file")
                    }
                },
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read knowledge file"),
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl KnowledgeStore for FileKnowledgeStore {
    async fn find(
        &self,
        archetype_id: &str,
        region_id: &str,
        category_id: &str,
    ) -> StoreResult<Vec<KnowledgeItem>> {
        let dir = self.triple_dir(archetype_id, region_id, category_id);
        self.load_items(&dir).await
    }

    async fn save(&self, item: &KnowledgeItem) -> StoreResult<()> {
        let dir = self.triple_dir(&item.archetype_id, &item.region_id, &item.category_id);
        tokio::fs::create_dir_all(&dir).await?;
        let file = dir.join(format!(
            "{}.json",
            super::case::sanitize_path_component(&item.id)
        ));
        tokio::fs::write(&file, serde_json::to_vec_pretty(item)?).await?;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<KnowledgeSummary>> {
        Ok(self
            .load_items(&self.root)
            .await?
            .iter()
            .map(|item| item.into())
            .collect())
    }
}

/// Knowledge store backed by Postgres with the classification columns used
/// for exact-equality retrieval.
pub struct PostgresKnowledgeStore {
    pool: PgPool,
}

impl PostgresKnowledgeStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                file_name TEXT NOT NULL,
                content TEXT NOT NULL,
                archetype_id TEXT NOT NULL,
                region_id TEXT NOT NULL,
                category_id TEXT NOT NULL,
                uploaded_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn item_from_row(row: &sqlx::postgres::PgRow) -> KnowledgeItem {
        KnowledgeItem {
            id: row.get("id"),
            title: row.get("title"),
            file_name: row.get("file_name"),
            content: row.get("content"),
            archetype_id: row.get("archetype_id"),
            region_id: row.get("region_id"),
            category_id: row.get("category_id"),
            uploaded_at: row.get("uploaded_at"),
        }
    }
}

#[async_trait]
impl KnowledgeStore for PostgresKnowledgeStore {
    async fn find(
        &self,
        archetype_id: &str,
        region_id: &str,
        category_id: &str,
    ) -> StoreResult<Vec<KnowledgeItem>> {
        let rows = sqlx::query(
            "SELECT id, title, file_name, content, archetype_id, region_id, category_id, uploaded_at \
             FROM knowledge \
             WHERE archetype_id = $1 AND region_id = $2 AND category_id = $3 \
             ORDER BY uploaded_at",
        )
        .bind(archetype_id)
        .bind(region_id)
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::item_from_row).collect())
    }

    async fn save(&self, item: &KnowledgeItem) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge
                (id, title, file_name, content, archetype_id, region_id, category_id, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.file_name)
        .bind(&item.content)
        .bind(&item.archetype_id)
        .bind(&item.region_id)
        .bind(&item.category_id)
        .bind(item.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<KnowledgeSummary>> {
        let rows = sqlx::query(
            "SELECT id, title, file_name, content, archetype_id, region_id, category_id, uploaded_at \
             FROM knowledge ORDER BY uploaded_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (&Self::item_from_row(row)).into())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str, triple: (&str, &str, &str)) -> KnowledgeItem {
        KnowledgeItem {
            id: id.to_string(),
            title: format!("title-{id}"),
            file_name: format!("{id}.pdf"),
            content: "ガイドライン本文".to_string(),
            archetype_id: triple.0.to_string(),
            region_id: triple.1.to_string(),
            category_id: triple.2.to_string(),
            uploaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unmatched_triple_yields_empty_list_not_error() {
        let store = InMemoryKnowledgeStore::new();
        store
            .save(&item("k1", ("athlete", "athlete_ankle", "lateral_ligament")))
            .await
            .unwrap();

        let none = store
            .find("elderly", "elderly_trauma", "femoral_neck_fx")
            .await
            .unwrap();
        assert!(none.is_empty());

        // Partial matches are not matches.
        let partial = store
            .find("athlete", "athlete_ankle", "high_ankle")
            .await
            .unwrap();
        assert!(partial.is_empty());
    }

    #[tokio::test]
    async fn exact_triple_matches_only() {
        let store = InMemoryKnowledgeStore::new();
        let triple = ("athlete", "athlete_ankle", "lateral_ligament");
        store.save(&item("k1", triple)).await.unwrap();
        store.save(&item("k2", triple)).await.unwrap();
        store
            .save(&item("k3", ("athlete", "athlete_knee", "acl")))
            .await
            .unwrap();

        let found = store
            .find("athlete", "athlete_ankle", "lateral_ligament")
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn file_store_roundtrip_and_empty_find() {
        let root = std::env::temp_dir().join(format!("knowledge-store-{}", uuid::Uuid::new_v4()));
        let store = FileKnowledgeStore::new(&root);

        // Missing directory tree reads as empty, never errors.
        assert!(
            store
                .find("athlete", "athlete_ankle", "lateral_ligament")
                .await
                .unwrap()
                .is_empty()
        );

        let k = item("k1", ("athlete", "athlete_ankle", "lateral_ligament"));
        store.save(&k).await.unwrap();

        let found = store
            .find("athlete", "athlete_ankle", "lateral_ligament")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "title-k1");

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content_length, "ガイドライン本文".chars().count());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
