use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::StoreResult;
use crate::models::Case;

/// Persistent case records. Cases are immutable after creation; the only
/// write path is the per-id upsert used when persisting a generated or
/// imported case.
#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Case>>;

    async fn find_by_classification(
        &self,
        archetype_id: &str,
        region_id: &str,
        category_id: &str,
    ) -> StoreResult<Vec<Case>>;

    async fn upsert(&self, case: &Case) -> StoreResult<()>;
}

pub(crate) fn sanitize_path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Case store over a directory tree of JSON files, one file per case id,
/// grouped by category: `<root>/<category_id>/<case_id>.json`.
pub struct FileCaseStore {
    root: PathBuf,
}

impl FileCaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn scan_all(&self) -> StoreResult<Vec<Case>> {
        let mut cases = Vec::new();
        for path in collect_json_files(&self.root).await? {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<Case>(&content) {
                    Ok(case) if !case.id.is_empty() && !case.true_diagnosis.is_empty() => {
                        cases.push(case)
                    }
                    Ok(_) => debug!(path = %path.display(), "Skipping incomplete case file"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed case file"),
                },
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read case file"),
            }
        }
        Ok(cases)
    }
}

/// Non-recursive directory walk collecting `*.json` files. A missing root is
/// a valid empty store, not an error.
pub(crate) async fn collect_json_files(root: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }
    Ok(files)
}

#[async_trait]
impl CaseStore for FileCaseStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Case>> {
        Ok(self.scan_all().await?.into_iter().find(|c| c.id == id))
    }

    async fn find_by_classification(
        &self,
        archetype_id: &str,
        region_id: &str,
        category_id: &str,
    ) -> StoreResult<Vec<Case>> {
        Ok(self
            .scan_all()
            .await?
            .into_iter()
            .filter(|c| c.matches_classification(archetype_id, region_id, category_id))
            .collect())
    }

    async fn upsert(&self, case: &Case) -> StoreResult<()> {
        let dir = self.root.join(sanitize_path_component(&case.category_id));
        tokio::fs::create_dir_all(&dir).await?;

        // One file per case id: writing the temp file and renaming it is the
        // whole upsert, so concurrent writers of the same id cannot interleave
        // partial content.
        let file = dir.join(format!("{}.json", sanitize_path_component(&case.id)));
        let tmp = dir.join(format!(".{}.tmp", sanitize_path_component(&case.id)));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(case)?).await?;
        tokio::fs::rename(&tmp, &file).await?;
        Ok(())
    }
}

/// Case store backed by Postgres: key metadata in columns for filtering, the
/// full record in a JSONB content column.
pub struct PostgresCaseStore {
    pool: PgPool,
}

impl PostgresCaseStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cases (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                archetype_id TEXT NOT NULL,
                region_id TEXT NOT NULL,
                category_id TEXT NOT NULL,
                content JSONB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn case_from_content(content: serde_json::Value) -> StoreResult<Case> {
        Ok(serde_json::from_value(content)?)
    }
}

#[async_trait]
impl CaseStore for PostgresCaseStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Case>> {
        let row = sqlx::query("SELECT content FROM cases WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::case_from_content(r.get("content")))
            .transpose()
    }

    async fn find_by_classification(
        &self,
        archetype_id: &str,
        region_id: &str,
        category_id: &str,
    ) -> StoreResult<Vec<Case>> {
        let rows = sqlx::query(
            "SELECT content FROM cases \
             WHERE archetype_id = $1 AND region_id = $2 AND category_id = $3",
        )
        .bind(archetype_id)
        .bind(region_id)
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| Self::case_from_content(r.get("content")))
            .collect()
    }

    async fn upsert(&self, case: &Case) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cases (id, title, archetype_id, region_id, category_id, content)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                archetype_id = EXCLUDED.archetype_id,
                region_id = EXCLUDED.region_id,
                category_id = EXCLUDED.category_id,
                content = EXCLUDED.content
            "#,
        )
        .bind(&case.id)
        .bind(&case.title)
        .bind(&case.archetype_id)
        .bind(&case.region_id)
        .bind(&case.category_id)
        .bind(serde_json::to_value(case)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Seed cases available without any persistent store.
pub fn builtin_cases() -> Vec<Case> {
    let athlete_ankle = Case {
        id: "case_athlete_ankle_atfl".to_string(),
        title: "着地で足首を捻ったバスケ選手".to_string(),
        archetype_id: "athlete".to_string(),
        region_id: "athlete_ankle".to_string(),
        category_id: "lateral_ligament".to_string(),
        initial_complaint: "昨日の試合で着地したときに右足首を捻ってしまって、外くるぶしの前あたりがすごく痛いんです。".to_string(),
        scenario_context: "21歳男性、大学バスケットボール部。リバウンド着地時に相手の足に乗り内反強制。受傷直後から外果前方に腫脹と皮下出血。荷重歩行は可能だが疼痛あり。前方引き出しテスト陽性想定。".to_string(),
        true_diagnosis: "前距腓靭帯損傷".to_string(),
        required_findings: vec![
            "内反強制の受傷機転".to_string(),
            "外果前方の腫脹・皮下出血".to_string(),
            "前方引き出しテスト陽性".to_string(),
            "荷重時痛の有無".to_string(),
        ],
        patient_profile: Some(crate::models::PatientProfile {
            name: "佐藤 健一".to_string(),
            age: "21歳".to_string(),
            gender: "男性".to_string(),
            occupation: "大学生（バスケットボール部）".to_string(),
            chief_complaint: "右足首外側の痛み".to_string(),
            onset_date: "昨日、試合中".to_string(),
            history: "リバウンドの着地で相手の足に乗り、内側に捻った。直後から腫れて歩くと痛い。".to_string(),
            pain_scale: 6,
            adl_scale: 4,
            sports_scale: 9,
        }),
    };

    let growth_knee = Case {
        id: "case_growth_knee_osgood".to_string(),
        title: "練習後に膝下が痛む中学生".to_string(),
        archetype_id: "growth_student".to_string(),
        region_id: "growth_knee".to_string(),
        category_id: "osgood".to_string(),
        initial_complaint: "サッカーの練習のあと、膝のお皿の下のところが痛くなるんです。".to_string(),
        scenario_context: "13歳男性、サッカー部。3か月前から両側（右優位）の脛骨粗面部痛。身長が最近急に伸びた。脛骨粗面の膨隆と圧痛あり。安静で軽快、運動で増悪。".to_string(),
        true_diagnosis: "オスグッド・シュラッター病".to_string(),
        required_findings: vec![
            "運動時痛・運動後痛のパターン".to_string(),
            "脛骨粗面の限局した圧痛と膨隆".to_string(),
            "成長スパートの聴取".to_string(),
        ],
        patient_profile: Some(crate::models::PatientProfile {
            name: "田中 翔".to_string(),
            age: "13歳".to_string(),
            gender: "男性".to_string(),
            occupation: "中学生（サッカー部）".to_string(),
            chief_complaint: "膝のお皿の下の痛み".to_string(),
            onset_date: "3か月前から徐々に".to_string(),
            history: "練習量が増えてから痛みが出た。休むと楽になるが、走ると痛い。".to_string(),
            pain_scale: 4,
            adl_scale: 2,
            sports_scale: 7,
        }),
    };

    vec![athlete_ankle, growth_knee]
}

/// Case lookup with the documented precedence: the persisted store first,
/// then cases generated during this process's lifetime, then the built-in
/// fallback list.
pub struct CaseRepository {
    store: Option<Arc<dyn CaseStore>>,
    generated: DashMap<String, Case>,
    builtin: Vec<Case>,
}

impl CaseRepository {
    pub fn new(store: Option<Arc<dyn CaseStore>>) -> Self {
        Self {
            store,
            generated: DashMap::new(),
            builtin: builtin_cases(),
        }
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<Case>> {
        if let Some(store) = &self.store {
            if let Some(case) = store.get(id).await? {
                return Ok(Some(case));
            }
        }
        if let Some(case) = self.generated.get(id) {
            return Ok(Some(case.clone()));
        }
        Ok(self.builtin.iter().find(|c| c.id == id).cloned())
    }

    pub async fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.get(id).await?.is_some())
    }

    pub async fn find_by_classification(
        &self,
        archetype_id: &str,
        region_id: &str,
        category_id: &str,
    ) -> StoreResult<Vec<Case>> {
        let mut matches = Vec::new();
        if let Some(store) = &self.store {
            matches.extend(
                store
                    .find_by_classification(archetype_id, region_id, category_id)
                    .await?,
            );
        }
        matches.extend(
            self.generated
                .iter()
                .filter(|c| c.matches_classification(archetype_id, region_id, category_id))
                .map(|c| c.clone()),
        );
        matches.extend(
            self.builtin
                .iter()
                .filter(|c| c.matches_classification(archetype_id, region_id, category_id))
                .cloned(),
        );
        Ok(matches)
    }

    pub async fn upsert(&self, case: &Case) -> StoreResult<()> {
        match &self.store {
            Some(store) => store.upsert(case).await,
            None => {
                self.generated.insert(case.id.clone(), case.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str, triple: (&str, &str, &str)) -> Case {
        Case {
            id: id.to_string(),
            title: "t".to_string(),
            archetype_id: triple.0.to_string(),
            region_id: triple.1.to_string(),
            category_id: triple.2.to_string(),
            initial_complaint: "c".to_string(),
            scenario_context: "ctx".to_string(),
            true_diagnosis: "dx".to_string(),
            required_findings: vec![],
            patient_profile: None,
        }
    }

    #[tokio::test]
    async fn repository_falls_back_to_builtin_cases() {
        let repo = CaseRepository::new(None);
        let found = repo.get("case_athlete_ankle_atfl").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().true_diagnosis, "前距腓靭帯損傷");

        assert!(repo.get("no_such_case").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn generated_cases_shadow_nothing_but_are_found() {
        let repo = CaseRepository::new(None);
        let generated = case("gen_knee_1", ("athlete", "athlete_knee", "acl"));
        repo.upsert(&generated).await.unwrap();

        assert!(repo.get("gen_knee_1").await.unwrap().is_some());
        let matches = repo
            .find_by_classification("athlete", "athlete_knee", "acl")
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "gen_knee_1");
    }

    #[tokio::test]
    async fn file_store_upsert_then_get_roundtrips() {
        let root = std::env::temp_dir().join(format!("case-store-{}", uuid::Uuid::new_v4()));
        let store = FileCaseStore::new(&root);

        // Missing root directory reads as an empty store.
        assert!(store.get("anything").await.unwrap().is_none());

        let c = case("gen_a", ("athlete", "athlete_ankle", "lateral_ligament"));
        store.upsert(&c).await.unwrap();
        // Overwriting the same id replaces, not duplicates.
        store.upsert(&c).await.unwrap();

        let loaded = store.get("gen_a").await.unwrap().unwrap();
        assert_eq!(loaded.archetype_id, "athlete");

        let matches = store
            .find_by_classification("athlete", "athlete_ankle", "lateral_ligament")
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[test]
    fn path_components_are_sanitized() {
        assert_eq!(sanitize_path_component("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_path_component("gen_case-1"), "gen_case-1");
        assert_eq!(sanitize_path_component(""), "_");
    }
}
