mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::models::*;

/// Authoritative source of features for the scheduler.
///
/// The auto-loop re-reads the project's features on every tick and writes
/// status transitions back through this trait; it never caches a snapshot.
pub trait FeatureStore: Send + Sync {
    /// All features of a project, in declaration order.
    fn list_features(&self, project_path: &str) -> Result<Vec<Feature>>;

    /// Set a feature's status and error message. Returns `false` when the
    /// feature no longer exists.
    fn set_status(
        &self,
        project_path: &str,
        feature_id: &str,
        status: FeatureStatus,
        error: Option<&str>,
    ) -> Result<bool>;
}

const FEATURE_COLUMNS: &str = "id, project_path, title, description, status, dependencies,
     priority, complexity, branch_name, error, created_at, updated_at";

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "automode")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(dirs.data_dir().join("automode.db"))
    }

    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Project operations
    // ============================================================

    /// Distinct project paths that have at least one feature.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt =
            conn.prepare("SELECT DISTINCT project_path FROM features ORDER BY project_path")?;
        let projects = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(projects)
    }

    // ============================================================
    // Feature operations
    // ============================================================

    pub fn get_features_by_project(&self, project_path: &str) -> Result<Vec<Feature>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEATURE_COLUMNS} FROM features WHERE project_path = ? ORDER BY seq"
        ))?;

        let features = stmt
            .query_map([project_path], feature_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(features)
    }

    pub fn get_feature(&self, project_path: &str, id: &str) -> Result<Option<Feature>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let feature = conn
            .query_row(
                &format!(
                    "SELECT {FEATURE_COLUMNS} FROM features WHERE project_path = ? AND id = ?"
                ),
                (project_path, id),
                feature_from_row,
            )
            .optional()?;
        Ok(feature)
    }

    pub fn create_feature(&self, project_path: &str, input: CreateFeatureInput) -> Result<Feature> {
        if project_path.trim().is_empty() {
            anyhow::bail!("projectPath is required");
        }
        if input.title.trim().is_empty() {
            anyhow::bail!("Feature title is required");
        }

        let id = match input.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("feature-{}", Uuid::new_v4()),
        };

        if self.get_feature(project_path, &id)?.is_some() {
            anyhow::bail!("Feature '{}' already exists", id);
        }

        let now = Utc::now();
        let feature = Feature {
            id,
            project_path: project_path.to_string(),
            title: input.title,
            description: input.description,
            status: input.status.unwrap_or(FeatureStatus::Backlog),
            dependencies: input.dependencies,
            priority: input.priority.unwrap_or(DEFAULT_PRIORITY),
            complexity: input.complexity.unwrap_or_default(),
            branch_name: normalize_branch(input.branch_name),
            error: None,
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO features (id, project_path, title, description, status, dependencies,
                                   priority, complexity, branch_name, error, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                &feature.id,
                &feature.project_path,
                &feature.title,
                &feature.description,
                feature.status.as_str(),
                serde_json::to_string(&feature.dependencies)?,
                feature.priority,
                feature.complexity.as_str(),
                &feature.branch_name,
                &feature.error,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(feature)
    }

    /// Apply a partial update. An empty `branch_name` moves the feature back
    /// to the primary worktree.
    pub fn update_feature(
        &self,
        project_path: &str,
        id: &str,
        input: UpdateFeatureInput,
    ) -> Result<Option<Feature>> {
        let Some(existing) = self.get_feature(project_path, id)? else {
            return Ok(None);
        };

        let now = Utc::now();
        let status = input.status.unwrap_or(existing.status);
        // A manual move out of `failed` drops the stale error message.
        let error = if status == FeatureStatus::Failed {
            existing.error
        } else {
            None
        };
        let updated = Feature {
            title: input.title.unwrap_or(existing.title),
            description: input.description.or(existing.description),
            status,
            dependencies: input.dependencies.unwrap_or(existing.dependencies),
            priority: input.priority.unwrap_or(existing.priority),
            complexity: input.complexity.unwrap_or(existing.complexity),
            branch_name: match input.branch_name {
                Some(branch) => normalize_branch(Some(branch)),
                None => existing.branch_name,
            },
            error,
            updated_at: now,
            ..existing
        };

        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "UPDATE features SET title = ?, description = ?, status = ?, dependencies = ?,
                    priority = ?, complexity = ?, branch_name = ?, error = ?, updated_at = ?
             WHERE project_path = ? AND id = ?",
            rusqlite::params![
                &updated.title,
                &updated.description,
                updated.status.as_str(),
                serde_json::to_string(&updated.dependencies)?,
                updated.priority,
                updated.complexity.as_str(),
                &updated.branch_name,
                &updated.error,
                now.to_rfc3339(),
                project_path,
                id,
            ],
        )?;

        Ok(Some(updated))
    }

    pub fn delete_feature(&self, project_path: &str, id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "DELETE FROM features WHERE project_path = ? AND id = ?",
            (project_path, id),
        )?;
        Ok(rows > 0)
    }
}

impl FeatureStore for Database {
    fn list_features(&self, project_path: &str) -> Result<Vec<Feature>> {
        self.get_features_by_project(project_path)
    }

    fn set_status(
        &self,
        project_path: &str,
        feature_id: &str,
        status: FeatureStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE features SET status = ?, error = ?, updated_at = ?
             WHERE project_path = ? AND id = ?",
            (
                status.as_str(),
                error,
                Utc::now().to_rfc3339(),
                project_path,
                feature_id,
            ),
        )?;
        Ok(rows > 0)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn feature_from_row(row: &Row<'_>) -> rusqlite::Result<Feature> {
    let dependencies_json: String = row.get(5)?;
    Ok(Feature {
        id: row.get(0)?,
        project_path: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        // An unreadable status must never look dispatchable.
        status: row
            .get::<_, String>(4)?
            .parse()
            .unwrap_or(FeatureStatus::Failed),
        dependencies: serde_json::from_str(&dependencies_json).unwrap_or_default(),
        priority: row.get(6)?,
        complexity: row
            .get::<_, String>(7)?
            .parse()
            .unwrap_or_default(),
        branch_name: row.get(8)?,
        error: row.get(9)?,
        created_at: parse_datetime(row.get::<_, String>(10)?),
        updated_at: parse_datetime(row.get::<_, String>(11)?),
    })
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
