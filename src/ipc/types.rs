use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;

use crate::curriculum::{CatalogError, CurriculumCatalog};
use crate::db;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    catalog: Option<Arc<CurriculumCatalog>>,
}

impl AppState {
    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let conn = db::open_db(path)?;
        self.workspace = Some(path.to_path_buf());
        self.db = Some(conn);
        self.catalog = None;
        Ok(())
    }

    /// The curriculum of the open workspace, loaded on first use and reused
    /// until [`AppState::invalidate_catalog`] is called.
    pub fn catalog(&mut self) -> Result<Option<Arc<CurriculumCatalog>>, CatalogError> {
        if let Some(c) = self.catalog.as_ref() {
            return Ok(Some(Arc::clone(c)));
        }
        let Some(conn) = self.db.as_ref() else {
            return Ok(None);
        };
        let loaded = Arc::new(CurriculumCatalog::load(conn)?);
        tracing::debug!(units = loaded.len(), "curriculum catalog loaded");
        self.catalog = Some(Arc::clone(&loaded));
        Ok(Some(loaded))
    }

    pub fn invalidate_catalog(&mut self) {
        self.catalog = None;
    }
}
