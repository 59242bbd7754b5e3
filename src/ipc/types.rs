use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::db;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
        }
    }
}

impl AppState {
    /// Opens (or creates) the workspace database and makes it current.
    pub fn select_workspace(&mut self, path: PathBuf) -> anyhow::Result<()> {
        let conn = db::open_db(&path)?;
        tracing::info!(workspace = %path.display(), "workspace selected");
        self.workspace = Some(path);
        self.db = Some(conn);
        Ok(())
    }

    pub fn outputs_dir(&self) -> Option<PathBuf> {
        self.workspace.as_ref().map(|w| w.join("outputs"))
    }
}
