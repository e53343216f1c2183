use crate::models::Source;
use chrono::{Local, NaiveDate};
use std::path::PathBuf;

/// Where and under which date a run writes its files
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub date: NaiveDate,
}

impl RunConfig {
    pub fn new(data_dir: impl Into<PathBuf>, checkpoint_dir: impl Into<PathBuf>, date: Option<NaiveDate>) -> Self {
        Self {
            data_dir: data_dir.into(),
            checkpoint_dir: checkpoint_dir.into(),
            date: date.unwrap_or_else(|| Local::now().date_naive()),
        }
    }

    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `<data_dir>/<Group>/<Site>/`
    pub fn source_dir(&self, source: Source) -> PathBuf {
        self.data_dir.join(source.group().dir_name()).join(source.name())
    }

    /// `<data_dir>/<Group>/<Site>/<prefix>_<date>.<ext>`
    pub fn snapshot_path(&self, source: Source, ext: &str) -> PathBuf {
        self.source_dir(source)
            .join(format!("{}_{}.{}", source.file_prefix(), self.date_str(), ext))
    }

    /// `<checkpoint_dir>/<prefix>_checkpoint_<date>.json`
    pub fn checkpoint_path(&self, source: Source) -> PathBuf {
        self.checkpoint_dir
            .join(format!("{}_checkpoint_{}.json", source.file_prefix(), self.date_str()))
    }
}

/// Login for sites that hide listings behind an account
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Self { username, password })
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
