use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::game::{GameState, Players};
use crate::persistence::{self, LoadReport, LogEntry, ReplayReport, SkippedLine};

const SAVE_PREFIX: &str = "game_save_";
const SAVE_SUFFIX: &str = ".jungle";
const RECORD_PREFIX: &str = "game_log_";
const RECORD_SUFFIX: &str = ".record";

/// Where saves and session records live.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub save_dir: PathBuf,
    pub record_dir: PathBuf,
}

impl StoreConfig {
    /// Both directories under `root`, with their usual names.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        StoreConfig {
            save_dir: root.join("jungle"),
            record_dir: root.join("record"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            save_dir: PathBuf::from("jungle"),
            record_dir: PathBuf::from("record"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("Invalid id `{0}`: expected a positive number")]
    InvalidId(String),
}

/// Numbered saves and session records on disk.
#[derive(Debug, Clone, Default)]
pub struct Store {
    config: StoreConfig,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Store { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn save_path(&self, id: u32) -> PathBuf {
        self.config
            .save_dir
            .join(format!("{SAVE_PREFIX}{id}{SAVE_SUFFIX}"))
    }

    pub fn record_path(&self, id: u32) -> PathBuf {
        self.config
            .record_dir
            .join(format!("{RECORD_PREFIX}{id}{RECORD_SUFFIX}"))
    }

    /// Write a new save file and return its number.
    #[instrument(skip(self, state))]
    pub fn save(&self, state: &GameState) -> Result<u32, StoreError> {
        fs::create_dir_all(&self.config.save_dir)?;
        let id = next_number(&self.config.save_dir, SAVE_PREFIX, SAVE_SUFFIX)?;
        let path = self.save_path(id);
        fs::write(&path, persistence::encode_save(state))?;
        info!(id, path = %path.display(), "game saved");
        Ok(id)
    }

    #[instrument(skip(self))]
    pub fn load(&self, id: u32) -> Result<LoadReport, StoreError> {
        let path = self.save_path(id);
        let text = read_existing(&path)?;
        let report = persistence::decode_save(&text);
        info!(
            id,
            skipped = report.skipped.len(),
            "loaded save {}",
            path.display()
        );
        Ok(report)
    }

    /// Load from a user-typed id such as `"01"`.
    pub fn load_str(&self, id: &str) -> Result<LoadReport, StoreError> {
        self.load(parse_id(id)?)
    }

    /// Open a fresh numbered record and write its `start` line.
    #[instrument(skip(self))]
    pub fn open_record(&self, players: &Players) -> Result<Recorder, StoreError> {
        fs::create_dir_all(&self.config.record_dir)?;
        let id = next_number(&self.config.record_dir, RECORD_PREFIX, RECORD_SUFFIX)?;
        let path = self.record_path(id);
        let start = LogEntry::Start {
            red: Some(players.red.clone()),
            blue: Some(players.blue.clone()),
        };
        fs::write(&path, format!("{start}\n"))?;
        info!(id, path = %path.display(), "recording game");
        Ok(Recorder { id, path })
    }

    pub fn read_record(&self, id: u32) -> Result<(Vec<LogEntry>, Vec<SkippedLine>), StoreError> {
        let text = read_existing(&self.record_path(id))?;
        Ok(persistence::parse_log(&text))
    }

    /// Replay a stored record from a fresh game.
    #[instrument(skip(self))]
    pub fn replay(&self, id: u32) -> Result<ReplayReport, StoreError> {
        let text = read_existing(&self.record_path(id))?;
        let report = persistence::replay_log(&text);
        if !report.skipped.is_empty() {
            warn!(id, skipped = report.skipped.len(), "record has unreadable lines");
        }
        Ok(report)
    }
}

/// Append-only writer for one session record.
#[derive(Debug, Clone)]
pub struct Recorder {
    id: u32,
    path: PathBuf,
}

impl Recorder {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, text: &str) -> Result<(), StoreError> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{text}")?;
        Ok(())
    }
}

fn read_existing(path: &Path) -> Result<String, StoreError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(StoreError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_id(id: &str) -> Result<u32, StoreError> {
    let trimmed = id.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| StoreError::InvalidId(id.to_string()))
}

/// One past the highest `<prefix><n><suffix>` number in `dir`, starting at 1.
fn next_number(dir: &Path, prefix: &str, suffix: &str) -> io::Result<u32> {
    let mut max = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let number = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(n) = number {
            max = max.max(n);
        }
    }
    Ok(max + 1)
}
