use directories::ProjectDirs;
use eyre::ContextCompat as _;
use serde::Serialize;
use std::path::PathBuf;

pub const CONFIG_DIR_ENV: &str = "COFFER_CONFIG_DIR";
pub const DATA_DIR_ENV: &str = "COFFER_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CofferPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl CofferPaths {
    /// Resolve the directories, honoring `COFFER_CONFIG_DIR` / `COFFER_DATA_DIR` when both
    /// are set (tests and portable installs).
    pub fn discover() -> eyre::Result<Self> {
        if let (Ok(data_dir), Ok(config_dir)) =
            (std::env::var(DATA_DIR_ENV), std::env::var(CONFIG_DIR_ENV))
        {
            return Ok(Self::from_dirs(PathBuf::from(config_dir), PathBuf::from(data_dir)));
        }

        // macOS: ~/Library/Application Support/coffer
        // Linux: ~/.config/coffer and ~/.local/share/coffer
        // Windows: %APPDATA%\coffer
        let proj = ProjectDirs::from("", "", "coffer").context("failed to resolve project dirs")?;
        Ok(Self::from_dirs(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn from_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("coffer.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn keyring_file(&self) -> PathBuf {
        self.data_dir.join("keyring.json")
    }

    pub fn keyring_lock_file(&self) -> PathBuf {
        self.data_dir.join("keyring.lock")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}
