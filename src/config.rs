//! Storage configuration for a ledger instance
use super::error::LedgerError;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Directory of the sled store. Ignored when `temporary` is set.
    pub path: PathBuf,
    /// Store is removed when the last handle is dropped
    pub temporary: bool,
    /// Background flush interval; `None` leaves flushing to explicit calls
    pub flush_every_ms: Option<u64>,
    pub cache_capacity: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("supply_chain.db"),
            temporary: false,
            flush_every_ms: Some(500),
            cache_capacity: 64 * 1024 * 1024,
        }
    }
}

impl LedgerConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Self::default()
        }
    }
    pub fn open_db(&self) -> Result<sled::Db, LedgerError> {
        let mut config = sled::Config::new()
            .temporary(self.temporary)
            .flush_every_ms(self.flush_every_ms)
            .cache_capacity(self.cache_capacity);
        if !self.temporary {
            config = config.path(&self.path);
        }

        debug!(path = %self.path.display(), temporary = self.temporary, "opening ledger store");
        Ok(config.open()?)
    }
}
