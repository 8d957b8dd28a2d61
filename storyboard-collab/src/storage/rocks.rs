//! RocksDB write-through store for boards, users and credentials.
//!
//! Column families:
//! - `boards`     : `BoardRecord` keyed by board id
//! - `users`      : `UserProfile` keyed by user id
//! - `credentials`: user id keyed by credential string
//!
//! Values are bincode (standard config) wrapped in LZ4 with a size prefix.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use storyboard_core::{BoardRecord, UserProfile};
use thiserror::Error;
use uuid::Uuid;

const CF_BOARDS: &str = "boards";
const CF_USERS: &str = "users";
const CF_CREDENTIALS: &str = "credentials";

const COLUMN_FAMILIES: &[&str] = &[CF_BOARDS, CF_USERS, CF_CREDENTIALS];

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    pub bloom_filter_bits: i32,
    /// fsync every write batch
    pub sync_writes: bool,
    pub max_open_files: i32,
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("storyboard_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 2 * 1024 * 1024,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Column family '{0}' not found")]
    MissingColumnFamily(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let raw = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&raw))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    let (value, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

pub struct BoardDb {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl BoardDb {
    /// Open (or create) the database and its column families.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened board store at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();
        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        // Values are already LZ4 framed.
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    // ─── Boards ──────────────────────────────────────────────────────

    pub fn put_board(&self, board: &BoardRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_BOARDS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, board.id.as_bytes(), encode(board)?);
        self.write(batch)
    }

    /// Write several boards in one atomic batch.
    pub fn put_boards<'a>(
        &self,
        boards: impl IntoIterator<Item = &'a BoardRecord>,
    ) -> Result<(), StoreError> {
        let cf = self.cf(CF_BOARDS)?;
        let mut batch = WriteBatch::default();
        for board in boards {
            batch.put_cf(&cf, board.id.as_bytes(), encode(board)?);
        }
        self.write(batch)
    }

    pub fn delete_board(&self, board_id: Uuid) -> Result<(), StoreError> {
        let cf = self.cf(CF_BOARDS)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf, board_id.as_bytes());
        self.write(batch)
    }

    #[cfg(test)]
    fn load_board(&self, board_id: Uuid) -> Result<Option<BoardRecord>, StoreError> {
        let cf = self.cf(CF_BOARDS)?;
        match self.db.get_cf(&cf, board_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_boards(&self) -> Result<Vec<BoardRecord>, StoreError> {
        self.load_all(CF_BOARDS)
    }

    // ─── Users / credentials ─────────────────────────────────────────

    pub fn put_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        let cf = self.cf(CF_USERS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, user.id.as_bytes(), encode(user)?);
        self.write(batch)
    }

    pub fn load_users(&self) -> Result<Vec<UserProfile>, StoreError> {
        self.load_all(CF_USERS)
    }

    pub fn put_credential(&self, credential: &str, user_id: Uuid) -> Result<(), StoreError> {
        let cf = self.cf(CF_CREDENTIALS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, credential.as_bytes(), encode(&user_id)?);
        self.write(batch)
    }

    pub fn load_credentials(&self) -> Result<Vec<(String, Uuid)>, StoreError> {
        let cf = self.cf(CF_CREDENTIALS)?;
        let mut credentials = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let credential = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            credentials.push((credential, decode(&value)?));
        }
        Ok(credentials)
    }

    #[cfg(test)]
    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ─────────────────────────────────────────────────────

    fn load_all<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, StoreError> {
        let cf = self.cf(name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            values.push(decode(&value)?);
        }
        Ok(values)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::MissingColumnFamily(name.to_string()))
    }
}
