//! RocksDB-backed message store.
//!
//! Column families:
//! - `messages` — bincode-encoded [`Message`] records
//! - `meta`     — store counters (next sequence number)
//!
//! Message key layout:
//! ```text
//! ┌──────────────────────────────┬──────┬──────────────┬──────────────┐
//! │ pair key (min ␟ max identity)│ 0x00 │ created_at BE│ sequence BE  │
//! │ variable                     │ 1 B  │ 8 bytes      │ 8 bytes      │
//! └──────────────────────────────┴──────┴──────────────┴──────────────┘
//! ```
//!
//! Both directions of a conversation share one pair key, so a forward scan
//! over the prefix yields the history in chronological order. Identities
//! never contain control characters, which keeps the separators unambiguous.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};

use super::{MessageStore, StoreError};
use crate::identity::Identity;
use crate::message::Message;

const CF_MESSAGES: &str = "messages";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[CF_MESSAGES, CF_META];

const META_SEQUENCE: &[u8] = b"sequence";

const PAIR_SEPARATOR: u8 = 0x1f;
const PAIR_TERMINATOR: u8 = 0x00;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// fsync every append (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("parley_data"),
            block_cache_size: 64 * 1024 * 1024,
            sync_writes: true,
            max_open_files: 512,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small cache, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// Durable message store.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Next sequence number. Held across the write so that the persisted
    /// counter only ever moves forward.
    sequence: Mutex<u64>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let sequence = Self::recover_sequence(&db)?;
        log::info!(
            "Opened message store at {} ({sequence} messages)",
            config.path.display()
        );

        Ok(Self {
            db,
            config,
            sequence: Mutex::new(sequence),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            CF_MESSAGES => {
                // Range scans by conversation prefix
                opts.set_compression_type(DBCompressionType::Lz4);
            }
            CF_META => {
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    fn recover_sequence(db: &DBWithThreadMode<SingleThreaded>) -> Result<u64, StoreError> {
        let cf = db
            .cf_handle(CF_META)
            .ok_or_else(|| StoreError::Database(format!("Column family '{CF_META}' not found")))?;
        match db.get_cf(cf, META_SEQUENCE)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Database directory.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        for name in COLUMN_FAMILIES {
            self.db.flush_cf(self.cf(name)?)?;
        }
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    /// Conversation prefix shared by both directions of `a` ↔ `b`.
    fn pair_prefix(a: &Identity, b: &Identity) -> Vec<u8> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut key = Vec::with_capacity(lo.as_str().len() + hi.as_str().len() + 2);
        key.extend_from_slice(lo.as_str().as_bytes());
        key.push(PAIR_SEPARATOR);
        key.extend_from_slice(hi.as_str().as_bytes());
        key.push(PAIR_TERMINATOR);
        key
    }

    fn message_key(message: &Message, sequence: u64) -> Vec<u8> {
        let mut key = Self::pair_prefix(&message.sender, &message.receiver);
        key.extend_from_slice(&message.created_at.to_be_bytes());
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }
}

impl MessageStore for RocksStore {
    fn append(&self, message: Message) -> Result<Message, StoreError> {
        let cf_messages = self.cf(CF_MESSAGES)?;
        let cf_meta = self.cf(CF_META)?;

        let value = bincode::serde::encode_to_vec(&message, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut sequence = self
            .sequence
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let seq = *sequence;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_messages, Self::message_key(&message, seq), &value);
        batch.put_cf(cf_meta, META_SEQUENCE, (seq + 1).to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        *sequence = seq + 1;
        Ok(message)
    }

    fn query(&self, a: &Identity, b: &Identity) -> Result<Vec<Message>, StoreError> {
        let cf = self.cf(CF_MESSAGES)?;
        let prefix = Self::pair_prefix(a, b);

        let mut messages = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let (message, _) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard())
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            messages.push(message);
        }

        Ok(messages)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let sequence = self
            .sequence
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(*sequence as usize)
    }
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StoreError> {
    let buf: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Deserialization(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(buf))
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn msg_at(sender: &str, receiver: &str, content: &str, created_at: u64) -> Message {
        let mut m = Message::new(id(sender), id(receiver), content);
        m.created_at = created_at;
        m
    }

    #[test]
    fn test_store_open() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_append_and_query_both_directions() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        store.append(msg_at("bob", "alice", "reply", 200)).unwrap();
        store.append(msg_at("alice", "bob", "hello", 100)).unwrap();

        let ab = store.query(&id("alice"), &id("bob")).unwrap();
        let ba = store.query(&id("bob"), &id("alice")).unwrap();
        assert_eq!(ab, ba);

        let contents: Vec<&str> = ab.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "reply"]);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_prefix_isolation() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        // "al" ↔ "bob" must not bleed into "al" ↔ "bobby" or "alice" ↔ "bob"
        store.append(msg_at("al", "bob", "one", 1)).unwrap();
        store.append(msg_at("al", "bobby", "two", 2)).unwrap();
        store.append(msg_at("alice", "bob", "three", 3)).unwrap();

        let history = store.query(&id("al"), &id("bob")).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "one");
    }

    #[test]
    fn test_equal_timestamps_keep_append_order() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

        for i in 0..10 {
            store.append(msg_at("a", "b", &i.to_string(), 42)).unwrap();
        }

        let contents: Vec<String> = store
            .query(&id("a"), &id("b"))
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_reopen_preserves_messages_and_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        let original = {
            let store = RocksStore::open(StoreConfig::for_testing(&path)).unwrap();
            let m = store.append(msg_at("alice", "bob", "durable ünïcödé", 5)).unwrap();
            store.flush().unwrap();
            m
        };

        let store = RocksStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        store.append(msg_at("alice", "bob", "later", 5)).unwrap();
        let history = store.query(&id("bob"), &id("alice")).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], original);
        assert_eq!(history[1].content, "later");
    }

    #[test]
    fn test_pair_prefix_is_order_independent() {
        assert_eq!(
            RocksStore::pair_prefix(&id("x"), &id("y")),
            RocksStore::pair_prefix(&id("y"), &id("x"))
        );
    }
}
