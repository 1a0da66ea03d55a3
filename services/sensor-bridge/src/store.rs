//! Reading store: append-only, insertion-ordered readings per channel
//!
//! Every reading carries an identity that encodes its creation instant and an
//! explicit `recorded_at` timestamp. The [`ReadingStore`] trait is the seam the
//! dispatcher and query service talk to; [`LocalStore`] keeps readings in memory
//! and optionally replays and appends a JSON-lines journal.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::channel::Channel;
use crate::error::{BridgeError, Result};

/// Store-assigned identity of a reading
///
/// Twelve bytes: big-endian milliseconds since the Unix epoch followed by a
/// big-endian sequence number. Ordering of ids is creation ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadingId {
    millis: u64,
    seq: u32,
}

impl ReadingId {
    pub fn new(millis: u64, seq: u32) -> Self {
        Self { millis, seq }
    }

    /// Next id after `previous` for a clock reading of `now_ms`
    ///
    /// Never goes backwards: a stalled or rewound clock reuses the previous
    /// millisecond and bumps the sequence.
    pub fn next(previous: Option<ReadingId>, now_ms: u64) -> Self {
        match previous {
            Some(prev) if now_ms <= prev.millis => match prev.seq.checked_add(1) {
                Some(seq) => Self::new(prev.millis, seq),
                None => Self::new(prev.millis + 1, 0),
            },
            _ => Self::new(now_ms, 0),
        }
    }

    /// Decode the creation instant
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.millis as i64).unwrap_or_default()
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&self.millis.to_be_bytes());
        bytes[8..].copy_from_slice(&self.seq.to_be_bytes());
        bytes
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for ReadingId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 24 || !s.is_ascii() {
            return Err(BridgeError::Parse(format!("Invalid reading id '{}'", s)));
        }
        let millis = u64::from_str_radix(&s[..16], 16)
            .map_err(|e| BridgeError::Parse(format!("Invalid reading id '{}': {}", s, e)))?;
        let seq = u32::from_str_radix(&s[16..], 16)
            .map_err(|e| BridgeError::Parse(format!("Invalid reading id '{}': {}", s, e)))?;
        Ok(Self { millis, seq })
    }
}

impl Serialize for ReadingId {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReadingId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One persisted observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,
    pub channel: Channel,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A persisted rolling median linked to the readings it was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedianRecord {
    pub channel: Channel,
    pub value: f64,
    pub computed_at: DateTime<Utc>,
    pub window: Vec<ReadingId>,
}

/// Insert/query contract of the persistent store
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ReadingStore: Send + Sync {
    /// Append one reading, returning it with its assigned identity
    async fn insert(&self, channel: Channel, value: f64) -> Result<Reading>;

    /// The most recent `n` readings of `channel`, most recent first
    async fn latest(&self, channel: Channel, n: usize) -> Result<Vec<Reading>>;

    /// Append one median record
    async fn insert_median(&self, record: MedianRecord) -> Result<()>;

    /// The most recent `n` median records, most recent first
    async fn latest_medians(&self, n: usize) -> Result<Vec<MedianRecord>>;
}

/// Source of the current time for id assignment
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// One line of the journal
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalEntry {
    Reading(Reading),
    Median(MedianRecord),
}

#[derive(Debug, Default)]
struct Logs {
    readings: HashMap<Channel, Vec<Reading>>,
    medians: Vec<MedianRecord>,
    last_id: Option<ReadingId>,
}

/// State shared with journal write tasks
#[derive(Debug)]
struct Shared {
    logs: RwLock<Logs>,
    journal: Option<Mutex<tokio::fs::File>>,
}

/// In-memory reading store with an optional JSON-lines journal
///
/// With a journal, each write runs on its own task so the journal line and the
/// in-memory update land together even if the caller stops waiting.
pub struct LocalStore {
    shared: Arc<Shared>,
    journal_path: Option<PathBuf>,
    clock: Clock,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("journal_path", &self.journal_path)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Store without a journal; contents are lost on shutdown
    pub fn in_memory() -> Self {
        Self {
            shared: Arc::new(Shared {
                logs: RwLock::new(Logs::default()),
                journal: None,
            }),
            journal_path: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Open a store backed by the journal at `path`, replaying its contents
    pub async fn open(path: &Path) -> Result<Self> {
        let mut logs = Logs::default();
        let mut torn_tail = false;

        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                torn_tail = !content.is_empty() && !content.ends_with('\n');
                for (line_no, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JournalEntry>(line) {
                        Ok(entry) => logs.replay(entry),
                        Err(e) => tracing::warn!(
                            "Skipping corrupt journal line {} in {:?}: {}",
                            line_no + 1,
                            path,
                            e
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Journal {:?} does not exist yet, starting empty", path);
            }
            Err(e) => return Err(e.into()),
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        if torn_tail {
            // Terminate the partial line so the next entry starts on its own
            tracing::warn!("Journal {:?} ends mid-line, terminating it", path);
            file.write_all(b"\n").await?;
            file.flush().await?;
        }

        tracing::info!(
            "Opened reading journal {:?} ({} temperature, {} humidity, {} soil moisture readings)",
            path,
            logs.count(Channel::Temperature),
            logs.count(Channel::Humidity),
            logs.count(Channel::SoilMoisture)
        );

        Ok(Self {
            shared: Arc::new(Shared {
                logs: RwLock::new(logs),
                journal: Some(Mutex::new(file)),
            }),
            journal_path: Some(path.to_path_buf()),
            clock: Arc::new(Utc::now),
        })
    }

    /// Replace the clock used to assign identities
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Number of readings stored for `channel`
    pub async fn count(&self, channel: Channel) -> usize {
        self.shared.logs.read().await.count(channel)
    }

    /// Run a write to completion, detached from the caller when journaled
    async fn commit<T, F, Fut>(&self, write: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Shared>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        if shared.journal.is_none() {
            return write(shared).await;
        }

        tokio::spawn(write(shared)).await.map_err(|e| {
            BridgeError::StoreUnavailable(format!("Journal write task failed: {}", e))
        })?
    }
}

impl Shared {
    async fn insert(&self, channel: Channel, value: f64, clock: Clock) -> Result<Reading> {
        let mut logs = self.logs.write().await;

        let now_ms = clock().timestamp_millis().max(0) as u64;
        let id = ReadingId::next(logs.last_id, now_ms);
        let reading = Reading {
            id,
            channel,
            value,
            recorded_at: id.created_at(),
        };

        // Journal first so a failed write leaves memory untouched
        self.append(&JournalEntry::Reading(reading.clone())).await?;

        logs.last_id = Some(id);
        logs.readings
            .entry(channel)
            .or_default()
            .push(reading.clone());

        tracing::debug!("Stored {} reading {} = {}", channel, id, value);
        Ok(reading)
    }

    async fn insert_median(&self, record: MedianRecord) -> Result<()> {
        let mut logs = self.logs.write().await;
        self.append(&JournalEntry::Median(record.clone())).await?;
        logs.medians.push(record);
        Ok(())
    }

    async fn append(&self, entry: &JournalEntry) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = journal.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::StoreUnavailable(format!("Journal write failed: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| BridgeError::StoreUnavailable(format!("Journal flush failed: {}", e)))?;
        Ok(())
    }
}

impl Logs {
    fn count(&self, channel: Channel) -> usize {
        self.readings.get(&channel).map(Vec::len).unwrap_or(0)
    }

    fn replay(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Reading(reading) => {
                if self.last_id.is_none_or(|last| reading.id > last) {
                    self.last_id = Some(reading.id);
                }
                self.readings
                    .entry(reading.channel)
                    .or_default()
                    .push(reading);
            }
            JournalEntry::Median(record) => self.medians.push(record),
        }
    }
}

#[async_trait]
impl ReadingStore for LocalStore {
    async fn insert(&self, channel: Channel, value: f64) -> Result<Reading> {
        let clock = Arc::clone(&self.clock);
        self.commit(move |shared| async move { shared.insert(channel, value, clock).await })
            .await
    }

    async fn latest(&self, channel: Channel, n: usize) -> Result<Vec<Reading>> {
        let logs = self.shared.logs.read().await;
        Ok(logs
            .readings
            .get(&channel)
            .map(|readings| readings.iter().rev().take(n).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_median(&self, record: MedianRecord) -> Result<()> {
        self.commit(move |shared| async move { shared.insert_median(record).await })
            .await
    }

    async fn latest_medians(&self, n: usize) -> Result<Vec<MedianRecord>> {
        let logs = self.shared.logs.read().await;
        Ok(logs.medians.iter().rev().take(n).cloned().collect())
    }
}

/// Timeout and retry settings for store calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Run `op` under the timeout, retrying retryable failures with doubling backoff
    ///
    /// A timed out attempt counts as `StoreUnavailable` and is retried.
    pub async fn run<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_attempts(what, true, op).await
    }

    /// Like [`RetryPolicy::run`] for writes that are not idempotent
    ///
    /// A timed out write may still commit, so it fails with `StoreUnavailable`
    /// without another attempt. Errors the store reports are retried as usual.
    pub async fn run_write<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_attempts(what, false, op).await
    }

    async fn run_attempts<T, F, Fut>(
        &self,
        what: &str,
        retry_timeouts: bool,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.backoff;
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) if retry_timeouts => Err(BridgeError::StoreUnavailable(format!(
                    "{} timed out after {:?}",
                    what, self.timeout
                ))),
                Err(_) => {
                    return Err(BridgeError::StoreUnavailable(format!(
                        "{} timed out after {:?}, outcome unknown",
                        what, self.timeout
                    )));
                }
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        what,
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
