/// Quote persistence - in-memory index (memory) + JSONL (disk)
///
/// Every token owns one partition. The partition keeps all of its quotes in
/// a `BTreeMap` keyed by unix second, which gives ordered range reads and
/// the (token, timestamp) uniqueness the pipeline relies on. When a data
/// directory is configured each partition is mirrored to
/// `<data_dir>/<token>.jsonl` and reloaded on startup.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::types::{Quote, Token};

/// Storage contract used by the pipeline and dedup filter
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Persist quotes, skipping timestamps already stored. Returns the number written.
    async fn save_batch(&self, token: Token, quotes: &[Quote]) -> Result<usize>;

    /// Latest stored timestamp, `None` for an empty partition
    async fn last_timestamp(&self, token: Token) -> Result<Option<DateTime<Utc>>>;

    /// Quotes with `from <= timestamp <= to`, ascending, optionally capped
    async fn quotes_in_range(
        &self,
        token: Token,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Quote>>;

    async fn last_quote(&self, token: Token) -> Result<Option<Quote>>;

    async fn count(&self, token: Token) -> Result<usize>;
}

struct Partition {
    rows: BTreeMap<i64, Quote>,
    file: Option<PathBuf>,
}

impl Partition {
    fn empty(file: Option<PathBuf>) -> Self {
        Partition {
            rows: BTreeMap::new(),
            file,
        }
    }
}

/// Hybrid quote storage: ordered memory index backed by append-only JSONL files
pub struct HybridQuoteStore {
    partitions: HashMap<Token, RwLock<Partition>>,
}

impl HybridQuoteStore {
    /// Open (or create) the on-disk partitions under `data_dir` and load their history
    pub async fn open(data_dir: impl AsRef<Path>, tokens: &[Token]) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
            IngestError::PersistenceError(format!(
                "Cannot create data directory {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        let mut partitions = HashMap::with_capacity(tokens.len());
        for token in tokens {
            let file = data_dir.join(format!("{}.jsonl", token.as_str()));
            let rows = load_partition(&file).await?;
            info!(
                "📂 Loaded {} stored quotes for {} from {}",
                rows.len(),
                token,
                file.display()
            );
            partitions.insert(
                *token,
                RwLock::new(Partition {
                    rows,
                    file: Some(file),
                }),
            );
        }

        Ok(HybridQuoteStore { partitions })
    }

    /// Memory-only store, nothing survives the process
    pub fn in_memory(tokens: &[Token]) -> Self {
        let partitions = tokens
            .iter()
            .map(|token| (*token, RwLock::new(Partition::empty(None))))
            .collect();
        HybridQuoteStore { partitions }
    }

    fn partition(&self, token: Token) -> Result<&RwLock<Partition>> {
        self.partitions
            .get(&token)
            .ok_or_else(|| IngestError::UnsupportedToken(token.to_string()))
    }
}

#[async_trait]
impl QuoteStore for HybridQuoteStore {
    async fn save_batch(&self, token: Token, quotes: &[Quote]) -> Result<usize> {
        let mut partition = self.partition(token)?.write().await;

        let mut fresh: Vec<&Quote> = Vec::with_capacity(quotes.len());
        let mut batch_seconds = HashSet::with_capacity(quotes.len());
        for quote in quotes {
            let second = quote.unix_seconds();
            if !partition.rows.contains_key(&second) && batch_seconds.insert(second) {
                fresh.push(quote);
            }
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        if let Some(file) = &partition.file {
            append_lines(file, &fresh).await?;
        }

        for quote in &fresh {
            partition.rows.insert(quote.unix_seconds(), (*quote).clone());
        }

        debug!(
            "Saved {} quotes for {} ({} skipped as existing), total: {}",
            fresh.len(),
            token,
            quotes.len() - fresh.len(),
            partition.rows.len()
        );

        Ok(fresh.len())
    }

    async fn last_timestamp(&self, token: Token) -> Result<Option<DateTime<Utc>>> {
        let partition = self.partition(token)?.read().await;
        Ok(partition.rows.values().next_back().map(Quote::timestamp))
    }

    async fn quotes_in_range(
        &self,
        token: Token,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Quote>> {
        let (from, to) = (from.timestamp(), to.timestamp());
        if from > to {
            return Ok(Vec::new());
        }

        let partition = self.partition(token)?.read().await;
        let rows = partition.rows.range(from..=to).map(|(_, quote)| quote.clone());

        Ok(match limit {
            Some(n) => rows.take(n).collect(),
            None => rows.collect(),
        })
    }

    async fn last_quote(&self, token: Token) -> Result<Option<Quote>> {
        let partition = self.partition(token)?.read().await;
        Ok(partition.rows.values().next_back().cloned())
    }

    async fn count(&self, token: Token) -> Result<usize> {
        Ok(self.partition(token)?.read().await.rows.len())
    }
}

/// Read a JSONL partition; unreadable lines are skipped and the first copy of a second wins
async fn load_partition(file: &Path) -> Result<BTreeMap<i64, Quote>> {
    let mut rows = BTreeMap::new();
    if !file.exists() {
        debug!("No existing quote file at {}", file.display());
        return Ok(rows);
    }

    let handle = File::open(file).await.map_err(|e| {
        IngestError::PersistenceError(format!("Cannot open {}: {}", file.display(), e))
    })?;
    let mut lines = BufReader::new(handle).lines();
    let mut line_no = 0usize;
    let mut skipped = 0usize;

    while let Some(line) = lines.next_line().await.map_err(|e| {
        IngestError::PersistenceError(format!("Cannot read {}: {}", file.display(), e))
    })? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Quote>(&line) {
            Ok(quote) => {
                rows.entry(quote.unix_seconds()).or_insert(quote);
            }
            Err(e) => {
                skipped += 1;
                warn!("Skipping malformed quote at {}:{}: {}", file.display(), line_no, e);
            }
        }
    }

    if skipped > 0 {
        warn!("⚠️  {} malformed lines ignored in {}", skipped, file.display());
    }

    Ok(rows)
}

/// Append quotes as JSON lines in one write and flush them to disk.
///
/// A failed write is truncated back to the previous length. A torn tail left
/// by an earlier crash is closed with a newline before the batch.
async fn append_lines(file: &Path, quotes: &[&Quote]) -> Result<()> {
    let mut payload = String::new();
    for quote in quotes {
        payload.push_str(&serde_json::to_string(quote)?);
        payload.push('\n');
    }

    let write = async {
        let mut handle = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(file)
            .await?;

        let len = handle.metadata().await?.len();
        if len > 0 && !ends_with_newline(&mut handle, len).await? {
            warn!("Closing torn line at the end of {}", file.display());
            payload.insert(0, '\n');
        }

        let written = async {
            handle.write_all(payload.as_bytes()).await?;
            handle.sync_all().await
        }
        .await;

        if let Err(e) = written {
            if let Err(trim) = handle.set_len(len).await {
                warn!("Could not roll back partial write to {}: {}", file.display(), trim);
            }
            return Err(e);
        }
        Ok(())
    };

    write.await.map_err(|e: std::io::Error| {
        IngestError::PersistenceError(format!("Cannot write {}: {}", file.display(), e))
    })
}

async fn ends_with_newline(handle: &mut File, len: u64) -> std::io::Result<bool> {
    let mut last = [0u8; 1];
    handle.seek(SeekFrom::Start(len - 1)).await?;
    handle.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}
