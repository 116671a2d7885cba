/*
    store.rs - Append-only, hash-chained ledger file

    One JSON block per line. The writer half (open file handle, cached tail,
    committed byte length) sits behind a single mutex, and append holds that
    mutex across read-tail, hash, write, fsync and tail update. Readers open
    their own handle and stop at the committed length captured when they
    start, so they never observe a half-written line.

    Recovery:
    - empty file          -> write the genesis block
    - last record parses  -> resume from its (index, hash)
    - anything else       -> CorruptTail, the caller must refuse to start
*/

use crate::ledger::block::{
    encode_base64, Block, MessageRecord, Payload, Tail, GENESIS_PREVIOUS_HASH,
};
use crate::ledger::errors::{StoreError, StoreResult};
use crate::metrics::{LEDGER_APPENDS, LEDGER_APPEND_DURATION_MS};
use metrics::{counter, histogram};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Seconds since the unix epoch
fn now_unix() -> StoreResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .map_err(|e| StoreError::Clock(e.to_string()))
}

/// Writer state guarded by the append mutex
struct LedgerWriter {
    file: File,
    tail: Tail,
    committed_len: u64,
}

impl LedgerWriter {
    /// Single write of a complete line, flushed and synced
    fn persist(&mut self, line: &[u8]) -> io::Result<()> {
        self.file.write_all(line)?;
        self.file.flush()?;
        self.file.sync_data()
    }
}

/// Result of a full chain verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of blocks, genesis included
    pub blocks: u64,
    /// Last verified block
    pub tail: Tail,
}

/// Durable hash-chained ledger
pub struct LedgerStore {
    path: PathBuf,
    writer: Mutex<LedgerWriter>,
}

impl LedgerStore {
    /// Open the ledger at `path`, bootstrapping a genesis block on empty storage
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        let (tail, committed_len) = if len == 0 {
            let genesis = Block::genesis(now_unix()?)?;
            let line = genesis.to_line()?;
            file.write_all(line.as_bytes())?;
            file.sync_data()?;
            info!(path = %path.display(), hash = %genesis.hash, "Created genesis block");
            (genesis.tail(), line.len() as u64)
        } else {
            let block = recover_tail(&mut file)?;
            let mut committed_len = len;
            if !ends_with_newline(&mut file, len)? {
                // Complete record without its terminator: finish the line
                warn!(
                    index = block.index,
                    "Ledger tail missing newline, repairing"
                );
                file.write_all(b"\n")?;
                file.sync_data()?;
                committed_len += 1;
            }
            info!(
                path = %path.display(),
                index = block.index,
                hash = %block.hash,
                "Recovered ledger tail"
            );
            (block.tail(), committed_len)
        };

        Ok(LedgerStore {
            path,
            writer: Mutex::new(LedgerWriter {
                file,
                tail,
                committed_len,
            }),
        })
    }

    fn lock_writer(&self) -> StoreResult<MutexGuard<'_, LedgerWriter>> {
        self.writer.lock().map_err(|_| StoreError::Poisoned("ledger writer"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current `(index, hash)` of the last committed block
    pub fn tail(&self) -> StoreResult<Tail> {
        Ok(self.lock_writer()?.tail.clone())
    }

    /// Append a message block and return the new tail
    ///
    /// The block is on disk (written and synced) before this returns. At most
    /// one append is in flight at a time.
    pub fn append(&self, record: MessageRecord) -> StoreResult<Tail> {
        let started = Instant::now();
        let mut writer = self.lock_writer()?;

        let block = Block::next(&writer.tail, now_unix()?, record)?;
        let line = block.to_line()?;

        if let Err(err) = writer.persist(line.as_bytes()) {
            // Drop any partial line so later appends start on a clean boundary
            let committed_len = writer.committed_len;
            if let Err(truncate_err) = writer.file.set_len(committed_len) {
                error!(error = %truncate_err, "Failed to roll back partial ledger write");
            }
            return Err(err.into());
        }

        writer.committed_len += line.len() as u64;
        writer.tail = block.tail();
        drop(writer);

        counter!(LEDGER_APPENDS).increment(1);
        histogram!(LEDGER_APPEND_DURATION_MS)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(index = block.index, hash = %block.hash, "Appended block");

        Ok(block.tail())
    }

    /// Every committed block, genesis included, in ledger order
    pub fn blocks(&self) -> StoreResult<BlockReader> {
        let committed_len = self.lock_writer()?.committed_len;
        let file = File::open(&self.path)?;
        Ok(BlockReader::new(file.take(committed_len)))
    }

    /// Lazy scan over message blocks whose payload satisfies `predicate`
    ///
    /// Genesis is skipped. Each call starts again from the first block.
    pub fn scan<P>(&self, predicate: P) -> StoreResult<LedgerScan<P>>
    where
        P: FnMut(&MessageRecord) -> bool,
    {
        Ok(LedgerScan {
            blocks: self.blocks()?,
            predicate,
        })
    }

    /// All records addressed to `public_key`, in ledger order
    pub fn messages_for(&self, public_key: &[u8]) -> StoreResult<Vec<MessageRecord>> {
        let key = encode_base64(public_key);
        self.scan(|record| record.is_addressed_to(&key))?
            .filter_map(|block| match block {
                Ok(block) => block.data.into_message().map(Ok),
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    /// Re-verify every link and digest, and check the result against the cached tail
    pub fn verify_chain(&self) -> StoreResult<ChainReport> {
        let report = verify_blocks(self.blocks()?)?;
        let tail = self.tail()?;
        if report.tail != tail {
            return Err(StoreError::ChainBroken {
                index: report.tail.index,
                reason: format!("last block does not match cached tail {}", tail.index),
            });
        }
        Ok(report)
    }
}

/// Parse and check the last non-blank record of a non-empty ledger file
fn recover_tail(file: &mut File) -> StoreResult<Block> {
    file.seek(SeekFrom::Start(0))?;
    let mut last = None;
    for raw in BufReader::new(&*file).split(b'\n') {
        let raw = raw?;
        if !is_blank(&raw) {
            last = Some(raw);
        }
    }

    let raw = last.ok_or_else(|| corrupt_tail("ledger holds no records"))?;
    let text = std::str::from_utf8(&raw)
        .map_err(|e| corrupt_tail(format!("last record is not UTF-8: {}", e)))?;
    let block = Block::from_line(text)
        .map_err(|e| corrupt_tail(format!("cannot parse last record: {}", e)))?;

    if !block.verify_hash()? {
        return Err(corrupt_tail(format!(
            "stored hash of block {} does not match its contents",
            block.index
        )));
    }
    match (&block.data, block.index) {
        (Payload::Genesis(_), index) if index > 0 => {
            return Err(corrupt_tail(format!(
                "block {} carries the genesis marker",
                index
            )));
        }
        (Payload::Message(_), 0) => {
            return Err(corrupt_tail(
                "block 0 carries a message instead of the genesis marker",
            ));
        }
        _ => {}
    }
    Ok(block)
}

fn corrupt_tail(reason: impl Into<String>) -> StoreError {
    StoreError::CorruptTail(reason.into())
}

fn ends_with_newline(file: &mut File, len: u64) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn is_blank(raw: &[u8]) -> bool {
    raw.iter().all(u8::is_ascii_whitespace)
}

/// Check shape, links and digests of a block sequence
pub fn verify_blocks(
    blocks: impl IntoIterator<Item = StoreResult<Block>>,
) -> StoreResult<ChainReport> {
    let mut previous: Option<Block> = None;
    let mut count = 0u64;

    for block in blocks {
        let block = block?;
        let broken = |reason: &str| StoreError::ChainBroken {
            index: block.index,
            reason: reason.to_string(),
        };

        match &previous {
            None => {
                if block.index != 0
                    || block.previous_hash != GENESIS_PREVIOUS_HASH
                    || !matches!(block.data, Payload::Genesis(_))
                {
                    return Err(broken("first block is not a genesis block"));
                }
            }
            Some(prev) => {
                if block.index != prev.index + 1 {
                    return Err(broken("index does not follow the previous block"));
                }
                if block.previous_hash != prev.hash {
                    return Err(broken("previous_hash does not match the previous block"));
                }
                if matches!(block.data, Payload::Genesis(_)) {
                    return Err(broken("genesis marker after block 0"));
                }
            }
        }
        if !block.verify_hash()? {
            return Err(broken("stored hash does not match the block digest"));
        }

        count += 1;
        previous = Some(block);
    }

    let last = previous.ok_or_else(|| StoreError::ChainBroken {
        index: 0,
        reason: "ledger is empty".to_string(),
    })?;
    Ok(ChainReport {
        blocks: count,
        tail: last.tail(),
    })
}

/// Forward reader over committed ledger lines
pub struct BlockReader {
    lines: io::Split<BufReader<Take<File>>>,
    line: usize,
}

impl BlockReader {
    fn new(source: Take<File>) -> Self {
        BlockReader {
            lines: BufReader::new(source).split(b'\n'),
            line: 0,
        }
    }
}

impl Iterator for BlockReader {
    type Item = StoreResult<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            if is_blank(&raw) {
                continue;
            }

            let parsed = std::str::from_utf8(&raw)
                .map_err(|e| e.to_string())
                .and_then(|text| Block::from_line(text).map_err(|e| e.to_string()));
            return Some(parsed.map_err(|reason| StoreError::CorruptRecord {
                line: self.line,
                reason,
            }));
        }
    }
}

/// Recipient-filtered scan returned by [`LedgerStore::scan`]
pub struct LedgerScan<P> {
    blocks: BlockReader,
    predicate: P,
}

impl<P> Iterator for LedgerScan<P>
where
    P: FnMut(&MessageRecord) -> bool,
{
    type Item = StoreResult<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let block = match self.blocks.next()? {
                Ok(block) => block,
                Err(e) => return Some(Err(e)),
            };
            if block.is_genesis() {
                continue;
            }
            if let Some(record) = block.data.as_message() {
                if (self.predicate)(record) {
                    return Some(Ok(block));
                }
            }
        }
    }
}
