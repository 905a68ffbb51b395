//! Block processor (C3): bounded-concurrency compress-and-dedupe engine.
//!
//! A fixed pool of worker threads shares a `todo`/`done` pair behind one
//! mutex and two condition variables, exactly as described for the
//! concurrency core: workers never touch the output file, only the drain
//! step (run on the submitter's thread, between/after `submit` calls) does.
//! Byte offsets in the image therefore follow submission order exactly,
//! regardless of which worker finished which block first.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{trace, warn};
use xxhash_rust::xxh64::xxh64;

use crate::error::MkfsError;
use crate::filesystem::writer::FilesystemCompressor;

/// A block is either ordinary file data or a fragment-packer block; both are
/// compressed identically, but fragments are deduplicated in a separate
/// namespace from full data blocks (a data block and a fragment block that
/// happen to hash equal are not the same kind of thing on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Data,
    Fragment,
}

/// What the submitter learns once a block has been emitted (or deduplicated
/// against an earlier one): whether the bytes are stored compressed, and
/// where in the data area they ended up.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EmittedBlock {
    pub offset: u64,
    pub len: u32,
    pub compressed: bool,
    /// true if this offset was already occupied by an earlier block with
    /// identical (kind, len, compressed, hash) and no bytes were written
    pub deduped: bool,
}

/// A block of all zeroes never reaches the codec; it is represented as a
/// zero-size entry and contributes nothing to the data area.
pub(crate) const SPARSE: EmittedBlock = EmittedBlock { offset: 0, len: 0, compressed: false, deduped: false };

enum WorkItem {
    Compress { seq: u64, kind: BlockKind, bytes: Vec<u8> },
}

struct Completed {
    kind: BlockKind,
    original_len: u32,
    compressed: bool,
    bytes: Vec<u8>,
}

struct Shared {
    mutex: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    done_ready: Condvar,
}

struct State {
    todo: VecDeque<WorkItem>,
    done: BTreeMap<u64, Completed>,
    next_seq: u64,
    next_emit: u64,
    backlog: usize,
    error: Option<String>,
    shutdown: bool,
}

/// Content-addressed dedup index: `(kind, original_len, compressed, hash) -> offset`.
type DedupKey = (BlockKind, u32, bool, u64);

/// Bounded-concurrency compress-and-dedupe engine (C3).
///
/// Workers run on their own threads; the drain (dedup lookup + append to the
/// output byte stream) runs inline on whichever thread calls [`Self::submit`]
/// or [`Self::finish`], so the engine never needs the output writer to be
/// `Send`.
pub(crate) struct BlockProcessor {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    dedup: std::collections::HashMap<DedupKey, u64>,
    data_start: u64,
}

impl BlockProcessor {
    pub fn new(
        num_workers: usize,
        backlog: usize,
        compressor: FilesystemCompressor,
        block_size: u32,
        data_start: u64,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let shared = Arc::new(Shared {
            mutex: Mutex::new(State {
                todo: VecDeque::new(),
                done: BTreeMap::new(),
                next_seq: 0,
                next_emit: 0,
                backlog: backlog.max(1),
                error: None,
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            done_ready: Condvar::new(),
        });

        let workers = (0..num_workers)
            .map(|id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("mkfs-block-{id}"))
                    .spawn(move || worker_loop(shared, compressor, block_size))
                    .expect("failed to spawn block processor worker")
            })
            .collect();

        Self { shared, workers, dedup: std::collections::HashMap::new(), data_start }
    }

    /// Submit a block of at most `block_size` bytes. Blocks the caller if the
    /// backlog (`todo.len() + done.len()`) is already at capacity.
    pub fn submit<W: std::io::Write>(
        &mut self,
        bytes: Vec<u8>,
        kind: BlockKind,
        out: &mut W,
    ) -> Result<EmittedBlock, MkfsError> {
        let seq = {
            let mut state = self.shared.mutex.lock().unwrap();
            if let Some(e) = &state.error {
                return Err(MkfsError::ConfigInvalid(e.clone()));
            }
            while state.todo.len() + state.done.len() >= state.backlog {
                state = self.shared.not_full.wait(state).unwrap();
                if let Some(e) = &state.error {
                    return Err(MkfsError::ConfigInvalid(e.clone()));
                }
            }

            let seq = state.next_seq;
            state.next_seq += 1;

            if is_all_zero(&bytes) {
                state.done.insert(
                    seq,
                    Completed { kind, original_len: bytes.len() as u32, compressed: false, bytes: Vec::new() },
                );
                self.shared.done_ready.notify_all();
            } else {
                state.todo.push_back(WorkItem::Compress { seq, kind, bytes });
                self.shared.not_empty.notify_one();
            }
            seq
        };
        trace!(seq, "submitted block");

        self.drain(out)
    }

    /// Drain every block that has become ready in submission order,
    /// returning the [`EmittedBlock`] for the one just submitted (the caller
    /// always waits for at least its own block before returning).
    fn drain<W: std::io::Write>(&mut self, out: &mut W) -> Result<EmittedBlock, MkfsError> {
        let my_seq = {
            let state = self.shared.mutex.lock().unwrap();
            state.next_seq - 1
        };
        let mut result = None;

        loop {
            let (completed, seq_emitted) = {
                let mut state = self.shared.mutex.lock().unwrap();
                loop {
                    if let Some(e) = &state.error {
                        return Err(MkfsError::ConfigInvalid(e.clone()));
                    }
                    if let Some(c) = state.done.remove(&state.next_emit) {
                        let seq_emitted = state.next_emit;
                        state.next_emit += 1;
                        self.shared.not_full.notify_all();
                        break (Some(c), seq_emitted);
                    }
                    if state.next_emit > my_seq {
                        break (None, 0);
                    }
                    state = self.shared.done_ready.wait(state).unwrap();
                }
            };

            let Some(completed) = completed else { break };

            let emitted = self.emit(completed, out)?;
            if seq_emitted == my_seq {
                result = Some(emitted);
            }
            if seq_emitted >= my_seq {
                break;
            }
        }

        Ok(result.unwrap_or(SPARSE))
    }

    fn emit<W: std::io::Write>(
        &mut self,
        completed: Completed,
        out: &mut W,
    ) -> Result<EmittedBlock, MkfsError> {
        if completed.bytes.is_empty() && completed.original_len > 0 {
            // sparse: all-zero block, never touched the codec, zero bytes on disk
            return Ok(EmittedBlock { offset: 0, len: 0, compressed: false, deduped: false });
        }

        let hash = xxh64(&completed.bytes, 0);
        let key = (completed.kind, completed.bytes.len() as u32, completed.compressed, hash);

        if let Some(&offset) = self.dedup.get(&key) {
            trace!(offset, "deduplicated block");
            return Ok(EmittedBlock {
                offset,
                len: completed.bytes.len() as u32,
                compressed: completed.compressed,
                deduped: true,
            });
        }

        let offset = self.data_start;
        out.write_all(&completed.bytes)?;
        self.data_start += completed.bytes.len() as u64;
        self.dedup.insert(key, offset);

        Ok(EmittedBlock {
            offset,
            len: completed.bytes.len() as u32,
            compressed: completed.compressed,
            deduped: false,
        })
    }

    /// Join every worker after draining all remaining completions. Must be
    /// called exactly once, after the last `submit`.
    pub fn finish<W: std::io::Write>(mut self, out: &mut W) -> Result<u64, MkfsError> {
        {
            let mut state = self.shared.mutex.lock().unwrap();
            state.shutdown = true;
            self.shared.not_empty.notify_all();
        }
        for w in self.workers.drain(..) {
            if w.join().is_err() {
                warn!("block processor worker panicked");
            }
        }

        // drain any stragglers left in `done` after workers exit
        loop {
            let next = {
                let mut state = self.shared.mutex.lock().unwrap();
                if let Some(e) = &state.error {
                    return Err(MkfsError::ConfigInvalid(e.clone()));
                }
                state.done.remove(&state.next_emit).map(|c| {
                    state.next_emit += 1;
                    c
                })
            };
            match next {
                Some(c) => {
                    self.emit(c, out)?;
                },
                None => break,
            }
        }

        Ok(self.data_start)
    }
}

fn is_all_zero(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.iter().all(|&b| b == 0)
}

fn worker_loop(shared: Arc<Shared>, compressor: FilesystemCompressor, block_size: u32) {
    loop {
        let item = {
            let mut state = shared.mutex.lock().unwrap();
            loop {
                if let Some(WorkItem::Compress { .. }) = state.todo.front() {
                    break;
                }
                if state.shutdown && state.todo.is_empty() {
                    return;
                }
                state = shared.not_empty.wait(state).unwrap();
            }
            state.todo.pop_front()
        };

        let Some(WorkItem::Compress { seq, kind, bytes }) = item else { continue };

        let compressed = crate::compressor::compress(&bytes, compressor, block_size);
        let (is_compressed, out_bytes) = match compressed {
            Ok(cb) if cb.len() < bytes.len() => (true, cb),
            Ok(_) => (false, bytes),
            Err(e) => {
                let mut state = shared.mutex.lock().unwrap();
                state.error.get_or_insert_with(|| e.to_string());
                shared.not_full.notify_all();
                shared.done_ready.notify_all();
                continue;
            },
        };

        let mut state = shared.mutex.lock().unwrap();
        state.done.insert(
            seq,
            Completed { kind, original_len: out_bytes.len() as u32, compressed: is_compressed, bytes: out_bytes },
        );
        shared.done_ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::Compressor;

    fn fc() -> FilesystemCompressor {
        FilesystemCompressor::new(Compressor::Xz, None).unwrap()
    }

    #[test]
    fn test_submission_order_preserved() {
        let mut out = Vec::new();
        let mut bp = BlockProcessor::new(4, 40, fc(), 0x2000, 0);
        let a = bp.submit(vec![1u8; 0x2000], BlockKind::Data, &mut out).unwrap();
        let b = bp.submit(vec![2u8; 0x2000], BlockKind::Data, &mut out).unwrap();
        assert!(a.offset < b.offset);
        bp.finish(&mut out).unwrap();
    }

    #[test]
    fn test_dedup_across_submissions() {
        let mut out = Vec::new();
        let mut bp = BlockProcessor::new(2, 40, fc(), 0x2000, 0);
        let a = bp.submit(vec![7u8; 0x2000], BlockKind::Data, &mut out).unwrap();
        let b = bp.submit(vec![7u8; 0x2000], BlockKind::Data, &mut out).unwrap();
        assert_eq!(a.offset, b.offset);
        assert!(b.deduped);
        bp.finish(&mut out).unwrap();
    }

    #[test]
    fn test_sparse_block_never_compressed() {
        let mut out = Vec::new();
        let mut bp = BlockProcessor::new(2, 40, fc(), 0x2000, 0);
        let s = bp.submit(vec![0u8; 0x2000], BlockKind::Data, &mut out).unwrap();
        assert_eq!(s.len, 0);
        bp.finish(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
