//! # WebM Header Repair
//!
//! Browsers using `MediaRecorder` with a timeslice emit the EBML/Segment
//! header only in the first blob of a recording. Later blobs are bare
//! clusters that FFmpeg cannot open on their own. This module remembers the
//! leading bytes of a session's first chunk and prepends them to later
//! headerless chunks.
//!
//! Caches are keyed by upload session. Requests without a session id use a
//! throw-away cache, so one client's header can never be glued onto another
//! client's audio.

use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// EBML element id that opens every Matroska/WebM file.
pub const EBML_MAGIC: u32 = 0x1A45_DFA3;

/// True when the chunk starts a container of its own.
pub fn has_container_header(chunk: &[u8]) -> bool {
    Cursor::new(chunk)
        .read_u32::<BigEndian>()
        .map(|id| id == EBML_MAGIC)
        .unwrap_or(false)
}

/// What `HeaderCache::repair` did to a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    /// First chunk of the session; its prefix is now cached.
    Cached,
    /// Chunk already begins with the cached header.
    Unchanged,
    /// A new container started mid-session; the cache now holds its prefix.
    Replaced,
    /// Cached header was prepended.
    Prepended,
    /// Nothing to do (empty chunk).
    Skipped,
}

/// Header bytes for a single recording session.
#[derive(Debug, Clone)]
pub struct HeaderCache {
    header: Option<Vec<u8>>,
    header_len: usize,
}

impl HeaderCache {
    pub fn new(header_len: usize) -> Self {
        Self {
            header: None,
            header_len,
        }
    }

    #[cfg(test)]
    fn header(&self) -> Option<&[u8]> {
        self.header.as_deref()
    }

    /// Return the bytes the transcoder should see for `chunk`.
    pub fn repair(&mut self, chunk: Vec<u8>) -> (Vec<u8>, RepairAction) {
        if chunk.is_empty() {
            return (chunk, RepairAction::Skipped);
        }

        let prefix_len = self.header_len.min(chunk.len());

        match self.header.as_deref() {
            None => {
                self.header = Some(chunk[..prefix_len].to_vec());
                (chunk, RepairAction::Cached)
            }
            Some(header) if chunk.starts_with(header) => (chunk, RepairAction::Unchanged),
            Some(_) if has_container_header(&chunk) => {
                self.header = Some(chunk[..prefix_len].to_vec());
                (chunk, RepairAction::Replaced)
            }
            Some(header) => {
                let mut repaired = Vec::with_capacity(header.len() + chunk.len());
                repaired.extend_from_slice(header);
                repaired.extend_from_slice(&chunk);
                (repaired, RepairAction::Prepended)
            }
        }
    }
}

struct SessionEntry {
    cache: HeaderCache,
    last_seen: Instant,
}

/// Per-session header caches with idle expiry and a size bound.
pub struct SessionHeaderStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    header_len: usize,
    ttl: Duration,
    max_sessions: usize,
}

impl SessionHeaderStore {
    pub fn new(header_len: usize, ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            header_len,
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Repair `chunk` using the cache of `session_id`, creating it if needed.
    /// Without a session id the chunk is treated as a self-contained upload.
    pub fn repair(&self, session_id: Option<&str>, chunk: Vec<u8>) -> (Vec<u8>, RepairAction) {
        let Some(session_id) = session_id else {
            return HeaderCache::new(self.header_len).repair(chunk);
        };

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);

        if !sessions.contains_key(session_id) && sessions.len() >= self.max_sessions {
            evict_oldest(&mut sessions);
        }

        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                cache: HeaderCache::new(self.header_len),
                last_seen: Instant::now(),
            });
        entry.last_seen = Instant::now();

        let (bytes, action) = entry.cache.repair(chunk);
        match action {
            RepairAction::Cached => info!(session_id, "Stored WebM header from first chunk"),
            RepairAction::Replaced => info!(session_id, "New recording detected, replaced WebM header"),
            RepairAction::Prepended => debug!(session_id, bytes = bytes.len(), "Prepended stored WebM header to chunk"),
            RepairAction::Unchanged | RepairAction::Skipped => {}
        }
        (bytes, action)
    }

    /// Drop sessions idle for longer than the TTL. Returns how many were removed.
    pub fn evict_stale(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        let ttl = self.ttl;
        sessions.retain(|_, entry| entry.last_seen.elapsed() <= ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_oldest(sessions: &mut HashMap<String, SessionEntry>) {
    let oldest = sessions
        .iter()
        .min_by_key(|(_, entry)| entry.last_seen)
        .map(|(id, _)| id.clone());
    if let Some(id) = oldest {
        sessions.remove(&id);
    }
}
