//! In-process backend
//!
//! Holds output logs, snapshots and id tables in memory, broadcasts log
//! changes to subscribers and records every call it receives. Failures can
//! be injected per operation. Clones share state.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{
    Backend, BackendError, CacheSnapshot, FileData, FileEvent, MetaPatch, ORef, Result,
    TERM_FILE_NAME,
};
use crate::core::term::TermSize;

/// Operations that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchFile,
    FetchCache,
    SaveCache,
    SendInput,
    Resync,
    ResolveIds,
    UpdateMeta,
}

#[derive(Default)]
struct Inner {
    logs: HashMap<String, Vec<u8>>,
    subscribers: HashMap<String, Vec<Sender<FileEvent>>>,
    caches: HashMap<(String, String), CacheSnapshot>,
    ids: HashMap<String, ORef>,
    failing: HashSet<Operation>,

    fetch_offsets: Vec<(String, u64)>,
    inputs: Vec<(String, Vec<u8>)>,
    size_notifications: Vec<(String, TermSize)>,
    resyncs: Vec<(String, TermSize)>,
    meta_updates: Vec<(ORef, MetaPatch)>,
    save_attempts: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to a session's output log and notify subscribers
    pub fn append(&self, session: &str, data: &[u8]) {
        let mut inner = self.lock();
        let log = inner.logs.entry(session.to_string()).or_default();
        let offset = log.len() as u64;
        log.extend_from_slice(data);
        inner.broadcast(session, FileEvent::append(offset, data));
    }

    /// Append to the log without notifying anyone
    pub fn append_silently(&self, session: &str, data: &[u8]) {
        self.lock()
            .logs
            .entry(session.to_string())
            .or_default()
            .extend_from_slice(data);
    }

    /// Reset a session's output log; offsets restart at zero
    pub fn truncate(&self, session: &str) {
        let mut inner = self.lock();
        inner.logs.insert(session.to_string(), Vec::new());
        inner.broadcast(session, FileEvent::truncate(0));
    }

    pub fn set_cache(&self, session: &str, kind: &str, snapshot: CacheSnapshot) {
        self.lock()
            .caches
            .insert((session.to_string(), kind.to_string()), snapshot);
    }

    pub fn cache(&self, session: &str, kind: &str) -> Option<CacheSnapshot> {
        self.lock()
            .caches
            .get(&(session.to_string(), kind.to_string()))
            .cloned()
    }

    pub fn register_id(&self, opaque_id: &str, oref: ORef) {
        self.lock().ids.insert(opaque_id.to_string(), oref);
    }

    pub fn fail(&self, op: Operation) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self, op: Operation) {
        self.lock().failing.remove(&op);
    }

    pub fn log(&self, session: &str) -> Vec<u8> {
        self.lock().logs.get(session).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self, session: &str) -> usize {
        self.lock().subscribers.get(session).map_or(0, Vec::len)
    }

    pub fn fetch_offsets(&self) -> Vec<(String, u64)> {
        self.lock().fetch_offsets.clone()
    }

    /// Everything sent to the shell for a session, concatenated
    pub fn sent_input(&self, session: &str) -> Vec<u8> {
        self.lock()
            .inputs
            .iter()
            .filter(|(s, _)| s == session)
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }

    pub fn input_calls(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().inputs.clone()
    }

    pub fn size_notifications(&self) -> Vec<(String, TermSize)> {
        self.lock().size_notifications.clone()
    }

    pub fn resyncs(&self) -> Vec<(String, TermSize)> {
        self.lock().resyncs.clone()
    }

    pub fn meta_updates(&self) -> Vec<(ORef, MetaPatch)> {
        self.lock().meta_updates.clone()
    }

    pub fn save_attempts(&self) -> usize {
        self.lock().save_attempts
    }
}

impl Inner {
    fn broadcast(&mut self, session: &str, event: FileEvent) {
        if let Some(subscribers) = self.subscribers.get_mut(session) {
            // A failed send means the receiver was dropped
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn check(&self, op: Operation) -> Result<()> {
        if self.failing.contains(&op) {
            return Err(BackendError::Io(format!("injected failure: {:?}", op)));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn fetch_file(&self, session: &str, name: &str, offset: u64) -> Result<Option<FileData>> {
        let mut inner = self.lock();
        inner.fetch_offsets.push((session.to_string(), offset));
        inner.check(Operation::FetchFile)?;
        if name != TERM_FILE_NAME {
            return Err(BackendError::NotFound(name.to_string()));
        }
        Ok(inner.logs.get(session).map(|log| {
            let start = (offset as usize).min(log.len());
            FileData {
                data: log[start..].to_vec(),
                offset: start as u64,
            }
        }))
    }

    fn subscribe(&self, session: &str) -> Receiver<FileEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock()
            .subscribers
            .entry(session.to_string())
            .or_default()
            .push(tx);
        rx
    }

    fn fetch_cache(&self, session: &str, kind: &str) -> Result<Option<CacheSnapshot>> {
        let inner = self.lock();
        inner.check(Operation::FetchCache)?;
        Ok(inner
            .caches
            .get(&(session.to_string(), kind.to_string()))
            .cloned())
    }

    fn save_cache(&self, session: &str, kind: &str, snapshot: CacheSnapshot) -> Result<()> {
        let mut inner = self.lock();
        inner.save_attempts += 1;
        inner.check(Operation::SaveCache)?;
        debug!(session, kind, bytes = snapshot.data.len(), "memory backend stored snapshot");
        inner
            .caches
            .insert((session.to_string(), kind.to_string()), snapshot);
        Ok(())
    }

    fn send_input(&self, session: &str, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        inner.check(Operation::SendInput)?;
        inner.inputs.push((session.to_string(), data.to_vec()));
        Ok(())
    }

    fn set_term_size(&self, session: &str, size: TermSize) {
        self.lock()
            .size_notifications
            .push((session.to_string(), size));
    }

    fn resync_controller(&self, session: &str, size: TermSize) -> Result<()> {
        let mut inner = self.lock();
        inner.check(Operation::Resync)?;
        inner.resyncs.push((session.to_string(), size));
        Ok(())
    }

    fn resolve_ids(&self, _session: &str, ids: &[String]) -> Result<HashMap<String, ORef>> {
        let inner = self.lock();
        inner.check(Operation::ResolveIds)?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.ids.get(id).map(|oref| (id.clone(), oref.clone())))
            .collect())
    }

    fn update_object_meta(&self, oref: &ORef, patch: &MetaPatch) -> Result<()> {
        let mut inner = self.lock();
        inner.check(Operation::UpdateMeta)?;
        inner.meta_updates.push((oref.clone(), patch.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_notifies_subscribers_in_order() {
        let backend = MemoryBackend::new();
        let rx = backend.subscribe("s1");

        backend.append("s1", b"ab");
        backend.append("s1", b"cd");
        backend.truncate("s1");

        assert_eq!(rx.try_recv().unwrap(), FileEvent::append(0, b"ab".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), FileEvent::append(2, b"cd".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), FileEvent::truncate(0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let backend = MemoryBackend::new();
        let rx = backend.subscribe("s1");
        assert_eq!(backend.subscriber_count("s1"), 1);

        drop(rx);
        backend.append("s1", b"x");
        assert_eq!(backend.subscriber_count("s1"), 0);
    }

    #[test]
    fn test_fetch_from_offset() {
        let backend = MemoryBackend::new();
        backend.append_silently("s1", b"hello world");

        let data = backend.fetch_file("s1", TERM_FILE_NAME, 6).unwrap().unwrap();
        assert_eq!(data.data, b"world");
        assert_eq!(data.offset, 6);
        assert_eq!(backend.fetch_file("s2", TERM_FILE_NAME, 0).unwrap(), None);
    }

    #[test]
    fn test_injected_failure() {
        let backend = MemoryBackend::new();
        backend.fail(Operation::SendInput);
        assert!(backend.send_input("s1", b"x").is_err());

        backend.recover(Operation::SendInput);
        assert!(backend.send_input("s1", b"x").is_ok());
        assert_eq!(backend.sent_input("s1"), b"x");
    }
}
