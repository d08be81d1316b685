// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Write-trap notification point.
//!
//! When the rule that granted a client its access is marked TRAPWRITE, the
//! transport asks the engine for a [`TrapWriteGuard`] before applying the
//! write. Every registered [`TrapWriteListener`] sees `before_write` at that
//! point and `after_write` when the guard is finished or dropped. The
//! engine does no audit I/O itself.
//!
//! ```text
//! if let Some(guard) = engine.trap_write(&client, 1)? {
//!     apply_put(...);          // listeners saw before_write
//! }                            // guard dropped: listeners see after_write
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Details of one trapped write.
#[derive(Debug, Clone)]
pub struct TrapWriteMessage {
    /// Monotonic per-engine sequence number
    pub serial: u64,
    pub user: String,
    pub host: String,
    /// Resource group the member is bound to
    pub group: String,
    pub level: u32,
    /// Number of elements the write carries
    pub element_count: usize,
}

/// Subscriber to trapped writes.
pub trait TrapWriteListener: Send + Sync {
    fn before_write(&self, message: &TrapWriteMessage);
    fn after_write(&self, message: &TrapWriteMessage);
}

/// Registration handle returned by `add_trap_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrapListenerId(u64);

type Listeners = Vec<(TrapListenerId, Arc<dyn TrapWriteListener>)>;

pub(crate) struct TrapRegistry {
    listeners: Mutex<Listeners>,
    next_id: AtomicU64,
    serial: AtomicU64,
}

impl TrapRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            serial: AtomicU64::new(1),
        }
    }

    pub fn add(&self, listener: Arc<dyn TrapWriteListener>) -> TrapListenerId {
        let id = TrapListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: TrapListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Notify `before_write` and hand back the guard for `after_write`.
    /// `None` when nobody listens.
    pub fn begin(&self, mut message: TrapWriteMessage) -> Option<TrapWriteGuard> {
        let listeners: Vec<Arc<dyn TrapWriteListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        if listeners.is_empty() {
            return None;
        }
        message.serial = self.serial.fetch_add(1, Ordering::Relaxed);
        for listener in &listeners {
            listener.before_write(&message);
        }
        Some(TrapWriteGuard {
            message,
            listeners,
            finished: false,
        })
    }
}

/// Pending trapped write. Listeners registered at `before_write` time are
/// the ones that see `after_write`.
pub struct TrapWriteGuard {
    message: TrapWriteMessage,
    listeners: Vec<Arc<dyn TrapWriteListener>>,
    finished: bool,
}

impl TrapWriteGuard {
    pub fn message(&self) -> &TrapWriteMessage {
        &self.message
    }

    /// Signal that the write has been applied.
    pub fn finish(mut self) {
        self.notify_after();
    }

    fn notify_after(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        for listener in &self.listeners {
            listener.after_write(&self.message);
        }
    }
}

impl Drop for TrapWriteGuard {
    fn drop(&mut self) {
        self.notify_after();
    }
}

impl fmt::Debug for TrapWriteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrapWriteGuard")
            .field("message", &self.message)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, u64)>>,
    }

    impl TrapWriteListener for Recorder {
        fn before_write(&self, m: &TrapWriteMessage) {
            self.events.lock().push(("before", m.serial));
        }
        fn after_write(&self, m: &TrapWriteMessage) {
            self.events.lock().push(("after", m.serial));
        }
    }

    fn message() -> TrapWriteMessage {
        TrapWriteMessage {
            serial: 0,
            user: "bob".into(),
            host: "h1".into(),
            group: "RF".into(),
            level: 1,
            element_count: 1,
        }
    }

    #[test]
    fn test_no_listener_no_guard() {
        let reg = TrapRegistry::new();
        assert!(reg.begin(message()).is_none());
    }

    #[test]
    fn test_before_then_after_once() {
        let reg = TrapRegistry::new();
        let rec = Arc::new(Recorder::default());
        reg.add(rec.clone());

        let guard = reg.begin(message()).unwrap();
        assert_eq!(rec.events.lock().len(), 1);
        let serial = guard.message().serial;
        guard.finish();
        assert_eq!(
            *rec.events.lock(),
            vec![("before", serial), ("after", serial)]
        );
    }

    #[test]
    fn test_drop_notifies_after() {
        let reg = TrapRegistry::new();
        let rec = Arc::new(Recorder::default());
        reg.add(rec.clone());
        {
            let _guard = reg.begin(message());
        }
        assert_eq!(rec.events.lock().len(), 2);
    }

    #[test]
    fn test_remove_listener() {
        let reg = TrapRegistry::new();
        let id = reg.add(Arc::new(Recorder::default()));
        assert!(reg.remove(id));
        assert!(!reg.remove(id));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_serials_increase() {
        let reg = TrapRegistry::new();
        reg.add(Arc::new(Recorder::default()));
        let a = reg.begin(message()).unwrap().message().serial;
        let b = reg.begin(message()).unwrap().message().serial;
        assert!(b > a);
    }
}
