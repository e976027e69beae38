use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Identifies one envelope within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvelopeId(u64);

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an envelope is in its life.
///
/// `Acknowledged` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    /// Sitting in the relay queue.
    Fetched,
    /// Handed to the application, awaiting disposition.
    Delivered,
    /// The application acknowledged it; a delete was requested.
    Acknowledged,
    /// Never acknowledged; the visibility timeout will re-surface it.
    Abandoned,
}

impl EnvelopeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EnvelopeState::Acknowledged | EnvelopeState::Abandoned)
    }
}

/// Counters kept per pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub fetched: u64,
    pub delivered: u64,
    pub acknowledged: u64,
    pub abandoned: u64,
}

/// Answer to an acknowledgment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AckDecision {
    /// First acknowledgment of a delivered envelope; the caller must delete it.
    Delete,
    AlreadyAcknowledged,
    Abandoned,
}

/// Arena of envelope states for one pipeline.
///
/// Entries live while the envelope is buffered or while its acknowledgment
/// handle exists, so the map never grows beyond the in-flight set.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    states: HashMap<EnvelopeId, EnvelopeState>,
    stats: PipelineStats,
}

impl Inner {
    fn mark_abandoned(&mut self, id: EnvelopeId) -> bool {
        match self.states.get_mut(&id) {
            Some(state) if !state.is_terminal() => {
                *state = EnvelopeState::Abandoned;
                self.stats.abandoned += 1;
                true
            }
            _ => false,
        }
    }
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a freshly fetched envelope.
    pub(crate) fn register(&self) -> EnvelopeId {
        let mut inner = self.lock();
        let id = EnvelopeId(inner.next_id);
        inner.next_id += 1;
        inner.states.insert(id, EnvelopeState::Fetched);
        inner.stats.fetched += 1;
        id
    }

    /// `fetched -> delivered`. Returns `false` for any other starting state.
    pub(crate) fn deliver(&self, id: EnvelopeId) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match inner.states.get_mut(&id) {
            Some(state @ EnvelopeState::Fetched) => {
                *state = EnvelopeState::Delivered;
                inner.stats.delivered += 1;
                true
            }
            _ => false,
        }
    }

    /// `delivered -> acknowledged`, granted at most once per envelope.
    pub(crate) fn acknowledge(&self, id: EnvelopeId) -> AckDecision {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match inner.states.get_mut(&id) {
            Some(state @ EnvelopeState::Delivered) => {
                *state = EnvelopeState::Acknowledged;
                inner.stats.acknowledged += 1;
                AckDecision::Delete
            }
            Some(EnvelopeState::Acknowledged) => AckDecision::AlreadyAcknowledged,
            _ => AckDecision::Abandoned,
        }
    }

    /// Marks a non-terminal envelope abandoned, keeping its entry.
    pub(crate) fn abandon(&self, id: EnvelopeId) -> bool {
        self.lock().mark_abandoned(id)
    }

    /// Abandons (if still outstanding) and forgets an envelope.
    pub(crate) fn release(&self, id: EnvelopeId) {
        let mut inner = self.lock();
        inner.mark_abandoned(id);
        inner.states.remove(&id);
    }

    /// Abandons every envelope that hasn't reached a terminal state.
    pub(crate) fn abandon_outstanding(&self) -> usize {
        let mut inner = self.lock();
        let outstanding: Vec<_> = inner
            .states
            .iter()
            .filter(|(_, state)| !state.is_terminal())
            .map(|(id, _)| *id)
            .collect();
        for id in &outstanding {
            inner.mark_abandoned(*id);
        }
        outstanding.len()
    }

    pub(crate) fn state(&self, id: EnvelopeId) -> Option<EnvelopeState> {
        self.lock().states.get(&id).copied()
    }

    pub(crate) fn stats(&self) -> PipelineStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledgment_is_granted_once() {
        let ledger = Ledger::new();
        let id = ledger.register();
        assert!(ledger.deliver(id));

        assert_eq!(ledger.acknowledge(id), AckDecision::Delete);
        assert_eq!(ledger.acknowledge(id), AckDecision::AlreadyAcknowledged);
        assert_eq!(ledger.state(id), Some(EnvelopeState::Acknowledged));
        assert_eq!(ledger.stats().acknowledged, 1);
    }

    #[test]
    fn undelivered_envelopes_cannot_be_acknowledged() {
        let ledger = Ledger::new();
        let id = ledger.register();
        assert_eq!(ledger.acknowledge(id), AckDecision::Abandoned);
        assert_eq!(ledger.state(id), Some(EnvelopeState::Fetched));
    }

    #[test]
    fn abandoned_envelopes_stay_abandoned() {
        let ledger = Ledger::new();
        let id = ledger.register();
        ledger.deliver(id);

        assert!(ledger.abandon(id));
        assert!(!ledger.abandon(id));
        assert_eq!(ledger.acknowledge(id), AckDecision::Abandoned);
        assert_eq!(ledger.stats().abandoned, 1);
        assert_eq!(ledger.stats().acknowledged, 0);
    }

    #[test]
    fn release_abandons_outstanding_and_forgets() {
        let ledger = Ledger::new();
        let acked = ledger.register();
        let pending = ledger.register();
        ledger.deliver(acked);
        ledger.deliver(pending);
        ledger.acknowledge(acked);

        ledger.release(acked);
        ledger.release(pending);

        assert_eq!(ledger.state(acked), None);
        assert_eq!(ledger.state(pending), None);
        let stats = ledger.stats();
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.abandoned, 1);
    }

    #[test]
    fn abandon_outstanding_skips_terminal_entries() {
        let ledger = Ledger::new();
        let buffered = ledger.register();
        let delivered = ledger.register();
        let acked = ledger.register();
        ledger.deliver(delivered);
        ledger.deliver(acked);
        ledger.acknowledge(acked);

        assert_eq!(ledger.abandon_outstanding(), 2);
        assert_eq!(ledger.state(buffered), Some(EnvelopeState::Abandoned));
        assert_eq!(ledger.state(delivered), Some(EnvelopeState::Abandoned));
        assert_eq!(ledger.state(acked), Some(EnvelopeState::Acknowledged));
    }
}
