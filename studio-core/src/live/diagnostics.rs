//! Session counters shared between the session loop and observers.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub frames_captured: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub chunks_scheduled: AtomicUsize,
    pub chunks_finished: AtomicUsize,
    pub chunks_rejected: AtomicUsize,
    pub interruptions: AtomicUsize,
    pub transcript_entries: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_finished: self.chunks_finished.load(Ordering::Relaxed),
            chunks_rejected: self.chunks_rejected.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            transcript_entries: self.transcript_entries.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize, by: usize) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn counters(&self) -> [&AtomicUsize; 8] {
        [
            &self.frames_captured,
            &self.frames_sent,
            &self.frames_dropped,
            &self.chunks_scheduled,
            &self.chunks_finished,
            &self.chunks_rejected,
            &self.interruptions,
            &self.transcript_entries,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_captured: usize,
    pub frames_sent: usize,
    pub frames_dropped: usize,
    pub chunks_scheduled: usize,
    pub chunks_finished: usize,
    pub chunks_rejected: usize,
    pub interruptions: usize,
    pub transcript_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_every_counter() {
        let diag = SessionDiagnostics::default();
        SessionDiagnostics::bump(&diag.frames_sent, 3);
        SessionDiagnostics::bump(&diag.interruptions, 1);
        assert_eq!(diag.snapshot().frames_sent, 3);
        diag.reset();
        assert_eq!(diag.snapshot(), DiagnosticsSnapshot::default());
    }
}
