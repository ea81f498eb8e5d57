use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::watch;

use crate::worker::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Downloading,
    Converting,
    Done,
    Failed,
}

impl Phase {
    pub fn is_finished(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    pub current: usize,
    pub total: usize,
    pub phase: Phase,
}

impl ProgressState {
    pub const fn starting() -> Self {
        Self {
            current: 0,
            total: 0,
            phase: Phase::Starting,
        }
    }

    /// Completed share of the current phase, 0.0 when nothing is known yet.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f32 / self.total as f32
        }
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::starting()
    }
}

/// Worker side of the progress channel. Observers hold a
/// [`watch::Receiver`] and always see the latest state.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: watch::Sender<ProgressState>,
}

impl ProgressReporter {
    pub fn new() -> (Self, watch::Receiver<ProgressState>) {
        let (tx, rx) = watch::channel(ProgressState::starting());
        (Self { tx }, rx)
    }

    pub fn state(&self) -> ProgressState {
        *self.tx.borrow()
    }

    /// Enters `phase` with its counters reset.
    pub fn begin(&self, phase: Phase) {
        debug!("Entering phase {:?}", phase);
        self.tx.send_replace(ProgressState {
            current: 0,
            total: 0,
            phase,
        });
    }

    pub fn update(&self, current: usize, total: usize) {
        debug_assert!(current <= total, "progress {}/{} out of range", current, total);
        self.tx.send_modify(|state| {
            state.current = current.min(total);
            state.total = total;
        });
    }

    /// Ends the run, keeping the counters where they stopped.
    pub fn finish(&self, phase: Phase) {
        debug_assert!(phase.is_finished());
        self.tx.send_modify(|state| state.phase = phase);
    }
}

/// Shared flag checked between items. An item already in flight completes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_publishes_latest_state() {
        let (reporter, rx) = ProgressReporter::new();
        assert_eq!(*rx.borrow(), ProgressState::starting());

        reporter.begin(Phase::Downloading);
        reporter.update(1, 3);
        reporter.update(2, 3);
        assert_eq!(
            *rx.borrow(),
            ProgressState {
                current: 2,
                total: 3,
                phase: Phase::Downloading
            }
        );

        reporter.begin(Phase::Converting);
        assert_eq!(rx.borrow().current, 0);
        reporter.update(3, 3);
        reporter.finish(Phase::Done);
        assert_eq!(
            reporter.state(),
            ProgressState {
                current: 3,
                total: 3,
                phase: Phase::Done
            }
        );
    }

    #[test]
    fn reporter_works_without_receivers() {
        let (reporter, rx) = ProgressReporter::new();
        drop(rx);
        reporter.begin(Phase::Downloading);
        reporter.update(1, 1);
        assert_eq!(reporter.state().current, 1);
    }

    #[test]
    fn fraction() {
        assert_eq!(ProgressState::starting().fraction(), 0.0);
        let state = ProgressState {
            current: 1,
            total: 4,
            phase: Phase::Converting,
        };
        assert_eq!(state.fraction(), 0.25);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(PipelineError::Cancelled)));
    }
}
