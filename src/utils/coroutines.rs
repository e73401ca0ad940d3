//! Single-shot continuations keyed by event name.
//!
//! ```rust,ignore
//! let next_frame = renderer.next_frame();
//! // ... later, after a render() call
//! pollster::block_on(next_frame).ok();
//! ```
//!
//! There is no timeout: a receiver waits until the event fires or the
//! registry is dropped (which cancels it).

use futures::channel::oneshot;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct Coroutines {
    pending: FxHashMap<String, Vec<oneshot::Sender<()>>>,
}

impl Coroutines {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Future resolved the next time `event` fires.
    pub fn wait(&mut self, event: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.entry(event.to_string()).or_default().push(tx);
        rx
    }

    /// Resolves every waiter of `event` in registration order and forgets
    /// them. Returns how many were still listening.
    pub fn fire(&mut self, event: &str) -> usize {
        let Some(waiters) = self.pending.remove(event) else {
            return 0;
        };
        waiters.into_iter().filter_map(|tx| tx.send(()).ok()).count()
    }

    /// Waiters registered for `event`.
    #[must_use]
    pub fn pending(&self, event: &str) -> usize {
        self.pending.get(event).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_then_forgets() {
        let mut coroutines = Coroutines::new();
        let mut first = coroutines.wait("render");
        let mut second = coroutines.wait("render");
        assert_eq!(coroutines.pending("render"), 2);

        assert_eq!(coroutines.fire("render"), 2);
        assert_eq!(first.try_recv(), Ok(Some(())));
        assert_eq!(second.try_recv(), Ok(Some(())));
        assert_eq!(coroutines.pending("render"), 0);
        assert_eq!(coroutines.fire("render"), 0);
    }

    #[test]
    fn dropped_receivers_are_not_counted() {
        let mut coroutines = Coroutines::new();
        drop(coroutines.wait("render"));
        let _kept = coroutines.wait("render");
        assert_eq!(coroutines.fire("render"), 1);
    }

    #[test]
    fn events_are_independent() {
        let mut coroutines = Coroutines::new();
        let mut other = coroutines.wait("update");
        coroutines.fire("render");
        assert_eq!(other.try_recv(), Ok(None));
    }
}
