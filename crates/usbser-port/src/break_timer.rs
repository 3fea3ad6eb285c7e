//! Single-shot timer that releases a break condition
//!
//! A port owns one [`BreakTimer`]. Scheduling replaces whatever was pending:
//! the old timer thread is woken and exits without firing. Because the old
//! thread may already be past its deadline when that happens, the action
//! receives a [`TimerTicket`] and must check [`TimerTicket::is_current`]
//! under the same lock the scheduler holds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

/// Identifies one scheduling of the timer
#[derive(Debug, Clone)]
pub struct TimerTicket {
    generation: Arc<AtomicU64>,
    id: u64,
}

impl TimerTicket {
    /// `false` once the timer was rescheduled or cancelled
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.id
    }
}

#[derive(Debug, Default)]
pub struct BreakTimer {
    generation: Arc<AtomicU64>,
    cancel: Mutex<Option<mpsc::Sender<()>>>,
}

impl BreakTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay` unless cancelled or rescheduled first
    pub fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce(TimerTicket) + Send + 'static,
    {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropping the sender wakes the previous timer, which then exits
        cancel.take();
        let id = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let ticket = TimerTicket {
            generation: self.generation.clone(),
            id,
        };

        let (tx, rx) = mpsc::channel::<()>();
        let spawned = thread::Builder::new()
            .name("usbser-break".to_string())
            .spawn(move || match rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {
                    if ticket.is_current() {
                        action(ticket);
                    }
                }
                _ => trace!("Break timer {} cancelled", id),
            });

        match spawned {
            Ok(_) => *cancel = Some(tx),
            Err(e) => warn!("Failed to start break timer: {}", e),
        }
    }

    /// Drop any pending action
    pub fn cancel(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        cancel.take();
    }
}

impl Drop for BreakTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_fires_once() {
        let timer = BreakTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        timer.schedule(Duration::from_millis(20), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reschedule_replaces_pending() {
        let timer = BreakTimer::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let first = fired.clone();
        timer.schedule(Duration::from_millis(50), move |_| {
            first.lock().unwrap().push(("first", start.elapsed()));
        });
        let second = fired.clone();
        timer.schedule(Duration::from_millis(200), move |_| {
            second.lock().unwrap().push(("second", start.elapsed()));
        });

        thread::sleep(Duration::from_millis(400));
        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, "second");
        assert!(fired[0].1 >= Duration::from_millis(200));
    }

    #[test]
    fn test_cancel() {
        let timer = BreakTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        timer.schedule(Duration::from_millis(30), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ticket_goes_stale() {
        let timer = BreakTimer::new();
        let (tx, rx) = mpsc::channel();
        timer.schedule(Duration::from_millis(10), move |ticket| {
            tx.send(ticket).unwrap();
        });
        let ticket = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(ticket.is_current());
        timer.cancel();
        assert!(!ticket.is_current());
    }
}
