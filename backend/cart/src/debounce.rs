//! Trailing-edge debounce with a single-flight guard.
//!
//! Each [`Debouncer::schedule`] re-arms one timer. When the timer fires the
//! job starts on its own task, unless a previous job is still running, in
//! which case the firing is dropped rather than queued. Re-arming never
//! cancels a job that already started.
use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time::sleep};
use tracing::debug;

pub struct Debouncer {
    delay: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the job ends, however it ends.
struct Flight(Arc<AtomicBool>);

impl Drop for Flight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: Mutex::new(None),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let in_flight = self.in_flight.clone();
        let delay = self.delay;

        let mut timer = self.timer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pending) = timer.take() {
            pending.abort();
        }

        *timer = Some(tokio::spawn(async move {
            sleep(delay).await;

            let Some(flight) = take_off(&in_flight) else {
                debug!("Debounced job dropped, previous run still in flight");
                return;
            };

            tokio::spawn(async move {
                let _flight = flight;
                job().await;
            });
        }));
    }

    /// Runs `job` right away under the same single-flight guard.
    ///
    /// Returns `None` when another run is in flight.
    pub async fn run_now<Fut: Future>(&self, job: Fut) -> Option<Fut::Output> {
        let _flight = take_off(&self.in_flight)?;

        Some(job.await)
    }

    /// Drops a pending timer, if any. A running job is left alone.
    pub fn cancel(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pending) = timer.take() {
            pending.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn take_off(in_flight: &Arc<AtomicBool>) -> Option<Flight> {
    in_flight
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .ok()
        .map(|_| Flight(in_flight.clone()))
}

#[cfg(test)]
mod tests {
    use std::{pin::Pin, sync::atomic::AtomicUsize};

    use super::*;

    type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn counting(runs: &Arc<AtomicUsize>, work: Duration) -> impl FnOnce() -> Job + Send + 'static {
        let runs = runs.clone();
        move || -> Job {
            Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                sleep(work).await;
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_coalesce() {
        let debouncer = Debouncer::new(Duration::from_millis(350));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            debouncer.schedule(counting(&runs, Duration::ZERO));
            sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(400)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_firing_during_flight_is_dropped() {
        let debouncer = Debouncer::new(Duration::from_millis(350));
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(counting(&runs, Duration::from_secs(1)));
        sleep(Duration::from_millis(500)).await;
        assert!(debouncer.in_flight());

        debouncer.schedule(counting(&runs, Duration::ZERO));
        sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.in_flight());

        debouncer.schedule(counting(&runs, Duration::ZERO));
        sleep(Duration::from_millis(400)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_now_respects_flight() {
        let debouncer = Debouncer::new(Duration::from_millis(350));
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(counting(&runs, Duration::from_secs(1)));
        sleep(Duration::from_millis(500)).await;

        assert_eq!(debouncer.run_now(async { 7 }).await, None);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(debouncer.run_now(async { 7 }).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_timer() {
        let debouncer = Debouncer::new(Duration::from_millis(350));
        let runs = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(counting(&runs, Duration::ZERO));
        debouncer.cancel();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
