//! Cooperative stop handles for background loops.
//!
//! Every long-running loop (TTL refresh, heartbeat, watch) owns a
//! `StopSignal` and selects on it between iterations. The matching
//! `StopHandle` stays with whoever started the loop. Dropping the handle
//! closes the channel, which the loop treats the same as an explicit stop.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Receiving side of a stop channel, held by the loop.
pub type StopSignal = mpsc::Receiver<()>;

/// Sending side of a stop channel, optionally paired with the loop's task.
#[derive(Debug)]
pub struct StopHandle {
    tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

/// Create an unattached stop channel.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = mpsc::channel(1);
    (StopHandle { tx, task: None }, rx)
}

impl StopHandle {
    /// Spawn `run` on the runtime, handing it the stop signal.
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (mut handle, signal) = stop_channel();
        handle.task = Some(tokio::spawn(run(signal)));
        handle
    }

    /// Ask the loop to stop at its next select boundary. Does not wait.
    pub fn signal(&self) {
        // a full channel already holds a pending stop
        let _ = self.tx.try_send(());
    }

    /// Signal the loop and wait for its task to finish.
    pub async fn stop(mut self) {
        self.signal();

        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            warn!("Stopped task had panicked: {}", e);
        }
    }

    /// Whether the loop has exited, either by stop or on its own.
    pub fn is_finished(&self) -> bool {
        match &self.task {
            Some(task) => task.is_finished(),
            None => self.tx.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn ticking_loop(ticks: Arc<AtomicU32>) -> StopHandle {
        StopHandle::spawn(move |mut stop| async move {
            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {
                        ticks.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_stop_waits_for_task() {
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = ticking_loop(ticks.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop().await;

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop > 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_drop_stops_loop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = ticking_loop(ticks.clone());
        drop(handle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let settled = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_is_finished() {
        let handle = StopHandle::spawn(|_stop| async {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_finished());

        let (handle, signal) = stop_channel();
        assert!(!handle.is_finished());
        drop(signal);
        assert!(handle.is_finished());
    }
}
