//! Lock acquisition and release.
//!
//! The store's compare-and-swap is the only source of mutual exclusion. This
//! module layers retries, TTL refresh, and guaranteed release on top of it:
//!
//! - `execute_with_use_lock` fails fast if the use is held and always
//!   releases it after the closure runs
//! - `execute_with_multi_use_lock` acquires several uses in order with a
//!   timeout before running the closure
//! - `acquire_with_ttl_refresh` keeps a TTL-backed use alive from a
//!   background task until its handle is stopped or dropped

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use volplugin_common::{Result, StopHandle, VolpluginError};
use volplugin_kv::Client;

use crate::store::UseStore;
use crate::uses::UseLocker;

/// Base delay between acquisition attempts, before jitter.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a running TTL refresh loop. Stopping or dropping it ends the
/// loop without releasing the lock.
pub type RefreshHandle = StopHandle;

/// How long to keep retrying a contended lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Try once and fail on conflict.
    Once,
    /// Retry until the lock frees.
    Forever,
    /// Retry until this much time has passed since the first attempt.
    For(Duration),
}

impl Timeout {
    /// Map the millisecond convention: `0` tries once, negative retries
    /// forever, positive is a deadline.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => Timeout::Once,
            n if n < 0 => Timeout::Forever,
            n => Timeout::For(Duration::from_millis(n.unsigned_abs())),
        }
    }

    fn allows_retry(&self, elapsed: Duration) -> bool {
        match self {
            Timeout::Once => false,
            Timeout::Forever => true,
            Timeout::For(limit) => elapsed < *limit,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        if value.is_zero() {
            Timeout::Once
        } else {
            Timeout::For(value)
        }
    }
}

/// `d` plus a uniformly random extra of up to `d`.
pub fn jitter(d: Duration) -> Duration {
    d + d.mul_f64(rand::random::<f64>())
}

fn retryable(err: &VolpluginError) -> bool {
    !matches!(
        err,
        VolpluginError::InvalidPath(_)
            | VolpluginError::InvalidVolume(_)
            | VolpluginError::Serialization(_)
    )
}

fn describe(lock: &dyn UseLocker) -> String {
    match lock.reason() {
        Some(reason) => format!("{} lock for {}", reason, lock.volume()),
        None => format!("{} lock", lock.volume()),
    }
}

/// Acquires and releases use-locks.
#[derive(Clone)]
pub struct LockDriver {
    uses: UseStore,
}

impl LockDriver {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self {
            uses: UseStore::new(client),
        }
    }

    pub fn uses(&self) -> &UseStore {
        &self.uses
    }

    /// Run `run` while holding `lock`.
    ///
    /// Fails with `LockPublish` without retrying if the use cannot be
    /// published. Once published, the use is removed whatever `run` returns;
    /// removal failures are logged.
    pub async fn execute_with_use_lock<F, Fut, T>(
        &self,
        lock: &dyn UseLocker,
        run: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Err(e) = self.uses.publish_use(lock).await {
            debug!("Could not publish use lock {:?}: {}", lock, e);
            return Err(VolpluginError::LockPublish(describe(lock)).into());
        }

        let result = run().await;

        if let Err(e) = self.uses.remove_use(lock, false).await {
            error!("Could not remove use lock {:?}: {}", lock, e);
        }

        result
    }

    /// Acquire every lock in order, each with `timeout`, then run `run` and
    /// release them all.
    ///
    /// If an acquisition fails its error is returned immediately and locks
    /// already taken by this call are left in place. Callers that need
    /// all-or-nothing semantics must clear them.
    pub async fn execute_with_multi_use_lock<F, Fut, T>(
        &self,
        locks: &[&dyn UseLocker],
        timeout: Timeout,
        run: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        for lock in locks {
            self.acquire(*lock, None, timeout).await?;
        }

        let result = run().await;

        for lock in locks {
            if let Err(e) = self.uses.remove_use(*lock, false).await {
                error!("Could not remove use lock {:?}: {}", lock, e);
            }
        }

        result
    }

    /// Publish `lock`, retrying on conflict according to `timeout`.
    ///
    /// With a `ttl` the use is refreshed when ours and created when absent;
    /// without one, or with a zero `ttl`, it is published permanently.
    pub async fn acquire(
        &self,
        lock: &dyn UseLocker,
        ttl: Option<Duration>,
        timeout: Timeout,
    ) -> Result<()> {
        let ttl = ttl.filter(|ttl| !ttl.is_zero());
        let started = Instant::now();

        loop {
            let attempt = match ttl {
                Some(ttl) => self.uses.publish_use_with_ttl(lock, ttl).await,
                None => self.uses.publish_use(lock).await,
            };

            let err = match attempt {
                Ok(()) => {
                    debug!(volume = %lock.volume(), ttl = ?ttl, "Acquired {}", describe(lock));
                    return Ok(());
                }
                Err(e) => e,
            };

            if !retryable(&err) {
                return Err(err);
            }

            warn!(volume = %lock.volume(), "Could not acquire {}: {}", describe(lock), err);

            if !timeout.allows_retry(started.elapsed()) {
                return Err(VolpluginError::LockFailed(format!(
                    "timed out acquiring {}: {}",
                    describe(lock),
                    err
                )));
            }

            let wait = jitter(RETRY_INTERVAL);
            debug!(volume = %lock.volume(), wait = ?wait, "Waiting for lock to free");
            tokio::time::sleep(wait).await;
        }
    }

    /// Acquire `lock` with `ttl` and keep refreshing it every
    /// `jitter(ttl / 4)` from a background task.
    ///
    /// The loop ends when the handle is stopped or dropped, or after a
    /// refresh fails. A stop also interrupts a refresh that is still
    /// retrying. The loop never releases the lock itself.
    ///
    /// A zero `ttl` publishes the use permanently; the returned handle then
    /// has nothing to refresh.
    pub async fn acquire_with_ttl_refresh<L>(
        &self,
        lock: &L,
        ttl: Duration,
        timeout: Timeout,
    ) -> Result<RefreshHandle>
    where
        L: UseLocker + Clone + 'static,
    {
        if ttl.is_zero() {
            self.acquire(lock, None, timeout).await?;
            return Ok(StopHandle::spawn(|mut stop| async move {
                let _ = stop.recv().await;
            }));
        }

        self.acquire(lock, Some(ttl), timeout).await?;

        let driver = self.clone();
        let lock = lock.clone();
        let interval = ttl / 4;

        Ok(StopHandle::spawn(move |mut stop| async move {
            loop {
                tokio::select! {
                    _ = stop.recv() => {
                        debug!(volume = %lock.volume(), "Stopping TTL refresh");
                        break;
                    }
                    _ = tokio::time::sleep(jitter(interval)) => {
                        let refreshed = tokio::select! {
                            _ = stop.recv() => {
                                debug!(volume = %lock.volume(), "Stopping TTL refresh during retry");
                                break;
                            }
                            result = driver.acquire(&lock, Some(ttl), timeout) => result,
                        };

                        if let Err(e) = refreshed {
                            error!(
                                volume = %lock.volume(),
                                "Could not refresh {}: {}", describe(&lock), e
                            );
                            break;
                        }
                        debug!(volume = %lock.volume(), "Refreshed {}", describe(&lock));
                    }
                }
            }
        }))
    }

    /// Remove `lock`, retrying according to `timeout`. A lock that is
    /// already gone counts as cleared.
    pub async fn clear_lock(&self, lock: &dyn UseLocker, timeout: Timeout) -> Result<()> {
        let started = Instant::now();

        loop {
            let err = match self.uses.remove_use(lock, false).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_not_exists() => return Ok(()),
                Err(e) => e,
            };

            if !retryable(&err) {
                return Err(err);
            }

            warn!(volume = %lock.volume(), "Could not clear {}: {}", describe(lock), err);

            if !timeout.allows_retry(started.elapsed()) {
                return Err(VolpluginError::LockFailed(format!(
                    "timed out clearing {}: {}",
                    describe(lock),
                    err
                )));
            }

            tokio::time::sleep(jitter(RETRY_INTERVAL)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reason::Reason;
    use crate::uses::{UseMount, UseSnapshot};
    use volplugin_kv::MemoryClient;

    fn driver() -> (MemoryClient, LockDriver) {
        let client = MemoryClient::new("volplugin");
        (client.clone(), LockDriver::new(Arc::new(client)))
    }

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(Timeout::from_millis(0), Timeout::Once);
        assert_eq!(Timeout::from_millis(-1), Timeout::Forever);
        assert_eq!(
            Timeout::from_millis(1500),
            Timeout::For(Duration::from_millis(1500))
        );
        assert_eq!(Timeout::from(Duration::ZERO), Timeout::Once);

        assert!(!Timeout::Once.allows_retry(Duration::ZERO));
        assert!(Timeout::Forever.allows_retry(Duration::from_secs(3600)));
        assert!(Timeout::For(Duration::from_secs(1)).allows_retry(Duration::from_millis(999)));
        assert!(!Timeout::For(Duration::from_secs(1)).allows_retry(Duration::from_secs(1)));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let j = jitter(base);
            assert!(j >= base && j < base * 2, "{:?} out of range", j);
        }
    }

    #[tokio::test]
    async fn test_execute_with_use_lock_releases_on_error() {
        let (client, driver) = driver();
        let lock = UseSnapshot::new("p/v", Reason::Snapshot);

        let result: anyhow::Result<()> = driver
            .execute_with_use_lock(&lock, || async { Err(anyhow::anyhow!("boom")) })
            .await;
        assert_eq!(result.unwrap_err().to_string(), "boom");
        assert!(client.is_empty());

        let value = driver
            .execute_with_use_lock(&lock, || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn test_execute_with_use_lock_publish_conflict() {
        let (_, driver) = driver();
        let lock = UseSnapshot::new("p/v", Reason::Snapshot);
        driver.uses().publish_use(&lock).await.unwrap();

        let ran = std::sync::atomic::AtomicBool::new(false);
        let flag = &ran;
        let err = driver
            .execute_with_use_lock(&lock, move || async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<VolpluginError>(),
            Some(VolpluginError::LockPublish(_))
        ));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_acquire_once_fails_fast() {
        let (_, driver) = driver();
        let held = UseMount::new("p/v", "host1", Reason::Mount);
        let other = UseMount::new("p/v", "host2", Reason::Mount);
        driver.acquire(&held, None, Timeout::Once).await.unwrap();

        let started = Instant::now();
        let err = driver
            .acquire(&other, None, Timeout::Once)
            .await
            .unwrap_err();
        assert!(matches!(err, VolpluginError::LockFailed(_)));
        assert!(started.elapsed() < RETRY_INTERVAL);
    }

    #[tokio::test]
    async fn test_acquire_with_deadline() {
        let (_, driver) = driver();
        let held = UseSnapshot::new("p/v", Reason::Snapshot);
        driver.acquire(&held, None, Timeout::Once).await.unwrap();

        let started = Instant::now();
        let err = driver
            .acquire(&held, None, Timeout::For(Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, VolpluginError::LockFailed(_)));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_acquire_rejects_invalid_volume_immediately() {
        let (_, driver) = driver();
        let bad = UseMount::new("no-policy", "host1", Reason::Mount);

        let err = driver
            .acquire(&bad, None, Timeout::Forever)
            .await
            .unwrap_err();
        assert!(matches!(err, VolpluginError::InvalidVolume(_)));
    }

    #[tokio::test]
    async fn test_clear_lock() {
        let (client, driver) = driver();
        let lock = UseMount::new("p/v", "host1", Reason::Mount);

        driver.acquire(&lock, None, Timeout::Once).await.unwrap();
        driver.clear_lock(&lock, Timeout::Once).await.unwrap();
        assert!(client.is_empty());

        // already cleared
        driver.clear_lock(&lock, Timeout::Once).await.unwrap();

        let theirs = UseMount::new("p/v", "host2", Reason::Mount);
        driver.acquire(&theirs, None, Timeout::Once).await.unwrap();
        let err = driver
            .clear_lock(&lock, Timeout::For(Duration::from_millis(150)))
            .await
            .unwrap_err();
        assert!(matches!(err, VolpluginError::LockFailed(_)));
    }

    #[tokio::test]
    async fn test_multi_use_lock_leaves_earlier_locks_on_failure() {
        let (_, driver) = driver();
        let mount = UseMount::new("p/v", "host1", Reason::Create);
        let snap = UseSnapshot::new("p/v", Reason::Create);
        driver.uses().publish_use(&snap).await.unwrap();

        let err = driver
            .execute_with_multi_use_lock(&[&mount, &snap], Timeout::Once, || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VolpluginError>(),
            Some(VolpluginError::LockFailed(_))
        ));

        // the mount use taken before the failure is still held
        let other = UseMount::new("p/v", "host2", Reason::Create);
        assert!(driver.acquire(&other, None, Timeout::Once).await.is_err());
    }

    #[tokio::test]
    async fn test_multi_use_lock_releases_after_run() {
        let (client, driver) = driver();
        let mount = UseMount::new("p/v", "host1", Reason::Remove);
        let snap = UseSnapshot::new("p/v", Reason::Remove);

        let observer = client.clone();
        let held = driver
            .execute_with_multi_use_lock(&[&mount, &snap], Timeout::Once, move || async move {
                Ok(observer.len())
            })
            .await
            .unwrap();
        assert_eq!(held, 2);
        assert!(client.is_empty());
    }
}
