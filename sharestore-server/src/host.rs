//! Opens and tracks the replicas hosted by the server.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use sharestore::{Backend, Driver, DriverError, DriverOptions, Namespace, ShareAddress};
use tracing::{info, warn};

/// The set of open replicas, one [`Driver`] per share.
///
/// All replicas share one backend. Cloning returns a handle to the same host.
#[derive(Debug, Clone)]
pub struct ReplicaHost {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    backend: Arc<dyn Backend>,
    options: DriverOptions,
    replicas: Mutex<BTreeMap<ShareAddress, Driver>>,
}

impl ReplicaHost {
    /// Create a host that opens its replicas in `backend`.
    pub fn new(backend: Arc<dyn Backend>, options: DriverOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                options,
                replicas: Default::default(),
            }),
        }
    }

    /// Get the replica of `share`, opening it if it is not hosted yet.
    pub async fn open(&self, share: &ShareAddress) -> Result<Driver, DriverError> {
        if let Some(driver) = self.get(share) {
            return Ok(driver);
        }
        info!("Creating replica for {share}...");
        let driver = Driver::open(
            Namespace::new(share.clone()),
            self.inner.backend.clone(),
            self.inner.options.clone(),
        )
        .await?;
        // a concurrent open of the same share may have won the race
        let mut replicas = self.inner.replicas.lock();
        let driver = replicas.entry(share.clone()).or_insert(driver);
        Ok(driver.clone())
    }

    /// Get the replica of `share` if it is hosted.
    pub fn get(&self, share: &ShareAddress) -> Option<Driver> {
        self.inner.replicas.lock().get(share).cloned()
    }

    /// All hosted shares, sorted.
    pub fn shares(&self) -> Vec<ShareAddress> {
        self.inner.replicas.lock().keys().cloned().collect()
    }

    /// Stop hosting `share`, erasing its data if `erase` is set.
    ///
    /// Returns whether the share was hosted. If closing fails the share stays hosted.
    pub async fn close(&self, share: &ShareAddress, erase: bool) -> Result<bool, DriverError> {
        let Some(driver) = self.get(share) else {
            return Ok(false);
        };
        driver.close(erase).await?;
        self.inner.replicas.lock().remove(share);
        info!(%share, erase, "closed replica");
        Ok(true)
    }

    /// Close every hosted replica, writing pending upserts.
    ///
    /// Every replica is closed even if some fail; the first error is returned.
    pub async fn close_all(&self) -> Result<(), DriverError> {
        let replicas = std::mem::take(&mut *self.inner.replicas.lock());
        let mut res = Ok(());
        for (share, driver) in replicas {
            if let Err(err) = driver.close(false).await {
                warn!(%share, "failed to close replica: {err}");
                if res.is_ok() {
                    res = Err(err);
                }
            }
        }
        res
    }
}
