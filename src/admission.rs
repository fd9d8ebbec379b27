//! Admission control for concurrent transfers.
//!
//! A fixed pool of slots; a transfer runs only while it holds one. The slot
//! is a permit guard, so it goes back to the pool on every exit path when the
//! guard is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// A held transfer slot. Released on drop.
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait up to `limit` for a free slot.
    pub async fn acquire(&self, limit: Duration) -> Result<AdmissionSlot> {
        match timeout(limit, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(AdmissionSlot { _permit: permit }),
            // the semaphore is never closed while a controller exists
            Ok(Err(_)) | Err(_) => Err(Error::Busy(limit.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_and_released_on_drop() {
        let ctl = AdmissionController::new(2);
        let a = ctl.acquire(Duration::from_millis(10)).await.unwrap();
        let _b = ctl.acquire(Duration::from_millis(10)).await.unwrap();
        assert_eq!(ctl.available(), 0);
        assert!(matches!(
            ctl.acquire(Duration::from_millis(20)).await,
            Err(Error::Busy(20))
        ));
        drop(a);
        assert_eq!(ctl.available(), 1);
        let _c = ctl.acquire(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn waiter_gets_slot_freed_during_wait() {
        let ctl = AdmissionController::new(1);
        let held = ctl.acquire(Duration::from_millis(10)).await.unwrap();
        let waiter = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.acquire(Duration::from_secs(2)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(held);
        assert!(waiter.await.unwrap());
        assert_eq!(ctl.available(), 1);
    }

    #[tokio::test]
    async fn slot_returns_when_holder_fails() {
        let ctl = AdmissionController::new(1);
        let res: Result<()> = async {
            let _slot = ctl.acquire(Duration::from_millis(10)).await?;
            Err(Error::incomplete(1, 2, "simulated"))
        }
        .await;
        assert!(res.is_err());
        assert_eq!(ctl.available(), 1);
    }
}
