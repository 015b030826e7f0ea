use {
    parking_lot::Mutex,
    sharebucket_protocol::{AreaId, FileName, LogicalPath},
    std::{
        collections::HashMap,
        sync::{Arc, Weak},
    },
    tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard},
};

/// Identity of a blob and its metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub area: AreaId,
    pub path: LogicalPath,
    pub filename: FileName,
}

impl Destination {
    #[must_use]
    #[inline]
    pub fn new(area: AreaId, path: &LogicalPath, filename: &FileName) -> Self {
        Self {
            area,
            path: path.clone(),
            filename: filename.clone(),
        }
    }
}

/// Serializes uploads and deletions of the same destination within this process.
#[derive(Debug, Default)]
pub struct DestinationLocks {
    locks: Mutex<HashMap<Destination, Weak<AsyncMutex<()>>>>,
}

impl DestinationLocks {
    #[inline]
    pub async fn lock(&self, destination: Destination) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks.retain(|_, lock| lock.strong_count() > 0);
            if let Some(mutex) = locks.get(&destination).and_then(Weak::upgrade) {
                mutex
            } else {
                let mutex = Arc::new(AsyncMutex::new(()));
                locks.insert(destination, Arc::downgrade(&mutex));
                mutex
            }
        };
        mutex.lock_owned().await
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::time::Duration,
        tokio::time::{sleep, timeout},
    };

    fn destination(name: &str) -> Destination {
        Destination::new(
            AreaId(1),
            &LogicalPath::root(),
            &FileName::new(name).unwrap(),
        )
    }

    #[tokio::test]
    async fn same_destination_is_exclusive() {
        let locks = Arc::new(DestinationLocks::default());
        let guard = locks.lock(destination("a.bin")).await;
        let locks2 = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _guard = locks2.lock(destination("a.bin")).await;
        });
        sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_destinations_are_independent() {
        let locks = DestinationLocks::default();
        let _a = locks.lock(destination("a.bin")).await;
        let _b = timeout(Duration::from_secs(5), locks.lock(destination("b.bin")))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }
}
