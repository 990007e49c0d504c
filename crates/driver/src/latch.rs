//! Single-assignment completion latch
//!
//! Each package owns one latch meaning "library built, copied, and
//! registered". It is written at most once per run: `true` by the build
//! stage, `false` by the task finaliser when the task exits without
//! publishing. Readers block until a value is available.

use tokio::sync::watch;

/// One-writer many-reader boolean latch
#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<Option<bool>>,
}

impl Latch {
    /// An unset latch
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Assign the latch; returns `false` if it was already assigned
    ///
    /// The first writer wins: a second `set` never changes the value.
    pub fn set(&self, value: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(value);
                true
            } else {
                false
            }
        })
    }

    /// The current value without blocking
    #[must_use]
    pub fn peek(&self) -> Option<bool> {
        *self.tx.borrow()
    }

    /// Block until the latch is assigned
    pub async fn wait(&self) -> bool {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = *rx.borrow_and_update() {
                return value;
            }
            if rx.changed().await.is_err() {
                // Sender dropped while unset: the owning task died
                // without publishing, which the finaliser records as
                // failure.
                return false;
            }
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_write_wins() {
        let latch = Latch::new();
        assert_eq!(latch.peek(), None);
        assert!(latch.set(true));
        assert!(!latch.set(false));
        assert_eq!(latch.peek(), Some(true));
        assert!(latch.wait().await);
    }

    #[tokio::test]
    async fn readers_block_until_assignment() {
        let latch = Arc::new(Latch::new());
        let reader = {
            let latch = Arc::clone(&latch);
            tokio::spawn(async move { latch.wait().await })
        };
        tokio::task::yield_now().await;
        latch.set(false);
        assert!(!reader.await.unwrap());
    }

    #[tokio::test]
    async fn many_readers_observe_one_value() {
        let latch = Arc::new(Latch::new());
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let latch = Arc::clone(&latch);
                tokio::spawn(async move { latch.wait().await })
            })
            .collect();
        latch.set(true);
        for reader in readers {
            assert!(reader.await.unwrap());
        }
    }
}
