use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use pushgate_common::error::AppError;
use pushgate_common::types::queue_name;

use super::{Queue, QueueFactory};

/// Process-local queue backend. Contents are lost on restart.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryQueueFactory;

#[async_trait]
impl QueueFactory for MemoryQueueFactory {
    async fn new_queue(&self, service_id: &str) -> Result<Arc<dyn Queue>, AppError> {
        Ok(Arc::new(MemoryQueue::new(&queue_name(service_id))))
    }
}

/// Unbounded in-memory FIFO.
pub struct MemoryQueue {
    name: String,
    items: Mutex<VecDeque<Vec<u8>>>,
    available: Notify,
}

impl MemoryQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, payload: Vec<u8>) -> Result<(), AppError> {
        self.items.lock().await.push_back(payload);
        self.available.notify_one();
        Ok(())
    }

    async fn pop(&self, cancel: &CancellationToken) -> Result<Option<Vec<u8>>, AppError> {
        loop {
            // Register interest before looking so a push landing in between
            // still wakes us.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(item) = self.items.lock().await.pop_front() {
                return Ok(Some(item));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Ok(None),
            }
        }
    }

    async fn len(&self) -> Result<usize, AppError> {
        Ok(self.items.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new("fcm");
        let cancel = CancellationToken::new();
        for i in 0..5u8 {
            queue.push(vec![i]).await.unwrap();
        }
        assert_eq!(queue.len().await.unwrap(), 5);
        for i in 0..5u8 {
            assert_eq!(queue.pop(&cancel).await.unwrap(), Some(vec![i]));
        }
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(MemoryQueue::new("fcm"));
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push(b"late".to_vec()).await.unwrap();
        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped, Some(b"late".to_vec()));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_empty_pop() {
        let queue = Arc::new(MemoryQueue::new("fcm"));
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };
        cancel.cancel();

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("pop should return promptly after cancel")
            .unwrap()
            .unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_share_an_item() {
        let queue = Arc::new(MemoryQueue::new("fcm"));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            consumers.push(tokio::spawn(async move {
                while let Ok(Some(item)) = queue.pop(&cancel).await {
                    tx.send(item).unwrap();
                }
            }));
        }
        drop(tx);

        for i in 0..200u32 {
            queue.push(i.to_be_bytes().to_vec()).await.unwrap();
        }

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let item = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(seen.insert(item), "item delivered twice");
        }

        cancel.cancel();
        for consumer in consumers {
            consumer.await.unwrap();
        }
        assert!(rx.recv().await.is_none());
    }
}
