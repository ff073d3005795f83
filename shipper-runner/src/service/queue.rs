//! Delivery queue
//!
//! The single hand-off point between the stream readers (producers) and the
//! batch uploader (consumer). It holds at most `capacity` lines; producers
//! never wait longer than the timeout they pass in.
//!
//! Closing the queue refuses new lines from readers. The consumer then
//! drains whatever is left, including lines the uploader requeues while
//! draining, and sees `None` once the queue is empty.

use shipper_core::domain::log::LogLine;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Why a line was not accepted. The line is handed back to the caller.
#[derive(Debug)]
pub enum EnqueueError {
    /// No space became available in time
    Full(LogLine),
    /// The queue no longer accepts lines
    Closed(LogLine),
}

/// Producer handle of the delivery queue
///
/// Cheap to clone; every reader and the uploader's retry path hold one.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<LogLine>,
    closed: CancellationToken,
}

impl DeliveryQueue {
    /// Creates a queue holding at most `capacity` lines
    ///
    /// Returns the producer handle and the single consumer.
    pub fn bounded(capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let closed = CancellationToken::new();

        (
            Self {
                tx,
                closed: closed.clone(),
            },
            QueueReceiver {
                rx,
                closed,
                draining: false,
            },
        )
    }

    /// Adds a line, waiting up to `wait` for space if the queue is full
    pub async fn enqueue(&self, line: LogLine, wait: Duration) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed(line));
        }

        match self.tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(line)) => Err(EnqueueError::Closed(line)),
            Err(TrySendError::Full(line)) => match self.tx.send_timeout(line, wait).await {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(line)) => Err(EnqueueError::Full(line)),
                Err(SendTimeoutError::Closed(line)) => Err(EnqueueError::Closed(line)),
            },
        }
    }

    /// Puts a line back for another delivery attempt without waiting
    ///
    /// Accepted after `close()` so lines failed during the final drain still
    /// get their remaining attempts.
    pub fn requeue(&self, line: LogLine) -> Result<(), EnqueueError> {
        self.tx.try_send(line).map_err(|e| match e {
            TrySendError::Full(line) => EnqueueError::Full(line),
            TrySendError::Closed(line) => EnqueueError::Closed(line),
        })
    }

    /// Stops accepting lines from readers. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Number of lines currently waiting for the uploader
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer half of the delivery queue
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<LogLine>,
    closed: CancellationToken,
    draining: bool,
}

impl QueueReceiver {
    /// Waits for the next line
    ///
    /// Returns `None` once the queue is closed and empty, or once every
    /// producer handle has been dropped.
    pub async fn recv(&mut self) -> Option<LogLine> {
        if !self.draining {
            tokio::select! {
                biased;
                line = self.rx.recv() => return line,
                _ = self.closed.cancelled() => self.draining = true,
            }
        }

        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipper_core::domain::log::Stream;
    use tokio::time::Instant;

    fn line(content: &str) -> LogLine {
        LogLine::new(Stream::Stdout, content)
    }

    #[tokio::test]
    async fn test_lines_come_out_in_order() {
        let (queue, mut rx) = DeliveryQueue::bounded(10);

        for i in 0..5 {
            queue
                .enqueue(line(&i.to_string()), Duration::ZERO)
                .await
                .unwrap();
        }
        assert_eq!(queue.len(), 5);

        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().content, i.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_after_bounded_wait() {
        let (queue, _rx) = DeliveryQueue::bounded(2);
        queue.enqueue(line("a"), Duration::ZERO).await.unwrap();
        queue.enqueue(line("b"), Duration::ZERO).await.unwrap();

        let start = Instant::now();
        let result = queue
            .enqueue(line("c"), Duration::from_millis(100))
            .await;
        let waited = start.elapsed();

        match result {
            Err(EnqueueError::Full(l)) => assert_eq!(l.content, "c"),
            other => panic!("expected Full, got {:?}", other),
        }
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_millis(150));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_succeeds_when_space_frees_up() {
        let (queue, mut rx) = DeliveryQueue::bounded(1);
        queue.enqueue(line("a"), Duration::ZERO).await.unwrap();

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            (first.content, second.content)
        });

        queue
            .enqueue(line("b"), Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(
            consumer.await.unwrap(),
            ("a".to_string(), "b".to_string())
        );
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (queue, mut rx) = DeliveryQueue::bounded(10);
        queue.enqueue(line("a"), Duration::ZERO).await.unwrap();
        queue.enqueue(line("b"), Duration::ZERO).await.unwrap();

        queue.close();

        assert!(matches!(
            queue.enqueue(line("late"), Duration::ZERO).await,
            Err(EnqueueError::Closed(_))
        ));

        assert_eq!(rx.recv().await.unwrap().content, "a");
        assert_eq!(rx.recv().await.unwrap().content, "b");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_requeue_is_accepted_while_draining() {
        let (queue, mut rx) = DeliveryQueue::bounded(10);
        queue.close();
        assert!(rx.recv().await.is_none());

        queue.requeue(line("retry")).unwrap();
        assert_eq!(rx.recv().await.unwrap().content, "retry");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_requeue_never_waits() {
        let (queue, _rx) = DeliveryQueue::bounded(1);
        queue.requeue(line("a")).unwrap();

        match queue.requeue(line("b")) {
            Err(EnqueueError::Full(l)) => assert_eq!(l.content, "b"),
            other => panic!("expected Full, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let (queue, mut rx) = DeliveryQueue::bounded(10);

        let consumer = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        queue.close();

        assert!(consumer.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let (queue, mut rx) = DeliveryQueue::bounded(500);

        let mut producers = Vec::new();
        for p in 0..4 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..100 {
                    queue
                        .enqueue(line(&format!("{p}-{i}")), Duration::from_secs(1))
                        .await
                        .unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        queue.close();

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 400);
    }
}
