//! Rendezvous channel between the mailbox cycle and the sink.
//!
//! `send` resolves only once the receiver has taken the value, so a slow
//! consumer throttles the producer and nothing queues up in between.

use tokio::sync::{mpsc, oneshot};

/// The receiving half is gone.
#[derive(Debug, thiserror::Error)]
#[error("handoff receiver closed")]
pub struct Closed;

/// Sending half of a hand-off channel.
#[derive(Debug)]
pub struct HandoffSender<T> {
    tx: mpsc::Sender<(T, oneshot::Sender<()>)>,
}

/// Receiving half of a hand-off channel.
#[derive(Debug)]
pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<(T, oneshot::Sender<()>)>,
}

/// Create a hand-off channel without buffering.
pub fn channel<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    // one slot for the value in flight; the ack keeps it from acting as a buffer
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl<T> HandoffSender<T> {
    /// Hand `value` over and wait until the receiver has accepted it.
    pub async fn send(&self, value: T) -> Result<(), Closed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send((value, ack_tx)).await.map_err(|_| Closed)?;
        ack_rx.await.map_err(|_| Closed)
    }

    /// Whether the receiver has been dropped or closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> HandoffReceiver<T> {
    /// Take the next value, releasing its sender. `None` once every sender
    /// is gone.
    pub async fn recv(&mut self) -> Option<T> {
        let (value, ack) = self.rx.recv().await?;
        let _ = ack.send(());
        Some(value)
    }

    /// Refuse further values. Senders blocked in `send` get `Closed`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn send_waits_for_receiver() {
        let (tx, mut rx) = channel::<u32>();

        let pending = tokio::spawn(async move { tx.send(7).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished(), "send returned before recv");

        assert_eq!(rx.recv().await, Some(7));
        let sent = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(sent.is_ok());
    }

    #[tokio::test]
    async fn values_arrive_in_order() {
        let (tx, mut rx) = channel::<u32>();
        let producer = tokio::spawn(async move {
            for i in 0..5 {
                tx.send(i).await.unwrap();
            }
        });

        let mut got = Vec::new();
        while let Some(v) = rx.recv().await {
            got.push(v);
        }
        producer.await.unwrap();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn recv_returns_none_after_sender_dropped() {
        let (tx, mut rx) = channel::<u32>();
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (tx, rx) = channel::<u32>();
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx.send(1).await.is_err());
    }

    #[tokio::test]
    async fn blocked_send_fails_when_receiver_closes() {
        let (tx, mut rx) = channel::<u32>();
        let pending = tokio::spawn(async move { tx.send(1).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        rx.close();
        drop(rx);
        let sent = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(sent.is_err());
    }
}
