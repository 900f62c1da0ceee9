use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    Sample,
};

/// Bounded FIFO of samples shared by many producers and one consumer.
///
/// A full buffer makes producers wait, which is the only backpressure the
/// client applies.
#[derive(Debug)]
pub struct MetricBuf {
    tx: mpsc::Sender<Sample>,
    rx: Mutex<mpsc::Receiver<Sample>>,
}
impl MetricBuf {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Waits for a free slot. On cancellation the sample is dropped, not
    /// queued.
    pub async fn push(&self, sample: Sample, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            permit = self.tx.reserve() => {
                let permit = permit.map_err(|_| Error::QueueClosed)?;
                permit.send(sample);
                Ok(())
            }
        }
    }
    pub async fn push_timeout(
        &self,
        sample: Sample,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::time::timeout(timeout, self.push(sample, cancel))
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }
    /// Hands the sample back if the buffer is full.
    pub fn try_push(&self, sample: Sample) -> core::result::Result<(), Sample> {
        self.tx.try_send(sample).map_err(|e| e.into_inner())
    }

    /// Waits for at least one sample, then takes whatever else is already
    /// queued, up to `max_count` in total.
    ///
    /// Cancellation leaves the buffer untouched.
    pub async fn pop_batch(
        &self,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Sample>> {
        let max_count = max_count.max(1);
        let mut rx = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            rx = self.rx.lock() => rx,
        };
        let mut batch = Vec::with_capacity(max_count);
        let n = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            n = rx.recv_many(&mut batch, max_count) => n,
        };
        if n == 0 {
            return Err(Error::QueueClosed);
        }
        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
