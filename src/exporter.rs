use std::{io, sync::Arc, time::SystemTime};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
    buf::MetricBuf,
    codec::encode_batch,
    config::ClientConfig,
    error::{Error, Result},
    MetricKey, Sample,
};

const DRAIN_BUF_SIZE: usize = 1024;

/// Duplex byte stream connected to a Graphite server.
///
/// A whole stream is divided with [`tokio::io::split`], whose halves take a
/// short lock on every poll. Streams that split natively, such as
/// [`TcpStream::into_split`], can be passed as independent halves through
/// [`GraphiteClient::from_halves`] or [`ClientBuilder::halves`].
pub trait MetricStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T> MetricStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

fn split_stream(stream: impl MetricStream + 'static) -> (BoxReader, BoxWriter) {
    let (reader, writer) = tokio::io::split(stream);
    (Box::new(reader), Box::new(writer))
}

#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    connection: Option<(BoxReader, BoxWriter)>,
    address: Option<String>,
}
impl ClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }
    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.config.max_buffer_size = max_buffer_size;
        self
    }
    pub fn max_metrics_per_message(mut self, max_metrics_per_message: usize) -> Self {
        self.config.max_metrics_per_message = max_metrics_per_message;
        self
    }
    pub fn max_tries(mut self, max_tries: usize) -> Self {
        self.config.max_tries = max_tries;
        self
    }
    pub fn retry_delay(mut self, retry_delay: std::time::Duration) -> Self {
        self.config.retry_delay = retry_delay;
        self
    }
    /// Already established stream. Takes precedence over [`Self::address`].
    pub fn connection(mut self, stream: impl MetricStream + 'static) -> Self {
        self.connection = Some(split_stream(stream));
        self
    }
    /// Already established connection given as independent read and write
    /// halves. Takes precedence over [`Self::address`].
    pub fn halves(
        mut self,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        self.connection = Some((Box::new(reader), Box::new(writer)));
        self
    }
    /// `host:port` dialed over plain TCP when no connection is given.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub async fn build(self) -> Result<GraphiteClient> {
        let config = self.config.normalized();
        let (reader, writer) = match (self.connection, self.address) {
            (Some(halves), _) => halves,
            (None, Some(addr)) if !addr.is_empty() => {
                let stream = TcpStream::connect(&addr)
                    .await
                    .map_err(|source| Error::Connect {
                        addr: addr.clone(),
                        source,
                    })?;
                debug!(%addr, "connected to Graphite server");
                let (reader, writer) = stream.into_split();
                (Box::new(reader) as BoxReader, Box::new(writer) as BoxWriter)
            }
            _ => return Err(Error::NoAddress),
        };
        Ok(GraphiteClient::from_halves(config, reader, writer))
    }
}
impl core::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("connection", &self.connection.is_some())
            .field("address", &self.address)
            .finish()
    }
}

/// Producer handle onto a client's queue.
#[derive(Debug, Clone)]
pub struct MetricSender {
    buf: Arc<MetricBuf>,
}
impl MetricSender {
    /// Queues one sample, waiting while the queue is full.
    pub async fn send_metric(
        &self,
        key: &MetricKey,
        value: impl Into<String>,
        timestamp: SystemTime,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let sample = Sample::new(key.clone(), value, timestamp)?;
        self.send_sample(sample, cancel).await
    }
    pub async fn send_sample(&self, sample: Sample, cancel: &CancellationToken) -> Result<()> {
        self.buf.push(sample, cancel).await
    }
    pub fn queued(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitStats {
    pub batches_sent: u64,
    pub samples_sent: u64,
    /// Failed write attempts that were followed by another attempt.
    pub write_retries: u64,
    pub failed_batches: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Stopped,
}

/// Batches queued samples onto a Graphite plaintext connection.
///
/// Producers enqueue through [`GraphiteClient::send_metric`] or a
/// [`MetricSender`]; a single task drives [`GraphiteClient::submit`]. Once
/// `submit` returns an error the client is stopped for good.
pub struct GraphiteClient {
    config: ClientConfig,
    buf: Arc<MetricBuf>,
    reader: Option<BoxReader>,
    writer: BoxWriter,
    drain: Option<JoinHandle<()>>,
    state: State,
    stats: SubmitStats,
    message: String,
}
impl GraphiteClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }
    pub fn new(config: ClientConfig, stream: impl MetricStream + 'static) -> Self {
        let (reader, writer) = split_stream(stream);
        Self::from_halves(config, reader, writer)
    }
    pub fn from_halves(
        config: ClientConfig,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let config = config.normalized();
        let reader: BoxReader = Box::new(reader);
        let writer: BoxWriter = Box::new(writer);
        Self {
            buf: Arc::new(MetricBuf::new(config.max_buffer_size)),
            config,
            reader: Some(reader),
            writer,
            drain: None,
            state: State::Running,
            stats: SubmitStats::default(),
            message: String::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
    pub fn stats(&self) -> SubmitStats {
        self.stats
    }
    pub fn is_stopped(&self) -> bool {
        self.state == State::Stopped
    }
    pub fn queued(&self) -> usize {
        self.buf.len()
    }
    pub fn sender(&self) -> MetricSender {
        MetricSender {
            buf: self.buf.clone(),
        }
    }

    pub async fn send_metric(
        &self,
        key: &MetricKey,
        value: impl Into<String>,
        timestamp: SystemTime,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let sample = Sample::new(key.clone(), value, timestamp)?;
        self.buf.push(sample, cancel).await
    }

    /// Writes batches until `cancel` fires or a batch exhausts its write
    /// attempts.
    pub async fn submit(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            self.submit_batch(cancel).await?;
        }
    }

    /// Waits for one batch and writes it. Returns the number of samples
    /// written. Any error stops the client.
    pub async fn submit_batch(&mut self, cancel: &CancellationToken) -> Result<usize> {
        if self.state == State::Stopped {
            return Err(Error::Stopped);
        }
        self.start_drain(cancel);
        let res = self.write_next_batch(cancel).await;
        if let Err(e) = &res {
            self.stop(e);
        }
        res
    }

    async fn write_next_batch(&mut self, cancel: &CancellationToken) -> Result<usize> {
        let batch = self
            .buf
            .pop_batch(self.config.max_metrics_per_message, cancel)
            .await?;
        self.message.clear();
        encode_batch(&mut self.message, &batch);
        if let Err(e) = self.write_with_retry(cancel).await {
            self.stats.failed_batches += 1;
            return Err(e);
        }
        let n = batch.len();
        self.stats.batches_sent += 1;
        self.stats.samples_sent += n as u64;
        debug!(samples = n, bytes = self.message.len(), "wrote metrics");
        Ok(n)
    }

    /// Attempts resume after the last byte the stream accepted, so a partial
    /// write is never repeated. Cancellation only interrupts a pending write.
    async fn write_with_retry(&mut self, cancel: &CancellationToken) -> Result<()> {
        let max_tries = self.config.max_tries;
        let message = self.message.as_bytes();
        let mut written = 0;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let res = tokio::select! {
                biased;
                res = write_remaining(&mut self.writer, message, &mut written) => res,
                () = cancel.cancelled() => return Err(Error::Cancelled),
            };
            let e = match res {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if attempt >= max_tries {
                return Err(Error::WriteExhausted {
                    attempts: attempt,
                    source: e,
                });
            }
            warn!(attempt, max_tries, written, error = %e, "failed to write metrics; retrying");
            self.stats.write_retries += 1;
            if !self.config.retry_delay.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }
        }
    }

    /// Inbound bytes are not part of the protocol; some servers send banners.
    fn start_drain(&mut self, cancel: &CancellationToken) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        let cancel = cancel.clone();
        self.drain = Some(tokio::spawn(drain_inbound(reader, cancel)));
    }

    fn stop(&mut self, e: &Error) {
        self.state = State::Stopped;
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        match e {
            Error::Cancelled => debug!("metric submission cancelled"),
            e => error!(error = %e, "metric submission stopped"),
        }
    }
}
impl Drop for GraphiteClient {
    fn drop(&mut self) {
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}
impl core::fmt::Debug for GraphiteClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GraphiteClient")
            .field("config", &self.config)
            .field("queued", &self.buf.len())
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

async fn write_remaining<W>(wtr: &mut W, message: &[u8], written: &mut usize) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while *written < message.len() {
        let n = wtr.write(&message[*written..]).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        *written += n;
    }
    wtr.flush().await
}

async fn drain_inbound<R>(mut rdr: R, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0; DRAIN_BUF_SIZE];
    loop {
        let res = tokio::select! {
            () = cancel.cancelled() => return,
            res = rdr.read(&mut buf) => res,
        };
        match res {
            Ok(0) => {
                debug!("Graphite server closed its sending side");
                return;
            }
            Ok(n) => {
                trace!(
                    bytes = n,
                    data = %String::from_utf8_lossy(&buf[..n]),
                    "discarding inbound bytes",
                );
            }
            Err(e) => {
                debug!(error = %e, "stopped reading from Graphite server");
                return;
            }
        }
    }
}
