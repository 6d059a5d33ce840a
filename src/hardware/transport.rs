//! Line-oriented instrument transports.
//!
//! Both vendor buses used here speak newline-terminated ASCII: SCPI over a raw
//! TCP socket (LXI "SCPI-RAW", port 5025) and the TTi RS-232 interface. The
//! drivers only see the [`Transport`] trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default SCPI-RAW port.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Default command timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// A command channel to one instrument.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query and return the trimmed response line.
    async fn query(&self, query: &str) -> Result<String>;

    /// Shut the channel down. Further writes fail.
    async fn close(&self) -> Result<()>;
}

/// Newline-terminated transport over any async byte stream.
pub struct LineTransport<S> {
    stream: Mutex<Option<BufReader<S>>>,
    terminator: &'static str,
    timeout: Duration,
    label: String,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already open stream.
    pub fn new(stream: S, terminator: &'static str, label: impl Into<String>) -> Self {
        Self {
            stream: Mutex::new(Some(BufReader::new(stream))),
            terminator,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            label: label.into(),
        }
    }

    /// Set the response timeout.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    async fn send(stream: &mut BufReader<S>, line: &str) -> Result<()> {
        stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write command: {}", line.trim()))?;
        stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")
    }
}

#[async_trait]
impl<S> Transport for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&self, command: &str) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .with_context(|| format!("{} is closed", self.label))?;

        tracing::debug!(target: "funcgen::wire", bus = %self.label, "write: {:?}", command);
        Self::send(stream, &format!("{}{}", command, self.terminator)).await
    }

    async fn query(&self, query: &str) -> Result<String> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .with_context(|| format!("{} is closed", self.label))?;

        tracing::debug!(target: "funcgen::wire", bus = %self.label, "query: {:?}", query);
        Self::send(stream, &format!("{}{}", query, self.terminator)).await?;

        let mut response = String::new();
        match timeout(self.timeout, stream.read_line(&mut response)).await {
            Ok(Ok(0)) => anyhow::bail!("Connection closed by {}", self.label),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!(target: "funcgen::wire", bus = %self.label, "response: {:?}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e).context("Failed to read response"),
            Err(_) => anyhow::bail!("Timeout waiting for response to: {}", query),
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream
                .get_mut()
                .shutdown()
                .await
                .with_context(|| format!("Failed to close {}", self.label))?;
            tracing::info!("Closed {}", self.label);
        }
        Ok(())
    }
}

/// SCPI over a raw TCP socket.
pub type TcpTransport = LineTransport<TcpStream>;

impl TcpTransport {
    /// Connect to `host[:port]`, defaulting to [`DEFAULT_SCPI_PORT`].
    pub async fn connect(resource: &str, connect_timeout: Duration) -> Result<Self> {
        let address = if resource.contains(':') {
            resource.to_string()
        } else {
            format!("{}:{}", resource, DEFAULT_SCPI_PORT)
        };

        let stream = timeout(connect_timeout, TcpStream::connect(&address))
            .await
            .with_context(|| format!("Connection timeout to {}", address))?
            .with_context(|| format!("Failed to connect to {}", address))?;
        stream.set_nodelay(true)?;

        tracing::info!("Connected to SCPI instrument at {}", address);
        Ok(LineTransport::new(stream, "\n", format!("tcp://{}", address)))
    }
}

/// In-memory transport for driver tests.
///
/// Records every write and query in order and answers queries from a table of
/// canned responses (falling back to a FIFO of one-shot replies).
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    log: Vec<String>,
    responses: HashMap<String, String>,
    replies: VecDeque<String>,
    fail_on: Option<String>,
    closed: bool,
}

impl MockTransport {
    /// Transport with no canned responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `query` with `response`.
    pub async fn respond(&self, query: &str, response: &str) {
        self.inner
            .lock()
            .await
            .responses
            .insert(query.to_string(), response.to_string());
    }

    /// Queue a one-shot reply for the next query without a canned response.
    pub async fn push_reply(&self, response: &str) {
        self.inner.lock().await.replies.push_back(response.to_string());
    }

    /// Fail any command starting with `prefix`.
    pub async fn fail_on(&self, prefix: &str) {
        self.inner.lock().await.fail_on = Some(prefix.to_string());
    }

    /// Everything sent so far, in order.
    pub async fn sent(&self) -> Vec<String> {
        self.inner.lock().await.log.clone()
    }

    /// Forget what was sent so far.
    pub async fn clear(&self) {
        self.inner.lock().await.log.clear();
    }

    /// Whether `close` was called.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    fn check(state: &MockState, command: &str) -> Result<()> {
        if state.closed {
            anyhow::bail!("mock transport is closed");
        }
        if let Some(prefix) = &state.fail_on {
            if command.starts_with(prefix.as_str()) {
                anyhow::bail!("injected failure on {}", command);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&self, command: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        Self::check(&state, command)?;
        state.log.push(command.to_string());
        Ok(())
    }

    async fn query(&self, query: &str) -> Result<String> {
        let mut state = self.inner.lock().await;
        Self::check(&state, query)?;
        state.log.push(query.to_string());
        if let Some(response) = state.responses.get(query) {
            return Ok(response.clone());
        }
        state
            .replies
            .pop_front()
            .with_context(|| format!("Timeout waiting for response to: {}", query))
    }

    async fn close(&self) -> Result<()> {
        self.inner.lock().await.closed = true;
        Ok(())
    }
}
