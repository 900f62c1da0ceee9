use std::{
    collections::VecDeque,
    io,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

#[derive(Debug, Clone, Copy)]
enum Step {
    Fail,
    /// Accept at most this many bytes of the write.
    Accept(usize),
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<Step>,
    attempts: usize,
    messages: Vec<String>,
}

/// Inspects what a [`ScriptedStream`] was asked to write.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    script: Arc<Mutex<Script>>,
}
impl Transcript {
    /// Every write call, failed or not.
    pub fn attempts(&self) -> usize {
        self.script.lock().unwrap().attempts
    }
    /// Payloads of the successful write calls.
    pub fn messages(&self) -> Vec<String> {
        self.script.lock().unwrap().messages.clone()
    }
    /// Everything the server received, in order.
    pub fn wire(&self) -> String {
        self.script.lock().unwrap().messages.concat()
    }
}

/// Stream that plays scripted write outcomes, then accepts every write in
/// full. Reads never complete.
#[derive(Debug)]
pub struct ScriptedStream {
    script: Arc<Mutex<Script>>,
}
impl ScriptedStream {
    fn scripted(steps: impl IntoIterator<Item = Step>) -> (Self, Transcript) {
        let transcript = Transcript::default();
        transcript.script.lock().unwrap().steps = steps.into_iter().collect();
        let stream = Self {
            script: transcript.script.clone(),
        };
        (stream, transcript)
    }
    /// The first `failures` writes fail with `BrokenPipe`.
    pub fn failing(failures: usize) -> (Self, Transcript) {
        Self::scripted(std::iter::repeat(Step::Fail).take(failures))
    }
    /// The first write takes only `accepted` bytes and the one after it
    /// fails.
    pub fn cut_short(accepted: usize) -> (Self, Transcript) {
        Self::scripted([Step::Accept(accepted), Step::Fail])
    }
    pub fn healthy() -> (Self, Transcript) {
        Self::failing(0)
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut script = self.script.lock().unwrap();
        script.attempts += 1;
        let n = match script.steps.pop_front() {
            Some(Step::Fail) => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "scripted write failure",
                )));
            }
            Some(Step::Accept(limit)) => buf.len().min(limit),
            None => buf.len(),
        };
        script
            .messages
            .push(String::from_utf8_lossy(&buf[..n]).into_owned());
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
