//! Per-worker notification pipes
//!
//! Every worker owns the read end of a private pipe. Workers it must
//! unblock hold clones of the write end and send one acknowledgement once
//! they settle. Acks travel as text records `"<source index>:<code>@"`;
//! one chunk may carry several records and a record may span chunks.

use crate::graph::VertexId;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Record terminator
const TERMINATOR: u8 = b'@';

/// How a vertex settled, as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCode {
    Up,
    Down,
    Reloaded,
    Fatal,
}

impl OutcomeCode {
    pub fn as_char(self) -> char {
        match self {
            OutcomeCode::Up => 'u',
            OutcomeCode::Down => 'd',
            OutcomeCode::Reloaded => 'r',
            OutcomeCode::Fatal => 'f',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'u' => Some(OutcomeCode::Up),
            'd' => Some(OutcomeCode::Down),
            'r' => Some(OutcomeCode::Reloaded),
            'f' => Some(OutcomeCode::Fatal),
            _ => None,
        }
    }

    pub fn is_fatal(self) -> bool {
        self == OutcomeCode::Fatal
    }
}

/// Acknowledgement sent by a settled vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub source: VertexId,
    pub code: OutcomeCode,
}

impl Ack {
    pub fn new(source: VertexId, code: OutcomeCode) -> Self {
        Self { source, code }
    }

    /// Encode as a wire record
    pub fn encode(&self) -> String {
        format!("{}:{}@", self.source, self.code.as_char())
    }

    /// Parse one record without its terminator
    fn parse(record: &[u8]) -> Result<Self, NotifyError> {
        let malformed = || NotifyError::Malformed(String::from_utf8_lossy(record).into_owned());

        let text = std::str::from_utf8(record).map_err(|_| malformed())?;
        let (index, code) = text.split_once(':').ok_or_else(malformed)?;
        let index: u32 = index.parse().map_err(|_| malformed())?;

        let mut chars = code.chars();
        let code = match (chars.next(), chars.next()) {
            (Some(c), None) => OutcomeCode::from_char(c).ok_or_else(malformed)?,
            _ => return Err(malformed()),
        };

        Ok(Self::new(VertexId::new(index), code))
    }
}

/// Incremental decoder for a stream of ack records
#[derive(Debug, Default)]
pub struct AckDecoder {
    buf: Vec<u8>,
}

impl AckDecoder {
    /// Feed a chunk and return every complete record it finished
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Ack>, NotifyError> {
        self.buf.extend_from_slice(chunk);

        let mut acks = Vec::new();
        while let Some(end) = self.buf.iter().position(|&b| b == TERMINATOR) {
            let record: Vec<u8> = self.buf.drain(..=end).collect();
            acks.push(Ack::parse(&record[..record.len() - 1])?);
        }
        Ok(acks)
    }

    /// Bytes of an unfinished record
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Create a notification pipe
pub fn pipe() -> (NotifySender, NotifyReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        NotifySender { tx },
        NotifyReceiver {
            rx,
            decoder: AckDecoder::default(),
            ready: VecDeque::new(),
        },
    )
}

/// Write end of a pipe
#[derive(Debug, Clone)]
pub struct NotifySender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl NotifySender {
    pub fn send(&self, ack: Ack) -> Result<(), NotifyError> {
        self.send_raw(ack.encode().into_bytes())
    }

    /// Send bytes as-is
    pub fn send_raw(&self, bytes: Vec<u8>) -> Result<(), NotifyError> {
        self.tx.send(bytes).map_err(|_| NotifyError::Closed)
    }
}

/// Read end of a pipe, owned by exactly one worker
#[derive(Debug)]
pub struct NotifyReceiver {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    decoder: AckDecoder,
    ready: VecDeque<Ack>,
}

impl NotifyReceiver {
    /// Wait for the next acknowledgement
    pub async fn recv(&mut self) -> Result<Ack, NotifyError> {
        loop {
            if let Some(ack) = self.ready.pop_front() {
                return Ok(ack);
            }
            let chunk = self.rx.recv().await.ok_or(NotifyError::Closed)?;
            self.ready.extend(self.decoder.feed(&chunk)?);
        }
    }
}

/// Errors on a notification pipe
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("Malformed notification record '{0}'")]
    Malformed(String),

    #[error("Notification pipe closed")]
    Closed,
}
