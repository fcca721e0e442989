//! Messages exchanged between the cache and the dispatcher worker
//!
//! Every message is encoded as JSON text before it crosses the channel, so
//! the two sides never share memory. `log` and `vlog` are diagnostic only.

use crate::{
    dispatcher::StageError,
    error::{Error, Result},
    record::MetadataRecord,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
    time::Duration,
};

/// One protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "camelCase")]
pub enum Message {
    /// Host to worker: start up; `verbose` enables `vlog` output
    Init {
        #[serde(default)]
        verbose: bool,
    },
    /// Worker to host: ready, with the combined name filter
    Initialized { filter: String },
    /// Host to worker: extract metadata for `id`
    Request { id: String, ticket: u64 },
    /// Worker to host: extraction succeeded
    Result {
        id: String,
        ticket: u64,
        metadata: MetadataRecord,
    },
    /// Worker to host: a pipeline stage failed
    Error {
        id: String,
        ticket: u64,
        error: StageError,
    },
    /// Worker to host: diagnostic line
    Log { message: String },
    /// Worker to host: verbose diagnostic line
    Vlog { message: String },
}

impl Message {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Bidirectional asynchronous message channel
pub trait Transport: Send {
    /// Queue a message for the other side
    fn send(&self, message: &Message) -> Result<()>;

    /// Next message if one is already waiting
    fn try_recv(&self) -> Result<Option<Message>>;

    /// Wait up to `timeout` for the next message
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>>;

    /// Wait for the next message
    fn recv(&self) -> Result<Message>;
}

/// One end of an in-process channel carrying JSON text
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Sender<String>,
    rx: Receiver<String>,
}

/// Create two connected endpoints
pub fn channel_pair() -> (ChannelTransport, ChannelTransport) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    (
        ChannelTransport { tx: a_tx, rx: a_rx },
        ChannelTransport { tx: b_tx, rx: b_rx },
    )
}

fn closed() -> Error {
    Error::Protocol("channel closed".into())
}

impl Transport for ChannelTransport {
    fn send(&self, message: &Message) -> Result<()> {
        self.tx.send(message.to_json()?).map_err(|_| closed())
    }

    fn try_recv(&self) -> Result<Option<Message>> {
        match self.rx.try_recv() {
            Ok(text) => Message::from_json(&text).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(closed()),
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        match self.rx.recv_timeout(timeout) {
            Ok(text) => Message::from_json(&text).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(closed()),
        }
    }

    fn recv(&self) -> Result<Message> {
        let text = self.rx.recv().map_err(|_| closed())?;
        Message::from_json(&text)
    }
}
