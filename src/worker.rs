//! Dispatcher actor running on its own thread
//!
//! The worker owns a [`Dispatcher`] and one end of a [`Transport`]. It
//! handles one message at a time until the host end goes away.

use crate::{
    dispatcher::Dispatcher,
    error::{Error, Result},
    protocol::{channel_pair, ChannelTransport, Message, Transport},
};
use std::thread::JoinHandle;

/// Runtime options for a spawned worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    verbose: bool,
    thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            thread_name: "metadata-dispatcher".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `vlog` messages even if the host does not ask for them
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Name of the worker thread
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Message loop around a dispatcher
pub struct DispatcherWorker<T: Transport> {
    dispatcher: Dispatcher,
    transport: T,
    verbose: bool,
}

impl<T: Transport> DispatcherWorker<T> {
    pub fn new(dispatcher: Dispatcher, transport: T) -> Self {
        Self {
            dispatcher,
            transport,
            verbose: false,
        }
    }

    fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Main event loop; returns when the host end is closed
    pub fn run(mut self) -> Result<()> {
        loop {
            let message = match self.transport.recv() {
                Ok(message) => message,
                Err(Error::Protocol(_)) => break,
                Err(e) => {
                    // Undecodable message; report and keep serving
                    if self.log(format!("dropping malformed message: {e}")).is_err() {
                        break;
                    }
                    continue;
                }
            };
            if let Err(e) = self.handle(message) {
                if matches!(e, Error::Protocol(_)) {
                    break;
                }
                return Err(e);
            }
        }
        tracing::debug!("dispatcher worker shutdown");
        Ok(())
    }

    /// Handle a single message
    pub fn handle(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Init { verbose } => {
                self.verbose |= verbose;
                let filter = self.dispatcher.filter_pattern();
                self.vlog(format!(
                    "initialized with {} parsers",
                    self.dispatcher.registry().descriptors().len()
                ))?;
                self.transport.send(&Message::Initialized { filter })
            }
            Message::Request { id, ticket } => {
                self.vlog(format!("processing {id}"))?;
                let reply = match self.dispatcher.process_one(&id) {
                    Ok(metadata) => Message::Result {
                        id,
                        ticket,
                        metadata,
                    },
                    Err(error) => {
                        self.log(format!("{id}: {error}"))?;
                        Message::Error { id, ticket, error }
                    }
                };
                self.transport.send(&reply)
            }
            other => self.log(format!("unexpected message {other:?}")),
        }
    }

    fn log(&self, message: String) -> Result<()> {
        self.transport.send(&Message::Log { message })
    }

    fn vlog(&self, message: String) -> Result<()> {
        if self.verbose {
            self.transport.send(&Message::Vlog { message })?;
        }
        Ok(())
    }
}

/// Join handle of a spawned worker
#[derive(Debug)]
pub struct WorkerHandle {
    thread: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    /// Wait for the worker to exit (after the host transport is dropped)
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| Error::Protocol("dispatcher worker panicked".into()))?
    }
}

/// Start a worker thread; returns the host end of its channel
pub fn spawn_worker(
    dispatcher: Dispatcher,
    config: WorkerConfig,
) -> Result<(ChannelTransport, WorkerHandle)> {
    let (host, worker_end) = channel_pair();
    let worker = DispatcherWorker::new(dispatcher, worker_end).with_verbose(config.verbose);
    let thread = std::thread::Builder::new()
        .name(config.thread_name)
        .spawn(move || worker.run())?;
    Ok((host, WorkerHandle { thread }))
}
