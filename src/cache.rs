//! Request-coalescing metadata cache
//!
//! The cache lives in the caller's context and talks to a dispatcher worker
//! over a [`Transport`]. It guarantees:
//!
//! - at most one in-flight request per resource id
//! - every `fetch` callback runs exactly once, never inside `fetch` itself
//! - resolved entries (including failures) are kept until [`MetadataCache::reset`]
//!
//! Callbacks run from [`MetadataCache::pump`] or
//! [`MetadataCache::run_until_idle`], which the owner calls from its event loop.

use crate::{
    dispatcher::StageError,
    error::{Error, Result},
    protocol::{Message, Transport},
    record::MetadataRecord,
    registry::compile_filter_pattern,
};
use regex::Regex;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

/// Outcome delivered to `fetch` callbacks
///
/// Failed extractions resolve to an empty record with `error` set; resources
/// no parser accepts resolve to an empty record with no error.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub record: Arc<MetadataRecord>,
    pub error: Option<StageError>,
}

impl Lookup {
    fn found(record: MetadataRecord) -> Self {
        Self {
            record: Arc::new(record),
            error: None,
        }
    }

    fn failed(error: StageError) -> Self {
        Self {
            record: Arc::new(MetadataRecord::new()),
            error: Some(error),
        }
    }

    fn unsupported() -> Self {
        Self::found(MetadataRecord::new())
    }

    /// True if the pipeline reported a failure
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Callback invoked with the outcome of a `fetch`
pub type Callback = Box<dyn FnOnce(&Lookup)>;

/// State of one resource id
enum CacheEntry {
    /// Waiting for the worker; `ticket` is `None` until the request is sent
    Pending {
        ticket: Option<u64>,
        waiters: Vec<Callback>,
    },
    Resolved(Lookup),
}

/// When released waiters run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Now; only from message handling inside `pump`
    Immediate,
    /// On the next `pump`; required anywhere under `fetch`
    Deferred,
}

/// Coalescing cache in front of a dispatcher worker
pub struct MetadataCache<T: Transport> {
    transport: T,
    /// Combined name filter, known once the worker reports `initialized`
    filter: Option<Regex>,
    entries: HashMap<String, CacheEntry>,
    /// Ids fetched before the filter was known, in fetch order
    queued: Vec<String>,
    deferred: VecDeque<(Callback, Lookup)>,
    next_ticket: u64,
    dispatched: usize,
}

impl<T: Transport> MetadataCache<T> {
    /// Connect to a worker and send `init`
    pub fn new(transport: T) -> Result<Self> {
        Self::with_verbose(transport, false)
    }

    /// Like [`new`](Self::new), asking the worker for verbose diagnostics
    pub fn with_verbose(transport: T, verbose: bool) -> Result<Self> {
        transport.send(&Message::Init { verbose })?;
        Ok(Self {
            transport,
            filter: None,
            entries: HashMap::new(),
            queued: Vec::new(),
            deferred: VecDeque::new(),
            next_ticket: 1,
            dispatched: 0,
        })
    }

    /// Request metadata for `id`; `callback` runs exactly once with the outcome
    pub fn fetch<F>(&mut self, id: &str, callback: F) -> Result<()>
    where
        F: FnOnce(&Lookup) + 'static,
    {
        let callback: Callback = Box::new(callback);
        match self.entries.get_mut(id) {
            Some(CacheEntry::Pending { waiters, .. }) => {
                waiters.push(callback);
                Ok(())
            }
            Some(CacheEntry::Resolved(lookup)) => {
                self.deferred.push_back((callback, lookup.clone()));
                Ok(())
            }
            None => {
                self.entries.insert(
                    id.to_string(),
                    CacheEntry::Pending {
                        ticket: None,
                        waiters: vec![callback],
                    },
                );
                if self.filter.is_some() {
                    self.start(id, Delivery::Deferred)
                } else {
                    self.queued.push(id.to_string());
                    Ok(())
                }
            }
        }
    }

    /// Store the worker's answer for `id` and release every waiter
    ///
    /// Answers whose ticket does not match the live request (e.g. after a
    /// [`reset`](Self::reset)) are dropped.
    pub fn process_result(
        &mut self,
        id: &str,
        ticket: u64,
        result: std::result::Result<MetadataRecord, StageError>,
    ) {
        match self.entries.get(id) {
            Some(CacheEntry::Pending {
                ticket: Some(live), ..
            }) if *live == ticket => {}
            _ => {
                tracing::debug!(id, ticket, "dropping stale metadata reply");
                return;
            }
        }

        let lookup = match result {
            Ok(record) => Lookup::found(record),
            Err(error) => {
                tracing::debug!(id, %error, "metadata extraction failed");
                Lookup::failed(error)
            }
        };
        self.resolve(id, lookup, Delivery::Immediate);
    }

    /// Forget `id`; pending waiters are abandoned, not invoked
    pub fn reset(&mut self, id: &str) {
        self.queued.retain(|queued| queued != id);
        if let Some(CacheEntry::Pending { waiters, .. }) = self.entries.remove(id) {
            if !waiters.is_empty() {
                tracing::warn!(id, waiters = waiters.len(), "abandoning pending metadata request");
            }
        }
    }

    /// Resolved outcome for `id`, if any, without fetching
    pub fn get(&self, id: &str) -> Option<&Lookup> {
        match self.entries.get(id) {
            Some(CacheEntry::Resolved(lookup)) => Some(lookup),
            _ => None,
        }
    }

    /// True while a request for `id` is outstanding
    pub fn is_pending(&self, id: &str) -> bool {
        matches!(self.entries.get(id), Some(CacheEntry::Pending { .. }))
    }

    /// True once the worker's filter has arrived
    pub fn is_initialized(&self) -> bool {
        self.filter.is_some()
    }

    /// Number of requests sent to the worker so far
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Run deferred callbacks and handle every message already received
    ///
    /// Never blocks. Returns the number of callbacks run plus messages handled.
    pub fn pump(&mut self) -> Result<usize> {
        let mut handled = self.run_deferred();
        while let Some(message) = self.transport.try_recv()? {
            self.handle_message(message)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Pump until nothing is pending or deferred, waiting at most `timeout`
    pub fn run_until_idle(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump()?;
            let pending = self
                .entries
                .values()
                .filter(|e| matches!(e, CacheEntry::Pending { .. }))
                .count();
            if pending == 0 && self.deferred.is_empty() {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Protocol(format!(
                    "timed out with {pending} metadata requests pending"
                )));
            }
            if let Some(message) = self.transport.recv_timeout(deadline - now)? {
                self.handle_message(message)?;
            }
        }
    }

    fn handle_message(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Initialized { filter } => {
                self.filter = Some(compile_filter_pattern(&filter)?);
                for id in std::mem::take(&mut self.queued) {
                    self.start(&id, Delivery::Immediate)?;
                }
            }
            Message::Result {
                id,
                ticket,
                metadata,
            } => self.process_result(&id, ticket, Ok(metadata)),
            Message::Error { id, ticket, error } => self.process_result(&id, ticket, Err(error)),
            Message::Log { message } => {
                tracing::info!(target: "media_meta::worker", "{message}");
            }
            Message::Vlog { message } => {
                tracing::debug!(target: "media_meta::worker", "{message}");
            }
            other => {
                tracing::warn!(?other, "unexpected message from metadata worker");
            }
        }
        Ok(())
    }

    /// Send the request for a fresh pending entry, or take the fast path
    fn start(&mut self, id: &str, delivery: Delivery) -> Result<()> {
        let supported = self
            .filter
            .as_ref()
            .map_or(true, |filter| filter.is_match(id));
        if !supported {
            self.resolve(id, Lookup::unsupported(), delivery);
            return Ok(());
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        if let Some(CacheEntry::Pending { ticket: slot, .. }) = self.entries.get_mut(id) {
            *slot = Some(ticket);
        }
        self.dispatched += 1;
        self.transport.send(&Message::Request {
            id: id.to_string(),
            ticket,
        })
    }

    /// Pending -> Resolved, releasing waiters in registration order
    fn resolve(&mut self, id: &str, lookup: Lookup, delivery: Delivery) {
        let previous = self
            .entries
            .insert(id.to_string(), CacheEntry::Resolved(lookup.clone()));
        let Some(CacheEntry::Pending { waiters, .. }) = previous else {
            return;
        };
        match delivery {
            Delivery::Immediate => {
                for waiter in waiters {
                    waiter(&lookup);
                }
            }
            Delivery::Deferred => {
                self.deferred
                    .extend(waiters.into_iter().map(|waiter| (waiter, lookup.clone())));
            }
        }
    }

    fn run_deferred(&mut self) -> usize {
        let mut count = 0;
        while let Some((callback, lookup)) = self.deferred.pop_front() {
            callback(&lookup);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatcher::{FailureKind, Stage},
        protocol::{channel_pair, ChannelTransport},
    };
    use std::{cell::RefCell, rc::Rc};

    type Seen = Rc<RefCell<Vec<Lookup>>>;

    fn recorder(seen: &Seen) -> impl FnOnce(&Lookup) + 'static {
        let seen = Rc::clone(seen);
        move |lookup| seen.borrow_mut().push(lookup.clone())
    }

    /// Cache plus the worker end, already initialized with `filter`
    fn connected(filter: &str) -> (MetadataCache<ChannelTransport>, ChannelTransport) {
        let (host, worker) = channel_pair();
        let mut cache = MetadataCache::new(host).unwrap();
        assert_eq!(worker.recv().unwrap(), Message::Init { verbose: false });
        worker
            .send(&Message::Initialized {
                filter: filter.into(),
            })
            .unwrap();
        cache.pump().unwrap();
        assert!(cache.is_initialized());
        (cache, worker)
    }

    fn expect_request(worker: &ChannelTransport) -> (String, u64) {
        match worker.try_recv().unwrap() {
            Some(Message::Request { id, ticket }) => (id, ticket),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_concurrent_fetches_coalesce() {
        let (mut cache, worker) = connected(r"(?i)\.png$");
        let seen = Seen::default();

        cache.fetch("a.png", recorder(&seen)).unwrap();
        cache.fetch("a.png", recorder(&seen)).unwrap();
        let (id, ticket) = expect_request(&worker);
        assert_eq!(id, "a.png");
        assert!(worker.try_recv().unwrap().is_none(), "second dispatch sent");
        assert_eq!(cache.dispatched(), 1);

        cache.pump().unwrap();
        assert!(seen.borrow().is_empty());

        worker
            .send(&Message::Result {
                id,
                ticket,
                metadata: MetadataRecord::with_dimensions(100, 50),
            })
            .unwrap();
        cache.pump().unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(Arc::ptr_eq(&seen[0].record, &seen[1].record));
        assert_eq!(*seen[0].record, MetadataRecord::with_dimensions(100, 50));
    }

    #[test]
    fn test_resolved_hit_is_deferred_and_shared() {
        let (mut cache, worker) = connected(r"(?i)\.png$");
        let seen = Seen::default();

        cache.fetch("a.png", recorder(&seen)).unwrap();
        let (id, ticket) = expect_request(&worker);
        cache.process_result(&id, ticket, Ok(MetadataRecord::with_dimensions(1, 2)));
        assert_eq!(seen.borrow().len(), 1);

        for _ in 0..3 {
            cache.fetch("a.png", recorder(&seen)).unwrap();
        }
        // Not delivered inside fetch
        assert_eq!(seen.borrow().len(), 1);
        cache.pump().unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|l| Arc::ptr_eq(&l.record, &seen[0].record)));
        assert_eq!(cache.dispatched(), 1);
        assert!(worker.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_unsupported_fast_path() {
        let (mut cache, worker) = connected(r"(?i)\.png$");
        let seen = Seen::default();

        cache.fetch("notes.txt", recorder(&seen)).unwrap();
        assert!(worker.try_recv().unwrap().is_none());
        assert!(seen.borrow().is_empty());

        cache.pump().unwrap();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].record.is_empty());
        assert!(!seen[0].is_error());
        assert_eq!(cache.dispatched(), 0);
    }

    #[test]
    fn test_unsupported_callback_waits_for_pump() {
        let (mut cache, _worker) = connected(r"(?i)\.png$");
        let hit = Rc::new(std::cell::Cell::new(false));

        let flag = Rc::clone(&hit);
        cache.fetch("notes.txt", move |_| flag.set(true)).unwrap();
        assert!(!hit.get(), "callback ran inside fetch");
        // Already resolved, only delivery is pending
        assert!(cache.get("notes.txt").is_some());

        // A second caller in the same turn is deferred too
        let seen = Seen::default();
        cache.fetch("notes.txt", recorder(&seen)).unwrap();
        assert!(seen.borrow().is_empty());

        assert_eq!(cache.pump().unwrap(), 2);
        assert!(hit.get());
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_fetch_before_initialized_is_queued() {
        let (host, worker) = channel_pair();
        let mut cache = MetadataCache::new(host).unwrap();
        let seen = Seen::default();

        cache.fetch("a.png", recorder(&seen)).unwrap();
        cache.fetch("b.txt", recorder(&seen)).unwrap();
        assert!(cache.is_pending("a.png"));
        assert_eq!(worker.recv().unwrap(), Message::Init { verbose: false });
        assert!(worker.try_recv().unwrap().is_none());

        worker
            .send(&Message::Initialized {
                filter: r"(?i)\.png$".into(),
            })
            .unwrap();
        cache.pump().unwrap();

        assert_eq!(expect_request(&worker).0, "a.png");
        // The unsupported one resolved as soon as the filter arrived
        assert_eq!(seen.borrow().len(), 1);
        assert!(cache.get("b.txt").is_some());
    }

    #[test]
    fn test_error_resolves_to_empty_record_with_detail() {
        let (mut cache, worker) = connected(r"(?i)\.png$");
        let seen = Seen::default();

        cache.fetch("bad.png", recorder(&seen)).unwrap();
        let (id, ticket) = expect_request(&worker);
        worker
            .send(&Message::Error {
                id,
                ticket,
                error: StageError::new(Stage::GetEntry, &Error::NotFound("bad.png".into())),
            })
            .unwrap();
        cache.pump().unwrap();

        let lookup = cache.get("bad.png").unwrap();
        assert!(lookup.record.is_empty());
        let error = lookup.error.as_ref().unwrap();
        assert_eq!(error.stage, Stage::GetEntry);
        assert_eq!(error.kind, FailureKind::NotFound);

        // Not retried
        cache.fetch("bad.png", recorder(&seen)).unwrap();
        cache.pump().unwrap();
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(cache.dispatched(), 1);
    }

    #[test]
    fn test_reset_abandons_waiters_and_drops_stale_reply() {
        let (mut cache, worker) = connected(r"(?i)\.png$");
        let stale = Seen::default();
        let fresh = Seen::default();

        cache.fetch("a.png", recorder(&stale)).unwrap();
        let (_, old_ticket) = expect_request(&worker);
        cache.reset("a.png");
        assert!(!cache.is_pending("a.png"));

        cache.fetch("a.png", recorder(&fresh)).unwrap();
        let (_, new_ticket) = expect_request(&worker);
        assert_ne!(old_ticket, new_ticket);

        cache.process_result("a.png", old_ticket, Ok(MetadataRecord::with_dimensions(1, 1)));
        assert!(cache.is_pending("a.png"));

        cache.process_result("a.png", new_ticket, Ok(MetadataRecord::with_dimensions(2, 2)));
        assert!(stale.borrow().is_empty());
        assert_eq!(fresh.borrow()[0].record.width, Some(2));
    }

    #[test]
    fn test_reset_resolved_entry_refetches() {
        let (mut cache, worker) = connected(r"(?i)\.png$");
        cache.fetch("a.png", |_| {}).unwrap();
        let (id, ticket) = expect_request(&worker);
        cache.process_result(&id, ticket, Ok(MetadataRecord::new()));

        cache.reset("a.png");
        assert!(cache.get("a.png").is_none());
        cache.fetch("a.png", |_| {}).unwrap();
        expect_request(&worker);
        assert_eq!(cache.dispatched(), 2);
    }

    #[test]
    fn test_run_until_idle_times_out() {
        let (mut cache, _worker) = connected(r"(?i)\.png$");
        cache.fetch("a.png", |_| {}).unwrap();
        let result = cache.run_until_idle(Duration::from_millis(20));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
