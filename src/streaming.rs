//! Streaming refresh engine — fans the event stream out to materialized
//! views.
//!
//! Handlers declare the namespaces they consume; the engine routes each
//! published event to every matching handler, groups routed events into
//! batches of up to `batch_size` or `batch_timeout_ms`, and invokes each
//! handler sequentially (per handler; distinct handlers are independent).
//!
//! Handler failures surface through error listeners, never as panics or
//! lost batches. `dispose()` drains buffers, drops every handler and
//! listener, and resets statistics — the engine is reusable afterwards,
//! and listener sets never accumulate across dispose cycles (the
//! memory-leak invariant the tests pin down).
//!
//! Scheduling is cooperative: batch timeouts fire on [`StreamingEngine::tick`],
//! which callers pump from their own loop. Callbacks run while the engine
//! lock is held — they must not call back into the engine.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, warn};

use loam_core::model::{Event, Namespace};

// ---------------------------------------------------------------------------
// MvHandler
// ---------------------------------------------------------------------------

/// A materialized-view consumer of the event stream.
pub trait MvHandler: Send {
    /// Stable handler name (for diagnostics and error reports).
    fn name(&self) -> &str;

    /// The namespaces this handler consumes.
    fn source_namespaces(&self) -> Vec<Namespace>;

    /// Process one batch of routed events.
    ///
    /// # Errors
    /// A message describing the failure; the engine reports it to error
    /// listeners and keeps going.
    fn process(&mut self, events: &[Event]) -> Result<(), String>;
}

// ---------------------------------------------------------------------------
// Engine types
// ---------------------------------------------------------------------------

/// Batching knobs.
#[derive(Clone, Copy, Debug)]
pub struct StreamingOptions {
    /// Flush a handler's buffer at this many events.
    pub batch_size: usize,
    /// Flush a handler's buffer after this long, on `tick()`.
    pub batch_timeout_ms: u64,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout_ms: 1_000,
        }
    }
}

/// A handler failure, as reported to error listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineError {
    /// The failing handler's name.
    pub handler: String,
    /// The handler's error message.
    pub message: String,
}

/// A non-fatal condition, as reported to warning listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineWarning {
    /// What happened.
    pub message: String,
}

/// Engine counters. Reset by `dispose()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Events accepted by `publish`.
    pub events_received: u64,
    /// Batches handed to handlers.
    pub batches_processed: u64,
    /// Handler invocations that returned an error.
    pub handler_errors: u64,
}

/// Token returned by `on_error` / `on_warning`; pass to `unsubscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type ErrorListener = Box<dyn Fn(&EngineError) + Send>;
type WarningListener = Box<dyn Fn(&EngineWarning) + Send>;

// ---------------------------------------------------------------------------
// StreamingEngine
// ---------------------------------------------------------------------------

struct HandlerEntry {
    handler: Box<dyn MvHandler>,
    namespaces: Vec<Namespace>,
    buffer: Vec<Event>,
    last_flush: Instant,
}

struct EngineInner {
    handlers: Vec<HandlerEntry>,
    error_listeners: Vec<(u64, ErrorListener)>,
    warning_listeners: Vec<(u64, WarningListener)>,
    next_subscription: u64,
    stats: EngineStats,
}

/// The batched fan-out engine.
pub struct StreamingEngine {
    opts: StreamingOptions,
    inner: Mutex<EngineInner>,
}

impl fmt::Debug for StreamingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingEngine").finish_non_exhaustive()
    }
}

impl StreamingEngine {
    /// Create an engine with the given batching options.
    #[must_use]
    pub fn new(opts: StreamingOptions) -> Self {
        Self {
            opts,
            inner: Mutex::new(EngineInner {
                handlers: Vec::new(),
                error_listeners: Vec::new(),
                warning_listeners: Vec::new(),
                next_subscription: 1,
                stats: EngineStats::default(),
            }),
        }
    }

    /// Register a handler.
    pub fn register(&self, handler: Box<dyn MvHandler>) {
        let namespaces = handler.source_namespaces();
        debug!(handler = handler.name(), ?namespaces, "handler registered");
        self.lock().handlers.push(HandlerEntry {
            handler,
            namespaces,
            buffer: Vec::new(),
            last_flush: Instant::now(),
        });
    }

    /// How many handlers are registered.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Route events into handler buffers, flushing any buffer that
    /// reaches `batch_size`.
    pub fn publish(&self, events: &[Event]) {
        let mut inner = self.lock();
        inner.stats.events_received += events.len() as u64;
        let batch_size = self.opts.batch_size;
        for event in events {
            let mut routed = false;
            for entry in &mut inner.handlers {
                if entry.namespaces.contains(&event.target.ns) {
                    entry.buffer.push(event.clone());
                    routed = true;
                }
            }
            if !routed && !inner.handlers.is_empty() {
                Self::emit_warning(
                    &inner.warning_listeners,
                    &EngineWarning {
                        message: format!("no handler consumes namespace '{}'", event.target.ns),
                    },
                );
            }
        }
        Self::drain_ready(&mut inner, batch_size, false, None);
    }

    /// Flush buffers whose batch timeout has elapsed. Call from the host
    /// loop.
    pub fn tick(&self) {
        let mut inner = self.lock();
        Self::drain_ready(&mut inner, self.opts.batch_size, false, Some(self.opts.batch_timeout_ms));
    }

    /// Flush every non-empty buffer now.
    pub fn flush(&self) {
        let mut inner = self.lock();
        Self::drain_ready(&mut inner, self.opts.batch_size, true, None);
    }

    /// Subscribe to handler errors. Returns a token for `unsubscribe`.
    pub fn on_error(&self, listener: impl Fn(&EngineError) + Send + 'static) -> Subscription {
        let mut inner = self.lock();
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.error_listeners.push((id, Box::new(listener)));
        Subscription(id)
    }

    /// Subscribe to warnings. Returns a token for `unsubscribe`.
    pub fn on_warning(&self, listener: impl Fn(&EngineWarning) + Send + 'static) -> Subscription {
        let mut inner = self.lock();
        let id = inner.next_subscription;
        inner.next_subscription += 1;
        inner.warning_listeners.push((id, Box::new(listener)));
        Subscription(id)
    }

    /// Drop one listener (error or warning).
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut inner = self.lock();
        inner.error_listeners.retain(|(id, _)| *id != subscription.0);
        inner.warning_listeners.retain(|(id, _)| *id != subscription.0);
    }

    /// Drop every error listener.
    pub fn remove_all_error_listeners(&self) {
        self.lock().error_listeners.clear();
    }

    /// Drop every warning listener.
    pub fn remove_all_warning_listeners(&self) {
        self.lock().warning_listeners.clear();
    }

    /// Registered error listeners (observable for the leak invariant).
    #[must_use]
    pub fn error_listener_count(&self) -> usize {
        self.lock().error_listeners.len()
    }

    /// Registered warning listeners.
    #[must_use]
    pub fn warning_listener_count(&self) -> usize {
        self.lock().warning_listeners.len()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.lock().stats
    }

    /// Flush buffers, drop all handlers and listeners, reset statistics.
    /// Idempotent; the engine is reusable afterwards.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        Self::drain_ready(&mut inner, self.opts.batch_size, true, None);
        inner.handlers.clear();
        inner.error_listeners.clear();
        inner.warning_listeners.clear();
        inner.stats = EngineStats::default();
        debug!("streaming engine disposed");
    }

    // -- internals --

    /// Hand ready buffers to their handlers.
    ///
    /// Full chunks of `batch_size` always flush. A partial tail flushes
    /// when `force` is set, or when `timeout_ms` is given and the entry's
    /// batch timeout has elapsed.
    fn drain_ready(inner: &mut EngineInner, batch_size: usize, force: bool, timeout_ms: Option<u64>) {
        let batch_size = batch_size.max(1);
        // Split borrows: handlers are mutated, listeners only read.
        let EngineInner {
            handlers,
            error_listeners,
            stats,
            ..
        } = inner;
        for entry in handlers.iter_mut() {
            loop {
                let batch = if entry.buffer.len() >= batch_size {
                    entry.buffer.drain(..batch_size).collect::<Vec<Event>>()
                } else if !entry.buffer.is_empty()
                    && (force
                        || timeout_ms
                            .is_some_and(|t| entry.last_flush.elapsed().as_millis() as u64 >= t))
                {
                    std::mem::take(&mut entry.buffer)
                } else {
                    break;
                };
                entry.last_flush = Instant::now();
                stats.batches_processed += 1;
                if let Err(message) = entry.handler.process(&batch) {
                    stats.handler_errors += 1;
                    warn!(handler = entry.handler.name(), message, "handler failed");
                    let error = EngineError {
                        handler: entry.handler.name().to_owned(),
                        message,
                    };
                    for (_, listener) in error_listeners.iter() {
                        listener(&error);
                    }
                }
            }
        }
    }

    fn emit_warning(listeners: &[(u64, WarningListener)], warning: &EngineWarning) {
        for (_, listener) in listeners {
            listener(warning);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
