//! # Event manager and its asynchronous delivery worker.
//!
//! [`EventManager`] hands out [`ListenerQueue`]s and owns at most one [`Worker`]:
//! a dedicated OS thread running a single-threaded tokio runtime that drains an
//! unbounded channel of `(snapshot, event)` deliveries.
//!
//! ```text
//! Worker::post ──► [mpsc unbounded] ──► worker thread ──► snapshot.deliver(event)
//!                                            ▲
//! EventManager::close ──► CancellationToken ─┘ (drains what is queued, then exits)
//! ```
//!
//! ## Rules
//! - The worker starts lazily on the first asynchronous dispatch; starting is idempotent.
//! - Deliveries posted from one thread run in posting order.
//! - After `close()`, `new_queue()` fails with [`EventError::Closed`] and `post()`
//!   fails with [`EventError::NotRunning`].
//! - `close()` joins the worker thread unless it is called from that thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::EventError;
use crate::events::{Event, ListenerQueue, ListenerSnapshot};

/// One unit of asynchronous work.
struct Delivery {
    snapshot: ListenerSnapshot,
    event: Event,
}

/// Background delivery thread.
pub struct Worker {
    name: String,
    tx: mpsc::UnboundedSender<Delivery>,
    token: CancellationToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn spawn(name: &str) -> Result<Arc<Self>, EventError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let token = CancellationToken::new();
        let stop = token.clone();

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| EventError::Spawn(e.to_string()))?;

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                rt.block_on(async move {
                    loop {
                        tokio::select! {
                            biased;
                            item = rx.recv() => match item {
                                Some(Delivery { snapshot, event }) => snapshot.deliver(&event),
                                None => break,
                            },
                            _ = stop.cancelled() => break,
                        }
                    }
                });
                tracing::debug!("event worker exited");
            })
            .map_err(|e| EventError::Spawn(e.to_string()))?;

        tracing::debug!(thread = name, "event worker started");
        Ok(Arc::new(Self {
            name: name.to_string(),
            tx,
            token,
            thread: Mutex::new(Some(handle)),
        }))
    }

    /// Enqueues `event` for delivery to `snapshot` on the worker thread.
    ///
    /// Fails with [`EventError::NotRunning`] once the worker was stopped.
    pub fn post(&self, snapshot: ListenerSnapshot, event: Event) -> Result<(), EventError> {
        if self.token.is_cancelled() {
            return Err(EventError::NotRunning);
        }
        self.tx
            .send(Delivery { snapshot, event })
            .map_err(|_| EventError::NotRunning)
    }

    /// Returns `true` while the worker accepts deliveries.
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.tx.is_closed()
    }

    /// Name of the worker thread.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn stop(&self) {
        self.token.cancel();
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!(thread = %self.name, "event worker panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct ManagerState {
    closed: bool,
    worker: Option<Arc<Worker>>,
}

/// Factory for listener queues; owner of the delivery worker.
pub struct EventManager {
    thread_name: String,
    state: Mutex<ManagerState>,
}

impl EventManager {
    pub fn new(thread_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            thread_name: thread_name.into(),
            state: Mutex::new(ManagerState {
                closed: false,
                worker: None,
            }),
        })
    }

    /// Creates an empty listener queue bound to this manager.
    pub fn new_queue(self: &Arc<Self>) -> Result<ListenerQueue, EventError> {
        if self.is_closed() {
            return Err(EventError::Closed);
        }
        Ok(ListenerQueue::new(Arc::clone(self)))
    }

    /// Returns the running worker, starting it on first use.
    ///
    /// A worker that stopped on its own is replaced.
    pub fn worker(&self) -> Result<Arc<Worker>, EventError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EventError::Closed);
        }
        if let Some(worker) = state.worker.as_ref().filter(|w| w.is_running()) {
            return Ok(Arc::clone(worker));
        }
        let worker = Worker::spawn(&self.thread_name)?;
        state.worker = Some(Arc::clone(&worker));
        Ok(worker)
    }

    /// Stops the worker (if any) and refuses further queues. Idempotent.
    pub fn close(&self) {
        let worker = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.worker.take()
        };
        if let Some(worker) = worker {
            worker.stop();
        }
        tracing::debug!(thread = %self.thread_name, "event manager closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    #[inline]
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Returns `true` if a worker thread has been started and not yet stopped.
    pub fn has_worker(&self) -> bool {
        self.state.lock().worker.as_ref().is_some_and(|w| w.is_running())
    }
}

impl Drop for EventManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListenerError;
    use crate::events::{EventDispatcher, FrameworkEvent, FrameworkEventKind};
    use crate::listeners::{Listener, ListenerHandle};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    struct Probe(Mutex<std_mpsc::Sender<(u64, String)>>);

    impl EventDispatcher for Probe {
        fn dispatch(
            &self,
            _handle: ListenerHandle,
            _listener: &Listener,
            event: &Event,
        ) -> Result<(), ListenerError> {
            let name = thread::current().name().unwrap_or_default().to_string();
            if let Event::Framework(ev) = event {
                let _ = self.0.lock().send((ev.seq, name));
            }
            Ok(())
        }
    }

    struct Nop;

    impl crate::listeners::FrameworkListener for Nop {
        fn framework_event(&self, _event: &FrameworkEvent) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    fn snapshot(tx: std_mpsc::Sender<(u64, String)>) -> ListenerSnapshot {
        ListenerSnapshot::new(
            [(ListenerHandle::next(), Listener::Framework(Arc::new(Nop)))],
            Arc::new(Probe(Mutex::new(tx))),
        )
    }

    #[test]
    fn worker_start_is_idempotent() {
        let manager = EventManager::new("idempotent-worker");
        let a = manager.worker().unwrap();
        let b = manager.worker().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "idempotent-worker");
        manager.close();
    }

    #[test]
    fn deliveries_keep_posting_order_on_the_named_thread() {
        let manager = EventManager::new("ordered-worker");
        let (tx, rx) = std_mpsc::channel();
        let worker = manager.worker().unwrap();
        let snap = snapshot(tx);

        let mut posted = Vec::new();
        for _ in 0..20 {
            let ev = FrameworkEvent::new(FrameworkEventKind::Info);
            posted.push(ev.seq);
            worker.post(snap.clone(), ev.into()).unwrap();
        }

        let received: Vec<_> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(received.iter().map(|(s, _)| *s).collect::<Vec<_>>(), posted);
        assert!(received.iter().all(|(_, name)| name == "ordered-worker"));
        manager.close();
    }

    #[test]
    fn closed_manager_refuses_queues_and_posts() {
        let manager = EventManager::new("closing-worker");
        let worker = manager.worker().unwrap();
        manager.close();
        manager.close();

        assert!(manager.is_closed());
        assert!(matches!(manager.new_queue(), Err(EventError::Closed)));
        assert!(matches!(manager.worker(), Err(EventError::Closed)));
        assert!(!worker.is_running());

        let (tx, _rx) = std_mpsc::channel();
        let err = worker
            .post(snapshot(tx), FrameworkEvent::new(FrameworkEventKind::Info).into())
            .unwrap_err();
        assert_eq!(err, EventError::NotRunning);
    }
}
