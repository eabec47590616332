//! The connection multiplexer: one `Worker` multiplexes up to
//! `MAX_CLIENTS_PER_THREAD` connections through a readiness-driven loop.
//!
//! `TcpStream::readable()` exposes tokio's mio-level "is there data to read" signal
//! without committing to a read, modeled as an explicit state machine rather than raw
//! fd juggling. `futures::stream::FuturesUnordered` fans the per-connection readiness
//! futures out under one 1-second timeout.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::domain::ConnectionState;
use crate::fsm::{self, FsmStep};
use crate::pipeline::Pipeline;

/// Multiplexes a fixed-capacity slot table of connections. `state == DISCONNECTED` is represented structurally as `None` in the slot.
pub struct Worker {
    id: usize,
    slots: Mutex<Vec<Option<Connection>>>,
    count: AtomicUsize,
    notify: Notify,
    running: AtomicBool,
    pipeline: Arc<Pipeline>,
    buffer_size: usize,
    select_timeout: Duration,
    idle_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        capacity: usize,
        pipeline: Arc<Pipeline>,
        buffer_size: usize,
        select_timeout: Duration,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Arc::new(Worker {
            id,
            slots: Mutex::new(slots),
            count: AtomicUsize::new(0),
            notify: Notify::new(),
            running: AtomicBool::new(true),
            pipeline,
            buffer_size,
            select_timeout,
            idle_timeout,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Current occupied-slot count, read without the slot-table lock so the
    /// `WorkerPool` can use it for least-loaded admission.
    pub fn connection_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Adds a new accepted connection to the first free slot, scanning the slot table
    /// for the first disconnected entry. The `CONNECTED -> READY` "attach" transition
    /// happens here, immediately, rather than waiting for the connection's first
    /// readiness tick: the banner is owed to the client as soon as it is accepted, not
    /// after it sends its first byte. Returns `false` if this worker has no free slot.
    pub async fn add_connection(&self, stream: TcpStream) -> bool {
        let mut slots = self.slots.lock().await;
        let Some(idx) = slots.iter().position(|slot| slot.is_none()) else {
            return false;
        };

        let mut conn = Connection::new(stream);
        if conn.write_all(fsm::BANNER.as_bytes()).await.is_ok() {
            conn.state = ConnectionState::Ready;
        }
        slots[idx] = Some(conn);
        self.count.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
        true
    }

    /// Flips the run flag and wakes the loop so it observes the shutdown on its next
    /// iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// The core multiplexing loop.
    pub async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            if self.count.load(Ordering::SeqCst) == 0 {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = sleep(self.select_timeout) => {}
                }
                continue;
            }

            let snapshot = self.snapshot_active().await;
            let ready = self.wait_for_readiness(&snapshot).await;
            for idx in ready {
                self.service_slot(idx).await;
            }
            self.poll_processing_completions().await;
            self.evict_idle().await;
        }

        self.close_all().await;
        info!(worker_id = self.id, "worker loop exited");
    }

    async fn snapshot_active(&self) -> Vec<(usize, Arc<TcpStream>)> {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|c| (i, c.stream.clone())))
            .collect()
    }

    /// Waits for at least one connection to become readable, bounded by
    /// `select_timeout`.
    async fn wait_for_readiness(&self, snapshot: &[(usize, Arc<TcpStream>)]) -> Vec<usize> {
        if snapshot.is_empty() {
            sleep(self.select_timeout).await;
            return Vec::new();
        }

        let mut pending: FuturesUnordered<_> = snapshot
            .iter()
            .map(|(idx, stream)| {
                let idx = *idx;
                let stream = stream.clone();
                async move { stream.readable().await.map(|_| idx) }
            })
            .collect();

        let mut ready = Vec::new();
        let deadline = sleep(self.select_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                next = pending.next(), if !pending.is_empty() => {
                    match next {
                        Some(Ok(idx)) => ready.push(idx),
                        Some(Err(err)) => warn!(worker_id = self.id, %err, "readiness poll failed"),
                        None => break,
                    }
                    if !ready.is_empty() {
                        break;
                    }
                }
                _ = &mut deadline => break,
            }
        }

        ready
    }

    /// Reads from one ready slot and drives its `ClientFSM` through as many complete
    /// lines as the buffer contains.
    async fn service_slot(&self, idx: usize) {
        let mut buf = vec![0u8; self.buffer_size];
        let mut slots = self.slots.lock().await;

        let read_result = match slots[idx].as_ref() {
            Some(conn) => conn.stream.try_read(&mut buf),
            None => return,
        };

        match read_result {
            Ok(0) => {
                debug!(worker_id = self.id, idx, "connection closed by peer");
                self.drop_slot(&mut slots, idx);
                return;
            }
            Ok(n) => {
                let conn = slots[idx].as_mut().unwrap();
                conn.read_buffer.extend_from_slice(&buf[..n]);
                conn.last_active = Instant::now();
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(err) => {
                warn!(worker_id = self.id, idx, %err, "read error, closing connection");
                self.drop_slot(&mut slots, idx);
                return;
            }
        }

        loop {
            let conn = match slots[idx].as_mut() {
                Some(c) => c,
                None => return,
            };

            match conn.state {
                ConnectionState::Connected => {
                    conn.state = ConnectionState::Ready;
                    if conn.write_all(fsm::BANNER.as_bytes()).await.is_err() {
                        self.drop_slot(&mut slots, idx);
                        return;
                    }
                }
                ConnectionState::Ready => {
                    let line = match conn.take_line() {
                        Some(line) => line,
                        None => break,
                    };

                    let step = fsm::handle_line(&line, &self.pipeline).await;

                    let conn = match slots[idx].as_mut() {
                        Some(c) => c,
                        None => return,
                    };
                    match step {
                        FsmStep::Reply(text) => {
                            if conn.write_all(text.as_bytes()).await.is_err() {
                                self.drop_slot(&mut slots, idx);
                                return;
                            }
                        }
                        FsmStep::Processing(rx) => {
                            conn.state = ConnectionState::Processing;
                            conn.pending = Some(rx);
                            break;
                        }
                    }
                }
                ConnectionState::Processing => break,
            }
        }
    }

    /// Checks every `PROCESSING` slot's out-of-thread notification channel and, once
    /// the Compute stage has resolved it, writes the plan response and drives the
    /// connection back to `READY`.
    async fn poll_processing_completions(&self) {
        let mut slots = self.slots.lock().await;
        for idx in 0..slots.len() {
            let resolved = match slots[idx].as_mut() {
                Some(conn) if conn.state == ConnectionState::Processing => {
                    conn.pending.as_mut().and_then(|rx| rx.try_recv().ok())
                }
                _ => None,
            };

            let Some(mut text) = resolved else { continue };
            let conn = slots[idx].as_mut().unwrap();
            conn.pending = None;
            conn.state = ConnectionState::Ready;
            text.push_str("\n> ");
            if conn.write_all(text.as_bytes()).await.is_err() {
                self.drop_slot(&mut slots, idx);
            }
        }
    }

    /// Closes connections idle longer than `CLIENT_IDLE_TIMEOUT`.
    async fn evict_idle(&self) {
        let mut slots = self.slots.lock().await;
        for idx in 0..slots.len() {
            let expired = matches!(slots[idx].as_ref(), Some(c) if c.is_idle(self.idle_timeout));
            if expired {
                debug!(worker_id = self.id, idx, "evicting idle connection");
                self.drop_slot(&mut slots, idx);
            }
        }
    }

    async fn close_all(&self) {
        let mut slots = self.slots.lock().await;
        for slot in slots.iter_mut() {
            *slot = None;
        }
        self.count.store(0, Ordering::SeqCst);
    }

    fn drop_slot(&self, slots: &mut [Option<Connection>], idx: usize) {
        slots[idx] = None;
        self.count.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
