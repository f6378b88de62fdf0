//! The command engine: command-id allocation, the request registry, the
//! receiver task, timeouts, keep-alive, and the asynchronous event queue.
//!
//! One receiver task per connection owns the socket for reading and
//! demultiplexes completions to waiting callers through per-slot oneshot
//! channels. Data PDUs are assembled by offset, so either ordering of
//! C2HData and CapsuleResp works.

use crate::config::QueueFullPolicy;
use crate::error::{CommandFailure, Error};
use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use nvmf_protocol::{AsyncEvent, Cqe, Pdu, ProtocolError, Sqe};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Resolution of the timeout sweep.
pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the asynchronous event queue.
const AEN_QUEUE_CAPACITY: usize = 64;

/// In-capsule data limit before Identify Controller reports IOCCSZ,
/// sized from the fixed admin command capsule.
const ADMIN_IN_CAPSULE_LIMIT: usize = 8192 - nvmf_protocol::SQE_SIZE;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    TcpConnected,
    IcComplete,
    AdminReady,
    Active,
    Failing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Sync,
    AsyncEvent,
}

type CompletionResult = Result<(Cqe, Bytes), Error>;

struct Slot {
    opcode: u8,
    kind: SlotKind,
    /// `None` for async event requests, which complete at controller
    /// discretion and must never be swept.
    deadline: Option<Instant>,
    expects_data: bool,
    /// C2H data assembled by offset.
    buf: BytesMut,
    /// Pending data-out payload awaiting R2T.
    write_data: Option<Bytes>,
    /// Completion stashed when the CQE arrives before the last data PDU.
    completion: Option<Cqe>,
    last_data_seen: bool,
    tx: Option<oneshot::Sender<CompletionResult>>,
    _permit: Option<OwnedSemaphorePermit>,
}

/// Command-id allocator: wrapping counter plus free list. An id is never
/// handed out while a slot still holds it.
struct IdAllocator {
    next: u16,
    free: Vec<u16>,
    live: HashSet<u16>,
}

impl IdAllocator {
    fn new() -> Self {
        Self {
            next: 0,
            free: Vec::new(),
            live: HashSet::new(),
        }
    }

    fn alloc(&mut self) -> Option<u16> {
        if let Some(id) = self.free.pop() {
            self.live.insert(id);
            return Some(id);
        }
        for _ in 0..=u16::MAX as u32 {
            let id = self.next;
            self.next = self.next.wrapping_add(1);
            if self.live.insert(id) {
                return Some(id);
            }
        }
        None
    }

    fn release(&mut self, id: u16) {
        if self.live.remove(&id) {
            self.free.push(id);
        }
    }

    fn clear(&mut self) {
        self.free.clear();
        self.live.clear();
    }
}

/// Bounded FIFO of decoded async events. Overflow drops the oldest
/// undelivered event and counts the drop.
struct AenQueue {
    queue: Mutex<VecDeque<AsyncEvent>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl AenQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, event: AsyncEvent) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() == AEN_QUEUE_CAPACITY {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    fn drain(&self) -> Vec<AsyncEvent> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    async fn wait_and_drain(&self, timeout: Duration) -> Vec<AsyncEvent> {
        let events = self.drain();
        if !events.is_empty() || timeout.is_zero() {
            return events;
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.drain()
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A command ready for submission. The engine assigns the command id and
/// finalises the SGL descriptor once in-capsule eligibility is known.
pub(crate) struct Submission {
    pub sqe: Sqe,
    pub data_out: Option<Bytes>,
    pub expects_data: bool,
    /// Overrides the per-command timeout (keep-alive uses a short one).
    pub deadline: Option<Duration>,
}

impl Submission {
    pub(crate) fn new(sqe: Sqe) -> Self {
        Self {
            sqe,
            data_out: None,
            expects_data: false,
            deadline: None,
        }
    }

    pub(crate) fn with_data_in(mut self) -> Self {
        self.expects_data = true;
        self
    }

    pub(crate) fn with_data_out(mut self, data: Bytes) -> Self {
        self.data_out = Some(data);
        self
    }
}

pub(crate) struct Engine {
    transport: Arc<Transport>,
    registry: Mutex<HashMap<u16, Slot>>,
    ids: Mutex<IdAllocator>,
    depth: Arc<Semaphore>,
    queue_full: QueueFullPolicy,
    command_timeout: Duration,
    maxh2cdata: u32,
    state: Mutex<ConnectionState>,
    aen: AenQueue,
    in_capsule_limit: AtomicUsize,
}

impl Engine {
    pub(crate) fn new(
        transport: Arc<Transport>,
        queue_depth: u32,
        command_timeout: Duration,
        maxh2cdata: u32,
        queue_full: QueueFullPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            registry: Mutex::new(HashMap::new()),
            ids: Mutex::new(IdAllocator::new()),
            depth: Arc::new(Semaphore::new(queue_depth.max(1) as usize)),
            queue_full,
            command_timeout,
            maxh2cdata: maxh2cdata.max(1),
            state: Mutex::new(ConnectionState::Active),
            aen: AenQueue::new(),
            in_capsule_limit: AtomicUsize::new(ADMIN_IN_CAPSULE_LIMIT),
        })
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Updates the in-capsule data limit once IOCCSZ is known.
    pub(crate) fn set_in_capsule_limit(&self, limit: usize) {
        self.in_capsule_limit.store(limit, Ordering::Relaxed);
    }

    pub(crate) fn async_events_dropped(&self) -> u64 {
        self.aen.dropped()
    }

    /// Number of async event requests currently outstanding.
    pub(crate) fn outstanding_async_requests(&self) -> usize {
        self.registry
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.kind == SlotKind::AsyncEvent)
            .count()
    }

    pub(crate) async fn poll_async_events(&self, timeout: Duration) -> Vec<AsyncEvent> {
        self.aen.wait_and_drain(timeout).await
    }

    fn check_active(&self) -> Result<(), Error> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::conn("not connected"))
        }
    }

    /// Takes a queue-depth permit. Blocking mode spends at most `budget`,
    /// the same window the command's completion deadline is drawn from.
    async fn acquire_permit(&self, budget: Duration) -> Result<OwnedSemaphorePermit, Error> {
        match self.queue_full {
            QueueFullPolicy::Block => {
                tokio::time::timeout(budget, self.depth.clone().acquire_owned())
                    .await
                    .map_err(|_| Error::timeout("queue full"))?
                    .map_err(|_| Error::conn("connection closed"))
            }
            QueueFullPolicy::Fail => self
                .depth
                .clone()
                .try_acquire_owned()
                .map_err(|_| Error::timeout("queue full")),
        }
    }

    /// Submits a command and waits for its completion.
    pub(crate) async fn submit(&self, submission: Submission) -> Result<(Cqe, Bytes), Error> {
        let rx = self.start_command(submission).await?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::conn("connection closed")),
        }
    }

    async fn start_command(
        &self,
        mut submission: Submission,
    ) -> Result<oneshot::Receiver<CompletionResult>, Error> {
        self.check_active()?;
        // One firm deadline per call: waiting for a queue slot and waiting
        // for the completion both count against it.
        let timeout = submission.deadline.unwrap_or(self.command_timeout);
        let started = Instant::now();
        let permit = self.acquire_permit(timeout).await?;
        let cid = self
            .ids
            .lock()
            .unwrap()
            .alloc()
            .ok_or_else(|| Error::timeout("no command ids available"))?;
        submission.sqe.set_cid(cid);

        let mut capsule_data = Bytes::new();
        let mut write_data = None;
        if let Some(data) = submission.data_out.take() {
            if data.len() <= self.in_capsule_limit.load(Ordering::Relaxed) {
                submission.sqe.set_sgl_in_capsule(data.len() as u32);
                capsule_data = data;
            } else {
                submission.sqe.set_sgl_transport(data.len() as u32);
                write_data = Some(data);
            }
        }

        let (tx, rx) = oneshot::channel();
        let slot = Slot {
            opcode: submission.sqe.opcode,
            kind: SlotKind::Sync,
            deadline: Some(started + timeout),
            expects_data: submission.expects_data,
            buf: BytesMut::new(),
            write_data,
            completion: None,
            last_data_seen: false,
            tx: Some(tx),
            _permit: Some(permit),
        };
        self.registry.lock().unwrap().insert(cid, slot);

        tracing::debug!(cid, opcode = submission.sqe.opcode, "submitting command");
        let pdu = Pdu::CapsuleCmd {
            sqe: submission.sqe,
            data: capsule_data,
        };
        if let Err(err) = self.transport.send_pdu(&pdu).await {
            self.remove_slot(cid);
            self.teardown(err.clone()).await;
            return Err(err);
        }
        Ok(rx)
    }

    /// Pre-posts one Asynchronous Event Request. The completion is routed
    /// to the event queue instead of a waiting caller.
    pub(crate) async fn post_async_event_request(&self) -> Result<(), Error> {
        self.check_active()?;
        let permit = self.acquire_permit(self.command_timeout).await?;
        let cid = self
            .ids
            .lock()
            .unwrap()
            .alloc()
            .ok_or_else(|| Error::timeout("no command ids available"))?;
        let slot = Slot {
            opcode: nvmf_protocol::command::opcode::ASYNC_EVENT_REQUEST,
            kind: SlotKind::AsyncEvent,
            deadline: None,
            expects_data: false,
            buf: BytesMut::new(),
            write_data: None,
            completion: None,
            last_data_seen: false,
            tx: None,
            _permit: Some(permit),
        };
        self.registry.lock().unwrap().insert(cid, slot);

        let pdu = Pdu::CapsuleCmd {
            sqe: Sqe::async_event_request(cid),
            data: Bytes::new(),
        };
        if let Err(err) = self.transport.send_pdu(&pdu).await {
            self.remove_slot(cid);
            self.teardown(err.clone()).await;
            return Err(err);
        }
        tracing::debug!(cid, "async event request posted");
        Ok(())
    }

    fn remove_slot(&self, cid: u16) -> Option<Slot> {
        let slot = self.registry.lock().unwrap().remove(&cid);
        if slot.is_some() {
            self.ids.lock().unwrap().release(cid);
        }
        slot
    }

    /// Receiver task body: reads PDUs until the transport fails or a
    /// fatal protocol event arrives, then tears the connection down.
    pub(crate) async fn receiver_loop(self: Arc<Self>) {
        loop {
            let pdu = match self.transport.recv_pdu().await {
                Ok(pdu) => pdu,
                Err(err) => {
                    if self.is_active() {
                        tracing::debug!(%err, "receiver stopping");
                    }
                    self.teardown(err).await;
                    return;
                }
            };
            if let Err(err) = self.handle_pdu(pdu).await {
                tracing::warn!(%err, "fatal protocol event");
                self.teardown(err).await;
                return;
            }
        }
    }

    async fn handle_pdu(&self, pdu: Pdu) -> Result<(), Error> {
        match pdu {
            Pdu::CapsuleResp { cqe } => {
                self.handle_completion(cqe);
                Ok(())
            }
            Pdu::C2hData {
                cccid,
                datao,
                data,
                last,
                success,
            } => {
                self.handle_c2h_data(cccid, datao, data, last, success);
                Ok(())
            }
            Pdu::R2t {
                cccid,
                ttag,
                r2to,
                r2tl,
            } => self.handle_r2t(cccid, ttag, r2to, r2tl).await,
            Pdu::C2hTermReq { fes, fei, .. } | Pdu::H2cTermReq { fes, fei, .. } => Err(
                Error::Protocol(ProtocolError::ConnectionTerminated { fes, fei }),
            ),
            other => Err(Error::Protocol(ProtocolError::UnexpectedPdu {
                expected: "CapsuleResp, C2HData, or R2T",
                got: other.pdu_type() as u8,
            })),
        }
    }

    fn handle_completion(&self, cqe: Cqe) {
        let mut registry = self.registry.lock().unwrap();
        let Some(slot) = registry.get_mut(&cqe.cid) else {
            // Typically a late completion for a command that timed out.
            tracing::warn!(cid = cqe.cid, "completion for unknown command id, discarding");
            return;
        };

        // Hold a successful CQE until the last data PDU when the command
        // still expects data; controllers may send either first.
        if slot.kind == SlotKind::Sync
            && cqe.is_success()
            && slot.expects_data
            && !slot.last_data_seen
        {
            slot.completion = Some(cqe);
            return;
        }

        let is_event = slot.kind == SlotKind::AsyncEvent;
        let slot = registry.remove(&cqe.cid).unwrap();
        drop(registry);
        self.ids.lock().unwrap().release(cqe.cid);

        if is_event {
            drop(slot);
            if cqe.is_success() {
                let event = AsyncEvent::from_completion(cqe.dw0, cqe.dw1);
                tracing::debug!(cid = cqe.cid, %event, "async event");
                self.aen.push(event);
            } else {
                tracing::warn!(
                    cid = cqe.cid,
                    status = %cqe.status_field(),
                    "async event request failed"
                );
            }
        } else {
            Self::finish(slot, cqe);
        }
    }

    fn handle_c2h_data(&self, cccid: u16, datao: u32, data: Bytes, last: bool, success: bool) {
        let mut registry = self.registry.lock().unwrap();
        let Some(slot) = registry.get_mut(&cccid) else {
            tracing::warn!(cid = cccid, "C2HData for unknown command id, discarding");
            return;
        };

        let end = datao as usize + data.len();
        if slot.buf.len() < end {
            slot.buf.resize(end, 0);
        }
        slot.buf[datao as usize..end].copy_from_slice(&data);

        if !last {
            return;
        }
        slot.last_data_seen = true;

        let completion = if success {
            // SUCCESS optimisation: no CapsuleResp follows.
            Some(Cqe::success(cccid))
        } else {
            slot.completion.take()
        };
        let Some(cqe) = completion else {
            return;
        };
        let slot = registry.remove(&cccid).unwrap();
        drop(registry);
        self.ids.lock().unwrap().release(cccid);
        Self::finish(slot, cqe);
    }

    async fn handle_r2t(&self, cccid: u16, ttag: u16, r2to: u32, r2tl: u32) -> Result<(), Error> {
        let data = {
            let registry = self.registry.lock().unwrap();
            let Some(slot) = registry.get(&cccid) else {
                tracing::warn!(cid = cccid, "R2T for unknown command id, discarding");
                return Ok(());
            };
            match &slot.write_data {
                Some(data) => data.clone(),
                None => {
                    return Err(Error::Protocol(ProtocolError::InvalidField {
                        field: "r2t without pending write data",
                        value: cccid as u64,
                    }))
                }
            }
        };

        if r2tl == 0 || r2to as usize + r2tl as usize > data.len() {
            return Err(Error::Protocol(ProtocolError::InvalidField {
                field: "r2t range",
                value: (r2to as u64) << 32 | r2tl as u64,
            }));
        }

        let mut sent = 0u32;
        while sent < r2tl {
            let chunk = (r2tl - sent).min(self.maxh2cdata);
            let offset = r2to + sent;
            let payload = data.slice(offset as usize..(offset + chunk) as usize);
            let last = sent + chunk >= r2tl;
            self.transport
                .send_pdu(&Pdu::H2cData {
                    cccid,
                    ttag,
                    datao: offset,
                    data: payload,
                    last,
                })
                .await?;
            sent += chunk;
        }
        tracing::debug!(cid = cccid, r2to, r2tl, "R2T satisfied");
        Ok(())
    }

    fn finish(mut slot: Slot, cqe: Cqe) {
        let result = if cqe.is_success() {
            Ok((cqe, slot.buf.split().freeze()))
        } else {
            Err(Error::Command(CommandFailure {
                opcode: slot.opcode,
                cid: cqe.cid,
                status: cqe.status_field(),
                dw0: cqe.dw0,
            }))
        };
        if let Some(tx) = slot.tx.take() {
            if tx.send(result).is_err() {
                // Caller abandoned the request; discard silently.
                tracing::debug!(cid = cqe.cid, "completion discarded, caller gone");
            }
        }
    }

    /// Timeout sweep task body.
    pub(crate) async fn sweeper_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if !self.is_active() {
                return;
            }
            let now = Instant::now();
            let expired: Vec<(u16, Slot)> = {
                let mut registry = self.registry.lock().unwrap();
                let cids: Vec<u16> = registry
                    .iter()
                    .filter(|(_, slot)| slot.deadline.is_some_and(|d| d <= now))
                    .map(|(cid, _)| *cid)
                    .collect();
                cids.into_iter()
                    .filter_map(|cid| registry.remove(&cid).map(|slot| (cid, slot)))
                    .collect()
            };
            for (cid, mut slot) in expired {
                self.ids.lock().unwrap().release(cid);
                tracing::warn!(cid, opcode = slot.opcode, "command timed out");
                if let Some(tx) = slot.tx.take() {
                    let _ = tx.send(Err(Error::timeout(format!(
                        "command {cid} exceeded its deadline"
                    ))));
                }
            }
        }
    }

    /// Keep-alive task body: sends Keep Alive every KATO/2 with a KATO/2
    /// deadline; any failure tears the connection down.
    pub(crate) async fn keepalive_loop(self: Arc<Self>, kato_ms: u32) {
        let period = Duration::from_millis(u64::from(kato_ms / 2).max(100));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !self.is_active() {
                return;
            }
            let mut submission = Submission::new(Sqe::keep_alive(0));
            submission.deadline = Some(period);
            match self.submit(submission).await {
                Ok(_) => tracing::trace!("keep-alive acknowledged"),
                Err(err) if err.is_fatal() => return,
                Err(err) => {
                    tracing::warn!(%err, "keep-alive failed, closing connection");
                    self.teardown(Error::timeout("keep-alive deadline expired"))
                        .await;
                    return;
                }
            }
        }
    }

    /// Fails every outstanding slot and closes the socket. Idempotent.
    pub(crate) async fn teardown(&self, err: Error) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, ConnectionState::Closed | ConnectionState::Failing) {
                return;
            }
            *state = ConnectionState::Failing;
        }

        let slots: Vec<Slot> = {
            let mut registry = self.registry.lock().unwrap();
            let drained = registry.drain().map(|(_, slot)| slot).collect();
            self.ids.lock().unwrap().clear();
            drained
        };
        let outstanding = slots.len();
        for mut slot in slots {
            if let Some(tx) = slot.tx.take() {
                let _ = tx.send(Err(err.clone()));
            }
        }
        self.transport.close().await;
        *self.state.lock().unwrap() = ConnectionState::Closed;
        if outstanding > 0 {
            tracing::debug!(outstanding, %err, "connection torn down");
        }
    }

    /// Graceful disconnect: no special PDU, just teardown.
    pub(crate) async fn shutdown(&self) {
        self.teardown(Error::conn("connection closed")).await;
    }
}
