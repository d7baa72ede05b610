// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

// cspell:words redial redials EPIPE

//! The per-service client connection: an outbound message queue, an inbound
//! frame dispatcher, and transparent reconnection with doubling backoff.
//!
//! Everything here is layered on scheduler tasks: a transmit-when-writable
//! task pumps the queue, a receive task feeds the tokenizer, and a delayed
//! task performs redials. The connection handle is a cheap clone
//! (`Rc<RefCell<_>>` - the scheduler is single-threaded, so interior
//! mutability without locks is the whole point).

use super::config::ClientConfig;
use super::frame::{Frame, FrameTokenizer, MessageBuf, FRAME_HEADER_LEN};
use crate::sched::{Deadline, Priority, Reason, Scheduler, TaskContext, TaskId, Timeout};
use miette::Diagnostic;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Instant;
use strum_macros::Display;
use thiserror::Error;

/// How a queued transmission ended, as seen by its completion continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransmitStatus {
    /// The frame was handed to the transport in full.
    Sent,
    /// The per-message deadline expired before the link became writable.
    TimedOut,
    /// The connection was disconnected (or the entry did not opt into
    /// surviving a reconnect) before the frame went out.
    Canceled,
}

/// Completion continuation of a queued transmission; invoked exactly once.
pub type CompletionFn = Box<dyn FnOnce(&mut Scheduler, TransmitStatus)>;

/// Fills the reserved transmit buffer with one whole frame and returns the
/// number of bytes written; returning 0 aborts the transmission with no
/// completion.
pub type AssemblerFn = Box<dyn FnOnce(&mut [u8]) -> usize>;

/// Single-shot reply handler armed by
/// [`ServiceClient::transmit_and_get_response`]; receives `None` on timeout
/// or transport failure. Invoked exactly once.
pub type ResponseFn = Box<dyn FnOnce(&mut Scheduler, Option<Frame<'_>>)>;

/// One row of a connection's inbound dispatch table.
pub struct MessageHandler {
    /// Frame type this handler consumes.
    pub msg_type: u16,
    /// If set, the exact wire length (header included) every such frame
    /// must have; a mismatch is a protocol error and resets the connection.
    pub expected_len: Option<u16>,
    /// Invoked for every matching frame.
    pub on_message: Box<dyn FnMut(&mut Scheduler, &ServiceClient, Frame<'_>)>,
}

impl MessageHandler {
    /// A handler for variable-length frames of one type.
    pub fn new(
        msg_type: u16,
        on_message: impl FnMut(&mut Scheduler, &ServiceClient, Frame<'_>) + 'static,
    ) -> Self {
        Self {
            msg_type,
            expected_len: None,
            on_message: Box::new(on_message),
        }
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandler")
            .field("msg_type", &self.msg_type)
            .field("expected_len", &self.expected_len)
            .finish_non_exhaustive()
    }
}

/// Handle to a transmission sitting in the send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitTicket(u64);

/// Errors surfaced directly to client-queue callers. Transport failures are
/// never surfaced here - they demote to a reconnect with backoff.
#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    /// The connection was already disconnected (or is draining).
    #[error("connection to service `{service}` is closed")]
    #[diagnostic(
        code(meshkit_core::client::closed),
        help("dial the service again with ServiceClient::connect")
    )]
    Closed {
        /// The service the connection belonged to.
        service: String,
    },

    /// A transmit reservation smaller than a frame header.
    #[error("transmit of {size} bytes cannot hold a frame header")]
    #[diagnostic(code(meshkit_core::client::transmit_too_small))]
    TransmitTooSmall {
        /// The requested reservation.
        size: u16,
    },
}

enum TransmitPayload {
    /// Assembler not yet invoked; it runs once, when the link first becomes
    /// writable with this entry at the head.
    Unassembled(AssemblerFn),
    /// Placeholder while the assembler is executing.
    Assembling,
    /// Framed bytes, possibly partially written.
    Buffered { bytes: Vec<u8>, written: usize },
}

struct QueuedTransmit {
    ticket: TransmitTicket,
    size: u16,
    deadline: Deadline,
    urgent: bool,
    retain_on_reconnect: bool,
    payload: TransmitPayload,
    completion: Option<CompletionFn>,
}

impl QueuedTransmit {
    /// An entry whose frame is already (partially) on the wire must not be
    /// displaced or expired; the stream would be left mid-frame.
    fn in_flight(&self) -> bool {
        matches!(
            self.payload,
            TransmitPayload::Assembling | TransmitPayload::Buffered { written: 1.., .. }
        )
    }
}

struct PendingResponse {
    key: u64,
    survives_reconnect: bool,
    timeout_task: Option<TaskId>,
    handler: Option<ResponseFn>,
}

struct ClientState {
    service: String,
    config: ClientConfig,
    socket: Option<UnixStream>,
    handlers: Vec<MessageHandler>,
    responses: VecDeque<PendingResponse>,
    queue: VecDeque<QueuedTransmit>,
    tokenizer: FrameTokenizer,
    write_task: Option<TaskId>,
    read_task: Option<TaskId>,
    redial_task: Option<TaskId>,
    backoff: std::time::Duration,
    next_ticket: u64,
    draining: bool,
    closed: bool,
}

/// A stateful link from this process to one local service.
///
/// Created with [`connect`]; transparently redials on transport errors until
/// explicitly [`disconnect`]ed. Clones share the same connection.
///
/// [`connect`]: ServiceClient::connect
/// [`disconnect`]: ServiceClient::disconnect
#[derive(Clone)]
pub struct ServiceClient {
    inner: Rc<RefCell<ClientState>>,
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.borrow();
        f.debug_struct("ServiceClient")
            .field("service", &st.service)
            .field("connected", &st.socket.is_some())
            .field("queued", &st.queue.len())
            .field("closed", &st.closed)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    /// Dial a local service.
    ///
    /// The transport is best-effort: if the dial fails the connection enters
    /// the backoff redial path instead of failing the caller, and queued
    /// work waits for the link. `handlers` is the inbound dispatch table;
    /// it may be empty for send-only connections.
    pub fn connect(
        sched: &mut Scheduler,
        service: impl Into<String>,
        config: ClientConfig,
        handlers: Vec<MessageHandler>,
    ) -> ServiceClient {
        let backoff = config.backoff_initial;
        let client = ServiceClient {
            inner: Rc::new(RefCell::new(ClientState {
                service: service.into(),
                config,
                socket: None,
                handlers,
                responses: VecDeque::new(),
                queue: VecDeque::new(),
                tokenizer: FrameTokenizer::new(),
                write_task: None,
                read_task: None,
                redial_task: None,
                backoff,
                next_ticket: 1,
                draining: false,
                closed: false,
            })),
        };
        try_connect(&client, sched);
        client
    }

    /// Reserve `size` bytes in the send queue; when the link becomes
    /// writable, `assembler` is invoked exactly once to fill them with one
    /// whole frame. Returning 0 from the assembler aborts the transmission
    /// with no completion. `timeout` bounds how long the entry may wait for
    /// the link. The entry survives reconnects (the assembler simply runs
    /// against the fresh transport).
    ///
    /// # Errors
    ///
    /// [`ClientError::Closed`] after a disconnect, or
    /// [`ClientError::TransmitTooSmall`] for a reservation that cannot hold
    /// a frame header.
    pub fn transmit(
        &self,
        sched: &mut Scheduler,
        size: u16,
        timeout: Timeout,
        urgent: bool,
        assembler: impl FnOnce(&mut [u8]) -> usize + 'static,
    ) -> Result<TransmitTicket, ClientError> {
        if usize::from(size) < FRAME_HEADER_LEN {
            return Err(ClientError::TransmitTooSmall { size });
        }
        self.enqueue(
            sched,
            size,
            timeout,
            urgent,
            true,
            TransmitPayload::Unassembled(Box::new(assembler)),
            None,
        )
    }

    /// Queue an already-framed message. `retain_on_reconnect` decides
    /// whether the entry survives a transport error; `completion` (if any)
    /// fires exactly once with the final [`TransmitStatus`].
    ///
    /// # Errors
    ///
    /// [`ClientError::Closed`] after a disconnect.
    pub fn send(
        &self,
        sched: &mut Scheduler,
        msg: MessageBuf,
        timeout: Timeout,
        urgent: bool,
        retain_on_reconnect: bool,
        completion: Option<CompletionFn>,
    ) -> Result<TransmitTicket, ClientError> {
        let size = u16::try_from(msg.len()).expect("MessageBuf length always fits u16");
        self.enqueue(
            sched,
            size,
            timeout,
            urgent,
            retain_on_reconnect,
            TransmitPayload::Buffered {
                bytes: msg.into_bytes(),
                written: 0,
            },
            completion,
        )
    }

    /// Queue `msg` and arm a single-shot handler for the first reply frame.
    ///
    /// The handler receives `Some(frame)` for the first well-formed reply,
    /// or `None` once `timeout` expires or the transport fails with
    /// `auto_reconnect` disabled. With `auto_reconnect` enabled both the
    /// message and the armed handler survive reconnects.
    ///
    /// # Errors
    ///
    /// [`ClientError::Closed`] after a disconnect.
    pub fn transmit_and_get_response(
        &self,
        sched: &mut Scheduler,
        msg: MessageBuf,
        timeout: Timeout,
        auto_reconnect: bool,
        handler: impl FnOnce(&mut Scheduler, Option<Frame<'_>>) + 'static,
    ) -> Result<(), ClientError> {
        self.send(sched, msg, timeout, false, auto_reconnect, None)?;
        let key = {
            let mut st = self.inner.borrow_mut();
            let key = st.next_ticket;
            st.next_ticket += 1;
            key
        };
        let timeout_task = match timeout {
            Timeout::In(delay) => {
                let client = self.clone();
                Some(sched.add_delayed(delay, Priority::Keep, None, false, move |sched, _ctx| {
                    response_timed_out(&client, sched, key);
                }))
            }
            Timeout::Never => None,
        };
        self.inner.borrow_mut().responses.push_back(PendingResponse {
            key,
            survives_reconnect: auto_reconnect,
            timeout_task,
            handler: Some(Box::new(handler)),
        });
        arm_read(self, sched);
        Ok(())
    }

    /// Remove a queued transmission before it starts; its completion never
    /// fires. Tickets already flushed (or already canceled) are ignored.
    ///
    /// # Panics
    ///
    /// If the entry's frame is already partially on the wire; aborting it
    /// there would corrupt the stream.
    pub fn cancel_transmit(&self, ticket: TransmitTicket) {
        let mut st = self.inner.borrow_mut();
        if let Some(idx) = st.queue.iter().position(|e| e.ticket == ticket) {
            assert!(
                !st.queue[idx].in_flight(),
                "cannot cancel a transmission already on the wire"
            );
            st.queue.remove(idx);
        }
    }

    /// Tear the connection down. With `drain` set and data still queued the
    /// connection stops accepting work, flushes the queue, then closes;
    /// otherwise it closes immediately. Every pending completion fires
    /// exactly once ([`TransmitStatus::Canceled`] for entries that never
    /// flushed), and every armed response handler receives `None`.
    pub fn disconnect(&self, sched: &mut Scheduler, drain: bool) {
        {
            let mut st = self.inner.borrow_mut();
            if st.closed {
                return;
            }
            if drain && !st.queue.is_empty() && st.socket.is_some() {
                st.draining = true;
                return;
            }
            st.closed = true;
        }
        teardown(self, sched);
    }

    /// Whether the transport is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.borrow().socket.is_some()
    }

    #[allow(clippy::too_many_arguments)]
    fn enqueue(
        &self,
        sched: &mut Scheduler,
        size: u16,
        timeout: Timeout,
        urgent: bool,
        retain_on_reconnect: bool,
        payload: TransmitPayload,
        completion: Option<CompletionFn>,
    ) -> Result<TransmitTicket, ClientError> {
        let (ticket, at_head) = {
            let mut st = self.inner.borrow_mut();
            if st.closed || st.draining {
                return Err(ClientError::Closed {
                    service: st.service.clone(),
                });
            }
            let ticket = TransmitTicket(st.next_ticket);
            st.next_ticket += 1;
            let pos = if urgent {
                // Urgent entries jump every non-urgent entry, but never a
                // frame that is already going out.
                let mut pos = usize::from(st.queue.front().is_some_and(QueuedTransmit::in_flight));
                while pos < st.queue.len() && st.queue[pos].urgent {
                    pos += 1;
                }
                pos
            } else {
                st.queue.len()
            };
            st.queue.insert(
                pos,
                QueuedTransmit {
                    ticket,
                    size,
                    deadline: timeout.to_deadline(Instant::now()),
                    urgent,
                    retain_on_reconnect,
                    payload,
                    completion,
                },
            );
            (ticket, pos == 0)
        };
        if at_head {
            // The head (and with it the transmit deadline) changed; re-arm.
            rearm_write(self, sched);
        } else {
            arm_write(self, sched);
        }
        Ok(ticket)
    }
}

fn try_connect(client: &ServiceClient, sched: &mut Scheduler) {
    let path = {
        let st = client.inner.borrow();
        if st.closed || st.socket.is_some() {
            return;
        }
        st.config.service_socket_path(&st.service)
    };
    let dialed = UnixStream::connect(&path).and_then(|sock| {
        sock.set_nonblocking(true)?;
        Ok(sock)
    });
    match dialed {
        Ok(sock) => {
            {
                let mut st = client.inner.borrow_mut();
                st.socket = Some(sock);
                st.backoff = st.config.backoff_initial;
                tracing::debug!(service = %st.service, path = %path.display(), "connected");
            }
            arm_write(client, sched);
            arm_read(client, sched);
        }
        Err(err) => {
            {
                let st = client.inner.borrow();
                tracing::debug!(
                    service = %st.service,
                    path = %path.display(),
                    %err,
                    "dial failed, backing off"
                );
            }
            schedule_redial(client, sched);
        }
    }
}

fn schedule_redial(client: &ServiceClient, sched: &mut Scheduler) {
    let delay = {
        let mut st = client.inner.borrow_mut();
        if st.closed || st.redial_task.is_some() {
            return;
        }
        let delay = st.backoff;
        st.backoff = (st.backoff * 2).min(st.config.backoff_max);
        delay
    };
    let c = client.clone();
    let id = sched.add_delayed(delay, Priority::Default, None, false, move |sched, _ctx| {
        c.inner.borrow_mut().redial_task = None;
        try_connect(&c, sched);
    });
    client.inner.borrow_mut().redial_task = Some(id);
}

fn arm_write(client: &ServiceClient, sched: &mut Scheduler) {
    let mut st = client.inner.borrow_mut();
    if st.write_task.is_some() || st.queue.is_empty() {
        return;
    }
    let Some(head) = st.queue.front() else {
        return;
    };
    // A frame already going out must finish whatever its deadline says;
    // the deadline bounds waiting for the link, not the write itself.
    let timeout = if head.in_flight() {
        Timeout::Never
    } else {
        head.deadline.to_timeout(Instant::now())
    };
    let Some(sock) = st.socket.as_ref() else {
        return;
    };
    let c = client.clone();
    let id = sched.add_write_net(
        sock,
        timeout,
        Priority::Default,
        None,
        false,
        move |sched, ctx| on_writable(&c, sched, ctx),
    );
    st.write_task = Some(id);
}

fn rearm_write(client: &ServiceClient, sched: &mut Scheduler) {
    if let Some(id) = client.inner.borrow_mut().write_task.take() {
        drop(sched.cancel(id));
    }
    arm_write(client, sched);
}

fn arm_read(client: &ServiceClient, sched: &mut Scheduler) {
    let mut st = client.inner.borrow_mut();
    if st.read_task.is_some() {
        return;
    }
    if st.handlers.is_empty() && st.responses.is_empty() {
        return;
    }
    let Some(sock) = st.socket.as_ref() else {
        return;
    };
    let c = client.clone();
    let id = sched.add_read_net(
        sock,
        Timeout::Never,
        Priority::Default,
        None,
        false,
        move |sched, ctx| on_readable(&c, sched, ctx),
    );
    st.read_task = Some(id);
}

fn on_writable(client: &ServiceClient, sched: &mut Scheduler, ctx: &TaskContext<'_>) {
    client.inner.borrow_mut().write_task = None;
    if !ctx.reason.contains(Reason::WRITE_READY) {
        // The transmit deadline expired while waiting for the link.
        expire_head(client, sched);
        return;
    }
    service_queue(client, sched);
}

/// Complete the head entry with [`TransmitStatus::TimedOut`] and move on.
fn expire_head(client: &ServiceClient, sched: &mut Scheduler) {
    let completion = {
        let mut st = client.inner.borrow_mut();
        let expired = st.queue.front().is_some_and(|head| !head.in_flight());
        if expired {
            st.queue.pop_front().and_then(|mut entry| entry.completion.take())
        } else {
            None
        }
    };
    if let Some(done) = completion {
        done(sched, TransmitStatus::TimedOut);
    }
    arm_write(client, sched);
}

enum PumpStep {
    /// Run this assembler outside the state borrow, then install the bytes.
    Assemble { assembler: AssemblerFn, size: u16 },
    /// An entry finished (or expired); pump again for the next one.
    Continue,
    /// Nothing further to write right now.
    Done,
    /// The transport failed mid-write.
    Failed,
}

/// Pump the send queue until it drains, the socket would block, or the
/// transport fails.
fn service_queue(client: &ServiceClient, sched: &mut Scheduler) {
    let mut completions: Vec<(CompletionFn, TransmitStatus)> = Vec::new();
    loop {
        let step = {
            let mut st = client.inner.borrow_mut();
            let st = &mut *st;
            pump_once(st, &mut completions)
        };
        match step {
            PumpStep::Assemble { assembler, size } => {
                let mut buf = vec![0_u8; usize::from(size)];
                let n = assembler(&mut buf);
                assert!(
                    n <= usize::from(size),
                    "transmit assembler overran its {size} byte reservation"
                );
                let mut st = client.inner.borrow_mut();
                let head_assembling = st
                    .queue
                    .front()
                    .is_some_and(|head| matches!(head.payload, TransmitPayload::Assembling));
                if head_assembling {
                    if n == 0 {
                        // Aborted by the assembler: drop silently, no
                        // completion.
                        st.queue.pop_front();
                    } else if let Some(head) = st.queue.front_mut() {
                        buf.truncate(n);
                        head.payload = TransmitPayload::Buffered {
                            bytes: buf,
                            written: 0,
                        };
                    }
                }
            }
            PumpStep::Continue => {}
            PumpStep::Done => break,
            PumpStep::Failed => {
                for (done, status) in completions {
                    done(sched, status);
                }
                handle_transport_error(client, sched);
                return;
            }
        }
    }
    for (done, status) in completions {
        done(sched, status);
    }
    let drained = {
        let st = client.inner.borrow();
        st.queue.is_empty() && st.draining
    };
    if drained {
        client.inner.borrow_mut().closed = true;
        teardown(client, sched);
        return;
    }
    arm_write(client, sched);
}

/// One step of the send-queue pump, under the state borrow. Socket I/O
/// happens here; user callbacks never do - completions are deferred into
/// `completions` and fired by the caller once the borrow is released.
fn pump_once(
    st: &mut ClientState,
    completions: &mut Vec<(CompletionFn, TransmitStatus)>,
) -> PumpStep {
    let Some(sock) = st.socket.as_mut() else {
        return PumpStep::Done;
    };
    // Expire a head entry whose deadline passed while it sat queued.
    let now = Instant::now();
    let head_expired = st
        .queue
        .front()
        .is_some_and(|head| !head.in_flight() && head.deadline.is_due(now));
    if head_expired {
        let mut entry = st.queue.pop_front().expect("checked just above");
        if let Some(done) = entry.completion.take() {
            completions.push((done, TransmitStatus::TimedOut));
        }
        return PumpStep::Continue;
    }
    let Some(head) = st.queue.front_mut() else {
        return PumpStep::Done;
    };
    match &mut head.payload {
        TransmitPayload::Unassembled(_) => {
            let size = head.size;
            let TransmitPayload::Unassembled(assembler) =
                std::mem::replace(&mut head.payload, TransmitPayload::Assembling)
            else {
                unreachable!("matched Unassembled above");
            };
            PumpStep::Assemble { assembler, size }
        }
        TransmitPayload::Assembling => PumpStep::Done,
        TransmitPayload::Buffered { bytes, written } => {
            match sock.write(&bytes[*written..]) {
                Ok(0) => PumpStep::Failed,
                Ok(n) => {
                    *written += n;
                    if *written == bytes.len() {
                        let mut entry = st.queue.pop_front().expect("front was Some");
                        if let Some(done) = entry.completion.take() {
                            completions.push((done, TransmitStatus::Sent));
                        }
                        PumpStep::Continue
                    } else {
                        PumpStep::Done
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => PumpStep::Done,
                Err(err) => {
                    tracing::debug!(%err, "write to service failed");
                    PumpStep::Failed
                }
            }
        }
    }
}

fn on_readable(client: &ServiceClient, sched: &mut Scheduler, ctx: &TaskContext<'_>) {
    client.inner.borrow_mut().read_task = None;
    if !ctx.reason.contains(Reason::READ_READY) {
        arm_read(client, sched);
        return;
    }
    let mut frames: Vec<(u16, Vec<u8>)> = Vec::new();
    let mut failed = false;
    {
        let mut st = client.inner.borrow_mut();
        let st = &mut *st;
        let Some(sock) = st.socket.as_mut() else {
            return;
        };
        let mut chunk = [0_u8; 8192];
        match sock.read(&mut chunk) {
            Ok(0) => failed = true,
            Ok(n) => {
                let fed = st.tokenizer.feed(&chunk[..n], |frame| {
                    frames.push((frame.msg_type, frame.payload.to_vec()));
                });
                if let Err(err) = fed {
                    tracing::warn!(service = %st.service, %err, "corrupt inbound stream");
                    failed = true;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                tracing::debug!(service = %st.service, %err, "read from service failed");
                failed = true;
            }
        }
    }
    if failed {
        handle_transport_error(client, sched);
        return;
    }
    dispatch_frames(client, sched, frames);
    arm_read(client, sched);
}

fn dispatch_frames(client: &ServiceClient, sched: &mut Scheduler, frames: Vec<(u16, Vec<u8>)>) {
    for (msg_type, payload) in frames {
        if client.inner.borrow().closed {
            // A handler disconnected us mid-batch; drop the rest.
            return;
        }
        let frame = Frame {
            msg_type,
            payload: &payload,
        };
        // A single-shot response handler consumes the frame first.
        let response = client.inner.borrow_mut().responses.pop_front();
        if let Some(mut resp) = response {
            if let Some(timeout_task) = resp.timeout_task.take() {
                drop(sched.cancel(timeout_task));
            }
            if let Some(handler) = resp.handler.take() {
                handler(sched, Some(frame));
            }
            continue;
        }
        // Table dispatch; the table is taken out of the state so handlers
        // may call back into the connection.
        let mut handlers = std::mem::take(&mut client.inner.borrow_mut().handlers);
        let mut protocol_error = false;
        match handlers.iter_mut().find(|h| h.msg_type == msg_type) {
            Some(handler) => {
                if handler
                    .expected_len
                    .is_some_and(|len| usize::from(len) != frame.wire_len())
                {
                    tracing::warn!(msg_type, "frame length does not match its dispatch entry");
                    protocol_error = true;
                } else {
                    (handler.on_message)(sched, client, frame);
                }
            }
            None => {
                tracing::warn!(msg_type, "no handler for message type, dropping frame");
            }
        }
        client.inner.borrow_mut().handlers = handlers;
        if protocol_error {
            handle_transport_error(client, sched);
            return;
        }
    }
}

/// Demote a transport failure to a redial with backoff. Entries that opted
/// out of surviving the reconnect complete with `Canceled`; armed response
/// handlers without `auto_reconnect` fire with `None`.
fn handle_transport_error(client: &ServiceClient, sched: &mut Scheduler) {
    let mut completions: Vec<CompletionFn> = Vec::new();
    let mut failed_responses: Vec<ResponseFn> = Vec::new();
    let mut cancel_ids: Vec<TaskId> = Vec::new();
    {
        let mut st = client.inner.borrow_mut();
        if st.draining {
            // The flush cannot finish on a dead link; fall through to a
            // full close.
            st.draining = false;
            st.closed = true;
        }
        let closed = st.closed;
        st.socket = None;
        st.tokenizer.reset();
        cancel_ids.extend(st.write_task.take());
        cancel_ids.extend(st.read_task.take());

        let mut kept = VecDeque::new();
        while let Some(mut entry) = st.queue.pop_front() {
            if entry.retain_on_reconnect && !closed {
                if let TransmitPayload::Buffered { written, .. } = &mut entry.payload {
                    // Retransmit the whole frame on the fresh transport.
                    *written = 0;
                }
                kept.push_back(entry);
            } else if let Some(done) = entry.completion.take() {
                completions.push(done);
            }
        }
        st.queue = kept;

        let mut kept_responses = VecDeque::new();
        while let Some(mut resp) = st.responses.pop_front() {
            if resp.survives_reconnect && !closed {
                kept_responses.push_back(resp);
            } else {
                cancel_ids.extend(resp.timeout_task.take());
                failed_responses.extend(resp.handler.take());
            }
        }
        st.responses = kept_responses;
        if !closed {
            tracing::warn!(service = %st.service, "transport error, scheduling reconnect");
        }
    }
    for id in cancel_ids {
        drop(sched.cancel(id));
    }
    for done in completions {
        done(sched, TransmitStatus::Canceled);
    }
    for handler in failed_responses {
        handler(sched, None);
    }
    schedule_redial(client, sched);
}

/// Final teardown: cancel every task, complete everything outstanding, drop
/// the transport. `closed` must already be set.
fn teardown(client: &ServiceClient, sched: &mut Scheduler) {
    let mut completions: Vec<CompletionFn> = Vec::new();
    let mut failed_responses: Vec<ResponseFn> = Vec::new();
    let mut cancel_ids: Vec<TaskId> = Vec::new();
    {
        let mut st = client.inner.borrow_mut();
        debug_assert!(st.closed);
        st.socket = None;
        st.tokenizer.reset();
        st.draining = false;
        cancel_ids.extend(st.write_task.take());
        cancel_ids.extend(st.read_task.take());
        cancel_ids.extend(st.redial_task.take());
        while let Some(mut entry) = st.queue.pop_front() {
            completions.extend(entry.completion.take());
        }
        while let Some(mut resp) = st.responses.pop_front() {
            cancel_ids.extend(resp.timeout_task.take());
            failed_responses.extend(resp.handler.take());
        }
        tracing::debug!(service = %st.service, "disconnected");
    }
    for id in cancel_ids {
        drop(sched.cancel(id));
    }
    for done in completions {
        done(sched, TransmitStatus::Canceled);
    }
    for handler in failed_responses {
        handler(sched, None);
    }
}

fn response_timed_out(client: &ServiceClient, sched: &mut Scheduler, key: u64) {
    let response = {
        let mut st = client.inner.borrow_mut();
        st.responses
            .iter()
            .position(|r| r.key == key)
            .and_then(|idx| st.responses.remove(idx))
    };
    if let Some(mut resp) = response {
        resp.timeout_task = None;
        if let Some(handler) = resp.handler.take() {
            handler(sched, None);
        }
    }
}
