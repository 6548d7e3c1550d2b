use crate::codec::{Codec, FrameLength};
use crate::constants::DEFAULT_IO_BUFFER_SIZE;
use crate::error::ChannelsError;
use crate::group_producer::GroupProducer;
use crate::provider::{Provider, RingProducer};
use crate::rate_limiter::RateLimiter;
use crate::selector::{KeyHandler, SelectorContext, SelectorHandle};
use crate::wait_strategy::{BlockingWaitStrategy, WakeupSink, WakeupWaitStrategy};
use bytes::{Bytes, BytesMut};
use mio::net::{TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, warn};

/// CONNECTING only occurs for client TCP; accepted and UDP channels
/// enter REGISTERED directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Open,
    Closing,
    Closed,
}

/// Installed as the outbound ring's [`WakeupSink`]; publishing into a
/// previously empty outbound ring enqueues a task on the owning selector
/// thread to re-add WRITE interest.
struct WriterWakeup {
    selector: SelectorHandle,
    token: Token,
}

impl WakeupSink for WriterWakeup {
    fn wakeup(&self) {
        let token = self.token;
        self.selector.submit(Box::new(move |ctx| ctx.reassert_write_interest(token)));
    }
}

/// Per-connection TCP state machine. Owns the socket, the decode/
/// encode byte buffers, and the processor-side ends of the channel's
/// [`Provider`]: it produces onto the inbound (channel→app) ring and
/// consumes from the outbound (app→channel) ring.
pub struct TcpKeyProcessor {
    state: ConnectionState,
    stream: TcpStream,
    peer: Option<SocketAddr>,
    codec: Arc<dyn Codec>,
    send_limiter: Arc<dyn RateLimiter>,
    recv_limiter: Arc<dyn RateLimiter>,
    decode_buf: BytesMut,
    encode_buf: BytesMut,
    write_interest: bool,
    input: crate::provider::Producer<Bytes, BlockingWaitStrategy>,
    output: crate::provider::Consumer<Bytes, WakeupWaitStrategy>,
    stopping: Arc<AtomicBool>,
    connect_promise: Option<crate::future::Promise>,
    close_listener: Option<Arc<dyn Fn() + Send + Sync>>,
    selector: SelectorHandle,
    token: Token,
    decoupled_processing_threshold: Option<usize>,
}

impl TcpKeyProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: TcpStream,
        initial_state: ConnectionState,
        peer: Option<SocketAddr>,
        codec: Arc<dyn Codec>,
        send_limiter: Arc<dyn RateLimiter>,
        recv_limiter: Arc<dyn RateLimiter>,
        provider: &Provider<Bytes, Bytes>,
        stopping: Arc<AtomicBool>,
        selector: SelectorHandle,
        token: Token,
        decoupled_processing_threshold: Option<usize>,
    ) -> Self {
        Self {
            state: initial_state,
            stream,
            peer,
            codec,
            send_limiter,
            recv_limiter,
            decode_buf: BytesMut::with_capacity(DEFAULT_IO_BUFFER_SIZE),
            encode_buf: BytesMut::with_capacity(DEFAULT_IO_BUFFER_SIZE),
            write_interest: true,
            input: provider.input_producer(),
            output: provider.output_consumer(),
            stopping,
            connect_promise: None,
            close_listener: None,
            selector,
            token,
            decoupled_processing_threshold,
        }
    }

    /// Wakeup sink to install on the provider's outbound ring via
    /// [`Provider::install_wakeup_sink`]; the ring never holds a
    /// back-pointer to this processor, only this callback.
    pub fn wakeup_sink(selector: SelectorHandle, token: Token) -> Arc<dyn WakeupSink> {
        Arc::new(WriterWakeup { selector, token })
    }

    pub fn set_close_listener(&mut self, listener: Arc<dyn Fn() + Send + Sync>) {
        self.close_listener = Some(listener);
    }

    /// Registers this processor's socket with `registry`. Must be called
    /// from inside the owning selector's task/dispatch loop, before the
    /// processor is handed to [`SelectorContext::register_processor`].
    pub fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        registry.register(&mut self.stream, token, interest)
    }

    /// Registers the promise to resolve once the CONNECTING handshake
    /// completes (or fails). Only meaningful when constructed with
    /// `ConnectionState::Connecting`.
    pub fn set_connect_promise(&mut self, promise: crate::future::Promise) {
        self.connect_promise = Some(promise);
    }

    /// Fails the pending connect future without a live selector
    /// registration (e.g. `Registry::register` itself errored). Leaves the
    /// processor closed; the caller drops it.
    pub fn fail_connect(&mut self, err: ChannelsError) {
        self.state = ConnectionState::Closed;
        if let Some(promise) = self.connect_promise.take() {
            promise.resolve(Err(err));
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Enqueues this key's cancellation on its owning selector thread.
    /// Idempotent; the actual socket shutdown happens in `on_cancel`, once
    /// the selector loop runs the task.
    pub fn close(&mut self) {
        self.request_close()
    }

    fn request_close(&mut self) {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }
        self.state = ConnectionState::Closing;
        let selector = self.selector.clone();
        let token = self.token;
        selector.submit(Box::new(move |ctx| ctx.cancel(token)));
    }

    fn read_path(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }

        let mut tmp = [0u8; DEFAULT_IO_BUFFER_SIZE];
        let mut total = 0usize;
        loop {
            match self.stream.read(&mut tmp) {
                Ok(0) => {
                    self.request_close();
                    return;
                }
                Ok(n) => {
                    self.decode_buf.extend_from_slice(&tmp[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, token = ?self.token, "read failed");
                    self.request_close();
                    return;
                }
            }
        }

        if total > 0 && self.recv_limiter.acquire_receive(total, &self.stopping).is_err() {
            return;
        }

        loop {
            match self.codec.length(&self.decode_buf) {
                FrameLength::Complete(_) => match self.codec.decode(&mut self.decode_buf) {
                    Ok(frame) => self.publish_inbound(frame),
                    Err(err) => {
                        warn!(%err, token = ?self.token, "codec rejected frame");
                        self.request_close();
                        return;
                    }
                },
                FrameLength::NeedMore => break,
            }
        }
    }

    /// Hands a decoded frame to the inbound ring. Frames at or above
    /// `decoupled_processing_threshold` are copied and published from a
    /// spawned thread instead of inline, so a large payload's memcpy into
    /// the ring doesn't hold up this selector thread's readiness loop.
    fn publish_inbound(&self, frame: Bytes) {
        if let Some(threshold) = self.decoupled_processing_threshold {
            if frame.len() >= threshold {
                let input = self.input.clone();
                let stopping = self.stopping.clone();
                let peer = self.peer;
                std::thread::spawn(move || {
                    let Ok(seq) = input.acquire(&stopping) else {
                        return;
                    };
                    *input.slot_mut(seq) = frame;
                    input.attach(seq, peer);
                    input.release(seq);
                });
                return;
            }
        }

        let Ok(seq) = self.input.acquire(&self.stopping) else {
            return;
        };
        *self.input.slot_mut(seq) = frame;
        self.input.attach(seq, self.peer);
        self.input.release(seq);
    }

    fn write_path(&mut self, registry: &Registry) {
        if self.state == ConnectionState::Connecting {
            self.complete_connect();
        }
        if self.state != ConnectionState::Open {
            return;
        }

        loop {
            if self.encode_buf.is_empty() {
                let Some((low, high)) = self.output.poll() else {
                    self.disable_write_interest(registry);
                    return;
                };
                let mut cursor = low;
                while cursor <= high && self.encode_buf.len() < DEFAULT_IO_BUFFER_SIZE {
                    let frame = self.output.get(cursor).clone();
                    self.codec.encode(&frame, &mut self.encode_buf);
                    cursor += 1;
                }
                self.output.release_through(cursor - 1);
                if self.send_limiter.acquire_send(self.encode_buf.len(), &self.stopping).is_err() {
                    return;
                }
            }

            match self.stream.write(&self.encode_buf) {
                Ok(0) => return,
                Ok(n) => {
                    let _ = self.encode_buf.split_to(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, token = ?self.token, "write failed");
                    self.request_close();
                    return;
                }
            }

            if !self.encode_buf.is_empty() {
                // Short write: keep WRITE interest and retry on the next
                // readiness notification rather than spinning here.
                return;
            }
        }
    }

    fn complete_connect(&mut self) {
        match self.stream.take_error() {
            Ok(None) => {
                self.state = ConnectionState::Open;
                if let Some(promise) = self.connect_promise.take() {
                    promise.resolve(Ok(()));
                }
                debug!(token = ?self.token, "connect completed");
            }
            Ok(Some(err)) | Err(err) => {
                if let Some(promise) = self.connect_promise.take() {
                    promise.resolve(Err(ChannelsError::Io(err)));
                }
                self.request_close();
            }
        }
    }

    fn disable_write_interest(&mut self, registry: &Registry) {
        if !self.write_interest {
            return;
        }
        self.write_interest = false;
        let _ = registry.reregister(&mut self.stream, self.token, Interest::READABLE);
    }
}

impl KeyHandler for TcpKeyProcessor {
    fn on_readable(&mut self, _ctx: &mut SelectorContext, _token: Token) {
        self.read_path();
    }

    fn on_writable(&mut self, ctx: &mut SelectorContext, _token: Token) {
        let registry = ctx.registry();
        self.write_path(registry);
    }

    fn on_cancel(&mut self) {
        self.state = ConnectionState::Closed;
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        if let Some(listener) = &self.close_listener {
            listener();
        }
        debug!(token = ?self.token, "key processor closed");
    }

    fn add_write_interest(&mut self, registry: &Registry, token: Token) {
        if self.write_interest || self.state != ConnectionState::Open {
            return;
        }
        self.write_interest = true;
        let _ = registry.reregister(&mut self.stream, token, Interest::READABLE | Interest::WRITABLE);
    }
}

/// Per-socket UDP state. A datagram socket has no handshake, so it is
/// constructed directly into `Open`. Each `recv_from`/`send_to` already
/// operates on one whole datagram, so the read/write paths bypass the
/// stream codec's length framing entirely and treat each datagram as one
/// frame.
pub struct UdpKeyProcessor {
    state: ConnectionState,
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    send_limiter: Arc<dyn RateLimiter>,
    recv_limiter: Arc<dyn RateLimiter>,
    write_interest: bool,
    input: crate::provider::Producer<Bytes, BlockingWaitStrategy>,
    output: crate::provider::Consumer<Bytes, WakeupWaitStrategy>,
    stopping: Arc<AtomicBool>,
    close_listener: Option<Arc<dyn Fn() + Send + Sync>>,
    selector: SelectorHandle,
    token: Token,
    decoupled_processing_threshold: Option<usize>,
}

impl UdpKeyProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: UdpSocket,
        peer: Option<SocketAddr>,
        send_limiter: Arc<dyn RateLimiter>,
        recv_limiter: Arc<dyn RateLimiter>,
        provider: &Provider<Bytes, Bytes>,
        stopping: Arc<AtomicBool>,
        selector: SelectorHandle,
        token: Token,
        decoupled_processing_threshold: Option<usize>,
    ) -> Self {
        Self {
            state: ConnectionState::Open,
            socket,
            peer,
            send_limiter,
            recv_limiter,
            write_interest: true,
            input: provider.input_producer(),
            output: provider.output_consumer(),
            stopping,
            close_listener: None,
            selector,
            token,
            decoupled_processing_threshold,
        }
    }

    pub fn wakeup_sink(selector: SelectorHandle, token: Token) -> Arc<dyn WakeupSink> {
        Arc::new(WriterWakeup { selector, token })
    }

    pub fn set_close_listener(&mut self, listener: Arc<dyn Fn() + Send + Sync>) {
        self.close_listener = Some(listener);
    }

    pub fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        registry.register(&mut self.socket, token, interest)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn close(&mut self) {
        self.request_close()
    }

    fn request_close(&mut self) {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }
        self.state = ConnectionState::Closing;
        let selector = self.selector.clone();
        let token = self.token;
        selector.submit(Box::new(move |ctx| ctx.cancel(token)));
    }

    fn read_path(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }

        let mut buf = [0u8; DEFAULT_IO_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if n > 0 && self.recv_limiter.acquire_receive(n, &self.stopping).is_err() {
                        return;
                    }
                    self.publish_inbound(Bytes::copy_from_slice(&buf[..n]), Some(from));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, token = ?self.token, "udp read failed");
                    self.request_close();
                    return;
                }
            }
        }
    }

    /// Mirrors `TcpKeyProcessor::publish_inbound`, attaching the datagram's
    /// actual sender rather than a fixed peer.
    fn publish_inbound(&self, frame: Bytes, from: Option<SocketAddr>) {
        if let Some(threshold) = self.decoupled_processing_threshold {
            if frame.len() >= threshold {
                let input = self.input.clone();
                let stopping = self.stopping.clone();
                std::thread::spawn(move || {
                    let Ok(seq) = input.acquire(&stopping) else {
                        return;
                    };
                    *input.slot_mut(seq) = frame;
                    input.attach(seq, from);
                    input.release(seq);
                });
                return;
            }
        }

        let Ok(seq) = self.input.acquire(&self.stopping) else {
            return;
        };
        *self.input.slot_mut(seq) = frame;
        self.input.attach(seq, from);
        self.input.release(seq);
    }

    /// Sends queued frames one datagram at a time; concatenating them the
    /// way the TCP write path batches bytes would break datagram
    /// boundaries. Each frame's destination is whatever the application
    /// attached to its slot (letting a connectionless "server" reply to
    /// whoever it last heard from), falling back to the fixed peer of a
    /// connected UDP channel.
    fn write_path(&mut self, registry: &Registry) {
        if self.state != ConnectionState::Open {
            return;
        }

        loop {
            let Some((low, high)) = self.output.poll() else {
                self.disable_write_interest(registry);
                return;
            };
            let mut cursor = low;
            while cursor <= high {
                let frame = self.output.get(cursor).clone();
                let target = self.output.attachment(cursor).or(self.peer);
                if self.send_limiter.acquire_send(frame.len(), &self.stopping).is_err() {
                    self.output.release_through(cursor - 1);
                    return;
                }
                let Some(target) = target else {
                    warn!(token = ?self.token, "udp frame has no destination, dropping");
                    cursor += 1;
                    continue;
                };
                match self.socket.send_to(&frame, target) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.output.release_through(cursor - 1);
                        return;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(%err, token = ?self.token, "udp write failed");
                        self.output.release_through(cursor - 1);
                        self.request_close();
                        return;
                    }
                }
                cursor += 1;
            }
            self.output.release_through(high);
        }
    }

    fn disable_write_interest(&mut self, registry: &Registry) {
        if !self.write_interest {
            return;
        }
        self.write_interest = false;
        let _ = registry.reregister(&mut self.socket, self.token, Interest::READABLE);
    }
}

impl KeyHandler for UdpKeyProcessor {
    fn on_readable(&mut self, _ctx: &mut SelectorContext, _token: Token) {
        self.read_path();
    }

    fn on_writable(&mut self, ctx: &mut SelectorContext, _token: Token) {
        let registry = ctx.registry();
        self.write_path(registry);
    }

    fn on_cancel(&mut self) {
        self.state = ConnectionState::Closed;
        if let Some(listener) = &self.close_listener {
            listener();
        }
        debug!(token = ?self.token, "udp key processor closed");
    }

    fn add_write_interest(&mut self, registry: &Registry, token: Token) {
        if self.write_interest || self.state != ConnectionState::Open {
            return;
        }
        self.write_interest = true;
        let _ = registry.reregister(&mut self.socket, token, Interest::READABLE | Interest::WRITABLE);
    }
}

/// Receive-only fan-out processor for a joined multicast group. A group
/// has one socket but potentially many local subscribers, so each
/// datagram is mirrored to every subscriber's own inbound ring through
/// [`GroupProducer`] instead of picking a single winner.
pub struct MulticastKeyProcessor {
    state: ConnectionState,
    socket: UdpSocket,
    recv_limiter: Arc<dyn RateLimiter>,
    input: GroupProducer<Bytes>,
    stopping: Arc<AtomicBool>,
    close_listener: Option<Arc<dyn Fn() + Send + Sync>>,
    selector: SelectorHandle,
    token: Token,
    group: Ipv4Addr,
    interface: Ipv4Addr,
}

impl MulticastKeyProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: UdpSocket,
        recv_limiter: Arc<dyn RateLimiter>,
        input: GroupProducer<Bytes>,
        stopping: Arc<AtomicBool>,
        selector: SelectorHandle,
        token: Token,
        group: Ipv4Addr,
        interface: Ipv4Addr,
    ) -> Self {
        Self {
            state: ConnectionState::Open,
            socket,
            recv_limiter,
            input,
            stopping,
            close_listener: None,
            selector,
            token,
            group,
            interface,
        }
    }

    pub fn set_close_listener(&mut self, listener: Arc<dyn Fn() + Send + Sync>) {
        self.close_listener = Some(listener);
    }

    pub fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        registry.register(&mut self.socket, token, interest)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn close(&mut self) {
        self.request_close()
    }

    fn request_close(&mut self) {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }
        self.state = ConnectionState::Closing;
        let selector = self.selector.clone();
        let token = self.token;
        selector.submit(Box::new(move |ctx| ctx.cancel(token)));
    }

    fn read_path(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }

        let mut buf = [0u8; DEFAULT_IO_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if n > 0 && self.recv_limiter.acquire_receive(n, &self.stopping).is_err() {
                        return;
                    }
                    let frame = Bytes::copy_from_slice(&buf[..n]);
                    let Ok(seq) = self.input.acquire(&self.stopping) else {
                        return;
                    };
                    *self.input.slot_mut(seq) = frame;
                    self.input.attach_all(seq, Some(from));
                    self.input.release(seq, |src, dst| *dst = src.clone());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, token = ?self.token, "multicast read failed");
                    self.request_close();
                    return;
                }
            }
        }
    }
}

impl KeyHandler for MulticastKeyProcessor {
    fn on_readable(&mut self, _ctx: &mut SelectorContext, _token: Token) {
        self.read_path();
    }

    fn on_writable(&mut self, _ctx: &mut SelectorContext, _token: Token) {}

    fn on_cancel(&mut self) {
        self.state = ConnectionState::Closed;
        if let Err(err) = socket2::SockRef::from(&self.socket).leave_multicast_v4(&self.group, &self.interface) {
            warn!(%err, token = ?self.token, "failed to leave multicast group on close");
        }
        if let Some(listener) = &self.close_listener {
            listener();
        }
        debug!(token = ?self.token, "multicast key processor closed");
    }

    fn add_write_interest(&mut self, _registry: &Registry, _token: Token) {}
}
