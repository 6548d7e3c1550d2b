use crate::config::{ChannelConfig, Transport};
use crate::error::{ChannelsError, ChannelsResult};
use crate::future::{completion_pair, CompletionFuture};
use crate::group_producer::GroupProducer;
use crate::key_processor::{ConnectionState, MulticastKeyProcessor, TcpKeyProcessor, UdpKeyProcessor};
use crate::multicast;
use crate::provider::{Consumer, Producer, Provider, RingProducer};
use crate::selector::{Acceptor, SelectorContext, SelectorHandle, SelectorPool};
use crate::wait_strategy::{BlockingWaitStrategy, WakeupWaitStrategy};
use bytes::Bytes;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Token};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

static TOKEN_SOURCE: AtomicUsize = AtomicUsize::new(1);

/// A process-wide counter used only to hand out distinct `mio::Token`s for
/// diagnostic purposes; a per-pool counter would suffice but a single
/// `AtomicUsize` keeps tokens unique across every
/// selector thread without coordination.
fn next_token() -> Token {
    Token(TOKEN_SOURCE.fetch_add(1, Ordering::Relaxed))
}

type AcceptListener = Box<dyn Fn(MessageChannel) + Send + Sync>;
type CloseListener = Box<dyn Fn() + Send + Sync>;

/// A single established connection. Produced
/// by [`connect`] or delivered to a [`ServerChannel`]'s accept listener.
pub struct MessageChannel {
    provider: Arc<Provider<Bytes, Bytes>>,
    stopping: Arc<AtomicBool>,
    selector: SelectorHandle,
    token: Token,
}

impl MessageChannel {
    fn new(provider: Arc<Provider<Bytes, Bytes>>, stopping: Arc<AtomicBool>, selector: SelectorHandle, token: Token) -> Self {
        Self { provider, stopping, selector, token }
    }

    /// App reads inbound messages here. Call once per channel: a ring has
    /// exactly one consumer.
    pub fn input_buffer(&self) -> Consumer<Bytes, BlockingWaitStrategy> {
        self.provider.input_consumer()
    }

    /// App writes outbound messages here; cheaply cloneable, since the
    /// outbound ring accepts multiple concurrent producers.
    pub fn output_buffer(&self) -> Producer<Bytes, WakeupWaitStrategy> {
        self.provider.output_producer()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Closes the channel. Unblocks any thread parked in the
    /// ring/rate-limiter on this channel, then cancels the key on its
    /// owning selector thread; the returned future resolves once `on_cancel`
    /// has run (socket shut down, close listener invoked).
    pub fn close(&self) -> CompletionFuture {
        self.stopping.store(true, Ordering::Release);
        let (promise, future) = completion_pair();
        let token = self.token;
        self.selector.submit(Box::new(move |ctx| {
            ctx.cancel(token);
            promise.resolve(Ok(()));
        }));
        future
    }
}

fn build_processor(
    stream: TcpStream,
    state: ConnectionState,
    peer: Option<SocketAddr>,
    config: &ChannelConfig,
    selector: SelectorHandle,
    token: Token,
) -> ChannelsResult<(TcpKeyProcessor, MessageChannel)> {
    let provider: Arc<Provider<Bytes, Bytes>> = Arc::new(Provider::new(config.outbound_capacity, config.inbound_capacity)?);
    let stopping = Arc::new(AtomicBool::new(false));
    provider.install_wakeup_sink(TcpKeyProcessor::wakeup_sink(selector.clone(), token));

    let processor = TcpKeyProcessor::new(
        stream,
        state,
        peer,
        config.codec.clone(),
        config.rate_limiter(),
        config.rate_limiter(),
        &provider,
        stopping.clone(),
        selector.clone(),
        token,
        config.decoupled_processing_threshold,
    );

    Ok((processor, MessageChannel::new(provider, stopping, selector, token)))
}

fn build_udp_processor(
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    config: &ChannelConfig,
    selector: SelectorHandle,
    token: Token,
) -> ChannelsResult<(UdpKeyProcessor, MessageChannel)> {
    let provider: Arc<Provider<Bytes, Bytes>> = Arc::new(Provider::new(config.outbound_capacity, config.inbound_capacity)?);
    let stopping = Arc::new(AtomicBool::new(false));
    provider.install_wakeup_sink(UdpKeyProcessor::wakeup_sink(selector.clone(), token));

    let processor = UdpKeyProcessor::new(
        socket,
        peer,
        config.rate_limiter(),
        config.rate_limiter(),
        &provider,
        stopping.clone(),
        selector.clone(),
        token,
        config.decoupled_processing_threshold,
    );

    Ok((processor, MessageChannel::new(provider, stopping, selector, token)))
}

/// Registered for ACCEPT readiness on a bound TCP listener.
/// On each ready accept, builds a child [`MessageChannel`] bound to the
/// same selector thread and invokes the server's accept listener.
struct TcpAcceptor {
    listener: TcpListener,
    config: Arc<ChannelConfig>,
    on_accept: Arc<Mutex<Option<AcceptListener>>>,
    on_close: Arc<Mutex<Option<CloseListener>>>,
    selector: SelectorHandle,
}

impl Acceptor for TcpAcceptor {
    fn accept(&mut self, ctx: &mut SelectorContext, _token: Token) {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    warn!(%err, "accept failed");
                    return;
                }
            };

            let child_token = next_token();
            let (mut processor, channel) =
                match build_processor(stream, ConnectionState::Open, Some(peer), &self.config, self.selector.clone(), child_token) {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "failed to build accepted channel");
                        continue;
                    }
                };

            if let Err(err) = processor.register(ctx.registry(), child_token, Interest::READABLE | Interest::WRITABLE) {
                warn!(%err, "failed to register accepted socket");
                continue;
            }

            let on_close = self.on_close.clone();
            processor.set_close_listener(Arc::new(move || {
                if let Some(cb) = on_close.lock().unwrap().as_ref() {
                    cb();
                }
            }));

            ctx.register_processor(child_token, Box::new(processor));

            if let Some(listener) = self.on_accept.lock().unwrap().as_ref() {
                listener(channel);
            }
            info!(peer = %peer, "accepted channel");
        }
    }
}

/// A bound listener, over TCP, UDP, or a joined UDP multicast group
/// depending on `config.transport`.
pub struct ServerChannel {
    on_accept: Arc<Mutex<Option<AcceptListener>>>,
    on_close: Arc<Mutex<Option<CloseListener>>>,
    pending: Arc<Mutex<Vec<MessageChannel>>>,
}

impl ServerChannel {
    /// Registers the accept listener. UDP and multicast binds may deliver
    /// their channel(s) on the selector thread before this is called (there
    /// is no accept event to defer to), so any channel accepted in that
    /// window is buffered in `pending` and flushed through `listener` here
    /// rather than dropped.
    pub fn on_accept(&self, listener: impl Fn(MessageChannel) + Send + Sync + 'static) {
        let listener: AcceptListener = Box::new(listener);
        let backlog: Vec<MessageChannel> = std::mem::take(&mut *self.pending.lock().unwrap());
        for channel in backlog {
            listener(channel);
        }
        *self.on_accept.lock().unwrap() = Some(listener);
    }

    pub fn on_close(&self, listener: impl Fn() + Send + Sync + 'static) {
        *self.on_close.lock().unwrap() = Some(Box::new(listener));
    }

    /// Binds on a selector thread from `pool`, per `config.transport`.
    /// Resolves once the socket is registered (TCP: the listener is ready
    /// to accept; UDP: the bound channel is ready; UDP_MULTICAST: the
    /// group has been joined and every subscriber channel registered).
    pub fn bind(pool: &SelectorPool, config: Arc<ChannelConfig>, local: SocketAddr) -> ChannelsResult<(Self, CompletionFuture)> {
        match config.transport {
            Transport::Tcp => Self::bind_tcp(pool, config, local),
            Transport::Udp => Self::bind_udp(pool, config, local),
            Transport::UdpMulticast => Self::bind_multicast(pool, config, local),
        }
    }

    fn bind_tcp(pool: &SelectorPool, config: Arc<ChannelConfig>, local: SocketAddr) -> ChannelsResult<(Self, CompletionFuture)> {
        let listener = TcpListener::bind(local).map_err(ChannelsError::Io)?;
        let selector = pool.next().clone();
        let token = next_token();
        let (promise, future) = completion_pair();

        let server = Self {
            on_accept: Arc::new(Mutex::new(None)),
            on_close: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(Vec::new())),
        };

        let mut acceptor = TcpAcceptor {
            listener,
            config,
            on_accept: server.on_accept.clone(),
            on_close: server.on_close.clone(),
            selector: selector.clone(),
        };

        selector.submit(Box::new(move |ctx| {
            let result = ctx
                .registry()
                .register(&mut acceptor.listener, token, Interest::READABLE)
                .map_err(ChannelsError::Io);
            match result {
                Ok(()) => {
                    ctx.register_acceptor(token, Box::new(acceptor));
                    promise.resolve(Ok(()));
                }
                Err(err) => promise.resolve(Err(err)),
            }
        }));

        Ok((server, future))
    }

    /// A datagram socket has no accept event to defer to, so the single
    /// bound channel is built and handed to `on_accept` as soon as
    /// registration completes rather than on first-datagram-arrival.
    fn bind_udp(pool: &SelectorPool, config: Arc<ChannelConfig>, local: SocketAddr) -> ChannelsResult<(Self, CompletionFuture)> {
        if !local.is_ipv4() {
            return Err(ChannelsError::Protocol("UDP transport supports IPv4 only".into()));
        }
        let socket = UdpSocket::bind(local).map_err(ChannelsError::Io)?;
        let selector = pool.next().clone();
        let token = next_token();
        let (promise, future) = completion_pair();

        let server = Self {
            on_accept: Arc::new(Mutex::new(None)),
            on_close: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(Vec::new())),
        };

        let (mut processor, channel) = build_udp_processor(socket, None, &config, selector.clone(), token)?;
        let on_close = server.on_close.clone();
        processor.set_close_listener(Arc::new(move || {
            if let Some(cb) = on_close.lock().unwrap().as_ref() {
                cb();
            }
        }));
        let on_accept = server.on_accept.clone();
        let pending = server.pending.clone();

        selector.submit(Box::new(move |ctx| {
            let mut processor = processor;
            let result = processor
                .register(ctx.registry(), token, Interest::READABLE | Interest::WRITABLE)
                .map_err(ChannelsError::Io);
            match result {
                Ok(()) => {
                    ctx.register_processor(token, Box::new(processor));
                    match on_accept.lock().unwrap().as_ref() {
                        Some(listener) => listener(channel),
                        None => pending.lock().unwrap().push(channel),
                    }
                    promise.resolve(Ok(()));
                }
                Err(err) => promise.resolve(Err(err)),
            }
        }));

        Ok((server, future))
    }

    /// Joins the multicast group at `local` (its address is the group,
    /// its port the group port; the interface is unspecified) and fans
    /// every received datagram out to `config.pool_size` independent
    /// subscriber channels via [`GroupProducer`], handing each to
    /// `on_accept` once registration completes. Subscriber channels share
    /// one underlying socket and selector registration: closing any one of
    /// them tears down the whole group.
    fn bind_multicast(pool: &SelectorPool, config: Arc<ChannelConfig>, local: SocketAddr) -> ChannelsResult<(Self, CompletionFuture)> {
        let SocketAddr::V4(local_v4) = local else {
            return Err(ChannelsError::Protocol("multicast bind requires an IPv4 group address".into()));
        };
        let group = *local_v4.ip();
        let interface = Ipv4Addr::UNSPECIFIED;
        let std_socket = multicast::join_multicast_v4(group, local_v4.port(), interface).map_err(ChannelsError::Io)?;
        let socket = UdpSocket::from_std(std_socket);

        let selector = pool.next().clone();
        let token = next_token();
        let (promise, future) = completion_pair();

        let server = Self {
            on_accept: Arc::new(Mutex::new(None)),
            on_close: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(Vec::new())),
        };

        let stopping = Arc::new(AtomicBool::new(false));
        let subscriber_count = config.pool_size.max(1);
        let mut backings: Vec<Box<dyn RingProducer<Bytes> + Send + Sync>> = Vec::with_capacity(subscriber_count);
        let mut channels = Vec::with_capacity(subscriber_count);
        for _ in 0..subscriber_count {
            let provider: Arc<Provider<Bytes, Bytes>> = Arc::new(Provider::new(config.outbound_capacity, config.inbound_capacity)?);
            backings.push(Box::new(provider.input_producer()) as Box<dyn RingProducer<Bytes> + Send + Sync>);
            channels.push(MessageChannel::new(provider, stopping.clone(), selector.clone(), token));
        }
        let group_producer = GroupProducer::new(backings);

        let mut processor =
            MulticastKeyProcessor::new(socket, config.rate_limiter(), group_producer, stopping, selector.clone(), token, group, interface);
        let on_close = server.on_close.clone();
        processor.set_close_listener(Arc::new(move || {
            if let Some(cb) = on_close.lock().unwrap().as_ref() {
                cb();
            }
        }));
        let on_accept = server.on_accept.clone();
        let pending = server.pending.clone();

        selector.submit(Box::new(move |ctx| {
            let mut processor = processor;
            let result = processor.register(ctx.registry(), token, Interest::READABLE).map_err(ChannelsError::Io);
            match result {
                Ok(()) => {
                    ctx.register_processor(token, Box::new(processor));
                    match on_accept.lock().unwrap().as_ref() {
                        Some(listener) => {
                            for channel in channels {
                                listener(channel);
                            }
                        }
                        None => pending.lock().unwrap().extend(channels),
                    }
                    promise.resolve(Ok(()));
                }
                Err(err) => promise.resolve(Err(err)),
            }
        }));

        Ok((server, future))
    }
}

/// Connects a client channel over `config.transport`. TCP resolves once
/// the three-way handshake completes (or fails), per the CONNECTING state
/// the key processor tracks internally; UDP has no handshake and resolves
/// as soon as the socket is registered.
pub fn connect(pool: &SelectorPool, config: Arc<ChannelConfig>, remote: SocketAddr) -> ChannelsResult<(MessageChannel, CompletionFuture)> {
    match config.transport {
        Transport::Tcp => connect_tcp(pool, config, remote),
        Transport::Udp => connect_udp(pool, config, remote),
        Transport::UdpMulticast => Err(ChannelsError::Protocol(
            "multicast channels are receive-only; join a group with ServerChannel::bind".into(),
        )),
    }
}

fn connect_tcp(pool: &SelectorPool, config: Arc<ChannelConfig>, remote: SocketAddr) -> ChannelsResult<(MessageChannel, CompletionFuture)> {
    let stream = TcpStream::connect(remote).map_err(ChannelsError::Io)?;
    let selector = pool.next().clone();
    let token = next_token();

    let (mut processor, channel) = build_processor(stream, ConnectionState::Connecting, Some(remote), &config, selector.clone(), token)?;

    let (promise, future) = completion_pair();
    processor.set_connect_promise(promise);

    selector.submit(Box::new(move |ctx| {
        let mut processor = processor;
        if let Err(err) = processor.register(ctx.registry(), token, Interest::WRITABLE) {
            warn!(%err, "failed to register connecting socket");
            processor.fail_connect(ChannelsError::Io(err));
            return;
        }
        ctx.register_processor(token, Box::new(processor));
    }));

    Ok((channel, future))
}

fn connect_udp(pool: &SelectorPool, config: Arc<ChannelConfig>, remote: SocketAddr) -> ChannelsResult<(MessageChannel, CompletionFuture)> {
    if !remote.is_ipv4() {
        return Err(ChannelsError::Protocol("UDP transport supports IPv4 only".into()));
    }
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).map_err(ChannelsError::Io)?;
    socket.connect(remote).map_err(ChannelsError::Io)?;

    let selector = pool.next().clone();
    let token = next_token();
    let (processor, channel) = build_udp_processor(socket, Some(remote), &config, selector.clone(), token)?;

    let (promise, future) = completion_pair();
    selector.submit(Box::new(move |ctx| {
        let mut processor = processor;
        match processor.register(ctx.registry(), token, Interest::READABLE | Interest::WRITABLE) {
            Ok(()) => {
                ctx.register_processor(token, Box::new(processor));
                promise.resolve(Ok(()));
            }
            Err(err) => promise.resolve(Err(ChannelsError::Io(err))),
        }
    }));

    Ok((channel, future))
}
