//! The host: one engine, its peers, and the dispatcher that reports on them.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fjord_framing::{Packet, PacketFlags};
use fjord_transport::{ChannelId, Endpoint, Engine, EngineEvent, PeerId, UdpEngine};
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::dispatcher::{EventDispatcher, EventHandler};
use crate::error::{HostError, Result};
use crate::event::{ConnectEvent, DisconnectEvent, Event, ReceiveEvent};
use crate::peer::Peer;

/// Longest stretch the engine lock is held by one `service` call
pub const SERVICE_SLICE: Duration = Duration::from_millis(10);

/// Whether a host listens for connections or only initiates them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRole {
    Server,
    Client,
}

/// State reachable from peers through a `Weak` back-reference
pub(crate) struct HostShared {
    engine: Mutex<Box<dyn Engine>>,
    dispatcher: RwLock<EventDispatcher>,
    peers: Mutex<Vec<Weak<Peer>>>,
    role: HostRole,
    config: HostConfig,
}

impl HostShared {
    pub(crate) fn lock_engine(&self) -> MutexGuard<'_, Box<dyn Engine>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_peers(&self) -> MutexGuard<'_, Vec<Weak<Peer>>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Existing wrapper for `id`, or a new weakly registered one
    fn resolve_peer(self: &Arc<Self>, id: PeerId, address: SocketAddr) -> Arc<Peer> {
        let mut peers = self.lock_peers();
        if let Some(existing) = peers
            .iter()
            .filter_map(Weak::upgrade)
            .find(|peer| peer.id() == id)
        {
            return existing;
        }

        let peer = Arc::new(Peer::new(id, address, Arc::downgrade(self)));
        peers.retain(|weak| weak.strong_count() > 0);
        peers.push(Arc::downgrade(&peer));
        peer
    }

    fn wrap(self: &Arc<Self>, event: EngineEvent) -> Event {
        let peer = self.resolve_peer(event.peer(), event.address());
        let endpoint = Endpoint::from_socket_addr(event.address());
        match event {
            EngineEvent::Connect { data, .. } => ConnectEvent {
                peer,
                endpoint,
                data,
            }
            .into(),
            EngineEvent::Disconnect { data, .. } => DisconnectEvent {
                peer,
                endpoint,
                data,
            }
            .into(),
            EngineEvent::Receive {
                channel, packet, ..
            } => ReceiveEvent {
                peer,
                endpoint,
                channel,
                packet,
            }
            .into(),
        }
    }

    fn service(self: &Arc<Self>, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let event = loop {
            let slice = deadline.saturating_duration_since(Instant::now()).min(SERVICE_SLICE);
            let polled = self.lock_engine().service(slice).map_err(HostError::Service)?;
            if let Some(event) = polled {
                break event;
            }
            if Instant::now() >= deadline {
                return Ok(0);
            }
        };

        let event = self.wrap(event);
        self.dispatcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dispatch(&event);
        Ok(1)
    }
}

struct ServiceThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A network host: a server bound to a known endpoint, or a client on an
/// ephemeral port.
///
/// Events are produced by [`service`](Self::service), either called by the
/// application or by the background thread started with
/// [`start_service_thread`](Self::start_service_thread). Handlers run
/// synchronously on the servicing thread.
pub struct Host {
    shared: Arc<HostShared>,
    service_thread: Mutex<Option<ServiceThread>>,
}

impl Host {
    /// Bind a server host to `endpoint`.
    pub fn create_server(endpoint: &Endpoint, config: HostConfig) -> Result<Self> {
        config.validate()?;
        fjord_transport::initialize();

        let address = endpoint.to_socket_addr().map_err(HostError::TransportInit)?;
        let engine = UdpEngine::bind(Some(address), &config.engine_config()).map_err(HostError::TransportInit)?;
        info!(
            "Server host listening on {}",
            engine.local_addr().map_or_else(|_| address.to_string(), |a| a.to_string())
        );
        Ok(Self::with_engine(Box::new(engine), HostRole::Server, config))
    }

    /// Create a client host on an ephemeral local port.
    pub fn create_client(config: HostConfig) -> Result<Self> {
        config.validate()?;
        fjord_transport::initialize();

        let engine = UdpEngine::bind(None, &config.engine_config()).map_err(HostError::TransportInit)?;
        debug!("Client host bound to {:?}", engine.local_addr().ok());
        Ok(Self::with_engine(Box::new(engine), HostRole::Client, config))
    }

    /// Wrap an already constructed engine.
    pub fn with_engine(engine: Box<dyn Engine>, role: HostRole, config: HostConfig) -> Self {
        Self {
            shared: Arc::new(HostShared {
                engine: Mutex::new(engine),
                dispatcher: RwLock::new(EventDispatcher::new()),
                peers: Mutex::new(Vec::new()),
                role,
                config,
            }),
            service_thread: Mutex::new(None),
        }
    }

    /// Start connecting to `endpoint`.
    ///
    /// The returned peer is connecting; a Connect event reports success and a
    /// Disconnect event reports failure.
    pub fn connect(&self, endpoint: &Endpoint, channels: usize, data: u32) -> Result<Arc<Peer>> {
        let address = endpoint.to_socket_addr().map_err(HostError::ConnectionInit)?;
        let id = self
            .shared
            .lock_engine()
            .connect(address, channels, data)
            .map_err(HostError::ConnectionInit)?;
        debug!("Connecting to {} as peer {}", endpoint, id);
        Ok(self.shared.resolve_peer(id, address))
    }

    /// Wait up to `timeout` for one event and dispatch it.
    ///
    /// Returns the number of events dispatched (0 or 1).
    pub fn service(&self, timeout: Duration) -> Result<usize> {
        self.shared.service(timeout)
    }

    pub fn flush(&self) {
        self.shared.lock_engine().flush();
    }

    /// Queue `packet` for every connected peer.
    pub fn broadcast(&self, channel: ChannelId, packet: Packet) {
        self.shared.lock_engine().broadcast(channel, packet);
    }

    pub fn broadcast_bytes(&self, channel: ChannelId, data: &[u8], flags: PacketFlags) {
        self.broadcast(channel, Packet::new(data, flags));
    }

    /// Service continuously on a background thread. No-op if already running.
    pub fn start_service_thread(&self) -> Result<()> {
        let mut slot = self
            .service_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(running) = slot.as_ref() {
            if !running.handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(finished) = slot.take() {
            let _ = finished.handle.join();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let stop_flag = Arc::clone(&stop);
        let timeout = self.shared.config.service_timeout;

        let handle = thread::Builder::new()
            .name("fjord-service".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    if let Err(e) = shared.service(timeout) {
                        warn!("Service error: {}", e);
                        thread::sleep(timeout);
                    }
                }
                debug!("Service thread exiting");
            })
            .map_err(HostError::Spawn)?;

        info!("Service thread started");
        *slot = Some(ServiceThread { stop, handle });
        Ok(())
    }

    /// Stop the background thread and wait for it to exit.
    ///
    /// Called from a handler on the service thread itself, this only signals;
    /// the thread exits once the handler returns.
    pub fn stop_service_thread(&self) {
        let Some(running) = self
            .service_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        running.stop.store(true, Ordering::Release);
        if running.handle.thread().id() == thread::current().id() {
            return;
        }
        if running.handle.join().is_err() {
            warn!("Service thread panicked");
        }
        info!("Service thread stopped");
    }

    pub fn is_service_thread_running(&self) -> bool {
        self.service_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Peers still referenced somewhere in the application
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        let mut peers = self.shared.lock_peers();
        peers.retain(|weak| weak.strong_count() > 0);
        peers.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn find_peer(&self, endpoint: &Endpoint) -> Option<Arc<Peer>> {
        let address = endpoint.to_socket_addr().ok()?;
        self.peers().into_iter().find(|peer| peer.address() == address)
    }

    /// Live peer wrappers, including peers that are still connecting
    pub fn peer_count(&self) -> usize {
        self.shared
            .lock_peers()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_server(&self) -> bool {
        self.shared.role == HostRole::Server
    }

    pub fn is_client(&self) -> bool {
        self.shared.role == HostRole::Client
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.lock_engine().local_addr().ok()
    }

    pub fn config(&self) -> &HostConfig {
        &self.shared.config
    }

    /// Mutate the dispatcher under its write lock.
    ///
    /// Must not be called from inside a handler.
    pub fn with_dispatcher<R>(&self, f: impl FnOnce(&mut EventDispatcher) -> R) -> R {
        let mut dispatcher = self
            .shared
            .dispatcher
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut dispatcher)
    }

    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&ConnectEvent) + Send + Sync + 'static,
    {
        self.with_dispatcher(|d| d.on_connect(handler));
    }

    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(&DisconnectEvent) + Send + Sync + 'static,
    {
        self.with_dispatcher(|d| d.on_disconnect(handler));
    }

    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(&ReceiveEvent) + Send + Sync + 'static,
    {
        self.with_dispatcher(|d| d.on_receive(handler));
    }

    pub fn on_channel_receive<F>(&self, channel: ChannelId, handler: F)
    where
        F: Fn(&ReceiveEvent) + Send + Sync + 'static,
    {
        self.with_dispatcher(|d| d.on_channel_receive(channel, handler));
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.with_dispatcher(|d| d.add_handler(handler));
    }

    pub fn clear_handlers(&self) {
        self.with_dispatcher(EventDispatcher::clear_handlers);
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.stop_service_thread();
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("role", &self.shared.role)
            .field("peers", &self.peer_count())
            .field("service_thread", &self.is_service_thread_running())
            .finish()
    }
}
