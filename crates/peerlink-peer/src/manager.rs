//! The connection manager.
//!
//! One [`LinkManager`] owns the whole lifecycle of a logical peer link:
//! discovery intake, dial/listen/accept sequencing, fixed-interval retry,
//! and teardown. All state lives on a single event thread; discovery
//! events, dial completions, accepts, inbound frames, send requests and
//! timer firings arrive as messages and are processed in order. Helper
//! threads (dial attempts, the accept loop, the retry sleeper, channel
//! readers) never touch manager state — they only post events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use peerlink_frame::{Frame, FrameError, DEFAULT_MAX_PAYLOAD, NO_TAG};
use peerlink_transport::{LinkStream, TcpLoopback, TransportError};
use tracing::{debug, info, warn};

use crate::channel::ChannelHandle;
use crate::connector::{Dialer, LoopbackDialer};
use crate::delegate::LinkDelegate;
use crate::discovery::{DiscoveryEvent, DiscoveryHandle, PeerId};
use crate::error::LinkError;

/// Link manager configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Port shared by both sides: the listen bind port for the listener
    /// role and the dial target for the loopback dialer. No negotiation.
    pub port: u16,
    /// Delay between the end of one attempt and the start of the next.
    pub retry_delay: Duration,
    /// Maximum frame payload size in bytes.
    pub max_payload: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: 2345,
            retry_delay: Duration::from_secs(1),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Everything the event thread reacts to.
#[derive(Debug)]
pub(crate) enum Event {
    Start,
    Stop,
    Disconnect,
    Discovery(DiscoveryEvent),
    DialFinished {
        attempt: u64,
        target: PeerId,
        result: Result<LinkStream, TransportError>,
    },
    Accepted {
        generation: u64,
        stream: LinkStream,
    },
    AcceptEnded {
        generation: u64,
        error: TransportError,
    },
    Inbound {
        channel: u64,
        frame: Frame,
    },
    ChannelEnded {
        channel: u64,
        error: Option<FrameError>,
    },
    RetryFired {
        generation: u64,
    },
    Send {
        frame_type: u32,
        payload: Bytes,
        done: Sender<Result<(), LinkError>>,
    },
    // Exits the event loop; only sent by Drop.
    Shutdown,
}

enum Role {
    /// Actively dials targets. `implicit` is the synthesized always-attached
    /// target of the static loopback mode; hub mode leaves it unset and
    /// waits for attach events.
    Dial {
        dialer: Arc<dyn Dialer>,
        implicit: Option<PeerId>,
    },
    /// Accepts exactly one inbound connection at a time, newest wins.
    Listen,
}

enum LinkState {
    Idle,
    Discovering,
    Dialing {
        target: PeerId,
        attempt: u64,
        started: Instant,
    },
    Listening,
    Connected(ActiveChannel),
}

struct ActiveChannel {
    /// Owning peer; `None` for anonymous listener-accepted peers.
    peer: Option<PeerId>,
    handle: Arc<ChannelHandle>,
    since: Instant,
}

/// Completion signal for one send.
///
/// The caller is never blocked by [`LinkManager::send`] itself; the outcome
/// (including `NotConnected`) is delivered through this ticket.
#[derive(Debug)]
pub struct SendTicket {
    rx: Receiver<Result<(), LinkError>>,
}

impl SendTicket {
    /// Wait for the send outcome.
    pub fn wait(self) -> Result<(), LinkError> {
        self.rx.recv().unwrap_or(Err(LinkError::Stopped))
    }

    /// Wait for the send outcome with a deadline.
    pub fn wait_timeout(self, timeout: Duration) -> Result<(), LinkError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(LinkError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(LinkError::Stopped),
        }
    }
}

/// Manages a single logical peer link for the life of the process.
///
/// Construct one per link with [`loopback`](Self::loopback),
/// [`dialer`](Self::dialer) or [`listener`](Self::listener), then call
/// [`start`](Self::start). The manager cycles between connected and
/// retrying states until [`stop`](Self::stop) or drop; it never gives up
/// on its own.
pub struct LinkManager {
    tx: Sender<Event>,
    connected: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl LinkManager {
    /// Dialer role against the fixed loopback port.
    pub fn loopback(config: LinkConfig, delegate: Arc<dyn LinkDelegate>) -> Self {
        let port = config.port;
        let role = Role::Dial {
            dialer: Arc::new(LoopbackDialer::new(port)),
            implicit: Some(PeerId::Loopback(port)),
        };
        Self::spawn(config, role, delegate)
    }

    /// Dialer role fed by an external discovery source.
    ///
    /// Targets come in through the [`DiscoveryHandle`]; the dialer is asked
    /// to reach whichever peer is currently attached.
    pub fn dialer(
        config: LinkConfig,
        dialer: Arc<dyn Dialer>,
        delegate: Arc<dyn LinkDelegate>,
    ) -> Self {
        let role = Role::Dial {
            dialer,
            implicit: None,
        };
        Self::spawn(config, role, delegate)
    }

    /// Listener role: accept one inbound connection, newest wins.
    pub fn listener(config: LinkConfig, delegate: Arc<dyn LinkDelegate>) -> Self {
        Self::spawn(config, Role::Listen, delegate)
    }

    fn spawn(config: LinkConfig, role: Role, delegate: Arc<dyn LinkDelegate>) -> Self {
        let (tx, rx) = mpsc::channel();
        let connected = Arc::new(AtomicBool::new(false));

        let worker = {
            let tx = tx.clone();
            let connected = Arc::clone(&connected);
            std::thread::spawn(move || {
                Worker::new(config, role, delegate, tx, connected).run(rx);
            })
        };

        Self {
            tx,
            connected,
            worker: Some(worker),
        }
    }

    /// Begin discovery/listening. Idempotent if already started.
    pub fn start(&self) {
        let _ = self.tx.send(Event::Start);
    }

    /// Tear everything down and return to idle. Safe from any state.
    pub fn stop(&self) {
        let _ = self.tx.send(Event::Stop);
    }

    /// Close the active link. The manager keeps running and will
    /// re-establish on the retry cadence or the next attach.
    pub fn disconnect(&self) {
        let _ = self.tx.send(Event::Disconnect);
    }

    /// Whether an active link is currently installed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a typed frame over the active link.
    ///
    /// Never blocks; the outcome arrives on the returned ticket. With no
    /// active link the ticket yields [`LinkError::NotConnected`] without
    /// touching the transport.
    pub fn send(&self, frame_type: u32, payload: impl Into<Bytes>) -> SendTicket {
        let (done, rx) = mpsc::channel();
        let event = Event::Send {
            frame_type,
            payload: payload.into(),
            done,
        };
        // A failed send here drops `done`, which surfaces as Stopped on wait.
        let _ = self.tx.send(event);
        SendTicket { rx }
    }

    /// Handle for an external discovery source to post attach/detach events.
    pub fn discovery_handle(&self) -> DiscoveryHandle {
        DiscoveryHandle::new(self.tx.clone())
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        let _ = self.tx.send(Event::Stop);
        let _ = self.tx.send(Event::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Worker {
    config: LinkConfig,
    role: Role,
    delegate: Arc<dyn LinkDelegate>,
    tx: Sender<Event>,
    connected: Arc<AtomicBool>,

    state: LinkState,
    /// The peer we currently want to be connected to (dialer role).
    desired: Option<PeerId>,
    next_attempt: u64,
    next_channel: u64,
    retry_generation: u64,
    listen_generation: u64,
    listen_running: Option<Arc<AtomicBool>>,
}

impl Worker {
    fn new(
        config: LinkConfig,
        role: Role,
        delegate: Arc<dyn LinkDelegate>,
        tx: Sender<Event>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            role,
            delegate,
            tx,
            connected,
            state: LinkState::Idle,
            desired: None,
            next_attempt: 0,
            next_channel: 0,
            retry_generation: 0,
            listen_generation: 0,
            listen_running: None,
        }
    }

    fn run(mut self, rx: Receiver<Event>) {
        while let Ok(event) = rx.recv() {
            match event {
                Event::Start => self.on_start(),
                Event::Stop => self.on_stop(),
                Event::Disconnect => self.on_disconnect(),
                Event::Discovery(event) => self.on_discovery(event),
                Event::DialFinished {
                    attempt,
                    target,
                    result,
                } => self.on_dial_finished(attempt, target, result),
                Event::Accepted { generation, stream } => self.on_accepted(generation, stream),
                Event::AcceptEnded { generation, error } => {
                    self.on_accept_ended(generation, error)
                }
                Event::Inbound { channel, frame } => self.on_inbound(channel, frame),
                Event::ChannelEnded { channel, error } => self.on_channel_ended(channel, error),
                Event::RetryFired { generation } => self.on_retry_fired(generation),
                Event::Send {
                    frame_type,
                    payload,
                    done,
                } => self.on_send(frame_type, payload, done),
                Event::Shutdown => break,
            }
        }
    }

    // ---- lifecycle -------------------------------------------------------

    fn on_start(&mut self) {
        if !matches!(self.state, LinkState::Idle) {
            debug!("start ignored; already running");
            return;
        }

        match &self.role {
            Role::Dial { implicit, .. } => {
                info!("starting in dialer role");
                self.state = LinkState::Discovering;
                self.desired = *implicit;
                if let Some(target) = self.desired {
                    self.begin_dial(target);
                }
            }
            Role::Listen => {
                info!(port = self.config.port, "starting in listener role");
                self.begin_listen();
            }
        }
    }

    fn on_stop(&mut self) {
        self.stop_listen();
        self.desired = None;
        self.disarm_retry();
        if let LinkState::Connected(active) = &self.state {
            active.handle.close();
            self.connected.store(false, Ordering::SeqCst);
            self.delegate.did_change_connection(false);
        }
        self.state = LinkState::Idle;
        info!("stopped");
    }

    fn on_disconnect(&mut self) {
        match &self.state {
            LinkState::Connected(_) => {
                self.teardown_active(true);
                self.arm_retry_if_wanted();
            }
            LinkState::Dialing { target, .. } => {
                debug!(%target, "disconnect while dialing; attempt abandoned");
                self.state = LinkState::Discovering;
                self.arm_retry_if_wanted();
            }
            _ => {}
        }
    }

    // ---- discovery -------------------------------------------------------

    fn on_discovery(&mut self, event: DiscoveryEvent) {
        // Discovery drives dialing only. A listener keeps whatever inbound
        // link it has regardless of attach/detach chatter.
        if matches!(self.role, Role::Listen) {
            debug!("discovery event in listener role; ignored");
            return;
        }
        if matches!(self.state, LinkState::Idle) {
            debug!("discovery event before start; ignored");
            return;
        }

        match event {
            DiscoveryEvent::Attached { peer, properties } => {
                if self.desired == Some(peer) {
                    debug!(%peer, "duplicate attach for current target");
                    return;
                }
                info!(%peer, %properties, "peer attached");

                // The new attachment supersedes whatever we were doing.
                if matches!(self.state, LinkState::Connected(_)) {
                    self.teardown_active(true);
                }
                self.desired = Some(peer);
                self.disarm_retry();
                self.begin_dial(peer);
            }
            DiscoveryEvent::Detached { peer } => {
                if self.desired != Some(peer) {
                    debug!(%peer, "detach for peer we are not tracking");
                    return;
                }
                info!(%peer, "peer detached");
                self.desired = self.implicit_target();
                self.disarm_retry();

                match &self.state {
                    LinkState::Connected(active) if active.peer == Some(peer) => {
                        // Tear down now; the transport's own close notice
                        // will arrive later and be discarded as stale.
                        self.teardown_active(true);
                    }
                    LinkState::Dialing { target, .. } if *target == peer => {
                        self.state = LinkState::Discovering;
                    }
                    _ => {}
                }
            }
        }
    }

    fn implicit_target(&self) -> Option<PeerId> {
        match &self.role {
            Role::Dial { implicit, .. } => *implicit,
            Role::Listen => None,
        }
    }

    // ---- dialing ---------------------------------------------------------

    fn begin_dial(&mut self, target: PeerId) {
        let dialer = match &self.role {
            Role::Dial { dialer, .. } => Arc::clone(dialer),
            Role::Listen => return,
        };

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.state = LinkState::Dialing {
            target,
            attempt,
            started: Instant::now(),
        };
        debug!(%target, attempt, "dialing");

        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let result = dialer.dial(target);
            let _ = tx.send(Event::DialFinished {
                attempt,
                target,
                result,
            });
        });
    }

    fn on_dial_finished(
        &mut self,
        attempt: u64,
        target: PeerId,
        result: Result<LinkStream, TransportError>,
    ) {
        let elapsed = match &self.state {
            LinkState::Dialing {
                attempt: a,
                started,
                ..
            } if *a == attempt => Some(started.elapsed()),
            _ => None,
        };
        if elapsed.is_none() || self.desired != Some(target) {
            debug!(%target, attempt, "discarding stale dial completion");
            if let Ok(stream) = result {
                let _ = stream.shutdown();
            }
            return;
        }

        match result {
            Ok(stream) => self.install_channel(stream, Some(target)),
            Err(err) => {
                debug!(%target, error = %err, elapsed = ?elapsed, "dial failed");
                self.state = LinkState::Discovering;
                self.arm_retry();
            }
        }
    }

    // ---- listening -------------------------------------------------------

    fn begin_listen(&mut self) {
        self.listen_generation += 1;
        let generation = self.listen_generation;

        let listener = match TcpLoopback::bind(self.config.port) {
            Ok(listener) => listener,
            Err(err) => {
                warn!(port = self.config.port, error = %err, "bind failed");
                self.state = LinkState::Listening;
                self.arm_retry();
                return;
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        self.listen_running = Some(Arc::clone(&running));
        self.state = LinkState::Listening;

        let tx = self.tx.clone();
        std::thread::spawn(move || loop {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok(stream) => {
                    if !running.load(Ordering::SeqCst) {
                        let _ = stream.shutdown();
                        break;
                    }
                    if tx.send(Event::Accepted { generation, stream }).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    let _ = tx.send(Event::AcceptEnded { generation, error });
                    break;
                }
            }
        });
    }

    fn stop_listen(&mut self) {
        if let Some(running) = self.listen_running.take() {
            running.store(false, Ordering::SeqCst);
            self.listen_generation += 1;
            // Wake the accept loop so it can observe the stop flag.
            if let Ok(stream) = TcpLoopback::connect(self.config.port) {
                let _ = stream.shutdown();
            }
        }
    }

    fn on_accepted(&mut self, generation: u64, stream: LinkStream) {
        if generation != self.listen_generation || matches!(self.state, LinkState::Idle) {
            debug!("discarding connection from stale accept loop");
            let _ = stream.shutdown();
            return;
        }
        self.install_channel(stream, None);
    }

    fn on_accept_ended(&mut self, generation: u64, error: TransportError) {
        if generation != self.listen_generation {
            return;
        }
        warn!(error = %error, "accept loop ended");
        self.listen_running = None;
        self.arm_retry();
    }

    // ---- active channel --------------------------------------------------

    fn install_channel(&mut self, stream: LinkStream, peer: Option<PeerId>) {
        // At most one active channel: close the old one before the new one
        // goes in. Replacement is silent; the delegate only hears about the
        // link that is up.
        if let LinkState::Connected(previous) = &self.state {
            debug!("replacing active channel");
            previous.handle.close();
        }

        self.next_channel += 1;
        let id = self.next_channel;

        let handle =
            match ChannelHandle::spawn(id, stream, self.config.max_payload, self.tx.clone()) {
                Ok(handle) => handle,
                Err(err) => {
                    warn!(error = %err, "failed to set up channel");
                    self.state = self.disconnected_state();
                    self.arm_retry_if_wanted();
                    return;
                }
            };

        self.state = LinkState::Connected(ActiveChannel {
            peer,
            handle,
            since: Instant::now(),
        });
        self.connected.store(true, Ordering::SeqCst);
        self.disarm_retry();

        match peer {
            Some(peer) => info!(%peer, "link established"),
            None => info!("link established (inbound)"),
        }
        self.delegate.did_change_connection(true);
    }

    fn teardown_active(&mut self, notify: bool) {
        if let LinkState::Connected(active) = &self.state {
            let uptime = active.since.elapsed();
            active.handle.close();
            debug!(?uptime, "link torn down");
            self.state = self.disconnected_state();
            self.connected.store(false, Ordering::SeqCst);
            if notify {
                self.delegate.did_change_connection(false);
            }
        }
    }

    fn disconnected_state(&self) -> LinkState {
        match &self.role {
            Role::Dial { .. } => LinkState::Discovering,
            Role::Listen => LinkState::Listening,
        }
    }

    fn on_channel_ended(&mut self, channel: u64, error: Option<FrameError>) {
        let is_active = matches!(
            &self.state,
            LinkState::Connected(active) if active.handle.id() == channel
        );
        if !is_active {
            debug!(channel, "end-of-channel for superseded channel; ignored");
            return;
        }

        match &error {
            Some(err) => debug!(channel, error = %err, "channel ended with error"),
            None => debug!(channel, "channel ended"),
        }

        self.teardown_active(true);
        match &self.role {
            Role::Dial { .. } => self.arm_retry_if_wanted(),
            // The accept loop keeps running; only re-arm if it died.
            Role::Listen => {
                if self.listen_running.is_none() {
                    self.arm_retry();
                }
            }
        }
    }

    fn on_inbound(&mut self, channel: u64, frame: Frame) {
        let is_active = matches!(
            &self.state,
            LinkState::Connected(active) if active.handle.id() == channel
        );
        if !is_active {
            debug!(channel, "frame from superseded channel; dropped");
            return;
        }

        if !self.delegate.should_accept_frame(frame.frame_type) {
            debug!(frame_type = frame.frame_type, "frame rejected by delegate");
            return;
        }
        self.delegate.did_receive_frame(frame.frame_type, frame.payload);
    }

    fn on_send(
        &mut self,
        frame_type: u32,
        payload: Bytes,
        done: Sender<Result<(), LinkError>>,
    ) {
        match &self.state {
            // The write happens on the channel's writer thread; a peer that
            // stops reading stalls that thread, never this one, so detach
            // and stop stay responsive while a send is in flight.
            LinkState::Connected(active) => {
                active.handle.send_frame(frame_type, NO_TAG, payload, done);
            }
            _ => {
                debug!(frame_type, "send with no active link");
                let _ = done.send(Err(LinkError::NotConnected));
            }
        }
    }

    // ---- retry timer -----------------------------------------------------

    fn arm_retry(&mut self) {
        self.retry_generation += 1;
        let generation = self.retry_generation;
        let delay = self.config.retry_delay;
        debug!(?delay, "retry armed");

        let tx = self.tx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            let _ = tx.send(Event::RetryFired { generation });
        });
    }

    fn arm_retry_if_wanted(&mut self) {
        if self.desired.is_some() {
            self.arm_retry();
        }
    }

    fn disarm_retry(&mut self) {
        self.retry_generation += 1;
    }

    fn on_retry_fired(&mut self, generation: u64) {
        if generation != self.retry_generation {
            return;
        }
        match self.state {
            LinkState::Idle | LinkState::Connected(_) => return,
            _ => {}
        }

        match &self.role {
            Role::Dial { .. } => {
                if let Some(target) = self.desired {
                    debug!(%target, "retrying");
                    self.begin_dial(target);
                }
            }
            Role::Listen => {
                if self.listen_running.is_none() {
                    debug!("re-binding listener");
                    self.begin_listen();
                }
            }
        }
    }
}
