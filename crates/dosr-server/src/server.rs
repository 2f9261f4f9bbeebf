//! The node event loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dosr_failover::{ConnId, Engine, EngineConfig, KillSwitch, Service};
use dosr_types::{PeerAddr, Topology};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::transport::{ConnectProgress, MioTransport, conn_id};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
#[cfg(unix)]
const SIGNAL: Token = Token(2);
const FIRST_CONNECTION: usize = 3;

/// A failover node: a listener, its peer connections, and the engine that
/// owns every coordination registry.
///
/// [`run`](Self::run) is single-threaded. Accepting, reading, the heartbeat
/// cycle and the backup cycle are phases of one loop, so the engine needs
/// no locks. No phase blocks on the network: outbound connects complete on
/// later readiness events.
pub struct Server<S> {
    config: ServerConfig,
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    waker: Arc<Waker>,
    engine: Engine<MioTransport, S>,
    #[cfg(unix)]
    signals: Option<signal_hook_mio::v1_0::Signals>,
}

impl<S: Service> Server<S> {
    /// Binds the listener and builds the engine.
    ///
    /// A zero port in the engine's advertised address is replaced by the
    /// port actually bound, so tests can listen on `127.0.0.1:0`.
    pub fn new(
        config: ServerConfig,
        mut engine_config: EngineConfig,
        topology: Topology,
        service: S,
    ) -> ServerResult<Self> {
        let poll = Poll::new()?;
        let mut listener =
            TcpListener::bind(config.bind_addr).map_err(|source| ServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        if engine_config.local.port() == 0 {
            engine_config.local = PeerAddr::new(engine_config.local.host(), local_addr.port());
        }
        let transport = MioTransport::new(poll.registry().try_clone()?, FIRST_CONNECTION, &config);
        let engine = Engine::builder(engine_config)
            .topology(topology)
            .transport(transport)
            .service(service)
            .build()?;

        info!(%local_addr, node = %engine.local(), "listening");
        Ok(Self {
            config,
            poll,
            listener,
            local_addr,
            waker,
            engine,
            #[cfg(unix)]
            signals: None,
        })
    }

    /// Stops the loop on SIGINT or SIGTERM.
    #[cfg(unix)]
    pub fn with_signal_handling(mut self) -> ServerResult<Self> {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let mut signals = signal_hook_mio::v1_0::Signals::new([SIGINT, SIGTERM])?;
        self.poll
            .registry()
            .register(&mut signals, SIGNAL, Interest::READABLE)?;
        self.signals = Some(signals);
        Ok(self)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn engine(&self) -> &Engine<MioTransport, S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<MioTransport, S> {
        &mut self.engine
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            kill: self.engine.kill_switch(),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Runs until the engine is killed, by a peer's `kill` frame, a
    /// [`ShutdownHandle`], or a signal.
    pub fn run(&mut self) -> ServerResult<()> {
        let mut events = Events::with_capacity(1024);
        let started = Instant::now();
        self.engine.start(started);
        let mut next_tick = started + self.config.tick_interval;

        while !self.engine.is_killed() {
            let timeout = next_tick.saturating_duration_since(Instant::now());
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in &events {
                match event.token() {
                    LISTENER => self.accept_connections(),
                    WAKER => debug!("woken"),
                    #[cfg(unix)]
                    SIGNAL => self.handle_signals(),
                    token => self.connection_ready(
                        conn_id(token),
                        event.is_readable() || event.is_read_closed(),
                        event.is_writable(),
                    ),
                }
            }

            let now = Instant::now();
            if now >= next_tick {
                for conn in self.engine.transport_mut().expire_connects(now) {
                    self.engine.on_connect_failed(conn);
                }
                self.engine.heartbeat_cycle(now);
                self.engine.run_backup_cycle(now);
                next_tick = now + self.config.tick_interval;
            }
        }

        let open = self.engine.transport().len();
        if open > 0 {
            debug!(open, "closing peer connections");
        }
        self.engine.transport_mut().close_all();
        info!(status = %self.engine.status(), "server stopped");
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%addr, error = %e, "set_nodelay failed");
                    }
                    let remote = PeerAddr::from(addr);
                    match self.engine.transport_mut().insert(stream, remote.clone()) {
                        Ok(conn) => {
                            self.engine.on_accept(conn, &remote, Instant::now());
                        }
                        Err(e) => warn!(%addr, error = %e, "rejecting connection"),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "accept error");
                    break;
                }
            }
        }
    }

    fn connection_ready(&mut self, conn: ConnId, readable: bool, writable: bool) {
        match self.engine.transport_mut().finish_connect(conn) {
            ConnectProgress::Established => {}
            ConnectProgress::Pending => return,
            ConnectProgress::Failed => {
                self.engine.on_connect_failed(conn);
                return;
            }
        }
        if writable && !self.engine.transport_mut().flush(conn) {
            self.engine.on_disconnect(conn, Instant::now());
            return;
        }
        if !readable {
            return;
        }
        let Some(inbound) = self.engine.transport_mut().read(conn) else {
            return;
        };

        let now = Instant::now();
        for frame in inbound.frames {
            self.engine.on_frame(conn, frame, now);
        }
        if !inbound.open {
            self.engine.on_disconnect(conn, now);
        }
    }

    #[cfg(unix)]
    fn handle_signals(&mut self) {
        let Some(signals) = self.signals.as_mut() else {
            return;
        };
        for signal in signals.pending() {
            info!(signal, "received shutdown signal");
            self.engine.kill();
        }
    }
}

/// Stops a running [`Server`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    kill: KillSwitch,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Sets the kill switch and wakes the loop.
    pub fn shutdown(&self) {
        if self.kill.trigger() {
            info!("shutdown requested");
        }
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake event loop");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.kill.is_triggered()
    }
}
