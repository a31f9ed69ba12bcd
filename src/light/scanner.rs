use crate::app_config::AppConfig;
use crate::domain::device::LightDescriptor;
use crate::domain::events::LightEvent;
use crate::light::session::DeviceSession;
use crate::light::ssdp::{self, SsdpReply};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

#[derive(Debug, Default)]
struct Inner {
    table: HashMap<String, DeviceSession>,
    listener_task: Option<JoinHandle<()>>,
}

/// Periodic multicast discovery. Owns the device table: sessions are created
/// by replies, destroyed by prune and by reset, and never shared between
/// discovery cycles.
#[derive(Debug, Clone)]
pub struct DiscoveryScanner {
    inner: Arc<Mutex<Inner>>,
    config: Arc<AppConfig>,
    events: Sender<LightEvent>,
}

impl DiscoveryScanner {
    pub fn new(config: Arc<AppConfig>, events: Sender<LightEvent>) -> Self {
        DiscoveryScanner {
            inner: Arc::new(Mutex::new(Inner::default())),
            config,
            events,
        }
    }

    /// Starts a new discovery cycle. Any previous listener is stopped and all
    /// pre-reset sessions are destroyed first, so at most one live session
    /// exists per device id even though identities persist across cycles.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<(), std::io::Error> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;

        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.listener_task.take() {
            task.abort();
        }
        let stale: Vec<DeviceSession> = inner.table.drain().map(|(_, session)| session).collect();
        if !stale.is_empty() {
            info!("🔄 Discovery reset, destroying {} session(s)", stale.len());
        }
        for session in stale {
            session.destroy().await;
        }
        inner.listener_task = Some(tokio::task::spawn(Self::run(self.clone(), socket)));
        drop(inner);

        for entry in self.config.discovery().manual_lights() {
            match ssdp::parse_location(entry) {
                Some((host, port)) => {
                    let scanner = self.clone();
                    tokio::task::spawn(async move {
                        scanner.add_manual(&host, port).await;
                    });
                }
                None => warn!("⚠️ Ignoring manual light entry '{entry}'"),
            }
        }

        Ok(())
    }

    /// Stops the listener and destroys every tracked session.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.listener_task.take() {
            task.abort();
        }
        let stale: Vec<DeviceSession> = inner.table.drain().map(|(_, session)| session).collect();
        for session in stale {
            session.destroy().await;
        }
    }

    /// Sweeps the table, synchronously destroying every session that is not
    /// connected, and returns the retained descriptors. Callers run this
    /// after any event that can change device topology so downstream
    /// consumers never observe a stale-connected light.
    pub async fn prune_lights(&self) -> Vec<LightDescriptor> {
        let mut inner = self.inner.lock().await;

        let mut stale = Vec::new();
        for (id, session) in &inner.table {
            if !session.is_connected().await {
                stale.push(id.clone());
            }
        }
        for id in &stale {
            if let Some(session) = inner.table.remove(id) {
                debug!(device_id = %id, "✂️ Pruning light");
                session.destroy().await;
            }
        }

        let mut retained = Vec::with_capacity(inner.table.len());
        for session in inner.table.values() {
            retained.push(session.descriptor().await);
        }
        retained
    }

    pub async fn session(&self, device_id: &str) -> Option<DeviceSession> {
        self.inner.lock().await.table.get(device_id).cloned()
    }

    pub async fn sessions(&self) -> Vec<DeviceSession> {
        self.inner.lock().await.table.values().cloned().collect()
    }

    /// Adds a light by host and port, bypassing discovery. The descriptor has
    /// no support list, so every method is permitted until the first state
    /// refresh classifies it.
    pub async fn add_manual(&self, host: &str, port: u16) -> DeviceSession {
        let descriptor = LightDescriptor {
            id: format!("{host}:{port}"),
            mac: ssdp::resolve_mac(host),
            host: host.to_string(),
            port,
            ..Default::default()
        };

        let session = DeviceSession::new(
            descriptor.clone(),
            Default::default(),
            Arc::clone(&self.config),
            self.events.clone(),
        );
        self.inner
            .lock()
            .await
            .table
            .insert(descriptor.id.clone(), session.clone());
        self.emit(LightEvent::Detected { descriptor });

        session.init().await;
        session
    }

    async fn run(self, socket: UdpSocket) {
        let target = self.config.discovery().multicast_address().to_string();
        let message = ssdp::search_message(&target);
        let mut ticker = tokio::time::interval(self.config.discovery().interval());
        let mut buffer = vec![0u8; 2048];

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("🔎 Searching for lights...");
                    if let Err(e) = socket.send_to(message.as_bytes(), &target).await {
                        warn!("⚠️ Discovery search failed: {e}");
                    }
                }
                received = socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, from)) => {
                            trace!("Discovery reply from {from}");
                            if let Ok(text) = std::str::from_utf8(&buffer[..len]) {
                                self.handle_reply(text).await;
                            }
                        }
                        Err(e) => warn!("⚠️ Discovery receive failed: {e}"),
                    }
                }
            }
        }
    }

    /// Reconciles one discovery reply against the device table. Parse
    /// failures are dropped per-entry and never abort the scan cycle.
    pub(crate) async fn handle_reply(&self, text: &str) {
        let Some(reply) = SsdpReply::parse(text) else {
            trace!("Ignoring unparsable discovery reply");
            return;
        };

        let existing = self.inner.lock().await.table.get(&reply.id).cloned();
        if let Some(session) = existing {
            // idempotent merge, replies repeat on every cycle
            session.update_from_discovery(&reply).await;
            return;
        }

        let (descriptor, state) = reply.seed();
        info!(device_id = descriptor.id, "💡 Light detected: '{}' at {}:{}", descriptor.name, descriptor.host, descriptor.port);

        let session = DeviceSession::new(
            descriptor.clone(),
            state,
            Arc::clone(&self.config),
            self.events.clone(),
        );
        self.inner
            .lock()
            .await
            .table
            .insert(reply.id.clone(), session.clone());
        self.emit(LightEvent::Detected { descriptor });

        tokio::task::spawn(async move {
            session.connect().await;
        });
    }

    fn emit(&self, event: LightEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("⚠️ Dropping light event: {e}");
        }
    }
}
