use crate::app_config::AppConfig;
use crate::domain::device::{ColorKind, LightDescriptor, LightState};
use crate::domain::events::LightEvent;
use crate::light::error::LightError;
use crate::light::protocol::{Frame, PropsUpdate, Request};
use crate::light::ssdp::SsdpReply;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc::Sender;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// Liveness probe, written raw with id -1. It is never registered as a
/// pending request, so its replies fall into the unmatched-id discard path.
const HEARTBEAT_PROBE: &str = "{\"id\":-1,\"method\":\"get_prop\",\"params\":[\"power\"]}\r\n";

const STATE_PROPERTIES: [&str; 7] = ["power", "color_mode", "ct", "rgb", "hue", "sat", "bright"];

const BLINK_STEP: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Destroyed,
}

#[derive(Debug)]
struct Pending {
    method: String,
    params: Vec<Value>,
    resolve: oneshot::Sender<Result<Vec<Value>, LightError>>,
}

#[derive(Debug)]
struct Inner {
    descriptor: LightDescriptor,
    state: LightState,
    phase: SessionPhase,
    writer: Option<OwnedWriteHalf>,
    pending: HashMap<i64, Pending>,
    next_id: i64,
    last_answer: Instant,
    reader_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
}

/// One logical connection to a light. The handle is cheap to clone; all
/// mutable state lives behind a single lock so message handling, command
/// issuance and timers serialize without assuming a single-threaded runtime.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    inner: Arc<Mutex<Inner>>,
    events: Sender<LightEvent>,
    config: Arc<AppConfig>,
}

impl DeviceSession {
    pub fn new(
        descriptor: LightDescriptor,
        state: LightState,
        config: Arc<AppConfig>,
        events: Sender<LightEvent>,
    ) -> Self {
        DeviceSession {
            inner: Arc::new(Mutex::new(Inner {
                descriptor,
                state,
                phase: SessionPhase::Idle,
                writer: None,
                pending: HashMap::new(),
                next_id: 1,
                last_answer: Instant::now(),
                reader_task: None,
                heartbeat_task: None,
            })),
            events,
            config,
        }
    }

    pub async fn descriptor(&self) -> LightDescriptor {
        self.inner.lock().await.descriptor.clone()
    }

    pub async fn state(&self) -> LightState {
        self.inner.lock().await.state
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.lock().await.phase
    }

    pub async fn is_connected(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.phase == SessionPhase::Connected && inner.writer.is_some()
    }

    /// Two handles are the same session iff they share the same core.
    pub fn ptr_eq(&self, other: &DeviceSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Entry point for manually added lights: connect, then refresh the full
    /// cached state once.
    pub async fn init(&self) {
        self.connect().await;
        if let Err(e) = self.update_state().await {
            warn!("⚠️ Initial state refresh failed: {e}");
        }
    }

    /// Opens the TCP connection, tearing down any prior socket first. Safe to
    /// call again from `Disconnected`; a no-op once destroyed.
    #[instrument(skip_all)]
    pub async fn connect(&self) {
        let (host, port) = {
            let mut inner = self.inner.lock().await;
            if inner.phase == SessionPhase::Destroyed {
                return;
            }
            if inner.writer.is_some() || inner.heartbeat_task.is_some() {
                self.disconnect_locked(&mut inner);
            }
            inner.phase = SessionPhase::Connecting;
            (inner.descriptor.host.clone(), inner.descriptor.port)
        };

        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                let (read_half, write_half) = stream.into_split();
                let mut inner = self.inner.lock().await;
                // Destroyed or reset while the connect was in flight
                if inner.phase != SessionPhase::Connecting {
                    return;
                }
                inner.writer = Some(write_half);
                inner.last_answer = Instant::now();
                inner.phase = SessionPhase::Connected;
                inner.reader_task = Some(tokio::task::spawn(Self::read_frames(self.clone(), read_half)));
                inner.heartbeat_task = Some(tokio::task::spawn(Self::heartbeat(self.clone())));
                let descriptor = inner.descriptor.clone();
                drop(inner);

                info!(device_id = descriptor.id, "🔌 Connected to light at {}:{}", host, port);
                self.emit(LightEvent::Connected { descriptor });
            }
            Err(e) => {
                let descriptor = {
                    let mut inner = self.inner.lock().await;
                    if inner.phase == SessionPhase::Connecting {
                        inner.phase = SessionPhase::Disconnected;
                    }
                    inner.descriptor.clone()
                };
                warn!(device_id = descriptor.id, "⚠️ Could not connect to {}:{}: {}", host, port, e);
                self.emit(LightEvent::Failed {
                    descriptor,
                    reason: LightError::Connection(e).to_string(),
                });
            }
        }
    }

    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.writer.is_none() && inner.heartbeat_task.is_none() && inner.phase != SessionPhase::Connected {
            return;
        }
        self.disconnect_locked(&mut inner);
    }

    /// Tears down the socket and both timer tasks. In-flight requests are
    /// deliberately left pending; each settles through its own timeout.
    fn disconnect_locked(&self, inner: &mut Inner) {
        if let Some(task) = inner.reader_task.take() {
            task.abort();
        }
        if let Some(task) = inner.heartbeat_task.take() {
            task.abort();
        }
        inner.writer = None;
        if inner.phase != SessionPhase::Destroyed {
            inner.phase = SessionPhase::Disconnected;
        }

        debug!(device_id = inner.descriptor.id, "🔴 Disconnected");
        self.emit(LightEvent::Disconnected {
            descriptor: inner.descriptor.clone(),
        });
    }

    /// Terminal teardown. The session stops emitting and cannot be revived;
    /// rediscovery creates a fresh session for the same descriptor.
    pub async fn destroy(&self) {
        let mut inner = self.inner.lock().await;
        if inner.phase == SessionPhase::Destroyed {
            return;
        }
        self.disconnect_locked(&mut inner);
        inner.phase = SessionPhase::Destroyed;

        info!(device_id = inner.descriptor.id, "🗑️ Session destroyed");
        self.emit(LightEvent::Destroyed {
            descriptor: inner.descriptor.clone(),
        });
    }

    /// Merges a discovery reply into the descriptor and cached state. Replies
    /// repeat on every scan cycle, so this is idempotent; a changed host or
    /// port takes effect on the next reconnect.
    pub async fn update_from_discovery(&self, reply: &SsdpReply) {
        let mut inner = self.inner.lock().await;
        if inner.phase == SessionPhase::Destroyed {
            return;
        }
        let mut state = inner.state;
        reply.apply_to(&mut inner.descriptor, &mut state);
        inner.state = state;
        self.emit_state_locked(&inner);
    }

    pub async fn set_power(&self, power: bool, duration_ms: u64) -> Result<(), LightError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state.apply_power(power);
            self.emit_state_locked(&inner);
        }

        let params = vec![
            json!(if power { "on" } else { "off" }),
            effect(duration_ms),
            json!(duration_ms),
        ];
        self.send_command("set_power", params).await.map(drop)
    }

    pub async fn set_bright(&self, bright: u8, duration_ms: u64) -> Result<(), LightError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state.apply_bright(bright);
            self.emit_state_locked(&inner);
        }

        let params = vec![json!(bright), effect(duration_ms), json!(duration_ms)];
        self.send_command("set_bright", params).await.map(drop)
    }

    pub async fn set_rgb(&self, rgb: [u8; 3], duration_ms: u64) -> Result<(), LightError> {
        let packed = (u32::from(rgb[0]) << 16) | (u32::from(rgb[1]) << 8) | u32::from(rgb[2]);
        {
            let mut inner = self.inner.lock().await;
            inner.state.apply_rgb(packed, None);
            self.emit_state_locked(&inner);
        }

        let params = vec![json!(packed), effect(duration_ms), json!(duration_ms)];
        self.send_command("set_rgb", params).await.map(drop)
    }

    /// There is no single wire call for hue+saturation+brightness: this issues
    /// `set_hsv` plus a brightness command and resolves once both complete.
    pub async fn set_hsv(&self, hue: u16, sat: u8, value: u8, duration_ms: u64) -> Result<(), LightError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state.apply_hsv(hue, sat, Some(value));
            self.emit_state_locked(&inner);
        }

        let params = vec![json!(hue), json!(sat), effect(duration_ms), json!(duration_ms)];
        let (_, ()) = tokio::try_join!(
            self.send_command("set_hsv", params),
            self.set_bright(value, duration_ms)
        )?;
        Ok(())
    }

    /// Color temperature in the device domain [1700, 6500]. Values outside
    /// are passed through unclamped.
    pub async fn set_ct(&self, kelvin: u16, duration_ms: u64) -> Result<(), LightError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state.apply_ct(kelvin, None);
            self.emit_state_locked(&inner);
        }

        let params = vec![json!(kelvin), effect(duration_ms), json!(duration_ms)];
        self.send_command("set_ct_abx", params).await.map(drop)
    }

    /// Refreshes the full cached state with one `get_prop` sweep.
    pub async fn update_state(&self) -> Result<(), LightError> {
        let params = STATE_PROPERTIES.iter().map(|p| json!(p)).collect();
        self.send_command("get_prop", params).await.map(drop)
    }

    /// Brief visual identification: dip to minimum brightness, flash to
    /// maximum, then restore. Each step is fire-and-forget; failures are
    /// logged only.
    pub async fn blink(&self) {
        let (power, bright) = {
            let inner = self.inner.lock().await;
            (inner.state.power, inner.state.bright)
        };

        if !power {
            self.fire(|session| async move { session.set_power(true, 200).await });
        }
        self.fire(|session| async move { session.set_bright(1, 200).await });
        tokio::time::sleep(BLINK_STEP).await;
        self.fire(|session| async move { session.set_bright(100, 200).await });
        tokio::time::sleep(BLINK_STEP).await;
        self.fire(move |session| async move { session.set_bright(bright, 200).await });
        if !power {
            self.fire(|session| async move { session.set_power(false, 200).await });
        }
    }

    /// Writes one correlated request frame and waits for its settlement:
    /// exactly one of matching result, matching error or timeout.
    pub async fn send_command(&self, method: &str, params: Vec<Value>) -> Result<Vec<Value>, LightError> {
        {
            let inner = self.inner.lock().await;
            if !inner.descriptor.supports(method) {
                return Err(LightError::UnsupportedMethod(method.to_string()));
            }
        }

        if !self.is_connected().await {
            self.connect().await;
        }

        let (id, receiver) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;

            let id = inner.next_id;
            inner.next_id += 1;

            let frame = Request {
                id,
                method,
                params: &params,
            }
            .to_frame()
            .map_err(|e| LightError::MalformedFrame(e.to_string()))?;

            let (resolve, receiver) = oneshot::channel();
            inner.pending.insert(
                id,
                Pending {
                    method: method.to_string(),
                    params,
                    resolve,
                },
            );

            match inner.writer.as_mut() {
                Some(writer) => {
                    trace!(device_id = inner.descriptor.id, "▶️ {}", frame.trim_end());
                    if let Err(e) = writer.write_all(frame.as_bytes()).await {
                        // Contained: surfaced as an event, the request itself
                        // settles through its timeout.
                        warn!(device_id = inner.descriptor.id, "⚠️ Write failed: {e}");
                        self.emit(LightEvent::Failed {
                            descriptor: inner.descriptor.clone(),
                            reason: LightError::Connection(e).to_string(),
                        });
                    }
                }
                None => {
                    trace!(device_id = inner.descriptor.id, "No socket, request {id} will expire");
                }
            }

            (id, receiver)
        };

        self.arm_timeout(id);

        match receiver.await {
            Ok(outcome) => outcome,
            // The resolve side is only ever dropped with the whole session
            // core, which outlives the timeout task; treat it as a timeout.
            Err(_) => Err(LightError::Timeout {
                id,
                method: method.to_string(),
            }),
        }
    }

    fn arm_timeout(&self, id: i64) {
        let inner = Arc::clone(&self.inner);
        let timeout = self.config.session().request_timeout();
        tokio::task::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut inner = inner.lock().await;
            if let Some(pending) = inner.pending.remove(&id) {
                warn!(
                    device_id = inner.descriptor.id,
                    "⏳ Request {id} ({}) timed out", pending.method
                );
                let _ = pending.resolve.send(Err(LightError::Timeout {
                    id,
                    method: pending.method,
                }));
            }
        });
    }

    async fn heartbeat(session: DeviceSession) {
        let interval = session.config.session().heartbeat_interval();
        let stale = session.config.session().stale_connection_timeout();
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let mut inner = session.inner.lock().await;
            let Some(writer) = inner.writer.as_mut() else {
                continue;
            };
            if let Err(e) = writer.write_all(HEARTBEAT_PROBE.as_bytes()).await {
                debug!(device_id = inner.descriptor.id, "Heartbeat probe failed: {e}");
            }
            if inner.last_answer.elapsed() >= stale {
                warn!(
                    device_id = inner.descriptor.id,
                    "🔴 No inbound traffic for {:?}, forcing disconnect", stale
                );
                session.disconnect_locked(&mut inner);
                // this task was just aborted, leave before the next await
                return;
            }
        }
    }

    async fn read_frames(session: DeviceSession, read_half: OwnedReadHalf) {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    session.inner.lock().await.last_answer = Instant::now();
                    if line.is_empty() {
                        continue;
                    }
                    session.handle_frame(&line).await;
                }
                Ok(None) => {
                    debug!("🔴 Peer closed the connection");
                    session.disconnect().await;
                    return;
                }
                Err(e) => {
                    let descriptor = session.descriptor().await;
                    warn!(device_id = descriptor.id, "⚠️ Socket error: {e}");
                    session.emit(LightEvent::Failed {
                        descriptor,
                        reason: LightError::Connection(e).to_string(),
                    });
                    session.disconnect().await;
                    return;
                }
            }
        }
    }

    /// One CRLF-separated frame. A single read may have carried several; the
    /// caller splits them and each is handled independently.
    async fn handle_frame(&self, line: &str) {
        let frame = match Frame::parse(line) {
            Ok(frame) => frame,
            Err(e) => {
                // Never fatal: the frame is dropped, the connection stays up.
                let descriptor = self.descriptor().await;
                warn!(device_id = descriptor.id, "⚠️ Malformed frame '{line}': {e}");
                self.emit(LightEvent::Failed {
                    descriptor,
                    reason: format!("malformed frame: {e}"),
                });
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        if frame.is_props_notification() {
            let parsed = frame.params.map(PropsUpdate::from_params);
            match parsed {
                Some(Ok(props)) => self.apply_props_locked(&mut inner, &props),
                Some(Err(e)) => {
                    warn!(device_id = inner.descriptor.id, "⚠️ Malformed props payload: {e}");
                    self.emit(LightEvent::Failed {
                        descriptor: inner.descriptor.clone(),
                        reason: format!("malformed frame: {e}"),
                    });
                }
                None => {}
            }
            return;
        }

        let Some(id) = frame.id else {
            return;
        };
        let Some(pending) = inner.pending.remove(&id) else {
            // Already resolved, timed out, or a heartbeat probe reply
            trace!(device_id = inner.descriptor.id, "Discarding reply for unknown request {id}");
            return;
        };

        if pending.method == "get_prop" {
            if let Some(result) = &frame.result {
                self.apply_get_prop_locked(&mut inner, &pending.params, result);
            }
        }

        let outcome = match frame.error {
            Some(error) => Err(LightError::Device {
                code: error.code,
                message: error.message,
            }),
            None => Ok(frame.result.unwrap_or_default()),
        };
        let _ = pending.resolve.send(outcome);
    }

    /// Partial merge: only properties present in the payload are applied.
    /// `color_mode` selects which representation is authoritative.
    fn apply_props_locked(&self, inner: &mut Inner, props: &PropsUpdate) {
        if let Some(power) = &props.power {
            inner.state.apply_power_text(power);
        }
        if let Some(name) = &props.name {
            inner.descriptor.name = name.clone();
        }

        match props.color_mode {
            Some(1) => {
                if let Some(rgb) = props.rgb {
                    inner.state.apply_rgb(rgb, props.bright);
                } else if let Some(bright) = props.bright {
                    inner.state.apply_bright(bright);
                }
            }
            Some(2) => {
                if let Some(ct) = props.ct {
                    inner.state.apply_ct(ct, props.bright);
                } else if let Some(bright) = props.bright {
                    inner.state.apply_bright(bright);
                }
            }
            Some(3) => {
                if let (Some(hue), Some(sat)) = (props.hue, props.sat) {
                    inner.state.apply_hsv(hue, sat, props.bright);
                } else if let Some(bright) = props.bright {
                    inner.state.apply_bright(bright);
                }
            }
            _ => {
                if let Some(rgb) = props.rgb {
                    inner.state.apply_rgb(rgb, None);
                }
                if let Some(bright) = props.bright {
                    inner.state.apply_bright(bright);
                }
                if let Some(ct) = props.ct {
                    inner.state.apply_ct(ct, None);
                }
                if let (Some(hue), Some(sat)) = (props.hue, props.sat) {
                    inner.state.apply_hsv(hue, sat, None);
                }
            }
        }

        self.emit_state_locked(inner);
    }

    /// Zips the requested property names with the result values. An arity
    /// mismatch is reported and nothing is applied; the request itself still
    /// resolves with the raw result.
    fn apply_get_prop_locked(&self, inner: &mut Inner, requested: &[Value], values: &[Value]) {
        let names: Vec<&str> = requested.iter().filter_map(|p| p.as_str()).collect();
        if names.len() != values.len() {
            warn!(
                device_id = inner.descriptor.id,
                "⚠️ get_prop result carries {} values for {} requested properties",
                values.len(),
                names.len()
            );
            self.emit(LightEvent::Failed {
                descriptor: inner.descriptor.clone(),
                reason: LightError::PropertyCountMismatch {
                    requested: names.len(),
                    received: values.len(),
                }
                .to_string(),
            });
            return;
        }

        let by_name: HashMap<&str, &Value> = names.into_iter().zip(values).collect();

        // An empty rgb value means the channel is unsupported, which settles
        // the color kind for lights added without a discovery reply.
        if let Some(rgb) = by_name.get("rgb").and_then(|v| v.as_str()) {
            inner.descriptor.kind = if rgb.is_empty() { ColorKind::White } else { ColorKind::Color };
        }

        if let Some(power) = by_name.get("power").and_then(|v| v.as_str()) {
            inner.state.apply_power_text(power);
        }

        let bright = by_name.get("bright").and_then(|v| number(v));
        match by_name.get("color_mode").and_then(|v| number::<u8>(v)) {
            Some(1) => {
                if let Some(rgb) = by_name.get("rgb").and_then(|v| number(v)) {
                    inner.state.apply_rgb(rgb, bright);
                }
            }
            Some(2) => {
                if let Some(ct) = by_name.get("ct").and_then(|v| number(v)) {
                    inner.state.apply_ct(ct, bright);
                }
            }
            Some(3) => {
                let hue = by_name.get("hue").and_then(|v| number(v));
                let sat = by_name.get("sat").and_then(|v| number(v));
                if let (Some(hue), Some(sat)) = (hue, sat) {
                    inner.state.apply_hsv(hue, sat, bright);
                }
            }
            _ => {
                if let Some(bright) = bright {
                    inner.state.apply_bright(bright);
                }
            }
        }

        self.emit_state_locked(inner);
    }

    fn emit_state_locked(&self, inner: &Inner) {
        if inner.phase == SessionPhase::Destroyed {
            return;
        }
        self.emit(LightEvent::StateChanged {
            descriptor: inner.descriptor.clone(),
            state: inner.state,
        });
    }

    /// Events are advisory; a slow consumer must not wedge the protocol path.
    fn emit(&self, event: LightEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("⚠️ Dropping light event: {e}");
        }
    }

    fn fire<F, Fut>(&self, op: F)
    where
        F: FnOnce(DeviceSession) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), LightError>> + Send + 'static,
    {
        let session = self.clone();
        tokio::task::spawn(async move {
            if let Err(e) = op(session).await {
                debug!("Blink step failed: {e}");
            }
        });
    }

    #[cfg(test)]
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}

fn effect(duration_ms: u64) -> Value {
    json!(if duration_ms > 0 { "smooth" } else { "sudden" })
}

/// The protocol reports numbers both as JSON numbers and as decimal strings.
fn number<T: FromStr>(value: &Value) -> Option<T> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::AppConfigBuilder;
    use crate::domain::device::Rgb;
    use crate::light::test_support::{Peer, connected_session, descriptor_for, drain_until_state};
    use pretty_assertions::assert_eq;
    use test_log::test;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[test(tokio::test)]
    async fn set_bright_is_optimistic_and_resolves_on_matching_result() {
        let (session, mut peer, _rx) = connected_session(AppConfigBuilder::new().build()).await;

        let handle = tokio::task::spawn({
            let session = session.clone();
            async move { session.set_bright(50, 0).await }
        });

        let request = peer.next_request().await;
        assert_eq!(request["method"], "set_bright");
        assert_eq!(request["params"][0], 50);
        assert_eq!(request["params"][1], "sudden");

        // cached before any reply arrived
        assert_eq!(session.state().await.bright, 50);

        peer.send(&format!(r#"{{"id":{},"result":["ok"]}}"#, request["id"])).await;

        handle.await.unwrap().unwrap();
        assert_eq!(session.state().await.bright, 50);
        assert_eq!(session.pending_count().await, 0);
    }

    #[test(tokio::test)]
    async fn unanswered_command_times_out_and_clears_its_pending_entry() {
        let config = AppConfigBuilder::new()
            .request_timeout(Duration::from_millis(100))
            .build();
        let (session, _peer, _rx) = connected_session(config).await;

        let result = session.set_power(true, 0).await;

        assert!(matches!(result, Err(LightError::Timeout { id: 1, .. })), "{result:?}");
        assert_eq!(session.pending_count().await, 0);
        // the optimistic mutation is not rolled back
        assert!(session.state().await.power);
    }

    #[test(tokio::test)]
    async fn unsupported_method_is_refused_without_touching_the_socket() {
        let (session, mut peer, _rx) = connected_session_with_support(&["set_power", "set_bright"]).await;

        let result = session.set_ct(4000, 0).await;

        assert!(matches!(result, Err(LightError::UnsupportedMethod(ref m)) if m == "set_ct_abx"));
        assert_eq!(session.pending_count().await, 0);
        assert!(peer.silent_for(Duration::from_millis(100)).await, "bytes were written");
    }

    #[test(tokio::test)]
    async fn device_error_rejects_the_matching_request() {
        let (session, mut peer, _rx) = connected_session(AppConfigBuilder::new().build()).await;

        let handle = tokio::task::spawn({
            let session = session.clone();
            async move { session.set_bright(101, 0).await }
        });

        let request = peer.next_request().await;
        peer.send(&format!(
            r#"{{"id":{},"error":{{"code":-5000,"message":"general error"}}}}"#,
            request["id"]
        ))
        .await;

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(LightError::Device { code: -5000, .. })), "{result:?}");
        assert_eq!(session.pending_count().await, 0);
    }

    #[test(tokio::test)]
    async fn props_notification_applies_a_partial_merge() {
        let (session, mut peer, mut rx) = connected_session(AppConfigBuilder::new().build()).await;

        peer.send(r#"{"method":"props","params":{"power":"on","bright":80,"color_mode":1,"rgb":16711935}}"#)
            .await;
        let state = drain_until_state(&mut rx).await;
        assert!(state.power);
        assert_eq!(state.bright, 80);
        assert_eq!(state.rgb, Rgb { r: 255, g: 0, b: 255 });

        peer.send(r#"{"method":"props","params":{"power":"off"}}"#).await;
        let state = drain_until_state(&mut rx).await;

        assert!(!state.power);
        assert_eq!(state.bright, 80, "brightness must be untouched");
        assert_eq!(state.rgb, Rgb { r: 255, g: 0, b: 255 }, "rgb must be untouched");
    }

    #[test(tokio::test)]
    async fn malformed_frame_is_reported_but_never_fatal() {
        let (session, mut peer, mut rx) = connected_session(AppConfigBuilder::new().build()).await;

        peer.send("this is not json").await;

        let failure = loop {
            match rx.recv().await.unwrap() {
                LightEvent::Failed { reason, .. } => break reason,
                _ => continue,
            }
        };
        assert!(failure.contains("malformed frame"), "{failure}");

        // the connection survived
        peer.send(r#"{"method":"props","params":{"power":"on"}}"#).await;
        let state = drain_until_state(&mut rx).await;
        assert!(state.power);
        assert!(session.is_connected().await);
    }

    #[test(tokio::test)]
    async fn get_prop_arity_mismatch_is_reported_and_not_applied() {
        let (session, mut peer, mut rx) = connected_session(AppConfigBuilder::new().build()).await;

        let handle = tokio::task::spawn({
            let session = session.clone();
            async move { session.update_state().await }
        });

        let request = peer.next_request().await;
        assert_eq!(request["method"], "get_prop");
        peer.send(&format!(r#"{{"id":{},"result":["on"]}}"#, request["id"])).await;

        // still resolves; the state application is what gets refused
        handle.await.unwrap().unwrap();

        let failure = loop {
            match rx.recv().await.unwrap() {
                LightEvent::Failed { reason, .. } => break reason,
                _ => continue,
            }
        };
        assert!(failure.contains("7 requested"), "{failure}");
        assert!(!session.state().await.power, "mismatched result must not be applied");
    }

    #[test(tokio::test)]
    async fn reply_with_unknown_id_is_silently_discarded() {
        let (session, mut peer, mut rx) = connected_session(AppConfigBuilder::new().build()).await;

        peer.send(r#"{"id":99,"result":["ok"]}"#).await;
        peer.send(r#"{"method":"props","params":{"power":"on"}}"#).await;

        let state = drain_until_state(&mut rx).await;
        assert!(state.power);
        assert!(session.is_connected().await);
    }

    #[test(tokio::test)]
    async fn heartbeat_forces_a_disconnect_after_prolonged_silence() {
        let config = AppConfigBuilder::new()
            .heartbeat_interval(Duration::from_millis(40))
            .stale_connection_timeout(Duration::from_millis(100))
            .build();
        let (session, mut peer, mut rx) = connected_session(config).await;

        // the probe goes out with the reserved id
        let probe = peer.next_request().await;
        assert_eq!(probe["id"], -1);
        assert_eq!(probe["method"], "get_prop");

        let disconnected = timeout(Duration::from_secs(2), async {
            loop {
                if let LightEvent::Disconnected { .. } = rx.recv().await.unwrap() {
                    break;
                }
            }
        })
        .await;
        assert!(disconnected.is_ok(), "expected a forced disconnect");
        assert_eq!(session.phase().await, SessionPhase::Disconnected);
    }

    #[test(tokio::test)]
    async fn failed_connect_surfaces_a_connection_error() {
        // reserve a port and close it again so the connect is refused
        let addr = {
            let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
            reserved.local_addr().unwrap()
        };
        let (tx, mut rx) = mpsc::channel(64);
        let session = DeviceSession::new(
            descriptor_for(addr),
            LightState::default(),
            Arc::new(AppConfigBuilder::new().build()),
            tx,
        );

        session.connect().await;

        let failure = loop {
            match rx.recv().await.unwrap() {
                LightEvent::Failed { reason, .. } => break reason,
                _ => continue,
            }
        };
        assert!(failure.contains("connection error"), "{failure}");
        assert_eq!(session.phase().await, SessionPhase::Disconnected);
    }

    #[test(tokio::test)]
    async fn disconnected_session_can_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _rx) = mpsc::channel(64);
        let session = DeviceSession::new(
            descriptor_for(addr),
            LightState::default(),
            Arc::new(AppConfigBuilder::new().build()),
            tx,
        );

        session.connect().await;
        let _first = Peer::accept(&listener).await;
        assert!(session.is_connected().await);

        session.disconnect().await;
        assert_eq!(session.phase().await, SessionPhase::Disconnected);

        session.connect().await;
        let _second = Peer::accept(&listener).await;
        assert!(session.is_connected().await);
    }

    #[test(tokio::test)]
    async fn destroy_is_terminal_and_idempotent() {
        let (session, _peer, mut rx) = connected_session(AppConfigBuilder::new().build()).await;

        session.destroy().await;
        assert_eq!(session.phase().await, SessionPhase::Destroyed);

        let mut saw_disconnected = false;
        let mut saw_destroyed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                LightEvent::Disconnected { .. } => saw_disconnected = true,
                LightEvent::Destroyed { .. } => saw_destroyed = true,
                _ => {}
            }
        }
        assert!(saw_disconnected && saw_destroyed);

        session.destroy().await;
        session.connect().await;
        assert_eq!(session.phase().await, SessionPhase::Destroyed);
    }

    #[test(tokio::test)]
    async fn set_hsv_issues_both_wire_commands() {
        let (session, mut peer, _rx) = connected_session(AppConfigBuilder::new().build()).await;

        let handle = tokio::task::spawn({
            let session = session.clone();
            async move { session.set_hsv(120, 100, 75, 0).await }
        });

        let mut methods = Vec::new();
        for _ in 0..2 {
            let request = peer.next_request().await;
            methods.push(request["method"].as_str().unwrap().to_string());
            peer.send(&format!(r#"{{"id":{},"result":["ok"]}}"#, request["id"])).await;
        }
        methods.sort();

        handle.await.unwrap().unwrap();
        assert_eq!(methods, vec!["set_bright", "set_hsv"]);

        let state = session.state().await;
        assert_eq!(state.hsb.h, 120);
        assert_eq!(state.bright, 75);
    }

    async fn connected_session_with_support(support: &[&str]) -> (DeviceSession, Peer, mpsc::Receiver<LightEvent>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(64);
        let mut descriptor = descriptor_for(addr);
        descriptor.support = support.iter().map(|m| m.to_string()).collect();
        let session = DeviceSession::new(
            descriptor,
            LightState::default(),
            Arc::new(AppConfigBuilder::new().build()),
            tx,
        );
        session.connect().await;
        let peer = Peer::accept(&listener).await;
        (session, peer, rx)
    }
}
