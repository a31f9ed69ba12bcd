use crate::domain::color::{hex_to_rgb, rgb_to_hex, rgb_to_temperature};
use crate::domain::command_runner::CommandRunner;
use crate::domain::commands::{Action, ActionArg, Command, CommandArg};
use crate::domain::device::{ColorKind, LightDescriptor, LightState};
use crate::domain::events::LightEvent;
use crate::light::scanner::DiscoveryScanner;
use crate::light::session::DeviceSession;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};

const TRANSITION_MS: u64 = 200;

pub const TURN_ON: &str = "Turn on";
pub const TURN_OFF: &str = "Turn off";
pub const BLINK: &str = "Blink";
pub const CONTROL: &str = "Control";

pub const BRIGHTNESS_ARG: &str = "Brightness";
pub const TEMPERATURE_ARG: &str = "Temperature";
pub const COLOR_ARG: &str = "Color";

/// Command runner for the networked lights. Tracks the last reported state of
/// every connected light and translates user actions into session commands.
#[derive(Debug)]
pub struct LightCommandRunner {
    scanner: DiscoveryScanner,
    states: Arc<Mutex<HashMap<String, (LightDescriptor, LightState)>>>,
    commands_tx: watch::Sender<()>,
}

impl LightCommandRunner {
    pub fn new(scanner: DiscoveryScanner) -> Self {
        let (commands_tx, _) = watch::channel(());
        LightCommandRunner {
            scanner,
            states: Arc::new(Mutex::new(HashMap::new())),
            commands_tx,
        }
    }

    /// Consumes the event channel fed by the scanner and its sessions. Runs
    /// until the channel closes.
    #[instrument(skip_all)]
    pub async fn listen(&self, mut rx: Receiver<LightEvent>) {
        info!("👂 Listening for light events...");
        while let Some(event) = rx.recv().await {
            match event {
                LightEvent::Detected { descriptor } => {
                    self.scanner.prune_lights().await;
                    if let Some(session) = self.scanner.session(&descriptor.id).await {
                        // greet the new light so it can be identified visually
                        tokio::task::spawn(async move {
                            session.blink().await;
                        });
                    }
                }
                LightEvent::Connected { descriptor } => {
                    info!(device_id = descriptor.id, "🔌 Connected to '{}'", descriptor.name);
                }
                LightEvent::StateChanged { descriptor, state } => {
                    debug!(
                        device_id = descriptor.id,
                        "💡 '{}' is {}, brightness {}%, color {}",
                        descriptor.name,
                        if state.power { "on" } else { "off" },
                        state.bright,
                        rgb_to_hex(state.rgb.r, state.rgb.g, state.rgb.b)
                    );
                    self.states.lock().await.insert(descriptor.id.clone(), (descriptor, state));
                    self.notify_commands_changed();
                }
                LightEvent::Disconnected { descriptor } | LightEvent::Destroyed { descriptor } => {
                    self.states.lock().await.remove(&descriptor.id);
                    self.scanner.prune_lights().await;
                    self.notify_commands_changed();
                }
                LightEvent::Failed { descriptor, reason } => {
                    warn!(device_id = descriptor.id, "⚠️ '{}' failed: {reason}", descriptor.name);
                }
            }
        }
        info!("👋 Light event channel closed");
    }

    fn notify_commands_changed(&self) {
        let _ = self.commands_tx.send(());
    }

    /// Runs one command concurrently on every tracked session. Failures are
    /// logged per light, one slow or broken light never blocks the rest.
    async fn for_each_session<F, Fut>(&self, operation: F)
    where
        F: Fn(DeviceSession) -> Fut,
        Fut: Future<Output = Result<(), crate::light::error::LightError>> + Send + 'static,
    {
        for session in self.scanner.sessions().await {
            let descriptor = session.descriptor().await;
            let future = operation(session);
            tokio::task::spawn(async move {
                if let Err(e) = future.await {
                    warn!(device_id = descriptor.id, "⚠️ Command failed on '{}': {e}", descriptor.name);
                }
            });
        }
    }

    async fn control(&self, args: Vec<ActionArg>) {
        for arg in args {
            match arg {
                ActionArg::Number { name, value } if name == BRIGHTNESS_ARG => {
                    let bright = value.clamp(1.0, 100.0) as u8;
                    self.for_each_session(move |session| async move {
                        session.set_bright(bright, TRANSITION_MS).await
                    })
                    .await;
                }
                ActionArg::Number { name, value } if name == TEMPERATURE_ARG => {
                    let kelvin = value.clamp(1700.0, 6500.0) as u16;
                    self.for_each_session(move |session| async move {
                        session.set_ct(kelvin, TRANSITION_MS).await
                    })
                    .await;
                }
                ActionArg::Color { name, value } if name == COLOR_ARG => {
                    let (r, g, b) = hex_to_rgb(&value);
                    self.for_each_session(move |session| async move {
                        session.set_rgb([r, g, b], TRANSITION_MS).await
                    })
                    .await;
                }
                other => debug!("Ignoring unknown control argument {other:?}"),
            }
        }
    }
}

#[async_trait]
impl CommandRunner for LightCommandRunner {
    fn name(&self) -> &'static str {
        "lights"
    }

    async fn commands(&self) -> Vec<Command> {
        let states = self.states.lock().await;
        let Some((descriptor, state)) = states.values().next() else {
            return Vec::new();
        };

        let mut args = vec![CommandArg::Number {
            name: BRIGHTNESS_ARG.to_string(),
            value: f64::from(state.bright),
            min: 1.0,
            max: 100.0,
            step: 1.0,
        }];
        if descriptor.kind != ColorKind::Unknown {
            args.push(CommandArg::Number {
                name: TEMPERATURE_ARG.to_string(),
                value: f64::from(rgb_to_temperature(
                    f64::from(state.rgb.r),
                    f64::from(state.rgb.g),
                    f64::from(state.rgb.b),
                )),
                min: 1700.0,
                max: 6500.0,
                step: 100.0,
            });
        }
        if descriptor.kind == ColorKind::Color {
            args.push(CommandArg::Color {
                name: COLOR_ARG.to_string(),
                value: rgb_to_hex(state.rgb.r, state.rgb.g, state.rgb.b),
            });
        }

        vec![
            Command::Action {
                name: if state.power { TURN_OFF } else { TURN_ON }.to_string(),
            },
            Command::Action { name: BLINK.to_string() },
            Command::Complex {
                name: CONTROL.to_string(),
                args,
            },
        ]
    }

    fn commands_changed(&self) -> watch::Receiver<()> {
        self.commands_tx.subscribe()
    }

    async fn init(&self) {}

    async fn connect(&self) {
        if let Err(e) = self.scanner.start().await {
            warn!("⚠️ Unable to start discovery: {e}");
        }
    }

    async fn disconnect(&self) {
        self.scanner.stop().await;
    }

    #[instrument(skip(self))]
    async fn on_action(&self, action: Action) {
        match action.command_name.as_str() {
            TURN_ON => {
                self.for_each_session(|session| async move { session.set_power(true, TRANSITION_MS).await })
                    .await;
            }
            TURN_OFF => {
                self.for_each_session(|session| async move { session.set_power(false, TRANSITION_MS).await })
                    .await;
            }
            BLINK => {
                self.for_each_session(|session| async move {
                    session.blink().await;
                    Ok(())
                })
                .await;
            }
            CONTROL => self.control(action.args).await,
            unknown => warn!("⚠️ Unknown command '{unknown}'"),
        }
    }
}
