use crate::domain::commands::{Action, Command};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::watch;

/// The stable contract a device integration exposes to the aggregator that
/// collects heterogeneous integrations and forwards user actions.
#[async_trait]
pub trait CommandRunner: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// The currently available command list, derived from live device state.
    async fn commands(&self) -> Vec<Command>;

    /// Notified whenever the command list may have changed.
    fn commands_changed(&self) -> watch::Receiver<()>;

    async fn init(&self);

    async fn connect(&self);

    async fn disconnect(&self);

    async fn on_action(&self, action: Action);
}
