use crate::domain::device::{LightDescriptor, LightState};

/// Lifecycle and state events raised by sessions and the discovery scanner,
/// consumed by the command runner through an mpsc channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LightEvent {
    Detected {
        descriptor: LightDescriptor,
    },
    Connected {
        descriptor: LightDescriptor,
    },
    StateChanged {
        descriptor: LightDescriptor,
        state: LightState,
    },
    Disconnected {
        descriptor: LightDescriptor,
    },
    Destroyed {
        descriptor: LightDescriptor,
    },
    Failed {
        descriptor: LightDescriptor,
        reason: String,
    },
}
