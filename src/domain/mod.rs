pub mod color;
pub mod command_runner;
pub mod commands;
pub mod device;
pub mod events;
