//! Core functionality for the OnePutt bridge
//! This module contains the device integration: Bluetooth plumbing, shot
//! data and the controller that ties them together.

pub mod ball_data;
pub mod bluetooth;
pub mod controller;
pub mod events;

// Re-export commonly used types
pub use ball_data::{BallData, PuttType};
pub use controller::{ControllerCommand, ControllerHandle, PuttingDeviceController};
pub use events::DeviceEvent;
