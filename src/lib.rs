//! padbridge: a user-space gamepad daemon.
//!
//! Reads raw HID reports from game controllers, decodes them into a common
//! [`controller::ControllerState`], maps them through per-slot profiles and
//! injects the result through virtual uinput devices. A line protocol on a
//! Unix socket lets clients inspect devices and switch profiles.

pub mod config;
pub mod control;
pub mod controller;
pub mod daemon;
pub mod device;
pub mod mapping;
pub mod output;
