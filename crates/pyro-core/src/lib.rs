//! Hardware-independent core library for pyro-rs
//!
//! This crate contains all platform-agnostic logic for the pyro thermocouple
//! telemetry device: the MAX31856 driver, display rendering, WiFi
//! connectivity management, the telemetry uplink and the main control loop.
//!
//! It is `#![no_std]` so it compiles on both embedded targets (ESP32) and
//! desktop hosts (for the simulator and tests). Everything that touches a
//! peripheral or the radio does so through a trait, which the firmware
//! implements on real hardware and the simulator and tests implement in
//! memory.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod app_state;
pub mod config;
pub mod control_loop;
pub mod display;
pub mod framebuffer;
pub mod network;
pub mod sensors;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;
