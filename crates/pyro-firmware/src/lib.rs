//! ESP32 firmware-specific modules for pyro-rs
//!
//! This crate contains the code that only makes sense on the device:
//! peripheral bring-up, the esp-radio WiFi station, the embassy-net TCP
//! link and the SSD1306 panel adapter. Everything they plug into lives in
//! `pyro_core`.

#![no_std]

extern crate alloc;

pub mod hardware;
pub mod net_link;
pub mod oled;
pub mod secrets;
pub mod wifi;
