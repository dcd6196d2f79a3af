//! Bakes the device secrets from `.env` into the firmware image.
//!
//! Known networks are numbered `WIFI_SSID_1`/`WIFI_PASSWORD_1` up to
//! `WIFI_SSID_8`/`WIFI_PASSWORD_8`; numbering stops at the first missing
//! SSID. The order is only informational, scan order decides which network
//! is joined.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

const MAX_NETWORKS: usize = 8;

fn var(name: &str) -> Option<String> {
    println!("cargo:rerun-if-env-changed={name}");
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn main() {
    println!("cargo:rustc-link-arg=-Tlinkall.x");

    match dotenvy::dotenv() {
        Ok(path) => println!("cargo:rerun-if-changed={}", path.display()),
        Err(e) if e.not_found() => {
            println!("cargo:warning=no .env file found, using the build environment only")
        }
        Err(e) => panic!("failed to read .env: {e}"),
    }

    let mut networks = String::new();
    for index in 1..=MAX_NETWORKS {
        let Some(ssid) = var(&format!("WIFI_SSID_{index}")) else {
            break;
        };
        let passphrase = var(&format!("WIFI_PASSWORD_{index}")).unwrap_or_default();
        writeln!(
            networks,
            "    KnownNetwork {{ ssid: {ssid:?}, passphrase: {passphrase:?} }},"
        )
        .unwrap();
    }
    if networks.is_empty() {
        println!("cargo:warning=no WIFI_SSID_1 set, the device will never get online");
    }

    let access_token = var("THINGSBOARD_TOKEN").unwrap_or_default();
    let host = match var("THINGSBOARD_HOST") {
        Some(host) => format!("Some({host:?})"),
        None => "None".to_string(),
    };
    let transport = var("TELEMETRY_TRANSPORT").unwrap_or_else(|| "mqtt".to_string());
    let encrypted = var("TELEMETRY_ENCRYPTED")
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let generated = format!(
        "// @generated by build.rs from .env\n\
         pub const KNOWN_NETWORKS: &[KnownNetwork<'static>] = &[\n{networks}];\n\
         pub const ACCESS_TOKEN: &str = {access_token:?};\n\
         pub const TELEMETRY_HOST: Option<&str> = {host};\n\
         pub const TELEMETRY_TRANSPORT: &str = {transport:?};\n\
         pub const TELEMETRY_ENCRYPTED: bool = {encrypted};\n"
    );

    let out = PathBuf::from(env::var("OUT_DIR").unwrap()).join("secrets.rs");
    fs::write(out, generated).unwrap();
}
