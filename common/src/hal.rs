//! Boundaries between the command core and the platform it runs on.
//!
//! The ESP32 build backs these with `EspWifi`, `EspHttpServer` and the RMT
//! peripheral; the host build backs them with a simulated radio and an axum
//! listener.

use std::{
    fmt,
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

#[derive(Debug, thiserror::Error)]
#[error("{context}: {message}")]
pub struct HalError {
    context: &'static str,
    message: String,
}

impl HalError {
    pub fn new(context: &'static str, err: impl fmt::Display) -> Self {
        Self {
            context,
            message: format!("{err:#}"),
        }
    }

    pub fn context(&self) -> &'static str {
        self.context
    }
}

pub type HalResult<T = ()> = Result<T, HalError>;

/// Wireless interface owned by the platform.
pub trait Radio {
    /// Drops the association and powers the radio down.
    fn disable(&mut self) -> HalResult;
    /// Powers the radio up. Calling it on a running radio is harmless.
    fn enable(&mut self) -> HalResult;
    /// Starts associating with the configured network without waiting.
    fn begin_reconnect(&mut self) -> HalResult;
    fn is_connected(&mut self) -> bool;
}

/// The HTTP listener serving `/ac`.
pub trait Listener {
    fn stop(&mut self) -> HalResult;
    fn start(&mut self) -> HalResult;
    fn is_serving(&self) -> bool;
}

/// Air conditioner driver. Codes come from the command vocabulary; a driver
/// ignores codes it does not recognise.
pub trait AcDriver {
    fn begin(&mut self) -> HalResult;
    fn set_mode(&mut self, code: u8) -> HalResult;
    fn set_fan(&mut self, code: u8) -> HalResult;
    fn set_temp(&mut self, celsius: i32) -> HalResult;
    fn send(&mut self) -> HalResult;
    /// Brings the unit to the requested power state, transmitting only when
    /// the believed state differs.
    fn ensure_power(&mut self, on: bool) -> HalResult;
}

/// Emits raw infrared timings: alternating mark/space durations in
/// microseconds, starting with a mark.
pub trait IrSink {
    fn transmit(&mut self, timings: &[u16]) -> HalResult;
}

pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&mut self, ms: u64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn sleep_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
