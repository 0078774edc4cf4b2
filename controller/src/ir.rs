use std::{thread, time::Duration};

use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, TransmitConfig},
        PinState, Pulse, PulseTicks, RmtChannel, TxRmtDriver, VariableLengthSignal,
    },
    units::FromValueType,
};
use log::{info, warn};

use acremote_common::hal::{monotonic_ms, HalError, HalResult, IrSink};

// 80 MHz APB clock / 80 gives 1 us ticks, so timings go in unscaled.
const IR_TICK_DIVIDER: u8 = 80;
const MIN_SEND_INTERVAL_MS: u64 = 300;

enum IrBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

pub struct IrTransmitter {
    backend: IrBackend,
    last_send_ms: Option<u64>,
    carrier_khz: u32,
    sent_frames: u64,
    failed_frames: u64,
    last_error: Option<String>,
}

impl IrTransmitter {
    pub fn new_with_carrier<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        carrier_khz: u32,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(33)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;

        Ok(Self {
            backend: IrBackend::Rmt(tx),
            last_send_ms: None,
            carrier_khz,
            sent_frames: 0,
            failed_frames: 0,
            last_error: None,
        })
    }

    /// Accepts and drops every signal. Used when the RMT peripheral could
    /// not be set up so the rest of the firmware keeps serving.
    pub fn disabled() -> Self {
        Self {
            backend: IrBackend::Disabled,
            last_send_ms: None,
            carrier_khz: 0,
            sent_frames: 0,
            failed_frames: 0,
            last_error: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.backend, IrBackend::Rmt(_))
    }

    pub fn carrier_khz(&self) -> u32 {
        self.carrier_khz
    }

    pub fn sent_frames(&self) -> u64 {
        self.sent_frames
    }

    pub fn failed_frames(&self) -> u64 {
        self.failed_frames
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn send_raw(&mut self, raw: &[u16]) -> anyhow::Result<()> {
        if raw.is_empty() {
            return Ok(());
        }

        let IrBackend::Rmt(tx) = &mut self.backend else {
            warn!("IR disabled, dropping signal with {} timings", raw.len());
            return Ok(());
        };

        rate_limit(self.last_send_ms);

        let mut pulses = Vec::with_capacity(raw.len());
        for (index, duration) in raw.iter().enumerate() {
            let level = if index % 2 == 0 {
                PinState::High
            } else {
                PinState::Low
            };

            pulses.push(Pulse::new(
                level,
                PulseTicks::new(*duration).context("invalid IR pulse duration")?,
            ));
        }

        let pulse_refs: Vec<&Pulse> = pulses.iter().collect();
        let mut signal = VariableLengthSignal::with_capacity(pulses.len());
        signal
            .push(pulse_refs)
            .context("failed to convert IR timings to RMT signal")?;

        tx.start_blocking(&signal)
            .context("failed to transmit IR signal over RMT")?;

        self.last_send_ms = Some(monotonic_ms());
        self.sent_frames = self.sent_frames.saturating_add(1);
        info!(
            "IR signal sent ({} pulses, {} total)",
            raw.len(),
            self.sent_frames
        );
        Ok(())
    }
}

impl IrSink for IrTransmitter {
    fn transmit(&mut self, timings: &[u16]) -> HalResult {
        let result = self.send_raw(timings);

        match &result {
            Ok(()) => self.last_error = None,
            Err(err) => {
                self.failed_frames = self.failed_frames.saturating_add(1);
                self.last_error = Some(format!("{err:#}"));
            }
        }

        result.map_err(|err| HalError::new("ir transmit", err))
    }
}

fn rate_limit(last_send_ms: Option<u64>) {
    let Some(last) = last_send_ms else {
        return;
    };
    let elapsed = monotonic_ms().saturating_sub(last);
    if elapsed < MIN_SEND_INTERVAL_MS {
        thread::sleep(Duration::from_millis(MIN_SEND_INTERVAL_MS - elapsed));
    }
}
