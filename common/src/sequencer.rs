//! Transmission sequencing around the shared radio.
//!
//! The IR transmitter and the wifi radio cannot be active together, so a
//! pending command is sent with the listener stopped and the radio down, and
//! the listener only comes back once the radio has reassociated.

use log::{error, info, warn};

use crate::{
    command::{CommandSettings, CommandSlot, PendingCommand},
    config::SequencerConfig,
    hal::{AcDriver, Clock, HalError, HalResult, Listener, Radio},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerPhase {
    Idle,
    RadioOff,
    Transmitting,
    Reconnecting,
}

#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("radio did not reconnect within {timeout_ms} ms")]
    ReconnectTimeout { timeout_ms: u64 },
    #[error(transparent)]
    Platform(#[from] HalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing was pending.
    Skipped,
    Transmitted(PendingCommand),
    /// An earlier interrupted reconnection completed.
    Reconnected,
}

pub struct Sequencer<R, L, D, C> {
    radio: R,
    listener: L,
    driver: D,
    clock: C,
    slot: CommandSlot,
    config: SequencerConfig,
    phase: SequencerPhase,
}

impl<R, L, D, C> Sequencer<R, L, D, C>
where
    R: Radio,
    L: Listener,
    D: AcDriver,
    C: Clock,
{
    pub fn new(
        radio: R,
        listener: L,
        driver: D,
        clock: C,
        slot: CommandSlot,
        config: SequencerConfig,
    ) -> Self {
        Self {
            radio,
            listener,
            driver,
            clock,
            slot,
            config,
            phase: SequencerPhase::Idle,
        }
    }

    /// Initialises the driver and starts serving requests.
    pub fn begin(&mut self) -> HalResult {
        self.driver.begin()?;
        self.listener.start()?;
        info!("sequencer ready, listener serving");
        Ok(())
    }

    pub fn phase(&self) -> SequencerPhase {
        self.phase
    }

    pub fn slot(&self) -> &CommandSlot {
        &self.slot
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// One pass of the outer loop.
    ///
    /// An interrupted reconnection is resumed before the slot is looked at.
    /// While it has not completed the listener stays down.
    pub fn run_if_pending(&mut self) -> Result<RunOutcome, SequencerError> {
        if self.phase == SequencerPhase::Reconnecting {
            info!("resuming radio reconnection");
            if !self.radio.is_connected() {
                self.restart_radio()?;
            }
            self.await_reconnect()?;
            return Ok(RunOutcome::Reconnected);
        }

        let Some(command) = self.slot.take() else {
            return Ok(RunOutcome::Skipped);
        };
        info!(
            "transmitting command: power={} toggle={} settings={:?}",
            command.power, command.power_toggle, command.settings
        );

        if let Err(err) = self.listener.stop() {
            self.slot.restore(command);
            return Err(err.into());
        }
        if let Err(err) = self.radio.disable() {
            if let Err(restart) = self.listener.start() {
                warn!("listener restart after radio failure failed: {restart}");
            }
            self.slot.restore(command);
            return Err(err.into());
        }
        self.enter(SequencerPhase::RadioOff);

        self.enter(SequencerPhase::Transmitting);
        self.transmit(&command);

        self.enter(SequencerPhase::Reconnecting);
        self.restart_radio()?;
        self.await_reconnect()?;

        Ok(RunOutcome::Transmitted(command))
    }

    fn transmit(&mut self, command: &PendingCommand) {
        if command.power_toggle {
            if let Err(err) = self.driver.ensure_power(command.power) {
                warn!("power change not sent: {err}");
            }
        }

        if let Some(settings) = command.settings {
            if let Err(err) = send_settings(&mut self.driver, settings) {
                warn!("settings not sent: {err}");
            }
        }
    }

    fn restart_radio(&mut self) -> HalResult {
        self.radio.enable()?;
        self.radio.begin_reconnect()
    }

    fn await_reconnect(&mut self) -> Result<(), SequencerError> {
        let timeout_ms = self.config.reconnect_timeout_ms;
        let started = self.clock.now_ms();

        loop {
            if self.radio.is_connected() {
                self.listener.start()?;
                info!(
                    "radio reconnected after {} ms",
                    self.clock.now_ms().saturating_sub(started)
                );
                self.enter(SequencerPhase::Idle);
                return Ok(());
            }

            let elapsed = self.clock.now_ms().saturating_sub(started);
            if timeout_ms != 0 && elapsed >= timeout_ms {
                error!("radio still disconnected after {elapsed} ms");
                return Err(SequencerError::ReconnectTimeout { timeout_ms });
            }

            self.clock.sleep_ms(self.config.reconnect_poll_ms);
        }
    }

    fn enter(&mut self, phase: SequencerPhase) {
        info!("sequencer {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

fn send_settings(driver: &mut impl AcDriver, settings: CommandSettings) -> HalResult {
    driver.set_mode(settings.mode_code)?;
    driver.set_fan(settings.fan_code)?;
    driver.set_temp(settings.temperature)?;
    driver.send()
}
