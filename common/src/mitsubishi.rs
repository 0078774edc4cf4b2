//! Mitsubishi HVAC infrared protocol: an 18 byte state frame, sent twice.

use log::{debug, info};

use crate::{
    hal::{AcDriver, HalResult, IrSink},
    vocabulary::NO_OP_CODE,
};

pub const MODE_HEAT: u8 = 0x08;
pub const MODE_DRY: u8 = 0x10;
pub const MODE_COOL: u8 = 0x18;
pub const MODE_AUTO: u8 = 0x20;
pub const MODE_FAN: u8 = 0x38;

pub const FAN_AUTO: u8 = 0xB8;
pub const FAN_MIN: u8 = 0x79;
pub const FAN_MED: u8 = 0x7A;
pub const FAN_HI: u8 = 0x7B;

pub const MIN_TEMP_C: i32 = 16;
pub const MAX_TEMP_C: i32 = 31;

pub const FRAME_LEN: usize = 18;

const MAGIC: [u8; 5] = [0x23, 0xCB, 0x26, 0x01, 0x00];
const POWER_ON: u8 = 0x20;
const POWER_OFF: u8 = 0x00;

const HDR_MARK_US: u16 = 3400;
const HDR_SPACE_US: u16 = 1750;
const BIT_MARK_US: u16 = 340;
const ONE_SPACE_US: u16 = 1300;
const ZERO_SPACE_US: u16 = 420;
const RPT_MARK_US: u16 = 440;
const RPT_SPACE_US: u16 = 17100;

/// Timings per frame: header pair, then a mark/space pair per bit.
const FRAME_TIMINGS: usize = 2 + FRAME_LEN * 8 * 2;
/// Both copies, the repeat gap between them and the closing mark.
pub const SIGNAL_TIMINGS: usize = FRAME_TIMINGS * 2 + 2 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MitsubishiFrame {
    pub power: bool,
    pub mode: u8,
    pub fan: u8,
    pub temperature_c: i32,
}

impl Default for MitsubishiFrame {
    fn default() -> Self {
        Self {
            power: false,
            mode: MODE_COOL,
            fan: FAN_AUTO,
            temperature_c: 24,
        }
    }
}

impl MitsubishiFrame {
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0_u8; FRAME_LEN];
        bytes[..MAGIC.len()].copy_from_slice(&MAGIC);
        bytes[5] = if self.power { POWER_ON } else { POWER_OFF };
        bytes[6] = self.mode;
        bytes[7] = (self.temperature_c.clamp(MIN_TEMP_C, MAX_TEMP_C) - MIN_TEMP_C) as u8;
        bytes[8] = secondary_mode(self.mode);
        bytes[9] = self.fan;
        // 10..=16: clock, timers, program mode and padding all stay zero.
        bytes[FRAME_LEN - 1] = checksum(&bytes[..FRAME_LEN - 1]);
        bytes
    }

    pub fn timings(&self) -> Vec<u16> {
        let bytes = self.to_bytes();
        let mut timings = Vec::with_capacity(SIGNAL_TIMINGS);

        push_frame(&mut timings, &bytes);
        timings.push(RPT_MARK_US);
        timings.push(RPT_SPACE_US);
        push_frame(&mut timings, &bytes);
        timings.push(BIT_MARK_US);

        timings
    }
}

fn push_frame(timings: &mut Vec<u16>, bytes: &[u8; FRAME_LEN]) {
    timings.push(HDR_MARK_US);
    timings.push(HDR_SPACE_US);
    for byte in bytes {
        for bit in 0..8 {
            timings.push(BIT_MARK_US);
            timings.push(if byte & (1 << bit) != 0 {
                ONE_SPACE_US
            } else {
                ZERO_SPACE_US
            });
        }
    }
}

fn secondary_mode(mode: u8) -> u8 {
    match mode {
        MODE_DRY => 0x32,
        MODE_COOL => 0x36,
        _ => 0x30,
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0_u8, |acc, byte| acc.wrapping_add(*byte))
}

fn is_mode_code(code: u8) -> bool {
    matches!(code, MODE_HEAT | MODE_DRY | MODE_COOL | MODE_AUTO | MODE_FAN)
}

fn is_fan_code(code: u8) -> bool {
    matches!(code, FAN_AUTO | FAN_MIN | FAN_MED | FAN_HI)
}

/// [`AcDriver`] speaking the Mitsubishi protocol through an [`IrSink`].
///
/// The unit gives no feedback, so the driver keeps the state it believes the
/// unit is in and every transmission carries that whole state.
pub struct MitsubishiDriver<S> {
    sink: S,
    frame: MitsubishiFrame,
    sent_frames: u64,
}

impl<S: IrSink> MitsubishiDriver<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            frame: MitsubishiFrame::default(),
            sent_frames: 0,
        }
    }

    pub fn frame(&self) -> &MitsubishiFrame {
        &self.frame
    }

    pub fn sent_frames(&self) -> u64 {
        self.sent_frames
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn transmit(&mut self) -> HalResult {
        self.sink.transmit(&self.frame.timings())?;
        self.sent_frames = self.sent_frames.saturating_add(1);
        info!(
            "mitsubishi frame sent: power={} mode={:#04x} fan={:#04x} temp={}C",
            self.frame.power, self.frame.mode, self.frame.fan, self.frame.temperature_c
        );
        Ok(())
    }
}

impl<S: IrSink> AcDriver for MitsubishiDriver<S> {
    fn begin(&mut self) -> HalResult {
        self.frame = MitsubishiFrame::default();
        Ok(())
    }

    fn set_mode(&mut self, code: u8) -> HalResult {
        if is_mode_code(code) {
            self.frame.mode = code;
        } else if code != NO_OP_CODE {
            debug!("ignoring unsupported mode code {code:#04x}");
        }
        Ok(())
    }

    fn set_fan(&mut self, code: u8) -> HalResult {
        if is_fan_code(code) {
            self.frame.fan = code;
        } else if code != NO_OP_CODE {
            debug!("ignoring unsupported fan code {code:#04x}");
        }
        Ok(())
    }

    fn set_temp(&mut self, celsius: i32) -> HalResult {
        self.frame.temperature_c = celsius.clamp(MIN_TEMP_C, MAX_TEMP_C);
        Ok(())
    }

    /// A composed command always means "run with these settings".
    fn send(&mut self) -> HalResult {
        self.frame.power = true;
        self.transmit()
    }

    fn ensure_power(&mut self, on: bool) -> HalResult {
        if self.frame.power == on {
            debug!("unit already believed {}", if on { "on" } else { "off" });
            return Ok(());
        }
        self.frame.power = on;
        self.transmit()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        signals: Vec<Vec<u16>>,
    }

    impl IrSink for RecordingSink {
        fn transmit(&mut self, timings: &[u16]) -> HalResult {
            self.signals.push(timings.to_vec());
            Ok(())
        }
    }

    fn decode_frame(timings: &[u16]) -> [u8; FRAME_LEN] {
        let mut bytes = [0_u8; FRAME_LEN];
        for (index, byte) in bytes.iter_mut().enumerate() {
            for bit in 0..8 {
                let space = timings[2 + (index * 8 + bit) * 2 + 1];
                if space == ONE_SPACE_US {
                    *byte |= 1 << bit;
                }
            }
        }
        bytes
    }

    #[test]
    fn frame_layout_matches_protocol() {
        let frame = MitsubishiFrame {
            power: true,
            mode: MODE_COOL,
            fan: FAN_HI,
            temperature_c: 24,
        };

        let bytes = frame.to_bytes();

        assert_eq!(&bytes[..5], &[0x23, 0xCB, 0x26, 0x01, 0x00]);
        assert_eq!(bytes[5], 0x20);
        assert_eq!(bytes[6], 0x18);
        assert_eq!(bytes[7], 8);
        assert_eq!(bytes[8], 0x36);
        assert_eq!(bytes[9], 0x7B);
        assert!(bytes[10..17].iter().all(|byte| *byte == 0));
        let sum = bytes[..17]
            .iter()
            .fold(0_u8, |acc, byte| acc.wrapping_add(*byte));
        assert_eq!(bytes[17], sum);
    }

    #[test]
    fn temperature_is_clamped_to_unit_range() {
        let mut frame = MitsubishiFrame {
            temperature_c: 5,
            ..MitsubishiFrame::default()
        };
        assert_eq!(frame.to_bytes()[7], 0);

        frame.temperature_c = 40;
        assert_eq!(frame.to_bytes()[7], 15);
    }

    #[test]
    fn timings_carry_the_frame_twice() {
        let frame = MitsubishiFrame {
            power: true,
            mode: MODE_HEAT,
            fan: FAN_MIN,
            temperature_c: 21,
        };
        let timings = frame.timings();

        assert_eq!(timings.len(), SIGNAL_TIMINGS);
        assert_eq!(&timings[..2], &[HDR_MARK_US, HDR_SPACE_US]);
        assert_eq!(
            &timings[FRAME_TIMINGS..FRAME_TIMINGS + 2],
            &[RPT_MARK_US, RPT_SPACE_US]
        );
        assert_eq!(decode_frame(&timings), frame.to_bytes());
        assert_eq!(decode_frame(&timings[FRAME_TIMINGS + 2..]), frame.to_bytes());
        assert_eq!(timings.last(), Some(&BIT_MARK_US));
    }

    #[test]
    fn ensure_power_only_transmits_on_change() {
        let mut driver = MitsubishiDriver::new(RecordingSink::default());

        driver.ensure_power(false).unwrap();
        assert_eq!(driver.sent_frames(), 0);

        driver.ensure_power(true).unwrap();
        driver.ensure_power(true).unwrap();
        assert_eq!(driver.sent_frames(), 1);
        assert_eq!(decode_frame(&driver.sink().signals[0])[5], 0x20);

        driver.ensure_power(false).unwrap();
        assert_eq!(driver.sent_frames(), 2);
        assert_eq!(decode_frame(&driver.sink().signals[1])[5], 0x00);
    }

    #[test]
    fn unknown_codes_leave_settings_untouched() {
        let mut driver = MitsubishiDriver::new(RecordingSink::default());
        driver.set_mode(MODE_HEAT).unwrap();
        driver.set_fan(FAN_MED).unwrap();

        driver.set_mode(NO_OP_CODE).unwrap();
        driver.set_fan(0x42).unwrap();

        assert_eq!(driver.frame().mode, MODE_HEAT);
        assert_eq!(driver.frame().fan, FAN_MED);
    }

    #[test]
    fn send_transmits_composed_state_powered_on() {
        let mut driver = MitsubishiDriver::new(RecordingSink::default());
        driver.set_mode(MODE_DRY).unwrap();
        driver.set_fan(FAN_AUTO).unwrap();
        driver.set_temp(26).unwrap();
        driver.send().unwrap();

        let bytes = decode_frame(&driver.sink().signals[0]);
        assert_eq!(bytes[5], 0x20);
        assert_eq!(bytes[6], MODE_DRY);
        assert_eq!(bytes[7], 10);
        assert_eq!(bytes[8], 0x32);
        assert_eq!(bytes[9], FAN_AUTO);
    }

    #[test]
    fn begin_resets_believed_state() {
        let mut driver = MitsubishiDriver::new(RecordingSink::default());
        driver.set_mode(MODE_FAN).unwrap();
        driver.ensure_power(true).unwrap();

        driver.begin().unwrap();

        assert_eq!(*driver.frame(), MitsubishiFrame::default());
    }
}
