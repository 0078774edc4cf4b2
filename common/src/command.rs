use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::warn;
use serde_json::Value;

use crate::{
    config::TranslatorConfig,
    vocabulary::{CommandVocabulary, NO_OP_CODE},
};

pub const FIELD_POWER_TOGGLE: &str = "power_toggle";
pub const FIELD_POWER: &str = "power";
pub const FIELD_MODE: &str = "mode";
pub const FIELD_FAN: &str = "fan";
pub const FIELD_TEMPERATURE: &str = "temperature";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("missing or invalid field `power_toggle`")]
    PowerToggle,
    #[error("missing or invalid field `power`")]
    Power,
    #[error("missing field `mode`")]
    Mode,
    #[error("missing field `fan`")]
    Fan,
    #[error("missing or invalid field `temperature`")]
    Temperature,
    #[error("unknown mode `{0}`")]
    UnknownMode(String),
    #[error("unknown fan speed `{0}`")]
    UnknownFan(String),
}

impl FieldError {
    /// Numeric cause, following the order the fields are checked in.
    pub fn code(&self) -> u8 {
        match self {
            Self::PowerToggle => 1,
            Self::Power => 2,
            Self::Mode => 3,
            Self::Fan => 4,
            Self::Temperature => 5,
            Self::UnknownMode(_) => 6,
            Self::UnknownFan(_) => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSettings {
    pub mode_code: u8,
    pub fan_code: u8,
    pub temperature: i32,
}

/// A translated request waiting for the sequencer. `settings` is present
/// exactly when `power` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub power: bool,
    pub power_toggle: bool,
    pub settings: Option<CommandSettings>,
}

#[derive(Debug, Clone, Default)]
pub struct Translator {
    vocabulary: CommandVocabulary,
    config: TranslatorConfig,
}

impl Translator {
    pub fn new(vocabulary: CommandVocabulary, config: TranslatorConfig) -> Self {
        Self { vocabulary, config }
    }

    pub fn vocabulary(&self) -> &CommandVocabulary {
        &self.vocabulary
    }

    pub fn translate(&self, payload: &Value) -> Result<PendingCommand, FieldError> {
        let object = payload.as_object().ok_or(FieldError::PowerToggle)?;

        let power_toggle = object
            .get(FIELD_POWER_TOGGLE)
            .and_then(Value::as_bool)
            .ok_or(FieldError::PowerToggle)?;
        let power = object
            .get(FIELD_POWER)
            .and_then(Value::as_bool)
            .ok_or(FieldError::Power)?;
        let mode = object.get(FIELD_MODE).ok_or(FieldError::Mode)?;
        let fan = object.get(FIELD_FAN).ok_or(FieldError::Fan)?;
        let temperature = object
            .get(FIELD_TEMPERATURE)
            .ok_or(FieldError::Temperature)?;

        if !power {
            return Ok(PendingCommand {
                power,
                power_toggle,
                settings: None,
            });
        }

        let temperature = temperature
            .as_i64()
            .and_then(|value| i32::try_from(value).ok())
            .ok_or(FieldError::Temperature)?;

        let mode_code = self.resolve(
            mode,
            |name| self.vocabulary.lookup_mode(name),
            FieldError::UnknownMode,
        )?;
        let fan_code = self.resolve(
            fan,
            |name| self.vocabulary.lookup_fan(name),
            FieldError::UnknownFan,
        )?;

        Ok(PendingCommand {
            power,
            power_toggle,
            settings: Some(CommandSettings {
                mode_code,
                fan_code,
                temperature: temperature.saturating_add(self.config.temperature_offset),
            }),
        })
    }

    fn resolve(
        &self,
        value: &Value,
        lookup: impl Fn(&str) -> Option<u8>,
        unknown: fn(String) -> FieldError,
    ) -> Result<u8, FieldError> {
        let name = value.as_str();
        if let Some(code) = name.and_then(&lookup) {
            return Ok(code);
        }

        let shown = name.map(str::to_string).unwrap_or_else(|| value.to_string());
        if self.config.reject_unknown_names {
            return Err(unknown(shown));
        }
        warn!("unknown vocabulary name {shown}, sending no-op code");
        Ok(NO_OP_CODE)
    }
}

/// Single-slot hand-off between the request handler and the sequencer.
///
/// A new command replaces one that has not been transmitted yet. Occupancy
/// is the pending-transmission flag.
#[derive(Debug, Clone, Default)]
pub struct CommandSlot {
    inner: Arc<Mutex<Option<PendingCommand>>>,
}

impl CommandSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `command`, returning the unsent command it replaced.
    pub fn put(&self, command: PendingCommand) -> Option<PendingCommand> {
        self.lock().replace(command)
    }

    /// Puts `command` back only if nothing newer arrived meanwhile.
    pub fn restore(&self, command: PendingCommand) {
        self.lock().get_or_insert(command);
    }

    pub fn take(&self) -> Option<PendingCommand> {
        self.lock().take()
    }

    pub fn peek(&self) -> Option<PendingCommand> {
        *self.lock()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingCommand>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::vocabulary::{AcMode, FanSpeed};

    fn full_payload() -> Value {
        json!({
            "power_toggle": true,
            "power": true,
            "mode": "COOL_MODE",
            "fan": "FAN_HI",
            "temperature": 22,
        })
    }

    #[test]
    fn cool_request_applies_offset_and_codes() {
        let translator = Translator::default();
        let vocabulary = CommandVocabulary::default();

        let command = translator.translate(&full_payload()).unwrap();

        assert_eq!(
            command,
            PendingCommand {
                power: true,
                power_toggle: true,
                settings: Some(CommandSettings {
                    mode_code: vocabulary.mode_code(AcMode::Cool),
                    fan_code: vocabulary.fan_code(FanSpeed::Hi),
                    temperature: 24,
                }),
            }
        );
    }

    #[test]
    fn each_missing_field_reports_its_position() {
        let translator = Translator::default();
        let fields = [
            FIELD_POWER_TOGGLE,
            FIELD_POWER,
            FIELD_MODE,
            FIELD_FAN,
            FIELD_TEMPERATURE,
        ];

        for (index, field) in fields.iter().enumerate() {
            for power in [true, false] {
                let mut payload = full_payload();
                payload["power"] = json!(power);
                payload.as_object_mut().unwrap().remove(*field);

                let err = translator.translate(&payload).unwrap_err();
                assert_eq!(err.code() as usize, index + 1, "missing {field}");
            }
        }
    }

    #[test]
    fn first_missing_field_wins() {
        let translator = Translator::default();
        let err = translator
            .translate(&json!({ "power_toggle": false, "temperature": 20 }))
            .unwrap_err();
        assert_eq!(err, FieldError::Power);

        let err = translator.translate(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(err, FieldError::PowerToggle);
    }

    #[test]
    fn power_flags_must_be_booleans() {
        let translator = Translator::default();

        let mut payload = full_payload();
        payload["power_toggle"] = json!("yes");
        assert_eq!(translator.translate(&payload), Err(FieldError::PowerToggle));

        let mut payload = full_payload();
        payload["power"] = json!(1);
        assert_eq!(translator.translate(&payload), Err(FieldError::Power));
    }

    #[test]
    fn power_off_ignores_settings_values() {
        let translator = Translator::new(
            CommandVocabulary::default(),
            TranslatorConfig {
                reject_unknown_names: true,
                ..TranslatorConfig::default()
            },
        );

        let command = translator
            .translate(&json!({
                "power_toggle": true,
                "power": false,
                "mode": 42,
                "fan": null,
                "temperature": "hot",
            }))
            .unwrap();

        assert_eq!(
            command,
            PendingCommand {
                power: false,
                power_toggle: true,
                settings: None,
            }
        );
    }

    #[test]
    fn unknown_names_map_to_no_op_by_default() {
        let translator = Translator::default();
        let mut payload = full_payload();
        payload["mode"] = json!("TURBO_MODE");
        payload["fan"] = json!(3);

        let settings = translator.translate(&payload).unwrap().settings.unwrap();

        assert_eq!(settings.mode_code, NO_OP_CODE);
        assert_eq!(settings.fan_code, NO_OP_CODE);
        assert_eq!(settings.temperature, 24);
    }

    #[test]
    fn strict_vocabulary_rejects_unknown_names() {
        let translator = Translator::new(
            CommandVocabulary::default(),
            TranslatorConfig {
                reject_unknown_names: true,
                ..TranslatorConfig::default()
            },
        );

        let mut payload = full_payload();
        payload["mode"] = json!("TURBO_MODE");
        let err = translator.translate(&payload).unwrap_err();
        assert_eq!(err, FieldError::UnknownMode("TURBO_MODE".to_string()));
        assert_eq!(err.code(), 6);

        let mut payload = full_payload();
        payload["fan"] = json!("FAN_MAX");
        assert_eq!(translator.translate(&payload).unwrap_err().code(), 7);
    }

    #[test]
    fn non_integer_temperature_is_rejected_when_powered() {
        let translator = Translator::default();
        let mut payload = full_payload();
        payload["temperature"] = json!(22.5);

        assert_eq!(translator.translate(&payload), Err(FieldError::Temperature));
    }

    #[test]
    fn offset_comes_from_config() {
        let translator = Translator::new(
            CommandVocabulary::default(),
            TranslatorConfig {
                temperature_offset: 0,
                ..TranslatorConfig::default()
            },
        );

        let settings = translator
            .translate(&full_payload())
            .unwrap()
            .settings
            .unwrap();
        assert_eq!(settings.temperature, 22);
    }

    #[test]
    fn slot_holds_latest_command_until_taken() {
        let slot = CommandSlot::new();
        let off = PendingCommand {
            power: false,
            power_toggle: true,
            settings: None,
        };
        let on = Translator::default().translate(&full_payload()).unwrap();

        assert!(!slot.is_pending());
        assert_eq!(slot.put(off), None);
        assert_eq!(slot.put(on), Some(off));
        assert!(slot.clone().is_pending());

        assert_eq!(slot.take(), Some(on));
        assert!(!slot.is_pending());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn restore_does_not_clobber_newer_command() {
        let slot = CommandSlot::new();
        let older = PendingCommand {
            power: false,
            power_toggle: false,
            settings: None,
        };
        let newer = PendingCommand {
            power_toggle: true,
            ..older
        };

        slot.put(newer);
        slot.restore(older);
        assert_eq!(slot.peek(), Some(newer));

        slot.take();
        slot.restore(older);
        assert_eq!(slot.peek(), Some(older));
    }
}
