use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::mitsubishi;

/// Code handed to the driver for names the vocabulary does not know.
/// Drivers treat it as "leave this setting alone".
pub const NO_OP_CODE: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown vocabulary name `{0}`")]
pub struct UnknownName(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcMode {
    #[serde(rename = "AUTO_MODE")]
    Auto,
    #[serde(rename = "COOL_MODE")]
    Cool,
    #[serde(rename = "DRY_MODE")]
    Dry,
    #[serde(rename = "HEAT_MODE")]
    Heat,
    #[serde(rename = "FAN_MODE")]
    Fan,
}

impl AcMode {
    pub const ALL: [Self; 5] = [Self::Auto, Self::Cool, Self::Dry, Self::Heat, Self::Fan];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO_MODE",
            Self::Cool => "COOL_MODE",
            Self::Dry => "DRY_MODE",
            Self::Heat => "HEAT_MODE",
            Self::Fan => "FAN_MODE",
        }
    }
}

impl FromStr for AcMode {
    type Err = UnknownName;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == name)
            .ok_or_else(|| UnknownName(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FanSpeed {
    #[serde(rename = "FAN_AUTO")]
    Auto,
    #[serde(rename = "FAN_MIN")]
    Min,
    #[serde(rename = "FAN_MED")]
    Med,
    #[serde(rename = "FAN_HI")]
    Hi,
}

impl FanSpeed {
    pub const ALL: [Self; 4] = [Self::Auto, Self::Min, Self::Med, Self::Hi];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "FAN_AUTO",
            Self::Min => "FAN_MIN",
            Self::Med => "FAN_MED",
            Self::Hi => "FAN_HI",
        }
    }
}

impl FromStr for FanSpeed {
    type Err = UnknownName;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|fan| fan.as_str() == name)
            .ok_or_else(|| UnknownName(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeCodes {
    pub auto: u8,
    pub cool: u8,
    pub dry: u8,
    pub heat: u8,
    pub fan: u8,
}

impl Default for ModeCodes {
    fn default() -> Self {
        Self {
            auto: mitsubishi::MODE_AUTO,
            cool: mitsubishi::MODE_COOL,
            dry: mitsubishi::MODE_DRY,
            heat: mitsubishi::MODE_HEAT,
            fan: mitsubishi::MODE_FAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanCodes {
    pub auto: u8,
    pub min: u8,
    pub med: u8,
    pub hi: u8,
}

impl Default for FanCodes {
    fn default() -> Self {
        Self {
            auto: mitsubishi::FAN_AUTO,
            min: mitsubishi::FAN_MIN,
            med: mitsubishi::FAN_MED,
            hi: mitsubishi::FAN_HI,
        }
    }
}

/// Name to protocol-code table. Built once at startup and only read afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandVocabulary {
    #[serde(default)]
    pub modes: ModeCodes,
    #[serde(default)]
    pub fans: FanCodes,
}

impl CommandVocabulary {
    pub fn new(modes: ModeCodes, fans: FanCodes) -> Self {
        Self { modes, fans }
    }

    pub fn mode_code(&self, mode: AcMode) -> u8 {
        match mode {
            AcMode::Auto => self.modes.auto,
            AcMode::Cool => self.modes.cool,
            AcMode::Dry => self.modes.dry,
            AcMode::Heat => self.modes.heat,
            AcMode::Fan => self.modes.fan,
        }
    }

    pub fn fan_code(&self, fan: FanSpeed) -> u8 {
        match fan {
            FanSpeed::Auto => self.fans.auto,
            FanSpeed::Min => self.fans.min,
            FanSpeed::Med => self.fans.med,
            FanSpeed::Hi => self.fans.hi,
        }
    }

    pub fn lookup_mode(&self, name: &str) -> Option<u8> {
        name.parse::<AcMode>().ok().map(|mode| self.mode_code(mode))
    }

    pub fn lookup_fan(&self, name: &str) -> Option<u8> {
        name.parse::<FanSpeed>().ok().map(|fan| self.fan_code(fan))
    }

    /// Resolves any mode or fan name. Unknown names yield [`NO_OP_CODE`].
    pub fn lookup(&self, name: &str) -> u8 {
        self.lookup_mode(name)
            .or_else(|| self.lookup_fan(name))
            .unwrap_or(NO_OP_CODE)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_table_uses_protocol_codes() {
        let vocabulary = CommandVocabulary::default();

        assert_eq!(vocabulary.lookup("AUTO_MODE"), 0x20);
        assert_eq!(vocabulary.lookup("COOL_MODE"), 0x18);
        assert_eq!(vocabulary.lookup("DRY_MODE"), 0x10);
        assert_eq!(vocabulary.lookup("HEAT_MODE"), 0x08);
        assert_eq!(vocabulary.lookup("FAN_MODE"), 0x38);
        assert_eq!(vocabulary.lookup("FAN_AUTO"), 0xB8);
        assert_eq!(vocabulary.lookup("FAN_MIN"), 0x79);
        assert_eq!(vocabulary.lookup("FAN_MED"), 0x7A);
        assert_eq!(vocabulary.lookup("FAN_HI"), 0x7B);
    }

    #[test]
    fn unknown_names_resolve_to_no_op() {
        let vocabulary = CommandVocabulary::default();

        assert_eq!(vocabulary.lookup("TURBO"), NO_OP_CODE);
        assert_eq!(vocabulary.lookup(""), NO_OP_CODE);
        assert_eq!(vocabulary.lookup("cool_mode"), NO_OP_CODE);
        assert_eq!(vocabulary.lookup_mode("FAN_HI"), None);
        assert_eq!(vocabulary.lookup_fan("COOL_MODE"), None);
    }

    #[test]
    fn names_round_trip_through_enums() {
        for mode in AcMode::ALL {
            assert_eq!(mode.as_str().parse::<AcMode>(), Ok(mode));
        }
        for fan in FanSpeed::ALL {
            assert_eq!(fan.as_str().parse::<FanSpeed>(), Ok(fan));
        }
        assert_eq!(
            "SLEEP".parse::<AcMode>(),
            Err(UnknownName("SLEEP".to_string()))
        );
    }

    #[test]
    fn injected_table_overrides_codes() {
        let vocabulary = CommandVocabulary::new(
            ModeCodes {
                cool: 3,
                ..ModeCodes::default()
            },
            FanCodes::default(),
        );

        assert_eq!(vocabulary.mode_code(AcMode::Cool), 3);
        assert_eq!(vocabulary.fan_code(FanSpeed::Hi), 0x7B);
    }

    #[test]
    fn partial_table_deserializes_with_defaults() {
        let vocabulary: CommandVocabulary =
            serde_json::from_str(r#"{"fans":{"auto":1,"min":2,"med":3,"hi":4}}"#).unwrap();

        assert_eq!(vocabulary.lookup("FAN_MED"), 3);
        assert_eq!(vocabulary.lookup("HEAT_MODE"), 0x08);
    }
}
