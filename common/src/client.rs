//! Request bodies for the `/ac` endpoint, built from a home-automation
//! climate entity's state.

use serde::{Deserialize, Serialize};

use crate::vocabulary::{AcMode, FanSpeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Cool,
    Heat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClimateState {
    pub mode: HvacMode,
    pub target_temp: i32,
}

/// The exact body `POST /ac` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcRequest {
    pub power_toggle: bool,
    pub power: bool,
    pub mode: AcMode,
    pub fan: FanSpeed,
    pub temperature: i32,
}

/// Builds the request that moves the unit from `last` to `current`, or
/// `None` when nothing changed.
pub fn compose_request(last: &ClimateState, current: &ClimateState) -> Option<AcRequest> {
    if last == current {
        return None;
    }

    let was_on = last.mode != HvacMode::Off;
    let is_on = current.mode != HvacMode::Off;

    Some(AcRequest {
        power_toggle: was_on != is_on,
        power: is_on,
        mode: match current.mode {
            HvacMode::Cool => AcMode::Cool,
            HvacMode::Heat | HvacMode::Off => AcMode::Heat,
        },
        fan: FanSpeed::Auto,
        temperature: current.target_temp,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::command::Translator;

    fn state(mode: HvacMode, target_temp: i32) -> ClimateState {
        ClimateState { mode, target_temp }
    }

    #[test]
    fn unchanged_state_sends_nothing() {
        let current = state(HvacMode::Heat, 21);
        assert_eq!(compose_request(&current, &current), None);
    }

    #[test]
    fn turning_on_toggles_power() {
        let request =
            compose_request(&state(HvacMode::Off, 21), &state(HvacMode::Cool, 20)).unwrap();

        assert_eq!(
            request,
            AcRequest {
                power_toggle: true,
                power: true,
                mode: AcMode::Cool,
                fan: FanSpeed::Auto,
                temperature: 20,
            }
        );
    }

    #[test]
    fn switching_between_running_modes_keeps_power() {
        let request =
            compose_request(&state(HvacMode::Cool, 20), &state(HvacMode::Heat, 20)).unwrap();

        assert!(!request.power_toggle);
        assert!(request.power);
        assert_eq!(request.mode, AcMode::Heat);
    }

    #[test]
    fn turning_off_toggles_power_off() {
        let request =
            compose_request(&state(HvacMode::Heat, 22), &state(HvacMode::Off, 22)).unwrap();

        assert!(request.power_toggle);
        assert!(!request.power);
    }

    #[test]
    fn composed_body_is_accepted_by_translator() {
        let request =
            compose_request(&state(HvacMode::Off, 21), &state(HvacMode::Cool, 22)).unwrap();
        let body = serde_json::to_value(request).unwrap();

        assert_eq!(body["mode"], "COOL_MODE");
        assert_eq!(body["fan"], "FAN_AUTO");

        let command = Translator::default().translate(&body).unwrap();
        assert!(command.power && command.power_toggle);
        assert_eq!(command.settings.unwrap().temperature, 24);
    }
}
