pub mod client;
pub mod command;
pub mod config;
pub mod endpoint;
pub mod hal;
pub mod mitsubishi;
pub mod sequencer;
pub mod vocabulary;

pub use client::{compose_request, AcRequest, ClimateState, HvacMode};
pub use command::{CommandSettings, CommandSlot, FieldError, PendingCommand, Translator};
pub use config::{IrHardwareConfig, RuntimeConfig, SequencerConfig, TranslatorConfig};
pub use endpoint::{
    handle_ac_request, AcEndpoint, BasicCredentials, EndpointOutcome, IncomingRequest, AC_ROUTE,
    MAX_BODY_BYTES,
};
pub use hal::{AcDriver, Clock, HalError, HalResult, IrSink, Listener, Radio, SystemClock};
pub use mitsubishi::{MitsubishiDriver, MitsubishiFrame};
pub use sequencer::{RunOutcome, Sequencer, SequencerError, SequencerPhase};
pub use vocabulary::{AcMode, CommandVocabulary, FanSpeed, NO_OP_CODE};
