use core::convert::TryInto;
use std::{thread, time::Duration};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::Peripherals, rmt::RMT},
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};

use acremote_common::{
    config::NetworkConfig,
    endpoint::{AcEndpoint, BasicCredentials, EndpointOutcome, IncomingRequest},
    hal::{monotonic_ms, Clock, HalError, HalResult, Listener, Radio},
    CommandSlot, IrHardwareConfig, MitsubishiDriver, RunOutcome, RuntimeConfig, Sequencer,
    SequencerError, Translator, AC_ROUTE, MAX_BODY_BYTES,
};

use crate::ir::IrTransmitter;

const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 2_000;
const WATCHDOG_TIMEOUT_SEC: u32 = 60;
const LOOP_INTERVAL_MS: u64 = 50;
const HTTP_STACK_SIZE: usize = 8 * 1024;
const AC_METHODS: [Method; 5] = [
    Method::Post,
    Method::Get,
    Method::Put,
    Method::Delete,
    Method::Patch,
];

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let runtime = load_runtime_config().context("invalid build-time configuration")?;
    info!(
        "config loaded: ssid=`{}`, hostname=`{}`, http user=`{}`, port={}",
        runtime.network.wifi_ssid,
        runtime.network.hostname,
        runtime.http.username,
        runtime.http.port,
    );

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, rmt, .. } = Peripherals::take()?;

    let ir_sender = match init_ir_transmitter(rmt, &runtime.ir) {
        Ok(transmitter) => {
            info!(
                "IR transmitter initialized on RMT channel{} / GPIO{} @ {}kHz",
                runtime.ir.rmt_channel, runtime.ir.tx_pin, runtime.ir.carrier_khz
            );
            transmitter
        }
        Err(err) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            IrTransmitter::disabled()
        }
    };

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;
    disable_wifi_power_save();

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let slot = CommandSlot::new();
    let endpoint = AcEndpoint::new(
        BasicCredentials::new(&runtime.http.username, &runtime.http.password),
        Translator::new(runtime.vocabulary, runtime.translator.clone()),
        slot.clone(),
    );

    let mut sequencer = Sequencer::new(
        EspRadio { wifi },
        EspListener::new(endpoint, runtime.http.port),
        MitsubishiDriver::new(ir_sender),
        WatchdogClock,
        slot,
        runtime.sequencer.clone(),
    );
    sequencer.begin().context("failed to start AC endpoint")?;
    info!(
        "serving http://{}:{}{AC_ROUTE}",
        runtime.network.hostname, runtime.http.port
    );

    let max_failures = runtime.sequencer.max_reconnect_failures;
    let mut consecutive_timeouts = 0_u32;

    loop {
        feed_watchdog();

        match sequencer.run_if_pending() {
            Ok(RunOutcome::Skipped) => {}
            Ok(outcome) => {
                consecutive_timeouts = 0;
                let driver = sequencer.driver();
                info!(
                    "{outcome:?}; frames sent={} ir failures={}",
                    driver.sent_frames(),
                    driver.sink().failed_frames()
                );
                if let Some(err) = driver.sink().last_error() {
                    warn!("last IR error: {err}");
                }
            }
            Err(SequencerError::ReconnectTimeout { timeout_ms }) => {
                consecutive_timeouts = consecutive_timeouts.saturating_add(1);
                error!(
                    "wifi not back after {timeout_ms} ms ({consecutive_timeouts}/{max_failures})"
                );
                if consecutive_timeouts >= max_failures {
                    error!("wifi unreachable, restarting");
                    unsafe { esp_idf_svc::sys::esp_restart() };
                }
            }
            Err(err) => warn!("sequencer error: {err:#}"),
        }

        thread::sleep(Duration::from_millis(LOOP_INTERVAL_MS));
    }
}

/// Credentials and names are baked in at build time.
fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let mut runtime = RuntimeConfig::default();

    if let Some(ssid) = option_env!("WIFI_SSID") {
        runtime.network.wifi_ssid = ssid.to_string();
    }
    if let Some(pass) = option_env!("WIFI_PASS") {
        runtime.network.wifi_pass = pass.to_string();
    }
    if let Some(hostname) = option_env!("AC_HOSTNAME") {
        runtime.network.hostname = hostname.to_string();
    }
    if let Some(user) = option_env!("AC_HTTP_USER") {
        runtime.http.username = user.to_string();
    }
    if let Some(pass) = option_env!("AC_HTTP_PASS") {
        runtime.http.password = pass.to_string();
    }

    runtime.sanitize();
    runtime.validate()?;
    Ok(runtime)
}

struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl Radio for EspRadio {
    fn disable(&mut self) -> HalResult {
        if let Err(err) = self.wifi.disconnect() {
            warn!("wifi disconnect failed: {err}");
        }
        self.wifi
            .stop()
            .map_err(|err| HalError::new("wifi stop", err))?;
        info!("wifi stopped for IR transmission");
        Ok(())
    }

    fn enable(&mut self) -> HalResult {
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi
                .start()
                .map_err(|err| HalError::new("wifi start", err))?;
            disable_wifi_power_save();
        }
        Ok(())
    }

    fn begin_reconnect(&mut self) -> HalResult {
        self.wifi
            .wifi_mut()
            .connect()
            .map_err(|err| HalError::new("wifi connect", err))
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }
}

/// Owns the HTTP server only while serving; dropping the server stops it.
struct EspListener {
    server: Option<EspHttpServer<'static>>,
    endpoint: AcEndpoint,
    port: u16,
}

impl EspListener {
    fn new(endpoint: AcEndpoint, port: u16) -> Self {
        Self {
            server: None,
            endpoint,
            port,
        }
    }
}

impl Listener for EspListener {
    fn stop(&mut self) -> HalResult {
        if self.server.take().is_some() {
            info!("http server stopped");
        }
        Ok(())
    }

    fn start(&mut self) -> HalResult {
        if self.server.is_some() {
            return Ok(());
        }
        let server = create_http_server(self.endpoint.clone(), self.port)
            .map_err(|err| HalError::new("http server start", err))?;
        self.server = Some(server);
        info!("http server started on port {}", self.port);
        Ok(())
    }

    fn is_serving(&self) -> bool {
        self.server.is_some()
    }
}

fn create_http_server(endpoint: AcEndpoint, port: u16) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: port,
        stack_size: HTTP_STACK_SIZE,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    // Every verb is routed so the endpoint can answer 401/405 itself.
    for method in AC_METHODS {
        let endpoint = endpoint.clone();
        server.fn_handler::<anyhow::Error, _>(AC_ROUTE, method, move |req| {
            handle_ac(&endpoint, method, req)
        })?;
    }

    Ok(server)
}

fn handle_ac(
    endpoint: &AcEndpoint,
    method: Method,
    mut req: Request<&mut EspHttpConnection<'_>>,
) -> anyhow::Result<()> {
    let authorization = req.header("Authorization").map(str::to_string);
    let body = if method == Method::Post {
        read_request_body(&mut req)?
    } else {
        Vec::new()
    };

    let outcome = endpoint.handle(&IncomingRequest {
        method: method_name(method),
        authorization: authorization.as_deref(),
        body: &body,
    });

    write_outcome(req, &outcome)
}

/// Reads at most one byte past the limit, enough for the endpoint to
/// reject oversized bodies.
fn read_request_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut chunk = [0_u8; 256];

    while body.len() <= MAX_BODY_BYTES {
        let read = req.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Ok(body)
}

fn write_outcome(
    req: Request<&mut EspHttpConnection<'_>>,
    outcome: &EndpointOutcome,
) -> anyhow::Result<()> {
    let extra = outcome.headers();
    let mut headers = vec![("Content-Type", "text/plain; charset=utf-8")];
    headers.extend(extra.iter().map(|(name, value)| (*name, value.as_str())));

    req.into_response(outcome.status(), Some(outcome.reason()), &headers)?
        .write_all(outcome.body().as_bytes())?;
    Ok(())
}

fn method_name(method: Method) -> &'static str {
    match method {
        Method::Post => "POST",
        Method::Get => "GET",
        Method::Put => "PUT",
        Method::Delete => "DELETE",
        Method::Patch => "PATCH",
        _ => "OTHER",
    }
}

fn init_ir_transmitter(rmt: RMT, ir: &IrHardwareConfig) -> anyhow::Result<IrTransmitter> {
    if ir.tx_pin < 0 {
        return Err(anyhow!("invalid tx pin: {}", ir.tx_pin));
    }

    let pin = ir.tx_pin;
    let carrier_khz = ir.carrier_khz;

    match ir.rmt_channel {
        0 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel0, AnyOutputPin::new(pin), carrier_khz)
        },
        1 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel1, AnyOutputPin::new(pin), carrier_khz)
        },
        2 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel2, AnyOutputPin::new(pin), carrier_khz)
        },
        3 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel3, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel4, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel5, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel6, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel7, AnyOutputPin::new(pin), carrier_khz)
        },
        _ => Err(anyhow!("unsupported RMT channel: {}", ir.rmt_channel)),
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!("wifi ssid not set; build with WIFI_SSID"));
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    if let Err(err) = esp_wifi.sta_netif_mut().set_hostname(&network.hostname) {
        warn!("failed to set hostname `{}`: {err}", network.hostname);
    }

    let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                last_err = None;
                break;
            }
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => Ok(wifi),
        Some(err) => Err(err)
            .with_context(|| format!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed")),
    }
}

/// System clock that keeps the task watchdog fed while the sequencer waits
/// for the radio.
struct WatchdogClock;

impl Clock for WatchdogClock {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn sleep_ms(&mut self, ms: u64) {
        feed_watchdog();
        thread::sleep(Duration::from_millis(ms));
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
