use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::{runtime::Handle, task::JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use acremote_common::{
    config::HttpConfig,
    endpoint::{AcEndpoint, BasicCredentials, EndpointOutcome, IncomingRequest},
    hal::{monotonic_ms, HalError, HalResult, IrSink, Listener, Radio},
    CommandSlot, MitsubishiDriver, RunOutcome, RuntimeConfig, Sequencer, SequencerError,
    SystemClock, Translator, AC_ROUTE,
};

const DEFAULT_HOST_PORT: u16 = 8080;
const DEFAULT_SIM_RECONNECT_MS: u64 = 300;
const LOOP_INTERVAL_MS: u64 = 50;

type HostSequencer =
    Sequencer<SimulatedRadio, HostListener, MitsubishiDriver<LoggingIrSink>, SystemClock>;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config()?;
    let reconnect_ms = std::env::var("AC_SIM_RECONNECT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_SIM_RECONNECT_MS);

    let slot = CommandSlot::new();
    let endpoint = AcEndpoint::new(
        BasicCredentials::new(&runtime.http.username, &runtime.http.password),
        Translator::new(runtime.vocabulary, runtime.translator.clone()),
        slot.clone(),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.http.port));
    let mut sequencer = Sequencer::new(
        SimulatedRadio::new(reconnect_ms),
        HostListener::new(Handle::current(), addr, router(endpoint)),
        MitsubishiDriver::new(LoggingIrSink::default()),
        SystemClock,
        slot,
        runtime.sequencer.clone(),
    );
    sequencer.begin().context("failed to start AC endpoint")?;
    info!("ac remote simulator listening on http://{addr}{AC_ROUTE}");

    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let stop = stop.clone();
        let max_failures = runtime.sequencer.max_reconnect_failures;
        tokio::task::spawn_blocking(move || sequencer_loop(sequencer, &stop, max_failures))
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    stop.store(true, Ordering::Relaxed);
    worker.await.context("sequencer loop panicked")?;
    Ok(())
}

/// Optional JSON file named by `AC_REMOTE_CONFIG`, then env overrides.
fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let mut runtime = match std::env::var("AC_REMOTE_CONFIG") {
        Ok(path) => {
            let raw =
                std::fs::read(&path).with_context(|| format!("failed to read config `{path}`"))?;
            RuntimeConfig::from_json(&raw).with_context(|| format!("invalid config `{path}`"))?
        }
        Err(_) => RuntimeConfig {
            http: HttpConfig {
                port: DEFAULT_HOST_PORT,
                ..HttpConfig::default()
            },
            ..RuntimeConfig::default()
        },
    };

    if let Ok(user) = std::env::var("AC_HTTP_USER") {
        runtime.http.username = user;
    }
    if let Ok(pass) = std::env::var("AC_HTTP_PASS") {
        runtime.http.password = pass;
    }
    if let Some(port) = std::env::var("AC_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.http.port = port;
    }

    runtime.sanitize();
    runtime.validate()?;
    Ok(runtime)
}

fn sequencer_loop(mut sequencer: HostSequencer, stop: &AtomicBool, max_failures: u32) {
    let mut consecutive_timeouts = 0_u32;

    while !stop.load(Ordering::Relaxed) {
        match sequencer.run_if_pending() {
            Ok(RunOutcome::Skipped) => {}
            Ok(outcome) => {
                consecutive_timeouts = 0;
                info!(
                    "{outcome:?}; frames sent={} signals={}",
                    sequencer.driver().sent_frames(),
                    sequencer.driver().sink().signals
                );
            }
            Err(SequencerError::ReconnectTimeout { timeout_ms }) => {
                consecutive_timeouts = consecutive_timeouts.saturating_add(1);
                error!("radio not back after {timeout_ms} ms ({consecutive_timeouts}/{max_failures})");
                if consecutive_timeouts >= max_failures {
                    // nothing to reboot on the host; keep resuming
                    warn!("radio unreachable after {consecutive_timeouts} attempts");
                    consecutive_timeouts = 0;
                }
            }
            Err(err) => warn!("sequencer error: {err:#}"),
        }

        thread::sleep(Duration::from_millis(LOOP_INTERVAL_MS));
    }
}

pub fn router(endpoint: AcEndpoint) -> Router {
    Router::new()
        .route(AC_ROUTE, any(handle_ac))
        .layer(TraceLayer::new_for_http())
        .with_state(endpoint)
}

async fn handle_ac(
    State(endpoint): State<AcEndpoint>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let outcome = endpoint.handle(&IncomingRequest {
        method: method.as_str(),
        authorization,
        body: &body,
    });

    outcome_response(&outcome)
}

fn outcome_response(outcome: &EndpointOutcome) -> Response {
    let status =
        StatusCode::from_u16(outcome.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, outcome.body()).into_response();

    for (name, value) in outcome.headers() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!("dropping unrepresentable header {name}"),
        }
    }

    response
}

/// Serves the router on the shared tokio runtime while started.
struct HostListener {
    handle: Handle,
    addr: SocketAddr,
    router: Router,
    task: Option<JoinHandle<()>>,
}

impl HostListener {
    fn new(handle: Handle, addr: SocketAddr, router: Router) -> Self {
        Self {
            handle,
            addr,
            router,
            task: None,
        }
    }
}

impl Listener for HostListener {
    fn stop(&mut self) -> HalResult {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("listener on {} stopped", self.addr);
        }
        Ok(())
    }

    fn start(&mut self) -> HalResult {
        if self.is_serving() {
            return Ok(());
        }

        let std_listener = std::net::TcpListener::bind(self.addr)
            .map_err(|err| HalError::new("listener bind", err))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|err| HalError::new("listener nonblocking", err))?;

        let _guard = self.handle.enter();
        let listener = tokio::net::TcpListener::from_std(std_listener)
            .map_err(|err| HalError::new("listener register", err))?;
        let router = self.router.clone();
        let addr = self.addr;

        self.task = Some(self.handle.spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                error!("listener on {addr} failed: {err}");
            }
        }));
        info!("listener on {} started", self.addr);
        Ok(())
    }

    fn is_serving(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Stand-in for the station interface: reassociation completes a fixed
/// delay after it is requested.
struct SimulatedRadio {
    enabled: bool,
    connect_at_ms: Option<u64>,
    reconnect_delay_ms: u64,
}

impl SimulatedRadio {
    fn new(reconnect_delay_ms: u64) -> Self {
        Self {
            enabled: true,
            connect_at_ms: Some(0),
            reconnect_delay_ms,
        }
    }
}

impl Radio for SimulatedRadio {
    fn disable(&mut self) -> HalResult {
        self.enabled = false;
        self.connect_at_ms = None;
        info!("simulated radio off");
        Ok(())
    }

    fn enable(&mut self) -> HalResult {
        self.enabled = true;
        Ok(())
    }

    fn begin_reconnect(&mut self) -> HalResult {
        if !self.enabled {
            return Err(HalError::new("radio reconnect", "radio is disabled"));
        }
        self.connect_at_ms = Some(monotonic_ms().saturating_add(self.reconnect_delay_ms));
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.enabled
            && self
                .connect_at_ms
                .is_some_and(|connect_at| monotonic_ms() >= connect_at)
    }
}

#[derive(Debug, Default)]
struct LoggingIrSink {
    signals: u64,
}

impl IrSink for LoggingIrSink {
    fn transmit(&mut self, timings: &[u16]) -> HalResult {
        let total_us: u64 = timings.iter().map(|timing| u64::from(*timing)).sum();
        self.signals = self.signals.saturating_add(1);
        info!(
            "IR signal #{}: {} timings, {} us",
            self.signals,
            timings.len(),
            total_us
        );
        Ok(())
    }
}
