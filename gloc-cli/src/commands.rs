// SPDX-License-Identifier: AGPL-3.0-or-later
//! CLI command implementations

use console::style;
use gloc_backends::{Scenario, ScriptedBackend};
use gloc_core::{
    ArgumentsTarget, GeolocationError, GlocResult, LocationOptions, Position, Runtime,
};
use gloc_plugin::{Geolocation, PluginConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tokio::task::JoinHandle;

/// Options shared by every simulation command
pub struct Setup {
    pub scenario: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub runtime: Option<Runtime>,
    pub verbose: bool,
}

/// A running simulation
struct Simulation {
    backend: Arc<ScriptedBackend>,
    geolocation: Arc<Geolocation>,
    responder: Option<JoinHandle<()>>,
    tracer: Option<JoinHandle<()>>,
}

impl Simulation {
    fn start(setup: &Setup) -> GlocResult<Self> {
        let mut scenario = match &setup.scenario {
            Some(path) => Scenario::load(path)?,
            None => Scenario::default(),
        };
        if let Some(runtime) = setup.runtime {
            scenario.runtime = Some(runtime);
        }

        let config = match &setup.config {
            Some(path) => PluginConfig::load(path).map_err(|e| GeolocationError::Other(e.to_string()))?,
            None => PluginConfig::default(),
        };

        if setup.verbose {
            eprintln!(
                "Runtime: {:?}, authorization: {:?}, services enabled: {}",
                scenario.runtime.unwrap_or(Runtime::Browser),
                scenario.authorization,
                scenario.services_enabled
            );
        }

        let backend = Arc::new(ScriptedBackend::from_scenario("simulated", &scenario));
        let geolocation = Arc::new(Geolocation::new(backend.clone(), config));
        let responder = scenario
            .accept_resolution
            .map(|accept| spawn_resolution_responder(backend.clone(), geolocation.clone(), accept, setup.verbose));

        let tracer = setup.verbose.then(|| spawn_state_tracer(&geolocation));

        Ok(Self { backend, geolocation, responder, tracer })
    }

    fn finish(self, verbose: bool) {
        for task in [self.responder, self.tracer].into_iter().flatten() {
            task.abort();
        }
        if verbose {
            let calls = self.backend.calls();
            let stats = self.geolocation.cache_stats();
            eprintln!(
                "Native calls: {} fetches, {} starts, {} stops, {} prompts, {} resolutions",
                calls.fetches, calls.starts, calls.stops, calls.authorization_requests, calls.resolutions
            );
            eprintln!(
                "Cache: {} hits, {} misses ({:.0}% hit rate)",
                stats.hit_count,
                stats.miss_count,
                stats.hit_rate() * 100.0
            );
        }
    }
}

/// Plays the user answering every settings dialog the same way
fn spawn_resolution_responder(
    backend: Arc<ScriptedBackend>,
    geolocation: Arc<Geolocation>,
    accept: bool,
    verbose: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            backend.resolution_launched().await;
            if !geolocation.plugin().orchestrator().has_pending_resolution() {
                continue;
            }
            if verbose {
                let answer = if accept { style("accepted").green() } else { style("rejected").red() };
                eprintln!("Settings dialog shown, user {answer}");
            }
            if let Err(e) = geolocation.on_resolution_result(accept) {
                tracing::warn!(error = %e, "resolution answer not delivered");
            }
        }
    })
}

/// Prints every orchestrator transition
fn spawn_state_tracer(geolocation: &Geolocation) -> JoinHandle<()> {
    let mut states = geolocation.plugin().orchestrator().subscribe_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            eprintln!("  {}", style(format!("{state:?}")).dim());
        }
    })
}

fn format_optional(value: Option<f64>, unit: &str) -> String {
    value.map(|v| format!("{v:.1} {unit}")).unwrap_or_else(|| "-".to_string())
}

fn format_time(position: &Position) -> String {
    position
        .captured_at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| position.timestamp.to_string())
}

fn format_error(err: &GeolocationError) -> String {
    let hint = if err.is_resolvable() {
        " (the user can fix this from the system settings)"
    } else if err.is_permission_error() {
        " (check the app's location permission)"
    } else {
        ""
    };
    format!("{} {}{}", style(err.code()).red().bold(), err, style(hint).dim())
}

#[derive(Tabled)]
struct PositionRow {
    #[tabled(rename = "Latitude")]
    latitude: String,
    #[tabled(rename = "Longitude")]
    longitude: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Altitude")]
    altitude: String,
    #[tabled(rename = "Heading")]
    heading: String,
    #[tabled(rename = "Speed")]
    speed: String,
    #[tabled(rename = "Time")]
    time: String,
}

impl From<&Position> for PositionRow {
    fn from(p: &Position) -> Self {
        Self {
            latitude: format!("{:.6}", p.latitude),
            longitude: format!("{:.6}", p.longitude),
            accuracy: format!("{:.1} m", p.accuracy),
            altitude: format_optional(p.altitude, "m"),
            heading: format_optional(p.heading, "deg"),
            speed: format_optional(p.speed, "m/s"),
            time: format_time(p),
        }
    }
}

/// Request the current position one or more times
pub async fn locate(
    setup: &Setup,
    high_accuracy: bool,
    timeout: Option<i64>,
    maximum_age: u64,
    repeat: u32,
) -> GlocResult<()> {
    let simulation = Simulation::start(setup)?;

    let mut options = LocationOptions::new()
        .with_high_accuracy(high_accuracy)
        .with_maximum_age_ms(maximum_age);
    if let Some(ms) = timeout {
        options = options.with_timeout_ms(ms);
    }

    let mut last_error = None;
    let mut positions = Vec::new();
    for attempt in 1..=repeat.max(1) {
        match simulation.geolocation.get_current_position(&options).await {
            Ok(position) => positions.push(PositionRow::from(&position)),
            Err(e) => {
                eprintln!("{} request {attempt}: {}", style("✗").red(), format_error(&e));
                last_error = Some(e);
            }
        }
    }

    if !positions.is_empty() {
        println!("{}", Table::new(positions));
    }

    simulation.finish(setup.verbose);
    match last_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Watch position updates until `count` arrive or the watch goes quiet
pub async fn watch(setup: &Setup, high_accuracy: bool, count: usize, idle_ms: u64) -> GlocResult<()> {
    let simulation = Simulation::start(setup)?;
    let geolocation = &simulation.geolocation;

    let mut watch = geolocation.watch_position(LocationOptions::new().with_high_accuracy(high_accuracy));
    if setup.verbose {
        eprintln!("Watching as {}", watch.id());
    }

    let mut received = 0;
    let mut failure = None;
    while received < count {
        match tokio::time::timeout(Duration::from_millis(idle_ms), watch.next()).await {
            Ok(Some(Ok(position))) => {
                received += 1;
                let row = PositionRow::from(&position);
                println!(
                    "{} {} {}, {} (±{}) {}",
                    style(format!("[{received}]")).cyan(),
                    row.time,
                    row.latitude,
                    row.longitude,
                    row.accuracy,
                    style(format!("heading {} speed {}", row.heading, row.speed)).dim()
                );
            }
            Ok(Some(Err(e))) => {
                eprintln!("{} {}", style("✗").red(), format_error(&e));
                failure = Some(e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                eprintln!("{}", style(format!("No update within {idle_ms} ms")).yellow());
                break;
            }
        }
    }

    let cleared = geolocation.clear_watch(&watch).await;
    if setup.verbose {
        eprintln!("Cleared {}: {}", watch.id(), cleared);
    }
    println!("{received} update(s) received");

    simulation.finish(setup.verbose);
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[derive(Tabled)]
struct CodeRow {
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn code_rows() -> Vec<CodeRow> {
    [
        GeolocationError::TimedOut,
        GeolocationError::NoCachedPosition,
        GeolocationError::Other("Unexpected failure.".into()),
        GeolocationError::PositionUnavailable,
        GeolocationError::ServicesDisabled,
        GeolocationError::InputArgumentsInvalid(ArgumentsTarget::GetCurrentPosition),
        GeolocationError::InputArgumentsInvalid(ArgumentsTarget::WatchPosition),
        GeolocationError::InputArgumentsInvalid(ArgumentsTarget::ClearWatch),
        GeolocationError::PermissionDenied,
        GeolocationError::PermissionRestricted,
        GeolocationError::ResolutionDenied,
        GeolocationError::InvalidTimeout,
        GeolocationError::ServicesUnavailable { resolvable: true },
        GeolocationError::ServicesUnavailable { resolvable: false },
        GeolocationError::SettingsResolution("<native message>".into()),
        GeolocationError::MissingUsageConfiguration,
        GeolocationError::NoPendingResolution,
    ]
    .iter()
    .map(|e| CodeRow { code: e.code(), message: e.to_string() })
    .collect()
}

/// List every error code a caller can receive
pub fn codes() -> GlocResult<()> {
    let mut rows = code_rows();
    rows.sort_by(|a, b| a.code.cmp(&b.code));
    println!("{}", Table::new(rows));
    Ok(())
}
