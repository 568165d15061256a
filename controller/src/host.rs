use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::{Mutex, Notify},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use arbiter_common::{
    climate_mode_topic, climate_temperature_topic, config::validate_rooms, parse_room_command,
    parse_statestream, room_status_topic, statestream_filter, switch_state_topic,
    ArbitrationEngine, BindingView, DeviceCommand, EntityStates, HvacMode, RoomConfig, RoomField,
    RoomStatus, RuntimeConfig, StateReport, StatestreamUpdate, TOPIC_CMD_ROOM_FILTER,
    TOPIC_CONTEXT_STATE,
};

use crate::trigger::{self, CycleRequests, CycleTrigger};

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<ArbitrationEngine>>,
    states: Arc<Mutex<EntityStates>>,
    timezone: Tz,
    statestream_base: Arc<String>,
    mqtt: AsyncClient,
    trigger: CycleTrigger,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    config_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct RoomView {
    index: usize,
    name: String,
    #[serde(rename = "heatPump")]
    heat_pump: Option<String>,
    gas: Option<String>,
    #[serde(rename = "tempSensor")]
    temp_sensor: String,
    #[serde(rename = "heatPumpStartedMs")]
    heat_pump_started_ms: Option<u64>,
    thermostat: BindingView,
    status: RoomStatus,
}

#[derive(Debug, Serialize)]
struct CycleRequestResponse {
    queued: bool,
}

const MAX_COMMAND_PAYLOAD_BYTES: usize = 512;
const MAX_STATESTREAM_PAYLOAD_BYTES: usize = 16 * 1024;
const DEFAULT_TIMEZONE: Tz = Tz::UTC;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.engine.sanitize();
    runtime
        .validate()
        .with_context(|| format!("invalid configuration in {}", store.config_path.display()))?;

    let timezone = runtime.timezone.parse::<Tz>().unwrap_or_else(|err| {
        warn!("unknown timezone '{}' ({err}), using UTC", runtime.timezone);
        DEFAULT_TIMEZONE
    });

    let refresh = Arc::new(Notify::new());
    let mut engine = ArbitrationEngine::new(runtime.engine.clone(), runtime.rooms.clone());
    let observer = Arc::clone(&refresh);
    engine.register_status_observer(Arc::new(move || observer.notify_one()));
    info!(
        "arbitrating {} room(s), {} binding, scan every {}s",
        engine.rooms().len(),
        engine.config.binding.as_str(),
        engine.config.scan_interval_secs
    );

    let mut mqtt_options = MqttOptions::new(
        runtime.network.client_id.clone(),
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let (trigger, requests) = trigger::channel();

    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        states: Arc::new(Mutex::new(EntityStates::new())),
        timezone,
        statestream_base: Arc::new(runtime.network.statestream_base.clone()),
        mqtt,
        trigger,
        store,
    };

    subscribe_topics(&app_state.mqtt, &app_state.statestream_base).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(
        app_state.clone(),
        requests,
        Duration::from_secs(runtime.engine.scan_interval_secs),
    );
    spawn_status_publish_loop(app_state.clone(), refresh);

    let app = Router::new()
        .route("/api/rooms", get(handle_get_rooms).put(handle_put_rooms))
        .route("/api/rooms/{index}/status", get(handle_get_room_status))
        .route("/api/rooms/{index}/mode", post(handle_set_mode))
        .route("/api/rooms/{index}/target", post(handle_set_target))
        .route("/api/context", get(handle_get_context))
        .route("/api/cycle", post(handle_post_cycle))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind arbiter server at {addr}"))?;

    info!("arbiter listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Environment variables win over the stored configuration.
fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        runtime.network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        runtime.network.mqtt_pass = pass;
    }
    if let Some(port) = lookup("ARBITER_HTTP_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.http_port = port;
    }
}

async fn subscribe_topics(mqtt: &AsyncClient, statestream_base: &str) -> anyhow::Result<()> {
    let topics = [
        TOPIC_CMD_ROOM_FILTER.to_string(),
        statestream_filter(statestream_base),
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Single owner of cycle execution; cycles never overlap.
fn spawn_control_loop(app_state: AppState, mut requests: CycleRequests, scan_interval: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                Some(()) = requests.recv() => {
                    debug!("immediate cycle requested");
                }
            }
            run_cycle(&app_state).await;
        }
    });
}

async fn run_cycle(app_state: &AppState) {
    let now_ms = monotonic_ms();
    let local = now_in_timezone(app_state.timezone);

    let result = {
        let states = app_state.states.lock().await;
        let mut engine = app_state.engine.lock().await;
        engine.run_cycle(&*states, now_ms, local)
    };

    // Aborted cycles are already logged by the engine.
    let Ok(outcome) = result else {
        return;
    };

    execute_commands(&app_state.mqtt, outcome.commands).await;
    publish_reports(&app_state.mqtt, &outcome.reports).await;
}

async fn execute_commands(mqtt: &AsyncClient, commands: Vec<DeviceCommand>) {
    for command in commands {
        let (topic, payload) = match &command {
            DeviceCommand::SetHvacMode { entity_id, mode } => {
                (climate_mode_topic(entity_id), mode.as_str().to_string())
            }
            DeviceCommand::SetTemperature {
                entity_id,
                temperature,
            } => (climate_temperature_topic(entity_id), temperature.to_string()),
        };

        info!("device command: {command:?}");
        if let Err(err) = mqtt.publish(topic, QoS::AtLeastOnce, false, payload).await {
            warn!("command for {} failed: {err}", command.entity_id());
        }
    }
}

async fn publish_reports(mqtt: &AsyncClient, reports: &[StateReport]) {
    for report in reports {
        match serde_json::to_vec(report) {
            Ok(body) => {
                if let Err(err) = mqtt
                    .publish(switch_state_topic(report.room_index), QoS::AtLeastOnce, true, body)
                    .await
                {
                    warn!("switch state publish failed: {err}");
                }
            }
            Err(err) => warn!("switch state serialization failed: {err}"),
        }
    }
}

fn spawn_status_publish_loop(app_state: AppState, refresh: Arc<Notify>) {
    tokio::spawn(async move {
        loop {
            refresh.notified().await;

            let (statuses, context) = {
                let engine = app_state.engine.lock().await;
                let statuses = engine
                    .rooms()
                    .iter()
                    .enumerate()
                    .map(|(index, room)| (room_status_topic(index), serde_json::to_vec(room.status())))
                    .collect::<Vec<_>>();
                (statuses, engine.last_context().map(serde_json::to_vec))
            };

            for (topic, payload) in statuses {
                match payload {
                    Ok(body) => {
                        if let Err(err) = app_state
                            .mqtt
                            .publish(topic, QoS::AtLeastOnce, true, body)
                            .await
                        {
                            warn!("room status publish failed: {err}");
                        }
                    }
                    Err(err) => warn!("room status serialization failed: {err}"),
                }
            }

            match context {
                Some(Ok(body)) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTEXT_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("context publish failed: {err}");
                    }
                }
                Some(Err(err)) => warn!("context serialization failed: {err}"),
                None => {}
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if let Some((index, field)) = parse_room_command(&topic) {
        if payload.len() > MAX_COMMAND_PAYLOAD_BYTES {
            warn!(
                "dropping oversized MQTT payload on topic {} ({} bytes)",
                topic,
                payload.len()
            );
            return Ok(());
        }
        let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
        let changed = {
            let mut engine = app_state.engine.lock().await;
            match field {
                RoomField::Mode => match HvacMode::parse(&message) {
                    Some(mode) => engine.on_mode_change(index, mode, None),
                    None => {
                        warn!("room {index}: ignoring unknown mode '{}'", message.trim());
                        false
                    }
                },
                RoomField::Target => match message.trim().parse::<f64>() {
                    Ok(target) => engine.on_temp_change(index, target),
                    Err(_) => false,
                },
            }
        };
        if changed {
            app_state.trigger.request();
        }
        return Ok(());
    }

    let Some(update) = parse_statestream(&app_state.statestream_base, &topic) else {
        return Ok(());
    };
    if payload.len() > MAX_STATESTREAM_PAYLOAD_BYTES {
        warn!(
            "dropping oversized statestream payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 statestream payload")?;
    let mut states = app_state.states.lock().await;
    match update {
        // An empty retained state means the entity was removed.
        StatestreamUpdate::State { entity_id } if message.trim().is_empty() => {
            states.remove(&entity_id);
        }
        StatestreamUpdate::State { entity_id } => {
            states.set_state(&entity_id, message.trim());
        }
        StatestreamUpdate::Attribute {
            entity_id,
            attribute,
        } => {
            // Attributes are JSON encoded; anything else is kept verbatim.
            let value =
                serde_json::from_str::<Value>(&message).unwrap_or_else(|_| Value::String(message));
            states.set_attribute(&entity_id, &attribute, value);
        }
    }
    Ok(())
}

async fn handle_get_rooms(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.lock().await;
    let rooms = (0..engine.rooms().len())
        .filter_map(|index| room_view(&engine, index))
        .collect::<Vec<_>>();
    Json(rooms)
}

async fn handle_get_room_status(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    let engine = state.engine.lock().await;
    match engine.get_room_status(index) {
        Some(status) => Json(status.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Unknown room index"),
    }
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(mode) = HvacMode::parse(value) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Use 'off', 'heat', 'cool' or 'heat_cool'",
        );
    };
    let target = match params.get("target").map(|raw| raw.parse::<f64>()) {
        Some(Ok(target)) => Some(target),
        Some(Err(_)) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value")
        }
        None => None,
    };

    let changed = {
        let mut engine = state.engine.lock().await;
        if engine.room(index).is_none() {
            return error_response(StatusCode::NOT_FOUND, "Unknown room index");
        }
        engine.on_mode_change(index, mode, target)
    };
    if changed {
        state.trigger.request();
    }

    room_response(&state, index).await
}

async fn handle_set_target(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f64>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    let changed = {
        let mut engine = state.engine.lock().await;
        if engine.room(index).is_none() {
            return error_response(StatusCode::NOT_FOUND, "Unknown room index");
        }
        engine.on_temp_change(index, target)
    };
    if changed {
        state.trigger.request();
    }

    room_response(&state, index).await
}

async fn handle_put_rooms(
    State(state): State<AppState>,
    Json(rooms): Json<Vec<RoomConfig>>,
) -> impl IntoResponse {
    if let Err(err) = validate_rooms(&rooms) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    let mut runtime = match state.store.load_runtime_config().await {
        Ok(runtime) => runtime,
        Err(err) => {
            warn!("failed to load existing runtime config for room update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load runtime settings",
            );
        }
    };
    runtime.rooms = rooms.clone();
    if let Err(err) = state.store.save_runtime_config(&runtime).await {
        warn!("failed to persist room update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }

    {
        let mut engine = state.engine.lock().await;
        engine.replace_rooms(rooms);
        info!("room list replaced ({} room(s))", engine.rooms().len());
    }
    state.trigger.request();

    handle_get_rooms(State(state)).await.into_response()
}

async fn handle_get_context(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.lock().await;
    match engine.last_context() {
        Some(context) => Json(context.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No cycle has completed yet"),
    }
}

async fn handle_post_cycle(State(state): State<AppState>) -> impl IntoResponse {
    let queued = state.trigger.request();
    (StatusCode::ACCEPTED, Json(CycleRequestResponse { queued })).into_response()
}

async fn room_response(state: &AppState, index: usize) -> axum::response::Response {
    let engine = state.engine.lock().await;
    match room_view(&engine, index) {
        Some(view) => Json(view).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Unknown room index"),
    }
}

fn room_view(engine: &ArbitrationEngine, index: usize) -> Option<RoomView> {
    let room = engine.room(index)?;
    Some(RoomView {
        index,
        name: room.config.name.clone(),
        heat_pump: room.config.heat_pump_id().map(str::to_owned),
        gas: room.config.gas_id().map(str::to_owned),
        temp_sensor: room.config.temp_sensor.clone(),
        heat_pump_started_ms: room.heat_pump_started_ms(),
        thermostat: room.binding(),
        status: room.status().clone(),
    })
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("ARBITER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.arbiter"));

        Self {
            config_path: Arc::new(data_dir.join("config.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.config_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.config_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

fn now_in_timezone(timezone: Tz) -> DateTime<FixedOffset> {
    let local = Utc::now().with_timezone(&timezone);
    local.with_timezone(&local.offset().fix())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
