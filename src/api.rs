use std::io::Read;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

use crate::alarm::model::{Alarm, AlarmDraft, AlarmPatch, TimeDisplayMode};
use crate::alarm::occurrence::{format_next_occurrence_with_mode, next_occurrence};
use crate::alarm::ringing::SnoozeOutcome;
use crate::alarm::store::AlarmCollection;
use crate::clock::Clock;
use crate::effects::RingingSignal;
use crate::engine::EngineHandle;
use crate::error::AlarmError;

const MAX_BODY_BYTES: u64 = 64 * 1024;

/// What a front end should be showing right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScreenState {
    pub ringing: bool,
    pub alarm_id: Option<String>,
    pub label: Option<String>,
    pub snooze_count: u32,
}

/// Feeds dispatcher ring/clear events into the state served by `/v1/state`.
#[derive(Debug, Clone, Default)]
pub struct ApiSignal {
    screen: Arc<Mutex<ScreenState>>,
}

impl ApiSignal {
    pub fn new(screen: Arc<Mutex<ScreenState>>) -> Self {
        Self { screen }
    }

    fn update(&self, next: ScreenState) {
        match self.screen.lock() {
            Ok(mut screen) => *screen = next,
            Err(_) => warn!("screen state lock poisoned, dropping update"),
        }
    }
}

impl RingingSignal for ApiSignal {
    fn ringing(&self, alarm: &Alarm, snooze_count: u32) {
        self.update(ScreenState {
            ringing: true,
            alarm_id: Some(alarm.id.clone()),
            label: Some(alarm.label.clone()),
            snooze_count,
        });
    }

    fn cleared(&self) {
        self.update(ScreenState::default());
    }
}

#[derive(Clone)]
pub struct ApiContext {
    pub collection: Arc<AlarmCollection>,
    pub engine: EngineHandle,
    pub screen: Arc<Mutex<ScreenState>>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

pub struct ApiServer {
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn start(config: ApiServerConfig, context: ApiContext) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let http_join = thread::Builder::new()
            .name("alarm-api".to_string())
            .spawn(move || run_server_loop(server, context, stop_for_thread))
            .context("failed to spawn API thread")?;
        info!(%bind, "API server listening");

        Ok(Self {
            stop,
            http_join: Some(http_join),
        })
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

fn run_server_loop(server: Server, context: ApiContext, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &context),
            Ok(None) => continue,
            Err(_) => continue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Health,
    State,
    ListAlarms { enabled: Option<bool> },
    CreateAlarm,
    PatchAlarm(String),
    ToggleAlarm(String),
    DeleteAlarm(String),
    Dismiss,
    Snooze,
    MethodNotAllowed,
    NotFound,
}

impl Route {
    fn reads_body(&self) -> bool {
        matches!(self, Route::CreateAlarm | Route::PatchAlarm(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Json(u16, Value),
    Text(u16, String),
}

impl Reply {
    fn status(&self) -> u16 {
        match self {
            Reply::Json(status, _) | Reply::Text(status, _) => *status,
        }
    }
}

fn handle_request(mut request: tiny_http::Request, context: &ApiContext) {
    let Some(remote_addr) = request.remote_addr().copied() else {
        let _ = send_text(request, StatusCode(400), "missing remote address");
        return;
    };
    if !is_local_network_ip(remote_addr.ip()) {
        let _ = send_text(request, StatusCode(403), "forbidden: local network only");
        return;
    }

    let method = request.method().clone();
    let url = request.url().to_string();
    let (path, query) = split_path_query(&url);
    let route = route(&method, path, query);

    let mut body = String::new();
    if route.reads_body()
        && request
            .as_reader()
            .take(MAX_BODY_BYTES)
            .read_to_string(&mut body)
            .is_err()
    {
        let _ = send_text(request, StatusCode(400), "request body is not valid UTF-8");
        return;
    }

    let reply = respond(context, route, &body);
    debug!(%method, path, status = reply.status(), client = %remote_addr, "api request");
    let sent = match reply {
        Reply::Json(status, payload) => send_json(request, StatusCode(status), &payload),
        Reply::Text(status, text) => send_text(request, StatusCode(status), &text),
    };
    if let Err(err) = sent {
        debug!("failed to send API response: {err:#}");
    }
}

fn route(method: &Method, path: &str, query: &str) -> Route {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    match path {
        "/healthz" => only(method, Method::Get, Route::Health),
        "/v1/state" => only(method, Method::Get, Route::State),
        "/v1/alarms" => match method {
            Method::Get => Route::ListAlarms {
                enabled: query_param(query, "enabled").and_then(parse_bool),
            },
            Method::Post => Route::CreateAlarm,
            _ => Route::MethodNotAllowed,
        },
        "/v1/ringing/dismiss" => only(method, Method::Post, Route::Dismiss),
        "/v1/ringing/snooze" => only(method, Method::Post, Route::Snooze),
        _ => alarm_item_route(method, path),
    }
}

fn alarm_item_route(method: &Method, path: &str) -> Route {
    let Some(rest) = path.strip_prefix("/v1/alarms/") else {
        return Route::NotFound;
    };
    match rest.split('/').collect::<Vec<_>>().as_slice() {
        [id] if !id.is_empty() => match method {
            Method::Patch => Route::PatchAlarm((*id).to_string()),
            Method::Delete => Route::DeleteAlarm((*id).to_string()),
            _ => Route::MethodNotAllowed,
        },
        [id, "toggle"] if !id.is_empty() => {
            only(method, Method::Post, Route::ToggleAlarm((*id).to_string()))
        }
        _ => Route::NotFound,
    }
}

fn only(method: &Method, expected: Method, route: Route) -> Route {
    if *method == expected {
        route
    } else {
        Route::MethodNotAllowed
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn respond(context: &ApiContext, route: Route, body: &str) -> Reply {
    let result = match route {
        Route::Health => return Reply::Text(200, "ok".to_string()),
        Route::MethodNotAllowed => return Reply::Text(405, "method not allowed".to_string()),
        Route::NotFound => return Reply::Text(404, "not found".to_string()),
        Route::State => state_payload(context),
        Route::ListAlarms { enabled } => list_payload(context, enabled),
        Route::CreateAlarm => match parse_body::<AlarmDraft>(body) {
            Ok(draft) => context
                .collection
                .add(draft)
                .and_then(|alarm| alarm_payload(context, &alarm))
                .map(|payload| (201, payload)),
            Err(reply) => return reply,
        },
        Route::PatchAlarm(id) => match parse_body::<AlarmPatch>(body) {
            Ok(patch) => context
                .collection
                .update(&id, &patch)
                .and_then(|alarm| alarm_payload(context, &alarm))
                .map(|payload| (200, payload)),
            Err(reply) => return reply,
        },
        Route::ToggleAlarm(id) => context
            .collection
            .toggle(&id)
            .and_then(|alarm| alarm_payload(context, &alarm))
            .map(|payload| (200, payload)),
        Route::DeleteAlarm(id) => context
            .collection
            .delete(&id)
            .map(|alarm| (200, json!({ "deleted": alarm.id }))),
        Route::Dismiss => context.engine.dismiss().map(|dismissed| {
            (
                200,
                json!({ "dismissed": dismissed.map(|alarm| alarm.id) }),
            )
        }),
        Route::Snooze => match context.engine.snooze() {
            Ok(outcome) => return snooze_reply(outcome),
            Err(err) => Err(err),
        },
    };

    match result {
        Ok((status, payload)) => Reply::Json(status, payload),
        Err(err) => error_reply(err),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, Reply> {
    serde_json::from_str(body)
        .map_err(|err| Reply::Text(400, format!("invalid JSON body: {err}")))
}

fn snooze_reply(outcome: SnoozeOutcome) -> Reply {
    match outcome {
        SnoozeOutcome::Snoozed { count, until } => Reply::Json(
            200,
            json!({ "outcome": "snoozed", "snooze_count": count, "until": until }),
        ),
        SnoozeOutcome::Exhausted => Reply::Json(200, json!({ "outcome": "dismissed" })),
        SnoozeOutcome::NotRinging => Reply::Json(200, json!({ "outcome": "idle" })),
        SnoozeOutcome::NotAllowed => {
            Reply::Text(400, "snooze is disabled for this alarm".to_string())
        }
    }
}

fn error_reply(err: anyhow::Error) -> Reply {
    match err.downcast_ref::<AlarmError>() {
        Some(AlarmError::NotFound(_)) => Reply::Text(404, format!("{err:#}")),
        Some(_) => Reply::Text(400, format!("{err:#}")),
        None => {
            warn!("API request failed: {err:#}");
            Reply::Text(500, "internal server error".to_string())
        }
    }
}

#[derive(Serialize)]
struct AlarmView<'a> {
    #[serde(flatten)]
    alarm: &'a Alarm,
    repeat_summary: String,
    next_occurrence: Option<String>,
    next_occurrence_display: String,
}

fn alarm_view<'a>(alarm: &'a Alarm, context: &ApiContext, mode: TimeDisplayMode) -> AlarmView<'a> {
    let next = next_occurrence(alarm, &context.clock.now());
    AlarmView {
        alarm,
        repeat_summary: alarm.repeat.summary(),
        next_occurrence: next.map(|instant| instant.to_rfc3339()),
        next_occurrence_display: format_next_occurrence_with_mode(next, mode),
    }
}

fn alarm_payload(context: &ApiContext, alarm: &Alarm) -> Result<Value> {
    let mode = context.collection.settings()?.time_format;
    Ok(serde_json::to_value(alarm_view(alarm, context, mode))?)
}

fn list_payload(context: &ApiContext, enabled: Option<bool>) -> Result<(u16, Value)> {
    let settings = context.collection.settings()?;
    let alarms = context.collection.list()?;
    let views = alarms
        .iter()
        .filter(|alarm| enabled.is_none_or(|wanted| alarm.enabled == wanted))
        .map(|alarm| alarm_view(alarm, context, settings.time_format))
        .collect::<Vec<_>>();
    Ok((
        200,
        json!({ "settings": settings, "alarms": serde_json::to_value(views)? }),
    ))
}

fn state_payload(context: &ApiContext) -> Result<(u16, Value)> {
    let ringing = context.engine.snapshot()?;
    let screen = context
        .screen
        .lock()
        .map_err(|_| anyhow::anyhow!("screen state lock poisoned"))?
        .clone();
    Ok((
        200,
        json!({
            "now": context.clock.now().to_rfc3339(),
            "ringing": ringing,
            "screen": screen,
        }),
    ))
}

fn send_json<T: Serialize>(
    request: tiny_http::Request,
    status: StatusCode,
    body: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let content_type = Header::from_str("Content-Type: application/json; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn send_text(request: tiny_http::Request, status: StatusCode, body: &str) -> Result<()> {
    let content_type = Header::from_str("Content-Type: text/plain; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_string(body.to_string())
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn split_path_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        if k == key {
            return Some(v);
        }
    }
    None
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || is_ipv4_mapped_local(v6)
        }
    }
}

fn is_ipv4_mapped_local(v6: Ipv6Addr) -> bool {
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        None => false,
    }
}
