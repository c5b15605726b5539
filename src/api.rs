//! JSON control API
//!
//! Maps HTTP requests onto the sensor and the playback scheduler. Every
//! failure is an [`ApiError`], and every `ApiError` has exactly one status
//! code and one JSON body, so the full set of error responses is the table in
//! [`ApiError::status`].

use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_time::Instant;
use embedded_io_async::{Read, Write};
use log::{info, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config;
use crate::http::{self, MAX_REQUEST_SIZE, Method, ReadError};
use crate::playback::{MAX_NOTES, PlaybackScheduler};
use crate::sensor::{LightSampler, SensorReader, SensorReading};
use crate::tone::PwmOutput;

/// Runtime figures reported by `/health`
pub trait DeviceStats {
    /// Milliseconds since boot
    fn uptime_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    /// Free bytes on the heap
    fn heap_free(&self) -> usize;
}

/// Sensor shared between HTTP workers
pub type SharedSensor<S> = Mutex<CriticalSectionRawMutex, RefCell<SensorReader<S>>>;

/// Every way a request can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    /// Request line could not be parsed
    BadRequest,
    /// POST body is not JSON
    InvalidJson,
    InvalidTone,
    InvalidMelody(&'static str),
    NotFound,
    MethodNotAllowed,
    Internal(&'static str),
    /// Response body could not be encoded
    Serialization,
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest
            | ApiError::InvalidJson
            | ApiError::InvalidTone
            | ApiError::InvalidMelody(_) => 400,
            ApiError::NotFound => 404,
            ApiError::MethodNotAllowed => 405,
            ApiError::Internal(_) | ApiError::Serialization => 500,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ApiError::BadRequest => "Bad Request",
            ApiError::InvalidJson => "Invalid JSON",
            ApiError::InvalidTone => "Invalid tone parameters",
            ApiError::InvalidMelody(_) => "Invalid melody payload",
            ApiError::NotFound => "Not Found",
            ApiError::MethodNotAllowed => "Method Not Allowed",
            ApiError::Internal(_) => "internal",
            ApiError::Serialization => "serialization",
        }
    }

    pub fn detail(&self) -> Option<&'static str> {
        match self {
            ApiError::InvalidMelody(detail) | ApiError::Internal(detail) => Some(*detail),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'static str>,
}

/// Status code and encoded JSON body of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Reply {
    /// Body used when even the error response cannot be encoded
    pub const SERIALIZATION_FALLBACK: &'static [u8] = br#"{"error":"serialization"}"#;

    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(_) => Self::serialization_failure(),
        }
    }

    pub fn error(err: ApiError) -> Self {
        Self::json(
            err.status(),
            &ErrorBody {
                error: err.message(),
                detail: err.detail(),
            },
        )
    }

    fn serialization_failure() -> Self {
        Self {
            status: ApiError::Serialization.status(),
            body: Self::SERIALIZATION_FALLBACK.to_vec(),
        }
    }
}

/// Validated `POST /tone` body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonePayload {
    pub freq: i32,
    pub ms: u32,
    pub duty: f32,
}

impl TonePayload {
    pub fn from_json(body: &Value) -> Result<Self, ApiError> {
        let fields = body.as_object().ok_or(ApiError::InvalidTone)?;
        let freq = int_field(fields, "freq").ok_or(ApiError::InvalidTone)?;
        let ms = int_field(fields, "ms").ok_or(ApiError::InvalidTone)?;
        let duty = optional(fields, "duty", config::DEFAULT_DUTY, coerce_float)
            .ok_or(ApiError::InvalidTone)?;

        Ok(Self {
            freq: i32::try_from(freq).map_err(|_| ApiError::InvalidTone)?,
            ms: u32::try_from(ms).map_err(|_| ApiError::InvalidTone)?,
            duty: duty.clamp(0.0, 1.0),
        })
    }
}

/// Validated `POST /melody` body
#[derive(Debug, Clone, PartialEq)]
pub struct MelodyPayload {
    pub notes: heapless::Vec<(i32, u32), MAX_NOTES>,
    pub gap_ms: u32,
    pub duty: f32,
}

impl MelodyPayload {
    pub fn from_json(body: &Value) -> Result<Self, ApiError> {
        const PAIRS: &str = "notes must be [[freq, ms], ...]";

        let fields = body
            .as_object()
            .ok_or(ApiError::InvalidMelody("payload must be a JSON object"))?;

        let items: &[Value] = match fields.get("notes") {
            None => &[],
            Some(Value::Array(items)) => items,
            Some(_) => return Err(ApiError::InvalidMelody(PAIRS)),
        };

        let mut notes = heapless::Vec::new();
        for item in items {
            let pair = match item {
                Value::Array(pair) if pair.len() == 2 => pair,
                _ => return Err(ApiError::InvalidMelody(PAIRS)),
            };
            let freq = coerce_int(&pair[0])
                .and_then(|f| i32::try_from(f).ok())
                .ok_or(ApiError::InvalidMelody("note frequency must be an integer"))?;
            let ms = coerce_int(&pair[1])
                .and_then(|m| u32::try_from(m).ok())
                .ok_or(ApiError::InvalidMelody(
                    "note duration must be a non-negative integer",
                ))?;
            notes
                .push((freq, ms))
                .map_err(|_| ApiError::InvalidMelody("too many notes"))?;
        }

        let gap_ms = optional(fields, "gap_ms", config::DEFAULT_GAP_MS as i64, coerce_int)
            .and_then(|gap| u32::try_from(gap).ok())
            .ok_or(ApiError::InvalidMelody(
                "gap_ms must be a non-negative integer",
            ))?;
        let duty = optional(fields, "duty", config::DEFAULT_DUTY, coerce_float)
            .ok_or(ApiError::InvalidMelody("duty must be a number"))?;

        Ok(Self {
            notes,
            gap_ms,
            duty: duty.clamp(0.0, 1.0),
        })
    }
}

fn int_field(fields: &Map<String, Value>, key: &str) -> Option<i64> {
    fields.get(key).and_then(coerce_int)
}

/// Missing key -> `default`; present key must coerce.
fn optional<T>(
    fields: &Map<String, Value>,
    key: &str,
    default: T,
    coerce: fn(&Value) -> Option<T>,
) -> Option<T> {
    match fields.get(key) {
        None => Some(default),
        Some(value) => coerce(value),
    }
}

/// Integers, finite floats (truncated), booleans and numeric strings
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f as i64)
        }),
        Value::Bool(b) => Some(*b as i64),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Numbers, booleans and numeric strings; never NaN or infinite
pub fn coerce_float(value: &Value) -> Option<f32> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::Bool(b) => *b as u8 as f64,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(f as f32).filter(|f| f.is_finite())
}

/// Empty body counts as `{}`
fn decode_body(body: &[u8]) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|_| ApiError::InvalidJson)
}

#[derive(Serialize)]
struct Health<'a> {
    device_id: &'a str,
    uptime_ms: u64,
    heap_free: usize,
    sensor: SensorReading,
}

#[derive(Serialize)]
struct ToneAck {
    status: &'static str,
    freq: i32,
    ms: u32,
    duty: f32,
}

#[derive(Serialize)]
struct MelodyAck {
    status: &'static str,
    length: usize,
    gap_ms: u32,
    duty: f32,
}

#[derive(Serialize)]
struct StatusAck {
    status: &'static str,
}

/// Dispatches requests to the sensor, the scheduler and health introspection
pub struct RequestRouter<'a, S, P, D> {
    sensor: &'a SharedSensor<S>,
    playback: &'a PlaybackScheduler<P>,
    stats: &'a D,
    device_id: &'a str,
}

impl<'a, S, P, D> RequestRouter<'a, S, P, D>
where
    S: LightSampler,
    P: PwmOutput,
    D: DeviceStats,
{
    pub fn new(
        sensor: &'a SharedSensor<S>,
        playback: &'a PlaybackScheduler<P>,
        stats: &'a D,
        device_id: &'a str,
    ) -> Self {
        Self {
            sensor,
            playback,
            stats,
            device_id,
        }
    }

    /// Serve exactly one request on `conn`. The caller closes the connection.
    pub async fn handle_connection<C: Read + Write>(&self, conn: &mut C) -> Result<(), C::Error> {
        let mut buf = [0u8; MAX_REQUEST_SIZE];

        let reply = match http::read_request(conn, &mut buf).await {
            Ok(request) => {
                let reply = self.handle(request.method, &request.path, request.body);
                info!(
                    "[HTTP] {:?} {} -> {}",
                    request.method, request.path, reply.status
                );
                reply
            }
            Err(ReadError::Closed) => return Ok(()),
            Err(ReadError::Malformed) => {
                warn!("[HTTP] malformed request");
                Reply::error(ApiError::BadRequest)
            }
            Err(ReadError::Io(err)) => return Err(err),
        };

        http::write_response(conn, reply.status, &reply.body).await
    }

    /// Turn one parsed request into a reply
    pub fn handle(&self, method: Method, path: &str, body: &[u8]) -> Reply {
        match self.route(method, path, body) {
            Ok(reply) => reply,
            Err(err) => {
                if err.status() >= 500 {
                    warn!("[HTTP] {:?} {} failed: {:?}", method, path, err);
                }
                Reply::error(err)
            }
        }
    }

    fn route(&self, method: Method, path: &str, body: &[u8]) -> Result<Reply, ApiError> {
        match method {
            Method::Get => match path {
                "/sensor" => Ok(Reply::json(200, &self.read_sensor()?)),
                "/health" => Ok(Reply::json(200, &self.health()?)),
                _ => Err(ApiError::NotFound),
            },
            Method::Post => {
                let payload = decode_body(body)?;
                match path {
                    "/tone" => self.post_tone(&payload),
                    "/melody" => self.post_melody(&payload),
                    "/cancel" => {
                        self.playback.cancel();
                        Ok(Reply::json(202, &StatusAck { status: "canceled" }))
                    }
                    _ => Err(ApiError::NotFound),
                }
            }
            Method::Other => Err(ApiError::MethodNotAllowed),
        }
    }

    fn read_sensor(&self) -> Result<SensorReading, ApiError> {
        self.sensor.lock(|sensor| {
            sensor
                .try_borrow_mut()
                .map(|mut sensor| sensor.read())
                .map_err(|_| ApiError::Internal("sensor busy"))
        })
    }

    fn health(&self) -> Result<Health<'a>, ApiError> {
        Ok(Health {
            device_id: self.device_id,
            uptime_ms: self.stats.uptime_ms(),
            heap_free: self.stats.heap_free(),
            sensor: self.read_sensor()?,
        })
    }

    fn post_tone(&self, body: &Value) -> Result<Reply, ApiError> {
        let tone = TonePayload::from_json(body)?;
        self.playback.play_tone(tone.freq, tone.ms, tone.duty);
        Ok(Reply::json(
            202,
            &ToneAck {
                status: "tone played",
                freq: tone.freq,
                ms: tone.ms,
                duty: tone.duty,
            },
        ))
    }

    fn post_melody(&self, body: &Value) -> Result<Reply, ApiError> {
        let melody = MelodyPayload::from_json(body)?;
        let length = self
            .playback
            .play_melody(&melody.notes, melody.gap_ms, melody.duty);
        Ok(Reply::json(
            202,
            &MelodyAck {
                status: "melody played",
                length,
                gap_ms: melody.gap_ms,
                duty: melody.duty,
            },
        ))
    }
}
