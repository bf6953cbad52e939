use std::io;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{parse_status, Engine, EngineError};
use crate::idempotency::IdempotencyCache;
use crate::limits::*;
use crate::model::*;
use crate::observability;

/// One request per line, tagged by `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    List {
        #[serde(default)]
        filters: FilterInput,
    },
    Get {
        id: String,
    },
    Create {
        appointment: AppointmentInput,
        #[serde(default, rename = "idempotencyKey")]
        idempotency_key: Option<String>,
    },
    UpdateStatus {
        id: String,
        status: String,
    },
    Delete {
        id: String,
    },
    /// Stream notifications on this connection: one provider, or all if omitted.
    Subscribe {
        #[serde(default)]
        provider: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterInput {
    pub date: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "provider", alias = "doctorName")]
    pub provider_name_contains: Option<String>,
}

impl FilterInput {
    /// Empty strings count as "not supplied". `None` when a date or status
    /// is given that no stored appointment can carry, so nothing matches.
    pub fn parse(&self) -> Option<ListFilter> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let date = match present(&self.date) {
            Some(raw) => Some(parse_date(&raw)?),
            None => None,
        };
        let status = match present(&self.status) {
            Some(raw) => Some(Status::parse(&raw)?),
            None => None,
        };
        Some(ListFilter {
            date,
            status,
            provider_name_contains: present(&self.provider_name_contains),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRef {
    pub id: Ulid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting: Option<ConflictRef>,
}

impl From<&EngineError> for ErrorBody {
    fn from(e: &EngineError) -> Self {
        let (kind, field, conflicting) = match e {
            EngineError::Validation(v) => (v.kind(), Some(v.field()), None),
            EngineError::Conflict {
                id,
                date,
                start_time,
            } => (
                "scheduling_conflict",
                None,
                Some(ConflictRef {
                    id: *id,
                    date: *date,
                    start_time: *start_time,
                }),
            ),
            EngineError::NotFound(_) => ("not_found", None, None),
            EngineError::LimitExceeded(_) => ("limit_exceeded", None, None),
            EngineError::WalError(_) => ("storage", None, None),
        };
        ErrorBody {
            kind,
            message: e.to_string(),
            field,
            conflicting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn ok(result: impl Serialize) -> Self {
        Self {
            ok: true,
            result: Some(serde_json::to_value(result).unwrap_or(Value::Null)),
            error: None,
        }
    }

    pub fn error(e: &EngineError) -> Self {
        Self::failure(ErrorBody::from(e))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::failure(ErrorBody {
            kind: "bad_request",
            message: message.into(),
            field: None,
            conflicting: None,
        })
    }

    fn not_found(raw_id: &str) -> Self {
        Self::failure(ErrorBody {
            kind: "not_found",
            message: format!("appointment not found: {raw_id}"),
            field: None,
            conflicting: None,
        })
    }

    fn failure(body: ErrorBody) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(body),
        }
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    event: &'a Notification,
}

/// Ids that don't parse can't name a stored appointment.
fn parse_id(raw: &str) -> Option<Ulid> {
    Ulid::from_string(raw.trim()).ok()
}

/// Run one request against the store. `subscribe` needs a connection and is
/// handled by `process_connection`.
pub async fn execute(engine: &Engine, cache: &IdempotencyCache, request: Request) -> Reply {
    let command = observability::command_label(&request);
    let started = Instant::now();

    let reply = match request {
        Request::List { filters } => match filters.parse() {
            Some(filter) => Reply::ok(engine.list(&filter).await),
            None => Reply::ok(Vec::<Appointment>::new()),
        },
        Request::Get { id } => {
            let found = match parse_id(&id) {
                Some(id) => engine.get(id).await,
                None => None,
            };
            Reply::ok(found)
        }
        Request::Create {
            appointment,
            idempotency_key,
        } => create(engine, cache, appointment, idempotency_key).await,
        Request::UpdateStatus { id, status } => {
            // An unknown status is reported even when the id is unknown too.
            if let Err(e) = parse_status(&status) {
                Reply::error(&EngineError::from(e))
            } else {
                match parse_id(&id) {
                    Some(parsed) => match engine.update_status(parsed, &status).await {
                        Ok(updated) => Reply::ok(updated),
                        Err(e) => Reply::error(&e),
                    },
                    None => Reply::not_found(&id),
                }
            }
        }
        Request::Delete { id } => match parse_id(&id) {
            Some(parsed) => match engine.delete(parsed).await {
                Ok(removed) => Reply::ok(json!({ "deleted": removed })),
                Err(e) => Reply::error(&e),
            },
            None => Reply::ok(json!({ "deleted": false })),
        },
        Request::Subscribe { .. } => Reply::bad_request("subscribe requires a connection"),
    };

    let status = if reply.ok { "ok" } else { "error" };
    metrics::counter!(observability::REQUESTS_TOTAL, "command" => command, "status" => status)
        .increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "command" => command)
        .record(started.elapsed().as_secs_f64());
    reply
}

async fn create(
    engine: &Engine,
    cache: &IdempotencyCache,
    input: AppointmentInput,
    idempotency_key: Option<String>,
) -> Reply {
    let key = idempotency_key.filter(|k| !k.is_empty());
    if let Some(key) = &key {
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Reply::error(&EngineError::LimitExceeded("idempotency key too long"));
        }
        if let Some(original) = cache.get(key) {
            debug!("idempotent replay for key {key}: {}", original.id);
            metrics::counter!(observability::IDEMPOTENT_REPLAYS_TOTAL).increment(1);
            return Reply::ok(original);
        }
    }

    match engine.create(input).await {
        Ok(appointment) => {
            if let Some(key) = &key {
                if !cache.insert(key, &appointment) {
                    warn!("idempotency cache full, key {key} not remembered");
                }
            }
            Reply::ok(appointment)
        }
        Err(e) => Reply::error(&e),
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection<S>(
    stream: S,
    engine: Arc<Engine>,
    cache: Arc<IdempotencyCache>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut events: Option<broadcast::Receiver<Notification>> = None;

    loop {
        tokio::select! {
            frame = framed.next() => {
                let line = match frame {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        // The codec stops yielding frames after an error; say why, then hang up.
                        send_line(&mut framed, &Reply::bad_request("request line too long")).await?;
                        break;
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = match serde_json::from_str::<Request>(&line) {
                    Ok(Request::Subscribe { provider }) => {
                        events = Some(match provider.as_deref() {
                            Some(p) => engine.notify.subscribe(p),
                            None => engine.notify.subscribe_all(),
                        });
                        Reply::ok(json!({ "subscribed": provider }))
                    }
                    Ok(request) => execute(&engine, &cache, request).await,
                    Err(e) => Reply::bad_request(format!("invalid request: {e}")),
                };
                send_line(&mut framed, &reply).await?;
            }
            notification = next_notification(&mut events) => match notification {
                Ok(n) => send_line(&mut framed, &EventLine { event: &n }).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("subscriber lagged, {skipped} notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => events = None,
            },
        }
    }
    Ok(())
}

async fn next_notification(
    rx: &mut Option<broadcast::Receiver<Notification>>,
) -> Result<Notification, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_line<S, T>(framed: &mut Framed<S, LinesCodec>, message: &T) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(message)?;
    framed.send(line).await.map_err(|e| match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::other(other),
    })
}
