//! `POST /event` and `POST /action`: JSON front end to the routers.
//!
//! Body: `{"type": "HELLO" | 1, "payload": <any JSON>}`. The payload is
//! re-serialized and forwarded as opaque bytes. Content comes back as
//! `200 application/json`, consumed (or unanswered) requests as `204`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use eventmux_core::{Request, RequestKind};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::AppState;
use crate::service::{MuxError, RouteError, Router};

#[derive(Debug, Deserialize)]
struct IngestBody {
    #[serde(rename = "type")]
    kind: Option<serde_json::Value>,
    payload: Option<serde_json::Value>,
}

/// Decodes a JSON request body into a typed request.
///
/// Unrecognised type names and codes become the family's `UNKNOWN`, which
/// is never routed.
fn decode_request<K: RequestKind>(body: &[u8]) -> Result<Request<K>, RouteError> {
    let invalid = |reason: String| RouteError::InvalidRequest { reason };

    let body: IngestBody =
        serde_json::from_slice(body).map_err(|e| invalid(format!("malformed JSON body: {e}")))?;
    let kind = body
        .kind
        .ok_or_else(|| invalid("missing field `type`".to_string()))?;
    let payload = body
        .payload
        .ok_or_else(|| invalid("missing field `payload`".to_string()))?;
    let payload =
        serde_json::to_vec(&payload).map_err(|e| invalid(format!("unencodable payload: {e}")))?;

    Ok(Request::new(K::from_json(&kind), payload))
}

/// HTTP status for each routing failure.
#[must_use]
pub fn http_status(err: &RouteError) -> StatusCode {
    match err {
        RouteError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        RouteError::UnknownType { .. } => StatusCode::NOT_FOUND,
        RouteError::ProcessorUnavailable { .. } => StatusCode::NOT_IMPLEMENTED,
        RouteError::Processor(MuxError::SendFailure { .. }) => StatusCode::BAD_GATEWAY,
        RouteError::Processor(
            MuxError::Overloaded { .. } | MuxError::Closed | MuxError::StreamFailure { .. },
        ) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let status = http_status(&self);
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.status_code(),
        }));
        (status, body).into_response()
    }
}

async fn ingest<K: RequestKind>(state: &AppState, router: &Router<K>, body: &[u8]) -> Response {
    let Some(_guard) = state.shutdown.try_in_flight_guard() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "gateway is not accepting requests" })),
        )
            .into_response();
    };

    let result = match decode_request::<K>(body) {
        Ok(request) => router.route(&state.call_context(), Some(request)).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(eventmux_core::Response::Content(bytes)) => {
            ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        Ok(eventmux_core::Response::Consumed) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            match &err {
                RouteError::InvalidRequest { .. } | RouteError::UnknownType { .. } => {
                    debug!(family = %K::FAMILY, error = %err, "rejected request");
                }
                _ => warn!(family = %K::FAMILY, error = %err, "request failed"),
            }
            err.into_response()
        }
    }
}

/// `POST /event`
pub async fn event_handler(State(state): State<AppState>, body: Bytes) -> Response {
    ingest(&state, &state.gateway.events, &body).await
}

/// `POST /action`
pub async fn action_handler(State(state): State<AppState>, body: Bytes) -> Response {
    ingest(&state, &state.gateway.actions, &body).await
}

#[cfg(test)]
mod tests {
    use eventmux_core::{ActionType, EventType};

    use super::*;
    use crate::network::echo::EchoMode;
    use crate::network::handlers::test_support::{echo_router, empty_gateway, state_for};
    use crate::service::{Gateway, ProcessorId};

    fn ready_state(gateway: Gateway) -> AppState {
        let state = state_for(gateway);
        state.shutdown.set_ready();
        state
    }

    async fn body_of(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[test]
    fn decodes_name_and_code() {
        let by_name: Request<EventType> =
            decode_request(br#"{"type": "HELLO", "payload": {"a": 1}}"#).unwrap();
        assert_eq!(by_name.kind, EventType::Hello);
        assert_eq!(by_name.payload, br#"{"a":1}"#);

        let by_code: Request<ActionType> = decode_request(br#"{"type": 1, "payload": "hi"}"#).unwrap();
        assert_eq!(by_code.kind, ActionType::Hello);
        assert_eq!(by_code.payload, br#""hi""#);

        let unknown: Request<EventType> = decode_request(br#"{"type": "NOPE", "payload": 1}"#).unwrap();
        assert_eq!(unknown.kind, EventType::Unknown);
    }

    #[test]
    fn rejects_missing_fields() {
        let bodies: [&[u8]; 4] = [
            br#"{"payload": 1}"#,
            br#"{"type": "HELLO"}"#,
            br#"{"type": null, "payload": 1}"#,
            b"not json",
        ];
        for body in bodies {
            let err = decode_request::<EventType>(body).unwrap_err();
            assert!(matches!(err, RouteError::InvalidRequest { .. }), "{err:?}");
            assert_eq!(http_status(&err), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            http_status(&RouteError::Processor(MuxError::SendFailure {
                reason: "x".to_string()
            })),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            http_status(&RouteError::Processor(MuxError::Overloaded { limit: 1 })),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            http_status(&RouteError::ProcessorUnavailable {
                processor: ProcessorId::from("p")
            }),
            StatusCode::NOT_IMPLEMENTED
        );
    }

    #[tokio::test]
    async fn event_content_round_trip() {
        let gateway = Gateway::new(
            echo_router(EventType::Hello, EchoMode::Content),
            empty_gateway().actions,
        );
        let state = ready_state(gateway);

        let resp = event_handler(
            State(state),
            Bytes::from_static(br#"{"type": "HELLO", "payload": "hi"}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(body_of(resp).await, br#""hi""#);
    }

    #[tokio::test]
    async fn action_consumed_is_no_content() {
        let gateway = Gateway::new(
            empty_gateway().events,
            echo_router(ActionType::Hello, EchoMode::Consume),
        );
        let state = ready_state(gateway);

        let resp = action_handler(
            State(state),
            Bytes::from_static(br#"{"type": 1, "payload": {"x": true}}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_type_is_not_found() {
        let state = ready_state(empty_gateway());
        let resp = event_handler(
            State(state),
            Bytes::from_static(br#"{"type": "UNKNOWN", "payload": 1}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let json: serde_json::Value = serde_json::from_slice(&body_of(resp).await).unwrap();
        assert_eq!(json["code"], "NotFound");
    }

    #[tokio::test]
    async fn rejected_while_not_ready() {
        let state = state_for(empty_gateway());
        let resp = event_handler(
            State(state.clone()),
            Bytes::from_static(br#"{"type": "HELLO", "payload": 1}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.shutdown.in_flight_count(), 0);
    }
}
