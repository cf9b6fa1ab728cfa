//! Pull endpoint: `GET /runs/logs`, a Server-Sent Events tail of one run.
//!
//! The run id comes from a header (`X-RUN-ID` by default). The stream opens
//! with a `retry:` hint, replays the log from the start, follows it as it
//! grows, and ends with a single `done` event when the sentinel line is
//! reached. This path reads files only; it never touches the hub.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, Stream, StreamExt};

use super::AppState;
use crate::constants;
use crate::run_id::RunId;
use crate::tail::{TailEvent, TailReader};

/// Validate the run id header, then stream the run's log.
pub(crate) async fn stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let header = state.config.run_id_header.as_str();

    let raw = headers
        .get(header)
        .map(HeaderValue::as_bytes)
        .filter(|value| !value.is_empty());
    let Some(raw) = raw else {
        log::warn!("[Logs] Missing {header} header");
        return (StatusCode::BAD_REQUEST, format!("Missing {header} header")).into_response();
    };

    let run = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| RunId::parse(s).ok());
    let Some(run) = run else {
        log::warn!(
            "[Logs] Invalid {header} header: {:?}",
            String::from_utf8_lossy(raw)
        );
        return (StatusCode::BAD_REQUEST, "Invalid Run ID format").into_response();
    };

    let path = state.store.path_for(&run);
    log::info!("[Logs] Tailing {} for run {run}", path.display());
    let reader = TailReader::new(path, state.config.sentinel.clone(), state.tail_options());

    let retry = Event::default().retry(state.config.sse_retry());
    let events = stream::once(async move { Ok(retry) })
        .chain(tail_events(reader, run))
        .take_until(state.cancel.clone().cancelled_owned());

    let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(state.config.keep_alive()));
    (
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        sse,
    )
        .into_response()
}

/// Map tail events to SSE frames, ending after `done`.
fn tail_events(reader: TailReader, run: RunId) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some(reader), move |reader| {
        let run = run.clone();
        async move {
            let mut reader = reader?;
            match reader.next_event().await? {
                TailEvent::Line(line) => {
                    // Event data may not carry carriage returns
                    let data = if line.contains('\r') {
                        line.replace('\r', "")
                    } else {
                        line
                    };
                    Some((Ok(Event::default().data(data)), Some(reader)))
                }
                TailEvent::Done => {
                    log::info!("[Logs] End marker reached for run {run}, closing stream");
                    let done = Event::default()
                        .event(constants::SSE_DONE_EVENT)
                        .data(constants::SSE_DONE_BODY);
                    Some((Ok(done), None))
                }
            }
        }
    })
}
