use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use folio_core::EventBus;
use futures_util::Stream;
use tracing::debug;
use uuid::Uuid;

use crate::infra::app_state::AppState;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

/// Unregisters the subscriber when the SSE stream is dropped, however it
/// ends (client disconnect included).
struct Subscription {
    bus: Arc<EventBus>,
    id: Uuid,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
        debug!(subscriber = %self.id, "event stream closed");
    }
}

/// SSE stream of generation lifecycle events.
///
/// Protocol: one `connected` frame on subscribe, then events as they are
/// published, with a `ping` frame after 30 seconds of silence.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscriber_id, mut rx) = state.bus.subscribe();
    let guard = Subscription {
        bus: state.bus.clone(),
        id: subscriber_id,
    };
    debug!(subscriber = %subscriber_id, "event stream opened");

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<Event, Infallible>(Event::default().event("connected").data("{}"));

        loop {
            match tokio::time::timeout(KEEPALIVE_IDLE, rx.recv()).await {
                Ok(Some(event)) => {
                    yield Ok(Event::default().event(event.event_type).data(event.data));
                }
                Ok(None) => break,
                Err(_) => {
                    yield Ok(Event::default().event("ping").data("{}"));
                }
            }
        }
    };

    Sse::new(stream)
}
