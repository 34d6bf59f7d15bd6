//! The SSE stream: a wildcard event-bus subscriber forwarded to the
//! client until either side disconnects. The `event:` name is the
//! event's type tag; `data:` is the JSON payload.

use std::convert::Infallible;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt, once};
use tokio_stream::wrappers::ReceiverStream;

use crate::state::event_bus;

/// `GET /events`
pub async fn stream()
-> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
  let receiver = event_bus().subscribe().await.into_receiver();

  let connected =
    once(async { Ok(SseEvent::default().event("connected").data("{}")) });
  let events = ReceiverStream::new(receiver).map(|event| {
    let sse = SseEvent::default().event(event.kind());
    Ok(match sse.json_data(&event) {
      Ok(sse) => sse,
      // Serialization of our own entities cannot realistically
      // fail; degrade to an empty payload rather than killing the
      // stream.
      Err(_) => SseEvent::default().event(event.kind()).data("{}"),
    })
  });

  Sse::new(connected.chain(events))
    .keep_alive(KeepAlive::default())
}
