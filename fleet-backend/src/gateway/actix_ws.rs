//! Actix-Web WebSocket handler for the progress event stream.
//!
//! Clients connect to `/ws` and receive every gateway event as a JSON
//! text frame. The stream is read-only from the client's perspective;
//! only ping/pong and close frames are consumed.

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::AggregatedMessage;
use futures_util::StreamExt;
use std::sync::Arc;

use crate::gateway::events::EventBroadcaster;
use crate::AppState;

/// WebSocket handler for Actix-Web
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;

    let broadcaster = data.broadcaster.clone();
    actix_web::rt::spawn(handle_ws_connection(session, msg_stream, broadcaster));

    Ok(response)
}

async fn handle_ws_connection(
    mut session: actix_ws::Session,
    msg_stream: actix_ws::MessageStream,
    broadcaster: Arc<EventBroadcaster>,
) {
    let (client_id, mut event_rx) = broadcaster.subscribe();
    log::info!(
        "WebSocket client {} connected (total: {} clients)",
        client_id,
        broadcaster.client_count()
    );

    let mut msg_stream = msg_stream
        .aggregate_continuations()
        .max_continuation_size(64 * 1024);

    // Task to forward events to the WebSocket
    let mut send_session = session.clone();
    let client_id_clone = client_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if send_session.text(json).await.is_err() {
                    log::debug!(
                        "[WEBSOCKET] Failed to send event to client {}",
                        client_id_clone
                    );
                    break;
                }
            }
        }
    });

    // Consume incoming frames until the client goes away
    while let Some(msg_result) = msg_stream.next().await {
        match msg_result {
            Ok(AggregatedMessage::Ping(data)) => {
                if session.pong(&data).await.is_err() {
                    break;
                }
            }
            Ok(AggregatedMessage::Close(_)) => {
                break;
            }
            Err(e) => {
                log::error!("WebSocket error: {:?}", e);
                break;
            }
            // The event stream ignores client text/binary frames.
            _ => {}
        }
    }

    // Cleanup
    broadcaster.unsubscribe(&client_id);
    send_task.abort();
    let _ = session.close(None).await;
    log::info!("WebSocket client {} disconnected", client_id);
}
