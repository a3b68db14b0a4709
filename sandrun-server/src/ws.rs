//! The `/ws/execute` WebSocket endpoint.
//!
//! Protocol: the client sends exactly one request frame (a JSON
//! [`Submission`]) within [`FIRST_FRAME_TIMEOUT`]; the server relays every
//! engine event as a JSON text frame and closes the socket when the engine's
//! event stream ends. A send failure or a close from the peer cancels the
//! execution through the active-execution registry. The client may also send
//! a `{"type": "stop"}` control frame to cancel explicitly.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use futures::SinkExt as _;
use futures::StreamExt as _;
use futures::stream::SplitSink;
use futures::stream::SplitStream;
use sandrun_engine::Submission;
use sandrun_events::Event;
use serde::Deserialize;
use tracing::debug;

use crate::AppState;

/// How long the endpoint waits for the request frame.
pub const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(30);

/// A control frame sent by the client during execution.
#[derive(Debug, Deserialize)]
struct ControlFrame {
    /// The control frame type; only `stop` is recognized.
    #[serde(rename = "type")]
    kind: String,
}

/// Whether a text frame is an explicit stop request.
fn is_stop_frame(text: &str) -> bool {
    serde_json::from_str::<ControlFrame>(text)
        .map(|frame| frame.kind == "stop")
        .unwrap_or(false)
}

/// Upgrades the connection and hands it to the session loop.
pub async fn execute(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(state, socket))
}

/// Runs one execution session over an accepted socket.
async fn session(state: AppState, socket: WebSocket) {
    debug!("websocket connected");

    // Events are relayed while the peer is watched for control frames and
    // disconnects, so the two halves of the socket are driven separately.
    let (mut sender, mut receiver) = socket.split();

    let submission =
        match tokio::time::timeout(FIRST_FRAME_TIMEOUT, recv_text(&mut receiver)).await {
            Ok(Some(text)) => match serde_json::from_str::<Submission>(&text) {
                Ok(submission) => submission,
                Err(e) => {
                    debug!("malformed request frame: {e}");
                    send_event(
                        &mut sender,
                        &Event::error(format!("Invalid execution request: {e}")),
                    )
                    .await;
                    let _ = sender.close().await;
                    return;
                }
            },
            // The peer closed before sending a request.
            Ok(None) => return,
            Err(_) => {
                debug!("timed out waiting for a request frame");
                send_event(
                    &mut sender,
                    &Event::error("Timeout waiting for execution request"),
                )
                .await;
                let _ = sender.close().await;
                return;
            }
        };

    debug!(
        "execution request: language={}, code length={}",
        submission.language,
        submission.code.len()
    );

    let mut handle = state.engine.submit(submission);

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => {
                    if !send_event(&mut sender, &event).await {
                        debug!("client disconnected during execution");
                        state.engine.cancel(handle.id()).await;
                        return;
                    }
                }
                // The engine closed its channel: the execution is over.
                None => break,
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) if is_stop_frame(text.as_str()) => {
                    debug!("stop requested by client");
                    state.engine.cancel(handle.id()).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!("peer went away during execution");
                    state.engine.cancel(handle.id()).await;
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.close().await;
    debug!("websocket closed (execution complete)");
}

/// Receives the next text frame, or `None` once the peer is gone.
async fn recv_text(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.as_str().to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }

    None
}

/// Serializes and sends one event, returning whether the send succeeded.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &Event) -> bool {
    // Events contain nothing unserializable.
    let frame = serde_json::to_string(event).expect("events serialize");

    sender.send(Message::Text(frame.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use sandrun_languages::LanguageTag;

    use super::*;

    #[test]
    fn stop_frames_are_recognized() {
        assert!(is_stop_frame(r#"{"type": "stop"}"#));
        assert!(!is_stop_frame(r#"{"type": "pause"}"#));
        assert!(!is_stop_frame("not json"));
    }

    #[test]
    fn request_frames_parse_into_submissions() {
        let submission: Submission =
            serde_json::from_str(r#"{"language": "python", "code": "print('Hello')"}"#).unwrap();

        assert_eq!(submission.language, LanguageTag::Python);

        assert!(serde_json::from_str::<Submission>(r#"{"language": "python"}"#).is_err());
    }

    #[test]
    fn event_frames_are_flat_json_objects() {
        let frame = serde_json::to_string(&Event::complete("Execution completed successfully"))
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "complete");
        assert_eq!(value["content"], "Execution completed successfully");
    }
}
