//! Live progress over WebSocket

use crate::AppState;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use docfill_common::errors::AppError;
use docfill_common::events::{subscribe_channel, EventBus, SubscriberId, TaskEvent};
use docfill_common::models::Task;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

/// Close code sent when the requested task does not exist
pub const CLOSE_UNKNOWN_TASK: u16 = 4404;

/// What a new connection gets before any live event
pub(crate) enum Opening {
    /// No such task; close with this reason
    Missing(String),
    /// Task already ended; send this summary and close
    Finished(TaskEvent),
    /// Task still running; forward events from the subscription
    Live(SubscriberId, UnboundedReceiver<TaskEvent>),
}

fn final_snapshot(task: &Task) -> TaskEvent {
    TaskEvent::FinalResponse {
        status: task.status,
        message: format!(
            "Task already {}: generated {} of {} file(s)",
            task.status.as_str(),
            task.files_done,
            task.files_total
        ),
        files_done: task.files_done,
        files_total: task.files_total,
    }
}

/// Subscribe, then look the task up.
///
/// Subscribing first means a task that finishes in between is either seen
/// as terminal here or delivers its `final_response` on the subscription.
pub(crate) async fn open_stream(state: &AppState, task_id: &str) -> Opening {
    let bus = state.orchestrator.bus();
    let (subscriber, events) = subscribe_channel(bus.as_ref(), task_id).await;

    match state.orchestrator.progress(task_id).await {
        Ok(task) if task.status.is_terminal() => {
            bus.unsubscribe(task_id, subscriber).await;
            Opening::Finished(final_snapshot(&task))
        }
        Ok(_) => Opening::Live(subscriber, events),
        Err(e) => {
            bus.unsubscribe(task_id, subscriber).await;
            let reason = match e {
                AppError::SourceNotFound { .. } => format!("task '{}' not found", task_id),
                other => other.to_string(),
            };
            Opening::Missing(reason)
        }
    }
}

/// Upgrade and stream the task's events until `final_response` or disconnect
pub async fn progress_socket(
    ws: WebSocketUpgrade,
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state, task_id))
}

async fn send_event(socket: &mut WebSocket, task_id: &str, event: &TaskEvent) -> bool {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Failed to encode event");
            return true;
        }
    };
    socket.send(Message::Text(payload.into())).await.is_ok()
}

async fn stream_events(mut socket: WebSocket, state: AppState, task_id: String) {
    let (subscriber, mut events) = match open_stream(&state, &task_id).await {
        Opening::Missing(reason) => {
            debug!(task_id = %task_id, "Progress requested for unknown task");
            let frame = CloseFrame {
                code: CLOSE_UNKNOWN_TASK,
                reason: reason.into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
        Opening::Finished(summary) => {
            if send_event(&mut socket, &task_id, &summary).await {
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: "task finished".into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
            }
            return;
        }
        Opening::Live(subscriber, events) => (subscriber, events),
    };
    debug!(task_id = %task_id, "Progress subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if !send_event(&mut socket, &task_id, &event).await {
                    break;
                }
                if event.is_final() {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Client keep-alives carry nothing
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.orchestrator.bus().unsubscribe(&task_id, subscriber).await;
    debug!(task_id = %task_id, "Progress subscriber disconnected");
}
