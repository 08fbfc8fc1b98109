//! WebSocket sessions: one query at a time, progress frames streamed back.

use agent::cancel::{CancelToken, Cancelled};
use agent::io::progress::{ERROR_PREFIX, ProgressEvent, ProgressSink, WARNING_PREFIX};
use agent::session::{SessionModels, run_query};
use anyhow::anyhow;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::AppState;

const FRAME_BUFFER: usize = 64;

/// Client message. Model fields persist for the rest of the session.
#[derive(Debug, Deserialize)]
struct SessionRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    planner_model: Option<String>,
    #[serde(default)]
    browser_model: Option<String>,
}

/// Progress sink feeding a session's outbound frame channel from a blocking
/// worker. Stops delivering once the session is cancelled.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
    cancel: CancelToken,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>, cancel: CancelToken) -> Self {
        Self { tx, cancel }
    }
}

impl ProgressSink for ChannelSink {
    fn send(&self, event: ProgressEvent) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(anyhow!("session closed"));
        }
        self.tx.blocking_send(event.to_frame()).map_err(|_| {
            self.cancel.cancel();
            anyhow!("session closed")
        })
    }
}

/// GET /ws - upgrade to a WebSocket session.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

enum RunEnd {
    Finished,
    Disconnected,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut outbound, mut inbound) = socket.split();
    let mut models = SessionModels::default();
    info!("session opened");

    while let Some(message) = inbound.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let request = match serde_json::from_str::<SessionRequest>(text.as_str()) {
            Ok(request) => request,
            Err(err) => {
                debug!(err = %err, "rejecting session payload");
                if send_text(&mut outbound, format!("{ERROR_PREFIX} invalid JSON payload."))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };
        if request.planner_model.is_some() {
            models.planner_model = request.planner_model;
        }
        if request.browser_model.is_some() {
            models.browser_model = request.browser_model;
        }
        let query = request.query.trim().to_string();
        if query.is_empty() {
            if send_text(&mut outbound, format!("{ERROR_PREFIX} empty query."))
                .await
                .is_err()
            {
                break;
            }
            continue;
        }

        match run_session(&state, &models, query, &mut outbound, &mut inbound).await {
            RunEnd::Finished => {}
            RunEnd::Disconnected => break,
        }
    }
    info!("session closed");
}

/// Run one query on a blocking worker while forwarding its frames and
/// watching the socket for disconnects.
async fn run_session(
    state: &AppState,
    models: &SessionModels,
    query: String,
    outbound: &mut SplitSink<WebSocket, Message>,
    inbound: &mut SplitStream<WebSocket>,
) -> RunEnd {
    let cancel = CancelToken::new();
    let (tx, mut rx) = mpsc::channel::<String>(FRAME_BUFFER);
    let sink = ChannelSink::new(tx, cancel.clone());
    let config = state.config.clone();
    let worker_models = models.clone();
    let worker_cancel = cancel.clone();
    let worker = tokio::task::spawn_blocking(move || {
        run_query(&config, &worker_models, &query, &sink, worker_cancel)
    });

    let mut end = RunEnd::Finished;
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if send_text(outbound, frame).await.is_err() {
                        cancel.cancel();
                        end = RunEnd::Disconnected;
                        break;
                    }
                }
                None => break,
            },
            message = inbound.next() => match message {
                Some(Ok(Message::Text(_))) => {
                    let busy = format!("{WARNING_PREFIX} a task is already running; message ignored.");
                    if send_text(outbound, busy).await.is_err() {
                        cancel.cancel();
                        end = RunEnd::Disconnected;
                        break;
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => {
                    info!("client disconnected; cancelling run");
                    cancel.cancel();
                    end = RunEnd::Disconnected;
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    rx.close();

    match worker.await {
        Ok(Ok(run)) => info!(state = ?run.state, executed = run.executed_count, "run finished"),
        Ok(Err(err)) if err.downcast_ref::<Cancelled>().is_some() => info!("run cancelled"),
        Ok(Err(err)) => {
            warn!(err = %format!("{err:#}"), "run failed to start");
            if matches!(end, RunEnd::Finished)
                && send_text(outbound, format!("{ERROR_PREFIX} {err:#}"))
                    .await
                    .is_err()
            {
                end = RunEnd::Disconnected;
            }
        }
        Err(err) => warn!(err = %err, "run worker panicked"),
    }
    end
}

async fn send_text(
    outbound: &mut SplitSink<WebSocket, Message>,
    text: String,
) -> Result<(), axum::Error> {
    outbound.send(Message::Text(text.into())).await
}
