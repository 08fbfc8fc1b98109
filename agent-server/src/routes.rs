//! HTTP route handlers for the agent API.

use agent::io::llm::{LanguageModel, OllamaClient};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/models", get(list_models))
        .route("/chat", post(chat))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

/// GET /api/models - models installed on the Ollama server; empty when it is
/// unreachable.
async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let config = state.config.clone();
    let listed = tokio::task::spawn_blocking(move || {
        OllamaClient::new(&config.llm).and_then(|client| client.list_models())
    })
    .await;
    let models = match listed {
        Ok(Ok(models)) => models,
        Ok(Err(err)) => {
            warn!(err = %format!("{err:#}"), "listing models failed");
            Vec::new()
        }
        Err(err) => {
            warn!(err = %err, "model listing task failed");
            Vec::new()
        }
    };
    Json(ModelsResponse { models })
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response: String,
}

/// POST /api/chat - single prompt without planning or tools.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, &'static str)> {
    let config = state.config.clone();
    let model = request
        .model
        .filter(|model| !model.trim().is_empty())
        .unwrap_or_else(|| config.llm.planner_model.clone());
    let answer = tokio::task::spawn_blocking(move || {
        let client = OllamaClient::new(&config.llm).ok()?;
        client.complete(&model, &request.query, None)
    })
    .await
    .ok()
    .flatten();
    match answer {
        Some(response) => Ok(Json(ChatResponse { response })),
        None => Err((StatusCode::INTERNAL_SERVER_ERROR, "LLM failure")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_model_is_optional() {
        let request: ChatRequest = serde_json::from_str(r#"{"query": "hi"}"#).expect("json");
        assert_eq!(request.query, "hi");
        assert!(request.model.is_none());
    }

    #[test]
    fn models_response_shape() {
        let body = serde_json::to_value(ModelsResponse {
            models: vec!["llama3:latest".to_string()],
        })
        .expect("json");
        assert_eq!(body, serde_json::json!({"models": ["llama3:latest"]}));
    }
}
