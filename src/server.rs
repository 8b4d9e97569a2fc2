use std::{sync::Arc, time::Duration, time::Instant};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    config::AppConfig,
    dispatcher::{Dispatcher, Job, params_or_empty},
    envelope::Envelope,
    error::ServiceError,
    worker::{QueueJob, QueueResult},
};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub job_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct JobRequest {
    #[serde(default)]
    id: Option<String>,
    operation: String,
    #[serde(default, deserialize_with = "params_or_empty")]
    params: Map<String, Value>,
}

pub fn build_router(config: Arc<AppConfig>, dispatcher: Arc<Dispatcher>) -> Router {
    let state = AppState {
        job_timeout: config.job_timeout,
        dispatcher: dispatcher.clone(),
    };

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/models", get(models))
        .route("/unload", post(unload))
        .route("/jobs", post(submit_job))
        .route("/run", post(run_queued));

    for entry in dispatcher.registry().iter() {
        let Some(path) = entry.http_path else {
            continue;
        };
        let operation = entry.name;
        router = router.route(
            path,
            post(
                move |State(state): State<AppState>,
                      body: Result<Json<Map<String, Value>>, JsonRejection>| async move {
                    match body {
                        Ok(Json(params)) => {
                            Json(run_with_timeout(&state, Job::new(operation, params)).await)
                                .into_response()
                        }
                        Err(rejection) => rejected(rejection),
                    }
                },
            ),
        );
    }

    router
        .with_state(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Dispatch under the transport deadline.
async fn run_with_timeout(state: &AppState, job: Job) -> Envelope {
    let started = Instant::now();
    match tokio::time::timeout(state.job_timeout, state.dispatcher.dispatch_job(job)).await {
        Ok(envelope) => envelope,
        Err(_) => {
            let err = ServiceError::Timeout(state.job_timeout.as_secs());
            warn!(error = %err, "job abandoned by transport");
            Envelope::failure(&err, started.elapsed().as_millis() as u64)
        }
    }
}

fn rejected(rejection: JsonRejection) -> Response {
    ServiceError::BadRequest(rejection.body_text()).into_response()
}

async fn health(State(state): State<AppState>) -> Json<Envelope> {
    Json(state.dispatcher.dispatch("health", Map::new()).await)
}

async fn models(State(state): State<AppState>) -> Json<Envelope> {
    Json(state.dispatcher.dispatch("models", Map::new()).await)
}

async fn unload(State(state): State<AppState>) -> Json<Envelope> {
    Json(state.dispatcher.dispatch("unload", Map::new()).await)
}

async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection),
    };
    let mut job = Job::new(request.operation, request.params);
    if let Some(id) = request.id {
        job.id = id;
    }
    Json(run_with_timeout(&state, job).await).into_response()
}

async fn run_queued(
    State(state): State<AppState>,
    body: Result<Json<QueueJob>, JsonRejection>,
) -> Response {
    let Json(queued) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection),
    };
    let id = queued.id.clone();
    let output = run_with_timeout(&state, queued.into_job()).await;
    Json(QueueResult { id, output }).into_response()
}
