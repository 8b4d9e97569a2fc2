//! Turns untyped jobs into uniformly shaped envelopes.
//!
//! A job moves `Received -> Validated -> Executing -> Completed`. Everything
//! that can go wrong along the way, including a panicking handler, ends as a
//! failure envelope; nothing propagates to the transport.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::{AppConfig, ModelBackend},
    envelope::{Envelope, ProcessingResult},
    error::ServiceError,
    model::{
        Accelerator, Catalog, DeviceAccelerator, ModelLoader, PlaceholderLoader, ResidencyManager,
    },
    ops::{HandlerContext, ModelHandler, OperationRegistry},
    storage::{ArtifactStore, HttpObjectStore, ObjectStore},
};

/// Operations answered by the dispatcher itself; they take no params.
pub const SPECIAL_OPERATIONS: [&str; 3] = ["health", "models", "unload"];

/// One unit of work, transport-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default = "new_job_id")]
    pub id: String,
    pub operation: String,
    #[serde(default, deserialize_with = "params_or_empty")]
    pub params: Map<String, Value>,
}

impl Job {
    pub fn new(operation: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            id: new_job_id(),
            operation: operation.into(),
            params,
        }
    }
}

fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// `deserialize_with` for job params: an explicit `null` is an empty map.
pub fn params_or_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

enum Reply {
    Report(Map<String, Value>),
    Processed(ProcessingResult),
}

pub struct Dispatcher {
    registry: Arc<OperationRegistry>,
    context: HandlerContext,
    started: Instant,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<OperationRegistry>,
        residency: Arc<ResidencyManager>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            registry,
            context: HandlerContext { residency, store },
            started: Instant::now(),
        }
    }

    /// Wire up the standard catalog, loader, storage and operations.
    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let accelerator: Arc<dyn Accelerator> = Arc::new(DeviceAccelerator::new(
            config.device,
            config.accelerator_memory_bytes,
        ));
        let loader = build_loader(config, accelerator.as_ref())?;
        let catalog = Arc::new(Catalog::standard(loader));
        let residency = Arc::new(ResidencyManager::new(catalog, accelerator));

        let object_store = config
            .storage
            .as_ref()
            .map(|storage| Arc::new(HttpObjectStore::new(storage)) as Arc<dyn ObjectStore>);
        let store = Arc::new(ArtifactStore::new(object_store, config.storage_prefix.clone()));

        let registry = Arc::new(OperationRegistry::standard(Arc::new(ModelHandler)));
        Ok(Self::new(registry, residency, store))
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn residency(&self) -> &ResidencyManager {
        &self.context.residency
    }

    /// Every operation name a caller may use.
    pub fn available(&self) -> Vec<String> {
        self.registry
            .names()
            .chain(SPECIAL_OPERATIONS)
            .map(String::from)
            .collect()
    }

    pub async fn dispatch_job(&self, job: Job) -> Envelope {
        let span = info_span!("job", job_id = %job.id, operation = %job.operation);
        self.dispatch(&job.operation, job.params)
            .instrument(span)
            .await
    }

    pub async fn dispatch(&self, operation: &str, params: Map<String, Value>) -> Envelope {
        let started = Instant::now();

        let outcome = match operation {
            "health" => Ok(Reply::Report(self.health())),
            "models" => Ok(Reply::Report(self.models())),
            "unload" => Ok(Reply::Report(self.unload().await)),
            _ => self.execute(operation, params).await.map(Reply::Processed),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Reply::Report(metadata)) => Envelope::report(metadata, elapsed_ms),
            Ok(Reply::Processed(result)) => {
                info!(operation, elapsed_ms, "job completed");
                Envelope::success(result, elapsed_ms)
            }
            Err(err) => {
                warn!(operation, elapsed_ms, kind = %err.kind(), error = %err, "job failed");
                let mut envelope = Envelope::failure(&err, elapsed_ms);
                if let Some(metadata) = envelope.metadata.as_mut() {
                    metadata.insert("operation".into(), operation.into());
                }
                envelope
            }
        }
    }

    async fn execute(
        &self,
        operation: &str,
        params: Map<String, Value>,
    ) -> Result<ProcessingResult, ServiceError> {
        let entry = self
            .registry
            .get(operation)
            .ok_or_else(|| ServiceError::UnknownOperation {
                operation: operation.to_string(),
                available: self.available(),
            })?;

        let request = (entry.schema)(&params)?;
        debug!(operation, model_id = request.model_id(), "request validated");

        let handler = entry.handler.clone();
        let context = self.context.clone();
        let model_id = request.model_id();
        // a separate task keeps a panicking handler from unwinding into the transport
        tokio::spawn(async move { handler.handle(request, &context).await })
            .await
            .map_err(|err| ServiceError::inference(model_id, format!("handler aborted: {err}")))?
    }

    fn health(&self) -> Map<String, Value> {
        let residency = &self.context.residency;
        let device = residency.accelerator().info();
        let snapshot = residency.snapshot();

        let mut report = Map::new();
        report.insert("status".into(), "healthy".into());
        report.insert("device".into(), device.device.into());
        report.insert("gpuAvailable".into(), device.accelerator_available.into());
        report.insert("memory".into(), to_json(&residency.usage()));
        report.insert(
            "currentFamily".into(),
            to_json(&snapshot.current_family),
        );
        report.insert("loadedModels".into(), snapshot.loaded.into());
        report.insert(
            "uptimeSecs".into(),
            self.started.elapsed().as_secs().into(),
        );
        report
    }

    fn models(&self) -> Map<String, Value> {
        let residency = &self.context.residency;
        let snapshot = residency.snapshot();

        let available: Vec<Value> = residency
            .catalog()
            .iter()
            .map(|descriptor| {
                let mut entry = match to_json(&descriptor.info()) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                entry.insert(
                    "resident".into(),
                    snapshot.loaded.contains(&descriptor.id).into(),
                );
                Value::Object(entry)
            })
            .collect();

        let mut report = Map::new();
        report.insert("available".into(), available.into());
        report.insert("loaded".into(), snapshot.loaded.into());
        report.insert("currentFamily".into(), to_json(&snapshot.current_family));
        let operations: Vec<Value> = self
            .registry
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "name": entry.name,
                    "httpPath": entry.http_path,
                    "summary": entry.summary,
                })
            })
            .collect();
        report.insert("operations".into(), operations.into());
        report.insert("specialOperations".into(), SPECIAL_OPERATIONS.to_vec().into());
        report
    }

    async fn unload(&self) -> Map<String, Value> {
        let evicted = self.context.residency.release().await;

        let mut report = Map::new();
        report.insert("evicted".into(), evicted.into());
        report.insert("memory".into(), to_json(&self.context.residency.usage()));
        report
    }

    /// Release every resident model; called once on the way out.
    pub async fn shutdown(&self) {
        let evicted = self.context.residency.release().await;
        info!(?evicted, "dispatcher shut down");
    }
}

fn build_loader(
    config: &AppConfig,
    accelerator: &dyn Accelerator,
) -> Result<Arc<dyn ModelLoader>, ServiceError> {
    match config.model_backend {
        ModelBackend::Placeholder => Ok(Arc::new(PlaceholderLoader::new(
            accelerator.device().to_string(),
        ))),
        #[cfg(feature = "tch-backend")]
        ModelBackend::TorchScript => Ok(Arc::new(crate::model::TorchScriptLoader::new(
            config.model_cache_dir.clone(),
            accelerator.device().to_tch(),
        ))),
        #[cfg(not(feature = "tch-backend"))]
        ModelBackend::TorchScript => Err(ServiceError::Config(
            "MODEL_BACKEND=torchscript requires building with the `tch-backend` feature".into(),
        )),
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
