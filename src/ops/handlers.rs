use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    envelope::ProcessingResult,
    error::ServiceError,
    model::InferenceInput,
    ops::{HandlerContext, OperationHandler, TypedRequest},
};

/// Serves a request with the catalog model it names: make the model
/// resident, run it on the blocking pool, persist the artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelHandler;

#[async_trait]
impl OperationHandler for ModelHandler {
    async fn handle(
        &self,
        request: TypedRequest,
        ctx: &HandlerContext,
    ) -> Result<ProcessingResult, ServiceError> {
        let model_id = request.model_id();
        let params = request.to_params();
        let lease = ctx.residency.ensure(model_id).await?;
        let family = lease.family();

        let input = InferenceInput {
            operation: request.operation(),
            model_id: model_id.to_string(),
            params: params.clone(),
            format: request.output_format(),
        };

        let started = Instant::now();
        // the lease travels with the blocking task so the model stays
        // resident until inference returns
        let artifact = tokio::task::spawn_blocking(move || {
            let output = lease.runtime().run(&input);
            drop(lease);
            output
        })
        .await
        .map_err(|err| ServiceError::inference(model_id, format!("inference task failed: {err}")))??;
        let inference_ms = started.elapsed().as_millis() as u64;
        debug!(model_id, inference_ms, bytes = artifact.bytes.len(), "inference finished");

        let persisted = ctx.store.persist(request.operation(), &artifact).await;

        let mut result = ProcessingResult::new(persisted.output)
            .with_metadata("model", model_id)
            .with_metadata("family", family.as_str())
            .with_metadata("device", ctx.residency.accelerator().device().to_string())
            .with_metadata("contentType", artifact.format.content_type)
            .with_metadata("outputBytes", artifact.bytes.len())
            .with_metadata("inferenceMs", inference_ms)
            .with_metadata("params", params);
        if let Some(reason) = persisted.fallback {
            result = result.with_metadata("storageFallback", reason);
        }
        for (key, value) in artifact.metadata {
            result.metadata.entry(key).or_insert(value);
        }
        Ok(result)
    }
}
