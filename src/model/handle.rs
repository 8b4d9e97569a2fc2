use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ServiceError;

/// Whether a descriptor materializes one model or a pipeline of cooperating
/// components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Single,
    Pipeline,
}

/// Encoded form of an operation's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub content_type: &'static str,
    pub extension: &'static str,
}

impl OutputFormat {
    pub const PNG: OutputFormat = OutputFormat {
        content_type: "image/png",
        extension: "png",
    };
    pub const MP4: OutputFormat = OutputFormat {
        content_type: "video/mp4",
        extension: "mp4",
    };
    pub const JSON: OutputFormat = OutputFormat {
        content_type: "application/json",
        extension: "json",
    };
}

#[derive(Debug, Clone)]
pub struct InferenceInput {
    pub operation: &'static str,
    pub model_id: String,
    pub params: Value,
    pub format: OutputFormat,
}

/// Raw bytes produced by a model plus whatever the model reports about them.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub metadata: Map<String, Value>,
}

/// Materialized model state resident on the accelerator.
///
/// Implementations are driven from the blocking pool.
pub trait ModelRuntime: Send + Sync {
    fn run(&self, input: &InferenceInput) -> Result<Artifact, ServiceError>;

    fn footprint_bytes(&self) -> u64;

    /// Called once when the owning handle is evicted.
    fn teardown(&self) {}
}

/// Owned reference to a resident model.
#[derive(Clone)]
pub enum Handle {
    Single(Arc<dyn ModelRuntime>),
    /// A runnable pipeline and the auxiliary components (processors,
    /// encoders) that must stay resident with it.
    Pipeline {
        pipeline: Arc<dyn ModelRuntime>,
        components: Vec<Arc<dyn ModelRuntime>>,
    },
}

impl Handle {
    pub fn kind(&self) -> HandleKind {
        match self {
            Handle::Single(_) => HandleKind::Single,
            Handle::Pipeline { .. } => HandleKind::Pipeline,
        }
    }

    /// The component that executes requests.
    pub fn runtime(&self) -> &Arc<dyn ModelRuntime> {
        match self {
            Handle::Single(model) => model,
            Handle::Pipeline { pipeline, .. } => pipeline,
        }
    }

    pub fn footprint_bytes(&self) -> u64 {
        match self {
            Handle::Single(model) => model.footprint_bytes(),
            Handle::Pipeline {
                pipeline,
                components,
            } => components
                .iter()
                .map(|c| c.footprint_bytes())
                .fold(pipeline.footprint_bytes(), u64::saturating_add),
        }
    }

    pub(crate) fn teardown(&self) {
        match self {
            Handle::Single(model) => model.teardown(),
            Handle::Pipeline {
                pipeline,
                components,
            } => {
                pipeline.teardown();
                for component in components {
                    component.teardown();
                }
            }
        }
    }

    /// True when both handles refer to the same materialized state.
    pub fn same_as(&self, other: &Handle) -> bool {
        Arc::ptr_eq(self.runtime(), other.runtime())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind())
            .field("footprint_bytes", &self.footprint_bytes())
            .finish()
    }
}
