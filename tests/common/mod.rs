#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use gpu_worker::{
    Dispatcher, ServiceError,
    model::{
        Accelerator, Artifact, Catalog, DeviceSpec, Handle, HandleKind, InferenceInput,
        ModelDescriptor, ModelLoader, ModelRuntime, ResidencyManager,
    },
    ops::{ModelHandler, OperationRegistry},
    storage::{ArtifactStore, ObjectStore},
};

pub const GPU_TOTAL: u64 = 80 * 1024 * 1024 * 1024;

pub struct FakeGpu;

impl Accelerator for FakeGpu {
    fn device(&self) -> DeviceSpec {
        DeviceSpec::Cuda(0)
    }
    fn is_available(&self) -> bool {
        true
    }
    fn total_bytes(&self) -> u64 {
        GPU_TOTAL
    }
    fn reclaim(&self) {}
}

/// Loader that counts calls and can be told to fail loads or inference.
#[derive(Default)]
pub struct ScriptedLoader {
    pub loads: AtomicUsize,
    pub teardowns: Arc<AtomicUsize>,
    pub fail_load: AtomicBool,
    pub fail_run: Arc<AtomicBool>,
}

impl ScriptedLoader {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

struct ScriptedRuntime {
    bytes: u64,
    teardowns: Arc<AtomicUsize>,
    fail_run: Arc<AtomicBool>,
}

impl ModelRuntime for ScriptedRuntime {
    fn run(&self, input: &InferenceInput) -> Result<Artifact, ServiceError> {
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(ServiceError::inference(&input.model_id, "CUDA error: illegal memory access"));
        }
        Ok(Artifact {
            bytes: format!("{}:{}", input.operation, input.model_id).into_bytes(),
            format: input.format,
            metadata: Map::new(),
        })
    }

    fn footprint_bytes(&self) -> u64 {
        self.bytes
    }

    fn teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

impl ModelLoader for ScriptedLoader {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Handle, ServiceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(ServiceError::load(&descriptor.id, "insufficient accelerator memory"));
        }
        Ok(Handle::Single(Arc::new(ScriptedRuntime {
            bytes: descriptor.estimated_bytes,
            teardowns: self.teardowns.clone(),
            fail_run: self.fail_run.clone(),
        })))
    }
}

pub struct FailingStore;

#[async_trait]
impl ObjectStore for FailingStore {
    async fn put(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, ServiceError> {
        Err(ServiceError::Storage("bucket unreachable".into()))
    }
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub residency: Arc<ResidencyManager>,
    pub loader: Arc<ScriptedLoader>,
}

pub fn catalog(loader: Arc<ScriptedLoader>) -> Catalog {
    let entry = |id: &str, bytes: u64| {
        ModelDescriptor::new(id, id, HandleKind::Single, bytes, loader.clone())
    };
    Catalog::new(vec![
        entry("learn2refocus", 6_000),
        entry("genfocus", 6_500),
        entry("diffcamera", 8_000),
        entry("qwen-vl", 16_000),
        entry("midas", 1_300),
        entry("zoedepth", 1_400),
        entry("depth_anything", 1_350),
        entry("sam2", 2_500),
        entry("grounded-sam", 3_500),
    ])
}

pub fn harness_with(registry: impl FnOnce() -> OperationRegistry, store: ArtifactStore) -> Harness {
    let loader = Arc::new(ScriptedLoader::default());
    let residency = Arc::new(ResidencyManager::new(
        Arc::new(catalog(loader.clone())),
        Arc::new(FakeGpu),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry()),
        residency.clone(),
        Arc::new(store),
    ));
    Harness {
        dispatcher,
        residency,
        loader,
    }
}

pub fn harness() -> Harness {
    harness_with(
        || OperationRegistry::standard(Arc::new(ModelHandler)),
        ArtifactStore::inline_only(),
    )
}

pub fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("params must be a JSON object")
}

pub fn depth_params() -> Map<String, Value> {
    params(serde_json::json!({"sourceUrl": "https://img.test/street.jpg"}))
}

pub fn edit_params(strength: f64) -> Map<String, Value> {
    params(serde_json::json!({
        "sourceUrl": "https://img.test/portrait.jpg",
        "instruction": "change the lighting to golden hour",
        "strength": strength,
    }))
}

