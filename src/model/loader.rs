use serde_json::{Map, Value, json};

use crate::{
    error::ServiceError,
    model::{Artifact, Handle, HandleKind, InferenceInput, ModelDescriptor, ModelRuntime, OutputFormat},
};

/// Materializes a descriptor's weights into a [`Handle`].
///
/// Called from the blocking pool while the residency lock is held.
pub trait ModelLoader: Send + Sync {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Handle, ServiceError>;
}

/// Loader used when no weights are integrated. Its runtimes answer every
/// request with a JSON description of what they were asked to do.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderLoader {
    device: String,
}

impl PlaceholderLoader {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl ModelLoader for PlaceholderLoader {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Handle, ServiceError> {
        let runtime = |role: &'static str, bytes: u64| {
            std::sync::Arc::new(PlaceholderRuntime {
                model_id: descriptor.id.clone(),
                role,
                device: self.device.clone(),
                footprint_bytes: bytes,
            }) as std::sync::Arc<dyn ModelRuntime>
        };

        let handle = match descriptor.kind {
            HandleKind::Single => Handle::Single(runtime("model", descriptor.estimated_bytes)),
            HandleKind::Pipeline => {
                let processor_bytes = descriptor.estimated_bytes / 8;
                Handle::Pipeline {
                    pipeline: runtime("pipeline", descriptor.estimated_bytes - processor_bytes),
                    components: vec![runtime("processor", processor_bytes)],
                }
            }
        };
        Ok(handle)
    }
}

struct PlaceholderRuntime {
    model_id: String,
    role: &'static str,
    device: String,
    footprint_bytes: u64,
}

impl ModelRuntime for PlaceholderRuntime {
    fn run(&self, input: &InferenceInput) -> Result<Artifact, ServiceError> {
        let body = json!({
            "model": self.model_id,
            "role": self.role,
            "operation": input.operation,
            "requestedFormat": input.format.content_type,
            "params": input.params,
        });
        let bytes = serde_json::to_vec_pretty(&body)
            .map_err(|e| ServiceError::inference(&self.model_id, e))?;

        let mut metadata = Map::new();
        metadata.insert(
            "note".into(),
            Value::from("placeholder runtime: no model weights integrated"),
        );
        metadata.insert("device".into(), Value::from(self.device.clone()));

        Ok(Artifact {
            bytes,
            format: OutputFormat::JSON,
            metadata,
        })
    }

    fn footprint_bytes(&self) -> u64 {
        self.footprint_bytes
    }

    fn teardown(&self) {
        tracing::debug!(model_id = %self.model_id, role = self.role, "placeholder runtime released");
    }
}

#[cfg(feature = "tch-backend")]
pub use torchscript::TorchScriptLoader;

#[cfg(feature = "tch-backend")]
mod torchscript {
    use std::{
        fs,
        path::{Path, PathBuf},
        sync::Arc,
    };

    use parking_lot::Mutex;
    use serde_json::Map;
    use tch::{Device, IValue, Kind, no_grad};

    use crate::{
        error::ServiceError,
        model::{Artifact, Handle, HandleKind, InferenceInput, ModelDescriptor, ModelLoader, ModelRuntime},
    };

    /// Loads `{cache_dir}/{id}.pt` TorchScript exports.
    ///
    /// Exported modules take the request params as a JSON string and return
    /// the encoded output as a flat uint8 tensor.
    pub struct TorchScriptLoader {
        cache_dir: PathBuf,
        device: Device,
    }

    impl TorchScriptLoader {
        pub fn new(cache_dir: impl Into<PathBuf>, device: Device) -> Self {
            Self {
                cache_dir: cache_dir.into(),
                device,
            }
        }
    }

    impl ModelLoader for TorchScriptLoader {
        fn load(&self, descriptor: &ModelDescriptor) -> Result<Handle, ServiceError> {
            let main_path = self.cache_dir.join(format!("{}.pt", descriptor.id));
            let pipeline = Arc::new(ScriptModule::load(&descriptor.id, &main_path, self.device)?);

            match descriptor.kind {
                HandleKind::Single => Ok(Handle::Single(pipeline)),
                HandleKind::Pipeline => {
                    let processor_path =
                        self.cache_dir.join(format!("{}.processor.pt", descriptor.id));
                    let mut components: Vec<Arc<dyn ModelRuntime>> = Vec::new();
                    if processor_path.exists() {
                        components.push(Arc::new(ScriptModule::load(
                            &descriptor.id,
                            &processor_path,
                            self.device,
                        )?));
                    }
                    Ok(Handle::Pipeline {
                        pipeline,
                        components,
                    })
                }
            }
        }
    }

    struct ScriptModule {
        model_id: String,
        size_bytes: u64,
        module: Mutex<Option<tch::CModule>>,
    }

    impl ScriptModule {
        fn load(model_id: &str, path: &Path, device: Device) -> Result<Self, ServiceError> {
            if !path.exists() {
                return Err(ServiceError::load(
                    model_id,
                    format!("model artifact missing: {}", path.display()),
                ));
            }
            let size_bytes = fs::metadata(path)?.len();
            let mut module = tch::CModule::load_on_device(path, device)
                .map_err(|e| ServiceError::load(model_id, e))?;
            module.set_eval();

            Ok(Self {
                model_id: model_id.to_string(),
                size_bytes,
                module: Mutex::new(Some(module)),
            })
        }
    }

    impl ModelRuntime for ScriptModule {
        fn run(&self, input: &InferenceInput) -> Result<Artifact, ServiceError> {
            let params = input.params.to_string();
            let guard = self.module.lock();
            let module = guard
                .as_ref()
                .ok_or_else(|| ServiceError::inference(&self.model_id, "module already released"))?;

            let output = no_grad(|| module.forward_is(&[IValue::String(params)]))
                .map_err(|e| ServiceError::inference(&self.model_id, e))?;

            let tensor = match output {
                IValue::Tensor(t) => t,
                IValue::Tuple(ref items) if !items.is_empty() => match &items[0] {
                    IValue::Tensor(t) => t.shallow_clone(),
                    _ => {
                        return Err(ServiceError::inference(
                            &self.model_id,
                            "expected tensor as first tuple element",
                        ));
                    }
                },
                _ => {
                    return Err(ServiceError::inference(
                        &self.model_id,
                        "unexpected module output format",
                    ));
                }
            };

            let flat = tensor.to_kind(Kind::Uint8).flatten(0, -1).to(Device::Cpu);
            let bytes = Vec::<u8>::try_from(&flat)
                .map_err(|e| ServiceError::inference(&self.model_id, e))?;

            Ok(Artifact {
                bytes,
                format: input.format,
                metadata: Map::new(),
            })
        }

        fn footprint_bytes(&self) -> u64 {
            self.size_bytes
        }

        fn teardown(&self) {
            self.module.lock().take();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn descriptor(id: &str, kind: HandleKind) -> ModelDescriptor {
        ModelDescriptor::new(id, id, kind, 800, Arc::new(PlaceholderLoader::new("cpu")))
    }

    #[test]
    fn pipeline_footprint_covers_estimate() {
        let desc = descriptor("qwen-vl", HandleKind::Pipeline);
        let handle = desc.loader.load(&desc).unwrap();
        assert_eq!(handle.kind(), HandleKind::Pipeline);
        assert_eq!(handle.footprint_bytes(), 800);
    }

    #[test]
    fn placeholder_run_describes_request() {
        let desc = descriptor("midas", HandleKind::Single);
        let handle = desc.loader.load(&desc).unwrap();
        let input = InferenceInput {
            operation: "depth_map",
            model_id: "midas".into(),
            params: json!({"sourceUrl": "https://img.test/a.jpg"}),
            format: OutputFormat::PNG,
        };

        let artifact = handle.runtime().run(&input).unwrap();
        let body: Value = serde_json::from_slice(&artifact.bytes).unwrap();
        assert_eq!(body["model"], "midas");
        assert_eq!(body["params"]["sourceUrl"], "https://img.test/a.jpg");
        assert_eq!(artifact.format, OutputFormat::JSON);
        assert_eq!(artifact.metadata["device"], "cpu");
    }
}
