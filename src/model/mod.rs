mod accelerator;
mod catalog;
mod family;
mod handle;
mod loader;
mod residency;

pub use accelerator::{Accelerator, DeviceAccelerator, DeviceInfo, DeviceSpec};
pub use catalog::{Catalog, ModelDescriptor, ModelInfo};
pub use family::ModelFamily;
pub use handle::{Artifact, Handle, HandleKind, InferenceInput, ModelRuntime, OutputFormat};
#[cfg(feature = "tch-backend")]
pub use loader::TorchScriptLoader;
pub use loader::{ModelLoader, PlaceholderLoader};
pub use residency::{Lease, MemoryStats, ResidencyManager, ResidencySnapshot};
