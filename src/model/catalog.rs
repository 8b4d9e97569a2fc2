use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::model::{HandleKind, ModelFamily, ModelLoader};

const GIB: u64 = 1024 * 1024 * 1024;

/// Static description of one supported model.
#[derive(Clone)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub family: ModelFamily,
    pub kind: HandleKind,
    /// Footprint estimate, used by loaders that cannot measure one.
    pub estimated_bytes: u64,
    pub loader: Arc<dyn ModelLoader>,
}

impl ModelDescriptor {
    /// Family is resolved from the id.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: HandleKind,
        estimated_bytes: u64,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        let id = id.into();
        Self {
            family: ModelFamily::resolve(&id),
            id,
            name: name.into(),
            kind,
            estimated_bytes,
            loader,
        }
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            family: self.family,
            kind: self.kind,
            estimated_bytes: self.estimated_bytes,
        }
    }
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("id", &self.id)
            .field("family", &self.family)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub family: ModelFamily,
    pub kind: HandleKind,
    pub estimated_bytes: u64,
}

/// Immutable set of descriptors, built once at start-up.
#[derive(Debug, Clone)]
pub struct Catalog {
    models: Vec<ModelDescriptor>,
}

impl Catalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// Every model the standard operations rely on, all backed by `loader`.
    pub fn standard(loader: Arc<dyn ModelLoader>) -> Self {
        let entry = |id: &str, name: &str, kind: HandleKind, gib: f64| {
            ModelDescriptor::new(id, name, kind, (gib * GIB as f64) as u64, loader.clone())
        };

        Self::new(vec![
            entry("learn2refocus", "Learn2Refocus", HandleKind::Pipeline, 6.0),
            entry("genfocus", "GenFocus", HandleKind::Pipeline, 6.5),
            entry("diffcamera", "DiffCamera", HandleKind::Pipeline, 8.0),
            entry("qwen-vl", "Qwen-VL Edit", HandleKind::Pipeline, 16.0),
            entry("midas", "MiDaS", HandleKind::Single, 1.3),
            entry("zoedepth", "ZoeDepth", HandleKind::Single, 1.4),
            entry("depth_anything", "Depth Anything V2", HandleKind::Single, 1.3),
            entry("sam2", "SAM 2", HandleKind::Single, 2.5),
            entry("grounded-sam", "Grounded-SAM", HandleKind::Pipeline, 3.5),
        ])
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == model_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlaceholderLoader;

    #[test]
    fn standard_catalog_resolves_families() {
        let catalog = Catalog::standard(Arc::new(PlaceholderLoader::default()));
        let family = |id| catalog.get(id).map(|m| m.family);

        assert_eq!(family("learn2refocus"), Some(ModelFamily::FocusEffects));
        assert_eq!(family("qwen-vl"), Some(ModelFamily::Edit));
        assert_eq!(family("zoedepth"), Some(ModelFamily::Depth));
        assert_eq!(family("grounded-sam"), Some(ModelFamily::Segment));
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn standard_catalog_ids_are_unique() {
        let catalog = Catalog::standard(Arc::new(PlaceholderLoader::default()));
        let mut ids: Vec<_> = catalog.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), catalog.len());
    }
}
