use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    envelope::ProcessingResult,
    error::{ServiceError, ValidationError},
    model::ResidencyManager,
    ops::requests::{
        DepthMapRequest, DirectorEditRequest, LensCharacterRequest, RackFocusRequest,
        RescueFocusRequest, SegmentRequest, TypedRequest,
    },
    storage::ArtifactStore,
};

/// Collaborators a handler may use while serving one request.
#[derive(Clone)]
pub struct HandlerContext {
    pub residency: Arc<ResidencyManager>,
    pub store: Arc<ArtifactStore>,
}

/// Executes a validated request. Handlers only express their success path;
/// failures are mapped to envelopes by the dispatcher.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(
        &self,
        request: TypedRequest,
        ctx: &HandlerContext,
    ) -> Result<ProcessingResult, ServiceError>;
}

/// Validates raw params and builds the typed request.
pub type Schema = fn(&Map<String, Value>) -> Result<TypedRequest, ValidationError>;

#[derive(Clone)]
pub struct OperationEntry {
    pub name: &'static str,
    pub http_path: Option<&'static str>,
    pub summary: &'static str,
    pub schema: Schema,
    pub handler: Arc<dyn OperationHandler>,
}

impl fmt::Debug for OperationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationEntry")
            .field("name", &self.name)
            .field("http_path", &self.http_path)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    entries: Vec<OperationEntry>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The media operations, all served by `handler`.
    pub fn standard(handler: Arc<dyn OperationHandler>) -> Self {
        let entry = |name, http_path, summary, schema: Schema| OperationEntry {
            name,
            http_path: Some(http_path),
            summary,
            schema,
            handler: handler.clone(),
        };

        Self::new()
            .register(entry(
                "rack_focus",
                "/optics/rack-focus",
                "Simulate a cinematic rack focus pull as video",
                |raw| RackFocusRequest::from_params(raw).map(TypedRequest::RackFocus),
            ))
            .register(entry(
                "lens_character",
                "/optics/lens-character",
                "Apply lens character: bokeh, aberration, flare, vignette",
                |raw| LensCharacterRequest::from_params(raw).map(TypedRequest::LensCharacter),
            ))
            .register(entry(
                "rescue_focus",
                "/optics/rescue-focus",
                "Sharpen slightly out-of-focus images",
                |raw| RescueFocusRequest::from_params(raw).map(TypedRequest::RescueFocus),
            ))
            .register(entry(
                "director_edit",
                "/director/edit",
                "Edit an image from a natural-language instruction",
                |raw| DirectorEditRequest::from_params(raw).map(TypedRequest::DirectorEdit),
            ))
            .register(entry(
                "depth_map",
                "/utils/depth-map",
                "Estimate a depth map",
                |raw| DepthMapRequest::from_params(raw).map(TypedRequest::DepthMap),
            ))
            .register(entry(
                "segment",
                "/utils/segment",
                "Segment an image, text-guided when a prompt is given",
                |raw| SegmentRequest::from_params(raw).map(TypedRequest::Segment),
            ))
    }

    /// Adds `entry`, replacing any entry with the same name in place.
    pub fn register(mut self, entry: OperationEntry) -> Self {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&OperationEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationEntry> {
        self.entries.iter()
    }
}
