mod handlers;
mod params;
mod registry;
mod requests;

pub use handlers::ModelHandler;
pub use registry::{HandlerContext, OperationEntry, OperationHandler, OperationRegistry, Schema};
pub use requests::{
    BokehShape, DepthMapRequest, DepthModel, DirectorEditRequest, LensCharacterRequest, LensType,
    RackFocusRequest, RescueFocusRequest, SegmentRequest, TypedRequest,
};
