pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod model;
pub mod ops;
pub mod server;
pub mod storage;
pub mod worker;

pub use config::AppConfig;
pub use dispatcher::{Dispatcher, Job};
pub use envelope::{Envelope, Output, ProcessingResult};
pub use error::{ErrorKind, ServiceError, ValidationError};
pub use model::{MemoryStats, ModelFamily, ResidencyManager};
pub use server::build_router;
