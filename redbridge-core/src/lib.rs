pub mod config;
pub mod error;
pub mod listing;
pub mod pipeline;
pub mod portal;

pub use config::{load_config, RedbridgeConfig};
pub use error::{ConfigError, Result};
pub use listing::{ListingSubmission, NormalizedListing};
pub use pipeline::{
    ListingSubmitter, StageResult, SubmissionOutcome, SubmissionPipeline, SubmissionStatus,
};
pub use portal::{
    DiagnosticsRecorder, ErrorClass, Locator, LocatorMap, Navigator, OptionResolver, PortalError,
    PortalLauncher, PortalResult, PortalSession, PortalSurface, RenderedOption, SessionController,
    SessionFactory, SessionHandle, StageId,
};
