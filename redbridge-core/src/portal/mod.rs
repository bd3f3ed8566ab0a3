mod diagnostics;
mod error;
mod locators;
mod navigator;
mod options;
mod session;
mod stages;
mod surface;

pub use diagnostics::DiagnosticsRecorder;
pub use error::{ErrorClass, PortalError, PortalResult};
pub use locators::{fields, Locator, LocatorMap};
pub use navigator::Navigator;
pub use options::{match_option, OptionResolver};
pub use session::{
    classify_login_transition, PortalLauncher, PortalSession, SessionController, SessionFactory,
    SessionHandle,
};
pub use stages::{form_stages, FormStage, StageContext, StageId};
pub use surface::{CdpSurface, PortalSurface, RenderedOption};

#[cfg(test)]
pub(crate) use surface::testing;
