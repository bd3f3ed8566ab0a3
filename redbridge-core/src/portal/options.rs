//! Shared dropdown-option matching primitive.
//!
//! One deliberately narrow policy: exact, case-insensitive equality on
//! trimmed text, first occurrence wins. Partial matching is off the
//! table because silently selecting the wrong geographic entity is
//! strictly worse than an explicit failure.

use tracing::debug;

use super::error::PortalResult;
use super::locators::Locator;
use super::surface::{PortalSurface, RenderedOption};

/// Pure matching core: index of the first rendered option whose trimmed
/// text equals `target` case-insensitively, or `None`.
pub fn match_option(options: &[RenderedOption], target: &str) -> Option<usize> {
    let wanted = target.trim().to_lowercase();
    options
        .iter()
        .position(|option| option.text.trim().to_lowercase() == wanted)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OptionResolver;

impl OptionResolver {
    /// Scans the options currently rendered under `options_locator`
    /// (bounded by `cap`) and clicks the first exact match. Returns
    /// whether a match was clicked; the caller decides whether a miss
    /// is fatal.
    pub async fn resolve(
        &self,
        surface: &dyn PortalSurface,
        options_locator: &Locator,
        target: &str,
        cap: usize,
    ) -> PortalResult<bool> {
        let rendered = surface.rendered_options(options_locator, cap).await?;
        debug!(
            field = %options_locator.name,
            rendered = rendered.len(),
            target,
            "resolving dropdown option"
        );
        match match_option(&rendered, target) {
            Some(index) => {
                surface.click_option(&rendered[index]).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
