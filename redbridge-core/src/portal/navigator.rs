//! Moves an authenticated session to the listing-form entry point.
//! Single attempt; a failure here means the portal's navigation
//! structure changed, which a retry cannot fix.

use tokio::time::Instant;
use tracing::debug;

use crate::config::PortalSection;

use super::diagnostics::DiagnosticsRecorder;
use super::error::{PortalError, PortalResult};
use super::locators::{fields, LocatorMap};
use super::surface::PortalSurface;

pub struct Navigator<'a> {
    config: &'a PortalSection,
    locators: &'a LocatorMap,
    diagnostics: &'a DiagnosticsRecorder,
}

impl<'a> Navigator<'a> {
    pub fn new(
        config: &'a PortalSection,
        locators: &'a LocatorMap,
        diagnostics: &'a DiagnosticsRecorder,
    ) -> Self {
        Self {
            config,
            locators,
            diagnostics,
        }
    }

    pub async fn open_listing_form(
        &self,
        surface: &dyn PortalSurface,
        tag: &str,
    ) -> PortalResult<()> {
        let control = self.locators.field(fields::NEW_LISTING)?;
        surface.wait_for(&control, self.config.field_wait()).await?;

        let before = surface.current_url().await?.unwrap_or_default();
        surface.click(&control).await?;

        // Bounded wait for the portal to route to the creation form.
        let deadline = Instant::now() + self.config.field_wait();
        loop {
            surface.settle(self.config.poll_interval()).await;
            let after = surface.current_url().await?.unwrap_or_default();
            if !after.is_empty() && after != before {
                debug!(url = %after, "listing form reached");
                break;
            }
            if Instant::now() >= deadline {
                self.diagnostics
                    .capture(surface, &format!("{tag}-navigation-stuck"))
                    .await;
                return Err(PortalError::NavigationFailed(format!(
                    "url did not change after clicking the new-listing control (still {before})"
                )));
            }
        }

        self.diagnostics
            .capture(surface, &format!("{tag}-listing-form"))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::surface::testing::FakeSurface;

    fn fast_portal_section() -> PortalSection {
        let config: crate::config::RedbridgeConfig = toml::from_str(
            r#"
            [portal]
            base_url = "https://backoffice.example.com"
            username = "agent"
            password = "secret"
            field_wait_ms = 50
            poll_interval_ms = 1
            "#,
        )
        .unwrap();
        config.portal
    }

    #[tokio::test]
    async fn url_change_completes_navigation() {
        let config = fast_portal_section();
        let locators = LocatorMap::default();
        let diagnostics = DiagnosticsRecorder::disabled();
        let navigator = Navigator::new(&config, &locators, &diagnostics);
        let surface = FakeSurface::new().with_urls(&[
            "https://backoffice.example.com/dashboard",
            "https://backoffice.example.com/properties/new",
        ]);
        navigator.open_listing_form(&surface, "corr").await.unwrap();
        assert!(surface
            .entries()
            .contains(&"click:nav.new_listing".to_string()));
    }

    #[tokio::test]
    async fn stuck_url_is_navigation_failure() {
        let config = fast_portal_section();
        let locators = LocatorMap::default();
        let diagnostics = DiagnosticsRecorder::disabled();
        let navigator = Navigator::new(&config, &locators, &diagnostics);
        let surface =
            FakeSurface::new().with_urls(&["https://backoffice.example.com/dashboard"]);
        let result = navigator.open_listing_form(&surface, "corr").await;
        assert!(matches!(result, Err(PortalError::NavigationFailed(_))));
    }

    #[tokio::test]
    async fn missing_control_is_field_not_found() {
        let config = fast_portal_section();
        let locators = LocatorMap::default();
        let diagnostics = DiagnosticsRecorder::disabled();
        let navigator = Navigator::new(&config, &locators, &diagnostics);
        let surface = FakeSurface::new().failing_on("nav.new_listing");
        let result = navigator.open_listing_form(&surface, "corr").await;
        assert!(matches!(result, Err(PortalError::FieldNotFound(_))));
    }
}
