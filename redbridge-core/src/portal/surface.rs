//! The surface a stage executor drives. Stages never touch
//! chromiumoxide directly; they go through [`PortalSurface`], which
//! keeps them testable against an in-memory fake.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use serde::Deserialize;
use tokio::time::{sleep, Instant};
use tracing::trace;

use super::error::{PortalError, PortalResult};
use super::locators::Locator;

/// One currently rendered dropdown option. The index is a handle the
/// surface can click later; the full option set is only knowable after
/// the dropdown has been opened.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenderedOption {
    pub index: u32,
    pub text: String,
}

#[async_trait]
pub trait PortalSurface: Send + Sync {
    async fn goto(&self, url: &str) -> PortalResult<()>;
    async fn current_url(&self) -> PortalResult<Option<String>>;
    /// Bounded wait for a locator to appear. Expiry is fatal to the
    /// attempt; it most likely means the portal's structure changed.
    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> PortalResult<()>;
    async fn fill(&self, locator: &Locator, value: &str) -> PortalResult<()>;
    async fn click(&self, locator: &Locator) -> PortalResult<()>;
    /// Enumerates the options currently rendered under `locator`, up to
    /// `cap` of them, in document order.
    async fn rendered_options(
        &self,
        locator: &Locator,
        cap: usize,
    ) -> PortalResult<Vec<RenderedOption>>;
    async fn click_option(&self, option: &RenderedOption) -> PortalResult<()>;
    async fn screenshot(&self) -> PortalResult<Vec<u8>>;
    async fn settle(&self, duration: Duration);
}

/// Production surface backed by one chromiumoxide [`Page`].
#[derive(Debug, Clone)]
pub struct CdpSurface {
    page: Page,
    poll_interval: Duration,
}

const OPTION_TAG_ATTR: &str = "data-redbridge-option";

impl CdpSurface {
    pub fn new(page: Page, poll_interval: Duration) -> Self {
        Self {
            page,
            poll_interval,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

#[async_trait]
impl PortalSurface for CdpSurface {
    async fn goto(&self, url: &str) -> PortalResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(PortalError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn current_url(&self) -> PortalResult<Option<String>> {
        Ok(self.page.url().await?)
    }

    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> PortalResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self
                .page
                .find_element(locator.selector.as_str())
                .await
                .is_ok()
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PortalError::FieldNotFound(format!(
                    "{} ({}) after {}ms",
                    locator.name,
                    locator.selector,
                    timeout.as_millis()
                )));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn fill(&self, locator: &Locator, value: &str) -> PortalResult<()> {
        trace!(field = %locator.name, "filling portal field");
        let element = self.page.find_element(locator.selector.as_str()).await?;
        element.click().await?;
        element.type_str(value).await?;
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> PortalResult<()> {
        trace!(field = %locator.name, "clicking portal control");
        let element = self.page.find_element(locator.selector.as_str()).await?;
        element.click().await?;
        Ok(())
    }

    async fn rendered_options(
        &self,
        locator: &Locator,
        cap: usize,
    ) -> PortalResult<Vec<RenderedOption>> {
        // The portal renders option lists dynamically; nodes are tagged
        // with a synthetic attribute so a match can be clicked by index
        // afterwards. Stale tags from a previous dropdown are cleared
        // first.
        let script = format!(
            "(() => {{
        document.querySelectorAll('[{attr}]').forEach(node => node.removeAttribute('{attr}'));
        const nodes = document.querySelectorAll({selector});
        const results = [];
        let idx = 0;
        nodes.forEach(node => {{
            if (idx >= {cap}) return;
            const text = (node.innerText || node.textContent || '').trim();
            node.setAttribute('{attr}', String(idx));
            results.push({{ index: idx, text }});
            idx += 1;
        }});
        return results;
    }})()",
            attr = OPTION_TAG_ATTR,
            selector = serde_json::to_string(&locator.selector)
                .map_err(|err| PortalError::Configuration(err.to_string()))?,
            cap = cap,
        );
        let options: Vec<RenderedOption> = self
            .page
            .evaluate(script.as_str())
            .await?
            .into_value()
            .map_err(|err| {
                PortalError::Configuration(format!(
                    "failed to decode rendered options for {}: {err}",
                    locator.name
                ))
            })?;
        Ok(options)
    }

    async fn click_option(&self, option: &RenderedOption) -> PortalResult<()> {
        let selector = format!("[{OPTION_TAG_ATTR}='{}']", option.index);
        let element = self.page.find_element(selector.as_str()).await?;
        element.click().await?;
        Ok(())
    }

    async fn screenshot(&self) -> PortalResult<Vec<u8>> {
        let params = ScreenshotParams::builder().full_page(true).build();
        Ok(self.page.screenshot(params).await?)
    }

    async fn settle(&self, duration: Duration) {
        sleep(duration).await;
    }
}
