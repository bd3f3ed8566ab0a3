//! Browser launch and portal authentication.
//!
//! One isolated browser process per submission attempt, never pooled or
//! reused. The portal emits no explicit login-failure signal, so the
//! post-submit URL is the only evidence; classification is deliberately
//! conservative because a silent false "success" would be worse than a
//! false failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ChromiumSection, PortalSection};

use super::diagnostics::DiagnosticsRecorder;
use super::error::{PortalError, PortalResult};
use super::locators::{fields, LocatorMap};
use super::surface::{CdpSurface, PortalSurface};

/// Seam between the orchestration logic and the concrete browser
/// stack. The pipeline only ever sees handles produced here, so its
/// gating, timeout, and retry behavior can be exercised against an
/// in-memory session.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> PortalResult<Box<dyn SessionHandle>>;
}

#[async_trait]
pub trait SessionHandle: Send {
    fn surface(&self) -> Arc<dyn PortalSurface>;
    async fn shutdown(self: Box<Self>) -> PortalResult<()>;
}

#[derive(Debug, Clone)]
pub struct PortalLauncher {
    chromium: ChromiumSection,
    poll_interval: Duration,
}

impl PortalLauncher {
    pub fn new(chromium: ChromiumSection, poll_interval: Duration) -> Self {
        Self {
            chromium,
            poll_interval,
        }
    }

    pub async fn launch(&self) -> PortalResult<PortalSession> {
        let config = self.build_chromium_config()?;
        info!(headless = self.chromium.headless, "launching Chromium instance");
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| PortalError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let params = CreateTargetParams::new("about:blank");
        let page = browser.new_page(params).await?;

        Ok(PortalSession {
            browser,
            handler_task: Some(handler_task),
            page,
            poll_interval: self.poll_interval,
        })
    }

    fn build_chromium_config(&self) -> PortalResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder();
        if let Some(path) = &self.chromium.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !self.chromium.headless {
            builder = builder.with_head();
        }
        if !self.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
        ];
        if self.chromium.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        builder = builder.args(args);

        builder.build().map_err(PortalError::Configuration)
    }
}

#[async_trait]
impl SessionFactory for PortalLauncher {
    async fn open(&self) -> PortalResult<Box<dyn SessionHandle>> {
        Ok(Box::new(self.launch().await?))
    }
}

/// Live handle over one authenticated-or-authenticating browser
/// context. Exactly one owner at any time; moved linearly through the
/// pipeline and released (or explicitly held open) at the end of one
/// submission attempt.
#[derive(Debug)]
pub struct PortalSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    page: Page,
    poll_interval: Duration,
}

impl PortalSession {
    pub async fn shutdown(mut self) -> PortalResult<()> {
        info!("shutting down portal browser session");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            handle.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for PortalSession {
    fn surface(&self) -> Arc<dyn PortalSurface> {
        Arc::new(CdpSurface::new(self.page.clone(), self.poll_interval))
    }

    async fn shutdown(self: Box<Self>) -> PortalResult<()> {
        (*self).shutdown().await
    }
}

impl Drop for PortalSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handler_task.take() {
            if !handle.is_finished() {
                warn!("portal session dropped without explicit shutdown");
            }
            handle.abort();
        }
    }
}

/// Classifies the URL transition the login submit produced.
///
/// Unchanged URL or still on the login path means the credentials were
/// rejected; an unreadable URL leaves the outcome genuinely unknown.
pub fn classify_login_transition(
    before: &str,
    after: Option<&str>,
    login_path: &str,
) -> PortalResult<()> {
    let after = match after {
        Some(url) if !url.trim().is_empty() => url,
        _ => {
            return Err(PortalError::AmbiguousLogin(
                "portal did not report a post-login url".to_string(),
            ))
        }
    };
    if after == before || after.contains(login_path) {
        return Err(PortalError::CredentialRejected);
    }
    Ok(())
}

pub struct SessionController<'a> {
    config: &'a PortalSection,
    locators: &'a LocatorMap,
    diagnostics: &'a DiagnosticsRecorder,
}

impl<'a> SessionController<'a> {
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

    /// Fails fast with a typed error when any of the three required
    /// settings is absent.
    pub fn require_configuration(config: &PortalSection) -> PortalResult<()> {
        if config.base_url.trim().is_empty() {
            return Err(PortalError::MissingConfiguration("portal.base_url"));
        }
        if config.username.trim().is_empty() {
            return Err(PortalError::MissingConfiguration("portal.username"));
        }
        if config.password.trim().is_empty() {
            return Err(PortalError::MissingConfiguration("portal.password"));
        }
        Ok(())
    }

    pub async fn login(&self, surface: &dyn PortalSurface, tag: &str) -> PortalResult<()> {
        Self::require_configuration(self.config)?;

        let login_url = url::Url::parse(&self.config.base_url)
            .and_then(|base| base.join(&self.config.login_path))
            .map_err(|err| {
                PortalError::Configuration(format!(
                    "invalid portal url '{}': {err}",
                    self.config.base_url
                ))
            })?
            .to_string();
        surface.goto(&login_url).await?;

        let wait = self.config.field_wait();
        for name in [fields::USERNAME, fields::PASSWORD, fields::LOGIN_SUBMIT] {
            let locator = self.locators.field(name)?;
            if let Err(err) = surface.wait_for(&locator, wait).await {
                self.diagnostics
                    .capture(surface, &format!("{tag}-login-field-missing"))
                    .await;
                return Err(err);
            }
        }

        surface
            .fill(&self.locators.field(fields::USERNAME)?, &self.config.username)
            .await?;
        surface
            .fill(&self.locators.field(fields::PASSWORD)?, &self.config.password)
            .await?;

        self.diagnostics
            .capture(surface, &format!("{tag}-login-pre-submit"))
            .await;

        let before = surface
            .current_url()
            .await?
            .unwrap_or_else(|| login_url.clone());
        surface
            .click(&self.locators.field(fields::LOGIN_SUBMIT)?)
            .await?;
        surface.settle(self.config.login_settle()).await;

        self.diagnostics
            .capture(surface, &format!("{tag}-login-post-submit"))
            .await;

        let after = surface.current_url().await?;
        classify_login_transition(&before, after.as_deref(), &self.config.login_path)
    }
}
