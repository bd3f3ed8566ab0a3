//! Submission pipeline: session -> navigation -> the five wizard
//! stages, in fixed order, halting at the first fatal failure.
//!
//! The portal's authenticated session is the one genuinely shared
//! external resource. All submissions funnel through a single-flight
//! gate so the portal only ever observes one logged-in actor for the
//! shared credential pair, no matter how many requests arrive
//! concurrently.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as SyncMutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RedbridgeConfig;
use crate::listing::NormalizedListing;
use crate::portal::{
    form_stages, DiagnosticsRecorder, ErrorClass, LocatorMap, Navigator, PortalError,
    PortalLauncher, SessionController, SessionFactory, SessionHandle, StageContext, StageId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Completed,
    LoginFailed,
    NavigationFailed,
    FormFillFailed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::LoginFailed => "login_failed",
            SubmissionStatus::NavigationFailed => "navigation_failed",
            SubmissionStatus::FormFillFailed => "form_fill_failed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SubmissionStatus::Completed)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one stage boundary. Stage N's result only exists once
/// stage N-1 succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: StageId,
    pub succeeded: bool,
    pub message: String,
    pub screenshot: Option<PathBuf>,
}

/// Final structured result. `completed` reflects the pipeline's own
/// stage history only; the portal gives no acknowledgment to verify
/// against, so the correlation id is synthesized locally.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    pub correlation_id: Uuid,
    pub stages: Vec<StageResult>,
}

/// Seam the HTTP layer depends on, so handlers can be exercised without
/// a browser.
#[async_trait]
pub trait ListingSubmitter: Send + Sync {
    async fn submit(&self, listing: NormalizedListing) -> SubmissionOutcome;
}

fn failure_status(stage: StageId) -> SubmissionStatus {
    match stage {
        StageId::Login => SubmissionStatus::LoginFailed,
        StageId::Navigate => SubmissionStatus::NavigationFailed,
        _ => SubmissionStatus::FormFillFailed,
    }
}

/// Status for an attempt cut short by the whole-pipeline timeout: the
/// furthest recorded stage tells how far we got.
fn timeout_status(stages: &[StageResult]) -> SubmissionStatus {
    match stages.last() {
        None => SubmissionStatus::LoginFailed,
        Some(last) if last.stage == StageId::Login && last.succeeded => {
            SubmissionStatus::NavigationFailed
        }
        _ => SubmissionStatus::FormFillFailed,
    }
}

fn push_result(
    history: &SyncMutex<Vec<StageResult>>,
    stage: StageId,
    succeeded: bool,
    message: String,
    screenshot: Option<PathBuf>,
) {
    history.lock().unwrap().push(StageResult {
        stage,
        succeeded,
        message,
        screenshot,
    });
}

/// Runs the five wizard stages strictly sequentially, recording a
/// boundary screenshot and a [`StageResult`] per stage, and stopping at
/// the first failure.
pub async fn run_form_stages(
    ctx: &StageContext<'_>,
    diagnostics: &DiagnosticsRecorder,
    listing: &NormalizedListing,
    tag: &str,
    history: &SyncMutex<Vec<StageResult>>,
) -> Option<PortalError> {
    for stage in form_stages() {
        let id = stage.id();
        match stage.run(ctx, listing).await {
            Ok(()) => {
                let screenshot = diagnostics
                    .capture(ctx.surface, &format!("{tag}-{id}"))
                    .await;
                push_result(history, id, true, format!("{id} completed"), screenshot);
            }
            Err(err) => {
                warn!(stage = %id, error = %err, "stage failed");
                let screenshot = diagnostics
                    .capture(ctx.surface, &format!("{tag}-{id}-failed"))
                    .await;
                push_result(history, id, false, err.to_string(), screenshot);
                return Some(err);
            }
        }
    }
    None
}

/// Slot holding the one live session of the current attempt. It lives
/// outside the attempt future so the deadline branch can still reach
/// the session after cancellation.
type SessionSlot = SyncMutex<Option<Box<dyn SessionHandle>>>;

pub struct SubmissionPipeline {
    config: Arc<RedbridgeConfig>,
    locators: LocatorMap,
    diagnostics: DiagnosticsRecorder,
    factory: Arc<dyn SessionFactory>,
    /// Single-flight gate keyed to the shared credential pair.
    gate: Mutex<()>,
    /// Sessions deliberately kept alive by the opt-in inspection mode.
    held: Mutex<Vec<Box<dyn SessionHandle>>>,
}

impl SubmissionPipeline {
    pub fn new(config: Arc<RedbridgeConfig>) -> Self {
        let launcher =
            PortalLauncher::new(config.chromium.clone(), config.portal.poll_interval());
        Self::with_factory(config, Arc::new(launcher))
    }

    pub fn with_factory(config: Arc<RedbridgeConfig>, factory: Arc<dyn SessionFactory>) -> Self {
        let locators = LocatorMap::from_section(&config.selectors);
        let diagnostics = DiagnosticsRecorder::new(&config.diagnostics);
        Self {
            config,
            locators,
            diagnostics,
            factory,
            gate: Mutex::new(()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub async fn submit_listing(&self, listing: NormalizedListing) -> SubmissionOutcome {
        let _guard = self.gate.lock().await;
        let correlation = Uuid::new_v4();
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let tag = format!("{correlation}-a{attempt}");
            info!(%correlation, attempt, "starting submission attempt");

            let history = SyncMutex::new(Vec::new());
            let parked: SessionSlot = SyncMutex::new(None);
            let attempt_result = timeout(
                self.config.portal.pipeline_timeout(),
                self.run_attempt(&listing, &tag, &history, &parked),
            )
            .await;

            let (status, class) = match attempt_result {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(%correlation, attempt, "submission attempt hit the pipeline timeout");
                    let abandoned = parked.lock().unwrap().take();
                    if let Some(session) = abandoned {
                        warn!(%correlation, attempt, "closing the session abandoned at the deadline");
                        if let Err(err) = session.shutdown().await {
                            warn!(error = %err, "session shutdown failed");
                        }
                    }
                    let status = timeout_status(&history.lock().unwrap());
                    (status, Some(ErrorClass::Transient))
                }
            };
            let stages = history.into_inner().unwrap();

            let retriable =
                class == Some(ErrorClass::Transient) && attempt < max_attempts;
            if status.is_completed() || !retriable {
                info!(%correlation, %status, attempt, "submission finished");
                return SubmissionOutcome {
                    status,
                    correlation_id: correlation,
                    stages,
                };
            }

            let delay = self.retry_delay();
            info!(%correlation, attempt, delay_ms = delay.as_millis() as u64, "retrying timeout-class failure");
            sleep(delay).await;
        }
    }

    fn retry_delay(&self) -> Duration {
        let base = Duration::from_secs(self.config.retry.delay_seconds);
        let jitter_bound = self.config.retry.jitter_seconds;
        if jitter_bound == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_bound);
        base + Duration::from_secs(jitter)
    }

    async fn run_attempt(
        &self,
        listing: &NormalizedListing,
        tag: &str,
        history: &SyncMutex<Vec<StageResult>>,
        parked: &SessionSlot,
    ) -> (SubmissionStatus, Option<ErrorClass>) {
        if let Err(err) = SessionController::require_configuration(&self.config.portal) {
            let class = err.class();
            push_result(history, StageId::Login, false, err.to_string(), None);
            return (failure_status(StageId::Login), Some(class));
        }

        let session = match self.factory.open().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "browser launch failed");
                let class = err.class();
                push_result(
                    history,
                    StageId::Login,
                    false,
                    format!("browser launch failed: {err}"),
                    None,
                );
                return (failure_status(StageId::Login), Some(class));
            }
        };
        let surface = session.surface();
        *parked.lock().unwrap() = Some(session);

        let controller =
            SessionController::new(&self.config.portal, &self.locators, &self.diagnostics);
        if let Err(err) = controller.login(surface.as_ref(), tag).await {
            let class = err.class();
            let screenshot = self
                .diagnostics
                .capture(surface.as_ref(), &format!("{tag}-login-failed"))
                .await;
            push_result(history, StageId::Login, false, err.to_string(), screenshot);
            self.release(parked).await;
            return (failure_status(StageId::Login), Some(class));
        }
        let screenshot = self
            .diagnostics
            .capture(surface.as_ref(), &format!("{tag}-login"))
            .await;
        push_result(
            history,
            StageId::Login,
            true,
            "login completed".to_string(),
            screenshot,
        );

        let navigator = Navigator::new(&self.config.portal, &self.locators, &self.diagnostics);
        if let Err(err) = navigator.open_listing_form(surface.as_ref(), tag).await {
            let class = err.class();
            push_result(history, StageId::Navigate, false, err.to_string(), None);
            self.release(parked).await;
            return (failure_status(StageId::Navigate), Some(class));
        }
        push_result(
            history,
            StageId::Navigate,
            true,
            "navigate completed".to_string(),
            None,
        );

        let ctx = StageContext::new(surface.as_ref(), &self.locators, &self.config.portal);
        match run_form_stages(&ctx, &self.diagnostics, listing, tag, history).await {
            Some(err) => {
                let class = err.class();
                self.release(parked).await;
                let failed_stage = history
                    .lock()
                    .unwrap()
                    .last()
                    .map(|result| result.stage)
                    .unwrap_or(StageId::Operation);
                (failure_status(failed_stage), Some(class))
            }
            None => {
                if self.config.portal.hold_open_for_inspection {
                    // No programmatic confirmation exists; the open
                    // browser is the only visual evidence of the
                    // portal's final state.
                    let session = parked.lock().unwrap().take();
                    if let Some(session) = session {
                        info!("holding browser session open for inspection");
                        self.held.lock().await.push(session);
                    }
                } else {
                    self.release(parked).await;
                }
                (SubmissionStatus::Completed, None)
            }
        }
    }

    async fn release(&self, parked: &SessionSlot) {
        let session = parked.lock().unwrap().take();
        if let Some(session) = session {
            if let Err(err) = session.shutdown().await {
                warn!(error = %err, "session shutdown failed");
            }
        }
    }
}

#[async_trait]
impl ListingSubmitter for SubmissionPipeline {
    async fn submit(&self, listing: NormalizedListing) -> SubmissionOutcome {
        self.submit_listing(listing).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::PortalSection;
    use crate::portal::testing::FakeSurface;
    use crate::portal::{Locator, PortalResult, PortalSurface, RenderedOption};

    fn portal_section() -> PortalSection {
        let config: RedbridgeConfig = toml::from_str(
            r#"
            [portal]
            base_url = "https://backoffice.example.com"
            username = "agent"
            password = "secret"
            field_wait_ms = 50
            poll_interval_ms = 1
            settle_ms = 0
            "#,
        )
        .unwrap();
        config.portal
    }

    fn listing() -> NormalizedListing {
        let submission: crate::listing::ListingSubmission =
            serde_json::from_value(serde_json::json!({
                "operation_type": "sale",
                "property_type": "apartment",
                "title": "Departamento 3 ambientes",
                "description": "Luminoso, al frente.",
                "address": "Av. Santa Fe 1234, Palermo",
                "latitude": -34.59,
                "longitude": -58.39,
                "street": "Av. Santa Fe",
                "street_number": "1234",
                "locality": "Palermo",
                "province": "Buenos Aires",
                "postal_code": "C1425",
                "country": "Argentina",
                "covered_surface": 72.5,
                "price": 145000.0,
                "price_currency": "USD"
            }))
            .unwrap();
        submission.normalize()
    }

    fn full_surface() -> FakeSurface {
        FakeSurface::new()
            .with_options(
                "property_type.options",
                &["Casa", "Departamento Estándar", "PH"],
            )
            .with_options("location.country.options", &["Argentina"])
            .with_options(
                "location.province.options",
                &["CABA", "Buenos Aires", "Córdoba"],
            )
            .with_options("location.locality.options", &["Palermo", "Recoleta"])
    }

    #[tokio::test]
    async fn stages_run_in_fixed_order_and_all_complete() {
        let config = portal_section();
        let locators = LocatorMap::default();
        let diagnostics = DiagnosticsRecorder::disabled();
        let surface = full_surface();
        let ctx = StageContext::new(&surface, &locators, &config);
        let history = SyncMutex::new(Vec::new());

        let failure =
            run_form_stages(&ctx, &diagnostics, &listing(), "corr", &history).await;
        assert!(failure.is_none());

        let recorded: Vec<StageId> = history
            .into_inner()
            .unwrap()
            .iter()
            .map(|result| result.stage)
            .collect();
        assert_eq!(
            recorded,
            vec![
                StageId::Operation,
                StageId::PropertyType,
                StageId::Price,
                StageId::Location,
                StageId::Description,
            ]
        );
    }

    #[tokio::test]
    async fn nothing_runs_after_a_failed_predecessor() {
        let config = portal_section();
        let locators = LocatorMap::default();
        let diagnostics = DiagnosticsRecorder::disabled();
        // property type options miss the target; later stages must
        // never be touched
        let surface = FakeSurface::new()
            .with_options("property_type.options", &["Casa", "PH"])
            .with_options("location.country.options", &["Argentina"]);
        let ctx = StageContext::new(&surface, &locators, &config);
        let history = SyncMutex::new(Vec::new());

        let failure =
            run_form_stages(&ctx, &diagnostics, &listing(), "corr", &history).await;
        assert!(matches!(
            failure,
            Some(PortalError::OptionNotFound { ref field, .. }) if field == "property_type"
        ));

        let recorded = history.into_inner().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].stage, StageId::Operation);
        assert!(recorded[0].succeeded);
        assert_eq!(recorded[1].stage, StageId::PropertyType);
        assert!(!recorded[1].succeeded);

        assert!(surface
            .entries()
            .iter()
            .all(|entry| !entry.starts_with("fill:price")));
    }

    #[test]
    fn failure_status_maps_stage_to_outcome() {
        assert_eq!(failure_status(StageId::Login), SubmissionStatus::LoginFailed);
        assert_eq!(
            failure_status(StageId::Navigate),
            SubmissionStatus::NavigationFailed
        );
        assert_eq!(
            failure_status(StageId::PropertyType),
            SubmissionStatus::FormFillFailed
        );
        assert_eq!(
            failure_status(StageId::Description),
            SubmissionStatus::FormFillFailed
        );
    }

    #[test]
    fn timeout_status_reflects_progress() {
        assert_eq!(timeout_status(&[]), SubmissionStatus::LoginFailed);
        let login_ok = StageResult {
            stage: StageId::Login,
            succeeded: true,
            message: "login completed".to_string(),
            screenshot: None,
        };
        assert_eq!(
            timeout_status(&[login_ok.clone()]),
            SubmissionStatus::NavigationFailed
        );
        let navigate_ok = StageResult {
            stage: StageId::Navigate,
            succeeded: true,
            message: "navigate completed".to_string(),
            screenshot: None,
        };
        assert_eq!(
            timeout_status(&[login_ok, navigate_ok]),
            SubmissionStatus::FormFillFailed
        );
    }

    #[test]
    fn status_serializes_in_wire_vocabulary() {
        let json = serde_json::to_value(SubmissionStatus::FormFillFailed).unwrap();
        assert_eq!(json, serde_json::json!("form_fill_failed"));
    }

    fn pipeline_config(max_attempts: usize, timeout_secs: u64) -> Arc<RedbridgeConfig> {
        Arc::new(
            toml::from_str(&format!(
                r#"
                [portal]
                base_url = "https://backoffice.example.com"
                username = "agent"
                password = "secret"
                field_wait_ms = 50
                poll_interval_ms = 1
                settle_ms = 0
                login_settle_ms = 0
                pipeline_timeout_seconds = {timeout_secs}

                [diagnostics]
                enabled = false

                [retry]
                max_attempts = {max_attempts}
                delay_seconds = 0
                jitter_seconds = 0
                "#
            ))
            .unwrap(),
        )
    }

    struct FailingFactory {
        opens: AtomicUsize,
        transient: bool,
    }

    impl FailingFactory {
        fn new(transient: bool) -> Self {
            Self {
                opens: AtomicUsize::new(0),
                transient,
            }
        }
    }

    #[async_trait]
    impl SessionFactory for FailingFactory {
        async fn open(&self) -> PortalResult<Box<dyn SessionHandle>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.transient {
                Err(PortalError::Timeout("chromium launch".to_string()))
            } else {
                Err(PortalError::FieldNotFound("login.username".to_string()))
            }
        }
    }

    struct FakeHandle {
        surface: Arc<dyn PortalSurface>,
        in_flight: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionHandle for FakeHandle {
        fn surface(&self) -> Arc<dyn PortalSurface> {
            self.surface.clone()
        }

        async fn shutdown(self: Box<Self>) -> PortalResult<()> {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Hands out sessions whose surfaces drive a full happy-path run,
    /// while tracking how many are alive at once.
    struct FakeFactory {
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                shutdowns: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn open(&self) -> PortalResult<Box<dyn SessionHandle>> {
            let live = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(live, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let surface = full_surface().with_urls(&[
                "https://backoffice.example.com/login",
                "https://backoffice.example.com/dashboard",
                "https://backoffice.example.com/dashboard",
                "https://backoffice.example.com/properties/new",
            ]);
            Ok(Box::new(FakeHandle {
                surface: Arc::new(surface),
                in_flight: self.in_flight.clone(),
                shutdowns: self.shutdowns.clone(),
            }))
        }
    }

    /// Surface that never finishes navigating; everything else answers
    /// immediately.
    struct HangingSurface;

    #[async_trait]
    impl PortalSurface for HangingSurface {
        async fn goto(&self, _url: &str) -> PortalResult<()> {
            futures::future::pending().await
        }

        async fn current_url(&self) -> PortalResult<Option<String>> {
            Ok(None)
        }

        async fn wait_for(&self, _locator: &Locator, _timeout: Duration) -> PortalResult<()> {
            Ok(())
        }

        async fn fill(&self, _locator: &Locator, _value: &str) -> PortalResult<()> {
            Ok(())
        }

        async fn click(&self, _locator: &Locator) -> PortalResult<()> {
            Ok(())
        }

        async fn rendered_options(
            &self,
            _locator: &Locator,
            _cap: usize,
        ) -> PortalResult<Vec<RenderedOption>> {
            Ok(Vec::new())
        }

        async fn click_option(&self, _option: &RenderedOption) -> PortalResult<()> {
            Ok(())
        }

        async fn screenshot(&self) -> PortalResult<Vec<u8>> {
            Err(PortalError::Configuration("screenshot unavailable".into()))
        }

        async fn settle(&self, _duration: Duration) {}
    }

    struct HangingFactory {
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionFactory for HangingFactory {
        async fn open(&self) -> PortalResult<Box<dyn SessionHandle>> {
            Ok(Box::new(FakeHandle {
                surface: Arc::new(HangingSurface),
                in_flight: Arc::new(AtomicUsize::new(1)),
                shutdowns: self.shutdowns.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn transient_launch_failures_retry_up_to_max_attempts() {
        let factory = Arc::new(FailingFactory::new(true));
        let pipeline = SubmissionPipeline::with_factory(pipeline_config(3, 180), factory.clone());
        let outcome = pipeline.submit_listing(listing()).await;
        assert_eq!(outcome.status, SubmissionStatus::LoginFailed);
        assert_eq!(factory.opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn structural_failures_never_retry() {
        let factory = Arc::new(FailingFactory::new(false));
        let pipeline = SubmissionPipeline::with_factory(pipeline_config(3, 180), factory.clone());
        let outcome = pipeline.submit_listing(listing()).await;
        assert_eq!(outcome.status, SubmissionStatus::LoginFailed);
        assert_eq!(factory.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_submissions_serialize_through_the_gate() {
        let factory = Arc::new(FakeFactory::new());
        let max_in_flight = factory.max_in_flight.clone();
        let shutdowns = factory.shutdowns.clone();
        let pipeline = Arc::new(SubmissionPipeline::with_factory(
            pipeline_config(1, 180),
            factory,
        ));

        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.submit_listing(listing()).await }
        });
        let second = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.submit_listing(listing()).await }
        });
        let (first, second) = (first.await.unwrap(), second.await.unwrap());

        assert!(first.status.is_completed());
        assert!(second.status.is_completed());
        assert_ne!(first.correlation_id, second.correlation_id);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_shuts_down_the_live_session() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(HangingFactory {
            shutdowns: shutdowns.clone(),
        });
        let pipeline = SubmissionPipeline::with_factory(pipeline_config(1, 1), factory);
        let outcome = pipeline.submit_listing(listing()).await;
        assert_eq!(outcome.status, SubmissionStatus::LoginFailed);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
