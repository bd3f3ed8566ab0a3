//! Stage executors for the listing-creation wizard.
//!
//! Stages run strictly sequentially over the one live session; each
//! either completes or intentionally skips an optional sub-field before
//! the next stage begins. Order matters most in the location stage:
//! selecting a country invalidates the rendered province options, and a
//! province selection invalidates the localities, so the three cascade
//! strictly country -> province -> locality with a settle delay between
//! each.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PortalSection;
use crate::listing::{format_amount, NormalizedListing};

use super::error::{PortalError, PortalResult};
use super::locators::{fields, Locator, LocatorMap};
use super::options::{match_option, OptionResolver};
use super::surface::PortalSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Login,
    Navigate,
    Operation,
    PropertyType,
    Price,
    Location,
    Description,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Login => "login",
            StageId::Navigate => "navigate",
            StageId::Operation => "operation",
            StageId::PropertyType => "property_type",
            StageId::Price => "price",
            StageId::Location => "location",
            StageId::Description => "description",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct StageContext<'a> {
    pub surface: &'a dyn PortalSurface,
    pub locators: &'a LocatorMap,
    pub config: &'a PortalSection,
}

impl<'a> StageContext<'a> {
    pub fn new(
        surface: &'a dyn PortalSurface,
        locators: &'a LocatorMap,
        config: &'a PortalSection,
    ) -> Self {
        Self {
            surface,
            locators,
            config,
        }
    }

    async fn fill_field(&self, name: &str, value: &str) -> PortalResult<()> {
        let locator = self.locators.field(name)?;
        self.surface
            .wait_for(&locator, self.config.field_wait())
            .await?;
        self.surface.fill(&locator, value).await
    }

    async fn click_control(&self, locator: &Locator) -> PortalResult<()> {
        self.surface
            .wait_for(locator, self.config.field_wait())
            .await?;
        self.surface.click(locator).await
    }
}

#[async_trait]
pub trait FormStage: Send + Sync {
    fn id(&self) -> StageId;
    async fn run(&self, ctx: &StageContext<'_>, listing: &NormalizedListing) -> PortalResult<()>;
}

/// The five wizard stages in their fixed execution order.
pub fn form_stages() -> Vec<Box<dyn FormStage>> {
    vec![
        Box::new(OperationStage),
        Box::new(PropertyTypeStage),
        Box::new(PriceStage),
        Box::new(LocationStage),
        Box::new(DescriptionStage),
    ]
}

/// Selects among the fixed enumeration of operation-type controls.
pub struct OperationStage;

#[async_trait]
impl FormStage for OperationStage {
    fn id(&self) -> StageId {
        StageId::Operation
    }

    async fn run(&self, ctx: &StageContext<'_>, listing: &NormalizedListing) -> PortalResult<()> {
        let locator = ctx.locators.operation(&listing.operation).ok_or_else(|| {
            PortalError::FieldNotFound(format!(
                "no control mapped for operation '{}'",
                listing.operation
            ))
        })?;
        ctx.click_control(&locator).await
    }
}

/// Opens the property-type dropdown and resolves the requested label
/// against whatever the portal rendered.
pub struct PropertyTypeStage;

#[async_trait]
impl FormStage for PropertyTypeStage {
    fn id(&self) -> StageId {
        StageId::PropertyType
    }

    async fn run(&self, ctx: &StageContext<'_>, listing: &NormalizedListing) -> PortalResult<()> {
        let dropdown = ctx.locators.field(fields::PROPERTY_TYPE_DROPDOWN)?;
        ctx.click_control(&dropdown).await?;
        ctx.surface.settle(ctx.config.settle()).await;

        let options = ctx.locators.field(fields::PROPERTY_TYPE_OPTIONS)?;
        let matched = OptionResolver
            .resolve(
                ctx.surface,
                &options,
                &listing.property_type,
                ctx.config.option_scan_cap,
            )
            .await?;
        if !matched {
            return Err(PortalError::OptionNotFound {
                field: "property_type".to_string(),
                target: listing.property_type.clone(),
            });
        }
        Ok(())
    }
}

/// Fills the price, and the expenses sub-field when present. Expenses
/// are non-critical to listing creation: a failure there is logged and
/// never escalated.
pub struct PriceStage;

#[async_trait]
impl FormStage for PriceStage {
    fn id(&self) -> StageId {
        StageId::Price
    }

    async fn run(&self, ctx: &StageContext<'_>, listing: &NormalizedListing) -> PortalResult<()> {
        ctx.fill_field(fields::PRICE, &format_amount(listing.price))
            .await?;

        if listing.has_positive_expenses() {
            let expenses = listing.expenses.unwrap_or_default();
            if let Err(err) = ctx
                .fill_field(fields::EXPENSES, &format_amount(expenses))
                .await
            {
                warn!(error = %err, "expenses fill failed; continuing without expenses");
            }
        } else {
            debug!("no positive expenses; skipping optional sub-field");
        }
        Ok(())
    }
}

/// Street components plus the cascading country -> province -> locality
/// dropdowns. Address separation happened upstream; nothing is
/// re-parsed here.
pub struct LocationStage;

impl LocationStage {
    /// The portal usually renders the country list pre-filtered to a
    /// single entry, and only that case may bypass exact matching. A
    /// wider list goes through the same matching policy as every other
    /// dropdown: a wrong geography must be an explicit failure, never a
    /// silent click.
    async fn select_country(
        &self,
        ctx: &StageContext<'_>,
        listing: &NormalizedListing,
    ) -> PortalResult<()> {
        let dropdown = ctx.locators.field(fields::COUNTRY_DROPDOWN)?;
        ctx.click_control(&dropdown).await?;
        ctx.surface.settle(ctx.config.settle()).await;

        let options_locator = ctx.locators.field(fields::COUNTRY_OPTIONS)?;
        let rendered = ctx
            .surface
            .rendered_options(&options_locator, ctx.config.option_scan_cap)
            .await?;
        if let [only] = rendered.as_slice() {
            if !only.text.trim().eq_ignore_ascii_case(listing.country.trim()) {
                debug!(
                    rendered = %only.text,
                    requested = %listing.country,
                    "country default differs from requested value"
                );
            }
            ctx.surface.click_option(only).await?;
            return Ok(());
        }

        match match_option(&rendered, &listing.country) {
            Some(index) => {
                ctx.surface.click_option(&rendered[index]).await?;
                Ok(())
            }
            None => Err(PortalError::OptionNotFound {
                field: "country".to_string(),
                target: listing.country.clone(),
            }),
        }
    }

    async fn select_cascading(
        &self,
        ctx: &StageContext<'_>,
        field: &str,
        dropdown: &str,
        options: &str,
        target: &str,
    ) -> PortalResult<()> {
        let dropdown = ctx.locators.field(dropdown)?;
        ctx.click_control(&dropdown).await?;
        ctx.surface.settle(ctx.config.settle()).await;

        let options_locator = ctx.locators.field(options)?;
        let matched = OptionResolver
            .resolve(
                ctx.surface,
                &options_locator,
                target,
                ctx.config.option_scan_cap,
            )
            .await?;
        if !matched {
            return Err(PortalError::OptionNotFound {
                field: field.to_string(),
                target: target.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FormStage for LocationStage {
    fn id(&self) -> StageId {
        StageId::Location
    }

    async fn run(&self, ctx: &StageContext<'_>, listing: &NormalizedListing) -> PortalResult<()> {
        ctx.fill_field(fields::STREET, &listing.street).await?;
        ctx.fill_field(fields::STREET_NUMBER, &listing.street_number)
            .await?;
        match &listing.postal_code {
            Some(postal_code) => {
                ctx.fill_field(fields::POSTAL_CODE, postal_code).await?;
            }
            None => debug!("postal code absent; skipping optional field"),
        }

        // Strictly country, then province, then locality: each
        // selection invalidates the next dropdown's rendered options.
        self.select_country(ctx, listing).await?;
        ctx.surface.settle(ctx.config.settle()).await;

        self.select_cascading(
            ctx,
            "province",
            fields::PROVINCE_DROPDOWN,
            fields::PROVINCE_OPTIONS,
            &listing.province,
        )
        .await?;
        ctx.surface.settle(ctx.config.settle()).await;

        self.select_cascading(
            ctx,
            "locality",
            fields::LOCALITY_DROPDOWN,
            fields::LOCALITY_OPTIONS,
            &listing.locality,
        )
        .await?;
        Ok(())
    }
}

/// Title and multi-line description, already composed upstream.
pub struct DescriptionStage;

#[async_trait]
impl FormStage for DescriptionStage {
    fn id(&self) -> StageId {
        StageId::Description
    }

    async fn run(&self, ctx: &StageContext<'_>, listing: &NormalizedListing) -> PortalResult<()> {
        ctx.fill_field(fields::TITLE, &listing.title).await?;
        ctx.fill_field(fields::DESCRIPTION, &listing.description)
            .await?;
        Ok(())
    }
}
