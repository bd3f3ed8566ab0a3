//! Named locator map. All coupling to the portal's DOM structure lives
//! here; structural drift in the portal is fixed by overriding a key in
//! `[selectors.overrides]`, not by touching stage logic.

use std::collections::HashMap;

use crate::config::SelectorSection;

use super::error::{PortalError, PortalResult};

/// One structural reference into the portal's rendered tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub name: String,
    pub selector: String,
}

impl Locator {
    fn new(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
        }
    }
}

pub mod fields {
    pub const USERNAME: &str = "login.username";
    pub const PASSWORD: &str = "login.password";
    pub const LOGIN_SUBMIT: &str = "login.submit";
    pub const NEW_LISTING: &str = "nav.new_listing";
    pub const PROPERTY_TYPE_DROPDOWN: &str = "property_type.dropdown";
    pub const PROPERTY_TYPE_OPTIONS: &str = "property_type.options";
    pub const PRICE: &str = "price.amount";
    pub const EXPENSES: &str = "price.expenses";
    pub const STREET: &str = "location.street";
    pub const STREET_NUMBER: &str = "location.street_number";
    pub const POSTAL_CODE: &str = "location.postal_code";
    pub const COUNTRY_DROPDOWN: &str = "location.country.dropdown";
    pub const COUNTRY_OPTIONS: &str = "location.country.options";
    pub const PROVINCE_DROPDOWN: &str = "location.province.dropdown";
    pub const PROVINCE_OPTIONS: &str = "location.province.options";
    pub const LOCALITY_DROPDOWN: &str = "location.locality.dropdown";
    pub const LOCALITY_OPTIONS: &str = "location.locality.options";
    pub const TITLE: &str = "description.title";
    pub const DESCRIPTION: &str = "description.body";
}

/// Defaults reflect the portal's DOM as last observed. Overridable
/// per-key from configuration.
const DEFAULTS: &[(&str, &str)] = &[
    (fields::USERNAME, "input[name='username']"),
    (fields::PASSWORD, "input[name='password']"),
    (fields::LOGIN_SUBMIT, "button[type='submit']"),
    (fields::NEW_LISTING, "a[href*='/properties/new']"),
    (
        fields::PROPERTY_TYPE_DROPDOWN,
        "div[data-field='propertyType'] .dropdown-toggle",
    ),
    (
        fields::PROPERTY_TYPE_OPTIONS,
        "div[data-field='propertyType'] .dropdown-menu li",
    ),
    (fields::PRICE, "input[name='price']"),
    (fields::EXPENSES, "input[name='expenses']"),
    (fields::STREET, "input[name='street']"),
    (fields::STREET_NUMBER, "input[name='streetNumber']"),
    (fields::POSTAL_CODE, "input[name='postalCode']"),
    (
        fields::COUNTRY_DROPDOWN,
        "div[data-field='country'] .dropdown-toggle",
    ),
    (
        fields::COUNTRY_OPTIONS,
        "div[data-field='country'] .dropdown-menu li",
    ),
    (
        fields::PROVINCE_DROPDOWN,
        "div[data-field='province'] .dropdown-toggle",
    ),
    (
        fields::PROVINCE_OPTIONS,
        "div[data-field='province'] .dropdown-menu li",
    ),
    (
        fields::LOCALITY_DROPDOWN,
        "div[data-field='locality'] .dropdown-toggle",
    ),
    (
        fields::LOCALITY_OPTIONS,
        "div[data-field='locality'] .dropdown-menu li",
    ),
    (fields::TITLE, "input[name='title']"),
    (fields::DESCRIPTION, "textarea[name='description']"),
];

const OPERATION_DEFAULTS: &[(&str, &str)] = &[
    ("Venta", "label[for='operation-sale']"),
    ("Alquiler", "label[for='operation-rent']"),
    ("Alquiler temporario", "label[for='operation-temporary']"),
];

#[derive(Debug, Clone)]
pub struct LocatorMap {
    fields: HashMap<String, String>,
    operations: HashMap<String, String>,
}

impl LocatorMap {
    pub fn from_section(section: &SelectorSection) -> Self {
        let mut fields: HashMap<String, String> = DEFAULTS
            .iter()
            .map(|(name, selector)| (name.to_string(), selector.to_string()))
            .collect();
        for (name, selector) in &section.overrides {
            fields.insert(name.clone(), selector.clone());
        }

        let mut operations: HashMap<String, String> = OPERATION_DEFAULTS
            .iter()
            .map(|(label, selector)| (label.to_string(), selector.to_string()))
            .collect();
        for (label, selector) in &section.operations {
            operations.insert(label.clone(), selector.clone());
        }

        Self { fields, operations }
    }

    pub fn field(&self, name: &str) -> PortalResult<Locator> {
        self.fields
            .get(name)
            .map(|selector| Locator::new(name, selector))
            .ok_or_else(|| {
                PortalError::Configuration(format!("no locator configured for '{name}'"))
            })
    }

    /// `None` means the requested operation kind has no known control
    /// and is unsupported.
    pub fn operation(&self, label: &str) -> Option<Locator> {
        self.operations
            .get(label)
            .map(|selector| Locator::new(&format!("operation.{label}"), selector))
    }
}

impl Default for LocatorMap {
    fn default() -> Self {
        Self::from_section(&SelectorSection::default())
    }
}
