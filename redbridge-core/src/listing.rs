//! Inbound listing payload, its validation gate, and the mapping into
//! the portal's own field vocabulary.
//!
//! Validation runs before any browser session exists; a payload that
//! fails here never reaches the automation entry point.

use serde::{Deserialize, Serialize};

/// The submission payload as received on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingSubmission {
    pub operation_type: String,
    pub property_type: String,
    pub title: String,
    pub description: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub street: String,
    pub street_number: String,
    #[serde(default)]
    pub floor: Option<String>,
    #[serde(default)]
    pub apartment: Option<String>,
    pub locality: String,
    pub province: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    pub country: String,
    pub covered_surface: f64,
    #[serde(default)]
    pub rooms: Option<u32>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<u32>,
    #[serde(default)]
    pub garages: Option<u32>,
    pub price: f64,
    pub price_currency: String,
    #[serde(default)]
    pub expenses: Option<f64>,
    #[serde(default)]
    pub expenses_currency: Option<String>,
}

impl ListingSubmission {
    /// Cheap fail-fast gate; collects every problem instead of stopping
    /// at the first one.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let required = [
            ("operation_type", &self.operation_type),
            ("property_type", &self.property_type),
            ("title", &self.title),
            ("description", &self.description),
            ("address", &self.address),
            ("street", &self.street),
            ("street_number", &self.street_number),
            ("locality", &self.locality),
            ("province", &self.province),
            ("country", &self.country),
            ("price_currency", &self.price_currency),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                errors.push(format!("{name} is required"));
            }
        }

        if !(-90.0..=90.0).contains(&self.latitude) {
            errors.push(format!(
                "latitude must be between -90 and 90 (got {})",
                self.latitude
            ));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            errors.push(format!(
                "longitude must be between -180 and 180 (got {})",
                self.longitude
            ));
        }
        if !(self.covered_surface > 0.0) {
            errors.push("covered_surface must be greater than zero".to_string());
        }
        if !(self.price > 0.0) {
            errors.push("price must be greater than zero".to_string());
        }
        if let Some(expenses) = self.expenses {
            if expenses < 0.0 {
                errors.push("expenses must not be negative".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reshapes the payload into the portal's field vocabulary. The
    /// result is immutable from here on; the pipeline never mutates it.
    pub fn normalize(&self) -> NormalizedListing {
        NormalizedListing {
            operation: portal_operation_label(&self.operation_type),
            property_type: portal_property_label(&self.property_type),
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            street: self.street.trim().to_string(),
            street_number: self.street_number.trim().to_string(),
            floor: trimmed_opt(&self.floor),
            apartment: trimmed_opt(&self.apartment),
            locality: self.locality.trim().to_string(),
            province: self.province.trim().to_string(),
            postal_code: trimmed_opt(&self.postal_code),
            country: self.country.trim().to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            covered_surface: self.covered_surface,
            rooms: self.rooms,
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            garages: self.garages,
            price: self.price,
            price_currency: self.price_currency.trim().to_string(),
            expenses: self.expenses,
            expenses_currency: trimmed_opt(&self.expenses_currency),
        }
    }
}

fn trimmed_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Maps our operation slugs onto the labels the portal renders. Values
/// already in portal vocabulary pass through untouched.
fn portal_operation_label(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        "sale" | "sell" | "venta" => "Venta".to_string(),
        "rent" | "rental" | "alquiler" => "Alquiler".to_string(),
        "temporary_rent" | "temporary" | "alquiler temporario" => {
            "Alquiler temporario".to_string()
        }
        _ => value.trim().to_string(),
    }
}

fn portal_property_label(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        "apartment" | "departamento" => "Departamento Estándar".to_string(),
        "house" | "casa" => "Casa".to_string(),
        "ph" => "PH".to_string(),
        "land" | "lot" | "terreno" => "Terreno y Lote".to_string(),
        "office" | "oficina" => "Oficina".to_string(),
        "commercial" | "local" => "Local Comercial".to_string(),
        "garage" | "cochera" => "Cochera".to_string(),
        _ => value.trim().to_string(),
    }
}

/// The same listing in the portal's vocabulary; passed by value into
/// the pipeline and serialized back to the caller as `formattedData`.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedListing {
    pub operation: String,
    pub property_type: String,
    pub title: String,
    pub description: String,
    pub street: String,
    pub street_number: String,
    pub floor: Option<String>,
    pub apartment: Option<String>,
    pub locality: String,
    pub province: String,
    pub postal_code: Option<String>,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub covered_surface: f64,
    pub rooms: Option<u32>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub garages: Option<u32>,
    pub price: f64,
    pub price_currency: String,
    pub expenses: Option<f64>,
    pub expenses_currency: Option<String>,
}

impl NormalizedListing {
    /// Whether the expenses sub-field should be attempted at all.
    pub fn has_positive_expenses(&self) -> bool {
        matches!(self.expenses, Some(value) if value > 0.0)
    }
}

/// Numeric fields are typed into plain text inputs; whole amounts are
/// rendered without a decimal tail.
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
