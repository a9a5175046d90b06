//! Property rows exported by the pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::export::ExportFilters;
use crate::services::SourceError;

/// One property holding as read from the data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub purchase_price: f64,
    pub current_value: Option<f64>,
    pub status: String,
    pub property_type: Option<String>,
}

/// Typed view of the export filters supported by property sources.
///
/// Every key is an exact match. Unknown keys are rejected rather than ignored,
/// so a typo never silently widens an export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyFilter {
    pub status: Option<String>,
    pub property_type: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip_code: Option<String>,
    pub owner_id: Option<Uuid>,
}

impl PropertyFilter {
    /// Parse the opaque filters carried by a job.
    pub fn from_filters(filters: &ExportFilters) -> Result<Self, SourceError> {
        let mut filter = PropertyFilter::default();

        for (key, value) in filters.iter() {
            let value = value.as_str().ok_or_else(|| {
                SourceError::InvalidFilter(format!("filter '{}' must be a string", key))
            })?;
            let value = value.to_string();

            match key.as_str() {
                "status" => filter.status = Some(value),
                "propertyType" => filter.property_type = Some(value),
                "city" => filter.city = Some(value),
                "state" => filter.state = Some(value),
                "country" => filter.country = Some(value),
                "zipCode" => filter.zip_code = Some(value),
                "ownerId" => {
                    let owner_id = Uuid::parse_str(&value).map_err(|_| {
                        SourceError::InvalidFilter(format!("filter 'ownerId' is not a UUID: {}", value))
                    })?;
                    filter.owner_id = Some(owner_id);
                }
                other => {
                    return Err(SourceError::InvalidFilter(format!(
                        "unsupported filter '{}'",
                        other
                    )))
                }
            }
        }

        Ok(filter)
    }

    /// Whether a record satisfies every configured criterion.
    pub fn matches(&self, record: &PropertyRecord) -> bool {
        fn eq(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map(|e| e == actual).unwrap_or(true)
        }

        eq(&self.status, &record.status)
            && self
                .property_type
                .as_ref()
                .map(|t| record.property_type.as_deref() == Some(t.as_str()))
                .unwrap_or(true)
            && eq(&self.city, &record.city)
            && eq(&self.state, &record.state)
            && eq(&self.country, &record.country)
            && eq(&self.zip_code, &record.zip_code)
            && self.owner_id.map(|o| o == record.owner_id).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::faker::address::en::{CityName, StreetName, ZipCode};
    use fake::Fake;

    fn property(status: &str, property_type: Option<&str>) -> PropertyRecord {
        PropertyRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            street: StreetName().fake(),
            city: CityName().fake(),
            state: "TX".to_string(),
            zip_code: ZipCode().fake(),
            country: "USA".to_string(),
            purchase_price: 250_000.0,
            current_value: Some(275_000.0),
            status: status.to_string(),
            property_type: property_type.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_filters_match_everything() {
        let filter = PropertyFilter::from_filters(&ExportFilters::new()).unwrap();
        assert_eq!(filter, PropertyFilter::default());
        assert!(filter.matches(&property("Owned", None)));
    }

    #[test]
    fn test_filter_by_status_and_type() {
        let filters = ExportFilters::new()
            .with("status", "Owned")
            .with("propertyType", "Condo");
        let filter = PropertyFilter::from_filters(&filters).unwrap();

        assert!(filter.matches(&property("Owned", Some("Condo"))));
        assert!(!filter.matches(&property("Sold", Some("Condo"))));
        assert!(!filter.matches(&property("Owned", Some("Land"))));
        assert!(!filter.matches(&property("Owned", None)));
    }

    #[test]
    fn test_filter_by_owner() {
        let record = property("Owned", None);
        let filters = ExportFilters::new().with("ownerId", record.owner_id.to_string());
        let filter = PropertyFilter::from_filters(&filters).unwrap();
        assert!(filter.matches(&record));
        assert!(!filter.matches(&property("Owned", None)));
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        let filters = ExportFilters::new().with("price", "100");
        let err = PropertyFilter::from_filters(&filters).unwrap_err();
        assert!(err.to_string().contains("price"));
    }

    #[test]
    fn test_non_string_filter_is_rejected() {
        let filters = ExportFilters::new().with("status", 5);
        assert!(PropertyFilter::from_filters(&filters).is_err());
    }

    #[test]
    fn test_invalid_owner_id_is_rejected() {
        let filters = ExportFilters::new().with("ownerId", "not-a-uuid");
        assert!(PropertyFilter::from_filters(&filters).is_err());
    }
}
