//! Property entity.

use domain::models::PropertyRecord;
use sqlx::FromRow;
use uuid::Uuid;

/// Database entity for the exported columns of a property row.
#[derive(Debug, Clone, FromRow)]
pub struct PropertyEntity {
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

impl From<PropertyEntity> for PropertyRecord {
    fn from(entity: PropertyEntity) -> Self {
        PropertyRecord {
            id: entity.id,
            owner_id: entity.owner_id,
            street: entity.street,
            city: entity.city,
            state: entity.state,
            zip_code: entity.zip_code,
            country: entity.country,
            purchase_price: entity.purchase_price,
            current_value: entity.current_value,
            status: entity.status,
            property_type: entity.property_type,
        }
    }
}
