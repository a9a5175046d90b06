//! Property repository: the record source read by export workers.

use domain::models::{PropertyFilter, PropertyRecord};
use domain::services::{RecordSource, SourceError};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::entities::PropertyEntity;
use crate::metrics::QueryTimer;

/// Repository for reading property rows.
#[derive(Clone)]
pub struct PropertyRepository {
    pool: PgPool,
}

impl PropertyRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Append `AND <column> = <value>` when the criterion is set.
fn push_eq<'a, T>(builder: &mut QueryBuilder<'a, Postgres>, column: &str, value: Option<T>)
where
    T: 'a + sqlx::Encode<'a, Postgres> + sqlx::Type<Postgres> + Send,
{
    if let Some(value) = value {
        builder.push(format!(" AND {} = ", column));
        builder.push_bind(value);
    }
}

#[async_trait::async_trait]
impl RecordSource for PropertyRepository {
    async fn fetch_page(
        &self,
        filter: &PropertyFilter,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<PropertyRecord>, SourceError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            r#"
            SELECT id, owner_id, street, city, state, zip_code, country,
                   purchase_price, current_value, status, property_type
            FROM properties
            WHERE TRUE
            "#,
        );

        if let Some(after) = after {
            builder.push(" AND id > ");
            builder.push_bind(after);
        }
        push_eq(&mut builder, "status", filter.status.clone());
        push_eq(&mut builder, "property_type", filter.property_type.clone());
        push_eq(&mut builder, "city", filter.city.clone());
        push_eq(&mut builder, "state", filter.state.clone());
        push_eq(&mut builder, "country", filter.country.clone());
        push_eq(&mut builder, "zip_code", filter.zip_code.clone());
        push_eq(&mut builder, "owner_id", filter.owner_id);

        builder.push(" ORDER BY id LIMIT ");
        builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let timer = QueryTimer::new("properties_fetch_page");
        let result = builder
            .build_query_as::<PropertyEntity>()
            .fetch_all(&self.pool)
            .await;

        timer
            .finish(result)
            .map(|rows| rows.into_iter().map(PropertyRecord::from).collect())
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to read properties page");
                SourceError::Unavailable(e.to_string())
            })
    }
}
