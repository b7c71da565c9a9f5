//! Postgres-backed persistence gateway.
//!
//! Writes follow the schema in `migrations/0001_fees.sql`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | GatewayError |
//! |------------|----------------------|--------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (check constraint violation) | `23514` | `Database` |
//! | Database (other) | Any other | `Database` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | Other | N/A | `Database` |

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use super::r#trait::{FinalizeBill, GatewayError, PersistenceGateway, SaveLineItem, UpsertBill};

#[derive(Debug, Clone)]
pub struct PgPersistenceGateway {
    pool: PgPool,
}

impl PgPersistenceGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, GatewayError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for PgPersistenceGateway {
    #[instrument(skip(self, params), fields(bill_id = %params.id))]
    async fn upsert_bill(&self, params: UpsertBill) -> Result<(), GatewayError> {
        // created_at and total_amount are left untouched on conflict.
        sqlx::query(
            r#"
            INSERT INTO bills (id, customer_id, currency, status, created_at, total_amount)
            VALUES ($1, $2, $3, $4, $5, 0)
            ON CONFLICT (id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                currency = EXCLUDED.currency,
                status = EXCLUDED.status
            "#,
        )
        .bind(params.id.as_str())
        .bind(&params.customer_id)
        .bind(&params.currency)
        .bind(params.status.as_str())
        .bind(params.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_bill", e))?;

        Ok(())
    }

    #[instrument(skip(self, params), fields(bill_id = %params.bill_id, line_item_id = %params.id))]
    async fn save_line_item(&self, params: SaveLineItem) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO line_items (id, bill_id, description, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(params.id.as_str())
        .bind(params.bill_id.as_str())
        .bind(&params.description)
        .bind(params.amount)
        .bind(params.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_line_item", e))?;

        Ok(())
    }

    #[instrument(skip(self, params), fields(bill_id = %params.id))]
    async fn finalize_bill(&self, params: FinalizeBill) -> Result<(), GatewayError> {
        let result = sqlx::query(
            r#"
            UPDATE bills
            SET status = $2, total_amount = $3, closed_at = $4
            WHERE id = $1
            "#,
        )
        .bind(params.id.as_str())
        .bind(params.status.as_str())
        .bind(params.total_amount)
        .bind(params.closed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("finalize_bill", e))?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("bill {}", params.id)));
        }
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> GatewayError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") => GatewayError::Conflict(msg),
                Some("23503") => GatewayError::NotFound(msg),
                _ => GatewayError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            GatewayError::Unavailable(format!("connection pool unavailable in {}", operation))
        }
        sqlx::Error::Io(io) => {
            GatewayError::Unavailable(format!("io error in {}: {}", operation, io))
        }
        _ => GatewayError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}
