//! Database repository for the credits configuration record.

use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};
use std::collections::HashMap;
use tracing::instrument;

use crate::db::{errors::Result, models::config::CreditsConfigRecord};

/// Well-known id of the singleton record.
pub const CONFIG_RECORD_ID: &str = "ai_credits";

// Database entity model; JSONB maps come back as raw string keys.
#[derive(Debug, FromRow)]
struct ConfigRow {
    monthly_allowance_by_plan: Json<HashMap<String, i64>>,
    cost_by_action: Json<HashMap<String, i64>>,
}

impl From<ConfigRow> for CreditsConfigRecord {
    fn from(row: ConfigRow) -> Self {
        Self {
            monthly_allowance_by_plan: row.monthly_allowance_by_plan.0,
            cost_by_action: row.cost_by_action.0,
        }
    }
}

pub struct ConfigRecords<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ConfigRecords<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Read the singleton record. Absence is the "use defaults" path, not an
    /// error.
    #[instrument(skip(self), err)]
    pub async fn get(&mut self) -> Result<Option<CreditsConfigRecord>> {
        let row = sqlx::query_as::<_, ConfigRow>(
            "SELECT monthly_allowance_by_plan, cost_by_action \
             FROM credits_config \
             WHERE id = $1",
        )
        .bind(CONFIG_RECORD_ID)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row.map(CreditsConfigRecord::from))
    }

    /// Overwrite the singleton record (versionless).
    #[instrument(skip(self, record), err)]
    pub async fn upsert(&mut self, record: &CreditsConfigRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO credits_config (id, monthly_allowance_by_plan, cost_by_action, updated_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (id) DO UPDATE \
             SET monthly_allowance_by_plan = EXCLUDED.monthly_allowance_by_plan, \
                 cost_by_action = EXCLUDED.cost_by_action, \
                 updated_at = NOW()",
        )
        .bind(CONFIG_RECORD_ID)
        .bind(Json(&record.monthly_allowance_by_plan))
        .bind(Json(&record.cost_by_action))
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }
}
