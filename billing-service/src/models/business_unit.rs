//! Business unit model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A branch or franchise the ISP operates under.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BusinessUnit {
    pub unit_id: Uuid,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}
