use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ConductorId;

/// Static reference row from `conductors`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Conductor {
    pub id: ConductorId,
    pub name: String,
    pub whatsapp: Option<String>,
    pub is_active: bool,
}
