use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::backend::{Filter, Order, TableBackend};
use crate::validation::ValidationErrors;
use crate::{time, AppError, AppResult};

/// One recorded transfer of stock between two places.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "itemId")]
    pub item_id: i64,
    /// RFC 3339.
    pub date: String,
    pub origin: String,
    pub destination: String,
    pub quantity: i64,
}

impl Movement {
    pub fn from_row(row: Value) -> AppResult<Self> {
        serde_json::from_value(row).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "decode_movement")
                .with_context("table", "movements")
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MovementDraft {
    pub origin: String,
    pub destination: String,
    pub quantity: i64,
}

impl MovementDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(!self.origin.trim().is_empty(), "origin", "Origin is required");
        errors.check(
            !self.destination.trim().is_empty(),
            "destination",
            "Destination is required",
        );
        errors.check(
            self.quantity > 0,
            "quantity",
            "Quantity must be greater than 0",
        );
        errors.into_result()
    }

    fn to_row(&self, item_id: i64, date: String) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("itemId".into(), Value::from(item_id));
        row.insert("date".into(), Value::from(date));
        row.insert("origin".into(), Value::from(self.origin.trim()));
        row.insert("destination".into(), Value::from(self.destination.trim()));
        row.insert("quantity".into(), Value::from(self.quantity));
        row
    }
}

/// Movements of one item, oldest first.
pub async fn list_movements<T: TableBackend>(
    tables: &T,
    table: &str,
    item_id: i64,
) -> AppResult<Vec<Movement>> {
    let rows = tables
        .select(
            table,
            &[Filter::eq("itemId", item_id)],
            Some(&Order::asc("date")),
        )
        .await
        .map_err(|err| err.with_context("operation", "list_movements"))?;
    rows.into_iter().map(Movement::from_row).collect()
}

/// Insert a movement stamped with the current time. Recording a movement
/// does not change the item's quantity.
pub async fn record_movement<T: TableBackend>(
    tables: &T,
    table: &str,
    item_id: i64,
    draft: &MovementDraft,
) -> AppResult<Movement> {
    draft.validate().map_err(AppError::from)?;
    let row = draft.to_row(item_id, time::now_rfc3339());
    let stored = tables
        .insert(table, row)
        .await
        .map_err(|err| err.with_context("item_id", item_id.to_string()))?;
    let movement = Movement::from_row(stored)?;
    info!(
        target: "stockroom",
        event = "movement_recorded",
        item_id = item_id,
        quantity = movement.quantity
    );
    Ok(movement)
}
