//! Inventory lookup tools backed by static stock data.

use super::{Tool, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const INVENTORY_LEVELS: &[(&str, u32)] = &[
    ("Moisturizer", 6),
    ("Shampoo", 8),
    ("Body Spray", 28),
    ("Hair Gel", 5),
    ("Lip Balm", 12),
    ("Skin Serum", 9),
    ("Cleanser", 30),
    ("Conditioner", 3),
    ("Setting Powder", 17),
    ("Dry Shampoo", 45),
];

const WEEKLY_SALES: &[(&str, u32)] = &[
    ("Moisturizer", 22),
    ("Shampoo", 18),
    ("Body Spray", 3),
    ("Hair Gel", 2),
    ("Lip Balm", 14),
    ("Skin Serum", 19),
    ("Cleanser", 4),
    ("Conditioner", 1),
    ("Setting Powder", 13),
    ("Dry Shampoo", 17),
];

fn as_map(rows: &[(&'static str, u32)]) -> BTreeMap<&'static str, u32> {
    rows.iter().copied().collect()
}

fn no_params() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Current units in stock per product
pub struct InventoryLevelsTool;

#[async_trait]
impl Tool for InventoryLevelsTool {
    fn name(&self) -> &str {
        "get_inventory_levels"
    }

    fn description(&self) -> &str {
        "Returns current inventory for all products."
    }

    fn parameters(&self) -> Value {
        no_params()
    }

    async fn execute(&self, _params: Value) -> Result<ToolResult> {
        ToolResult::json(&as_map(INVENTORY_LEVELS))
    }
}

/// Units sold per product over the last week
pub struct WeeklySalesTool;

#[async_trait]
impl Tool for WeeklySalesTool {
    fn name(&self) -> &str {
        "get_weekly_sales"
    }

    fn description(&self) -> &str {
        "Returns number of units sold last week."
    }

    fn parameters(&self) -> Value {
        no_params()
    }

    async fn execute(&self, _params: Value) -> Result<ToolResult> {
        ToolResult::json(&as_map(WEEKLY_SALES))
    }
}

pub fn inventory_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(InventoryLevelsTool), Arc::new(WeeklySalesTool)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inventory_levels_return_seeded_values() {
        let result = InventoryLevelsTool.execute(json!({})).await.unwrap();
        assert!(result.success);
        let levels: BTreeMap<String, u32> = serde_json::from_str(&result.output).unwrap();
        assert_eq!(levels.len(), 10);
        assert_eq!(levels["Conditioner"], 3);
        assert_eq!(levels["Dry Shampoo"], 45);
    }

    #[tokio::test]
    async fn test_weekly_sales_return_seeded_values() {
        let result = WeeklySalesTool.execute(json!({})).await.unwrap();
        let sales: BTreeMap<String, u32> = serde_json::from_str(&result.output).unwrap();
        assert_eq!(sales["Moisturizer"], 22);
        assert_eq!(sales.values().sum::<u32>(), 113);
    }
}
