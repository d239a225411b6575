//! Order workflow data model.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

/// Saga steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStep {
    CheckInventory,
    ProcessPayment,
    UpdateInventory,
    CreateShipment,
}

impl WorkflowStep {
    pub const SEQUENCE: [WorkflowStep; 4] = [
        WorkflowStep::CheckInventory,
        WorkflowStep::ProcessPayment,
        WorkflowStep::UpdateInventory,
        WorkflowStep::CreateShipment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::CheckInventory => "CHECK_INVENTORY",
            WorkflowStep::ProcessPayment => "PROCESS_PAYMENT",
            WorkflowStep::UpdateInventory => "UPDATE_INVENTORY",
            WorkflowStep::CreateShipment => "CREATE_SHIPMENT",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incoming order body. Every field is optional so missing ones become 400s.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub items: Option<Vec<OrderLineInput>>,
    pub payment: Option<PaymentDetails>,
    pub shipping_address: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    pub product_id: Option<String>,
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_method() -> String {
    "credit_card".to_string()
}

/// A validated order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: u32,
}

/// An order that passed input validation.
#[derive(Debug, Clone)]
pub struct ValidatedOrder {
    pub items: Vec<OrderItem>,
    pub payment: PaymentDetails,
    pub shipping_address: Value,
}

impl OrderRequest {
    pub fn validate(self) -> GatewayResult<ValidatedOrder> {
        let (lines, payment, shipping_address) = match (self.items, self.payment, self.shipping_address) {
            (Some(items), Some(payment), Some(address)) if !address.is_null() => (items, payment, address),
            _ => {
                return Err(GatewayError::Validation(
                    "Items, payment, and shipping address are required".into(),
                ))
            }
        };
        if lines.is_empty() {
            return Err(GatewayError::Validation("At least one item is required".into()));
        }

        let items = lines
            .into_iter()
            .map(|line| match (line.product_id, line.quantity) {
                (Some(product_id), Some(quantity)) if !product_id.is_empty() && quantity >= 1 => {
                    let quantity = u32::try_from(quantity)
                        .map_err(|_| GatewayError::Validation(format!("Quantity too large for {}", product_id)))?;
                    Ok(OrderItem { product_id, quantity })
                }
                _ => Err(GatewayError::Validation(
                    "Product ID and a positive quantity are required for each item".into(),
                )),
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(ValidatedOrder {
            items,
            payment,
            shipping_address,
        })
    }
}

/// One line of an inventory availability answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedItem {
    pub product_id: String,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_stock: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Inventory availability for a whole order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryCheck {
    pub available: bool,
    pub items: Vec<CheckedItem>,
}

impl InventoryCheck {
    pub fn unavailable(&self) -> Vec<&CheckedItem> {
        self.items.iter().filter(|i| !i.available).collect()
    }

    /// Sum of `quantity * price` over the order, using checked prices.
    pub fn total_for(&self, items: &[OrderItem]) -> f64 {
        items
            .iter()
            .map(|item| {
                let price = self
                    .items
                    .iter()
                    .find(|c| c.product_id == item.product_id)
                    .and_then(|c| c.price)
                    .unwrap_or(0.0);
                price * f64::from(item.quantity)
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Completed,
    /// A fallback or pending answer stood in for the real result.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: WorkflowStep,
    pub outcome: StepOutcome,
}

/// Result of a completed order workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: String,
    pub status: &'static str,
    pub timestamp: String,
    pub items: Vec<CheckedItem>,
    pub payment: Value,
    pub shipping: Value,
    pub degraded: bool,
    pub steps: Vec<StepRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> OrderRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_valid_order() {
        let order = request(json!({
            "items": [{"productId": "prod-001", "quantity": 2}],
            "payment": {"currency": "EUR"},
            "shippingAddress": {"street": "1 Main St"}
        }))
        .validate()
        .unwrap();
        assert_eq!(order.items, vec![OrderItem { product_id: "prod-001".into(), quantity: 2 }]);
        assert_eq!(order.payment.method, "credit_card");
        assert_eq!(order.payment.currency, "EUR");
    }

    #[test]
    fn test_missing_sections_rejected() {
        let err = request(json!({"items": [{"productId": "prod-001", "quantity": 1}]}))
            .validate()
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn test_bad_lines_rejected() {
        for items in [json!([]), json!([{"productId": "", "quantity": 1}]), json!([{"productId": "prod-001", "quantity": 0}])] {
            let err = request(json!({
                "items": items,
                "payment": {},
                "shippingAddress": "1 Main St"
            }))
            .validate()
            .unwrap_err();
            assert!(matches!(err, GatewayError::Validation(_)));
        }
    }

    #[test]
    fn test_total_uses_checked_prices() {
        let check: InventoryCheck = serde_json::from_value(json!({
            "available": true,
            "items": [
                {"productId": "prod-001", "available": true, "price": 1200.0},
                {"productId": "prod-003", "available": true, "price": 100.0}
            ]
        }))
        .unwrap();
        let items = vec![
            OrderItem { product_id: "prod-001".into(), quantity: 1 },
            OrderItem { product_id: "prod-003".into(), quantity: 3 },
        ];
        assert_eq!(check.total_for(&items), 1500.0);
        assert!(check.unavailable().is_empty());
    }

    #[test]
    fn test_step_names() {
        let names: Vec<String> = WorkflowStep::SEQUENCE.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, ["CHECK_INVENTORY", "PROCESS_PAYMENT", "UPDATE_INVENTORY", "CREATE_SHIPMENT"]);
        assert_eq!(serde_json::to_value(WorkflowStep::CreateShipment).unwrap(), json!("CREATE_SHIPMENT"));
    }
}
