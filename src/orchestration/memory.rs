//! In-process collaborators.
//!
//! Implements the inventory, payment and shipping HTTP contracts over local
//! stores so the gateway can run, and be tested, without the downstream
//! services. Selected with `collaborators.mode = "in_memory"`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use axum::http::Method;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::schema::DEFAULT_RETENTION;
use crate::error::{GatewayError, GatewayResult};
use crate::orchestration::store::{InventoryStore, StoreError};
use crate::orchestration::types::OrderItem;
use crate::pipeline::call::ServiceCallSpec;
use crate::pipeline::transport::{error_message, Transport};

const SHIPMENT_STATUSES: [&str; 5] = ["PROCESSING", "SHIPPED", "IN_TRANSIT", "DELIVERED", "FAILED"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRecord {
    order_id: String,
    amount: f64,
    currency: String,
    method: String,
    timestamp: String,
    transaction_id: String,
    status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShipmentRecord {
    order_id: String,
    address: Value,
    items: Value,
    status: String,
    created_at: String,
    tracking_number: String,
    estimated_delivery: String,
    carrier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockRequest {
    order_id: Option<String>,
    items: Option<Vec<OrderItem>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChargeRequest {
    order_id: Option<String>,
    amount: Option<f64>,
    currency: Option<String>,
    method: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShipRequest {
    order_id: Option<String>,
    address: Option<Value>,
    items: Option<Value>,
}

/// Status code and JSON body of a collaborator answer.
struct Reply {
    status: u16,
    body: Value,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    fn error(status: u16, error: &str, message: Option<String>) -> Self {
        let body = match message {
            Some(message) => json!({ "error": error, "message": message }),
            None => json!({ "error": error }),
        };
        Self { status, body }
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn body<T: for<'de> Deserialize<'de>>(call: &ServiceCallSpec) -> Option<T> {
    call.payload.clone().and_then(|p| serde_json::from_value(p).ok())
}

/// Inventory, payment and shipping collaborators in one process.
pub struct InMemoryServices {
    inventory: Arc<dyn InventoryStore>,
    payments: Mutex<VecDeque<PaymentRecord>>,
    shipments: Mutex<VecDeque<ShipmentRecord>>,
    retention: usize,
}

/// Drop the oldest records beyond `retention`. 0 keeps everything.
fn trim<T>(records: &mut VecDeque<T>, retention: usize) {
    while retention > 0 && records.len() > retention {
        records.pop_front();
    }
}

impl InMemoryServices {
    pub fn new(inventory: Arc<dyn InventoryStore>) -> Self {
        Self {
            inventory,
            payments: Mutex::new(VecDeque::new()),
            shipments: Mutex::new(VecDeque::new()),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Keep at most `retention` payment and shipment records each.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn inventory(&self) -> Arc<dyn InventoryStore> {
        self.inventory.clone()
    }

    fn payments(&self) -> MutexGuard<'_, VecDeque<PaymentRecord>> {
        self.payments.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shipments(&self) -> MutexGuard<'_, VecDeque<ShipmentRecord>> {
        self.shipments.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, call: &ServiceCallSpec) -> Reply {
        let segments: Vec<&str> = call.route().trim_matches('/').split('/').collect();
        match (&call.method, segments.as_slice()) {
            (&Method::GET, ["health"]) => Reply::ok(json!({
                "status": "UP",
                "service": format!("{}-service", call.target),
            })),

            (&Method::GET, ["api", "inventory"]) => Reply::ok(to_value(&self.inventory.list())),
            (&Method::GET, ["api", "inventory", id]) => match self.inventory.get(id) {
                Some(product) => Reply::ok(to_value(&product)),
                None => Reply::error(404, "Product not found", Some(format!("Product {} not found", id))),
            },
            (&Method::POST, ["api", "inventory", "check"]) => self.check(call),
            (&Method::POST, ["api", "inventory", "update"]) => self.update(call),
            (&Method::POST, ["api", "inventory", "restore"]) => self.restore(call),

            (&Method::POST, ["api", "payments"]) => self.charge(call),
            (&Method::GET, ["api", "payments", order_id]) => {
                match self.payments().iter().find(|p| p.order_id == *order_id) {
                    Some(payment) => Reply::ok(to_value(payment)),
                    None => Reply::error(404, "Payment not found", None),
                }
            }

            (&Method::POST, ["api", "shipping"]) => self.ship(call),
            (&Method::GET, ["api", "shipping", order_id]) => {
                match self.shipments().iter().find(|s| s.order_id == *order_id) {
                    Some(shipment) => Reply::ok(to_value(shipment)),
                    None => Reply::error(404, "Shipment not found", None),
                }
            }
            (&Method::PUT, ["api", "shipping", order_id, "status"]) => self.update_shipment(order_id, call),

            _ => Reply::error(404, "Not found", Some(format!("{} {}", call.method, call.path))),
        }
    }

    fn check(&self, call: &ServiceCallSpec) -> Reply {
        match body::<StockRequest>(call).and_then(|r| r.items) {
            Some(items) => Reply::ok(to_value(&self.inventory.check(&items))),
            None => Reply::error(400, "Items array is required", None),
        }
    }

    fn update(&self, call: &ServiceCallSpec) -> Reply {
        let Some((order_id, items)) = body::<StockRequest>(call).and_then(|r| r.order_id.zip(r.items)) else {
            return Reply::error(400, "Items array and order ID are required", None);
        };
        match self.inventory.reserve(&order_id, &items) {
            Ok(adjustment) => Reply::ok(json!({
                "orderId": adjustment.order_id,
                "timestamp": Utc::now().to_rfc3339(),
                "updatedItems": adjustment.items,
                "replayed": adjustment.replayed,
            })),
            Err(e @ StoreError::Insufficient { .. }) => Reply::error(409, "Insufficient inventory", Some(e.to_string())),
            Err(e) => Reply::error(404, "Product not found", Some(e.to_string())),
        }
    }

    fn restore(&self, call: &ServiceCallSpec) -> Reply {
        let Some(order_id) = body::<StockRequest>(call).and_then(|r| r.order_id) else {
            return Reply::error(400, "Order ID is required", None);
        };
        match self.inventory.restore(&order_id) {
            Ok(adjustment) => Reply::ok(json!({
                "orderId": adjustment.order_id,
                "timestamp": Utc::now().to_rfc3339(),
                "restoredItems": adjustment.items,
                "replayed": adjustment.replayed,
            })),
            Err(e) => Reply::error(404, "Reservation not found", Some(e.to_string())),
        }
    }

    fn charge(&self, call: &ServiceCallSpec) -> Reply {
        let request = body::<ChargeRequest>(call);
        let Some((order_id, amount, currency, method)) =
            request.and_then(|r| Some((r.order_id?, r.amount?, r.currency, r.method)))
        else {
            return Reply::error(400, "Order ID and amount are required", None);
        };

        let mut payments = self.payments();
        if let Some(existing) = payments.iter().find(|p| p.order_id == order_id) {
            return Reply::created(to_value(existing));
        }
        let payment = PaymentRecord {
            order_id,
            amount,
            currency: currency.unwrap_or_else(|| "USD".into()),
            method: method.unwrap_or_else(|| "credit_card".into()),
            timestamp: Utc::now().to_rfc3339(),
            transaction_id: format!("txn_{}", Uuid::new_v4().simple()),
            status: "success".into(),
        };
        let reply = Reply::created(to_value(&payment));
        payments.push_back(payment);
        trim(&mut *payments, self.retention);
        reply
    }

    fn ship(&self, call: &ServiceCallSpec) -> Reply {
        let request = body::<ShipRequest>(call);
        let Some((order_id, address, items)) = request.and_then(|r| Some((r.order_id?, r.address?, r.items?))) else {
            return Reply::error(400, "Order ID, address, and items are required", None);
        };

        let mut shipments = self.shipments();
        if let Some(existing) = shipments.iter().find(|s| s.order_id == order_id) {
            return Reply::created(to_value(existing));
        }
        let now = Utc::now();
        let shipment = ShipmentRecord {
            order_id,
            address,
            items,
            status: "PROCESSING".into(),
            created_at: now.to_rfc3339(),
            tracking_number: format!("TRK{}", now.timestamp_millis()),
            estimated_delivery: (now + ChronoDuration::days(3)).format("%Y-%m-%d").to_string(),
            carrier: "Express Shipping".into(),
            updated_at: None,
        };
        let reply = Reply::created(to_value(&shipment));
        shipments.push_back(shipment);
        trim(&mut *shipments, self.retention);
        reply
    }

    fn update_shipment(&self, order_id: &str, call: &ServiceCallSpec) -> Reply {
        let Some(status) = call
            .payload
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(Value::as_str)
        else {
            return Reply::error(400, "Status is required", None);
        };
        if !SHIPMENT_STATUSES.contains(&status) {
            return Reply {
                status: 400,
                body: json!({ "error": "Invalid status", "validStatuses": SHIPMENT_STATUSES }),
            };
        }

        let mut shipments = self.shipments();
        match shipments.iter_mut().find(|s| s.order_id == order_id) {
            Some(shipment) => {
                shipment.status = status.to_string();
                shipment.updated_at = Some(Utc::now().to_rfc3339());
                Reply::ok(to_value(shipment))
            }
            None => Reply::error(404, "Shipment not found", None),
        }
    }
}

#[async_trait]
impl Transport for InMemoryServices {
    async fn send(&self, call: &ServiceCallSpec, cancel: CancellationToken) -> GatewayResult<Value> {
        if cancel.is_cancelled() {
            return Err(GatewayError::transport(&call.target, "request cancelled"));
        }

        let reply = self.dispatch(call);
        if (200..300).contains(&reply.status) {
            Ok(reply.body)
        } else {
            Err(GatewayError::Downstream {
                target: call.target.clone(),
                status: Some(reply.status),
                message: error_message(reply.status, &reply.body),
                body: Some(reply.body),
            })
        }
    }
}
