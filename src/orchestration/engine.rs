//! Order workflow.
//!
//! # Steps
//! ```text
//! CHECK_INVENTORY   → unavailable items: 400, nothing mutated
//! PROCESS_PAYMENT   → success or pending continues; anything else: 400
//! UPDATE_INVENTORY  → atomic re-check and decrement; insufficient: 409;
//!                     timeout or outage: restore stock, 500
//! CREATE_SHIPMENT   → pending fallback continues; failure: restore stock, 500
//! ```
//!
//! Each step runs through the pipeline of its configured service, so
//! breakers, timeouts, retries and fallbacks apply per step. Stock updates
//! and restores are only retried when the inventory service deduplicates
//! them per order (`idempotent_updates`). Payments are never reversed.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::OrchestrationConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::orchestration::types::{
    InventoryCheck, OrderReceipt, OrderRequest, StepOutcome, StepRecord, ValidatedOrder, WorkflowStep,
};
use crate::pipeline::service::is_fallback;
use crate::pipeline::{Pipeline, PipelineRegistry, ServiceCallSpec};

pub const UNAVAILABLE_ITEMS: &str = "Some items are not available in the requested quantity";
pub const PAYMENT_FAILED: &str = "Payment failed";
pub const INSUFFICIENT_INVENTORY: &str = "Insufficient inventory";

fn abort(step: WorkflowStep, status: u16, reason: impl Into<String>, details: Value) -> GatewayError {
    GatewayError::WorkflowAbort {
        step,
        reason: reason.into(),
        status,
        details,
    }
}

/// Turn a pipeline failure into a workflow abort for `step`.
fn step_failed(step: WorkflowStep, err: GatewayError) -> GatewayError {
    match err {
        GatewayError::WorkflowAbort { .. } => err,
        other => abort(step, 500, other.to_string(), Value::Null),
    }
}

fn is_pending(value: &Value) -> bool {
    is_fallback(value) || value.get("status").and_then(Value::as_str) == Some("pending")
}

/// Runs the order saga over the pipeline registry.
pub struct OrchestrationEngine {
    registry: Arc<PipelineRegistry>,
    config: ArcSwap<OrchestrationConfig>,
}

impl OrchestrationEngine {
    pub fn new(registry: Arc<PipelineRegistry>, config: OrchestrationConfig) -> Self {
        Self {
            registry,
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn update_config(&self, config: OrchestrationConfig) {
        self.config.store(Arc::new(config));
    }

    fn pipeline(&self, step: WorkflowStep, name: &str) -> GatewayResult<Arc<Pipeline>> {
        self.registry
            .get(name)
            .ok_or_else(|| abort(step, 500, format!("No pipeline configured for {}", name), Value::Null))
    }

    /// Validate and run one order end to end.
    pub async fn place_order(&self, request: OrderRequest, request_id: Option<String>) -> GatewayResult<OrderReceipt> {
        let order = request.validate()?;
        let order_id = format!("order-{}", Uuid::new_v4());
        let cancel = CancellationToken::new();

        let result = self
            .run(&order_id, &order, request_id, &cancel)
            .instrument(tracing::info_span!("order", order_id = %order_id))
            .await;
        match &result {
            Ok(receipt) => {
                metrics::record_order(if receipt.degraded { "degraded" } else { "created" });
                tracing::info!(order_id = %order_id, degraded = receipt.degraded, "Order created");
            }
            Err(GatewayError::WorkflowAbort { step, reason, status, .. }) => {
                metrics::record_order(if *status < 500 { "rejected" } else { "failed" });
                tracing::warn!(order_id = %order_id, step = %step, status, reason = %reason, "Order aborted");
            }
            Err(e) => {
                metrics::record_order("failed");
                tracing::error!(order_id = %order_id, error = %e, "Order failed");
            }
        }
        result
    }

    async fn run(
        &self,
        order_id: &str,
        order: &ValidatedOrder,
        request_id: Option<String>,
        cancel: &CancellationToken,
    ) -> GatewayResult<OrderReceipt> {
        let config = self.config.load_full();
        let inventory = self.pipeline(WorkflowStep::CheckInventory, &config.inventory_service)?;
        let payments = self.pipeline(WorkflowStep::ProcessPayment, &config.payment_service)?;
        let shipping = self.pipeline(WorkflowStep::CreateShipment, &config.shipping_service)?;
        let call = |target: &str, path: &str, payload: Value| {
            ServiceCallSpec::post(target, path, payload).with_request_id(request_id.clone())
        };
        let mut steps = Vec::with_capacity(WorkflowStep::SEQUENCE.len());

        // CHECK_INVENTORY
        let step = WorkflowStep::CheckInventory;
        let answer = inventory
            .execute(
                &call(inventory.name(), "/api/inventory/check", json!({ "items": order.items })).idempotent(true),
                cancel,
            )
            .await
            .map_err(|e| step_failed(step, e))?;
        let check: InventoryCheck = match serde_json::from_value(answer.clone()) {
            Ok(check) if !is_fallback(&answer) => check,
            _ => return Err(abort(step, 500, "Inventory service is currently unavailable", answer)),
        };
        if !check.available {
            return Err(abort(step, 400, UNAVAILABLE_ITEMS, json!(check.unavailable())));
        }
        tracing::debug!(order_id, step = %step, "Step completed");
        steps.push(StepRecord { step, outcome: StepOutcome::Completed });

        // PROCESS_PAYMENT
        let step = WorkflowStep::ProcessPayment;
        let charge = json!({
            "orderId": order_id,
            "amount": check.total_for(&order.items),
            "currency": order.payment.currency,
            "method": order.payment.method,
        });
        let payment = match payments.execute(&call(payments.name(), "/api/payments", charge), cancel).await {
            Ok(payment) => payment,
            Err(GatewayError::Downstream { status: Some(s), body, .. }) if (400..500).contains(&s) => {
                return Err(abort(step, 400, PAYMENT_FAILED, body.unwrap_or(Value::Null)));
            }
            Err(e) => return Err(step_failed(step, e)),
        };
        let charged = payment.get("status").and_then(Value::as_str) == Some("success") && !is_fallback(&payment);
        let outcome = if charged {
            StepOutcome::Completed
        } else if is_pending(&payment) {
            StepOutcome::Degraded
        } else {
            return Err(abort(step, 400, PAYMENT_FAILED, payment));
        };
        tracing::debug!(order_id, step = %step, outcome = ?outcome, "Step completed");
        steps.push(StepRecord { step, outcome });

        // UPDATE_INVENTORY
        let step = WorkflowStep::UpdateInventory;
        let update = json!({ "orderId": order_id, "items": order.items });
        let update_call = call(inventory.name(), "/api/inventory/update", update).idempotent(config.idempotent_updates);
        let ambiguous = match inventory.execute(&update_call, cancel).await {
            Ok(updated) if !is_fallback(&updated) => {
                tracing::debug!(order_id, step = %step, updated = %updated, "Step completed");
                None
            }
            Ok(_) => Some("Inventory service is currently unavailable".to_string()),
            Err(GatewayError::Downstream { status: Some(409), message, body, .. }) => {
                return Err(abort(
                    step,
                    409,
                    INSUFFICIENT_INVENTORY,
                    json!({ "message": message, "response": body }),
                ));
            }
            Err(e) if e.counts_as_failure() => Some(e.to_string()),
            Err(e) => return Err(step_failed(step, e)),
        };
        // The decrement may have landed even though no answer came back.
        if let Some(reason) = ambiguous {
            let compensated = config.compensate_on_failure
                && self.compensate(&inventory, order_id, order, &call, config.idempotent_updates, cancel).await;
            return Err(abort(step, 500, reason, json!({ "compensated": compensated })));
        }
        steps.push(StepRecord { step, outcome: StepOutcome::Completed });

        // CREATE_SHIPMENT
        let step = WorkflowStep::CreateShipment;
        let ship = json!({
            "orderId": order_id,
            "address": order.shipping_address,
            "items": order.items,
        });
        let shipment = match shipping.execute(&call(shipping.name(), "/api/shipping", ship), cancel).await {
            Ok(shipment) => shipment,
            Err(e) => {
                let compensated = config.compensate_on_failure
                    && self.compensate(&inventory, order_id, order, &call, config.idempotent_updates, cancel).await;
                return Err(abort(
                    step,
                    500,
                    e.to_string(),
                    json!({ "compensated": compensated }),
                ));
            }
        };
        let outcome = if is_pending(&shipment) {
            StepOutcome::Degraded
        } else {
            StepOutcome::Completed
        };
        tracing::debug!(order_id, step = %step, outcome = ?outcome, "Step completed");
        steps.push(StepRecord { step, outcome });

        Ok(OrderReceipt {
            order_id: order_id.to_string(),
            status: "CREATED",
            timestamp: Utc::now().to_rfc3339(),
            items: check.items,
            payment,
            shipping: shipment,
            degraded: steps.iter().any(|s| s.outcome == StepOutcome::Degraded),
            steps,
        })
    }

    /// Return reserved stock after a terminal failure at or after the
    /// stock update.
    async fn compensate<F>(
        &self,
        inventory: &Pipeline,
        order_id: &str,
        order: &ValidatedOrder,
        call: &F,
        idempotent: bool,
        cancel: &CancellationToken,
    ) -> bool
    where
        F: Fn(&str, &str, Value) -> ServiceCallSpec,
    {
        let restore = json!({ "orderId": order_id, "items": order.items });
        let spec = call(inventory.name(), "/api/inventory/restore", restore).idempotent(idempotent);
        match inventory.execute(&spec, cancel).await {
            Ok(answer) if !is_fallback(&answer) => {
                tracing::info!(order_id, "Inventory restored");
                true
            }
            Ok(_) => {
                tracing::error!(order_id, "Inventory restore served by fallback; stock not returned");
                false
            }
            Err(e) => {
                tracing::error!(order_id, error = %e, "Inventory restore failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackKind, GatewayConfig};
    use crate::orchestration::memory::InMemoryServices;
    use crate::orchestration::store::{InventoryStore, MemoryInventory};
    use crate::pipeline::Transport;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory collaborators with per-path canned answers and a call log.
    struct Scripted {
        services: InMemoryServices,
        overrides: HashMap<&'static str, GatewayResult<Value>>,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, call: &ServiceCallSpec, cancel: CancellationToken) -> GatewayResult<Value> {
            self.log.lock().unwrap().push(call.target.clone());
            match self.overrides.get(call.route()) {
                Some(answer) => answer.clone(),
                None => self.services.send(call, cancel).await,
            }
        }
    }

    struct Fixture {
        engine: OrchestrationEngine,
        store: Arc<MemoryInventory>,
        transport: Arc<Scripted>,
    }

    impl Fixture {
        fn calls_to(&self, target: &str) -> usize {
            self.transport.log.lock().unwrap().iter().filter(|t| *t == target).count()
        }

        fn stock(&self, product_id: &str) -> u32 {
            self.store.get(product_id).unwrap().quantity
        }
    }

    fn fixture_with(config: GatewayConfig, overrides: Vec<(&'static str, GatewayResult<Value>)>) -> Fixture {
        let store = Arc::new(MemoryInventory::new(&config.collaborators.catalog));
        let transport = Arc::new(Scripted {
            services: InMemoryServices::new(store.clone()),
            overrides: overrides.into_iter().collect(),
            log: Mutex::new(Vec::new()),
        });
        let registry = Arc::new(PipelineRegistry::from_config(&config, transport.clone()));
        Fixture {
            engine: OrchestrationEngine::new(registry, config.orchestration.clone()),
            store,
            transport,
        }
    }

    fn fixture(overrides: Vec<(&'static str, GatewayResult<Value>)>) -> Fixture {
        fixture_with(GatewayConfig::default(), overrides)
    }

    fn order(product_id: &str, quantity: i64) -> OrderRequest {
        serde_json::from_value(json!({
            "items": [{"productId": product_id, "quantity": quantity}],
            "payment": {"currency": "USD", "method": "credit_card"},
            "shippingAddress": {"street": "1 Main St", "city": "Springfield"}
        }))
        .unwrap()
    }

    fn outage(target: &str) -> GatewayResult<Value> {
        Err(GatewayError::transport(target, "connection refused"))
    }

    fn abort_of(err: GatewayError) -> (WorkflowStep, u16, Value) {
        match err {
            GatewayError::WorkflowAbort { step, status, details, .. } => (step, status, details),
            other => panic!("expected workflow abort, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_order_decrements_stock() {
        let f = fixture(vec![]);
        let receipt = f.engine.place_order(order("prod-001", 1), None).await.unwrap();

        assert!(receipt.order_id.starts_with("order-"));
        assert_eq!(receipt.status, "CREATED");
        assert!(!receipt.degraded);
        assert_eq!(receipt.payment["status"], "success");
        assert_eq!(receipt.payment["amount"], 1200.0);
        assert_eq!(receipt.shipping["carrier"], "Express Shipping");
        let steps: Vec<WorkflowStep> = receipt.steps.iter().map(|s| s.step).collect();
        assert_eq!(steps, WorkflowStep::SEQUENCE);
        assert_eq!(f.stock("prod-001"), 9);
    }

    #[tokio::test]
    async fn test_unavailable_items_short_circuit() {
        let f = fixture(vec![]);
        let err = f.engine.place_order(order("prod-001", 11), None).await.unwrap_err();

        let (step, status, details) = abort_of(err);
        assert_eq!(step, WorkflowStep::CheckInventory);
        assert_eq!(status, 400);
        assert_eq!(details[0]["productId"], "prod-001");
        assert_eq!(f.calls_to("payment"), 0);
        assert_eq!(f.calls_to("shipping"), 0);
        assert_eq!(f.stock("prod-001"), 10);
    }

    #[tokio::test]
    async fn test_invalid_request_makes_no_calls() {
        let f = fixture(vec![]);
        let request: OrderRequest = serde_json::from_value(json!({"items": []})).unwrap();
        let err = f.engine.place_order(request, None).await.unwrap_err();

        assert!(matches!(err, GatewayError::Validation(_)));
        assert!(f.transport.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_payment_continues_degraded() {
        let f = fixture(vec![("/api/payments", outage("payment"))]);
        let receipt = f.engine.place_order(order("prod-002", 2), None).await.unwrap();

        assert!(receipt.degraded);
        assert_eq!(receipt.payment["status"], "pending");
        assert_eq!(receipt.steps[1].outcome, StepOutcome::Degraded);
        assert_eq!(f.stock("prod-002"), 13);
    }

    #[tokio::test]
    async fn test_declined_payment_aborts_before_mutation() {
        let f = fixture(vec![("/api/payments", Ok(json!({"status": "declined"})))]);
        let err = f.engine.place_order(order("prod-001", 1), None).await.unwrap_err();

        let (step, status, details) = abort_of(err);
        assert_eq!(step, WorkflowStep::ProcessPayment);
        assert_eq!(status, 400);
        assert_eq!(details["status"], "declined");
        assert_eq!(f.stock("prod-001"), 10);
        assert_eq!(f.calls_to("shipping"), 0);
    }

    #[tokio::test]
    async fn test_conflict_at_commit_is_409() {
        let conflict = Err(GatewayError::Downstream {
            target: "inventory".into(),
            status: Some(409),
            message: "Insufficient quantity for product prod-001".into(),
            body: None,
        });
        let f = fixture(vec![("/api/inventory/update", conflict)]);
        let err = f.engine.place_order(order("prod-001", 1), None).await.unwrap_err();

        let (step, status, _) = abort_of(err);
        assert_eq!(step, WorkflowStep::UpdateInventory);
        assert_eq!(status, 409);
        assert_eq!(f.calls_to("shipping"), 0);
    }

    #[tokio::test]
    async fn test_shipping_fallback_keeps_order() {
        let f = fixture(vec![("/api/shipping", outage("shipping"))]);
        let receipt = f.engine.place_order(order("prod-003", 1), None).await.unwrap();

        assert!(receipt.degraded);
        assert_eq!(receipt.shipping["carrier"], "Pending");
        assert_eq!(receipt.steps[3].outcome, StepOutcome::Degraded);
        assert_eq!(f.stock("prod-003"), 19);
    }

    #[tokio::test]
    async fn test_shipment_failure_restores_stock() {
        let mut config = GatewayConfig::default();
        if let Some(shipping) = config.services.get_mut("shipping") {
            shipping.fallback = FallbackKind::None;
        }
        let f = fixture_with(config, vec![("/api/shipping", outage("shipping"))]);
        let err = f.engine.place_order(order("prod-001", 2), None).await.unwrap_err();

        let (step, status, details) = abort_of(err);
        assert_eq!(step, WorkflowStep::CreateShipment);
        assert_eq!(status, 500);
        assert_eq!(details["compensated"], true);
        assert_eq!(f.stock("prod-001"), 10);
    }

    /// Commits the stock update, then answers too late.
    struct SlowCommit {
        services: InMemoryServices,
        updates: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Transport for SlowCommit {
        async fn send(&self, call: &ServiceCallSpec, cancel: CancellationToken) -> GatewayResult<Value> {
            let answer = self.services.send(call, cancel).await;
            if call.route() == "/api/inventory/update" {
                self.updates.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            answer
        }
    }

    fn slow_commit(config: OrchestrationConfig) -> (OrchestrationEngine, Arc<MemoryInventory>, Arc<SlowCommit>) {
        let gateway = GatewayConfig::default();
        let store = Arc::new(MemoryInventory::new(&gateway.collaborators.catalog));
        let transport = Arc::new(SlowCommit {
            services: InMemoryServices::new(store.clone()),
            updates: Default::default(),
        });
        let registry = Arc::new(PipelineRegistry::from_config(&gateway, transport.clone()));
        (OrchestrationEngine::new(registry, config), store, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_update_is_not_retried_and_is_restored() {
        let (engine, store, transport) = slow_commit(OrchestrationConfig::default());
        let err = engine.place_order(order("prod-001", 1), None).await.unwrap_err();

        let (step, status, details) = abort_of(err);
        assert_eq!(step, WorkflowStep::UpdateInventory);
        assert_eq!(status, 500);
        assert_eq!(details["compensated"], true);
        assert_eq!(transport.updates.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.get("prod-001").unwrap().quantity, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deduplicated_updates_may_be_retried() {
        let config = OrchestrationConfig {
            idempotent_updates: true,
            ..Default::default()
        };
        let (engine, store, transport) = slow_commit(config);
        let err = engine.place_order(order("prod-001", 1), None).await.unwrap_err();

        let (step, _, details) = abort_of(err);
        assert_eq!(step, WorkflowStep::UpdateInventory);
        assert_eq!(details["compensated"], true);
        assert_eq!(transport.updates.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(store.get("prod-001").unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn test_update_outage_without_compensation_aborts() {
        let mut config = GatewayConfig::default();
        config.orchestration.compensate_on_failure = false;
        let f = fixture_with(config, vec![("/api/inventory/update", outage("inventory"))]);
        let err = f.engine.place_order(order("prod-001", 1), None).await.unwrap_err();

        let (step, status, details) = abort_of(err);
        assert_eq!(step, WorkflowStep::UpdateInventory);
        assert_eq!(status, 500);
        assert_eq!(details["compensated"], false);
        assert_eq!(f.calls_to("shipping"), 0);
    }

    #[tokio::test]
    async fn test_compensation_can_be_disabled() {
        let mut config = GatewayConfig::default();
        config.orchestration.compensate_on_failure = false;
        if let Some(shipping) = config.services.get_mut("shipping") {
            shipping.fallback = FallbackKind::None;
        }
        let f = fixture_with(config, vec![("/api/shipping", outage("shipping"))]);
        let err = f.engine.place_order(order("prod-001", 2), None).await.unwrap_err();

        let (_, _, details) = abort_of(err);
        assert_eq!(details["compensated"], false);
        assert_eq!(f.stock("prod-001"), 8);
    }
}
