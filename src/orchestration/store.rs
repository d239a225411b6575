//! Inventory state store.
//!
//! Stock changes go through [`InventoryStore::reserve`], a single
//! compare-and-decrement over all lines of an order. Two concurrent orders
//! for the last unit cannot both succeed.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;

use crate::config::schema::DEFAULT_RETENTION;
use crate::config::CatalogItem;
use crate::orchestration::types::{CheckedItem, InventoryCheck, OrderItem};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

impl From<&CatalogItem> for Product {
    fn from(item: &CatalogItem) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            quantity: item.quantity,
            price: item.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustedItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub new_quantity: u32,
}

/// Outcome of a reservation or restore.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustment {
    pub order_id: String,
    pub items: Vec<AdjustedItem>,
    /// True when this answer is a replay of an earlier identical request.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Product {0} not found")]
    ProductNotFound(String),

    #[error("Insufficient quantity for product {product_id}: requested {requested}, in stock {in_stock}")]
    Insufficient {
        product_id: String,
        requested: u32,
        in_stock: u32,
    },

    #[error("No reservation for order {0}")]
    UnknownOrder(String),
}

/// Get, check and mutate operations over stock.
pub trait InventoryStore: Send + Sync {
    fn list(&self) -> Vec<Product>;

    fn get(&self, product_id: &str) -> Option<Product>;

    fn check(&self, items: &[OrderItem]) -> InventoryCheck;

    /// Decrement every line or none. Replays for the same order return the first result.
    fn reserve(&self, order_id: &str, items: &[OrderItem]) -> Result<StockAdjustment, StoreError>;

    /// Put back what `reserve` took for `order_id`. Idempotent.
    fn restore(&self, order_id: &str) -> Result<StockAdjustment, StoreError>;
}

#[derive(Debug, Clone)]
struct Reservation {
    reserved: StockAdjustment,
    restored: Option<StockAdjustment>,
}

#[derive(Debug, Default)]
struct InventoryState {
    products: BTreeMap<String, Product>,
    reservations: HashMap<String, Reservation>,
    /// Reservation order ids, oldest first.
    order_log: VecDeque<String>,
    /// 0 keeps every reservation.
    retention: usize,
}

impl InventoryState {
    fn remember(&mut self, order_id: &str) {
        self.order_log.push_back(order_id.to_string());
        while self.retention > 0 && self.order_log.len() > self.retention {
            if let Some(oldest) = self.order_log.pop_front() {
                self.reservations.remove(&oldest);
            }
        }
    }
}

/// Process-local store guarded by one lock.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    state: Mutex<InventoryState>,
}

impl MemoryInventory {
    pub fn new(catalog: &[CatalogItem]) -> Self {
        Self::with_retention(catalog, DEFAULT_RETENTION)
    }

    /// Keep at most `retention` reservations; older ones can no longer be
    /// replayed or restored.
    pub fn with_retention(catalog: &[CatalogItem], retention: usize) -> Self {
        let products = catalog.iter().map(|c| (c.id.clone(), Product::from(c))).collect();
        Self {
            state: Mutex::new(InventoryState {
                products,
                retention,
                ..Default::default()
            }),
        }
    }

    pub fn reservation_count(&self) -> usize {
        self.lock().reservations.len()
    }

    fn lock(&self) -> MutexGuard<'_, InventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InventoryStore for MemoryInventory {
    fn list(&self) -> Vec<Product> {
        self.lock().products.values().cloned().collect()
    }

    fn get(&self, product_id: &str) -> Option<Product> {
        self.lock().products.get(product_id).cloned()
    }

    fn check(&self, items: &[OrderItem]) -> InventoryCheck {
        let state = self.lock();
        let items: Vec<CheckedItem> = items
            .iter()
            .map(|item| match state.products.get(&item.product_id) {
                Some(product) => CheckedItem {
                    product_id: item.product_id.clone(),
                    available: product.quantity >= item.quantity,
                    name: Some(product.name.clone()),
                    requested: Some(item.quantity),
                    in_stock: Some(product.quantity),
                    price: Some(product.price),
                    message: None,
                },
                None => CheckedItem {
                    product_id: item.product_id.clone(),
                    available: false,
                    name: None,
                    requested: Some(item.quantity),
                    in_stock: None,
                    price: None,
                    message: Some("Product not found".into()),
                },
            })
            .collect();

        InventoryCheck {
            available: items.iter().all(|i| i.available),
            items,
        }
    }

    fn reserve(&self, order_id: &str, items: &[OrderItem]) -> Result<StockAdjustment, StoreError> {
        let mut state = self.lock();
        if let Some(existing) = state.reservations.get(order_id) {
            return Ok(StockAdjustment {
                replayed: true,
                ..existing.reserved.clone()
            });
        }

        // Totals per product so repeated lines are validated together.
        let mut wanted: BTreeMap<&str, u32> = BTreeMap::new();
        for item in items {
            *wanted.entry(item.product_id.as_str()).or_default() += item.quantity;
        }
        for (product_id, requested) in &wanted {
            let product = state
                .products
                .get(*product_id)
                .ok_or_else(|| StoreError::ProductNotFound(product_id.to_string()))?;
            if product.quantity < *requested {
                return Err(StoreError::Insufficient {
                    product_id: product_id.to_string(),
                    requested: *requested,
                    in_stock: product.quantity,
                });
            }
        }

        let mut adjusted = Vec::with_capacity(items.len());
        for item in items {
            if let Some(product) = state.products.get_mut(&item.product_id) {
                product.quantity -= item.quantity;
                adjusted.push(AdjustedItem {
                    product_id: item.product_id.clone(),
                    name: product.name.clone(),
                    quantity: item.quantity,
                    new_quantity: product.quantity,
                });
            }
        }

        let reserved = StockAdjustment {
            order_id: order_id.to_string(),
            items: adjusted,
            replayed: false,
        };
        state.reservations.insert(
            order_id.to_string(),
            Reservation {
                reserved: reserved.clone(),
                restored: None,
            },
        );
        state.remember(order_id);
        Ok(reserved)
    }

    fn restore(&self, order_id: &str) -> Result<StockAdjustment, StoreError> {
        let mut state = self.lock();
        let reservation = state
            .reservations
            .get(order_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownOrder(order_id.to_string()))?;
        if let Some(restored) = reservation.restored {
            return Ok(StockAdjustment { replayed: true, ..restored });
        }

        let mut adjusted = Vec::with_capacity(reservation.reserved.items.len());
        for item in &reservation.reserved.items {
            if let Some(product) = state.products.get_mut(&item.product_id) {
                product.quantity += item.quantity;
                adjusted.push(AdjustedItem {
                    new_quantity: product.quantity,
                    ..item.clone()
                });
            }
        }

        let restored = StockAdjustment {
            order_id: order_id.to_string(),
            items: adjusted,
            replayed: false,
        };
        if let Some(entry) = state.reservations.get_mut(order_id) {
            entry.restored = Some(restored.clone());
        }
        Ok(restored)
    }
}
