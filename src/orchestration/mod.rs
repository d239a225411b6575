//! Order orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! POST /api/orders
//!     → types.rs (OrderRequest validation)
//!     → engine.rs (four-step saga over pipelines)
//!     → OrderReceipt or WorkflowAbort
//!
//! in_memory collaborators:
//!     Transport → memory.rs → store.rs (InventoryStore)
//! ```

pub mod engine;
pub mod memory;
pub mod store;
pub mod types;

pub use engine::OrchestrationEngine;
pub use memory::InMemoryServices;
pub use store::{InventoryStore, MemoryInventory};
pub use types::{OrderReceipt, OrderRequest, WorkflowStep};
