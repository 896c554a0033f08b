//! # Repository Module
//!
//! The queue store needs exactly one shape of access: opaque bytes by key.
//!
//! ```text
//! SyncEngine queue mutation
//!      │
//!      │  db.kv().set("pendingOperations", bytes)
//!      ▼
//! KvRepository
//! ├── get(&self, key)
//! ├── set(&self, key, value)
//! ├── remove(&self, key)
//! └── keys(&self)
//!      │
//!      ▼
//! queue_store table
//! ```

pub mod kv;
