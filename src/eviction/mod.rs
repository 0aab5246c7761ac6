//! Victim selection for quota enforcement.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  lru.rs   - Liveness-gated LRU selection                     │
//! │  └─ LruPolicy: candidates → oldest-first victims             │
//! │  └─ EvictionRequest: need + requester/group/exclusions       │
//! │  └─ EvictionPlan: victims + ordered fallback                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Selection is pure: it reads a ledger and returns a plan. Deleting the
//! victims' data and removing their records is done by the
//! [`QuotaManager`](crate::QuotaManager) while it holds the ledger lock.

pub mod lru;

pub use lru::{EvictionCandidate, EvictionPlan, EvictionRequest, LruPolicy, Shortfall};
