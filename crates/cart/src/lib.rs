//! TechShelf cart client.
//!
//! Keeps a shopper's cart consistent across guest and authenticated
//! sessions:
//!
//! - [`api`] - REST client for the TechShelf backend
//! - [`storage`] - local persistence for guest carts
//! - [`manager`] - [`CartStateManager`], the single owner of cart state
//! - [`config`] - environment-driven configuration

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod config;
pub mod error;
pub mod manager;
pub mod storage;

pub use api::{ApiClient, ApiError, CartBackend};
pub use config::{ApiConfig, CartClientConfig, ConfigError, ManagerConfig};
pub use error::{CartError, Result};
pub use manager::{CartState, CartStateManager, MergeReport};
pub use storage::{FileStore, GuestCartRepository, KeyValueStore, MemoryStore, StorageError};
