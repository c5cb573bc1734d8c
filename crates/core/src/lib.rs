//! TechShelf Core - Shared types library.
//!
//! This crate provides the types shared across TechShelf components:
//! - `cart` - Cart state manager and backend client
//! - `cli` - Command-line cart driver
//!
//! # Architecture
//!
//! The core crate contains only types and pure cart arithmetic - no I/O, no
//! HTTP clients, no storage. This keeps it lightweight and allows it to be
//! used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, quantities, prices, carts and session mode

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
