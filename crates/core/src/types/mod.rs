//! Core types for TechShelf.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod id;
pub mod price;
pub mod quantity;
pub mod session;

pub use cart::{Cart, CartLine, PLACEHOLDER_STOCK, ProductSnapshot};
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use quantity::Quantity;
pub use session::SessionMode;
