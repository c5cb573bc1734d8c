//! Cart domain types.
//!
//! These are the canonical shapes the rest of the workspace works with.
//! Whatever the backend sends is normalized into [`Cart`] / [`CartLine`]
//! at the API boundary; guest carts are persisted in this same shape.
//!
//! # Totals
//!
//! - Guest carts: `total == subtotal`, and discount, tax and shipping are zero.
//! - Server carts: `total == subtotal - discount + tax + shipping_cost`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{CartId, ProductId};
use super::quantity::Quantity;

/// Stock assumed for a product whose details could not be fetched.
pub const PLACEHOLDER_STOCK: u32 = 10;

/// Product details captured alongside a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    /// Display name.
    pub name: String,
    /// Absolute image URL.
    #[serde(default)]
    pub image: Option<String>,
    /// Units in stock when the snapshot was taken.
    #[serde(default)]
    pub stock: Option<u32>,
    /// Unit price when the snapshot was taken.
    #[serde(default)]
    pub price: Decimal,
}

impl ProductSnapshot {
    /// Snapshot for a product whose details are unavailable.
    #[must_use]
    pub fn placeholder(product_id: &ProductId, price: Decimal) -> Self {
        Self {
            name: product_id.placeholder_name(),
            image: None,
            stock: Some(PLACEHOLDER_STOCK),
            price,
        }
    }

    /// Whether the snapshot carries enough data to render without a
    /// product-detail fetch.
    #[must_use]
    pub const fn is_enriched(&self) -> bool {
        self.image.is_some()
    }

    /// Fill this snapshot from previously known details.
    ///
    /// Known values take precedence; the server's stub values only survive
    /// where nothing was known.
    pub fn merge_known(&mut self, known: &Self) {
        if !known.name.is_empty() {
            self.name.clone_from(&known.name);
        }
        if known.image.is_some() {
            self.image.clone_from(&known.image);
        }
        if known.stock.is_some() {
            self.stock = known.stock;
        }
        if !known.price.is_zero() {
            self.price = known.price;
        }
    }
}

/// A single product line in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Product in this line.
    pub product_id: ProductId,
    /// Number of units, at least one.
    pub quantity: Quantity,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Product details for display.
    pub product: ProductSnapshot,
    /// Server-computed line total, when the server supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price: Option<Decimal>,
}

impl CartLine {
    /// Create a line priced from a product snapshot.
    #[must_use]
    pub fn new(product_id: ProductId, quantity: Quantity, product: ProductSnapshot) -> Self {
        Self {
            product_id,
            quantity,
            unit_price: product.price,
            product,
            total_price: None,
        }
    }

    /// `unit_price × quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity.get())
    }

    /// Change the quantity, keeping a server-supplied `total_price` in step.
    pub fn set_quantity(&mut self, quantity: Quantity) {
        self.quantity = quantity;
        if self.total_price.is_some() {
            self.total_price = Some(self.line_total().round_dp(2));
        }
    }
}

/// A shopping cart.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cart {
    /// Server cart ID (absent for guest carts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_id: Option<CartId>,
    /// Lines in insertion order.
    #[serde(rename = "items", default)]
    pub lines: Vec<CartLine>,
    /// Sum of line totals.
    #[serde(default)]
    pub subtotal: Decimal,
    /// Promotion discount.
    #[serde(default)]
    pub discount: Decimal,
    /// Tax.
    #[serde(default)]
    pub tax: Decimal,
    /// Shipping.
    #[serde(default)]
    pub shipping_cost: Decimal,
    /// Amount due.
    #[serde(default)]
    pub total: Decimal,
    /// Last server-side modification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.lines.len()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.lines
            .iter()
            .map(|line| u64::from(line.quantity.get()))
            .sum()
    }

    /// Find the line for a product.
    #[must_use]
    pub fn line(&self, product_id: &ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| &line.product_id == product_id)
    }

    fn line_mut(&mut self, product_id: &ProductId) -> Option<&mut CartLine> {
        self.lines
            .iter_mut()
            .find(|line| &line.product_id == product_id)
    }

    /// `Σ unit_price × quantity` over all lines.
    #[must_use]
    pub fn computed_subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Add a line, or increase the quantity of the existing line for the
    /// same product. The existing line takes the fresher product details.
    pub fn add_or_increment(&mut self, line: CartLine) {
        match self.line_mut(&line.product_id) {
            Some(existing) => {
                let quantity = existing.quantity.saturating_add(line.quantity);
                existing.unit_price = line.unit_price;
                existing.product = line.product;
                existing.set_quantity(quantity);
            }
            None => self.lines.push(line),
        }
    }

    /// Remove the line for a product. Returns whether a line was removed.
    pub fn remove_line(&mut self, product_id: &ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| &line.product_id != product_id);
        self.lines.len() != before
    }

    /// Set the quantity of an existing line. Returns whether the line exists.
    pub fn set_quantity(&mut self, product_id: &ProductId, quantity: Quantity) -> bool {
        self.line_mut(product_id).is_some_and(|line| {
            line.set_quantity(quantity);
            true
        })
    }

    /// Recompute totals for a guest cart (no discount, tax or shipping).
    pub fn recompute_guest_totals(&mut self) {
        self.subtotal = self.computed_subtotal();
        self.discount = Decimal::ZERO;
        self.tax = Decimal::ZERO;
        self.shipping_cost = Decimal::ZERO;
        self.total = self.subtotal;
    }

    /// `subtotal - discount + tax + shipping_cost`.
    #[must_use]
    pub fn expected_total(&self) -> Decimal {
        self.subtotal - self.discount + self.tax + self.shipping_cost
    }
}
