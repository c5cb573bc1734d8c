//! Wire types for the TechShelf REST API.
//!
//! These mirror the JSON the backend sends and receives. They are kept
//! separate from the domain types in `techshelf-core`; the `conversions`
//! module normalizes them at the boundary.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use techshelf_core::{OrderId, ProductId, PromotionId, Quantity};

// =============================================================================
// Products
// =============================================================================

/// Product record from `GET /products/{id}/` or embedded in a cart item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProduct {
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stock: Option<u32>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub store_name: Option<String>,
}

// =============================================================================
// Cart
// =============================================================================

/// Cart item carrying an embedded product record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnrichedItem {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub product: ServerProduct,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub total_price: Option<Decimal>,
}

/// Cart item with only a product name (the serializer's flat shape).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MinimalItem {
    pub product_id: ProductId,
    pub quantity: Quantity,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub total_price: Option<Decimal>,
}

/// A cart item in either of the shapes the backend produces.
///
/// Untagged: an item with a non-null `product` object is `Enriched`,
/// anything else falls through to `Minimal`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServerCartItem {
    Enriched(EnrichedItem),
    Minimal(MinimalItem),
}

impl ServerCartItem {
    /// Product this item refers to.
    #[must_use]
    pub const fn product_id(&self) -> &ProductId {
        match self {
            Self::Enriched(item) => &item.product_id,
            Self::Minimal(item) => &item.product_id,
        }
    }
}

/// Cart payload returned by the cart endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerCart {
    #[serde(default, deserialize_with = "string_or_number")]
    pub cart_id: Option<String>,
    #[serde(default, deserialize_with = "items_or_empty")]
    pub items: Vec<ServerCartItem>,
    #[serde(default)]
    pub subtotal: Option<Decimal>,
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub tax: Option<Decimal>,
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub total: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body of `POST /orders/cart/add/`.
#[derive(Debug, Clone, Serialize)]
pub struct AddItemRequest<'a> {
    pub product_id: &'a ProductId,
    pub quantity: u32,
}

/// Body of `PUT /orders/cart/update/{id}/`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

// =============================================================================
// Promotions
// =============================================================================

/// Body of `POST /orders/promotions/apply/`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyPromotionRequest<'a> {
    pub discount_code: &'a str,
}

/// Promotion record returned when a code is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    #[serde(default, deserialize_with = "string_or_number")]
    pub promotion_id: Option<String>,
    pub discount_code: String,
    #[serde(default)]
    pub discount_percentage: Option<Decimal>,
    #[serde(default)]
    pub expiry_date: Option<String>,
}

impl Promotion {
    /// Typed promotion ID, when present.
    #[must_use]
    pub fn id(&self) -> Option<PromotionId> {
        self.promotion_id.clone().map(PromotionId::new)
    }
}

// =============================================================================
// Checkout
// =============================================================================

/// Shipping destination for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub shipping_address: String,
    pub city: String,
    pub country: String,
    pub postal_code: String,
}

impl ShippingDetails {
    /// Whether every field is filled in.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        [
            &self.shipping_address,
            &self.city,
            &self.country,
            &self.postal_code,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }
}

/// Card details entered at checkout.
///
/// Implements `Debug` manually to redact card data.
#[derive(Clone)]
pub struct PaymentInfo {
    pub card_number: SecretString,
    pub expiry_date: String,
    pub cvv: SecretString,
    pub name_on_card: String,
}

impl std::fmt::Debug for PaymentInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentInfo")
            .field("card_number", &"[REDACTED]")
            .field("expiry_date", &self.expiry_date)
            .field("cvv", &"[REDACTED]")
            .field("name_on_card", &self.name_on_card)
            .finish()
    }
}

impl PaymentInfo {
    /// Whether every field is filled in.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.card_number.expose_secret().trim().is_empty()
            && !self.expiry_date.trim().is_empty()
            && !self.cvv.expose_secret().trim().is_empty()
            && !self.name_on_card.trim().is_empty()
    }
}

impl Serialize for PaymentInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            card_number: &'a str,
            expiry_date: &'a str,
            cvv: &'a str,
            name_on_card: &'a str,
        }

        Wire {
            card_number: self.card_number.expose_secret(),
            expiry_date: &self.expiry_date,
            cvv: self.cvv.expose_secret(),
            name_on_card: &self.name_on_card,
        }
        .serialize(serializer)
    }
}

/// Everything the checkout endpoint needs.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutDetails {
    #[serde(flatten)]
    pub shipping: ShippingDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_info: Option<PaymentInfo>,
    pub use_saved_card: bool,
    pub save_card: bool,
}

/// Line of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Order created by a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(deserialize_with = "order_id")]
    pub order_id: OrderId,
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub tax_rate: Option<Decimal>,
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub order_status: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

// =============================================================================
// Errors
// =============================================================================

/// Error body the backend sends on failure (`{"error": "..."}`).
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: Option<String>,
    pub detail: Option<String>,
}

impl ErrorBody {
    /// The most specific message available.
    #[must_use]
    pub fn message(self) -> Option<String> {
        self.error.or(self.detail)
    }
}

// =============================================================================
// Deserialization helpers
// =============================================================================

/// Accept `"12"`, `12` or `null` for identifiers.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number identifier, got {other}"
        ))),
    }
}

/// Order IDs arrive as strings or numbers; either way one is required.
fn order_id<'de, D>(deserializer: D) -> Result<OrderId, D::Error>
where
    D: Deserializer<'de>,
{
    string_or_number(deserializer)?
        .map(OrderId::new)
        .ok_or_else(|| D::Error::custom("missing order_id"))
}

/// A missing or non-array `items` field is an empty cart. Items that do not
/// parse (a zero quantity, a missing product ID) are skipped.
fn items_or_empty<'de, D>(deserializer: D) -> Result<Vec<ServerCartItem>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Array(items)) => Ok(items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable cart item");
                    None
                }
            })
            .collect()),
        _ => Ok(Vec::new()),
    }
}

/// Parse RFC 3339 or naive (assumed UTC) timestamps; anything else is `None`.
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    Ok(NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc()))
}
