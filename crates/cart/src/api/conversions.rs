//! Conversions from wire types into `techshelf-core` domain types.
//!
//! Every cart payload is normalized here, so callers never branch on which
//! item shape the backend happened to send.

use rust_decimal::Decimal;

use techshelf_core::{Cart, CartId, CartLine, ProductId, ProductSnapshot, Quantity};

use super::types::{EnrichedItem, MinimalItem, ServerCart, ServerCartItem, ServerProduct};

/// Unit price derived from a line total: `total_price / quantity`.
fn unit_from_total(total_price: Option<Decimal>, quantity: Quantity) -> Option<Decimal> {
    total_price.and_then(|total| total.checked_div(Decimal::from(quantity.get())))
}

/// Convert a product record into a snapshot.
///
/// Missing names fall back to the placeholder name for `product_id`.
pub fn convert_product(
    product: ServerProduct,
    product_id: &ProductId,
    fallback_price: Decimal,
) -> ProductSnapshot {
    ProductSnapshot {
        name: product
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| product_id.placeholder_name()),
        image: product.image.filter(|image| !image.is_empty()),
        stock: product.stock,
        price: product.price.unwrap_or(fallback_price),
    }
}

fn convert_enriched_item(item: EnrichedItem) -> CartLine {
    let unit_price = item
        .price
        .or(item.product.price)
        .or_else(|| unit_from_total(item.total_price, item.quantity))
        .unwrap_or_default();
    let product = convert_product(item.product, &item.product_id, unit_price);

    CartLine {
        product_id: item.product_id,
        quantity: item.quantity,
        unit_price,
        product,
        total_price: item.total_price,
    }
}

fn convert_minimal_item(item: MinimalItem) -> CartLine {
    let unit_price = item
        .price
        .or_else(|| unit_from_total(item.total_price, item.quantity))
        .unwrap_or_default();
    let name = item
        .product_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| item.product_id.placeholder_name());

    CartLine {
        product: ProductSnapshot {
            name,
            image: None,
            stock: None,
            price: unit_price,
        },
        product_id: item.product_id,
        quantity: item.quantity,
        unit_price,
        total_price: item.total_price,
    }
}

/// Normalize one cart item.
pub fn convert_item(item: ServerCartItem) -> CartLine {
    match item {
        ServerCartItem::Enriched(item) => convert_enriched_item(item),
        ServerCartItem::Minimal(item) => convert_minimal_item(item),
    }
}

/// Normalize a cart payload.
///
/// Server-computed totals are used as sent; any that are missing are
/// derived so that `total == subtotal - discount + tax + shipping_cost`.
pub fn convert_cart(cart: ServerCart) -> Cart {
    let lines: Vec<CartLine> = cart.items.into_iter().map(convert_item).collect();

    let subtotal = cart.subtotal.unwrap_or_else(|| {
        lines
            .iter()
            .map(|line| line.total_price.unwrap_or_else(|| line.line_total()))
            .sum()
    });
    let discount = cart.discount.unwrap_or_default();
    let tax = cart.tax.unwrap_or_default();
    let shipping_cost = cart.shipping_cost.unwrap_or_default();
    let total = cart
        .total
        .unwrap_or(subtotal - discount + tax + shipping_cost);

    Cart {
        cart_id: cart.cart_id.map(CartId::new),
        lines,
        subtotal,
        discount,
        tax,
        shipping_cost,
        total,
        updated_at: cart.updated_at,
    }
}
