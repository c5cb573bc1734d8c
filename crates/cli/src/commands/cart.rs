//! Cart commands.
//!
//! # Usage
//!
//! ```bash
//! techshelf cart show
//! techshelf cart add prod_42 -q 2
//! techshelf cart remove prod_42
//! techshelf cart update prod_42 3
//! techshelf cart clear
//! techshelf merge
//! ```
//!
//! # Environment Variables
//!
//! - `TECHSHELF_ACCESS_TOKEN` - Bearer token; without it the guest cart in
//!   `TECHSHELF_STORAGE_DIR` is used

use tracing::{info, warn};

use techshelf_cart::{ApiClient, CartClientConfig, CartError};
use techshelf_core::{ProductId, Quantity, SessionMode};

use super::{connect, connect_as, load, print_cart};

/// Print the current cart.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub async fn show(config: &CartClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manager = connect(config)?;
    let cart = load(&manager).await;
    print_cart(&cart);
    Ok(())
}

/// Add units of a product.
///
/// # Errors
///
/// Returns an error if the quantity is zero or the add fails.
pub async fn add(
    config: &CartClientConfig,
    product_id: &str,
    quantity: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let quantity = Quantity::new(i64::from(quantity))
        .ok_or_else(|| CartError::Validation("Quantity must be at least 1".to_string()))?;

    let manager = connect(config)?;
    load(&manager).await;

    let product_id = ProductId::new(product_id);
    let cart = manager.add_line(&product_id, quantity).await?;
    info!(product_id = %product_id, quantity = %quantity, "Added to cart");
    print_cart(&cart);
    Ok(())
}

/// Remove a product's line.
///
/// # Errors
///
/// Returns an error if the removal fails.
pub async fn remove(
    config: &CartClientConfig,
    product_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = connect(config)?;
    load(&manager).await;

    let cart = manager.remove_line(&ProductId::new(product_id)).await?;
    print_cart(&cart);
    Ok(())
}

/// Set a product's quantity; zero or less removes the line.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn update(
    config: &CartClientConfig,
    product_id: &str,
    quantity: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = connect(config)?;
    load(&manager).await;

    let cart = manager
        .update_quantity(&ProductId::new(product_id), quantity)
        .await?;
    print_cart(&cart);
    Ok(())
}

/// Remove every line.
///
/// Guest carts are deleted from storage; server carts are emptied one line
/// at a time.
///
/// # Errors
///
/// Returns an error if storage or any removal fails.
pub async fn clear(config: &CartClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manager = connect(config)?;
    let cart = load(&manager).await;

    match manager.mode() {
        SessionMode::Guest => manager.clear_guest_cart()?,
        SessionMode::Authenticated => {
            for line in &cart.lines {
                manager.remove_line(&line.product_id).await?;
            }
        }
    }

    info!(lines = cart.item_count(), "Cart cleared");
    print_cart(&manager.cart());
    Ok(())
}

/// Merge the saved guest cart into the server cart.
///
/// Runs the login transition: the guest cart is loaded, every line is sent
/// to the server, and the guest cart is deleted.
///
/// # Errors
///
/// Returns an error if no access token is configured.
pub async fn merge(config: &CartClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = ApiClient::new(&config.api)?;
    if !client.has_access_token() {
        return Err(CartError::login_required("merge the guest cart").into());
    }

    let manager = connect_as(client, config, SessionMode::Guest);
    load(&manager).await;

    let report = manager.on_login().await;
    info!(
        merged = report.merged.len(),
        failed = report.failed.len(),
        "Guest cart merged"
    );
    for product_id in &report.failed {
        warn!(product_id = %product_id, "Line could not be merged and was dropped");
    }

    print_cart(&manager.cart());
    Ok(())
}
