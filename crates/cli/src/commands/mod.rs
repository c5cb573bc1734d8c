//! Command implementations.
//!
//! Every command builds a [`Manager`] from the environment, loads the cart
//! for the configured session and runs one manager operation.

pub mod cart;
pub mod checkout;

use std::sync::Arc;

use tracing::warn;

use techshelf_cart::{
    ApiClient, ApiError, CartClientConfig, CartStateManager, FileStore, GuestCartRepository,
};
use techshelf_core::{Cart, Price, SessionMode};

/// The manager every command drives.
pub type Manager = CartStateManager<ApiClient>;

/// Build a manager for the configured session.
///
/// The session is authenticated when an access token is configured.
///
/// # Errors
///
/// Returns `ApiError` if the HTTP client cannot be built.
pub fn connect(config: &CartClientConfig) -> Result<Manager, ApiError> {
    let client = ApiClient::new(&config.api)?;
    let mode = SessionMode::from_authenticated(client.has_access_token());
    Ok(connect_as(client, config, mode))
}

/// Build a manager starting in `mode` regardless of the configured token.
pub fn connect_as(client: ApiClient, config: &CartClientConfig, mode: SessionMode) -> Manager {
    let store = Arc::new(FileStore::new(&config.storage_dir));
    CartStateManager::new(client, GuestCartRepository::new(store), config.manager, mode)
}

/// Load the cart, reporting a degraded load.
pub async fn load(manager: &Manager) -> Cart {
    let cart = manager.load().await;
    if let Some(error) = manager.error() {
        warn!("{error}");
    }
    cart
}

/// Print a cart as a table followed by its totals.
#[allow(clippy::print_stdout)]
pub fn print_cart(cart: &Cart) {
    if cart.is_empty() {
        println!("Your cart is empty");
        return;
    }

    for line in &cart.lines {
        let total = line.total_price.unwrap_or_else(|| line.line_total());
        println!(
            "{:<16} {:<32} {:>4} x {:>10} = {:>10}",
            line.product_id,
            line.product.name,
            line.quantity,
            Price::usd(line.unit_price),
            Price::usd(total)
        );
    }

    println!("{:>58} {:>12}", "Subtotal", Price::usd(cart.subtotal));
    if !cart.discount.is_zero() {
        println!("{:>58} {:>12}", "Discount", Price::usd(-cart.discount));
    }
    if !cart.tax.is_zero() {
        println!("{:>58} {:>12}", "Tax", Price::usd(cart.tax));
    }
    if !cart.shipping_cost.is_zero() {
        println!("{:>58} {:>12}", "Shipping", Price::usd(cart.shipping_cost));
    }
    println!("{:>58} {:>12}", "Total", Price::usd(cart.total));
}
