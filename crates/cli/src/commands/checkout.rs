//! Promotion and checkout commands.
//!
//! Both need an authenticated session (`TECHSHELF_ACCESS_TOKEN`).

use clap::Args;
use secrecy::SecretString;
use tracing::info;

use techshelf_cart::CartClientConfig;
use techshelf_cart::api::types::{CheckoutDetails, PaymentInfo, ShippingDetails};
use techshelf_core::Price;

use super::{connect, load, print_cart};

/// Shipping and payment details for `techshelf checkout`.
#[derive(Debug, Args)]
pub struct CheckoutArgs {
    /// Street address
    #[arg(long)]
    address: String,

    /// City
    #[arg(long)]
    city: String,

    /// Country
    #[arg(long)]
    country: String,

    /// Postal code
    #[arg(long)]
    postal_code: String,

    /// Store the card for future orders
    #[arg(long)]
    save_card: bool,

    /// Pay with the card saved on the account
    #[arg(long, conflicts_with_all = ["card_number", "expiry", "cvv", "name_on_card"])]
    use_saved_card: bool,

    /// Card number
    #[arg(long)]
    card_number: Option<String>,

    /// Card expiry (MM/YY)
    #[arg(long)]
    expiry: Option<String>,

    /// Card security code
    #[arg(long)]
    cvv: Option<String>,

    /// Name printed on the card
    #[arg(long)]
    name_on_card: Option<String>,
}

impl CheckoutArgs {
    fn into_details(self) -> CheckoutDetails {
        let card_given = self.card_number.is_some()
            || self.expiry.is_some()
            || self.cvv.is_some()
            || self.name_on_card.is_some();

        let payment_info = card_given.then(|| PaymentInfo {
            card_number: SecretString::from(self.card_number.unwrap_or_default()),
            expiry_date: self.expiry.unwrap_or_default(),
            cvv: SecretString::from(self.cvv.unwrap_or_default()),
            name_on_card: self.name_on_card.unwrap_or_default(),
        });

        CheckoutDetails {
            shipping: ShippingDetails {
                shipping_address: self.address,
                city: self.city,
                country: self.country,
                postal_code: self.postal_code,
            },
            payment_info,
            use_saved_card: self.use_saved_card,
            save_card: self.save_card,
        }
    }
}

/// Apply a discount code and print the discounted cart.
///
/// # Errors
///
/// Returns an error for guest sessions or if the code is rejected.
pub async fn apply_promotion(
    config: &CartClientConfig,
    code: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = connect(config)?;
    let promotion = manager.apply_promotion(code).await?;

    match promotion.discount_percentage {
        Some(percentage) => info!(
            code = %promotion.discount_code,
            %percentage,
            "Promotion applied"
        ),
        None => info!(code = %promotion.discount_code, "Promotion applied"),
    }
    print_cart(&manager.cart());
    Ok(())
}

/// Place an order for the current cart.
///
/// # Errors
///
/// Returns an error for guest sessions, incomplete details, or a failed
/// checkout.
#[allow(clippy::print_stdout)]
pub async fn checkout(
    config: &CartClientConfig,
    args: CheckoutArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = connect(config)?;
    let cart = load(&manager).await;
    print_cart(&cart);

    let order = manager.checkout(&args.into_details()).await?;

    match order.total_amount {
        Some(total) => println!("Order {} placed, total {}", order.order_id, Price::usd(total)),
        None => println!("Order {} placed", order.order_id),
    }
    if let Some(status) = &order.payment_status {
        info!(order_id = %order.order_id, payment_status = %status, "Payment processed");
    }
    Ok(())
}
