//! TechShelf CLI - drive the cart from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart (guest cart unless TECHSHELF_ACCESS_TOKEN is set)
//! techshelf cart show
//!
//! # Add two units of a product
//! techshelf cart add prod_42 -q 2
//!
//! # Set a quantity (0 removes the line)
//! techshelf cart update prod_42 5
//!
//! # Apply a discount code (requires a token)
//! techshelf promo apply SAVE10
//!
//! # Merge the saved guest cart into the server cart after logging in
//! TECHSHELF_ACCESS_TOKEN=... techshelf merge
//! ```
//!
//! # Commands
//!
//! - `cart` - Show and edit the cart
//! - `promo apply` - Apply a promotion code
//! - `checkout` - Place an order
//! - `merge` - Merge the guest cart into the server cart

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use techshelf_cart::CartClientConfig;

mod commands;

#[derive(Parser)]
#[command(name = "techshelf")]
#[command(author, version, about = "TechShelf cart client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show and edit the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Manage promotion codes
    Promo {
        #[command(subcommand)]
        action: PromoAction,
    },
    /// Place an order for the current cart
    Checkout(commands::checkout::CheckoutArgs),
    /// Merge the saved guest cart into the server cart
    Merge,
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the cart
    Show,
    /// Add a product
    Add {
        /// Product ID
        product_id: String,

        /// Units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Remove a product
    Remove {
        /// Product ID
        product_id: String,
    },
    /// Set a product's quantity (0 removes it)
    Update {
        /// Product ID
        product_id: String,

        /// New quantity
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Remove every line
    Clear,
}

#[derive(Subcommand)]
enum PromoAction {
    /// Apply a discount code
    Apply {
        /// Discount code
        code: String,
    },
}

/// Initialize Sentry for error tracking.
///
/// Returns a guard that must be kept alive for the duration of the program.
/// If `SENTRY_DSN` is not set, returns `None` and Sentry is disabled.
fn init_sentry(config: &CartClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "techshelf_cart=info,techshelf_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match CartClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing();
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    match run(cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Command failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: &CartClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(config).await?,
            CartAction::Add {
                product_id,
                quantity,
            } => commands::cart::add(config, &product_id, quantity).await?,
            CartAction::Remove { product_id } => {
                commands::cart::remove(config, &product_id).await?;
            }
            CartAction::Update {
                product_id,
                quantity,
            } => commands::cart::update(config, &product_id, quantity).await?,
            CartAction::Clear => commands::cart::clear(config).await?,
        },
        Commands::Promo { action } => match action {
            PromoAction::Apply { code } => commands::checkout::apply_promotion(config, &code).await?,
        },
        Commands::Checkout(args) => commands::checkout::checkout(config, args).await?,
        Commands::Merge => commands::cart::merge(config).await?,
    }
    Ok(())
}
