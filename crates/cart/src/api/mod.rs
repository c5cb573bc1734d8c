//! TechShelf REST API client.
//!
//! # Architecture
//!
//! - [`CartBackend`] is the seam the cart manager talks to; [`ApiClient`] is
//!   the `reqwest` implementation.
//! - Payloads are normalized into `techshelf-core` types on receipt (see
//!   `conversions`), so the two cart item shapes never leak past this module.
//! - Product details are cached via `moka` (5 minute TTL by default).
//! - Authenticated calls carry a bearer token. Refreshing an expired token
//!   is the caller's concern; a 401 surfaces as [`ApiError::Unauthorized`].
//!
//! # Endpoints
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/orders/cart/` | Current cart |
//! | POST | `/orders/cart/add/` | Add a product |
//! | DELETE | `/orders/cart/remove/{id}/` | Remove a product |
//! | PUT | `/orders/cart/update/{id}/` | Set a quantity |
//! | POST | `/orders/promotions/apply/` | Apply a discount code |
//! | POST | `/orders/checkout/` | Place the order |
//! | GET | `/products/{id}/` | Product details |

mod cache;
pub mod conversions;
pub mod types;

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use moka::future::Cache;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};

use techshelf_core::{Cart, ProductId, ProductSnapshot, Quantity};

use crate::config::ApiConfig;

use cache::{CacheKey, CacheValue};
use conversions::{convert_cart, convert_product};
use types::{
    AddItemRequest, ApplyPromotionRequest, CheckoutDetails, ErrorBody, Order, Promotion,
    ServerCart, ServerProduct, UpdateItemRequest,
};

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never completed (connection, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The bearer token is missing, expired or rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The response body could not be parsed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ApiError {
    /// HTTP status the backend answered with, if it answered at all.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http(_) | Self::Parse(_) => None,
            Self::Api { status, .. } => Some(*status),
            Self::Unauthorized(_) => Some(401),
            Self::NotFound(_) => Some(404),
        }
    }

    /// Message supplied by the backend, suitable for display.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Api { message, .. } | Self::Unauthorized(message) | Self::NotFound(message)
                if !message.is_empty() =>
            {
                Some(message)
            }
            _ => None,
        }
    }
}

// =============================================================================
// CartBackend
// =============================================================================

/// The backend operations the cart manager depends on.
pub trait CartBackend: Send + Sync {
    /// Fetch the authenticated user's cart.
    fn get_cart(&self) -> impl Future<Output = Result<Cart, ApiError>> + Send;

    /// Add units of a product to the server cart.
    fn add_item(
        &self,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> impl Future<Output = Result<Cart, ApiError>> + Send;

    /// Remove a product from the server cart.
    fn remove_item(
        &self,
        product_id: &ProductId,
    ) -> impl Future<Output = Result<Cart, ApiError>> + Send;

    /// Set the quantity of a product in the server cart.
    fn update_item(
        &self,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> impl Future<Output = Result<Cart, ApiError>> + Send;

    /// Apply a discount code to the server cart.
    fn apply_promotion(&self, code: &str)
    -> impl Future<Output = Result<Promotion, ApiError>> + Send;

    /// Place an order for the server cart.
    fn checkout(
        &self,
        details: &CheckoutDetails,
    ) -> impl Future<Output = Result<Order, ApiError>> + Send;

    /// Fetch product details.
    fn get_product(
        &self,
        product_id: &ProductId,
    ) -> impl Future<Output = Result<ProductSnapshot, ApiError>> + Send;
}

// =============================================================================
// ApiClient
// =============================================================================

/// Client for the TechShelf REST API.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: String,
    media_base_url: String,
    access_token: RwLock<Option<SecretString>>,
    cache: Cache<CacheKey, CacheValue>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(config.product_cache_ttl)
            .build();

        let base_url = config.base_url.as_str().trim_end_matches('/').to_string();
        let media_base_url = media_base(&config.base_url);

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url,
                media_base_url,
                access_token: RwLock::new(config.access_token.clone()),
                cache,
            }),
        })
    }

    /// Base URL every endpoint path is appended to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Replace the bearer token (`None` after logout).
    pub fn set_access_token(&self, token: Option<SecretString>) {
        *self
            .inner
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Whether a bearer token is configured.
    #[must_use]
    pub fn has_access_token(&self) -> bool {
        self.inner
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn access_token(&self) -> Option<SecretString> {
        self.inner
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve a media path returned by the backend to an absolute URL.
    ///
    /// Absolute `http(s)` URLs are returned unchanged; relative paths are
    /// joined to the API origin (the base URL without `/api`).
    #[must_use]
    pub fn media_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            return path.to_string();
        }
        let clean = path.strip_prefix('/').unwrap_or(path);
        format!("{}/{clean}", self.inner.media_base_url)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.inner.base_url)
    }

    fn resolve_images(&self, cart: &mut Cart) {
        for line in &mut cart.lines {
            if let Some(image) = line.product.image.take() {
                line.product.image = Some(self.media_url(&image));
            }
        }
    }

    /// Send a request and decode the JSON response.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let request = match self.access_token() {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        // Get response body as text first for better error diagnostics
        let response_text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&response_text)
                .ok()
                .and_then(ErrorBody::message)
                .unwrap_or_else(|| response_text.chars().take(200).collect());

            tracing::warn!(
                status = %status,
                message = %message,
                "TechShelf API returned non-success status"
            );

            return Err(match status {
                StatusCode::UNAUTHORIZED => ApiError::Unauthorized(message),
                StatusCode::NOT_FOUND => ApiError::NotFound(message),
                _ => ApiError::Api {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %response_text.chars().take(500).collect::<String>(),
                "Failed to parse TechShelf API response"
            );
            ApiError::Parse(e)
        })
    }

    async fn fetch_cart(&self, request: reqwest::RequestBuilder) -> Result<Cart, ApiError> {
        let server_cart: ServerCart = self.execute(request).await?;
        let mut cart = convert_cart(server_cart);
        self.resolve_images(&mut cart);
        Ok(cart)
    }
}

impl CartBackend for ApiClient {
    #[instrument(skip(self))]
    async fn get_cart(&self) -> Result<Cart, ApiError> {
        let request = self.inner.client.get(self.url("/orders/cart/"));
        self.fetch_cart(request).await
    }

    #[instrument(skip_all, fields(product_id = %product_id, quantity = %quantity))]
    async fn add_item(&self, product_id: &ProductId, quantity: Quantity) -> Result<Cart, ApiError> {
        let request = self
            .inner
            .client
            .post(self.url("/orders/cart/add/"))
            .json(&AddItemRequest {
                product_id,
                quantity: quantity.get(),
            });
        self.fetch_cart(request).await
    }

    #[instrument(skip_all, fields(product_id = %product_id))]
    async fn remove_item(&self, product_id: &ProductId) -> Result<Cart, ApiError> {
        let path = format!(
            "/orders/cart/remove/{}/",
            urlencoding::encode(product_id.as_str())
        );
        let request = self.inner.client.delete(self.url(&path));
        self.fetch_cart(request).await
    }

    #[instrument(skip_all, fields(product_id = %product_id, quantity = %quantity))]
    async fn update_item(
        &self,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> Result<Cart, ApiError> {
        let path = format!(
            "/orders/cart/update/{}/",
            urlencoding::encode(product_id.as_str())
        );
        let request = self
            .inner
            .client
            .put(self.url(&path))
            .json(&UpdateItemRequest {
                quantity: quantity.get(),
            });
        self.fetch_cart(request).await
    }

    #[instrument(skip(self))]
    async fn apply_promotion(&self, code: &str) -> Result<Promotion, ApiError> {
        let request = self
            .inner
            .client
            .post(self.url("/orders/promotions/apply/"))
            .json(&ApplyPromotionRequest {
                discount_code: code,
            });
        self.execute(request).await
    }

    #[instrument(skip(self, details))]
    async fn checkout(&self, details: &CheckoutDetails) -> Result<Order, ApiError> {
        let request = self
            .inner
            .client
            .post(self.url("/orders/checkout/"))
            .json(details);
        self.execute(request).await
    }

    #[instrument(skip_all, fields(product_id = %product_id))]
    async fn get_product(&self, product_id: &ProductId) -> Result<ProductSnapshot, ApiError> {
        let cache_key = CacheKey::Product(product_id.clone());

        if let Some(CacheValue::Product(product)) = self.inner.cache.get(&cache_key).await {
            debug!("Cache hit for product");
            return Ok(*product);
        }

        let path = format!("/products/{}/", urlencoding::encode(product_id.as_str()));
        let request = self.inner.client.get(self.url(&path));
        let server_product: ServerProduct = self.execute(request).await?;

        let mut product = convert_product(server_product, product_id, rust_decimal::Decimal::ZERO);
        if let Some(image) = product.image.take() {
            product.image = Some(self.media_url(&image));
        }

        self.inner
            .cache
            .insert(cache_key, CacheValue::Product(Box::new(product.clone())))
            .await;

        Ok(product)
    }
}

/// Origin media paths are served from: the API base with a trailing `/api`
/// segment dropped.
fn media_base(base_url: &url::Url) -> String {
    let mut media = base_url.clone();
    let path = base_url.path().trim_end_matches('/');
    media.set_path(path.strip_suffix("/api").unwrap_or(path));
    media.as_str().trim_end_matches('/').to_string()
}
