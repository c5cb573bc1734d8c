//! Integration test harness for the TechShelf cart client.
//!
//! [`MockBackend`] serves the cart, promotion, checkout and product
//! endpoints from memory on an ephemeral port, so tests drive the real
//! `ApiClient` over HTTP.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p techshelf-integration-tests
//! ```
//!
//! # Backend behaviour
//!
//! - Cart endpoints require `Authorization: Bearer` [`TEST_TOKEN`]
//! - Adding or updating beyond a product's stock answers 400
//! - Tax is 8% of the discounted subtotal; shipping is free
//! - Decimals are sent as strings, cart IDs as numbers

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use techshelf_cart::{
    ApiClient, ApiConfig, CartStateManager, GuestCartRepository, KeyValueStore, ManagerConfig,
};
use techshelf_core::SessionMode;

/// Bearer token the mock backend accepts.
pub const TEST_TOKEN: &str = "test-access-token";

/// Shape of cart items in responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemShape {
    /// Items carry a nested `product` object.
    #[default]
    Enriched,
    /// Items carry only `product_name` and prices.
    Minimal,
}

/// A request the mock backend received, path relative to `/api`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
}

#[derive(Debug, Clone)]
struct MockProduct {
    name: String,
    price: Decimal,
    stock: u32,
    available: bool,
}

#[derive(Debug, Default)]
struct Inner {
    products: HashMap<String, MockProduct>,
    lines: Vec<(String, u32)>,
    promotions: HashMap<String, Decimal>,
    applied_percentage: Option<Decimal>,
    item_shape: ItemShape,
    requests: Vec<RecordedRequest>,
    checkouts: Vec<Value>,
    orders_placed: u64,
}

#[derive(Debug, Clone, Default)]
struct MockState(Arc<Mutex<Inner>>);

impl MockState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn money(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

fn tax_rate() -> Decimal {
    Decimal::new(8, 2)
}

impl Inner {
    fn quantity_of(&self, product_id: &str) -> u32 {
        self.lines
            .iter()
            .find(|(id, _)| id == product_id)
            .map_or(0, |(_, quantity)| *quantity)
    }

    fn set_quantity(&mut self, product_id: &str, quantity: u32) {
        if quantity == 0 {
            self.lines.retain(|(id, _)| id != product_id);
            return;
        }
        match self.lines.iter_mut().find(|(id, _)| id == product_id) {
            Some(line) => line.1 = quantity,
            None => self.lines.push((product_id.to_string(), quantity)),
        }
    }

    fn product_json(product_id: &str, product: &MockProduct) -> Value {
        json!({
            "product_id": product_id,
            "name": product.name,
            "price": money(product.price),
            "stock": product.stock,
            "image": format!("/media/products/{product_id}.jpg"),
            "category": "Accessories",
            "description": format!("{} from the TechShelf catalog", product.name),
            "store_name": "TechShelf Outlet",
        })
    }

    fn totals(&self) -> (Decimal, Decimal, Decimal, Decimal) {
        let subtotal: Decimal = self
            .lines
            .iter()
            .map(|(id, quantity)| {
                self.products
                    .get(id)
                    .map_or(Decimal::ZERO, |p| p.price * Decimal::from(*quantity))
            })
            .sum();
        let discount = self
            .applied_percentage
            .map_or(Decimal::ZERO, |pct| {
                (subtotal * pct / Decimal::ONE_HUNDRED).round_dp(2)
            });
        let tax = ((subtotal - discount) * tax_rate()).round_dp(2);
        let total = subtotal - discount + tax;
        (subtotal, discount, tax, total)
    }

    fn cart_json(&self) -> Value {
        let items: Vec<Value> = self
            .lines
            .iter()
            .filter_map(|(id, quantity)| {
                let product = self.products.get(id)?;
                let total = product.price * Decimal::from(*quantity);
                Some(match self.item_shape {
                    ItemShape::Enriched => json!({
                        "product_id": id,
                        "quantity": quantity,
                        "price": money(product.price),
                        "total_price": money(total),
                        "product": Self::product_json(id, product),
                    }),
                    ItemShape::Minimal => json!({
                        "product_id": id,
                        "product_name": product.name,
                        "quantity": quantity,
                        "price": money(product.price),
                        "total_price": money(total),
                    }),
                })
            })
            .collect();

        let (subtotal, discount, tax, total) = self.totals();
        json!({
            "cart_id": 7,
            "items": items,
            "subtotal": money(subtotal),
            "discount": money(discount),
            "tax": money(tax),
            "shipping_cost": "0.00",
            "total": money(total),
            "created_at": "2026-01-05T10:00:00Z",
            "updated_at": "2026-01-05T10:42:17.123456",
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn authorize(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {TEST_TOKEN}");
    match headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) if value == expected => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Authentication credentials were not provided." })),
        )
            .into_response()),
    }
}

async fn record_request(State(state): State<MockState>, request: Request, next: Next) -> Response {
    let recorded = {
        let path = request.uri().path();
        RecordedRequest {
            method: request.method().clone(),
            path: path.strip_prefix("/api").unwrap_or(path).to_string(),
        }
    };
    state.lock().requests.push(recorded);
    next.run(request).await
}

async fn get_cart(State(state): State<MockState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&headers) {
        return response;
    }
    Json(state.lock().cart_json()).into_response()
}

#[derive(Deserialize)]
struct AddBody {
    product_id: String,
    quantity: u32,
}

async fn add_item(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<AddBody>,
) -> Response {
    if let Err(response) = authorize(&headers) {
        return response;
    }
    let mut inner = state.lock();
    let Some(stock) = inner.products.get(&body.product_id).map(|p| p.stock) else {
        return error_response(StatusCode::NOT_FOUND, "Product not found");
    };
    let requested = inner.quantity_of(&body.product_id) + body.quantity;
    if requested > stock {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Only {stock} units available"),
        );
    }
    inner.set_quantity(&body.product_id, requested);
    Json(inner.cart_json()).into_response()
}

async fn remove_item(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&headers) {
        return response;
    }
    let mut inner = state.lock();
    inner.set_quantity(&product_id, 0);
    Json(inner.cart_json()).into_response()
}

#[derive(Deserialize)]
struct UpdateBody {
    quantity: u32,
}

async fn update_item(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> Response {
    if let Err(response) = authorize(&headers) {
        return response;
    }
    let mut inner = state.lock();
    if inner.quantity_of(&product_id) == 0 {
        return error_response(StatusCode::NOT_FOUND, "Item not in cart");
    }
    let stock = inner.products.get(&product_id).map_or(0, |p| p.stock);
    if body.quantity > stock {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Only {stock} units available"),
        );
    }
    inner.set_quantity(&product_id, body.quantity);
    Json(inner.cart_json()).into_response()
}

#[derive(Deserialize)]
struct PromotionBody {
    discount_code: String,
}

async fn apply_promotion(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<PromotionBody>,
) -> Response {
    if let Err(response) = authorize(&headers) {
        return response;
    }
    let mut inner = state.lock();
    let Some(percentage) = inner.promotions.get(&body.discount_code).copied() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid or expired discount code");
    };
    inner.applied_percentage = Some(percentage);
    Json(json!({
        "promotion_id": 1,
        "discount_code": body.discount_code,
        "discount_percentage": money(percentage),
        "expiry_date": "2026-12-31",
    }))
    .into_response()
}

async fn checkout(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = authorize(&headers) {
        return response;
    }
    let mut inner = state.lock();
    if inner.lines.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Cart is empty");
    }

    let (_, _, _, total) = inner.totals();
    let items: Vec<Value> = inner
        .lines
        .iter()
        .map(|(id, quantity)| {
            let price = inner.products.get(id).map_or(Decimal::ZERO, |p| p.price);
            json!({ "product_id": id, "quantity": quantity, "price": money(price) })
        })
        .collect();

    inner.orders_placed += 1;
    let order_id = 100 + inner.orders_placed;
    inner.checkouts.push(body);
    inner.lines.clear();
    inner.applied_percentage = None;

    Json(json!({
        "order_id": order_id,
        "total_amount": money(total),
        "tax_rate": money(tax_rate()),
        "shipping_cost": "0.00",
        "payment_status": "completed",
        "order_status": "processing",
        "items": items,
    }))
    .into_response()
}

async fn get_product(State(state): State<MockState>, Path(product_id): Path<String>) -> Response {
    let inner = state.lock();
    match inner.products.get(&product_id) {
        Some(product) if product.available => {
            Json(Inner::product_json(&product_id, product)).into_response()
        }
        Some(_) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Product service unavailable",
        ),
        None => (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found." }))).into_response(),
    }
}

// =============================================================================
// MockBackend
// =============================================================================

/// In-memory TechShelf backend listening on `127.0.0.1`.
///
/// The server task is aborted on drop.
pub struct MockBackend {
    origin: String,
    state: MockState,
    server: JoinHandle<()>,
}

impl MockBackend {
    /// Bind an ephemeral port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start() -> Self {
        let state = MockState::default();

        let api = Router::new()
            .route("/orders/cart/", get(get_cart))
            .route("/orders/cart/add/", post(add_item))
            .route("/orders/cart/remove/{product_id}/", delete(remove_item))
            .route("/orders/cart/update/{product_id}/", put(update_item))
            .route("/orders/promotions/apply/", post(apply_promotion))
            .route("/orders/checkout/", post(checkout))
            .route("/products/{product_id}/", get(get_product));

        let app = Router::new()
            .nest("/api", api)
            .layer(middleware::from_fn_with_state(state.clone(), record_request))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener
            .local_addr()
            .expect("Failed to read mock backend address");

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Mock backend stopped: {e}");
            }
        });

        Self {
            origin: format!("http://{addr}"),
            state,
            server,
        }
    }

    /// Server origin, e.g. `http://127.0.0.1:41234`.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// API base URL (`<origin>/api`).
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}/api", self.origin)
    }

    // -------------------------------------------------------------------------
    // Fixtures
    // -------------------------------------------------------------------------

    /// Add a product to the catalog.
    pub fn add_product(&self, product_id: &str, name: &str, price_cents: i64, stock: u32) {
        self.state.lock().products.insert(
            product_id.to_string(),
            MockProduct {
                name: name.to_string(),
                price: Decimal::new(price_cents, 2),
                stock,
                available: true,
            },
        );
    }

    /// Make the product detail endpoint fail for a product.
    pub fn make_unavailable(&self, product_id: &str) {
        if let Some(product) = self.state.lock().products.get_mut(product_id) {
            product.available = false;
        }
    }

    /// Register a discount code.
    pub fn add_promotion(&self, code: &str, percentage: u32) {
        self.state
            .lock()
            .promotions
            .insert(code.to_string(), Decimal::from(percentage));
    }

    /// Put a line in the server cart directly.
    pub fn seed_line(&self, product_id: &str, quantity: u32) {
        self.state.lock().set_quantity(product_id, quantity);
    }

    /// Choose the item shape of cart responses.
    pub fn set_item_shape(&self, shape: ItemShape) {
        self.state.lock().item_shape = shape;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests with `method` whose path starts with `prefix`.
    #[must_use]
    pub fn request_count(&self, method: &Method, prefix: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| &r.method == method && r.path.starts_with(prefix))
            .count()
    }

    /// Quantity of a product in the server cart (0 when absent).
    #[must_use]
    pub fn server_quantity(&self, product_id: &str) -> u32 {
        self.state.lock().quantity_of(product_id)
    }

    /// Bodies of accepted checkout requests.
    #[must_use]
    pub fn checkouts(&self) -> Vec<Value> {
        self.state.lock().checkouts.clone()
    }

    // -------------------------------------------------------------------------
    // Clients
    // -------------------------------------------------------------------------

    /// API client pointed at this backend.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn client(&self, token: Option<&str>) -> ApiClient {
        let mut config = ApiConfig::with_base_url(&self.base_url()).expect("Valid mock base URL");
        config.access_token = token.map(SecretString::from);
        config.request_timeout = Duration::from_secs(5);
        ApiClient::new(&config).expect("Failed to build API client")
    }

    /// Manager for an anonymous visitor.
    #[must_use]
    pub fn guest_manager(&self, store: Arc<dyn KeyValueStore>) -> CartStateManager<ApiClient> {
        CartStateManager::new(
            self.client(None),
            GuestCartRepository::new(store),
            ManagerConfig {
                update_debounce: Duration::ZERO,
            },
            SessionMode::Guest,
        )
    }

    /// Manager for a logged-in user with the given debounce window.
    #[must_use]
    pub fn authenticated_manager(
        &self,
        store: Arc<dyn KeyValueStore>,
        update_debounce: Duration,
    ) -> CartStateManager<ApiClient> {
        CartStateManager::new(
            self.client(Some(TEST_TOKEN)),
            GuestCartRepository::new(store),
            ManagerConfig { update_debounce },
            SessionMode::Authenticated,
        )
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}
