use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use techshelf_core::{CartId, OrderId, PLACEHOLDER_STOCK};

use super::*;
use crate::api::ApiError;
use crate::api::types::{PaymentInfo, ShippingDetails};
use crate::storage::{GUEST_CART_KEY, KeyValueStore, MemoryStore};

// =============================================================================
// Fake backend
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    GetCart,
    Add(ProductId, u32),
    Remove(ProductId),
    Update(ProductId, u32),
    Promotion(String),
    Checkout,
    Product(ProductId),
}

#[derive(Debug, Default)]
struct FakeServer {
    lines: Vec<(ProductId, u32, Decimal)>,
    catalog: HashMap<ProductId, ProductSnapshot>,
    rejected: HashSet<ProductId>,
    discount: Decimal,
    fail_get_cart: bool,
    fail_updates: bool,
    get_cart_delay: Duration,
    product_delay: Duration,
    remove_delay: Duration,
    update_delays: VecDeque<Duration>,
    calls: Vec<Call>,
}

impl FakeServer {
    /// The server cart in its "minimal" shape: names but no images.
    fn cart(&self) -> Cart {
        let lines: Vec<CartLine> = self
            .lines
            .iter()
            .map(|(id, quantity, price)| CartLine {
                product_id: id.clone(),
                quantity: Quantity::new(i64::from(*quantity)).unwrap(),
                unit_price: *price,
                product: ProductSnapshot {
                    name: self
                        .catalog
                        .get(id)
                        .map_or_else(|| id.placeholder_name(), |p| p.name.clone()),
                    image: None,
                    stock: None,
                    price: *price,
                },
                total_price: Some(*price * Decimal::from(*quantity)),
            })
            .collect();
        let subtotal: Decimal = lines.iter().filter_map(|line| line.total_price).sum();
        Cart {
            cart_id: Some(CartId::new("1")),
            lines,
            subtotal,
            discount: self.discount,
            tax: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            total: subtotal - self.discount,
            updated_at: None,
        }
    }

    fn price_of(&self, id: &ProductId) -> Decimal {
        self.catalog.get(id).map_or(Decimal::ZERO, |p| p.price)
    }
}

#[derive(Debug, Default)]
struct FakeBackend {
    server: Mutex<FakeServer>,
}

impl FakeBackend {
    fn with(self, f: impl FnOnce(&mut FakeServer)) -> Self {
        f(&mut self.server.lock().unwrap());
        self
    }

    fn product(self, id: &str, name: &str, cents: i64, stock: u32) -> Self {
        self.with(|s| {
            s.catalog.insert(
                ProductId::new(id),
                ProductSnapshot {
                    name: name.to_string(),
                    image: Some(format!("http://localhost:8000/media/{id}.jpg")),
                    stock: Some(stock),
                    price: Decimal::new(cents, 2),
                },
            );
        })
    }

    fn server_line(self, id: &str, quantity: u32) -> Self {
        self.with(|s| {
            let id = ProductId::new(id);
            let price = s.price_of(&id);
            s.lines.push((id, quantity, price));
        })
    }

    fn set(&self, f: impl FnOnce(&mut FakeServer)) {
        f(&mut self.server.lock().unwrap());
    }

    fn calls(&self) -> Vec<Call> {
        self.server.lock().unwrap().calls.clone()
    }

    fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: Call) {
        self.server.lock().unwrap().calls.push(call);
    }
}

impl CartBackend for FakeBackend {
    async fn get_cart(&self) -> std::result::Result<Cart, ApiError> {
        self.record(Call::GetCart);
        let delay = self.server.lock().unwrap().get_cart_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let server = self.server.lock().unwrap();
        if server.fail_get_cart {
            return Err(ApiError::Api {
                status: 500,
                message: String::new(),
            });
        }
        Ok(server.cart())
    }

    async fn add_item(
        &self,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> std::result::Result<Cart, ApiError> {
        self.record(Call::Add(product_id.clone(), quantity.get()));
        let mut server = self.server.lock().unwrap();
        if server.rejected.contains(product_id) {
            return Err(ApiError::Api {
                status: 400,
                message: "Insufficient stock".to_string(),
            });
        }
        let price = server.price_of(product_id);
        match server.lines.iter_mut().find(|(id, _, _)| id == product_id) {
            Some(line) => line.1 += quantity.get(),
            None => server
                .lines
                .push((product_id.clone(), quantity.get(), price)),
        }
        Ok(server.cart())
    }

    async fn remove_item(&self, product_id: &ProductId) -> std::result::Result<Cart, ApiError> {
        self.record(Call::Remove(product_id.clone()));
        let delay = self.server.lock().unwrap().remove_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut server = self.server.lock().unwrap();
        server.lines.retain(|(id, _, _)| id != product_id);
        Ok(server.cart())
    }

    async fn update_item(
        &self,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> std::result::Result<Cart, ApiError> {
        self.record(Call::Update(product_id.clone(), quantity.get()));
        let delay = {
            let mut server = self.server.lock().unwrap();
            if server.fail_updates {
                return Err(ApiError::Api {
                    status: 400,
                    message: "Only 2 units available".to_string(),
                });
            }
            if let Some(line) = server.lines.iter_mut().find(|(id, _, _)| id == product_id) {
                line.1 = quantity.get();
            }
            server.update_delays.pop_front().unwrap_or_default()
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.server.lock().unwrap().cart())
    }

    async fn apply_promotion(&self, code: &str) -> std::result::Result<Promotion, ApiError> {
        self.record(Call::Promotion(code.to_string()));
        if code != "SAVE5" {
            return Err(ApiError::NotFound(String::new()));
        }
        self.set(|s| s.discount = Decimal::new(500, 2));
        Ok(Promotion {
            promotion_id: Some("3".to_string()),
            discount_code: code.to_string(),
            discount_percentage: None,
            expiry_date: None,
        })
    }

    async fn checkout(&self, _details: &CheckoutDetails) -> std::result::Result<Order, ApiError> {
        self.record(Call::Checkout);
        let mut server = self.server.lock().unwrap();
        let total = server.cart().total;
        server.lines.clear();
        Ok(Order {
            order_id: OrderId::new("42"),
            total_amount: Some(total),
            tax_rate: None,
            shipping_cost: None,
            payment_status: Some("completed".to_string()),
            order_status: Some("processing".to_string()),
            items: Vec::new(),
        })
    }

    async fn get_product(
        &self,
        product_id: &ProductId,
    ) -> std::result::Result<ProductSnapshot, ApiError> {
        self.record(Call::Product(product_id.clone()));
        let delay = self.server.lock().unwrap().product_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.server
            .lock()
            .unwrap()
            .catalog
            .get(product_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn catalog() -> FakeBackend {
    FakeBackend::default()
        .product("prod_1", "Mechanical Keyboard", 2000, 8)
        .product("prod_2", "USB-C Cable", 500, 40)
        .product("prod_3", "Monitor Arm", 4999, 3)
}

fn manager_with(
    backend: FakeBackend,
    mode: SessionMode,
    debounce: Duration,
) -> (CartStateManager<FakeBackend>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = CartStateManager::new(
        backend,
        GuestCartRepository::new(store.clone()),
        ManagerConfig {
            update_debounce: debounce,
        },
        mode,
    );
    (manager, store)
}

fn manager(backend: FakeBackend, mode: SessionMode) -> (CartStateManager<FakeBackend>, Arc<MemoryStore>) {
    manager_with(backend, mode, Duration::ZERO)
}

fn id(value: &str) -> ProductId {
    ProductId::new(value)
}

fn qty(value: i64) -> Quantity {
    Quantity::new(value).unwrap()
}

fn dollars(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn stored_guest_cart(store: &MemoryStore) -> Option<Cart> {
    store
        .get_item(GUEST_CART_KEY)
        .unwrap()
        .map(|raw| serde_json::from_str(&raw).unwrap())
}

fn shipping() -> ShippingDetails {
    ShippingDetails {
        shipping_address: "1 Infinite Loop".to_string(),
        city: "Cupertino".to_string(),
        country: "US".to_string(),
        postal_code: "95014".to_string(),
    }
}

fn card() -> PaymentInfo {
    PaymentInfo {
        card_number: SecretString::from("4242424242424242"),
        expiry_date: "12/30".to_string(),
        cvv: SecretString::from("123"),
        name_on_card: "Ada Lovelace".to_string(),
    }
}

fn checkout_details(payment_info: Option<PaymentInfo>, use_saved_card: bool) -> CheckoutDetails {
    CheckoutDetails {
        shipping: shipping(),
        payment_info,
        use_saved_card,
        save_card: false,
    }
}

// =============================================================================
// Guest mode
// =============================================================================

#[tokio::test]
async fn test_guest_add_increments_and_persists() {
    let (manager, store) = manager(catalog(), SessionMode::Guest);

    manager.add_line(&id("prod_1"), qty(1)).await.unwrap();
    let cart = manager.add_line(&id("prod_1"), qty(2)).await.unwrap();

    assert_eq!(cart.item_count(), 1);
    let line = cart.line(&id("prod_1")).unwrap();
    assert_eq!(line.quantity.get(), 3);
    assert_eq!(line.product.name, "Mechanical Keyboard");
    assert_eq!(cart.subtotal, dollars(6000));
    assert_eq!(cart.total, cart.subtotal);
    assert_eq!(cart.tax, Decimal::ZERO);

    assert_eq!(stored_guest_cart(&store), Some(cart.clone()));
    assert_eq!(manager.cart(), cart);
    assert_eq!(manager.cart_total(), dollars(6000));
    assert!(!manager.is_loading());
    assert_eq!(
        manager.backend().count(|c| matches!(c, Call::Add(..))),
        0,
        "guest adds never reach the server cart"
    );
}

#[tokio::test]
async fn test_guest_mutations_before_load_keep_saved_lines() {
    let (manager, store) = manager(catalog(), SessionMode::Guest);
    let mut saved = Cart::empty();
    saved.add_or_increment(CartLine::new(
        id("prod_2"),
        qty(2),
        ProductSnapshot::placeholder(&id("prod_2"), dollars(500)),
    ));
    store
        .set_item(GUEST_CART_KEY, &serde_json::to_string(&saved).unwrap())
        .unwrap();

    let cart = manager.add_line(&id("prod_1"), qty(1)).await.unwrap();
    assert_eq!(cart.item_count(), 2);
    assert_eq!(cart.line(&id("prod_2")).unwrap().quantity.get(), 2);
    assert_eq!(cart.total, dollars(3000));
    assert_eq!(stored_guest_cart(&store), Some(cart));

    let fresh = CartStateManager::new(
        catalog(),
        GuestCartRepository::new(store.clone()),
        ManagerConfig::default(),
        SessionMode::Guest,
    );
    let cart = fresh.update_quantity(&id("prod_2"), 5).await.unwrap();
    assert_eq!(cart.item_count(), 2);
    assert_eq!(cart.line(&id("prod_2")).unwrap().quantity.get(), 5);
    assert_eq!(stored_guest_cart(&store).unwrap().item_count(), 2);
}

#[tokio::test]
async fn test_guest_add_with_unknown_product_changes_nothing() {
    let (manager, store) = manager(catalog(), SessionMode::Guest);
    manager.add_line(&id("prod_1"), qty(1)).await.unwrap();
    let before = manager.cart();

    let err = manager.add_line(&id("prod_404"), qty(1)).await.unwrap_err();

    assert_eq!(err.to_string(), "Product not found");
    assert_eq!(manager.error().as_deref(), Some("Product not found"));
    assert_eq!(manager.cart(), before);
    assert_eq!(stored_guest_cart(&store), Some(before));
}

#[tokio::test]
async fn test_guest_update_and_remove_are_local() {
    let (manager, store) = manager(catalog(), SessionMode::Guest);
    manager.add_line(&id("prod_1"), qty(1)).await.unwrap();
    manager.add_line(&id("prod_2"), qty(1)).await.unwrap();

    let cart = manager.update_quantity(&id("prod_2"), 4).await.unwrap();
    assert_eq!(cart.line(&id("prod_2")).unwrap().quantity.get(), 4);
    assert_eq!(cart.total, dollars(4000));

    let cart = manager.update_quantity(&id("prod_1"), 0).await.unwrap();
    assert!(cart.line(&id("prod_1")).is_none());
    assert_eq!(cart.total, dollars(2000));

    let cart = manager.remove_line(&id("prod_2")).await.unwrap();
    assert!(cart.is_empty());
    assert!(stored_guest_cart(&store).unwrap().is_empty());

    let calls = manager.backend().calls();
    assert!(
        calls
            .iter()
            .all(|c| matches!(c, Call::Product(_))),
        "unexpected server calls: {calls:?}"
    );
}

#[tokio::test]
async fn test_guest_remove_of_absent_product_is_ok() {
    let (manager, _store) = manager(catalog(), SessionMode::Guest);
    manager.add_line(&id("prod_1"), qty(1)).await.unwrap();

    let cart = manager.remove_line(&id("prod_9")).await.unwrap();
    assert_eq!(cart.item_count(), 1);
    assert!(manager.error().is_none());
}

#[tokio::test]
async fn test_guest_load_recomputes_stored_totals() {
    let (manager, store) = manager(catalog(), SessionMode::Guest);
    let mut stored = Cart::empty();
    stored.add_or_increment(CartLine::new(
        id("prod_2"),
        qty(3),
        ProductSnapshot::placeholder(&id("prod_2"), dollars(500)),
    ));
    stored.total = dollars(1);
    store
        .set_item(GUEST_CART_KEY, &serde_json::to_string(&stored).unwrap())
        .unwrap();

    let cart = manager.load().await;
    assert_eq!(cart.subtotal, dollars(1500));
    assert_eq!(cart.total, dollars(1500));
    assert!(manager.backend().calls().is_empty());
}

#[tokio::test]
async fn test_guest_load_of_corrupt_storage_yields_empty_cart() {
    let (manager, store) = manager(catalog(), SessionMode::Guest);
    store.set_item(GUEST_CART_KEY, "{\"items\": 7").unwrap();

    let cart = manager.load().await;
    assert!(cart.is_empty());
    assert!(manager.error().is_some());
}

#[tokio::test]
async fn test_guest_cannot_apply_promotion_or_check_out() {
    let (manager, _store) = manager(catalog(), SessionMode::Guest);

    let err = manager.apply_promotion("SAVE5").await.unwrap_err();
    assert_eq!(err.to_string(), "Login required to apply a promotion code");
    assert!(matches!(err, CartError::Validation(_)));

    let err = manager
        .checkout(&checkout_details(Some(card()), false))
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::Validation(_)));
    assert!(manager.backend().calls().is_empty());
}

#[tokio::test]
async fn test_clear_guest_cart() {
    let (manager, store) = manager(catalog(), SessionMode::Guest);
    manager.add_line(&id("prod_1"), qty(1)).await.unwrap();

    manager.clear_guest_cart().unwrap();
    assert!(manager.cart().is_empty());
    assert!(stored_guest_cart(&store).is_none());
}

// =============================================================================
// Authenticated mode
// =============================================================================

#[tokio::test]
async fn test_server_load_enriches_lines_without_images() {
    let backend = catalog()
        .server_line("prod_1", 1)
        .server_line("prod_7", 2)
        .with(|s| {
            s.lines[1].2 = dollars(1250);
        });
    let (manager, _store) = manager(backend, SessionMode::Authenticated);

    let cart = manager.load().await;

    let keyboard = cart.line(&id("prod_1")).unwrap();
    assert_eq!(
        keyboard.product.image.as_deref(),
        Some("http://localhost:8000/media/prod_1.jpg")
    );
    assert_eq!(keyboard.product.stock, Some(8));

    let unknown = cart.line(&id("prod_7")).unwrap();
    assert_eq!(unknown.product.name, "Product 7");
    assert_eq!(unknown.product.stock, Some(PLACEHOLDER_STOCK));
    assert_eq!(unknown.product.price, dollars(1250));
    assert!(unknown.product.image.is_none());

    assert_eq!(cart.total, dollars(4500));
    assert!(manager.error().is_none(), "product failures do not fail the load");
    assert!(!manager.is_loading());
}

#[tokio::test]
async fn test_server_load_failure_yields_empty_cart() {
    let backend = catalog()
        .server_line("prod_1", 1)
        .with(|s| s.fail_get_cart = true);
    let (manager, _store) = manager(backend, SessionMode::Authenticated);

    let cart = manager.load().await;
    assert!(cart.is_empty());
    assert_eq!(manager.error().as_deref(), Some("Failed to fetch cart"));

    manager.backend().set(|s| s.fail_get_cart = false);
    let cart = manager.refresh().await;
    assert_eq!(cart.item_count(), 1);
    assert!(manager.error().is_none());
}

#[tokio::test]
async fn test_server_add_reloads_cart() {
    let (manager, _store) = manager(catalog(), SessionMode::Authenticated);

    let cart = manager.add_line(&id("prod_2"), qty(2)).await.unwrap();

    assert_eq!(cart.line(&id("prod_2")).unwrap().quantity.get(), 2);
    assert!(cart.line(&id("prod_2")).unwrap().product.is_enriched());
    assert_eq!(cart.total, dollars(1000));
    let calls = manager.backend().calls();
    assert_eq!(calls[0], Call::Add(id("prod_2"), 2));
    assert!(calls.contains(&Call::GetCart));
}

#[tokio::test]
async fn test_server_add_failure_surfaces_server_message() {
    let backend = catalog().with(|s| {
        s.rejected.insert(ProductId::new("prod_3"));
    });
    let (manager, _store) = manager(backend, SessionMode::Authenticated);

    let err = manager.add_line(&id("prod_3"), qty(5)).await.unwrap_err();
    assert_eq!(err.to_string(), "Insufficient stock");
    assert!(matches!(err, CartError::Server { status: Some(400), .. }));
    assert_eq!(manager.error().as_deref(), Some("Insufficient stock"));
    assert!(!manager.is_loading());
}

#[tokio::test]
async fn test_server_remove_keeps_known_product_details() {
    let backend = catalog().server_line("prod_1", 1).server_line("prod_2", 3);
    let (manager, _store) = manager(backend, SessionMode::Authenticated);
    manager.load().await;

    let cart = manager.remove_line(&id("prod_1")).await.unwrap();

    assert!(cart.line(&id("prod_1")).is_none());
    let cable = cart.line(&id("prod_2")).unwrap();
    assert_eq!(cable.quantity.get(), 3);
    assert_eq!(cable.product.stock, Some(40));
    assert!(cable.product.image.is_some());
    assert_eq!(cart.total, dollars(1500));
}

#[tokio::test(start_paused = true)]
async fn test_server_remove_merges_details_known_when_sent() {
    let backend = catalog()
        .server_line("prod_1", 1)
        .server_line("prod_2", 1)
        .with(|s| s.remove_delay = Duration::from_secs(1));
    let (manager, _store) = manager(backend, SessionMode::Authenticated);
    manager.load().await;

    let prod_2_id = id("prod_2");
    let (removed, _) = tokio::join!(manager.remove_line(&prod_2_id), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.backend().set(|s| {
            if let Some(product) = s.catalog.get_mut(&ProductId::new("prod_1")) {
                product.name = "Mechanical Keyboard v2".to_string();
            }
        });
        manager.refresh().await
    });

    let cart = removed.unwrap();
    assert!(cart.line(&id("prod_2")).is_none());
    assert_eq!(
        cart.line(&id("prod_1")).unwrap().product.name,
        "Mechanical Keyboard"
    );
    assert_eq!(manager.cart(), cart);
}

#[tokio::test]
async fn test_server_update_is_optimistic_and_keeps_images() {
    let backend = catalog().server_line("prod_1", 1);
    let (manager, _store) = manager(backend, SessionMode::Authenticated);
    manager.load().await;

    let cart = manager.update_quantity(&id("prod_1"), 3).await.unwrap();

    let line = cart.line(&id("prod_1")).unwrap();
    assert_eq!(line.quantity.get(), 3);
    assert!(line.product.image.is_some());
    assert_eq!(cart.subtotal, dollars(6000));
    assert_eq!(manager.backend().count(|c| matches!(c, Call::Update(..))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_updates_are_coalesced() {
    let backend = catalog().server_line("prod_1", 1);
    let (manager, _store) =
        manager_with(backend, SessionMode::Authenticated, Duration::from_millis(500));
    manager.load().await;
    let mut watcher = manager.subscribe();

    let product = id("prod_1");
    let (first, second, third) = tokio::join!(
        manager.update_quantity(&product, 2),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(
                watcher.borrow_and_update().cart.line(&product).unwrap().quantity.get(),
                2,
                "the first update shows immediately"
            );
            manager.update_quantity(&product, 3).await
        },
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            manager.update_quantity(&product, 4).await
        },
    );
    first.unwrap();
    second.unwrap();
    third.unwrap();

    let updates: Vec<Call> = manager
        .backend()
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Update(..)))
        .collect();
    assert_eq!(updates, vec![Call::Update(product.clone(), 4)]);
    assert_eq!(manager.cart().line(&product).unwrap().quantity.get(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_stale_update_response_is_discarded() {
    let backend = catalog().server_line("prod_1", 1).with(|s| {
        s.update_delays = VecDeque::from([Duration::from_secs(1), Duration::ZERO]);
    });
    let (manager, _store) = manager(backend, SessionMode::Authenticated);
    manager.load().await;

    let product = id("prod_1");
    let (slow, fast) = tokio::join!(manager.update_quantity(&product, 2), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.update_quantity(&product, 5).await
    });
    slow.unwrap();
    assert_eq!(fast.unwrap().line(&product).unwrap().quantity.get(), 5);

    assert_eq!(manager.backend().count(|c| matches!(c, Call::Update(..))), 2);
    assert_eq!(manager.cart().line(&product).unwrap().quantity.get(), 5);
    assert!(!manager.is_loading());
}

#[tokio::test]
async fn test_failed_update_reloads_server_cart() {
    let backend = catalog()
        .server_line("prod_1", 1)
        .with(|s| s.fail_updates = true);
    let (manager, _store) = manager(backend, SessionMode::Authenticated);
    manager.load().await;

    let err = manager.update_quantity(&id("prod_1"), 9).await.unwrap_err();

    assert_eq!(err.to_string(), "Only 2 units available");
    assert_eq!(manager.error().as_deref(), Some("Only 2 units available"));
    assert_eq!(
        manager.cart().line(&id("prod_1")).unwrap().quantity.get(),
        1,
        "optimistic quantity is rolled back"
    );
    assert_eq!(manager.backend().count(|c| *c == Call::GetCart), 2);
}

#[tokio::test]
async fn test_server_update_to_zero_removes() {
    let backend = catalog().server_line("prod_1", 1).server_line("prod_2", 1);
    let (manager, _store) = manager(backend, SessionMode::Authenticated);
    manager.load().await;

    let cart = manager.update_quantity(&id("prod_1"), -1).await.unwrap();
    assert!(cart.line(&id("prod_1")).is_none());
    assert!(manager.backend().calls().contains(&Call::Remove(id("prod_1"))));
    assert_eq!(manager.backend().count(|c| matches!(c, Call::Update(..))), 0);
}

#[tokio::test]
async fn test_apply_promotion_reloads_discounted_cart() {
    let backend = catalog().server_line("prod_1", 2);
    let (manager, _store) = manager(backend, SessionMode::Authenticated);
    manager.load().await;

    let promotion = manager.apply_promotion(" SAVE5 ").await.unwrap();
    assert_eq!(promotion.discount_code, "SAVE5");
    assert_eq!(promotion.id(), Some(techshelf_core::PromotionId::new("3")));

    let cart = manager.cart();
    assert_eq!(cart.discount, dollars(500));
    assert_eq!(cart.total, dollars(3500));
    assert_eq!(cart.total, cart.expected_total());
}

#[tokio::test]
async fn test_apply_promotion_rejections() {
    let (manager, _store) = manager(catalog(), SessionMode::Authenticated);

    let err = manager.apply_promotion("   ").await.unwrap_err();
    assert!(matches!(err, CartError::Validation(_)));
    assert!(manager.backend().calls().is_empty());

    let err = manager.apply_promotion("BOGUS").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid discount code");
    assert_eq!(manager.error().as_deref(), Some("Invalid discount code"));
}

#[tokio::test]
async fn test_checkout_validation() {
    let (manager, _store) = manager(catalog().server_line("prod_1", 1), SessionMode::Authenticated);

    let mut details = checkout_details(Some(card()), false);
    details.shipping.city = "  ".to_string();
    let err = manager.checkout(&details).await.unwrap_err();
    assert_eq!(err.to_string(), "Please fill in all shipping information");

    let err = manager
        .checkout(&checkout_details(None, false))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Please fill in all payment information");

    let mut partial = card();
    partial.cvv = SecretString::from("");
    let err = manager
        .checkout(&checkout_details(Some(partial), false))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Please fill in all payment information");

    assert_eq!(manager.backend().count(|c| *c == Call::Checkout), 0);
}

#[tokio::test]
async fn test_checkout_empties_cart() {
    let (manager, _store) = manager(catalog().server_line("prod_1", 2), SessionMode::Authenticated);
    manager.load().await;

    let order = manager
        .checkout(&checkout_details(None, true))
        .await
        .unwrap();

    assert_eq!(order.order_id.as_str(), "42");
    assert_eq!(order.total_amount, Some(dollars(4000)));
    assert!(manager.cart().is_empty());
    assert_eq!(manager.cart_total(), Decimal::ZERO);
}

// =============================================================================
// Session transitions
// =============================================================================

#[tokio::test]
async fn test_login_merges_guest_cart() {
    let backend = catalog().server_line("prod_2", 1).with(|s| {
        s.rejected.insert(ProductId::new("prod_3"));
    });
    let (manager, store) = manager(backend, SessionMode::Guest);
    manager.add_line(&id("prod_1"), qty(2)).await.unwrap();
    manager.add_line(&id("prod_2"), qty(1)).await.unwrap();
    manager.add_line(&id("prod_3"), qty(1)).await.unwrap();

    let report = manager.on_login().await;

    assert_eq!(report.merged, vec![id("prod_1"), id("prod_2")]);
    assert_eq!(report.failed, vec![id("prod_3")]);
    assert_eq!(report.attempted(), 3);
    assert!(stored_guest_cart(&store).is_none(), "guest cart is cleared");

    assert_eq!(manager.mode(), SessionMode::Authenticated);
    let cart = manager.cart();
    assert_eq!(cart.line(&id("prod_1")).unwrap().quantity.get(), 2);
    assert_eq!(cart.line(&id("prod_2")).unwrap().quantity.get(), 2);
    assert!(cart.line(&id("prod_3")).is_none());
    assert!(cart.cart_id.is_some());
}

#[tokio::test]
async fn test_login_with_empty_guest_cart_only_loads() {
    let (manager, _store) = manager(catalog().server_line("prod_1", 1), SessionMode::Guest);

    let report = manager.on_login().await;

    assert_eq!(report, MergeReport::default());
    assert_eq!(manager.backend().count(|c| matches!(c, Call::Add(..))), 0);
    assert_eq!(manager.backend().count(|c| *c == Call::GetCart), 1);
    assert_eq!(manager.item_count(), 1);
}

#[tokio::test]
async fn test_login_twice_is_a_no_op() {
    let (manager, _store) = manager(catalog(), SessionMode::Authenticated);
    let report = manager.on_login().await;
    assert_eq!(report.attempted(), 0);
    assert!(manager.backend().calls().is_empty());
}

#[tokio::test]
async fn test_logout_discards_server_cart() {
    let (manager, store) = manager(catalog().server_line("prod_3", 1), SessionMode::Authenticated);
    manager.load().await;
    assert_eq!(manager.item_count(), 1);

    let mut guest = Cart::empty();
    guest.add_or_increment(CartLine::new(
        id("prod_2"),
        qty(1),
        ProductSnapshot::placeholder(&id("prod_2"), dollars(500)),
    ));
    store
        .set_item(GUEST_CART_KEY, &serde_json::to_string(&guest).unwrap())
        .unwrap();

    manager.set_session(SessionMode::Guest).await;

    assert_eq!(manager.mode(), SessionMode::Guest);
    let cart = manager.cart();
    assert!(cart.line(&id("prod_3")).is_none());
    assert_eq!(cart.line(&id("prod_2")).unwrap().quantity.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_load_finishing_after_logout_is_discarded() {
    let backend = catalog()
        .server_line("prod_1", 1)
        .with(|s| s.get_cart_delay = Duration::from_secs(2));
    let (manager, _store) = manager(backend, SessionMode::Authenticated);

    let (_, guest) = tokio::join!(manager.load(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.on_logout().await
    });

    assert!(guest.is_empty());
    assert_eq!(manager.mode(), SessionMode::Guest);
    assert!(manager.cart().is_empty(), "server cart must not leak into guest mode");
    assert!(!manager.is_loading());
}

#[tokio::test(start_paused = true)]
async fn test_guest_add_finishing_after_login_is_discarded() {
    let (manager, store) = manager(catalog(), SessionMode::Guest);
    manager.add_line(&id("prod_2"), qty(1)).await.unwrap();
    manager
        .backend()
        .set(|s| s.product_delay = Duration::from_secs(1));

    let prod_1_id = id("prod_1");
    let (added, report) = tokio::join!(manager.add_line(&prod_1_id, qty(1)), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.on_login().await
    });

    assert!(matches!(added.unwrap_err(), CartError::SessionChanged));
    assert_eq!(report.merged, vec![id("prod_2")]);
    assert!(
        stored_guest_cart(&store).is_none(),
        "guest cart stays cleared after the merge"
    );

    assert_eq!(manager.mode(), SessionMode::Authenticated);
    let cart = manager.cart();
    assert_eq!(cart.item_count(), 1);
    assert_eq!(cart.line(&id("prod_2")).unwrap().quantity.get(), 1);
    assert_eq!(
        manager.backend().count(|c| matches!(c, Call::Add(..))),
        1,
        "only the merged line reaches the server"
    );
    assert!(!manager.is_loading());
}

#[tokio::test(start_paused = true)]
async fn test_quantity_update_pending_at_logout_is_dropped() {
    let backend = catalog().server_line("prod_1", 1);
    let (manager, store) =
        manager_with(backend, SessionMode::Authenticated, Duration::from_millis(500));
    manager.load().await;

    let prod_1_id = id("prod_1");
    let (updated, guest) = tokio::join!(manager.update_quantity(&prod_1_id, 3), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.on_logout().await
    });

    assert!(matches!(updated.unwrap_err(), CartError::SessionChanged));
    assert!(guest.is_empty());
    assert_eq!(manager.mode(), SessionMode::Guest);
    assert!(manager.cart().is_empty());
    assert!(stored_guest_cart(&store).is_none());
    assert_eq!(manager.backend().count(|c| matches!(c, Call::Update(..))), 0);
}

#[tokio::test]
async fn test_next_operation_clears_error() {
    let (manager, _store) = manager(catalog(), SessionMode::Guest);
    manager.apply_promotion("SAVE5").await.unwrap_err();
    assert!(manager.error().is_some());

    manager.add_line(&id("prod_1"), qty(1)).await.unwrap();
    assert!(manager.error().is_none());
}
