//! Cart state manager.
//!
//! [`CartStateManager`] is the single source of truth for "what is in the
//! cart right now". It bridges two modes:
//!
//! - **Guest** - the cart lives in local storage and every mutation is
//!   applied and persisted locally.
//! - **Authenticated** - the backend cart is authoritative. Mutations go to
//!   the server and the reply (or a full reload) replaces local state.
//!
//! The Guest → Authenticated transition merges the guest cart into the
//! server cart; Authenticated → Guest discards server data and reloads from
//! storage.
//!
//! # Failure semantics
//!
//! Reads never fail: they degrade to an empty cart and set the error flag.
//! Writes record the error in the flag *and* return it; an optimistic update
//! is rolled back by reloading from the server.
//!
//! # Concurrency
//!
//! Operations take `&self` and may run concurrently on one task. A session
//! epoch guards against results from a previous session landing after a
//! login or logout, and [`UpdateSequencer`] coalesces rapid quantity updates.

mod sequencer;
mod state;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use techshelf_core::{Cart, CartLine, ProductId, ProductSnapshot, Quantity, SessionMode};

use crate::api::CartBackend;
use crate::api::types::{CheckoutDetails, Order, Promotion};
use crate::config::ManagerConfig;
use crate::error::{CartError, Result};
use crate::storage::GuestCartRepository;

use sequencer::UpdateSequencer;
use state::LoadingGuard;

pub use state::CartState;

const FETCH_CART_FAILED: &str = "Failed to fetch cart";
const LOAD_GUEST_CART_FAILED: &str = "Failed to load saved cart";
const ADD_FAILED: &str = "Failed to add item to cart";
const REMOVE_FAILED: &str = "Failed to remove item from cart";
const UPDATE_FAILED: &str = "Failed to update cart";
const PROMOTION_FAILED: &str = "Invalid discount code";
const CHECKOUT_FAILED: &str = "Checkout failed";

/// Outcome of merging a guest cart into the server cart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Products added to the server cart.
    pub merged: Vec<ProductId>,
    /// Products the server refused; they are dropped with the guest cart.
    pub failed: Vec<ProductId>,
}

impl MergeReport {
    /// Number of add calls issued.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.merged.len() + self.failed.len()
    }
}

/// Owns the current cart for one user session.
pub struct CartStateManager<B> {
    backend: B,
    guest_cart: GuestCartRepository,
    config: ManagerConfig,
    state: watch::Sender<CartState>,
    updates: UpdateSequencer,
    epoch: AtomicU64,
}

impl<B> std::fmt::Debug for CartStateManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStateManager")
            .field("state", &*self.state.borrow())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: CartBackend> CartStateManager<B> {
    /// Create a manager for a session starting in `mode`.
    ///
    /// The cart starts empty; call [`load`](Self::load) to populate it.
    #[must_use]
    pub fn new(
        backend: B,
        guest_cart: GuestCartRepository,
        config: ManagerConfig,
        mode: SessionMode,
    ) -> Self {
        let (state, _) = watch::channel(CartState::new(mode));
        Self {
            backend,
            guest_cart,
            config,
            state,
            updates: UpdateSequencer::default(),
            epoch: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The backend this manager talks to.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartState> {
        self.state.subscribe()
    }

    /// Snapshot of the full state.
    #[must_use]
    pub fn state(&self) -> CartState {
        self.state.borrow().clone()
    }

    /// Snapshot of the cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.state.borrow().cart.clone()
    }

    /// Current session mode.
    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.state.borrow().mode
    }

    /// Whether any network operation is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    /// Message from the most recent failure.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// Number of distinct lines in the cart.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.state.borrow().cart.item_count()
    }

    /// Cart total, or zero for an empty cart.
    #[must_use]
    pub fn cart_total(&self) -> Decimal {
        self.state.borrow().cart.total
    }

    // =========================================================================
    // State helpers
    // =========================================================================

    fn loading(&self) -> LoadingGuard<'_> {
        LoadingGuard::new(&self.state)
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    fn record(&self, err: CartError) -> CartError {
        let message = err.to_string();
        self.state.send_modify(|s| s.error = Some(message));
        err
    }

    fn record_message(&self, message: &str) {
        self.state.send_modify(|s| s.error = Some(message.to_string()));
    }

    /// Replace the cart unless a session transition happened since `epoch`.
    fn commit(&self, epoch: u64, cart: Cart) -> bool {
        if self.current_epoch() != epoch {
            debug!("Discarding cart from a previous session");
            return false;
        }
        self.state.send_modify(|s| s.cart = cart);
        true
    }

    /// Switch mode, invalidating everything in flight for the old session.
    fn begin_session(&self, mode: SessionMode) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.updates.invalidate_all();
        self.state.send_modify(|s| s.mode = mode);
    }

    /// Apply a mutation to the stored guest cart, persist, then publish.
    ///
    /// The stored cart is the starting point, so mutating before `load`
    /// keeps saved lines. Nothing is written if a session transition
    /// happened since `epoch`, and nothing is published if the write fails.
    fn mutate_guest(&self, epoch: u64, mutate: impl FnOnce(&mut Cart)) -> Result<Cart> {
        if self.current_epoch() != epoch {
            debug!("Session changed, guest cart left alone");
            return Err(CartError::SessionChanged);
        }

        let mut cart = match self.guest_cart.load() {
            Ok(stored) => stored.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Stored guest cart is unreadable, mutating the loaded cart");
                self.cart()
            }
        };
        mutate(&mut cart);
        cart.recompute_guest_totals();
        self.guest_cart
            .save(&cart)
            .map_err(|e| self.record(CartError::from(e)))?;
        self.commit(epoch, cart.clone());
        Ok(cart)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load the cart for the current mode.
    ///
    /// Never fails: an unreadable guest cart or a failed fetch yields the
    /// empty cart and sets the error flag.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Cart {
        self.clear_error();
        match self.mode() {
            SessionMode::Guest => self.load_guest(),
            SessionMode::Authenticated => self.load_server().await,
        }
    }

    /// Re-run [`load`](Self::load) for the current mode.
    pub async fn refresh(&self) -> Cart {
        self.load().await
    }

    fn load_guest(&self) -> Cart {
        let epoch = self.current_epoch();
        let cart = match self.guest_cart.load() {
            Ok(Some(mut cart)) => {
                cart.recompute_guest_totals();
                cart
            }
            Ok(None) => Cart::empty(),
            Err(e) => {
                warn!(error = %e, "Stored guest cart is unreadable, starting empty");
                self.record_message(LOAD_GUEST_CART_FAILED);
                Cart::empty()
            }
        };
        self.commit(epoch, cart.clone());
        cart
    }

    async fn load_server(&self) -> Cart {
        let _loading = self.loading();
        let epoch = self.current_epoch();

        let cart = match self.backend.get_cart().await {
            Ok(cart) => self.enrich(cart).await,
            Err(e) => {
                warn!(error = %e, "Failed to fetch cart");
                if self.current_epoch() == epoch {
                    self.record_message(FETCH_CART_FAILED);
                }
                Cart::empty()
            }
        };

        self.commit(epoch, cart.clone());
        cart
    }

    /// Fetch details for every line the server sent without an image.
    ///
    /// A failed fetch gives the line a placeholder snapshot instead of
    /// failing the load.
    async fn enrich(&self, mut cart: Cart) -> Cart {
        let targets: Vec<(usize, ProductId)> = cart
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.product.is_enriched())
            .map(|(index, line)| (index, line.product_id.clone()))
            .collect();

        if targets.is_empty() {
            return cart;
        }

        let fetches = targets.into_iter().map(|(index, product_id)| async move {
            let result = self.backend.get_product(&product_id).await;
            (index, product_id, result)
        });

        for (index, product_id, result) in join_all(fetches).await {
            let Some(line) = cart.lines.get_mut(index) else {
                continue;
            };
            match result {
                Ok(product) => {
                    if line.unit_price.is_zero() {
                        line.unit_price = product.price;
                    }
                    line.product = product;
                }
                Err(e) => {
                    warn!(
                        product_id = %product_id,
                        error = %e,
                        "Failed to fetch product details, using placeholder"
                    );
                    line.product = ProductSnapshot::placeholder(&product_id, line.unit_price);
                }
            }
        }

        cart
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of a product.
    ///
    /// Guest: fetches product details and adds or increments the line
    /// locally. Authenticated: adds on the server, then reloads the whole
    /// cart so server-computed totals stay correct.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the product lookup, the server call or the
    /// guest cart write fails.
    #[instrument(skip_all, fields(product_id = %product_id, quantity = %quantity))]
    pub async fn add_line(&self, product_id: &ProductId, quantity: Quantity) -> Result<Cart> {
        self.clear_error();
        let epoch = self.current_epoch();

        match self.mode() {
            SessionMode::Guest => {
                let product = {
                    let _loading = self.loading();
                    self.backend
                        .get_product(product_id)
                        .await
                        .map_err(|e| self.record(CartError::from_api(e, ADD_FAILED)))?
                };
                let line = CartLine::new(product_id.clone(), quantity, product);
                self.mutate_guest(epoch, |cart| cart.add_or_increment(line))
            }
            SessionMode::Authenticated => {
                let _loading = self.loading();
                self.backend
                    .add_item(product_id, quantity)
                    .await
                    .map_err(|e| self.record(CartError::from_api(e, ADD_FAILED)))?;
                Ok(self.load_server().await)
            }
        }
    }

    /// Remove a product's line. Removing an absent product is not an error.
    ///
    /// Authenticated: the server's reply replaces the cart, with each line's
    /// product snapshot filled from what was already known.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the server call or the guest cart write fails.
    #[instrument(skip_all, fields(product_id = %product_id))]
    pub async fn remove_line(&self, product_id: &ProductId) -> Result<Cart> {
        self.clear_error();
        let epoch = self.current_epoch();
        self.updates.invalidate(product_id);

        match self.mode() {
            SessionMode::Guest => self.mutate_guest(epoch, |cart| {
                cart.remove_line(product_id);
            }),
            SessionMode::Authenticated => {
                let _loading = self.loading();
                let known = self.cart();
                let mut cart = self
                    .backend
                    .remove_item(product_id)
                    .await
                    .map_err(|e| self.record(CartError::from_api(e, REMOVE_FAILED)))?;

                for line in &mut cart.lines {
                    if let Some(previous) = known.line(&line.product_id) {
                        line.product.merge_known(&previous.product);
                    }
                }

                self.commit(epoch, cart.clone());
                Ok(cart)
            }
        }
    }

    /// Set a product's quantity; below one removes the line.
    ///
    /// Authenticated: the new quantity shows immediately, the request goes
    /// out once no newer update for the same product arrives within the
    /// debounce window, and a failure reloads the server cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the server call or the guest cart write fails.
    #[instrument(skip_all, fields(product_id = %product_id, quantity = quantity))]
    pub async fn update_quantity(&self, product_id: &ProductId, quantity: i64) -> Result<Cart> {
        let Some(quantity) = Quantity::new(quantity.clamp(0, i64::from(u32::MAX))) else {
            return self.remove_line(product_id).await;
        };

        self.clear_error();
        let epoch = self.current_epoch();

        match self.mode() {
            SessionMode::Guest => self.mutate_guest(epoch, |cart| {
                cart.set_quantity(product_id, quantity);
            }),
            SessionMode::Authenticated => {
                self.update_server_quantity(epoch, product_id, quantity)
                    .await
            }
        }
    }

    async fn update_server_quantity(
        &self,
        epoch: u64,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> Result<Cart> {
        let ticket = self.updates.begin(product_id);

        // Optimistic
        self.state.send_modify(|s| {
            s.cart.set_quantity(product_id, quantity);
        });

        if !self.config.update_debounce.is_zero() {
            tokio::time::sleep(self.config.update_debounce).await;
        }
        if self.current_epoch() != epoch {
            debug!("Session changed before the quantity update was sent");
            return Err(CartError::SessionChanged);
        }
        if !self.updates.is_latest(product_id, ticket) {
            debug!("Quantity update superseded before sending");
            return Ok(self.cart());
        }

        let _loading = self.loading();
        match self.backend.update_item(product_id, quantity).await {
            Ok(mut cart) => {
                if !self.updates.finish(product_id, ticket) {
                    debug!("Discarding stale quantity update response");
                    return Ok(self.cart());
                }

                let known = self.cart();
                for line in &mut cart.lines {
                    if line.product.image.is_none()
                        && let Some(previous) = known.line(&line.product_id)
                    {
                        line.product.image.clone_from(&previous.product.image);
                    }
                }

                self.commit(epoch, cart.clone());
                Ok(cart)
            }
            Err(e) => {
                let err = CartError::from_api(e, UPDATE_FAILED);
                if self.updates.finish(product_id, ticket) && self.current_epoch() == epoch {
                    warn!(error = %err, "Quantity update failed, reloading cart");
                    self.load_server().await;
                }
                Err(self.record(err))
            }
        }
    }

    /// Apply a discount code, then reload so the server's discount shows.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for guest sessions or an empty code,
    /// and `CartError::Server` if the backend rejects the code.
    #[instrument(skip(self))]
    pub async fn apply_promotion(&self, code: &str) -> Result<Promotion> {
        self.clear_error();

        if !self.mode().is_authenticated() {
            return Err(self.record(CartError::login_required("apply a promotion code")));
        }
        let code = code.trim();
        if code.is_empty() {
            return Err(self.record(CartError::Validation(
                "Discount code is required".to_string(),
            )));
        }

        let _loading = self.loading();
        let promotion = self
            .backend
            .apply_promotion(code)
            .await
            .map_err(|e| self.record(CartError::from_api(e, PROMOTION_FAILED)))?;

        info!(code = %promotion.discount_code, "Promotion applied");
        self.load_server().await;
        Ok(promotion)
    }

    /// Place the order. On success the cart is reset to empty.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for guest sessions or incomplete
    /// details, and `CartError::Server`/`Network` if the backend call fails.
    #[instrument(skip(self, details))]
    pub async fn checkout(&self, details: &CheckoutDetails) -> Result<Order> {
        self.clear_error();

        if !self.mode().is_authenticated() {
            return Err(self.record(CartError::login_required("check out")));
        }
        if !details.shipping.is_complete() {
            return Err(self.record(CartError::Validation(
                "Please fill in all shipping information".to_string(),
            )));
        }
        if !details.use_saved_card
            && !details
                .payment_info
                .as_ref()
                .is_some_and(|payment| payment.is_complete())
        {
            return Err(self.record(CartError::Validation(
                "Please fill in all payment information".to_string(),
            )));
        }

        let epoch = self.current_epoch();
        let _loading = self.loading();
        let order = self
            .backend
            .checkout(details)
            .await
            .map_err(|e| self.record(CartError::from_api(e, CHECKOUT_FAILED)))?;

        info!(order_id = %order.order_id, "Order placed");
        self.updates.invalidate_all();
        self.commit(epoch, Cart::empty());
        Ok(order)
    }

    /// Delete the guest cart from storage and memory.
    ///
    /// Does nothing in an authenticated session.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Storage` if the stored cart cannot be removed.
    pub fn clear_guest_cart(&self) -> Result<()> {
        self.clear_error();
        if self.mode().is_authenticated() {
            debug!("Authenticated session, guest cart left alone");
            return Ok(());
        }
        self.guest_cart
            .clear()
            .map_err(|e| self.record(CartError::from(e)))?;
        self.commit(self.current_epoch(), Cart::empty());
        Ok(())
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Push every guest line into the server cart, one at a time.
    ///
    /// A line the server refuses is logged and skipped. The guest cart is
    /// cleared afterwards either way, and the server cart is reloaded when
    /// any line was sent. An empty guest cart makes no server calls.
    #[instrument(skip(self))]
    pub async fn merge_after_login(&self) -> MergeReport {
        self.clear_error();
        let mut report = MergeReport::default();

        if !self.mode().is_authenticated() {
            warn!("Merge requested outside an authenticated session");
            return report;
        }

        let guest = match self.guest_cart.load() {
            Ok(cart) => cart.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Stored guest cart is unreadable, nothing to merge");
                Cart::empty()
            }
        };

        if !guest.is_empty() {
            let _loading = self.loading();
            for line in &guest.lines {
                match self.backend.add_item(&line.product_id, line.quantity).await {
                    Ok(_) => report.merged.push(line.product_id.clone()),
                    Err(e) => {
                        warn!(
                            product_id = %line.product_id,
                            error = %e,
                            "Failed to merge guest cart line"
                        );
                        report.failed.push(line.product_id.clone());
                    }
                }
            }
            info!(
                merged = report.merged.len(),
                failed = report.failed.len(),
                "Guest cart merged"
            );
        }

        if let Err(e) = self.guest_cart.clear() {
            warn!(error = %e, "Failed to clear guest cart after merge");
        }

        if report.attempted() > 0 {
            self.load_server().await;
        }
        report
    }

    /// Move to `mode`, running the matching transition.
    ///
    /// Setting the current mode again does nothing.
    pub async fn set_session(&self, mode: SessionMode) {
        match mode {
            SessionMode::Authenticated => {
                self.on_login().await;
            }
            SessionMode::Guest => {
                self.on_logout().await;
            }
        }
    }

    /// Guest → Authenticated: merge the guest cart, then show the server cart.
    ///
    /// Returns an empty report if the session was already authenticated.
    #[instrument(skip(self))]
    pub async fn on_login(&self) -> MergeReport {
        if self.mode().is_authenticated() {
            debug!("Already authenticated");
            return MergeReport::default();
        }

        self.begin_session(SessionMode::Authenticated);
        let report = self.merge_after_login().await;
        if report.attempted() == 0 {
            self.load_server().await;
        }
        report
    }

    /// Authenticated → Guest: drop server data and load the guest cart.
    #[instrument(skip(self))]
    pub async fn on_logout(&self) -> Cart {
        if !self.mode().is_authenticated() {
            debug!("Already a guest session");
            return self.cart();
        }

        self.begin_session(SessionMode::Guest);
        self.state.send_modify(|s| s.cart = Cart::empty());
        self.load().await
    }
}
