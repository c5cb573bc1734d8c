//! Guest cart persistence.

use std::sync::Arc;

use tracing::debug;

use techshelf_core::Cart;

use super::{KeyValueStore, StorageError};

/// Storage key holding the JSON-serialized guest cart.
pub const GUEST_CART_KEY: &str = "techshelf_guest_cart";

/// Reads and writes the guest cart under [`GUEST_CART_KEY`].
#[derive(Clone)]
pub struct GuestCartRepository {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for GuestCartRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestCartRepository")
            .field("key", &GUEST_CART_KEY)
            .finish_non_exhaustive()
    }
}

impl GuestCartRepository {
    /// Create a repository over a key/value store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the stored cart; `Ok(None)` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or the stored
    /// value does not parse as a cart.
    pub fn load(&self) -> Result<Option<Cart>, StorageError> {
        let Some(raw) = self.store.get_item(GUEST_CART_KEY)? else {
            return Ok(None);
        };
        let cart = serde_json::from_str(&raw)?;
        Ok(Some(cart))
    }

    /// Persist the cart.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if serialization or the write fails.
    pub fn save(&self, cart: &Cart) -> Result<(), StorageError> {
        let raw = serde_json::to_string(cart)?;
        self.store.set_item(GUEST_CART_KEY, &raw)?;
        debug!(lines = cart.lines.len(), "Guest cart saved");
        Ok(())
    }

    /// Delete the stored cart.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove_item(GUEST_CART_KEY)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use techshelf_core::{CartLine, ProductId, ProductSnapshot, Quantity};

    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_save_then_load() {
        let repo = GuestCartRepository::new(Arc::new(MemoryStore::new()));
        assert!(repo.load().unwrap().is_none());

        let mut cart = Cart::empty();
        cart.add_or_increment(CartLine::new(
            ProductId::new("prod_1"),
            Quantity::new(2).unwrap(),
            ProductSnapshot {
                name: "Cable".to_string(),
                image: None,
                stock: Some(9),
                price: Decimal::new(499, 2),
            },
        ));
        cart.recompute_guest_totals();
        repo.save(&cart).unwrap();

        assert_eq!(repo.load().unwrap(), Some(cart));
        repo.clear().unwrap();
        assert!(repo.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_value_is_a_serialization_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_item(GUEST_CART_KEY, "{not json").unwrap();
        let repo = GuestCartRepository::new(store);
        assert!(matches!(repo.load(), Err(StorageError::Serialization(_))));
    }
}
