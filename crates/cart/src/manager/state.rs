//! Observable cart state.

use tokio::sync::watch;

use techshelf_core::{Cart, SessionMode};

/// What consumers of the cart manager observe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartState {
    /// Which store is authoritative.
    pub mode: SessionMode,
    /// The current cart.
    pub cart: Cart,
    /// Message from the most recent failure, cleared when the next
    /// operation starts.
    pub error: Option<String>,
    in_flight: usize,
}

impl CartState {
    /// Initial state for a session mode.
    #[must_use]
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Whether any network operation is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.in_flight > 0
    }
}

/// Marks the state as loading for as long as it is alive.
pub(crate) struct LoadingGuard<'a> {
    state: &'a watch::Sender<CartState>,
}

impl<'a> LoadingGuard<'a> {
    pub(crate) fn new(state: &'a watch::Sender<CartState>) -> Self {
        state.send_modify(|s| s.in_flight += 1);
        Self { state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state
            .send_modify(|s| s.in_flight = s.in_flight.saturating_sub(1));
    }
}
