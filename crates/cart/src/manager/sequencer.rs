//! Per-product sequencing of quantity updates.
//!
//! Every `update_quantity` call takes a ticket. Only the holder of the newest
//! ticket for a product may send its request, and only its response may be
//! applied; older tickets are coalesced (never sent) or stale (response
//! dropped).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use techshelf_core::ProductId;

#[derive(Debug, Default)]
pub(crate) struct UpdateSequencer {
    next: AtomicU64,
    latest: Mutex<HashMap<ProductId, u64>>,
}

impl UpdateSequencer {
    /// Take a new ticket for `product_id`, superseding any earlier one.
    pub(crate) fn begin(&self, product_id: &ProductId) -> u64 {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product_id.clone(), ticket);
        ticket
    }

    /// Whether `ticket` is still the newest for `product_id`.
    pub(crate) fn is_latest(&self, product_id: &ProductId, ticket: u64) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(product_id)
            == Some(&ticket)
    }

    /// Retire `ticket` if it is still the newest. Returns whether it was.
    pub(crate) fn finish(&self, product_id: &ProductId, ticket: u64) -> bool {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if latest.get(product_id) == Some(&ticket) {
            latest.remove(product_id);
            true
        } else {
            false
        }
    }

    /// Supersede every outstanding ticket for `product_id`.
    pub(crate) fn invalidate(&self, product_id: &ProductId) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(product_id);
    }

    /// Supersede every outstanding ticket.
    pub(crate) fn invalidate_all(&self) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
