//! Merged federation order book

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::domain::{OrderType, PublicOrder};

const SATS_PER_BTC: i64 = 100_000_000;

/// Outcome of applying one keyed update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookChange {
    Inserted,
    Replaced,
    Removed,
    /// Identical order already present, or tombstone for an absent key
    Unchanged,
}

impl BookChange {
    pub fn is_change(&self) -> bool {
        !matches!(self, BookChange::Unchanged)
    }
}

/// Merge key -> order. Entries are replaced or removed whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedBook {
    orders: BTreeMap<String, PublicOrder>,
}

impl MergedBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write per key wins; `None` is a tombstone.
    pub fn apply(&mut self, key: String, order: Option<PublicOrder>) -> BookChange {
        match order {
            Some(order) => match self.orders.get(&key) {
                Some(existing) if *existing == order => BookChange::Unchanged,
                Some(_) => {
                    self.orders.insert(key, order);
                    BookChange::Replaced
                }
                None => {
                    self.orders.insert(key, order);
                    BookChange::Inserted
                }
            },
            None => match self.orders.remove(&key) {
                Some(_) => BookChange::Removed,
                None => BookChange::Unchanged,
            },
        }
    }

    /// Replace the whole book with the union of per-coordinator books.
    pub fn replace_with_union<'a>(
        &mut self,
        books: impl IntoIterator<Item = &'a BTreeMap<String, PublicOrder>>,
    ) {
        self.orders.clear();
        for book in books {
            self.orders
                .extend(book.iter().map(|(key, order)| (key.clone(), order.clone())));
        }
    }

    pub fn clear(&mut self) {
        self.orders.clear();
    }

    pub fn get(&self, key: &str) -> Option<&PublicOrder> {
        self.orders.get(key)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn orders(&self) -> &BTreeMap<String, PublicOrder> {
        &self.orders
    }

    pub fn count(&self, order_type: OrderType) -> u64 {
        self.orders
            .values()
            .filter(|o| o.order_type == order_type)
            .count() as u64
    }

    /// Sum of the current satoshi value of every order, in BTC
    pub fn liquidity_btc(&self) -> Decimal {
        let sats: u64 = self.orders.values().filter_map(|o| o.satoshis_now).sum();
        Decimal::from(sats) / Decimal::from(SATS_PER_BTC)
    }
}
