//! Request-cost accounting (spec §4.1): counts requests by class and
//! projects a USD cost using a small static pricing table.

use std::sync::atomic::{AtomicU64, Ordering};

/// The request class a blob operation falls into, for pricing purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestClass {
    Get,
    Put,
    List,
    Delete,
}

/// Per-million-request USD pricing, modeled loosely on AWS S3 standard
/// tier pricing. `Delete` is free on S3; kept here for symmetry and so a
/// differently priced backend can override it.
const PRICE_PER_MILLION_USD: [(RequestClass, f64); 4] = [
    (RequestClass::Get, 0.40),
    (RequestClass::Put, 5.00),
    (RequestClass::List, 5.00),
    (RequestClass::Delete, 0.0),
];

fn price_per_million(class: RequestClass) -> f64 {
    PRICE_PER_MILLION_USD
        .iter()
        .find(|(c, _)| *c == class)
        .map(|(_, p)| *p)
        .unwrap_or(0.0)
}

/// Tracks request counts by class across the lifetime of a `BlobClient`
/// and projects their cumulative USD cost. Cheap enough to update on
/// every request (plain atomics, no locking).
#[derive(Default)]
pub struct CostMeter {
    get: AtomicU64,
    put: AtomicU64,
    list: AtomicU64,
    delete: AtomicU64,
}

impl CostMeter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, class: RequestClass) {
        let counter = match class {
            RequestClass::Get => &self.get,
            RequestClass::Put => &self.put,
            RequestClass::List => &self.list,
            RequestClass::Delete => &self.delete,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn count(&self, class: RequestClass) -> u64 {
        match class {
            RequestClass::Get => self.get.load(Ordering::Relaxed),
            RequestClass::Put => self.put.load(Ordering::Relaxed),
            RequestClass::List => self.list.load(Ordering::Relaxed),
            RequestClass::Delete => self.delete.load(Ordering::Relaxed),
        }
    }

    /// Projected total USD cost across every request class recorded so
    /// far (`costs.total` in spec §4.1).
    #[must_use]
    pub fn total(&self) -> f64 {
        [RequestClass::Get, RequestClass::Put, RequestClass::List, RequestClass::Delete]
            .into_iter()
            .map(|class| self.count(class) as f64 / 1_000_000.0 * price_per_million(class))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_projects_cost() {
        let meter = CostMeter::new();
        for _ in 0..1_000_000 {
            meter.record(RequestClass::Get);
        }
        meter.record(RequestClass::Put);
        assert_eq!(meter.count(RequestClass::Get), 1_000_000);
        assert!((meter.total() - (0.40 + 5.00 / 1_000_000.0)).abs() < 1e-9);
    }

    #[test]
    fn deletes_are_free() {
        let meter = CostMeter::new();
        meter.record(RequestClass::Delete);
        assert_eq!(meter.total(), 0.0);
    }
}
