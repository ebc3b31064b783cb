//! Last observed trade price per symbol.
//!
//! The symbol set is closed and tiny, so this is a fixed array of per-symbol
//! cells indexed by the enum rather than a general map. The ingester writes,
//! the matchers read; each lock guards exactly one cell and is never held
//! across an await point.

use crate::models::Symbol;
use parking_lot::RwLock;

/// Sentinel meaning "no tick observed yet"; matchers skip it.
pub const NO_TICK: &str = "0";

pub struct LastPriceMap {
    cells: [RwLock<String>; Symbol::COUNT],
}

impl LastPriceMap {
    pub fn new() -> Self {
        Self {
            cells: std::array::from_fn(|_| RwLock::new(NO_TICK.to_string())),
        }
    }

    /// Latest price string for a symbol, verbatim from the feed.
    pub fn get(&self, symbol: Symbol) -> String {
        self.cells[symbol.slot()].read().clone()
    }

    pub fn set(&self, symbol: Symbol, price: String) {
        *self.cells[symbol.slot()].write() = price;
    }
}

impl Default for LastPriceMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_sentinel() {
        let map = LastPriceMap::new();
        for symbol in Symbol::ALL {
            assert_eq!(map.get(symbol), NO_TICK);
        }
    }

    #[test]
    fn test_set_overwrites_single_cell() {
        let map = LastPriceMap::new();
        map.set(Symbol::Btc, "64123.50".to_string());
        map.set(Symbol::Btc, "64124.00".to_string());

        assert_eq!(map.get(Symbol::Btc), "64124.00");
        assert_eq!(map.get(Symbol::Eth), NO_TICK);
    }
}
