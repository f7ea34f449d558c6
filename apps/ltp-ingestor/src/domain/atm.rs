//! ATM Strike Tracking
//!
//! Computes the at-the-money strike for an index price and decides, per
//! index, when the option ladder around it must be subscribed.
//!
//! # Expansion Rule
//!
//! The first price observed for an index fires the expansion exactly once.
//! Later prices only refresh `last_price`, however far the index moves.
//! [`AtmTracker::rearm`] is the hook for re-firing after an expiry rollover.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::observation::Strike;

/// Strike step used for indices missing from the table.
pub const DEFAULT_STRIKE_STEP: Strike = 100;

// =============================================================================
// Strike Table
// =============================================================================

/// Per-index strike step lookup.
///
/// Keys are stored upper-cased; lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct StrikeTable {
    steps: HashMap<String, Strike>,
    default_step: Strike,
}

impl Default for StrikeTable {
    fn default() -> Self {
        let steps = [
            ("NIFTY", 50),
            ("BANKNIFTY", 100),
            ("FINNIFTY", 50),
            ("MIDCPNIFTY", 25),
            ("BANKEX", 100),
            ("SENSEX", 100),
        ]
        .into_iter()
        .map(|(name, step)| (name.to_string(), step))
        .collect();

        Self {
            steps,
            default_step: DEFAULT_STRIKE_STEP,
        }
    }
}

impl StrikeTable {
    /// Override or add the step for one index. Non-positive steps are ignored.
    #[must_use]
    pub fn with_step(mut self, index: &str, step: Strike) -> Self {
        if step > 0 {
            self.steps.insert(index.to_uppercase(), step);
        }
        self
    }

    /// Strike step for an index.
    #[must_use]
    pub fn step(&self, index: &str) -> Strike {
        self.steps
            .get(&index.to_uppercase())
            .copied()
            .unwrap_or(self.default_step)
    }

    /// Round a price to the nearest strike of the index.
    ///
    /// Returns `None` for non-finite or non-positive prices, and for prices
    /// whose strike does not fit a [`Strike`].
    #[must_use]
    pub fn atm_strike(&self, index: &str, price: f64) -> Option<Strike> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }
        let step = self.step(index);
        #[allow(clippy::cast_precision_loss)]
        let (steps, limit) = ((price / step as f64).round(), Strike::MAX as f64);
        if steps >= limit {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let steps = steps as Strike;
        steps.checked_mul(step)
    }

    /// Symmetric ladder of up to `2 * range + 1` strikes centred on `atm`,
    /// ascending. Strikes outside the [`Strike`] range are left out.
    #[must_use]
    pub fn ladder(&self, index: &str, atm: Strike, range: u32) -> Vec<Strike> {
        let step = self.step(index);
        let range = i64::from(range);
        (-range..=range)
            .filter_map(|i| i.checked_mul(step).and_then(|offset| atm.checked_add(offset)))
            .collect()
    }
}

// =============================================================================
// ATM Tracker
// =============================================================================

/// Per-index expansion state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AtmState {
    /// Last observed index price.
    pub last_price: f64,
    /// Whether the option ladder has been expanded for this index.
    pub expansion_done: bool,
    /// ATM strike computed when the expansion fired.
    pub atm_strike: Option<Strike>,
}

/// Tracks index prices and fires the one-shot ladder expansion.
#[derive(Debug, Default)]
pub struct AtmTracker {
    table: StrikeTable,
    states: Mutex<HashMap<String, AtmState>>,
}

impl AtmTracker {
    /// Create a tracker over a strike table.
    #[must_use]
    pub fn new(table: StrikeTable) -> Self {
        Self {
            table,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Strike table used by this tracker.
    #[must_use]
    pub const fn table(&self) -> &StrikeTable {
        &self.table
    }

    /// Record an index price.
    ///
    /// Returns the ATM strike to expand around on the first usable price for
    /// the index, and `None` on every later call. The check-and-set runs under
    /// one lock so two concurrent first prices cannot both fire.
    pub fn observe_index_price(&self, index: &str, price: f64) -> Option<Strike> {
        let mut states = self.states.lock();
        let state = states.entry(index.to_string()).or_default();
        state.last_price = price;

        if state.expansion_done {
            return None;
        }

        let atm = self.table.atm_strike(index, price)?;
        state.expansion_done = true;
        state.atm_strike = Some(atm);
        Some(atm)
    }

    /// Allow the next price for `index` to fire a new expansion.
    ///
    /// Returns `true` if the index had already expanded.
    pub fn rearm(&self, index: &str) -> bool {
        self.states.lock().get_mut(index).is_some_and(|state| {
            let was_done = state.expansion_done;
            state.expansion_done = false;
            state.atm_strike = None;
            was_done
        })
    }

    /// Current state for an index.
    #[must_use]
    pub fn state(&self, index: &str) -> Option<AtmState> {
        self.states.lock().get(index).copied()
    }

    /// Last observed price for an index.
    #[must_use]
    pub fn last_price(&self, index: &str) -> Option<f64> {
        self.state(index).map(|s| s.last_price)
    }

    /// Indices whose ladder has been expanded.
    #[must_use]
    pub fn expanded_indices(&self) -> Vec<String> {
        self.states
            .lock()
            .iter()
            .filter(|(_, s)| s.expansion_done)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("NIFTY", 50)]
    #[test_case("nifty", 50)]
    #[test_case("BANKNIFTY", 100)]
    #[test_case("FINNIFTY", 50)]
    #[test_case("MIDCPNIFTY", 25)]
    #[test_case("BANKEX", 100)]
    #[test_case("SENSEX", 100)]
    #[test_case("UNLISTED", DEFAULT_STRIKE_STEP)]
    fn strike_steps(index: &str, expected: Strike) {
        assert_eq!(StrikeTable::default().step(index), expected);
    }

    #[test]
    fn nifty_atm_rounds_to_nearest_step() {
        let table = StrikeTable::default();
        assert_eq!(table.atm_strike("NIFTY", 24_980.0), Some(25_000));
        assert_eq!(table.atm_strike("NIFTY", 24_974.9), Some(24_950));
        assert_eq!(table.atm_strike("NIFTY", 24_975.0), Some(25_000));
    }

    #[test]
    fn atm_rejects_unusable_prices() {
        let table = StrikeTable::default();
        assert_eq!(table.atm_strike("NIFTY", 0.0), None);
        assert_eq!(table.atm_strike("NIFTY", -10.0), None);
        assert_eq!(table.atm_strike("NIFTY", f64::NAN), None);
        assert_eq!(table.atm_strike("NIFTY", f64::INFINITY), None);
    }

    #[test]
    fn atm_rejects_prices_beyond_strike_range() {
        let table = StrikeTable::default();
        assert_eq!(table.atm_strike("NIFTY", 1e300), None);
        assert_eq!(table.atm_strike("NIFTY", f64::MAX), None);
        assert_eq!(table.atm_strike("NIFTY", 4.7e20), None);
        assert_eq!(table.atm_strike("NIFTY", 1e15), Some(1_000_000_000_000_000));
    }

    #[test]
    fn ladder_skips_overflowing_strikes() {
        let table = StrikeTable::default();
        let top = Strike::MAX - 10;
        assert_eq!(table.ladder("NIFTY", top, 1), vec![top - 50, top]);
    }

    #[test]
    fn huge_index_price_never_fires_expansion() {
        let tracker = AtmTracker::new(StrikeTable::default());

        assert_eq!(tracker.observe_index_price("NIFTY", 1e300), None);
        assert_eq!(tracker.observe_index_price("NIFTY", 24_980.0), Some(25_000));
    }

    #[test]
    fn ladder_is_symmetric() {
        let table = StrikeTable::default();
        assert_eq!(table.ladder("NIFTY", 25_000, 1), vec![24_950, 25_000, 25_050]);
        assert_eq!(table.ladder("NIFTY", 25_000, 0), vec![25_000]);
        assert_eq!(table.ladder("BANKNIFTY", 52_000, 5).len(), 11);
    }

    #[test]
    fn step_override() {
        let table = StrikeTable::default()
            .with_step("nifty", 100)
            .with_step("CUSTOM", 10)
            .with_step("BROKEN", 0);
        assert_eq!(table.step("NIFTY"), 100);
        assert_eq!(table.step("CUSTOM"), 10);
        assert_eq!(table.step("BROKEN"), DEFAULT_STRIKE_STEP);
    }

    #[test]
    fn first_price_fires_once() {
        let tracker = AtmTracker::new(StrikeTable::default());

        assert_eq!(tracker.observe_index_price("NIFTY", 24_980.0), Some(25_000));
        assert_eq!(tracker.observe_index_price("NIFTY", 26_500.0), None);
        assert_eq!(tracker.observe_index_price("NIFTY", 20_000.0), None);

        let state = tracker.state("NIFTY").unwrap();
        assert!(state.expansion_done);
        assert_eq!(state.atm_strike, Some(25_000));
        assert!((state.last_price - 20_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn indices_are_independent() {
        let tracker = AtmTracker::new(StrikeTable::default());

        assert_eq!(tracker.observe_index_price("NIFTY", 24_980.0), Some(25_000));
        assert_eq!(
            tracker.observe_index_price("BANKNIFTY", 51_960.0),
            Some(52_000)
        );

        let mut expanded = tracker.expanded_indices();
        expanded.sort();
        assert_eq!(expanded, vec!["BANKNIFTY".to_string(), "NIFTY".to_string()]);
    }

    #[test]
    fn unusable_price_does_not_consume_the_expansion() {
        let tracker = AtmTracker::new(StrikeTable::default());

        assert_eq!(tracker.observe_index_price("NIFTY", 0.0), None);
        assert_eq!(tracker.last_price("NIFTY"), Some(0.0));
        assert_eq!(tracker.observe_index_price("NIFTY", 24_980.0), Some(25_000));
    }

    #[test]
    fn rearm_allows_a_new_expansion() {
        let tracker = AtmTracker::new(StrikeTable::default());

        assert!(!tracker.rearm("NIFTY"));
        tracker.observe_index_price("NIFTY", 24_980.0);
        assert!(tracker.rearm("NIFTY"));
        assert_eq!(tracker.observe_index_price("NIFTY", 25_130.0), Some(25_150));
    }

    #[test]
    fn thread_safety_single_fire() {
        use std::sync::Arc;
        use std::thread;

        let tracker = Arc::new(AtmTracker::new(StrikeTable::default()));
        let mut handles = vec![];

        for i in 0..16 {
            let t = Arc::clone(&tracker);
            handles.push(thread::spawn(move || {
                t.observe_index_price("NIFTY", 24_900.0 + f64::from(i))
            }));
        }

        let fired = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();

        assert_eq!(fired, 1);
    }
}
