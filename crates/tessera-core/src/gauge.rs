//! Value tracking with edge-triggered depletion.
//!
//! A [`Gauge`] holds a bounded quantity (hit points, fuel, ammunition) and
//! owns two channels: [`Gauge::changed`] fires on every actual change, and
//! [`Gauge::depleted`] fires only when the value crosses from positive to
//! zero or below. Staying at zero never re-fires; climbing back above zero
//! re-arms the next crossing.

use crate::event::EventChannel;

/// Payload of [`Gauge::changed`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugeChanged {
    pub previous: f64,
    pub current: f64,
    pub max: f64,
}

/// Payload of [`Gauge::depleted`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Depleted {
    /// Value before the crossing.
    pub from: f64,
}

/// A bounded value with change and depletion notifications.
#[derive(Debug)]
pub struct Gauge {
    current: f64,
    max: f64,
    pub changed: EventChannel<GaugeChanged>,
    pub depleted: EventChannel<Depleted>,
}

impl Gauge {
    /// A gauge starting full.
    pub fn full(max: f64) -> Self {
        Self::new(max, max)
    }

    /// A gauge starting at `current`, clamped to `max`.
    pub fn new(current: f64, max: f64) -> Self {
        Self {
            current: current.min(max),
            max,
            changed: EventChannel::named("gauge.changed"),
            depleted: EventChannel::named("gauge.depleted"),
        }
    }

    /// The current value; may be below zero.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// The upper bound.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// `true` at or below zero.
    pub fn is_depleted(&self) -> bool {
        self.current <= 0.0
    }

    /// Set the value (clamped to `max`; may go below zero).
    ///
    /// Emits `changed` if the value moved and `depleted` on a positive to
    /// non-positive edge.
    pub fn set(&mut self, value: f64) {
        let previous = self.current;
        let current = value.min(self.max);
        if current == previous {
            return;
        }
        self.current = current;
        self.changed.emit(&GaugeChanged {
            previous,
            current,
            max: self.max,
        });
        if previous > 0.0 && current <= 0.0 {
            self.depleted.emit(&Depleted { from: previous });
        }
    }

    /// Add `delta` (negative to drain).
    pub fn apply(&mut self, delta: f64) {
        self.set(self.current + delta);
    }

    /// Change the upper bound, clamping the current value if needed.
    pub fn set_max(&mut self, max: f64) {
        self.max = max;
        if self.current > max {
            self.set(max);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn count_depletions(gauge: &Gauge) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let sink = count.clone();
        gauge.depleted.subscribe(move |_| sink.set(sink.get() + 1));
        count
    }

    #[test]
    fn depletion_fires_once_per_crossing() {
        let mut hp = Gauge::full(10.0);
        let deaths = count_depletions(&hp);

        hp.apply(-4.0);
        assert_eq!(deaths.get(), 0);
        hp.apply(-6.0);
        assert_eq!(deaths.get(), 1);
        hp.set(0.0);
        hp.apply(-3.0);
        hp.apply(-1.0);
        assert_eq!(deaths.get(), 1, "already depleted, no re-fire");
    }

    #[test]
    fn recovery_rearms_depletion() {
        let mut hp = Gauge::full(5.0);
        let deaths = count_depletions(&hp);

        hp.set(0.0);
        hp.set(2.0);
        hp.set(-1.0);
        assert_eq!(deaths.get(), 2);
    }

    #[test]
    fn changed_reports_previous_and_current() {
        let mut fuel = Gauge::new(3.0, 10.0);
        let seen = Rc::new(Cell::new(None));
        let sink = seen.clone();
        fuel.changed.subscribe(move |c| sink.set(Some(*c)));

        fuel.apply(20.0);
        assert_eq!(
            seen.get(),
            Some(GaugeChanged {
                previous: 3.0,
                current: 10.0,
                max: 10.0
            })
        );
    }

    #[test]
    fn unchanged_value_emits_nothing() {
        let mut g = Gauge::full(1.0);
        let hits = Rc::new(Cell::new(0));
        let sink = hits.clone();
        g.changed.subscribe(move |_| sink.set(sink.get() + 1));
        g.set(1.0);
        g.set(7.0);
        assert_eq!(hits.get(), 0, "clamped to max, so no change");
    }

    #[test]
    fn starting_at_zero_is_not_a_crossing() {
        let mut g = Gauge::new(0.0, 4.0);
        let deaths = count_depletions(&g);
        g.set(-2.0);
        assert_eq!(deaths.get(), 0);
        assert!(g.is_depleted());
    }
}
