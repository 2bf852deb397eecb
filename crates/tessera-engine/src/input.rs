//! Directional input.
//!
//! The core never talks to devices. Hosts implement [`DirectionalInput`] and
//! register it as a service; states and components ask it for a normalized
//! [`Direction`]. Discrete events reach the active state as [`InputEvent`]s.

use std::cell::Cell;

use serde::{Deserialize, Serialize};

/// A 2D direction of length 1, or zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Direction {
    x: f64,
    y: f64,
}

impl Direction {
    pub const ZERO: Direction = Direction { x: 0.0, y: 0.0 };

    /// Normalize `(x, y)`. Zero-length and non-finite input gives
    /// [`Direction::ZERO`].
    pub fn new(x: f64, y: f64) -> Self {
        let len = x.hypot(y);
        if !len.is_finite() || len <= f64::EPSILON {
            return Self::ZERO;
        }
        Self {
            x: x / len,
            y: y / len,
        }
    }

    /// From four held/not-held buttons. Opposing buttons cancel. `y` grows
    /// downward.
    pub fn from_buttons(left: bool, right: bool, up: bool, down: bool) -> Self {
        let axis = |neg: bool, pos: bool| f64::from(u8::from(pos)) - f64::from(u8::from(neg));
        Self::new(axis(left, right), axis(up, down))
    }

    /// Horizontal component, positive to the right.
    pub fn x(&self) -> f64 {
        self.x
    }

    /// Vertical component, positive downward.
    pub fn y(&self) -> f64 {
        self.y
    }

    /// `true` when there is no direction.
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

/// Host-side source of the current movement direction.
pub trait DirectionalInput {
    fn direction(&self) -> Direction;
}

impl<T: DirectionalInput + ?Sized> DirectionalInput for std::rc::Rc<T> {
    fn direction(&self) -> Direction {
        (**self).direction()
    }
}

/// A direction set from outside, for headless runs and tests.
#[derive(Debug, Default)]
pub struct HeldDirection {
    current: Cell<Direction>,
}

impl HeldDirection {
    /// Start holding `direction`.
    pub fn new(direction: Direction) -> Self {
        Self {
            current: Cell::new(direction),
        }
    }

    /// Replace the held direction.
    pub fn set(&self, direction: Direction) {
        self.current.set(direction);
    }
}

impl DirectionalInput for HeldDirection {
    fn direction(&self) -> Direction {
        self.current.get()
    }
}

/// Discrete input forwarded to the active state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    /// The directional source changed.
    Direction(Direction),
    /// A named action was pressed or released.
    Action { name: String, pressed: bool },
}

impl InputEvent {
    /// Shorthand for [`InputEvent::Action`].
    pub fn action(name: impl Into<String>, pressed: bool) -> Self {
        InputEvent::Action {
            name: name.into(),
            pressed,
        }
    }
}
