//! Fixed-timestep frame pacing.
//!
//! Hosts call in once per rendered frame with the elapsed wall time. The
//! [`TickLoop`] accumulates that time and, per frame:
//!
//! 1. Runs the fixed-rate callback once per whole `fixed_dt` accumulated,
//!    at most `max_fixed_steps` times. Time beyond that is dropped so a long
//!    stall does not snowball into ever longer frames.
//! 2. Runs the variable-rate callback once with the frame's `dt`.
//!
//! Simulation time is `fixed_steps * fixed_dt`, computed rather than summed.
//!
//! # Example
//!
//! ```
//! use tessera_engine::tick::{Step, TickConfig, TickLoop};
//!
//! let mut tick_loop = TickLoop::new(TickConfig { fixed_dt: 0.01, max_fixed_steps: 8 });
//! let (mut fixed, mut variable) = (0, 0);
//! tick_loop
//!     .run_frame::<()>(0.035, |step| {
//!         match step {
//!             Step::Fixed(_) => fixed += 1,
//!             Step::Frame(_) => variable += 1,
//!         }
//!         Ok(())
//!     })
//!     .unwrap();
//! assert_eq!((fixed, variable), (3, 1));
//! assert_eq!(tick_loop.fixed_step_count(), 3);
//! ```

use std::time::{Duration, Instant};

use tracing::warn;

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Configuration for the fixed-timestep accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct TickConfig {
    /// Seconds per fixed step. Must be positive and finite.
    pub fixed_dt: f64,
    /// Upper bound on fixed steps run in one frame. Must be at least 1.
    pub max_fixed_steps: u32,
}

impl Default for TickConfig {
    /// 60 Hz, at most 5 catch-up steps per frame.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            max_fixed_steps: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One callback issued by [`TickLoop::run_frame`], carrying its `dt`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// A fixed-rate step of `fixed_dt` seconds.
    Fixed(f64),
    /// The once-per-frame variable step.
    Frame(f64),
}

// ---------------------------------------------------------------------------
// TickDiagnostics
// ---------------------------------------------------------------------------

/// What the last frame did and how long it took.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickDiagnostics {
    /// The frame time handed in (after sanitizing).
    pub frame_dt: f64,
    /// Fixed steps run this frame.
    pub fixed_steps: u32,
    /// Whole fixed steps discarded because of the per-frame cap.
    pub dropped_steps: u64,
    /// Wall time spent in fixed-rate callbacks.
    pub fixed_time: Duration,
    /// Wall time spent in the variable-rate callback.
    pub tick_time: Duration,
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

/// Accumulator turning frame times into fixed and variable ticks.
#[derive(Debug, Clone)]
pub struct TickLoop {
    config: TickConfig,
    accumulator: f64,
    fixed_steps: u64,
    frames: u64,
    last_diagnostics: TickDiagnostics,
}

impl TickLoop {
    /// # Panics
    ///
    /// If `fixed_dt` is not positive and finite, or `max_fixed_steps` is 0.
    /// [`EngineConfig::validate`](crate::config::EngineConfig::validate)
    /// rejects such values before they get here.
    pub fn new(config: TickConfig) -> Self {
        assert!(
            config.fixed_dt > 0.0 && config.fixed_dt.is_finite(),
            "fixed_dt must be positive and finite, got {}",
            config.fixed_dt
        );
        assert!(config.max_fixed_steps > 0, "max_fixed_steps must be at least 1");
        Self {
            config,
            accumulator: 0.0,
            fixed_steps: 0,
            frames: 0,
            last_diagnostics: TickDiagnostics::default(),
        }
    }

    /// Add `frame_dt` to the accumulator and take out the steps due now.
    /// Returns `(steps to run, steps dropped)`.
    fn accumulate(&mut self, frame_dt: f64) -> (u32, u64) {
        self.accumulator += frame_dt;

        let due = (self.accumulator / self.config.fixed_dt).floor();
        let cap = f64::from(self.config.max_fixed_steps);
        let (steps, dropped) = if due > cap {
            (self.config.max_fixed_steps, (due - cap) as u64)
        } else {
            (due as u32, 0)
        };
        self.accumulator -= due * self.config.fixed_dt;
        // Guard against float residue pushing it slightly below zero.
        self.accumulator = self.accumulator.max(0.0);

        if dropped > 0 {
            warn!(
                dropped,
                max_fixed_steps = self.config.max_fixed_steps,
                "frame too long, fixed steps dropped"
            );
        }
        (steps, dropped)
    }

    /// Run one frame: `Step::Fixed` for each due step, then one
    /// `Step::Frame`.
    ///
    /// The first callback error stops the frame and is returned. A step
    /// counts as soon as its callback starts, so counters and
    /// [`sim_time`](Self::sim_time) include the step that failed. Callers
    /// that must finish the frame regardless collect errors inside the
    /// callback instead, as [`App::advance`](crate::app::App::advance) does.
    pub fn run_frame<E>(
        &mut self,
        frame_dt: f64,
        mut step: impl FnMut(Step) -> Result<(), E>,
    ) -> Result<&TickDiagnostics, E> {
        let frame_start = Instant::now();
        let frame_dt = sanitize(frame_dt);
        let (steps, dropped_steps) = self.accumulate(frame_dt);
        self.frames += 1;

        let fixed_start = Instant::now();
        for _ in 0..steps {
            self.fixed_steps += 1;
            step(Step::Fixed(self.config.fixed_dt))?;
        }
        let fixed_time = fixed_start.elapsed();

        let tick_start = Instant::now();
        step(Step::Frame(frame_dt))?;
        let tick_time = tick_start.elapsed();

        self.last_diagnostics = TickDiagnostics {
            frame_dt,
            fixed_steps: steps,
            dropped_steps,
            fixed_time,
            tick_time,
            total_time: frame_start.elapsed(),
        };
        Ok(&self.last_diagnostics)
    }

    // -- accessors ----------------------------------------------------------

    /// Seconds per fixed step.
    pub fn fixed_dt(&self) -> f64 {
        self.config.fixed_dt
    }

    /// Fixed steps started since creation.
    pub fn fixed_step_count(&self) -> u64 {
        self.fixed_steps
    }

    /// Frames run since creation.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Simulated seconds covered by fixed steps.
    pub fn sim_time(&self) -> f64 {
        self.fixed_steps as f64 * self.config.fixed_dt
    }

    /// Fraction of a fixed step left in the accumulator, for interpolation.
    pub fn alpha(&self) -> f64 {
        self.accumulator / self.config.fixed_dt
    }

    /// What the most recent frame did.
    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }
}

fn sanitize(frame_dt: f64) -> f64 {
    if frame_dt.is_finite() && frame_dt > 0.0 {
        frame_dt
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
