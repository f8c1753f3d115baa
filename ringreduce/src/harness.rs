//! Verification and timing driver for the allreduce.
//!
//! Fills a buffer with a constant on every rank, runs the allreduce a number
//! of times per size, and checks that every element came back as
//! `constant * world_size`.

use crate::collectives::Collectives;
use crate::error::{Result, RingError};
use crate::reduce::Element;
use std::time::Instant;

/// One row of a verification plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePlan {
    /// Elements per buffer.
    pub size: usize,
    pub iterations: usize,
}

impl SizePlan {
    pub const fn new(size: usize, iterations: usize) -> Self {
        Self { size, iterations }
    }
}

/// The reference sweep: 0 to 512 Mi elements, with iteration counts that
/// shrink as buffers grow.
pub fn default_plan() -> Vec<SizePlan> {
    const SIZES: [usize; 12] = [
        0, 32, 256, 1024, 4096, 16384, 65536, 262144, 1048576, 8388608, 67108864, 536870912,
    ];
    const ITERATIONS: [usize; 12] = [
        100000, 100000, 100000, 100000, 1000, 1000, 1000, 1000, 100, 50, 10, 1,
    ];
    SIZES
        .iter()
        .zip(ITERATIONS)
        .map(|(&size, iterations)| SizePlan::new(size, iterations))
        .collect()
}

/// A small sweep covering the edge cases (empty, fewer elements than ranks,
/// uneven remainders) in well under a second.
pub fn quick_plan() -> Vec<SizePlan> {
    [
        (0, 3),
        (1, 3),
        (7, 3),
        (32, 10),
        (1000, 10),
        (4099, 5),
        (65536, 2),
    ]
    .into_iter()
    .map(|(size, iterations)| SizePlan::new(size, iterations))
    .collect()
}

/// Wall-clock stopwatch.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    started: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Restart the stopwatch.
    pub fn start(&mut self) {
        self.started = Instant::now();
    }

    /// Seconds since the last `start`.
    pub fn seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one plan row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeReport {
    pub size: usize,
    pub iterations: usize,
    /// Mean allreduce time per iteration, excluding fill and verification.
    pub seconds_per_iteration: f64,
}

impl std::fmt::Display for SizeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Verified allreduce for size {} ({} per iteration)",
            self.size, self.seconds_per_iteration
        )
    }
}

/// Run `plan` on this rank. Every rank of the group must call this with the
/// same plan and fill value.
///
/// Buffers are placed in the memory selected when `coll` was initialized, so
/// an accelerator context exercises the staged device path.
pub async fn verify_allreduce<T: Element>(
    coll: &Collectives,
    plan: &[SizePlan],
    fill: T,
) -> Result<Vec<SizeReport>> {
    let world = coll.world_size();
    let expected = T::from_f64(fill.to_f64() * f64::from(world));
    let mut timer = Timer::new();
    let mut reports = Vec::with_capacity(plan.len());

    for row in plan {
        let input = coll.device().filled(row.size, fill)?;
        let mut seconds = 0.0;
        for _ in 0..row.iterations {
            timer.start();
            let output = coll.ring_allreduce(&input).await?;
            seconds += timer.seconds();
            check_constant(&output.to_host()?, expected)?;
        }

        let report = SizeReport {
            size: row.size,
            iterations: row.iterations,
            seconds_per_iteration: if row.iterations == 0 {
                0.0
            } else {
                seconds / row.iterations as f64
            },
        };
        if coll.rank() == 0 {
            tracing::info!(
                size = report.size,
                iterations = report.iterations,
                seconds_per_iteration = report.seconds_per_iteration,
                "verified allreduce"
            );
        }
        reports.push(report);
    }
    Ok(reports)
}

/// Fail on the first element that differs from `expected`.
pub fn check_constant<T: Element>(data: &[T], expected: T) -> Result<()> {
    match data.iter().position(|&v| v != expected) {
        None => Ok(()),
        Some(index) => Err(RingError::Verification {
            count: data.len(),
            index,
            expected: expected.to_f64(),
            actual: data[index].to_f64(),
        }),
    }
}
