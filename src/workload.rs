//! Host workload generators for the simulation driver.
//!
//! Each generator emits an endless 80/20 write/read mix over the drive's
//! logical space from a seeded RNG, so runs are reproducible.

use rand::prelude::*;
use rand::rngs::SmallRng;

use crate::config::Lpn;

const WRITE_PCT: usize = 80;
/// Fraction of the LPN space forming the hot zone.
const HOT_ZONE_PCT: f64 = 0.10;
/// Fraction of zoned writes aimed at the hot zone.
const HOT_ACCESS_PCT: usize = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Uniform random over the whole logical space.
    Uniform,
    /// 90% of writes land in the hottest 10% of the LPN space.
    Zoned,
    /// Alternating hot/cold write bursts, sized to fill blocks with data
    /// of one temperature and then the other.
    Bursty,
}

#[derive(Debug, Clone, Copy)]
pub enum Op {
    Write(Lpn),
    Read(Lpn),
}

pub struct Workload {
    pattern: Pattern,
    logical_pages: usize,
    hot_zone: usize,
    rng: SmallRng,
    burst_is_hot: bool,
    burst_left: usize,
}

impl Workload {
    pub fn new(pattern: Pattern, logical_pages: usize, seed: u64) -> Self {
        debug_assert!(logical_pages >= 2, "zoned patterns need two zones");
        let hot_zone =
            ((logical_pages as f64 * HOT_ZONE_PCT) as usize).clamp(1, logical_pages - 1);
        Workload {
            pattern,
            logical_pages,
            hot_zone,
            rng: SmallRng::seed_from_u64(seed),
            burst_is_hot: true,
            burst_left: 0,
        }
    }

    fn write_lpn(&mut self) -> Lpn {
        match self.pattern {
            Pattern::Uniform => self.rng.gen_range(0..self.logical_pages),
            Pattern::Zoned => {
                if self.rng.gen_range(0..100) < HOT_ACCESS_PCT {
                    self.rng.gen_range(0..self.hot_zone)
                } else {
                    self.rng.gen_range(self.hot_zone..self.logical_pages)
                }
            }
            Pattern::Bursty => {
                if self.burst_left == 0 {
                    self.burst_is_hot = self.rng.gen_range(0..2) == 0;
                    self.burst_left = if self.burst_is_hot {
                        self.rng.gen_range(0..10) + 25
                    } else {
                        self.rng.gen_range(0..10) + 95
                    };
                }
                self.burst_left -= 1;
                if self.burst_is_hot {
                    self.rng.gen_range(0..self.hot_zone)
                } else {
                    self.rng.gen_range(self.hot_zone..self.logical_pages)
                }
            }
        }
    }
}

impl Iterator for Workload {
    type Item = Op;

    fn next(&mut self) -> Option<Op> {
        if self.rng.gen_range(0..100) < WRITE_PCT {
            Some(Op::Write(self.write_lpn()))
        } else {
            // reads sample the whole space regardless of pattern
            Some(Op::Read(self.rng.gen_range(0..self.logical_pages)))
        }
    }
}
