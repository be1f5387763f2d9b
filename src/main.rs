mod config;
mod error;
mod ftl;
mod heat;
mod nand;
mod workload;

#[cfg(test)]
use std::{println as debug, println as error, println as info, println as warn};

#[cfg(not(test))]
use log::{debug, error, info, warn};
use simplelog::*;
use time::macros::format_description;

use crate::config::FtlConfig;
use crate::error::FtlError;
use crate::ftl::{Ftl, StreamMode, VictimPolicy};
use crate::workload::{Op, Pattern, Workload};

const TRIALS: usize = 5;
const OPS_PER_TRIAL: usize = 50_000;

fn main() {
    let log_cfg = ConfigBuilder::new()
        .set_time_format_custom(format_description!("[hour]:[minute]:[second].[subsecond]"))
        .build();

    SimpleLogger::init(LevelFilter::Info, log_cfg).unwrap();

    let scenarios = [
        (
            "single/greedy, uniform",
            StreamMode::Single,
            VictimPolicy::Greedy,
            Pattern::Uniform,
        ),
        (
            "single/greedy, zoned",
            StreamMode::Single,
            VictimPolicy::Greedy,
            Pattern::Zoned,
        ),
        (
            "hot-cold/greedy, zoned",
            StreamMode::HotCold,
            VictimPolicy::Greedy,
            Pattern::Zoned,
        ),
        (
            "hot-cold/oldest-hot, zoned",
            StreamMode::HotCold,
            VictimPolicy::OldestHotFirst,
            Pattern::Zoned,
        ),
        (
            "hot-cold/greedy, bursty",
            StreamMode::HotCold,
            VictimPolicy::Greedy,
            Pattern::Bursty,
        ),
    ];

    for (name, mode, policy, pattern) in scenarios {
        let mut wafs = Vec::with_capacity(TRIALS);
        for trial in 0..TRIALS {
            match run_trial(mode, policy, pattern, 7 + trial as u64) {
                Ok(waf) => wafs.push(waf),
                Err(e) => error!("{}: trial {} aborted: {}", name, trial, e),
            }
        }
        report(name, &wafs);
    }
}

/// One independent simulation: fresh engine, sequential preconditioning,
/// then the host workload. Returns the final write amplification.
fn run_trial(
    mode: StreamMode,
    policy: VictimPolicy,
    pattern: Pattern,
    seed: u64,
) -> Result<f64, FtlError> {
    let mut fw = Ftl::new(FtlConfig::default(), mode, policy);

    for lpn in 0..=fw.max_lpn() {
        fw.write(lpn)?;
    }
    debug!("drive preconditioned ({} pages)", fw.logical_pages());

    let mut host = Workload::new(pattern, fw.logical_pages(), seed);
    for op in host.by_ref().take(OPS_PER_TRIAL) {
        match op {
            Op::Write(lpn) => {
                if let Err(e) = fw.write(lpn) {
                    error!("host write {} failed: {}", lpn, e);
                    info!("{}", fw.debug_state());
                    return Err(e);
                }
            }
            Op::Read(lpn) => fw.read(lpn),
        }
    }

    if fw.wear_level()? {
        debug!("wear leveling relocated the least-worn block");
    }
    Ok(fw.amplification())
}

fn report(name: &str, wafs: &[f64]) {
    if wafs.is_empty() {
        warn!("{}: no successful trials", name);
        return;
    }
    let avg = wafs.iter().sum::<f64>() / wafs.len() as f64;
    let min = wafs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = wafs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    info!(
        "{}: waf avg {:.5} min {:.5} max {:.5} ({} trials)",
        name,
        avg,
        min,
        max,
        wafs.len()
    );
}

#[cfg(test)]
mod tests {
    use crate::ftl::{StreamMode, VictimPolicy};
    use crate::workload::Pattern;

    #[test]
    fn trials_complete_with_sane_amplification() {
        for (mode, policy) in [
            (StreamMode::Single, VictimPolicy::Greedy),
            (StreamMode::HotCold, VictimPolicy::Greedy),
            (StreamMode::HotCold, VictimPolicy::OldestHotFirst),
        ] {
            let waf = super::run_trial(mode, policy, Pattern::Zoned, 7).unwrap();
            assert!(waf >= 1.0, "waf {} for {:?}", waf, mode);
        }
    }
}
