//! The translation and garbage-collection engine.
//!
//! Host writes enter through [`Ftl::write`], which restores reclaim
//! headroom, appends the page to the destination stream's active block and
//! remaps the LPN. Garbage collection and wear leveling relocate live pages
//! and rewrite the map directly; nothing else mutates it.

#[cfg(test)]
use std::{println as debug, println as info, println as trace};
use std::collections::VecDeque;
use std::fmt;

use byte_unit::Byte;
#[cfg(not(test))]
use log::{debug, info, trace};

use crate::config::{BaseType, BlockId, Counter, FtlConfig, Lpn, PageIdx, PAGE_SIZE};
use crate::error::{FtlError, FtlResult};
use crate::heat::HeatTracker;
use crate::nand::{NandFlash, PageState};

const HOT: usize = 0;
const COLD: usize = 1;

/// Physical page address. Never leaves the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ppa {
    block: BlockId,
    page: PageIdx,
}

/// How many append streams the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// One active block for all data.
    Single,
    /// Separate active blocks for hot and cold data.
    HotCold,
}

/// How the garbage collector picks its victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimPolicy {
    /// Most invalid pages wins; falls back to the emptiest occupied block.
    Greedy,
    /// Oldest closed hot block outright, then greedy over the cold list.
    /// Only meaningful in dual-stream mode; degrades to `Greedy` otherwise.
    OldestHotFirst,
}

struct Stream {
    active: BlockId,
    /// Blocks filled and rotated out of this stream, oldest first. Only
    /// maintained in dual-stream mode; single-stream victim search scans
    /// the whole device instead.
    closed: VecDeque<BlockId>,
}

impl Stream {
    fn new(active: BlockId) -> Self {
        Stream {
            active,
            closed: VecDeque::new(),
        }
    }
}

enum GcOutcome {
    /// Victim absorbed into active spare capacity; nets one free block.
    Merged,
    /// Victim copied into freshly opened block(s); nets nothing directly.
    Copied,
    /// Nothing to reclaim. A no-op, not an error.
    NoVictim,
}

pub struct Ftl {
    cfg: FtlConfig,
    nand: NandFlash,
    /// LPN to current physical location; `None` means never written.
    l2p: Vec<Option<Ppa>>,
    logical_pages: usize,
    heat: HeatTracker,
    mode: StreamMode,
    policy: VictimPolicy,
    streams: Vec<Stream>,
    host_writes: Counter,
    host_reads: Counter,
    last_fault: Option<FtlError>,
}

impl Ftl {
    /// Engine with the default 25% overprovisioning split.
    pub fn new(cfg: FtlConfig, mode: StreamMode, policy: VictimPolicy) -> Self {
        Self::new_with_op(cfg, mode, policy, 25.0)
    }

    pub fn new_with_op(cfg: FtlConfig, mode: StreamMode, policy: VictimPolicy, op: f64) -> Self {
        let physical = cfg.physical_pages();
        let op_pages = (physical as f64 * (op / 100.)).trunc() as BaseType;
        let logical_pages = physical - op_pages;

        trace!("physical pages: {}", physical);
        trace!("op pages: {}", op_pages);
        trace!(
            "physical capacity: {} bytes, {}",
            cfg.capacity_bytes(),
            Byte::from(cfg.capacity_bytes())
                .get_appropriate_unit(true)
                .to_string()
        );
        trace!(
            "user capacity: {} bytes, {}",
            logical_pages * PAGE_SIZE,
            Byte::from(logical_pages * PAGE_SIZE)
                .get_appropriate_unit(true)
                .to_string()
        );

        // the hot stream opens on block 0, the cold one on block 1
        let streams = match mode {
            StreamMode::Single => vec![Stream::new(0)],
            StreamMode::HotCold => vec![Stream::new(0), Stream::new(1)],
        };
        debug_assert!(
            cfg.blocks > streams.len(),
            "geometry too small for the stream count"
        );

        Ftl {
            nand: NandFlash::new(&cfg),
            l2p: vec![None; logical_pages],
            logical_pages,
            heat: HeatTracker::new(cfg.hot_threshold),
            mode,
            policy,
            streams,
            host_writes: 0,
            host_reads: 0,
            last_fault: None,
            cfg,
        }
    }

    pub fn logical_pages(&self) -> usize {
        self.logical_pages
    }

    pub fn max_lpn(&self) -> Lpn {
        self.logical_pages - 1
    }

    /// Host write of one logical page.
    ///
    /// Restores reclaim headroom first, then retires any previous physical
    /// copy and appends the new one to the destination stream. On failure
    /// the host counters stand but no mapping changes.
    pub fn write(&mut self, lpn: Lpn) -> FtlResult<()> {
        self.host_writes += 1;
        self.heat.record(lpn);

        if lpn >= self.logical_pages {
            return Err(self.fault(FtlError::LpnOutOfRange {
                lpn,
                capacity: self.logical_pages,
            }));
        }

        let si = self.stream_for(lpn);
        self.prepare(si).map_err(|e| self.fault(e))?;

        // the previous copy stays physically present but dead until its
        // block erases; this is the only path that creates INVALID pages
        if let Some(old) = self.l2p[lpn] {
            self.nand.invalidate(old.block, old.page);
        }

        let ppa = self.next_page(si);
        self.nand
            .program(ppa.block, ppa.page, lpn)
            .map_err(|e| self.fault(e))?;
        self.l2p[lpn] = Some(ppa);
        Ok(())
    }

    /// Host read of one logical page. Never-written logical space reads as
    /// a no-op rather than an error.
    pub fn read(&mut self, lpn: Lpn) {
        self.host_reads += 1;
        if let Some(ppa) = self.l2p.get(lpn).copied().flatten() {
            let hit = self.nand.probe(ppa.block, ppa.page).unwrap_or(false);
            debug_assert!(hit, "map entry for lpn {} points at a non-valid page", lpn);
        }
    }

    /// Ratio of physical page programs to host writes. 0 before the first
    /// host write.
    pub fn amplification(&self) -> f64 {
        if self.host_writes == 0 {
            return 0.0;
        }
        self.nand.programs() as f64 / self.host_writes as f64
    }

    /// Erased blocks not currently serving as a stream's active block.
    pub fn free_blocks(&self) -> usize {
        (0..self.nand.num_blocks())
            .filter(|&b| !self.is_active(b) && self.nand.block(b).is_erased())
            .count()
    }

    /// Opportunistic maintenance pass bounding erase-count skew.
    ///
    /// When the reference active block (the hot stream's, in dual mode) has
    /// out-worn the least-erased block by more than the configured skew,
    /// the least-worn block's live data is moved aside and the block erased
    /// so it re-enters rotation. Returns whether a relocation happened.
    ///
    /// Relocation here is temperature-blind: hot and cold pages can end up
    /// sharing the destination block.
    pub fn wear_level(&mut self) -> FtlResult<bool> {
        let mut min_idx = 0;
        let mut min_count = self.nand.block(0).erase_count();
        for b in 1..self.nand.num_blocks() {
            let count = self.nand.block(b).erase_count();
            if count < min_count {
                min_count = count;
                min_idx = b;
            }
        }

        let reference = self.streams[0].active;
        if self.nand.block(reference).erase_count() <= min_count + self.cfg.wear_skew {
            return Ok(false);
        }
        let dst = match self.find_free_block(&[min_idx]) {
            Some(b) => b,
            None => return Ok(false),
        };

        let lpns: Vec<Lpn> = self
            .nand
            .block(min_idx)
            .pages()
            .iter()
            .filter(|p| p.state() == PageState::Valid)
            .filter_map(|p| p.lpn())
            .collect();
        for lpn in lpns {
            let page = self.nand.block(dst).cursor();
            self.nand.program(dst, page, lpn)?;
            self.l2p[lpn] = Some(Ppa { block: dst, page });
        }
        self.unlabel(min_idx);
        self.nand.erase(min_idx)?;
        info!(
            "wear leveling: recycled block {} (erase count {})",
            min_idx, min_count
        );
        Ok(true)
    }

    /// Read-only snapshot of every occupied or active block, for external
    /// observability. No effect on state.
    pub fn debug_state(&self) -> DebugState {
        let mut blocks = Vec::new();
        for b in 0..self.nand.num_blocks() {
            let blk = self.nand.block(b);
            if blk.valid_pages() > 0
                || blk.invalid_pages() > 0
                || blk.cursor() > 0
                || self.is_active(b)
            {
                blocks.push(BlockStat {
                    block: b,
                    valid: blk.valid_pages(),
                    invalid: blk.invalid_pages(),
                    cursor: blk.cursor(),
                    erases: blk.erase_count(),
                });
            }
        }
        DebugState {
            actives: self.streams.iter().map(|s| s.active).collect(),
            closed_lens: self.streams.iter().map(|s| s.closed.len()).collect(),
            free_blocks: self.free_blocks(),
            total_programs: self.nand.programs(),
            total_erases: self.nand.erases(),
            blocks,
            last_fault: self.last_fault.clone(),
        }
    }

    fn fault(&mut self, err: FtlError) -> FtlError {
        self.last_fault = Some(err.clone());
        err
    }

    fn stream_for(&self, lpn: Lpn) -> usize {
        match self.mode {
            StreamMode::Single => 0,
            StreamMode::HotCold => {
                if self.heat.is_hot(lpn) {
                    HOT
                } else {
                    COLD
                }
            }
        }
    }

    fn is_active(&self, block: BlockId) -> bool {
        self.streams.iter().any(|s| s.active == block)
    }

    /// First erased block that is neither active nor in `exclude`.
    fn find_free_block(&self, exclude: &[BlockId]) -> Option<BlockId> {
        (0..self.nand.num_blocks()).find(|&b| {
            !self.is_active(b) && !exclude.contains(&b) && self.nand.block(b).is_erased()
        })
    }

    fn next_page(&self, si: usize) -> Ppa {
        let block = self.streams[si].active;
        Ppa {
            block,
            page: self.nand.block(block).cursor(),
        }
    }

    /// Restores reclaim headroom and leaves stream `si` with a writable
    /// active block. Rotation claims a free block, so the two conditions
    /// interleave until both hold at once.
    fn prepare(&mut self, si: usize) -> FtlResult<()> {
        let mut passes = 0;
        loop {
            if self.free_blocks() < self.cfg.reclaim_threshold {
                if let GcOutcome::NoVictim = self.collect()? {
                    return Err(FtlError::CapacityExhausted {
                        context: "nothing left to reclaim",
                    });
                }
                passes += 1;
                if passes > self.nand.num_blocks() {
                    return Err(FtlError::CapacityExhausted {
                        context: "collection cannot restore headroom",
                    });
                }
            } else if self.nand.block(self.streams[si].active).is_full() {
                self.rotate(si)?;
            } else {
                return Ok(());
            }
        }
    }

    fn rotate(&mut self, si: usize) -> FtlResult<()> {
        let fresh = self
            .find_free_block(&[])
            .ok_or(FtlError::CapacityExhausted {
                context: "stream rotation",
            })?;
        let retired = std::mem::replace(&mut self.streams[si].active, fresh);
        if self.mode == StreamMode::HotCold {
            self.streams[si].closed.push_back(retired);
        }
        trace!(
            "stream {} rotated: block {} retired, block {} active",
            si,
            retired,
            fresh
        );
        Ok(())
    }

    /// One garbage-collection pass: pick a victim, relocate its live pages
    /// by their current temperature, erase it.
    fn collect(&mut self) -> FtlResult<GcOutcome> {
        let victim = match self.select_victim() {
            Some(v) => v,
            None => return Ok(GcOutcome::NoVictim),
        };
        self.unlabel(victim);

        let moves: Vec<(usize, Lpn)> = self
            .nand
            .block(victim)
            .pages()
            .iter()
            .filter(|p| p.state() == PageState::Valid)
            .filter_map(|p| p.lpn())
            .map(|lpn| (self.stream_for(lpn), lpn))
            .collect();
        let mut need = vec![0usize; self.streams.len()];
        for &(si, _) in &moves {
            need[si] += 1;
        }

        let can_merge = (0..self.streams.len())
            .all(|si| self.nand.block(self.streams[si].active).remaining() >= need[si]);

        if can_merge {
            for &(si, lpn) in &moves {
                let active = self.streams[si].active;
                let page = self.nand.block(active).cursor();
                self.nand.program(active, page, lpn)?;
                self.l2p[lpn] = Some(Ppa {
                    block: active,
                    page,
                });
            }
            self.nand.erase(victim)?;
            debug!("gc: merged victim {} ({} live pages)", victim, moves.len());
            return Ok(GcOutcome::Merged);
        }

        // fallback copy: open a fresh block only for streams that actually
        // have pages to move
        let mut fresh: Vec<Option<BlockId>> = vec![None; self.streams.len()];
        let mut claimed: Vec<BlockId> = Vec::new();
        for (si, &n) in need.iter().enumerate() {
            if n > 0 {
                let block =
                    self.find_free_block(&claimed)
                        .ok_or(FtlError::CapacityExhausted {
                            context: "gc fallback copy",
                        })?;
                claimed.push(block);
                fresh[si] = Some(block);
            }
        }

        for si in 0..self.streams.len() {
            if let Some(dst) = fresh[si] {
                for &(_, lpn) in moves.iter().filter(|&&(msi, _)| msi == si) {
                    let page = self.nand.block(dst).cursor();
                    self.nand.program(dst, page, lpn)?;
                    self.l2p[lpn] = Some(Ppa { block: dst, page });
                }
            }
        }
        self.nand.erase(victim)?;

        for (si, block) in fresh.into_iter().enumerate() {
            if let Some(block) = block {
                let retired = std::mem::replace(&mut self.streams[si].active, block);
                if self.mode == StreamMode::HotCold {
                    self.streams[si].closed.push_back(retired);
                }
            }
        }
        debug!("gc: copied victim {} ({} live pages)", victim, moves.len());
        Ok(GcOutcome::Copied)
    }

    fn select_victim(&self) -> Option<BlockId> {
        match (self.policy, self.mode) {
            (VictimPolicy::OldestHotFirst, StreamMode::HotCold) => self.select_oldest_hot(),
            _ => self.select_greedy(),
        }
    }

    fn select_greedy(&self) -> Option<BlockId> {
        let primary = match self.mode {
            StreamMode::Single => {
                self.max_invalid((0..self.nand.num_blocks()).filter(|&b| !self.is_active(b)))
            }
            // closed hot blocks go stale fastest; search them first
            StreamMode::HotCold => self
                .max_invalid(self.streams[HOT].closed.iter().copied())
                .or_else(|| self.max_invalid(self.streams[COLD].closed.iter().copied())),
        };
        primary.or_else(|| self.fewest_valid())
    }

    fn select_oldest_hot(&self) -> Option<BlockId> {
        if let Some(&oldest) = self.streams[HOT].closed.front() {
            return Some(oldest);
        }
        // no invalid-count floor here: a closed block is always occupied,
        // so compacting it is meaningful either way
        let mut best: Option<(BlockId, Counter)> = None;
        for &b in &self.streams[COLD].closed {
            let invalid = self.nand.block(b).invalid_pages();
            if best.map_or(true, |(_, n)| invalid > n) {
                best = Some((b, invalid));
            }
        }
        best.map(|(b, _)| b)
    }

    /// Candidate with the most invalid pages, ties to the first seen.
    /// `None` when no candidate has anything to reclaim.
    fn max_invalid(&self, candidates: impl Iterator<Item = BlockId>) -> Option<BlockId> {
        let mut best: Option<(BlockId, Counter)> = None;
        for b in candidates {
            debug_assert!(!self.is_active(b), "active block offered as gc candidate");
            let invalid = self.nand.block(b).invalid_pages();
            if best.map_or(true, |(_, n)| invalid > n) {
                best = Some((b, invalid));
            }
        }
        match best {
            Some((b, n)) if n > 0 => Some(b),
            _ => None,
        }
    }

    /// Emptiest occupied non-active block, ties to the first seen.
    fn fewest_valid(&self) -> Option<BlockId> {
        let mut best: Option<(BlockId, Counter)> = None;
        for b in 0..self.nand.num_blocks() {
            if self.is_active(b) || self.nand.block(b).is_erased() {
                continue;
            }
            let valid = self.nand.block(b).valid_pages();
            if best.map_or(true, |(_, n)| valid < n) {
                best = Some((b, valid));
            }
        }
        best.map(|(b, _)| b)
    }

    /// Drops a block from every closed list. Called the moment a victim is
    /// chosen or a labelled block is erased outside collection.
    fn unlabel(&mut self, block: BlockId) {
        for stream in &mut self.streams {
            stream.closed.retain(|&b| b != block);
        }
    }
}

/// One row of the diagnostic snapshot.
#[derive(Debug, Clone)]
pub struct BlockStat {
    pub block: BlockId,
    pub valid: Counter,
    pub invalid: Counter,
    pub cursor: PageIdx,
    pub erases: Counter,
}

/// Read-only diagnostic snapshot of the engine.
#[derive(Debug, Clone)]
pub struct DebugState {
    /// Active block per stream; hot first in dual-stream mode.
    pub actives: Vec<BlockId>,
    pub closed_lens: Vec<usize>,
    pub free_blocks: usize,
    pub total_programs: Counter,
    pub total_erases: Counter,
    /// Occupied and active blocks only.
    pub blocks: Vec<BlockStat>,
    pub last_fault: Option<FtlError>,
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- nand debug state ---")?;
        writeln!(
            f,
            "actives: {:?}  closed lens: {:?}  free: {}  programs: {}  erases: {}",
            self.actives, self.closed_lens, self.free_blocks, self.total_programs, self.total_erases
        )?;
        if let Some(fault) = &self.last_fault {
            writeln!(f, "last fault: {}", fault)?;
        }
        writeln!(
            f,
            "{:<8}{:<8}{:<10}{:<8}{:<8}",
            "block", "valid", "invalid", "cursor", "erase"
        )?;
        for b in &self.blocks {
            writeln!(
                f,
                "{:<8}{:<8}{:<10}{:<8}{:<8}",
                b.block, b.valid, b.invalid, b.cursor, b.erases
            )?;
        }
        Ok(())
    }
}
