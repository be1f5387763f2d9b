//! Physical NAND model: a fixed grid of blocks holding program-once pages.
//!
//! A page is written at most once between erases; reclaiming it means
//! erasing its whole block. The model tracks lifetime program and erase
//! totals so the engine can derive write amplification.

use crate::config::{BlockId, Counter, FtlConfig, Lpn, PageIdx};
use crate::error::{FtlError, FtlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Free,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    state: PageState,
    /// Owner LPN; meaningful only while the page is Valid or Invalid.
    lpn: Option<Lpn>,
}

impl Page {
    fn erased() -> Self {
        Page {
            state: PageState::Free,
            lpn: None,
        }
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn lpn(&self) -> Option<Lpn> {
        self.lpn
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pages: Vec<Page>,
    valid_pages: Counter,
    invalid_pages: Counter,
    /// Next program offset; monotonically increasing until erase.
    cursor: PageIdx,
    erase_count: Counter,
}

impl Block {
    fn new(pages_per_block: usize) -> Self {
        Block {
            pages: vec![Page::erased(); pages_per_block],
            valid_pages: 0,
            invalid_pages: 0,
            cursor: 0,
            erase_count: 0,
        }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn valid_pages(&self) -> Counter {
        self.valid_pages
    }

    pub fn invalid_pages(&self) -> Counter {
        self.invalid_pages
    }

    pub fn cursor(&self) -> PageIdx {
        self.cursor
    }

    pub fn erase_count(&self) -> Counter {
        self.erase_count
    }

    /// An erased block is the device's notion of a free block.
    pub fn is_erased(&self) -> bool {
        self.cursor == 0
    }

    pub fn is_full(&self) -> bool {
        self.cursor >= self.pages.len()
    }

    pub fn remaining(&self) -> usize {
        self.pages.len() - self.cursor
    }
}

pub struct NandFlash {
    blocks: Vec<Block>,
    pages_per_block: usize,
    programs: Counter,
    erases: Counter,
}

impl NandFlash {
    pub fn new(cfg: &FtlConfig) -> Self {
        NandFlash {
            blocks: (0..cfg.blocks)
                .map(|_| Block::new(cfg.pages_per_block))
                .collect(),
            pages_per_block: cfg.pages_per_block,
            programs: 0,
            erases: 0,
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, block: BlockId) -> &Block {
        &self.blocks[block]
    }

    /// Lifetime count of physical page programs.
    pub fn programs(&self) -> Counter {
        self.programs
    }

    /// Lifetime count of block erases.
    pub fn erases(&self) -> Counter {
        self.erases
    }

    /// Programs one page. Rejects out-of-range addresses and pages that are
    /// not FREE; nothing is mutated on failure.
    pub fn program(&mut self, block: BlockId, page: PageIdx, lpn: Lpn) -> FtlResult<()> {
        if block >= self.blocks.len() || page >= self.pages_per_block {
            return Err(FtlError::PageOutOfRange { block, page });
        }
        let blk = &mut self.blocks[block];
        if blk.pages[page].state != PageState::Free {
            return Err(FtlError::PageNotFree { block, page });
        }
        debug_assert_eq!(page, blk.cursor, "programs must be append-ordered");

        blk.pages[page].state = PageState::Valid;
        blk.pages[page].lpn = Some(lpn);
        blk.valid_pages += 1;
        blk.cursor += 1;
        self.programs += 1;
        Ok(())
    }

    /// Reads one page, reporting whether it currently holds valid data.
    /// Stale reads observe `false` rather than failing.
    pub fn probe(&self, block: BlockId, page: PageIdx) -> FtlResult<bool> {
        if block >= self.blocks.len() || page >= self.pages_per_block {
            return Err(FtlError::PageOutOfRange { block, page });
        }
        Ok(self.blocks[block].pages[page].state == PageState::Valid)
    }

    /// Erases a whole block: every page returns to FREE, the append cursor
    /// and occupancy counts reset, and both erase counters advance. There
    /// is no partial erase.
    pub fn erase(&mut self, block: BlockId) -> FtlResult<()> {
        if block >= self.blocks.len() {
            return Err(FtlError::BlockOutOfRange { block });
        }
        let blk = &mut self.blocks[block];
        for page in &mut blk.pages {
            *page = Page::erased();
        }
        blk.valid_pages = 0;
        blk.invalid_pages = 0;
        blk.cursor = 0;
        blk.erase_count += 1;
        self.erases += 1;
        Ok(())
    }

    /// Drops a remapped page from Valid to Invalid. The slot stays occupied
    /// until its block is erased. Callers pass addresses taken from the
    /// address map, which only ever holds valid locations.
    pub fn invalidate(&mut self, block: BlockId, page: PageIdx) {
        debug_assert!(block < self.blocks.len() && page < self.pages_per_block);
        let blk = &mut self.blocks[block];
        debug_assert_eq!(
            blk.pages[page].state,
            PageState::Valid,
            "invalidate on a non-valid page"
        );
        blk.pages[page].state = PageState::Invalid;
        blk.valid_pages -= 1;
        blk.invalid_pages += 1;
    }

    #[cfg(test)]
    pub fn set_erase_count(&mut self, block: BlockId, count: Counter) {
        self.blocks[block].erase_count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> NandFlash {
        NandFlash::new(&FtlConfig {
            blocks: 4,
            pages_per_block: 4,
            ..FtlConfig::default()
        })
    }

    #[test]
    fn program_marks_page_valid_and_advances_cursor() {
        let mut nand = small();
        nand.program(0, 0, 7).unwrap();

        let blk = nand.block(0);
        assert_eq!(blk.pages()[0].state(), PageState::Valid);
        assert_eq!(blk.pages()[0].lpn(), Some(7));
        assert_eq!(blk.valid_pages(), 1);
        assert_eq!(blk.cursor(), 1);
        assert_eq!(nand.programs(), 1);
    }

    #[test]
    fn program_rejects_out_of_range_address() {
        let mut nand = small();
        assert_eq!(
            nand.program(4, 0, 0),
            Err(FtlError::PageOutOfRange { block: 4, page: 0 })
        );
        assert_eq!(
            nand.program(0, 4, 0),
            Err(FtlError::PageOutOfRange { block: 0, page: 4 })
        );
        assert_eq!(nand.programs(), 0);
    }

    #[test]
    fn program_is_once_per_erase() {
        let mut nand = small();
        nand.program(0, 0, 1).unwrap();
        assert_eq!(
            nand.program(0, 0, 2),
            Err(FtlError::PageNotFree { block: 0, page: 0 })
        );
        // the failed program left the page untouched
        assert_eq!(nand.block(0).pages()[0].lpn(), Some(1));
        assert_eq!(nand.programs(), 1);
    }

    #[test]
    fn probe_reports_validity() {
        let mut nand = small();
        nand.program(0, 0, 1).unwrap();
        nand.invalidate(0, 0);

        assert_eq!(nand.probe(0, 0), Ok(false));
        assert_eq!(nand.probe(0, 1), Ok(false));
        assert_eq!(
            nand.probe(9, 0),
            Err(FtlError::PageOutOfRange { block: 9, page: 0 })
        );
    }

    #[test]
    fn erase_resets_whole_block() {
        let mut nand = small();
        for page in 0..4 {
            nand.program(1, page, page).unwrap();
        }
        nand.invalidate(1, 2);
        nand.erase(1).unwrap();

        let blk = nand.block(1);
        assert!(blk.is_erased());
        assert_eq!(blk.valid_pages(), 0);
        assert_eq!(blk.invalid_pages(), 0);
        assert_eq!(blk.erase_count(), 1);
        assert!(blk.pages().iter().all(|p| p.state() == PageState::Free));
        assert_eq!(nand.erases(), 1);

        // the block is programmable again after erase
        nand.program(1, 0, 9).unwrap();
    }

    #[test]
    fn erase_rejects_out_of_range_block() {
        let mut nand = small();
        assert_eq!(nand.erase(4), Err(FtlError::BlockOutOfRange { block: 4 }));
        assert_eq!(nand.erases(), 0);
    }

    #[test]
    fn invalidate_moves_valid_count_to_invalid() {
        let mut nand = small();
        nand.program(0, 0, 3).unwrap();
        nand.program(0, 1, 4).unwrap();
        nand.invalidate(0, 0);

        let blk = nand.block(0);
        assert_eq!(blk.valid_pages(), 1);
        assert_eq!(blk.invalid_pages(), 1);
        assert_eq!(blk.cursor(), 2);
        assert_eq!(blk.pages()[0].state(), PageState::Invalid);
        // the invalid page still remembers its last owner
        assert_eq!(blk.pages()[0].lpn(), Some(3));
    }
}
