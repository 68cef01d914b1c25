//! Paging state: frame bitmap, page tables, RAM, and the instruction store.

use std::collections::HashMap;

use simnix_shared::error::SimError;
use simnix_shared::pcb::Pid;

/// All memory-manager state behind one lock. Resize runs to completion
/// under the lock, so concurrent translations for the same process see
/// either the pre-resize or the post-resize table, never a partial one.
pub struct MemoryStore {
    page_size: u32,
    /// Global frame bitmap; `true` = occupied.
    frames: Vec<bool>,
    /// User space, `memory_size` bytes.
    ram: Vec<u8>,
    /// Instruction lines per process.
    instructions: HashMap<Pid, Vec<String>>,
    /// Page table per process: index = page, value = frame.
    page_tables: HashMap<Pid, Vec<u32>>,
}

impl MemoryStore {
    pub fn new(memory_size: u32, page_size: u32) -> Self {
        assert!(page_size > 0, "page_size must be nonzero");
        assert!(
            memory_size % page_size == 0,
            "memory_size must be a multiple of page_size"
        );
        MemoryStore {
            page_size,
            frames: vec![false; (memory_size / page_size) as usize],
            ram: vec![0; memory_size as usize],
            instructions: HashMap::new(),
            page_tables: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Store the instruction text for a process and initialize its empty
    /// page table. Replaces any previous image under the same pid.
    pub fn load(&mut self, pid: Pid, text: &str) -> usize {
        let lines: Vec<String> = text
            .lines()
            .map(|l| l.trim_end().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        let count = lines.len();
        self.instructions.insert(pid, lines);
        self.page_tables.insert(pid, Vec::new());
        count
    }

    /// Instruction at `pc`, or `OutOfBounds` past the end of the image.
    pub fn instruction(&self, pid: Pid, pc: u32) -> Result<&str, SimError> {
        let lines = self.instructions.get(&pid).ok_or(SimError::NotFound)?;
        lines
            .get(pc as usize)
            .map(String::as_str)
            .ok_or(SimError::OutOfBounds)
    }

    /// Resize the process to `size` bytes. Growth allocates first-fit
    /// lowest-index frames one at a time; if memory runs out mid-way every
    /// frame taken by this call is released and nothing changes. Shrink
    /// releases trailing frames.
    pub fn resize(&mut self, pid: Pid, size: u32) -> Result<(), SimError> {
        let current = self
            .page_tables
            .get(&pid)
            .ok_or(SimError::NotFound)?
            .len();
        let target = (size.div_ceil(self.page_size)) as usize;

        if target > current {
            let mut acquired = Vec::with_capacity(target - current);
            for _ in current..target {
                match self.frames.iter().position(|used| !used) {
                    Some(frame) => {
                        self.frames[frame] = true;
                        acquired.push(frame as u32);
                    }
                    None => {
                        for frame in acquired {
                            self.frames[frame as usize] = false;
                        }
                        return Err(SimError::OutOfMemory);
                    }
                }
            }
            self.page_tables
                .get_mut(&pid)
                .expect("table checked above")
                .extend(acquired);
        } else {
            let table = self.page_tables.get_mut(&pid).expect("table checked above");
            for frame in table.drain(target..) {
                self.frames[frame as usize] = false;
            }
        }
        Ok(())
    }

    /// Logical to physical: `frame(page) * page_size + offset`. Pure read
    /// of committed page-table state.
    pub fn translate(&self, pid: Pid, logical: u32) -> Result<u32, SimError> {
        let table = self.page_tables.get(&pid).ok_or(SimError::NotFound)?;
        let page = (logical / self.page_size) as usize;
        let offset = logical % self.page_size;
        let frame = *table.get(page).ok_or(SimError::SegmentationFault)?;
        Ok(frame * self.page_size + offset)
    }

    /// Read `len` bytes of physical memory.
    pub fn read(&self, address: u32, len: u32) -> Result<&[u8], SimError> {
        let start = address as usize;
        let end = start
            .checked_add(len as usize)
            .ok_or(SimError::OutOfBounds)?;
        self.ram.get(start..end).ok_or(SimError::OutOfBounds)
    }

    /// Write bytes into physical memory.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), SimError> {
        let start = address as usize;
        let end = start.checked_add(data.len()).ok_or(SimError::OutOfBounds)?;
        let slot = self.ram.get_mut(start..end).ok_or(SimError::OutOfBounds)?;
        slot.copy_from_slice(data);
        Ok(())
    }

    /// Drop the instruction store and release every frame the process
    /// holds. Called by the kernel when the process reaches EXIT.
    pub fn free(&mut self, pid: Pid) -> Result<(), SimError> {
        let had_instructions = self.instructions.remove(&pid).is_some();
        match self.page_tables.remove(&pid) {
            Some(table) => {
                for frame in table {
                    self.frames[frame as usize] = false;
                }
                Ok(())
            }
            None if had_instructions => Ok(()),
            None => Err(SimError::NotFound),
        }
    }

    #[cfg(test)]
    fn frames_in_use(&self) -> usize {
        self.frames.iter().filter(|used| **used).count()
    }

    #[cfg(test)]
    fn table(&self, pid: Pid) -> &[u32] {
        &self.page_tables[&pid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        // 8 frames of 16 bytes.
        MemoryStore::new(128, 16)
    }

    #[test]
    fn load_splits_lines_and_creates_empty_table() {
        let mut mem = store();
        let count = mem.load(1, "SET AX 5\nSUM AX AX\nEXIT\n");
        assert_eq!(count, 3);
        assert_eq!(mem.instruction(1, 0).unwrap(), "SET AX 5");
        assert_eq!(mem.instruction(1, 2).unwrap(), "EXIT");
        assert_eq!(mem.table(1).len(), 0);
    }

    #[test]
    fn fetch_past_end_is_out_of_bounds() {
        let mut mem = store();
        mem.load(1, "EXIT");
        assert_eq!(mem.instruction(1, 1), Err(SimError::OutOfBounds));
        assert_eq!(mem.instruction(9, 0), Err(SimError::NotFound));
    }

    #[test]
    fn grow_takes_lowest_free_frames_first() {
        let mut mem = store();
        mem.load(1, "EXIT");
        mem.load(2, "EXIT");
        mem.resize(1, 32).unwrap(); // frames 0, 1
        mem.resize(2, 16).unwrap(); // frame 2
        mem.resize(1, 16).unwrap(); // releases frame 1
        mem.resize(2, 32).unwrap(); // reuses frame 1, the lowest free
        assert_eq!(mem.table(1), &[0]);
        assert_eq!(mem.table(2), &[2, 1]);
    }

    #[test]
    fn failed_growth_rolls_back_completely() {
        let mut mem = store();
        mem.load(1, "EXIT");
        mem.load(2, "EXIT");
        mem.resize(1, 96).unwrap(); // 6 of 8 frames
        let before_table = mem.table(2).to_vec();
        let before_used = mem.frames_in_use();
        // Needs 3 frames, only 2 are free.
        assert_eq!(mem.resize(2, 48), Err(SimError::OutOfMemory));
        assert_eq!(mem.table(2), before_table.as_slice());
        assert_eq!(mem.frames_in_use(), before_used);
        // The two free frames must still be allocatable.
        mem.resize(2, 32).unwrap();
    }

    #[test]
    fn shrink_releases_trailing_frames() {
        let mut mem = store();
        mem.load(1, "EXIT");
        mem.resize(1, 64).unwrap();
        let trailing = mem.table(1)[2..].to_vec();
        mem.resize(1, 32).unwrap();
        assert_eq!(mem.table(1).len(), 2);
        let mut other_pid_table = Vec::new();
        mem.load(2, "EXIT");
        mem.resize(2, 32).unwrap();
        other_pid_table.extend_from_slice(mem.table(2));
        // The released trailing frames are handed out again.
        assert_eq!(other_pid_table, trailing);
    }

    #[test]
    fn translation_law() {
        let mut mem = store();
        mem.load(1, "EXIT");
        mem.resize(1, 48).unwrap();
        let table = mem.table(1).to_vec();
        for logical in [0u32, 5, 16, 31, 40] {
            let expect = table[(logical / 16) as usize] * 16 + logical % 16;
            assert_eq!(mem.translate(1, logical).unwrap(), expect);
        }
        assert_eq!(mem.translate(1, 48), Err(SimError::SegmentationFault));
    }

    #[test]
    fn size_rounds_up_to_whole_pages() {
        let mut mem = store();
        mem.load(1, "EXIT");
        mem.resize(1, 17).unwrap();
        assert_eq!(mem.table(1).len(), 2);
    }

    #[test]
    fn read_write_round_trip_and_bounds() {
        let mut mem = store();
        mem.write(10, &[1, 2, 3, 4]).unwrap();
        assert_eq!(mem.read(10, 4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(mem.read(126, 4), Err(SimError::OutOfBounds));
        assert_eq!(mem.write(127, &[0, 0]), Err(SimError::OutOfBounds));
    }

    #[test]
    fn free_releases_everything() {
        let mut mem = store();
        mem.load(1, "EXIT");
        mem.resize(1, 128).unwrap(); // all 8 frames
        mem.free(1).unwrap();
        assert_eq!(mem.frames_in_use(), 0);
        assert_eq!(mem.instruction(1, 0), Err(SimError::NotFound));
        // Freed frames are allocatable again.
        mem.load(2, "EXIT");
        mem.resize(2, 128).unwrap();
        assert_eq!(mem.free(3), Err(SimError::NotFound));
    }
}
