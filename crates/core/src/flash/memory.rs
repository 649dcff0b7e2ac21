use super::{FlashDevice, FlashError, InterruptControl, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// NOR flash held in memory: erase sets bytes to 0xFF, programming can only
/// clear bits. Every operation is counted.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    data: Vec<u8>,
    erases: Vec<(u32, u32)>,
    programs: usize,
    irq_watch: Option<Arc<AtomicBool>>,
    unmasked_ops: usize,
}

impl MemoryFlash {
    /// A fully erased device of `capacity` bytes
    pub fn new(capacity: u32) -> Self {
        Self {
            data: vec![0xFF; capacity as usize],
            erases: Vec::new(),
            programs: 0,
            irq_watch: None,
            unmasked_ops: 0,
        }
    }

    /// Record, for every operation, whether `irq` had interrupts masked
    pub fn observing(mut self, irq: &CountingInterrupts) -> Self {
        self.irq_watch = Some(Arc::clone(&irq.masked));
        self
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// (offset, len) of every erase call
    pub fn erase_calls(&self) -> &[(u32, u32)] {
        &self.erases
    }

    pub fn program_calls(&self) -> usize {
        self.programs
    }

    /// True when an interrupt watch is attached and saw every operation masked
    pub fn all_operations_masked(&self) -> bool {
        self.irq_watch.is_some() && self.unmasked_ops == 0
    }

    fn check_range(&self, offset: u32, len: u32) -> Result<(), FlashError> {
        let end = u64::from(offset) + u64::from(len);
        if end > self.data.len() as u64 {
            return Err(FlashError::OutOfRange { offset, end });
        }
        Ok(())
    }

    fn observe(&mut self) {
        if let Some(masked) = &self.irq_watch {
            if !masked.load(Ordering::SeqCst) {
                self.unmasked_ops += 1;
            }
        }
    }
}

impl FlashDevice for MemoryFlash {
    fn capacity(&self) -> u32 {
        self.data.len() as u32
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError> {
        for value in [offset, len] {
            if value % FLASH_SECTOR_SIZE != 0 {
                return Err(FlashError::Misaligned {
                    offset: value,
                    align: FLASH_SECTOR_SIZE,
                });
            }
        }
        self.check_range(offset, len)?;
        self.observe();
        self.data[offset as usize..(offset + len) as usize].fill(0xFF);
        self.erases.push((offset, len));
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if offset % FLASH_PAGE_SIZE != 0 || data.len() != FLASH_PAGE_SIZE as usize {
            return Err(FlashError::Misaligned {
                offset,
                align: FLASH_PAGE_SIZE,
            });
        }
        self.check_range(offset, FLASH_PAGE_SIZE)?;
        self.observe();
        let dst = &mut self.data[offset as usize..offset as usize + data.len()];
        for (cell, byte) in dst.iter_mut().zip(data) {
            *cell &= byte;
        }
        self.programs += 1;
        Ok(())
    }
}

/// Interrupt control for hosts: tracks the masked state and counts
/// disable calls. Restoring a saved state of 0 unmasks.
#[derive(Debug, Clone, Default)]
pub struct CountingInterrupts {
    masked: Arc<AtomicBool>,
    disables: usize,
}

impl CountingInterrupts {
    pub fn disable_count(&self) -> usize {
        self.disables
    }

    pub fn is_masked(&self) -> bool {
        self.masked.load(Ordering::SeqCst)
    }
}

impl InterruptControl for CountingInterrupts {
    fn disable(&mut self) -> u32 {
        self.disables += 1;
        u32::from(self.masked.swap(true, Ordering::SeqCst))
    }

    fn restore(&mut self, saved: u32) {
        self.masked.store(saved != 0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_only_clears_bits() {
        let mut flash = MemoryFlash::new(2 * FLASH_SECTOR_SIZE);
        let mut page = vec![0xF0; FLASH_PAGE_SIZE as usize];
        flash.program(0, &page).unwrap();
        page.fill(0x0F);
        flash.program(0, &page).unwrap();
        assert!(flash.contents()[..256].iter().all(|&b| b == 0x00));

        flash.erase(0, FLASH_SECTOR_SIZE).unwrap();
        assert!(flash.contents()[..256].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_alignment_and_range_checks() {
        let mut flash = MemoryFlash::new(FLASH_SECTOR_SIZE);
        assert!(matches!(flash.erase(100, FLASH_SECTOR_SIZE), Err(FlashError::Misaligned { .. })));
        assert!(matches!(flash.erase(0, 100), Err(FlashError::Misaligned { .. })));
        assert!(matches!(
            flash.erase(FLASH_SECTOR_SIZE, FLASH_SECTOR_SIZE),
            Err(FlashError::OutOfRange { .. })
        ));
        assert!(matches!(flash.program(0, &[0; 10]), Err(FlashError::Misaligned { .. })));
        assert!(flash.erase_calls().is_empty());
        assert_eq!(flash.program_calls(), 0);
    }

    #[test]
    fn test_nested_masking_restores_outer_state() {
        let mut irq = CountingInterrupts::default();
        let outer = irq.disable();
        let inner = irq.disable();
        irq.restore(inner);
        assert!(irq.is_masked());
        irq.restore(outer);
        assert!(!irq.is_masked());
        assert_eq!(irq.disable_count(), 2);
    }
}
