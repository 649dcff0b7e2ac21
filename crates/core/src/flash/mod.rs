//! Writing a program image into execute-in-place flash.
//!
//! Working memory cannot hold an image, so the selected file is streamed
//! from storage straight into flash, one page at a time, behind the end of
//! the running firmware. The sequence is:
//!
//! 1. stat the file and reject it if it does not fit (nothing erased yet)
//! 2. park the presentation worker ([`Lockout`])
//! 3. erase the covering sector range with interrupts masked
//! 4. program page by page, masking interrupts per page only
//! 5. release the worker on every path

use crate::logging::{log, LogCategory, LogLevel};
use crate::lockout::Lockout;
use crate::storage::{FileStat, Storage, StorageError};
use serde::Serialize;
use std::io::{self, Read};

mod memory;

pub use memory::{CountingInterrupts, MemoryFlash};

/// Address at which flash is mapped for execute-in-place
pub const XIP_BASE: u32 = 0x1000_0000;
/// Erase granularity
pub const FLASH_SECTOR_SIZE: u32 = 4096;
/// Program granularity
pub const FLASH_PAGE_SIZE: u32 = 256;
/// Sectors kept free between the firmware and the image for other data
pub const RESERVED_SECTORS: u32 = 4;
/// Largest image accepted before clamping to the device
pub const DEFAULT_IMAGE_CEILING: u32 = (16384 - 64) << 10;

#[derive(thiserror::Error, Debug)]
pub enum FlashError {
    #[error("image is {size} bytes but program storage holds at most {max}")]
    ImageTooLarge { size: u64, max: u64 },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("read failed after {written} bytes were programmed; program storage is incomplete")]
    PartialWrite {
        written: u64,
        #[source]
        source: io::Error,
    },
    #[error("flash access at {offset:#x} is not aligned to {align} bytes")]
    Misaligned { offset: u32, align: u32 },
    #[error("flash range {offset:#x}..{end:#x} is outside the device")]
    OutOfRange { offset: u32, end: u64 },
}

/// Raw flash operations. Offsets are relative to the start of flash.
pub trait FlashDevice {
    /// Total size in bytes
    fn capacity(&self) -> u32;

    fn sector_size(&self) -> u32 {
        FLASH_SECTOR_SIZE
    }

    fn page_size(&self) -> u32 {
        FLASH_PAGE_SIZE
    }

    /// Erase `len` bytes; both values must be sector aligned
    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError>;

    /// Program one page; `offset` page aligned, `data` exactly one page
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;
}

/// Save-and-disable / restore of interrupts on the calling core
pub trait InterruptControl {
    fn disable(&mut self) -> u32;
    fn restore(&mut self, saved: u32);
}

/// Run `f` with interrupts disabled
pub fn with_interrupts_masked<I, R>(irq: &mut I, f: impl FnOnce() -> R) -> R
where
    I: InterruptControl + ?Sized,
{
    let saved = irq.disable();
    let result = f();
    irq.restore(saved);
    result
}

pub const fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Where images go: the first sector boundary after the running firmware,
/// plus the reserved sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgramRegion {
    offset: u32,
    ceiling: u32,
}

impl ProgramRegion {
    /// `image_end` is the XIP address one past the running firmware
    pub fn after_image(image_end: u32, ceiling: u32) -> Self {
        let used = image_end.saturating_sub(XIP_BASE);
        Self {
            offset: align_up(used, FLASH_SECTOR_SIZE) + RESERVED_SECTORS * FLASH_SECTOR_SIZE,
            ceiling,
        }
    }

    /// Offset from the start of flash; always sector aligned
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// XIP address the emulator reads the image from
    pub fn base_address(&self) -> u32 {
        XIP_BASE + self.offset
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    fn clamp_to(self, capacity: u32) -> Self {
        let available = capacity.saturating_sub(self.offset);
        Self {
            offset: self.offset,
            ceiling: self.ceiling.min(available),
        }
    }
}

/// The image currently held in program storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedImage {
    /// File name without directory, used for save-state paths
    pub name: String,
    pub size: u32,
    pub base_address: u32,
}

pub struct FlashProgrammer<F, I> {
    flash: F,
    irq: I,
    region: ProgramRegion,
    lockout: Lockout,
    last_written: Option<LoadedImage>,
}

impl<F: FlashDevice, I: InterruptControl> FlashProgrammer<F, I> {
    /// The region's ceiling is clamped to what is left of the device
    pub fn new(flash: F, irq: I, region: ProgramRegion, lockout: Lockout) -> Self {
        let clamped = region.clamp_to(flash.capacity());
        if clamped.ceiling() < region.ceiling() {
            log(LogCategory::Flash, LogLevel::Info, || {
                format!(
                    "image ceiling clamped from {} to {} bytes",
                    region.ceiling(),
                    clamped.ceiling()
                )
            });
        }
        Self {
            flash,
            irq,
            region: clamped,
            lockout,
            last_written: None,
        }
    }

    pub fn region(&self) -> ProgramRegion {
        self.region
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn interrupts(&self) -> &I {
        &self.irq
    }

    /// Most recent successfully written image
    pub fn last_written(&self) -> Option<&LoadedImage> {
        self.last_written.as_ref()
    }

    /// Stat `path` and make sure it fits under the ceiling. Nothing is
    /// touched on failure.
    pub fn check_fits<S: Storage>(&self, storage: &mut S, path: &str) -> Result<FileStat, FlashError> {
        let stat = storage.stat(path)?;
        if stat.is_dir {
            return Err(StorageError::IsADirectory(path.to_string()).into());
        }
        let max = u64::from(self.region.ceiling());
        if stat.size > max {
            log(LogCategory::Flash, LogLevel::Warn, || {
                format!("{} rejected: {} bytes over a {} byte ceiling", path, stat.size, max)
            });
            return Err(FlashError::ImageTooLarge { size: stat.size, max });
        }
        Ok(stat)
    }

    pub fn write<S: Storage>(&mut self, storage: &mut S, path: &str) -> Result<LoadedImage, FlashError> {
        self.write_with_progress(storage, path, |_| {})
    }

    /// Write `path` into program storage. `progress` receives the flash
    /// offset of every programmed page.
    pub fn write_with_progress<S, P>(
        &mut self,
        storage: &mut S,
        path: &str,
        mut progress: P,
    ) -> Result<LoadedImage, FlashError>
    where
        S: Storage,
        P: FnMut(u32),
    {
        let stat = self.check_fits(storage, path)?;
        // Open before anything is erased so a bad file costs nothing
        let mut reader = storage.open(path)?;

        // Fits under the ceiling, which is a u32
        let size = stat.size as u32;
        let erase_len = align_up(size, self.flash.sector_size());
        let page_size = self.flash.page_size() as usize;
        let start = self.region.offset();

        log(LogCategory::Flash, LogLevel::Info, || {
            format!("writing {} ({} bytes) at {:#x}", path, size, self.region.base_address())
        });

        let _guard = self.lockout.start_blocking();

        if erase_len > 0 {
            with_interrupts_masked(&mut self.irq, || self.flash.erase(start, erase_len))?;
        }

        let mut page = vec![0u8; page_size];
        let mut offset = start;
        let mut written: u64 = 0;
        while offset - start < erase_len {
            let n = fill_page(&mut reader, &mut page).map_err(|source| FlashError::PartialWrite {
                written,
                source,
            })?;
            if n == 0 {
                break;
            }
            page[n..].fill(0xFF);
            with_interrupts_masked(&mut self.irq, || self.flash.program(offset, &page))?;
            progress(offset);
            offset += page_size as u32;
            written += n as u64;
        }

        if written < u64::from(size) {
            log(LogCategory::Flash, LogLevel::Warn, || {
                format!("{} ended after {} of {} bytes", path, written, size)
            });
        }

        let image = LoadedImage {
            name: stat.name,
            size,
            base_address: self.region.base_address(),
        };
        self.last_written = Some(image.clone());
        Ok(image)
    }
}

/// Read until `page` is full or the reader reports end of file
fn fill_page<R: Read>(reader: &mut R, page: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < page.len() {
        match reader.read(&mut page[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
