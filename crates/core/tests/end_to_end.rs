//! End-to-end behaviour over host-backed storage and simulated flash:
//! listing, configuration persistence, image programming and a scripted
//! session from browser to gameplay.

use picocart_core::catalog::{Catalog, MAX_ENTRIES};
use picocart_core::config::{ConfigRecord, ConfigStore, DisplaySettings, RECORD_LEN};
use picocart_core::display::TextBuffer;
use picocart_core::emulator::HeadlessEmulator;
use picocart_core::flash::{
    CountingInterrupts, FlashError, FlashProgrammer, MemoryFlash, ProgramRegion,
    FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE, RESERVED_SECTORS, XIP_BASE,
};
use picocart_core::input::{hid, Buttons, ControlSource, GamepadState, InputLatch, LatchedControls, ScriptedInput};
use picocart_core::lockout::{Lockout, StartSignal};
use picocart_core::platform::HostPlatform;
use picocart_core::presentation::{Disconnected, PresentationWorker};
use picocart_core::storage::{HostStorage, MemStorage, Storage};
use picocart_core::{Session, SessionExit, SessionOptions};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A fresh, empty card root under the system temp directory
fn card_root(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let root = std::env::temp_dir().join(format!(
        "picocart_e2e_{}_{}_{}",
        name,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(&root).unwrap();
    root
}

fn programmer(ceiling: u32) -> FlashProgrammer<MemoryFlash, CountingInterrupts> {
    let irq = CountingInterrupts::default();
    FlashProgrammer::new(
        MemoryFlash::new(2 * 1024 * 1024).observing(&irq),
        irq,
        ProgramRegion::after_image(XIP_BASE + 0x1_8000, ceiling),
        Lockout::new(),
    )
}

#[test]
fn test_catalog_order_from_host_directory() {
    let root = card_root("catalog");
    fs::create_dir_all(root.join("PCE/Shmups")).unwrap();
    fs::create_dir_all(root.join("PCE/Arcade")).unwrap();
    fs::write(root.join("PCE/bonk.pce"), [0u8; 16]).unwrap();
    fs::write(root.join("PCE/readme.txt"), b"hi").unwrap();
    fs::write(root.join("PCE/Zipang.PCE"), [0u8; 32]).unwrap();

    let mut storage = HostStorage::new(&root);
    let catalog = Catalog::build(&mut storage, "\\PCE", "pce").unwrap();
    let names: Vec<_> = catalog.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        ["..", "Arcade", "Shmups", "Zipang.PCE", "bonk.pce", "readme.txt"]
    );
    let executable: Vec<_> = catalog
        .entries()
        .iter()
        .filter(|e| e.is_executable)
        .map(|e| e.name.as_str())
        .collect();
    assert_eq!(executable, ["bonk.pce"]);
    assert_eq!(catalog.get(3).map(|e| e.size), Some(32));

    let top = Catalog::build(&mut storage, "\\", "pce").unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top.entries()[0].name, "PCE");

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_catalog_stops_at_cap() {
    let storage = MemStorage::new();
    for i in 0..MAX_ENTRIES + 100 {
        storage.add_file(&format!("\\PCE\\big\\game{:04}.pce", i), vec![0; 4]);
    }
    let mut storage = storage;
    let catalog = Catalog::build(&mut storage, "\\PCE\\big", "pce").unwrap();
    assert_eq!(catalog.len(), MAX_ENTRIES);
    assert!(catalog.is_truncated());
    assert!(catalog.entries()[0].is_parent());
}

#[test]
fn test_config_persists_on_host_storage() {
    let root = card_root("config");
    let mut storage = HostStorage::new(&root);
    storage.mkdir("\\PCE").unwrap();
    let store = ConfigStore::default();

    assert_eq!(store.load(&mut storage), ConfigRecord::default());

    let record = ConfigRecord {
        swap_ab: true,
        display: DisplaySettings {
            tv_system: 1,
            shift_lines: true,
            ..DisplaySettings::default()
        },
    };
    store.save(&mut storage, &record).unwrap();

    let on_disk = fs::read(root.join("PCE/pico-pce.cfg")).unwrap();
    assert_eq!(on_disk.len(), RECORD_LEN);
    assert_eq!(store.load(&mut storage), record);

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_image_one_byte_over_ceiling_leaves_flash_untouched() {
    let ceiling = 64 * 1024;
    let storage = MemStorage::new();
    storage.add_file("\\PCE\\over.pce", vec![0x11; ceiling as usize + 1]);
    storage.add_file("\\PCE\\exact.pce", vec![0x22; ceiling as usize]);
    let mut storage = storage;
    let mut programmer = programmer(ceiling);

    let before = crc32fast::hash(programmer.flash().contents());
    match programmer.write(&mut storage, "\\PCE\\over.pce") {
        Err(FlashError::ImageTooLarge { size, max }) => {
            assert_eq!(size, u64::from(ceiling) + 1);
            assert_eq!(max, u64::from(ceiling));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(crc32fast::hash(programmer.flash().contents()), before);
    assert!(programmer.flash().erase_calls().is_empty());
    assert_eq!(programmer.interrupts().disable_count(), 0);

    let image = programmer.write(&mut storage, "\\PCE\\exact.pce").unwrap();
    assert_eq!(image.size, ceiling);
    assert_ne!(crc32fast::hash(programmer.flash().contents()), before);
}

#[test]
fn test_page_multiple_image_programs_every_page_once() {
    let size = 40 * FLASH_PAGE_SIZE;
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let storage = MemStorage::new();
    storage.add_file("\\PCE\\pages.pce", data.clone());
    let mut storage = storage;
    let mut programmer = programmer(256 * 1024);

    let image = programmer.write(&mut storage, "\\PCE\\pages.pce").unwrap();
    let region = programmer.region();
    let offset = region.offset();
    assert_eq!(offset, 0x1_8000 + RESERVED_SECTORS * FLASH_SECTOR_SIZE);
    assert_eq!(image.base_address, XIP_BASE + offset);

    let flash = programmer.flash();
    assert_eq!(flash.program_calls(), (size / FLASH_PAGE_SIZE) as usize);
    let sectors = size.div_ceil(FLASH_SECTOR_SIZE);
    assert_eq!(flash.erase_calls(), [(offset, sectors * FLASH_SECTOR_SIZE)]);
    assert!(flash.all_operations_masked());

    let written = &flash.contents()[offset as usize..(offset + size) as usize];
    assert_eq!(written, data.as_slice());
    // Rest of the erased range stays blank
    let tail = &flash.contents()[(offset + size) as usize..(offset + sectors * FLASH_SECTOR_SIZE) as usize];
    assert!(tail.iter().all(|&b| b == 0xFF));
}

#[test]
fn test_write_parks_running_presentation_worker() {
    let lockout = Lockout::new();
    let start = StartSignal::new();
    let latch = InputLatch::new();
    let worker = PresentationWorker::spawn(
        Disconnected,
        Disconnected,
        latch.clone(),
        &lockout,
        start.clone(),
        Duration::from_millis(1),
    )
    .unwrap();
    start.release();
    assert!(lockout.has_victim());

    let storage = MemStorage::new();
    storage.add_file("\\PCE\\game.pce", vec![0xA5; 10_000]);
    let mut storage = storage;
    let irq = CountingInterrupts::default();
    let mut programmer = FlashProgrammer::new(
        MemoryFlash::new(1024 * 1024).observing(&irq),
        irq,
        ProgramRegion::after_image(XIP_BASE, 128 * 1024),
        lockout.clone(),
    );
    let image = programmer.write(&mut storage, "\\PCE\\game.pce").unwrap();
    assert_eq!(image.size, 10_000);

    let resumed = worker.ticks();
    while worker.ticks() <= resumed {
        std::thread::yield_now();
    }
    assert!(!lockout.is_parked());
    let mut controls = LatchedControls::new(latch, false);
    assert_eq!(controls.poll().map(|s| s.buttons.any()), Some(false));
    worker.shutdown().unwrap();
}

#[test]
fn test_scripted_session_from_card_to_gameplay() {
    let root = card_root("session");
    fs::create_dir_all(root.join("PCE/Shmups")).unwrap();
    let rom: Vec<u8> = (0..3000u32).map(|i| (i * 7) as u8).collect();
    fs::write(root.join("PCE/Shmups/soldier.pce"), &rom).unwrap();

    // Enter Shmups, load the image, play three frames, save to slot 3
    let input = ScriptedInput::new()
        .idle(1)
        .key(&[hid::DOWN])
        .tap(&[hid::ENTER])
        .key(&[hid::DOWN])
        .tap(&[hid::ENTER])
        .pad(GamepadState::RIGHT | GamepadState::A)
        .key(&[hid::X])
        .chord(hid::MOD_LCTRL, &[hid::F1 + 2]);

    let mut session = Session::new(
        HostStorage::new(&root),
        programmer(256 * 1024),
        HeadlessEmulator::new(),
        HostPlatform::default(),
        input,
        TextBuffer::default(),
        SessionOptions::default(),
    );
    assert_eq!(session.run().unwrap(), SessionExit::InputClosed);

    let image = session.context().loaded.clone().unwrap();
    assert_eq!(image.name, "soldier.pce");
    assert_eq!(image.size, 3000);
    assert_eq!(session.emulator().image(), Some(&image));

    let offset = session.programmer().region().offset() as usize;
    let flash = session.programmer().flash().contents();
    assert_eq!(&flash[offset..offset + rom.len()], rom.as_slice());
    // Last page padded with 0xFF
    let padded_end = offset + rom.len().div_ceil(FLASH_PAGE_SIZE as usize) * FLASH_PAGE_SIZE as usize;
    assert!(flash[offset + rom.len()..padded_end].iter().all(|&b| b == 0xFF));

    assert_eq!(
        session.emulator().button_history(),
        [0, Buttons::JOY_RIGHT | Buttons::JOY_A, Buttons::JOY_B, 0]
    );
    assert_eq!(session.context().save_slot, 3);
    assert!(session.emulator().has_state("\\PCE\\soldier.pce_3.save"));
    assert!(root.join("PCE").is_dir());
    assert!(session.platform().led());

    fs::remove_dir_all(&root).unwrap();
}
