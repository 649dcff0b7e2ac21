//! The device's settings menu and the control-context state it edits.

use crate::config::{ConfigRecord, ConfigStore, HOME_DIR};
use crate::emulator::Emulator;
use crate::flash::LoadedImage;
use crate::logging::{log, LogCategory, LogLevel};
use crate::menu::{Destination, MenuItem, MenuModel};
use crate::platform::Platform;
use crate::storage::{self, Storage, StorageError};

/// Selectable system clocks; index 0 is the boot clock
pub const FREQUENCIES_MHZ: [u32; 9] = [378, 396, 404, 408, 412, 416, 420, 424, 432];

/// Highest save-state slot reachable from the menu
pub const MAX_MENU_SLOT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    SwapAb,
    SaveSlot,
    TvSystem,
    TvLines,
    ColorFreq,
    Color,
    ShiftLines,
    ShiftHalfFrame,
    Frequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsAction {
    SaveState,
    LoadState,
    Overclock,
}

type Item = MenuItem<Setting, SettingsAction>;

const NO_YES: [&str; 2] = ["NO ", "YES"];
const TV_SYSTEMS: [&str; 2] = ["PAL ", "NTSC"];
const TV_LINES: [&str; 4] = ["624", "625", "524", "525"];
const COLOR_FREQS: [&str; 2] = ["3.579545", "4.433619"];
const FREQUENCY_NAMES: [&str; 9] = ["378", "396", "404", "408", "412", "416", "420", "424", "432"];

const SWAP_AB: Item = MenuItem::Toggle {
    label: "Swap AB <> BA: {}",
    key: Setting::SwapAb,
    display: &NO_YES,
    action: None,
};
const SEPARATOR: Item = MenuItem::Label { label: "" };
const SAVE_STATE: Item = MenuItem::Integer {
    label: "Save state: {}",
    key: Setting::SaveSlot,
    max: MAX_MENU_SLOT,
    action: Some(SettingsAction::SaveState),
};
const LOAD_STATE: Item = MenuItem::Integer {
    label: "Load state: {}",
    key: Setting::SaveSlot,
    max: MAX_MENU_SLOT,
    action: Some(SettingsAction::LoadState),
};
const OVERCLOCK: Item = MenuItem::Enumerated {
    label: "Overclocking: {} MHz",
    key: Setting::Frequency,
    display: &FREQUENCY_NAMES,
    action: Some(SettingsAction::Overclock),
};
const APPLY_HINT: Item = MenuItem::Label {
    label: "Press START / Enter to apply",
};
const ROM_SELECT: Item = MenuItem::Navigate {
    label: "Reset to ROM select",
    to: Destination::Browser,
};
const RETURN: Item = MenuItem::Navigate {
    label: "Return to game",
    to: Destination::Return,
};

pub static SETTINGS_MENU: [Item; 9] = [
    SWAP_AB, SEPARATOR, SAVE_STATE, LOAD_STATE, SEPARATOR, OVERCLOCK, APPLY_HINT, ROM_SELECT,
    RETURN,
];

/// The menu for boards with composite TV output
pub static SETTINGS_MENU_TV_OUT: [Item; 15] = [
    SWAP_AB,
    SEPARATOR,
    SAVE_STATE,
    LOAD_STATE,
    SEPARATOR,
    MenuItem::Enumerated {
        label: "TV system {}",
        key: Setting::TvSystem,
        display: &TV_SYSTEMS,
        action: None,
    },
    MenuItem::Enumerated {
        label: "TV Lines {}",
        key: Setting::TvLines,
        display: &TV_LINES,
        action: None,
    },
    MenuItem::Enumerated {
        label: "Freq {}",
        key: Setting::ColorFreq,
        display: &COLOR_FREQS,
        action: None,
    },
    MenuItem::Toggle {
        label: "Colors: {}",
        key: Setting::Color,
        display: &NO_YES,
        action: None,
    },
    MenuItem::Toggle {
        label: "Shift lines {}",
        key: Setting::ShiftLines,
        display: &NO_YES,
        action: None,
    },
    MenuItem::Toggle {
        label: "Shift half frame {}",
        key: Setting::ShiftHalfFrame,
        display: &NO_YES,
        action: None,
    },
    OVERCLOCK,
    APPLY_HINT,
    ROM_SELECT,
    RETURN,
];

pub fn menu_items(tv_out: bool) -> &'static [Item] {
    if tv_out {
        &SETTINGS_MENU_TV_OUT
    } else {
        &SETTINGS_MENU
    }
}

/// `<home>\<name>.save` for slot 0, `<home>\<name>_<slot>.save` otherwise
pub fn save_state_path(home: &str, name: &str, slot: u8) -> String {
    let file = if slot == 0 {
        format!("{}.save", name)
    } else {
        format!("{}_{}.save", name, slot)
    };
    storage::join(home, &file)
}

/// Mutable state of the control context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    pub config: ConfigRecord,
    pub save_slot: u8,
    /// Index into [`FREQUENCIES_MHZ`]
    pub frequency_index: u8,
    /// Image currently in program storage, if one was written this boot
    pub loaded: Option<LoadedImage>,
    pub home: String,
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new(HOME_DIR)
    }
}

impl DeviceContext {
    pub fn new(home: &str) -> Self {
        Self {
            config: ConfigRecord::default(),
            save_slot: 0,
            frequency_index: 0,
            loaded: None,
            home: home.to_string(),
        }
    }

    pub fn clock_khz(&self) -> u32 {
        let index = usize::from(self.frequency_index).min(FREQUENCIES_MHZ.len() - 1);
        FREQUENCIES_MHZ[index] * 1000
    }

    /// Save-state path for the loaded image and the current slot
    pub fn save_state_path(&self) -> Option<String> {
        self.loaded
            .as_ref()
            .map(|image| save_state_path(&self.home, &image.name, self.save_slot))
    }
}

/// Binds the settings tables to a [`DeviceContext`], the emulator and the
/// configuration file
pub struct SettingsModel<'a, S, E> {
    ctx: &'a mut DeviceContext,
    storage: &'a mut S,
    emulator: &'a mut E,
    store: &'a ConfigStore,
}

impl<'a, S: Storage, E: Emulator> SettingsModel<'a, S, E> {
    pub fn new(
        ctx: &'a mut DeviceContext,
        storage: &'a mut S,
        emulator: &'a mut E,
        store: &'a ConfigStore,
    ) -> Self {
        Self {
            ctx,
            storage,
            emulator,
            store,
        }
    }

    fn state_path(&self) -> Option<String> {
        let path = self.ctx.save_state_path();
        if path.is_none() {
            log(LogCategory::Menu, LogLevel::Warn, || {
                "no image loaded, save states unavailable".to_string()
            });
        }
        path
    }
}

impl<S: Storage, E: Emulator> MenuModel for SettingsModel<'_, S, E> {
    type Key = Setting;
    type Action = SettingsAction;

    fn value(&self, key: Setting) -> u8 {
        let config = &self.ctx.config;
        match key {
            Setting::SwapAb => u8::from(config.swap_ab),
            Setting::SaveSlot => self.ctx.save_slot,
            Setting::TvSystem => config.display.tv_system,
            Setting::TvLines => config.display.tv_lines,
            Setting::ColorFreq => config.display.color_freq,
            Setting::Color => u8::from(config.display.color),
            Setting::ShiftLines => u8::from(config.display.shift_lines),
            Setting::ShiftHalfFrame => u8::from(config.display.shift_half_frame),
            Setting::Frequency => self.ctx.frequency_index,
        }
    }

    fn set_value(&mut self, key: Setting, value: u8) {
        let config = &mut self.ctx.config;
        match key {
            Setting::SwapAb => config.swap_ab = value != 0,
            Setting::SaveSlot => self.ctx.save_slot = value,
            Setting::TvSystem => config.display.tv_system = value,
            Setting::TvLines => config.display.tv_lines = value,
            Setting::ColorFreq => config.display.color_freq = value,
            Setting::Color => config.display.color = value != 0,
            Setting::ShiftLines => config.display.shift_lines = value != 0,
            Setting::ShiftHalfFrame => config.display.shift_half_frame = value != 0,
            Setting::Frequency => self.ctx.frequency_index = value,
        }
    }

    fn invoke(&mut self, action: SettingsAction, platform: &mut dyn Platform) -> bool {
        match action {
            SettingsAction::SaveState => {
                let Some(path) = self.state_path() else {
                    return false;
                };
                match self.emulator.save_state(&path) {
                    Ok(()) => {
                        log(LogCategory::Menu, LogLevel::Info, || format!("saved state to {}", path));
                        true
                    }
                    Err(e) => {
                        log(LogCategory::Menu, LogLevel::Warn, || {
                            format!("saving {} failed: {}", path, e)
                        });
                        false
                    }
                }
            }
            SettingsAction::LoadState => {
                let Some(path) = self.state_path() else {
                    return false;
                };
                match self.emulator.load_state(&path) {
                    Ok(()) => true,
                    Err(e) => {
                        log(LogCategory::Menu, LogLevel::Warn, || {
                            format!("loading {} failed: {}", path, e)
                        });
                        false
                    }
                }
            }
            SettingsAction::Overclock => {
                let khz = self.ctx.clock_khz();
                let ok = platform.set_clock_khz(khz);
                log(LogCategory::Menu, LogLevel::Info, || {
                    format!("system clock {} kHz: {}", khz, if ok { "set" } else { "refused" })
                });
                ok
            }
        }
    }

    fn persist(&mut self) -> Result<(), StorageError> {
        self.store.save(&mut *self.storage, &self.ctx.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::{HeadlessEmulator, AUDIO_SAMPLE_RATE};
    use crate::menu::{MenuEngine, MenuExit};
    use crate::platform::HostPlatform;
    use crate::storage::MemStorage;

    fn loaded_ctx() -> DeviceContext {
        let mut ctx = DeviceContext::default();
        ctx.loaded = Some(LoadedImage {
            name: "bonk.pce".to_string(),
            size: 4096,
            base_address: 0x1004_0000,
        });
        ctx
    }

    fn emulator(ctx: &DeviceContext) -> HeadlessEmulator {
        let mut emu = HeadlessEmulator::new();
        if let Some(image) = &ctx.loaded {
            emu.init(image, AUDIO_SAMPLE_RATE).unwrap();
        }
        emu
    }

    #[test]
    fn test_save_state_paths() {
        assert_eq!(save_state_path("\\PCE", "bonk.pce", 0), "\\PCE\\bonk.pce.save");
        assert_eq!(save_state_path("\\PCE", "bonk.pce", 3), "\\PCE\\bonk.pce_3.save");

        let mut ctx = loaded_ctx();
        ctx.save_slot = 8;
        assert_eq!(ctx.save_state_path().as_deref(), Some("\\PCE\\bonk.pce_8.save"));
        assert_eq!(DeviceContext::default().save_state_path(), None);
    }

    #[test]
    fn test_tables() {
        assert_eq!(menu_items(false).len(), 9);
        assert_eq!(menu_items(true).len(), 15);
        for table in [menu_items(false), menu_items(true)] {
            assert_eq!(table[0].label(), "Swap AB <> BA: {}");
            assert_eq!(table[table.len() - 1].label(), "Return to game");
            assert!(!table[table.len() - 3].is_selectable());
        }
        assert_eq!(FREQUENCY_NAMES.len(), FREQUENCIES_MHZ.len());
    }

    #[test]
    fn test_clock_index_is_bounded() {
        let mut ctx = DeviceContext::default();
        assert_eq!(ctx.clock_khz(), 378_000);
        ctx.frequency_index = 8;
        assert_eq!(ctx.clock_khz(), 432_000);
        ctx.frequency_index = 200;
        assert_eq!(ctx.clock_khz(), 432_000);
    }

    #[test]
    fn test_values_bind_to_context() {
        let mut ctx = DeviceContext::default();
        let mut storage = MemStorage::new();
        let mut emu = HeadlessEmulator::new();
        let store = ConfigStore::default();
        let mut model = SettingsModel::new(&mut ctx, &mut storage, &mut emu, &store);

        model.set_value(Setting::SwapAb, 1);
        model.set_value(Setting::TvLines, 3);
        model.set_value(Setting::ShiftHalfFrame, 1);
        model.set_value(Setting::SaveSlot, 4);
        assert_eq!(model.value(Setting::SwapAb), 1);
        assert_eq!(model.value(Setting::Color), 1);

        assert!(ctx.config.swap_ab);
        assert_eq!(ctx.config.display.tv_lines, 3);
        assert!(ctx.config.display.shift_half_frame);
        assert_eq!(ctx.save_slot, 4);
    }

    #[test]
    fn test_save_then_load_through_actions() {
        let mut ctx = loaded_ctx();
        ctx.save_slot = 2;
        let mut storage = MemStorage::new();
        let mut emu = emulator(&ctx);
        let store = ConfigStore::default();
        let mut platform = HostPlatform::default();
        let mut model = SettingsModel::new(&mut ctx, &mut storage, &mut emu, &store);

        assert!(!model.invoke(SettingsAction::LoadState, &mut platform));
        assert!(model.invoke(SettingsAction::SaveState, &mut platform));
        assert!(model.invoke(SettingsAction::LoadState, &mut platform));
        assert!(emu.has_state("\\PCE\\bonk.pce_2.save"));
        assert_eq!(emu.loads(), ["\\PCE\\bonk.pce_2.save"]);
    }

    #[test]
    fn test_save_without_image_stays_in_menu() {
        let mut ctx = DeviceContext::default();
        let mut storage = MemStorage::new();
        let mut emu = HeadlessEmulator::new();
        let store = ConfigStore::default();
        let mut platform = HostPlatform::default();
        let mut model = SettingsModel::new(&mut ctx, &mut storage, &mut emu, &store);
        assert!(!model.invoke(SettingsAction::SaveState, &mut platform));
    }

    #[test]
    fn test_overclock_uses_selected_frequency() {
        let mut ctx = DeviceContext::default();
        ctx.frequency_index = 3;
        let mut storage = MemStorage::new();
        let mut emu = HeadlessEmulator::new();
        let store = ConfigStore::default();
        let mut platform = HostPlatform::default().with_max_clock_khz(420_000);
        let mut model = SettingsModel::new(&mut ctx, &mut storage, &mut emu, &store);

        assert!(model.invoke(SettingsAction::Overclock, &mut platform));
        assert_eq!(platform.clock_khz(), 408_000);
        model.set_value(Setting::Frequency, 8);
        assert!(!model.invoke(SettingsAction::Overclock, &mut platform));
        assert_eq!(platform.clock_khz(), 408_000);
    }

    #[test]
    fn test_persist_writes_config_file() {
        let mut ctx = DeviceContext::default();
        let mut storage = MemStorage::new();
        storage.add_dir(HOME_DIR);
        let mut emu = HeadlessEmulator::new();
        let store = ConfigStore::default();
        let mut model = SettingsModel::new(&mut ctx, &mut storage, &mut emu, &store);
        model.set_value(Setting::SwapAb, 1);
        model.persist().unwrap();
        assert!(store.load(&mut storage).swap_ab);
    }

    #[test]
    fn test_rendered_device_menu() {
        let mut ctx = loaded_ctx();
        ctx.frequency_index = 2;
        let mut storage = MemStorage::new();
        let mut emu = emulator(&ctx);
        let store = ConfigStore::default();
        let model = SettingsModel::new(&mut ctx, &mut storage, &mut emu, &store);
        let engine = MenuEngine::new(menu_items(true));

        let texts: Vec<_> = engine.lines(&model).into_iter().map(|l| l.text).collect();
        assert_eq!(texts[0], "Swap AB <> BA: NO ");
        assert_eq!(texts[2], "Save state: 0");
        assert_eq!(texts[5], "TV system PAL ");
        assert_eq!(texts[6], "TV Lines 625");
        assert_eq!(texts[7], "Freq 4.433619");
        assert_eq!(texts[8], "Colors: YES");
        assert_eq!(texts[11], "Overclocking: 404 MHz");
        assert_eq!(texts[13], "Reset to ROM select");
    }

    #[test]
    fn test_menu_exit_reaches_browser_via_table() {
        let mut ctx = loaded_ctx();
        let mut storage = MemStorage::new();
        storage.add_dir(HOME_DIR);
        let mut emu = emulator(&ctx);
        let store = ConfigStore::default();
        let mut platform = HostPlatform::default();
        let mut model = SettingsModel::new(&mut ctx, &mut storage, &mut emu, &store);
        let mut engine = MenuEngine::new(menu_items(false));

        let up = crate::input::ControlState {
            buttons: crate::input::Buttons {
                up: true,
                ..Default::default()
            },
            ..Default::default()
        };
        engine.step(&up, &mut model, &mut platform);
        engine.step(&Default::default(), &mut model, &mut platform);
        engine.step(&up, &mut model, &mut platform);
        assert_eq!(engine.items()[engine.cursor()].label(), "Reset to ROM select");
        let confirm = crate::input::ControlState {
            confirm_edge: true,
            ..Default::default()
        };
        assert_eq!(
            engine.step(&confirm, &mut model, &mut platform),
            Some(MenuExit::ResetToBrowser)
        );
    }
}
