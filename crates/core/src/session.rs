//! The control context's main loop.
//!
//! Boot mounts the home directory and loads the configuration. After that
//! the session alternates between the browser and gameplay: every frame the
//! merged controls become the emulator's joypad value, START+SELECT opens
//! the settings menu, Ctrl/Alt+F1..F8 save or load a state slot and
//! Ctrl+Alt+Delete restarts the board.

use crate::browser::{BrowserController, BrowserError, BrowserOutcome};
use crate::config::{ConfigStore, HOME_DIR};
use crate::display::{color, TextDisplay, VideoMode};
use crate::emulator::{Emulator, AUDIO_SAMPLE_RATE};
use crate::flash::{FlashDevice, FlashProgrammer, InterruptControl};
use crate::input::{ControlSource, ControlState};
use crate::logging::{log, LogCategory, LogLevel};
use crate::menu::{MenuEngine, MenuExit};
use crate::platform::Platform;
use crate::settings::{self, DeviceContext, SettingsModel};
use crate::storage::{Storage, StorageError};

/// LED blinks at power-on
const BOOT_BLINKS: usize = 6;
const BOOT_BLINK_MS: u32 = 33;

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("storage not available")]
    Mount(#[source] StorageError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error("emulator failed")]
    Emulator(#[source] BoxedError),
}

fn emulator_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> SessionError {
    SessionError::Emulator(Box::new(e))
}

/// Why [`Session::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// A watchdog restart was requested
    Reboot,
    /// The input source ended
    InputClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayExit {
    ResetToBrowser,
    Reboot,
    InputClosed,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub home: String,
    /// Extensions of runnable images, e.g. `"pce"`
    pub extensions: String,
    /// Show the composite TV output settings in the menu
    pub tv_out: bool,
    pub program_name: String,
    pub version: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            home: HOME_DIR.to_string(),
            extensions: "pce".to_string(),
            tv_out: false,
            program_name: "pico-pce".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub struct Session<S, F, I, E, P, C, D> {
    storage: S,
    programmer: FlashProgrammer<F, I>,
    emulator: E,
    platform: P,
    controls: C,
    display: D,
    ctx: DeviceContext,
    store: ConfigStore,
    browser: BrowserController,
    options: SessionOptions,
}

impl<S, F, I, E, P, C, D> Session<S, F, I, E, P, C, D>
where
    S: Storage,
    F: FlashDevice,
    I: InterruptControl,
    E: Emulator,
    P: Platform,
    C: ControlSource,
    D: TextDisplay,
{
    pub fn new(
        storage: S,
        programmer: FlashProgrammer<F, I>,
        emulator: E,
        platform: P,
        controls: C,
        display: D,
        options: SessionOptions,
    ) -> Self {
        Self {
            storage,
            programmer,
            emulator,
            platform,
            controls,
            display,
            ctx: DeviceContext::new(&options.home),
            store: ConfigStore::in_dir(&options.home),
            browser: BrowserController::new(&options.home, &options.extensions),
            options,
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn programmer(&self) -> &FlashProgrammer<F, I> {
        &self.programmer
    }

    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Power-on: apply the boot clock, blink, create the home directory and
    /// load the configuration.
    pub fn boot(&mut self) -> Result<(), SessionError> {
        let khz = self.ctx.clock_khz();
        if !self.platform.set_clock_khz(khz) {
            log(LogCategory::Config, LogLevel::Warn, || {
                format!("boot clock of {} kHz refused", khz)
            });
        }

        for _ in 0..BOOT_BLINKS {
            self.platform.sleep_ms(BOOT_BLINK_MS);
            self.platform.set_status_led(true);
            self.platform.sleep_ms(BOOT_BLINK_MS);
            self.platform.set_status_led(false);
        }

        if let Err(e) = self.storage.mkdir(&self.options.home) {
            self.display.set_mode(VideoMode::Text);
            self.display.draw_text(
                "SD Card not inserted or SD Card error!",
                0,
                0,
                color::LIGHT_RED,
                color::BLACK,
            );
            return Err(SessionError::Mount(e));
        }

        self.ctx.config = self.store.load(&mut self.storage);
        self.controls.set_swap_ab(self.ctx.config.swap_ab);
        log(LogCategory::Config, LogLevel::Info, || {
            format!("booted with {:?}", self.ctx.config)
        });
        Ok(())
    }

    /// Boot, then browse and play until a reboot or the end of input
    pub fn run(&mut self) -> Result<SessionExit, SessionError> {
        self.boot()?;
        loop {
            if let Some(exit) = self.select_image()? {
                return Ok(exit);
            }
            match self.play()? {
                PlayExit::ResetToBrowser => continue,
                PlayExit::Reboot => return Ok(SessionExit::Reboot),
                PlayExit::InputClosed => return Ok(SessionExit::InputClosed),
            }
        }
    }

    /// Run the browser until there is an image to play. Returns `Some` if
    /// the session should end instead.
    pub fn select_image(&mut self) -> Result<Option<SessionExit>, SessionError> {
        loop {
            let outcome = self.browser.run(
                &mut self.storage,
                &mut self.programmer,
                &mut self.controls,
                &mut self.display,
                &mut self.platform,
            )?;
            match outcome {
                BrowserOutcome::Loaded(image) => {
                    self.ctx.loaded = Some(image);
                    return Ok(None);
                }
                BrowserOutcome::Previous if self.ctx.loaded.is_some() => return Ok(None),
                BrowserOutcome::Previous => {
                    log(LogCategory::Browser, LogLevel::Warn, || {
                        "no previous image to run".to_string()
                    });
                }
                BrowserOutcome::Reboot => return Ok(Some(SessionExit::Reboot)),
                BrowserOutcome::InputClosed => return Ok(Some(SessionExit::InputClosed)),
            }
        }
    }

    /// Run the loaded image until the menu sends us back to the browser,
    /// a reboot is requested or input ends.
    pub fn play(&mut self) -> Result<PlayExit, SessionError> {
        let Some(image) = self.ctx.loaded.clone() else {
            return Ok(PlayExit::ResetToBrowser);
        };
        self.emulator
            .init(&image, AUDIO_SAMPLE_RATE)
            .map_err(emulator_error)?;
        self.display.set_mode(VideoMode::Graphics);
        log(LogCategory::Input, LogLevel::Info, || format!("playing {}", image.name));

        let mut menu_held = false;
        let mut function_held = None;
        loop {
            let Some(state) = self.controls.poll() else {
                return Ok(PlayExit::InputClosed);
            };
            if state.reboot_chord {
                self.platform.reboot();
                return Ok(PlayExit::Reboot);
            }
            self.emulator.set_buttons(state.buttons.to_joypad_bits());

            if state.menu_chord && !menu_held {
                match self.open_menu() {
                    MenuExit::Closed => self.display.set_mode(VideoMode::Graphics),
                    MenuExit::ResetToBrowser => return Ok(PlayExit::ResetToBrowser),
                    MenuExit::Reboot => {
                        self.platform.reboot();
                        return Ok(PlayExit::Reboot);
                    }
                }
            }
            menu_held = state.menu_chord;

            if state.function_key != function_held {
                self.slot_shortcut(&state)?;
            }
            function_held = state.function_key;

            self.emulator.step_frame().map_err(emulator_error)?;
        }
    }

    /// Ctrl+Fn saves slot n, Alt+Fn loads it. A failed save or load is
    /// logged and play continues.
    fn slot_shortcut(&mut self, state: &ControlState) -> Result<(), SessionError> {
        let Some(slot) = state.function_key else {
            return Ok(());
        };
        self.ctx.save_slot = slot;
        let Some(path) = self.ctx.save_state_path() else {
            return Ok(());
        };
        if state.alt {
            match self.emulator.load_state(&path) {
                Ok(()) => log(LogCategory::Input, LogLevel::Info, || format!("loaded {}", path)),
                Err(e) => log(LogCategory::Input, LogLevel::Warn, || {
                    format!("loading {} failed: {}", path, e)
                }),
            }
        }
        if state.ctrl {
            match self.emulator.save_state(&path) {
                Ok(()) => log(LogCategory::Input, LogLevel::Info, || format!("saved {}", path)),
                Err(e) => log(LogCategory::Input, LogLevel::Warn, || {
                    format!("saving {} failed: {}", path, e)
                }),
            }
        }
        Ok(())
    }

    fn open_menu(&mut self) -> MenuExit {
        let mut engine = MenuEngine::new(settings::menu_items(self.options.tv_out))
            .with_header(self.options.program_name.as_str())
            .with_footer(self.options.version.as_str());
        let mut model = SettingsModel::new(
            &mut self.ctx,
            &mut self.storage,
            &mut self.emulator,
            &self.store,
        );
        let exit = engine.run(
            &mut model,
            &mut self.controls,
            &mut self.display,
            &mut self.platform,
        );
        self.controls.set_swap_ab(self.ctx.config.swap_ab);
        exit
    }
}
