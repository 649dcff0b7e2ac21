//! The emulation engine as seen by the session.

use crate::flash::LoadedImage;
use std::collections::HashSet;

/// Audio sample rate the engine is initialised with
pub const AUDIO_SAMPLE_RATE: u32 = 22050;

/// An emulation engine running the image held in program storage
pub trait Emulator {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the image mapped at `image.base_address`
    fn init(&mut self, image: &LoadedImage, sample_rate: u32) -> Result<(), Self::Error>;

    /// Joypad register for the next frame (see [`crate::input::Buttons::to_joypad_bits`])
    fn set_buttons(&mut self, bits: u8);

    /// Emulate one frame
    fn step_frame(&mut self) -> Result<(), Self::Error>;

    fn save_state(&mut self, path: &str) -> Result<(), Self::Error>;

    fn load_state(&mut self, path: &str) -> Result<(), Self::Error>;
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum HeadlessError {
    #[error("no image loaded")]
    NotInitialized,
    #[error("no save state at {0}")]
    NoSuchState(String),
}

/// Engine stand-in that runs nothing and records what it was asked to do
#[derive(Debug, Default)]
pub struct HeadlessEmulator {
    image: Option<LoadedImage>,
    frames: u64,
    buttons: Vec<u8>,
    saved: HashSet<String>,
    loads: Vec<String>,
}

impl HeadlessEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(&self) -> Option<&LoadedImage> {
        self.image.as_ref()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Joypad value of every frame, in order
    pub fn button_history(&self) -> &[u8] {
        &self.buttons
    }

    pub fn has_state(&self, path: &str) -> bool {
        self.saved.contains(path)
    }

    /// Paths successfully loaded, in order
    pub fn loads(&self) -> &[String] {
        &self.loads
    }
}

impl Emulator for HeadlessEmulator {
    type Error = HeadlessError;

    fn init(&mut self, image: &LoadedImage, _sample_rate: u32) -> Result<(), HeadlessError> {
        self.image = Some(image.clone());
        self.frames = 0;
        Ok(())
    }

    fn set_buttons(&mut self, bits: u8) {
        self.buttons.push(bits);
    }

    fn step_frame(&mut self) -> Result<(), HeadlessError> {
        if self.image.is_none() {
            return Err(HeadlessError::NotInitialized);
        }
        self.frames += 1;
        Ok(())
    }

    fn save_state(&mut self, path: &str) -> Result<(), HeadlessError> {
        if self.image.is_none() {
            return Err(HeadlessError::NotInitialized);
        }
        self.saved.insert(path.to_string());
        Ok(())
    }

    fn load_state(&mut self, path: &str) -> Result<(), HeadlessError> {
        if !self.saved.contains(path) {
            return Err(HeadlessError::NoSuchState(path.to_string()));
        }
        self.loads.push(path.to_string());
        Ok(())
    }
}
