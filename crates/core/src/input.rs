//! Input aggregation.
//!
//! Two physical sources feed the device: a keyboard delivering HID boot
//! reports and a gamepad delivering an 8-bit button mask. Both are merged
//! into one [`ControlState`] per poll. The presentation context publishes the
//! raw reports into an [`InputLatch`]; the control context reads the latch
//! through a [`ControlSource`].

use crate::logging::{log, LogCategory, LogLevel};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// HID keyboard usage codes and modifier bits used by the device
pub mod hid {
    pub const A: u8 = 0x04;
    pub const D: u8 = 0x07;
    pub const K: u8 = 0x0E;
    pub const L: u8 = 0x0F;
    pub const O: u8 = 0x12;
    pub const P: u8 = 0x13;
    pub const S: u8 = 0x16;
    pub const W: u8 = 0x1A;
    pub const X: u8 = 0x1B;
    pub const Z: u8 = 0x1D;
    pub const ENTER: u8 = 0x28;
    pub const ESCAPE: u8 = 0x29;
    pub const BACKSPACE: u8 = 0x2A;
    pub const F1: u8 = 0x3A;
    pub const F8: u8 = 0x41;
    pub const DELETE: u8 = 0x4C;
    pub const RIGHT: u8 = 0x4F;
    pub const LEFT: u8 = 0x50;
    pub const DOWN: u8 = 0x51;
    pub const UP: u8 = 0x52;
    pub const KP_ADD: u8 = 0x57;
    pub const KP_ENTER: u8 = 0x58;
    pub const KP_1: u8 = 0x59;
    pub const KP_2: u8 = 0x5A;
    pub const KP_3: u8 = 0x5B;
    pub const KP_4: u8 = 0x5C;
    pub const KP_5: u8 = 0x5D;
    pub const KP_6: u8 = 0x5E;
    pub const KP_7: u8 = 0x5F;
    pub const KP_8: u8 = 0x60;
    pub const KP_9: u8 = 0x61;
    pub const KP_0: u8 = 0x62;
    pub const KP_DECIMAL: u8 = 0x63;
    pub const CTRL_LEFT: u8 = 0xE0;
    pub const ALT_LEFT: u8 = 0xE2;
    pub const CTRL_RIGHT: u8 = 0xE4;
    pub const ALT_RIGHT: u8 = 0xE6;

    /// Bits of the report's modifier byte
    pub const MOD_LCTRL: u8 = 0x01;
    pub const MOD_LALT: u8 = 0x04;
    pub const MOD_RCTRL: u8 = 0x10;
    pub const MOD_RALT: u8 = 0x40;
}

/// A HID boot-protocol keyboard report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifier: u8,
    pub keycodes: [u8; 6],
}

impl KeyboardReport {
    /// Report with `keys` held; keys past the sixth are dropped as a real
    /// keyboard would
    pub fn with_keys(modifier: u8, keys: &[u8]) -> Self {
        let mut keycodes = [0u8; 6];
        for (slot, &key) in keycodes.iter_mut().zip(keys) {
            *slot = key;
        }
        Self { modifier, keycodes }
    }

    pub fn contains(&self, key: u8) -> bool {
        key != 0 && self.keycodes.contains(&key)
    }

    fn any(&self, keys: &[u8]) -> bool {
        keys.iter().any(|&k| self.contains(k))
    }

    pub fn alt(&self) -> bool {
        self.modifier & (hid::MOD_LALT | hid::MOD_RALT) != 0
            || self.any(&[hid::ALT_LEFT, hid::ALT_RIGHT])
    }

    pub fn ctrl(&self) -> bool {
        self.modifier & (hid::MOD_LCTRL | hid::MOD_RCTRL) != 0
            || self.any(&[hid::CTRL_LEFT, hid::CTRL_RIGHT])
    }

    /// Lowest of F1..F8 held, as 1..=8
    pub fn function_key(&self) -> Option<u8> {
        (hid::F1..=hid::F8)
            .position(|k| self.contains(k))
            .map(|i| i as u8 + 1)
    }
}

/// Decoded gamepad buttons as an 8-bit mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GamepadState(pub u8);

impl GamepadState {
    pub const A: u8 = 0x01;
    pub const B: u8 = 0x02;
    pub const SELECT: u8 = 0x04;
    pub const START: u8 = 0x08;
    pub const UP: u8 = 0x10;
    pub const DOWN: u8 = 0x20;
    pub const LEFT: u8 = 0x40;
    pub const RIGHT: u8 = 0x80;

    fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// The eight logical buttons of the emulated pad
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buttons {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub a: bool,
    pub b: bool,
    pub start: bool,
    pub select: bool,
}

impl Buttons {
    /// Joypad register bits expected by the emulator
    pub const JOY_A: u8 = 0x01;
    pub const JOY_B: u8 = 0x02;
    pub const JOY_SELECT: u8 = 0x04;
    pub const JOY_RUN: u8 = 0x08;
    pub const JOY_UP: u8 = 0x10;
    pub const JOY_RIGHT: u8 = 0x20;
    pub const JOY_DOWN: u8 = 0x40;
    pub const JOY_LEFT: u8 = 0x80;

    pub fn from_keyboard(report: &KeyboardReport) -> Self {
        let up_left = report.contains(hid::KP_7);
        let up_right = report.contains(hid::KP_9);
        let down_left = report.contains(hid::KP_1);
        let down_right = report.contains(hid::KP_3);
        Self {
            start: report.any(&[hid::ENTER, hid::KP_ENTER]),
            select: report.any(&[hid::BACKSPACE, hid::ESCAPE, hid::KP_ADD]),
            a: report.any(&[hid::Z, hid::O, hid::K, hid::KP_0]),
            b: report.any(&[hid::X, hid::P, hid::L, hid::KP_DECIMAL]),
            up: up_left || up_right || report.any(&[hid::UP, hid::W, hid::KP_8]),
            down: down_left || down_right || report.any(&[hid::DOWN, hid::S, hid::KP_5, hid::KP_2]),
            left: up_left || down_left || report.any(&[hid::LEFT, hid::A, hid::KP_4]),
            right: up_right || down_right || report.any(&[hid::RIGHT, hid::D, hid::KP_6]),
        }
    }

    pub fn from_gamepad(state: GamepadState) -> Self {
        Self {
            up: state.has(GamepadState::UP),
            down: state.has(GamepadState::DOWN),
            left: state.has(GamepadState::LEFT),
            right: state.has(GamepadState::RIGHT),
            a: state.has(GamepadState::A),
            b: state.has(GamepadState::B),
            start: state.has(GamepadState::START),
            select: state.has(GamepadState::SELECT),
        }
    }

    pub fn swapped_ab(self) -> Self {
        Self {
            a: self.b,
            b: self.a,
            ..self
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            up: self.up || other.up,
            down: self.down || other.down,
            left: self.left || other.left,
            right: self.right || other.right,
            a: self.a || other.a,
            b: self.b || other.b,
            start: self.start || other.start,
            select: self.select || other.select,
        }
    }

    pub fn any(self) -> bool {
        self.to_joypad_bits() != 0
    }

    pub fn to_joypad_bits(self) -> u8 {
        [
            (self.a, Self::JOY_A),
            (self.b, Self::JOY_B),
            (self.select, Self::JOY_SELECT),
            (self.start, Self::JOY_RUN),
            (self.up, Self::JOY_UP),
            (self.right, Self::JOY_RIGHT),
            (self.down, Self::JOY_DOWN),
            (self.left, Self::JOY_LEFT),
        ]
        .iter()
        .filter(|(held, _)| *held)
        .fold(0, |bits, (_, bit)| bits | bit)
    }
}

/// One poll's worth of logical input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlState {
    pub buttons: Buttons,
    pub alt: bool,
    pub ctrl: bool,
    /// F1..F8 as 1..=8, only reported while Alt or Ctrl is held
    pub function_key: Option<u8>,
    /// START went down since the last poll that saw it released
    pub confirm_edge: bool,
    /// START and SELECT held together on one source
    pub menu_chord: bool,
    /// Ctrl+Alt+Delete
    pub reboot_chord: bool,
}

/// One-shot press detector. Fires on the first poll a level is seen high and
/// re-arms only after a low poll.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    armed: bool,
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self { armed: true }
    }
}

impl EdgeDetector {
    pub fn update(&mut self, level: bool) -> bool {
        if !level {
            self.armed = true;
            return false;
        }
        let fired = self.armed;
        self.armed = false;
        fired
    }

    /// Require a release before the next edge
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

/// Merges the keyboard and gamepad into a [`ControlState`]
#[derive(Debug, Clone, Default)]
pub struct InputAggregator {
    swap_ab: bool,
    confirm: EdgeDetector,
}

impl InputAggregator {
    pub fn new(swap_ab: bool) -> Self {
        Self {
            swap_ab,
            ..Self::default()
        }
    }

    pub fn swap_ab(&self) -> bool {
        self.swap_ab
    }

    pub fn set_swap_ab(&mut self, swap_ab: bool) {
        self.swap_ab = swap_ab;
    }

    pub fn disarm_confirm(&mut self) {
        self.confirm.disarm();
    }

    pub fn poll(&mut self, keyboard: &KeyboardReport, gamepad: GamepadState) -> ControlState {
        let mut kbd = Buttons::from_keyboard(keyboard);
        let mut pad = Buttons::from_gamepad(gamepad);
        if self.swap_ab {
            kbd = kbd.swapped_ab();
            pad = pad.swapped_ab();
        }
        let buttons = kbd.union(pad);

        let alt = keyboard.alt();
        let ctrl = keyboard.ctrl();
        let reboot_chord = alt && ctrl && keyboard.contains(hid::DELETE);
        if reboot_chord {
            log(LogCategory::Input, LogLevel::Info, || "reboot chord".to_string());
        }

        ControlState {
            buttons,
            alt,
            ctrl,
            function_key: if alt || ctrl { keyboard.function_key() } else { None },
            confirm_edge: self.confirm.update(buttons.start),
            menu_chord: (kbd.start && kbd.select) || (pad.start && pad.select),
            reboot_chord,
        }
    }
}

/// Latest raw input, written by the presentation context only.
///
/// Fields are independent relaxed atomics: a reader may see a keyboard
/// report one poll newer than the gamepad state, which is harmless at the
/// polling rates involved.
#[derive(Debug, Default)]
pub struct InputLatch {
    modifier: AtomicU8,
    keycodes: [AtomicU8; 6],
    gamepad: AtomicU8,
}

impl InputLatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish_keyboard(&self, report: &KeyboardReport) {
        self.modifier.store(report.modifier, Ordering::Relaxed);
        for (cell, &key) in self.keycodes.iter().zip(&report.keycodes) {
            cell.store(key, Ordering::Relaxed);
        }
    }

    pub fn publish_gamepad(&self, state: GamepadState) {
        self.gamepad.store(state.0, Ordering::Relaxed);
    }

    pub fn keyboard(&self) -> KeyboardReport {
        let mut keycodes = [0u8; 6];
        for (slot, cell) in keycodes.iter_mut().zip(&self.keycodes) {
            *slot = cell.load(Ordering::Relaxed);
        }
        KeyboardReport {
            modifier: self.modifier.load(Ordering::Relaxed),
            keycodes,
        }
    }

    pub fn gamepad(&self) -> GamepadState {
        GamepadState(self.gamepad.load(Ordering::Relaxed))
    }
}

/// Where the control loops get their input from
pub trait ControlSource {
    /// Poll once. `None` means the source has ended and no more input will
    /// arrive.
    fn poll(&mut self) -> Option<ControlState>;

    fn disarm_confirm(&mut self);

    fn set_swap_ab(&mut self, swap_ab: bool);
}

/// Controls read from an [`InputLatch`]
#[derive(Debug)]
pub struct LatchedControls {
    latch: Arc<InputLatch>,
    aggregator: InputAggregator,
}

impl LatchedControls {
    pub fn new(latch: Arc<InputLatch>, swap_ab: bool) -> Self {
        Self {
            latch,
            aggregator: InputAggregator::new(swap_ab),
        }
    }
}

impl ControlSource for LatchedControls {
    fn poll(&mut self) -> Option<ControlState> {
        let keyboard = self.latch.keyboard();
        Some(self.aggregator.poll(&keyboard, self.latch.gamepad()))
    }

    fn disarm_confirm(&mut self) {
        self.aggregator.disarm_confirm();
    }

    fn set_swap_ab(&mut self, swap_ab: bool) {
        self.aggregator.set_swap_ab(swap_ab);
    }
}

/// Replays a fixed list of raw input frames, one per poll
#[derive(Debug, Default)]
pub struct ScriptedInput {
    frames: VecDeque<(KeyboardReport, GamepadState)>,
    aggregator: InputAggregator,
    polls: usize,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, keys: &[u8]) -> Self {
        self.frames
            .push_back((KeyboardReport::with_keys(0, keys), GamepadState::default()));
        self
    }

    /// A frame with the modifier byte set as well
    pub fn chord(mut self, modifier: u8, keys: &[u8]) -> Self {
        self.frames
            .push_back((KeyboardReport::with_keys(modifier, keys), GamepadState::default()));
        self
    }

    pub fn pad(mut self, buttons: u8) -> Self {
        self.frames
            .push_back((KeyboardReport::default(), GamepadState(buttons)));
        self
    }

    /// `count` frames with nothing held
    pub fn idle(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.frames
                .push_back((KeyboardReport::default(), GamepadState::default()));
        }
        self
    }

    /// Press then release `keys`
    pub fn tap(self, keys: &[u8]) -> Self {
        self.key(keys).idle(1)
    }

    pub fn push(&mut self, keyboard: KeyboardReport, gamepad: GamepadState) {
        self.frames.push_back((keyboard, gamepad));
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn polls(&self) -> usize {
        self.polls
    }
}

impl ControlSource for ScriptedInput {
    fn poll(&mut self) -> Option<ControlState> {
        let (keyboard, gamepad) = self.frames.pop_front()?;
        self.polls += 1;
        Some(self.aggregator.poll(&keyboard, gamepad))
    }

    fn disarm_confirm(&mut self) {
        self.aggregator.disarm_confirm();
    }

    fn set_swap_ab(&mut self, swap_ab: bool) {
        self.aggregator.set_swap_ab(swap_ab);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(keys: &[u8]) -> KeyboardReport {
        KeyboardReport::with_keys(0, keys)
    }

    #[test]
    fn test_keyboard_mapping() {
        let b = Buttons::from_keyboard(&keys(&[hid::KP_ENTER, hid::KP_ADD, hid::K, hid::L]));
        assert!(b.start && b.select && b.a && b.b);
        assert!(!b.up && !b.down && !b.left && !b.right);

        let b = Buttons::from_keyboard(&keys(&[hid::W, hid::KP_5]));
        assert!(b.up && b.down);

        let b = Buttons::from_keyboard(&keys(&[hid::ESCAPE]));
        assert!(b.select && !b.start);
    }

    #[test]
    fn test_keypad_diagonals() {
        let b = Buttons::from_keyboard(&keys(&[hid::KP_7]));
        assert!(b.up && b.left && !b.down && !b.right);
        let b = Buttons::from_keyboard(&keys(&[hid::KP_3]));
        assert!(b.down && b.right && !b.up && !b.left);
    }

    #[test]
    fn test_sources_are_merged() {
        let mut agg = InputAggregator::new(false);
        let state = agg.poll(&keys(&[hid::UP]), GamepadState(GamepadState::A));
        assert!(state.buttons.up);
        assert!(state.buttons.a);
        assert_eq!(state.buttons.to_joypad_bits(), Buttons::JOY_UP | Buttons::JOY_A);
    }

    #[test]
    fn test_swap_ab_applies_to_both_sources() {
        let mut agg = InputAggregator::new(true);
        let state = agg.poll(&keys(&[hid::Z]), GamepadState::default());
        assert!(state.buttons.b && !state.buttons.a);
        let state = agg.poll(&KeyboardReport::default(), GamepadState(GamepadState::B));
        assert!(state.buttons.a && !state.buttons.b);
    }

    #[test]
    fn test_joypad_bits() {
        let all = Buttons {
            up: true,
            down: true,
            left: true,
            right: true,
            a: true,
            b: true,
            start: true,
            select: true,
        };
        assert_eq!(all.to_joypad_bits(), 0xFF);
        let run = Buttons {
            start: true,
            ..Buttons::default()
        };
        assert_eq!(run.to_joypad_bits(), 0x08);
        let right = Buttons {
            right: true,
            ..Buttons::default()
        };
        assert_eq!(right.to_joypad_bits(), 0x20);
    }

    #[test]
    fn test_confirm_edge_fires_once_per_press() {
        let mut agg = InputAggregator::default();
        let enter = keys(&[hid::ENTER]);
        let none = KeyboardReport::default();
        let pad = GamepadState::default();

        assert!(agg.poll(&enter, pad).confirm_edge);
        for _ in 0..5 {
            assert!(!agg.poll(&enter, pad).confirm_edge);
        }
        assert!(!agg.poll(&none, pad).confirm_edge);
        assert!(agg.poll(&enter, pad).confirm_edge);
    }

    #[test]
    fn test_disarm_requires_release() {
        let mut agg = InputAggregator::default();
        let pad = GamepadState(GamepadState::START);
        agg.disarm_confirm();
        assert!(!agg.poll(&KeyboardReport::default(), pad).confirm_edge);
        assert!(!agg.poll(&KeyboardReport::default(), GamepadState::default()).confirm_edge);
        assert!(agg.poll(&KeyboardReport::default(), pad).confirm_edge);
    }

    #[test]
    fn test_function_keys_need_a_modifier() {
        let mut agg = InputAggregator::default();
        let pad = GamepadState::default();
        assert_eq!(agg.poll(&keys(&[hid::F1 + 2]), pad).function_key, None);

        let state = agg.poll(&KeyboardReport::with_keys(hid::MOD_LALT, &[hid::F1 + 2]), pad);
        assert!(state.alt && !state.ctrl);
        assert_eq!(state.function_key, Some(3));

        let state = agg.poll(&keys(&[hid::CTRL_RIGHT, hid::F8]), pad);
        assert!(state.ctrl);
        assert_eq!(state.function_key, Some(8));
    }

    #[test]
    fn test_reboot_chord() {
        let mut agg = InputAggregator::default();
        let pad = GamepadState::default();
        let chord = KeyboardReport::with_keys(hid::MOD_LCTRL | hid::MOD_RALT, &[hid::DELETE]);
        assert!(agg.poll(&chord, pad).reboot_chord);
        let no_alt = KeyboardReport::with_keys(hid::MOD_LCTRL, &[hid::DELETE]);
        assert!(!agg.poll(&no_alt, pad).reboot_chord);
    }

    #[test]
    fn test_menu_chord_needs_one_source() {
        let mut agg = InputAggregator::default();
        let split = agg.poll(&keys(&[hid::ENTER]), GamepadState(GamepadState::SELECT));
        assert!(split.buttons.start && split.buttons.select);
        assert!(!split.menu_chord);

        let pad = agg.poll(
            &KeyboardReport::default(),
            GamepadState(GamepadState::START | GamepadState::SELECT),
        );
        assert!(pad.menu_chord);
        let kbd = agg.poll(&keys(&[hid::ENTER, hid::BACKSPACE]), GamepadState::default());
        assert!(kbd.menu_chord);
    }

    #[test]
    fn test_latch_roundtrip_through_controls() {
        let latch = InputLatch::new();
        let mut controls = LatchedControls::new(Arc::clone(&latch), false);
        latch.publish_keyboard(&keys(&[hid::DOWN]));
        latch.publish_gamepad(GamepadState(GamepadState::START));

        let state = controls.poll().unwrap();
        assert!(state.buttons.down && state.buttons.start && state.confirm_edge);
    }

    #[test]
    fn test_scripted_input_ends() {
        let mut input = ScriptedInput::new().tap(&[hid::ENTER]);
        assert!(input.poll().unwrap().confirm_edge);
        assert!(!input.poll().unwrap().buttons.any());
        assert!(input.poll().is_none());
        assert_eq!(input.polls(), 2);
    }
}
