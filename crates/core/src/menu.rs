//! Table-driven settings menu.
//!
//! A menu is a static table of [`MenuItem`]s. Items refer to values through
//! typed keys that a [`MenuModel`] resolves, so the engine never holds
//! references into the model. [`MenuEngine::step`] applies one poll of input
//! and is pure apart from the model; [`MenuEngine::run`] is the interactive
//! loop around it.

use crate::display::{color, TextDisplay, VideoMode};
use crate::input::{Buttons, ControlSource, ControlState};
use crate::logging::{log, LogCategory, LogLevel};
use crate::platform::Platform;
use crate::storage::StorageError;

/// Time between menu polls
pub const MENU_TICK_MS: u32 = 125;

/// Columns reserved for one menu line
const LINE_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Leave the game and go back to image selection
    Browser,
    /// Resume the game
    Return,
}

/// One row of a menu table. `label` may contain one `{}` placeholder that
/// is replaced by the bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem<K, A> {
    /// Boolean flipped by confirm. `display` holds the off and on texts.
    Toggle {
        label: &'static str,
        key: K,
        display: &'static [&'static str; 2],
        action: Option<A>,
    },
    /// Number in `0..=max` changed with left and right
    Integer {
        label: &'static str,
        key: K,
        max: u8,
        action: Option<A>,
    },
    /// Index into `display`, changed with left and right
    Enumerated {
        label: &'static str,
        key: K,
        display: &'static [&'static str],
        action: Option<A>,
    },
    Action {
        label: &'static str,
        action: A,
    },
    /// Text only; the cursor skips it
    Label { label: &'static str },
    Navigate {
        label: &'static str,
        to: Destination,
    },
}

impl<K: Copy, A: Copy> MenuItem<K, A> {
    pub fn label(&self) -> &'static str {
        match *self {
            MenuItem::Toggle { label, .. }
            | MenuItem::Integer { label, .. }
            | MenuItem::Enumerated { label, .. }
            | MenuItem::Action { label, .. }
            | MenuItem::Label { label }
            | MenuItem::Navigate { label, .. } => label,
        }
    }

    pub fn is_selectable(&self) -> bool {
        !matches!(self, MenuItem::Label { .. })
    }

    /// Largest value for items adjusted with left and right
    fn max(&self) -> Option<u8> {
        match *self {
            MenuItem::Integer { max, .. } => Some(max),
            MenuItem::Enumerated { display, .. } => Some(display.len().saturating_sub(1) as u8),
            _ => None,
        }
    }

    fn key(&self) -> Option<K> {
        match *self {
            MenuItem::Toggle { key, .. }
            | MenuItem::Integer { key, .. }
            | MenuItem::Enumerated { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Values and side effects behind a menu table
pub trait MenuModel {
    type Key: Copy;
    type Action: Copy;

    fn value(&self, key: Self::Key) -> u8;

    fn set_value(&mut self, key: Self::Key, value: u8);

    /// Perform `action`; returning true closes the menu
    fn invoke(&mut self, action: Self::Action, platform: &mut dyn Platform) -> bool;

    /// Called once whenever the menu closes
    fn persist(&mut self) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuExit {
    /// Back to the game
    Closed,
    ResetToBrowser,
    Reboot,
}

/// A rendered menu row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuLine {
    pub text: String,
    pub selected: bool,
    pub selectable: bool,
}

pub struct MenuEngine<K: 'static, A: 'static> {
    items: &'static [MenuItem<K, A>],
    cursor: usize,
    held: Buttons,
    header: String,
    footer: String,
}

impl<K: Copy + 'static, A: Copy + 'static> MenuEngine<K, A> {
    pub fn new(items: &'static [MenuItem<K, A>]) -> Self {
        let cursor = items.iter().position(MenuItem::is_selectable).unwrap_or(0);
        Self {
            items,
            cursor,
            held: Buttons::default(),
            header: String::new(),
            footer: String::new(),
        }
    }

    /// Text drawn centred on the top row
    pub fn with_header(mut self, text: impl Into<String>) -> Self {
        self.header = text.into();
        self
    }

    /// Text drawn centred on the bottom row
    pub fn with_footer(mut self, text: impl Into<String>) -> Self {
        self.footer = text.into();
        self
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn items(&self) -> &'static [MenuItem<K, A>] {
        self.items
    }

    fn move_cursor(&mut self, forward: bool) {
        let len = self.items.len();
        if len == 0 || !self.items.iter().any(MenuItem::is_selectable) {
            return;
        }
        loop {
            self.cursor = if forward {
                (self.cursor + 1) % len
            } else {
                (self.cursor + len - 1) % len
            };
            if self.items[self.cursor].is_selectable() {
                break;
            }
        }
    }

    /// Apply one poll of input
    pub fn step<M>(
        &mut self,
        state: &ControlState,
        model: &mut M,
        platform: &mut dyn Platform,
    ) -> Option<MenuExit>
    where
        M: MenuModel<Key = K, Action = A>,
    {
        if state.reboot_chord {
            return Some(MenuExit::Reboot);
        }

        let buttons = state.buttons;
        let up_edge = buttons.up && !self.held.up;
        let down_edge = buttons.down && !self.held.down;
        self.held = buttons;

        let Some(item) = self.items.get(self.cursor).copied() else {
            return None;
        };

        if let (Some(key), Some(max)) = (item.key(), item.max()) {
            let before = model.value(key);
            let mut value = before;
            if buttons.right && value < max {
                value += 1;
            }
            if buttons.left && value > 0 {
                value -= 1;
            }
            if value != before {
                model.set_value(key, value);
            }
        }

        if state.confirm_edge {
            let action = match item {
                MenuItem::Toggle { key, action, .. } => {
                    let flipped = u8::from(model.value(key) == 0);
                    model.set_value(key, flipped);
                    action
                }
                MenuItem::Integer { action, .. } | MenuItem::Enumerated { action, .. } => action,
                MenuItem::Action { action, .. } => Some(action),
                MenuItem::Label { .. } => None,
                MenuItem::Navigate { to, .. } => {
                    return Some(match to {
                        Destination::Browser => MenuExit::ResetToBrowser,
                        Destination::Return => MenuExit::Closed,
                    });
                }
            };
            if let Some(action) = action {
                if model.invoke(action, platform) {
                    return Some(MenuExit::Closed);
                }
            }
        }

        if down_edge {
            self.move_cursor(true);
        }
        if up_edge {
            self.move_cursor(false);
        }
        None
    }

    /// The table with current values substituted
    pub fn lines<M>(&self, model: &M) -> Vec<MenuLine>
    where
        M: MenuModel<Key = K, Action = A>,
    {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let value = match *item {
                    MenuItem::Toggle { key, display, .. } => {
                        Some(display[usize::from(model.value(key) != 0)].to_string())
                    }
                    MenuItem::Integer { key, .. } => Some(model.value(key).to_string()),
                    MenuItem::Enumerated { key, display, .. } => Some(
                        display
                            .get(usize::from(model.value(key)))
                            .copied()
                            .unwrap_or("?")
                            .to_string(),
                    ),
                    _ => None,
                };
                let label = item.label();
                MenuLine {
                    text: match value {
                        Some(value) => label.replacen("{}", &value, 1),
                        None => label.to_string(),
                    },
                    selected: i == self.cursor,
                    selectable: item.is_selectable(),
                }
            })
            .collect()
    }

    fn draw<M, D>(&self, model: &M, display: &mut D)
    where
        M: MenuModel<Key = K, Action = A>,
        D: TextDisplay + ?Sized,
    {
        let lines = self.lines(model);
        let top = display.rows().saturating_sub(lines.len()) / 2;
        let x = (display.cols() / 2).saturating_sub(10);
        for (i, line) in lines.iter().enumerate() {
            let (fg, bg) = if line.selected {
                (color::BLUE, color::WHITE)
            } else if line.selectable {
                (color::WHITE, color::BLACK)
            } else {
                (color::BROWN, color::BLACK)
            };
            let text = format!("{:<width$}", line.text, width = LINE_WIDTH);
            display.draw_text(&text, x, top + i, fg, bg);
        }
    }

    fn draw_centered<D: TextDisplay + ?Sized>(display: &mut D, text: &str, y: usize) {
        if text.is_empty() {
            return;
        }
        let framed = format!(":: {} ::", text);
        let x = (display.cols() / 2).saturating_sub(framed.chars().count() / 2);
        display.draw_text(&framed, x, y, color::LIGHT_CYAN, color::BLUE);
    }

    /// Show the menu until it is left. The model is persisted on every exit.
    /// A closed input source counts as returning to the game.
    pub fn run<M, C, D>(
        &mut self,
        model: &mut M,
        controls: &mut C,
        display: &mut D,
        platform: &mut dyn Platform,
    ) -> MenuExit
    where
        M: MenuModel<Key = K, Action = A>,
        C: ControlSource + ?Sized,
        D: TextDisplay + ?Sized,
    {
        display.set_mode(VideoMode::Text);
        Self::draw_centered(display, &self.header, 0);
        let bottom = display.rows().saturating_sub(1);
        Self::draw_centered(display, &self.footer, bottom);
        controls.disarm_confirm();
        self.held = Buttons::default();

        let exit = loop {
            self.draw(model, display);
            let Some(state) = controls.poll() else {
                break MenuExit::Closed;
            };
            if let Some(exit) = self.step(&state, model, platform) {
                break exit;
            }
            platform.sleep_ms(MENU_TICK_MS);
        };

        log(LogCategory::Menu, LogLevel::Debug, || format!("menu closed: {:?}", exit));
        if let Err(e) = model.persist() {
            log(LogCategory::Menu, LogLevel::Warn, || {
                format!("settings not saved: {}", e)
            });
        }
        exit
    }
}
