//! The presentation context.
//!
//! On the device a second core drives video and audio output and scans the
//! input devices. Here it is a named thread: it waits on a [`StartSignal`],
//! then every frame tick polls the keyboard and gamepad into the shared
//! [`InputLatch`], passing a lockout checkpoint each iteration.

use crate::input::{GamepadState, InputLatch, KeyboardReport};
use crate::lockout::{Lockout, StartSignal};
use crate::logging::{log, LogCategory, LogLevel};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 60 Hz
pub const FRAME_TICK: Duration = Duration::from_micros(16_666);

/// Keyboard transport
pub trait KeyboardSource: Send {
    /// The latest report, or `None` if nothing changed since the last call
    fn poll_report(&mut self) -> Option<KeyboardReport>;
}

/// Gamepad transport
pub trait GamepadSource: Send {
    fn read(&mut self) -> GamepadState;
}

/// A source with nothing attached
#[derive(Debug, Clone, Copy, Default)]
pub struct Disconnected;

impl KeyboardSource for Disconnected {
    fn poll_report(&mut self) -> Option<KeyboardReport> {
        None
    }
}

impl GamepadSource for Disconnected {
    fn read(&mut self) -> GamepadState {
        GamepadState::default()
    }
}

pub struct PresentationWorker {
    stop: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    start: StartSignal,
    handle: Option<JoinHandle<()>>,
}

impl PresentationWorker {
    /// Spawn the worker. It registers with `lockout` straight away and counts
    /// as parked until `start` is released and no lockout is in progress.
    pub fn spawn<K, G>(
        mut keyboard: K,
        mut gamepad: G,
        latch: Arc<InputLatch>,
        lockout: &Lockout,
        start: StartSignal,
        tick: Duration,
    ) -> io::Result<Self>
    where
        K: KeyboardSource + 'static,
        G: GamepadSource + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));
        let victim = lockout.register_victim();

        let handle = {
            let stop = Arc::clone(&stop);
            let ticks = Arc::clone(&ticks);
            let start = start.clone();
            thread::Builder::new()
                .name("presentation".to_string())
                .spawn(move || {
                    start.acquire_blocking();
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    victim.resume();
                    log(LogCategory::Worker, LogLevel::Debug, || "presentation worker running".to_string());

                    let mut last_tick = Instant::now();
                    while !stop.load(Ordering::SeqCst) {
                        if victim.checkpoint() {
                            log(LogCategory::Worker, LogLevel::Trace, || "resumed after lockout".to_string());
                        }
                        let elapsed = last_tick.elapsed();
                        if elapsed < tick {
                            thread::sleep((tick - elapsed).min(Duration::from_millis(1)));
                            continue;
                        }
                        last_tick = Instant::now();
                        if let Some(report) = keyboard.poll_report() {
                            latch.publish_keyboard(&report);
                        }
                        latch.publish_gamepad(gamepad.read());
                        ticks.fetch_add(1, Ordering::Relaxed);
                    }
                    log(LogCategory::Worker, LogLevel::Debug, || "presentation worker stopped".to_string());
                })?
        };

        Ok(Self {
            stop,
            ticks,
            start,
            handle: Some(handle),
        })
    }

    /// Frame ticks completed so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Stop the worker and wait for it to exit
    pub fn shutdown(mut self) -> thread::Result<()> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> thread::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        // A worker still waiting for its start must be let through to exit
        self.start.release();
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for PresentationWorker {
    fn drop(&mut self) {
        if self.stop_and_join().is_err() {
            log(LogCategory::Worker, LogLevel::Error, || "presentation worker panicked".to_string());
        }
    }
}
