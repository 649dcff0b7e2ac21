//! Board services used by the control loops.

use crate::logging::{log, LogCategory, LogLevel};
use std::thread;
use std::time::Duration;

/// Sleep, status LED, system clock and watchdog of the board
pub trait Platform {
    fn sleep_ms(&mut self, ms: u32);

    fn set_status_led(&mut self, on: bool);

    /// Change the system clock. Returns false if the clock cannot run at
    /// `khz`.
    fn set_clock_khz(&mut self, khz: u32) -> bool;

    /// Restart the board through the watchdog. Does not return on hardware;
    /// host implementations record the request and return.
    fn reboot(&mut self);
}

/// Platform for running on a host machine
#[derive(Debug, Clone)]
pub struct HostPlatform {
    real_sleep: bool,
    max_clock_khz: u32,
    slept_ms: u64,
    led: bool,
    led_changes: usize,
    clock_khz: u32,
    reboots: usize,
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new(false)
    }
}

impl HostPlatform {
    /// With `real_sleep` false, sleeps are only accounted, never waited out
    pub fn new(real_sleep: bool) -> Self {
        Self {
            real_sleep,
            max_clock_khz: u32::MAX,
            slept_ms: 0,
            led: false,
            led_changes: 0,
            clock_khz: 0,
            reboots: 0,
        }
    }

    /// Refuse clock requests above `khz`
    pub fn with_max_clock_khz(mut self, khz: u32) -> Self {
        self.max_clock_khz = khz;
        self
    }

    /// Total time requested through `sleep_ms`
    pub fn slept_ms(&self) -> u64 {
        self.slept_ms
    }

    pub fn led(&self) -> bool {
        self.led
    }

    pub fn led_changes(&self) -> usize {
        self.led_changes
    }

    pub fn clock_khz(&self) -> u32 {
        self.clock_khz
    }

    pub fn reboots(&self) -> usize {
        self.reboots
    }
}

impl Platform for HostPlatform {
    fn sleep_ms(&mut self, ms: u32) {
        self.slept_ms += u64::from(ms);
        if self.real_sleep {
            thread::sleep(Duration::from_millis(u64::from(ms)));
        }
    }

    fn set_status_led(&mut self, on: bool) {
        if on != self.led {
            self.led_changes += 1;
        }
        self.led = on;
    }

    fn set_clock_khz(&mut self, khz: u32) -> bool {
        if khz > self.max_clock_khz {
            return false;
        }
        self.clock_khz = khz;
        true
    }

    fn reboot(&mut self) {
        log(LogCategory::Input, LogLevel::Info, || "watchdog reboot requested".to_string());
        self.reboots += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_platform_accounting() {
        let mut platform = HostPlatform::default().with_max_clock_khz(400_000);
        platform.sleep_ms(100);
        platform.sleep_ms(25);
        assert_eq!(platform.slept_ms(), 125);

        platform.set_status_led(true);
        platform.set_status_led(true);
        platform.set_status_led(false);
        assert_eq!(platform.led_changes(), 2);

        assert!(platform.set_clock_khz(378_000));
        assert!(!platform.set_clock_khz(432_000));
        assert_eq!(platform.clock_khz(), 378_000);
    }
}
