//! I/O activity indication.
//!
//! The drive engine pulses an indicator on every operation that touches
//! the backing file so a front panel (an LED on embedded builds) can show
//! disk activity. Deployments without hardware plug in [`NullIndicator`].

/// Sink for I/O-activity pulses.
pub trait ActivityIndicator: Send + Sync {
    /// Asserts the indicator, used to bracket sustained operations such
    /// as a flush.
    fn on(&self);

    /// Deasserts the indicator.
    fn off(&self);

    /// Fast on-off pulse for a single sector transfer.
    fn blink(&self) {
        self.on();
        self.off();
    }
}

/// Indicator that does nothing; the default when no hardware is present.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullIndicator;

impl ActivityIndicator for NullIndicator {
    fn on(&self) {}

    fn off(&self) {}
}
