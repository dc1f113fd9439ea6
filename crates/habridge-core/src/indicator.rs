// ── User feedback hooks ──
//
// On the device these drive the LED ring and the buzzer. The core only
// requests feedback; it never waits on it.

use tracing::{debug, info, warn};

/// Outcome shown by a short flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Feedback {
    Success,
    Failure,
}

pub trait Indicator: Send + Sync {
    /// Toggle the busy indication around a remote call.
    fn set_loading(&self, loading: bool);

    fn flash(&self, feedback: Feedback);

    fn error_beep(&self);
}

/// Indicator that only logs. Used when no hardware is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn set_loading(&self, loading: bool) {
        debug!(loading, "indicator: loading");
    }

    fn flash(&self, feedback: Feedback) {
        info!(%feedback, "indicator: flash");
    }

    fn error_beep(&self) {
        warn!("indicator: error beep");
    }
}
