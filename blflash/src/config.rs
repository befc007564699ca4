//! Exchange timing.

use std::time::Duration;

use crate::protocol::Command;

/// Per-command reply budgets.
///
/// A zero budget turns the exchange into a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Timeouts {
    /// Handshake reply.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub handshake: Duration,
    /// Erase reply (one sector).
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub erase: Duration,
    /// SetFlashParams reply.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub set_params: Duration,
    /// Acknowledgement of one image chunk.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub chunk: Duration,
    /// VerifyCrc reply.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub verify: Duration,
    /// Boot reply.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub boot: Duration,
    /// EndOfSession reply.
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    pub end_of_session: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(1),
            erase: Duration::from_secs(5),
            set_params: Duration::from_secs(5),
            chunk: Duration::from_secs(1),
            verify: Duration::from_secs(5),
            boot: Duration::from_secs(1),
            end_of_session: Duration::from_secs(1),
        }
    }
}

impl Timeouts {
    /// Budget used for `command`.
    pub fn for_command(&self, command: Command) -> Duration {
        match command {
            Command::Handshake => self.handshake,
            Command::Erase => self.erase,
            Command::SetFlashParams => self.set_params,
            Command::FlashData => self.chunk,
            Command::VerifyCrc => self.verify,
            Command::Boot => self.boot,
            Command::EndOfSession => self.end_of_session,
        }
    }

    /// Replace the budget used for `command`.
    #[must_use]
    pub fn with(mut self, command: Command, timeout: Duration) -> Self {
        let slot = match command {
            Command::Handshake => &mut self.handshake,
            Command::Erase => &mut self.erase,
            Command::SetFlashParams => &mut self.set_params,
            Command::FlashData => &mut self.chunk,
            Command::VerifyCrc => &mut self.verify,
            Command::Boot => &mut self.boot,
            Command::EndOfSession => &mut self.end_of_session,
        };
        *slot = timeout;
        self
    }
}

/// Engine timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Reply budgets.
    pub timeouts: Timeouts,
    /// Polling granularity.
    pub tick: Duration,
    /// Pause between the segments of a multi-part request.
    pub inter_write_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            tick: Duration::from_millis(1),
            inter_write_delay: Duration::from_millis(10),
        }
    }
}

impl EngineConfig {
    /// Set the reply budgets.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the polling tick. A zero tick is raised to one millisecond.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = if tick.is_zero() {
            Duration::from_millis(1)
        } else {
            tick
        };
        self
    }

    /// Set the pause between request segments.
    #[must_use]
    pub fn with_inter_write_delay(mut self, delay: Duration) -> Self {
        self.inter_write_delay = delay;
        self
    }

    /// Number of polls that fit in `timeout`, rounded up.
    pub fn ticks_for(&self, timeout: Duration) -> u128 {
        let tick = self.tick.as_nanos().max(1);
        timeout.as_nanos().div_ceil(tick)
    }
}

#[cfg(feature = "serde")]
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
