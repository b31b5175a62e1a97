// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

use crate::app::ports::ClockPort;

/// The host's UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl ClockPort for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_unix_millis() {
        let before = OffsetDateTime::now_utc().unix_timestamp() * 1000;
        let now = SystemClock::new().now_timestamp().as_millis();
        let after = OffsetDateTime::now_utc().unix_timestamp() * 1000 + 1000;
        assert!(now >= before && now <= after, "{before} <= {now} <= {after}");
    }
}
