// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

use crate::app::types::Timestamp;

/// Wall-clock source. Job timestamps, replay watermarks and cache expiry all
/// read it, so tests can pin time.
pub trait ClockPort: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;

    /// Current time in the orchestrator's millisecond representation.
    fn now_timestamp(&self) -> Timestamp {
        Timestamp::from_datetime(self.now_utc())
    }
}
