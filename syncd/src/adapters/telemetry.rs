// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::{TelemetryEvent, TelemetryPort};

#[derive(Clone, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryPort for TracingTelemetry {
    fn event(&self, name: &'static str, fields: TelemetryEvent) {
        let TelemetryEvent {
            job_id,
            owner,
            project,
            category,
            count,
            detail,
        } = fields;

        tracing::info!(
            target: "syncd::telemetry",
            event = name,
            job_id = job_id.as_deref(),
            owner = owner.as_deref(),
            project = project.as_deref(),
            category = category.as_deref(),
            count = count,
            detail = detail.as_deref(),
        );
    }
}
