// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod allocations;
pub mod codec;
pub mod dispatcher;
pub mod event_stream;
pub mod job_batch;
pub mod job_store;
pub mod projects;
pub mod reconcile;
