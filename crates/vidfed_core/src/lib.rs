/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod forward;
pub mod forward_queue;
pub mod lookup;
pub mod notifier;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod ui_events;

pub use dispatch::{Dispatcher, Outcome};
pub use error::IngestError;
