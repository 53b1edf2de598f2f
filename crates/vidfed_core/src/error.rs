/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rusqlite::{ffi, ErrorCode};

/// Rejections the delivery layer must see as a failed activity.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("actor {actor} has no account and cannot author a {kind}")]
    AccountRequired { actor: String, kind: &'static str },
    #[error("cannot resolve video {reference}")]
    VideoUnresolved { reference: String },
    #[error("{kind} {id} belongs to another account")]
    OwnershipMismatch { kind: &'static str, id: String },
    #[error("malformed {kind} object {id}: {reason}")]
    Malformed {
        kind: &'static str,
        id: String,
        reason: String,
    },
}

/// Another writer touched the same uniqueness key first.
#[derive(Debug, thiserror::Error)]
#[error("write conflict on {key}")]
pub struct StoreConflict {
    pub key: String,
}

impl StoreConflict {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// True for errors worth re-running a whole transaction for.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if cause.downcast_ref::<StoreConflict>().is_some() {
            return true;
        }
        match cause.downcast_ref::<rusqlite::Error>() {
            Some(rusqlite::Error::SqliteFailure(e, _)) => match e.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => true,
                // Only a lost uniqueness race; NOT NULL, CHECK and FK failures repeat forever.
                ErrorCode::ConstraintViolation => matches!(
                    e.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ),
                _ => false,
            },
            _ => false,
        }
    })
}
