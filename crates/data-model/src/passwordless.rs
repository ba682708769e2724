// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

/// The address a passwordless login code is sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordlessContact {
    Email(String),
    PhoneNumber(String),
}

/// A device must be bound to exactly one of an email address or a phone
/// number
#[derive(Debug, Error)]
#[error("a passwordless device needs exactly one of an email address or a phone number")]
pub struct InvalidContactError;

impl PasswordlessContact {
    /// Build a contact from the two nullable columns it is stored in
    ///
    /// # Errors
    ///
    /// Returns [`InvalidContactError`] if both or none of the values are set
    pub fn from_parts(
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Result<Self, InvalidContactError> {
        match (email, phone_number) {
            (Some(email), None) => Ok(Self::Email(email)),
            (None, Some(phone_number)) => Ok(Self::PhoneNumber(phone_number)),
            _ => Err(InvalidContactError),
        }
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Email(email) => Some(email),
            Self::PhoneNumber(_) => None,
        }
    }

    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        match self {
            Self::Email(_) => None,
            Self::PhoneNumber(phone_number) => Some(phone_number),
        }
    }
}

/// A login attempt context, created when a user asks for a one-time code.
///
/// It has no expiry of its own: it is considered alive as long as one of its
/// codes is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordlessDevice {
    pub id_hash: String,
    pub contact: PasswordlessContact,
    pub link_code_salt: String,
    pub failed_attempts: u32,
}

/// A one-time code issued for a [`PasswordlessDevice`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordlessCode {
    pub id: Ulid,
    pub device_id_hash: String,
    pub link_code_hash: String,
    pub created_at: DateTime<Utc>,
}

impl PasswordlessCode {
    /// Whether this code was created strictly before the given cutoff
    #[must_use]
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }
}

/// Decide whether a device can be deleted, given the full set of codes
/// currently attached to it.
///
/// A device is expired only when every one of its codes is. Codes of a device
/// which still has a valid code are kept, so that a submitted code can be
/// reported as expired rather than incorrect.
///
/// A device without any code is considered expired.
#[must_use]
pub fn is_device_expired(cutoff: DateTime<Utc>, codes: &[PasswordlessCode]) -> bool {
    codes.iter().all(|code| code.is_expired(cutoff))
}
