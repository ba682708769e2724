// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use figment::{Figment, Profile};
use serde::de::DeserializeOwned;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A part of the configuration which can be loaded on its own
pub trait ConfigurationSection: Sized + DeserializeOwned {
    /// Key of the section in the configuration file, `None` for the root
    const PATH: Option<&'static str> = None;

    /// Check the values which can't be expressed through deserialization
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid
    fn validate(&self, _figment: &Figment) -> Result<(), BoxError> {
        Ok(())
    }

    /// Load and validate the section
    ///
    /// # Errors
    ///
    /// Returns an error if the section is missing, malformed or invalid
    fn extract(figment: &Figment) -> Result<Self, BoxError> {
        extract_validated(figment, Self::PATH)
    }
}

/// Loading of sections which have a sensible default
pub trait ConfigurationSectionExt: ConfigurationSection + Default {
    /// Load and validate the section, falling back to its default when it is
    /// absent from the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the section is malformed or invalid
    fn extract_or_default(figment: &Figment) -> Result<Self, BoxError> {
        match Self::PATH {
            Some(path) if !figment.contains(path) => Ok(Self::default()),
            path => extract_validated(figment, path),
        }
    }
}

impl<T: ConfigurationSection + Default> ConfigurationSectionExt for T {}

fn extract_validated<T: ConfigurationSection>(
    figment: &Figment,
    path: Option<&str>,
) -> Result<T, BoxError> {
    let section: T = match path {
        Some(path) => figment.extract_inner(path)?,
        None => figment.extract()?,
    };

    section.validate(figment)?;
    Ok(section)
}

/// Attach the location of `section.field` to a validation error
pub(crate) fn error_on_field(
    figment: &Figment,
    mut error: figment::Error,
    section: &'static str,
    field: &'static str,
) -> figment::Error {
    error.metadata = figment.find_metadata(section).cloned();
    error.profile = Some(Profile::Default);
    error.path = vec![section.to_owned(), field.to_owned()];
    error
}
