// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the passwordless
//! devices and codes storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pwl_data_model::{PasswordlessCode, PasswordlessContact, PasswordlessDevice};
use pwl_storage::{Clock, passwordless::PasswordlessRepository};
use rand::RngCore;
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{DatabaseError, DatabaseInconsistencyError, tracing::ExecuteExt};

/// An implementation of [`PasswordlessRepository`] for a PostgreSQL
/// connection
pub struct PgPasswordlessRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgPasswordlessRepository<'c> {
    /// Create a new [`PgPasswordlessRepository`] from an active PostgreSQL
    /// connection
    #[must_use]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(sqlx::FromRow)]
struct DeviceLookup {
    device_id_hash: String,
    email: Option<String>,
    phone_number: Option<String>,
    link_code_salt: String,
    failed_attempts: i32,
}

impl TryFrom<DeviceLookup> for PasswordlessDevice {
    type Error = DatabaseInconsistencyError;

    fn try_from(value: DeviceLookup) -> Result<Self, Self::Error> {
        let contact = PasswordlessContact::from_parts(value.email, value.phone_number).map_err(
            |e| {
                DatabaseInconsistencyError::on("passwordless_devices")
                    .column("email")
                    .row(&value.device_id_hash)
                    .source(e)
            },
        )?;

        let failed_attempts = u32::try_from(value.failed_attempts).map_err(|e| {
            DatabaseInconsistencyError::on("passwordless_devices")
                .column("failed_attempts")
                .row(&value.device_id_hash)
                .source(e)
        })?;

        Ok(PasswordlessDevice {
            id_hash: value.device_id_hash,
            contact,
            link_code_salt: value.link_code_salt,
            failed_attempts,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CodeLookup {
    code_id: Uuid,
    device_id_hash: String,
    link_code_hash: String,
    created_at: DateTime<Utc>,
}

impl From<CodeLookup> for PasswordlessCode {
    fn from(value: CodeLookup) -> Self {
        PasswordlessCode {
            id: value.code_id.into(),
            device_id_hash: value.device_id_hash,
            link_code_hash: value.link_code_hash,
            created_at: value.created_at,
        }
    }
}

#[async_trait]
impl PasswordlessRepository for PgPasswordlessRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.passwordless.lookup_device",
        skip_all,
        fields(
            db.query.text,
            passwordless_device.id_hash = device_id_hash,
        ),
        err,
    )]
    async fn lookup_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Option<PasswordlessDevice>, Self::Error> {
        // Lock the device row, so that a code can't be added to it while we
        // are looking at it
        let res = sqlx::query_as::<_, DeviceLookup>(
            r#"
                SELECT device_id_hash
                     , email
                     , phone_number
                     , link_code_salt
                     , failed_attempts
                FROM passwordless_devices
                WHERE device_id_hash = $1
                FOR UPDATE
            "#,
        )
        .bind(device_id_hash)
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        let Some(res) = res else { return Ok(None) };

        Ok(Some(res.try_into()?))
    }

    #[tracing::instrument(
        name = "db.passwordless.add_device",
        skip_all,
        fields(
            db.query.text,
            passwordless_device.id_hash = %device_id_hash,
        ),
        err,
    )]
    async fn add_device(
        &mut self,
        device_id_hash: String,
        contact: PasswordlessContact,
        link_code_salt: String,
    ) -> Result<PasswordlessDevice, Self::Error> {
        sqlx::query(
            r#"
                INSERT INTO passwordless_devices
                  ( device_id_hash
                  , email
                  , phone_number
                  , link_code_salt
                  , failed_attempts
                  )
                VALUES ($1, $2, $3, $4, 0)
            "#,
        )
        .bind(&device_id_hash)
        .bind(contact.email())
        .bind(contact.phone_number())
        .bind(&link_code_salt)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(PasswordlessDevice {
            id_hash: device_id_hash,
            contact,
            link_code_salt,
            failed_attempts: 0,
        })
    }

    #[tracing::instrument(
        name = "db.passwordless.add_code",
        skip_all,
        fields(
            db.query.text,
            passwordless_device.id_hash = %device.id_hash,
            passwordless_code.id,
        ),
        err,
    )]
    async fn add_code(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        device: &PasswordlessDevice,
        link_code_hash: String,
    ) -> Result<PasswordlessCode, Self::Error> {
        let created_at = clock.now();
        let id = Ulid::from_datetime_with_source(created_at.into(), rng);
        tracing::Span::current().record("passwordless_code.id", tracing::field::display(id));

        sqlx::query(
            r#"
                INSERT INTO passwordless_codes
                  ( code_id
                  , device_id_hash
                  , link_code_hash
                  , created_at
                  )
                VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::from(id))
        .bind(&device.id_hash)
        .bind(&link_code_hash)
        .bind(created_at)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(PasswordlessCode {
            id,
            device_id_hash: device.id_hash.clone(),
            link_code_hash,
            created_at,
        })
    }

    #[tracing::instrument(
        name = "db.passwordless.list_codes_for_device",
        skip_all,
        fields(
            db.query.text,
            passwordless_device.id_hash = device_id_hash,
        ),
        err,
    )]
    async fn list_codes_for_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Vec<PasswordlessCode>, Self::Error> {
        let res = sqlx::query_as::<_, CodeLookup>(
            r#"
                SELECT code_id
                     , device_id_hash
                     , link_code_hash
                     , created_at
                FROM passwordless_codes
                WHERE device_id_hash = $1
                ORDER BY created_at ASC
            "#,
        )
        .bind(device_id_hash)
        .traced()
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.passwordless.list_codes_before",
        skip_all,
        fields(
            db.query.text,
            %before,
        ),
        err,
    )]
    async fn list_codes_before(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<PasswordlessCode>, Self::Error> {
        let res = sqlx::query_as::<_, CodeLookup>(
            r#"
                SELECT code_id
                     , device_id_hash
                     , link_code_hash
                     , created_at
                FROM passwordless_codes
                WHERE created_at < $1
            "#,
        )
        .bind(before)
        .traced()
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.passwordless.remove_device",
        skip_all,
        fields(
            db.query.text,
            passwordless_device.id_hash = device_id_hash,
        ),
        err,
    )]
    async fn remove_device(&mut self, device_id_hash: &str) -> Result<(), Self::Error> {
        // Codes are removed through the ON DELETE CASCADE foreign key
        let res = sqlx::query(
            r#"
                DELETE FROM passwordless_devices
                WHERE device_id_hash = $1
            "#,
        )
        .bind(device_id_hash)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        DatabaseError::ensure_affected_rows(&res, 1)
    }
}
