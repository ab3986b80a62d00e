//! Contact storage (SQLite).

use crate::ContactKey;
use crate::contacts::{Contact, ContactStatus, ContactStore};
use crate::error::{ContactError, Result};
use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row as _, SqlitePool};

const CONTACT_COLUMNS: &str = "id, phone, instance, name, status, thread_id, stage, from_me, followup, cooldown_until, last_contact, created_at";

#[derive(Debug, Clone)]
pub struct SqliteContactStore {
    pool: SqlitePool,
    default_stage: String,
}

impl SqliteContactStore {
    pub fn new(pool: SqlitePool, default_stage: impl Into<String>) -> Self {
        Self {
            pool,
            default_stage: default_stage.into(),
        }
    }

    fn not_found(key: &ContactKey) -> crate::Error {
        ContactError::NotFound {
            phone: key.phone.clone(),
            instance: key.instance.clone(),
        }
        .into()
    }

    /// Fail with `NotFound` when an update matched no row.
    fn expect_row(key: &ContactKey, rows_affected: u64) -> Result<()> {
        if rows_affected == 0 {
            return Err(Self::not_found(key));
        }
        Ok(())
    }
}

#[async_trait]
impl ContactStore for SqliteContactStore {
    async fn get_contact(&self, key: &ContactKey) -> Result<Option<Contact>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE phone = ? AND instance = ?"
        ))
        .bind(&key.phone)
        .bind(&key.instance)
        .fetch_optional(&self.pool)
        .await
        .map_err(ContactError::Database)?;

        row.map(contact_from_row).transpose()
    }

    async fn set_thread_ref(&self, key: &ContactKey, thread_id: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE contacts SET thread_id = ? WHERE phone = ? AND instance = ?")
                .bind(thread_id)
                .bind(&key.phone)
                .bind(&key.instance)
                .execute(&self.pool)
                .await
                .map_err(ContactError::Database)?;

        Self::expect_row(key, result.rows_affected())
    }

    async fn create_contact(
        &self,
        key: &ContactKey,
        name: &str,
        thread_id: Option<&str>,
    ) -> Result<Option<Contact>> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO contacts (
                id, phone, instance, name, status, thread_id, stage,
                from_me, followup, last_contact, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
            ON CONFLICT(phone, instance) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&key.phone)
        .bind(&key.instance)
        .bind(name)
        .bind(ContactStatus::Active.as_str())
        .bind(thread_id)
        .bind(&self.default_stage)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(ContactError::Database)?;

        if result.rows_affected() == 0 {
            tracing::debug!(phone = %key.phone, instance = %key.instance, "contact already exists");
            return Ok(None);
        }
        tracing::info!(phone = %key.phone, instance = %key.instance, "contact created");

        let contact = self
            .get_contact(key)
            .await?
            .context("contact inserted but not found")?;
        Ok(Some(contact))
    }

    async fn touch(&self, key: &ContactKey, name: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE contacts
            SET last_contact = ?,
                name = CASE WHEN ? <> '' THEN ? ELSE name END
            WHERE phone = ? AND instance = ?
            "#,
        )
        .bind(Utc::now())
        .bind(name.trim())
        .bind(name.trim())
        .bind(&key.phone)
        .bind(&key.instance)
        .execute(&self.pool)
        .await
        .map_err(ContactError::Database)?;

        Self::expect_row(key, result.rows_affected())
    }

    async fn enter_cooldown(&self, key: &ContactKey, until: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE contacts
            SET status = ?, from_me = 1, cooldown_until = ?, last_contact = ?
            WHERE phone = ? AND instance = ?
            "#,
        )
        .bind(ContactStatus::Cooldown.as_str())
        .bind(until)
        .bind(Utc::now())
        .bind(&key.phone)
        .bind(&key.instance)
        .execute(&self.pool)
        .await
        .map_err(ContactError::Database)?;

        Self::expect_row(key, result.rows_affected())
    }

    async fn update_stage(&self, key: &ContactKey, stage: &str) -> Result<()> {
        let result = sqlx::query("UPDATE contacts SET stage = ? WHERE phone = ? AND instance = ?")
            .bind(stage)
            .bind(&key.phone)
            .bind(&key.instance)
            .execute(&self.pool)
            .await
            .map_err(ContactError::Database)?;

        Self::expect_row(key, result.rows_affected())
    }
}

fn contact_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Contact> {
    let status_value: String = row
        .try_get("status")
        .context("failed to read contact status")?;
    let phone: String = row.try_get("phone").context("failed to read contact phone")?;
    let instance: String = row
        .try_get("instance")
        .context("failed to read contact instance")?;

    Ok(Contact {
        id: row.try_get("id").context("failed to read contact id")?,
        key: ContactKey { phone, instance },
        name: row.try_get("name").unwrap_or_default(),
        status: ContactStatus::parse(&status_value),
        thread_id: row
            .try_get::<Option<String>, _>("thread_id")
            .ok()
            .flatten()
            .filter(|value| !value.is_empty()),
        stage: row.try_get("stage").unwrap_or_default(),
        from_me: row.try_get("from_me").unwrap_or(false),
        followup: row.try_get("followup").unwrap_or(false),
        cooldown_until: row
            .try_get::<Option<DateTime<Utc>>, _>("cooldown_until")
            .ok()
            .flatten(),
        last_contact: row
            .try_get("last_contact")
            .context("failed to read contact last_contact")?,
        created_at: row
            .try_get("created_at")
            .context("failed to read contact created_at")?,
    })
}
