//! Contact records: per-phone conversation state and lifecycle.

pub mod store;

pub use store::SqliteContactStore;

use crate::ContactKey;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the bot answers a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    /// `ativo`: the bot answers.
    Active,
    /// `cooldown`: an operator answered by hand; the bot stays quiet until
    /// the cooldown expires.
    Cooldown,
    /// `pausado`: the bot stays quiet until re-enabled.
    Paused,
}

impl ContactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContactStatus::Active => "ativo",
            ContactStatus::Cooldown => "cooldown",
            ContactStatus::Paused => "pausado",
        }
    }

    /// Unknown values are treated as paused.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "ativo" => ContactStatus::Active,
            "cooldown" => ContactStatus::Cooldown,
            _ => ContactStatus::Paused,
        }
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub key: ContactKey,
    pub name: String,
    pub status: ContactStatus,
    pub thread_id: Option<String>,
    /// Sales funnel stage.
    pub stage: String,
    /// An operator has answered this contact by hand.
    pub from_me: bool,
    pub followup: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_contact: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    /// Status at `now`. An expired cooldown counts as active.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ContactStatus {
        match (self.status, self.cooldown_until) {
            (ContactStatus::Cooldown, Some(until)) if until <= now => ContactStatus::Active,
            (status, _) => status,
        }
    }

    pub fn is_answerable(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == ContactStatus::Active
    }
}

/// Persistence for contact records, keyed by phone and instance.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn get_contact(&self, key: &ContactKey) -> Result<Option<Contact>>;

    async fn set_thread_ref(&self, key: &ContactKey, thread_id: &str) -> Result<()>;

    /// Insert a new active contact at the default funnel stage. Returns
    /// `None` and leaves the stored row untouched when the key already
    /// exists.
    async fn create_contact(
        &self,
        key: &ContactKey,
        name: &str,
        thread_id: Option<&str>,
    ) -> Result<Option<Contact>>;

    /// Record activity. A non-empty `name` replaces the stored display name.
    async fn touch(&self, key: &ContactKey, name: &str) -> Result<()>;

    /// An operator answered by hand: silence the bot until `until`.
    async fn enter_cooldown(&self, key: &ContactKey, until: DateTime<Utc>) -> Result<()>;

    async fn update_stage(&self, key: &ContactKey, stage: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::ContactError;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Map-backed store for tests that run on a paused clock, where the
    /// SQLite worker thread would race the auto-advancing timer.
    #[derive(Default)]
    pub struct MemoryContactStore {
        pub contacts: Mutex<HashMap<ContactKey, Contact>>,
    }

    impl MemoryContactStore {
        pub fn with(contact: Contact) -> Self {
            let store = Self::default();
            store.contacts.lock().insert(contact.key.clone(), contact);
            store
        }

        fn update(&self, key: &ContactKey, apply: impl FnOnce(&mut Contact)) -> Result<()> {
            let mut contacts = self.contacts.lock();
            let contact = contacts.get_mut(key).ok_or_else(|| ContactError::NotFound {
                phone: key.phone.clone(),
                instance: key.instance.clone(),
            })?;
            apply(contact);
            Ok(())
        }
    }

    pub fn active_contact(key: ContactKey, thread_id: Option<&str>) -> Contact {
        let now = Utc::now();
        Contact {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            name: "Maria".into(),
            status: ContactStatus::Active,
            thread_id: thread_id.map(str::to_string),
            stage: "conexão".into(),
            from_me: false,
            followup: false,
            cooldown_until: None,
            last_contact: now,
            created_at: now,
        }
    }

    #[async_trait]
    impl ContactStore for MemoryContactStore {
        async fn get_contact(&self, key: &ContactKey) -> Result<Option<Contact>> {
            Ok(self.contacts.lock().get(key).cloned())
        }

        async fn set_thread_ref(&self, key: &ContactKey, thread_id: &str) -> Result<()> {
            self.update(key, |contact| contact.thread_id = Some(thread_id.to_string()))
        }

        async fn create_contact(
            &self,
            key: &ContactKey,
            name: &str,
            thread_id: Option<&str>,
        ) -> Result<Option<Contact>> {
            let mut contacts = self.contacts.lock();
            if contacts.contains_key(key) {
                return Ok(None);
            }
            let mut contact = active_contact(key.clone(), thread_id);
            contact.name = name.to_string();
            contacts.insert(key.clone(), contact.clone());
            Ok(Some(contact))
        }

        async fn touch(&self, key: &ContactKey, name: &str) -> Result<()> {
            self.update(key, |contact| {
                contact.last_contact = Utc::now();
                if !name.trim().is_empty() {
                    contact.name = name.trim().to_string();
                }
            })
        }

        async fn enter_cooldown(&self, key: &ContactKey, until: DateTime<Utc>) -> Result<()> {
            self.update(key, |contact| {
                contact.status = ContactStatus::Cooldown;
                contact.from_me = true;
                contact.cooldown_until = Some(until);
            })
        }

        async fn update_stage(&self, key: &ContactKey, stage: &str) -> Result<()> {
            self.update(key, |contact| contact.stage = stage.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn contact(status: ContactStatus, cooldown_until: Option<DateTime<Utc>>) -> Contact {
        let now = Utc::now();
        Contact {
            id: "c1".into(),
            key: ContactKey::new("5511999999999", "loja"),
            name: "Maria".into(),
            status,
            thread_id: None,
            stage: "conexão".into(),
            from_me: false,
            followup: false,
            cooldown_until,
            last_contact: now,
            created_at: now,
        }
    }

    #[test]
    fn unknown_status_fails_closed() {
        assert_eq!(ContactStatus::parse("ativo"), ContactStatus::Active);
        assert_eq!(ContactStatus::parse("cooldown"), ContactStatus::Cooldown);
        assert_eq!(ContactStatus::parse("pausado"), ContactStatus::Paused);
        assert_eq!(ContactStatus::parse("bloqueado"), ContactStatus::Paused);
    }

    #[test]
    fn cooldown_expires() {
        let now = Utc::now();
        let cooling = contact(ContactStatus::Cooldown, Some(now + Duration::hours(1)));
        let expired = contact(ContactStatus::Cooldown, Some(now - Duration::minutes(1)));
        let open_ended = contact(ContactStatus::Cooldown, None);

        assert!(!cooling.is_answerable(now));
        assert!(expired.is_answerable(now));
        assert_eq!(open_ended.effective_status(now), ContactStatus::Cooldown);
        assert!(!contact(ContactStatus::Paused, None).is_answerable(now));
    }
}
