use parking_lot::Mutex;
use shared::domain::{Session, Topic};

use crate::error::{AdapterError, Result};

fn address_segment(account_id: &str) -> Option<&str> {
    account_id.split(':').nth(2)
}

pub fn session_addresses(session: &Session) -> Vec<String> {
    session
        .account_ids()
        .filter_map(address_segment)
        .map(str::to_string)
        .collect()
}

/// Primary address of `session`; the first account id must carry one.
pub fn primary_address(session: &Session) -> Result<String> {
    let first = session.account_ids().next().ok_or_else(|| {
        AdapterError::MalformedSession(format!("session {} has no accounts", session.topic))
    })?;
    address_segment(first).map(str::to_string).ok_or_else(|| {
        AdapterError::MalformedSession(format!(
            "account id '{first}' in session {} is not namespace:chain:address",
            session.topic
        ))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced {
    pub previous_addresses: Vec<String>,
    pub addresses: Vec<String>,
}

impl Replaced {
    pub fn accounts_changed(&self) -> bool {
        self.previous_addresses != self.addresses
    }
}

#[derive(Default)]
pub struct SessionStore {
    current: Mutex<Option<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `session` as the live session. Sessions without a primary
    /// address are rejected and leave the store untouched.
    pub fn set_session(&self, session: Session) -> Result<String> {
        let address = primary_address(&session)?;
        *self.current.lock() = Some(session);
        Ok(address)
    }

    pub fn clear_session(&self) -> Option<Session> {
        self.current.lock().take()
    }

    pub fn session(&self) -> Option<Session> {
        self.current.lock().clone()
    }

    pub fn topic(&self) -> Option<Topic> {
        self.current
            .lock()
            .as_ref()
            .map(|session| session.topic.clone())
    }

    pub fn has_session(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn current_address(&self) -> Result<String> {
        let guard = self.current.lock();
        let session = guard
            .as_ref()
            .ok_or(AdapterError::NotInitialized("no active session"))?;
        primary_address(session)
    }

    pub fn all_addresses(&self) -> Vec<String> {
        self.current
            .lock()
            .as_ref()
            .map(session_addresses)
            .unwrap_or_default()
    }

    /// Swaps in `next` only while the stored session still has `topic`.
    /// Returns `Ok(None)` when the topic no longer matches.
    pub fn replace_if_topic(&self, topic: &Topic, next: Session) -> Result<Option<Replaced>> {
        let mut guard = self.current.lock();
        let Some(current) = guard.as_ref() else {
            return Ok(None);
        };
        if &current.topic != topic {
            return Ok(None);
        }
        primary_address(&next)?;

        let replaced = Replaced {
            previous_addresses: session_addresses(current),
            addresses: session_addresses(&next),
        };
        *guard = Some(next);
        Ok(Some(replaced))
    }

    pub fn clear_if_topic(&self, topic: &Topic) -> Option<Session> {
        let mut guard = self.current.lock();
        if guard.as_ref().is_some_and(|session| &session.topic == topic) {
            return guard.take();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use shared::domain::{Namespace, Namespaces};

    use super::*;

    fn session_with(topic: &str, namespaces: &[(&str, &[&str])]) -> Session {
        let namespaces = namespaces
            .iter()
            .map(|(key, accounts)| {
                (
                    key.to_string(),
                    Namespace {
                        accounts: accounts.iter().map(|a| a.to_string()).collect(),
                        ..Namespace::default()
                    },
                )
            })
            .collect::<Namespaces>();
        Session {
            topic: Topic::new(topic),
            namespaces,
            session_properties: None,
            peer: None,
            expiry: 0,
            acknowledged: true,
        }
    }

    #[test]
    fn extracts_third_segment_in_account_order() {
        let session = session_with(
            "t",
            &[(
                "tron",
                &["tron:0x2b6653dc:TXYZ", "tron:0x2b6653dc:TABC", "tron:0x2b6653dc:TXYZ"],
            )],
        );
        assert_eq!(
            session_addresses(&session),
            vec!["TXYZ".to_string(), "TABC".to_string(), "TXYZ".to_string()]
        );
        assert_eq!(primary_address(&session).expect("primary"), "TXYZ");
    }

    #[test]
    fn malformed_account_ids_are_dropped_from_bulk_read() {
        let session = session_with(
            "t",
            &[("tron", &["tron:0x2b6653dc", "tron:0x2b6653dc:TGood", "bogus"])],
        );
        assert_eq!(session_addresses(&session), vec!["TGood".to_string()]);
        assert!(matches!(
            primary_address(&session),
            Err(AdapterError::MalformedSession(_))
        ));
    }

    #[test]
    fn walks_every_namespace() {
        let session = session_with(
            "t",
            &[
                ("tron", &["tron:0x2b6653dc:TOne"]),
                ("wallet", &["wallet:0x1:TTwo"]),
            ],
        );
        assert_eq!(
            session_addresses(&session),
            vec!["TOne".to_string(), "TTwo".to_string()]
        );
    }

    #[test]
    fn primary_address_follows_declared_namespace_order() {
        let session: Session = serde_json::from_str(
            r#"{
                "topic": "multi",
                "namespaces": {
                    "tron": { "accounts": ["tron:0x2b6653dc:TPrimary"] },
                    "eip155": { "accounts": ["eip155:1:0xOther"] }
                }
            }"#,
        )
        .expect("session");

        assert_eq!(primary_address(&session).expect("primary"), "TPrimary");
        assert_eq!(
            session_addresses(&session),
            vec!["TPrimary".to_string(), "0xOther".to_string()]
        );

        let store = SessionStore::new();
        assert_eq!(store.set_session(session).expect("store"), "TPrimary");
        assert_eq!(store.current_address().expect("address"), "TPrimary");
    }

    #[test]
    fn zero_account_sessions_are_never_stored() {
        let store = SessionStore::new();
        let empty = session_with("t", &[("tron", &[])]);

        assert!(session_addresses(&empty).is_empty());
        assert!(matches!(
            store.set_session(empty),
            Err(AdapterError::MalformedSession(_))
        ));
        assert!(!store.has_session());
        assert!(store.all_addresses().is_empty());
        assert!(matches!(
            store.current_address(),
            Err(AdapterError::NotInitialized(_))
        ));
    }

    #[test]
    fn topic_guards_protect_a_newer_session() {
        let store = SessionStore::new();
        store
            .set_session(session_with("current", &[("tron", &["tron:0x1:TA"])]))
            .expect("store");

        let stale = Topic::new("stale");
        let replaced = store
            .replace_if_topic(&stale, session_with("stale", &[("tron", &["tron:0x1:TB"])]))
            .expect("no error");
        assert!(replaced.is_none());
        assert!(store.clear_if_topic(&stale).is_none());
        assert_eq!(store.current_address().expect("address"), "TA");

        let current = Topic::new("current");
        let replaced = store
            .replace_if_topic(&current, session_with("current", &[("tron", &["tron:0x1:TB"])]))
            .expect("no error")
            .expect("replaced");
        assert!(replaced.accounts_changed());
        assert_eq!(replaced.addresses, vec!["TB".to_string()]);
        assert!(store.clear_if_topic(&current).is_some());
        assert!(!store.has_session());
    }
}
