use std::collections::HashMap;

/// Per-user session state: an opaque user id, the auth token obtained at
/// startup, and a free-form string map for scenario state (for example a
/// resource id created by one task and consumed by the next).
///
/// A `SessionContext` is exclusively owned by a single virtual user and is
/// dropped when that user stops. It is never shared or pooled across users,
/// so task actions can mutate it without any locking.
#[derive(Debug)]
pub struct SessionContext {
    user_id: u64,
    auth_token: Option<String>,
    attributes: HashMap<String, String>,
}

impl SessionContext {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            auth_token: None,
            attributes: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn set_auth_token(&mut self, token: impl Into<String>) {
        self.auth_token = Some(token.into());
    }

    pub fn clear_auth_token(&mut self) {
        self.auth_token = None;
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Removes and returns an attribute. Useful for one-shot handoffs
    /// between two task steps.
    pub fn take_attribute(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip() {
        let mut session = SessionContext::new(7);
        assert_eq!(session.user_id(), 7);
        assert!(session.auth_token().is_none());

        session.set_auth_token("jwt-abc");
        assert_eq!(session.auth_token(), Some("jwt-abc"));

        session.clear_auth_token();
        assert!(session.auth_token().is_none());
    }

    #[test]
    fn attributes_handoff() {
        let mut session = SessionContext::new(0);
        session.set_attribute("address_id", "42");
        assert_eq!(session.attribute("address_id"), Some("42"));

        let taken = session.take_attribute("address_id");
        assert_eq!(taken.as_deref(), Some("42"));
        assert!(session.attribute("address_id").is_none());
    }
}
