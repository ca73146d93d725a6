//! In-memory [`UserStore`] for tests. Check-and-insert happens under one lock,
//! which gives the same atomicity the unique constraints give in Postgres.

use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::auth::repo::{StoreError, UserStore};
use crate::auth::repo_types::User;

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn count_matching(&self, username: &str) -> usize {
        self.users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.username == username)
            .count()
    }

    pub fn set_admin(&self, id: i64, is_admin: bool) {
        if let Some(u) = self.users.lock().unwrap().iter_mut().find(|u| u.id == id) {
            u.is_admin = is_admin;
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if users
            .iter()
            .any(|u| u.username == username || u.email == email)
        {
            return Err(StoreError::Duplicate);
        }
        let user = User {
            id: users.len() as i64 + 1,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_admin: false,
            profile_image_path: None,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn find_by_username_or_email(
        &self,
        identifier: &str,
        email_identifier: &str,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        let found = users
            .iter()
            .find(|u| u.username == identifier)
            .or_else(|| users.iter().find(|u| u.email == email_identifier))
            .cloned();
        Ok(found)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn touch_last_login(&self, id: i64) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound)?;
        user.last_login = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_rejects_duplicate_username_and_email() {
        let store = MemoryUserStore::default();
        store.create("alice", "alice@x.com", "h").await.unwrap();
        assert!(matches!(
            store.create("alice", "other@x.com", "h").await,
            Err(StoreError::Duplicate)
        ));
        assert!(matches!(
            store.create("bob", "alice@x.com", "h").await,
            Err(StoreError::Duplicate)
        ));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lookup_by_either_identifier() {
        let store = MemoryUserStore::default();
        let alice = store.create("alice", "alice@x.com", "h").await.unwrap();
        let by_name = store
            .find_by_username_or_email("alice", "alice")
            .await
            .unwrap()
            .unwrap();
        let by_mail = store
            .find_by_username_or_email("alice@x.com", "alice@x.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, alice.id);
        assert_eq!(by_mail.id, alice.id);
        assert!(store.find_by_id(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn touch_unknown_user_is_not_found() {
        let store = MemoryUserStore::default();
        assert!(matches!(
            store.touch_last_login(1).await,
            Err(StoreError::NotFound)
        ));
    }
}
