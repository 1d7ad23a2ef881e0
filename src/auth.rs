//! Authorizers deciding which users the bot serves

use crate::error::EngineError;
use crate::model::UserId;
use crate::runtime::Authorizer;
use std::collections::HashSet;

/// Serves everyone
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _user_id: UserId) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Serves only the listed users
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    users: HashSet<UserId>,
}

impl Whitelist {
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }
}

impl Authorizer for Whitelist {
    fn authorize(&self, user_id: UserId) -> Result<(), EngineError> {
        if self.users.contains(&user_id) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(user_id))
        }
    }
}

/// Serves everyone except the listed users
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    users: HashSet<UserId>,
}

impl Blacklist {
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }
}

impl Authorizer for Blacklist {
    fn authorize(&self, user_id: UserId) -> Result<(), EngineError> {
        if self.users.contains(&user_id) {
            Err(EngineError::Unauthorized(user_id))
        } else {
            Ok(())
        }
    }
}
