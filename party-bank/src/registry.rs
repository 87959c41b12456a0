//! Shared registry of joined players.
//!
//! The registry state lives inside a [`tokio::sync::watch`] channel: every
//! mutation goes through the sender's internal lock, which serializes
//! concurrent handlers, and every change is published to receivers handed out
//! by [`UserRegistry::watch`] without them polling.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub address: String,
    pub name: String,
    pub avatar_id: i32,
    pub money: u64,
}

impl User {
    pub fn new(address: impl Into<String>, name: impl Into<String>, avatar_id: i32) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            avatar_id,
            money: 0,
        }
    }

    /// Balance with thousands separators, e.g. `$1,250`.
    pub fn formatted_money(&self) -> String {
        let digits = self.money.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
        grouped.push('$');
        for (index, digit) in digits.chars().enumerate() {
            if index > 0 && (digits.len() - index) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(digit);
        }
        grouped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("could not find user '{address}'")]
    UnknownUser { address: String },
    #[error("user '{address}' has {balance}, cannot remove {requested}")]
    InsufficientFunds {
        address: String,
        balance: u64,
        requested: u64,
    },
    #[error("adding {requested} to user '{address}' would overflow the balance")]
    Overflow { address: String, requested: u64 },
}

/// Result of a JOIN against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Created(User),
    AlreadyJoined(User),
}

/// Cloneable handle to the insertion-ordered set of users.
#[derive(Clone)]
pub struct UserRegistry {
    users: Arc<watch::Sender<Vec<User>>>,
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UserRegistry {
    pub fn new() -> Self {
        let (users, _) = watch::channel(Vec::new());
        Self {
            users: Arc::new(users),
        }
    }

    /// Registers `user` unless its address is already present.
    pub fn add(&self, user: User) -> Registration {
        let mut outcome = None;
        self.users.send_if_modified(|users| {
            if let Some(existing) = users.iter().find(|u| u.address == user.address) {
                outcome = Some(Registration::AlreadyJoined(existing.clone()));
                return false;
            }
            users.push(user.clone());
            outcome = Some(Registration::Created(user.clone()));
            true
        });
        outcome.unwrap_or(Registration::Created(user))
    }

    pub fn find_by_address(&self, address: &str) -> Option<User> {
        self.users
            .borrow()
            .iter()
            .find(|u| u.address == address)
            .cloned()
    }

    /// Adds `amount` to the user's balance and returns the updated user.
    pub fn credit(&self, address: &str, amount: u64) -> Result<User, BalanceError> {
        self.update_balance(address, |user| {
            user.money
                .checked_add(amount)
                .ok_or_else(|| BalanceError::Overflow {
                    address: user.address.clone(),
                    requested: amount,
                })
        })
    }

    /// Removes `amount` from the user's balance. Debits below zero are rejected.
    pub fn debit(&self, address: &str, amount: u64) -> Result<User, BalanceError> {
        self.update_balance(address, |user| {
            user.money
                .checked_sub(amount)
                .ok_or_else(|| BalanceError::InsufficientFunds {
                    address: user.address.clone(),
                    balance: user.money,
                    requested: amount,
                })
        })
    }

    /// Removes every user, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut cleared = 0;
        self.users.send_if_modified(|users| {
            cleared = users.len();
            users.clear();
            cleared > 0
        });
        cleared
    }

    pub fn snapshot(&self) -> Vec<User> {
        self.users.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.users.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.borrow().is_empty()
    }

    /// Live view of the user list; the receiver wakes on every join, balance
    /// change and clear.
    pub fn watch(&self) -> watch::Receiver<Vec<User>> {
        self.users.subscribe()
    }

    fn update_balance<F>(&self, address: &str, next_balance: F) -> Result<User, BalanceError>
    where
        F: FnOnce(&User) -> Result<u64, BalanceError>,
    {
        let mut result = Err(BalanceError::UnknownUser {
            address: address.to_string(),
        });
        self.users.send_if_modified(|users| {
            let Some(user) = users.iter_mut().find(|u| u.address == address) else {
                return false;
            };
            match next_balance(user) {
                Ok(money) => {
                    user.money = money;
                    result = Ok(user.clone());
                    true
                }
                Err(err) => {
                    result = Err(err);
                    false
                }
            }
        });
        result
    }
}
