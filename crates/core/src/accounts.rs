//! Upstream accounts and request-time account selection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use survey_proxy_common::{AppError, AppResult};

/// One upstream account and its bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    /// Key the account is registered under.
    pub key: String,
    /// Bearer token sent upstream.
    pub token: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("key", &self.key)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Immutable mapping of account key to bearer token.
#[derive(Clone, Default)]
pub struct AccountRegistry {
    accounts: Arc<BTreeMap<String, String>>,
}

impl AccountRegistry {
    /// Create a registry from configured tokens.
    #[must_use]
    pub fn new(accounts: BTreeMap<String, String>) -> Self {
        Self {
            accounts: Arc::new(accounts),
        }
    }

    /// Pick the accounts a request runs against.
    ///
    /// Explicit keys must all be registered and keep their order. Without
    /// keys the registry must hold exactly one account.
    pub fn resolve(&self, requested: &[String]) -> AppResult<Vec<Account>> {
        if requested.is_empty() {
            let mut accounts = self.accounts.iter();
            return match (accounts.next(), accounts.next()) {
                (Some((key, token)), None) => Ok(vec![Account {
                    key: key.clone(),
                    token: token.clone(),
                }]),
                (None, _) => Err(AppError::AccountSelection(
                    "no upstream account is configured".to_string(),
                )),
                (Some(_), Some(_)) => Err(AppError::AccountSelection(format!(
                    "{} accounts are configured; select them with _account_keys",
                    self.accounts.len()
                ))),
            };
        }

        let unknown = requested
            .iter()
            .filter(|key| !self.accounts.contains_key(key.as_str()))
            .map(String::as_str)
            .collect::<Vec<_>>();
        if !unknown.is_empty() {
            return Err(AppError::AccountSelection(format!(
                "unknown account keys: {}",
                unknown.join(", ")
            )));
        }

        Ok(requested
            .iter()
            .filter_map(|key| {
                self.accounts.get(key).map(|token| Account {
                    key: key.clone(),
                    token: token.clone(),
                })
            })
            .collect())
    }
}

impl fmt::Debug for AccountRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRegistry")
            .field("keys", &self.accounts.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(keys: &[&str]) -> AccountRegistry {
        AccountRegistry::new(
            keys.iter()
                .map(|k| ((*k).to_string(), format!("token-{k}")))
                .collect(),
        )
    }

    #[test]
    fn test_single_account_is_implicit() {
        let accounts = registry(&["only"]).resolve(&[]).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].key, "only");
        assert_eq!(accounts[0].token, "token-only");
    }

    #[test]
    fn test_ambiguous_selection_fails() {
        let err = registry(&["eu", "us"]).resolve(&[]).unwrap_err();
        assert!(matches!(err, AppError::AccountSelection(_)));
        assert_eq!(err.status_code().as_u16(), 400);
    }

    #[test]
    fn test_explicit_keys_keep_order() {
        let requested = vec!["us".to_string(), "eu".to_string()];
        let accounts = registry(&["eu", "us"]).resolve(&requested).unwrap();
        let keys = accounts.iter().map(|a| a.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["us", "eu"]);
    }

    #[test]
    fn test_unknown_key_rejects_whole_selection() {
        let requested = vec!["eu".to_string(), "apac".to_string()];
        let err = registry(&["eu", "us"]).resolve(&requested).unwrap_err();
        assert!(err.to_string().contains("apac"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let accounts = registry(&["eu"]).resolve(&[]).unwrap();
        let debug = format!("{:?}", accounts[0]);
        assert!(!debug.contains("token-eu"));
    }
}
