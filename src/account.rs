//! WeChat Official Account registry
//!
//! Resolves which configured account an operation should use.

use serde::{Deserialize, Serialize};

/// A single WeChat Official Account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "appid", default)]
    pub app_id: String,
    #[serde(default)]
    pub secret: String,
    /// Case-insensitive terms matched against free-text context
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Advisory only, not used by selection
    #[serde(default)]
    pub default_style: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no WeChat accounts configured")]
    NoAccountsConfigured,

    #[error("account not found: {0}")]
    AccountNotFound(String),
}

impl SelectionError {
    pub fn code(&self) -> &'static str {
        match self {
            SelectionError::NoAccountsConfigured => "no_accounts_configured",
            SelectionError::AccountNotFound(_) => "account_not_found",
        }
    }
}

/// Ordered list of accounts plus the configured default id.
///
/// Lookups return the first match in list order. Duplicate ids are rejected
/// by config validation, not here.
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    accounts: Vec<Account>,
    default_account: String,
}

impl AccountRegistry {
    pub fn new(accounts: Vec<Account>, default_account: impl Into<String>) -> Self {
        Self {
            accounts,
            default_account: default_account.into(),
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// The default account, if the configured id names an existing account
    pub fn default_account(&self) -> Option<&Account> {
        if self.default_account.is_empty() {
            return None;
        }
        self.accounts.iter().find(|a| a.id == self.default_account)
    }

    /// Select an account.
    ///
    /// Priority, first rule that applies wins:
    /// 1. no accounts -> error
    /// 2. exactly one account -> that account
    /// 3. explicit selector -> exact id, then exact name, else error
    /// 4. keyword match on `context` with a strictly greatest count
    /// 5. default account
    /// 6. first account
    pub fn select(
        &self,
        context: Option<&str>,
        selector: Option<&str>,
    ) -> Result<&Account, SelectionError> {
        let first = match self.accounts.as_slice() {
            [] => return Err(SelectionError::NoAccountsConfigured),
            [only] => return Ok(only),
            [first, ..] => first,
        };

        if let Some(selector) = selector.filter(|s| !s.is_empty()) {
            return self
                .get_by_id(selector)
                .or_else(|_| self.get_by_name(selector));
        }

        if let Some(context) = context.filter(|c| !c.is_empty()) {
            if let Some(account) = self.match_by_keywords(context) {
                tracing::debug!("Account '{}' selected by keyword match", account.id);
                return Ok(account);
            }
        }

        if let Some(account) = self.default_account() {
            return Ok(account);
        }

        Ok(first)
    }

    pub fn get_by_id(&self, id: &str) -> Result<&Account, SelectionError> {
        self.accounts
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| SelectionError::AccountNotFound(id.to_string()))
    }

    pub fn get_by_name(&self, name: &str) -> Result<&Account, SelectionError> {
        self.accounts
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| SelectionError::AccountNotFound(name.to_string()))
    }

    /// Account whose keywords occur most often in `context`.
    /// A tie for the top count (including all zero) selects nobody.
    fn match_by_keywords(&self, context: &str) -> Option<&Account> {
        let context = context.to_lowercase();

        let mut best: Option<&Account> = None;
        let mut best_count = 0;
        let mut tied = false;

        for account in &self.accounts {
            let count = account
                .keywords
                .iter()
                .filter(|k| !k.is_empty())
                .filter(|k| context.contains(&k.to_lowercase()))
                .count();

            if count > best_count {
                best = Some(account);
                best_count = count;
                tied = false;
            } else if count == best_count && count > 0 {
                tied = true;
            }
        }

        if tied {
            None
        } else {
            best
        }
    }

    /// Ids that appear more than once, in first-seen order
    pub fn duplicate_ids(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        let mut dups: Vec<&str> = Vec::new();
        for account in &self.accounts {
            let id = account.id.as_str();
            if seen.contains(&id) {
                if !dups.contains(&id) {
                    dups.push(id);
                }
            } else {
                seen.push(id);
            }
        }
        dups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, name: &str, keywords: &[&str]) -> Account {
        Account {
            id: id.to_string(),
            name: name.to_string(),
            app_id: format!("wx-{}", id),
            secret: "secret".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            default_style: String::new(),
        }
    }

    fn two_accounts(default: &str) -> AccountRegistry {
        AccountRegistry::new(
            vec![
                account("a", "测试账号A", &["测试", "demo"]),
                account("b", "测试账号B", &["生产", "prod"]),
            ],
            default,
        )
    }

    #[test]
    fn test_empty_registry_fails() {
        let registry = AccountRegistry::new(vec![], "");
        assert_eq!(
            registry.select(Some("demo"), None),
            Err(SelectionError::NoAccountsConfigured)
        );
        assert_eq!(
            registry.select(None, Some("a")),
            Err(SelectionError::NoAccountsConfigured)
        );
    }

    #[test]
    fn test_single_account_ignores_selector_and_context() {
        let registry = AccountRegistry::new(vec![account("only", "唯一", &["x"])], "");
        assert_eq!(registry.select(None, None).unwrap().id, "only");
        assert_eq!(registry.select(Some("prod"), None).unwrap().id, "only");
        assert_eq!(
            registry.select(Some("prod"), Some("nonexistent")).unwrap().id,
            "only"
        );
    }

    #[test]
    fn test_select_by_keyword() {
        let registry = two_accounts("");
        assert_eq!(registry.select(Some("这是demo文章"), None).unwrap().id, "a");
        assert_eq!(registry.select(Some("prod release"), None).unwrap().id, "b");
        assert_eq!(registry.select(Some("这是生产环境的文章"), None).unwrap().id, "b");
    }

    #[test]
    fn test_keyword_match_is_case_insensitive_substring() {
        let registry = two_accounts("b");
        assert_eq!(registry.select(Some("Demographic data"), None).unwrap().id, "a");
        assert_eq!(registry.select(Some("PROD notes"), None).unwrap().id, "b");
    }

    #[test]
    fn test_no_keyword_match_falls_back_to_default() {
        let registry = two_accounts("b");
        assert_eq!(
            registry.select(Some("no relevant words"), None).unwrap().id,
            "b"
        );
    }

    #[test]
    fn test_no_keyword_match_without_default_uses_first() {
        let registry = two_accounts("");
        assert_eq!(
            registry.select(Some("no relevant words"), None).unwrap().id,
            "a"
        );
    }

    #[test]
    fn test_unknown_default_is_treated_as_no_default() {
        let registry = two_accounts("ghost");
        assert!(registry.default_account().is_none());
        assert_eq!(registry.select(None, None).unwrap().id, "a");
    }

    #[test]
    fn test_most_keyword_matches_wins() {
        let registry = AccountRegistry::new(
            vec![
                account("a", "A", &["测试", "demo"]),
                account("b", "B", &["测试", "prod"]),
            ],
            "b",
        );
        assert_eq!(registry.select(Some("这是测试demo文章"), None).unwrap().id, "a");
    }

    #[test]
    fn test_keyword_tie_falls_through_to_default() {
        let registry = AccountRegistry::new(
            vec![
                account("a", "A", &["demo"]),
                account("b", "B", &["prod"]),
                account("c", "C", &[]),
            ],
            "c",
        );
        assert_eq!(registry.select(Some("demo vs prod"), None).unwrap().id, "c");
    }

    #[test]
    fn test_explicit_selector_by_id_then_name() {
        let registry = two_accounts("a");
        assert_eq!(registry.select(None, Some("b")).unwrap().id, "b");
        assert_eq!(registry.select(None, Some("测试账号B")).unwrap().id, "b");
    }

    #[test]
    fn test_explicit_miss_never_falls_back() {
        let registry = two_accounts("a");
        assert_eq!(
            registry.select(Some("demo text"), Some("nonexistent-id")),
            Err(SelectionError::AccountNotFound("nonexistent-id".to_string()))
        );
    }

    #[test]
    fn test_empty_selector_is_ignored() {
        let registry = two_accounts("");
        assert_eq!(registry.select(Some("prod"), Some("")).unwrap().id, "b");
    }

    #[test]
    fn test_get_by_id_and_name() {
        let registry = two_accounts("a");
        assert_eq!(registry.get_by_id("b").unwrap().name, "测试账号B");
        assert_eq!(registry.get_by_name("测试账号A").unwrap().id, "a");
        assert!(matches!(
            registry.get_by_id("zzz"),
            Err(SelectionError::AccountNotFound(_))
        ));
        assert!(matches!(
            registry.get_by_name("zzz"),
            Err(SelectionError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_keep_first_match() {
        let registry = AccountRegistry::new(
            vec![
                account("dup", "first", &[]),
                account("dup", "second", &[]),
                account("x", "x", &[]),
            ],
            "",
        );
        assert_eq!(registry.duplicate_ids(), vec!["dup"]);
        assert_eq!(registry.get_by_id("dup").unwrap().name, "first");
    }
}
