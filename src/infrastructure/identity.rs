use crate::domain::company::Company;
use crate::domain::ports::{Identity, IdentityProvider};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// An identity provider backed by a static token table.
///
/// Stands in for the production authentication service: every known token
/// maps to one `(user, company)` pair, anything else fails authentication.
/// The CLI derives one token per company from the company name.
#[derive(Default, Clone)]
pub struct StaticTokenIdentity {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }

    /// Builds a provider with one slug token per company.
    pub fn for_companies(companies: &[Company]) -> Self {
        let mut provider = Self::new();
        for (index, company) in companies.iter().enumerate() {
            provider.insert(
                Self::token_for(&company.name),
                Identity {
                    user_id: index as u64 + 1,
                    company_id: company.id,
                },
            );
        }
        provider
    }

    /// The token derived from a company name: lowercased, spaces to dashes.
    pub fn token_for(name: &str) -> String {
        name.to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    async fn authenticate(&self, token: &str) -> Result<Identity> {
        self.tokens
            .get(token)
            .copied()
            .ok_or(LedgerError::Unauthenticated)
    }
}
