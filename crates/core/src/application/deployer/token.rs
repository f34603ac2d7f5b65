// Auth token resolution for remote URLs

use crate::domain::{DeployableUnit, ProjectId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Tokens known outside of the units themselves
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Per project: token name (`github`, `gitlab`, `default`, ...) -> token
    pub project_tokens: HashMap<ProjectId, BTreeMap<String, String>>,
    /// Only ever used for github.com URLs
    pub global_github_token: Option<String>,
}

/// Picks the token used to reach a unit's remote
///
/// Order: the unit's own token, then the project's token map (host
/// substring match on `github`/`gitlab`, a `default` entry, a lone entry),
/// then the global github token for github.com URLs.
#[derive(Debug, Default)]
pub struct TokenResolver {
    credentials: RwLock<Credentials>,
}

impl TokenResolver {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
        }
    }

    /// Swap in freshly loaded credentials
    pub fn replace(&self, credentials: Credentials) {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    pub fn resolve(&self, unit: &DeployableUnit) -> Option<String> {
        if let Some(token) = non_empty(unit.auth_token.as_deref()) {
            return Some(token.to_string());
        }

        let credentials = self
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let url = unit.git_url.to_ascii_lowercase();

        if let Some(tokens) = credentials.project_tokens.get(&unit.project_id) {
            let by_host = ["github", "gitlab"]
                .into_iter()
                .filter(|host| url.contains(host))
                .find_map(|host| non_empty(tokens.get(host).map(String::as_str)));

            let picked = by_host
                .or_else(|| non_empty(tokens.get("default").map(String::as_str)))
                .or_else(|| match tokens.len() {
                    1 => tokens.values().next().and_then(|t| non_empty(Some(t.as_str()))),
                    _ => None,
                });

            if let Some(token) = picked {
                return Some(token.to_string());
            }
        }

        if url.contains("github.com") {
            return non_empty(credentials.global_github_token.as_deref()).map(str::to_string);
        }
        None
    }
}

fn non_empty(token: Option<&str>) -> Option<&str> {
    token.filter(|t| !t.trim().is_empty())
}
