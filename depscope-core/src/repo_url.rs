// Repository URL canonicalization and exact-then-fork matching.

use std::collections::HashMap;

use serde::Serialize;

/// A repository URL collapsed to `host/owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepoUrl {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl std::fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.owner, self.repo)
    }
}

/// How two repository URLs were found to refer to the same project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Same host, owner and repository.
    Exact,
    /// Same repository name under a different owner.
    Fork,
}

/// Canonicalize a repository URL. Handles `https://`, `git+https://`,
/// `ssh://git@host/...`, scp-style `git@host:owner/repo`, credentials,
/// query strings, fragments, `.git` suffixes and trailing slashes.
/// Returns `None` when no `host/owner/repo` shape can be recovered.
pub fn normalize(url: &str) -> Option<RepoUrl> {
    let url = url.trim();
    let url = url.strip_prefix("git+").unwrap_or(url);
    let url = url.split(['?', '#']).next().unwrap_or(url);

    let rest: String = if let Some((_, after)) = url.split_once("://") {
        after.to_string()
    } else if let Some((authority, path)) = url.split_once(':') {
        // scp-like `git@github.com:owner/repo.git`
        if authority.contains('/') {
            url.to_string()
        } else {
            format!("{authority}/{path}")
        }
    } else {
        url.to_string()
    };

    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let authority = segments.next()?;
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host).to_lowercase();
    let host = host.trim_start_matches("www.").to_string();
    let owner = segments.next()?.to_lowercase();
    let repo = segments.next()?.to_lowercase();
    let repo = repo.strip_suffix(".git").unwrap_or(&repo).to_string();

    if host.is_empty() || owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(RepoUrl { host, owner, repo })
}

/// Compare two URLs, preferring an exact match over a fork match.
pub fn match_kind(a: &str, b: &str) -> Option<MatchKind> {
    let a = normalize(a)?;
    let b = normalize(b)?;
    if a == b {
        Some(MatchKind::Exact)
    } else if a.repo == b.repo && a.owner != b.owner {
        Some(MatchKind::Fork)
    } else {
        None
    }
}

/// True when the URLs match exactly or as forks.
pub fn matches(a: &str, b: &str) -> bool {
    match_kind(a, b).is_some()
}

/// Lookup from repository URL to the owning node, built once per
/// reconciliation pass. Ties resolve to the first node in build order.
#[derive(Debug, Default)]
pub struct RepoIndex {
    exact: HashMap<RepoUrl, String>,
    by_repo: HashMap<String, Vec<(String, String)>>,
}

impl RepoIndex {
    /// Build from `(node id, repository url)` pairs in store order.
    pub fn build<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut index = Self::default();
        for (id, url) in entries {
            let Some(norm) = normalize(url) else {
                continue;
            };
            index
                .by_repo
                .entry(norm.repo.clone())
                .or_default()
                .push((norm.owner.clone(), id.to_string()));
            index.exact.entry(norm).or_insert_with(|| id.to_string());
        }
        index
    }

    /// Resolve an incoming URL to a node id.
    pub fn resolve(&self, url: &str) -> Option<(&str, MatchKind)> {
        let norm = normalize(url)?;
        if let Some(id) = self.exact.get(&norm) {
            return Some((id.as_str(), MatchKind::Exact));
        }
        self.by_repo
            .get(&norm.repo)?
            .iter()
            .find(|(owner, _)| *owner != norm.owner)
            .map(|(_, id)| (id.as_str(), MatchKind::Fork))
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_suffix_and_slash_are_ignored() {
        assert_eq!(
            normalize("https://github.com/User/Repo.git"),
            normalize("https://github.com/user/repo/")
        );
        assert_eq!(
            normalize("https://github.com/User/Repo.git")
                .unwrap()
                .to_string(),
            "github.com/user/repo"
        );
    }

    #[test]
    fn ssh_and_scp_forms() {
        let expected = normalize("https://github.com/a/b").unwrap();
        assert_eq!(normalize("git@github.com:a/b.git").unwrap(), expected);
        assert_eq!(normalize("ssh://git@github.com/a/b.git").unwrap(), expected);
        assert_eq!(normalize("git+https://github.com/a/b.git").unwrap(), expected);
    }

    #[test]
    fn extra_path_query_and_credentials() {
        let expected = normalize("https://github.com/a/b").unwrap();
        assert_eq!(
            normalize("https://token@github.com/a/b/tree/main?tab=readme#install").unwrap(),
            expected
        );
        assert_eq!(normalize("https://www.GitHub.com/a/b").unwrap(), expected);
        assert_eq!(normalize("github.com/a/b").unwrap(), expected);
    }

    #[test]
    fn unparsable_inputs() {
        assert!(normalize("").is_none());
        assert!(normalize("not a url").is_none());
        assert!(normalize("https://github.com/onlyowner").is_none());
        assert!(normalize("https://github.com/a/.git").is_none());
    }

    #[test]
    fn fork_match() {
        assert_eq!(
            match_kind("https://github.com/a/repo", "https://github.com/b/repo"),
            Some(MatchKind::Fork)
        );
        assert!(matches("https://github.com/a/repo", "https://github.com/b/repo"));
    }

    #[test]
    fn different_repos_do_not_match() {
        assert!(!matches(
            "https://github.com/a/repo1",
            "https://github.com/a/repo2"
        ));
    }

    #[test]
    fn exact_match_preferred() {
        assert_eq!(
            match_kind("https://github.com/a/repo.git", "git@github.com:A/Repo"),
            Some(MatchKind::Exact)
        );
        assert_eq!(match_kind("https://github.com/a/repo", "garbage"), None);
    }

    #[test]
    fn index_prefers_exact_then_first_fork() {
        let index = RepoIndex::build([
            ("fork-one", "https://github.com/one/pack"),
            ("fork-two", "https://github.com/two/pack"),
            ("upstream", "https://github.com/origin/pack"),
            ("broken", "nonsense"),
        ]);
        assert_eq!(index.len(), 3);
        assert_eq!(
            index.resolve("https://github.com/origin/pack.git"),
            Some(("upstream", MatchKind::Exact))
        );
        assert_eq!(
            index.resolve("https://github.com/someone/pack"),
            Some(("fork-one", MatchKind::Fork))
        );
        assert_eq!(index.resolve("https://github.com/origin/other"), None);
    }

    #[test]
    fn index_first_exact_wins() {
        let index = RepoIndex::build([
            ("first", "https://github.com/a/b"),
            ("second", "https://github.com/A/B.git"),
        ]);
        assert_eq!(
            index.resolve("https://github.com/a/b"),
            Some(("first", MatchKind::Exact))
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn normalize_never_panics(s in any::<String>()) {
                let _ = normalize(&s);
            }

            #[test]
            fn decorations_do_not_change_identity(
                owner in "[A-Za-z][A-Za-z0-9-]{0,15}",
                repo in "[A-Za-z][A-Za-z0-9_-]{0,15}",
            ) {
                let plain = normalize(&format!("https://github.com/{owner}/{repo}"));
                let decorated = normalize(&format!("https://GitHub.com/{owner}/{repo}.git/"));
                prop_assert!(plain.is_some());
                prop_assert_eq!(plain, decorated);
            }
        }
    }
}
