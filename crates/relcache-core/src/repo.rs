//! GitHub repository coordinates.

/// A repository key uniquely identifying the GitHub repository that hosts
/// cached builds as releases.
///
/// # Example
///
/// ```
/// use relcache_core::repo::RepoKey;
///
/// let repo: RepoKey = "shirakaba/paranovel-two".parse().unwrap();
/// assert_eq!(repo.owner, "shirakaba");
/// assert_eq!(repo.repo, "paranovel-two");
/// ```
#[derive(Debug, Clone, Hash, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RepoKey {
    /// Repository owner (GitHub user or organization).
    pub owner: String,
    /// Repository name.
    pub repo: String,
}

impl RepoKey {
    /// Create a new `RepoKey` from an owner and repository name.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Path prefix for REST endpoints of this repository: `repos/<owner>/<repo>`.
    pub fn api_path(&self) -> String {
        format!("repos/{}/{}", self.owner, self.repo)
    }
}

impl std::str::FromStr for RepoKey {
    type Err = String;

    /// Parse `owner/repo`, rejecting empty components.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(Self::new(owner, repo))
            }
            _ => Err(format!(
                "Invalid GitHub repo format: expected 'owner/repo', got '{s}'"
            )),
        }
    }
}

impl std::fmt::Display for RepoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}
