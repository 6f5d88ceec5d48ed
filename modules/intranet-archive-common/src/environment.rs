use url::Url;

pub const PRODUCTION: &str = "production";

/// A deployment target of the source intranet.
#[derive(Clone)]
pub struct Environment {
    pub name: String,
    pub base_url: Url,
    /// Bearer credential sent with every crawl request, when configured.
    pub credential: Option<String>,
}

impl Environment {
    pub fn new(name: impl Into<String>, base_url: Url, credential: Option<String>) -> Self {
        Self {
            name: name.into(),
            base_url,
            credential: credential.filter(|c| !c.is_empty()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.name == PRODUCTION
    }

    pub fn host(&self) -> &str {
        self.base_url.host_str().unwrap_or_default()
    }

    /// Agency folder in the bucket. Production is bare, other environments
    /// are prefixed with `{env}-`.
    pub fn agency_path(&self, agency: &str) -> String {
        if self.is_production() {
            agency.to_string()
        } else {
            format!("{}-{agency}", self.name)
        }
    }

    /// Root listing page for this environment at the top of the bucket.
    pub fn index_page(&self) -> String {
        if self.is_production() {
            "index.html".to_string()
        } else {
            format!("{}.html", self.name)
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .finish()
    }
}

/// The configured environments, in declaration order. Doubles as the
/// environment allow-list.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSet {
    environments: Vec<Environment>,
}

impl EnvironmentSet {
    pub fn new(environments: Vec<Environment>) -> Self {
        Self { environments }
    }

    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// Find the environment whose base URL host matches `host`.
    pub fn by_host(&self, host: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.host() == host)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Environment> {
        self.environments.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.environments.iter().map(|e| e.name.as_str()).collect()
    }

    /// Environments with a crawl credential set.
    pub fn with_credentials(&self) -> impl Iterator<Item = &Environment> {
        self.environments.iter().filter(|e| e.credential.is_some())
    }

    pub fn credentials(&self) -> Vec<String> {
        self.environments
            .iter()
            .filter_map(|e| e.credential.clone())
            .collect()
    }
}
