pub mod pattern;

use http::Method;
use log::info;
use pattern::{PathPattern, PathTemplate};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("No route matches {method} {path}")]
    NoRouteFound { method: Method, path: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid route '{pattern}': {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("Failed to read route file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse route file: {0}")]
    Parse(String),
}

/// Retry policy for connect failures and timeouts; one attempt means no retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    #[serde(alias = "MaxAttempts")]
    pub max_attempts: u32,
    #[serde(default, alias = "BackoffMs")]
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_attempts: 1,
        backoff_ms: 0,
    };

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

/// A route as written in the route file. Ocelot style key names are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteDefinition {
    #[serde(alias = "UpstreamPathTemplate")]
    pub upstream_path: String,
    #[serde(default, alias = "UpstreamHttpMethod")]
    pub methods: Vec<String>,
    /// Base URL of the upstream service
    #[serde(alias = "DownstreamBaseUrl")]
    pub downstream: String,
    #[serde(default, alias = "DownstreamPathTemplate")]
    pub downstream_path: Option<String>,
    #[serde(default, alias = "RequiredScope")]
    pub required_scope: Option<String>,
    #[serde(default, alias = "TimeoutSecs")]
    pub timeout_secs: Option<u64>,
    #[serde(default, alias = "RetryPolicy")]
    pub retry: Option<RetryPolicy>,
}

/// On-disk route file layout
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteFile {
    #[serde(default, alias = "Routes")]
    pub routes: Vec<RouteDefinition>,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: PathPattern,
    /// Empty means any method
    pub methods: Vec<Method>,
    pub downstream: Url,
    pub downstream_path: Option<PathTemplate>,
    pub required_scope: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Route {
    pub fn from_definition(
        definition: RouteDefinition,
        default_timeout: Duration,
    ) -> Result<Self, RouteError> {
        let pattern = PathPattern::parse(&definition.upstream_path)?;
        let invalid = |reason: String| RouteError::InvalidRoute {
            pattern: definition.upstream_path.clone(),
            reason,
        };

        let methods = definition
            .methods
            .iter()
            .map(|method| {
                Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| invalid(format!("unknown method '{}'", method)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let downstream = Url::parse(&definition.downstream)
            .map_err(|e| invalid(format!("invalid downstream '{}': {}", definition.downstream, e)))?;
        if !matches!(downstream.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "unsupported downstream scheme '{}'",
                downstream.scheme()
            )));
        }

        let downstream_path = definition
            .downstream_path
            .as_deref()
            .map(|template| PathTemplate::parse(template, &pattern))
            .transpose()?;

        let retry = definition.retry.unwrap_or_default();
        if retry.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1".to_string()));
        }
        let timeout = match definition.timeout_secs {
            Some(0) => return Err(invalid("timeout must be positive".to_string())),
            Some(secs) => Duration::from_secs(secs),
            None => default_timeout,
        };

        Ok(Self {
            pattern,
            methods,
            downstream,
            downstream_path,
            required_scope: definition.required_scope.filter(|scope| !scope.is_empty()),
            timeout,
            retry,
        })
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    /// Downstream path for an inbound path this route matched
    pub fn downstream_path(&self, path: &str, captures: &pattern::Captures) -> String {
        match &self.downstream_path {
            Some(template) if self.pattern.is_prefix() => {
                let base = template.render(captures);
                let rest = self.pattern.remainder(path);
                format!("{}{}", base.trim_end_matches('/'), rest)
            }
            Some(template) => template.render(captures),
            None => path.to_string(),
        }
    }

    /// Full upstream URL, keeping the inbound query string
    pub fn target_url(&self, path: &str, captures: &pattern::Captures, query: Option<&str>) -> String {
        let base = self.downstream.as_str().trim_end_matches('/');
        let downstream_path = self.downstream_path(path, captures);
        let downstream_path = if downstream_path.is_empty() {
            "/"
        } else {
            downstream_path.as_str()
        };
        match query {
            Some(query) if !query.is_empty() => format!("{}{}?{}", base, downstream_path, query),
            _ => format!("{}{}", base, downstream_path),
        }
    }
}

/// Result of a successful route lookup
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub captures: pattern::Captures,
}

/// Ordered, immutable list of routes; the first match wins
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn from_file_contents(file: RouteFile, default_timeout: Duration) -> Result<Self, RouteError> {
        let routes = file
            .routes
            .into_iter()
            .map(|definition| Route::from_definition(definition, default_timeout))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(routes))
    }

    pub fn from_json(json: &str, default_timeout: Duration) -> Result<Self, RouteError> {
        let file: RouteFile =
            serde_json::from_str(json).map_err(|e| RouteError::Parse(e.to_string()))?;
        Self::from_file_contents(file, default_timeout)
    }

    pub fn from_file(path: impl AsRef<Path>, default_timeout: Duration) -> Result<Self, RouteError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| RouteError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let table = Self::from_json(&contents, default_timeout)?;
        info!("Loaded {} routes from {}", table.len(), path.display());
        Ok(table)
    }

    /// Find the first route whose pattern and method match the request
    pub fn match_route(&self, method: &Method, path: &str) -> Result<RouteMatch<'_>, RouteError> {
        self.routes
            .iter()
            .filter(|route| route.allows_method(method))
            .find_map(|route| {
                route
                    .pattern
                    .matches(path)
                    .map(|captures| RouteMatch { route, captures })
            })
            .ok_or_else(|| RouteError::NoRouteFound {
                method: method.clone(),
                path: path.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
