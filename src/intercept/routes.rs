//! Request classification into caching strategies.

use std::fmt;
use std::str::FromStr;

use reqwest::Method;
use serde::Deserialize;

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  /// Serve from cache, fall back to the network on a miss
  CacheFirst,
  /// Try the network, fall back to cache on failure
  NetworkFirst,
  /// Serve from cache immediately and refresh in the background
  StaleWhileRevalidate,
  /// Never cached, never served from cache
  NetworkOnly,
}

impl Strategy {
  pub fn as_str(&self) -> &'static str {
    match self {
      Strategy::CacheFirst => "cache-first",
      Strategy::NetworkFirst => "network-first",
      Strategy::StaleWhileRevalidate => "stale-while-revalidate",
      Strategy::NetworkOnly => "network-only",
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Strategy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cache-first" => Ok(Strategy::CacheFirst),
      "network-first" => Ok(Strategy::NetworkFirst),
      "stale-while-revalidate" => Ok(Strategy::StaleWhileRevalidate),
      "network-only" => Ok(Strategy::NetworkOnly),
      other => Err(format!("unknown strategy '{}'", other)),
    }
  }
}

/// What part of the path a rule looks at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMatch {
  Exact(String),
  Prefix(String),
  /// File extension without the dot
  Extension(String),
}

impl PathMatch {
  fn matches(&self, path: &str) -> bool {
    match self {
      PathMatch::Exact(p) => path == p,
      PathMatch::Prefix(p) => path.starts_with(p.as_str()),
      PathMatch::Extension(ext) => path
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .is_some_and(|(_, e)| e.eq_ignore_ascii_case(ext)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteRule {
  #[serde(rename = "match")]
  pub path: PathMatch,
  pub strategy: Strategy,
}

impl RouteRule {
  pub fn new(path: PathMatch, strategy: Strategy) -> Self {
    Self { path, strategy }
  }
}

/// Ordered rule list; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
  rules: Vec<RouteRule>,
  auth_prefix: String,
  fallback: Strategy,
}

const STATIC_EXTENSIONS: &[&str] = &["js", "css", "png", "svg", "ico", "woff2", "webmanifest"];

impl Default for RouteTable {
  fn default() -> Self {
    let mut rules = vec![
      RouteRule::new(
        PathMatch::Exact("/catalog".into()),
        Strategy::StaleWhileRevalidate,
      ),
      RouteRule::new(PathMatch::Prefix("/catalog/".into()), Strategy::CacheFirst),
      RouteRule::new(PathMatch::Prefix("/records".into()), Strategy::NetworkFirst),
    ];
    rules.extend(
      STATIC_EXTENSIONS
        .iter()
        .map(|ext| RouteRule::new(PathMatch::Extension((*ext).into()), Strategy::CacheFirst)),
    );

    Self {
      rules,
      auth_prefix: "/auth".into(),
      fallback: Strategy::NetworkFirst,
    }
  }
}

impl RouteTable {
  /// Default table with `overrides` consulted before the built-in rules.
  pub fn with_overrides(overrides: Vec<RouteRule>) -> Self {
    let mut table = Self::default();
    let mut rules = overrides;
    rules.append(&mut table.rules);
    table.rules = rules;
    table
  }

  /// Pick the strategy for a request. `path` is relative to the service root.
  ///
  /// Mutations and auth requests are always network-only, whatever the rules say.
  pub fn classify(&self, method: &Method, path: &str) -> Strategy {
    if *method != Method::GET || path.starts_with(self.auth_prefix.as_str()) {
      return Strategy::NetworkOnly;
    }

    self
      .rules
      .iter()
      .find(|rule| rule.path.matches(path))
      .map(|rule| rule.strategy)
      .unwrap_or(self.fallback)
  }
}
