//! Name/namespace scope rules and label selectors.

use std::collections::BTreeMap;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A scope rule as written in configuration.
///
/// Absent fields match anything. At least one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeRuleDef {
    /// Glob over the resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Glob over the resource namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Label selector (`app=web,tier!=db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
}

impl ScopeRuleDef {
    /// Creates a rule over name and namespace globs.
    #[must_use]
    pub fn new(name: Option<&str>, namespace: Option<&str>) -> Self {
        Self {
            name: name.map(ToString::to_string),
            namespace: namespace.map(ToString::to_string),
            labels: None,
        }
    }
}

/// A compiled scope rule.
#[derive(Debug, Clone)]
pub struct ScopeRule {
    name: Option<Pattern>,
    namespace: Option<Pattern>,
    labels: Option<LabelSelector>,
}

fn compile_glob(field: &str, glob: &str) -> Result<Pattern> {
    Pattern::new(glob).map_err(|e| EngineError::config(format!("invalid {field} glob '{glob}': {e}")))
}

impl ScopeRule {
    /// Compiles a rule.
    pub fn compile(def: &ScopeRuleDef) -> Result<Self> {
        if def.name.is_none() && def.namespace.is_none() && def.labels.is_none() {
            return Err(EngineError::config(
                "scope rule must set at least one of name, namespace, labels",
            ));
        }
        Ok(Self {
            name: def.name.as_deref().map(|g| compile_glob("name", g)).transpose()?,
            namespace: def
                .namespace
                .as_deref()
                .map(|g| compile_glob("namespace", g))
                .transpose()?,
            labels: def.labels.as_deref().map(LabelSelector::parse).transpose()?,
        })
    }

    /// Returns true if every field set on the rule matches.
    ///
    /// A rule with a name or namespace glob never matches a resource
    /// missing that attribute.
    #[must_use]
    pub fn matches(
        &self,
        name: Option<&str>,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        let glob_ok = |pattern: &Option<Pattern>, value: Option<&str>| match pattern {
            None => true,
            Some(p) => value.is_some_and(|v| p.matches(v)),
        };
        glob_ok(&self.name, name)
            && glob_ok(&self.namespace, namespace)
            && self.labels.as_ref().is_none_or(|s| s.matches(labels))
    }
}

/// Include/exclude scope compiled from configuration.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    include: Vec<ScopeRule>,
    exclude: Vec<ScopeRule>,
}

impl Scope {
    /// Compiles include and exclude lists.
    pub fn compile(include: &[ScopeRuleDef], exclude: &[ScopeRuleDef]) -> Result<Self> {
        Ok(Self {
            include: include.iter().map(ScopeRule::compile).collect::<Result<_>>()?,
            exclude: exclude.iter().map(ScopeRule::compile).collect::<Result<_>>()?,
        })
    }

    /// Returns true if any exclusion rule matches.
    #[must_use]
    pub fn is_excluded(
        &self,
        name: Option<&str>,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        self.exclude.iter().any(|r| r.matches(name, namespace, labels))
    }

    /// Returns true if there is no include list or any include rule matches.
    #[must_use]
    pub fn is_included(
        &self,
        name: Option<&str>,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        self.include.is_empty() || self.include.iter().any(|r| r.matches(name, namespace, labels))
    }

    /// Exclusion first, then inclusion.
    #[must_use]
    pub fn admits(
        &self,
        name: Option<&str>,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        !self.is_excluded(name, namespace, labels) && self.is_included(name, namespace, labels)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelRequirement {
    Equals(String, String),
    NotEquals(String, String),
}

/// Equality-based Kubernetes label selector: `a=b,c!=d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    /// Parses a selector string.
    pub fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((key, value)) = term.split_once("!=") {
                LabelRequirement::NotEquals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = term.split_once('=') {
                let value = value.strip_prefix('=').unwrap_or(value);
                LabelRequirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else {
                return Err(EngineError::config(format!(
                    "invalid label selector term '{term}', expected key=value"
                )));
            };
            requirements.push(requirement);
        }
        if requirements.is_empty() {
            return Err(EngineError::config("label selector is empty"));
        }
        Ok(Self { requirements })
    }

    /// Returns true if every requirement holds.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| match r {
            LabelRequirement::Equals(k, v) => labels.get(k) == Some(v),
            LabelRequirement::NotEquals(k, v) => labels.get(k) != Some(v),
        })
    }
}

/// Returns true if no prefix is configured or the value starts with it.
#[must_use]
pub fn prefix_matches(prefix: Option<&str>, value: Option<&str>) -> bool {
    match prefix {
        None => true,
        Some(p) => value.is_some_and(|v| v.starts_with(p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    mod rule_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(Some("p*"), None, "p1", "ns1", true ; "name glob")]
        #[test_case(None, Some("kube-*"), "p1", "kube-system", true ; "namespace glob")]
        #[test_case(Some("p1"), Some("ns1"), "p1", "ns2", false ; "both must match")]
        #[test_case(Some("web-?"), None, "web-12", "ns1", false ; "single char wildcard")]
        fn glob_matching(name: Option<&str>, ns: Option<&str>, n: &str, s: &str, expected: bool) {
            let rule = ScopeRule::compile(&ScopeRuleDef::new(name, ns)).unwrap();
            assert_eq!(rule.matches(Some(n), Some(s), &BTreeMap::new()), expected);
        }

        #[test]
        fn empty_rule_is_rejected() {
            let err = ScopeRule::compile(&ScopeRuleDef::default()).unwrap_err();
            assert!(err.is_config_error());
        }

        #[test]
        fn invalid_glob_is_rejected() {
            assert!(ScopeRule::compile(&ScopeRuleDef::new(Some("[abc"), None)).is_err());
        }

        #[test]
        fn missing_attribute_does_not_match_glob() {
            let rule = ScopeRule::compile(&ScopeRuleDef::new(None, Some("*"))).unwrap();
            assert!(!rule.matches(Some("node-1"), None, &BTreeMap::new()));
        }
    }

    mod scope_tests {
        use super::*;

        #[test]
        fn exclusion_beats_inclusion() {
            let scope = Scope::compile(
                &[ScopeRuleDef::new(None, Some("ns1"))],
                &[ScopeRuleDef::new(Some("p1"), Some("ns1"))],
            )
            .unwrap();
            assert!(!scope.admits(Some("p1"), Some("ns1"), &BTreeMap::new()));
            assert!(scope.admits(Some("p2"), Some("ns1"), &BTreeMap::new()));
            assert!(!scope.admits(Some("p2"), Some("ns2"), &BTreeMap::new()));
        }

        #[test]
        fn empty_scope_admits_everything() {
            let scope = Scope::default();
            assert!(scope.admits(None, None, &BTreeMap::new()));
        }
    }

    mod selector_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn equality_and_inequality() {
            let selector = LabelSelector::parse("app=web, tier!=db").unwrap();
            assert!(selector.matches(&labels(&[("app", "web"), ("tier", "front")])));
            assert!(selector.matches(&labels(&[("app", "web")])));
            assert!(!selector.matches(&labels(&[("app", "web"), ("tier", "db")])));
            assert!(!selector.matches(&labels(&[("app", "api")])));
        }

        #[test]
        fn double_equals_is_accepted() {
            let selector = LabelSelector::parse("app==web").unwrap();
            assert!(selector.matches(&labels(&[("app", "web")])));
        }

        #[test_case("" ; "empty")]
        #[test_case("app" ; "no operator")]
        fn invalid_selectors(input: &str) {
            assert!(LabelSelector::parse(input).is_err());
        }
    }

    #[test]
    fn prefix_filter() {
        assert!(prefix_matches(None, None));
        assert!(prefix_matches(Some("web"), Some("web-1")));
        assert!(!prefix_matches(Some("web"), Some("api-1")));
        assert!(!prefix_matches(Some("web"), None));
    }

    proptest! {
        #[test]
        fn exact_exclusion_always_excludes(name in "[a-z][a-z0-9-]{0,20}", ns in "[a-z][a-z0-9-]{0,20}") {
            let scope = Scope::compile(&[], &[ScopeRuleDef::new(Some(&name), Some(&ns))]).unwrap();
            prop_assert!(scope.is_excluded(Some(&name), Some(&ns), &BTreeMap::new()));
        }
    }
}
