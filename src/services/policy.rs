//! Policy engine.
//!
//! Policies are opaque source strings registered under a name. The engine
//! parses each into a rule list at registration time and evaluates
//! deterministically at two granularities: per resource and per module.
//! A subject is allowed iff no violations accumulate; a disabled engine
//! allows everything.
//!
//! Rule language, one rule per line (`#` starts a comment):
//!
//! ```text
//! deny type=<kind>
//! forbid property=<key> [type=<kind>]
//! require property=<key> type=<kind>
//! require resource=<id>
//! max_resources=<n>
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Module, Resource};

/// One violated rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub policy: String,
    pub rule: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

/// Outcome of a module evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub allowed: bool,
    pub violations: Vec<PolicyViolation>,
}

/// A parsed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    DenyType {
        kind: String,
    },
    ForbidProperty {
        key: String,
        kind: Option<String>,
    },
    RequireProperty {
        key: String,
        kind: String,
    },
    RequireResource {
        id: String,
    },
    MaxResources {
        limit: usize,
    },
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DenyType { kind } => write!(f, "deny type={kind}"),
            Self::ForbidProperty { key, kind: Some(kind) } => {
                write!(f, "forbid property={key} type={kind}")
            }
            Self::ForbidProperty { key, kind: None } => write!(f, "forbid property={key}"),
            Self::RequireProperty { key, kind } => {
                write!(f, "require property={key} type={kind}")
            }
            Self::RequireResource { id } => write!(f, "require resource={id}"),
            Self::MaxResources { limit } => write!(f, "max_resources={limit}"),
        }
    }
}

struct Policy {
    source: String,
    rules: Vec<Rule>,
}

fn parse_rules(policy_name: &str, source: &str) -> EngineResult<Vec<Rule>> {
    let mut rules = Vec::new();
    for (line_no, raw) in source.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let parse_error = |message: String| {
            EngineError::Config(format!(
                "policy {policy_name} line {}: {message}",
                line_no + 1
            ))
        };

        let mut parts = line.split_whitespace();
        let head = parts.next().unwrap_or("");
        let args: HashMap<&str, &str> = parts
            .filter_map(|part| part.split_once('='))
            .collect();

        let rule = match head {
            "deny" => Rule::DenyType {
                kind: args
                    .get("type")
                    .ok_or_else(|| parse_error("deny requires type=<kind>".to_string()))?
                    .to_string(),
            },
            "forbid" => Rule::ForbidProperty {
                key: args
                    .get("property")
                    .ok_or_else(|| parse_error("forbid requires property=<key>".to_string()))?
                    .to_string(),
                kind: args.get("type").map(|s| (*s).to_string()),
            },
            "require" => {
                if let Some(id) = args.get("resource") {
                    Rule::RequireResource { id: (*id).to_string() }
                } else if let Some(key) = args.get("property") {
                    Rule::RequireProperty {
                        key: (*key).to_string(),
                        kind: args
                            .get("type")
                            .ok_or_else(|| {
                                parse_error(
                                    "require property=<key> also needs type=<kind>".to_string(),
                                )
                            })?
                            .to_string(),
                    }
                } else {
                    return Err(parse_error(
                        "require needs resource=<id> or property=<key>".to_string(),
                    ));
                }
            }
            other => {
                if let Some((key, value)) = other.split_once('=') {
                    if key == "max_resources" {
                        Rule::MaxResources {
                            limit: value
                                .parse()
                                .map_err(|_| parse_error(format!("bad limit {value:?}")))?,
                        }
                    } else {
                        return Err(parse_error(format!("unknown rule {other:?}")));
                    }
                } else {
                    return Err(parse_error(format!("unknown rule {other:?}")));
                }
            }
        };
        rules.push(rule);
    }
    Ok(rules)
}

#[derive(Default)]
pub struct PolicyEngine {
    policies: RwLock<HashMap<String, Policy>>,
    disabled: AtomicBool,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a policy. The source is parsed eagerly so bad
    /// policies are rejected up front.
    pub async fn set_policy(
        &self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> EngineResult<()> {
        let name = name.into();
        let source = source.into();
        let rules = parse_rules(&name, &source)?;
        debug!(policy = %name, rules = rules.len(), "policy registered");
        let mut policies = self.policies.write().await;
        policies.insert(name, Policy { source, rules });
        Ok(())
    }

    pub async fn remove_policy(&self, name: &str) -> bool {
        let mut policies = self.policies.write().await;
        policies.remove(name).is_some()
    }

    pub async fn policy_source(&self, name: &str) -> Option<String> {
        let policies = self.policies.read().await;
        policies.get(name).map(|p| p.source.clone())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.disabled.store(!enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    /// Evaluate one resource against every registered policy.
    pub async fn evaluate_resource(&self, resource: &Resource) -> Vec<PolicyViolation> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let policies = self.policies.read().await;
        let mut violations = Vec::new();
        for (name, policy) in sorted(&policies) {
            for rule in &policy.rules {
                check_resource_rule(name, rule, resource, &mut violations);
            }
        }
        violations
    }

    /// Evaluate a module: resource-level rules over every resource plus
    /// module-level rules.
    pub async fn evaluate_module(&self, module: &Module) -> PolicyEvaluation {
        if !self.is_enabled() {
            return PolicyEvaluation {
                allowed: true,
                violations: Vec::new(),
            };
        }

        let policies = self.policies.read().await;
        let mut violations = Vec::new();

        for (name, policy) in sorted(&policies) {
            for rule in &policy.rules {
                match rule {
                    Rule::RequireResource { id } => {
                        if !module.spec.resources.iter().any(|r| &r.id() == id) {
                            violations.push(PolicyViolation {
                                policy: name.to_string(),
                                rule: rule.to_string(),
                                message: format!("module must declare resource {id}"),
                                resource_id: None,
                            });
                        }
                    }
                    Rule::MaxResources { limit } => {
                        let count = module.spec.resources.len();
                        if count > *limit {
                            violations.push(PolicyViolation {
                                policy: name.to_string(),
                                rule: rule.to_string(),
                                message: format!(
                                    "module declares {count} resources, limit is {limit}"
                                ),
                                resource_id: None,
                            });
                        }
                    }
                    _ => {
                        for resource in &module.spec.resources {
                            check_resource_rule(name, rule, resource, &mut violations);
                        }
                    }
                }
            }
        }

        PolicyEvaluation {
            allowed: violations.is_empty(),
            violations,
        }
    }
}

/// Deterministic evaluation order regardless of map iteration order.
fn sorted(policies: &HashMap<String, Policy>) -> Vec<(&String, &Policy)> {
    let mut entries: Vec<_> = policies.iter().collect();
    entries.sort_by_key(|(name, _)| name.as_str());
    entries
}

fn check_resource_rule(
    policy: &str,
    rule: &Rule,
    resource: &Resource,
    violations: &mut Vec<PolicyViolation>,
) {
    match rule {
        Rule::DenyType { kind } => {
            if &resource.resource_type == kind {
                violations.push(PolicyViolation {
                    policy: policy.to_string(),
                    rule: rule.to_string(),
                    message: format!("resources of type {kind} are denied"),
                    resource_id: Some(resource.id()),
                });
            }
        }
        Rule::ForbidProperty { key, kind } => {
            let applies = kind
                .as_ref()
                .map(|k| k == &resource.resource_type)
                .unwrap_or(true);
            if applies && resource.properties.contains_key(key) {
                violations.push(PolicyViolation {
                    policy: policy.to_string(),
                    rule: rule.to_string(),
                    message: format!("property {key} is forbidden"),
                    resource_id: Some(resource.id()),
                });
            }
        }
        Rule::RequireProperty { key, kind } => {
            if kind == &resource.resource_type && !resource.properties.contains_key(key) {
                violations.push(PolicyViolation {
                    policy: policy.to_string(),
                    rule: rule.to_string(),
                    message: format!("{kind} resources must declare property {key}"),
                    resource_id: Some(resource.id()),
                });
            }
        }
        Rule::RequireResource { .. } | Rule::MaxResources { .. } => {}
    }
}
