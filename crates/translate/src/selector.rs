//! Label selectors: topology term matching and cluster-scoped name rewriting.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{TopologySelectorLabelRequirement, TopologySelectorTerm};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::names::NameTranslator;

static NAME_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("static regex"));
static DNS_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("invalid label key {0:?}")]
    InvalidKey(String),
    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("operator {op:?} on key {key:?} needs {expect}")]
    ValueCount { key: String, op: Operator, expect: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    op: Operator,
    values: Vec<String>,
}

impl Requirement {
    pub fn new(key: &str, op: Operator, values: &[String]) -> Result<Self, SelectorError> {
        if !is_qualified_name(key) {
            return Err(SelectorError::InvalidKey(key.to_string()));
        }
        match op {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(SelectorError::ValueCount { key: key.to_string(), op, expect: "at least one value" });
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(SelectorError::ValueCount { key: key.to_string(), op, expect: "no values" });
            }
            _ => {}
        }
        if let Some(bad) = values.iter().find(|v| !is_label_value(v)) {
            return Err(SelectorError::InvalidValue { key: key.to_string(), value: bad.clone() });
        }
        Ok(Self { key: key.to_string(), op, values: values.to_vec() })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.op {
            Operator::In => labels.get(&self.key).map(|v| self.values.contains(v)).unwrap_or(false),
            Operator::NotIn => labels.get(&self.key).map(|v| !self.values.contains(v)).unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// Conjunction of requirements, or the selector that matches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Nothing,
    All(Vec<Requirement>),
}

impl Selector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Selector::Nothing => false,
            Selector::All(reqs) => reqs.iter().all(|r| r.matches(labels)),
        }
    }
}

/// Each expression becomes `key In values`; an empty list selects nothing.
pub fn topology_requirements_as_selector(
    reqs: &[TopologySelectorLabelRequirement],
) -> Result<Selector, SelectorError> {
    if reqs.is_empty() {
        return Ok(Selector::Nothing);
    }
    let reqs = reqs
        .iter()
        .map(|r| Requirement::new(&r.key, Operator::In, &r.values))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Selector::All(reqs))
}

/// Terms are ORed, expressions within a term ANDed.
///
/// An empty term list matches everything. A term without expressions, or with
/// a malformed expression, is skipped.
pub fn match_topology_selector_terms(terms: &[TopologySelectorTerm], labels: &BTreeMap<String, String>) -> bool {
    if terms.is_empty() {
        return true;
    }
    terms.iter().any(|term| {
        let exprs = term.match_label_expressions.as_deref().unwrap_or_default();
        if exprs.is_empty() {
            return false;
        }
        match topology_requirements_as_selector(exprs) {
            Ok(sel) => sel.matches(labels),
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed topology term");
                false
            }
        }
    })
}

/// Copy of `selector` with values of cluster-scoped reference keys rewritten to
/// their physical names. Other entries, including malformed ones, pass through.
pub fn translate_label_selector_cluster(
    names: &NameTranslator,
    reference_keys: &[String],
    target_namespace: &str,
    selector: &LabelSelector,
) -> LabelSelector {
    let is_ref = |k: &str| reference_keys.iter().any(|r| r == k);
    let mut out = selector.clone();
    if let Some(labels) = out.match_labels.as_mut() {
        for (k, v) in labels.iter_mut() {
            if is_ref(k) && !v.is_empty() {
                *v = names.physical_name_cluster_scoped(v, target_namespace);
            }
        }
    }
    if let Some(exprs) = out.match_expressions.as_mut() {
        for expr in exprs.iter_mut().filter(|e| is_ref(&e.key)) {
            if let Some(values) = expr.values.as_mut() {
                for v in values.iter_mut() {
                    *v = names.physical_name_cluster_scoped(v, target_namespace);
                }
            }
        }
    }
    out
}

fn is_qualified_name(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };
    if let Some(p) = prefix {
        if p.is_empty() || p.len() > 253 || !DNS_SUBDOMAIN.is_match(p) {
            return false;
        }
    }
    !name.is_empty() && name.len() <= 63 && NAME_PART.is_match(name)
}

fn is_label_value(v: &str) -> bool {
    v.is_empty() || (v.len() <= 63 && NAME_PART.is_match(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn term(exprs: &[(&str, &[&str])]) -> TopologySelectorTerm {
        TopologySelectorTerm {
            match_label_expressions: Some(
                exprs
                    .iter()
                    .map(|(k, vs)| TopologySelectorLabelRequirement {
                        key: k.to_string(),
                        values: vs.iter().map(|v| v.to_string()).collect(),
                    })
                    .collect(),
            ),
        }
    }

    #[test]
    fn empty_term_list_matches_everything() {
        assert!(match_topology_selector_terms(&[], &labels(&[])));
        assert!(match_topology_selector_terms(&[], &labels(&[("zone", "a")])));
    }

    #[test]
    fn term_without_expressions_matches_nothing() {
        let terms = vec![TopologySelectorTerm { match_label_expressions: None }, term(&[])];
        assert!(!match_topology_selector_terms(&terms, &labels(&[("zone", "a")])));
    }

    #[test]
    fn in_requirement_matches_listed_values() {
        let terms = vec![term(&[("zone", &["a", "b"])])];
        assert!(match_topology_selector_terms(&terms, &labels(&[("zone", "b")])));
        assert!(!match_topology_selector_terms(&terms, &labels(&[("zone", "c")])));
        assert!(!match_topology_selector_terms(&terms, &labels(&[])));
    }

    #[test]
    fn expressions_within_term_are_anded_terms_ored() {
        let terms = vec![
            term(&[("zone", &["a"]), ("disk", &["ssd"])]),
            term(&[("region", &["eu"])]),
        ];
        assert!(!match_topology_selector_terms(&terms, &labels(&[("zone", "a")])));
        assert!(match_topology_selector_terms(&terms, &labels(&[("zone", "a"), ("disk", "ssd")])));
        assert!(match_topology_selector_terms(&terms, &labels(&[("region", "eu")])));
    }

    #[test]
    fn malformed_term_is_skipped_and_scan_continues() {
        let terms = vec![
            term(&[("bad key!", &["a"])]),
            term(&[("zone", &[])]),
            term(&[("zone", &["a"])]),
        ];
        assert!(match_topology_selector_terms(&terms, &labels(&[("zone", "a")])));
        assert!(!match_topology_selector_terms(&terms[..2], &labels(&[("zone", "a")])));
    }

    #[test]
    fn requirement_validation() {
        assert!(Requirement::new("topology.kubernetes.io/zone", Operator::In, &["a".into()]).is_ok());
        assert!(matches!(Requirement::new("/zone", Operator::In, &["a".into()]), Err(SelectorError::InvalidKey(_))));
        assert!(matches!(
            Requirement::new("zone", Operator::In, &["-bad".into()]),
            Err(SelectorError::InvalidValue { .. })
        ));
        assert!(matches!(
            Requirement::new("zone", Operator::Exists, &["a".into()]),
            Err(SelectorError::ValueCount { .. })
        ));
    }

    #[test]
    fn not_in_and_exists_operators() {
        let l = labels(&[("zone", "a")]);
        assert!(Requirement::new("zone", Operator::NotIn, &["b".into()]).unwrap().matches(&l));
        assert!(Requirement::new("disk", Operator::NotIn, &["b".into()]).unwrap().matches(&l));
        assert!(Requirement::new("zone", Operator::Exists, &[]).unwrap().matches(&l));
        assert!(Requirement::new("disk", Operator::DoesNotExist, &[]).unwrap().matches(&l));
    }

    #[test]
    fn cluster_selector_rewrites_only_reference_keys() {
        let names = NameTranslator::new("vc");
        let keys = vec!["kubernetes.io/metadata.name".to_string()];
        let input = LabelSelector {
            match_labels: Some(
                [("kubernetes.io/metadata.name".to_string(), "pv-a".to_string()), ("app".to_string(), "db".to_string())]
                    .into_iter()
                    .collect(),
            ),
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "kubernetes.io/metadata.name".into(),
                    operator: "In".into(),
                    values: Some(vec!["pv-b".into()]),
                },
                LabelSelectorRequirement { key: "tier".into(), operator: "In".into(), values: Some(vec!["gold".into()]) },
                LabelSelectorRequirement { key: "kubernetes.io/metadata.name".into(), operator: "Exists".into(), values: None },
            ]),
        };
        let before = input.clone();
        let out = translate_label_selector_cluster(&names, &keys, "host", &input);
        assert_eq!(input, before, "input must not be mutated");
        let ml = out.match_labels.as_ref().unwrap();
        assert_eq!(ml["kubernetes.io/metadata.name"], "vsync-pv-a-x-host-x-vc");
        assert_eq!(ml["app"], "db");
        let me = out.match_expressions.as_ref().unwrap();
        assert_eq!(me[0].values.as_deref().unwrap(), ["vsync-pv-b-x-host-x-vc".to_string()]);
        assert_eq!(me[1], before.match_expressions.as_ref().unwrap()[1]);
        assert_eq!(me[2].values, None);
    }
}
