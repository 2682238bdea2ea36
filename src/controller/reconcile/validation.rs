//! # Spec Validation
//!
//! §4.4 step 1: profile shape, duration bounds, and `dependsOn` cycle
//! detection. Failures set `ProfilesValid=False` with a stable reason and
//! abort the reconcile without requeuing on a timer (§7 "Validation").
//!
//! Conflict resolution between profiles is an explicit Open Question in
//! the source material; this implementation takes the documented decision
//! (a validation error, not last-write-wins — see DESIGN.md) and checks it
//! here as `MappingConflict`.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::crd::GatewaySyncSpec;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("profile '{0}' has no mappings")]
    EmptyProfile(String),
    #[error("profile '{profile}' syncPeriodSeconds {value} is out of bounds [5, 3600]")]
    SyncPeriodOutOfBounds { profile: String, value: u32 },
    #[error("polling.intervalSeconds {0} is below the 5s minimum")]
    PollingIntervalTooShort(u32),
    #[error("profile '{profile}' dependsOn references unknown profile '{target}'")]
    UnknownDependency { profile: String, target: String },
    #[error("cyclic dependsOn detected among profiles: {0:?}")]
    CycleDetected(Vec<String>),
    #[error(
        "profiles '{a}' and '{b}' both map destination '{destination}' \
         (v0.3+ treats this as a conflict rather than last-write-wins)"
    )]
    MappingConflict {
        a: String,
        b: String,
        destination: String,
    },
}

impl ValidationError {
    /// Stable reason string for the `ProfilesValid` condition (§4.4 step 7).
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::EmptyProfile(_) => "EmptyProfile",
            ValidationError::SyncPeriodOutOfBounds { .. } => "SyncPeriodOutOfBounds",
            ValidationError::PollingIntervalTooShort(_) => "PollingIntervalTooShort",
            ValidationError::UnknownDependency { .. } => "UnknownDependency",
            ValidationError::CycleDetected(_) => "CycleDetected",
            ValidationError::MappingConflict { .. } => "MappingConflict",
        }
    }
}

/// Runs every structural check in order, returning the first failure.
pub fn validate_spec(spec: &GatewaySyncSpec) -> Result<(), ValidationError> {
    if spec.polling.interval_seconds < 5 {
        return Err(ValidationError::PollingIntervalTooShort(
            spec.polling.interval_seconds,
        ));
    }

    for (name, profile) in &spec.profiles {
        if profile.mappings.is_empty() {
            return Err(ValidationError::EmptyProfile(name.clone()));
        }
        if !(5..=3600).contains(&profile.sync_period_seconds) {
            return Err(ValidationError::SyncPeriodOutOfBounds {
                profile: name.clone(),
                value: profile.sync_period_seconds,
            });
        }
        for dep in &profile.depends_on {
            if !spec.profiles.contains_key(&dep.profile_name) {
                return Err(ValidationError::UnknownDependency {
                    profile: name.clone(),
                    target: dep.profile_name.clone(),
                });
            }
        }
    }

    validate_no_cyclic_depends_on(spec)?;
    validate_no_mapping_conflicts(spec)?;
    Ok(())
}

/// Computes the transitive closure of the `dependsOn` graph and rejects any
/// cycle (§9 "Cyclic dependencies"). `dependsOn` is documented as
/// single-level, but a cycle can still form across two or more profiles
/// (A depends on B, B depends on A), so a general DFS is used rather than a
/// depth check.
fn validate_no_cyclic_depends_on(spec: &GatewaySyncSpec) -> Result<(), ValidationError> {
    let edges: HashMap<&str, Vec<&str>> = spec
        .profiles
        .iter()
        .map(|(name, profile)| {
            let deps: Vec<&str> = profile
                .depends_on
                .iter()
                .map(|d| d.profile_name.as_str())
                .collect();
            (name.as_str(), deps)
        })
        .collect();

    #[derive(PartialEq, Clone, Copy)]
    enum State {
        Visiting,
        Done,
    }

    let mut state: HashMap<&str, State> = HashMap::new();

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        state: &mut HashMap<&'a str, State>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), ValidationError> {
        match state.get(node) {
            Some(State::Done) => return Ok(()),
            Some(State::Visiting) => {
                let cycle_start = stack.iter().position(|n| *n == node).unwrap_or(0);
                return Err(ValidationError::CycleDetected(
                    stack[cycle_start..].iter().map(|s| s.to_string()).collect(),
                ));
            }
            None => {}
        }
        state.insert(node, State::Visiting);
        stack.push(node);
        if let Some(deps) = edges.get(node) {
            for dep in deps {
                visit(dep, edges, state, stack)?;
            }
        }
        stack.pop();
        state.insert(node, State::Done);
        Ok(())
    }

    let mut stack = Vec::new();
    for name in edges.keys() {
        if !state.contains_key(name) {
            visit(name, &edges, &mut state, &mut stack)?;
        }
    }
    Ok(())
}

/// Over-approximate static conflict check: two profiles whose mappings
/// share an identical pre-template destination string conflict regardless
/// of runtime label values. Conflicts that only arise after template
/// expansion (e.g. `{{.Labels.site}}`) are not caught here and remain a
/// per-gateway runtime path-safety check in the sync engine.
fn validate_no_mapping_conflicts(spec: &GatewaySyncSpec) -> Result<(), ValidationError> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    let mut profile_names: Vec<&String> = spec.profiles.keys().collect();
    profile_names.sort();

    for name in profile_names {
        let profile = &spec.profiles[name];
        let mut destinations_in_profile: HashSet<&str> = HashSet::new();
        for mapping in &profile.mappings {
            destinations_in_profile.insert(mapping.destination.as_str());
        }
        for destination in destinations_in_profile {
            if let Some(other) = seen.get(destination) {
                if *other != name.as_str() {
                    return Err(ValidationError::MappingConflict {
                        a: (*other).to_string(),
                        b: name.clone(),
                        destination: destination.to_string(),
                    });
                }
            } else {
                seen.insert(destination, name.as_str());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DependsOn, GitSource, Mapping, MappingType, Polling, ProfileSpec};
    use std::collections::BTreeMap;

    fn base_spec() -> GatewaySyncSpec {
        GatewaySyncSpec {
            git_source: GitSource {
                repo_url: "https://example.com/repo.git".to_string(),
                r#ref: "main".to_string(),
                auth: None,
            },
            polling: Polling {
                enabled: true,
                interval_seconds: 60,
            },
            gateway: Default::default(),
            exclude_patterns: Vec::new(),
            agent: Default::default(),
            profiles: BTreeMap::new(),
            paused: false,
        }
    }

    fn profile_with_mapping(destination: &str) -> ProfileSpec {
        ProfileSpec {
            mappings: vec![Mapping {
                source: "projects/".to_string(),
                destination: destination.to_string(),
                r#type: MappingType::Dir,
                required: true,
            }],
            exclude_patterns: Vec::new(),
            variables: BTreeMap::new(),
            sync_period_seconds: 30,
            dry_run: false,
            designer_session_policy: crate::crd::DesignerSessionPolicy::Proceed,
            paused: false,
            depends_on: Vec::new(),
        }
    }

    #[test]
    fn empty_profile_rejected() {
        let mut spec = base_spec();
        spec.profiles.insert(
            "default".to_string(),
            ProfileSpec {
                mappings: Vec::new(),
                ..profile_with_mapping("projects/")
            },
        );
        assert_eq!(
            validate_spec(&spec),
            Err(ValidationError::EmptyProfile("default".to_string()))
        );
    }

    #[test]
    fn direct_cycle_detected() {
        let mut spec = base_spec();
        let mut a = profile_with_mapping("a/");
        a.depends_on.push(DependsOn {
            profile_name: "b".to_string(),
            condition: "Synced".to_string(),
        });
        let mut b = profile_with_mapping("b/");
        b.depends_on.push(DependsOn {
            profile_name: "a".to_string(),
            condition: "Synced".to_string(),
        });
        spec.profiles.insert("a".to_string(), a);
        spec.profiles.insert("b".to_string(), b);
        assert!(matches!(
            validate_spec(&spec),
            Err(ValidationError::CycleDetected(_))
        ));
    }

    #[test]
    fn overlapping_destination_across_profiles_is_conflict() {
        let mut spec = base_spec();
        spec.profiles
            .insert("a".to_string(), profile_with_mapping("projects/"));
        spec.profiles
            .insert("b".to_string(), profile_with_mapping("projects/"));
        assert!(matches!(
            validate_spec(&spec),
            Err(ValidationError::MappingConflict { .. })
        ));
    }

    #[test]
    fn same_destination_within_one_profile_is_allowed() {
        let mut spec = base_spec();
        let mut profile = profile_with_mapping("projects/");
        profile.mappings.push(Mapping {
            source: "overlay/".to_string(),
            destination: "projects/".to_string(),
            r#type: MappingType::Dir,
            required: false,
        });
        spec.profiles.insert("default".to_string(), profile);
        assert!(validate_spec(&spec).is_ok());
    }
}
