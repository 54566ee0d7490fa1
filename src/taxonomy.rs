use std::collections::HashSet;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Configuration;

/// Where a raw label lands in the ordered category lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Automatic(usize),
    Ignored,
    Role(usize),
}

/// Ordered category table: automatic lists, ignored names, then roles in taxonomy order.
pub struct CategoryTable<'a> {
    entries: Vec<(Category, HashSet<&'a str>)>,
}

impl<'a> CategoryTable<'a> {
    pub fn new(config: &'a Configuration) -> Self {
        let mut entries = Vec::with_capacity(config.automatic_methods.len() + 1 + config.roles.len());

        for (index, method) in config.automatic_methods.iter().enumerate() {
            entries.push((
                Category::Automatic(index),
                method.segments.iter().map(String::as_str).collect(),
            ));
        }
        entries.push((
            Category::Ignored,
            config.ignored_names.iter().map(String::as_str).collect(),
        ));
        for (index, role) in config.roles.iter().enumerate() {
            entries.push((
                Category::Role(index),
                role.names.iter().map(String::as_str).collect(),
            ));
        }

        Self { entries }
    }

    pub fn classify(&self, label: &str) -> Option<Category> {
        self.entries
            .iter()
            .find(|(_, names)| names.contains(label))
            .map(|(category, _)| *category)
    }
}

/// One optional raw label per canonical role, in taxonomy order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSegmentSet {
    slots: Vec<Option<String>>,
}

impl ResolvedSegmentSet {
    pub fn unresolved(role_count: usize) -> Self {
        Self {
            slots: vec![None; role_count],
        }
    }

    pub fn get(&self, role: usize) -> Option<&str> {
        self.slots.get(role).and_then(|slot| slot.as_deref())
    }

    pub fn unresolved_roles(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub resolved: ResolvedSegmentSet,
    pub unknown_labels: Vec<String>,
    /// Labels matching a role whose slot was already taken, as (role, label).
    pub shadowed: Vec<(usize, String)>,
}

/// Classifies every raw label; the first label hitting a role fills its slot.
pub fn resolve(raw_labels: &[String], config: &Configuration) -> Resolution {
    let table = CategoryTable::new(config);
    let mut resolved = ResolvedSegmentSet::unresolved(config.role_count());
    let mut unknown_labels = Vec::new();
    let mut shadowed = Vec::new();

    for label in raw_labels {
        match table.classify(label) {
            Some(Category::Automatic(_)) | Some(Category::Ignored) => {}
            Some(Category::Role(role)) => match &resolved.slots[role] {
                None => resolved.slots[role] = Some(label.clone()),
                Some(existing) if existing == label => {}
                Some(_) => shadowed.push((role, label.clone())),
            },
            None => {
                if !unknown_labels.contains(label) {
                    unknown_labels.push(label.clone());
                }
            }
        }
    }

    Resolution {
        resolved,
        unknown_labels,
        shadowed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelDecision {
    Keep { role: usize },
    Discard,
}

/// Decides the fate of a label the configuration does not know.
pub trait LabelDecider {
    fn decide(&mut self, label: &str, config: &Configuration) -> Result<LabelDecision>;
}

impl<F> LabelDecider for F
where
    F: FnMut(&str, &Configuration) -> Result<LabelDecision>,
{
    fn decide(&mut self, label: &str, config: &Configuration) -> Result<LabelDecision> {
        self(label, config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyResolution {
    pub resolution: Resolution,
    /// Aliases appended to the configuration while resolving, as (role, label).
    pub added: Vec<(usize, String)>,
    pub discarded: Vec<String>,
}

impl StudyResolution {
    pub fn config_changed(&self) -> bool {
        !self.added.is_empty()
    }
}

/// Run-scoped resolver state: labels discarded once are never asked about again.
#[derive(Debug, Default)]
pub struct TaxonomyResolver {
    discarded: HashSet<String>,
}

impl TaxonomyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_discarded(&self, label: &str) -> bool {
        self.discarded.contains(label)
    }

    pub fn resolve_study(
        &mut self,
        raw_labels: &[String],
        config: &mut Configuration,
        decider: &mut dyn LabelDecider,
    ) -> Result<StudyResolution> {
        let first = resolve(raw_labels, config);

        // Answers are collected before any is applied: a failing decider
        // changes neither the configuration nor the discard set.
        let mut decisions = Vec::new();
        for label in &first.unknown_labels {
            if self.is_discarded(label) {
                continue;
            }
            decisions.push((label, decider.decide(label, config)?));
        }

        let mut extended = config.clone();
        let mut added = Vec::new();
        let mut discarded = Vec::new();
        for (label, decision) in decisions {
            match decision {
                LabelDecision::Keep { role } => {
                    if extended.add_role_alias(role, label)? {
                        added.push((role, label.clone()));
                    }
                }
                LabelDecision::Discard => discarded.push(label.clone()),
            }
        }

        for (role, label) in &added {
            info!(
                label = %label,
                role = %extended.roles[*role].name,
                "label added to configuration"
            );
        }
        for label in &discarded {
            info!(label = %label, "label discarded for this run");
            self.discarded.insert(label.clone());
        }
        *config = extended;

        let resolution = if added.is_empty() {
            first
        } else {
            resolve(raw_labels, config)
        };

        for (role, label) in &resolution.shadowed {
            warn!(
                role = %config.roles[*role].name,
                label = %label,
                kept = resolution.resolved.get(*role).unwrap_or_default(),
                "role matched more than one label; first match kept, later matches ignored"
            );
        }

        Ok(StudyResolution {
            resolution,
            added,
            discarded,
        })
    }
}
