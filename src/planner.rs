use anyhow::{Context, Result};

use crate::config::{Configuration, SegmentSource};
use crate::taxonomy::ResolvedSegmentSet;

/// One (reference, compared) evaluation unit for one role under one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonPair {
    pub method: String,
    pub role: usize,
    pub reference: Option<String>,
    pub compared: Option<String>,
}

fn source_label(
    source: &SegmentSource,
    role: usize,
    resolved: &ResolvedSegmentSet,
    config: &Configuration,
) -> Result<Option<String>> {
    match source {
        SegmentSource::Manual => Ok(resolved.get(role).map(ToOwned::to_owned)),
        SegmentSource::Automatic(name) => {
            let method = config
                .automatic_method(name)
                .with_context(|| format!("unknown automatic method {name:?}"))?;
            let label = method.segments.get(role).with_context(|| {
                format!("automatic method {name} has no segment for role {role}")
            })?;
            Ok(Some(label.clone()))
        }
    }
}

/// Methods in configured order, roles in taxonomy order.
pub fn plan(resolved: &ResolvedSegmentSet, config: &Configuration) -> Result<Vec<ComparisonPair>> {
    let mut pairs = Vec::with_capacity(config.comparisons.len() * config.role_count());

    for comparison in &config.comparisons {
        for role in 0..config.role_count() {
            pairs.push(ComparisonPair {
                method: comparison.name.clone(),
                role,
                reference: source_label(&comparison.reference, role, resolved, config)?,
                compared: source_label(&comparison.compared, role, resolved, config)?,
            });
        }
    }

    Ok(pairs)
}
