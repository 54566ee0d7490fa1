use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::util::write_json_pretty;

pub const MANUAL_SOURCE: &str = "manual";

/// The user-extensible naming taxonomy plus the comparison plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Canonical roles; their order is the column order of every study.
    pub roles: Vec<RoleConfig>,
    pub automatic_methods: Vec<AutomaticMethod>,
    #[serde(default)]
    pub ignored_names: Vec<String>,
    pub comparisons: Vec<ComparisonMethod>,
    #[serde(default)]
    pub layout: LayoutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    /// Single-letter answer used by the interactive prompt.
    pub key: String,
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomaticMethod {
    pub name: String,
    /// One raw label per role, aligned with `Configuration::roles`.
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonMethod {
    pub name: String,
    pub reference: SegmentSource,
    pub compared: SegmentSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SegmentSource {
    Manual,
    Automatic(String),
}

impl From<String> for SegmentSource {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case(MANUAL_SOURCE) {
            Self::Manual
        } else {
            Self::Automatic(value.trim().to_string())
        }
    }
}

impl From<SegmentSource> for String {
    fn from(value: SegmentSource) -> Self {
        match value {
            SegmentSource::Manual => MANUAL_SOURCE.to_string(),
            SegmentSource::Automatic(name) => name,
        }
    }
}

impl fmt::Display for SegmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str(MANUAL_SOURCE),
            Self::Automatic(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_image_pattern")]
    pub image_pattern: String,
    #[serde(default = "default_structure_pattern")]
    pub structure_pattern: String,
    #[serde(default = "default_image_folder")]
    pub image_folder: String,
    #[serde(default = "default_structure_folder")]
    pub structure_folder: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            image_pattern: default_image_pattern(),
            structure_pattern: default_structure_pattern(),
            image_folder: default_image_folder(),
            structure_folder: default_structure_folder(),
        }
    }
}

fn default_image_pattern() -> String {
    "^CT".to_string()
}

fn default_structure_pattern() -> String {
    "^RS".to_string()
}

fn default_image_folder() -> String {
    "CT".to_string()
}

fn default_structure_folder() -> String {
    "RTSTRUCT".to_string()
}

impl Configuration {
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn automatic_method(&self, name: &str) -> Option<&AutomaticMethod> {
        self.automatic_methods
            .iter()
            .find(|method| method.name == name)
    }

    pub fn role_index_by_key(&self, key: &str) -> Option<usize> {
        let key = key.trim();
        self.roles
            .iter()
            .position(|role| role.key.eq_ignore_ascii_case(key))
    }

    /// Registers `label` as a manual alias of the role at `role_index`.
    /// Returns `false` when the role already knows the label.
    pub fn add_role_alias(&mut self, role_index: usize, label: &str) -> Result<bool> {
        if let Some((owner, _)) = self
            .roles
            .iter()
            .enumerate()
            .find(|(index, role)| *index != role_index && role.names.iter().any(|n| n == label))
        {
            bail!(
                "label {label:?} is already an alias of role {}",
                self.roles[owner].name
            );
        }

        let role = self
            .roles
            .get_mut(role_index)
            .with_context(|| format!("role index {role_index} out of range"))?;

        if role.names.iter().any(|name| name == label) {
            return Ok(false);
        }

        role.names.push(label.to_string());
        Ok(true)
    }

    pub fn validate(&self) -> Result<()> {
        if self.roles.is_empty() {
            bail!("configuration defines no roles");
        }

        let mut role_names = HashSet::new();
        let mut role_keys = HashSet::new();
        let mut alias_owner: HashMap<&str, &str> = HashMap::new();
        for role in &self.roles {
            if role.name.trim().is_empty() {
                bail!("role with an empty name");
            }
            if !role_names.insert(role.name.as_str()) {
                bail!("duplicate role name: {}", role.name);
            }
            if role.key.trim().is_empty() {
                bail!("role {} has an empty prompt key", role.name);
            }
            if !role_keys.insert(role.key.trim().to_ascii_uppercase()) {
                bail!("duplicate prompt key {:?} (role {})", role.key, role.name);
            }

            let mut seen = HashSet::new();
            for name in &role.names {
                if !seen.insert(name.as_str()) {
                    bail!("duplicate alias {name:?} in role {}", role.name);
                }
                if let Some(owner) = alias_owner.insert(name.as_str(), role.name.as_str()) {
                    bail!(
                        "alias {name:?} is registered under both {owner} and {}",
                        role.name
                    );
                }
            }
        }

        let mut method_names = HashSet::new();
        for method in &self.automatic_methods {
            if method.name.trim().eq_ignore_ascii_case(MANUAL_SOURCE) {
                bail!("automatic method may not be named {MANUAL_SOURCE:?}");
            }
            if !method_names.insert(method.name.as_str()) {
                bail!("duplicate automatic method: {}", method.name);
            }
            if method.segments.len() != self.roles.len() {
                bail!(
                    "automatic method {} lists {} segments but the taxonomy has {} roles",
                    method.name,
                    method.segments.len(),
                    self.roles.len()
                );
            }
        }

        if self.comparisons.is_empty() {
            bail!("configuration defines no comparison methods");
        }

        let mut comparison_names = HashSet::new();
        for comparison in &self.comparisons {
            if !comparison_names.insert(comparison.name.as_str()) {
                bail!("duplicate comparison method: {}", comparison.name);
            }
            for source in [&comparison.reference, &comparison.compared] {
                if let SegmentSource::Automatic(name) = source {
                    if self.automatic_method(name).is_none() {
                        bail!(
                            "comparison {} refers to unknown source {name:?}",
                            comparison.name
                        );
                    }
                }
            }
        }

        Regex::new(&self.layout.image_pattern)
            .with_context(|| format!("invalid image pattern: {}", self.layout.image_pattern))?;
        Regex::new(&self.layout.structure_pattern).with_context(|| {
            format!(
                "invalid structure pattern: {}",
                self.layout.structure_pattern
            )
        })?;
        if self.layout.image_folder == self.layout.structure_folder {
            bail!("image and structure folders must differ");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Configuration> {
    let raw =
        fs::read(path).with_context(|| format!("failed to read config {}", path.display()))?;
    let config: Configuration = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &Configuration) -> Result<()> {
    write_json_pretty(path, config)
}

#[cfg(test)]
pub(crate) fn sample_config() -> Configuration {
    let role = |name: &str, key: &str, names: &[&str]| RoleConfig {
        name: name.to_string(),
        key: key.to_string(),
        names: names.iter().map(|n| n.to_string()).collect(),
    };

    Configuration {
        roles: vec![
            role("Prostate", "P", &["Prostate_manual"]),
            role("Bladder", "B", &["Bladder_manual"]),
        ],
        automatic_methods: vec![
            AutomaticMethod {
                name: "MBS".to_string(),
                segments: vec!["MBS_Prostate".to_string(), "MBS_Bladder".to_string()],
            },
            AutomaticMethod {
                name: "DL".to_string(),
                segments: vec!["DL_Prostate".to_string(), "DL_Bladder".to_string()],
            },
        ],
        ignored_names: vec!["External".to_string()],
        comparisons: vec![ComparisonMethod {
            name: "Manual-MBS".to_string(),
            reference: SegmentSource::Manual,
            compared: SegmentSource::Automatic("MBS".to_string()),
        }],
        layout: LayoutConfig::default(),
    }
}
