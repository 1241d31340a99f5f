//! Profile selection by focused window.
//!
//! Rules are checked in order; the first whose class and title patterns
//! match wins. Without a match the default profile comes back.

use crate::mapping::error::ProfileConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoswitchRuleConfig {
    /// Regex on the window class
    pub class: String,
    /// Optional regex on the window title
    #[serde(default)]
    pub title: Option<String>,
    pub profile: String,
}

#[derive(Debug)]
struct Rule {
    class: Regex,
    title: Option<Regex>,
    profile: String,
}

#[derive(Debug)]
pub struct Autoswitcher {
    rules: Vec<Rule>,
    default_profile: String,
    last: Option<String>,
}

fn compile(pattern: &str) -> Result<Regex, ProfileConfigError> {
    Regex::new(pattern).map_err(|e| ProfileConfigError::BadArgument(format!("autoswitch pattern '{pattern}': {e}")))
}

impl Autoswitcher {
    pub fn from_config(rules: &[AutoswitchRuleConfig], default_profile: &str) -> Result<Self, ProfileConfigError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(Rule {
                    class: compile(&rule.class)?,
                    title: rule.title.as_deref().map(compile).transpose()?,
                    profile: rule.profile.clone(),
                })
            })
            .collect::<Result<Vec<_>, ProfileConfigError>>()?;
        Ok(Self {
            rules,
            default_profile: default_profile.to_string(),
            last: None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Profile names the rules point to, for validation against the registry.
    pub fn profiles(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.profile.as_str())
    }

    /// Profile for a window, regardless of what was picked before.
    pub fn resolve(&self, class: &str, title: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.class.is_match(class) && rule.title.as_ref().map_or(true, |t| t.is_match(title)))
            .map(|rule| rule.profile.as_str())
            .unwrap_or(self.default_profile.as_str())
    }

    /// Profile to activate for a focus change, or `None` if nothing changes.
    /// Without rules focus changes never touch profiles.
    pub fn on_focus(&mut self, class: &str, title: &str) -> Option<String> {
        if self.rules.is_empty() {
            return None;
        }
        let profile = self.resolve(class, title).to_string();
        debug!("Focus {} '{}' -> profile '{}'", class, title, profile);
        if self.last.as_deref() == Some(profile.as_str()) {
            return None;
        }
        self.last = Some(profile.clone());
        Some(profile)
    }
}
