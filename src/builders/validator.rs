use anyhow::Result;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use crate::builders::patterns::{GlobMatcher, PatternRule};
use crate::core::config::{ProjectConfig, Settings};

/// Placeholders a rename template may use on top of the configuration keys.
pub const RENAME_KEYS: &[&str] = &[
    "path",
    "name",
    "stem",
    "ext",
    "dir",
    "source_root",
    "destination_root",
];

// `{{` and `}}` are escapes, `{key}` is a placeholder
const PLACEHOLDER: &str = r"\{\{|\}\}|\{([^{}]*)\}";

/// The `ConfigValidator` trait defines the public interface for validating the
/// project configuration.
///
/// Validation never stops at the first problem: every issue found is returned
/// so a user can fix them all in one pass.
pub trait ConfigValidator {
    /// Performs a full validation of the `ProjectConfig` and returns
    /// a list of issues found.
    ///
    /// # Arguments
    /// * `config`: The `ProjectConfig` to be validated.
    ///
    /// # Returns
    /// A `Result<Vec<String>>` where each string describes one issue.
    fn validate_config(&self, config: &ProjectConfig) -> Result<Vec<String>>;

    /// Validates a single rule against the template keys the configuration
    /// declares.
    fn validate_rule(&self, rule: &PatternRule, known_keys: &BTreeSet<String>)
    -> Result<Vec<String>>;
}

/// The `StandardValidator` is a concrete implementation of `ConfigValidator`.
///
/// It checks the sets declared in the configuration plus any sets loaded from
/// the set directory and handed over with [`StandardValidator::with_sets`].
pub struct StandardValidator {
    extra_sets: BTreeMap<String, Vec<PatternRule>>,
}

impl Default for StandardValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardValidator {
    pub fn new() -> Self {
        Self {
            extra_sets: BTreeMap::new(),
        }
    }

    /// Sets defined outside the configuration file. Inline sets shadow them.
    pub fn with_sets(mut self, sets: BTreeMap<String, Vec<PatternRule>>) -> Self {
        self.extra_sets = sets;
        self
    }

    /// Checks brace balance and placeholder names of one template.
    ///
    /// # Arguments
    /// * `template`: The template text.
    /// * `known_keys`: Keys that may appear as placeholders.
    /// * `placeholder`: The compiled placeholder expression.
    ///
    /// # Returns
    /// The issues found, empty when the template is fine.
    fn check_template(
        &self,
        template: &str,
        known_keys: &BTreeSet<String>,
        placeholder: &Regex,
    ) -> Vec<String> {
        let mut issues = Vec::new();

        for caps in placeholder.captures_iter(template) {
            if let Some(key) = caps.get(1) {
                let key = key.as_str().trim();
                if key.is_empty() {
                    issues.push(format!("Empty placeholder in '{template}'"));
                } else if !known_keys.contains(key) {
                    issues.push(format!("Unknown placeholder '{{{key}}}' in '{template}'"));
                }
            }
        }

        let rest = placeholder.replace_all(template, "");
        if rest.contains('{') || rest.contains('}') {
            issues.push(format!("Unbalanced braces in '{template}'"));
        }
        issues
    }

    /// Checks that a pattern compiles once its placeholders are filled in.
    fn check_glob(&self, pattern: &str, placeholder: &Regex) -> Option<String> {
        let sample = placeholder.replace_all(pattern, |caps: &regex::Captures<'_>| {
            match &caps[0] {
                "{{" => "{".to_string(),
                "}}" => "}".to_string(),
                _ => "x".to_string(),
            }
        });
        GlobMatcher::new(&[sample.into_owned()], &[], true)
            .err()
            .map(|e| format!("Invalid glob '{pattern}': {e}"))
    }

    fn known_keys(&self, config: &ProjectConfig) -> BTreeSet<String> {
        Settings::KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(config.variables.keys().cloned())
            .collect()
    }
}

impl ConfigValidator for StandardValidator {
    /// Validates the whole configuration.
    ///
    /// It checks:
    /// - the configuration version,
    /// - variables shadowing settings,
    /// - every rule of every set,
    /// - that artifacts name existing sets and use known placeholders,
    /// - the retry policy.
    fn validate_config(&self, config: &ProjectConfig) -> Result<Vec<String>> {
        let mut issues = Vec::new();
        let placeholder = Regex::new(PLACEHOLDER)?;
        let known_keys = self.known_keys(config);

        if config.version != "1.0" {
            issues.push(format!("Unsupported config version: {}", config.version));
        }

        for name in config.variables.keys() {
            if Settings::KEYS.contains(&name.as_str()) {
                issues.push(format!(
                    "Variable '{name}' shadows the settings field of the same name"
                ));
            }
        }

        let mut sets = self.extra_sets.clone();
        sets.extend(config.sets.clone());

        for (name, rules) in &sets {
            if rules.is_empty() {
                issues.push(format!("Set '{name}' has no rules"));
            }
            for rule in rules {
                let rule_issues = self.validate_rule(rule, &known_keys)?;
                issues.extend(rule_issues.into_iter().map(|i| format!("Set '{name}': {i}")));
            }
        }

        for (fileset, template) in &config.artifacts {
            if !sets.contains_key(fileset) {
                issues.push(format!("Artifact '{fileset}' references an unknown set"));
            }
            issues.extend(
                self.check_template(template, &known_keys, &placeholder)
                    .into_iter()
                    .map(|i| format!("Artifact '{fileset}': {i}")),
            );
        }

        if config.publish.max_attempts == 0 {
            issues.push("publish.max_attempts must be at least 1".to_string());
        }

        Ok(issues)
    }

    /// Validates the include, exclude and rename templates of one rule.
    fn validate_rule(
        &self,
        rule: &PatternRule,
        known_keys: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let mut issues = Vec::new();
        let placeholder = Regex::new(PLACEHOLDER)?;

        if rule.include.is_empty() {
            issues.push("Rule has no include pattern".to_string());
        }

        for pattern in rule.include.iter().chain(&rule.exclude) {
            issues.extend(self.check_template(pattern, known_keys, &placeholder));
            issues.extend(self.check_glob(pattern, &placeholder));
        }

        for pattern in &rule.include {
            if rule.exclude.contains(pattern) {
                issues.push(format!(
                    "Pattern '{pattern}' is both included and excluded; it will match nothing"
                ));
            }
        }

        if let Some(rename) = &rule.rename {
            let mut rename_keys = known_keys.clone();
            rename_keys.extend(RENAME_KEYS.iter().map(|k| k.to_string()));
            issues.extend(self.check_template(rename, &rename_keys, &placeholder));
        }

        Ok(issues)
    }
}
