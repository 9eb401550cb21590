use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::store::DepStore;

/// A per-target variable assignment declared in a rule header.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Override {
  pub name: String,
  pub append: bool,
  pub value: Vec<String>,
}

/// A rule loaded from the rule file, or instantiated from a generic rule by the matcher.
///
/// An empty `targets` list is the sentinel for "no applicable rule" and for an ill-formed
/// specific/generic merge.
#[derive(Clone, Default, Debug)]
pub struct Rule {
  /// Files produced by this rule.
  pub targets: Vec<String>,
  /// Files required before the script runs; they participate in obsoleteness.
  pub prerequisites: Vec<String>,
  /// Files required before the script runs but excluded from obsoleteness.
  pub order_only: Vec<String>,
  /// Per-target variable assignments, applied when expanding the script.
  pub overrides: Vec<Override>,
  /// Shell script building the targets; empty for transparent rules.
  pub script: String,
  /// The `%`-substitution this rule was instantiated with, for generic rules.
  pub stem: Option<String>,
}

impl Rule {
  #[inline]
  pub fn is_empty(&self) -> bool { self.targets.is_empty() }

  /// A rule that can neither run a script nor pull prerequisites cannot build anything.
  #[inline]
  pub fn is_applicable(&self) -> bool {
    !self.is_empty()
      && (!self.script.is_empty() || !self.prerequisites.is_empty() || !self.order_only.is_empty())
  }

  #[inline]
  fn is_generic(&self) -> bool {
    self.targets.first().map(|t| t.contains('%')).unwrap_or(false)
  }
}

/// All rules loaded from the rule file: specific rules keyed by target, generic rules in
/// declaration order, and the default target.
#[derive(Default)]
pub struct RuleSet {
  specific: HashMap<String, Rule>,
  generic: Vec<Rule>,
  first_target: Option<String>,
}

impl RuleSet {
  /// Registers a loaded rule, creating or extending the dependency groups of its targets:
  ///
  /// - generic rules are appended to an ordered list (duplicates allowed),
  /// - transparent specific rules are replicated into one single-target rule per target, merging
  ///   with any transparent rule already registered there,
  /// - scripted specific rules are registered for every target and bind all targets to one
  ///   shared dependency group.
  ///
  /// Registration fails when a scripted rule collides with any earlier specific rule, or when a
  /// transparent rule names the target of an earlier scripted rule.
  pub fn register(&mut self, rule: Rule, deps: &mut DepStore) -> Result<()> {
    if rule.is_generic() {
      self.generic.push(rule);
      return Ok(());
    }
    if rule.script.is_empty() {
      for target in &rule.targets {
        match self.specific.get_mut(target) {
          Some(existing) => {
            if !existing.script.is_empty() {
              bail!("{target} cannot be the target of several rules");
            }
            existing.prerequisites.extend(rule.prerequisites.iter().cloned());
            existing.order_only.extend(rule.order_only.iter().cloned());
            existing.overrides.extend(rule.overrides.iter().cloned());
          }
          None => {
            let mut single = rule.clone();
            single.targets = vec![target.clone()];
            self.specific.insert(target.clone(), single);
          }
        }
        deps.add_deps(target, &rule.prerequisites);
      }
    } else {
      for target in &rule.targets {
        if self.specific.contains_key(target) {
          bail!("{target} cannot be the target of several rules");
        }
      }
      deps.bind_group(&rule.targets, &rule.prerequisites);
      if self.first_target.is_none() {
        self.first_target = Some(rule.targets[0].clone());
      }
      for target in &rule.targets {
        self.specific.insert(target.clone(), rule.clone());
      }
    }
    Ok(())
  }

  /// The first target of the first scripted specific rule, used when no targets are requested.
  #[inline]
  pub fn default_target(&self) -> Option<&str> { self.first_target.as_deref() }

  /// Finds the rule to execute for `target`:
  ///
  /// - a specific rule with a script wins outright,
  /// - otherwise the best generic match is instantiated and augmented with the prerequisites and
  ///   overrides of the specific rules of all its instantiated targets,
  /// - otherwise the specific rule alone (which may not be applicable),
  /// - an empty rule when nothing matches, or when the generic merge finds a scripted specific
  ///   rule on a sibling target (ill-formed rule set).
  pub fn find_rule(&self, target: &str) -> Rule {
    let specific = self.specific.get(target);
    if let Some(rule) = specific {
      if !rule.script.is_empty() {
        return rule.clone();
      }
    }
    let mut rule = self.find_generic_rule(target);
    if rule.is_empty() {
      return specific.cloned().unwrap_or_default();
    }
    for sibling in rule.targets.clone() {
      let Some(merged) = self.specific.get(&sibling) else { continue };
      if !merged.script.is_empty() {
        return Rule::default();
      }
      rule.prerequisites.extend(merged.prerequisites.iter().cloned());
      rule.order_only.extend(merged.order_only.iter().cloned());
      rule.overrides.extend(merged.overrides.iter().cloned());
    }
    rule
  }

  /// Finds the best generic rule matching `target`: the match with the shortest `%`-substitution
  /// wins, and among equivalent matches the earliest rule wins.
  fn find_generic_rule(&self, target: &str) -> Rule {
    let mut best_stem_len = target.len() + 1;
    let mut found = Rule::default();
    for rule in &self.generic {
      for pattern in &rule.targets {
        if target.len() < pattern.len() {
          continue;
        }
        let stem_len = target.len() - (pattern.len() - 1);
        if best_stem_len <= stem_len {
          continue;
        }
        let Some(pos) = pattern.find('%') else { continue };
        let (prefix, suffix) = (&pattern[..pos], &pattern[pos + 1..]);
        if !target.starts_with(prefix) || !target.ends_with(suffix) {
          continue;
        }
        let stem = &target[prefix.len()..target.len() - suffix.len()];
        best_stem_len = stem_len;
        found = instantiate(rule, stem);
        break;
      }
    }
    found
  }
}

/// Substitutes `stem` for `%` throughout a generic rule.
fn instantiate(rule: &Rule, stem: &str) -> Rule {
  Rule {
    targets: substitute(&rule.targets, stem),
    prerequisites: substitute(&rule.prerequisites, stem),
    order_only: substitute(&rule.order_only, stem),
    overrides: rule.overrides.clone(),
    script: rule.script.clone(),
    stem: Some(stem.to_string()),
  }
}

fn substitute(names: &[String], stem: &str) -> Vec<String> {
  names.iter()
    .map(|name| match name.find('%') {
      Some(pos) => format!("{}{}{}", &name[..pos], stem, &name[pos + 1..]),
      None => name.clone(),
    })
    .collect()
}
