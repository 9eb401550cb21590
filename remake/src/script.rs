use std::collections::HashMap;

use crate::rule::{Override, Rule};

/// Map from variable names to their whitespace-separated value tokens.
pub type VariableTable = HashMap<String, Vec<String>>;

/// Expands a rule script for the shell:
///
/// | form | expansion |
/// |---|---|
/// | `$$` | `$` |
/// | `$<` | first prerequisite |
/// | `$^` | all prerequisites, space-joined |
/// | `$@` | first target |
/// | `$*` | the `%`-substitution of the rule |
/// | `$(NAME)` | variable value, overrides first |
/// | `$(addprefix P, L)`, `$(addsuffix S, L)` | affixed word list |
/// | any other `$x` | literal `$x` |
///
/// Shell parameter references survive untouched, so `$TAG` or `$1` reach the shell verbatim.
pub fn expand_script(rule: &Rule, variables: &VariableTable) -> String {
  expand_text(&rule.script, rule, variables)
}

fn expand_text(text: &str, rule: &Rule, variables: &VariableTable) -> String {
  let mut out = String::with_capacity(text.len());
  let mut rest = text;
  while let Some(pos) = rest.find('$') {
    out.push_str(&rest[..pos]);
    let after = &rest[pos + 1..];
    match after.as_bytes().first() {
      Some(b'$') => {
        out.push('$');
        rest = &after[1..];
      }
      Some(b'<') => {
        out.push_str(rule.prerequisites.first().map(String::as_str).unwrap_or(""));
        rest = &after[1..];
      }
      Some(b'^') => {
        out.push_str(&rule.prerequisites.join(" "));
        rest = &after[1..];
      }
      Some(b'@') => {
        out.push_str(rule.targets.first().map(String::as_str).unwrap_or(""));
        rest = &after[1..];
      }
      Some(b'*') => {
        out.push_str(rule.stem.as_deref().unwrap_or(""));
        rest = &after[1..];
      }
      Some(b'(') => match matching_paren(&after[1..]) {
        Some(end) => {
          out.push_str(&expand_reference(&after[1..1 + end], rule, variables));
          rest = &after[end + 2..];
        }
        None => {
          out.push('$');
          rest = after;
        }
      },
      _ => {
        out.push('$');
        rest = after;
      }
    }
  }
  out.push_str(rest);
  out
}

/// Index of the `)` closing the reference opened just before `text`, skipping nested pairs.
fn matching_paren(text: &str) -> Option<usize> {
  let mut depth = 0usize;
  for (index, byte) in text.bytes().enumerate() {
    match byte {
      b'(' => depth += 1,
      b')' if depth == 0 => return Some(index),
      b')' => depth -= 1,
      _ => {}
    }
  }
  None
}

/// Expands the inside of a `$(…)` reference: a single word is a variable reference; otherwise
/// the first word names a function. Unknown references resolve to nothing, like an undefined
/// variable.
fn expand_reference(inner: &str, rule: &Rule, variables: &VariableTable) -> String {
  let trimmed = inner.trim();
  let Some((name, rest)) = trimmed.split_once(char::is_whitespace) else {
    return resolve(trimmed, &rule.overrides, variables).join(" ");
  };
  match name {
    "addprefix" | "addsuffix" => {
      let Some((affix, list)) = rest.split_once(',') else { return String::new() };
      let affix = affix.trim();
      let list = expand_text(list, rule, variables);
      let words = list.split_whitespace();
      let affixed: Vec<String> = match name {
        "addprefix" => words.map(|w| format!("{affix}{w}")).collect(),
        _ => words.map(|w| format!("{w}{affix}")).collect(),
      };
      affixed.join(" ")
    }
    _ => String::new(),
  }
}

/// Resolves `name` against the rule-local overrides and the global variables: the last
/// non-append override is the base and later appends stack on it; without one, the global value
/// is the base and every append applies in order.
pub fn resolve(name: &str, overrides: &[Override], variables: &VariableTable) -> Vec<String> {
  let base = overrides.iter().rposition(|o| o.name == name && !o.append);
  let (mut value, from) = match base {
    Some(index) => (overrides[index].value.clone(), index + 1),
    None => (variables.get(name).cloned().unwrap_or_default(), 0),
  };
  for o in &overrides[from..] {
    if o.name == name && o.append {
      value.extend(o.value.iter().cloned());
    }
  }
  value
}
