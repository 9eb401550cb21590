use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};

use crate::parse::{Lexer, Token};
use crate::script::VariableTable;

/// Name of the dependency database in the build directory.
pub const DB_FILE: &str = ".remake";

/// Sibling targets sharing one build action and one obsoleteness verdict, with the dependencies
/// known for them (static prerequisites and dynamic dependencies observed at build time).
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct Group {
  pub targets: Vec<String>,
  pub deps: BTreeSet<String>,
}

/// Shared-ownership handle to a [`Group`]: all siblings map to the same group object, and
/// rebinding a target to a new group is explicit.
pub type GroupRef = Rc<RefCell<Group>>;

/// Map from targets to their dependency group, persisted across runs in [`DB_FILE`].
#[derive(Default)]
pub struct DepStore {
  groups: HashMap<String, GroupRef>,
}

impl DepStore {
  /// Gets the dependency group of `target`, if any.
  #[inline]
  pub fn get(&self, target: &str) -> Option<&GroupRef> { self.groups.get(target) }

  /// Gets the dependency group of `target`, creating a fresh single-target group if there is
  /// none yet.
  fn entry(&mut self, target: &str) -> GroupRef {
    self.groups.entry(target.to_string())
      .or_insert_with(|| {
        Rc::new(RefCell::new(Group { targets: vec![target.to_string()], deps: BTreeSet::new() }))
      })
      .clone()
  }

  /// Adds `deps` to the dependency group of `target`.
  pub fn add_deps(&mut self, target: &str, deps: &[String]) {
    let group = self.entry(target);
    group.borrow_mut().deps.extend(deps.iter().cloned());
  }

  /// Adds one dynamic dependency to the dependency group of `target`.
  pub fn add_dep(&mut self, target: &str, dep: &str) {
    let group = self.entry(target);
    group.borrow_mut().deps.insert(dep.to_string());
  }

  /// Binds all of `targets` to one new shared group holding `deps` unioned with every
  /// pre-existing dependency of those targets.
  pub fn bind_group(&mut self, targets: &[String], deps: &[String]) {
    let mut group = Group {
      targets: targets.to_vec(),
      deps: deps.iter().cloned().collect(),
    };
    for target in targets {
      if let Some(existing) = self.groups.get(target) {
        group.deps.extend(existing.borrow().deps.iter().cloned());
      }
    }
    let group = Rc::new(RefCell::new(group));
    for target in targets {
      self.groups.insert(target.clone(), group.clone());
    }
  }

  /// Loads the database file at `path` into the store, if it exists.
  pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
    let source = match std::fs::read_to_string(path) {
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(e).context("Failed to load database"),
      Ok(source) => source,
    };
    self.load(&source)
  }

  /// Loads dependency groups from `source`; a group read later replaces the earlier mapping of
  /// each of its targets.
  pub fn load(&mut self, source: &str) -> Result<()> {
    for (targets, deps) in parse_groups(source)? {
      let group = Rc::new(RefCell::new(Group { targets: targets.clone(), deps }));
      for target in targets {
        self.groups.insert(target, group.clone());
      }
    }
    Ok(())
  }

  /// Renders and drains the store: every target is emitted exactly once, grouped with its
  /// siblings.
  pub fn save(&mut self) -> String {
    let mut out = String::new();
    let mut keys: Vec<String> = self.groups.keys().cloned().collect();
    keys.sort();
    for key in keys {
      let Some(group) = self.groups.get(&key) else { continue };
      let group = group.clone();
      let group = group.borrow();
      for target in &group.targets {
        out.push_str(&escape(target));
        out.push(' ');
        self.groups.remove(target);
      }
      out.push(':');
      for dep in &group.deps {
        out.push(' ');
        out.push_str(&escape(dep));
      }
      out.push('\n');
    }
    out
  }

  /// The (siblings, deps) pairs currently in the store, in canonical order.
  pub fn snapshot(&self) -> BTreeSet<(Vec<String>, Vec<String>)> {
    self.groups.values()
      .map(|group| {
        let group = group.borrow();
        (group.targets.clone(), group.deps.iter().cloned().collect())
      })
      .collect()
  }
}

/// Parses the dependency-database grammar: one group per line,
/// `<target>( <target>)* :( <dep>)*`, blank lines ignored.
pub fn parse_groups(source: &str) -> Result<Vec<(Vec<String>, BTreeSet<String>)>> {
  let variables = VariableTable::default();
  let mut lexer = Lexer::new(source);
  let mut groups = Vec::new();
  loop {
    lexer.skip_eol();
    if lexer.at_eof() {
      return Ok(groups);
    }
    let targets = lexer.read_words(&variables).context("Failed to load database")?;
    if targets.is_empty() {
      if lexer.next_token() == Token::Eol {
        continue;
      }
      bail!("Failed to load database");
    }
    if lexer.next_token() != Token::Colon {
      bail!("Failed to load database");
    }
    lexer.bump();
    let deps = lexer.read_words(&variables).context("Failed to load database")?;
    groups.push((targets, deps.into_iter().collect()));
  }
}

/// Returns `token` unchanged if it contains no special characters, a quoted and escaped form
/// otherwise.
pub fn escape(token: &str) -> String {
  const QUOTED: &[char] = &[' ', ':', '$', '(', ')', ',', '=', '"', '\'', '!', '\\'];
  const ESCAPED: &[char] = &['"', '\\', '$', '!'];
  if !token.contains(QUOTED) {
    return token.to_string();
  }
  let mut out = String::with_capacity(token.len() + 2);
  out.push('"');
  for c in token.chars() {
    if ESCAPED.contains(&c) {
      out.push('\\');
    }
    out.push(c);
  }
  out.push('"');
  out
}
