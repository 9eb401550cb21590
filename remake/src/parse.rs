use anyhow::{bail, Result};

use crate::path::BuildDir;
use crate::rule::{Override, Rule, RuleSet};
use crate::script::VariableTable;
use crate::store::DepStore;

/// Kind of the next token in a rule or dependency source.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum Token {
  Word,
  Eol,
  Eof,
  Colon,
  Equal,
  Dollar,
  Rightpar,
  Comma,
}

/// Character-level reader over a rule or dependency source. Words, quoting and line
/// continuations follow the Remakefile syntax; the same lexer reads the dependency database.
pub(crate) struct Lexer<'a> {
  src: &'a [u8],
  pos: usize,
}

const SEPARATORS: &[u8] = b" \t\r\n:$(),=\"";

impl<'a> Lexer<'a> {
  #[inline]
  pub fn new(src: &'a str) -> Self { Self { src: src.as_bytes(), pos: 0 } }

  #[inline]
  pub fn at_eof(&self) -> bool { self.pos >= self.src.len() }

  #[inline]
  pub fn peek(&self) -> Option<u8> { self.src.get(self.pos).copied() }

  #[inline]
  pub fn bump(&mut self) { self.pos += 1; }

  #[inline]
  pub fn skip_spaces(&mut self) {
    while let Some(b' ' | b'\t') = self.peek() { self.bump(); }
  }

  #[inline]
  pub fn skip_eol(&mut self) {
    while let Some(b'\r' | b'\n') = self.peek() { self.bump(); }
  }

  /// Skips spaces and returns the kind of the next token, resolving backslash-newline
  /// continuations along the way.
  pub fn next_token(&mut self) -> Token {
    loop {
      self.skip_spaces();
      let Some(c) = self.peek() else { return Token::Eof };
      match c {
        b':' => return Token::Colon,
        b',' => return Token::Comma,
        b'=' => return Token::Equal,
        b'$' => return Token::Dollar,
        b')' => return Token::Rightpar,
        b'\r' | b'\n' => return Token::Eol,
        b'\\' => {
          match self.src.get(self.pos + 1) {
            Some(b'\r' | b'\n') => {
              self.bump();
              self.skip_eol();
            }
            _ => return Token::Word,
          }
        }
        _ => return Token::Word,
      }
    }
  }

  /// Reads one (possibly quoted) word. Returns an empty string when the next character is a
  /// separator or the source is exhausted.
  pub fn read_word(&mut self) -> String {
    let mut word: Vec<u8> = Vec::new();
    let Some(first) = self.peek() else { return String::new() };
    let quoted = first == b'"';
    if quoted {
      self.bump();
    } else if SEPARATORS.contains(&first) {
      return String::new();
    } else {
      word.push(first);
      self.bump();
    }
    while let Some(c) = self.peek() {
      if quoted {
        match c {
          b'\\' => {
            self.bump();
            if let Some(escaped) = self.peek() {
              word.push(escaped);
              self.bump();
            }
          }
          b'"' => {
            self.bump();
            return String::from_utf8_lossy(&word).into_owned();
          }
          _ => {
            word.push(c);
            self.bump();
          }
        }
      } else {
        if SEPARATORS.contains(&c) { break; }
        word.push(c);
        self.bump();
      }
    }
    String::from_utf8_lossy(&word).into_owned()
  }

  /// Reads a list of words, expanding `$(NAME)` references and executing the `addprefix` and
  /// `addsuffix` functions. Stops before any token that cannot start a word.
  pub fn read_words(&mut self, variables: &VariableTable) -> Result<Vec<String>> {
    let mut words = Vec::new();
    loop {
      match self.next_token() {
        Token::Word => words.push(self.read_word()),
        Token::Dollar => {
          self.bump();
          if self.peek() != Some(b'(') {
            bail!("syntax error");
          }
          self.bump();
          let name = self.read_word();
          if name.is_empty() {
            bail!("syntax error");
          }
          if self.next_token() == Token::Rightpar {
            self.bump();
            if let Some(value) = variables.get(&name) {
              words.extend(value.iter().cloned());
            }
          } else {
            self.execute_function(&name, variables, &mut words)?;
          }
        }
        _ => return Ok(words),
      }
    }
  }

  /// Executes the built-in function `name` and appends its result to `dest`.
  fn execute_function(
    &mut self,
    name: &str,
    variables: &VariableTable,
    dest: &mut Vec<String>,
  ) -> Result<()> {
    self.skip_spaces();
    let affix = self.read_word();
    if self.next_token() != Token::Comma {
      bail!("syntax error");
    }
    self.bump();
    let names = self.read_words(variables)?;
    if self.next_token() != Token::Rightpar {
      bail!("syntax error");
    }
    self.bump();
    match name {
      "addprefix" => dest.extend(names.into_iter().map(|n| format!("{affix}{n}"))),
      "addsuffix" => dest.extend(names.into_iter().map(|n| format!("{n}{affix}"))),
      _ => bail!("syntax error"),
    }
    Ok(())
  }
}

/// Parses the rule file `source` into `rules`, `variables` and the dependency groups of `deps`.
/// Targets and prerequisites are normalised with respect to `dir`.
pub fn load_rules(
  source: &str,
  dir: &BuildDir,
  variables: &mut VariableTable,
  rules: &mut RuleSet,
  deps: &mut DepStore,
) -> Result<()> {
  let mut lexer = Lexer::new(source);
  lexer.skip_eol();
  while !lexer.at_eof() {
    match lexer.peek() {
      Some(b'#') => {
        while let Some(c) = lexer.peek() {
          lexer.bump();
          if c == b'\n' { break; }
        }
        lexer.skip_eol();
        continue;
      }
      Some(b' ' | b'\t') => bail!("syntax error"),
      _ => {}
    }
    match lexer.next_token() {
      Token::Word => {
        let name = lexer.read_word();
        if name.is_empty() {
          bail!("syntax error");
        }
        if lexer.next_token() == Token::Equal {
          lexer.bump();
          let value = lexer.read_words(variables)?;
          variables.insert(name, value);
          lexer.skip_eol();
        } else {
          load_rule(&mut lexer, name, dir, variables, rules, deps)?;
        }
      }
      Token::Dollar => load_rule(&mut lexer, String::new(), dir, variables, rules, deps)?,
      Token::Eof => break,
      _ => bail!("syntax error"),
    }
  }
  Ok(())
}

/// Reads one rule starting with target `first` (when nonempty) and registers it.
fn load_rule(
  lexer: &mut Lexer,
  first: String,
  dir: &BuildDir,
  variables: &VariableTable,
  rules: &mut RuleSet,
  deps: &mut DepStore,
) -> Result<()> {
  let mut targets = lexer.read_words(variables)?;
  if !first.is_empty() {
    targets.insert(0, first);
  } else if targets.is_empty() {
    bail!("syntax error");
  }
  let generic = targets[0].matches('%').count() > 0;
  for target in &targets {
    if target.is_empty() {
      bail!("syntax error");
    }
    let percents = target.matches('%').count();
    if generic && percents != 1 {
      bail!("a generic rule requires exactly one % in each of its targets");
    }
    if !generic && percents != 0 {
      bail!("syntax error");
    }
  }
  dir.normalize_all(&mut targets);

  lexer.skip_spaces();
  if lexer.peek() != Some(b':') {
    bail!("syntax error");
  }
  lexer.bump();

  // A header of the form `targets : NAME = words` or `targets : NAME += words` declares a
  // per-target variable override; anything else is a prerequisite list with an optional
  // standalone `|` separating order-only prerequisites.
  let mut rule = Rule::default();
  rule.targets = targets;
  let words = lexer.read_words(variables)?;
  if lexer.next_token() == Token::Equal && is_override_header(&words) {
    lexer.bump();
    let value = lexer.read_words(variables)?;
    rule.overrides.push(Override {
      name: words[0].clone(),
      append: words.len() == 2,
      value,
    });
  } else {
    let mut order_only = false;
    for word in words {
      if word == "|" && !order_only {
        order_only = true;
      } else if order_only {
        rule.order_only.push(word);
      } else {
        rule.prerequisites.push(word);
      }
    }
    dir.normalize_all(&mut rule.prerequisites);
    dir.normalize_all(&mut rule.order_only);
  }

  lexer.skip_spaces();
  match lexer.peek() {
    Some(b'\r' | b'\n') | None => {}
    _ => bail!("syntax error"),
  }
  lexer.skip_eol();

  // Script lines: the first indent character is stripped, the rest is kept verbatim. A comment
  // line interrupts the script.
  let mut script: Vec<u8> = Vec::new();
  while let Some(c) = lexer.peek() {
    match c {
      b' ' | b'\t' => {
        lexer.bump();
        while let Some(l) = lexer.peek() {
          if l == b'\r' || l == b'\n' { break; }
          script.push(l);
          lexer.bump();
        }
      }
      b'\r' | b'\n' => {
        script.push(c);
        lexer.bump();
      }
      _ => break,
    }
  }
  rule.script = String::from_utf8_lossy(&script).into_owned();

  rules.register(rule, deps)
}

#[inline]
fn is_override_header(words: &[String]) -> bool {
  match words {
    [_name] => true,
    [_name, plus] => plus == "+",
    _ => false,
  }
}
