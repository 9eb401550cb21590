use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use anyhow::{bail, Context, Result};

use crate::ipc;
use crate::parse;
use crate::path::BuildDir;
use crate::process;
use crate::rule::{Rule, RuleSet};
use crate::script::{self, VariableTable};
use crate::status::{State, StatusMap};
use crate::store::{DepStore, DB_FILE};
use crate::tracker::Tracker;

/// Server configuration, filled in from the command line.
#[derive(Clone, Debug)]
pub struct Options {
  /// The rule file to load (and to rebuild first when obsolete).
  pub rule_file: String,
  /// Maximum number of parallel jobs; non-positive means unbounded.
  pub max_jobs: i32,
  /// Keep building unrelated targets when one fails.
  pub keep_going: bool,
  /// Echo scripts while the shell reads them.
  pub echo_scripts: bool,
}

impl Default for Options {
  fn default() -> Self {
    Self { rule_file: "Remakefile".to_string(), max_jobs: 1, keep_going: false, echo_scripts: false }
  }
}

/// An event the scheduler blocks on: a client connected, or a shell exited. Both sources feed
/// one channel, so no exit can be missed while waiting for connections.
pub enum Event {
  Connection(UnixStream),
  JobExited { job_id: i32, success: bool },
}

/// The rule a dependency-client will execute once its prerequisites are done, together with the
/// scheduling verdict that caused the job. The live status switches to `Running` at start, so
/// whether the verdict was `Recheck` has to be latched here for `still_need_rebuild`.
struct Delayed {
  rule: Rule,
  from_recheck: bool,
}

/// A pending build request inside the server.
///
/// There are two kinds of clients:
/// - real clients, which are remake processes spawned by build scripts and hold a reply stream,
/// - pseudo clients, which the server creates itself to build specific targets.
///
/// Among pseudo clients, original clients (`job_id < 0`) carry the targets requested on the
/// command line or the rule-file rebuild, and dependency clients carry the prerequisites of a
/// started rule, emulating a recursive invocation.
struct Client {
  job_id: i32,
  reply: Option<UnixStream>,
  failed: bool,
  pending: VecDeque<String>,
  running: BTreeSet<String>,
  delayed: Option<Delayed>,
}

impl Client {
  fn original(pending: VecDeque<String>) -> Self {
    Self { job_id: -1, reply: None, failed: false, pending, running: BTreeSet::new(), delayed: None }
  }
}

enum StartOutcome {
  Failed,
  Started { dep_client: bool },
}

/// The build server: a single-threaded cooperative scheduler over a list of clients, spawning
/// shell jobs under the parallelism cap and answering recursive build requests on a local
/// socket.
pub struct Server<A> {
  dir: BuildDir,
  options: Options,
  variables: VariableTable,
  rules: RuleSet,
  deps: DepStore,
  status: StatusMap,
  /// Clients ordered most-recent-first; dependency clients sit just before their parent.
  clients: Vec<Client>,
  job_targets: HashMap<i32, Vec<String>>,
  job_counter: i32,
  running_jobs: i32,
  waiting_jobs: i32,
  build_failure: bool,
  listener: UnixListener,
  socket_path: PathBuf,
  events: Receiver<Event>,
  sender: Sender<Event>,
  tracker: A,
}

impl<A: Tracker> Server<A> {
  /// Runs a full build: loads the database and the rules, rebuilds the rule file first when it
  /// is obsolete, drives the requested `targets` (or the default target), then saves the
  /// database. Returns whether the build succeeded; `Err` is reserved for fatal startup
  /// failures, which leave the database untouched.
  pub fn run(options: Options, targets: Vec<String>, tracker: A) -> Result<bool> {
    let dir = BuildDir::from_cwd().context("Failed to get working directory")?;
    let mut deps = DepStore::default();
    deps.load_file(DB_FILE)?;
    let mut variables = VariableTable::default();
    let mut rules = RuleSet::default();
    load_rule_file(&options.rule_file, &dir, &mut variables, &mut rules, &mut deps)?;

    let socket_path = std::env::temp_dir().join(format!("remake-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path).context("Failed to create server")?;
    let (sender, events) = channel();
    spawn_acceptor(&listener, sender.clone())?;

    let mut server = Server {
      dir,
      options,
      variables,
      rules,
      deps,
      status: StatusMap::new(),
      clients: Vec::new(),
      job_targets: HashMap::new(),
      job_counter: 0,
      running_jobs: 0,
      waiting_jobs: 0,
      build_failure: false,
      listener,
      socket_path,
      events,
      sender,
      tracker,
    };

    // Rebuild the rule file first when it is obsolete, then reload it.
    let rule_file = server.dir.normalize(&server.options.rule_file);
    let record = server.status.get(&rule_file, &server.deps, &mut server.tracker);
    if record.state != State::Uptodate {
      server.clients.push(Client::original(VecDeque::from([rule_file])));
      server.server_loop();
      if server.build_failure {
        return server.teardown();
      }
      server.variables = VariableTable::default();
      server.rules = RuleSet::default();
      let Server { options, dir, variables, rules, deps, .. } = &mut server;
      load_rule_file(&options.rule_file, dir, variables, rules, deps)?;
    }

    let pending: VecDeque<String> = if targets.is_empty() {
      server.rules.default_target().map(str::to_string).into_iter().collect()
    } else {
      targets.into()
    };
    server.clients.push(Client::original(pending));
    server.server_loop();
    server.teardown()
  }

  /// Closes and removes the socket, saves the database, and reports the build outcome.
  fn teardown(mut self) -> Result<bool> {
    drop(self.listener);
    let _ = std::fs::remove_file(&self.socket_path);
    std::fs::write(DB_FILE, self.deps.save()).context("Failed to save database")?;
    Ok(!self.build_failure)
  }

  /// Loops until all the clients have been served and all the jobs have finished.
  fn server_loop(&mut self) {
    self.tracker.build_start();
    loop {
      self.handle_clients();
      if self.running_jobs == 0 && self.clients.is_empty() {
        break;
      }
      if self.running_jobs == self.waiting_jobs && !self.clients.is_empty() {
        // Every outstanding client waits on another one; nothing can make progress on its own.
        self.tracker.cycle_detected();
        let client = self.clients.remove(0);
        self.complete_request(client, false);
        continue;
      }
      let event = self.events.recv().expect("BUG: event channel closed");
      self.dispatch(event);
      while let Ok(event) = self.events.try_recv() {
        self.dispatch(event);
      }
    }
    self.tracker.build_end();
  }

  fn dispatch(&mut self, event: Event) {
    match event {
      Event::Connection(stream) => self.accept_client(stream),
      Event::JobExited { job_id, success } => {
        self.running_jobs -= 1;
        self.complete_job(job_id, success);
      }
    }
  }

  #[inline]
  fn has_free_slots(&self) -> bool {
    self.options.max_jobs <= 0 || self.running_jobs - self.waiting_jobs < self.options.max_jobs
  }

  /// Advances clients front to back as long as there are free job slots:
  /// - drops running targets that reached a terminal state,
  /// - starts as many pending targets as allowed,
  /// - completes the request once neither running nor pending targets are left.
  fn handle_clients(&mut self) {
    let mut index = 0;
    'clients: while index < self.clients.len() && self.has_free_slots() {
      let running: Vec<String> = self.clients[index].running.iter().cloned().collect();
      for target in running {
        match self.status.state_of(&target) {
          State::Running => {}
          State::Failed => {
            if !self.options.keep_going {
              self.fail_client(index);
              continue 'clients;
            }
            self.clients[index].failed = true;
            self.clients[index].running.remove(&target);
          }
          State::Uptodate | State::Remade => {
            self.clients[index].running.remove(&target);
          }
          state => panic!("BUG: running target {target} in state {state:?}"),
        }
      }

      while let Some(target) = self.clients[index].pending.pop_front() {
        let record = self.status.get(&target, &self.deps, &mut self.tracker);
        match record.state {
          State::Running => {
            self.clients[index].running.insert(target);
          }
          State::Failed => {
            if !self.options.keep_going {
              self.fail_client(index);
              continue 'clients;
            }
            self.clients[index].failed = true;
          }
          State::Uptodate | State::Remade => {}
          State::Todo | State::Recheck => match self.start(&target, index) {
            StartOutcome::Failed => {
              if !self.options.keep_going {
                self.fail_client(index);
                continue 'clients;
              }
              self.clients[index].failed = true;
            }
            StartOutcome::Started { dep_client } => {
              // The dependency client was inserted at `index`, moving its parent one down.
              let parent = if dep_client { index + 1 } else { index };
              self.clients[parent].running.insert(target);
              if !self.has_free_slots() {
                return;
              }
              if dep_client {
                // Service the new dependency client before returning to the parent.
                continue 'clients;
              }
            }
          },
        }
      }

      if self.clients[index].running.is_empty() {
        let client = self.clients.remove(index);
        let success = !client.failed;
        self.complete_request(client, success);
        continue;
      }
      index += 1;
    }
  }

  /// Fails the client at `index` and removes it from the list.
  fn fail_client(&mut self, index: usize) {
    let client = self.clients.remove(index);
    self.complete_request(client, false);
  }

  /// Creates a job for `target` according to the loaded rules, marking every target of the rule
  /// as `Running`. A rule with prerequisites does not run yet: a dependency client carrying it
  /// is inserted just before the client at `index`.
  fn start(&mut self, target: &str, index: usize) -> StartOutcome {
    let rule = self.rules.find_rule(target);
    if !rule.is_applicable() {
      self.status.set_state(target, State::Failed);
      self.tracker.rule_missing(target);
      return StartOutcome::Failed;
    }
    let from_recheck = self.status.state_of(target) == State::Recheck;
    for t in &rule.targets {
      self.status.set_state(t, State::Running);
    }
    let job_id = self.job_counter;
    self.job_counter += 1;
    self.job_targets.insert(job_id, rule.targets.clone());
    let mut pending: VecDeque<String> = rule.prerequisites.iter().cloned().collect();
    pending.extend(rule.order_only.iter().cloned());
    if !pending.is_empty() {
      self.clients.insert(index, Client {
        job_id,
        reply: None,
        failed: false,
        pending,
        running: BTreeSet::new(),
        delayed: Some(Delayed { rule, from_recheck }),
      });
      return StartOutcome::Started { dep_client: true };
    }
    if self.run_script(job_id, &rule) {
      StartOutcome::Started { dep_client: false }
    } else {
      StartOutcome::Failed
    }
  }

  /// Executes the script of `rule` under `job_id`: rebinds the dependency group of its targets
  /// (static prerequisites unioned with previously known dependencies), expands the script, and
  /// spawns the shell. A spawn failure completes the job as failed.
  fn run_script(&mut self, job_id: i32, rule: &Rule) -> bool {
    self.tracker.script_start(job_id, &rule.targets);
    self.deps.bind_group(&rule.targets, &rule.prerequisites);
    let script = script::expand_script(rule, &self.variables);
    let spawned = process::spawn_script(
      job_id,
      script,
      self.options.echo_scripts,
      &self.socket_path,
      self.sender.clone(),
    );
    match spawned {
      Ok(()) => {
        self.running_jobs += 1;
        true
      }
      Err(_) => {
        self.complete_job(job_id, false);
        false
      }
    }
  }

  /// Completes the request of a finished client. A dependency client runs its delayed script
  /// when the targets still need a rebuild; a real client gets its one-byte reply; a failed
  /// original client marks the whole build as failed.
  fn complete_request(&mut self, client: Client, success: bool) {
    self.tracker.request_completed(client.job_id, success);
    if let Some(delayed) = client.delayed {
      if success {
        let needed = self.status.still_need_rebuild(
          &delayed.rule.targets[0],
          delayed.from_recheck,
          &self.deps,
        );
        if needed && !delayed.rule.script.is_empty() {
          self.run_script(client.job_id, &delayed.rule);
        } else {
          self.complete_job(client.job_id, true);
        }
      } else {
        self.complete_job(client.job_id, false);
      }
    } else if let Some(mut reply) = client.reply {
      let _ = reply.write_all(&[if success { 1 } else { 0 }]);
      self.waiting_jobs -= 1;
    }
    if client.job_id < 0 && !success {
      self.build_failure = true;
    }
  }

  /// Handles the completion of a job: on success every target is re-observed; on failure every
  /// target is marked `Failed` and its file removed, so stale half-written outputs do not
  /// poison the next run.
  fn complete_job(&mut self, job_id: i32, success: bool) {
    let Some(targets) = self.job_targets.remove(&job_id) else {
      panic!("BUG: completion for unknown job {job_id}");
    };
    if success {
      for target in &targets {
        self.status.update(target);
      }
    } else {
      for target in &targets {
        self.status.set_state(target, State::Failed);
        let _ = std::fs::remove_file(target);
      }
    }
    self.tracker.job_completed(job_id, &targets, success);
  }

  /// Handles a new connection: reads the request, records its targets as dynamic dependencies
  /// of the posting job's group, and queues a real client at the front of the list. Ill-formed
  /// requests (unknown job id, truncated message) close the connection without a client.
  fn accept_client(&mut self, mut stream: UnixStream) {
    let Ok(request) = ipc::read_request(&mut stream) else {
      self.tracker.protocol_error();
      return;
    };
    let Some(job) = self.job_targets.get(&request.job_id) else {
      self.tracker.protocol_error();
      return;
    };
    let first = job[0].clone();
    let mut targets = request.targets;
    self.dir.normalize_all(&mut targets);
    self.tracker.request_received(request.job_id, &targets);
    for target in &targets {
      self.deps.add_dep(&first, target);
    }
    self.clients.insert(0, Client {
      job_id: request.job_id,
      reply: Some(stream),
      failed: false,
      pending: targets.into(),
      running: BTreeSet::new(),
      delayed: None,
    });
    self.waiting_jobs += 1;
  }
}

/// Reads and parses the rule file.
fn load_rule_file(
  rule_file: &str,
  dir: &BuildDir,
  variables: &mut VariableTable,
  rules: &mut RuleSet,
  deps: &mut DepStore,
) -> Result<()> {
  let source = match std::fs::read_to_string(rule_file) {
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      bail!("Failed to load rules: no {rule_file} found");
    }
    Err(e) => return Err(e).context("Failed to load rules"),
    Ok(source) => source,
  };
  parse::load_rules(&source, dir, variables, rules, deps).context("Failed to load rules")
}

/// Accepts connections on a clone of `listener` and forwards them to the scheduler. The stream
/// is handed over unread; the scheduler reads the bounded request itself.
fn spawn_acceptor(listener: &UnixListener, sender: Sender<Event>) -> Result<()> {
  let acceptor = listener.try_clone().context("Failed to create server")?;
  thread::spawn(move || {
    loop {
      match acceptor.accept() {
        Ok((stream, _)) => {
          if sender.send(Event::Connection(stream)).is_err() {
            break;
          }
        }
        Err(_) => break,
      }
    }
  });
  Ok(())
}
