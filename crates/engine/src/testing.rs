//! Testing utilities for the orchestrators
//!
//! [`ScriptedRunner`] stands in for the database tools: it records every
//! invocation and answers from a list of rules. Responders may touch the
//! filesystem the way the real tool would (a dump writes its directory, a
//! `psql -o` writes its output file).
//!
//! # Example
//!
//! ```ignore
//! use pgvault_engine::testing::{program, ScriptedRunner};
//!
//! let runner = ScriptedRunner::new();
//! runner.on(program("pg_restore"), |_| Ok(CommandOutput::failed(1, "boom")));
//! ```

use std::collections::VecDeque;
use std::path::Path;

use parking_lot::Mutex;

use crate::command::{CommandError, CommandOutput, CommandRunner, Invocation};
use crate::tools::{CURRENT_WAL_LSN_QUERY, LEGACY_WAL_LOCATION_QUERY};

type Matcher = Box<dyn Fn(&Invocation) -> bool + Send + Sync>;
type Responder = Box<dyn Fn(&Invocation) -> Result<CommandOutput, CommandError> + Send + Sync>;

struct Rule {
    matcher: Matcher,
    responder: Responder,
}

/// Fake [`CommandRunner`] driven by match rules
///
/// One-shot rules are consulted first, oldest first; then persistent rules
/// in the order they were added. Unmatched invocations succeed with empty
/// output.
#[derive(Default)]
pub struct ScriptedRunner {
    once: Mutex<VecDeque<Rule>>,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    /// Runner with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner that behaves like a healthy server
    ///
    /// Dumps write a small directory, schema and extension queries write
    /// their files, the WAL position query answers `wal_position` and the
    /// WAL listing is empty.
    pub fn healthy(wal_position: &str) -> Self {
        let runner = Self::new();
        let position = format!(" {}\n", wal_position);
        runner
            .on(is_directory_dump, |inv| {
                write_dump_directory(inv, 64)?;
                Ok(CommandOutput::ok(""))
            })
            .on(is_schema_dump, |inv| {
                write_output_file(inv, "-f", "CREATE TABLE t (id int);\n")?;
                Ok(CommandOutput::ok(""))
            })
            .on(sql_contains("pg_extension"), |inv| {
                write_output_file(inv, "-o", " CREATE EXTENSION IF NOT EXISTS \"plpgsql\";\n")?;
                Ok(CommandOutput::ok(""))
            })
            .on(sql_contains(CURRENT_WAL_LSN_QUERY), move |_| {
                Ok(CommandOutput::ok(position.clone()))
            });
        runner
    }

    /// Add a persistent rule
    pub fn on<M, R>(&self, matcher: M, responder: R) -> &Self
    where
        M: Fn(&Invocation) -> bool + Send + Sync + 'static,
        R: Fn(&Invocation) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        self.rules.lock().push(Rule {
            matcher: Box::new(matcher),
            responder: Box::new(responder),
        });
        self
    }

    /// Add a rule that answers a single matching invocation
    pub fn once<M, R>(&self, matcher: M, responder: R) -> &Self
    where
        M: Fn(&Invocation) -> bool + Send + Sync + 'static,
        R: Fn(&Invocation) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        self.once.lock().push_back(Rule {
            matcher: Box::new(matcher),
            responder: Box::new(responder),
        });
        self
    }

    /// Answer the next current-position query with `position`
    pub fn next_wal_position(&self, position: &str) -> &Self {
        let out = format!(" {}\n", position);
        self.once(sql_contains(CURRENT_WAL_LSN_QUERY), move |_| {
            Ok(CommandOutput::ok(out.clone()))
        })
    }

    /// Make both WAL position queries fail
    pub fn fail_wal_position(&self) -> &Self {
        self.on(sql_contains(CURRENT_WAL_LSN_QUERY), |_| {
            Ok(CommandOutput::failed(1, "ERROR:  function does not exist"))
        })
        .on(sql_contains(LEGACY_WAL_LOCATION_QUERY), |_| {
            Ok(CommandOutput::failed(1, "ERROR:  function does not exist"))
        })
    }

    /// Every invocation so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Invocations of `program`, in order
    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls
            .lock()
            .iter()
            .filter(|inv| inv.program() == program)
            .cloned()
            .collect()
    }

    /// Forget recorded invocations
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        self.calls.lock().push(invocation.clone());

        let one_shot = {
            let mut once = self.once.lock();
            once.iter()
                .position(|rule| (rule.matcher)(invocation))
                .and_then(|idx| once.remove(idx))
        };
        if let Some(rule) = one_shot {
            return (rule.responder)(invocation);
        }

        let rules = self.rules.lock();
        match rules.iter().find(|rule| (rule.matcher)(invocation)) {
            Some(rule) => (rule.responder)(invocation),
            None => Ok(CommandOutput::ok("")),
        }
    }
}

/// Match invocations of `name`
pub fn program(name: &'static str) -> impl Fn(&Invocation) -> bool + Send + Sync {
    move |inv| inv.program() == name
}

/// Match invocations whose `-c` SQL contains `fragment`
pub fn sql_contains(fragment: &'static str) -> impl Fn(&Invocation) -> bool + Send + Sync {
    move |inv| inv.arg_after("-c").is_some_and(|sql| sql.contains(fragment))
}

/// Match a directory-format `pg_dump`
pub fn is_directory_dump(inv: &Invocation) -> bool {
    inv.program() == "pg_dump" && inv.arg_after("-F") == Some("d")
}

/// Match a schema-only `pg_dump`
pub fn is_schema_dump(inv: &Invocation) -> bool {
    inv.program() == "pg_dump" && inv.has_arg("-s")
}

fn spawn_error(inv: &Invocation, source: std::io::Error) -> CommandError {
    CommandError::Spawn {
        program: inv.program().to_string(),
        source,
    }
}

/// Write a fake dump into the directory named by `-f`
///
/// Produces `toc.dat` plus a data file of `data_bytes` bytes.
pub fn write_dump_directory(inv: &Invocation, data_bytes: usize) -> Result<(), CommandError> {
    let Some(dir) = inv.arg_after("-f") else {
        return Ok(());
    };
    let dir = Path::new(dir);
    std::fs::create_dir_all(dir).map_err(|e| spawn_error(inv, e))?;
    std::fs::write(dir.join("toc.dat"), b"PGDMP").map_err(|e| spawn_error(inv, e))?;
    let data: Vec<u8> = (0..=255u8).cycle().take(data_bytes).collect();
    std::fs::write(dir.join("3001.dat.gz"), data).map_err(|e| spawn_error(inv, e))?;
    Ok(())
}

/// Write `content` to the file named by the argument after `flag`
pub fn write_output_file(inv: &Invocation, flag: &str, content: &str) -> Result<(), CommandError> {
    match inv.arg_after(flag) {
        Some(path) => std::fs::write(path, content).map_err(|e| spawn_error(inv, e)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_succeeds_and_is_recorded() {
        let runner = ScriptedRunner::new();
        let out = runner.run(&Invocation::new("pg_restore").arg("/x")).unwrap();
        assert!(out.success());
        assert_eq!(runner.calls_to("pg_restore").len(), 1);
    }

    #[test]
    fn test_once_rules_take_precedence_then_expire() {
        let runner = ScriptedRunner::new();
        runner
            .on(program("psql"), |_| Ok(CommandOutput::ok("always")))
            .once(program("psql"), |_| Ok(CommandOutput::ok("first")));

        let inv = Invocation::new("psql");
        assert_eq!(runner.run(&inv).unwrap().stdout_lossy(), "first");
        assert_eq!(runner.run(&inv).unwrap().stdout_lossy(), "always");
    }

    #[test]
    fn test_healthy_dump_writes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::healthy("0/16B3748");
        let target = dir.path().join("full_x");
        let inv = Invocation::new("pg_dump")
            .args(["-F", "d", "-f"])
            .arg(target.display().to_string());

        assert!(runner.run(&inv).unwrap().success());
        assert!(target.join("toc.dat").exists());
        assert_eq!(std::fs::metadata(target.join("3001.dat.gz")).unwrap().len(), 64);
    }
}
