//! Database dump commands.
//!
//! A dump is a single command whose stdout is the SQL script. It runs either
//! as a local process or as a command line on a [`RemoteShell`], optionally
//! wrapped in `docker exec`.

use crate::process;
use crate::profile::DatabaseTarget;
use crate::remote::{shell_quote, RemoteShell};
use crate::utils::{BackupError, Result};
use serde::Deserialize;
use std::fmt;
use std::io::Write;
use std::process::Command;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEngine {
    Mysql,
    Mariadb,
    Postgres,
    DockerMysql,
    DockerMariadb,
    DockerPostgres,
}

impl DbEngine {
    pub fn in_docker(self) -> bool {
        matches!(
            self,
            DbEngine::DockerMysql | DbEngine::DockerMariadb | DbEngine::DockerPostgres
        )
    }

    fn is_postgres(self) -> bool {
        matches!(self, DbEngine::Postgres | DbEngine::DockerPostgres)
    }

    /// Archive folder holding the dumps of this engine family.
    pub fn dump_folder(self) -> &'static str {
        if self.is_postgres() {
            "_pgdump"
        } else {
            "_mysqldump"
        }
    }
}

impl FromStr for DbEngine {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mysql" => Ok(DbEngine::Mysql),
            "mariadb" => Ok(DbEngine::Mariadb),
            "postgres" => Ok(DbEngine::Postgres),
            "dockermysql" => Ok(DbEngine::DockerMysql),
            "dockermariadb" => Ok(DbEngine::DockerMariadb),
            "dockerpostgres" => Ok(DbEngine::DockerPostgres),
            other => Err(BackupError::config(format!(
                "invalid database type: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for DbEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbEngine::Mysql => "mysql",
            DbEngine::Mariadb => "mariadb",
            DbEngine::Postgres => "postgres",
            DbEngine::DockerMysql => "dockermysql",
            DbEngine::DockerMariadb => "dockermariadb",
            DbEngine::DockerPostgres => "dockerpostgres",
        };
        f.write_str(name)
    }
}

/// Dump program names, overridable from the runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DumpSettings {
    pub mysqldump: String,
    pub pg_dump: String,
    pub docker: String,
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            mysqldump: "mysqldump".to_string(),
            pg_dump: "pg_dump".to_string(),
            docker: "docker".to_string(),
        }
    }
}

/// Archive path of a database dump, e.g. `_mysqldump/shop.dump.sql`.
pub fn entry_path(db: &DatabaseTarget) -> String {
    format!("{}/{}.dump.sql", db.engine.dump_folder(), db.name)
}

/// A fully resolved dump invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl DumpCommand {
    pub fn for_target(db: &DatabaseTarget, settings: &DumpSettings) -> Result<Self> {
        let (dump_bin, password_var) = if db.engine.is_postgres() {
            (settings.pg_dump.as_str(), "PGPASSWORD")
        } else {
            (settings.mysqldump.as_str(), "MYSQL_PWD")
        };

        let mut dump_args = Vec::new();
        if let Some(user) = db.user.as_deref().filter(|u| !u.is_empty()) {
            dump_args.push(if db.engine.is_postgres() { "-U" } else { "-u" }.to_string());
            dump_args.push(user.to_string());
        }
        if db.engine.is_postgres() {
            dump_args.extend(["--clean", "--if-exists", "--create"].map(String::from));
        } else {
            dump_args.extend(["--add-drop-database", "--databases"].map(String::from));
        }
        dump_args.push(db.name.clone());

        let env: Vec<(String, String)> = db
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| vec![(password_var.to_string(), p.to_string())])
            .unwrap_or_default();

        if !db.engine.in_docker() {
            return Ok(Self {
                program: dump_bin.to_string(),
                args: dump_args,
                env,
            });
        }

        let container = db.container.as_deref().ok_or_else(|| {
            BackupError::config(format!("database {} needs a container name", db.name))
        })?;

        let mut args = vec!["exec".to_string()];
        for (key, value) in &env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(container.to_string());
        // Inside the container the dump tool is found on the container's PATH.
        args.push(if db.engine.is_postgres() { "pg_dump" } else { "mysqldump" }.to_string());
        args.extend(dump_args);

        Ok(Self {
            program: settings.docker.clone(),
            args,
            env: Vec::new(),
        })
    }

    /// Single shell line: `VAR='v' 'program' 'arg'...`.
    pub fn render(&self) -> String {
        self.env
            .iter()
            .map(|(k, v)| format!("{k}={}", shell_quote(v)))
            .chain(std::iter::once(shell_quote(&self.program)))
            .chain(self.args.iter().map(|a| shell_quote(a)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run on this machine, streaming the dump into `sink`.
    pub fn run_local(&self, sink: &mut dyn Write) -> Result<u64> {
        let program = process::find_program(&self.program)?;
        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        process::stream_stdout(&mut cmd, sink)
    }

    /// Run through `shell`, streaming the dump into `sink`.
    pub fn run_remote(&self, shell: &dyn RemoteShell, sink: &mut dyn Write) -> Result<u64> {
        shell.stream(&self.render(), sink)
    }
}
