//! Database dump and restore tooling.
//!
//! The engines never talk to the database directly; they go through a
//! [`DatabaseTool`]. [`Postgres`] runs the PostgreSQL client programs behind
//! the configured privilege wrapper and keeps each program's stderr in a log
//! file so a failure can point the operator at the tool's own output.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use stackctl_config::DatabaseConfig;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

/// Operations on the application database.
#[async_trait]
pub trait DatabaseTool: Send + Sync {
    /// Write a full dump of `db` to `file`.
    async fn dump(&self, db: &str, file: &Path) -> Result<()>;

    /// Load a dump produced by [`DatabaseTool::dump`] into `db`.
    async fn restore(&self, db: &str, file: &Path) -> Result<()>;

    /// Drop `db` if it exists and create it empty, owned by `owner`.
    async fn drop_create(&self, db: &str, owner: &str) -> Result<()>;

    /// Re-apply ownership and grants for `owner` on `db`.
    async fn grant(&self, db: &str, owner: &str) -> Result<()>;
}

/// PostgreSQL client tools.
pub struct Postgres {
    config: DatabaseConfig,
    log_dir: PathBuf,
}

impl Postgres {
    pub fn new(config: DatabaseConfig, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            log_dir: log_dir.into(),
        }
    }

    fn argv(&self, program: &str, args: &[&str]) -> Vec<String> {
        self.config
            .privilege_wrapper
            .iter()
            .cloned()
            .chain(std::iter::once(program.to_string()))
            .chain(args.iter().map(|a| a.to_string()))
            .collect()
    }

    /// Append a program's stderr to its operation log.
    fn write_log(&self, operation: &str, argv: &[String], stderr: &[u8]) -> Option<PathBuf> {
        let path = self.log_dir.join(format!("db-{}.log", operation));
        let result = fs::create_dir_all(&self.log_dir).and_then(|_| {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "=== {} {}", Utc::now().to_rfc3339(), argv.join(" "))?;
            file.write_all(stderr)?;
            Ok(())
        });
        match result {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = ?path, error = %e, "Could not write tool log");
                None
            }
        }
    }

    /// Run one client program, optionally wiring a file to stdin or stdout.
    async fn run(
        &self,
        operation: &str,
        argv: Vec<String>,
        stdin: Option<&Path>,
        stdout: Option<&Path>,
    ) -> Result<()> {
        let (program, args) = argv.split_first().ok_or_else(|| Error::ToolUnavailable {
            tool: operation.to_string(),
            reason: "empty command".to_string(),
        })?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).stderr(Stdio::piped()).kill_on_drop(true);
        match stdin {
            Some(path) => cmd.stdin(File::open(path)?),
            None => cmd.stdin(Stdio::null()),
        };
        match stdout {
            Some(path) => cmd.stdout(File::create(path)?),
            None => cmd.stdout(Stdio::null()),
        };

        debug!(operation, command = ?argv, "Running database tool");
        let output = cmd.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Error::ToolUnavailable {
                    tool: program.clone(),
                    reason: e.to_string(),
                }
            }
            _ => Error::Io(e),
        })?;

        let log = self.write_log(operation, &argv, &output.stderr);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().last().unwrap_or("").trim().to_string();
            return Err(Error::DatabaseTool {
                operation: operation.to_string(),
                reason: format!("{} exited with {}: {}", program, output.status, last),
                log,
            });
        }
        Ok(())
    }
}

/// Double-quote an identifier for SQL.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Ownership and privileges for `owner` on a freshly restored `db`.
fn grant_sql(db: &str, owner: &str) -> String {
    let (db, owner) = (quote_ident(db), quote_ident(owner));
    format!(
        "ALTER DATABASE {db} OWNER TO {owner}; \
         GRANT ALL PRIVILEGES ON DATABASE {db} TO {owner}; \
         ALTER SCHEMA public OWNER TO {owner}; \
         GRANT ALL ON SCHEMA public TO {owner};",
        db = db,
        owner = owner
    )
}

#[async_trait]
impl DatabaseTool for Postgres {
    async fn dump(&self, db: &str, file: &Path) -> Result<()> {
        info!(database = %db, "Dumping database");
        let argv = self.argv(&self.config.pg_dump, &["--format=custom", "--no-password", db]);
        self.run("dump", argv, None, Some(file)).await
    }

    async fn restore(&self, db: &str, file: &Path) -> Result<()> {
        info!(database = %db, "Restoring database");
        let dbname = format!("--dbname={}", db);
        // Objects are created as the owner role instead of the connecting one.
        let role = format!("--role={}", self.config.owner);
        let argv = self.argv(
            &self.config.pg_restore,
            &["--no-owner", &role, "--exit-on-error", "--no-password", &dbname],
        );
        self.run("restore", argv, Some(file), None).await
    }

    async fn drop_create(&self, db: &str, owner: &str) -> Result<()> {
        info!(database = %db, owner = %owner, "Recreating database");
        let drop = self.argv(&self.config.dropdb, &["--if-exists", db]);
        self.run("drop", drop, None, None).await?;
        let owner_arg = format!("--owner={}", owner);
        let create = self.argv(&self.config.createdb, &[&owner_arg, db]);
        self.run("create", create, None, None).await
    }

    async fn grant(&self, db: &str, owner: &str) -> Result<()> {
        info!(database = %db, owner = %owner, "Applying ownership and grants");
        let sql = grant_sql(db, owner);
        let dbname = format!("--dbname={}", db);
        let argv = self.argv(
            &self.config.psql,
            &["--no-password", "-v", "ON_ERROR_STOP=1", &dbname, "-c", &sql],
        );
        self.run("grant", argv, None, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn tool(log_dir: &Path, wrapper: &[&str]) -> Postgres {
        let config = DatabaseConfig {
            privilege_wrapper: wrapper.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        Postgres::new(config, log_dir)
    }

    #[test]
    fn test_argv_uses_wrapper() {
        let pg = tool(Path::new("/tmp"), &["runuser", "-u", "postgres", "--"]);
        assert_eq!(
            pg.argv("pg_dump", &["--format=custom", "stack"]),
            vec!["runuser", "-u", "postgres", "--", "pg_dump", "--format=custom", "stack"]
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("stack"), "\"stack\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[tokio::test]
    async fn test_failure_reports_log() {
        let dir = TempDir::new().unwrap();
        // "sh -c" stands in for the wrapper; the tool name becomes $0
        let pg = tool(
            dir.path(),
            &["sh", "-c", "echo 'FATAL: role missing' >&2; exit 3"],
        );

        let err = pg.drop_create("stack", "stack").await.unwrap_err();

        assert_matches!(err, Error::DatabaseTool { ref operation, .. } if operation == "drop");
        let log = err.log_path().unwrap().to_path_buf();
        assert_eq!(log, dir.path().join("db-drop.log"));
        assert!(fs::read_to_string(&log).unwrap().contains("FATAL: role missing"));
        assert!(err.to_string().contains("FATAL: role missing"));
    }

    #[tokio::test]
    async fn test_dump_writes_stdout_to_file() {
        let dir = TempDir::new().unwrap();
        let pg = tool(dir.path(), &["sh", "-c", "echo dump-bytes"]);
        let file = dir.path().join("out.dump");

        pg.dump("stack", &file).await.unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "dump-bytes\n");
    }

    /// Wrapper that records the argv it is handed, one argument per line.
    fn recording_tool(dir: &Path) -> (Postgres, PathBuf) {
        let out = dir.join("argv");
        let script = format!("printf '%s\\n' \"$0\" \"$@\" > '{}'", out.display());
        (tool(dir, &["sh", "-c", &script]), out)
    }

    #[tokio::test]
    async fn test_grant_statements() {
        let dir = TempDir::new().unwrap();
        let (pg, out) = recording_tool(dir.path());

        pg.grant("stack", "stack_app").await.unwrap();

        let argv = fs::read_to_string(&out).unwrap();
        let argv: Vec<&str> = argv.lines().collect();
        assert_eq!(
            &argv[..5],
            &["psql", "--no-password", "-v", "ON_ERROR_STOP=1", "--dbname=stack"]
        );
        assert_eq!(argv[5], "-c");
        let statements: Vec<&str> = argv[6]
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(
            statements,
            vec![
                "ALTER DATABASE \"stack\" OWNER TO \"stack_app\"",
                "GRANT ALL PRIVILEGES ON DATABASE \"stack\" TO \"stack_app\"",
                "ALTER SCHEMA public OWNER TO \"stack_app\"",
                "GRANT ALL ON SCHEMA public TO \"stack_app\"",
            ]
        );
        // The connecting role is the bootstrap superuser; its objects stay put.
        assert!(statements.iter().all(|s| !s.contains("REASSIGN")));
        assert!(statements.iter().all(|s| !s.contains("CURRENT_USER")));
    }

    #[tokio::test]
    async fn test_restore_creates_objects_as_owner() {
        let dir = TempDir::new().unwrap();
        let (mut pg, out) = recording_tool(dir.path());
        pg.config.owner = "stack_app".to_string();
        let dump = dir.path().join("in.dump");
        fs::write(&dump, b"dump").unwrap();

        pg.restore("stack", &dump).await.unwrap();

        let argv = fs::read_to_string(&out).unwrap();
        let argv: Vec<&str> = argv.lines().collect();
        assert_eq!(argv[0], "pg_restore");
        assert!(argv.contains(&"--no-owner"));
        assert!(argv.contains(&"--role=stack_app"));
        assert!(argv.contains(&"--dbname=stack"));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let dir = TempDir::new().unwrap();
        let pg = tool(dir.path(), &["/nonexistent/runuser"]);
        assert_matches!(
            pg.dump("stack", &dir.path().join("x")).await,
            Err(Error::ToolUnavailable { .. })
        );
    }
}
