use std::process::{Command, Output};

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const CONTR_SQL: &str = "select author, count(*) as acts from activities \
     where project_slug = '{{project_slug}}' and ts >= {{date_from}} and ts < {{date_to}} \
     group by author order by acts desc, author";

const CATALOG: &str = r#"
metrics:
  contributors:
    metrics: [contr]
    table: metric_contr
    project_slugs: all
    time_ranges: "a,y"
"#;

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> TestResult<Self> {
        let dir = tempfile::tempdir()?;
        let conn = rusqlite::Connection::open(dir.path().join("metrics.db"))?;
        conn.execute_batch(
            "create table mv_subprojects(id int, project_slug text);
             insert into mv_subprojects values (1, 'kube'), (2, 'linux');
             create table activities(author text, project_slug text, ts text);
             insert into activities values
               ('ann', 'kube', date('now', '-30 days')),
               ('bob', 'kube', date('now', '-30 days')),
               ('ann', 'linux', date('now', '-30 days'));",
        )?;
        std::fs::create_dir_all(dir.path().join("sql"))?;
        std::fs::write(dir.path().join("sql").join("contr.sql"), CONTR_SQL)?;
        std::fs::write(dir.path().join("calculations.yaml"), CATALOG)?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().to_string()
    }

    /// A command with a clean `V3_*` environment pointing at this workspace.
    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_calcmetric"));
        for (key, _) in std::env::vars().filter(|(k, _)| k.starts_with("V3_")) {
            cmd.env_remove(key);
        }
        cmd.args(args)
            .env("V3_CONN", self.path("metrics.db"))
            .env("V3_SQL_PATH", self.path("sql"));
        cmd
    }

    fn calc(&self, slug: &str, range: &str) -> TestResult<Output> {
        Ok(self
            .command(&["calc"])
            .env("V3_METRIC", "contr")
            .env("V3_TABLE", "metric_contr")
            .env("V3_PROJECT_SLUG", slug)
            .env("V3_TIME_RANGE", range)
            .output()?)
    }

    fn count(&self, sql: &str) -> TestResult<i64> {
        let conn = rusqlite::Connection::open(self.dir.path().join("metrics.db"))?;
        Ok(conn.query_row(sql, [], |r| r.get(0))?)
    }
}

fn describe(output: &Output) -> String {
    format!(
        "status {:?}\nstdout:\n{}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn calc_computes_then_reports_nothing_to_do() -> TestResult<()> {
    let ws = Workspace::new()?;

    let first = ws.calc("kube", "a")?;
    assert_eq!(first.status.code(), Some(0), "{}", describe(&first));
    assert_eq!(ws.count("select count(*) from metric_contr")?, 2);

    let second = ws.calc("kube", "a")?;
    assert_eq!(second.status.code(), Some(66), "{}", describe(&second));
    assert_eq!(ws.count("select count(*) from metric_contr")?, 2);
    Ok(())
}

#[test]
fn calc_without_required_settings_fails_permanently() -> TestResult<()> {
    let ws = Workspace::new()?;
    let output = ws.command(&["calc"]).env("V3_METRIC", "contr").output()?;
    assert_eq!(output.status.code(), Some(65), "{}", describe(&output));
    Ok(())
}

#[test]
fn calc_with_unknown_range_fails_permanently() -> TestResult<()> {
    let ws = Workspace::new()?;
    let output = ws.calc("kube", "fortnight")?;
    assert_eq!(output.status.code(), Some(65), "{}", describe(&output));
    Ok(())
}

#[test]
fn sync_dispatches_calc_processes() -> TestResult<()> {
    let ws = Workspace::new()?;
    let catalog = ws.path("calculations.yaml");
    let output = ws
        .command(&["sync", "--catalog", &catalog, "--threads", "2"])
        .output()?;
    assert_eq!(output.status.code(), Some(0), "{}", describe(&output));

    assert_eq!(
        ws.count("select count(distinct project_slug) from metric_contr where time_range = 'a'")?,
        2
    );
    assert_eq!(
        ws.count(
            "select count(*) from metric_last_sync \
             where metric_name = 'contributors:metric_contr:contr'"
        )?,
        1
    );
    Ok(())
}

#[test]
fn sync_reports_failed_tasks_with_nonzero_exit() -> TestResult<()> {
    let ws = Workspace::new()?;
    std::fs::remove_file(ws.dir.path().join("sql").join("contr.sql"))?;
    let catalog = ws.path("calculations.yaml");
    let output = ws.command(&["sync", "--catalog", &catalog]).output()?;
    assert_ne!(output.status.code(), Some(0), "{}", describe(&output));
    assert_eq!(
        ws.count("select count(*) from sqlite_master where name = 'metric_last_sync'")?,
        0
    );
    Ok(())
}
