use crate::error::AllocError;
use crate::model::Assignment;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;

pub const DB_FILE: &str = "hallseat.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS allocation_runs(
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            input_digest TEXT NOT NULL,
            students_total INTEGER NOT NULL,
            seated_total INTEGER NOT NULL,
            classrooms_used INTEGER NOT NULL,
            seq INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS allocations(
            run_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            classroom_id TEXT NOT NULL,
            bench_number INTEGER NOT NULL,
            reg_no TEXT NOT NULL,
            student_name TEXT NOT NULL,
            subject TEXT NOT NULL,
            year_of_study TEXT NOT NULL,
            teacher_name TEXT NOT NULL,
            PRIMARY KEY(run_id, seq),
            FOREIGN KEY(run_id) REFERENCES allocation_runs(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_allocations_reg_no ON allocations(run_id, reg_no)",
        [],
    )?;

    Ok(conn)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRow {
    pub id: String,
    pub created_at: String,
    pub input_digest: String,
    pub students_total: i64,
    pub seated_total: i64,
    pub classrooms_used: i64,
}

/// Stores a run and its rows atomically. Run order is kept by an explicit
/// sequence so two runs inside the same second still sort correctly.
pub fn insert_run(conn: &mut Connection, run: &RunRow, rows: &[Assignment]) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM allocation_runs",
        [],
        |r| r.get(0),
    )?;
    tx.execute(
        "INSERT INTO allocation_runs(id, created_at, input_digest, students_total, seated_total, classrooms_used, seq)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &run.id,
            &run.created_at,
            &run.input_digest,
            run.students_total,
            run.seated_total,
            run.classrooms_used,
            seq,
        ),
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO allocations(run_id, seq, classroom_id, bench_number, reg_no, student_name, subject, year_of_study, teacher_name)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for (i, a) in rows.iter().enumerate() {
            stmt.execute((
                &run.id,
                i as i64,
                &a.classroom_id,
                a.bench_number,
                &a.reg_no,
                &a.student_name,
                &a.subject,
                &a.year_of_study,
                &a.teacher_name,
            ))?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn map_run(r: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: r.get(0)?,
        created_at: r.get(1)?,
        input_digest: r.get(2)?,
        students_total: r.get(3)?,
        seated_total: r.get(4)?,
        classrooms_used: r.get(5)?,
    })
}

const RUN_COLUMNS: &str =
    "id, created_at, input_digest, students_total, seated_total, classrooms_used";

pub fn latest_run(conn: &Connection) -> anyhow::Result<Option<RunRow>> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM allocation_runs ORDER BY seq DESC LIMIT 1");
    Ok(conn.query_row(&sql, [], map_run).optional()?)
}

pub fn get_run(conn: &Connection, run_id: &str) -> anyhow::Result<Option<RunRow>> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM allocation_runs WHERE id = ?");
    Ok(conn.query_row(&sql, [run_id], map_run).optional()?)
}

/// Newest first.
pub fn list_runs(conn: &Connection) -> anyhow::Result<Vec<RunRow>> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM allocation_runs ORDER BY seq DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], map_run)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_assignments(conn: &Connection, run_id: &str) -> anyhow::Result<Vec<Assignment>> {
    let mut stmt = conn.prepare(
        "SELECT classroom_id, bench_number, reg_no, student_name, subject, year_of_study, teacher_name
         FROM allocations
         WHERE run_id = ?
         ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([run_id], |r| {
            Ok(Assignment {
                classroom_id: r.get(0)?,
                bench_number: r.get(1)?,
                reg_no: r.get(2)?,
                student_name: r.get(3)?,
                subject: r.get(4)?,
                year_of_study: r.get(5)?,
                teacher_name: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Student,
    Teacher,
}

impl FromStr for SearchMode {
    type Err = AllocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(SearchMode::Student),
            "teacher" => Ok(SearchMode::Teacher),
            other => Err(AllocError::InvalidParam {
                field: "userType",
                message: format!("expected \"student\" or \"teacher\", got {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// No allocation has been stored yet.
    NoAllocation,
    /// An explicit run id names no stored run.
    UnknownRun,
    NotFound,
    Found(Vec<Assignment>),
}

impl SearchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found(_))
    }
}

/// Reg no: exact string match on the trimmed query.
/// Teacher: case-insensitive substring. An empty teacher query matches every row.
pub fn matches(mode: SearchMode, query: &str, row: &Assignment) -> bool {
    match mode {
        SearchMode::Student => row.reg_no == query.trim(),
        SearchMode::Teacher => row
            .teacher_name
            .to_lowercase()
            .contains(&query.to_lowercase()),
    }
}

pub fn search(
    conn: &Connection,
    run_id: Option<&str>,
    mode: SearchMode,
    query: &str,
) -> anyhow::Result<SearchOutcome> {
    let run = match run_id {
        Some(id) => match get_run(conn, id)? {
            Some(run) => run,
            None => return Ok(SearchOutcome::UnknownRun),
        },
        None => match latest_run(conn)? {
            Some(run) => run,
            None => return Ok(SearchOutcome::NoAllocation),
        },
    };
    let hits: Vec<Assignment> = load_assignments(conn, &run.id)?
        .into_iter()
        .filter(|a| matches(mode, query, a))
        .collect();
    if hits.is_empty() {
        Ok(SearchOutcome::NotFound)
    } else {
        Ok(SearchOutcome::Found(hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn row(bench: u32, reg: &str, teacher: &str) -> Assignment {
        Assignment {
            classroom_id: "C1".into(),
            bench_number: bench,
            reg_no: reg.into(),
            student_name: format!("name-{reg}"),
            subject: "Math".into(),
            year_of_study: "1".into(),
            teacher_name: teacher.into(),
        }
    }

    fn run(id: &str) -> RunRow {
        RunRow {
            id: id.into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            input_digest: "00".into(),
            students_total: 2,
            seated_total: 2,
            classrooms_used: 1,
        }
    }

    #[test]
    fn runs_roundtrip_and_latest_wins() {
        let ws = temp_dir("hallseat-db-runs");
        let mut conn = open_db(&ws).expect("open db");
        assert!(latest_run(&conn).expect("latest").is_none());

        insert_run(&mut conn, &run("a"), &[row(1, "R1", "Tom")]).expect("insert a");
        insert_run(&mut conn, &run("b"), &[row(1, "R2", "Ann"), row(1, "R3", "Ann")]).expect("insert b");

        assert_eq!(latest_run(&conn).expect("latest").map(|r| r.id), Some("b".to_string()));
        let ids: Vec<String> = list_runs(&conn).expect("list").into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
        let rows = load_assignments(&conn, "b").expect("load");
        assert_eq!(rows, vec![row(1, "R2", "Ann"), row(1, "R3", "Ann")]);

        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn search_distinguishes_no_allocation_from_not_found() {
        let ws = temp_dir("hallseat-db-search");
        let mut conn = open_db(&ws).expect("open db");
        assert_eq!(
            search(&conn, None, SearchMode::Student, "R1").expect("search"),
            SearchOutcome::NoAllocation
        );

        insert_run(
            &mut conn,
            &run("r"),
            &[row(1, "R1", "Tom Baker"), row(1, "R10", "Ann Lee"), row(2, "R2", "tommy")],
        )
        .expect("insert");

        match search(&conn, None, SearchMode::Student, " R1 ").expect("search") {
            SearchOutcome::Found(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].reg_no, "R1");
            }
            other => panic!("unexpected {other:?}"),
        }
        match search(&conn, None, SearchMode::Teacher, "TOM").expect("search") {
            SearchOutcome::Found(rows) => {
                let regs: Vec<&str> = rows.iter().map(|r| r.reg_no.as_str()).collect();
                assert_eq!(regs, vec!["R1", "R2"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            search(&conn, None, SearchMode::Student, "R9").expect("search"),
            SearchOutcome::NotFound
        );
        assert_eq!(
            search(&conn, Some("missing"), SearchMode::Teacher, "Tom").expect("search"),
            SearchOutcome::UnknownRun
        );

        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn unknown_run_id_is_reported_even_before_any_run() {
        let ws = temp_dir("hallseat-db-unknown-run");
        let mut conn = open_db(&ws).expect("open db");
        assert_eq!(
            search(&conn, Some("nope"), SearchMode::Student, "R1").expect("search"),
            SearchOutcome::UnknownRun
        );
        insert_run(&mut conn, &run("r1"), &[row(1, "R1", "Tom")]).expect("insert");
        assert!(search(&conn, Some("r1"), SearchMode::Student, "R1")
            .expect("search")
            .is_found());
        assert_eq!(
            search(&conn, Some("r2"), SearchMode::Student, "R1").expect("search"),
            SearchOutcome::UnknownRun
        );

        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn unknown_search_mode_is_a_validation_error() {
        let e = "admin".parse::<SearchMode>().expect_err("bad mode");
        assert_eq!(e.code(), "validation_error");
        assert_eq!("teacher".parse::<SearchMode>().ok(), Some(SearchMode::Teacher));
    }
}
