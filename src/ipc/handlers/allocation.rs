use crate::alloc;
use crate::db::{self, RunRow, SearchMode, SearchOutcome};
use crate::error::{AllocError, Entity};
use crate::export::{self, ExportFormat};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Record;
use crate::tabular;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const NOT_FOUND_MESSAGE: &str = "No allocation found for this ID.";
const NO_ALLOCATION_MESSAGE: &str = "No allocation has been generated yet.";

fn db_err(code: &'static str) -> impl Fn(anyhow::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, format!("{e:#}"))
}

fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn opt_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(_) => Err(HandlerErr::new("bad_params", format!("{key} must be a string"))),
    }
}

/// Inline `key` array or a CSV file at `<key>Path`.
fn input_records(params: &Value, key: &str, entity: Entity) -> Result<Vec<Record>, HandlerErr> {
    if let Some(v) = params.get(key).filter(|v| !v.is_null()) {
        let Some(arr) = v.as_array() else {
            return Err(HandlerErr::new("bad_params", format!("{key} must be an array")));
        };
        return arr
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.as_object()
                    .cloned()
                    .ok_or_else(|| HandlerErr::from(AllocError::invalid(entity, i, None, "row must be an object")))
            })
            .collect();
    }

    let path_key = format!("{key}Path");
    let Some(path) = opt_str(params, &path_key)? else {
        return Err(HandlerErr::new(
            "bad_params",
            format!("missing {key} (or {path_key})"),
        ));
    };
    tabular::load_table(Path::new(path)).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": path }))
    })
}

fn resolve_export(
    state: &AppState,
    params: &Value,
) -> Result<Option<(PathBuf, ExportFormat)>, HandlerErr> {
    let explicit_format = opt_str(params, "format")?
        .map(|f| f.parse::<ExportFormat>())
        .transpose()?;
    let path = opt_str(params, "exportPath")?
        .or(opt_str(params, "path")?)
        .map(PathBuf::from);

    match path {
        Some(p) => {
            let format = explicit_format
                .or_else(|| ExportFormat::from_path(&p))
                .unwrap_or(ExportFormat::Xlsx);
            Ok(Some((p, format)))
        }
        None => {
            let format = explicit_format.unwrap_or(ExportFormat::Xlsx);
            Ok(state
                .outputs_dir()
                .map(|dir| (dir.join(format.default_file_name()), format)))
        }
    }
}

fn handle_run(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let p = &req.params;
    // Teachers are loaded first so an empty list fails before anything else is read.
    let teachers = input_records(p, "teachers", Entity::Teacher)?;
    if teachers.is_empty() {
        return Err(AllocError::no_teachers().into());
    }
    let classrooms = input_records(p, "classrooms", Entity::Classroom)?;
    let students = input_records(p, "students", Entity::Student)?;

    let persist = match p.get("persist") {
        None | Some(Value::Null) => state.db.is_some(),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::new("bad_params", "persist must be a boolean"))?,
    };
    if persist && state.db.is_none() {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    }
    // Export parameters are checked before anything is written or stored.
    let explicit_target =
        opt_str(p, "exportPath")?.is_some() || opt_str(p, "path")?.is_some();
    let export_target = if persist || explicit_target {
        resolve_export(state, p)?
    } else {
        None
    };

    let allocation = alloc::allocate_records(
        &students,
        &classrooms,
        &teachers,
        state.config.max_students,
    )
    .inspect_err(|e| tracing::warn!(error = %e, "allocation rejected"))?;
    let digest = allocation.input_digest();
    let summary = &allocation.summary;
    tracing::info!(
        students = summary.students_total,
        seated = summary.students_seated,
        unseated = summary.unseated.len(),
        classrooms_used = summary.classrooms_used,
        paired_benches = summary.paired_benches,
        digest = %digest,
        "allocation computed"
    );

    // The export is written first so a failed write never leaves a stored run behind.
    let mut export_path: Option<String> = None;
    if let Some((path, format)) = export_target {
        export::write_allocation(&path, format, &allocation.assignments).map_err(|e| {
            HandlerErr::new("io_failed", format!("{e:#}"))
                .with_details(json!({ "path": path.to_string_lossy() }))
        })?;
        export_path = Some(path.to_string_lossy().to_string());
    }

    let mut run_id: Option<String> = None;
    if persist {
        let run = RunRow {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            input_digest: digest.clone(),
            students_total: summary.students_total as i64,
            seated_total: summary.students_seated as i64,
            classrooms_used: summary.classrooms_used as i64,
        };
        let Some(conn) = state.db.as_mut() else {
            return Err(HandlerErr::new("no_workspace", "select a workspace first"));
        };
        db::insert_run(conn, &run, &allocation.assignments)
            .map_err(db_err("db_insert_failed"))?;
        tracing::info!(run_id = %run.id, rows = allocation.assignments.len(), "allocation stored");
        run_id = Some(run.id);
    }

    Ok(json!({
        "runId": run_id,
        "inputDigest": digest,
        "assignments": allocation.assignments,
        "summary": allocation.summary,
        "exportPath": export_path,
    }))
}

fn unknown_run(id: &str) -> HandlerErr {
    HandlerErr::new("not_found", format!("no allocation run {id}"))
        .with_details(json!({ "runId": id }))
}

fn resolve_run(conn: &Connection, params: &Value) -> Result<RunRow, HandlerErr> {
    match opt_str(params, "runId")? {
        Some(id) => db::get_run(conn, id)
            .map_err(db_err("db_query_failed"))?
            .ok_or_else(|| unknown_run(id)),
        None => db::latest_run(conn)
            .map_err(db_err("db_query_failed"))?
            .ok_or_else(|| HandlerErr::new("not_found", NO_ALLOCATION_MESSAGE)),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let run = resolve_run(conn, &req.params)?;
    let rows = db::load_assignments(conn, &run.id).map_err(db_err("db_query_failed"))?;
    Ok(json!({ "run": run, "assignments": rows }))
}

fn handle_runs(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let runs = db::list_runs(conn).map_err(db_err("db_query_failed"))?;
    Ok(json!({ "runs": runs }))
}

fn handle_export(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let run = resolve_run(conn, &req.params)?;
    let rows = db::load_assignments(conn, &run.id).map_err(db_err("db_query_failed"))?;
    let Some((path, format)) = resolve_export(state, &req.params)? else {
        return Err(HandlerErr::new("bad_params", "missing path"));
    };
    export::write_allocation(&path, format, &rows).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}"))
            .with_details(json!({ "path": path.to_string_lossy() }))
    })?;
    Ok(json!({
        "runId": run.id,
        "path": path.to_string_lossy(),
        "format": format.extension(),
        "rowsExported": rows.len(),
    }))
}

fn handle_search(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let p = &req.params;
    let user_type = p.get("userType").and_then(|v| v.as_str()).unwrap_or("");
    let mode: SearchMode = user_type.parse()?;
    let Some(query) = p.get("query").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("bad_params", "missing query"));
    };
    let run_id = opt_str(p, "runId")?;

    let conn = require_db(state)?;
    let outcome = db::search(conn, run_id, mode, query).map_err(db_err("db_query_failed"))?;
    tracing::debug!(user_type, found = outcome.is_found(), "allocation search");

    let result = match outcome {
        SearchOutcome::Found(rows) => json!({
            "found": true,
            "reason": Value::Null,
            "rows": rows,
            "message": Value::Null,
        }),
        SearchOutcome::NotFound => json!({
            "found": false,
            "reason": "not_found",
            "rows": [],
            "message": NOT_FOUND_MESSAGE,
        }),
        SearchOutcome::UnknownRun => return Err(unknown_run(run_id.unwrap_or_default())),
        SearchOutcome::NoAllocation => json!({
            "found": false,
            "reason": "no_allocation",
            "rows": [],
            "message": NO_ALLOCATION_MESSAGE,
        }),
    };
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&mut AppState, &Request) -> Result<Value, HandlerErr> =
        match req.method.as_str() {
            "allocation.run" => handle_run,
            "allocation.get" => handle_get,
            "allocation.runs" => handle_runs,
            "allocation.export" => handle_export,
            "allocation.search" => handle_search,
            _ => return None,
        };
    Some(match handler(state, req) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
