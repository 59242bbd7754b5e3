use crate::error::{AllocError, Entity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One row of an input table: column name -> cell value, as loaded.
pub type Record = serde_json::Map<String, Value>;

pub const COL_REG_NO: &str = "Reg No";
pub const COL_NAME: &str = "Name";
pub const COL_SUBJECT: &str = "Subject";
pub const COL_YEAR: &str = "Year of Study";
pub const COL_CLASSROOM_ID: &str = "Classroom ID";
pub const COL_TOTAL_BENCHES: &str = "Total Benches";

/// Output column order for every tabular rendering of an allocation.
pub const OUTPUT_COLUMNS: [&str; 7] = [
    "Classroom",
    "Bench Number",
    "Reg No",
    "Student Name",
    "Subject",
    "Year of Study",
    "Teacher Name",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Student {
    pub reg_no: String,
    pub name: String,
    pub subject: String,
    pub year_of_study: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classroom {
    pub id: String,
    pub total_benches: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Teacher {
    pub name: String,
}

/// A seated student. Field names serialize to the output column headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(rename = "Classroom")]
    pub classroom_id: String,
    #[serde(rename = "Bench Number")]
    pub bench_number: u32,
    #[serde(rename = "Reg No")]
    pub reg_no: String,
    #[serde(rename = "Student Name")]
    pub student_name: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Year of Study")]
    pub year_of_study: String,
    #[serde(rename = "Teacher Name")]
    pub teacher_name: String,
}

impl Assignment {
    pub fn seat(classroom: &Classroom, bench_number: u32, student: &Student, teacher: &Teacher) -> Self {
        Self {
            classroom_id: classroom.id.clone(),
            bench_number,
            reg_no: student.reg_no.clone(),
            student_name: student.name.clone(),
            subject: student.subject.clone(),
            year_of_study: student.year_of_study.clone(),
            teacher_name: teacher.name.clone(),
        }
    }

    /// Cells in `OUTPUT_COLUMNS` order.
    pub fn cells(&self) -> [String; 7] {
        [
            self.classroom_id.clone(),
            self.bench_number.to_string(),
            self.reg_no.clone(),
            self.student_name.clone(),
            self.subject.clone(),
            self.year_of_study.clone(),
            self.teacher_name.clone(),
        ]
    }
}

/// Renders a scalar cell the way a spreadsheet's string view shows it.
/// Integral floats drop their fraction so `1001.0` and `1001` compare equal.
pub fn cell_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                    Some(format!("{}", f as i64))
                } else {
                    Some(f.to_string())
                }
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn required_text(
    record: &Record,
    key: &str,
    entity: Entity,
    index: usize,
    id: Option<&str>,
) -> Result<String, AllocError> {
    let raw = match record.get(key) {
        None | Some(Value::Null) => {
            return Err(AllocError::invalid(entity, index, id, format!("missing {key}")))
        }
        Some(v) => v,
    };
    match cell_text(raw) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(AllocError::invalid(entity, index, id, format!("{key} must not be blank"))),
        None => Err(AllocError::invalid(
            entity,
            index,
            id,
            format!("{key} must be a scalar value"),
        )),
    }
}

/// Parses a bench count. Integral values only; no rounding or truncation.
pub fn parse_capacity(v: &Value) -> Result<u32, String> {
    let n: i64 = match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i
            } else if let Some(f) = n.as_f64() {
                if !f.is_finite() || f.fract() != 0.0 {
                    return Err(format!("{COL_TOTAL_BENCHES} must be an integer, got {f}"));
                }
                f as i64
            } else {
                return Err(format!("{COL_TOTAL_BENCHES} is out of range"));
            }
        }
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return Err(format!("missing {COL_TOTAL_BENCHES}"));
            }
            match t.parse::<i64>() {
                Ok(i) => i,
                Err(_) => match t.parse::<f64>() {
                    Ok(f) if f.is_finite() && f.fract() == 0.0 => f as i64,
                    _ => {
                        return Err(format!("{COL_TOTAL_BENCHES} must be an integer, got {t:?}"))
                    }
                },
            }
        }
        Value::Null => return Err(format!("missing {COL_TOTAL_BENCHES}")),
        other => return Err(format!("{COL_TOTAL_BENCHES} must be an integer, got {other}")),
    };
    if n < 0 {
        return Err(format!("{COL_TOTAL_BENCHES} must not be negative, got {n}"));
    }
    u32::try_from(n).map_err(|_| format!("{COL_TOTAL_BENCHES} is out of range: {n}"))
}

impl Student {
    pub fn from_record(index: usize, record: &Record) -> Result<Self, AllocError> {
        let reg_no = required_text(record, COL_REG_NO, Entity::Student, index, None)?;
        let id = Some(reg_no.as_str());
        Ok(Self {
            name: required_text(record, COL_NAME, Entity::Student, index, id)?,
            subject: required_text(record, COL_SUBJECT, Entity::Student, index, id)?,
            year_of_study: required_text(record, COL_YEAR, Entity::Student, index, id)?,
            reg_no,
        })
    }
}

impl Classroom {
    pub fn from_record(index: usize, record: &Record) -> Result<Self, AllocError> {
        let id = required_text(record, COL_CLASSROOM_ID, Entity::Classroom, index, None)?;
        let raw = record.get(COL_TOTAL_BENCHES).unwrap_or(&Value::Null);
        let total_benches = parse_capacity(raw)
            .map_err(|m| AllocError::invalid(Entity::Classroom, index, Some(&id), m))?;
        Ok(Self { id, total_benches })
    }
}

impl Teacher {
    pub fn from_record(index: usize, record: &Record) -> Result<Self, AllocError> {
        Ok(Self {
            name: required_text(record, COL_NAME, Entity::Teacher, index, None)?,
        })
    }
}

pub fn students_from_records(records: &[Record]) -> Result<Vec<Student>, AllocError> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(records.len());
    for (i, r) in records.iter().enumerate() {
        let s = Student::from_record(i, r)?;
        if let Some(&first) = seen.get(&s.reg_no) {
            return Err(AllocError::invalid(
                Entity::Student,
                i,
                Some(&s.reg_no),
                format!("duplicate {COL_REG_NO} (first seen at #{first})"),
            ));
        }
        seen.insert(s.reg_no.clone(), i);
        out.push(s);
    }
    Ok(out)
}

pub fn classrooms_from_records(records: &[Record]) -> Result<Vec<Classroom>, AllocError> {
    let classrooms = records
        .iter()
        .enumerate()
        .map(|(i, r)| Classroom::from_record(i, r))
        .collect::<Result<Vec<_>, _>>()?;
    check_unique_classrooms(&classrooms)?;
    Ok(classrooms)
}

/// Bench numbers restart per classroom, so a repeated id would merge two rooms' benches.
pub fn check_unique_classrooms(classrooms: &[Classroom]) -> Result<(), AllocError> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (i, c) in classrooms.iter().enumerate() {
        if let Some(&first) = seen.get(c.id.as_str()) {
            return Err(AllocError::invalid(
                Entity::Classroom,
                i,
                Some(&c.id),
                format!("duplicate {COL_CLASSROOM_ID} (first seen at #{first})"),
            ));
        }
        seen.insert(&c.id, i);
    }
    Ok(())
}

pub fn teachers_from_records(records: &[Record]) -> Result<Vec<Teacher>, AllocError> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| Teacher::from_record(i, r))
        .collect()
}
