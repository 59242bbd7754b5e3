use crate::error::AllocError;
use crate::model::{self, Assignment, Classroom, Record, Student, Teacher};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Default upper bound on students per allocation; the partner scan is O(n^2).
pub const DEFAULT_MAX_STUDENTS: usize = 100_000;

/// Rejects inputs above `max_students` before seating them with [`allocate`].
///
/// An empty teacher list is still reported ahead of the size check.
pub fn allocate_with_limit(
    students: &[Student],
    classrooms: &[Classroom],
    teachers: &[Teacher],
    max_students: usize,
) -> Result<Vec<Assignment>, AllocError> {
    if !teachers.is_empty() && students.len() > max_students {
        return Err(AllocError::TooManyStudents {
            count: students.len(),
            limit: max_students,
        });
    }
    allocate(students, classrooms, teachers)
}

/// Seats students bench by bench, pairing each with the first later student
/// (in subject order) whose subject differs.
///
/// Students beyond the total capacity are left out of the result.
pub fn allocate(
    students: &[Student],
    classrooms: &[Classroom],
    teachers: &[Teacher],
) -> Result<Vec<Assignment>, AllocError> {
    if teachers.is_empty() {
        return Err(AllocError::no_teachers());
    }
    model::check_unique_classrooms(classrooms)?;

    // Stable: students sharing a subject keep their input order.
    let mut pool: Vec<&Student> = students.iter().collect();
    pool.sort_by(|a, b| a.subject.cmp(&b.subject));
    let mut taken = vec![false; pool.len()];

    let mut out = Vec::new();
    let mut cursor = next_free(&taken, 0);

    for (c, classroom) in classrooms.iter().enumerate() {
        if cursor >= pool.len() {
            break;
        }
        let teacher = &teachers[c % teachers.len()];

        let mut bench: u32 = 1;
        while bench <= classroom.total_benches && cursor < pool.len() {
            let first = pool[cursor];
            taken[cursor] = true;
            out.push(Assignment::seat(classroom, bench, first, teacher));

            let partner = (cursor + 1..pool.len())
                .find(|&j| !taken[j] && pool[j].subject != first.subject);
            if let Some(j) = partner {
                taken[j] = true;
                out.push(Assignment::seat(classroom, bench, pool[j], teacher));
            }

            bench += 1;
            cursor = next_free(&taken, cursor + 1);
        }
    }

    Ok(out)
}

fn next_free(taken: &[bool], from: usize) -> usize {
    (from..taken.len())
        .find(|&i| !taken[i])
        .unwrap_or(taken.len())
}

/// Validates raw loader records and allocates them.
///
/// The teacher list is checked before any student or classroom record is
/// looked at.
pub fn allocate_records(
    students: &[Record],
    classrooms: &[Record],
    teachers: &[Record],
    max_students: usize,
) -> Result<Allocation, AllocError> {
    if teachers.is_empty() {
        return Err(AllocError::no_teachers());
    }
    let teachers = model::teachers_from_records(teachers)?;
    let classrooms = model::classrooms_from_records(classrooms)?;
    let students = model::students_from_records(students)?;

    let assignments = allocate_with_limit(&students, &classrooms, &teachers, max_students)?;
    let summary = AllocationSummary::compute(&students, &classrooms, &assignments);
    Ok(Allocation {
        students,
        classrooms,
        teachers,
        assignments,
        summary,
    })
}

/// Validated inputs together with the seats produced from them.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub students: Vec<Student>,
    pub classrooms: Vec<Classroom>,
    pub teachers: Vec<Teacher>,
    pub assignments: Vec<Assignment>,
    pub summary: AllocationSummary,
}

impl Allocation {
    /// SHA-256 over the validated inputs. Equal inputs, equal digest, equal seats.
    pub fn input_digest(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |tag: &[u8], value: &str| {
            hasher.update(tag);
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        };
        for s in &self.students {
            field(b"S", &s.reg_no);
            field(b"n", &s.name);
            field(b"s", &s.subject);
            field(b"y", &s.year_of_study);
        }
        for c in &self.classrooms {
            field(b"C", &c.id);
            field(b"b", &c.total_benches.to_string());
        }
        for t in &self.teachers {
            field(b"T", &t.name);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSummary {
    pub students_total: usize,
    pub students_seated: usize,
    pub unseated: Vec<String>,
    pub classrooms_used: usize,
    pub benches_used: usize,
    pub paired_benches: usize,
    pub single_benches: usize,
    pub capacity: u64,
}

impl AllocationSummary {
    pub fn compute(
        students: &[Student],
        classrooms: &[Classroom],
        assignments: &[Assignment],
    ) -> Self {
        let seated: HashSet<&str> = assignments.iter().map(|a| a.reg_no.as_str()).collect();
        let unseated = students
            .iter()
            .filter(|s| !seated.contains(s.reg_no.as_str()))
            .map(|s| s.reg_no.clone())
            .collect();

        let mut classrooms_used = 0usize;
        let mut paired = 0usize;
        let mut single = 0usize;
        let mut prev_room: Option<&str> = None;
        // Assignments are grouped by classroom then bench, so runs are contiguous.
        let mut i = 0usize;
        while i < assignments.len() {
            let a = &assignments[i];
            if prev_room != Some(a.classroom_id.as_str()) {
                classrooms_used += 1;
                prev_room = Some(a.classroom_id.as_str());
            }
            let shares_bench = assignments.get(i + 1).is_some_and(|b| {
                b.classroom_id == a.classroom_id && b.bench_number == a.bench_number
            });
            if shares_bench {
                paired += 1;
                i += 2;
            } else {
                single += 1;
                i += 1;
            }
        }

        Self {
            students_total: students.len(),
            students_seated: assignments.len(),
            unseated,
            classrooms_used,
            benches_used: paired + single,
            paired_benches: paired,
            single_benches: single,
            capacity: classrooms.iter().map(|c| u64::from(c.total_benches)).sum(),
        }
    }
}
