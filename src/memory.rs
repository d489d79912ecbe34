//! In-memory stores used by the orchestrator tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::db::{AiRecordStore, RawRecordStore, StudentStore};
use crate::error::{IngestError, Result};
use crate::models::{
    AiAggregates, AiRecord, AiStudentData, Enrollment, RawRecord, StatusCount, Student,
};

pub fn aggregate(records: &[AiRecord]) -> AiAggregates {
    let students: HashSet<i64> = records.iter().map(|r| r.data.student_id).collect();
    let courses: HashSet<i64> = records.iter().map(|r| r.data.course_id).collect();

    let mut by_status: BTreeMap<&'static str, i64> = BTreeMap::new();
    for record in records {
        *by_status.entry(record.data.status.as_str()).or_insert(0) += 1;
    }

    let average_total = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.data.total).sum::<f64>() / records.len() as f64
    };

    AiAggregates {
        total_records: records.len() as i64,
        unique_students: students.len() as i64,
        unique_courses: courses.len() as i64,
        average_total,
        status_counts: by_status
            .into_iter()
            .map(|(status, count)| StatusCount {
                status: status.to_string(),
                count,
            })
            .collect(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub raw_records: Mutex<Vec<RawRecord>>,
    pub students: Mutex<HashMap<i64, Student>>,
    pub enrollments: Mutex<Vec<Enrollment>>,
    pub ai_records: Mutex<Vec<AiRecord>>,
    pub fail_ai_insert: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RawRecordStore for MemoryStore {
    async fn insert_raw_record(&self, record: &RawRecord) -> Result<i64> {
        let mut raw = self.raw_records.lock().unwrap();
        raw.push(record.clone());
        Ok(raw.len() as i64)
    }
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn upsert_students(&self, students: &[Student]) -> Result<()> {
        let mut stored = self.students.lock().unwrap();
        for student in students {
            stored.insert(student.id, student.clone());
        }
        Ok(())
    }

    async fn ensure_enrollments(
        &self,
        course_id: i64,
        student_ids: &[i64],
    ) -> Result<Vec<Enrollment>> {
        let mut enrollments = self.enrollments.lock().unwrap();
        for student_id in student_ids {
            let exists = enrollments
                .iter()
                .any(|e| e.course_id == course_id && e.student_id == *student_id);
            if !exists {
                let id = enrollments.len() as i64 + 1;
                enrollments.push(Enrollment {
                    id,
                    course_id,
                    student_id: *student_id,
                    current_grade: 0.0,
                });
            }
        }
        Ok(enrollments
            .iter()
            .filter(|e| e.course_id == course_id && student_ids.contains(&e.student_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AiRecordStore for MemoryStore {
    async fn insert_ai_records(&self, pull_id: Uuid, records: &[AiStudentData]) -> Result<u64> {
        if self.fail_ai_insert.load(Ordering::SeqCst) {
            return Err(IngestError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut stored = self.ai_records.lock().unwrap();
        let now = Utc::now();
        for data in records {
            let id = stored.len() as i64 + 1;
            stored.push(AiRecord {
                id,
                pull_id,
                data: data.clone(),
                created_at: now,
                last_updated: Some(now),
            });
        }
        Ok(records.len() as u64)
    }

    async fn list_ai_records(&self, student_id: Option<i64>) -> Result<Vec<AiRecord>> {
        let stored = self.ai_records.lock().unwrap();
        let mut records: Vec<AiRecord> = stored
            .iter()
            .filter(|r| student_id.map_or(true, |id| r.data.student_id == id))
            .cloned()
            .collect();
        if student_id.is_some() {
            records.sort_by_key(|r| (r.data.semester, r.id));
        }
        Ok(records)
    }

    async fn ai_records_for_export(&self) -> Result<Vec<AiRecord>> {
        let mut records = self.ai_records.lock().unwrap().clone();
        records.sort_by_key(|r| (r.data.student_id, r.data.semester, r.id));
        Ok(records)
    }

    async fn ai_aggregates(&self) -> Result<AiAggregates> {
        Ok(aggregate(&self.ai_records.lock().unwrap()))
    }
}
