use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::Store;
use crate::error::{IngestError, Result};
use crate::lms::LmsApi;
use crate::models::{
    AiStudentData, Course, DataType, HealthReport, PullSummary, RawRecord, RawUser,
    ResponseStatus, Student, SyncSummary, TransformInput, Verbatim,
};
use crate::normalize::normalize;
use crate::transform::transform;

pub const LMS_SOURCE: &str = "MOODLE";
pub const SITE_COURSE_ID: i64 = 1;

pub struct IngestionService<C, S> {
    lms: C,
    store: S,
    concurrency: usize,
}

impl<C: LmsApi, S: Store> IngestionService<C, S> {
    pub fn new(lms: C, store: S, concurrency: usize) -> Self {
        Self {
            lms,
            store,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn sync_course_students(&self, course_id: i64) -> Result<SyncSummary> {
        if course_id == SITE_COURSE_ID {
            return Err(IngestError::SiteCourse(course_id));
        }

        info!(course_id, "Starting ingestion of enrolled users");
        let users = self.lms.list_enrolled_users(course_id).await?;
        info!(course_id, users = users.len(), "Fetched enrolled users");

        // Each user serializes back to the JSON the LMS sent, so this is the body as received.
        self.store
            .insert_raw_record(&RawRecord {
                source: LMS_SOURCE.to_string(),
                data_type: DataType::EnrolledUsers,
                payload: serde_json::to_value(&users)?,
                fetched_at: Utc::now(),
            })
            .await?;

        let students: Vec<Student> = users.iter().map(|user| normalize(user)).collect();
        self.store.upsert_students(&students).await?;

        let student_ids: Vec<i64> = students.iter().map(|s| s.id).collect();
        let enrollments = self
            .store
            .ensure_enrollments(course_id, &student_ids)
            .await?;

        info!(
            course_id,
            synced = students.len(),
            enrollments = enrollments.len(),
            "Synced students"
        );

        Ok(SyncSummary {
            status: ResponseStatus::Success,
            synced_students: students,
            enrollments,
        })
    }

    /// Full pull. Only a failed course listing aborts; course and user failures are skipped.
    pub async fn pull_and_transform_data(&self) -> PullSummary {
        info!("Starting comprehensive data collection");

        let courses = match self.lms.list_courses().await {
            Ok(courses) => courses,
            Err(e) => {
                error!(error = %e, "Data collection failed");
                return PullSummary {
                    status: ResponseStatus::Error,
                    pull_id: None,
                    courses_processed: 0,
                    records_collected: 0,
                    records_saved: 0,
                    message: format!("Failed to fetch data from LMS: {e}"),
                };
            }
        };
        info!(courses = courses.len(), "Found courses");

        let mut inputs = Vec::new();
        let mut courses_processed = 0usize;

        for course in courses.iter().filter(|c| c.id != SITE_COURSE_ID) {
            info!(course_id = course.id, course = %course.fullname, "Processing course");

            let users = match self.lms.list_enrolled_users(course.id).await {
                Ok(users) => users,
                Err(e) => {
                    warn!(course_id = course.id, error = %e, "Failed to process course");
                    continue;
                }
            };
            courses_processed += 1;

            inputs.extend(self.collect_course(course, users).await);
        }

        let records_collected = inputs.len();
        info!(
            records = records_collected,
            courses = courses_processed,
            "Data collection complete"
        );

        let pull_id = Uuid::new_v4();
        self.audit_pull(&inputs).await;

        let records: Vec<AiStudentData> = inputs.iter().map(transform).collect();
        let saved = if records.is_empty() {
            Ok(0)
        } else {
            self.store.insert_ai_records(pull_id, &records).await
        };

        match saved {
            Ok(saved) => {
                info!(%pull_id, saved, "Saved AI records");
                PullSummary {
                    status: ResponseStatus::Success,
                    pull_id: Some(pull_id),
                    courses_processed,
                    records_collected,
                    records_saved: saved as usize,
                    message: format!(
                        "Processed {records_collected} records from {courses_processed} courses"
                    ),
                }
            }
            Err(e) => {
                error!(%pull_id, error = %e, "Failed to save AI records");
                PullSummary {
                    status: ResponseStatus::Error,
                    pull_id: Some(pull_id),
                    courses_processed,
                    records_collected,
                    records_saved: 0,
                    message: format!(
                        "Collected {records_collected} records but failed to save them: {e}"
                    ),
                }
            }
        }
    }

    /// Grade fetches run `concurrency` at a time; output keeps the enrolled-user order.
    async fn collect_course(
        &self,
        course: &Course,
        users: Vec<Verbatim<RawUser>>,
    ) -> Vec<TransformInput> {
        info!(course_id = course.id, students = users.len(), "Fetching grades");

        let lms = &self.lms;
        let results: Vec<Option<TransformInput>> = stream::iter(users)
            .map(move |student| async move {
                match lms.fetch_user_grades(course.id, student.id).await {
                    Ok(grades) => Some(TransformInput {
                        course_id: course.id,
                        course_name: course.fullname.clone(),
                        course_short_name: course.shortname.clone(),
                        student,
                        grades,
                    }),
                    Err(e) => {
                        warn!(
                            course_id = course.id,
                            user_id = student.id,
                            error = %e,
                            "Failed to fetch grades for student"
                        );
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    async fn audit_pull(&self, inputs: &[TransformInput]) {
        let payload = match serde_json::to_value(inputs) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Could not serialize pull for audit");
                return;
            }
        };

        let record = RawRecord {
            source: LMS_SOURCE.to_string(),
            data_type: DataType::AiComprehensiveData,
            payload,
            fetched_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_raw_record(&record).await {
            warn!(error = %e, "Failed to store raw pull payload");
        }
    }

    /// Reachability check: one course listing against the live LMS.
    pub async fn health(&self) -> Result<HealthReport> {
        let courses = self.lms.list_courses().await?;
        Ok(HealthReport {
            status: "ok".to_string(),
            service: "ingestion".to_string(),
            courses: courses.len(),
        })
    }
}
