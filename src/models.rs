use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// LMS payloads send `null` where a field is empty; treat it like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fullname: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shortname: String,
}

/// A decoded LMS payload that keeps the JSON exactly as the LMS sent it. Serializing
/// writes the received JSON back out, nulls and unknown fields included.
#[derive(Debug, Clone, PartialEq)]
pub struct Verbatim<T> {
    raw: Value,
    value: T,
}

impl<T> Deref for Verbatim<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Verbatim<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        let value = T::deserialize(&raw).map_err(<D::Error as de::Error>::custom)?;
        Ok(Self { raw, value })
    }
}

impl<T> Serialize for Verbatim<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

#[cfg(test)]
impl<T: Serialize> Verbatim<T> {
    pub fn from_parsed(value: T) -> Self {
        Self {
            raw: serde_json::to_value(&value).unwrap(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    #[serde(default, deserialize_with = "null_as_default")]
    pub shortname: String,
    #[serde(default)]
    pub value: Option<Value>,
}

impl CustomField {
    pub fn text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// The fields of an enrolled user the pipeline reads. The rest of the LMS record
/// survives only through [`Verbatim`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUser {
    pub id: i64,
    #[serde(rename = "firstname", default, deserialize_with = "null_as_default")]
    pub first_name: String,
    #[serde(rename = "lastname", default, deserialize_with = "null_as_default")]
    pub last_name: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "lastaccess", default)]
    pub last_access: Option<i64>,
    #[serde(default)]
    pub customfields: Option<Vec<CustomField>>,
}

impl RawUser {
    pub fn display_name(&self) -> String {
        match self.fullname.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{} {}", self.first_name, self.last_name),
        }
    }

    pub fn custom_field(&self, shortname: &str) -> Option<&CustomField> {
        self.customfields
            .as_ref()?
            .iter()
            .find(|field| field.shortname == shortname)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradeItem {
    #[serde(default)]
    pub itemname: Option<String>,
    #[serde(default)]
    pub graderaw: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserGrade {
    #[serde(default, deserialize_with = "null_as_default")]
    pub gradeitems: Vec<GradeItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGrades {
    #[serde(default, deserialize_with = "null_as_default")]
    pub usergrades: Vec<UserGrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformInput {
    pub course_id: i64,
    pub course_name: String,
    pub course_short_name: String,
    pub student: Verbatim<RawUser>,
    pub grades: Verbatim<RawGrades>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub last_access: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: i64,
    pub course_id: i64,
    pub student_id: i64,
    pub current_grade: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    EnrolledUsers,
    AiComprehensiveData,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::EnrolledUsers => "ENROLLED_USERS",
            DataType::AiComprehensiveData => "AI_COMPREHENSIVE_DATA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub source: String,
    pub data_type: DataType,
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradeStatus {
    Passed,
    Failed,
    Absent,
}

impl GradeStatus {
    pub fn from_total(total: f64) -> Self {
        if total == 0.0 {
            GradeStatus::Absent
        } else if total < 50.0 {
            GradeStatus::Failed
        } else {
            GradeStatus::Passed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GradeStatus::Passed => "Passed",
            GradeStatus::Failed => "Failed",
            GradeStatus::Absent => "Absent",
        }
    }
}

impl fmt::Display for GradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GradeStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Passed" => Ok(GradeStatus::Passed),
            "Failed" => Ok(GradeStatus::Failed),
            "Absent" => Ok(GradeStatus::Absent),
            other => Err(format!("unknown grade status: {other}")),
        }
    }
}

/// Transformer output: one student's flattened result in one course.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiStudentData {
    pub student_id: i64,
    pub student_name: String,
    pub major: String,
    pub major_year: i32,
    pub subject: String,
    pub course_id: i64,
    pub semester: i32,
    pub practical: f64,
    pub theoretical: f64,
    pub total: f64,
    pub status: GradeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiRecord {
    pub id: i64,
    pub pull_id: Uuid,
    #[serde(flatten)]
    pub data: AiStudentData,
    pub created_at: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub status: ResponseStatus,
    pub synced_students: Vec<Student>,
    pub enrollments: Vec<Enrollment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSummary {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_id: Option<Uuid>,
    pub courses_processed: usize,
    pub records_collected: usize,
    pub records_saved: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Aggregates as the store computes them, before presentation formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct AiAggregates {
    pub total_records: i64,
    pub unique_students: i64,
    pub unique_courses: i64,
    pub average_total: f64,
    pub status_counts: Vec<StatusCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStatistics {
    pub total_records: i64,
    pub unique_students: i64,
    pub unique_courses: i64,
    pub average_grade: String,
    pub status_distribution: Vec<StatusCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CsvExport {
    #[serde(rename_all = "camelCase")]
    Data {
        format: String,
        data: String,
        record_count: usize,
    },
    Empty {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub service: String,
    pub courses: usize,
}
