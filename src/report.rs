use tracing::info;

use crate::db::AiRecordStore;
use crate::error::Result;
use crate::models::{AiAggregates, AiRecord, CsvExport, DataStatistics};

pub const CSV_HEADER: [&str; 9] = [
    "ID",
    "Major",
    "MajorYear",
    "Subject",
    "Semester",
    "Practical",
    "Theoretical",
    "Total",
    "Status",
];

pub const NO_DATA_MESSAGE: &str = "No data available to export";

pub fn build_statistics(aggregates: AiAggregates) -> DataStatistics {
    DataStatistics {
        total_records: aggregates.total_records,
        unique_students: aggregates.unique_students,
        unique_courses: aggregates.unique_courses,
        average_grade: format!("{:.2}", aggregates.average_total),
        status_distribution: aggregates.status_counts,
    }
}

/// Records are written in the order given; callers sort by (student, semester).
pub fn render_csv(records: &[AiRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for record in records {
        let data = &record.data;
        writer.write_record([
            data.student_id.to_string(),
            data.major.clone(),
            data.major_year.to_string(),
            data.subject.clone(),
            data.semester.to_string(),
            data.practical.to_string(),
            data.theoretical.to_string(),
            data.total.to_string(),
            data.status.to_string(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn build_export(records: &[AiRecord]) -> Result<CsvExport> {
    if records.is_empty() {
        return Ok(CsvExport::Empty {
            message: NO_DATA_MESSAGE.to_string(),
        });
    }

    Ok(CsvExport::Data {
        format: "csv".to_string(),
        data: render_csv(records)?,
        record_count: records.len(),
    })
}

pub async fn get_all_ai_student_data<S: AiRecordStore + ?Sized>(
    store: &S,
) -> Result<Vec<AiRecord>> {
    store.list_ai_records(None).await
}

pub async fn get_student_ai_data<S: AiRecordStore + ?Sized>(
    store: &S,
    student_id: i64,
) -> Result<Vec<AiRecord>> {
    store.list_ai_records(Some(student_id)).await
}

pub async fn export_ai_data_as_csv<S: AiRecordStore + ?Sized>(store: &S) -> Result<CsvExport> {
    let records = store.ai_records_for_export().await?;
    info!(records = records.len(), "Exporting AI records as CSV");
    build_export(&records)
}

pub async fn get_data_statistics<S: AiRecordStore + ?Sized>(store: &S) -> Result<DataStatistics> {
    Ok(build_statistics(store.ai_aggregates().await?))
}
