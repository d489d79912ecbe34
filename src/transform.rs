use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::models::{AiStudentData, GradeStatus, RawGrades, RawUser, TransformInput};

const PRACTICAL_KEYWORDS: [&str; 6] = ["lab", "practical", "assignment", "project", "tp", "td"];
const THEORETICAL_KEYWORDS: [&str; 6] = ["exam", "test", "quiz", "midterm", "final", "theory"];

pub const DEFAULT_MAJOR: &str = "Unknown";
pub const DEFAULT_MAJOR_YEAR: i32 = 1;
pub const DEFAULT_SEMESTER: i32 = 1;

// Course codes such as CS305: the hundreds digit is the semester. Known to be a weak
// heuristic (CS1101 yields 1 only by luck, MATH2010 yields the default).
static SEMESTER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9])0[0-9]$").expect("valid semester pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Practical,
    Theoretical,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GradeBreakdown {
    pub practical: f64,
    pub theoretical: f64,
    pub total: f64,
}

pub fn transform(input: &TransformInput) -> AiStudentData {
    let breakdown = extract_grades(&input.grades);

    AiStudentData {
        student_id: input.student.id,
        student_name: input.student.display_name(),
        major: extract_major(&input.student),
        major_year: extract_major_year(&input.student),
        subject: input.course_name.clone(),
        course_id: input.course_id,
        semester: extract_semester(&input.course_short_name),
        practical: breakdown.practical,
        theoretical: breakdown.theoretical,
        total: breakdown.total,
        status: GradeStatus::from_total(breakdown.total),
    }
}

/// Practical keywords win when an item name matches both sets.
pub fn classify(item_name: &str) -> Option<ItemKind> {
    let name = item_name.to_lowercase();
    if PRACTICAL_KEYWORDS.iter().any(|k| name.contains(k)) {
        Some(ItemKind::Practical)
    } else if THEORETICAL_KEYWORDS.iter().any(|k| name.contains(k)) {
        Some(ItemKind::Theoretical)
    } else {
        None
    }
}

pub fn extract_grades(grades: &RawGrades) -> GradeBreakdown {
    let Some(user_grade) = grades.usergrades.first() else {
        return GradeBreakdown::default();
    };

    let (mut practical_sum, mut practical_count) = (0.0, 0usize);
    let (mut theoretical_sum, mut theoretical_count) = (0.0, 0usize);

    for item in &user_grade.gradeitems {
        let name = item.itemname.as_deref().unwrap_or_default();
        let grade = parse_grade(item.graderaw.as_ref());
        match classify(name) {
            Some(ItemKind::Practical) => {
                practical_sum += grade;
                practical_count += 1;
            }
            Some(ItemKind::Theoretical) => {
                theoretical_sum += grade;
                theoretical_count += 1;
            }
            None => {}
        }
    }

    let practical = mean(practical_sum, practical_count);
    let theoretical = mean(theoretical_sum, theoretical_count);

    GradeBreakdown {
        practical,
        theoretical,
        total: practical + theoretical,
    }
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Numbers pass through, strings contribute their leading numeric prefix, anything else is 0.
pub fn parse_grade(raw: Option<&Value>) -> f64 {
    let value = match raw {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => leading_number(s).unwrap_or(0.0),
        _ => 0.0,
    };
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn leading_number(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let candidate_len = text
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());

    (1..=candidate_len)
        .rev()
        .find_map(|len| text[..len].parse::<f64>().ok())
}

fn leading_integer(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let digits = text
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    text[..digits].parse().ok()
}

pub fn extract_semester(course_short_name: &str) -> i32 {
    SEMESTER_PATTERN
        .captures(course_short_name)
        .and_then(|caps| caps.get(1))
        .and_then(|digit| digit.as_str().parse::<i32>().ok())
        .filter(|semester| *semester > 0)
        .unwrap_or(DEFAULT_SEMESTER)
}

pub fn extract_major(student: &RawUser) -> String {
    student
        .custom_field("major")
        .and_then(|field| field.text())
        .map(|major| major.trim().to_string())
        .filter(|major| !major.is_empty())
        .unwrap_or_else(|| DEFAULT_MAJOR.to_string())
}

pub fn extract_major_year(student: &RawUser) -> i32 {
    student
        .custom_field("year")
        .and_then(|field| field.text())
        .and_then(|year| leading_integer(&year))
        .and_then(|year| i32::try_from(year).ok())
        .filter(|year| *year > 0)
        .unwrap_or(DEFAULT_MAJOR_YEAR)
}
