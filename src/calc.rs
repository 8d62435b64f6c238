use rusqlite::Connection;
use serde::Serialize;

/// Standard half-up rounding to 2 decimals, matching the report card
/// display format: `Int(100*x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Four ordinal performance tiers relative to the class baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PerformanceTier {
    NeedsImprovement,
    Acceptable,
    Good,
    VeryGood,
}

impl PerformanceTier {
    pub fn rank(self) -> i64 {
        match self {
            PerformanceTier::NeedsImprovement => 1,
            PerformanceTier::Acceptable => 2,
            PerformanceTier::Good => 3,
            PerformanceTier::VeryGood => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PerformanceTier::NeedsImprovement => "needs improvement",
            PerformanceTier::Acceptable => "acceptable",
            PerformanceTier::Good => "good",
            PerformanceTier::VeryGood => "very good",
        }
    }
}

/// Ratio-based tier classification.
///
/// A class average of zero (or below) is replaced with a neutral baseline
/// of 10.0 so the ratio stays defined. Malformed input (NaN, infinite,
/// negative) degrades to Acceptable rather than propagating an error:
/// this feeds a user-facing report card, where an approximate tier beats
/// a failed render.
pub fn classify(student_avg: f64, class_avg: f64) -> PerformanceTier {
    if !student_avg.is_finite() || !class_avg.is_finite() || student_avg < 0.0 {
        return PerformanceTier::Acceptable;
    }
    let class_avg = if class_avg <= 0.0 { 10.0 } else { class_avg };
    let ratio = student_avg / class_avg;
    if ratio < 0.8 {
        PerformanceTier::NeedsImprovement
    } else if ratio < 1.0 {
        PerformanceTier::Acceptable
    } else if ratio < 1.2 {
        PerformanceTier::Good
    } else {
        PerformanceTier::VeryGood
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// One raw score tuple as recorded by a teacher.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRow {
    pub id: String,
    pub teacher: String,
    pub student_id: String,
    pub subject: String,
    pub sequence_label: String,
    pub value: i64,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreFilter {
    pub student_id: Option<String>,
    pub teacher: Option<String>,
    pub subject: Option<String>,
}

/// Matching score rows in insertion (rowid) order. Insertion order is
/// load-bearing: report rows keep the first-appearance order of subjects.
pub fn query_scores(conn: &Connection, filter: &ScoreFilter) -> Result<Vec<ScoreRow>, CalcError> {
    let mut sql = String::from(
        "SELECT id, teacher, student_id, subject, sequence_label, value, recorded_at
         FROM scores",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<&str> = Vec::new();
    if let Some(v) = filter.student_id.as_deref() {
        clauses.push("student_id = ?");
        binds.push(v);
    }
    if let Some(v) = filter.teacher.as_deref() {
        clauses.push("teacher = ?");
        binds.push(v);
    }
    if let Some(v) = filter.subject.as_deref() {
        clauses.push("subject = ?");
        binds.push(v);
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY rowid");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map(rusqlite::params_from_iter(binds), |r| {
        Ok(ScoreRow {
            id: r.get(0)?,
            teacher: r.get(1)?,
            student_id: r.get(2)?,
            subject: r.get(3)?,
            sequence_label: r.get(4)?,
            value: r.get(5)?,
            recorded_at: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

/// Arithmetic mean; `None` when the set is empty. An empty set means
/// "insufficient data", never zero.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / (values.len() as f64))
}

pub fn student_average(
    conn: &Connection,
    student_id: &str,
    subject: &str,
) -> Result<Option<f64>, CalcError> {
    let rows = query_scores(
        conn,
        &ScoreFilter {
            student_id: Some(student_id.to_string()),
            subject: Some(subject.to_string()),
            ..ScoreFilter::default()
        },
    )?;
    let values: Vec<f64> = rows.iter().map(|r| r.value as f64).collect();
    Ok(mean(&values))
}

/// Mean over every score the teacher has recorded for the subject, across
/// all of their students. This is the comparison baseline: a student is
/// only ever measured against their own teacher's cohort.
pub fn class_average(
    conn: &Connection,
    teacher: &str,
    subject: &str,
) -> Result<Option<f64>, CalcError> {
    let rows = query_scores(
        conn,
        &ScoreFilter {
            teacher: Some(teacher.to_string()),
            subject: Some(subject.to_string()),
            ..ScoreFilter::default()
        },
    )?;
    let values: Vec<f64> = rows.iter().map(|r| r.value as f64).collect();
    Ok(mean(&values))
}

/// One per-subject line of a student's report card. Averages are rounded
/// for display; the tier is classified from the unrounded values.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub subject: String,
    pub student_average: f64,
    pub class_average: f64,
    pub tier: i64,
    pub tier_label: String,
}

#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub conn: &'a Connection,
    pub student_id: &'a str,
    pub teacher: &'a str,
}

/// Builds the full report card row set for one student: one row per
/// distinct subject, in first-appearance order. The same row set feeds
/// the table, the tier pie chart and the PDF export without re-querying.
pub fn assemble_report(ctx: &ReportContext<'_>) -> Result<Vec<ReportRow>, CalcError> {
    let student_rows = query_scores(
        ctx.conn,
        &ScoreFilter {
            student_id: Some(ctx.student_id.to_string()),
            ..ScoreFilter::default()
        },
    )?;
    let cohort_rows = query_scores(
        ctx.conn,
        &ScoreFilter {
            teacher: Some(ctx.teacher.to_string()),
            ..ScoreFilter::default()
        },
    )?;

    let mut subjects: Vec<String> = Vec::new();
    let mut student_values: Vec<Vec<f64>> = Vec::new();
    for r in &student_rows {
        match subjects.iter().position(|s| *s == r.subject) {
            Some(i) => student_values[i].push(r.value as f64),
            None => {
                subjects.push(r.subject.clone());
                student_values.push(vec![r.value as f64]);
            }
        }
    }

    let mut rows: Vec<ReportRow> = Vec::with_capacity(subjects.len());
    for (subject, values) in subjects.iter().zip(student_values.iter()) {
        // A subject is listed iff the student has at least one score in it.
        let Some(student_avg) = mean(values) else {
            continue;
        };
        let cohort_values: Vec<f64> = cohort_rows
            .iter()
            .filter(|r| r.subject == *subject)
            .map(|r| r.value as f64)
            .collect();
        // No cohort baseline yet: fall back to the student's own average,
        // which lands on the middle "Good" tier (ratio 1) instead of
        // falsely flagging the student against a missing comparison.
        let class_avg = mean(&cohort_values).unwrap_or(student_avg);
        let tier = classify(student_avg, class_avg);
        rows.push(ReportRow {
            subject: subject.clone(),
            student_average: round_off_2_decimals(student_avg),
            class_average: round_off_2_decimals(class_avg),
            tier: tier.rank(),
            tier_label: tier.label().to_string(),
        });
    }
    Ok(rows)
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TierHistogram {
    pub needs_improvement: i64,
    pub acceptable: i64,
    pub good: i64,
    pub very_good: i64,
}

/// Tier frequencies over an assembled row set, for pie-chart rendering.
/// Derived from the rows alone; the store is not consulted again.
pub fn tier_histogram(rows: &[ReportRow]) -> TierHistogram {
    let mut h = TierHistogram::default();
    for row in rows {
        match row.tier {
            1 => h.needs_improvement += 1,
            2 => h.acceptable += 1,
            3 => h.good += 1,
            _ => h.very_good += 1,
        }
    }
    h
}
