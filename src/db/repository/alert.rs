//! Alert table access: insert, partial update, filtered query.
//!
//! Structured columns (context_data, related_data, proposed_edit, tags,
//! extra_data) are stored as JSON text. Timestamps use the
//! `%Y-%m-%d %H:%M:%S` convention shared by every table in the schema.

use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{Alert, AlertFilter, AlertPage, AlertUpdate};
use crate::models::enums::{AlertCategory, AlertSeverity, AlertStatus, AlertType};

const TIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Query LIMIT applied when the filter does not specify one.
const DEFAULT_QUERY_LIMIT: u32 = 100;

const ALERT_COLUMNS: &str = "id, patient_id, encounter_id, alert_type, severity, category, \
     title, message, suggestion, confidence_score, source_reasoning, processing_model, \
     context_data, related_data, navigation_target, proposed_edit, status, \
     is_real_time, is_post_consultation, acknowledged, acknowledged_at, acknowledged_by, \
     action_taken, created_at, updated_at, expires_at, tags, extra_data";

fn fmt_time(t: &NaiveDateTime) -> String {
    t.format(TIME_FMT).to_string()
}

fn parse_time(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TIME_FMT).unwrap_or_default()
}

fn json_or_null(v: &Option<serde_json::Value>) -> Option<String> {
    v.as_ref().map(|j| j.to_string())
}

pub fn insert_alert(conn: &Connection, alert: &Alert) -> Result<(), DatabaseError> {
    let tags_json = serde_json::to_string(&alert.tags).unwrap_or_else(|_| "[]".to_string());

    conn.execute(
        "INSERT INTO alerts
         (id, patient_id, encounter_id, alert_type, severity, category,
          title, message, suggestion, confidence_score, source_reasoning, processing_model,
          context_data, related_data, navigation_target, proposed_edit, status,
          is_real_time, is_post_consultation, acknowledged, acknowledged_at, acknowledged_by,
          action_taken, created_at, updated_at, expires_at, tags, extra_data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                 ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)",
        params![
            alert.id.to_string(),
            alert.patient_id,
            alert.encounter_id,
            alert.alert_type.as_str(),
            alert.severity.as_str(),
            alert.category.as_str(),
            alert.title,
            alert.message,
            alert.suggestion,
            alert.confidence_score,
            alert.source_reasoning,
            alert.processing_model,
            json_or_null(&alert.context_data),
            json_or_null(&alert.related_data),
            alert.navigation_target,
            json_or_null(&alert.proposed_edit),
            alert.status.as_str(),
            alert.is_real_time as i32,
            alert.is_post_consultation as i32,
            alert.acknowledged as i32,
            alert.acknowledged_at.as_ref().map(fmt_time),
            alert.acknowledged_by,
            alert.action_taken,
            fmt_time(&alert.created_at),
            fmt_time(&alert.updated_at),
            alert.expires_at.as_ref().map(fmt_time),
            tags_json,
            json_or_null(&alert.extra_data),
        ],
    )?;
    Ok(())
}

pub fn get_alert(conn: &Connection, id: &Uuid) -> Result<Alert, DatabaseError> {
    let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1");
    let raw = conn
        .query_row(&sql, params![id.to_string()], RawAlertRow::from_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity_type: "alert".into(),
                id: id.to_string(),
            },
            other => DatabaseError::Sqlite(other),
        })?;
    raw.into_alert()
}

/// Apply a partial update to the mutable lifecycle fields, then return the
/// refreshed row. `acknowledged_at` follows the `acknowledged` flag.
pub fn update_alert(
    conn: &Connection,
    id: &Uuid,
    patch: &AlertUpdate,
    now: NaiveDateTime,
) -> Result<Alert, DatabaseError> {
    let mut sets: Vec<String> = vec!["updated_at = ?".into()];
    let mut values: Vec<Value> = vec![Value::Text(fmt_time(&now))];

    if let Some(status) = &patch.status {
        sets.push("status = ?".into());
        values.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(ack) = patch.acknowledged {
        sets.push("acknowledged = ?".into());
        values.push(Value::Integer(ack as i64));
        sets.push("acknowledged_at = ?".into());
        values.push(if ack {
            Value::Text(fmt_time(&now))
        } else {
            Value::Null
        });
    }
    if let Some(by) = &patch.acknowledged_by {
        sets.push("acknowledged_by = ?".into());
        values.push(Value::Text(by.clone()));
    }
    if let Some(action) = &patch.action_taken {
        sets.push("action_taken = ?".into());
        values.push(Value::Text(action.clone()));
    }
    if let Some(extra) = &patch.extra_data {
        sets.push("extra_data = ?".into());
        values.push(Value::Text(extra.to_string()));
    }

    let sql = format!("UPDATE alerts SET {} WHERE id = ?", sets.join(", "));
    values.push(Value::Text(id.to_string()));

    let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "alert".into(),
            id: id.to_string(),
        });
    }

    get_alert(conn, id)
}

/// Filtered, paged query. Default order: severity descending, then
/// creation time descending.
pub fn query_alerts(
    conn: &Connection,
    filter: &AlertFilter,
    now: NaiveDateTime,
) -> Result<AlertPage, DatabaseError> {
    let (where_sql, values) = build_where(filter, now);

    let count_sql = format!("SELECT COUNT(*) FROM alerts{where_sql}");
    let total_count: u32 = conn.query_row(
        &count_sql,
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
    let sql = format!(
        "SELECT {ALERT_COLUMNS} FROM alerts{where_sql}
         ORDER BY CASE severity
             WHEN 'critical' THEN 2
             WHEN 'warning' THEN 1
             ELSE 0
         END DESC, created_at DESC
         LIMIT {limit} OFFSET {offset}",
        offset = filter.offset,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), RawAlertRow::from_row)?;

    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(row?.into_alert()?);
    }

    let has_more = (filter.offset as u64 + alerts.len() as u64) < total_count as u64;

    Ok(AlertPage {
        alerts,
        total_count,
        has_more,
    })
}

fn build_where(filter: &AlertFilter, now: NaiveDateTime) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(patient_id) = &filter.patient_id {
        clauses.push("patient_id = ?".into());
        values.push(Value::Text(patient_id.clone()));
    }
    if let Some(encounter_id) = &filter.encounter_id {
        clauses.push("encounter_id = ?".into());
        values.push(Value::Text(encounter_id.clone()));
    }
    if !filter.alert_types.is_empty() {
        clauses.push(in_clause("alert_type", filter.alert_types.len()));
        values.extend(
            filter
                .alert_types
                .iter()
                .map(|t| Value::Text(t.as_str().to_string())),
        );
    }
    if !filter.severities.is_empty() {
        clauses.push(in_clause("severity", filter.severities.len()));
        values.extend(
            filter
                .severities
                .iter()
                .map(|s| Value::Text(s.as_str().to_string())),
        );
    }
    if !filter.categories.is_empty() {
        clauses.push(in_clause("category", filter.categories.len()));
        values.extend(
            filter
                .categories
                .iter()
                .map(|c| Value::Text(c.as_str().to_string())),
        );
    }
    if !filter.statuses.is_empty() {
        clauses.push(in_clause("status", filter.statuses.len()));
        values.extend(
            filter
                .statuses
                .iter()
                .map(|s| Value::Text(s.as_str().to_string())),
        );
    }
    if let Some(rt) = filter.is_real_time {
        clauses.push("is_real_time = ?".into());
        values.push(Value::Integer(rt as i64));
    }
    if let Some(pc) = filter.is_post_consultation {
        clauses.push("is_post_consultation = ?".into());
        values.push(Value::Integer(pc as i64));
    }
    if let Some(after) = &filter.created_after {
        clauses.push("created_at > ?".into());
        values.push(Value::Text(fmt_time(after)));
    }
    if let Some(before) = &filter.created_before {
        clauses.push("created_at < ?".into());
        values.push(Value::Text(fmt_time(before)));
    }
    if !filter.include_expired {
        clauses.push("(expires_at IS NULL OR expires_at > ?)".into());
        values.push(Value::Text(fmt_time(&now)));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn in_clause(column: &str, count: usize) -> String {
    let placeholders = vec!["?"; count].join(", ");
    format!("{column} IN ({placeholders})")
}

/// Untyped row as it comes back from SQLite; enum/JSON parsing happens
/// in `into_alert` so query_map closures stay infallible.
struct RawAlertRow {
    id: String,
    patient_id: String,
    encounter_id: String,
    alert_type: String,
    severity: String,
    category: String,
    title: String,
    message: String,
    suggestion: Option<String>,
    confidence_score: f64,
    source_reasoning: Option<String>,
    processing_model: Option<String>,
    context_data: Option<String>,
    related_data: Option<String>,
    navigation_target: Option<String>,
    proposed_edit: Option<String>,
    status: String,
    is_real_time: i32,
    is_post_consultation: i32,
    acknowledged: i32,
    acknowledged_at: Option<String>,
    acknowledged_by: Option<String>,
    action_taken: Option<String>,
    created_at: String,
    updated_at: String,
    expires_at: Option<String>,
    tags: Option<String>,
    extra_data: Option<String>,
}

impl RawAlertRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            encounter_id: row.get(2)?,
            alert_type: row.get(3)?,
            severity: row.get(4)?,
            category: row.get(5)?,
            title: row.get(6)?,
            message: row.get(7)?,
            suggestion: row.get(8)?,
            confidence_score: row.get(9)?,
            source_reasoning: row.get(10)?,
            processing_model: row.get(11)?,
            context_data: row.get(12)?,
            related_data: row.get(13)?,
            navigation_target: row.get(14)?,
            proposed_edit: row.get(15)?,
            status: row.get(16)?,
            is_real_time: row.get(17)?,
            is_post_consultation: row.get(18)?,
            acknowledged: row.get(19)?,
            acknowledged_at: row.get(20)?,
            acknowledged_by: row.get(21)?,
            action_taken: row.get(22)?,
            created_at: row.get(23)?,
            updated_at: row.get(24)?,
            expires_at: row.get(25)?,
            tags: row.get(26)?,
            extra_data: row.get(27)?,
        })
    }

    fn into_alert(self) -> Result<Alert, DatabaseError> {
        let parse_json = |s: Option<String>| -> Option<serde_json::Value> {
            s.and_then(|j| serde_json::from_str(&j).ok())
        };

        Ok(Alert {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            patient_id: self.patient_id,
            encounter_id: self.encounter_id,
            alert_type: AlertType::from_str(&self.alert_type)?,
            severity: AlertSeverity::from_str(&self.severity)?,
            category: AlertCategory::from_str(&self.category)?,
            title: self.title,
            message: self.message,
            suggestion: self.suggestion,
            confidence_score: self.confidence_score,
            source_reasoning: self.source_reasoning,
            processing_model: self.processing_model,
            context_data: parse_json(self.context_data),
            related_data: parse_json(self.related_data),
            navigation_target: self.navigation_target,
            proposed_edit: parse_json(self.proposed_edit),
            status: AlertStatus::from_str(&self.status)?,
            is_real_time: self.is_real_time != 0,
            is_post_consultation: self.is_post_consultation != 0,
            acknowledged: self.acknowledged != 0,
            acknowledged_at: self.acknowledged_at.as_deref().map(parse_time),
            acknowledged_by: self.acknowledged_by,
            action_taken: self.action_taken,
            created_at: parse_time(&self.created_at),
            updated_at: parse_time(&self.updated_at),
            expires_at: self.expires_at.as_deref().map(parse_time),
            tags: self
                .tags
                .and_then(|t| serde_json::from_str(&t).ok())
                .unwrap_or_default(),
            extra_data: parse_json(self.extra_data),
        })
    }
}
