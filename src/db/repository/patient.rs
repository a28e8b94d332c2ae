//! Patient chart reads backing the context provider.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::enums::ConditionStatus;

#[derive(Debug, Clone)]
pub struct PatientRow {
    pub id: String,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub race: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConditionRow {
    pub id: String,
    pub code: Option<String>,
    pub description: String,
    pub status: ConditionStatus,
    pub onset_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct MedicationRow {
    pub id: String,
    pub name: String,
    pub dose: Option<String>,
    pub frequency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LabResultRow {
    pub id: String,
    pub name: String,
    pub value: f64,
    pub units: Option<String>,
    pub reference_low: Option<f64>,
    pub reference_high: Option<f64>,
    pub collected_at: Option<NaiveDateTime>,
}

pub fn get_patient(conn: &Connection, patient_id: &str) -> Result<PatientRow, DatabaseError> {
    conn.query_row(
        "SELECT id, name, gender, birth_date, race FROM patients WHERE id = ?1",
        params![patient_id],
        |row| {
            Ok(PatientRow {
                id: row.get(0)?,
                name: row.get(1)?,
                gender: row.get(2)?,
                birth_date: row
                    .get::<_, Option<String>>(3)?
                    .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
                race: row.get(4)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
            entity_type: "patient".into(),
            id: patient_id.to_string(),
        },
        other => DatabaseError::Sqlite(other),
    })
}

pub fn get_active_conditions(
    conn: &Connection,
    patient_id: &str,
) -> Result<Vec<ConditionRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, code, description, status, onset_date
         FROM conditions
         WHERE patient_id = ?1 AND status != 'resolved'
         ORDER BY onset_date DESC",
    )?;
    let rows = stmt.query_map(params![patient_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut conditions = Vec::new();
    for row in rows {
        let (id, code, description, status, onset_date) = row?;
        conditions.push(ConditionRow {
            id,
            code,
            description,
            status: ConditionStatus::from_str(&status)?,
            onset_date: onset_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        });
    }
    Ok(conditions)
}

pub fn get_active_medications(
    conn: &Connection,
    patient_id: &str,
) -> Result<Vec<MedicationRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, dose, frequency
         FROM medications
         WHERE patient_id = ?1 AND status = 'active'
         ORDER BY name ASC",
    )?;
    let rows = stmt.query_map(params![patient_id], |row| {
        Ok(MedicationRow {
            id: row.get(0)?,
            name: row.get(1)?,
            dose: row.get(2)?,
            frequency: row.get(3)?,
        })
    })?;

    let mut medications = Vec::new();
    for row in rows {
        medications.push(row?);
    }
    Ok(medications)
}

/// Most recent lab results first, capped to keep the reasoning context small.
pub fn get_recent_lab_results(
    conn: &Connection,
    patient_id: &str,
    limit: u32,
) -> Result<Vec<LabResultRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, value, units, reference_low, reference_high, collected_at
         FROM lab_results
         WHERE patient_id = ?1
         ORDER BY collected_at DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![patient_id, limit], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<f64>>(4)?,
            row.get::<_, Option<f64>>(5)?,
            row.get::<_, Option<String>>(6)?,
        ))
    })?;

    let mut labs = Vec::new();
    for row in rows {
        let (id, name, value, units, reference_low, reference_high, collected_at) = row?;
        labs.push(LabResultRow {
            id,
            name,
            value,
            units,
            reference_low,
            reference_high,
            collected_at: collected_at
                .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok()),
        });
    }
    Ok(labs)
}
