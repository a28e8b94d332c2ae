pub mod alert;
pub mod patient;

pub use alert::{get_alert, insert_alert, query_alerts, update_alert};
pub use patient::{
    get_active_conditions, get_active_medications, get_patient, get_recent_lab_results,
    ConditionRow, LabResultRow, MedicationRow, PatientRow,
};
