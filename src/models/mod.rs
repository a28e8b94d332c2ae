pub mod alert;
pub mod enums;
pub mod filters;

pub use alert::{Alert, AlertUpdate, CandidateAlert, CreateAlertRequest};
pub use enums::*;
pub use filters::{AlertFilter, AlertPage};
