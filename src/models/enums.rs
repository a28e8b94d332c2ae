use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(AlertType {
    DrugInteraction => "drug_interaction",
    MissingLab => "missing_lab",
    DiagnosticGap => "diagnostic_gap",
    Comorbidity => "comorbidity",
    AssessmentQuestion => "assessment_question",
    ComplexCondition => "complex_condition",
});

str_enum!(AlertSeverity {
    Info => "info",
    Warning => "warning",
    Critical => "critical",
});

impl AlertSeverity {
    /// Numeric rank for default query ordering (highest surfaces first).
    pub fn rank(&self) -> i32 {
        match self {
            Self::Info => 0,
            Self::Warning => 1,
            Self::Critical => 2,
        }
    }
}

str_enum!(AlertCategory {
    RealTime => "real_time",
    PostConsultation => "post_consultation",
    Manual => "manual",
});

str_enum!(AlertStatus {
    Active => "active",
    Accepted => "accepted",
    Dismissed => "dismissed",
    Resolved => "resolved",
});

str_enum!(TaskKind {
    RealTime => "real_time",
    PostConsultation => "post_consultation",
});

str_enum!(ConditionStatus {
    Active => "active",
    Resolved => "resolved",
    Monitoring => "monitoring",
});
