//! Prompt templates for the two analysis kinds.
//!
//! The patient summary is rendered as plain indented text rather than raw
//! JSON: small local models follow it more reliably and out-of-range labs
//! can be flagged inline.

use std::fmt::Write as _;

use crate::context::{AnalysisContext, LabFlag, PatientContext};

pub const REALTIME_SYSTEM_PROMPT: &str = r#"
You are a clinical decision-support assistant listening to a live
consultation. You receive the patient's chart summary and the newest
segment of the consultation transcript.

RULES:
1. Raise an alert ONLY for a concern grounded in the chart or the
   transcript segment. Never invent findings.
2. Prefer few, high-value alerts over many speculative ones.
3. Each alert must be actionable for the clinician during the visit.
4. Output ONLY a JSON array, no prose before or after.

Each array element:
{
  "alert_type": "drug_interaction | missing_lab | diagnostic_gap | comorbidity | assessment_question | complex_condition",
  "severity": "info | warning | critical",
  "title": "short imperative title",
  "message": "one or two sentences for the clinician",
  "suggestion": "concrete next step or null",
  "confidence": 0.0,
  "reasoning": "one-sentence justification"
}

Output [] if nothing warrants an alert.
"#;

pub const COMPREHENSIVE_SYSTEM_PROMPT: &str = r#"
You are a clinical decision-support assistant reviewing a completed
consultation. You receive the patient's chart summary and the FULL
consultation transcript. Perform a thorough post-visit review: missed
interactions, gaps in the diagnostic picture, labs that should be
ordered, comorbidity risks and unresolved assessment questions.

RULES:
1. Ground every alert in the chart or the transcript. Never invent findings.
2. Consider the consultation as a whole, not just the last topic discussed.
3. Output ONLY a JSON array, no prose before or after.

Each array element:
{
  "alert_type": "drug_interaction | missing_lab | diagnostic_gap | comorbidity | assessment_question | complex_condition",
  "severity": "info | warning | critical",
  "title": "short imperative title",
  "message": "one or two sentences for the clinician",
  "suggestion": "concrete next step or null",
  "confidence": 0.0,
  "reasoning": "one-sentence justification"
}

Output [] if nothing warrants an alert.
"#;

pub fn build_realtime_prompt(context: &AnalysisContext, max_alerts: usize) -> String {
    format!(
        "{}\n<transcript_segment>\n{}\n</transcript_segment>\n\n\
         Analyze the newest transcript segment against the chart. \
         Return at most {max_alerts} alerts as a JSON array.",
        render_patient_summary(&context.patient),
        context.transcript_segment,
    )
}

pub fn build_comprehensive_prompt(context: &AnalysisContext, max_alerts: usize) -> String {
    format!(
        "{}\n<full_transcript>\n{}\n</full_transcript>\n\n\
         Review the complete consultation against the chart. \
         Return at most {max_alerts} alerts as a JSON array.",
        render_patient_summary(&context.patient),
        context.transcript_segment,
    )
}

fn render_patient_summary(patient: &PatientContext) -> String {
    let mut out = String::from("<patient_chart>\n");

    let d = &patient.demographics;
    let _ = writeln!(
        out,
        "Patient: {}{}{}",
        d.name.as_deref().unwrap_or("unknown"),
        d.gender
            .as_deref()
            .map(|g| format!(", {g}"))
            .unwrap_or_default(),
        d.birth_date
            .map(|b| format!(", born {b}"))
            .unwrap_or_default(),
    );

    if patient.conditions.is_empty() {
        out.push_str("Conditions: none on record\n");
    } else {
        out.push_str("Conditions:\n");
        for c in &patient.conditions {
            let _ = writeln!(
                out,
                "  - {}{} ({})",
                c.description,
                c.code
                    .as_deref()
                    .map(|code| format!(" [{code}]"))
                    .unwrap_or_default(),
                c.status,
            );
        }
    }

    if patient.medications.is_empty() {
        out.push_str("Medications: none on record\n");
    } else {
        out.push_str("Medications:\n");
        for m in &patient.medications {
            let _ = writeln!(
                out,
                "  - {}{}{}",
                m.name,
                m.dose.as_deref().map(|d| format!(" {d}")).unwrap_or_default(),
                m.frequency
                    .as_deref()
                    .map(|f| format!(", {f}"))
                    .unwrap_or_default(),
            );
        }
    }

    if patient.lab_results.is_empty() {
        out.push_str("Recent labs: none on record\n");
    } else {
        out.push_str("Recent labs:\n");
        for l in &patient.lab_results {
            let flag = match l.flag {
                LabFlag::Normal => "",
                LabFlag::Low => " [LOW]",
                LabFlag::High => " [HIGH]",
            };
            let _ = writeln!(
                out,
                "  - {}: {}{}{}",
                l.name,
                l.value,
                l.units.as_deref().map(|u| format!(" {u}")).unwrap_or_default(),
                flag,
            );
        }
    }

    if !patient.prior_alerts.is_empty() {
        out.push_str("Prior alerts for this patient:\n");
        for a in &patient.prior_alerts {
            let _ = writeln!(out, "  - [{}] {} ({})", a.alert_type, a.title, a.status);
        }
    }

    out.push_str("</patient_chart>\n");
    out
}
