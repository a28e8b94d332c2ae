//! Per-(patient, encounter) transcript cursor.
//!
//! A consultation transcript grows while the session is live; each analysis
//! cycle should only pay for the part nobody has looked at yet. The tracker
//! stores the latest full transcript per key and a cursor marking how many
//! characters have already been consumed.
//!
//! Cursor arithmetic is in characters, not bytes, so multi-byte transcript
//! content can never split a UTF-8 boundary.

use std::collections::HashMap;

/// Composite session key.
pub type EncounterKey = (String, String);

pub fn encounter_key(patient_id: &str, encounter_id: &str) -> EncounterKey {
    (patient_id.to_string(), encounter_id.to_string())
}

#[derive(Debug, Default)]
struct Cursor {
    transcript: String,
    /// Characters already consumed.
    processed_chars: usize,
}

#[derive(Debug, Default)]
pub struct TranscriptDeltaTracker {
    cursors: HashMap<EncounterKey, Cursor>,
    /// Cap on the delta returned per consume; keeps the most recent chars.
    max_batch_chars: usize,
}

impl TranscriptDeltaTracker {
    pub fn new(max_batch_chars: usize) -> Self {
        Self {
            cursors: HashMap::new(),
            max_batch_chars,
        }
    }

    /// Zero the cursor and stored transcript for a key.
    pub fn reset(&mut self, patient_id: &str, encounter_id: &str) {
        self.cursors
            .insert(encounter_key(patient_id, encounter_id), Cursor::default());
    }

    /// Replace the stored transcript. A transcript shorter than the cursor
    /// is treated as a fresh start: the cursor resets to zero so the new
    /// text is processed in full rather than sliced nonsensically.
    pub fn update(&mut self, patient_id: &str, encounter_id: &str, full_transcript: &str) {
        let cursor = self
            .cursors
            .entry(encounter_key(patient_id, encounter_id))
            .or_default();

        let new_len = full_transcript.chars().count();
        if new_len < cursor.processed_chars {
            tracing::debug!(
                patient_id,
                encounter_id,
                old_cursor = cursor.processed_chars,
                new_len,
                "Transcript shrank; resetting cursor"
            );
            cursor.processed_chars = 0;
        }
        cursor.transcript = full_transcript.to_string();
    }

    /// Return the unseen suffix and advance the cursor to the end of the
    /// stored transcript. A second call with no intervening update yields
    /// the empty string.
    pub fn consume_delta(&mut self, patient_id: &str, encounter_id: &str) -> String {
        let Some(cursor) = self
            .cursors
            .get_mut(&encounter_key(patient_id, encounter_id))
        else {
            return String::new();
        };

        let total_chars = cursor.transcript.chars().count();
        if cursor.processed_chars >= total_chars {
            cursor.processed_chars = total_chars;
            return String::new();
        }

        let mut start = cursor.processed_chars;
        let unseen = total_chars - start;
        if self.max_batch_chars > 0 && unseen > self.max_batch_chars {
            // Favor recency over completeness.
            start = total_chars - self.max_batch_chars;
        }

        let delta: String = cursor.transcript.chars().skip(start).collect();
        cursor.processed_chars = total_chars;
        delta
    }

    /// Unseen characters for a key without advancing the cursor.
    pub fn pending_chars(&self, patient_id: &str, encounter_id: &str) -> usize {
        self.cursors
            .get(&encounter_key(patient_id, encounter_id))
            .map(|c| c.transcript.chars().count().saturating_sub(c.processed_chars))
            .unwrap_or(0)
    }

    /// Latest stored transcript for a key (comprehensive pass input).
    pub fn full_transcript(&self, patient_id: &str, encounter_id: &str) -> Option<&str> {
        self.cursors
            .get(&encounter_key(patient_id, encounter_id))
            .map(|c| c.transcript.as_str())
    }

    /// Drop all state for a key.
    pub fn remove(&mut self, patient_id: &str, encounter_id: &str) {
        self.cursors.remove(&encounter_key(patient_id, encounter_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TranscriptDeltaTracker {
        TranscriptDeltaTracker::new(4000)
    }

    #[test]
    fn delta_consumption_is_prefix_additive() {
        let mut t = tracker();
        t.reset("p1", "e1");

        t.update("p1", "e1", "The patient reports");
        let first = t.consume_delta("p1", "e1");

        t.update("p1", "e1", "The patient reports chest pain since Tuesday");
        let second = t.consume_delta("p1", "e1");

        assert_eq!(
            format!("{first}{second}"),
            "The patient reports chest pain since Tuesday"
        );
    }

    #[test]
    fn consume_twice_yields_empty_second_time() {
        let mut t = tracker();
        t.reset("p1", "e1");
        t.update("p1", "e1", "some transcript text here");

        assert!(!t.consume_delta("p1", "e1").is_empty());
        assert_eq!(t.consume_delta("p1", "e1"), "");
    }

    #[test]
    fn reset_zeroes_cursor_and_text() {
        let mut t = tracker();
        t.update("p1", "e1", "earlier consultation text");
        t.consume_delta("p1", "e1");

        t.reset("p1", "e1");
        assert_eq!(t.full_transcript("p1", "e1"), Some(""));
        assert_eq!(t.consume_delta("p1", "e1"), "");
    }

    #[test]
    fn shrinking_transcript_resets_cursor() {
        let mut t = tracker();
        t.update("p1", "e1", "a much longer transcript that got consumed");
        t.consume_delta("p1", "e1");

        // Edited/truncated mid-consultation: treated as a new transcript.
        t.update("p1", "e1", "short rewrite");
        assert_eq!(t.consume_delta("p1", "e1"), "short rewrite");
    }

    #[test]
    fn oversized_delta_keeps_most_recent_chars() {
        let mut t = TranscriptDeltaTracker::new(10);
        t.update("p1", "e1", "0123456789ABCDEFGHIJ");

        let delta = t.consume_delta("p1", "e1");
        assert_eq!(delta, "ABCDEFGHIJ", "keeps the trailing batch");
        assert_eq!(t.consume_delta("p1", "e1"), "");
    }

    #[test]
    fn keys_are_independent() {
        let mut t = tracker();
        t.update("p1", "e1", "transcript one");
        t.update("p2", "e9", "transcript two");

        assert_eq!(t.consume_delta("p1", "e1"), "transcript one");
        assert_eq!(t.consume_delta("p2", "e9"), "transcript two");
    }

    #[test]
    fn multibyte_content_splits_on_char_boundaries() {
        let mut t = TranscriptDeltaTracker::new(5);
        t.update("p1", "e1", "douleur thoracique à l'effort — à évaluer");
        let delta = t.consume_delta("p1", "e1");
        assert_eq!(delta.chars().count(), 5);
    }

    #[test]
    fn pending_chars_without_advancing() {
        let mut t = tracker();
        t.update("p1", "e1", "hello");
        assert_eq!(t.pending_chars("p1", "e1"), 5);
        assert_eq!(t.pending_chars("p1", "e1"), 5, "peek must not advance");
        t.consume_delta("p1", "e1");
        assert_eq!(t.pending_chars("p1", "e1"), 0);
    }

    #[test]
    fn unknown_key_yields_empty_delta() {
        let mut t = tracker();
        assert_eq!(t.consume_delta("ghost", "none"), "");
        assert_eq!(t.pending_chars("ghost", "none"), 0);
    }
}
