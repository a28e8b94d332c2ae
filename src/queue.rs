//! Priority queue feeding the background drain loop.
//!
//! Higher priority drains first; equal priorities drain in arrival order.
//! Ordering is made stable with a monotonic sequence number so two tasks
//! at the same priority can never reorder.

use std::time::Instant;

use uuid::Uuid;

use crate::models::enums::TaskKind;

#[derive(Debug, Clone)]
pub struct QueueTask {
    pub id: Uuid,
    pub kind: TaskKind,
    pub patient_id: String,
    pub encounter_id: String,
    pub priority: i32,
    pub enqueued_at: Instant,
}

impl QueueTask {
    pub fn new(kind: TaskKind, patient_id: &str, encounter_id: &str, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            patient_id: patient_id.to_string(),
            encounter_id: encounter_id.to_string(),
            priority,
            enqueued_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<(u64, QueueTask)>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task: QueueTask) {
        tracing::debug!(
            task_id = %task.id,
            kind = task.kind.as_str(),
            priority = task.priority,
            patient_id = %task.patient_id,
            encounter_id = %task.encounter_id,
            "Task enqueued"
        );
        self.tasks.push((self.next_seq, task));
        self.next_seq += 1;
        self.tasks
            .sort_by(|(seq_a, a), (seq_b, b)| b.priority.cmp(&a.priority).then(seq_a.cmp(seq_b)));
    }

    /// Highest-priority task, oldest first among ties.
    pub fn pop(&mut self) -> Option<QueueTask> {
        if self.tasks.is_empty() {
            return None;
        }
        Some(self.tasks.remove(0).1)
    }

    /// Drop queued work for one (patient, encounter). In-flight work is
    /// unaffected.
    pub fn remove_for(&mut self, patient_id: &str, encounter_id: &str) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|(_, t)| !(t.patient_id == patient_id && t.encounter_id == encounter_id));
        before - self.tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
