//! One-shot notification state.
//!
//! Tracks, per subject, which escalation milestones have already been sent
//! and when the last rate-limited admin notice went out, so repeated runs
//! stay idempotent. The backing file is plain JSON, read once at startup
//! and rewritten atomically (temp file + rename) after every change;
//! concurrent runs are prevented outside this crate.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Ordered escalation milestones, least urgent first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    /// More than a week before the deadline.
    Advance,
    /// Inside the final week.
    Imminent,
    /// Deadline passed.
    Final,
}

/// Outcome of evaluating the escalation policy for one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStep {
    /// The triggering condition lapsed; drop all state for the subject.
    Clear,
    /// Nothing to send.
    Hold,
    /// Send this milestone and mark it.
    Send(Milestone),
}

/// Days past the deadline after which the subject's state is cleared.
pub const LAPSE_THRESHOLD_DAYS: i64 = -5;

/// Evaluate which milestone, if any, is due for a subject `days_left` days
/// before its deadline, given the milestones already sent.
///
/// Bands are checked most-urgent-first and at most one milestone is sent
/// per evaluation. A milestone already marked is never re-sent, and a sent
/// milestone suppresses everything less urgent than itself: escalations
/// never de-escalate.
#[must_use]
pub fn evaluate_escalation(days_left: i64, sent: &BTreeSet<Milestone>) -> EscalationStep {
    if days_left < LAPSE_THRESHOLD_DAYS {
        return EscalationStep::Clear;
    }
    let band = if days_left < 0 {
        Milestone::Final
    } else if days_left <= 7 {
        Milestone::Imminent
    } else {
        Milestone::Advance
    };
    if sent.iter().any(|m| *m >= band) {
        return EscalationStep::Hold;
    }
    EscalationStep::Send(band)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubjectState {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    milestones: BTreeSet<Milestone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_notice: Option<DateTime<Utc>>,
}

/// File-backed notification state, keyed by subject identifier.
#[derive(Debug)]
pub struct NotificationGate {
    path: PathBuf,
    state: BTreeMap<String, SubjectState>,
}

impl NotificationGate {
    /// Load state from `path`; a missing file is an empty gate.
    pub fn load(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| EngineError::CorruptState {
                path: path.clone(),
                source: e,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(EngineError::State {
                    path: path.clone(),
                    source: e,
                })
            }
        };
        debug!(path = %path.display(), subjects = state.len(), "Loaded notification state");
        Ok(Self { path, state })
    }

    /// Whether a milestone was already sent for the subject.
    #[must_use]
    pub fn has_sent(&self, subject: &str, milestone: Milestone) -> bool {
        self.state
            .get(subject)
            .is_some_and(|s| s.milestones.contains(&milestone))
    }

    /// Milestones already sent for the subject.
    #[must_use]
    pub fn sent_milestones(&self, subject: &str) -> BTreeSet<Milestone> {
        self.state
            .get(subject)
            .map(|s| s.milestones.clone())
            .unwrap_or_default()
    }

    /// Mark a milestone sent and persist immediately.
    pub fn mark_sent(&mut self, subject: &str, milestone: Milestone) -> EngineResult<()> {
        info!(subject = %subject, milestone = ?milestone, "Marking milestone sent");
        self.state
            .entry(subject.to_string())
            .or_default()
            .milestones
            .insert(milestone);
        self.persist()
    }

    /// Drop all state for the subject (triggering condition lapsed).
    pub fn clear(&mut self, subject: &str) -> EngineResult<()> {
        if self.state.remove(subject).is_some() {
            info!(subject = %subject, "Cleared notification state");
            self.persist()?;
        }
        Ok(())
    }

    /// Whether the rate-limited notice may be sent again: true when no
    /// notice was ever recorded, or the last one is older than `min_gap`.
    #[must_use]
    pub fn notice_due(&self, subject: &str, now: DateTime<Utc>, min_gap: Duration) -> bool {
        match self.state.get(subject).and_then(|s| s.last_notice) {
            Some(last) => now - last > min_gap,
            None => true,
        }
    }

    /// Record that the rate-limited notice went out now.
    pub fn record_notice(&mut self, subject: &str, now: DateTime<Utc>) -> EngineResult<()> {
        self.state.entry(subject.to_string()).or_default().last_notice = Some(now);
        self.persist()
    }

    /// Write the state file atomically: the file on disk is always either
    /// the previous or the new content, never a truncation.
    fn persist(&self) -> EngineResult<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |e: std::io::Error| EngineError::State {
            path: self.path.clone(),
            source: e,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        let bytes = serde_json::to_vec_pretty(&self.state).map_err(|e| {
            EngineError::CorruptState {
                path: self.path.clone(),
                source: e,
            }
        })?;
        tmp.write_all(&bytes).map_err(io_err)?;
        tmp.persist(&self.path)
            .map_err(|e| EngineError::State {
                path: self.path.clone(),
                source: e.error,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn gate_in(dir: &TempDir) -> NotificationGate {
        NotificationGate::load(dir.path().join("state.json")).unwrap()
    }

    #[test]
    fn missing_file_is_empty_gate() {
        let dir = TempDir::new().unwrap();
        let gate = gate_in(&dir);
        assert!(!gate.has_sent("jdoe", Milestone::Advance));
    }

    #[test]
    fn mark_sent_survives_reload() {
        let dir = TempDir::new().unwrap();
        let mut gate = gate_in(&dir);
        gate.mark_sent("jdoe", Milestone::Imminent).unwrap();

        let reloaded = gate_in(&dir);
        assert!(reloaded.has_sent("jdoe", Milestone::Imminent));
        assert!(!reloaded.has_sent("jdoe", Milestone::Final));
    }

    #[test]
    fn clear_removes_subject() {
        let dir = TempDir::new().unwrap();
        let mut gate = gate_in(&dir);
        gate.mark_sent("jdoe", Milestone::Advance).unwrap();
        gate.clear("jdoe").unwrap();

        let reloaded = gate_in(&dir);
        assert!(!reloaded.has_sent("jdoe", Milestone::Advance));
    }

    #[test]
    fn notice_rate_limit_window() {
        let dir = TempDir::new().unwrap();
        let mut gate = gate_in(&dir);
        let now = Utc::now();
        let gap = Duration::days(3);

        assert!(gate.notice_due("admin1", now, gap));
        gate.record_notice("admin1", now).unwrap();
        // Second run within 3 days: suppressed.
        assert!(!gate.notice_due("admin1", now + Duration::days(2), gap));
        assert!(!gate.notice_due("admin1", now + Duration::days(3), gap));
        // After day 4: due again.
        assert!(gate.notice_due("admin1", now + Duration::days(4), gap));
    }

    #[test]
    fn escalation_band_selection() {
        let none = BTreeSet::new();
        assert_eq!(
            evaluate_escalation(30, &none),
            EscalationStep::Send(Milestone::Advance)
        );
        assert_eq!(
            evaluate_escalation(5, &none),
            EscalationStep::Send(Milestone::Imminent)
        );
        assert_eq!(
            evaluate_escalation(-1, &none),
            EscalationStep::Send(Milestone::Final)
        );
        assert_eq!(evaluate_escalation(-6, &none), EscalationStep::Clear);
    }

    #[test]
    fn escalation_never_resends() {
        let mut sent = BTreeSet::new();
        sent.insert(Milestone::Imminent);
        assert_eq!(evaluate_escalation(5, &sent), EscalationStep::Hold);
    }

    #[test]
    fn sent_milestone_suppresses_less_urgent() {
        // Once Imminent went out, a later Advance-band evaluation must not
        // send the earlier milestone.
        let mut sent = BTreeSet::new();
        sent.insert(Milestone::Imminent);
        assert_eq!(evaluate_escalation(30, &sent), EscalationStep::Hold);
    }

    #[test]
    fn escalation_proceeds_to_more_urgent() {
        let mut sent = BTreeSet::new();
        sent.insert(Milestone::Advance);
        assert_eq!(
            evaluate_escalation(5, &sent),
            EscalationStep::Send(Milestone::Imminent)
        );
        sent.insert(Milestone::Imminent);
        assert_eq!(
            evaluate_escalation(-2, &sent),
            EscalationStep::Send(Milestone::Final)
        );
    }

    #[test]
    fn state_file_is_valid_json_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut gate = NotificationGate::load(&path).unwrap();
        gate.mark_sent("jdoe", Milestone::Advance).unwrap();
        gate.record_notice("admin1", Utc::now()).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed.get("jdoe").is_some());
        assert!(parsed.get("admin1").is_some());
    }
}
