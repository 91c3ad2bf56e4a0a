//! Insight compilation over a patient's session history
//!
//! pain_reduction   = first.pain_level - most_recent.pain_level
//! improvement_rate = pain_reduction / first.pain_level × 100   (one decimal)
//! recovery         = (scale_max - most_recent.pain_level) / scale_max × 100
//!
//! History is ordered most recent first. Fewer than two sessions leaves the
//! reduction and rate undefined.
//!
//! Mobility trend is keyword containment over the most recent assessment,
//! evaluated against an ordered rule table (first match wins).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::PersistedSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MobilityTrend {
    Improved,
    Worsened,
    Unchanged,
    Unknown,
}

impl MobilityTrend {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Improved => "Improved",
            Self::Worsened => "Worsened",
            Self::Unchanged => "Unchanged",
            Self::Unknown => "Unknown",
        }
    }
}

/// Checked top to bottom.
const TREND_RULES: &[(MobilityTrend, &[&str])] = &[
    (
        MobilityTrend::Improved,
        &["improved", "better", "increased", "more"],
    ),
    (
        MobilityTrend::Worsened,
        &["worsened", "worse", "decreased", "less", "limited", "difficulty"],
    ),
    (
        MobilityTrend::Unchanged,
        &["unchanged", "same", "consistent", "maintained"],
    ),
];

pub fn classify_mobility(assessment: &str) -> MobilityTrend {
    let text = assessment.to_lowercase();
    TREND_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(trend, _)| *trend)
        .unwrap_or(MobilityTrend::Unknown)
}

/// Derived metrics. Recomputed on every request, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pain_reduction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement_rate: Option<f64>,
    pub initial_pain_level: Option<f64>,
    pub current_pain_level: Option<f64>,
    pub recovery_progress: Option<f64>,
    pub mobility_trend: MobilityTrend,
    pub total_sessions: usize,
    pub last_session_date: Option<DateTime<Utc>>,
    pub next_appointment: Option<String>,
    pub recent_treatment: Option<String>,
    /// Oldest first, for charting.
    pub pain_trend: Vec<PainPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PainPoint {
    pub date: DateTime<Utc>,
    pub pain_level: f64,
}

impl InsightSummary {
    /// The reduction block is only shown for an actual improvement.
    pub fn shows_pain_reduction(&self) -> bool {
        matches!(self.pain_reduction, Some(r) if r > 0.0)
    }

    pub fn shows_mobility_trend(&self) -> bool {
        self.mobility_trend != MobilityTrend::Unknown
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InsightCompiler {
    pain_scale_max: f64,
}

impl Default for InsightCompiler {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl InsightCompiler {
    pub fn new(pain_scale_max: f64) -> Self {
        Self { pain_scale_max }
    }

    /// Compile insights from a history ordered most recent first.
    ///
    /// `next_appointment` comes from the patient record and is passed through as is.
    pub fn compile(
        &self,
        history: &[PersistedSession],
        next_appointment: Option<&str>,
    ) -> InsightSummary {
        let most_recent = history.first();
        let first = history.last();

        let (pain_reduction, improvement_rate) = match (first, most_recent) {
            (Some(first), Some(recent)) if history.len() >= 2 => {
                let reduction = first.pain_level - recent.pain_level;
                let rate = if first.pain_level != 0.0 {
                    Some(round_one(reduction / first.pain_level * 100.0))
                } else {
                    None
                };
                (Some(round_one(reduction)), rate)
            }
            _ => (None, None),
        };

        let recovery_progress = most_recent.filter(|_| self.pain_scale_max > 0.0).map(|s| {
            let remaining = (self.pain_scale_max - s.pain_level).clamp(0.0, self.pain_scale_max);
            round_one(remaining / self.pain_scale_max * 100.0)
        });

        InsightSummary {
            pain_reduction,
            improvement_rate,
            initial_pain_level: first.map(|s| s.pain_level),
            current_pain_level: most_recent.map(|s| s.pain_level),
            recovery_progress,
            mobility_trend: most_recent
                .map(|s| classify_mobility(&s.mobility_assessment))
                .unwrap_or(MobilityTrend::Unknown),
            total_sessions: history.len(),
            last_session_date: most_recent.map(|s| s.session_date),
            next_appointment: next_appointment.map(str::to_string),
            recent_treatment: most_recent
                .map(|s| s.treatment_provided.clone())
                .filter(|t| !t.is_empty()),
            pain_trend: history
                .iter()
                .rev()
                .map(|s| PainPoint {
                    date: s.session_date,
                    pain_level: s.pain_level,
                })
                .collect(),
        }
    }
}

fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionType;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn session(day: u32, pain: f64, mobility: &str) -> PersistedSession {
        let date = Utc.with_ymd_and_hms(2025, 1, day, 10, 0, 0).unwrap();
        PersistedSession {
            id: Uuid::new_v4(),
            session_code: format!("session_{}", day),
            user_id: "user-1".to_string(),
            patient_id: "patient-1".to_string(),
            session_type: SessionType::Treatment,
            session_date: date,
            pain_level: pain,
            predicted_pain_level: None,
            mobility_assessment: mobility.to_string(),
            treatment_provided: format!("Treatment on day {}", day),
            prescribed_exercises: String::new(),
            attachment_path: None,
            created_at: date,
        }
    }

    /// Oldest to newest pain levels, returned most recent first.
    fn history(levels: &[f64]) -> Vec<PersistedSession> {
        let mut sessions: Vec<_> = levels
            .iter()
            .enumerate()
            .map(|(i, p)| session(i as u32 + 1, *p, "Consistent with last visit"))
            .collect();
        sessions.reverse();
        sessions
    }

    #[test]
    fn test_reduction_and_rate() {
        let summary = InsightCompiler::default().compile(&history(&[7.0, 6.5, 6.0, 5.0, 4.0]), None);

        assert_eq!(summary.pain_reduction, Some(3.0));
        assert_eq!(summary.improvement_rate, Some(42.9));
        assert_eq!(summary.initial_pain_level, Some(7.0));
        assert_eq!(summary.current_pain_level, Some(4.0));
        assert_eq!(summary.total_sessions, 5);
        assert!(summary.shows_pain_reduction());
    }

    #[test]
    fn test_single_session_omits_reduction() {
        let summary = InsightCompiler::default().compile(&history(&[6.0]), Some("2025-04-01"));

        assert_eq!(summary.pain_reduction, None);
        assert_eq!(summary.improvement_rate, None);
        assert_eq!(summary.total_sessions, 1);
        assert_eq!(summary.next_appointment.as_deref(), Some("2025-04-01"));

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("painReduction").is_none());
        assert!(json.get("improvementRate").is_none());
    }

    #[test]
    fn test_empty_history() {
        let summary = InsightCompiler::default().compile(&[], None);
        assert_eq!(summary.total_sessions, 0);
        assert_eq!(summary.mobility_trend, MobilityTrend::Unknown);
        assert!(summary.last_session_date.is_none());
        assert!(summary.recovery_progress.is_none());
    }

    #[test]
    fn test_zero_initial_pain_has_no_rate() {
        let summary = InsightCompiler::default().compile(&history(&[0.0, 2.0]), None);
        assert_eq!(summary.pain_reduction, Some(-2.0));
        assert_eq!(summary.improvement_rate, None);
        assert!(!summary.shows_pain_reduction());
    }

    #[test]
    fn test_mobility_keywords() {
        assert_eq!(classify_mobility("Improved range of motion"), MobilityTrend::Improved);
        assert_eq!(
            classify_mobility("Limited range of motion, pain on rotation"),
            MobilityTrend::Worsened
        );
        assert_eq!(classify_mobility("Maintained flexion"), MobilityTrend::Unchanged);
        assert_eq!(classify_mobility("Severely restricted"), MobilityTrend::Unknown);
        // Ties go to the rule checked first.
        assert_eq!(
            classify_mobility("Better on the left, limited on the right"),
            MobilityTrend::Improved
        );
    }

    #[test]
    fn test_trend_uses_most_recent_session() {
        let mut sessions = vec![
            session(3, 4.0, "Difficulty with lateral movements"),
            session(1, 7.0, "Improved since intake"),
        ];
        let summary = InsightCompiler::default().compile(&sessions, None);
        assert_eq!(summary.mobility_trend, MobilityTrend::Worsened);

        sessions.reverse();
        let summary = InsightCompiler::default().compile(&sessions, None);
        assert_eq!(summary.mobility_trend, MobilityTrend::Improved);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let sessions = history(&[7.0, 6.5, 6.0, 5.0, 4.0]);
        let compiler = InsightCompiler::default();

        let a = compiler.compile(&sessions, Some("next week"));
        let b = compiler.compile(&sessions, Some("next week"));

        assert_eq!(a, b);
        assert_eq!(
            a.improvement_rate.map(f64::to_bits),
            b.improvement_rate.map(f64::to_bits)
        );
    }

    #[test]
    fn test_pain_trend_is_oldest_first_and_recovery() {
        let summary = InsightCompiler::new(10.0).compile(&history(&[7.0, 5.0, 4.0]), None);
        let levels: Vec<f64> = summary.pain_trend.iter().map(|p| p.pain_level).collect();
        assert_eq!(levels, vec![7.0, 5.0, 4.0]);
        assert_eq!(summary.recovery_progress, Some(60.0));
    }
}
