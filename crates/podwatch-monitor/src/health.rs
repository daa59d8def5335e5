use podwatch_types::{HealthVerdict, PodPhase};

/// Phases that mark a namespace as needing attention
pub const PROBLEM_PHASES: [PodPhase; 4] = [
    PodPhase::Error,
    PodPhase::CrashLoopBackOff,
    PodPhase::Pending,
    PodPhase::Failed,
];

/// Classifies a namespace's pod phases
pub struct HealthEvaluator;

impl HealthEvaluator {
    /// Unhealthy iff at least one phase is a problem phase; empty input is healthy
    pub fn evaluate(phases: &[PodPhase]) -> HealthVerdict {
        let offending_phases: std::collections::BTreeSet<PodPhase> = phases
            .iter()
            .copied()
            .filter(|p| PROBLEM_PHASES.contains(p))
            .collect();

        HealthVerdict {
            unhealthy: !offending_phases.is_empty(),
            offending_phases,
        }
    }
}
