use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::models::Phase;

/// How a history entry came about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionKind {
    Normal,
    /// An unknown phase name was mapped onto a known phase
    Substituted { requested: String },
    /// The requested move was illegal or unresolvable; the machine went to `error`
    Forced { requested: String },
    Reset,
}

#[derive(Debug, Clone)]
pub struct PhaseTransition {
    pub from: Option<Phase>,
    pub to: Phase,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub kind: TransitionKind,
}

/// Unknown-name aliases, checked before context keywords
const SYNONYMS: &[(&str, Phase)] = &[
    ("init", Phase::Initializing),
    ("starting", Phase::Initializing),
    ("local_loading", Phase::LoadingLocal),
    ("loading", Phase::LoadingLocal),
    ("local_loaded", Phase::LocalComplete),
    ("local_done", Phase::LocalComplete),
    ("connectivity_check", Phase::CheckingConnectivity),
    ("checking_network", Phase::CheckingConnectivity),
    ("checking_internet", Phase::CheckingConnectivity),
    ("loading_remote", Phase::LoadingRemoteData),
    ("remote_loading", Phase::LoadingRemoteData),
    ("loading_unified", Phase::LoadingRemoteData),
    ("remote_loaded", Phase::RemoteComplete),
    ("remote_done", Phase::RemoteComplete),
    ("merging", Phase::MergingData),
    ("merge", Phase::MergingData),
    ("validation", Phase::Validating),
    ("validate", Phase::Validating),
    ("complete", Phase::UnifiedComplete),
    ("completed", Phase::UnifiedComplete),
    ("done", Phase::UnifiedComplete),
    ("unified_loaded", Phase::UnifiedComplete),
    ("failed", Phase::Error),
    ("failure", Phase::Error),
];

/// Context keywords, most specific first
const CONTEXT_KEYWORDS: &[(&str, Phase)] = &[
    ("connectivity", Phase::CheckingConnectivity),
    ("network", Phase::CheckingConnectivity),
    ("internet", Phase::CheckingConnectivity),
    ("merg", Phase::MergingData),
    ("validat", Phase::Validating),
    ("remote", Phase::LoadingRemoteData),
    ("jellyfin", Phase::LoadingRemoteData),
    ("background", Phase::LoadingRemoteData),
    ("local", Phase::LoadingLocal),
];

/// Label and nominal overall progress for each phase
fn phase_label(phase: Phase) -> (&'static str, Option<u8>) {
    match phase {
        Phase::Initializing => ("Initializing media library", Some(0)),
        Phase::LoadingLocal => ("Loading local media", Some(10)),
        Phase::LocalComplete => ("Local media ready", Some(40)),
        Phase::CheckingConnectivity => ("Checking connectivity", Some(50)),
        Phase::LoadingRemoteData => ("Loading remote media", Some(60)),
        Phase::RemoteComplete => ("Remote media loaded", Some(75)),
        Phase::MergingData => ("Merging media sources", Some(85)),
        Phase::Validating => ("Validating media library", Some(95)),
        Phase::UnifiedComplete => ("Media library ready", Some(100)),
        Phase::Error => ("Loading failed", None),
    }
}

/// Registry of loading phases with a fixed transition table
#[derive(Debug)]
pub struct PhaseStateMachine {
    current: Phase,
    entered_at: Instant,
    history: Vec<PhaseTransition>,
}

impl Default for PhaseStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseStateMachine {
    pub fn new() -> Self {
        Self {
            current: Phase::Initializing,
            entered_at: Instant::now(),
            history: vec![PhaseTransition {
                from: None,
                to: Phase::Initializing,
                timestamp: Utc::now(),
                reason: None,
                kind: TransitionKind::Reset,
            }],
        }
    }

    /// Legal successors of `from`
    pub fn allowed_transitions(from: Phase) -> &'static [Phase] {
        use Phase::*;

        match from {
            Initializing => &[LoadingLocal, Error],
            LoadingLocal => &[LocalComplete, Error],
            LocalComplete => &[CheckingConnectivity, UnifiedComplete, Error],
            CheckingConnectivity => &[LoadingRemoteData, UnifiedComplete, Error],
            LoadingRemoteData => &[RemoteComplete, Error],
            RemoteComplete => &[MergingData, UnifiedComplete, Error],
            MergingData => &[Validating, UnifiedComplete, Error],
            Validating => &[UnifiedComplete, Error],
            UnifiedComplete => &[Error],
            Error => &[],
        }
    }

    pub fn is_valid_transition(from: Phase, to: Phase) -> bool {
        Self::allowed_transitions(from).contains(&to)
    }

    /// Whether `name` is a registered phase
    pub fn validate_phase(&self, name: &str) -> bool {
        Phase::from_name(name).is_some()
    }

    pub fn get_current_phase(&self) -> Phase {
        self.current
    }

    pub fn get_phase_history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub fn time_in_current_phase(&self) -> Duration {
        self.entered_at.elapsed()
    }

    /// Move to `to` if the table allows it; otherwise force `error`.
    ///
    /// Returns true when the requested phase was applied.
    pub fn transition(&mut self, to: Phase, reason: Option<&str>) -> bool {
        if Self::is_valid_transition(self.current, to) {
            debug!(
                "Phase transition: {} -> {} (reason: {:?})",
                self.current, to, reason
            );
            self.apply(to, reason.map(str::to_string), TransitionKind::Normal);
            return true;
        }

        warn!(
            "Illegal phase transition {} -> {}, forcing error",
            self.current, to
        );
        self.force_error(to.as_str(), reason);
        false
    }

    /// Transition by name, resolving unknown names through the synonym table
    /// and then through keywords in `context`.
    ///
    /// The resulting phase is always either the requested one, a legal
    /// substitute, or `error`. Returns true unless `error` was forced.
    pub fn transition_to_phase(&mut self, name: &str, context: &str) -> bool {
        if let Some(phase) = Phase::from_name(name) {
            return self.transition(phase, Some(context));
        }

        warn!("Unknown phase '{}' requested (context: '{}')", name, context);

        let candidates = [Self::lookup_synonym(name), Self::infer_from_context(context)];
        for substitute in candidates.into_iter().flatten() {
            if Self::is_valid_transition(self.current, substitute) {
                info!(
                    "Substituting phase {} for unknown '{}' (from {})",
                    substitute, name, self.current
                );
                self.apply(
                    substitute,
                    Some(context.to_string()),
                    TransitionKind::Substituted {
                        requested: name.to_string(),
                    },
                );
                return substitute != Phase::Error;
            }
            debug!(
                "Substitute {} for '{}' is not reachable from {}",
                substitute, name, self.current
            );
        }

        self.force_error(name, Some(context));
        false
    }

    /// Re-seat the machine for a new pass; not subject to the table
    pub fn reset_to(&mut self, phase: Phase, reason: &str) {
        info!("Phase reset: {} -> {} ({})", self.current, phase, reason);
        self.apply(phase, Some(reason.to_string()), TransitionKind::Reset);
    }

    pub fn reset(&mut self) {
        self.reset_to(Phase::Initializing, "new load cycle");
    }

    /// Human-readable message; unknown names get a generic one
    pub fn get_phase_message(&self, name: &str, progress: Option<f32>) -> String {
        match Phase::from_name(name).or_else(|| Self::lookup_synonym(name)) {
            Some(phase) => Self::phase_message(phase, progress),
            None => "Loading media library...".to_string(),
        }
    }

    /// `progress` overrides the nominal percentage for the phase
    pub fn phase_message(phase: Phase, progress: Option<f32>) -> String {
        let (label, nominal) = phase_label(phase);
        match (progress, nominal) {
            (Some(p), Some(_)) => format!("{} ({:.0}%)", label, p.clamp(0.0, 100.0)),
            (None, Some(n)) => format!("{} ({}%)", label, n),
            (_, None) => label.to_string(),
        }
    }

    fn lookup_synonym(name: &str) -> Option<Phase> {
        let normalized = name.trim().to_lowercase().replace(['-', ' '], "_");
        if let Some(phase) = Phase::from_name(&normalized) {
            return Some(phase);
        }
        SYNONYMS
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, phase)| *phase)
    }

    fn infer_from_context(context: &str) -> Option<Phase> {
        let context = context.to_lowercase();
        CONTEXT_KEYWORDS
            .iter()
            .find(|(keyword, _)| context.contains(keyword))
            .map(|(_, phase)| *phase)
    }

    fn force_error(&mut self, requested: &str, reason: Option<&str>) {
        if self.current == Phase::Error {
            return;
        }
        self.apply(
            Phase::Error,
            reason.map(str::to_string),
            TransitionKind::Forced {
                requested: requested.to_string(),
            },
        );
    }

    fn apply(&mut self, to: Phase, reason: Option<String>, kind: TransitionKind) {
        self.history.push(PhaseTransition {
            from: Some(self.current),
            to,
            timestamp: Utc::now(),
            reason,
            kind,
        });
        self.current = to;
        self.entered_at = Instant::now();
    }
}
