pub mod change;
pub mod transition;

pub use change::{ChangeEvent, ChangeMetric, RegimeChangeConfig, RegimeChangeDetector};
pub use transition::{
    is_valid_transition, valid_transitions, RegimeAssessment, RegimeTransitionMachine,
    RegimeTransitionRecord, TransitionConfig,
};
