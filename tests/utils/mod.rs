pub mod mocks;
pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use mocks::{FailureMode, RecordingTransport};
#[allow(unused_imports)]
pub use setup::{TestSetup, TestSetupBuilder};

use std::collections::HashMap;

use settlement::settlement::BoardOutcome;

/// A finished board from `(province, owner)` pairs
#[allow(dead_code)]
pub fn board(centers: &[(&str, &str)], solo: Option<&str>) -> BoardOutcome {
    BoardOutcome {
        supply_centers: centers
            .iter()
            .map(|(p, n)| (p.to_string(), n.to_string()))
            .collect::<HashMap<_, _>>(),
        solo_winner: solo.map(str::to_string),
        nmr_members: vec![],
    }
}
