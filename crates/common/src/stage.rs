//! Enrichment stages and the per-identifier set of completed stages
//!
//! Stored as a bitmask in the `completed_stages` column of `dois`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One enrichment source with its own completion flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DoiNew,
    DoiOld,
    LandingPage,
    Ncbi,
    Pubmed,
    PubmedCentral,
    Unpaywall,
}

/// Stages driven directly by a runner. `Pubmed` and `PubmedCentral` are
/// set as a side effect of the NCBI runner.
pub const RUNNER_STAGES: [Stage; 5] = [
    Stage::DoiNew,
    Stage::DoiOld,
    Stage::LandingPage,
    Stage::Ncbi,
    Stage::Unpaywall,
];

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::DoiNew,
        Stage::DoiOld,
        Stage::LandingPage,
        Stage::Ncbi,
        Stage::Pubmed,
        Stage::PubmedCentral,
        Stage::Unpaywall,
    ];

    /// Bit in the completion mask
    pub fn bit(self) -> i32 {
        match self {
            Stage::DoiNew => 1,
            Stage::DoiOld => 1 << 1,
            Stage::LandingPage => 1 << 2,
            Stage::Ncbi => 1 << 3,
            Stage::Pubmed => 1 << 4,
            Stage::PubmedCentral => 1 << 5,
            Stage::Unpaywall => 1 << 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::DoiNew => "doi_new",
            Stage::DoiOld => "doi_old",
            Stage::LandingPage => "doi_landingpage",
            Stage::Ncbi => "ncbi",
            Stage::Pubmed => "pubmed",
            Stage::PubmedCentral => "pubmed_central",
            Stage::Unpaywall => "unpaywall",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of completed stages, backed by the stored bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageSet(i32);

impl StageSet {
    pub const EMPTY: StageSet = StageSet(0);

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> i32 {
        self.0
    }

    pub fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn insert(&mut self, stage: Stage) {
        self.0 |= stage.bit();
    }

    pub fn with(mut self, stage: Stage) -> Self {
        self.insert(stage);
        self
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Stages not yet completed
    pub fn remaining(self) -> Vec<Stage> {
        Stage::ALL.into_iter().filter(|s| !self.contains(*s)).collect()
    }

    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl FromIterator<Stage> for StageSet {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        let mut set = StageSet::EMPTY;
        for stage in iter {
            set.insert(stage);
        }
        set
    }
}

impl From<Stage> for StageSet {
    fn from(stage: Stage) -> Self {
        StageSet(stage.bit())
    }
}
