//! Static stage graph: forward gates and reverse cascades.
//!
//! The graph is fixed data, not computed. Forward gates say which stages
//! must be locked (and possibly completed) before a stage may be locked.
//! Cascade lists say which stages are invalidated when a stage is unlocked.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::{Stage, StageStatus};
use crate::errors::{GatingReason, GatingViolation};

/// A requirement on another stage that must hold before locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prerequisite {
    /// The stage that must be locked.
    pub stage: Stage,
    /// Whether its recorded execution must also have completed.
    pub must_be_completed: bool,
}

impl Prerequisite {
    /// Requires `stage` to be locked.
    #[must_use]
    pub const fn locked(stage: Stage) -> Self {
        Self {
            stage,
            must_be_completed: false,
        }
    }

    /// Requires `stage` to be locked and completed.
    #[must_use]
    pub const fn completed(stage: Stage) -> Self {
        Self {
            stage,
            must_be_completed: true,
        }
    }
}

type GateTable = &'static [(Stage, &'static [Prerequisite])];
type CascadeTable = &'static [(Stage, &'static [Stage])];

/// The dependency declarations of a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct StageGraph {
    gates: GateTable,
    cascades: CascadeTable,
    optional: &'static [Stage],
}

const PIPELINE_GATES: GateTable = &[
    (Stage::Discovery, &[]),
    (Stage::Selection, &[Prerequisite::completed(Stage::Discovery)]),
    (Stage::Parse, &[Prerequisite::locked(Stage::Selection)]),
    (Stage::Analysis, &[Prerequisite::completed(Stage::Parse)]),
    (Stage::Export, &[Prerequisite::completed(Stage::Parse)]),
];

const PIPELINE_CASCADES: CascadeTable = &[
    (Stage::Discovery, &[Stage::Selection]),
    (Stage::Selection, &[Stage::Parse]),
    (Stage::Parse, &[Stage::Analysis, Stage::Export]),
    (Stage::Analysis, &[]),
    (Stage::Export, &[]),
];

const PIPELINE_OPTIONAL: &[Stage] = &[Stage::Analysis];

static PIPELINE: StageGraph = StageGraph::new(PIPELINE_GATES, PIPELINE_CASCADES, PIPELINE_OPTIONAL);

impl StageGraph {
    /// Creates a graph from static tables.
    ///
    /// Stages missing from a table have no gates or cascade targets.
    #[must_use]
    pub const fn new(gates: GateTable, cascades: CascadeTable, optional: &'static [Stage]) -> Self {
        Self {
            gates,
            cascades,
            optional,
        }
    }

    /// The five-stage discovery → export pipeline.
    #[must_use]
    pub fn pipeline() -> &'static Self {
        &PIPELINE
    }

    /// Returns the stages that must be satisfied before `stage` may lock.
    #[must_use]
    pub fn prerequisites(&self, stage: Stage) -> &'static [Prerequisite] {
        self.gates
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, prereqs)| *prereqs)
            .unwrap_or_default()
    }

    /// Returns the stages invalidated when `stage` is unlocked.
    #[must_use]
    pub fn cascade_targets(&self, stage: Stage) -> &'static [Stage] {
        self.cascades
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, targets)| *targets)
            .unwrap_or_default()
    }

    /// Returns true if nothing downstream depends on `stage`.
    #[must_use]
    pub fn is_optional(&self, stage: Stage) -> bool {
        self.optional.contains(&stage)
    }

    /// Checks the forward gates of `stage` against current statuses.
    ///
    /// Stages absent from `statuses` count as unlocked. Reports the first
    /// unmet prerequisite in declaration order.
    pub fn can_lock(
        &self,
        stage: Stage,
        statuses: &BTreeMap<Stage, StageStatus>,
    ) -> Result<(), GatingViolation> {
        for prereq in self.prerequisites(stage) {
            let Some(status) = statuses.get(&prereq.stage).filter(|s| s.is_locked()) else {
                return Err(GatingViolation::new(
                    stage,
                    prereq.stage,
                    GatingReason::NotLocked,
                ));
            };
            if prereq.must_be_completed && !status.completed {
                return Err(GatingViolation::new(
                    stage,
                    prereq.stage,
                    GatingReason::NotCompleted,
                ));
            }
        }
        Ok(())
    }

    /// Returns every stage reachable from `stage` through cascade lists,
    /// excluding `stage` itself, in breadth-first order.
    #[must_use]
    pub fn downstream_of(&self, stage: Stage) -> Vec<Stage> {
        let mut visited = BTreeSet::from([stage]);
        let mut queue: VecDeque<Stage> = self.cascade_targets(stage).iter().copied().collect();
        let mut order = Vec::new();

        while let Some(next) = queue.pop_front() {
            if !visited.insert(next) {
                continue;
            }
            order.push(next);
            queue.extend(self.cascade_targets(next).iter().copied());
        }
        order
    }
}
