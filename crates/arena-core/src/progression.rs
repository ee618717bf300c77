//! Progression state and its store
//!
//! [`ProgressionStore`] owns the single shared [`ProgressionState`]. Every
//! public mutation is one atomic read-modify-write under a write lock, so
//! concurrent callers never lose updates and readers never see a half-applied
//! transition. Observers (persistence) are notified inside the same critical
//! section, in transition order.

use crate::achievements::{Achievement, AchievementDef, AchievementUpdate};
use crate::migration::{migrate_with_report, MigrationTable};
use crate::persistence::StatePersister;
use crate::types::{ExperimentId, ExperimentRun, SavedExperiment};
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// XP per level
pub const XP_PER_LEVEL: u64 = 100;

/// Level for an XP total
#[inline]
#[must_use]
pub fn level_for(xp: u64) -> u64 {
    xp / XP_PER_LEVEL + 1
}

/// Everything the progression engine persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionState {
    /// Latest run, replaced wholesale
    pub results: ExperimentRun,
    /// Saved experiment library, in save order
    pub saved_experiments: Vec<SavedExperiment>,
    /// Achievements by id, in catalog order
    pub achievements: IndexMap<String, Achievement>,
    /// Experience points
    pub xp: u64,
    /// `xp / 100 + 1`
    pub level: u64,
    /// Completed runs
    pub experiment_count: u64,
}

impl Default for ProgressionState {
    fn default() -> Self {
        Self {
            results: ExperimentRun::default(),
            saved_experiments: Vec::new(),
            achievements: IndexMap::new(),
            xp: 0,
            level: 1,
            experiment_count: 0,
        }
    }
}

impl ProgressionState {
    /// Fresh state for a catalog
    #[must_use]
    pub fn with_catalog(catalog: &[AchievementDef]) -> Self {
        let mut state = Self::default();
        state.reconcile_catalog(catalog);
        state
    }

    /// Bring persisted achievements in line with the configured catalog
    ///
    /// Missing entries are added locked; existing entries keep their progress,
    /// target and unlock stamp but take the catalog's description and icon.
    /// Entries no longer in the catalog are kept.
    pub fn reconcile_catalog(&mut self, catalog: &[AchievementDef]) {
        for def in catalog {
            match self.achievements.get_mut(&def.id) {
                Some(existing) => {
                    existing.description.clone_from(&def.description);
                    existing.icon = def.icon;
                }
                None => {
                    self.achievements
                        .insert(def.id.clone(), Achievement::from_def(def));
                }
            }
        }
    }

    /// Prepare loaded (or absent) state for use
    ///
    /// Reconciles the catalog, re-derives the level, and runs the id
    /// migration exactly once.
    #[must_use]
    pub fn rehydrate(
        loaded: Option<Self>,
        catalog: &[AchievementDef],
        migrations: &MigrationTable,
    ) -> Self {
        let mut state = loaded.unwrap_or_default();
        state.reconcile_catalog(catalog);
        state.level = level_for(state.xp);

        let (state, report) = migrate_with_report(state, migrations);
        if report.keys_renamed > 0 {
            info!(
                renamed = report.keys_renamed,
                experiments = report.experiments_touched,
                "Migrated retired model ids"
            );
        }
        state
    }

    /// Unlocked achievements
    pub fn unlocked(&self) -> impl Iterator<Item = &Achievement> {
        self.achievements.values().filter(|a| a.unlocked)
    }
}

/// Receives the state after every transition
///
/// Called while the store's write lock is held: implementations must be quick
/// and must not call back into the store.
pub trait StateObserver: Send + Sync {
    /// State after a transition
    fn state_changed(&self, state: &ProgressionState);
}

/// XP change from `add_xp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpChange {
    pub xp: u64,
    pub level: u64,
    pub previous_level: u64,
}

impl XpChange {
    /// Whether the level went up
    #[inline]
    #[must_use]
    pub fn leveled_up(&self) -> bool {
        self.level > self.previous_level
    }
}

/// Process-wide progression state with an atomic transition API
#[derive(Default)]
pub struct ProgressionStore {
    state: RwLock<ProgressionState>,
    observers: Vec<Arc<dyn StateObserver>>,
}

impl std::fmt::Debug for ProgressionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressionStore")
            .field("state", &*self.state.read())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ProgressionStore {
    /// Store over an already prepared state
    #[must_use]
    pub fn new(state: ProgressionState) -> Self {
        Self {
            state: RwLock::new(state),
            observers: Vec::new(),
        }
    }

    /// Load, reconcile and migrate persisted state
    ///
    /// A load failure is logged and a fresh state is used instead.
    #[must_use]
    pub fn open(
        persister: &dyn StatePersister,
        catalog: &[AchievementDef],
        migrations: &MigrationTable,
    ) -> Self {
        let loaded = match persister.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Cannot load progression state, starting fresh");
                None
            }
        };
        let state = ProgressionState::rehydrate(loaded, catalog, migrations);
        info!(
            xp = state.xp,
            level = state.level,
            saved = state.saved_experiments.len(),
            "Progression state ready"
        );
        Self::new(state)
    }

    /// With transition observer
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> ProgressionState {
        self.state.read().clone()
    }

    /// Read the state without copying it
    pub fn read<R>(&self, f: impl FnOnce(&ProgressionState) -> R) -> R {
        f(&self.state.read())
    }

    /// Replace the current results
    pub fn record_results(&self, run: ExperimentRun) {
        self.transition(|state| state.results = run);
    }

    /// Append to the library
    ///
    /// No validation and no deduplication: the caller supplies a fresh id.
    pub fn save_experiment(&self, saved: SavedExperiment) {
        debug!(id = %saved.id, name = %saved.name, "Saving experiment");
        self.transition(|state| state.saved_experiments.push(saved));
    }

    /// Remove from the library; returns whether anything was removed
    pub fn delete_saved_experiment(&self, id: &ExperimentId) -> bool {
        self.transition(|state| {
            let before = state.saved_experiments.len();
            state.saved_experiments.retain(|s| &s.id != id);
            state.saved_experiments.len() != before
        })
    }

    /// Count one more completed run; returns the new count
    pub fn increment_experiment_count(&self) -> u64 {
        self.transition(|state| {
            state.experiment_count += 1;
            state.experiment_count
        })
    }

    /// Add experience and re-derive the level
    pub fn add_xp(&self, amount: u64) -> XpChange {
        self.transition(|state| {
            let previous_level = state.level;
            state.xp = state.xp.saturating_add(amount);
            state.level = level_for(state.xp);
            XpChange {
                xp: state.xp,
                level: state.level,
                previous_level,
            }
        })
    }

    /// Add progress to an achievement
    ///
    /// Unlocked achievements are returned unchanged. A missing id is reported
    /// and changes nothing.
    pub fn update_achievement(&self, id: &str, delta: u64) -> AchievementUpdate {
        if !self.read(|s| s.achievements.get(id).is_some_and(|a| !a.unlocked)) {
            return self.read(|s| match s.achievements.get(id) {
                Some(a) => AchievementUpdate::AlreadyUnlocked(a.clone()),
                None => AchievementUpdate::Missing,
            });
        }

        self.transition(|state| match state.achievements.get_mut(id) {
            None => AchievementUpdate::Missing,
            Some(a) if a.unlocked => AchievementUpdate::AlreadyUnlocked(a.clone()),
            Some(a) => {
                if a.advance(delta, Utc::now()) {
                    info!(achievement = %a.id, "Achievement unlocked");
                    AchievementUpdate::Unlocked(a.clone())
                } else {
                    AchievementUpdate::Progressed(a.clone())
                }
            }
        })
    }

    /// One saved experiment
    #[must_use]
    pub fn saved_experiment(&self, id: &ExperimentId) -> Option<SavedExperiment> {
        self.read(|s| s.saved_experiments.iter().find(|e| &e.id == id).cloned())
    }

    /// Library entries whose name or prompt contains `query`, case-insensitive
    #[must_use]
    pub fn search_saved(&self, query: &str) -> Vec<SavedExperiment> {
        self.read(|s| {
            s.saved_experiments
                .iter()
                .filter(|e| e.matches(query))
                .cloned()
                .collect()
        })
    }

    /// Apply `f` as one atomic transition and notify observers
    fn transition<R>(&self, f: impl FnOnce(&mut ProgressionState) -> R) -> R {
        let mut state = self.state.write();
        let out = f(&mut state);
        for observer in &self.observers {
            observer.state_changed(&state);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievements::{default_catalog, ids, IconTag};
    use crate::types::{ExperimentOptions, ExperimentResult, ModelId};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    fn store() -> ProgressionStore {
        ProgressionStore::new(ProgressionState::with_catalog(&default_catalog()))
    }

    fn saved(name: &str, prompt: &str) -> SavedExperiment {
        SavedExperiment::new(name, prompt, &ExperimentOptions::default(), ExperimentRun::new())
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u64>>);

    impl StateObserver for Recorder {
        fn state_changed(&self, state: &ProgressionState) {
            self.0.lock().push(state.xp);
        }
    }

    #[test]
    fn xp_and_level() {
        let store = store();
        store.add_xp(50);
        let change = store.add_xp(60);

        assert_eq!(change.xp, 110);
        assert_eq!(change.level, 2);
        assert!(change.leveled_up());
        assert_eq!(store.snapshot().level, 2);
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(level_for(0), 1);
        assert_eq!(level_for(99), 1);
        assert_eq!(level_for(100), 2);
        assert_eq!(level_for(250), 3);
    }

    #[test]
    fn unlock_fires_once() {
        let store = store();

        let first = store.update_achievement(ids::FIRST_EXPERIMENT, 1);
        let unlocked = first.newly_unlocked().expect("should unlock");
        let stamped = unlocked.unlocked_at;
        assert!(stamped.is_some());

        let second = store.update_achievement(ids::FIRST_EXPERIMENT, 1);
        match second {
            AchievementUpdate::AlreadyUnlocked(a) => {
                assert_eq!(a.progress, 1);
                assert_eq!(a.unlocked_at, stamped);
            }
            other => panic!("expected AlreadyUnlocked, got {other:?}"),
        }
    }

    #[test]
    fn cumulative_progress_unlocks_exactly_once() {
        let store = store();
        let mut unlocks = 0;
        for _ in 0..15 {
            if store
                .update_achievement(ids::EXPERIMENTER, 1)
                .newly_unlocked()
                .is_some()
            {
                unlocks += 1;
            }
        }
        assert_eq!(unlocks, 1);
        let state = store.snapshot();
        let a = &state.achievements[ids::EXPERIMENTER];
        assert!(a.unlocked);
        assert_eq!(a.progress, 10);
    }

    #[test]
    fn missing_achievement_is_reported() {
        let store = store();
        assert_eq!(
            store.update_achievement("no-such-thing", 1),
            AchievementUpdate::Missing
        );
    }

    #[test]
    fn record_results_replaces() {
        let store = store();
        let mut first = ExperimentRun::new();
        first.insert(ModelId::from("a"), ExperimentResult::failed("x"));
        store.record_results(first);

        let mut second = ExperimentRun::new();
        second.insert(ModelId::from("b"), ExperimentResult::failed("y"));
        store.record_results(second);

        let state = store.snapshot();
        assert_eq!(state.results.len(), 1);
        assert!(state.results.get("b").is_some());
    }

    #[test]
    fn library_append_delete_search() {
        let store = store();
        let a = saved("Haiku", "write a haiku");
        let b = saved("Essay", "write an essay on rust");
        let a_id = a.id.clone();
        store.save_experiment(a);
        store.save_experiment(b);

        assert_eq!(store.search_saved("RUST").len(), 1);
        assert_eq!(store.search_saved("write").len(), 2);
        assert_eq!(store.search_saved("").len(), 2);
        assert_eq!(store.saved_experiment(&a_id).unwrap().name, "Haiku");

        assert!(store.delete_saved_experiment(&a_id));
        assert!(!store.delete_saved_experiment(&a_id));
        assert!(store.saved_experiment(&a_id).is_none());
        assert_eq!(store.snapshot().saved_experiments.len(), 1);
    }

    #[test]
    fn experiment_count_increments() {
        let store = store();
        assert_eq!(store.increment_experiment_count(), 1);
        assert_eq!(store.increment_experiment_count(), 2);
    }

    #[test]
    fn observers_see_every_transition_in_order() {
        let recorder = Arc::new(Recorder::default());
        let store = store().with_observer(recorder.clone());

        store.add_xp(10);
        store.add_xp(20);
        store.increment_experiment_count();

        assert_eq!(*recorder.0.lock(), vec![10, 30, 30]);
    }

    #[test]
    fn missing_or_unlocked_updates_do_not_notify() {
        let recorder = Arc::new(Recorder::default());
        let store = store().with_observer(recorder.clone());

        store.update_achievement("nope", 1);
        store.update_achievement(ids::FIRST_EXPERIMENT, 1);
        store.update_achievement(ids::FIRST_EXPERIMENT, 1);

        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn concurrent_xp_is_not_lost() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.add_xp(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let state = store.snapshot();
        assert_eq!(state.xp, 2000);
        assert_eq!(state.level, 21);
    }

    #[test]
    fn concurrent_updates_unlock_once() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..5)
                        .filter(|_| {
                            store
                                .update_achievement(ids::EXPERIMENTER, 1)
                                .newly_unlocked()
                                .is_some()
                        })
                        .count()
                })
            })
            .collect();
        let unlocks: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(unlocks, 1);
    }

    #[test]
    fn rehydrate_reconciles_catalog_and_level() {
        let mut loaded = ProgressionState::default();
        loaded.xp = 340;
        loaded.level = 1;
        let mut kept = Achievement::from_def(&AchievementDef::new(
            ids::EXPERIMENTER,
            "old text",
            10,
            IconTag::Trophy,
        ));
        kept.progress = 4;
        loaded.achievements.insert(kept.id.clone(), kept);
        let retired = Achievement::from_def(&AchievementDef::new("legacy", "gone", 1, IconTag::Star));
        loaded.achievements.insert(retired.id.clone(), retired);

        let state =
            ProgressionState::rehydrate(Some(loaded), &default_catalog(), &MigrationTable::new());

        assert_eq!(state.level, 4);
        let exp = &state.achievements[ids::EXPERIMENTER];
        assert_eq!(exp.progress, 4);
        assert_eq!(exp.description, "Run 10 experiments");
        assert_eq!(exp.icon, IconTag::Flask);
        assert!(state.achievements.contains_key(ids::TOKEN_MASTER));
        assert!(state.achievements.contains_key("legacy"));
    }

    #[test]
    fn state_round_trips_through_json() {
        let store = store();
        store.add_xp(120);
        store.update_achievement(ids::FIRST_EXPERIMENT, 1);
        store.save_experiment(saved("n", "p"));
        let state = store.snapshot();

        let json = serde_json::to_string(&state).unwrap();
        let back: ProgressionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    proptest! {
        #[test]
        fn prop_progress_is_monotonic(deltas in proptest::collection::vec(0u64..5, 0..40)) {
            let store = store();
            let mut last_progress = 0;
            let mut was_unlocked = false;
            let mut unlocks = 0;

            for delta in deltas {
                if store.update_achievement(ids::EXPERIMENTER, delta).newly_unlocked().is_some() {
                    unlocks += 1;
                }
                let a = store.read(|s| s.achievements[ids::EXPERIMENTER].clone());
                prop_assert!(a.progress >= last_progress);
                prop_assert!(!was_unlocked || a.unlocked);
                prop_assert_eq!(a.unlocked, a.progress >= a.target);
                last_progress = a.progress;
                was_unlocked = a.unlocked;
            }
            prop_assert!(unlocks <= 1);
        }
    }
}
