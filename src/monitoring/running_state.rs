use std::collections::{HashMap, HashSet};

use crate::sensing::UniqueKey;

/// Outcome of forgetting one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// The key was never counted.
    Ignored,
    /// Other instances of the same app are still running.
    StillRunning,
    /// The last instance of `name` is gone; these rows must be closed.
    LastInstance { name: String, sessions: Vec<UniqueKey> },
}

/// The set of instances one subscriber considers open.
///
/// `procs` maps a counted instance to its lowercase name and `counts` holds
/// the number of counted instances per name. `sessions` names the instances
/// whose history rows are still open, keyed by app name, and `ignored` holds
/// instances that were seen but deliberately never counted.
#[derive(Debug, Default)]
pub struct RunningState {
    procs: HashMap<UniqueKey, String>,
    counts: HashMap<String, usize>,
    sessions: HashMap<String, Vec<UniqueKey>>,
    ignored: HashSet<UniqueKey>,
}

impl RunningState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn knows(&self, key: &UniqueKey) -> bool {
        self.procs.contains_key(key) || self.ignored.contains(key)
    }

    pub fn count(&self, name: &str) -> usize {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn tracked_len(&self) -> usize {
        self.procs.len()
    }

    pub fn open_sessions(&self, name: &str) -> &[UniqueKey] {
        self.sessions.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ignore(&mut self, key: UniqueKey) {
        self.ignored.insert(key);
    }

    /// Counts another instance of an app that already has an open row.
    pub fn add_instance(&mut self, key: UniqueKey, name: &str) {
        if self.procs.insert(key, name.to_string()).is_none() {
            *self.counts.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    /// Counts `key` and remembers that it owns an open row.
    pub fn open_session(&mut self, key: UniqueKey, name: &str) {
        self.add_instance(key, name);
        let sessions = self.sessions.entry(name.to_string()).or_default();
        if !sessions.contains(&key) {
            sessions.push(key);
        }
    }

    /// Keys known to this state that are missing from `present`.
    pub fn departed(&self, present: &HashSet<UniqueKey>) -> Vec<UniqueKey> {
        self.procs
            .keys()
            .chain(self.ignored.iter())
            .filter(|key| !present.contains(key))
            .copied()
            .collect()
    }

    pub fn remove(&mut self, key: &UniqueKey) -> Departure {
        if self.ignored.remove(key) {
            return Departure::Ignored;
        }
        let Some(name) = self.procs.remove(key) else {
            return Departure::Ignored;
        };

        let remaining = match self.counts.get_mut(&name) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining > 0 {
            return Departure::StillRunning;
        }

        self.counts.remove(&name);
        let sessions = self.sessions.remove(&name).unwrap_or_default();
        Departure::LastInstance { name, sessions }
    }

    pub fn clear(&mut self) {
        self.procs.clear();
        self.counts.clear();
        self.sessions.clear();
        self.ignored.clear();
    }

    /// Every count equals the number of instances mapped to that name, and no
    /// name is kept with a zero count.
    #[cfg(test)]
    pub fn counts_are_consistent(&self) -> bool {
        let mut expected: HashMap<&str, usize> = HashMap::new();
        for name in self.procs.values() {
            *expected.entry(name.as_str()).or_insert(0) += 1;
        }
        expected.len() == self.counts.len()
            && expected
                .iter()
                .all(|(name, count)| self.counts.get(*name) == Some(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pid: u32, start: u64) -> UniqueKey {
        UniqueKey::new(pid, start)
    }

    #[test]
    fn row_closes_only_when_last_instance_leaves() {
        let mut state = RunningState::new();
        state.open_session(key(1, 10), "chrome.exe");
        state.add_instance(key(2, 11), "chrome.exe");
        assert_eq!(state.count("chrome.exe"), 2);

        assert_eq!(state.remove(&key(1, 10)), Departure::StillRunning);
        assert_eq!(state.count("chrome.exe"), 1);
        assert!(state.counts_are_consistent());

        assert_eq!(
            state.remove(&key(2, 11)),
            Departure::LastInstance {
                name: "chrome.exe".into(),
                sessions: vec![key(1, 10)],
            }
        );
        assert_eq!(state.count("chrome.exe"), 0);
        assert!(state.counts_are_consistent());
    }

    #[test]
    fn ignored_keys_never_touch_counts() {
        let mut state = RunningState::new();
        state.open_session(key(1, 10), "code");
        state.ignore(key(3, 30));

        assert!(state.knows(&key(3, 30)));
        assert_eq!(state.remove(&key(3, 30)), Departure::Ignored);
        assert_eq!(state.count("code"), 1);
        assert!(state.counts_are_consistent());
    }

    #[test]
    fn departed_lists_counted_and_ignored_keys() {
        let mut state = RunningState::new();
        state.open_session(key(1, 10), "a");
        state.add_instance(key(2, 20), "a");
        state.ignore(key(3, 30));

        let present: HashSet<_> = [key(2, 20)].into_iter().collect();
        let mut gone = state.departed(&present);
        gone.sort();
        assert_eq!(gone, vec![key(1, 10), key(3, 30)]);
    }

    #[test]
    fn re_adding_the_same_key_does_not_double_count() {
        let mut state = RunningState::new();
        state.open_session(key(1, 10), "a");
        state.open_session(key(1, 10), "a");
        assert_eq!(state.count("a"), 1);
        assert_eq!(state.open_sessions("a"), &[key(1, 10)]);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut state = RunningState::new();
        state.open_session(key(1, 10), "a");
        state.ignore(key(2, 20));
        state.clear();
        assert!(!state.knows(&key(1, 10)));
        assert!(!state.knows(&key(2, 20)));
        assert_eq!(state.tracked_len(), 0);
    }
}
