//! Plugin selectability: `(all \ disableSet) ∪ enableSet`, computed as clear-all →
//! add-all → per-name disable → per-name enable.

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct PluginSelection {
    pub clear_all: bool,
    pub add_all: bool,
    pub disable: HashSet<String>,
    pub enable: HashSet<String>,
}

impl PluginSelection {
    /// Default selection: every registered plugin is active.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn disabling(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { disable: names.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    /// Resolve which of `all_names` are selected, applying the operations in this
    /// fixed order: clear-all, then add-all, then per-name disable, then per-name
    /// enable.
    pub fn resolve(&self, all_names: &[String]) -> HashSet<String> {
        let mut selected: HashSet<String> =
            if self.clear_all { HashSet::new() } else { all_names.iter().cloned().collect() };

        if self.add_all {
            selected.extend(all_names.iter().cloned());
        }
        for name in &self.disable {
            selected.remove(name);
        }
        for name in &self.enable {
            selected.insert(name.clone());
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_selects_everything() {
        let all = names(&["a", "b", "c"]);
        let sel = PluginSelection::all();
        let resolved = sel.resolve(&all);
        assert_eq!(resolved.len(), 3);
    }

    #[test]
    fn disable_removes_named_plugin() {
        let all = names(&["a", "b", "c"]);
        let sel = PluginSelection::disabling(vec!["b"]);
        let resolved = sel.resolve(&all);
        assert!(!resolved.contains("b"));
        assert!(resolved.contains("a"));
    }

    #[test]
    fn clear_all_then_enable_is_opt_in() {
        let all = names(&["a", "b", "c"]);
        let sel = PluginSelection {
            clear_all: true,
            enable: ["b".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let resolved = sel.resolve(&all);
        assert_eq!(resolved, ["b".to_string()].into_iter().collect());
    }

    #[test]
    fn enable_wins_over_disable_for_same_name() {
        let all = names(&["a"]);
        let sel = PluginSelection {
            disable: ["a".to_string()].into_iter().collect(),
            enable: ["a".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let resolved = sel.resolve(&all);
        assert!(resolved.contains("a"));
    }
}
