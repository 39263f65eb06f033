use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// A thread-safe accumulator for one category of named statistics.
///
/// A counter holds a two-level mapping from an optional "specific" qualifier to stat names to
/// accumulated values. Cells spring into existence at 0.0 the first time they are referenced
/// and persist for the life of the counter; taking a [snapshot](Counter::snapshot) resets every
/// cell back to 0.0 without removing it.
///
/// Counters are created lazily through [`Connection::counter`](crate::Connection::counter) and
/// live for the rest of the process.
pub struct Counter {
    category: String,
    counts: Mutex<HashMap<String, HashMap<String, f64>>>,
}

impl Counter {
    pub(crate) fn new(category: impl Into<String>) -> Self {
        Self { category: category.into(), counts: Mutex::new(HashMap::new()) }
    }

    /// Returns the category this counter was registered under.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Adds each stat value into the accumulator cell for every given specific, plus the
    /// implicit unqualified one.
    ///
    /// Recording `("sub1", ...)` with stat `foo` bumps both `category-sub1-foo` and
    /// `category-foo`, giving a per-qualifier breakdown alongside the aggregate. Stats are
    /// applied one specific at a time, in the order given, with the unqualified cell last.
    pub fn record(&self, specifics: &[&str], stats: &[(&str, f64)]) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        for specific in specifics.iter().copied().chain(std::iter::once("")) {
            let cells = counts.entry(specific.to_string()).or_default();
            for (stat, value) in stats {
                *cells.entry((*stat).to_string()).or_insert(0.0) += value;
            }
        }
    }

    /// Overwrites the unqualified accumulator cell for each given stat.
    ///
    /// Unlike [`record`](Counter::record), this replaces the accumulated value rather than
    /// adding to it, which is the right shape for sampled quantities like queue depths. A
    /// subsequent `record` adds onto the overwritten value as usual.
    pub fn set_exact(&self, stats: &[(&str, f64)]) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let cells = counts.entry(String::new()).or_default();
        for (stat, value) in stats {
            cells.insert((*stat).to_string(), *value);
        }
    }

    /// Takes an atomic read-and-reset snapshot of every cell.
    ///
    /// Each cell is reported under its derived name
    /// (`category-specific-stat`, with every segment sanitized and an empty specific segment
    /// collapsed away) and then reset to 0.0 in the same critical section. Cells that have
    /// already been reset still report their 0.0 value on later snapshots.
    pub fn snapshot(&self) -> HashMap<String, f64> {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut totals = HashMap::new();
        for (specific, cells) in counts.iter_mut() {
            for (stat, value) in cells.iter_mut() {
                totals.insert(derive_name(&self.category, specific, stat), *value);
                *value = 0.0;
            }
        }
        totals
    }
}

/// Builds the wire-visible stat name from its three raw segments.
fn derive_name(category: &str, specific: &str, stat: &str) -> String {
    let name = format!("{}-{}-{}", sanitize(category), sanitize(specific), sanitize(stat));
    name.replace("--", "-")
}

/// Collapses every run of non-alphanumeric characters into a single `_`, trimming any leading
/// or trailing `_` this produces.
fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out.trim_matches('_').to_string()
}
