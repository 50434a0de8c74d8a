use crate::types::{extract_metric, Series};

// ═══════════════════════════════════════════════════════════════════
// Pointwise reduction
// ═══════════════════════════════════════════════════════════════════

/// Reduce sibling series pointwise. Absent samples are excluded from the
/// reduction; an index where every input is absent stays absent. Inputs of
/// differing lengths are reduced over the longest, with missing tails
/// treated as absent; the window metadata comes from the first input.
/// Returns None when `series` is empty.
pub fn reduce<S: std::borrow::Borrow<Series>>(
    name: impl Into<String>,
    series: &[S],
    f: impl Fn(&[f64]) -> f64,
) -> Option<Series> {
    let first = series.first()?.borrow();
    let len = series.iter().map(|s| s.borrow().len()).max().unwrap_or(0);
    let mut r = Series::blank(name, first.start_time, first.stop_time, first.step_time, len);

    let mut bucket = Vec::with_capacity(series.len());
    for i in 0..len {
        bucket.clear();
        for s in series {
            if let Some(v) = s.borrow().at(i) {
                bucket.push(v);
            }
        }
        if !bucket.is_empty() {
            r.set(i, f(&bucket));
        }
    }
    Some(r)
}

// ═══════════════════════════════════════════════════════════════════
// Grouping by name nodes
// ═══════════════════════════════════════════════════════════════════

/// The dot-separated node at `idx` of a series' metric name.
pub fn node_at(name: &str, idx: usize) -> Option<String> {
    extract_metric(name).split('.').nth(idx).map(str::to_string)
}

/// The metric name with the given node positions deleted, e.g.
/// `servers.web1.cpu` minus position 1 is `servers.cpu`.
pub fn drop_nodes(name: &str, positions: &[i64]) -> String {
    extract_metric(name)
        .split('.')
        .enumerate()
        .filter(|(i, _)| !positions.contains(&(*i as i64)))
        .map(|(_, node)| node)
        .collect::<Vec<_>>()
        .join(".")
}

/// Partition series by a derived key, preserving first-seen key order.
/// Series whose key cannot be derived are dropped.
pub fn group_by_key<'a>(
    series: &'a [Series],
    key: impl Fn(&Series) -> Option<String>,
) -> Vec<(String, Vec<&'a Series>)> {
    let mut groups: Vec<(String, Vec<&'a Series>)> = Vec::new();
    for s in series {
        let Some(k) = key(s) else { continue };
        match groups.iter_mut().find(|(existing, _)| *existing == k) {
            Some((_, members)) => members.push(s),
            None => groups.push((k, vec![s])),
        }
    }
    groups
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════
