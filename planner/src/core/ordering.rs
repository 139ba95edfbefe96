//! Three-colour depth-first ordering over a dependency relation.
//!
//! Shared by the in-memory graph and by validation of exported records, which
//! have no [`crate::core::graph::TaskGraph`] behind them.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Order `keys` so every key follows all of its dependencies.
///
/// `deps` returns the direct dependencies of a key. Keys are visited in input
/// order, so the output is deterministic for a deterministic `deps`.
///
/// On a cycle, returns the edge `(from, to)` whose target was still in progress.
pub fn dependency_order<K, F, I>(keys: &[K], deps: F) -> Result<Vec<K>, (K, K)>
where
    K: Copy + Eq + Hash,
    F: Fn(K) -> I,
    I: IntoIterator<Item = K>,
{
    let mut marks: HashMap<K, Mark> = HashMap::with_capacity(keys.len());
    let mut order = Vec::with_capacity(keys.len());
    for &key in keys {
        visit(key, &deps, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn visit<K, F, I>(
    key: K,
    deps: &F,
    marks: &mut HashMap<K, Mark>,
    order: &mut Vec<K>,
) -> Result<(), (K, K)>
where
    K: Copy + Eq + Hash,
    F: Fn(K) -> I,
    I: IntoIterator<Item = K>,
{
    match marks.get(&key) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => return Err((key, key)),
        None => {}
    }
    marks.insert(key, Mark::InProgress);
    for dep in deps(key) {
        if marks.get(&dep) == Some(&Mark::InProgress) {
            return Err((key, dep));
        }
        visit(dep, deps, marks, order)?;
    }
    marks.insert(key, Mark::Done);
    order.push(key);
    Ok(())
}
