use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use anyhow::{Result, bail};

/// Order `nodes` so every dependency comes before its dependents.
///
/// `edges` are `(owner, dependency)` pairs. Ties keep the input order.
pub fn topo_sort<K>(nodes: &[K], edges: &[(K, K)]) -> Result<Vec<K>>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    let position: HashMap<&K, usize> = nodes.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let mut indeg: Vec<usize> = vec![0; nodes.len()];
    let mut outgoing: HashMap<usize, Vec<usize>> = HashMap::new();

    for (owner, dep) in edges {
        let (Some(&o), Some(&d)) = (position.get(owner), position.get(dep)) else {
            bail!("dependency references missing node: {owner:?} -> {dep:?}");
        };
        indeg[o] += 1;
        outgoing.entry(d).or_default().push(o);
    }

    let mut q: VecDeque<usize> = indeg
        .iter()
        .enumerate()
        .filter_map(|(i, d)| if *d == 0 { Some(i) } else { None })
        .collect();
    let mut order: Vec<K> = Vec::with_capacity(nodes.len());

    while let Some(n) = q.pop_front() {
        order.push(nodes[n].clone());
        if let Some(nexts) = outgoing.get(&n) {
            for &m in nexts {
                indeg[m] -= 1;
                if indeg[m] == 0 {
                    q.push_back(m);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        bail!("cycle detected in scene references (cannot order instantiation)");
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_come_first() {
        let nodes = vec!["scene", "shape", "bsdf", "texture"];
        let edges = vec![
            ("scene", "shape"),
            ("shape", "bsdf"),
            ("bsdf", "texture"),
        ];
        let order = topo_sort(&nodes, &edges).unwrap();
        assert_eq!(order, vec!["texture", "bsdf", "shape", "scene"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let nodes = vec![1, 2];
        assert!(topo_sort(&nodes, &[(1, 2), (2, 1)]).is_err());
    }
}
