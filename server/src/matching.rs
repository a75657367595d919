//! ABI proximity scoring.
//!
//! Two builds are compatible when their ABI key/value maps agree; a
//! near miss is ranked by how many keys disagree. This drives the
//! match and compare pages, which show a candidate's differing inputs
//! so users can see what broke the cache hit.

use std::collections::{BTreeMap, BTreeSet};

use crate::archive::{Info, Sha};

/// Number of keys over the union of both maps that are present in
/// only one map or carry different values.
pub fn mismatches(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> usize {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    keys.into_iter().filter(|key| a.get(*key) != b.get(*key)).count()
}

/// One disagreement between a target and a source ABI map.
#[derive(Debug, PartialEq, Eq)]
pub enum DiffRow<'a> {
    Changed {
        key: &'a str,
        target: &'a str,
        source: &'a str,
    },
    MissingInSource {
        key: &'a str,
        target: &'a str,
    },
    MissingInTarget {
        key: &'a str,
        source: &'a str,
    },
}

/// Pairs the key union of both maps, skipping keys that agree.
pub fn diff<'a>(
    target: &'a BTreeMap<String, String>,
    source: &'a BTreeMap<String, String>,
) -> Vec<DiffRow<'a>> {
    let keys: BTreeSet<&String> = target.keys().chain(source.keys()).collect();

    let mut rows = Vec::new();
    for key in keys {
        match (target.get(key), source.get(key)) {
            (Some(t), Some(s)) if t != s => rows.push(DiffRow::Changed {
                key,
                target: t,
                source: s,
            }),
            (Some(t), None) => rows.push(DiffRow::MissingInSource { key, target: t }),
            (None, Some(s)) => rows.push(DiffRow::MissingInTarget { key, source: s }),
            _ => {}
        }
    }
    rows
}

/// Candidates of `package` ordered by ascending disagreement with the
/// target ABI, each paired with its mismatch count.
pub fn closest<'a>(
    infos: impl Iterator<Item = &'a Info>,
    package: &str,
    target: &BTreeMap<String, String>,
    exclude: Option<&Sha>,
) -> Vec<(usize, &'a Info)> {
    let mut candidates: Vec<(usize, &Info)> = infos
        .filter(|info| info.package == package)
        .filter(|info| exclude.map_or(true, |sha| &info.sha != sha))
        .map(|info| (mismatches(&info.abi, target), info))
        .collect();
    candidates.sort_by_key(|(score, _)| *score);
    candidates
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn info(package: &str, sha_byte: u8, abi: &[(&str, &str)]) -> Info {
        let sha = Sha::new(&format!("{:02x}", sha_byte).repeat(32)).unwrap();
        Info {
            package: package.to_owned(),
            version: "1.0".to_owned(),
            architecture: "x64-linux".to_owned(),
            sha,
            ctrl: BTreeMap::new(),
            abi: map(abi),
            mtime: Utc::now(),
            size: 1,
        }
    }

    #[test]
    fn mismatches_counts_union_disagreements() {
        let a = map(&[("compiler", "abc"), ("flags", "O2"), ("only_a", "1")]);
        let b = map(&[("compiler", "abc"), ("flags", "O3"), ("only_b", "2")]);
        // flags differ, only_a missing in b, only_b missing in a
        assert_eq!(mismatches(&a, &b), 3);
        assert_eq!(mismatches(&a, &a), 0);
    }

    #[test]
    fn diff_pairs_the_key_union() {
        let target = map(&[("k1", "a"), ("k2", "b"), ("same", "x")]);
        let source = map(&[("k1", "c"), ("k3", "d"), ("same", "x")]);
        let rows = diff(&target, &source);
        assert_eq!(
            rows,
            vec![
                DiffRow::Changed {
                    key: "k1",
                    target: "a",
                    source: "c"
                },
                DiffRow::MissingInSource {
                    key: "k2",
                    target: "b"
                },
                DiffRow::MissingInTarget {
                    key: "k3",
                    source: "d"
                },
            ]
        );
    }

    #[test]
    fn closest_orders_by_disagreement() {
        let exact = info("fmt", 0xaa, &[("compiler", "abc"), ("flags", "O2")]);
        let near = info("fmt", 0xbb, &[("compiler", "abc"), ("flags", "O3")]);
        let far = info("fmt", 0xcc, &[("compiler", "xyz"), ("other", "1")]);
        let unrelated = info("zlib", 0xdd, &[("compiler", "abc"), ("flags", "O2")]);

        let target = map(&[("compiler", "abc"), ("flags", "O2")]);
        let infos = [exact, near, far, unrelated];
        let result = closest(infos.iter(), "fmt", &target, None);

        let shas: Vec<&str> = result.iter().map(|(_, i)| i.sha.as_str()).collect();
        assert_eq!(shas.len(), 3);
        assert!(shas[0].starts_with("aa"));
        assert!(shas[1].starts_with("bb"));
        assert!(shas[2].starts_with("cc"));
        assert_eq!(result[0].0, 0);
        assert_eq!(result[1].0, 1);
    }

    #[test]
    fn closest_can_exclude_the_target_itself() {
        let a = info("fmt", 0xaa, &[("compiler", "abc")]);
        let b = info("fmt", 0xbb, &[("compiler", "abc")]);
        let target = a.abi.clone();
        let sha = a.sha.clone();

        let infos = [a, b];
        let result = closest(infos.iter(), "fmt", &target, Some(&sha));
        assert_eq!(result.len(), 1);
        assert!(result[0].1.sha.as_str().starts_with("bb"));
    }
}
