// CapitalGit - Versioned content engine
// Copyright (C) 2025 CapitalGit Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.

//! Myers line diff
//!
//! Computes a shortest edit script between two sequences with the greedy
//! O(ND) algorithm: explore diagonals `k = x - y` for growing edit distance
//! `d`, keep the furthest-reaching `x` per diagonal, then backtrack through
//! the saved frontiers. On ties a deletion is preferred over an insertion,
//! so removed lines come before added lines within a change.
//!
//! Saved frontiers cost O(D^2) memory, so once the edit distance passes
//! [`MAX_TRACED_DISTANCE`] the search switches to the linear-space variant:
//! find a middle snake, split there and recurse on both halves.

use std::ops::Range;

/// Largest edit distance searched with saved frontiers
pub const MAX_TRACED_DISTANCE: usize = 1024;

/// One step of an edit script, as indices into the old and new sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    /// `old[old] == new[new]`
    Equal {
        /// Index in the old sequence
        old: usize,
        /// Index in the new sequence
        new: usize,
    },
    /// `old[old]` removed
    Delete {
        /// Index in the old sequence
        old: usize,
    },
    /// `new[new]` added
    Insert {
        /// Index in the new sequence
        new: usize,
    },
}

impl Edit {
    /// Whether this step changes anything
    pub fn is_change(&self) -> bool {
        !matches!(self, Edit::Equal { .. })
    }
}

/// Shortest edit script between two slices
#[derive(Debug, Clone, Copy)]
pub struct MyersDiff<'d, T> {
    a: &'d [T],
    b: &'d [T],
}

impl<'d, T: PartialEq> MyersDiff<'d, T> {
    /// Diff `a` (old) against `b` (new)
    pub fn new(a: &'d [T], b: &'d [T]) -> Self {
        Self { a, b }
    }

    /// Edit script in old/new order
    pub fn edits(&self) -> Vec<Edit> {
        let Some(trace) = self.shortest_edit() else {
            let mut bisect = Bisect::new(self.a, self.b);
            bisect.conquer(0..self.a.len(), 0..self.b.len());
            return deletions_first(bisect.edits);
        };

        let mut edits = Vec::with_capacity(self.a.len().max(self.b.len()));
        for (prev_x, prev_y, x, y) in self.backtrack(&trace).into_iter().rev() {
            if x == prev_x {
                edits.push(Edit::Insert { new: prev_y });
            } else if y == prev_y {
                edits.push(Edit::Delete { old: prev_x });
            } else {
                edits.push(Edit::Equal {
                    old: prev_x,
                    new: prev_y,
                });
            }
        }
        edits
    }

    // None once the distance exceeds MAX_TRACED_DISTANCE
    fn shortest_edit(&self) -> Option<Vec<Frontier>> {
        let (n, m) = (self.a.len() as isize, self.b.len() as isize);
        let offset = n + m + 1;
        let at = |k: isize| (offset + k) as usize;

        let mut v = vec![0usize; 2 * (n + m) as usize + 3];
        let mut trace = Vec::new();

        for d in 0..=(n + m).min(MAX_TRACED_DISTANCE as isize) {
            trace.push(Frontier {
                d,
                xs: v[at(-d - 1)..=at(d + 1)].to_vec(),
            });

            for k in (-d..=d).step_by(2) {
                let mut x = if k == -d || (k != d && v[at(k - 1)] < v[at(k + 1)]) {
                    v[at(k + 1)] as isize
                } else {
                    v[at(k - 1)] as isize + 1
                };
                let mut y = x - k;

                while x < n && y < m && self.a[x as usize] == self.b[y as usize] {
                    x += 1;
                    y += 1;
                }

                v[at(k)] = x as usize;

                if x >= n && y >= m {
                    return Some(trace);
                }
            }
        }

        None
    }

    // (prev_x, prev_y, x, y) moves from the end back to the origin
    fn backtrack(&self, trace: &[Frontier]) -> Vec<(usize, usize, usize, usize)> {
        let (mut x, mut y) = (self.a.len() as isize, self.b.len() as isize);
        let mut path = Vec::new();

        for v in trace.iter().rev() {
            let (d, k) = (v.d, x - y);

            let prev_k = if k == -d || (k != d && v.get(k - 1) < v.get(k + 1)) {
                k + 1
            } else {
                k - 1
            };
            let prev_x = v.get(prev_k) as isize;
            let prev_y = prev_x - prev_k;

            while x > prev_x && y > prev_y {
                path.push(((x - 1) as usize, (y - 1) as usize, x as usize, y as usize));
                x -= 1;
                y -= 1;
            }

            if d > 0 {
                path.push((prev_x as usize, prev_y as usize, x as usize, y as usize));
            }

            x = prev_x;
            y = prev_y;
        }

        path
    }
}

// Furthest-reaching x on diagonals -(d+1)..=d+1 at the start of round d
struct Frontier {
    d: isize,
    xs: Vec<usize>,
}

impl Frontier {
    fn get(&self, k: isize) -> usize {
        self.xs[(k + self.d + 1) as usize]
    }
}

// Linear-space search over index ranges of `a` and `b`
struct Bisect<'d, T> {
    a: &'d [T],
    b: &'d [T],
    forward: Vec<isize>,
    backward: Vec<isize>,
    edits: Vec<Edit>,
}

impl<'d, T: PartialEq> Bisect<'d, T> {
    fn new(a: &'d [T], b: &'d [T]) -> Self {
        let size = 2 * ((a.len() + b.len() + 1) / 2 + 1) + 2;
        Self {
            a,
            b,
            forward: vec![0; size],
            backward: vec![0; size],
            edits: Vec::with_capacity(a.len() + b.len()),
        }
    }

    fn conquer(&mut self, mut old: Range<usize>, mut new: Range<usize>) {
        let prefix = old
            .clone()
            .zip(new.clone())
            .take_while(|&(i, j)| self.a[i] == self.b[j])
            .count();
        self.edits
            .extend((0..prefix).map(|i| Edit::Equal { old: old.start + i, new: new.start + i }));
        old.start += prefix;
        new.start += prefix;

        let suffix = old
            .clone()
            .rev()
            .zip(new.clone().rev())
            .take_while(|&(i, j)| self.a[i] == self.b[j])
            .count();
        old.end -= suffix;
        new.end -= suffix;

        if old.is_empty() {
            self.edits.extend(new.clone().map(|new| Edit::Insert { new }));
        } else if new.is_empty() {
            self.edits.extend(old.clone().map(|old| Edit::Delete { old }));
        } else if let Some((x, y)) = self.middle_snake(old.clone(), new.clone()) {
            self.conquer(old.start..x, new.start..y);
            self.conquer(x..old.end, y..new.end);
        } else {
            self.edits.extend(old.clone().map(|old| Edit::Delete { old }));
            self.edits.extend(new.clone().map(|new| Edit::Insert { new }));
        }

        self.edits
            .extend((0..suffix).map(|i| Edit::Equal { old: old.end + i, new: new.end + i }));
    }

    // A point on a shortest path through the two ranges
    fn middle_snake(&mut self, old: Range<usize>, new: Range<usize>) -> Option<(usize, usize)> {
        let (n, m) = (old.len() as isize, new.len() as isize);
        let delta = n - m;
        let odd = delta & 1 == 1;
        let max_d = (n + m + 1) / 2 + 1;
        let at = |k: isize| (max_d + k) as usize;

        self.forward[at(1)] = 0;
        self.backward[at(1)] = 0;

        for d in 0..max_d {
            for k in (-d..=d).rev().step_by(2) {
                let v = &self.forward;
                let mut x = if k == -d || (k != d && v[at(k - 1)] < v[at(k + 1)]) {
                    v[at(k + 1)]
                } else {
                    v[at(k - 1)] + 1
                };
                let (x0, y0) = (x, x - k);
                let mut y = y0;
                while x < n && y < m && self.a[old.start + x as usize] == self.b[new.start + y as usize] {
                    x += 1;
                    y += 1;
                }
                self.forward[at(k)] = x;

                if odd && (k - delta).abs() < d && x + self.backward[at(delta - k)] >= n {
                    return Some((old.start + x0 as usize, new.start + y0 as usize));
                }
            }

            for k in (-d..=d).rev().step_by(2) {
                let v = &self.backward;
                let mut x = if k == -d || (k != d && v[at(k - 1)] < v[at(k + 1)]) {
                    v[at(k + 1)]
                } else {
                    v[at(k - 1)] + 1
                };
                let mut y = x - k;
                while x < n
                    && y < m
                    && self.a[old.start + (n - x - 1) as usize] == self.b[new.start + (m - y - 1) as usize]
                {
                    x += 1;
                    y += 1;
                }
                self.backward[at(k)] = x;

                if !odd && (k - delta).abs() <= d && x + self.forward[at(delta - k)] >= n {
                    return Some((old.start + (n - x) as usize, new.start + (m - y) as usize));
                }
            }
        }

        None
    }
}

// Within each run of changes, deletions before insertions
fn deletions_first(edits: Vec<Edit>) -> Vec<Edit> {
    let mut out = Vec::with_capacity(edits.len());
    let mut inserts = Vec::new();
    for edit in edits {
        match edit {
            Edit::Insert { .. } => inserts.push(edit),
            Edit::Delete { .. } => out.push(edit),
            Edit::Equal { .. } => {
                out.append(&mut inserts);
                out.push(edit);
            }
        }
    }
    out.append(&mut inserts);
    out
}

/// Split text into lines, each keeping its `\n` terminator.
///
/// The last line has no terminator when the text does not end with one.
/// Empty text has no lines.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Number of inserted and deleted lines in an edit script
pub fn count_changes(edits: &[Edit]) -> (usize, usize) {
    edits.iter().fold((0, 0), |(add, del), edit| match edit {
        Edit::Insert { .. } => (add + 1, del),
        Edit::Delete { .. } => (add, del + 1),
        Edit::Equal { .. } => (add, del),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render<T: std::fmt::Display>(a: &[T], b: &[T], edits: &[Edit]) -> String {
        edits
            .iter()
            .map(|edit| match *edit {
                Edit::Equal { old, .. } => format!(" {}", a[old]),
                Edit::Delete { old } => format!("-{}", a[old]),
                Edit::Insert { new } => format!("+{}", b[new]),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_diff_strings() {
        let a: Vec<char> = "abcabba".chars().collect();
        let b: Vec<char> = "cbabac".chars().collect();
        let edits = MyersDiff::new(&a, &b).edits();

        assert_eq!(render(&a, &b, &edits), "-a -b  c +b  a  b -b  a +c");
        assert_eq!(count_changes(&edits), (2, 3));
    }

    #[test]
    fn test_diff_lines() {
        let a = vec!["line1", "line2", "line3", "line4"];
        let b = vec!["line2", "line3_modified", "line4", "line5"];
        let edits = MyersDiff::new(&a, &b).edits();

        assert_eq!(
            render(&a, &b, &edits),
            "-line1  line2 -line3 +line3_modified  line4 +line5"
        );
    }

    #[test]
    fn test_empty_sides() {
        let empty: Vec<&str> = vec![];
        let some = vec!["x", "y"];

        assert!(MyersDiff::new(&empty, &empty).edits().is_empty());
        assert_eq!(
            MyersDiff::new(&empty, &some).edits(),
            vec![Edit::Insert { new: 0 }, Edit::Insert { new: 1 }]
        );
        assert_eq!(
            MyersDiff::new(&some, &empty).edits(),
            vec![Edit::Delete { old: 0 }, Edit::Delete { old: 1 }]
        );
    }

    #[test]
    fn test_identical_is_all_equal() {
        let a = vec!["same\n", "lines\n"];
        let edits = MyersDiff::new(&a, &a).edits();
        assert!(edits.iter().all(|e| !e.is_change()));
        assert_eq!(edits.len(), 2);
    }

    #[test]
    fn test_split_lines_keeps_terminators() {
        assert_eq!(split_lines("a\nb\n"), vec!["a\n", "b\n"]);
        assert_eq!(split_lines("a\nb"), vec!["a\n", "b"]);
        assert!(split_lines("").is_empty());
        assert_eq!(split_lines("\n"), vec!["\n"]);
    }

    fn rebuild(a: &[String], b: &[String], edits: &[Edit]) -> (Vec<String>, Vec<String>) {
        let (mut old, mut new) = (Vec::new(), Vec::new());
        for edit in edits {
            match *edit {
                Edit::Equal { old: i, new: j } => {
                    assert_eq!(a[i], b[j]);
                    old.push(a[i].clone());
                    new.push(b[j].clone());
                }
                Edit::Delete { old: i } => old.push(a[i].clone()),
                Edit::Insert { new: j } => new.push(b[j].clone()),
            }
        }
        (old, new)
    }

    fn assert_deletions_lead(edits: &[Edit]) {
        for pair in edits.windows(2) {
            assert!(
                !matches!(pair, [Edit::Insert { .. }, Edit::Delete { .. }]),
                "insertion before deletion in {:?}",
                pair
            );
        }
    }

    #[test]
    fn test_full_rewrite_of_large_file() {
        let a: Vec<String> = (0..3000).map(|i| format!("old {}\n", i)).collect();
        let b: Vec<String> = (0..3000).map(|i| format!("new {}\n", i)).collect();
        let edits = MyersDiff::new(&a, &b).edits();

        assert_eq!(count_changes(&edits), (3000, 3000));
        assert_eq!(rebuild(&a, &b, &edits), (a.clone(), b.clone()));
        assert_deletions_lead(&edits);
    }

    #[test]
    fn test_interleaved_rewrite_past_traced_distance() {
        let a: Vec<String> = (0..2000).map(|i| format!("line {}\n", i)).collect();
        let b: Vec<String> = a
            .iter()
            .enumerate()
            .map(|(i, l)| if i % 2 == 0 { format!("edited {}", l) } else { l.clone() })
            .collect();
        let edits = MyersDiff::new(&a, &b).edits();

        assert_eq!(count_changes(&edits), (1000, 1000));
        assert_eq!(rebuild(&a, &b, &edits), (a.clone(), b.clone()));
        assert_deletions_lead(&edits);
    }

    #[test]
    fn test_small_distance_keeps_greedy_script() {
        let a: Vec<String> = (0..5000).map(|i| format!("line {}\n", i)).collect();
        let mut b = a.clone();
        b[2500] = "changed\n".to_string();
        let edits = MyersDiff::new(&a, &b).edits();

        assert_eq!(count_changes(&edits), (1, 1));
        assert_eq!(edits[2500], Edit::Delete { old: 2500 });
        assert_eq!(edits[2501], Edit::Insert { new: 2500 });
    }
}
