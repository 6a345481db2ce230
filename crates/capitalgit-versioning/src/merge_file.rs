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

//! Three-way line merge (diff3)
//!
//! The base is diffed against each side. Base lines matched on both sides
//! split the three files into stable chunks (identical everywhere) and
//! unstable chunks in between. An unstable chunk resolves to whichever side
//! changed it; when both sides changed it differently it becomes a conflict
//! rendered between markers.

use crate::line_diff::{split_lines, Edit, MyersDiff};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// How conflict hunks are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStyle {
    /// `<<<<<<<`, `=======`, `>>>>>>>`
    #[default]
    Merge,
    /// Adds the base lines after `|||||||`
    Diff3,
}

impl FromStr for ConflictStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merge" => Ok(ConflictStyle::Merge),
            "diff3" => Ok(ConflictStyle::Diff3),
            other => Err(format!("unknown conflict style '{}'", other)),
        }
    }
}

/// Labels and style for conflict markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFileOptions {
    /// Marker rendering
    pub style: ConflictStyle,
    /// Label after `<<<<<<<`
    pub ours_label: String,
    /// Label after `>>>>>>>`
    pub theirs_label: String,
    /// Label after `|||||||`
    pub base_label: String,
}

impl Default for MergeFileOptions {
    fn default() -> Self {
        Self {
            style: ConflictStyle::Merge,
            ours_label: "ours".to_string(),
            theirs_label: "theirs".to_string(),
            base_label: "base".to_string(),
        }
    }
}

impl MergeFileOptions {
    /// Default labels with the given style
    pub fn with_style(style: ConflictStyle) -> Self {
        Self {
            style,
            ..Self::default()
        }
    }
}

/// Outcome of merging one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeFileResult {
    /// Every chunk resolved
    Clean(String),
    /// Some chunks conflict; `content` carries inline markers
    Conflicted {
        /// Merged text with conflict markers
        content: String,
        /// Number of conflict hunks
        conflicts: usize,
    },
}

impl MergeFileResult {
    /// Merged text (with markers when conflicted)
    pub fn content(&self) -> &str {
        match self {
            MergeFileResult::Clean(content) => content,
            MergeFileResult::Conflicted { content, .. } => content,
        }
    }

    /// No conflict hunks
    pub fn is_clean(&self) -> bool {
        matches!(self, MergeFileResult::Clean(_))
    }

    /// Consume into the merged text
    pub fn into_content(self) -> String {
        match self {
            MergeFileResult::Clean(content) => content,
            MergeFileResult::Conflicted { content, .. } => content,
        }
    }
}

enum Chunk<'t> {
    Clean(&'t [&'t str]),
    Conflict {
        base: &'t [&'t str],
        ours: &'t [&'t str],
        theirs: &'t [&'t str],
    },
}

/// Merge `ours` and `theirs`, both derived from `base`.
///
/// ```
/// use capitalgit_versioning::merge_file::{merge_file, MergeFileOptions};
///
/// let base = "a\nb\nc\n";
/// let ours = "A\nb\nc\n";
/// let theirs = "a\nb\nC\n";
/// let merged = merge_file(base, ours, theirs, &MergeFileOptions::default());
/// assert_eq!(merged.content(), "A\nb\nC\n");
/// ```
pub fn merge_file(base: &str, ours: &str, theirs: &str, options: &MergeFileOptions) -> MergeFileResult {
    let o = split_lines(base);
    let a = split_lines(ours);
    let b = split_lines(theirs);

    let chunks = Diff3 {
        o: &o,
        a: &a,
        b: &b,
        match_a: matches(&o, &a),
        match_b: matches(&o, &b),
        line_o: 0,
        line_a: 0,
        line_b: 0,
    }
    .chunks();

    let mut content = String::with_capacity(ours.len().max(theirs.len()));
    let mut conflicts = 0;

    for chunk in chunks {
        match chunk {
            Chunk::Clean(lines) => lines.iter().for_each(|l| content.push_str(l)),
            Chunk::Conflict { base, ours, theirs } => {
                conflicts += 1;
                marker(&mut content, '<', &options.ours_label);
                push_block(&mut content, ours);
                if options.style == ConflictStyle::Diff3 {
                    marker(&mut content, '|', &options.base_label);
                    push_block(&mut content, base);
                }
                content.push_str("=======\n");
                push_block(&mut content, theirs);
                marker(&mut content, '>', &options.theirs_label);
            }
        }
    }

    if conflicts == 0 {
        MergeFileResult::Clean(content)
    } else {
        MergeFileResult::Conflicted { content, conflicts }
    }
}

fn marker(out: &mut String, c: char, label: &str) {
    for _ in 0..7 {
        out.push(c);
    }
    out.push(' ');
    out.push_str(label);
    out.push('\n');
}

fn push_block(out: &mut String, lines: &[&str]) {
    for line in lines {
        out.push_str(line);
    }
    if lines.last().is_some_and(|l| !l.ends_with('\n')) {
        out.push('\n');
    }
}

// 1-based base line -> 1-based side line, for lines the diff keeps
fn matches(base: &[&str], side: &[&str]) -> HashMap<usize, usize> {
    MyersDiff::new(base, side)
        .edits()
        .into_iter()
        .filter_map(|edit| match edit {
            Edit::Equal { old, new } => Some((old + 1, new + 1)),
            _ => None,
        })
        .collect()
}

struct Diff3<'t> {
    o: &'t [&'t str],
    a: &'t [&'t str],
    b: &'t [&'t str],
    match_a: HashMap<usize, usize>,
    match_b: HashMap<usize, usize>,
    line_o: usize,
    line_a: usize,
    line_b: usize,
}

impl<'t> Diff3<'t> {
    fn chunks(mut self) -> Vec<Chunk<'t>> {
        let mut chunks = Vec::new();
        loop {
            match self.next_mismatch() {
                Some(1) => match self.next_match() {
                    (o, Some(a), Some(b)) => chunks.push(self.emit(o, a, b)),
                    _ => {
                        chunks.push(self.emit_final());
                        return chunks;
                    }
                },
                Some(i) => {
                    let (o, a, b) = (self.line_o + i, self.line_a + i, self.line_b + i);
                    chunks.push(self.emit(o, a, b));
                }
                None => {
                    chunks.push(self.emit_final());
                    return chunks;
                }
            }
        }
    }

    fn in_bounds(&self, i: usize) -> bool {
        self.line_o + i <= self.o.len() || self.line_a + i <= self.a.len() || self.line_b + i <= self.b.len()
    }

    fn is_match(matches: &HashMap<usize, usize>, line_o: usize, offset: usize, i: usize) -> bool {
        matches.get(&(line_o + i)) == Some(&(offset + i))
    }

    fn next_mismatch(&self) -> Option<usize> {
        let mut i = 1;
        while self.in_bounds(i)
            && Self::is_match(&self.match_a, self.line_o, self.line_a, i)
            && Self::is_match(&self.match_b, self.line_o, self.line_b, i)
        {
            i += 1;
        }
        self.in_bounds(i).then_some(i)
    }

    fn next_match(&self) -> (usize, Option<usize>, Option<usize>) {
        let mut o = self.line_o + 1;
        while o <= self.o.len() && !(self.match_a.contains_key(&o) && self.match_b.contains_key(&o)) {
            o += 1;
        }
        (o, self.match_a.get(&o).copied(), self.match_b.get(&o).copied())
    }

    fn emit(&mut self, o: usize, a: usize, b: usize) -> Chunk<'t> {
        let chunk = classify(
            &self.o[self.line_o..o - 1],
            &self.a[self.line_a..a - 1],
            &self.b[self.line_b..b - 1],
        );
        self.line_o = o - 1;
        self.line_a = a - 1;
        self.line_b = b - 1;
        chunk
    }

    fn emit_final(&self) -> Chunk<'t> {
        classify(&self.o[self.line_o..], &self.a[self.line_a..], &self.b[self.line_b..])
    }
}

fn classify<'t>(base: &'t [&'t str], ours: &'t [&'t str], theirs: &'t [&'t str]) -> Chunk<'t> {
    if ours == base || ours == theirs {
        Chunk::Clean(theirs)
    } else if theirs == base {
        Chunk::Clean(ours)
    } else {
        Chunk::Conflict { base, ours, theirs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "Top piece of bread\nMayonnaise\nLettuce\nTomato\nProvolone\nCreole Mustard\nBottom piece of bread\n";

    fn merge(base: &str, ours: &str, theirs: &str) -> MergeFileResult {
        merge_file(base, ours, theirs, &MergeFileOptions::default())
    }

    #[test]
    fn test_disjoint_edits_merge_cleanly() {
        let ours = BASE.replace("Mayonnaise\n", "Mayonnaise\nBacon\n");
        let theirs = BASE.replace("Creole Mustard", "Mustard");
        let merged = merge(BASE, &ours, &theirs);

        assert!(merged.is_clean());
        assert_eq!(
            merged.content(),
            "Top piece of bread\nMayonnaise\nBacon\nLettuce\nTomato\nProvolone\nMustard\nBottom piece of bread\n"
        );
    }

    #[test]
    fn test_same_line_edits_conflict() {
        let ours = BASE.replace("Creole Mustard", "Dijon Mustard");
        let theirs = BASE.replace("Creole Mustard", "Yellow Mustard");
        let merged = merge(BASE, &ours, &theirs);

        assert_eq!(
            merged,
            MergeFileResult::Conflicted {
                content: "Top piece of bread\nMayonnaise\nLettuce\nTomato\nProvolone\n\
                          <<<<<<< ours\nDijon Mustard\n=======\nYellow Mustard\n>>>>>>> theirs\n\
                          Bottom piece of bread\n"
                    .to_string(),
                conflicts: 1,
            }
        );
    }

    #[test]
    fn test_diff3_style_shows_base() {
        let merged = merge_file(
            "x\n",
            "ours\n",
            "theirs\n",
            &MergeFileOptions::with_style(ConflictStyle::Diff3),
        );
        assert_eq!(
            merged.content(),
            "<<<<<<< ours\nours\n||||||| base\nx\n=======\ntheirs\n>>>>>>> theirs\n"
        );
    }

    #[test]
    fn test_identical_changes_are_clean() {
        let changed = BASE.replace("Tomato", "Pickles");
        let merged = merge(BASE, &changed, &changed);
        assert_eq!(merged, MergeFileResult::Clean(changed));
    }

    #[test]
    fn test_one_sided_change() {
        let theirs = format!("{}Extra\n", BASE);
        assert_eq!(merge(BASE, BASE, &theirs).into_content(), theirs);
        assert_eq!(merge(BASE, &theirs, BASE).into_content(), theirs);
    }

    #[test]
    fn test_add_add_against_empty_base() {
        let merged = merge("", "shared\nmine\n", "shared\ntheirs\n");
        assert_eq!(
            merged.content(),
            "<<<<<<< ours\nshared\nmine\n=======\nshared\ntheirs\n>>>>>>> theirs\n"
        );
    }

    #[test]
    fn test_missing_final_newline_inside_conflict() {
        let merged = merge("a", "b", "c");
        assert_eq!(merged.content(), "<<<<<<< ours\nb\n=======\nc\n>>>>>>> theirs\n");
    }

    #[test]
    fn test_conflict_style_parsing() {
        assert_eq!("diff3".parse::<ConflictStyle>().unwrap(), ConflictStyle::Diff3);
        assert_eq!("MERGE".parse::<ConflictStyle>().unwrap(), ConflictStyle::Merge);
        assert!("zdiff".parse::<ConflictStyle>().is_err());
    }
}
