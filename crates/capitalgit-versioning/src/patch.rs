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

//! Git-style unified patches
//!
//! ```text
//! diff --git a/sandwich.txt b/sandwich.txt
//! index c76e978..d41fe58 100644
//! --- a/sandwich.txt
//! +++ b/sandwich.txt
//! @@ -3,5 +3,5 @@ Mayonnaise
//!  Lettuce
//! ...
//! ```

use crate::line_diff::{count_changes, split_lines, Edit, MyersDiff};
use crate::{FileMode, Oid};
use std::fmt::Write;

/// Lines of context around each change
pub const DEFAULT_CONTEXT_LINES: usize = 3;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file\n";
const NULL_ABBREV: &str = "0000000";
const MAX_HEADING_LEN: usize = 80;

/// One side of a file comparison
#[derive(Debug, Clone, Copy)]
pub struct PatchSide<'a> {
    /// Path of the file on this side
    pub path: &'a str,
    /// Blob id
    pub oid: Oid,
    /// File mode
    pub mode: FileMode,
    /// File content
    pub content: &'a [u8],
}

/// Rendered patch for one file, with its line counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedPatch {
    /// Full patch text, headers included
    pub text: String,
    /// Added lines
    pub additions: usize,
    /// Removed lines
    pub deletions: usize,
}

/// Kind of line inside a hunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOrigin {
    /// Unchanged
    Context,
    /// Only in the old file
    Deletion,
    /// Only in the new file
    Addition,
}

impl LineOrigin {
    fn prefix(self) -> char {
        match self {
            LineOrigin::Context => ' ',
            LineOrigin::Deletion => '-',
            LineOrigin::Addition => '+',
        }
    }
}

/// A line of a hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkLine {
    /// Context, deletion or addition
    pub origin: LineOrigin,
    /// Line text including its terminator, if any
    pub text: String,
    /// Last line of a file that has no trailing newline
    pub missing_newline: bool,
}

/// A contiguous block of changes with surrounding context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// First old line (1-based)
    pub old_start: usize,
    /// Old lines covered
    pub old_count: usize,
    /// First new line (1-based)
    pub new_start: usize,
    /// New lines covered
    pub new_count: usize,
    /// Nearest preceding "function" line of the old file
    pub heading: Option<String>,
    /// Hunk body
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// `@@ -a,b +c,d @@ heading`
    pub fn header(&self) -> String {
        let mut header = format!(
            "@@ -{} +{} @@",
            range(self.old_start, self.old_count),
            range(self.new_start, self.new_count)
        );
        if let Some(heading) = &self.heading {
            header.push(' ');
            header.push_str(heading);
        }
        header
    }
}

fn range(start: usize, count: usize) -> String {
    match count {
        0 => format!("{},0", start.saturating_sub(1)),
        1 => start.to_string(),
        _ => format!("{},{}", start, count),
    }
}

/// Group an edit script into hunks with `context` lines around changes.
///
/// Changes separated by at most `2 * context` unchanged lines share a hunk.
pub fn build_hunks(old: &[&str], new: &[&str], edits: &[Edit], context: usize) -> Vec<Hunk> {
    let changes: Vec<usize> = edits
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_change())
        .map(|(i, _)| i)
        .collect();

    // (first, last) change positions of each hunk
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &pos in &changes {
        match groups.last_mut() {
            Some((_, last)) if pos - *last - 1 <= 2 * context => *last = pos,
            _ => groups.push((pos, pos)),
        }
    }

    // old/new lines consumed before each edit position
    let mut old_before = Vec::with_capacity(edits.len() + 1);
    let mut new_before = Vec::with_capacity(edits.len() + 1);
    let (mut o, mut n) = (0, 0);
    for edit in edits {
        old_before.push(o);
        new_before.push(n);
        match edit {
            Edit::Equal { .. } => {
                o += 1;
                n += 1;
            }
            Edit::Delete { .. } => o += 1,
            Edit::Insert { .. } => n += 1,
        }
    }
    old_before.push(o);
    new_before.push(n);

    groups
        .into_iter()
        .map(|(first, last)| {
            let start = first.saturating_sub(context);
            let end = (last + context + 1).min(edits.len());

            let lines = edits[start..end]
                .iter()
                .map(|edit| match *edit {
                    Edit::Equal { old: i, .. } => hunk_line(LineOrigin::Context, old, i),
                    Edit::Delete { old: i } => hunk_line(LineOrigin::Deletion, old, i),
                    Edit::Insert { new: i } => hunk_line(LineOrigin::Addition, new, i),
                })
                .collect();

            let old_start = old_before[start] + 1;
            Hunk {
                old_start,
                old_count: old_before[end] - old_before[start],
                new_start: new_before[start] + 1,
                new_count: new_before[end] - new_before[start],
                heading: heading(&old[..old_before[start]]),
                lines,
            }
        })
        .collect()
}

fn hunk_line(origin: LineOrigin, lines: &[&str], index: usize) -> HunkLine {
    let text = lines[index];
    HunkLine {
        origin,
        text: text.to_string(),
        missing_newline: index + 1 == lines.len() && !text.ends_with('\n'),
    }
}

fn heading(preceding: &[&str]) -> Option<String> {
    preceding
        .iter()
        .rev()
        .find(|line| {
            line.chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        })
        .map(|line| {
            let line = line.trim_end();
            let mut cut = line.len().min(MAX_HEADING_LEN);
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line[..cut].trim_end().to_string()
        })
}

/// Render the unified patch between two versions of a file.
///
/// `None` on one side means the file is added or deleted. Content is treated
/// as text; invalid UTF-8 is replaced.
pub fn unified_patch(old: Option<PatchSide<'_>>, new: Option<PatchSide<'_>>, context: usize) -> UnifiedPatch {
    let old_text = old.map(|s| String::from_utf8_lossy(s.content).into_owned()).unwrap_or_default();
    let new_text = new.map(|s| String::from_utf8_lossy(s.content).into_owned()).unwrap_or_default();
    let old_lines = split_lines(&old_text);
    let new_lines = split_lines(&new_text);

    let edits = MyersDiff::new(&old_lines, &new_lines).edits();
    let (additions, deletions) = count_changes(&edits);
    let hunks = build_hunks(&old_lines, &new_lines, &edits, context);

    let old_path = old.or(new).map(|s| s.path).unwrap_or_default();
    let new_path = new.or(old).map(|s| s.path).unwrap_or_default();

    let mut text = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(text, "diff --git a/{} b/{}", old_path, new_path);

    let abbrev = |side: Option<PatchSide<'_>>| {
        side.map(|s| s.oid.short())
            .unwrap_or_else(|| NULL_ABBREV.to_string())
    };
    let index_line = format!("index {}..{}", abbrev(old), abbrev(new));

    match (old, new) {
        (None, Some(n)) => {
            let _ = writeln!(text, "new file mode {}", n.mode);
            let _ = writeln!(text, "{}", index_line);
        }
        (Some(o), None) => {
            let _ = writeln!(text, "deleted file mode {}", o.mode);
            let _ = writeln!(text, "{}", index_line);
        }
        (Some(o), Some(n)) if o.mode != n.mode => {
            let _ = writeln!(text, "old mode {}", o.mode);
            let _ = writeln!(text, "new mode {}", n.mode);
            if o.oid != n.oid {
                let _ = writeln!(text, "{}", index_line);
            }
        }
        (Some(o), Some(_)) => {
            let _ = writeln!(text, "{} {}", index_line, o.mode);
        }
        (None, None) => {}
    }

    if !hunks.is_empty() {
        match old {
            Some(o) => {
                let _ = writeln!(text, "--- a/{}", o.path);
            }
            None => text.push_str("--- /dev/null\n"),
        }
        match new {
            Some(n) => {
                let _ = writeln!(text, "+++ b/{}", n.path);
            }
            None => text.push_str("+++ /dev/null\n"),
        }

        for hunk in &hunks {
            let _ = writeln!(text, "{}", hunk.header());
            for line in &hunk.lines {
                text.push(line.origin.prefix());
                text.push_str(&line.text);
                if line.missing_newline {
                    text.push('\n');
                    text.push_str(NO_NEWLINE_MARKER);
                }
            }
        }
    }

    UnifiedPatch {
        text,
        additions,
        deletions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD: &str = "Top piece of bread\nMayonnaise\nLettuce\nTomato\nProvolone\nCreole Mustard\nBottom piece of bread";
    const NEW: &str = "Top piece of bread\nMayonnaise\nLettuce\nTomato\nProvolone\nMustard\nBottom piece of bread";

    fn side<'a>(path: &'a str, content: &'a str) -> PatchSide<'a> {
        PatchSide {
            path,
            oid: Oid::hash(content.as_bytes()),
            mode: FileMode::Regular,
            content: content.as_bytes(),
        }
    }

    #[test]
    fn test_modified_file_patch() {
        let old = side("sandwich.txt", OLD);
        let new = side("sandwich.txt", NEW);
        let patch = unified_patch(Some(old), Some(new), DEFAULT_CONTEXT_LINES);

        let expected = format!(
            "diff --git a/sandwich.txt b/sandwich.txt\n\
             index {}..{} 100644\n\
             --- a/sandwich.txt\n\
             +++ b/sandwich.txt\n\
             @@ -3,5 +3,5 @@ Mayonnaise\n \
             Lettuce\n \
             Tomato\n \
             Provolone\n\
             -Creole Mustard\n\
             +Mustard\n \
             Bottom piece of bread\n\
             \\ No newline at end of file\n",
            old.oid.short(),
            new.oid.short()
        );
        assert_eq!(patch.text, expected);
        assert_eq!((patch.additions, patch.deletions), (1, 1));
    }

    #[test]
    fn test_added_file_patch() {
        let new = side("notes.txt", "one\ntwo\n");
        let patch = unified_patch(None, Some(new), DEFAULT_CONTEXT_LINES);

        let expected = format!(
            "diff --git a/notes.txt b/notes.txt\n\
             new file mode 100644\n\
             index 0000000..{}\n\
             --- /dev/null\n\
             +++ b/notes.txt\n\
             @@ -0,0 +1,2 @@\n\
             +one\n\
             +two\n",
            new.oid.short()
        );
        assert_eq!(patch.text, expected);
        assert_eq!((patch.additions, patch.deletions), (2, 0));
    }

    #[test]
    fn test_deleted_file_patch() {
        let old = side("gone.txt", "bye\n");
        let patch = unified_patch(Some(old), None, DEFAULT_CONTEXT_LINES);

        assert!(patch.text.contains("deleted file mode 100644\n"));
        assert!(patch.text.contains("--- a/gone.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-bye\n"));
        assert_eq!((patch.additions, patch.deletions), (0, 1));
    }

    #[test]
    fn test_mode_only_change_has_no_hunks() {
        let old = side("run.sh", "echo hi\n");
        let new = PatchSide {
            mode: FileMode::Executable,
            ..old
        };
        let patch = unified_patch(Some(old), Some(new), DEFAULT_CONTEXT_LINES);

        assert_eq!(
            patch.text,
            "diff --git a/run.sh b/run.sh\nold mode 100644\nnew mode 100755\n"
        );
        assert_eq!((patch.additions, patch.deletions), (0, 0));
    }

    #[test]
    fn test_distant_changes_split_into_hunks() {
        let old: Vec<String> = (1..=20).map(|i| format!("line {}\n", i)).collect();
        let mut new = old.clone();
        new[1] = "changed 2\n".to_string();
        new[17] = "changed 18\n".to_string();

        let old_lines: Vec<&str> = old.iter().map(String::as_str).collect();
        let new_lines: Vec<&str> = new.iter().map(String::as_str).collect();
        let edits = MyersDiff::new(&old_lines, &new_lines).edits();
        let hunks = build_hunks(&old_lines, &new_lines, &edits, 3);

        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].header(), "@@ -1,5 +1,5 @@");
        assert_eq!(hunks[1].header(), "@@ -15,6 +15,6 @@ line 14");
    }

    #[test]
    fn test_nearby_changes_share_a_hunk() {
        let old: Vec<String> = (1..=12).map(|i| format!("l{}\n", i)).collect();
        let mut new = old.clone();
        new[2] = "x\n".to_string();
        new[9] = "y\n".to_string();

        let old_lines: Vec<&str> = old.iter().map(String::as_str).collect();
        let new_lines: Vec<&str> = new.iter().map(String::as_str).collect();
        let edits = MyersDiff::new(&old_lines, &new_lines).edits();

        assert_eq!(build_hunks(&old_lines, &new_lines, &edits, 3).len(), 1);
    }
}
