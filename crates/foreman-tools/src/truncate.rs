// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

/// Describes the shape of a tool's text output for context-aware truncation.
///
/// When a result exceeds the configured cap, the category picks the
/// extraction strategy instead of a blind cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal / process output: keep the head and the tail so both the
    /// command preamble and the final result stay visible.
    HeadTail,
    /// Ordered match list: keep the leading matches.
    MatchList,
    /// File content: keep a head window.
    FileContent,
    /// Generic text: hard-truncate at the character boundary.
    #[default]
    Generic,
}

const HEAD_LINES: usize = 60;
const TAIL_LINES: usize = 40;

/// Cap `text` to roughly `char_cap` characters using the category strategy.
/// Returns the input unchanged when it already fits.
pub fn truncate_output(category: OutputCategory, text: &str, char_cap: usize) -> String {
    if text.len() <= char_cap || char_cap == 0 {
        return text.to_string();
    }
    match category {
        OutputCategory::HeadTail => {
            let lines: Vec<&str> = text.lines().collect();
            if lines.len() <= HEAD_LINES + TAIL_LINES {
                return hard_cut(text, char_cap);
            }
            let head = lines[..HEAD_LINES].join("\n");
            let tail = lines[lines.len() - TAIL_LINES..].join("\n");
            let omitted = lines.len() - HEAD_LINES - TAIL_LINES;
            let combined = format!("{head}\n...[{omitted} lines omitted]...\n{tail}");
            hard_cut(&combined, char_cap)
        }
        OutputCategory::MatchList | OutputCategory::FileContent => {
            let mut out = String::new();
            for line in text.lines() {
                if out.len() + line.len() + 1 > char_cap.saturating_sub(64) {
                    break;
                }
                out.push_str(line);
                out.push('\n');
            }
            let kept = out.lines().count();
            let total = text.lines().count();
            out.push_str(&format!("...[truncated: showing {kept} of {total} lines]"));
            out
        }
        OutputCategory::Generic => hard_cut(text, char_cap),
    }
}

fn hard_cut(text: &str, char_cap: usize) -> String {
    if text.len() <= char_cap {
        return text.to_string();
    }
    // Cut at a char boundary at or below the cap.
    let mut end = char_cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated {} bytes]", &text[..end], text.len() - end)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_output(OutputCategory::Generic, "short", 100), "short");
    }

    #[test]
    fn generic_hard_cut_reports_truncation() {
        let text = "x".repeat(200);
        let out = truncate_output(OutputCategory::Generic, &text, 50);
        assert!(out.starts_with(&"x".repeat(50)));
        assert!(out.contains("truncated 150 bytes"));
    }

    #[test]
    fn head_tail_keeps_both_ends() {
        let text: String = (0..200).map(|i| format!("line{i}\n")).collect();
        let out = truncate_output(OutputCategory::HeadTail, &text, 1000);
        assert!(out.contains("line0"));
        assert!(out.contains("line199"));
        assert!(out.contains("omitted"));
    }

    #[test]
    fn match_list_keeps_leading_lines() {
        let text: String = (0..500).map(|i| format!("match{i}\n")).collect();
        let out = truncate_output(OutputCategory::MatchList, &text, 200);
        assert!(out.contains("match0"));
        assert!(!out.contains("match499"));
        assert!(out.contains("truncated"));
    }

    #[test]
    fn hard_cut_respects_char_boundaries() {
        let text = "é".repeat(100); // 2 bytes each
        let out = truncate_output(OutputCategory::Generic, &text, 51);
        assert!(out.contains("truncated"));
    }
}
