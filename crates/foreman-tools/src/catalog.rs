// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use foreman_interp::ToolSet;

/// Render the host-function catalog for the system prompt.
///
/// The interpreter surfaces to the model as a single `code_interpreter`
/// tool; this text is what tells the model which functions its scripts can
/// call and how.
pub fn render_catalog(set: &ToolSet) -> String {
    let mut tools: Vec<_> = set.tools().to_vec();
    tools.sort_by(|a, b| a.name().cmp(b.name()));

    let mut out = String::from(
        "You act by writing JavaScript for the code_interpreter tool. The \
         script runs in a sandbox where the following async functions are \
         defined; call them with `await`. console.log output and every \
         function call you make are reported back to you.\n\nFunctions:\n",
    );
    for tool in &tools {
        out.push_str(&format!("- {} — {}\n", tool.signature(), tool.description()));
    }
    out.push_str(
        "\nOnly these functions exist; calling anything else fails the \
         script. File paths must be absolute and stay inside the project \
         directory. Finish a task by calling submit_report(report).\n",
    );
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{standard_toolset, ToolOptions};

    #[test]
    fn catalog_lists_every_registered_function() {
        let set = standard_toolset(&ToolOptions::default());
        let text = render_catalog(&set);
        for name in set.names() {
            assert!(text.contains(&name), "catalog missing {name}");
        }
        assert!(text.contains("code_interpreter"));
    }

    #[test]
    fn catalog_is_sorted_by_name() {
        let set = standard_toolset(&ToolOptions::default());
        let text = render_catalog(&set);
        let ask = text.find("- ask_user").unwrap();
        let submit = text.find("- submit_report").unwrap();
        assert!(ask < submit);
    }
}
