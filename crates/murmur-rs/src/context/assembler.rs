//! System prompt assembly from buffers and files.
//!
//! Each active buffer and each readable registered file becomes one context
//! block. Buffer blocks come first, then file blocks, each group in the
//! order given. With no blocks the base prompt is returned untouched.

use super::ContextBuffer;
use crate::error::MurmurError;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Wrapper appended to the base prompt when there is any context.
/// `{{FILES}}` is replaced by the concatenated blocks.
pub const FILE_CONTEXT_SYSTEM_PROMPT: &str = "\
You have access to files from your environment, which provide context for your tasks.

- Each file has a path, line count, content
- A file is active if it is open in the editor
- This information is crucial for understanding the current editing context

<context_files>
{{FILES}}
</context_files>";

/// Template for a single context block.
pub const FILE_CONTEXT_BLOCK: &str = "\
================================================
File: {{FILE}}
Lines: {{LINES}}
Active: {{ACTIVE}}
================================================
{{CONTENT}}

";

/// Build the system prompt for the given context.
///
/// Inactive buffers are skipped. Unreadable files are logged and skipped;
/// one bad file never fails the whole assembly. Identical inputs (and file
/// contents) always produce identical output.
pub fn assemble(base_prompt: &str, buffers: &[ContextBuffer], files: &[PathBuf]) -> String {
    let mut blocks = String::new();

    for buffer in buffers.iter().filter(|b| b.is_active) {
        blocks.push_str(&render_block(
            &buffer.display_name,
            buffer.content.trim(),
            buffer.line_count,
            true,
        ));
    }

    for path in files {
        match read_context_file(path) {
            Ok(content) => {
                let lines = content.lines().count();
                blocks.push_str(&render_block(
                    &path.display().to_string(),
                    &content,
                    lines,
                    false,
                ));
            }
            Err(e) => warn!("Skipping context file: {e}"),
        }
    }

    if blocks.is_empty() {
        return base_prompt.to_string();
    }

    trace!(bytes = blocks.len(), "Assembled context blocks");
    format!(
        "{base_prompt}\n\n{}",
        FILE_CONTEXT_SYSTEM_PROMPT.replace("{{FILES}}", &blocks)
    )
}

/// Render one context block.
pub fn render_block(name: &str, content: &str, lines: usize, active: bool) -> String {
    FILE_CONTEXT_BLOCK
        .replace("{{FILE}}", name)
        .replace("{{LINES}}", &lines.to_string())
        .replace("{{ACTIVE}}", if active { "true" } else { "false" })
        .replace("{{CONTENT}}", content)
}

/// Read a context file, decoding invalid UTF-8 lossily.
fn read_context_file(path: &Path) -> Result<String, MurmurError> {
    let bytes = std::fs::read(path).map_err(|e| MurmurError::ContextFileUnreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
