//! # Pretty Printing
//!
//! Terminal rendering for `docqa ask`: the answer's markdown is drawn with
//! crossterm colors and attributes, followed by the numbered source previews.
//!
//! | Markdown | Terminal |
//! |----------|----------|
//! | `# Header` | bold cyan |
//! | `**bold**` | bold |
//! | `*italic*` | italic |
//! | `` `code` `` / code blocks | yellow |
//! | list items | `•` bullet |
//!
//! ```no_run
//! use docqa::pretty::print_pretty;
//!
//! print_pretty("# TIN\n\nThe TIN starts with **C**.").unwrap();
//! ```

use std::io::{Write, stdout};

use crossterm::{
    queue,
    style::{Attribute, Color, Print, SetAttribute, SetForegroundColor},
};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

use crate::error::QaError;
use crate::render::RenderedAnswer;

fn io_err(e: std::io::Error) -> QaError {
    QaError::Render(format!("terminal output failed: {e}"))
}

/// Print markdown text to stdout with terminal formatting.
pub fn print_pretty(text: &str) -> Result<(), QaError> {
    let mut out = stdout();
    write_markdown(text, &mut out)?;
    out.flush().map_err(io_err)
}

/// Print an answer and its sources to stdout.
pub fn print_answer(answer: &RenderedAnswer) -> Result<(), QaError> {
    let mut out = stdout();
    write_answer(answer, &mut out)?;
    out.flush().map_err(io_err)
}

/// Write the answer, then one dimmed block per source preview.
pub fn write_answer<W: Write>(answer: &RenderedAnswer, out: &mut W) -> Result<(), QaError> {
    queue!(
        out,
        SetForegroundColor(Color::Green),
        Print("✅ Answer ready\n\n"),
        SetForegroundColor(Color::Reset)
    )
    .map_err(io_err)?;

    write_markdown(&answer.answer, out)?;

    for source in &answer.sources {
        queue!(
            out,
            Print("\n"),
            SetAttribute(Attribute::Bold),
            Print(format!("📄 Source {} (page {})\n", source.number, source.page)),
            SetAttribute(Attribute::Reset),
            SetForegroundColor(Color::DarkGrey),
            Print(&source.preview),
            Print("\n"),
            SetForegroundColor(Color::Reset)
        )
        .map_err(io_err)?;
    }
    Ok(())
}

/// Walk the markdown events and emit styled text.
pub fn write_markdown<W: Write>(text: &str, out: &mut W) -> Result<(), QaError> {
    let mut list_depth = 0usize;

    for event in Parser::new(text) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                if level != HeadingLevel::H1 {
                    queue!(out, Print("\n")).map_err(io_err)?;
                }
                queue!(out, SetForegroundColor(Color::Cyan), SetAttribute(Attribute::Bold))
                    .map_err(io_err)?;
            }
            Event::End(TagEnd::Heading(_)) => {
                queue!(
                    out,
                    SetAttribute(Attribute::Reset),
                    SetForegroundColor(Color::Reset),
                    Print("\n")
                )
                .map_err(io_err)?;
            }
            Event::Start(Tag::Strong) => {
                queue!(out, SetAttribute(Attribute::Bold)).map_err(io_err)?;
            }
            Event::Start(Tag::Emphasis) => {
                queue!(out, SetAttribute(Attribute::Italic)).map_err(io_err)?;
            }
            Event::End(TagEnd::Strong) | Event::End(TagEnd::Emphasis) => {
                queue!(out, SetAttribute(Attribute::Reset)).map_err(io_err)?;
            }
            Event::Start(Tag::List(_)) => list_depth += 1,
            Event::End(TagEnd::List(_)) => {
                list_depth = list_depth.saturating_sub(1);
                if list_depth == 0 {
                    queue!(out, Print("\n")).map_err(io_err)?;
                }
            }
            Event::Start(Tag::Item) => {
                let indent = "  ".repeat(list_depth.saturating_sub(1));
                queue!(out, Print(format!("{indent}• "))).map_err(io_err)?;
            }
            Event::End(TagEnd::Item) => {
                queue!(out, Print("\n")).map_err(io_err)?;
            }
            Event::Start(Tag::CodeBlock(_)) => {
                queue!(out, SetForegroundColor(Color::Yellow)).map_err(io_err)?;
            }
            Event::End(TagEnd::CodeBlock) => {
                queue!(out, SetForegroundColor(Color::Reset), Print("\n")).map_err(io_err)?;
            }
            Event::End(TagEnd::Paragraph) => {
                queue!(out, Print("\n")).map_err(io_err)?;
                if list_depth == 0 {
                    queue!(out, Print("\n")).map_err(io_err)?;
                }
            }
            Event::Code(code) => {
                queue!(
                    out,
                    SetForegroundColor(Color::Yellow),
                    Print(&*code),
                    SetForegroundColor(Color::Reset)
                )
                .map_err(io_err)?;
            }
            Event::Text(t) | Event::Html(t) | Event::InlineHtml(t) => {
                queue!(out, Print(&*t)).map_err(io_err)?;
            }
            Event::SoftBreak | Event::HardBreak => {
                queue!(out, Print("\n")).map_err(io_err)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SourcePreview;

    fn strip_ansi(bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        let mut plain = String::new();
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                // CSI: ESC [ ... final byte in @..~
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) && c != '[' {
                        break;
                    }
                }
            } else {
                plain.push(c);
            }
        }
        plain
    }

    #[test]
    fn test_markdown_text_survives_styling() {
        let mut buf = Vec::new();
        write_markdown("# TIN\n\nStarts with **C** and `IG`.\n\n- one\n- two", &mut buf).unwrap();
        let plain = strip_ansi(&buf);

        assert!(plain.contains("TIN\n"));
        assert!(plain.contains("Starts with C and IG."));
        assert!(plain.contains("• one\n"));
        assert!(plain.contains("• two\n"));
        assert!(!plain.contains("**"));
    }

    #[test]
    fn test_answer_lists_sources_in_order() {
        let answer = RenderedAnswer {
            answer: "Format X".into(),
            sources: vec![
                SourcePreview { number: 1, page: 3, preview: "first".into(), truncated: false },
                SourcePreview { number: 2, page: 7, preview: "second...".into(), truncated: true },
            ],
        };

        let mut buf = Vec::new();
        write_answer(&answer, &mut buf).unwrap();
        let plain = strip_ansi(&buf);

        let first = plain.find("Source 1 (page 3)").unwrap();
        let second = plain.find("Source 2 (page 7)").unwrap();
        assert!(plain.find("Format X").unwrap() < first);
        assert!(first < second);
        assert!(plain.contains("second..."));
    }
}
