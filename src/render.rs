//! # Rendering
//!
//! Turns an [`AnswerResult`] into what the user sees: the answer (markdown,
//! converted to HTML for the page) and one numbered preview per source segment.
//!
//! A preview is the first [`PREVIEW_CHARS`] characters of the segment, with
//! [`TRUNCATION_MARKER`] appended only when the segment is longer than that.
//! Characters are counted as Unicode scalar values, never bytes, so multi-byte
//! text is never cut mid-character.

use minijinja::{Environment, context};
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html};
use serde::Serialize;

use crate::config::DocQaConfig;
use crate::error::QaError;
use crate::pipeline::AnswerResult;

pub const PREVIEW_CHARS: usize = 800;
pub const TRUNCATION_MARKER: &str = "...";

const PAGE_TEMPLATE: &str = include_str!("../templates/index.html");

/// First [`PREVIEW_CHARS`] characters of `text`, plus the marker iff it was cut.
pub fn preview(text: &str) -> (String, bool) {
    let mut head: String = text.chars().take(PREVIEW_CHARS).collect();
    let truncated = text.chars().nth(PREVIEW_CHARS).is_some();
    if truncated {
        head.push_str(TRUNCATION_MARKER);
    }
    (head, truncated)
}

/// One source disclosure, numbered from 1 in retrieval order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcePreview {
    pub number: usize,
    pub page: usize,
    pub preview: String,
    pub truncated: bool,
}

/// Display form of one answered query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedAnswer {
    pub answer: String,
    pub sources: Vec<SourcePreview>,
}

impl RenderedAnswer {
    pub fn from_result(result: &AnswerResult) -> Self {
        let sources = result
            .source_documents
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let (preview, truncated) = preview(&segment.content);
                SourcePreview {
                    number: i + 1,
                    page: segment.page,
                    preview,
                    truncated,
                }
            })
            .collect();

        Self {
            answer: result.answer.clone(),
            sources,
        }
    }
}

const SAFE_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Relative targets and the [`SAFE_SCHEMES`] pass; anything else (`javascript:`,
/// `data:`, ...) does not.
fn is_safe_url(url: &str) -> bool {
    // browsers drop whitespace and control characters inside a scheme
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();
    match cleaned.find(|c| matches!(c, ':' | '/' | '?' | '#')) {
        Some(i) if cleaned[i..].starts_with(':') => {
            let scheme = cleaned[..i].to_ascii_lowercase();
            SAFE_SCHEMES.contains(&scheme.as_str())
        }
        _ => true,
    }
}

/// Render markdown to HTML. Raw HTML in the input is shown as text, not injected,
/// and link or image targets with an unsafe scheme are replaced by `#`.
pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) if !is_safe_url(&dest_url) => Event::Start(Tag::Link {
            link_type,
            dest_url: CowStr::Borrowed("#"),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) if !is_safe_url(&dest_url) => Event::Start(Tag::Image {
            link_type,
            dest_url: CowStr::Borrowed("#"),
            title,
            id,
        }),
        other => other,
    });

    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

/// What the page shows for one request.
#[derive(Debug, Default)]
pub struct PageView<'a> {
    pub query: &'a str,
    pub answer: Option<&'a RenderedAnswer>,
    pub error: Option<String>,
}

/// Compiled page template plus the page chrome from the config.
pub struct PageRenderer {
    env: Environment<'static>,
    title: String,
    icon: String,
    intro_html: String,
}

impl PageRenderer {
    pub fn new(config: &DocQaConfig) -> Result<Self, QaError> {
        let mut env = Environment::new();
        env.add_template("index.html", PAGE_TEMPLATE)
            .map_err(|e| QaError::Render(e.to_string()))?;

        Ok(Self {
            env,
            title: config.page_title.clone(),
            icon: config.page_icon.clone(),
            intro_html: markdown_to_html(&config.intro),
        })
    }

    pub fn render(&self, view: &PageView<'_>) -> Result<String, QaError> {
        let template = self
            .env
            .get_template("index.html")
            .map_err(|e| QaError::Render(e.to_string()))?;

        template
            .render(context! {
                title => &self.title,
                icon => &self.icon,
                intro_html => &self.intro_html,
                query => view.query,
                error => &view.error,
                answer => view.answer,
                answer_html => view.answer.map(|a| markdown_to_html(&a.answer)),
            })
            .map_err(|e| QaError::Render(e.to_string()))
    }
}
