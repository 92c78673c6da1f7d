//! Markdown to safe HTML for documentation posts.
//!
//! Prose never reaches the sandbox, so the output itself has to be inert:
//! raw HTML is escaped, dangerous URL schemes are dropped and every link
//! opens in a new browsing context.

use pulldown_cmark::{html, CowStr, Event, LinkType, Options, Parser, Tag};

const BLOCKED_SCHEMES: [&str; 4] = ["javascript:", "vbscript:", "data:", "file:"];

/// Render markdown to an HTML fragment with no script, style or event handlers.
pub fn markdown_to_safe_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let events = Parser::new_ext(markdown, options).map(sanitize_event);

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

fn sanitize_event(event: Event<'_>) -> Event<'_> {
    match event {
        // Raw HTML is shown as text, never interpreted.
        Event::Html(raw) => Event::Text(raw),
        Event::Start(Tag::Link(link_type, dest, title)) => {
            Event::Html(CowStr::from(open_link(link_type, &dest, &title)))
        }
        Event::End(Tag::Link(..)) => Event::Html(CowStr::Borrowed("</a>")),
        Event::Start(Tag::Image(link_type, dest, title)) => {
            Event::Start(Tag::Image(link_type, safe_url(dest), title))
        }
        other => other,
    }
}

fn open_link(link_type: LinkType, dest: &str, title: &str) -> String {
    let href = match link_type {
        LinkType::Email => format!("mailto:{dest}"),
        _ => safe_url(CowStr::Borrowed(dest)).into_string(),
    };
    let mut tag = format!(
        "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\"",
        escape_attr(&href)
    );
    if !title.is_empty() {
        tag.push_str(&format!(" title=\"{}\"", escape_attr(title)));
    }
    tag.push('>');
    tag
}

fn safe_url(dest: CowStr<'_>) -> CowStr<'_> {
    let normalized: String = dest
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    if BLOCKED_SCHEMES.iter().any(|scheme| normalized.starts_with(scheme)) {
        CowStr::Borrowed("#")
    } else {
        dest
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_basic_markdown() {
        let html = markdown_to_safe_html("# Hooks\n\nUse `useState` wisely.");
        assert!(html.contains("<h1>Hooks</h1>"));
        assert!(html.contains("<code>useState</code>"));
    }

    #[test]
    fn raw_html_is_escaped() {
        let html = markdown_to_safe_html("<script>alert(1)</script>\n\n<img src=x onerror=alert(1)>");
        assert!(!html.contains("<script"));
        assert!(!html.contains("<img src=x"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn links_open_in_new_context() {
        let html = markdown_to_safe_html("[docs](https://react.dev \"React\")");
        assert!(html.contains(
            "<a href=\"https://react.dev\" target=\"_blank\" rel=\"noopener noreferrer\" title=\"React\">docs</a>"
        ));
    }

    #[test]
    fn script_urls_are_neutralized() {
        let html = markdown_to_safe_html("[x](javascript:alert(1)) [y]( JaVaScRiPt:alert(2))");
        assert!(!html.to_ascii_lowercase().contains("javascript:"));
        assert!(html.contains("href=\"#\""));
    }

    #[test]
    fn code_fences_keep_language_class() {
        let html = markdown_to_safe_html("```javascript\nconst a = '<b>';\n```");
        assert!(html.contains("<pre><code class=\"language-javascript\">"));
        assert!(html.contains("&lt;b&gt;"));
    }
}
