//! The fixed document shell every rendered surface lives in.

/// The only external asset a surface may load: the utility-class engine.
pub const STYLE_ENGINE_URL: &str = "https://cdn.tailwindcss.com";

/// Content security policy for preview surfaces. Scripts may only come from
/// the style engine; no network fetches, frames, forms or plugins.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; \
script-src https://cdn.tailwindcss.com; \
style-src 'unsafe-inline'; \
img-src data: https:; \
font-src data:; \
connect-src 'none'; \
frame-src 'none'; \
form-action 'none'; \
object-src 'none'; \
base-uri 'none'";

const HEAD: &str = concat!(
    "<!DOCTYPE html>\n<html>\n<head>\n",
    "<meta charset=\"utf-8\">\n",
    "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n",
);

/// Wrap a body fragment in the document shell.
///
/// The fragment is inserted verbatim; malformed markup is left for the
/// renderer to cope with.
pub fn document(body: &str) -> String {
    let mut out = String::with_capacity(HEAD.len() + body.len() + 256);
    out.push_str(HEAD);
    out.push_str("<meta http-equiv=\"Content-Security-Policy\" content=\"");
    out.push_str(CONTENT_SECURITY_POLICY);
    out.push_str("\">\n");
    out.push_str("<script src=\"");
    out.push_str(STYLE_ENGINE_URL);
    out.push_str("\"></script>\n</head>\n<body>\n");
    out.push_str(body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n</html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_loads_only_the_style_engine() {
        let doc = document("<div class='p-4'>Hi</div>");
        assert_eq!(doc.matches("<script").count(), 1);
        assert!(doc.contains(STYLE_ENGINE_URL));
        assert!(doc.contains("<div class='p-4'>Hi</div>\n</body>"));
        assert!(doc.contains("connect-src 'none'"));
    }

    #[test]
    fn malformed_body_passes_through() {
        let doc = document("<div><span>unclosed");
        assert!(doc.contains("<div><span>unclosed\n</body>"));
    }
}
