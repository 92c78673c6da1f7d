//! JSX and module-syntax lowering for component snippets.
//!
//! This is a scanner, not a full parser: it understands enough of the token
//! structure (strings, templates, comments, regular expressions, brackets)
//! to find JSX and module statements reliably and to report unbalanced or
//! unterminated constructs with their position. Everything else is copied
//! through untouched, so the interpreter does the real parsing.

use crate::model::CompileDiagnostic;

/// Runtime function the lowered elements call.
pub const ELEMENT_FACTORY: &str = "__jsx";
/// Runtime value standing for `<>...</>`.
pub const FRAGMENT: &str = "__Fragment";

/// Import sources the runtime provides.
const ALLOWED_IMPORTS: [&str; 3] = ["react", "react-dom", "react/jsx-runtime"];

/// Keywords after which an expression (and so a regex or JSX) may start.
const EXPRESSION_KEYWORDS: [&str; 14] = [
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "yield", "await", "instanceof",
];

type Fallible<T> = Result<T, CompileDiagnostic>;

/// Lower JSX and module syntax in `source` to plain script.
///
/// Fatal scanning errors stop at the first problem; unsupported imports
/// are collected and reported together.
pub fn lower(source: &str) -> Result<String, Vec<CompileDiagnostic>> {
    let mut scanner = Scanner::new(source);
    match scanner.script(Context::TopLevel) {
        Ok(output) if scanner.diagnostics.is_empty() => Ok(output),
        Ok(_) => Err(scanner.diagnostics),
        Err(fatal) => {
            let mut diagnostics = scanner.diagnostics;
            diagnostics.push(fatal);
            diagnostics.sort_by_key(|d| (d.line, d.column));
            Err(diagnostics)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    TopLevel,
    /// Inside `{ ... }` of a JSX container or `${ ... }` of a template; the
    /// opening brace sits at the given position.
    Braced(usize),
}

/// Class of the previous significant token, for `/` and `<` disambiguation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Operator,
    Keyword,
    Value,
}

impl Prev {
    fn expression_may_start(self) -> bool {
        !matches!(self, Prev::Value)
    }
}

struct Scanner {
    chars: Vec<char>,
    line_starts: Vec<usize>,
    pos: usize,
    diagnostics: Vec<CompileDiagnostic>,
}

impl Scanner {
    fn new(source: &str) -> Self {
        let chars: Vec<char> = source.chars().collect();
        let mut line_starts = vec![0];
        line_starts.extend(
            chars
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            chars,
            line_starts,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn diagnostic(&self, at: usize, message: impl Into<String>) -> CompileDiagnostic {
        let line_idx = match self.line_starts.binary_search(&at) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let column = at - self.line_starts[line_idx] + 1;
        CompileDiagnostic::new((line_idx + 1) as u32, column as u32, message)
    }

    fn position(&self, at: usize) -> String {
        let d = self.diagnostic(at, "");
        format!("{}:{}", d.line, d.column)
    }

    /// Scan script until end of input (top level) or the closing brace of
    /// a braced context, which is consumed but not emitted.
    fn script(&mut self, context: Context) -> Fallible<String> {
        let mut out = String::new();
        let mut brackets: Vec<(char, usize)> = Vec::new();
        let mut prev = Prev::Start;
        let mut line_has_code = false;

        loop {
            let Some(c) = self.peek() else {
                if let Some(&(open, at)) = brackets.last() {
                    return Err(self.diagnostic(at, format!("unclosed '{open}'")));
                }
                if let Context::Braced(at) = context {
                    return Err(self.diagnostic(at, "unclosed '{'"));
                }
                return Ok(out);
            };

            match c {
                '\n' => {
                    self.pos += 1;
                    out.push(c);
                    line_has_code = false;
                }
                c if c.is_whitespace() => {
                    self.pos += 1;
                    out.push(c);
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        out.push(c);
                        self.pos += 1;
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    out.push_str(&self.block_comment()?);
                }
                '/' if prev.expression_may_start() => {
                    out.push_str(&self.regex()?);
                    prev = Prev::Value;
                    line_has_code = true;
                }
                '"' | '\'' => {
                    out.push_str(&self.string(c)?);
                    prev = Prev::Value;
                    line_has_code = true;
                }
                '`' => {
                    out.push_str(&self.template()?);
                    prev = Prev::Value;
                    line_has_code = true;
                }
                '(' | '[' | '{' => {
                    brackets.push((c, self.pos));
                    self.pos += 1;
                    out.push(c);
                    prev = Prev::Operator;
                    line_has_code = true;
                }
                ')' | ']' | '}' => {
                    let at = self.pos;
                    match brackets.pop() {
                        None if c == '}' && matches!(context, Context::Braced(_)) => {
                            self.pos += 1;
                            return Ok(out);
                        }
                        None => return Err(self.diagnostic(at, format!("unexpected '{c}'"))),
                        Some((open, open_at)) if closer(open) != c => {
                            return Err(self.diagnostic(
                                at,
                                format!(
                                    "mismatched '{c}': expected '{}' to close '{open}' at {}",
                                    closer(open),
                                    self.position(open_at)
                                ),
                            ));
                        }
                        Some(_) => {}
                    }
                    self.pos += 1;
                    out.push(c);
                    prev = Prev::Value;
                    line_has_code = true;
                }
                '<' if prev.expression_may_start() && self.jsx_follows() => {
                    out.push_str(&self.element()?);
                    prev = Prev::Value;
                    line_has_code = true;
                }
                c if is_ident_start(c) => {
                    let start = self.pos;
                    let word = self.identifier();
                    let top_level_statement = context == Context::TopLevel
                        && brackets.is_empty()
                        && !line_has_code;
                    line_has_code = true;

                    if top_level_statement && word == "import" && self.is_import_statement() {
                        out.push_str(&self.import_statement(start)?);
                        prev = Prev::Start;
                        continue;
                    }
                    if top_level_statement && word == "export" {
                        out.push_str(&self.export_statement(start)?);
                        prev = Prev::Operator;
                        continue;
                    }

                    prev = if EXPRESSION_KEYWORDS.contains(&word.as_str()) {
                        Prev::Keyword
                    } else {
                        Prev::Value
                    };
                    out.push_str(&word);
                }
                c if c.is_ascii_digit() => {
                    while let Some(c) = self.peek() {
                        if !(c.is_ascii_alphanumeric() || c == '.' || c == '_') {
                            break;
                        }
                        out.push(c);
                        self.pos += 1;
                    }
                    prev = Prev::Value;
                    line_has_code = true;
                }
                _ => {
                    self.pos += 1;
                    out.push(c);
                    prev = Prev::Operator;
                    line_has_code = true;
                }
            }
        }
    }

    fn identifier(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_part(c) {
                break;
            }
            word.push(c);
            self.pos += 1;
        }
        word
    }

    fn block_comment(&mut self) -> Fallible<String> {
        let start = self.pos;
        let mut out = String::from("/*");
        self.pos += 2;
        loop {
            if self.starts_with("*/") {
                self.pos += 2;
                out.push_str("*/");
                return Ok(out);
            }
            match self.bump() {
                Some(c) => out.push(c),
                None => return Err(self.diagnostic(start, "unterminated comment")),
            }
        }
    }

    fn string(&mut self, quote: char) -> Fallible<String> {
        let start = self.pos;
        let mut out = String::new();
        out.push(quote);
        self.pos += 1;
        loop {
            match self.bump() {
                Some('\\') => {
                    out.push('\\');
                    if let Some(escaped) = self.bump() {
                        out.push(escaped);
                    }
                }
                Some(c) if c == quote => {
                    out.push(c);
                    return Ok(out);
                }
                Some('\n') | None => {
                    return Err(self.diagnostic(start, "unterminated string literal"));
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self) -> Fallible<String> {
        let start = self.pos;
        let mut out = String::from("`");
        self.pos += 1;
        loop {
            match self.peek() {
                None => return Err(self.diagnostic(start, "unterminated template literal")),
                Some('\\') => {
                    out.push('\\');
                    self.pos += 1;
                    if let Some(escaped) = self.bump() {
                        out.push(escaped);
                    }
                }
                Some('`') => {
                    self.pos += 1;
                    out.push('`');
                    return Ok(out);
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    let brace = self.pos + 1;
                    self.pos += 2;
                    out.push_str("${");
                    out.push_str(&self.script(Context::Braced(brace))?);
                    out.push('}');
                }
                Some(c) => {
                    self.pos += 1;
                    out.push(c);
                }
            }
        }
    }

    fn regex(&mut self) -> Fallible<String> {
        let start = self.pos;
        let mut out = String::from("/");
        self.pos += 1;
        let mut in_class = false;
        loop {
            match self.bump() {
                Some('\\') => {
                    out.push('\\');
                    match self.bump() {
                        Some('\n') | None => {
                            return Err(self.diagnostic(start, "unterminated regular expression"))
                        }
                        Some(c) => out.push(c),
                    }
                }
                Some('[') => {
                    in_class = true;
                    out.push('[');
                }
                Some(']') => {
                    in_class = false;
                    out.push(']');
                }
                Some('/') if !in_class => {
                    out.push('/');
                    while let Some(flag) = self.peek().filter(|c| c.is_ascii_alphabetic()) {
                        out.push(flag);
                        self.pos += 1;
                    }
                    return Ok(out);
                }
                Some('\n') | None => {
                    return Err(self.diagnostic(start, "unterminated regular expression"))
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn skip_inline_space(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// `import(` and `import.meta` are expressions, not statements.
    fn is_import_statement(&self) -> bool {
        let rest = self.chars[self.pos..]
            .iter()
            .find(|c| !c.is_whitespace())
            .copied();
        !matches!(rest, Some('(') | Some('.'))
    }

    /// Drop an import of a runtime-provided module; diagnose anything else.
    /// Newlines are kept so later line numbers stay aligned.
    fn import_statement(&mut self, start: usize) -> Fallible<String> {
        let mut newlines = 0;
        let specifier = loop {
            match self.peek() {
                None => return Err(self.diagnostic(start, "unterminated import statement")),
                Some(q @ ('"' | '\'')) => {
                    let literal = self.string(q)?;
                    break literal[1..literal.len() - 1].to_string();
                }
                Some(c) => {
                    if c == '\n' {
                        newlines += 1;
                    }
                    self.pos += 1;
                }
            }
        };
        if self.peek() == Some(';') {
            self.pos += 1;
        }

        if !ALLOWED_IMPORTS.contains(&specifier.as_str()) {
            self.diagnostics.push(self.diagnostic(
                start,
                format!("unsupported import \"{specifier}\": only react is available in previews"),
            ));
        }
        Ok("\n".repeat(newlines))
    }

    /// Rewrite an `export` statement. The keyword itself has been consumed.
    fn export_statement(&mut self, start: usize) -> Fallible<String> {
        self.skip_inline_space();
        if self.starts_with("default") && !self.peek_at(7).is_some_and(is_ident_part) {
            self.pos += "default".len();
            return Ok("__exports.default =".to_string());
        }
        if self.peek() == Some('{') || self.peek() == Some('*') {
            // Re-exports and export lists bind nothing the preview mounts.
            let mut newlines = 0;
            while let Some(c) = self.bump() {
                match c {
                    '\n' => newlines += 1,
                    ';' => return Ok("\n".repeat(newlines)),
                    '}' => {
                        while self.peek().is_some_and(|c| c == ' ' || c == '\t') {
                            self.pos += 1;
                        }
                        if self.starts_with("from") {
                            self.pos += "from".len();
                            self.skip_inline_space();
                            if let Some(q @ ('"' | '\'')) = self.peek() {
                                self.string(q)?;
                            }
                        }
                        if self.peek() == Some(';') {
                            self.pos += 1;
                        }
                        return Ok("\n".repeat(newlines));
                    }
                    _ => {}
                }
            }
            return Err(self.diagnostic(start, "unterminated export statement"));
        }
        Ok(String::new())
    }

    /// After `<` in expression position: an element name or `>` (fragment).
    fn jsx_follows(&self) -> bool {
        match self.peek_at(1) {
            Some('>') => true,
            Some(c) => is_ident_start(c),
            None => false,
        }
    }

    fn element(&mut self) -> Fallible<String> {
        let start = self.pos;
        self.pos += 1;

        let (tag, name) = if self.peek() == Some('>') {
            (FRAGMENT.to_string(), None)
        } else {
            let name = self.element_name();
            (tag_expression(&name), Some(name))
        };

        let mut props: Vec<String> = Vec::new();
        let children = loop {
            self.skip_tag_space()?;
            match self.peek() {
                None => return Err(self.unterminated_element(start, name.as_deref())),
                Some('/') => {
                    self.pos += 1;
                    if self.peek() != Some('>') {
                        return Err(self.diagnostic(self.pos, "expected '>' after '/' in JSX tag"));
                    }
                    self.pos += 1;
                    break Vec::new();
                }
                Some('>') => {
                    self.pos += 1;
                    break self.children(start, name.as_deref())?;
                }
                Some('{') if name.is_some() => {
                    let brace = self.pos;
                    self.pos += 1;
                    self.skip_inline_space();
                    if !self.starts_with("...") {
                        return Err(self.diagnostic(brace, "expected '...' in JSX spread attribute"));
                    }
                    self.pos += 3;
                    let expr = self.script(Context::Braced(brace))?;
                    props.push(format!("...({})", expr.trim()));
                }
                Some(c) if name.is_some() && is_ident_start(c) => {
                    props.push(self.attribute()?);
                }
                Some(c) => {
                    return Err(self.diagnostic(self.pos, format!("unexpected '{c}' in JSX tag")));
                }
            }
        };

        let props = if props.is_empty() {
            "null".to_string()
        } else {
            format!("{{{}}}", props.join(", "))
        };

        let mut out = format!("{ELEMENT_FACTORY}({tag}, {props}");
        for child in children {
            out.push_str(", ");
            out.push_str(&child);
        }
        // Keep the line count of the original so positions after the element
        // still line up in guest error messages.
        let source_newlines = self.chars[start..self.pos].iter().filter(|c| **c == '\n').count();
        let emitted_newlines = out.matches('\n').count();
        out.push_str(&"\n".repeat(source_newlines.saturating_sub(emitted_newlines)));
        out.push(')');
        Ok(out)
    }

    fn unterminated_element(&self, start: usize, name: Option<&str>) -> CompileDiagnostic {
        match name {
            Some(name) => self.diagnostic(start, format!("unterminated JSX element <{name}>")),
            None => self.diagnostic(start, "unterminated JSX fragment"),
        }
    }

    fn element_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if !(is_ident_part(c) || c == '-' || c == '.' || c == ':') {
                break;
            }
            name.push(c);
            self.pos += 1;
        }
        name
    }

    /// Whitespace and comments between attributes.
    fn skip_tag_space(&mut self) -> Fallible<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.block_comment()?;
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn attribute(&mut self) -> Fallible<String> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if !(is_ident_part(c) || c == '-' || c == ':') {
                break;
            }
            name.push(c);
            self.pos += 1;
        }
        let key = quote(&name);

        self.skip_tag_space()?;
        if self.peek() != Some('=') {
            return Ok(format!("{key}: true"));
        }
        self.pos += 1;
        self.skip_tag_space()?;

        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                let start = self.pos;
                self.pos += 1;
                let mut value = String::new();
                loop {
                    match self.bump() {
                        Some(c) if c == q => break,
                        Some(c) => value.push(c),
                        None => return Err(self.diagnostic(start, "unterminated attribute value")),
                    }
                }
                quote(&decode_entities(&value))
            }
            Some('{') => {
                let brace = self.pos;
                self.pos += 1;
                let expr = self.script(Context::Braced(brace))?;
                if is_blank(&expr) {
                    return Err(self.diagnostic(
                        brace,
                        format!("JSX attribute '{name}' has an empty expression"),
                    ));
                }
                format!("({})", expr.trim())
            }
            Some('<') if self.jsx_follows() => self.element()?,
            _ => {
                return Err(self.diagnostic(
                    self.pos,
                    format!("expected a value for JSX attribute '{name}'"),
                ))
            }
        };
        Ok(format!("{key}: {value}"))
    }

    fn children(&mut self, start: usize, name: Option<&str>) -> Fallible<Vec<String>> {
        let mut children = Vec::new();
        let mut text = String::new();

        loop {
            match self.peek() {
                None => return Err(self.unterminated_element(start, name)),
                Some('<') => {
                    let lt = self.pos;
                    self.pos += 1;
                    self.skip_inline_space();
                    if self.peek() == Some('/') {
                        self.pos += 1;
                        self.skip_inline_space();
                        let closing = self.element_name();
                        self.skip_inline_space();
                        if self.peek() != Some('>') {
                            return Err(self.diagnostic(self.pos, "expected '>' in closing tag"));
                        }
                        self.pos += 1;
                        if closing != name.unwrap_or("") {
                            let expected = match name {
                                Some(name) => format!("</{name}>"),
                                None => "</>".to_string(),
                            };
                            let found = if closing.is_empty() {
                                "</>".to_string()
                            } else {
                                format!("</{closing}>")
                            };
                            return Err(self.diagnostic(
                                lt,
                                format!("mismatched closing tag {found}, expected {expected}"),
                            ));
                        }
                        push_text(&mut children, &text);
                        return Ok(children);
                    }
                    self.pos = lt;
                    push_text(&mut children, &text);
                    text.clear();
                    children.push(self.element()?);
                }
                Some('{') => {
                    push_text(&mut children, &text);
                    text.clear();
                    let brace = self.pos;
                    self.pos += 1;
                    let expr = self.script(Context::Braced(brace))?;
                    if !is_blank(&expr) {
                        children.push(format!("({})", expr.trim()));
                    }
                }
                Some(c) => {
                    self.pos += 1;
                    text.push(c);
                }
            }
        }
    }
}

fn closer(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Lower-case names are intrinsic elements; everything else is a reference.
fn tag_expression(name: &str) -> String {
    let intrinsic = name.starts_with(|c: char| c.is_ascii_lowercase()) && !name.contains('.');
    if intrinsic {
        quote(name)
    } else {
        name.to_string()
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// An expression container holding only whitespace and comments.
fn is_blank(expr: &str) -> bool {
    let mut rest = expr.trim();
    loop {
        if rest.is_empty() {
            return true;
        }
        if let Some(after) = rest.strip_prefix("/*") {
            match after.find("*/") {
                Some(end) => rest = after[end + 2..].trim_start(),
                None => return false,
            }
        } else if let Some(after) = rest.strip_prefix("//") {
            rest = after.find('\n').map_or("", |end| after[end..].trim_start());
        } else {
            return false;
        }
    }
}

/// JSX text whitespace: lines are trimmed, blank lines dropped, the rest
/// joined with single spaces. Whitespace within a single line is kept.
fn push_text(children: &mut Vec<String>, text: &str) {
    if text.is_empty() {
        return;
    }
    let collapsed = if text.contains('\n') {
        let lines: Vec<&str> = text.lines().collect();
        let last = lines.len().saturating_sub(1);
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let line = if i == 0 { *line } else { line.trim_start() };
                if i == last {
                    line
                } else {
                    line.trim_end()
                }
            })
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        text.to_string()
    };
    if !collapsed.trim().is_empty() {
        children.push(quote(&decode_entities(&collapsed)));
    }
}

/// Resolve HTML character references in JSX text. Unknown references are
/// kept as written.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest[1..]
            .find(';')
            .filter(|&end| end > 0 && end <= 10)
            .and_then(|end| entity(&rest[1..=end]).map(|c| (c, end + 2)));
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity(name: &str) -> Option<char> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "middot" => '\u{b7}',
        "bull" => '\u{2022}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "times" => '\u{d7}',
        "divide" => '\u{f7}',
        "deg" => '\u{b0}',
        "euro" => '\u{20ac}',
        "pound" => '\u{a3}',
        "yen" => '\u{a5}',
        "larr" => '\u{2190}',
        "rarr" => '\u{2192}',
        "uarr" => '\u{2191}',
        "darr" => '\u{2193}',
        "hearts" => '\u{2665}',
        "check" => '\u{2713}',
        _ => return None,
    };
    Some(c)
}
