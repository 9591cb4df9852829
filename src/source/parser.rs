//! Lexical C# scanner.
//!
//! This engine does not compile or bind the source it reads: a closed,
//! lexical/heuristic scan stands in for a full front end. The shape of that
//! scan is regex-driven and line-oriented, tolerant of the fraction of
//! inputs it can't make sense of (skip and warn, don't abort), the same way
//! a reader over another tool's text output would be.
//!
//! The scanner runs a single pass per file with a brace-depth state
//! machine: it classifies the text immediately preceding each `{` as a
//! namespace, type, or method header, and the text immediately preceding a
//! top-level `;` (inside a type body) as a possible expression-bodied
//! method. It is deliberately not a parser: control-flow blocks
//! (`if`/`for`/`while`/`switch`/`try`/`lock`/`using (...)`) are excluded by
//! a keyword blacklist rather than by understanding C# grammar, and
//! strings/chars/comments are skipped by a small quoting state machine so
//! their braces don't perturb depth tracking.

use std::sync::LazyLock;

use regex::Regex;

use crate::method_id::MethodId;

/// One declaration discovered while scanning a file, before call-site
/// resolution. Carries enough to build a [`crate::source::MethodRecord`]
/// once overload/override resolution has run over the whole solution.
#[derive(Debug, Clone)]
pub struct DraftMethod {
    pub declaring_type: String,
    pub namespace: String,
    pub method_name: String,
    pub param_types: Vec<String>,
    pub attributes: Vec<DraftAttribute>,
    pub modifiers: Vec<String>,
    pub start_line: u32,
    pub end_line: u32,
    /// Raw body text (braces stripped), scanned in a second pass for call
    /// sites once every method in the solution is known.
    pub body: String,
}

impl DraftMethod {
    pub fn is_virtual(&self) -> bool {
        self.modifiers.iter().any(|m| m == "virtual" || m == "abstract")
    }

    pub fn is_override(&self) -> bool {
        self.modifiers.iter().any(|m| m == "override")
    }
}

#[derive(Debug, Clone)]
pub struct DraftAttribute {
    pub name: String,
    pub args: Vec<String>,
}

/// A type declaration, used for namespace-qualified call resolution and
/// for discovering override chains via base-type lists.
#[derive(Debug, Clone)]
pub struct DraftType {
    pub name: String,
    pub namespace: String,
    pub base_types: Vec<String>,
    pub is_interface: bool,
}

#[derive(Debug, Default)]
pub struct FileParseResult {
    pub methods: Vec<DraftMethod>,
    pub types: Vec<DraftType>,
    pub using_namespaces: Vec<String>,
}

static RE_USING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*using\s+(?:static\s+)?([\w\.]+)\s*;").unwrap());

static RE_NAMESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)namespace\s+([\w\.]+)").unwrap());

static RE_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(class|struct|interface|record)\s+(\w+)(?:<[^>]*>)?\s*(?::\s*([\w\.,<>\s]+?))?\s*$").unwrap()
});

static RE_ATTRIBUTE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[\s*([^\]]*)\]\s*$").unwrap());

static RE_SINGLE_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w\.]+)\s*(?:\(([^)]*)\))?$").unwrap());

// `ReturnType Name(args)`, `ReturnType Name<T>(args)`, optionally preceded
// by access/static/async/virtual/override/etc modifiers consumed separately.
static RE_METHOD_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_][\w<>\[\],\.\? ]*?)\s+([A-Za-z_]\w*)\s*(?:<[^>]*>)?\s*\(([^)]*)\)\s*(?:=>.*)?$").unwrap()
});

static RE_CALL_SITE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:([A-Za-z_]\w*)\s*\.\s*)?([A-Za-z_]\w*)\s*\(").unwrap()
});

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "foreach", "while", "switch", "catch", "fixed", "lock", "using", "return",
    "new", "get", "set", "do", "else", "try", "finally", "when", "throw", "yield", "await",
];

const MODIFIER_KEYWORDS: &[&str] = &[
    "public", "private", "protected", "internal", "static", "virtual", "override", "abstract",
    "sealed", "async", "partial", "readonly", "unsafe", "extern", "new",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    File,
    Namespace,
    Type,
    Method,
    Other,
}

struct Scope {
    kind: ScopeKind,
    buffer_start_line: u32,
    /// For `ScopeKind::Method`, the header text captured at the opening
    /// `{` (the buffer is cleared afterward to collect the body instead).
    header: String,
}

/// Scans one file's content and returns every type/method declaration it
/// can identify, plus the file's `using` directives for later qualified
/// call resolution.
pub fn parse_file(content: &str) -> FileParseResult {
    let mut result = FileParseResult::default();
    let mut namespace_stack: Vec<String> = Vec::new();
    let mut type_stack: Vec<String> = Vec::new();
    let mut pending_attributes: Vec<DraftAttribute> = Vec::new();

    let mut scopes: Vec<Scope> =
        vec![Scope { kind: ScopeKind::File, buffer_start_line: 1, header: String::new() }];
    let mut buffer = String::new();
    let mut body_start_line = 1u32;
    let mut line = 1u32;
    let mut method_nest_depth = 0u32;

    let mut chars = content.char_indices().peekable();
    let bytes = content.as_bytes();

    while let Some((i, c)) = chars.next() {
        match c {
            '\n' => {
                // An attribute line (`[Test]`) stands alone with no
                // trailing `;` or `{`; flush it at end-of-line so it
                // doesn't bleed into the next header's classification.
                if let Some(attrs) = RE_ATTRIBUTE_BLOCK.captures(buffer.trim()) {
                    let inner = attrs[1].to_string();
                    parse_attribute_line(&inner, &mut pending_attributes);
                    buffer.clear();
                }
                line += 1;
                buffer.push(c);
            }
            '/' if bytes.get(i + 1) == Some(&b'/') => {
                while let Some(&(_, nc)) = chars.peek() {
                    if nc == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if bytes.get(i + 1) == Some(&b'*') => {
                chars.next();
                while let Some((_, nc)) = chars.next() {
                    if nc == '\n' {
                        line += 1;
                    }
                    if nc == '*' && chars.peek().map(|&(_, n)| n) == Some('/') {
                        chars.next();
                        break;
                    }
                }
            }
            '"' => {
                skip_string(&mut chars, &mut line);
            }
            '\'' => {
                skip_char_literal(&mut chars);
            }
            '{' if method_nest_depth > 0 => {
                method_nest_depth += 1;
                buffer.push(c);
            }
            '{' if scopes.last().map(|s| s.kind) == Some(ScopeKind::Method) => {
                // Nested block inside a method body (if/for/while/etc): keep
                // accumulating into the body buffer rather than treating it
                // as a new declaration scope.
                method_nest_depth = 1;
                buffer.push(c);
            }
            '{' => {
                let header = buffer.trim().to_string();
                let kind = classify_header(&header);
                match kind {
                    ScopeKind::Namespace => {
                        if let Some(caps) = RE_NAMESPACE.captures(&header) {
                            namespace_stack.push(caps[1].to_string());
                        }
                    }
                    ScopeKind::Type => {
                        if let Some(draft_type) = extract_type(&header, &namespace_stack, &type_stack) {
                            type_stack.push(draft_type.name.clone());
                            result.types.push(draft_type);
                        }
                    }
                    ScopeKind::Method => {
                        body_start_line = line;
                    }
                    _ => {}
                }
                scopes.push(Scope { kind, buffer_start_line: line, header });
                buffer.clear();
            }
            '}' if method_nest_depth > 1 => {
                method_nest_depth -= 1;
                buffer.push(c);
            }
            '}' if method_nest_depth == 1 => {
                method_nest_depth = 0;
                buffer.push(c);
            }
            '}' => {
                let closed = scopes.pop().unwrap_or(Scope {
                    kind: ScopeKind::Other,
                    buffer_start_line: line,
                    header: String::new(),
                });
                match closed.kind {
                    ScopeKind::Namespace => {
                        namespace_stack.pop();
                    }
                    ScopeKind::Type => {
                        type_stack.pop();
                    }
                    ScopeKind::Method => {
                        if let Some(method) = finish_method(
                            &closed.header,
                            &buffer,
                            body_start_line,
                            line,
                            &namespace_stack,
                            &type_stack,
                            &mut pending_attributes,
                        ) {
                            result.methods.push(method);
                        }
                    }
                    _ => {}
                }
                buffer.clear();
            }
            ';' if method_nest_depth > 0 || scopes.last().map(|s| s.kind) == Some(ScopeKind::Method) => {
                // Statement terminator inside a method body: just body text.
                buffer.push(c);
            }
            ';' => {
                let in_type_body = scopes.last().map(|s| s.kind) == Some(ScopeKind::Type);
                if in_type_body {
                    if let Some(method) = try_expression_bodied(
                        &buffer,
                        line,
                        &namespace_stack,
                        &type_stack,
                        &mut pending_attributes,
                    ) {
                        result.methods.push(method);
                    } else if let Some(caps) = RE_USING.captures(buffer.trim()) {
                        result.using_namespaces.push(caps[1].to_string());
                    }
                } else if let Some(caps) = RE_USING.captures(buffer.trim()) {
                    result.using_namespaces.push(caps[1].to_string());
                } else if let Some(caps) = RE_NAMESPACE.captures(buffer.trim()) {
                    // File-scoped namespace declaration (`namespace Foo.Bar;`).
                    namespace_stack = vec![caps[1].to_string()];
                }
                buffer.clear();
            }
            _ => {
                buffer.push(c);
            }
        }
    }

    result
}

fn classify_header(header: &str) -> ScopeKind {
    if RE_NAMESPACE.is_match(header) && !header.contains('(') {
        return ScopeKind::Namespace;
    }
    if RE_TYPE.is_match(header) {
        return ScopeKind::Type;
    }
    if looks_like_method_header(header) {
        return ScopeKind::Method;
    }
    ScopeKind::Other
}

fn looks_like_method_header(header: &str) -> bool {
    let Some(caps) = RE_METHOD_HEADER.captures(header) else { return false };
    let name = &caps[2];
    if CONTROL_KEYWORDS.contains(&name) {
        return false;
    }
    let return_type = caps[1].trim();
    if return_type.is_empty() || CONTROL_KEYWORDS.contains(&return_type) {
        return false;
    }
    true
}

fn extract_type(header: &str, namespace_stack: &[String], type_stack: &[String]) -> Option<DraftType> {
    let caps = RE_TYPE.captures(header)?;
    let kind = &caps[1];
    let name = caps[2].to_string();
    let qualified_name = if type_stack.is_empty() {
        name.clone()
    } else {
        format!("{}+{}", type_stack.join("+"), name)
    };
    let base_types = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|s| s.trim().split('<').next().unwrap_or("").trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some(DraftType {
        name: qualified_name,
        namespace: namespace_stack.join("."),
        base_types,
        is_interface: kind == "interface",
    })
}

fn finish_method(
    header: &str,
    body: &str,
    body_start_line: u32,
    end_line: u32,
    namespace_stack: &[String],
    type_stack: &[String],
    pending_attributes: &mut Vec<DraftAttribute>,
) -> Option<DraftMethod> {
    if type_stack.is_empty() {
        return None;
    }
    let caps = RE_METHOD_HEADER.captures(header)?;
    let method_name = caps[2].to_string();
    let param_types = split_param_types(&caps[3]);
    let modifiers = extract_modifiers(header, &method_name);

    Some(DraftMethod {
        declaring_type: type_stack.join("+"),
        namespace: namespace_stack.join("."),
        method_name,
        param_types,
        attributes: std::mem::take(pending_attributes),
        modifiers,
        start_line: body_start_line,
        end_line,
        body: body.to_string(),
    })
}

/// Matches a bodyless method declaration terminated by `;` at type scope:
/// an expression-bodied member (`=> expr;`) or an abstract/interface
/// signature (`ReturnType Name(args);` with no body at all).
fn try_expression_bodied(
    buffer: &str,
    end_line: u32,
    namespace_stack: &[String],
    type_stack: &[String],
    pending_attributes: &mut Vec<DraftAttribute>,
) -> Option<DraftMethod> {
    let text = buffer.trim();
    if !text.contains('(') {
        return None;
    }
    if !text.contains("=>") {
        return try_abstract_declaration(text, end_line, namespace_stack, type_stack, pending_attributes);
    }
    let header_part = text.split("=>").next()?.trim();
    let caps = RE_METHOD_HEADER.captures(header_part)?;
    let method_name = caps[2].to_string();
    if CONTROL_KEYWORDS.contains(&method_name.as_str()) {
        return None;
    }
    let param_types = split_param_types(&caps[3]);
    let modifiers = extract_modifiers(header_part, &method_name);

    if type_stack.is_empty() {
        return None;
    }

    let start_line = end_line.saturating_sub(text.matches('\n').count() as u32);

    Some(DraftMethod {
        declaring_type: type_stack.join("+"),
        namespace: namespace_stack.join("."),
        method_name,
        param_types,
        attributes: std::mem::take(pending_attributes),
        modifiers,
        start_line,
        end_line,
        body: text.splitn(2, "=>").nth(1).unwrap_or("").trim().to_string(),
    })
}

fn try_abstract_declaration(
    text: &str,
    end_line: u32,
    namespace_stack: &[String],
    type_stack: &[String],
    pending_attributes: &mut Vec<DraftAttribute>,
) -> Option<DraftMethod> {
    if type_stack.is_empty() {
        return None;
    }
    // Reject field/local initializers disguised as a method header, e.g.
    // `private int x = new Foo();` — a real declaration never has an `=`
    // before its parameter list.
    if text.split('(').next().unwrap_or("").contains('=') {
        return None;
    }
    let caps = RE_METHOD_HEADER.captures(text)?;
    let method_name = caps[2].to_string();
    if CONTROL_KEYWORDS.contains(&method_name.as_str()) {
        return None;
    }
    let param_types = split_param_types(&caps[3]);
    let modifiers = extract_modifiers(text, &method_name);

    Some(DraftMethod {
        declaring_type: type_stack.join("+"),
        namespace: namespace_stack.join("."),
        method_name,
        param_types,
        attributes: std::mem::take(pending_attributes),
        modifiers,
        start_line: end_line,
        end_line,
        body: String::new(),
    })
}

fn extract_modifiers(header: &str, method_name: &str) -> Vec<String> {
    header
        .split_whitespace()
        .take_while(|w| *w != method_name)
        .filter(|w| MODIFIER_KEYWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn split_param_types(params: &str) -> Vec<String> {
    if params.trim().is_empty() {
        return Vec::new();
    }
    split_top_level(params, ',')
        .into_iter()
        .map(|p| {
            let p = p.trim();
            let p = p.strip_prefix("ref ").or_else(|| p.strip_prefix("out ")).or_else(|| p.strip_prefix("in ")).unwrap_or(p);
            p.split_whitespace().next().unwrap_or("").to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_attribute_line(inner: &str, pending: &mut Vec<DraftAttribute>) {
    for part in split_top_level(inner, ',') {
        let part = part.trim();
        if let Some(caps) = RE_SINGLE_ATTRIBUTE.captures(part) {
            let name = caps[1].rsplit('.').next().unwrap_or(&caps[1]).to_string();
            let args = caps
                .get(2)
                .map(|m| split_top_level(m.as_str(), ',').into_iter().map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            pending.push(DraftAttribute { name, args });
        }
    }
}

/// Splits on `sep` at bracket/paren depth zero, so `Foo(1,2), Bar` splits
/// into `["Foo(1,2)", "Bar"]` rather than four pieces.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' | '<' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | '>' | ']' => {
                depth -= 1;
                current.push(c);
            }
            c if c == sep && depth == 0 => {
                out.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

fn skip_string(chars: &mut std::iter::Peekable<std::str::CharIndices>, line: &mut u32) {
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '"' => break,
            '\n' => *line += 1,
            _ => {}
        }
    }
}

fn skip_char_literal(chars: &mut std::iter::Peekable<std::str::CharIndices>) {
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\'' => break,
            _ => {}
        }
    }
}

/// Resolves a potential call-site identifier's callee name, splitting the
/// optional qualifier (`Type.` or `this.`) from the final method name.
pub fn find_call_sites(body: &str) -> Vec<(Option<String>, String)> {
    RE_CALL_SITE
        .captures_iter(body)
        .filter_map(|caps| {
            let name = caps[2].to_string();
            if CONTROL_KEYWORDS.contains(&name.as_str()) {
                return None;
            }
            let qualifier = caps.get(1).map(|m| m.as_str().to_string()).filter(|q| q != "this" && q != "base");
            Some((qualifier, name))
        })
        .collect()
}

#[allow(dead_code)]
pub fn synthetic_id_for(declaring_type: &str, method_name: &str, param_types: &[String]) -> MethodId {
    MethodId::build("", declaring_type, method_name, param_types)
}
