//! Parsing helpers for model output
//!
//! Models are asked for JSON or fenced code, but replies routinely carry
//! prose around the payload. These helpers pull out the first usable block.

/// Extract the first balanced `{…}` object from free-form text
///
/// Brace-depth scan from the first `{`; string literals and escapes are
/// honored so braces inside values do not unbalance the scan.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            },
            _ => {},
        }
    }

    None
}

/// Extract the first Python code block from a model reply
///
/// Prefers a ```` ```python ```` (or bare ```` ``` ````) fenced block; falls
/// back to the first import-anchored indented region.
pub fn extract_python_block(response: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced(response) {
        return Some(fenced);
    }
    extract_import_anchored(response)
}

fn extract_fenced(response: &str) -> Option<String> {
    let mut rest = response;
    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let body_start = after_fence.find('\n')? + 1;
        let language = after_fence[..body_start - 1].trim();
        let body = &after_fence[body_start..];
        let close = body.find("```")?;
        let code = body[..close].trim();

        if (language.is_empty() || language.eq_ignore_ascii_case("python")) && !code.is_empty() {
            return Some(code.to_string());
        }
        rest = &body[close + 3..];
    }
    None
}

fn extract_import_anchored(response: &str) -> Option<String> {
    let mut code_lines: Vec<&str> = Vec::new();
    let mut in_code = false;

    for line in response.lines() {
        let trimmed = line.trim_start();
        if !in_code && (trimmed.starts_with("import ") || trimmed.starts_with("from ")) {
            in_code = true;
            code_lines.push(line);
        } else if in_code {
            if line.trim().is_empty()
                || line.starts_with("    ")
                || line.starts_with('\t')
                || trimmed.starts_with("import ")
                || trimmed.starts_with("from ")
                || !line.starts_with(char::is_whitespace) && looks_like_python(line)
            {
                code_lines.push(line);
            } else {
                break;
            }
        }
    }

    let code = code_lines.join("\n").trim().to_string();
    if code.is_empty() {
        None
    } else {
        Some(code)
    }
}

/// Top-level statement shapes that continue an import-anchored block
fn looks_like_python(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('=')
        || trimmed.ends_with(':')
        || trimmed.ends_with(')')
        || trimmed.starts_with('#')
}
