//! Reduce an HTML document to the text a reader would see.

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "article", "section",
    "header", "footer", "blockquote", "pre", "table", "ul", "ol", "main", "nav",
];

/// Strip tags, drop `<script>`/`<style>`/`<noscript>` bodies, turn block
/// boundaries into newlines, decode entities, and collapse whitespace.
/// Output is cut at `max_chars` characters.
pub fn html_to_text(html: &str, max_chars: usize) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    let mut skip_depth = 0usize;
    let mut tag_buf = String::new();

    for ch in html.chars() {
        match ch {
            '<' if !in_tag => {
                in_tag = true;
                tag_buf.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let tag = tag_buf.trim().to_ascii_lowercase();
                let closing = tag.starts_with('/');
                let name: String = tag
                    .trim_start_matches('/')
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect();

                if matches!(name.as_str(), "script" | "style" | "noscript") {
                    if closing {
                        skip_depth = skip_depth.saturating_sub(1);
                    } else if !tag.ends_with('/') {
                        skip_depth += 1;
                    }
                } else if name == "br" || (BLOCK_TAGS.contains(&name.as_str()) && skip_depth == 0) {
                    if !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
            _ if in_tag => tag_buf.push(ch),
            _ if skip_depth > 0 => {}
            _ => out.push(ch),
        }
    }

    let decoded = decode_entities(&out);

    let mut result = String::new();
    let mut prev_blank = true;
    for line in decoded.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !prev_blank {
                result.push('\n');
                prev_blank = true;
            }
        } else {
            result.push_str(&collapsed);
            result.push('\n');
            prev_blank = false;
        }
    }

    truncate_chars(result.trim(), max_chars)
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let entity_end = tail.find(';').filter(|&i| i <= 10);
        let decoded = entity_end.and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(|c: char| c == 'x' || c == 'X') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
