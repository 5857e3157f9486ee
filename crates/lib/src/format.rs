//! Telegram HTML rendering of message entities, and log previews.
//!
//! Entity offsets and lengths are counted in UTF-16 code units, as the Bot API reports them.

use serde::Deserialize;

/// Bot API `MessageEntity`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub user: Option<EntityUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntityUser {
    pub id: i64,
}

impl MessageEntity {
    pub fn new(kind: &str, offset: usize, length: usize) -> Self {
        Self {
            kind: kind.to_string(),
            offset,
            length,
            url: None,
            language: None,
            user: None,
        }
    }
}

struct Span {
    start: usize,
    end: usize,
    open: String,
    close: String,
}

fn tag(name: &str) -> (String, String) {
    (format!("<{}>", name), format!("</{}>", name))
}

/// Opening and closing tags for an entity; `None` for entities Telegram re-detects on its own
/// (mentions, hashtags, bare urls, commands).
fn tags_for(entity: &MessageEntity) -> Option<(String, String)> {
    let tags = match entity.kind.as_str() {
        "bold" => tag("b"),
        "italic" => tag("i"),
        "underline" => tag("u"),
        "strikethrough" => tag("s"),
        "spoiler" => tag("tg-spoiler"),
        "code" => tag("code"),
        "blockquote" => tag("blockquote"),
        "expandable_blockquote" => (
            "<blockquote expandable>".to_string(),
            "</blockquote>".to_string(),
        ),
        "pre" => match entity.language.as_deref().filter(|l| !l.is_empty()) {
            Some(lang) => (
                format!("<pre><code class=\"language-{}\">", escape_attr(lang)),
                "</code></pre>".to_string(),
            ),
            None => tag("pre"),
        },
        "text_link" => {
            let url = entity.url.as_deref()?;
            (format!("<a href=\"{}\">", escape_attr(url)), "</a>".to_string())
        }
        "text_mention" => {
            let user = entity.user.as_ref()?;
            (
                format!("<a href=\"tg://user?id={}\">", user.id),
                "</a>".to_string(),
            )
        }
        _ => return None,
    };
    Some(tags)
}

/// Render `text` with `entities` as Telegram HTML. Plain text is escaped; overlapping entities
/// are closed and reopened so the output stays well formed.
pub fn entities_to_html(text: &str, entities: &[MessageEntity]) -> String {
    let mut spans: Vec<Span> = entities
        .iter()
        .filter(|e| e.length > 0)
        .filter_map(|e| {
            tags_for(e).map(|(open, close)| Span {
                start: e.offset,
                end: e.offset.saturating_add(e.length),
                open,
                close,
            })
        })
        .collect();
    spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut out = String::with_capacity(text.len() + spans.len() * 16);
    let mut stack: Vec<usize> = Vec::new();
    let mut next = 0;
    let mut pos = 0;
    for ch in text.chars() {
        close_ended(&mut out, &spans, &mut stack, pos);
        while next < spans.len() && spans[next].start <= pos {
            out.push_str(&spans[next].open);
            stack.push(next);
            next += 1;
        }
        push_escaped(&mut out, ch);
        pos += ch.len_utf16();
    }
    while let Some(i) = stack.pop() {
        out.push_str(&spans[i].close);
    }
    out
}

/// Close every open span that ends at or before `pos`, reopening spans that were above it.
fn close_ended(out: &mut String, spans: &[Span], stack: &mut Vec<usize>, pos: usize) {
    while let Some(k) = stack.iter().position(|&i| spans[i].end <= pos) {
        let mut reopen = Vec::new();
        while stack.len() > k {
            let Some(i) = stack.pop() else { break };
            out.push_str(&spans[i].close);
            if spans[i].end > pos {
                reopen.push(i);
            }
        }
        for i in reopen.into_iter().rev() {
            out.push_str(&spans[i].open);
            stack.push(i);
        }
    }
}

fn push_escaped(out: &mut String, ch: char) {
    match ch {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        c => out.push(c),
    }
}

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        push_escaped(&mut out, ch);
    }
    out
}

fn escape_attr(value: &str) -> String {
    escape_html(value).replace('"', "&quot;")
}

/// Log preview: the first `max` characters followed by `...` when longer, or `Media content`.
pub fn preview(text: Option<&str>, max: usize) -> String {
    match text {
        Some(t) if !t.is_empty() => {
            if t.chars().count() > max {
                let head: String = t.chars().take(max).collect();
                format!("{}...", head)
            } else {
                t.to_string()
            }
        }
        _ => "Media content".to_string(),
    }
}
