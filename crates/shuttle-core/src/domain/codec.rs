//! Descriptor codec: `---` fenced metadata followed by a markdown body.
//!
//! ```text
//! ---
//! status: pending
//! claimed_by: null
//! priority: 3
//! depends_on: [001, 002]
//! owns: [src/auth.py]
//! ---
//! # Title
//! body...
//! ```
//!
//! `parse` never fails: missing or malformed fields fall back to defaults.
//! `serialize` writes the recognized keys in a fixed order, so
//! `parse(key, &serialize(&d)) == d` holds for every recognized field.
//! List items and claimants that would not survive a bare write are
//! single-quoted, with `''` standing for a literal `'`.

use std::borrow::Cow;
use std::collections::BTreeSet;

use tracing::warn;

use super::descriptor::{DEFAULT_PRIORITY, ExtraField, TaskDescriptor};
use super::ids::{AgentId, TaskId};
use super::status::TaskStatus;

const FENCE: &str = "---";

/// Characters that force a list item into quotes.
const LIST_SPECIAL: &[char] = &[',', '[', ']', '"', '\''];

/// Decode a descriptor stored under `key`.
pub fn parse(key: &str, raw: &str) -> TaskDescriptor {
    let (metadata, body) = split_front_matter(raw);

    let mut status = TaskStatus::Pending;
    let mut claimed_by = None;
    let mut priority = DEFAULT_PRIORITY;
    let mut depends_on = BTreeSet::new();
    let mut owns = BTreeSet::new();
    let mut extra: Vec<ExtraField> = Vec::new();

    for line in metadata.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':').filter(|(name, _)| !name.trim().is_empty())
        else {
            extra.push(ExtraField::Verbatim(line.to_string()));
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        match name {
            "status" => {
                status = TaskStatus::parse(value).unwrap_or_else(|| {
                    warn!(key, value, "unrecognized task status, treating as pending");
                    TaskStatus::Pending
                });
            }
            "claimed_by" => claimed_by = parse_scalar(value).map(AgentId::new),
            "priority" => priority = value.parse().unwrap_or(DEFAULT_PRIORITY),
            "depends_on" => depends_on = parse_list(value).into_iter().map(TaskId::new).collect(),
            "owns" => owns = parse_list(value).into_iter().map(Cow::into_owned).collect(),
            other => {
                extra.retain(|field| field.name() != Some(other));
                extra.push(ExtraField::entry(other, value));
            }
        }
    }

    let mut descriptor =
        TaskDescriptor::from_parts(key.to_string(), status, claimed_by, body.to_string());
    descriptor.priority = priority;
    descriptor.depends_on = depends_on;
    descriptor.owns = owns;
    descriptor.extra = extra;
    descriptor
}

/// Encode a descriptor in canonical form.
pub fn serialize(descriptor: &TaskDescriptor) -> String {
    let claimed_by = descriptor
        .claimed_by()
        .map(|agent| write_scalar(agent.as_str()))
        .unwrap_or(Cow::Borrowed("null"));
    let depends_on = join_list(descriptor.depends_on.iter().map(TaskId::as_str));
    let owns = join_list(descriptor.owns.iter().map(String::as_str));

    let mut out = String::with_capacity(descriptor.body.len() + 128);
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(&format!("status: {}\n", descriptor.status()));
    out.push_str(&format!("claimed_by: {claimed_by}\n"));
    out.push_str(&format!("priority: {}\n", descriptor.priority));
    out.push_str(&format!("depends_on: [{depends_on}]\n"));
    out.push_str(&format!("owns: [{owns}]\n"));
    for field in &descriptor.extra {
        match field {
            ExtraField::Entry(name, value) if value.is_empty() => {
                out.push_str(&format!("{name}:\n"))
            }
            ExtraField::Entry(name, value) => out.push_str(&format!("{name}: {value}\n")),
            ExtraField::Verbatim(line) => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(&descriptor.body);
    out
}

/// Split into (metadata, body). Without a complete fence pair the whole
/// text is body.
fn split_front_matter(raw: &str) -> (&str, &str) {
    let mut lines = raw.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return ("", raw);
    };
    if first.trim_end() != FENCE {
        return ("", raw);
    }

    let metadata_start = first.len();
    let mut offset = metadata_start;
    for line in lines {
        if line.trim_end() == FENCE {
            let metadata = &raw[metadata_start..offset];
            let body = &raw[offset + line.len()..];
            return (metadata, body);
        }
        offset += line.len();
    }
    ("", raw)
}

fn parse_scalar(value: &str) -> Option<Cow<'_, str>> {
    match value {
        "" | "null" | "~" => None,
        v => Some(unquote(v)).filter(|v| !v.is_empty()),
    }
}

/// `[a, 'b, c']`, `[]`, `null` or a bare scalar.
fn parse_list(value: &str) -> Vec<Cow<'_, str>> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(match value {
            "null" | "~" => "",
            v => v,
        });
    split_items(inner)
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(unquote)
        .collect()
}

/// Split on commas outside quotes. A quote only opens at the start of an item.
fn split_items(inner: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut quote = None;
    let mut start = 0;
    let mut chars = inner.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match quote {
            Some('\'') if c == '\'' => {
                if chars.next_if(|&(_, next)| next == '\'').is_none() {
                    quote = None;
                }
            }
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == ',' => {
                items.push(&inner[start..i]);
                start = i + 1;
            }
            None if matches!(c, '\'' | '"') && inner[start..i].trim().is_empty() => {
                quote = Some(c)
            }
            None => {}
        }
    }
    items.push(&inner[start..]);
    items
}

fn unquote(value: &str) -> Cow<'_, str> {
    if let Some(inner) = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
    {
        return if inner.contains("''") {
            Cow::Owned(inner.replace("''", "'"))
        } else {
            Cow::Borrowed(inner)
        };
    }
    if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        return Cow::Borrowed(inner);
    }
    Cow::Borrowed(value)
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty() || value.trim() != value || value.starts_with(['\'', '"'])
}

fn write_scalar(value: &str) -> Cow<'_, str> {
    if needs_quotes(value) || matches!(value, "null" | "~") {
        Cow::Owned(quote(value))
    } else {
        Cow::Borrowed(value)
    }
}

fn join_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items
        .map(|item| {
            if needs_quotes(item) || item.contains(LIST_SPECIAL) {
                Cow::Owned(quote(item))
            } else {
                Cow::Borrowed(item)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = "---\nstatus: in_progress\nclaimed_by: worker-7\npriority: 1\ndepends_on: [001, 002]\nowns: [src/auth.py, src/models/*.py]\n---\n# Add login\n\nImplement the login flow.\n";

    #[test]
    fn parses_all_recognized_fields() {
        let task = parse("tasks/003-login.md", SAMPLE);
        assert_eq!(task.id, TaskId::new("003"));
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert_eq!(task.claimed_by(), Some(&AgentId::new("worker-7")));
        assert_eq!(task.priority, 1);
        assert_eq!(
            task.depends_on,
            BTreeSet::from([TaskId::new("001"), TaskId::new("002")])
        );
        assert_eq!(
            task.owns,
            BTreeSet::from(["src/auth.py".to_string(), "src/models/*.py".to_string()])
        );
        assert_eq!(task.title, "Add login");
        assert_eq!(task.body, "# Add login\n\nImplement the login flow.\n");
    }

    #[test]
    fn missing_metadata_uses_defaults() {
        let task = parse("tasks/004-docs.md", "# Docs\nWrite them.");
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.claimed_by(), None);
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert!(task.depends_on.is_empty());
        assert!(task.owns.is_empty());
        assert_eq!(task.title, "Docs");
        assert_eq!(task.body, "# Docs\nWrite them.");
    }

    #[rstest]
    #[case::bad_priority("priority: high", DEFAULT_PRIORITY)]
    #[case::negative_priority("priority: -1", DEFAULT_PRIORITY)]
    #[case::good_priority("priority: 5", 5)]
    fn malformed_priority_falls_back(#[case] line: &str, #[case] expected: u8) {
        let raw = format!("---\n{line}\n---\nbody");
        assert_eq!(parse("tasks/001-a.md", &raw).priority, expected);
    }

    #[rstest]
    #[case::null("claimed_by: null", None)]
    #[case::empty("claimed_by:", None)]
    #[case::quoted_empty("claimed_by: \"\"", None)]
    #[case::agent("claimed_by: worker-2", Some("worker-2"))]
    fn claimant_values(#[case] line: &str, #[case] expected: Option<&str>) {
        let raw = format!("---\n{line}\n---\n");
        let task = parse("tasks/001-a.md", &raw);
        assert_eq!(task.claimed_by().map(AgentId::as_str), expected);
    }

    #[test]
    fn unknown_status_is_treated_as_pending() {
        let task = parse("tasks/001-a.md", "---\nstatus: blocked\n---\n");
        assert_eq!(task.status(), TaskStatus::Pending);
    }

    #[test]
    fn lists_tolerate_scalars_quotes_and_empties() {
        let raw = "---\ndepends_on: 001\nowns: [\"src/a.py\", , 'src/b.py']\n---\n";
        let task = parse("tasks/002-b.md", raw);
        assert_eq!(task.depends_on, BTreeSet::from([TaskId::new("001")]));
        assert_eq!(
            task.owns,
            BTreeSet::from(["src/a.py".to_string(), "src/b.py".to_string()])
        );

        let empty = parse("tasks/002-b.md", "---\ndepends_on: []\nowns: null\n---\n");
        assert!(empty.depends_on.is_empty());
        assert!(empty.owns.is_empty());
    }

    #[test]
    fn unterminated_front_matter_is_all_body() {
        let raw = "---\nstatus: completed\n# Title";
        let task = parse("tasks/001-a.md", raw);
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.body, raw);
        assert_eq!(task.title, "Title");
    }

    #[test]
    fn serialize_is_canonical() {
        let task = TaskDescriptor::new("tasks/002-api.md", "# API\n")
            .with_priority(2)
            .with_dependencies(["001"])
            .with_owns(["src/api.py"]);
        assert_eq!(
            serialize(&task),
            "---\nstatus: pending\nclaimed_by: null\npriority: 2\ndepends_on: [001]\nowns: [src/api.py]\n---\n# API\n"
        );
    }

    #[test]
    fn unrecognized_keys_are_preserved() {
        let raw = "---\nstatus: pending\nassignee: team-a\nclaimed_by: null\nlabels: [x, y]\n---\nbody";
        let task = parse("tasks/001-a.md", raw);
        assert_eq!(
            task.extra,
            vec![
                ExtraField::entry("assignee", "team-a"),
                ExtraField::entry("labels", "[x, y]"),
            ]
        );
        let out = serialize(&task);
        assert!(out.contains("assignee: team-a\nlabels: [x, y]\n---\nbody"));
        assert_eq!(parse("tasks/001-a.md", &out), task);
    }

    #[test]
    fn lines_without_a_key_are_kept_verbatim() {
        let raw = "---\nstatus: pending\n  - a stray list item\n\nnote:\n---\nbody";
        let task = parse("tasks/001-a.md", raw);
        assert_eq!(
            task.extra,
            vec![
                ExtraField::Verbatim("  - a stray list item".to_string()),
                ExtraField::entry("note", ""),
            ]
        );
        let out = serialize(&task);
        assert!(out.contains("owns: []\n  - a stray list item\nnote:\n---\nbody"));
        assert_eq!(parse("tasks/001-a.md", &out), task);
    }

    #[test]
    fn awkward_list_items_are_quoted() {
        let task = TaskDescriptor::new("tasks/001-a.md", "# A\n").with_owns(["src/{a,b}.py", "it's"]);
        let out = serialize(&task);
        assert!(out.contains("owns: ['it''s', 'src/{a,b}.py']\n"));
        assert_eq!(
            parse("tasks/001-a.md", &out).owns,
            BTreeSet::from(["src/{a,b}.py".to_string(), "it's".to_string()])
        );
    }

    #[rstest]
    #[case::null("null", "claimed_by: 'null'\n")]
    #[case::tilde("~", "claimed_by: '~'\n")]
    #[case::plain("worker-1", "claimed_by: worker-1\n")]
    fn reserved_claimants_are_quoted(#[case] agent: &str, #[case] line: &str) {
        let task = TaskDescriptor::new("tasks/001-a.md", "")
            .start(&AgentId::new(agent))
            .unwrap();
        let out = serialize(&task);
        assert!(out.contains(line));
        assert_eq!(parse("tasks/001-a.md", &out).claimed_by(), Some(&AgentId::new(agent)));
    }

    #[rstest]
    #[case::empty_sets(TaskDescriptor::new("tasks/001-a.md", ""))]
    #[case::sample(parse("tasks/003-login.md", SAMPLE))]
    #[case::crlf_body(TaskDescriptor::new("tasks/005-win.md", "# Win\r\nline\r\n\r\n"))]
    #[case::body_with_fence(TaskDescriptor::new("tasks/006-md.md", "# Md\n---\nnot metadata\n---\n"))]
    #[case::full(
        TaskDescriptor::new("tasks/007-full.md", "# Full\n")
            .with_priority(9)
            .with_dependencies(["001", "003", "002"])
            .with_owns(["b.py", "a/*.py"])
            .start(&AgentId::new("worker-3"))
            .unwrap()
    )]
    #[case::awkward_items(
        TaskDescriptor::new("tasks/008-odd.md", "# Odd\n")
            .with_dependencies([" 001", "a,b", "''"])
            .with_owns(["src/{a,b}.py", "[x]", "\"q\"", "it's", " padded ", ""])
    )]
    #[case::null_claimant(
        TaskDescriptor::new("tasks/009-null.md", "")
            .start(&AgentId::new("null"))
            .unwrap()
    )]
    #[case::quoted_claimant(
        TaskDescriptor::new("tasks/010-q.md", "")
            .start(&AgentId::new("'x' "))
            .unwrap()
    )]
    fn parse_serialize_round_trip(#[case] task: TaskDescriptor) {
        assert_eq!(parse(&task.key, &serialize(&task)), task);
    }
}
