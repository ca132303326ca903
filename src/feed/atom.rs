//! Parsing of the mailbox's Atom 0.3 feed.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::domain::mail::{MailFeedEntry, MailSender};
use crate::error::{SessionError, SessionResult};

#[derive(Debug, Deserialize)]
struct AtomFeed {
    fullcount: Option<String>,
    modified: Option<String>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<String>,
    summary: Option<String>,
    link: Option<AtomLink>,
    issued: Option<String>,
    author: Option<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
    email: Option<String>,
}

/// What one poll learned from the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedDocument {
    /// `None` when the feed carries no parseable `<modified>`; such a feed is
    /// always treated as changed.
    pub modified: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub entries: Vec<MailFeedEntry>,
}

pub fn parse_feed(xml: &str) -> SessionResult<FeedDocument> {
    let feed: AtomFeed = quick_xml::de::from_str(xml)?;

    let unread_count = match feed.fullcount.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<u32>()
            .map_err(|e| SessionError::Feed(format!("bad fullcount {raw:?}: {e}")))?,
        _ => 0,
    };

    let modified = feed.modified.as_deref().and_then(parse_timestamp);

    let entries = feed.entries.into_iter().filter_map(convert_entry).collect();

    Ok(FeedDocument {
        modified,
        unread_count,
        entries,
    })
}

fn convert_entry(entry: AtomEntry) -> Option<MailFeedEntry> {
    let link = entry.link?.href;
    let Some(message_id) = message_id_from_link(&link) else {
        log::debug!("Skipping feed entry without message_id: {link}");
        return None;
    };
    let Some(issued_at) = entry.issued.as_deref().and_then(parse_timestamp) else {
        log::debug!("Skipping feed entry {message_id} with unparseable issued date");
        return None;
    };
    let author = entry.author;

    Some(MailFeedEntry {
        message_id,
        link,
        subject: entry.title.unwrap_or_default().trim().to_string(),
        summary: normalize_summary(entry.summary.as_deref().unwrap_or_default(), 280),
        sender: MailSender {
            name: author
                .as_ref()
                .and_then(|a| a.name.clone())
                .unwrap_or_default(),
            email: author.and_then(|a| a.email).unwrap_or_default(),
        },
        issued_at,
    })
}

pub fn message_id_from_link(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "message_id")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Collapses the summary onto one line and caps its length.
pub fn normalize_summary(s: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        if out.chars().count() >= max_chars {
            break;
        }
    }
    out.chars().take(max_chars).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry_xml(message_id: &str, issued: &str, subject: &str) -> String {
        format!(
            r#"<entry>
<title>{subject}</title>
<summary>  Hello   there
 friend </summary>
<link rel="alternate" href="https://mail.google.com/mail?account_id=me@example.com&amp;message_id={message_id}&amp;view=conv&amp;extsrc=atom" type="text/html" />
<modified>{issued}</modified>
<issued>{issued}</issued>
<id>tag:gmail.google.com,2004:{message_id}</id>
<author>
<name>Ada Lovelace</name>
<email>ada@example.com</email>
</author>
</entry>"#
        )
    }

    pub(crate) fn feed_xml(modified: &str, fullcount: u32, entries: &[String]) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed version="0.3" xmlns="http://purl.org/atom/ns#">
<title>Gmail - Inbox for me@example.com</title>
<tagline>New messages in your Gmail Inbox</tagline>
<fullcount>{fullcount}</fullcount>
<link rel="alternate" href="https://mail.google.com/mail" type="text/html" />
<modified>{modified}</modified>
{}
</feed>"#,
            entries.join("\n")
        )
    }

    #[test]
    fn parses_counts_and_entries() {
        let xml = feed_xml(
            "2024-05-01T10:00:00Z",
            3,
            &[
                entry_xml("abc123", "2024-05-01T09:59:50Z", "Lunch?"),
                entry_xml("def456", "2024-05-01T09:00:00Z", "Report &amp; notes"),
            ],
        );
        let doc = parse_feed(&xml).unwrap();

        assert_eq!(doc.unread_count, 3);
        assert_eq!(
            doc.modified,
            Some("2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap())
        );
        assert_eq!(doc.entries.len(), 2);

        let first = &doc.entries[0];
        assert_eq!(first.message_id, "abc123");
        assert_eq!(first.subject, "Lunch?");
        assert_eq!(first.summary, "Hello there friend");
        assert_eq!(first.sender.name, "Ada Lovelace");
        assert_eq!(first.sender.email, "ada@example.com");
        assert_eq!(doc.entries[1].subject, "Report & notes");
    }

    #[test]
    fn empty_inbox_has_no_entries() {
        let doc = parse_feed(&feed_xml("2024-05-01T10:00:00Z", 0, &[])).unwrap();
        assert_eq!(doc.unread_count, 0);
        assert!(doc.entries.is_empty());
    }

    #[test]
    fn entries_without_message_id_are_skipped() {
        let xml = feed_xml(
            "2024-05-01T10:00:00Z",
            1,
            &[r#"<entry><title>x</title><link href="https://mail.google.com/mail?view=conv" /><issued>2024-05-01T10:00:00Z</issued></entry>"#.to_string()],
        );
        assert!(parse_feed(&xml).unwrap().entries.is_empty());
    }

    #[test]
    fn malformed_xml_is_a_feed_error() {
        let err = parse_feed("<feed><fullcount>2</feed>").unwrap_err();
        assert!(matches!(err, SessionError::Feed(_)));
    }

    #[test]
    fn summary_is_capped() {
        assert_eq!(normalize_summary("a b c d", 3), "a b");
        assert_eq!(normalize_summary("\n\n  x \n y", 100), "x y");
    }
}
