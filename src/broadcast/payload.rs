//! Outbound payload rendering.
//!
//! Each sibling gets the same text rendered per its connection's layout
//! hint: a rich embed by default, a compact single line when the connection
//! opted in. The attachment URL is resolved once by the service and shared
//! by every rendering.

use crate::db::ConnectionRecord;
use crate::transport::{AuthorSnapshot, EmbedPayload, WebhookPayload};

/// Render the outbound payload for one sibling.
pub fn render(
    author: &AuthorSnapshot,
    content: &str,
    attachment_url: Option<&str>,
    hub_name: &str,
    connection: &ConnectionRecord,
) -> WebhookPayload {
    if connection.compact {
        let mut line = content.to_string();
        if let Some(url) = attachment_url {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(url);
        }
        WebhookPayload {
            username: author.display_name.clone(),
            avatar_url: author.avatar_url.clone(),
            content: line,
            embed: None,
        }
    } else {
        WebhookPayload {
            username: author.display_name.clone(),
            avatar_url: author.avatar_url.clone(),
            content: String::new(),
            embed: Some(EmbedPayload {
                description: content.to_string(),
                color: connection.embed_color.map(|c| c as u32),
                image_url: attachment_url.map(str::to_string),
                footer: Some(hub_name.to_string()),
            }),
        }
    }
}

/// Resolve an attachment to one stable URL reused across all siblings.
///
/// Platform CDN links carry expiring signature parameters; stripping the
/// query yields the durable form. Done once per source message, never per
/// sibling.
pub fn resolve_attachment(attachment_url: Option<&str>) -> Option<String> {
    attachment_url.map(|url| match url.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> AuthorSnapshot {
        AuthorSnapshot {
            id: "u1".into(),
            display_name: "Case".into(),
            avatar_url: Some("https://cdn.example/a.png".into()),
            is_bot: false,
        }
    }

    fn connection(compact: bool) -> ConnectionRecord {
        ConnectionRecord {
            id: "conn-1".into(),
            channel_id: "ch-2".into(),
            server_id: "s-2".into(),
            hub_id: "hub-1".into(),
            connected: true,
            webhook_url: "https://hooks.example/1".into(),
            compact,
            embed_color: Some(0x00AA_FF),
            invite: None,
            last_active: 0,
        }
    }

    #[test]
    fn embed_rendering_carries_color_and_footer() {
        let payload = render(&author(), "hello", None, "Gaming", &connection(false));
        let embed = payload.embed.unwrap();
        assert_eq!(embed.description, "hello");
        assert_eq!(embed.color, Some(0x00AA_FF));
        assert_eq!(embed.footer.as_deref(), Some("Gaming"));
        assert_eq!(payload.username, "Case");
    }

    #[test]
    fn compact_rendering_appends_attachment() {
        let payload = render(
            &author(),
            "look",
            Some("https://cdn.example/cat.png"),
            "Gaming",
            &connection(true),
        );
        assert!(payload.embed.is_none());
        assert_eq!(payload.content, "look https://cdn.example/cat.png");
    }

    #[test]
    fn attachment_resolution_strips_expiring_signatures() {
        assert_eq!(
            resolve_attachment(Some("https://cdn.example/cat.png?ex=abc&sig=def")).as_deref(),
            Some("https://cdn.example/cat.png")
        );
        assert_eq!(resolve_attachment(None), None);
    }
}
