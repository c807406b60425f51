use duet_types::events::ConversationView;

/// Plain-text rendering of a view for the terminal.
pub fn render(view: &ConversationView, self_id: &str, partner_id: &str) -> String {
    let mut out = String::new();

    let presence = if view.partner_presence.is_online {
        "online".to_string()
    } else {
        match view.partner_presence.last_seen {
            Some(at) => format!("last seen {}", at.format("%Y-%m-%d %H:%M")),
            None => "offline".to_string(),
        }
    };
    out.push_str(&format!("-- {} ({})", partner_id, presence));
    if view.block.viewer_blocked {
        out.push_str(", you are blocked");
    } else if view.block.partner_blocked {
        out.push_str(", blocked");
    }
    out.push('\n');

    if view.messages.is_empty() {
        out.push_str("   (no messages)\n");
    }
    for visible in &view.messages {
        let m = &visible.message;
        let who = if m.sender_id == self_id { "you" } else { partner_id };
        let mut line = format!("[{}] {} {}:", visible.index, m.created_at.format("%H:%M"), who);
        if let Some(text) = &m.text {
            line.push(' ');
            line.push_str(text);
        }
        if let Some(a) = &m.attachment {
            line.push_str(&format!(" <{} {}B {}>", a.name, a.size, a.url));
        }
        if m.sender_id == self_id && m.is_seen_by(partner_id) {
            line.push_str(" (seen)");
        }
        out.push_str(&line);
        out.push('\n');
    }

    if view.partner_typing {
        out.push_str(&format!("   {} is typing...\n", partner_id));
    }
    out
}
