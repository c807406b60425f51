use std::path::PathBuf;

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    /// Send a file, with optional caption.
    File { path: PathBuf, caption: String },
    /// Feed text to the typing indicator without sending.
    Typing(String),
    DeleteForMe(usize),
    DeleteForEveryone(usize),
    MarkSeen,
    Foreground(bool),
    /// Block (`true`) or unblock the partner.
    Block(bool),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  <text>                send a message
  /file <path> [text]   send a file with an optional caption
  /typing <text>        update the typing indicator only
  /delete <n>           hide message n for yourself
  /delete-all <n>       delete your message n for everyone
  /seen                 mark partner messages as seen
  /away | /back         toggle presence
  /block | /unblock     block or unblock your partner
  /quit";

pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(Command::Send(line.to_string())));
    }

    let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let command = match name {
        "/file" => {
            let (path, caption) = rest.split_once(' ').unwrap_or((rest, ""));
            if path.is_empty() {
                return Err("usage: /file <path> [text]".into());
            }
            Command::File {
                path: PathBuf::from(path),
                caption: caption.trim().to_string(),
            }
        }
        "/typing" => Command::Typing(rest.to_string()),
        "/delete" => Command::DeleteForMe(index(rest)?),
        "/delete-all" => Command::DeleteForEveryone(index(rest)?),
        "/seen" => Command::MarkSeen,
        "/away" => Command::Foreground(false),
        "/back" => Command::Foreground(true),
        "/block" => Command::Block(true),
        "/unblock" => Command::Block(false),
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => return Err(format!("unknown command {}", other)),
    };
    Ok(Some(command))
}

fn index(raw: &str) -> Result<usize, String> {
    raw.parse()
        .map_err(|_| format!("expected a message number, got {:?}", raw))
}

/// Best guess at a MIME type from the file extension. Unknown types are
/// left empty for the engine to default.
pub fn guess_mime(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("zip") => "application/zip",
        _ => "",
    }
}
