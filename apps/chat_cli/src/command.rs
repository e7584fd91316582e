use client_core::PendingId;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Retry(PendingId),
    Online,
    Quit,
    Invalid(String),
}

pub fn parse(line: &str) -> Command {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };

    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit"), None) => Command::Quit,
        (Some("online"), None) => Command::Online,
        (Some("retry"), Some(id)) => match id.parse() {
            Ok(pending_id) => Command::Retry(pending_id),
            Err(_) => Command::Invalid(format!("not a message handle: {id}")),
        },
        _ => Command::Invalid(format!("unknown command: {trimmed}")),
    }
}
