//! Prefixed chat text → `Command`.

use jukebox_proto::protocol::Command;

/// Parse `text` as a command.  `None` when it lacks the prefix or names no
/// known command.  `caller_channel` is used for `join`.
pub fn parse_chat_command(text: &str, prefix: &str, caller_channel: &str) -> Option<Command> {
    let body = text.trim().strip_prefix(prefix)?;
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    let command = match name.to_lowercase().as_str() {
        "join" | "j" => Command::Join {
            channel: caller_channel.to_string(),
        },
        "leave" | "l" => Command::Leave,
        "play" | "p" => Command::Play { query: arg? },
        "play_artist" | "pa" => Command::PlayArtist { artist: arg? },
        "show_playlist" | "pl" => Command::ShowPlaylist,
        "skip" | "s" => Command::Skip { arg },
        "help" | "h" => Command::Help,
        _ => return None,
    };
    Some(command)
}

pub fn help_text(prefix: &str) -> String {
    let p = prefix;
    format!(
        "**{p}play, {p}p** - Search tracks and albums by name\n\
         **{p}play_artist, {p}pa** - Search an artist's albums\n\
         **{p}show_playlist, {p}pl** - Show the playback queue\n\
         **{p}skip, {p}s** - Skip the current track, the first N tracks ({p}s 3) or a range ({p}s 2-5)\n\
         **{p}join, {p}j** - Move the player to your channel\n\
         **{p}leave, {p}l** - Disconnect and clear the queue\n\
         **{p}help, {p}h** - Show this list"
    )
}
