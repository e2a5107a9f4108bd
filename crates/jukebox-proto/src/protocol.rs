use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check it on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames above this size are treated as corrupt.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Join { channel: String },
    Leave,
    Play { query: String },
    PlayArtist { artist: String },
    ShowPlaylist,
    /// `None` skips the current track, `"N"` drops the first N, `"A-B"` drops a range.
    Skip {
        #[serde(default)]
        arg: Option<String>,
    },
    Help,
    /// Free chat text.  Answers a pending choice list first, otherwise it is
    /// parsed as a prefixed command.  `channel` is where the text was typed.
    Say {
        text: String,
        #[serde(default)]
        channel: Option<String>,
    },
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: SessionSnapshot,
    },
    State {
        data: SessionSnapshot,
    },
    /// Chat-facing status text (choice lists, now playing, queue listings).
    Status {
        message: String,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Lifecycle of the playback session.
///
/// Transitions: Idle -> Playing -> Draining -> Idle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    /// A scheduler loop is draining the queue into the sink.
    Playing,
    /// The queue ran dry; storage is being cleared.
    Draining,
}

/// Display form of a queued track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
}

/// Full observable state of the session.  `rev` increases on every queue or
/// phase change so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub channel: Option<String>,
    pub phase: SessionPhase,
    /// The track handed to the sink, if any.  Always entry 1 of the playlist.
    pub now_playing: Option<TrackInfo>,
    /// Pending tracks after `now_playing`, in play order.
    pub upcoming: Vec<TrackInfo>,
    #[serde(default)]
    pub sink_streaming: bool,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_FRAME_LEN {
            anyhow::bail!("frame of {} bytes exceeds limit", json.len());
        }
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`.
    ///
    /// `Ok(None)` means more bytes are needed.  Errors mean the stream is
    /// corrupt and should be dropped.
    pub fn decode(data: &[u8]) -> anyhow::Result<Option<(Self, usize)>> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("frame header announces {} bytes", len);
        }
        if data.len() < 4 + len {
            return Ok(None);
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok(Some((msg, 4 + len)))
    }
}
