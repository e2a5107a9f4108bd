/// DaemonCore: single event loop that turns client commands into session work.
///
/// The socket server and HTTP API send `DaemonEvent`s here.  Each command runs
/// in its own task so a choice list waiting for a reply never blocks the loop;
/// free chat text is routed to that waiter before it is parsed as a command.
use std::sync::Arc;
use std::time::Duration;

use jukebox_proto::config::Config;
use jukebox_proto::protocol::Command;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::acquisition::{Acquisition, SearchKind};
use crate::catalog::HttpCatalog;
use crate::chat::ChatChannel;
use crate::commands::{help_text, parse_chat_command};
use crate::error::Result;
use crate::fetcher::HttpFetcher;
use crate::session::Session;
use crate::sink::MpvSink;
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a chat client or the HTTP API.
    ClientCommand(Command),
    /// Shutdown requested.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    config: Config,
    session: Arc<Session>,
    acquisition: Arc<Acquisition>,
    chat: Arc<ChatChannel>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl DaemonCore {
    pub fn new(config: Config, broadcast_tx: broadcast::Sender<BroadcastMessage>) -> anyhow::Result<Self> {
        let chat = Arc::new(ChatChannel::new(broadcast_tx.clone()));
        let sink = Arc::new(MpvSink::new(config.mpv.default_volume));
        let session_id = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let session = Arc::new(Session::new(
            &session_id,
            &config.paths.media_dir,
            sink,
            chat.clone(),
            Duration::from_millis(config.session.poll_interval_ms),
            broadcast_tx.clone(),
        ));
        let acquisition = Arc::new(Acquisition::new(
            Arc::new(HttpCatalog::new(&config.catalog)?),
            Arc::new(HttpFetcher::new(&config.catalog)?),
            config.catalog.search_limit,
            Duration::from_secs(config.session.selection_timeout_secs),
        ));
        info!(
            "DaemonCore: session {} stores media in {}",
            session_id,
            session.storage().dir().display()
        );
        Ok(Self::with_parts(config, session, acquisition, chat, broadcast_tx))
    }

    pub fn with_parts(
        config: Config,
        session: Arc<Session>,
        acquisition: Arc<Acquisition>,
        chat: Arc<ChatChannel>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            config,
            session,
            acquisition,
            chat,
            broadcast_tx,
        }
    }

    /// Borrow the session (for the socket and HTTP servers).
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// Run the core event loop.  Returns on `Shutdown` or when every sender
    /// is gone.
    pub async fn run(self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");
        loop {
            match event_rx.recv().await {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }
                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }
                Some(DaemonEvent::ClientCommand(cmd)) => self.handle_command(cmd).await,
            }
        }
        self.session.close().await;
        Ok(())
    }

    async fn handle_command(&self, cmd: Command) {
        debug!("DaemonCore: {:?}", cmd);
        match cmd {
            Command::Say { text, channel } => {
                // An open choice list takes the text first.  A command runs
                // either way, so typing one abandons the list.
                let answered = self.chat.deliver(&text).await;
                let caller = match channel {
                    Some(channel) => channel,
                    None => self.current_channel().await,
                };
                match parse_chat_command(&text, &self.config.session.command_prefix, &caller) {
                    Some(cmd) => self.dispatch(cmd, caller),
                    None if answered => {}
                    None => debug!("DaemonCore: ignoring chat text '{}'", text),
                }
            }
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            cmd => {
                let caller = self.current_channel().await;
                self.dispatch(cmd, caller);
            }
        }
    }

    /// Where playback commands without an explicit channel go.
    async fn current_channel(&self) -> String {
        match self.session.channel().await {
            Some(channel) => channel,
            None => self.config.session.default_channel.clone(),
        }
    }

    fn dispatch(&self, cmd: Command, caller: String) {
        let session = self.session.clone();
        let acquisition = self.acquisition.clone();
        let prefix = self.config.session.command_prefix.clone();
        tokio::spawn(async move {
            if let Err(e) = execute(&session, &acquisition, &prefix, cmd, &caller).await {
                error!("DaemonCore: command failed: {}", e);
                session.chat().say(e.user_message()).await;
            }
        });
    }
}

async fn execute(
    session: &Session,
    acquisition: &Acquisition,
    prefix: &str,
    cmd: Command,
    caller: &str,
) -> Result<()> {
    match cmd {
        Command::Join { channel } => session.join(&channel).await,
        Command::Leave => session.leave().await,
        Command::Play { query } => {
            session.silent_join(caller).await?;
            acquisition.run(session, &query, SearchKind::Find).await;
            Ok(())
        }
        Command::PlayArtist { artist } => {
            session.silent_join(caller).await?;
            acquisition.run(session, &artist, SearchKind::Artist).await;
            Ok(())
        }
        Command::ShowPlaylist => {
            session.show_playlist().await;
            Ok(())
        }
        Command::Skip { arg } => session.skip(arg.as_deref()).await,
        Command::Help => {
            session.chat().say(help_text(prefix)).await;
            Ok(())
        }
        // Handled before dispatch.
        Command::Say { .. } | Command::GetState => Ok(()),
    }
}
