//! collab-follow: read-only follower for a collaborative document.
//!
//! Connects to a collaboration endpoint, prints the document after every
//! change and logs who is editing where. Set `RUST_LOG=info` (or `debug`)
//! for connection and sync details.

use std::time::Duration;

use apihub_collab::{
    CollabError, CollabEvent, CollabSession, ConnectionParams, CursorChange, EventKind,
    ReconnectPolicy, SessionConfig, TextWidget,
};
use clap::Parser;
use log::{error, info};

#[derive(Parser)]
#[command(name = "collab-follow")]
#[command(about = "Follow a collaborative document from the terminal", long_about = None)]
struct Cli {
    /// WebSocket endpoint, e.g. ws://127.0.0.1:9090/collab
    url: String,

    /// Document to join
    #[arg(short, long)]
    document: Option<String>,

    /// Bearer token sent on every connect
    #[arg(short, long)]
    token: Option<String>,

    /// Delay before reconnecting after an abnormal close
    #[arg(long, default_value_t = 3000)]
    reconnect_ms: u64,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        let mut params = ConnectionParams::new(self.url.clone());
        if let Some(document) = &self.document {
            params = params.with_document(document.clone());
        }
        if let Some(token) = &self.token {
            params = params.with_token(token.clone());
        }
        let mut config = SessionConfig::new(params);
        config.reconnect = ReconnectPolicy::new(Duration::from_millis(self.reconnect_ms));
        config
    }
}

/// Widget that echoes the whole document to stdout on every change.
#[derive(Default)]
struct FollowWidget {
    text: String,
}

impl TextWidget for FollowWidget {
    fn text(&self) -> String {
        self.text.clone()
    }

    fn set_text(&mut self, text: &str) {
        if self.text == text {
            return;
        }
        self.text = text.to_owned();
        println!("----- {} chars -----", self.text.chars().count());
        println!("{}", self.text);
    }

    fn render_cursor(&mut self, change: &CursorChange) {
        if let Some(cursor) = change.cursor {
            info!(
                "{} at {}..{}",
                change.display_name, cursor.position, cursor.selection_end
            );
        }
    }

    fn remove_cursor(&mut self, session_id: &str) {
        info!("Session {session_id} left");
    }

    fn clear_history(&mut self) {}

    // Followers never edit.
    fn set_read_only(&mut self, _read_only: bool) {}
}

async fn run(cli: Cli) -> Result<(), CollabError> {
    let config = cli.session_config();
    info!("Following {}", config.params.label());

    let (mut session, handle) = CollabSession::new(config, FollowWidget::default());
    session.on(EventKind::ConnectionChanged, |event| {
        if let CollabEvent::ConnectionChanged(state) = event {
            info!("Connection: {state:?}");
        }
    });
    session.on(EventKind::Error, |event| {
        if let CollabEvent::Error(fault) = event {
            error!("Out of sync: {}", fault.error);
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing");
            let _ = handle.shutdown().await;
        }
    });

    session.run().await
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("collab-follow failed: {e}");
        std::process::exit(1);
    }
}
