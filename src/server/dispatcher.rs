// ABOUTME: Per-user command loop on the server side of the command socket
// ABOUTME: Holds the user's command mutex for the whole of each exchange

use crate::commands::{self, name};
use crate::connection::FrameReader;
use crate::datatypes::{Attr, Token};
use crate::files;
use crate::server::registry::{CommandLink, Registry, UserRecord, POLL_PERIOD};
use crate::verse::Verses;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;

/// Patience when elevating or demoting a user.
const PRIVILEGE_POLL: Duration = Duration::from_secs(5);

/// Initial patience before offering a file to its target.
const OFFER_POLL: Duration = Duration::from_secs(15);

/// Patience after the sender asks to keep waiting.
const OFFER_POLL_RETRY: Duration = Duration::from_secs(30);

pub(crate) struct Dispatcher {
    pub registry: Arc<Registry>,
    pub user: Arc<UserRecord>,
    pub verses: Arc<Verses>,
    pub downloads: PathBuf,
}

impl Dispatcher {
    /// Read commands off this user's command socket until it dies.
    ///
    /// Non-passive commands are echoed back to the client, which answers
    /// PASS before the exchange proper. Passive commands arriving here are
    /// client echoes; all of them are no-ops except `receive`, which runs
    /// the target half of a file transfer.
    pub(crate) async fn run(self, mut reader: FrameReader<OwnedReadHalf>) {
        loop {
            let frame = match reader.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!(user = ?self.user.name(), "command socket closed: {e}");
                    return;
                }
            };

            // exchange starts; nothing else may talk to this user until it ends
            let _busy = self.user.busy.lock().await;

            let Ok(cmd) = frame.as_text().map(str::to_string) else {
                return;
            };
            let args = commands::parse_args(&cmd, false);
            let Some(head) = args.first() else { continue };
            let cmd_name = head.to_uppercase();
            let Some(link) = self.user.command_link() else {
                return;
            };

            if !commands::is_passive(&cmd_name) {
                // echo so the client dispatcher picks the command up
                if let Err(e) = link
                    .writer
                    .lock()
                    .await
                    .write_frame(&frame.payload, frame.attr)
                    .await
                {
                    tracing::debug!("command echo failed: {e}");
                    return;
                }
                match reader.expect_token().await {
                    Ok(Token::Pass) => {}
                    _ => continue, // client refused the command
                }
            }

            tracing::debug!(user = ?self.user.name(), "command: /{cmd}");

            let outcome = match cmd_name.as_str() {
                name::LIST => self.list(&link).await,
                name::FIND | name::TELL | name::CHECK | name::ADMIN | name::DEMOTE
                | name::KICK => self.targeted(&cmd_name, &cmd, &args, &link).await,
                name::VISIBILITY => self.visibility(&args, &link).await,
                name::SEND => self.send_file(&args, &link, &mut reader).await,
                name::RECEIVE => self.receive_file(&args, &link, &mut reader).await,
                // remaining passives take effect on the client side only
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                tracing::debug!(user = ?self.user.name(), "command /{cmd} aborted: {e}");
            }
        }
    }

    async fn reply(&self, link: &CommandLink, msg: &str, attr: Attr) -> crate::Result<()> {
        link.writer.lock().await.send_text(msg, attr).await
    }

    async fn list(&self, link: &CommandLink) -> crate::Result<()> {
        let roster = self.registry.list_users(false);
        self.reply(link, &roster, Attr::DYNAMIC).await
    }

    /// The single-target commands: FIND, TELL, CHECK, ADMIN, DEMOTE, KICK.
    async fn targeted(
        &self,
        cmd_name: &str,
        cmd: &str,
        args: &[String],
        link: &CommandLink,
    ) -> crate::Result<()> {
        let target = args
            .get(1)
            .map(|a| a.to_uppercase())
            .and_then(|name| self.registry.find_user(&name));
        let Some(target) = target else {
            return self.reply(link, "That user does not exist!", Attr::DYNAMIC).await;
        };
        let is_self = target.name() == self.user.name();

        let output = match cmd_name {
            name::FIND => target.location(),

            name::TELL => {
                if is_self {
                    "Stop talking to yourself!".to_string()
                } else {
                    let Some(body) = args.get(2).and_then(|a| commands::tail_from(cmd, a)) else {
                        return self.reply(link, "Message not entered!", Attr::DYNAMIC).await;
                    };
                    let caller = self.user.name().unwrap_or_default();
                    let msg = format!("From {}", crate::announce(&caller, body));
                    target
                        .data_writer
                        .lock()
                        .await
                        .send_text(&msg, Attr::DIM)
                        .await?;
                    format!("Delivered to {}.", target.name().unwrap_or_default())
                }
            }

            name::CHECK => {
                if is_self {
                    "You are currently occupied with yourself.".to_string()
                } else if target.is_busy() {
                    format!(
                        "{} is currently processing a command.",
                        target.name().unwrap_or_default()
                    )
                } else {
                    format!("{} is available.", target.name().unwrap_or_default())
                }
            }

            name::ADMIN => {
                if is_self {
                    "You are already an admin!".to_string()
                } else if self
                    .registry
                    .poll_activity(&target, POLL_PERIOD, PRIVILEGE_POLL)
                    .await
                {
                    self.send_passive(&target, "become_admin").await?;
                    format!(
                        "{} was successfully made admin.",
                        target.name().unwrap_or_default()
                    )
                } else {
                    "That user is busy right now...".to_string()
                }
            }

            name::DEMOTE => {
                if is_self {
                    // the demotion rides the same socket as the reply
                    self.reply(link, "You threw away your rights...", Attr::DYNAMIC)
                        .await?;
                    return self.reply(link, "get_demoted", Attr::DYNAMIC).await;
                } else if self
                    .registry
                    .poll_activity(&target, POLL_PERIOD, PRIVILEGE_POLL)
                    .await
                {
                    self.send_passive(&target, "get_demoted").await?;
                    format!(
                        "{} was successfully demoted.",
                        target.name().unwrap_or_default()
                    )
                } else {
                    "That user is busy right now...".to_string()
                }
            }

            name::KICK => {
                if is_self {
                    return self.reply(link, "You cannot kick yourself!", Attr::DYNAMIC).await;
                }
                let mut msg =
                    format!("[{}]: You are being kicked from the server", crate::SERVER_NAME);
                match args.get(2).and_then(|a| commands::tail_from(cmd, a)) {
                    Some(reason) => msg.push_str(&format!(": {reason}")),
                    None => msg.push('.'),
                }
                spawn_kick(target.clone(), msg);
                format!(
                    "You have requested to kick {} from the server.",
                    target.name().unwrap_or_default()
                )
            }

            _ => unreachable!("targeted() only dispatches its own commands"),
        };

        self.reply(link, &output, Attr::DYNAMIC).await
    }

    async fn send_passive(&self, target: &UserRecord, command: &str) -> crate::Result<()> {
        let Some(link) = target.command_link() else {
            return Err("target has no command socket".into());
        };
        link.writer.lock().await.send_text(command, Attr::DYNAMIC).await
    }

    async fn visibility(&self, args: &[String], link: &CommandLink) -> crate::Result<()> {
        let Some(state) = args.get(1).and_then(|a| a.parse::<i32>().ok()) else {
            tracing::debug!("received invalid visibility state");
            return Ok(());
        };

        if state != 0 {
            if !self.user.is_hidden() {
                self.reply(link, "We can already see you!", Attr::DYNAMIC).await
            } else {
                self.registry.set_hidden(&self.user, false);
                self.reply(link, "You revealed yourself back to the server.", Attr::DYNAMIC)
                    .await
            }
        } else if self.user.is_hidden() {
            // already in the dark; answer with flavour
            let output = match self.verses.random_stanza() {
                Some(stanza) => {
                    let mut text = String::from("\n");
                    for line in stanza.lines() {
                        text.push('\t');
                        text.push_str(line);
                        text.push('\n');
                    }
                    text
                }
                None => "You cannot descend any deeper into the shroud of darkness \
                         that plagues the world above you..."
                    .to_string(),
            };
            self.reply(link, &output, Attr::DIM).await
        } else {
            self.registry.set_hidden(&self.user, true);
            self.reply(link, "You were made hidden from the server.", Attr::DYNAMIC)
                .await
        }
    }

    /// Server half of SEND: stage the sender's upload, then offer it to the
    /// target once the target's command mutex comes free.
    async fn send_file(
        &self,
        args: &[String],
        link: &CommandLink,
        reader: &mut FrameReader<OwnedReadHalf>,
    ) -> crate::Result<()> {
        let target = args
            .get(1)
            .map(|a| a.to_uppercase())
            .and_then(|name| self.registry.find_user(&name))
            .filter(|t| t.name() != self.user.name());
        let Some(target) = target else {
            return self.send_token(link, Token::Fail).await;
        };
        self.send_token(link, Token::Pass).await?;

        // the sender reports the (possibly zipped) final name
        let frame = reader.expect_frame().await?;
        let filename = frame.as_text()?.to_string();
        if filename.is_empty() {
            // sender-side zip failure
            return Ok(());
        }

        let staging = match files::create_unique_file(&self.downloads, &filename) {
            Ok((_, path)) => {
                self.send_token(link, Token::Pass).await?;
                path
            }
            Err(e) => {
                tracing::warn!("could not stage '{filename}': {e}");
                return self.send_token(link, Token::Fail).await;
            }
        };

        let mut staged = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&staging)
            .await?;
        match reader.read_file(&mut staged, |_, _| {}).await {
            Ok(size) => {
                tracing::debug!("staged '{}' ({size} bytes)", staging.display());
                self.send_token(link, Token::Pass).await?;
            }
            Err(e) => {
                tracing::warn!("upload of '{filename}' failed: {e}");
                return self.send_token(link, Token::Fail).await;
            }
        }
        drop(staged);

        // the sender acknowledges the confirmation before the offer stage
        let _ = reader.expect_frame().await?;

        let mut patience = OFFER_POLL;
        loop {
            if self.registry.poll_activity(&target, POLL_PERIOD, patience).await {
                let offer = format!(
                    "receive {} \"{}\" \"{}\"",
                    self.user.name().unwrap_or_default(),
                    filename,
                    staging.display()
                );
                if let Err(e) = self.send_passive(&target, &offer).await {
                    tracing::warn!("file offer was not delivered: {e}");
                }
                return self.send_token(link, Token::Pass).await;
            }

            // target is busy; ask the sender whether to keep waiting
            self.send_token(link, Token::Fail).await?;
            match reader.expect_token().await {
                Ok(Token::Pass) => patience = OFFER_POLL_RETRY,
                _ => return Ok(()),
            }
        }
    }

    /// Server half of RECEIVE, running in the target's dispatcher once the
    /// target echoes the offer back. Uploads the staged file on acceptance
    /// and unlinks the staging copy either way.
    async fn receive_file(
        &self,
        args: &[String],
        link: &CommandLink,
        reader: &mut FrameReader<OwnedReadHalf>,
    ) -> crate::Result<()> {
        let Some(path) = args.get(3).map(|a| a.trim_matches('"').to_string()) else {
            return Ok(());
        };

        if let Ok(Token::Pass) = reader.expect_token().await {
            match tokio::fs::File::open(&path).await {
                Ok(mut staged) => {
                    let size = staged.metadata().await?.len();
                    let mut writer = link.writer.lock().await;
                    if let Err(e) = writer.write_file(&mut staged, size, |_, _| {}).await {
                        tracing::warn!("upload to target failed: {e}");
                    }
                }
                Err(e) => {
                    tracing::warn!("could not open staged file '{path}': {e}");
                    link.writer.lock().await.abort_file().await?;
                }
            }
        }

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::debug!("could not remove staged file '{path}': {e}");
        }
        Ok(())
    }

    async fn send_token(&self, link: &CommandLink, token: Token) -> crate::Result<()> {
        link.writer.lock().await.send_token(token).await
    }
}

/// Kick runs in the background: it blocks on the target's command mutex
/// (however long that takes), delivers the kick, and releases.
pub(crate) fn spawn_kick(target: Arc<UserRecord>, msg: String) {
    tokio::spawn(async move {
        let _guard = target.busy.lock().await;
        if let Some(link) = target.command_link() {
            let kick = format!("get_kicked {msg}");
            if let Err(e) = link.writer.lock().await.send_text(&kick, Attr::DYNAMIC).await {
                tracing::debug!("kick delivery failed: {e}");
            }
        }
    });
}
