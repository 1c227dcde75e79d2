// ABOUTME: Client half of the command socket: answers echoes, runs exchanges
// ABOUTME: Includes the sender and receiver sides of the file-transfer choreography

use crate::client::input;
use crate::client::session::{ClientState, Gate};
use crate::commands::{self, name};
use crate::connection::{FrameReader, FrameWriter};
use crate::datatypes::{Attr, Color, Token};
use crate::files;
use crate::frame::Frame;
use crate::screen::{ResponseOptions, Screen};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex as AsyncMutex;

/// Patience for the accept/decline prompt on an incoming file.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(15);

/// Patience for the keep-waiting prompt while the target is busy.
const RETRY_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct CommandProcessor<S: Screen> {
    pub state: Arc<ClientState>,
    pub screen: Arc<S>,
    pub cmd_writer: Arc<AsyncMutex<FrameWriter<OwnedWriteHalf>>>,
    pub gate: Arc<Gate>,
}

impl<S: Screen> CommandProcessor<S> {
    /// Read commands off the command socket until the session ends.
    ///
    /// Commands this user initiated come back as server echoes and are
    /// answered with PASS before their exchange runs. Passive commands
    /// arrive unannounced from another user's exchange; they are echoed to
    /// the server (which ignores all but `receive`) and acted on locally.
    pub(crate) async fn run(self, mut reader: FrameReader<OwnedReadHalf>) {
        loop {
            self.state.processing.store(false, Ordering::SeqCst);
            let frame = tokio::select! {
                _ = self.gate.wait() => return,
                read = reader.read_frame() => match read {
                    Ok(Some(frame)) => frame,
                    _ => {
                        if !self.state.disconnecting.load(Ordering::SeqCst) {
                            self.screen
                                .add("You were disconnected from the server...", Attr::ALERT);
                            self.screen.display(true);
                        }
                        self.gate.trigger();
                        return;
                    }
                }
            };
            self.state.processing.store(true, Ordering::SeqCst);

            let Ok(cmd) = frame.as_text().map(str::to_string) else {
                continue;
            };
            let args = commands::parse_args(&cmd, false);
            let Some(head) = args.first() else { continue };
            let cmd_name = head.to_uppercase();

            if commands::lookup(&cmd_name).is_some_and(|spec| spec.internal) {
                input::execute_internal(&cmd_name, &args, &*self.screen);
                continue;
            }

            if !commands::is_passive(&cmd_name) {
                // tell the server it can begin the command process
                if self.send_token(Token::Pass).await.is_err() {
                    continue;
                }
            } else {
                // initiate the corresponding server-side procedure
                if self.echo(&frame).await.is_err() {
                    continue;
                }
            }

            match cmd_name.as_str() {
                // one textual reply, rendered as-is
                name::LIST | name::FIND | name::TELL | name::CHECK | name::VISIBILITY
                | name::ADMIN | name::DEMOTE | name::KICK => match reader.expect_frame().await {
                    Ok(reply) => {
                        if let Ok(text) = reply.as_text() {
                            self.screen.add(text, reply.attr);
                        }
                    }
                    Err(e) => tracing::debug!("command reply lost: {e}"),
                },

                name::BECOME_ADMIN => {
                    if !self.state.admin.swap(true, Ordering::SeqCst) {
                        self.screen.add(
                            &crate::announce(
                                crate::SERVER_NAME,
                                "You have been granted special privileges!",
                            ),
                            Attr::HIGHLIGHT,
                        );
                    } else {
                        tracing::debug!("already an admin");
                    }
                }

                name::GET_DEMOTED => {
                    if self.state.admin.swap(false, Ordering::SeqCst) {
                        self.screen.add(
                            &crate::announce(
                                crate::SERVER_NAME,
                                "Your special privileges have been withdrawn!",
                            ),
                            Attr::HIGHLIGHT,
                        );
                    } else {
                        tracing::debug!("no rights to lose");
                    }
                }

                name::GET_KICKED => {
                    self.state.auto_reconnect.store(false, Ordering::SeqCst);
                    if let Some(report) = args.get(1).and_then(|a| commands::tail_from(&cmd, a)) {
                        self.screen.add(report, Attr::HIGHLIGHT);
                    }
                    self.screen
                        .add("You were disconnected from the server...", Attr::ALERT);
                    self.screen.display(true);
                    self.gate.trigger();
                    return;
                }

                name::SEND => self.send_file(&args, &mut reader).await,

                name::RECEIVE => self.receive_file(&args, &mut reader).await,

                _ => {}
            }
            self.screen.display(true);
        }
    }

    async fn send_token(&self, token: Token) -> crate::Result<()> {
        self.cmd_writer.lock().await.send_token(token).await
    }

    async fn echo(&self, frame: &Frame) -> crate::Result<()> {
        self.cmd_writer
            .lock()
            .await
            .write_frame(&frame.payload, frame.attr)
            .await
    }

    /// Sender half of SEND: zip if needed, upload to the server's staging
    /// area, then wait for the offer to reach the target.
    async fn send_file(&self, args: &[String], reader: &mut FrameReader<OwnedReadHalf>) {
        // the server confirms the target exists
        match reader.expect_token().await {
            Ok(Token::Pass) => {}
            Ok(Token::Fail) => {
                self.screen.add(
                    &format!(
                        "Could not find target user: '{}'",
                        args.get(1).map(String::as_str).unwrap_or_default()
                    ),
                    Attr::STANDARD,
                );
                return;
            }
            Err(e) => {
                self.screen.add(&e.to_string(), Attr::ALERT);
                return;
            }
        }

        let path_list: Vec<PathBuf> = args
            .iter()
            .skip(2)
            .map(|a| PathBuf::from(a.trim_matches('"')))
            .collect();
        let Some(first) = path_list.first().cloned() else {
            // nothing to upload after all; an empty name aborts server-side
            let _ = self.send_name("").await;
            return;
        };

        // a directory or several paths travel as one archive
        let zipped = path_list.len() > 1 || first.is_dir();
        let (path, zip_path) = if zipped {
            let location = first.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
            let targets = path_list.clone();
            let made =
                tokio::task::spawn_blocking(move || files::create_zip(&targets, &location)).await;
            match made {
                Ok(Ok(archive)) => (archive.clone(), Some(archive)),
                Ok(Err(e)) => {
                    self.screen
                        .add(&format!("Zip Error - {e}"), Attr::CRITICAL);
                    (PathBuf::new(), None)
                }
                Err(e) => {
                    self.screen
                        .add(&format!("Zip Error - {e}"), Attr::CRITICAL);
                    (PathBuf::new(), None)
                }
            }
        } else {
            (first, None)
        };

        // report the (possibly updated) name; empty means the zip failed
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.send_name(&filename).await.is_err() || filename.is_empty() {
            return;
        }

        let mut error = false;
        match reader.expect_token().await {
            Ok(Token::Pass) => {}
            Ok(Token::Fail) => {
                self.screen
                    .add("Server not able to access download path.", Attr::CRITICAL);
                error = true;
            }
            Err(e) => {
                self.screen.add(&e.to_string(), Attr::ALERT);
                error = true;
            }
        }

        if !error {
            self.screen
                .add("Uploading file to server...", Attr::SCAFFOLDING);
            self.screen.display(true);
            if self.upload_with_progress(&path).await.is_err() {
                error = true;
            }
        }

        // the temp archive has served its purpose either way
        if let Some(zip) = &zip_path {
            if let Err(e) = std::fs::remove_file(zip) {
                tracing::debug!("could not remove temporary zip '{}': {e}", zip.display());
            }
        }
        if error {
            return;
        }

        match reader.expect_token().await {
            Ok(Token::Pass) => {
                self.screen.add(
                    &format!("Successfully uploaded {filename} to the server!"),
                    Attr::SUCCESS,
                );
                self.screen.scrap();
            }
            Ok(Token::Fail) => {
                self.screen.add("Upload failed!\n", Attr::ALERT);
                self.screen.scrap();
                return;
            }
            Err(e) => {
                self.screen.add(&e.to_string(), Attr::ALERT);
                return;
            }
        }

        // acknowledge, then wait for the offer to land
        if self.send_token(Token::Pass).await.is_err() {
            return;
        }
        let target = args
            .get(1)
            .map(|a| a.to_uppercase())
            .unwrap_or_default();
        loop {
            self.screen.add("Sending file request...", Attr::SCAFFOLDING);
            self.screen.display(true);
            match reader.expect_token().await {
                Ok(Token::Pass) => {
                    self.screen
                        .add(&format!("{target} has received your offer."), Attr::SUCCESS);
                    self.screen.show_recent();
                    self.screen.scrap();
                    return;
                }
                Ok(Token::Fail) => {
                    self.screen.add(
                        &format!("{target} is busy and cannot receive your file request."),
                        Attr::CRITICAL,
                    );
                    self.screen.show_recent();
                    self.screen.scrap();
                    let keep = self
                        .screen
                        .get_binary_response(
                            "Continue Waiting? [Yes/No]: ",
                            ResponseOptions {
                                timeout: RETRY_TIMEOUT,
                                ..ResponseOptions::binary()
                            },
                        )
                        .await;
                    if keep {
                        if self.send_token(Token::Pass).await.is_err() {
                            return;
                        }
                    } else {
                        self.screen.add("Send cancelled.", Attr::ALERT);
                        let _ = self.send_token(Token::Fail).await;
                        return;
                    }
                }
                Err(e) => {
                    self.screen.add(&e.to_string(), Attr::ALERT);
                    return;
                }
            }
        }
    }

    async fn send_name(&self, filename: &str) -> crate::Result<()> {
        self.cmd_writer
            .lock()
            .await
            .send_text(filename, Attr::DYNAMIC)
            .await
    }

    async fn upload_with_progress(&self, path: &Path) -> crate::Result<()> {
        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                self.screen.add(
                    &format!("Upload File Error - could not open: '{}'", path.display()),
                    Attr::ALERT,
                );
                // fail the matching download cleanly
                self.cmd_writer.lock().await.abort_file().await?;
                return Err(e.into());
            }
        };
        let size = file.metadata().await?.len();

        let saved = self.screen.prompt();
        let screen = &self.screen;
        let result = {
            let mut writer = self.cmd_writer.lock().await;
            writer
                .write_file(&mut file, size, |sent, total| {
                    let pct = (sent as f64 / total as f64 * 100.0) as u64;
                    screen.set_prompt(&format!("Uploading... [{pct}%] | "));
                    screen.display(false);
                })
                .await
        };

        match &result {
            Ok(()) => {
                self.screen.set_prompt("Upload Complete! | ");
                self.screen.display(false);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(_) => {
                self.screen
                    .add("Upload File Error - connection aborted!", Attr::ALERT);
            }
        }
        self.screen.set_prompt(&saved);
        self.screen.display(false);
        result
    }

    /// Receiver half of SEND: accept or decline, pick a destination, and
    /// download. A fresh `.zip` is unpacked next to itself, best effort.
    async fn receive_file(&self, args: &[String], reader: &mut FrameReader<OwnedReadHalf>) {
        let sender = args.get(1).map(String::as_str).unwrap_or_default();
        let filename = args
            .get(2)
            .map(|a| a.trim_matches('"').to_string())
            .unwrap_or_default();

        self.screen.add(
            &format!("Incoming file from {sender}: '{filename}'"),
            Attr::CRITICAL,
        );
        self.screen.display(true);

        // read with the plain response primitive and folded by hand; a
        // timeout declines, same as an invalid answer
        let answer = self
            .screen
            .get_response(
                "Accept and Download File? [Yes/No]: ",
                ResponseOptions {
                    timeout: ACCEPT_TIMEOUT,
                    color: Some(Color::Success),
                    ..ResponseOptions::default()
                },
            )
            .await;
        let accept = match answer.trim().to_lowercase().as_str() {
            "yes" | "y" => {
                self.screen.add("File Accepted.", Attr::SUCCESS);
                self.screen.display(true);
                true
            }
            "no" | "n" => {
                self.screen.add("File Declined.", Attr::ALERT);
                false
            }
            _ => {
                if answer.is_empty() {
                    self.screen.add("Timed out!", Attr::HIGHLIGHT);
                } else {
                    self.screen.add("Invalid response!", Attr::STANDARD);
                }
                self.screen.add("Download aborted...", Attr::ALERT);
                false
            }
        };
        if !accept {
            let _ = self.send_token(Token::Fail).await;
            return;
        }

        self.screen.add(
            "Enter a destination path for the file - type * to use current directory.",
            Attr::STANDARD,
        );
        self.screen.display(true);
        let destination = self
            .screen
            .get_response("Destination Folder: ", ResponseOptions::default())
            .await
            .trim()
            .to_string();
        if destination.is_empty() {
            self.screen.add("Timed out!", Attr::HIGHLIGHT);
            self.screen.add("Download aborted...", Attr::ALERT);
            let _ = self.send_token(Token::Fail).await;
            return;
        }

        let dest = if destination == "*" {
            match std::env::current_dir() {
                Ok(dir) => dir,
                Err(e) => {
                    tracing::debug!("no current directory: {e}");
                    let _ = self.send_token(Token::Fail).await;
                    return;
                }
            }
        } else {
            let dir = PathBuf::from(&destination);
            if !dir.is_dir() {
                if let Err(e) = std::fs::create_dir_all(&dir) {
                    self.screen
                        .add("Could not locate or create path!", Attr::CRITICAL);
                    tracing::debug!("destination '{destination}': {e}");
                    self.screen.add("Download aborted...", Attr::ALERT);
                    let _ = self.send_token(Token::Fail).await;
                    return;
                }
            }
            dir
        };

        // an empty file reserves the (possibly suffixed) name
        let (final_name, path) = match files::create_unique_file(&dest, &filename) {
            Ok(created) => created,
            Err(e) => {
                self.screen.add(
                    &format!("Create File Error - could not create: '{filename}'"),
                    Attr::CRITICAL,
                );
                tracing::debug!("create failed: {e}");
                let _ = self.send_token(Token::Fail).await;
                return;
            }
        };
        if self.send_token(Token::Pass).await.is_err() {
            return;
        }

        self.screen
            .add("Please do not disconnect from the server.", Attr::CRITICAL);
        self.screen
            .add(&format!("Downloading - '{final_name}'"), Attr::HIGHLIGHT);
        self.screen.display(true);

        let Ok(mut file) = tokio::fs::OpenOptions::new().write(true).open(&path).await else {
            self.screen.add("Download Failed!", Attr::ALERT);
            return;
        };

        let saved = self.screen.prompt();
        let screen = &self.screen;
        let result = reader
            .read_file(&mut file, |done, total| {
                let pct = (done as f64 / total as f64 * 100.0) as u64;
                screen.set_prompt(&format!("Downloading... [{pct}%] | "));
                screen.display(false);
            })
            .await;
        match &result {
            Ok(_) => {
                self.screen.set_prompt("Download Complete! | ");
                self.screen.display(false);
                tokio::time::sleep(Duration::from_secs(1)).await;
                self.screen.set_prompt(&saved);
                self.screen.add("Download Complete!", Attr::SUCCESS);
            }
            Err(e) => {
                self.screen.set_prompt(&saved);
                self.screen.add("Download Failed!", Attr::ALERT);
                tracing::debug!("download failed: {e}");
            }
        }
        self.screen.display(false);

        if result.is_ok() && final_name.to_lowercase().ends_with(".zip") {
            let archive = path.clone();
            let into = dest.clone();
            let extracted =
                tokio::task::spawn_blocking(move || files::extract_zip(&archive, &into, true))
                    .await;
            let failed: Option<crate::Error> = match extracted {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(e) => Some(e.into()),
            };
            if let Some(e) = failed {
                self.screen.add(
                    &format!("Extract Error - could not unzip: '{}'", path.display()),
                    Attr::CRITICAL,
                );
                tracing::debug!("extract failed: {e}");
            }
        }
    }
}
