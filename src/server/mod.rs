// ABOUTME: The server: two listeners, per-user session tasks, console, shutdown
// ABOUTME: Data sockets carry chat fan-out; command sockets run the dispatcher

pub mod auth;
pub mod dispatcher;
pub mod registry;

pub use registry::{Registry, UserRecord};

use crate::commands::{self, name};
use crate::connection::{Connection, FrameReader, FrameWriter};
use crate::datatypes::{Attr, Token};
use crate::screen::Screen;
use crate::server::dispatcher::{spawn_kick, Dispatcher};
use crate::server::registry::{POLL_PERIOD, POLL_TIMEOUT};
use crate::verse::Verses;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cport: u16,
    pub downloads: PathBuf,
    pub poem: Option<PathBuf>,
    pub max_users: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: crate::DEFAULT_PORT,
            cport: crate::DEFAULT_CPORT,
            downloads: PathBuf::from("downloads"),
            poem: Some(PathBuf::from("resources/the_raven.txt")),
            max_users: crate::MAX_USERS,
        }
    }
}

/// Startup failures, each mapped to its process exit code.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Server socket could not bind to {addr}")]
    DataBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command socket could not bind to {addr}")]
    CommandBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not create DOWNLOAD FOLDER '{path}'")]
    Downloads {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ServeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ServeError::DataBind { .. } => 1,
            ServeError::CommandBind { .. } => 2,
            ServeError::Downloads { .. } => 3,
        }
    }
}

struct Shared<S: Screen> {
    config: ServerConfig,
    registry: Arc<Registry>,
    screen: Arc<S>,
    verses: Mutex<Arc<Verses>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

/// The chat and file relay server. Cheap to clone; every task holds one.
pub struct Server<S: Screen> {
    shared: Arc<Shared<S>>,
}

impl<S: Screen> Clone for Server<S> {
    fn clone(&self) -> Server<S> {
        Server {
            shared: self.shared.clone(),
        }
    }
}

impl<S: Screen> Server<S> {
    pub fn new(config: ServerConfig, screen: Arc<S>) -> Server<S> {
        let registry = Arc::new(Registry::new(config.max_users));
        Server {
            shared: Arc::new(Shared {
                config,
                registry,
                screen,
                verses: Mutex::new(Arc::new(Verses::default())),
                tasks: Mutex::new(Vec::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    fn screen(&self) -> &S {
        &self.shared.screen
    }

    /// Bind both listeners, prepare the download folder, and start
    /// accepting. Returns the bound addresses (useful when the configured
    /// ports are ephemeral).
    pub async fn start(&self) -> Result<(SocketAddr, SocketAddr), ServeError> {
        let config = &self.shared.config;

        if !config.downloads.is_dir() {
            match std::fs::create_dir_all(&config.downloads) {
                Ok(()) => {
                    self.screen().add(
                        &format!(
                            "Successfully created DOWNLOAD FOLDER: '{}'\n",
                            config.downloads.display()
                        ),
                        Attr::SUCCESS,
                    );
                }
                Err(source) => {
                    self.screen().add("Could not create DOWNLOAD FOLDER.", Attr::ALERT);
                    return Err(ServeError::Downloads {
                        path: config.downloads.display().to_string(),
                        source,
                    });
                }
            }
        }

        if let Some(path) = &config.poem {
            match Verses::load(path).await {
                Ok(verses) => *self.shared.verses.lock().unwrap() = Arc::new(verses),
                Err(e) => tracing::warn!("no poem at '{}': {e}", path.display()),
            }
        }

        let data_addr = format!("{}:{}", config.host, config.port);
        let data_listener = match TcpListener::bind(&data_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.screen().add(
                    &format!("Err.1 - Server socket could not bind to {data_addr}"),
                    Attr::ALERT,
                );
                return Err(ServeError::DataBind {
                    addr: data_addr,
                    source,
                });
            }
        };
        let bound_data = data_listener.local_addr().map_err(|source| ServeError::DataBind {
            addr: data_addr.clone(),
            source,
        })?;
        self.screen().add(
            &format!("Server socket successfully bound to {bound_data}"),
            Attr::SUCCESS,
        );

        let cmd_addr = format!("{}:{}", config.host, config.cport);
        let cmd_listener = match TcpListener::bind(&cmd_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.screen().add(
                    &format!("Err.2 - Command socket could not bind to {cmd_addr}"),
                    Attr::ALERT,
                );
                return Err(ServeError::CommandBind {
                    addr: cmd_addr,
                    source,
                });
            }
        };
        let bound_cmd = cmd_listener.local_addr().map_err(|source| ServeError::CommandBind {
            addr: cmd_addr.clone(),
            source,
        })?;
        self.screen().add(
            &format!("Command socket successfully bound to {bound_cmd}\n"),
            Attr::SUCCESS,
        );

        self.screen().add("Listening for connections...", Attr::STANDARD);
        self.screen().display(false);

        let mut tasks = self.shared.tasks.lock().unwrap();
        tasks.push(tokio::spawn(accept_data(self.clone(), data_listener)));
        tasks.push(tokio::spawn(accept_commands(self.clone(), cmd_listener)));

        Ok((bound_data, bound_cmd))
    }

    fn verses(&self) -> Arc<Verses> {
        self.shared.verses.lock().unwrap().clone()
    }

    /// Broadcast a message as the server, optionally echoing it locally.
    pub async fn server_broadcast(&self, msg: &str, attr: Attr, echo: bool) {
        let msg = crate::announce(crate::SERVER_NAME, msg);
        if echo {
            self.screen().add(&msg, attr);
            self.screen().display(true);
        }
        self.shared.registry.broadcast(msg.as_bytes(), attr).await;
    }

    /// Tear a user down and announce the departure exactly once.
    async fn remove_user(&self, user: &Arc<UserRecord>) {
        let name = user.name();
        let was_active = user.is_active();
        if self.shared.registry.remove(user) {
            if let (Some(name), true) = (name, was_active) {
                self.server_broadcast(&format!("{name} has left the server!"), Attr::ALERT, true)
                    .await;
            }
        }
    }

    /// Route one line typed into the server terminal: `//` notes, `/`
    /// commands, anything else is broadcast chat.
    pub async fn handle_console_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        if let Some(note) = line.strip_prefix("//") {
            self.screen().add(&format!("Note: {note}"), Attr::DIM);
        } else if let Some(cmd) = line.strip_prefix('/') {
            self.execute_command(cmd).await;
        } else {
            self.server_broadcast(line, Attr::SUCCESS, true).await;
        }
        self.screen().display(true);
    }

    /// The server console command set: the user-facing catalogue issued
    /// server-side, plus CLALL, RESERVE/RELEASE, SHOW/HIDE and QUIT.
    pub async fn execute_command(&self, cmd: &str) {
        self.screen().add(&format!("> /{cmd}"), Attr::STANDARD);
        let args = commands::parse_args(cmd, false);
        let Some(head) = args.first() else {
            self.screen().add("No command entered.", Attr::STANDARD);
            return;
        };

        match head.to_uppercase().as_str() {
            name::CLS => {
                self.screen().clear();
                self.screen().add("+++ Screen Clear +++", Attr::APPROVE);
            }

            "CLALL" => {
                self.erase_screens().await;
                self.server_broadcast("+++ Screen Clear +++", Attr::APPROVE, false).await;
                self.screen().add("Cleared all client screens!", Attr::STANDARD);
            }

            name::LIST => {
                let roster = self.shared.registry.list_users(true);
                self.screen().add(&roster, Attr::STANDARD);
            }

            "RESERVE" => match args.get(1) {
                Some(title) => {
                    let title = title.to_uppercase();
                    self.shared.registry.reserve(&title);
                    self.screen().add(&format!("{title} is now reserved."), Attr::STANDARD);
                }
                None => self.screen().add("User not entered.", Attr::STANDARD),
            },

            "RELEASE" => match args.get(1) {
                Some(title) => {
                    let title = title.to_uppercase();
                    self.shared.registry.release(&title);
                    self.screen().add(&format!("{title} is now available."), Attr::STANDARD);
                }
                None => self.screen().add("User not entered.", Attr::STANDARD),
            },

            // aliases for visibility
            "SHOW" => self.console_visibility(args.get(1), Some("1")).await,
            "HIDE" => self.console_visibility(args.get(1), Some("0")).await,
            name::VISIBILITY => {
                self.console_visibility(args.get(1), args.get(2).map(String::as_str)).await
            }

            n @ (name::FIND | name::TELL | name::CHECK | name::ADMIN | name::DEMOTE
            | name::KICK) => self.console_targeted(n, cmd, &args).await,

            "QUIT" | "END" => self.shutdown().await,

            _ => self.screen().add("Could not execute.", Attr::STANDARD),
        }
    }

    async fn console_targeted(&self, cmd_name: &str, cmd: &str, args: &[String]) {
        let Some(username) = args.get(1) else {
            self.screen().add("User not entered.", Attr::STANDARD);
            return;
        };
        let Some(target) = self.shared.registry.find_user(&username.to_uppercase()) else {
            self.screen().add("That user does not exist!", Attr::STANDARD);
            return;
        };
        let target_name = target.name().unwrap_or_default();

        match cmd_name {
            name::FIND => self.screen().add(&target.location(), Attr::STANDARD),

            name::CHECK => {
                if target.is_busy() {
                    self.screen().add(&format!("{target_name} is in a command."), Attr::STANDARD);
                } else {
                    self.screen().add(&format!("{target_name} is free."), Attr::STANDARD);
                }
            }

            name::KICK => {
                let mut msg =
                    format!("[{}]: You are being kicked from the server", crate::SERVER_NAME);
                match args.get(2).and_then(|a| commands::tail_from(cmd, a)) {
                    Some(reason) => msg.push_str(&format!(": {reason}")),
                    None => msg.push('.'),
                }
                spawn_kick(target, msg);
            }

            // the rest wait for the target to come free first
            _ => {
                let saved = self.screen().prompt();
                self.screen()
                    .set_prompt(&format!("[<15s] Waiting for {target_name}... "));
                self.screen().display(true);
                let free = self
                    .shared
                    .registry
                    .poll_activity(&target, POLL_PERIOD, POLL_TIMEOUT)
                    .await;
                self.screen().set_prompt(&saved);
                if !free {
                    self.screen().add("That user is busy right now...", Attr::STANDARD);
                    return;
                }

                match cmd_name {
                    name::TELL => {
                        let Some(body) = args.get(2).and_then(|a| commands::tail_from(cmd, a))
                        else {
                            self.screen().add("Message not entered!", Attr::STANDARD);
                            return;
                        };
                        let msg =
                            format!("From {}", crate::announce(crate::SERVER_NAME, body));
                        let mut writer = target.data_writer.lock().await;
                        if writer.send_text(&msg, Attr::DIM).await.is_ok() {
                            self.screen().add(
                                &format!("Delivered message to {target_name}."),
                                Attr::STANDARD,
                            );
                        }
                    }
                    name::ADMIN => {
                        if self.send_passive(&target, "become_admin").await {
                            self.screen()
                                .add(&format!("{target_name} was made admin."), Attr::STANDARD);
                        }
                    }
                    name::DEMOTE => {
                        if self.send_passive(&target, "get_demoted").await {
                            self.screen()
                                .add(&format!("{target_name} was demoted."), Attr::STANDARD);
                        }
                    }
                    _ => unreachable!("console_targeted only dispatches its own commands"),
                }
            }
        }
    }

    async fn send_passive(&self, target: &UserRecord, command: &str) -> bool {
        let Some(link) = target.command_link() else {
            return false;
        };
        link.writer
            .lock()
            .await
            .send_text(command, Attr::DYNAMIC)
            .await
            .is_ok()
    }

    /// Console visibility toggle. Unlike user lookups, the console sees
    /// hidden users, so SHOW can actually reveal one.
    async fn console_visibility(&self, username: Option<&String>, state: Option<&str>) {
        let Some(username) = username else {
            self.screen().add("User not entered.", Attr::STANDARD);
            return;
        };
        let Some(target) = self.shared.registry.find_named(&username.to_uppercase()) else {
            self.screen().add("That user does not exist!", Attr::STANDARD);
            return;
        };
        let target_name = target.name().unwrap_or_default();

        let hide = match state.map(str::to_lowercase).as_deref() {
            Some("0") | Some("off") => true,
            Some("1") | Some("on") => false,
            _ => {
                self.screen().add("Invalid state. 0=OFF, 1=ON", Attr::STANDARD);
                return;
            }
        };

        let mut output = format!("{target_name} ");
        if hide {
            if target.is_hidden() {
                output.push_str("is already hidden.");
            } else {
                self.shared.registry.set_hidden(&target, true);
                output.push_str("was made invisible.");
                let msg = "Your presence has been made private! Users cannot target you.";
                let mut writer = target.data_writer.lock().await;
                let _ = writer
                    .send_text(&crate::announce(crate::SERVER_NAME, msg), Attr::HIGHLIGHT)
                    .await;
            }
        } else if target.is_hidden() {
            self.shared.registry.set_hidden(&target, false);
            output.push_str("was made visible.");
            let msg = "Your presence has been made public! Users may target you.";
            let mut writer = target.data_writer.lock().await;
            let _ = writer
                .send_text(&crate::announce(crate::SERVER_NAME, msg), Attr::HIGHLIGHT)
                .await;
        } else {
            output.push_str("is already visible.");
        }
        self.screen().add(&output, Attr::STANDARD);
    }

    /// Clear every free client's screen by sending `cls` down their
    /// command socket, under their command mutex.
    async fn erase_screens(&self) {
        for user in self.shared.registry.users() {
            if !user.is_active() {
                continue;
            }
            if self
                .shared
                .registry
                .poll_activity(&user, POLL_PERIOD, POLL_TIMEOUT)
                .await
            {
                let _guard = user.busy.lock().await;
                self.send_passive(&user, "cls").await;
            }
        }
    }

    /// Orderly shutdown: stop accepting, close every user, wait for the
    /// registry to drain, purge the download folder.
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.server_broadcast("Shutting Down Server...", Attr::SUCCESS, true).await;

        for task in self.shared.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        for user in self.shared.registry.users() {
            user.close();
        }

        let mut waited = Duration::ZERO;
        while !self.shared.registry.is_empty() {
            tokio::time::sleep(POLL_PERIOD).await;
            waited += POLL_PERIOD;
            if waited >= Duration::from_secs(15) {
                self.screen()
                    .add("Quit Error - not all clients cleared in time.", Attr::ALERT);
                break;
            }
        }

        self.screen().add("The Server has been terminated.\n", Attr::HIGHLIGHT);
        self.clear_downloads();
        self.screen().quit();
    }

    /// Delete staged transfer files left in the download folder.
    fn clear_downloads(&self) {
        let Ok(entries) = std::fs::read_dir(&self.shared.config.downloads) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if let Err(e) = std::fs::remove_file(&path) {
                self.screen()
                    .add(&format!("Could not remove: '{}'", path.display()), Attr::CRITICAL);
                tracing::debug!("download purge: {e}");
            }
        }
    }
}

async fn accept_data<S: Screen>(server: Server<S>, listener: TcpListener) {
    loop {
        let Ok((socket, addr)) = listener.accept().await else {
            break;
        };
        server
            .screen()
            .add(&format!("received connection from {addr}"), Attr::HIGHLIGHT);
        server.screen().display(false);
        tokio::spawn(handle_data(server.clone(), socket, addr));
    }
}

/// One user's data-socket session: authenticate, then fan their chat out
/// until the socket dies or the user is closed.
async fn handle_data<S: Screen>(server: Server<S>, socket: TcpStream, addr: SocketAddr) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half);
    let writer = Arc::new(AsyncMutex::new(FrameWriter::new(write_half)));
    let user = Arc::new(UserRecord::new(addr, writer));
    server.shared.registry.insert(user.clone());

    let registry = server.shared.registry.clone();
    let session = async {
        match auth::authorize(&registry, &user, &mut reader, &*server.shared.screen).await {
            Ok(name) => {
                user.set_active(true);
                server
                    .server_broadcast(&format!("{name} has joined the server!"), Attr::SUCCESS, true)
                    .await;
                loop {
                    match reader.read_frame().await {
                        Ok(Some(frame)) => {
                            registry.broadcast(&frame.payload, frame.attr).await;
                        }
                        _ => break,
                    }
                }
            }
            Err(e) => {
                tracing::debug!("authorization failed for {addr}: {e}");
            }
        }
    };

    tokio::select! {
        _ = session => {}
        _ = user.closed() => {}
    }
    server.remove_user(&user).await;
}

async fn accept_commands<S: Screen>(server: Server<S>, listener: TcpListener) {
    loop {
        let Ok((socket, addr)) = listener.accept().await else {
            break;
        };
        server
            .screen()
            .add(&format!("incoming CPort connection from {addr}"), Attr::HIGHLIGHT);
        server.screen().display(true);
        tokio::spawn(attach_command(server.clone(), socket, addr));
    }
}

/// Match an inbound command socket to the user who announced its name, then
/// run the dispatcher on it.
async fn attach_command<S: Screen>(server: Server<S>, socket: TcpStream, addr: SocketAddr) {
    let mut conn = Connection::new(socket);
    let name = match conn.expect_frame().await.and_then(|f| Ok(f.as_text()?.to_string())) {
        Ok(name) => name,
        Err(e) => {
            server.screen().add(
                &format!("Unexpected cmd connection - {}:{}", addr.ip(), addr.port()),
                Attr::ALERT,
            );
            tracing::debug!("command attach failed: {e}");
            return;
        }
    };

    let Some(user) = server.shared.registry.find_named(&name) else {
        let _ = conn.send_token(Token::Fail).await;
        tracing::debug!("no user is waiting on a command socket as '{name}'");
        return;
    };

    let (reader, writer) = conn.into_split();
    let writer = Arc::new(AsyncMutex::new(writer));
    user.attach_command(writer.clone(), addr);
    if writer.lock().await.send_token(Token::Pass).await.is_err() {
        return;
    }

    let dispatcher = Dispatcher {
        registry: server.shared.registry.clone(),
        user: user.clone(),
        verses: server.verses(),
        downloads: server.shared.config.downloads.clone(),
    };
    tokio::select! {
        _ = dispatcher.run(reader) => {}
        _ = user.closed() => {}
    }
    server.remove_user(&user).await;
}
