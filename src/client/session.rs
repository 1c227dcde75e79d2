// ABOUTME: Connection lifecycle for the client: connect, authenticate, reconnect
// ABOUTME: Binds the data and command sockets into one session under one username

use crate::client::{dispatcher::CommandProcessor, input};
use crate::connection::{Connection, FrameReader, FrameWriter};
use crate::datatypes::{roster, Attr, Token, Username};
use crate::screen::{ResponseOptions, Screen};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify};

/// Socket-level patience while connecting.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(6);

/// How many times to retry after a network loss, and the gap between tries.
const RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_GAP: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub cport: u16,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            host: "localhost".to_string(),
            port: crate::DEFAULT_PORT,
            cport: crate::DEFAULT_CPORT,
        }
    }
}

/// Client failures, each mapped to its process exit code.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to the server")]
    Connect(#[source] crate::Error),

    #[error("authentication failed")]
    Authenticate(#[source] crate::Error),

    #[error("reconnect attempts exhausted")]
    Reconnect(#[source] crate::Error),
}

impl ClientError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::Connect(_) => 1,
            ClientError::Authenticate(_) => 2,
            ClientError::Reconnect(_) => 3,
        }
    }
}

/// Flags shared by the session's tasks.
pub(crate) struct ClientState {
    pub admin: AtomicBool,
    /// An external command is in flight on the command socket.
    pub processing: AtomicBool,
    /// The user is leaving on purpose; suppresses the disconnect report.
    pub disconnecting: AtomicBool,
    /// Cleared by `/DC` and by a kick, so the client stays down.
    pub auto_reconnect: AtomicBool,
    username: Mutex<String>,
}

impl ClientState {
    fn new() -> ClientState {
        ClientState {
            admin: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            auto_reconnect: AtomicBool::new(true),
            username: Mutex::new(String::new()),
        }
    }

    pub fn username(&self) -> String {
        self.username.lock().unwrap().clone()
    }

    fn set_username(&self, name: &str) {
        *self.username.lock().unwrap() = name.to_string();
    }
}

/// One-shot latch that winds a session's tasks down together.
pub(crate) struct Gate {
    notify: Notify,
    closed: AtomicBool,
}

impl Gate {
    pub fn new() -> Gate {
        Gate {
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn trigger(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.notify.notified();
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// The two split sockets of an authenticated session.
pub(crate) struct Session {
    pub data_reader: FrameReader<OwnedReadHalf>,
    pub data_writer: Arc<AsyncMutex<FrameWriter<OwnedWriteHalf>>>,
    pub cmd_reader: FrameReader<OwnedReadHalf>,
    pub cmd_writer: Arc<AsyncMutex<FrameWriter<OwnedWriteHalf>>>,
}

pub struct Client<S: Screen> {
    config: ClientConfig,
    screen: Arc<S>,
    state: Arc<ClientState>,
}

impl<S: Screen> Client<S> {
    pub fn new(config: ClientConfig, screen: Arc<S>) -> Client<S> {
        Client {
            config,
            screen,
            state: Arc::new(ClientState::new()),
        }
    }

    /// Connect, then authenticate and serve sessions until the user leaves
    /// for good. A plain network loss reconnects; a deliberate disconnect
    /// does not.
    pub async fn run(&self) -> Result<(), ClientError> {
        let mut data = self.connect().await.map_err(ClientError::Connect)?;

        loop {
            let session = match self.authenticate(data).await {
                Ok(session) => session,
                Err(e) => return Err(ClientError::Authenticate(e)),
            };

            self.run_session(session).await;

            if self.state.disconnecting.load(Ordering::SeqCst) {
                self.state.auto_reconnect.store(false, Ordering::SeqCst);
            }
            if !self.state.auto_reconnect.load(Ordering::SeqCst) {
                break;
            }
            self.screen.clear();
            data = self.reconnect().await.map_err(ClientError::Reconnect)?;
        }
        Ok(())
    }

    async fn connect(&self) -> crate::Result<Connection> {
        self.screen.add("connecting...", Attr::NOTICE);
        self.screen.display(false);
        let addr = format!("{}:{}", self.config.host, self.config.port);
        match connect_with_timeout(&addr).await {
            Ok(conn) => {
                self.screen
                    .add(&format!("successfully connected to {addr}"), Attr::SUCCESS);
                self.screen.display(true);
                Ok(conn)
            }
            Err(e) => {
                self.screen
                    .add(&format!("Err.3 - could not connect to {addr}"), Attr::ALERT);
                self.screen.display(true);
                Err(e)
            }
        }
    }

    async fn reconnect(&self) -> crate::Result<Connection> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let mut last_err: crate::Error = "no reconnect attempt was made".into();
        for test in 0..RECONNECT_ATTEMPTS {
            self.screen.add("attempting to reconnect...", Attr::NOTICE);
            self.screen
                .set_prompt(&format!("Test [{}/{RECONNECT_ATTEMPTS}] . . . ", test + 1));
            self.screen.display(true);
            match connect_with_timeout(&addr).await {
                Ok(conn) => {
                    self.screen
                        .add(&format!("successfully reconnected to {addr}"), Attr::SUCCESS);
                    self.screen.display(true);
                    return Ok(conn);
                }
                Err(e) => {
                    self.screen
                        .add(&format!("Err.3 - could not reconnect to {addr}"), Attr::ALERT);
                    self.screen.add("", Attr::STANDARD);
                    last_err = e;
                    tokio::time::sleep(RECONNECT_GAP).await;
                }
            }
        }
        Err(last_err)
    }

    /// The four-stage handshake. Every message received is answered with a
    /// PASS/FAIL so both ends stay on the same stage; any other outcome is
    /// fatal.
    async fn authenticate(&self, mut data: Connection) -> crate::Result<Session> {
        // STAGE 1) welcome msg
        if let Err(e) = self.stage_welcome(&mut data).await {
            self.screen
                .add("Authentication Error - Stage 1 <welcome msg>", Attr::ALERT);
            let _ = data.send_token(Token::Fail).await;
            return Err(e);
        }

        // STAGE 2) choose a username
        let username = match self.stage_username(&mut data).await {
            Ok(name) => name,
            Err(e) => {
                self.screen
                    .add("Authentication Error - Stage 2 <username>", Attr::ALERT);
                return Err(e);
            }
        };

        // STAGE 3) setup cmd connection
        let cmd = match self.stage_command_socket(&mut data, &username).await {
            Ok(cmd) => cmd,
            Err(e) => {
                self.screen
                    .add("Authentication Error - Stage 3 <cmd connection>", Attr::ALERT);
                return Err(e);
            }
        };

        // STAGE 4) gain access to server
        if let Err(e) = self.stage_status(&mut data).await {
            self.screen
                .add("Authentication Error - Stage 4 <server status>", Attr::ALERT);
            let _ = data.send_token(Token::Fail).await;
            return Err(e);
        }

        self.state.set_username(username.as_str());
        let (data_reader, data_writer) = data.into_split();
        let (cmd_reader, cmd_writer) = cmd.into_split();
        Ok(Session {
            data_reader,
            data_writer: Arc::new(AsyncMutex::new(data_writer)),
            cmd_reader,
            cmd_writer: Arc::new(AsyncMutex::new(cmd_writer)),
        })
    }

    async fn stage_welcome(&self, data: &mut Connection) -> crate::Result<()> {
        let frame = data.expect_frame().await?;
        self.screen.add(frame.as_text()?, frame.attr);
        self.screen.add("", Attr::STANDARD);
        self.screen.display(true);
        data.send_token(Token::Pass).await
    }

    async fn stage_username(&self, data: &mut Connection) -> crate::Result<Username> {
        let mut show_rules = true;
        loop {
            let frame = data.expect_frame().await?;
            let taken = roster::decode(&frame.payload)?;
            self.screen.add(
                &format!("Unavailable Names: [{}]\n", taken.join(", ")),
                Attr::CRITICAL,
            );

            let username = self.create_username(show_rules).await?;
            show_rules = false;

            data.send_text(username.as_str(), Attr::DYNAMIC).await?;
            self.screen.add("Waiting for approval...", Attr::HIGHLIGHT);
            self.screen.display(true);

            match data.expect_token().await? {
                Token::Pass => {
                    self.screen
                        .add("The server has approved your username!\n", Attr::SUCCESS);
                    self.screen.display(true);
                    self.screen.set_prompt(&format!("[{username}]: "));
                    return Ok(username);
                }
                Token::Fail => {
                    self.screen
                        .add("That username is taken! Please try again...\n", Attr::CRITICAL);
                    self.screen.display(true);
                    self.screen.clear();
                    // ask for another attempt
                    data.send_token(Token::Pass).await?;
                }
            }
        }
    }

    async fn create_username(&self, show_rules: bool) -> crate::Result<Username> {
        let title = "Create Username";
        self.screen.add(title, Attr::STANDARD);
        self.screen
            .add(&format!("{}\n", "-".repeat(title.len())), Attr::STANDARD);
        if show_rules {
            self.screen.add(
                "Name Rules : letters and numbers | [3-12] characters | no spaces | \
                 at least one letter | extra characters: _ .",
                Attr::HIGHLIGHT,
            );
        }

        let opts = ResponseOptions {
            timeout: Duration::from_secs(300),
            alert_time: Duration::ZERO,
            ..ResponseOptions::default()
        };
        loop {
            let name = self.screen.get_response("Enter a username: ", opts).await;
            if name.is_empty() {
                return Err("username entry timed out".into());
            }
            self.screen.add(&format!("> {name}"), Attr::STANDARD);
            self.screen.display(true);
            match Username::parse(&name) {
                Ok(username) => {
                    self.screen.add("Valid Name.", Attr::SUCCESS);
                    self.screen.add("", Attr::STANDARD);
                    self.screen.display(true);
                    return Ok(username);
                }
                Err(e) => {
                    self.screen.add(&format!("Invalid Name! <{e}>"), Attr::WARNING);
                    self.screen.display(true);
                }
            }
        }
    }

    async fn stage_command_socket(
        &self,
        data: &mut Connection,
        username: &Username,
    ) -> crate::Result<Connection> {
        self.screen
            .add("Setting up command connection...", Attr::HIGHLIGHT);
        self.screen.display(true);

        let addr = format!("{}:{}", self.config.host, self.config.cport);
        let mut cmd = connect_with_timeout(&addr).await?;
        self.screen.add(
            &format!("Successfully connected to CPort - {addr}\n"),
            Attr::SUCCESS,
        );
        self.screen.display(true);

        // tell the command acceptor which user this socket belongs to
        cmd.send_text(username.as_str(), Attr::DYNAMIC).await?;
        match cmd.expect_token().await? {
            Token::Pass => {
                self.screen.clear();
                // tell the server the cmd channel is wired up
                data.send_token(Token::Pass).await?;
                Ok(cmd)
            }
            Token::Fail => Err("PASS failed".into()),
        }
    }

    async fn stage_status(&self, data: &mut Connection) -> crate::Result<()> {
        let frame = data.expect_frame().await?;
        self.screen.add(frame.as_text()?, frame.attr);
        self.screen.display(true);
        data.send_token(Token::Pass).await
    }

    /// Serve one authenticated session: spawn the data receive loop and the
    /// command processor, then feed typed input until something closes the
    /// gate.
    async fn run_session(&self, session: Session) {
        let gate = Arc::new(Gate::new());

        let mut data_reader = session.data_reader;
        let recv_screen = self.screen.clone();
        let recv_gate = gate.clone();
        let recv = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = recv_gate.wait() => break,
                    read = data_reader.read_frame() => match read {
                        Ok(Some(frame)) => {
                            if let Ok(text) = frame.as_text() {
                                recv_screen.add(text, frame.attr);
                                recv_screen.display(true);
                            }
                        }
                        _ => {
                            recv_gate.trigger();
                            break;
                        }
                    }
                }
            }
        });

        let processor = CommandProcessor {
            state: self.state.clone(),
            screen: self.screen.clone(),
            cmd_writer: session.cmd_writer.clone(),
            gate: gate.clone(),
        };
        let commands = tokio::spawn(processor.run(session.cmd_reader));

        loop {
            tokio::select! {
                _ = gate.wait() => break,
                line = self.screen.next_input() => match line {
                    None => {
                        // interface closed by hand
                        self.state.disconnecting.store(true, Ordering::SeqCst);
                        gate.trigger();
                        break;
                    }
                    Some(line) => {
                        input::handle_input(
                            &self.state,
                            &*self.screen,
                            &session.cmd_writer,
                            &session.data_writer,
                            &gate,
                            &line,
                        )
                        .await;
                    }
                }
            }
        }

        gate.trigger();
        let _ = recv.await;
        let _ = commands.await;
    }
}

async fn connect_with_timeout(addr: &str) -> crate::Result<Connection> {
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(socket)) => Ok(Connection::new(socket)),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err("connection attempt timed out".into()),
    }
}
