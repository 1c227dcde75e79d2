//! Integration tests driving a live server over loopback sockets.
//!
//! Each test binds both listeners on ephemeral ports and speaks the wire
//! protocol with raw [`Connection`]s, the way a scripted client would: the
//! four-stage handshake, command echoes with their PASS acknowledgements,
//! and the broadcast fan-out on the data socket.

use crate::connection::Connection;
use crate::datatypes::{roster, Attr, Color, Token};
use crate::frame::Frame;
use crate::screen::{ResponseOptions, Screen};
use crate::server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// A terminal that swallows everything; the server under test renders into
/// the void and every prompt times out immediately.
struct NullScreen;

impl Screen for NullScreen {
    fn add(&self, _text: &str, _attr: Attr) {}
    fn display(&self, _show_latest: bool) {}
    fn set_prompt(&self, _prompt: &str) {}
    fn prompt(&self) -> String {
        String::new()
    }
    fn set_prompt_color(&self, _color: Option<Color>) {}
    fn clear(&self) {}
    fn scrap(&self) {}
    fn show_recent(&self) {}
    fn quit(&self) {}
    async fn pause(&self) {}
    async fn get_response(&self, _prompt: &str, _opts: ResponseOptions) -> String {
        String::new()
    }
    async fn next_input(&self) -> Option<String> {
        std::future::pending().await
    }
}

struct TestServer {
    server: Server<NullScreen>,
    data_addr: SocketAddr,
    cmd_addr: SocketAddr,
    _downloads: tempfile::TempDir,
}

async fn start_server() -> TestServer {
    let downloads = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cport: 0,
        downloads: downloads.path().join("downloads"),
        poem: None,
        max_users: 10,
    };
    let server = Server::new(config, Arc::new(NullScreen));
    let (data_addr, cmd_addr) = server.start().await.unwrap();
    TestServer {
        server,
        data_addr,
        cmd_addr,
        _downloads: downloads,
    }
}

/// Poll a registry-side condition until it holds or the deadline lapses.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met in time");
}

async fn read_text(conn: &mut Connection) -> (String, Attr) {
    let frame = conn.expect_frame().await.unwrap();
    (frame.as_text().unwrap().to_string(), frame.attr)
}

/// Run the client side of the four-stage handshake and consume the join
/// announcement, returning the live data and command connections.
async fn join(ts: &TestServer, name: &str) -> (Connection, Connection) {
    let mut data = Connection::new(TcpStream::connect(ts.data_addr).await.unwrap());

    // Stage 1) welcome
    let welcome = data.expect_frame().await.unwrap();
    assert_eq!(welcome.attr, Attr::SUCCESS);
    data.send_token(Token::Pass).await.unwrap();

    // Stage 2) username
    let snapshot = data.expect_frame().await.unwrap();
    let taken = roster::decode(&snapshot.payload).unwrap();
    assert!(taken.contains(&crate::SERVER_NAME.to_string()));
    data.send_text(name, Attr::DYNAMIC).await.unwrap();
    assert_eq!(data.expect_token().await.unwrap(), Token::Pass);

    // Stage 3) bind the command socket
    let mut cmd = Connection::new(TcpStream::connect(ts.cmd_addr).await.unwrap());
    cmd.send_text(name, Attr::DYNAMIC).await.unwrap();
    assert_eq!(cmd.expect_token().await.unwrap(), Token::Pass);
    data.send_token(Token::Pass).await.unwrap();

    // Stage 4) status
    let status = data.expect_frame().await.unwrap();
    assert_eq!(status.attr, Attr::HIGHLIGHT);
    assert!(status.as_text().unwrap().starts_with("Server Status: ["));
    data.send_token(Token::Pass).await.unwrap();

    // the new user is announced to everyone, themselves included
    let (announcement, attr) = read_text(&mut data).await;
    assert_eq!(
        announcement,
        crate::announce(crate::SERVER_NAME, &format!("{name} has joined the server!"))
    );
    assert_eq!(attr, Attr::SUCCESS);

    (data, cmd)
}

/// Dispatch a command line the way the client does: send it, answer the
/// server's echo with PASS, and return the single textual reply.
async fn run_command(cmd: &mut Connection, line: &str) -> Frame {
    cmd.send_text(line, Attr::DYNAMIC).await.unwrap();
    let echo = cmd.expect_frame().await.unwrap();
    assert_eq!(echo.as_text().unwrap(), line);
    cmd.send_token(Token::Pass).await.unwrap();
    cmd.expect_frame().await.unwrap()
}

#[tokio::test]
async fn handshake_registers_exactly_one_active_user() {
    let ts = start_server().await;
    let (_data, _cmd) = join(&ts, "ALICE").await;

    let registry = ts.server.registry();
    assert_eq!(registry.count_active(), 1);
    assert!(registry.find_user("ALICE").is_some());
    // the name is reserved exactly once
    assert!(!registry.try_reserve("ALICE"));
}

#[tokio::test]
async fn failed_handshake_leaves_no_record_and_releases_the_name() {
    let ts = start_server().await;

    let mut data = Connection::new(TcpStream::connect(ts.data_addr).await.unwrap());
    let _welcome = data.expect_frame().await.unwrap();
    data.send_token(Token::Pass).await.unwrap();

    let _snapshot = data.expect_frame().await.unwrap();
    data.send_text("ALICE", Attr::DYNAMIC).await.unwrap();
    assert_eq!(data.expect_token().await.unwrap(), Token::Pass);

    // walk away mid-handshake; the reservation must not outlive us
    drop(data);

    let registry = ts.server.registry().clone();
    wait_until(move || {
        registry.is_empty()
            && !registry
                .snapshot_names()
                .contains(&"ALICE".to_string())
    })
    .await;
    assert_eq!(ts.server.registry().count_active(), 0);
}

#[tokio::test]
async fn taken_name_is_refused_until_a_fresh_one_is_offered() {
    let ts = start_server().await;
    let (_alice_data, _alice_cmd) = join(&ts, "ALICE").await;

    let mut data = Connection::new(TcpStream::connect(ts.data_addr).await.unwrap());
    let _welcome = data.expect_frame().await.unwrap();
    data.send_token(Token::Pass).await.unwrap();

    let snapshot = data.expect_frame().await.unwrap();
    assert!(roster::decode(&snapshot.payload)
        .unwrap()
        .contains(&"ALICE".to_string()));
    data.send_text("ALICE", Attr::DYNAMIC).await.unwrap();
    assert_eq!(data.expect_token().await.unwrap(), Token::Fail);

    // ask for another attempt; a fresh snapshot arrives
    data.send_token(Token::Pass).await.unwrap();
    let _snapshot = data.expect_frame().await.unwrap();
    data.send_text("BOB", Attr::DYNAMIC).await.unwrap();
    assert_eq!(data.expect_token().await.unwrap(), Token::Pass);

    let mut cmd = Connection::new(TcpStream::connect(ts.cmd_addr).await.unwrap());
    cmd.send_text("BOB", Attr::DYNAMIC).await.unwrap();
    assert_eq!(cmd.expect_token().await.unwrap(), Token::Pass);
    data.send_token(Token::Pass).await.unwrap();
    let _status = data.expect_frame().await.unwrap();
    data.send_token(Token::Pass).await.unwrap();

    let registry = ts.server.registry().clone();
    wait_until(move || registry.count_active() == 2).await;
    assert!(ts.server.registry().find_user("BOB").is_some());
}

#[tokio::test]
async fn list_reports_the_roster_with_the_dynamic_attr() {
    let ts = start_server().await;
    let (_data, mut cmd) = join(&ts, "ALICE").await;

    let reply = run_command(&mut cmd, "list").await;
    assert_eq!(
        reply.as_text().unwrap(),
        "There are currently [1/10] users online:\nALICE\n"
    );
    assert_eq!(reply.attr, Attr::DYNAMIC);
}

#[tokio::test]
async fn chat_is_broadcast_to_every_active_data_socket() {
    let ts = start_server().await;
    let (mut alice_data, _alice_cmd) = join(&ts, "ALICE").await;
    let (mut bob_data, _bob_cmd) = join(&ts, "BOB").await;

    // Alice hears Bob arrive before any chat
    let (arrival, _) = read_text(&mut alice_data).await;
    assert_eq!(
        arrival,
        crate::announce(crate::SERVER_NAME, "BOB has joined the server!")
    );

    // the client frames chat under the speaker's name before sending
    alice_data
        .send_text(&crate::announce("ALICE", "hello"), Attr::DYNAMIC)
        .await
        .unwrap();

    let (heard_by_bob, attr) = read_text(&mut bob_data).await;
    assert_eq!(heard_by_bob, "[ALICE]: hello");
    assert_eq!(attr, Attr::DYNAMIC);

    // the broadcast includes the speaker
    let (heard_by_alice, _) = read_text(&mut alice_data).await;
    assert_eq!(heard_by_alice, "[ALICE]: hello");
}

#[tokio::test]
async fn check_observes_the_other_users_command_mutex() {
    let ts = start_server().await;
    let (_alice_data, mut alice_cmd) = join(&ts, "ALICE").await;
    let (_bob_data, mut bob_cmd) = join(&ts, "BOB").await;

    let free = run_command(&mut bob_cmd, "check ALICE").await;
    assert_eq!(free.as_text().unwrap(), "ALICE is available.");

    // Open a command on Alice's socket but leave the echo unanswered: the
    // server acquires her mutex before echoing, and holds it until the
    // exchange ends.
    alice_cmd.send_text("list", Attr::DYNAMIC).await.unwrap();
    let echo = alice_cmd.expect_frame().await.unwrap();
    assert_eq!(echo.as_text().unwrap(), "list");

    let busy = run_command(&mut bob_cmd, "check ALICE").await;
    assert_eq!(
        busy.as_text().unwrap(),
        "ALICE is currently processing a command."
    );

    // finish Alice's exchange; the mutex is released with it
    alice_cmd.send_token(Token::Pass).await.unwrap();
    let _roster = alice_cmd.expect_frame().await.unwrap();
    let alice = ts.server.registry().find_user("ALICE").unwrap();
    wait_until(move || !alice.is_busy()).await;

    let free_again = run_command(&mut bob_cmd, "check ALICE").await;
    assert_eq!(free_again.as_text().unwrap(), "ALICE is available.");
}

#[tokio::test]
async fn tell_lands_on_the_target_data_socket_with_the_dim_attr() {
    let ts = start_server().await;
    let (_alice_data, mut alice_cmd) = join(&ts, "ALICE").await;
    let (mut bob_data, _bob_cmd) = join(&ts, "BOB").await;

    let reply = run_command(&mut alice_cmd, "tell BOB hi there").await;
    assert_eq!(reply.as_text().unwrap(), "Delivered to BOB.");

    let (message, attr) = read_text(&mut bob_data).await;
    assert_eq!(message, "From [ALICE]: hi there");
    assert_eq!(attr, Attr::DIM);
}

#[tokio::test]
async fn admin_elevation_reaches_the_target_command_socket() {
    let ts = start_server().await;
    let (_alice_data, mut alice_cmd) = join(&ts, "ALICE").await;
    let (_bob_data, mut bob_cmd) = join(&ts, "BOB").await;

    let reply = run_command(&mut alice_cmd, "admin BOB").await;
    assert_eq!(reply.as_text().unwrap(), "BOB was successfully made admin.");

    // Bob's dispatcher would flip its admin flag on this passive command
    let (passive, _) = read_text(&mut bob_cmd).await;
    assert_eq!(passive, "become_admin");
}

#[tokio::test]
async fn targeting_an_unknown_user_reports_it() {
    let ts = start_server().await;
    let (_data, mut cmd) = join(&ts, "ALICE").await;

    let reply = run_command(&mut cmd, "find NOBODY").await;
    assert_eq!(reply.as_text().unwrap(), "That user does not exist!");
}
