// ABOUTME: Server half of the four-stage handshake that binds both sockets
// ABOUTME: Any framing error or unexpected token at any stage is fatal

use crate::connection::FrameReader;
use crate::datatypes::{roster, Attr, Token};
use crate::screen::Screen;
use crate::server::registry::{Registry, UserRecord};
use tokio::net::tcp::OwnedReadHalf;

/// Promote a freshly accepted data socket into an authenticated user.
///
/// The record is already in the registry (nameless and inactive); the
/// caller removes it when this fails. Returns the approved name.
///
/// Stages: welcome, username loop, command-socket bind (the CPORT acceptor
/// attaches the link while this side waits for the client's confirmation on
/// the data socket), then the status report.
pub(crate) async fn authorize<S: Screen>(
    registry: &Registry,
    user: &UserRecord,
    reader: &mut FrameReader<OwnedReadHalf>,
    screen: &S,
) -> crate::Result<String> {
    // Stage 1) welcome
    if let Err(e) = welcome(user, reader).await {
        screen.add("Authorization Error - Stage 1 <welcome msg>", Attr::ALERT);
        return Err(e);
    }

    // Stage 2) username loop
    let name = match approve_name(registry, user, reader).await {
        Ok(name) => name,
        Err(e) => {
            screen.add("Authorization Error - Stage 2 <username>", Attr::ALERT);
            return Err(e);
        }
    };

    // Stage 3) the client confirms its command socket is wired up
    if let Err(e) = expect_pass(reader).await {
        screen.add("Authorization Error - Stage 3 <cmd connection>", Attr::ALERT);
        return Err(e);
    }

    // Stage 4) status report
    if let Err(e) = report_status(registry, user, reader).await {
        screen.add("Authorization Error - Stage 4 <server status>", Attr::ALERT);
        return Err(e);
    }

    Ok(name)
}

async fn welcome(user: &UserRecord, reader: &mut FrameReader<OwnedReadHalf>) -> crate::Result<()> {
    user.data_writer
        .lock()
        .await
        .send_text("Welcome to the Courier Server!", Attr::SUCCESS)
        .await?;
    expect_pass(reader).await
}

async fn approve_name(
    registry: &Registry,
    user: &UserRecord,
    reader: &mut FrameReader<OwnedReadHalf>,
) -> crate::Result<String> {
    loop {
        let snapshot = registry.snapshot_names();
        user.data_writer
            .lock()
            .await
            .write_frame(&roster::encode(&snapshot), Attr::DYNAMIC)
            .await?;

        let frame = reader.expect_frame().await?;
        let candidate = frame.as_text()?.to_string();

        if registry.try_reserve(&candidate) {
            user.set_name(&candidate);
            user.data_writer.lock().await.send_token(Token::Pass).await?;
            return Ok(candidate);
        }

        user.data_writer.lock().await.send_token(Token::Fail).await?;
        // a PASS here means "let me try another name"
        expect_pass(reader).await?;
    }
}

async fn report_status(
    registry: &Registry,
    user: &UserRecord,
    reader: &mut FrameReader<OwnedReadHalf>,
) -> crate::Result<()> {
    // count includes this user, who is not active yet
    let status = format!(
        "Server Status: [{}/{}] active users",
        registry.count_active() + 1,
        registry.max_users
    );
    let msg =
        format!("{status}\nUse / to enter commands, // to create notes, /help for more info.\n");
    user.data_writer
        .lock()
        .await
        .send_text(&msg, Attr::HIGHLIGHT)
        .await?;
    expect_pass(reader).await
}

async fn expect_pass(reader: &mut FrameReader<OwnedReadHalf>) -> crate::Result<()> {
    match reader.expect_token().await? {
        Token::Pass => Ok(()),
        Token::Fail => Err("PASS failed".into()),
    }
}
