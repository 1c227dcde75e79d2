// ABOUTME: Validates and routes everything typed into the client input box
// ABOUTME: Notes stay local, commands are vetted before sending, chat is framed

use crate::client::session::{ClientState, Gate};
use crate::commands::{self, name, CommandSpec};
use crate::connection::FrameWriter;
use crate::datatypes::Attr;
use crate::screen::Screen;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

type SharedWriter = Arc<AsyncMutex<FrameWriter<OwnedWriteHalf>>>;

/// Handle one line of ordinary input.
///
/// `//` makes a local note, `/` starts a command, anything else is chat
/// sent to the data socket under the user's name. Argument and permission
/// errors are reported locally; nothing reaches the wire for them.
pub(crate) async fn handle_input<S: Screen>(
    state: &ClientState,
    screen: &S,
    cmd_writer: &SharedWriter,
    data_writer: &SharedWriter,
    gate: &Gate,
    line: &str,
) {
    if line.is_empty() {
        return;
    }

    if let Some(note) = line.strip_prefix("//") {
        screen.add(&format!("Note: {note}"), Attr::DIM);
        screen.display(true);
        return;
    }

    if let Some(cmd) = line.strip_prefix('/') {
        handle_command(state, screen, cmd_writer, gate, cmd).await;
        screen.display(true);
        return;
    }

    // regular chat
    let msg = crate::announce(&state.username(), line);
    if let Err(e) = data_writer
        .lock()
        .await
        .send_text(&msg, Attr::DYNAMIC)
        .await
    {
        tracing::debug!("chat delivery failed: {e}");
    }
}

async fn handle_command<S: Screen>(
    state: &ClientState,
    screen: &S,
    cmd_writer: &SharedWriter,
    gate: &Gate,
    cmd: &str,
) {
    screen.add(&format!("> /{cmd}"), Attr::STANDARD);
    let args = commands::parse_args(cmd, false);
    let Some(head) = args.first() else {
        screen.add("No command entered.", Attr::STANDARD);
        return;
    };
    let cmd_name = head.to_uppercase();

    let spec = commands::lookup(&cmd_name).filter(|spec| !spec.passive);
    let Some(spec) = spec else {
        screen.add(
            &format!("'{head}' is not a recognized command!"),
            Attr::STANDARD,
        );
        return;
    };

    if spec.restricted && !state.admin.load(Ordering::SeqCst) {
        screen.add(
            "You do not have permission to use that command!",
            Attr::ALERT,
        );
        return;
    }

    if spec.internal {
        execute_internal(&cmd_name, &args, screen);
        return;
    }

    // external commands need the command socket to themselves
    if state.processing.load(Ordering::SeqCst) {
        screen.add(
            "You are already processing an external command!",
            Attr::CRITICAL,
        );
        return;
    }

    match cmd_name.as_str() {
        name::LIST => send_command(screen, cmd_writer, cmd).await,

        name::DC => {
            state.disconnecting.store(true, Ordering::SeqCst);
            gate.trigger();
            screen.add("Successfully disconnected from the server.", Attr::SUCCESS);
            screen.quit();
        }

        name::FIND | name::TELL | name::CHECK | name::ADMIN | name::DEMOTE | name::KICK => {
            if args.get(1).is_none() {
                screen.add("User not specified!", Attr::STANDARD);
                return;
            }
            if cmd_name == name::TELL && args.get(2).is_none() {
                screen.add("Message not entered!", Attr::STANDARD);
                return;
            }
            send_command(screen, cmd_writer, cmd).await;
        }

        name::VISIBILITY => {
            let Some(state_arg) = args.get(1) else {
                screen.add("State not specified!", Attr::STANDARD);
                return;
            };
            let value = match state_arg.to_lowercase().as_str() {
                "0" | "off" => 0,
                "1" | "on" => 1,
                _ => {
                    screen.add(
                        &format!("'{state_arg}' is not a valid state!"),
                        Attr::STANDARD,
                    );
                    return;
                }
            };
            send_command(screen, cmd_writer, &format!("{} {value}", name::VISIBILITY)).await;
        }

        name::SEND => {
            let Some(username) = args.get(1) else {
                screen.add("User not specified!", Attr::STANDARD);
                return;
            };
            if username.to_uppercase() == state.username() {
                screen.add("You cannot send to yourself!", Attr::STANDARD);
                return;
            }
            let paths: Vec<&str> = args[2..].iter().map(|a| a.trim_matches('"')).collect();
            if paths.is_empty() {
                screen.add("File path not specified.", Attr::STANDARD);
                return;
            }
            for path in &paths {
                if !Path::new(path).exists() {
                    screen.add(
                        &format!("Could not find the specified file: '{path}'"),
                        Attr::ALERT,
                    );
                    return;
                }
            }
            send_command(screen, cmd_writer, cmd).await;
        }

        // catalogued but with no client-side procedure
        _ => screen.add("... nothing happened!", Attr::STANDARD),
    }
}

/// Dispatch a validated command string to the server (without the slash).
async fn send_command<S: Screen>(screen: &S, cmd_writer: &SharedWriter, cmd: &str) {
    if let Err(e) = cmd_writer
        .lock()
        .await
        .send_text(cmd, Attr::DYNAMIC)
        .await
    {
        screen.add("Command could not be sent!", Attr::ALERT);
        tracing::debug!("command dispatch failed: {e}");
    }
}

/// Commands that run without touching a socket.
pub(crate) fn execute_internal<S: Screen>(cmd_name: &str, args: &[String], screen: &S) {
    match cmd_name {
        name::CLS => screen.clear(),
        name::HELP => display_help(args, screen),
        _ => {}
    }
}

fn display_help<S: Screen>(args: &[String], screen: &S) {
    if let Some(topic) = args.get(1) {
        let wanted = topic.to_uppercase();
        let found = commands::COMMANDS
            .iter()
            .find(|spec| !spec.passive && spec.name == wanted);
        match found {
            Some(spec) => show_command_help(spec, screen),
            None => screen.add(
                &format!("Could not find help information for '{topic}'"),
                Attr::STANDARD,
            ),
        }
        return;
    }

    // general listing, restricted commands marked
    screen.add(
        "To view more information on a specific cmd, type /HELP [command-name]",
        Attr::STANDARD,
    );
    for spec in commands::COMMANDS {
        if spec.passive {
            continue;
        }
        let marker = if spec.restricted { "* " } else { "  " };
        screen.add(
            &format!("{:<15} {marker}{}", spec.name, spec.description),
            Attr::CRITICAL,
        );
    }
    screen.add(
        "\n[*] - These commands require elevated rights to use.\n",
        Attr::STANDARD,
    );
    screen.display(false);
}

fn show_command_help<S: Screen>(spec: &CommandSpec, screen: &S) {
    screen.add(spec.description, Attr::STANDARD);
    screen.add("", Attr::STANDARD);
    if spec.usage.is_empty() {
        screen.add(spec.name, Attr::STANDARD);
    } else {
        screen.add(&format!("{} {}", spec.name, spec.usage), Attr::STANDARD);
    }
    screen.add("", Attr::STANDARD);
    screen.display(false);
}
