// ABOUTME: The static command catalogue shared by server and client dispatchers
// ABOUTME: Includes the quote-aware argument splitter used on every command line

/// Command names, as they appear (uppercased) at the head of a command line.
pub mod name {
    pub const ADMIN: &str = "ADMIN";
    pub const BECOME_ADMIN: &str = "BECOME_ADMIN";
    pub const CHECK: &str = "CHECK";
    pub const CLS: &str = "CLS";
    pub const DC: &str = "DC";
    pub const DEMOTE: &str = "DEMOTE";
    pub const FIND: &str = "FIND";
    pub const GET_DEMOTED: &str = "GET_DEMOTED";
    pub const GET_KICKED: &str = "GET_KICKED";
    pub const HELP: &str = "HELP";
    pub const KICK: &str = "KICK";
    pub const LIST: &str = "LIST";
    pub const RECEIVE: &str = "RECEIVE";
    pub const SEND: &str = "SEND";
    pub const TELL: &str = "TELL";
    pub const VISIBILITY: &str = "VISIBILITY";
}

/// One entry in the command catalogue.
///
/// `internal` commands run without touching a socket. `passive` commands
/// cannot be typed; they only appear as the body of another command's
/// execution and are acted on by the recipient without acknowledgement.
/// `restricted` commands require the admin flag, checked on the client
/// before anything is sent.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub usage: &'static str,
    pub internal: bool,
    pub passive: bool,
    pub restricted: bool,
}

impl CommandSpec {
    const fn new(name: &'static str, description: &'static str) -> CommandSpec {
        CommandSpec {
            name,
            description,
            usage: "",
            internal: false,
            passive: false,
            restricted: false,
        }
    }

    const fn usage(mut self, usage: &'static str) -> CommandSpec {
        self.usage = usage;
        self
    }

    const fn internal(mut self) -> CommandSpec {
        self.internal = true;
        self
    }

    const fn passive(mut self) -> CommandSpec {
        self.passive = true;
        self
    }

    const fn restricted(mut self) -> CommandSpec {
        self.restricted = true;
        self
    }
}

/// The full catalogue, alphabetical by name.
pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new(name::ADMIN, "Grants the chosen user elevated privileges.")
        .usage("[username]")
        .restricted(),
    CommandSpec::new(
        name::BECOME_ADMIN,
        "[Passive] Allows this user to become a Server administrator.",
    )
    .passive(),
    CommandSpec::new(name::CHECK, "Tests whether a user is free to receive commands.")
        .usage("[username]"),
    CommandSpec::new(name::CLS, "Clears the screen.").internal(),
    CommandSpec::new(name::DC, "Disconnect from the Server."),
    CommandSpec::new(name::DEMOTE, "Withdraws a user's special privileges.")
        .usage("[username]")
        .restricted(),
    CommandSpec::new(name::FIND, "Displays the socket address of the chosen user.")
        .usage("[username]"),
    CommandSpec::new(
        name::GET_DEMOTED,
        "[Passive] Removes the status of Server administrator from this user.",
    )
    .passive(),
    CommandSpec::new(name::GET_KICKED, "[Passive] Prevents user from reconnecting.").passive(),
    CommandSpec::new(name::HELP, "Provides help information for Server commands.")
        .usage(
            "[command]\n    command - displays help for that command.\n    \
             Type HELP without parameters to view available commands.",
        )
        .internal(),
    CommandSpec::new(name::KICK, "Forcibly removes a user from the Server.")
        .usage("[username] [comment]\n    comment (optional) - explain why user was kicked.")
        .restricted(),
    CommandSpec::new(
        name::LIST,
        "Displays a list of all authorized users connected to the Server.",
    ),
    CommandSpec::new(
        name::RECEIVE,
        "[Passive] Receive an incoming file request from an active user.",
    )
    .usage("[username] [filename] [server-side filepath]")
    .passive(),
    CommandSpec::new(name::SEND, "Send any file to another user on the Server.").usage(
        "[username] [filepath] ...\n    username - name of user you want to send the file to.\n    \
         filepath - checks the current directory if full path is not specified.\n\n\
         You must encase path in quotes if it contains spaces.\n\
         You may enter multiple paths in succession and they will be zipped together before sending.",
    ),
    CommandSpec::new(name::TELL, "Send an exclusive message to the chosen user.")
        .usage("[username] [message]")
        .restricted(),
    CommandSpec::new(name::VISIBILITY, "Show or hide yourself to other users on the server.")
        .usage(
            "[state]\n    States: 0=OFF, 1=ON | You may type the name or value.\n    \
             You cannot be targeted with commands while hidden.",
        )
        .restricted(),
];

/// Look a command up by its uppercased name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Whether a command name is in the passive set.
pub fn is_passive(name: &str) -> bool {
    lookup(name).is_some_and(|spec| spec.passive)
}

/// Split a command line into arguments.
///
/// Delimits on whitespace but keeps runs delimited by unbalanced `"` as a
/// single composite argument, spanning from the opening token's start to
/// the closing token's end. An unterminated quote consumes the rest of the
/// line. Tokens whose quotes are balanced pass through untouched;
/// `strip_quotes` controls whether composite arguments keep their outer
/// quotes.
pub fn parse_args(line: &str, strip_quotes: bool) -> Vec<String> {
    let mut args = Vec::new();
    let mut linking = false;
    let mut start = 0;
    // search cursor, so repeated substrings resolve to the right position
    let mut cursor = 0;

    for token in line.split_whitespace() {
        let pos = line[cursor..]
            .find(token)
            .map(|i| i + cursor)
            .expect("token taken from this line");

        let state_change = token.matches('"').count() % 2 == 1;
        if state_change {
            if !linking {
                start = pos;
                linking = true;
            } else {
                linking = false;
                let composite = &line[start..pos + token.len()];
                args.push(finish(composite, strip_quotes));
            }
        } else if !linking {
            args.push(token.to_string());
        }

        cursor = pos + token.len();
    }

    if linking {
        args.push(finish(&line[start..], strip_quotes));
    }

    args
}

fn finish(composite: &str, strip_quotes: bool) -> String {
    if strip_quotes {
        composite.trim_matches('"').to_string()
    } else {
        composite.to_string()
    }
}

/// The remainder of a command line starting at the first occurrence of
/// `token`, used for free-text arguments like messages and kick reasons.
pub fn tail_from<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    line.find(token).map(|i| &line[i..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_is_sorted_and_unique() {
        let names: Vec<&str> = COMMANDS.iter().map(|c| c.name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted);
    }

    #[test]
    fn lookup_finds_commands() {
        assert!(lookup("KICK").unwrap().restricted);
        assert!(lookup("CLS").unwrap().internal);
        assert!(lookup("NOPE").is_none());
        assert!(is_passive("RECEIVE"));
        assert!(!is_passive("SEND"));
    }

    #[test]
    fn splits_plain_arguments() {
        assert_eq!(parse_args("a b c", false), ["a", "b", "c"]);
    }

    #[test]
    fn keeps_quoted_spans_together() {
        assert_eq!(
            parse_args("send JEFF \"C:/my docs/a.txt\"", false),
            ["send", "JEFF", "\"C:/my docs/a.txt\""]
        );
        assert_eq!(
            parse_args("send JEFF \"C:/my docs/a.txt\"", true),
            ["send", "JEFF", "C:/my docs/a.txt"]
        );
    }

    #[test]
    fn balanced_tokens_pass_through() {
        assert_eq!(
            parse_args("send JEFF \"a\" \"b\" c", false),
            ["send", "JEFF", "\"a\"", "\"b\"", "c"]
        );
    }

    #[test]
    fn unterminated_quote_consumes_the_rest() {
        assert_eq!(
            parse_args("tell JEFF \"hi there", false),
            ["tell", "JEFF", "\"hi there"]
        );
    }

    #[test]
    fn repeated_tokens_resolve_positionally() {
        assert_eq!(
            parse_args("tell tell \"tell me\" tell", false),
            ["tell", "tell", "\"tell me\"", "tell"]
        );
    }

    #[test]
    fn tail_from_returns_the_remainder() {
        assert_eq!(
            tail_from("tell JEFF hi there", "hi"),
            Some("hi there")
        );
        assert_eq!(tail_from("kick BOB", "missing"), None);
    }
}
