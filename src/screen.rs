// ABOUTME: The terminal collaborator trait the protocol core renders through
// ABOUTME: Ships a plain line-oriented implementation sufficient for the binaries

use crate::datatypes::{Attr, Color};
use std::future::Future;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, Notify};

/// Options for a polled user prompt.
#[derive(Clone, Copy, Debug)]
pub struct ResponseOptions {
    /// Sample interval while waiting.
    pub period: Duration,
    /// Abort and return an empty response after this long.
    pub timeout: Duration,
    /// Start the countdown and recolor the prompt when this much time
    /// remains. Zero disables the alert phase.
    pub alert_time: Duration,
    /// Show the seconds remaining in the prompt from the start.
    pub timer: bool,
    /// Prompt color while the question is open.
    pub color: Option<Color>,
}

impl Default for ResponseOptions {
    fn default() -> ResponseOptions {
        ResponseOptions {
            period: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            alert_time: Duration::from_secs(10),
            timer: false,
            color: Some(Color::Highlight),
        }
    }
}

impl ResponseOptions {
    pub fn with_timeout(secs: u64) -> ResponseOptions {
        ResponseOptions {
            timeout: Duration::from_secs(secs),
            ..ResponseOptions::default()
        }
    }

    /// Defaults for yes/no questions: short fuse, visible countdown.
    pub fn binary() -> ResponseOptions {
        ResponseOptions {
            timeout: Duration::from_secs(10),
            alert_time: Duration::ZERO,
            timer: true,
            color: Some(Color::Critical),
            ..ResponseOptions::default()
        }
    }
}

/// The terminal surface the core talks to.
///
/// The protocol layers never render anything themselves; they append
/// attribute-tagged lines, swap the input prompt for progress and countdown
/// displays, and ask questions with a polling timeout. An empty response
/// string always means the prompt timed out.
pub trait Screen: Send + Sync + 'static {
    /// Append a line to the scrollback.
    fn add(&self, text: &str, attr: Attr);

    /// Redraw. When `show_latest` is set, jump to the newest line.
    fn display(&self, show_latest: bool);

    /// Replace the input-box prompt (used for progress and timers).
    fn set_prompt(&self, prompt: &str);

    /// The current prompt, so callers can restore it afterwards.
    fn prompt(&self) -> String;

    /// Recolor the prompt; `None` restores the standard color.
    fn set_prompt_color(&self, color: Option<Color>);

    /// Erase the scrollback.
    fn clear(&self);

    /// Drop scaffolding lines whose purpose is over.
    fn scrap(&self);

    /// Jump the view to the most recent lines.
    fn show_recent(&self);

    /// Shut the interface down; pending and future input ends.
    fn quit(&self);

    /// Block until the user presses enter.
    fn pause(&self) -> impl Future<Output = ()> + Send;

    /// Read one line of input with a polling timeout. Returns the empty
    /// string when the prompt times out.
    fn get_response(
        &self,
        prompt: &str,
        opts: ResponseOptions,
    ) -> impl Future<Output = String> + Send;

    /// Next line of ordinary input (anything typed while no prompt is
    /// open). `None` once the interface has quit.
    fn next_input(&self) -> impl Future<Output = Option<String>> + Send;

    /// Ask a yes/no question. Invalid input and timeouts both answer no.
    fn get_binary_response(
        &self,
        prompt: &str,
        opts: ResponseOptions,
    ) -> impl Future<Output = bool> + Send
    where
        Self: Sized,
    {
        async move {
            let answer = self.get_response(prompt, opts).await;
            match answer.trim().to_lowercase().as_str() {
                "yes" | "y" => true,
                "no" | "n" => false,
                _ => {
                    if answer.is_empty() {
                        self.add("Timed out!", Attr::HIGHLIGHT);
                    } else {
                        self.add("Invalid response!", Attr::DYNAMIC);
                    }
                    self.display(true);
                    false
                }
            }
        }
    }
}

/// A plain stdout/stdin implementation of [`Screen`].
///
/// Lines print immediately with ANSI colors; there is no scrollback to
/// scroll, so `display`, `scrap` and `show_recent` are mostly no-ops. Input
/// lines route to whichever prompt is open, or to [`Screen::next_input`]
/// otherwise.
pub struct LineScreen {
    state: Mutex<ScreenState>,
    responder: Mutex<Option<oneshot::Sender<String>>>,
    // tokio mutex: the receiver is held across awaits in next_input
    outbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    quit: Notify,
    quitting: AtomicBool,
}

struct ScreenState {
    prompt: String,
    color: Option<Color>,
}

impl LineScreen {
    /// Create the screen and start the stdin router task.
    pub fn start() -> std::sync::Arc<LineScreen> {
        let (tx, rx) = mpsc::unbounded_channel();
        let screen = std::sync::Arc::new(LineScreen {
            state: Mutex::new(ScreenState {
                prompt: String::new(),
                color: None,
            }),
            responder: Mutex::new(None),
            outbox: tokio::sync::Mutex::new(rx),
            quit: Notify::new(),
            quitting: AtomicBool::new(false),
        });

        let router = screen.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let pending = router.responder.lock().unwrap().take();
                match pending {
                    Some(reply) => {
                        let _ = reply.send(line);
                    }
                    None => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                }
            }
            router.quit();
        });

        screen
    }

    fn print_prompt(&self) {
        let state = self.state.lock().unwrap();
        let code = ansi(state.color);
        print!("\r{code}{}\x1b[0m", state.prompt);
        let _ = std::io::stdout().flush();
    }
}

fn ansi(color: Option<Color>) -> &'static str {
    match color {
        Some(Color::Highlight) => "\x1b[36m",
        Some(Color::Dynamic) => "\x1b[0m",
        Some(Color::Critical) => "\x1b[33m",
        Some(Color::Alert) => "\x1b[1;31m",
        Some(Color::Success) => "\x1b[32m",
        Some(Color::Dim) => "\x1b[90m",
        Some(Color::Debug) => "\x1b[35m",
        _ => "\x1b[0m",
    }
}

impl Screen for LineScreen {
    fn add(&self, text: &str, attr: Attr) {
        let code = ansi(attr.color());
        println!("{code}{text}\x1b[0m");
    }

    fn display(&self, _show_latest: bool) {
        let _ = std::io::stdout().flush();
    }

    fn set_prompt(&self, prompt: &str) {
        self.state.lock().unwrap().prompt = prompt.to_string();
        self.print_prompt();
    }

    fn prompt(&self) -> String {
        self.state.lock().unwrap().prompt.clone()
    }

    fn set_prompt_color(&self, color: Option<Color>) {
        self.state.lock().unwrap().color = color;
    }

    fn clear(&self) {
        print!("\x1b[2J\x1b[H");
        let _ = std::io::stdout().flush();
    }

    fn scrap(&self) {}

    fn show_recent(&self) {}

    fn quit(&self) {
        self.quitting.store(true, Ordering::SeqCst);
        self.quit.notify_waiters();
    }

    async fn pause(&self) {
        let _ = self
            .get_response("Press Enter to continue . . . ", ResponseOptions::with_timeout(300))
            .await;
    }

    async fn get_response(&self, prompt: &str, opts: ResponseOptions) -> String {
        let prompt = if prompt.is_empty() { "Response: " } else { prompt };
        let saved = self.prompt();

        let (tx, mut rx) = oneshot::channel();
        *self.responder.lock().unwrap() = Some(tx);
        self.set_prompt_color(opts.color);
        self.set_prompt(prompt);

        let mut elapsed = Duration::ZERO;
        let mut timer = opts.timer;
        let mut alert = opts.alert_time;
        let reply = loop {
            tokio::select! {
                line = &mut rx => break line.unwrap_or_default(),
                _ = self.quit.notified() => break String::new(),
                _ = tokio::time::sleep(opts.period) => {
                    elapsed += opts.period;
                    if elapsed >= opts.timeout {
                        self.responder.lock().unwrap().take();
                        break String::new();
                    }
                    let remaining = opts.timeout - elapsed;
                    if !alert.is_zero() && remaining <= alert {
                        self.set_prompt_color(Some(Color::Alert));
                        timer = true;
                        alert = Duration::ZERO;
                    }
                    if timer {
                        self.set_prompt(&format!("[{:.1}s] {prompt}", remaining.as_secs_f32()));
                    }
                }
            }
        };

        self.responder.lock().unwrap().take();
        self.set_prompt_color(None);
        self.set_prompt(&saved);
        reply
    }

    async fn next_input(&self) -> Option<String> {
        if self.quitting.load(Ordering::SeqCst) {
            return None;
        }
        let mut outbox = self.outbox.lock().await;
        tokio::select! {
            line = outbox.recv() => line,
            _ = self.quit.notified() => None,
        }
    }
}
