// ABOUTME: Server-side directory of connected users and the three lock domains
// ABOUTME: Name reservation, broadcast serialization, and the per-user command mutex

use crate::connection::FrameWriter;
use crate::datatypes::{roster, Attr};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex as AsyncMutex, Notify};

/// A socket write half shared between tasks. Whoever holds the lock writes
/// whole frames, so writes never interleave mid-frame.
pub type SharedWriter = Arc<AsyncMutex<FrameWriter<OwnedWriteHalf>>>;

/// The command-channel attachment made during stage 3 of the handshake.
#[derive(Clone)]
pub struct CommandLink {
    pub writer: SharedWriter,
    pub addr: SocketAddr,
}

/// One connected user.
///
/// Created on accept with only the data socket; the name arrives in stage 2
/// and the command link in stage 3. `active` flips once the handshake
/// completes. `busy` is the command mutex: held for the full lifetime of
/// any multi-turn exchange with this user, and sampled by others to tell
/// whether the user is free.
pub struct UserRecord {
    name: Mutex<Option<String>>,
    pub data_addr: SocketAddr,
    pub data_writer: SharedWriter,
    cmd: Mutex<Option<CommandLink>>,
    hidden: AtomicBool,
    active: AtomicBool,
    pub busy: AsyncMutex<()>,
    closed: Notify,
    closing: AtomicBool,
}

impl UserRecord {
    pub fn new(data_addr: SocketAddr, data_writer: SharedWriter) -> UserRecord {
        UserRecord {
            name: Mutex::new(None),
            data_addr,
            data_writer,
            cmd: Mutex::new(None),
            hidden: AtomicBool::new(false),
            active: AtomicBool::new(false),
            busy: AsyncMutex::new(()),
            closed: Notify::new(),
            closing: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock().unwrap() = Some(name.to_string());
    }

    /// Endpoint report used by FIND.
    pub fn location(&self) -> String {
        format!(
            "{} is connected from - {}:{}",
            self.name().unwrap_or_default(),
            self.data_addr.ip(),
            self.data_addr.port()
        )
    }

    pub fn attach_command(&self, writer: SharedWriter, addr: SocketAddr) {
        *self.cmd.lock().unwrap() = Some(CommandLink { writer, addr });
    }

    pub fn command_link(&self) -> Option<CommandLink> {
        self.cmd.lock().unwrap().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::SeqCst)
    }

    fn set_hidden_flag(&self, hidden: bool) {
        self.hidden.store(hidden, Ordering::SeqCst);
    }

    /// Whether a command exchange is in flight with this user.
    pub fn is_busy(&self) -> bool {
        self.busy.try_lock().is_err()
    }

    /// Ask every task serving this user to wind down.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.closed.notify_waiters();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Resolves once [`close`](UserRecord::close) has been called.
    pub async fn closed(&self) {
        if self.is_closing() {
            return;
        }
        self.closed.notified().await;
    }
}

struct NameTable {
    reserved: HashSet<String>,
    hidden: HashSet<String>,
}

/// The server's directory of users.
///
/// Three independent lock domains: the name table (reservation is a
/// read-modify-write under one lock), the user list, and the delivery lock
/// that serializes broadcast fan-out across all data sockets. Each user
/// additionally carries their own command mutex.
pub struct Registry {
    users: Mutex<Vec<Arc<UserRecord>>>,
    names: Mutex<NameTable>,
    delivery: AsyncMutex<()>,
    pub max_users: usize,
}

impl Registry {
    pub fn new(max_users: usize) -> Registry {
        let mut reserved = HashSet::new();
        reserved.insert(crate::SERVER_NAME.to_string());
        Registry {
            users: Mutex::new(Vec::new()),
            names: Mutex::new(NameTable {
                reserved,
                hidden: HashSet::new(),
            }),
            delivery: AsyncMutex::new(()),
            max_users,
        }
    }

    pub fn insert(&self, user: Arc<UserRecord>) {
        self.users.lock().unwrap().push(user);
    }

    /// Drop a user and release their name. Returns false when the record
    /// was already removed by another path.
    pub fn remove(&self, user: &Arc<UserRecord>) -> bool {
        let mut users = self.users.lock().unwrap();
        let before = users.len();
        users.retain(|u| !Arc::ptr_eq(u, user));
        let removed = users.len() != before;
        drop(users);

        if removed {
            if let Some(name) = user.name() {
                let mut names = self.names.lock().unwrap();
                names.reserved.remove(&name);
                names.hidden.remove(&name);
            }
            user.close();
        }
        removed
    }

    /// Atomically test-and-reserve a name. The whole check-then-insert runs
    /// under the name lock so two users racing for the same name cannot
    /// both win.
    pub fn try_reserve(&self, name: &str) -> bool {
        let mut names = self.names.lock().unwrap();
        if names.reserved.contains(name) {
            false
        } else {
            names.reserved.insert(name.to_string());
            true
        }
    }

    /// Reserve unconditionally (server console).
    pub fn reserve(&self, name: &str) {
        self.names.lock().unwrap().reserved.insert(name.to_string());
    }

    /// Release a reservation (server console).
    pub fn release(&self, name: &str) {
        self.names.lock().unwrap().reserved.remove(name);
    }

    /// The reserved-name snapshot sent during authentication, hidden names
    /// masked, sorted for a stable wire image.
    pub fn snapshot_names(&self) -> Vec<String> {
        let names = self.names.lock().unwrap();
        let mut list: Vec<String> = names
            .reserved
            .iter()
            .map(|name| {
                if names.hidden.contains(name) {
                    roster::mask(name)
                } else {
                    name.clone()
                }
            })
            .collect();
        list.sort();
        list
    }

    /// Flip a user's hidden flag, keeping the hidden-name set in step.
    pub fn set_hidden(&self, user: &UserRecord, hidden: bool) {
        user.set_hidden_flag(hidden);
        if let Some(name) = user.name() {
            let mut names = self.names.lock().unwrap();
            if hidden {
                names.hidden.insert(name);
            } else {
                names.hidden.remove(&name);
            }
        }
    }

    /// Find an active, visible user by exact (uppercase) name. Hidden users
    /// are invisible here and therefore to every targeted command.
    pub fn find_user(&self, name: &str) -> Option<Arc<UserRecord>> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| {
                u.is_active() && !u.is_hidden() && u.name().as_deref() == Some(name)
            })
            .cloned()
    }

    /// Find any record by name, regardless of visibility or handshake
    /// progress. Used to attach command sockets and by the server console.
    pub fn find_named(&self, name: &str) -> Option<Arc<UserRecord>> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.name().as_deref() == Some(name))
            .cloned()
    }

    /// A point-in-time copy of the user list.
    pub fn users(&self) -> Vec<Arc<UserRecord>> {
        self.users.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.users.lock().unwrap().is_empty()
    }

    pub fn count_active(&self) -> usize {
        self.users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.is_active())
            .count()
    }

    /// The LIST report: status line, names (hidden ones masked, or shown in
    /// parentheses when the viewer may see them), and a hidden-count footer.
    pub fn list_users(&self, show_hidden: bool) -> String {
        let users = self.users();
        let mut active = 0;
        let mut total_hidden = 0;
        let mut names = Vec::new();

        for user in &users {
            if !user.is_active() {
                continue;
            }
            active += 1;
            let name = user.name().unwrap_or_default();
            if user.is_hidden() {
                total_hidden += 1;
                if show_hidden {
                    names.push(format!("({name})"));
                } else {
                    names.push(roster::mask(&name));
                }
            } else {
                names.push(name);
            }
        }

        let mut output = format!(
            "There are currently [{active}/{}] users online",
            self.max_users
        );
        if active == 0 {
            output.push('.');
            return output;
        }
        output.push_str(":\n");
        output.push_str(&names.join(", "));
        output.push('\n');

        if total_hidden > 0 {
            let verb = if total_hidden == 1 { "is" } else { "are" };
            if show_hidden {
                output.push_str(&format!("\n() - hidden users = {total_hidden}"));
            } else {
                output.push_str(&format!("\n({total_hidden}) {verb} hidden."));
            }
        }
        output
    }

    /// Fan a payload out to every active user's data socket. The delivery
    /// lock serializes concurrent broadcasts; individual send failures are
    /// left for that user's own receive loop to surface.
    pub async fn broadcast(&self, payload: &[u8], attr: Attr) {
        let _delivery = self.delivery.lock().await;
        let users = self.users();
        for user in users {
            if !user.is_active() {
                continue;
            }
            let mut writer = user.data_writer.lock().await;
            if let Err(e) = writer.write_frame(payload, attr).await {
                tracing::debug!(user = ?user.name(), "broadcast delivery failed: {e}");
            }
        }
    }

    /// Sample a user's command mutex until it is observed unlocked or the
    /// timeout lapses. Returns true when the user came free in time.
    pub async fn poll_activity(
        &self,
        user: &UserRecord,
        period: Duration,
        timeout: Duration,
    ) -> bool {
        let mut elapsed = Duration::ZERO;
        while user.is_busy() {
            if elapsed >= timeout {
                return false;
            }
            tokio::time::sleep(period).await;
            elapsed += period;
        }
        true
    }
}

/// Default sampling interval for [`Registry::poll_activity`].
pub const POLL_PERIOD: Duration = Duration::from_millis(500);

/// Default patience for [`Registry::poll_activity`].
pub const POLL_TIMEOUT: Duration = Duration::from_secs(15);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FrameWriter;
    use tokio::net::{TcpListener, TcpStream};

    async fn test_user(registry: &Registry, name: &str) -> Arc<UserRecord> {
        // a real socket pair, so the writer half has somewhere to point
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, _accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (_, write_half) = client.unwrap().into_split();
        let user = Arc::new(UserRecord::new(
            addr,
            Arc::new(AsyncMutex::new(FrameWriter::new(write_half))),
        ));
        user.set_name(name);
        registry.insert(user.clone());
        registry.try_reserve(name);
        user
    }

    #[tokio::test]
    async fn reservation_is_exclusive() {
        let registry = Registry::new(10);
        assert!(registry.try_reserve("ALICE"));
        assert!(!registry.try_reserve("ALICE"));
        assert!(!registry.try_reserve(crate::SERVER_NAME));
        registry.release("ALICE");
        assert!(registry.try_reserve("ALICE"));
    }

    #[tokio::test]
    async fn hidden_users_are_invisible_to_lookups() {
        let registry = Registry::new(10);
        let user = test_user(&registry, "ALICE").await;
        user.set_active(true);
        assert!(registry.find_user("ALICE").is_some());

        registry.set_hidden(&user, true);
        assert!(registry.find_user("ALICE").is_none());
        assert!(registry.find_named("ALICE").is_some());
        assert!(registry.snapshot_names().contains(&"*****".to_string()));
    }

    #[tokio::test]
    async fn removal_releases_the_name() {
        let registry = Registry::new(10);
        let user = test_user(&registry, "ALICE").await;
        assert!(registry.remove(&user));
        assert!(!registry.remove(&user));
        assert!(registry.try_reserve("ALICE"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn list_formats_the_roster() {
        let registry = Registry::new(10);
        assert_eq!(
            registry.list_users(false),
            "There are currently [0/10] users online."
        );

        let alice = test_user(&registry, "ALICE").await;
        alice.set_active(true);
        assert_eq!(
            registry.list_users(false),
            "There are currently [1/10] users online:\nALICE\n"
        );

        let bob = test_user(&registry, "BOB").await;
        bob.set_active(true);
        registry.set_hidden(&bob, true);
        assert_eq!(
            registry.list_users(false),
            "There are currently [2/10] users online:\nALICE, ***\n\n(1) is hidden."
        );
        assert_eq!(
            registry.list_users(true),
            "There are currently [2/10] users online:\nALICE, (BOB)\n\n() - hidden users = 1"
        );
    }

    #[tokio::test]
    async fn poll_activity_observes_the_command_mutex() {
        let registry = Registry::new(10);
        let user = test_user(&registry, "ALICE").await;

        let fast = Duration::from_millis(10);
        assert!(registry.poll_activity(&user, fast, fast * 4).await);

        let guard = user.busy.lock().await;
        assert!(user.is_busy());
        assert!(!registry.poll_activity(&user, fast, fast * 4).await);
        drop(guard);
        assert!(registry.poll_activity(&user, fast, fast * 4).await);
    }
}
