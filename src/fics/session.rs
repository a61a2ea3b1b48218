//! Session state machine: connect → login → configure → read loop.
//!
//! A [`Session`] only exists once the handshake has succeeded. [`Session::run`]
//! consumes it and is the single producer of decoded messages; when the loop
//! ends for any reason the connection is closed with a best-effort `exit`.
use std::future::Future;
use std::io;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionError, Transport};
use super::message::decode;
use super::sanitize::PROMPT;
use crate::sink::MessageSink;

pub const LOGIN_PROMPT: &str = "login:";
pub const PASSWORD_PROMPT: &str = "password:";
pub const GUEST_PROMPT: &str = "Press return to enter the server as";
/// Terminates the `**** Starting FICS session as ... ****` banner.
pub const BANNER_END: &str = "****\n";
const NEWLINE: &str = "\n";

/// Deadline for the whole login exchange, and separately for configuration.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Rolling read deadline in steady state. The server prints something at
/// least this often on a healthy connection.
pub const READ_TIMEOUT: Duration = Duration::from_secs(3600);

static SESSION_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*\*\* Starting FICS session as ([a-zA-Z]+)(?:\([A-Z0-9*]+\))* \*\*\*\*")
        .expect("session banner pattern is valid")
});

/// Commands that turn off seek noise and put the server into the output
/// style the decoder expects.
pub fn default_setup_commands(interface: &str) -> Vec<String> {
    vec![
        "set seek 0".to_owned(),
        "set echo 1".to_owned(),
        "set style 12".to_owned(),
        format!("set interface {interface}"),
    ]
}

/// Everything needed to establish a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub addr: String,
    pub connect_timeout: Duration,
    pub connect_retries: u32,
    pub username: String,
    pub password: String,
    /// Sent as `%i<origin>` right after connecting, when set.
    pub origin: Option<String>,
    pub setup_commands: Vec<String>,
    pub channels: Vec<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not connect to {addr} after {attempts} attempt(s)")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("login failed for {username}: {reason}")]
    Auth { username: String, reason: String },
    #[error("setup command {command:?} failed")]
    Configure {
        command: String,
        #[source]
        source: ConnectionError,
    },
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Connect over TCP, retrying up to `max_retries` times.
pub async fn connect(
    addr: &str,
    timeout: Duration,
    max_retries: u32,
) -> Result<Connection<TcpStream>, SessionError> {
    connect_with(addr, timeout, max_retries, || TcpStream::connect(addr.to_owned())).await
}

/// Dial with `dial` up to `max_retries` times, each attempt bounded by
/// `timeout`. Stops at the first success. On exhaustion the error carries
/// the last failure.
pub async fn connect_with<S, F, Fut>(
    addr: &str,
    timeout: Duration,
    max_retries: u32,
    mut dial: F,
) -> Result<Connection<S>, SessionError>
where
    S: Transport,
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<S>>,
{
    let mut last_error =
        io::Error::new(io::ErrorKind::InvalidInput, "no connection attempts allowed");
    for attempt in 1..=max_retries {
        info!(%addr, attempt, max_retries, "session: connecting");
        match tokio::time::timeout(timeout, dial()).await {
            Ok(Ok(stream)) => {
                info!(%addr, "session: connected");
                return Ok(Connection::new(stream));
            }
            Ok(Err(e)) => {
                warn!(%addr, attempt, error = %e, "session: connect failed");
                last_error = e;
            }
            Err(_) => {
                warn!(%addr, attempt, "session: connect timed out");
                last_error = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
            }
        }
    }
    Err(SessionError::Connect {
        addr: addr.to_owned(),
        attempts: max_retries,
        source: last_error,
    })
}

/// Log in and return the name the server assigned.
///
/// Guests (and accounts without a password) answer the "press return"
/// prompt; registered accounts answer the password prompt.
pub async fn login<S: Transport>(
    conn: &mut Connection<S>,
    username: &str,
    password: &str,
) -> Result<String, SessionError> {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let auth = |stage: &str, e: ConnectionError| SessionError::Auth {
        username: username.to_owned(),
        reason: format!("{stage}: {e}"),
    };

    conn.read_until(&[LOGIN_PROMPT], deadline)
        .await
        .map_err(|e| auth("waiting for login prompt", e))?;

    let registered = !username.eq_ignore_ascii_case("guest") && !password.is_empty();
    let (prompt, secret) = if registered {
        (PASSWORD_PROMPT, password)
    } else {
        (GUEST_PROMPT, "")
    };
    conn.send_and_read_until(username, &[prompt], deadline)
        .await
        .map_err(|e| auth("sending username", e))?;
    let banner = conn
        .send_and_read_until(secret, &[BANNER_END], deadline)
        .await
        .map_err(|e| auth("waiting for session banner", e))?;

    let banner = String::from_utf8_lossy(&banner);
    match SESSION_BANNER.captures(&banner) {
        Some(caps) => {
            let resolved = caps[1].to_owned();
            info!(requested = username, resolved = %resolved, "session: logged in");
            Ok(resolved)
        }
        None => Err(SessionError::Auth {
            username: username.to_owned(),
            reason: if registered {
                "invalid password".to_owned()
            } else {
                "no session banner".to_owned()
            },
        }),
    }
}

/// Send each setup command and wait for the server to acknowledge it with a
/// line of output.
pub async fn configure<S: Transport>(
    conn: &mut Connection<S>,
    commands: &[String],
) -> Result<(), SessionError> {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    for command in commands {
        conn.send_and_read_until(command, &[NEWLINE], deadline)
            .await
            .map_err(|source| SessionError::Configure {
                command: command.clone(),
                source,
            })?;
        debug!(command = %command, "session: configured");
    }
    Ok(())
}

/// An authenticated, configured session.
pub struct Session<S = TcpStream> {
    conn: Connection<S>,
    username: String,
}

impl Session<TcpStream> {
    /// Connect and run the full handshake.
    pub async fn establish(config: &SessionConfig) -> Result<Self, SessionError> {
        let conn = connect(&config.addr, config.connect_timeout, config.connect_retries).await?;
        Self::handshake(conn, config).await
    }
}

impl<S: Transport> Session<S> {
    /// Run the handshake over an already connected stream.
    pub async fn handshake(
        mut conn: Connection<S>,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        if let Some(origin) = &config.origin {
            if let Err(e) = conn.send(&format!("%i{origin}")).await {
                warn!(%origin, error = %e, "session: failed to register origin");
            }
        }

        let username = login(&mut conn, &config.username, &config.password).await?;
        configure(&mut conn, &config.setup_commands).await?;

        for channel in &config.channels {
            if let Err(e) = conn.send(&format!("+ch {channel}")).await {
                warn!(channel, error = %e, "session: failed to join channel");
            }
        }

        Ok(Self { conn, username })
    }

    /// The name the server assigned at login.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn send(&mut self, command: &str) -> Result<(), ConnectionError> {
        self.conn.send(command).await
    }

    /// Read, decode and dispatch until the connection fails or `shutdown`
    /// fires. Replies from the sink are sent back fire-and-forget.
    ///
    /// Returns `Ok` on shutdown and the read error otherwise. The session is
    /// closed in both cases.
    pub async fn run<K: MessageSink>(
        mut self,
        sink: &mut K,
        shutdown: CancellationToken,
    ) -> Result<(), SessionError> {
        info!(username = %self.username, "session: reading");
        let result = loop {
            let deadline = Instant::now() + READ_TIMEOUT;
            let read = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("session: shutdown requested");
                    break Ok(());
                }
                read = self.conn.read_until(&[PROMPT], deadline) => read,
            };
            let output = match read {
                Ok(output) => output,
                Err(e) => {
                    warn!(error = %e, "session: read loop ended");
                    break Err(SessionError::Connection(e));
                }
            };
            if output.is_empty() {
                continue;
            }

            let text = String::from_utf8_lossy(&output);
            let Some(message) = decode(&text) else {
                debug!(output = %text, "session: ignored output");
                continue;
            };
            if let Some(reply) = sink.dispatch(message).await {
                if let Err(e) = self.conn.send(&reply).await {
                    warn!(error = %e, "session: failed to send reply");
                }
            }
        };
        self.close().await;
        result
    }

    /// Send `exit` and shut the connection down. Errors are ignored.
    pub async fn close(mut self) {
        if let Err(e) = self.conn.send("exit").await {
            debug!(error = %e, "session: exit not delivered");
        }
        self.conn.shutdown().await;
        info!(username = %self.username, "session: closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fics::message::{ChannelTell, Message, PrivateTell};
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// The remote end of a scripted session.
    struct Peer {
        io: BufReader<DuplexStream>,
    }

    impl Peer {
        async fn say(&mut self, text: &str) {
            self.io.get_mut().write_all(text.as_bytes()).await.unwrap();
        }

        async fn say_bytes(&mut self, bytes: &[u8]) {
            self.io.get_mut().write_all(bytes).await.unwrap();
        }

        /// Next command from the client, without the newline. `None` on EOF.
        async fn hear(&mut self) -> Option<String> {
            let mut line = String::new();
            let n = self.io.read_line(&mut line).await.unwrap();
            (n > 0).then(|| line.trim_end_matches('\n').to_owned())
        }
    }

    fn pair() -> (Connection<DuplexStream>, Peer) {
        let (client, server) = tokio::io::duplex(4096);
        (
            Connection::new(client),
            Peer {
                io: BufReader::new(server),
            },
        )
    }

    fn config(username: &str, password: &str) -> SessionConfig {
        SessionConfig {
            addr: "test".into(),
            connect_timeout: Duration::from_secs(1),
            connect_retries: 3,
            username: username.into(),
            password: password.into(),
            origin: None,
            setup_commands: default_setup_commands("www.freechess.club"),
            channels: vec![39],
        }
    }

    /// Plays the server side of a guest login and acknowledges `setup`
    /// commands.
    async fn serve_guest(peer: &mut Peer, setup: usize) -> Vec<String> {
        let mut heard = Vec::new();
        // IAC DO TTYPE, as real servers send before the banner.
        peer.say_bytes(b"\xff\xfd\x18Welcome to FICS\n\rlogin: ").await;
        heard.push(peer.hear().await.unwrap());
        peer.say("\"guest\" is not a registered name.\n\rPress return to enter the server as \"Guest1234\":")
            .await;
        heard.push(peer.hear().await.unwrap());
        peer.say("\n\r**** Starting FICS session as Guest1234(U) ****\n\rfics% ")
            .await;
        for _ in 0..setup {
            let command = peer.hear().await.unwrap();
            peer.say(&format!("{command} done.\n\rfics% ")).await;
            heard.push(command);
        }
        heard
    }

    // ── Connect ─────────────────────────────────────────────────

    #[tokio::test]
    async fn connect_gives_up_after_max_retries() {
        let mut attempts = 0;
        let result = connect_with("nowhere:5000", Duration::from_secs(1), 3, || {
            attempts += 1;
            async {
                Err::<DuplexStream, _>(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            }
        })
        .await;

        assert_eq!(attempts, 3);
        match result {
            Err(SessionError::Connect {
                addr,
                attempts,
                source,
            }) => {
                assert_eq!(addr, "nowhere:5000");
                assert_eq!(attempts, 3);
                assert_eq!(source.kind(), io::ErrorKind::ConnectionRefused);
            }
            other => panic!("expected connect error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn connect_stops_at_first_success() {
        let mut attempts = 0;
        let result = connect_with("flaky:5000", Duration::from_secs(1), 5, || {
            attempts += 1;
            let ok = attempts == 2;
            async move {
                if ok {
                    Ok(tokio::io::duplex(64).0)
                } else {
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn zero_retries_fails_without_dialing() {
        let mut attempts = 0;
        let result = connect_with("x:1", Duration::from_secs(1), 0, || {
            attempts += 1;
            async { Ok(tokio::io::duplex(64).0) }
        })
        .await;

        assert_eq!(attempts, 0);
        assert!(matches!(result, Err(SessionError::Connect { attempts: 0, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_dial_times_out() {
        let result = connect_with("slow:5000", Duration::from_secs(5), 2, || {
            std::future::pending::<io::Result<DuplexStream>>()
        })
        .await;

        match result {
            Err(SessionError::Connect { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("expected connect error, got {:?}", other.err()),
        }
    }

    // ── Login ───────────────────────────────────────────────────

    #[tokio::test]
    async fn guest_login_resolves_assigned_name() {
        let (conn, mut peer) = pair();
        let server = tokio::spawn(async move {
            let heard = serve_guest(&mut peer, 4).await;
            (heard, peer.hear().await)
        });

        let session = Session::handshake(conn, &config("guest", "")).await.unwrap();
        assert_eq!(session.username(), "Guest1234");

        let (heard, join) = server.await.unwrap();
        assert_eq!(
            heard,
            vec![
                "guest",
                "",
                "set seek 0",
                "set echo 1",
                "set style 12",
                "set interface www.freechess.club",
            ]
        );
        assert_eq!(join.as_deref(), Some("+ch 39"));
    }

    #[tokio::test]
    async fn origin_is_registered_first() {
        let (conn, mut peer) = pair();
        let server = tokio::spawn(async move {
            let origin = peer.hear().await;
            serve_guest(&mut peer, 0).await;
            origin
        });

        let mut cfg = config("guest", "");
        cfg.origin = Some("203.0.113.7".into());
        cfg.setup_commands.clear();
        cfg.channels.clear();
        Session::handshake(conn, &cfg).await.unwrap();

        assert_eq!(server.await.unwrap().as_deref(), Some("%i203.0.113.7"));
    }

    #[tokio::test]
    async fn registered_login_sends_password() {
        let (mut conn, mut peer) = pair();
        let server = tokio::spawn(async move {
            peer.say("login: ").await;
            let user = peer.hear().await.unwrap();
            peer.say("\n\rpassword: ").await;
            let pass = peer.hear().await.unwrap();
            peer.say("\n\r**** Starting FICS session as Magnus(GM) ****\n\rfics% ")
                .await;
            (user, pass)
        });

        let name = login(&mut conn, "magnus", "hunter2").await.unwrap();
        assert_eq!(name, "Magnus");
        assert_eq!(
            server.await.unwrap(),
            ("magnus".to_owned(), "hunter2".to_owned())
        );
    }

    #[tokio::test]
    async fn invalid_password_is_auth_error() {
        let (mut conn, mut peer) = pair();
        tokio::spawn(async move {
            peer.say("login: ").await;
            peer.hear().await;
            peer.say("password: ").await;
            peer.hear().await;
            peer.say("\n\r**** Invalid password! ****\n\rlogin: ").await;
            peer.hear().await;
        });

        let err = login(&mut conn, "magnus", "wrong").await.unwrap_err();
        match err {
            SessionError::Auth { username, reason } => {
                assert_eq!(username, "magnus");
                assert_eq!(reason, "invalid password");
            }
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out_login() {
        let (mut conn, _peer) = pair();
        let err = login(&mut conn, "guest", "").await.unwrap_err();
        assert!(matches!(err, SessionError::Auth { .. }));
    }

    // ── Configure ───────────────────────────────────────────────

    #[tokio::test]
    async fn configure_failure_aborts_handshake() {
        let (conn, mut peer) = pair();
        tokio::spawn(async move {
            serve_guest(&mut peer, 0).await;
            peer.hear().await;
            // hang up before acknowledging the first setup command
        });

        let err = Session::handshake(conn, &config("guest", "")).await.err();
        match err {
            Some(SessionError::Configure { command, source }) => {
                assert_eq!(command, "set seek 0");
                assert!(matches!(source, ConnectionError::Closed));
            }
            other => panic!("expected configure error, got {other:?}"),
        }
    }

    // ── Read loop ───────────────────────────────────────────────

    #[derive(Default)]
    struct Recorder {
        messages: Vec<Message>,
    }

    impl MessageSink for Recorder {
        async fn dispatch(&mut self, message: Message) -> Option<String> {
            let reply = match &message {
                Message::PrivateTell(tell) => Some(format!("t {} hi", tell.handle)),
                Message::ChannelTell(_) => None,
            };
            self.messages.push(message);
            reply
        }
    }

    async fn guest_session() -> (Session<DuplexStream>, Peer) {
        let (conn, mut peer) = pair();
        let server = tokio::spawn(async move {
            serve_guest(&mut peer, 0).await;
            peer
        });
        let mut cfg = config("guest", "");
        cfg.setup_commands.clear();
        cfg.channels.clear();
        let session = Session::handshake(conn, &cfg).await.unwrap();
        (session, server.await.unwrap())
    }

    #[tokio::test]
    async fn run_dispatches_until_eof_then_exits() {
        let (session, mut peer) = guest_session().await;
        let server = tokio::spawn(async move {
            peer.say("\n\rFred(1742)(39): anyone for blitz?\n\rfics% ").await;
            peer.say("\n\rGameInfo: noise\n\rfics% ").await;
            peer.say("\n\rBob(TD) tells you: hello\n\rfics% ").await;
            let reply = peer.hear().await;
            // Half-close our write side; the client sees EOF.
            peer.io.get_mut().shutdown().await.unwrap();
            let exit = peer.hear().await;
            (reply, exit)
        });

        let mut sink = Recorder::default();
        let result = session.run(&mut sink, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(SessionError::Connection(ConnectionError::Closed))
        ));

        assert_eq!(
            sink.messages,
            vec![
                Message::ChannelTell(ChannelTell {
                    handle: "Fred".into(),
                    channel: 39,
                    text: "anyone for blitz?".into(),
                }),
                Message::PrivateTell(PrivateTell {
                    handle: "Bob".into(),
                    text: "hello".into(),
                }),
            ]
        );
        let (reply, exit) = server.await.unwrap();
        assert_eq!(reply.as_deref(), Some("t Bob hi"));
        assert_eq!(exit.as_deref(), Some("exit"));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (session, mut peer) = guest_session().await;
        let shutdown = CancellationToken::new();
        let cancel = shutdown.clone();
        let server = tokio::spawn(async move {
            cancel.cancel();
            peer.hear().await
        });

        let mut sink = Recorder::default();
        session.run(&mut sink, shutdown).await.unwrap();
        assert!(sink.messages.is_empty());
        assert_eq!(server.await.unwrap().as_deref(), Some("exit"));
    }
}
