//! Scripted plain-TCP IMAP server for connector tests.
//!
//! Understands just enough of IMAP4rev1 to drive a read-only session:
//! LOGIN, EXAMINE, UID SEARCH, UID FETCH and LOGOUT. Every UID SEARCH
//! returns all stored UIDs; the search arguments are recorded so tests can
//! assert on the compiled criteria. Literals in a command are spliced back
//! into the recorded line without their `{n}` marker.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct ServerState {
    /// `(uid, raw RFC 822 source)`, in mailbox order.
    messages: Vec<(u32, String)>,
    searches: Vec<String>,
    logins: usize,
    logouts: usize,
}

pub struct FakeImapServer {
    port: u16,
    state: Arc<Mutex<ServerState>>,
}

impl FakeImapServer {
    /// Binds to an ephemeral localhost port and serves until the test ends.
    pub async fn start(password: &str) -> Self {
        Self::start_with_capabilities(password, "IMAP4rev1 AUTH=PLAIN").await
    }

    /// Same as [`FakeImapServer::start`], also advertising `LITERAL+`.
    pub async fn start_with_literal_plus(password: &str) -> Self {
        Self::start_with_capabilities(password, "IMAP4rev1 LITERAL+ AUTH=PLAIN").await
    }

    async fn start_with_capabilities(password: &str, capabilities: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake IMAP server");
        let port = listener.local_addr().expect("local addr").port();
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = state.clone();
        let password = password.to_string();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = accept_state.clone();
                let password = password.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, state, password, capabilities).await;
                });
            }
        });

        Self { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn add_message(&self, uid: u32, raw: String) {
        self.state.lock().unwrap().messages.push((uid, raw));
    }

    /// Arguments of every UID SEARCH received so far.
    pub fn searches(&self) -> Vec<String> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn logins(&self) -> usize {
        self.state.lock().unwrap().logins
    }

    pub fn logouts(&self) -> usize {
        self.state.lock().unwrap().logouts
    }
}

/// Start offset and length of a trailing `{n}` / `{n+}` literal marker.
fn literal_marker(line: &str) -> Option<(usize, usize, bool)> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    let count = &inner[open + 1..];
    let (count, non_sync) = match count.strip_suffix('+') {
        Some(count) => (count, true),
        None => (count, false),
    };
    Some((open, count.parse().ok()?, non_sync))
}

fn unquote(token: &str) -> &str {
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token)
}

async fn serve(
    socket: TcpStream,
    state: Arc<Mutex<ServerState>>,
    password: String,
    capabilities: &'static str,
) -> std::io::Result<()> {
    let (read_half, mut writer) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    writer
        .write_all(format!("* OK [CAPABILITY {}] Fake IMAP ready\r\n", capabilities).as_bytes())
        .await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        while let Some((marker, len, non_sync)) = literal_marker(&line) {
            line.truncate(marker);
            if !non_sync {
                writer.write_all(b"+ Ready for literal\r\n").await?;
                writer.flush().await?;
            }
            let mut literal = vec![0u8; len];
            reader.read_exact(&mut literal).await?;
            line.push_str(&String::from_utf8_lossy(&literal));
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
        }
        let command = line.trim_end();
        let mut parts = command.splitn(3, ' ');
        let tag = parts.next().unwrap_or("*").to_string();
        let verb = parts.next().unwrap_or("").to_ascii_uppercase();
        let rest = parts.next().unwrap_or("").to_string();

        let reply = match verb.as_str() {
            "CAPABILITY" => format!(
                "* CAPABILITY {}\r\n{} OK CAPABILITY completed\r\n",
                capabilities, tag
            ),
            "LOGIN" => {
                let given = rest.split(' ').nth(1).map(unquote).unwrap_or("");
                if given == password {
                    state.lock().unwrap().logins += 1;
                    format!("{} OK LOGIN completed\r\n", tag)
                } else {
                    format!("{} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n", tag)
                }
            }
            "EXAMINE" | "SELECT" => {
                let exists = state.lock().unwrap().messages.len();
                format!(
                    "* {} EXISTS\r\n\
                     * 0 RECENT\r\n\
                     * FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n\
                     * OK [UIDVALIDITY 1] UIDs valid\r\n\
                     {} OK [READ-ONLY] EXAMINE completed\r\n",
                    exists, tag
                )
            }
            "UID" => uid_command(&tag, &rest, &state),
            "NOOP" => format!("{} OK NOOP completed\r\n", tag),
            "LOGOUT" => {
                state.lock().unwrap().logouts += 1;
                let reply = format!("* BYE Fake IMAP closing\r\n{} OK LOGOUT completed\r\n", tag);
                writer.write_all(reply.as_bytes()).await?;
                writer.flush().await?;
                return Ok(());
            }
            _ => format!("{} BAD Unknown command\r\n", tag),
        };

        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
    }
}

fn uid_command(tag: &str, rest: &str, state: &Arc<Mutex<ServerState>>) -> String {
    let (sub, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let mut state = state.lock().unwrap();

    match sub.to_ascii_uppercase().as_str() {
        "SEARCH" => {
            state.searches.push(args.to_string());
            let uids: Vec<String> = state.messages.iter().map(|(uid, _)| uid.to_string()).collect();
            if uids.is_empty() {
                format!("* SEARCH\r\n{} OK SEARCH completed\r\n", tag)
            } else {
                format!("* SEARCH {}\r\n{} OK SEARCH completed\r\n", uids.join(" "), tag)
            }
        }
        "FETCH" => {
            let wanted: u32 = args
                .split(' ')
                .next()
                .and_then(|uid| uid.parse().ok())
                .unwrap_or(0);
            let found = state
                .messages
                .iter()
                .enumerate()
                .find(|(_, (uid, _))| *uid == wanted);
            match found {
                Some((index, (uid, raw))) => format!(
                    "* {} FETCH (UID {} RFC822 {{{}}}\r\n{})\r\n{} OK FETCH completed\r\n",
                    index + 1,
                    uid,
                    raw.len(),
                    raw,
                    tag
                ),
                None => format!("{} OK FETCH completed\r\n", tag),
            }
        }
        _ => format!("{} BAD Unknown UID command\r\n", tag),
    }
}
