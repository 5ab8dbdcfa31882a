//! IMAP mailbox: a blocking IMAP4rev1 session over rustls.
//!
//! The session is opened at startup. When the connection drops, it is
//! re-opened, the folder is selected again and the command retried, up to
//! `RETRY_COUNT` times. Every protocol exchange runs on `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::MessageParser;
use secrecy::ExposeSecret;
use tracing::{debug, trace, warn};

use super::{MailMessage, Mailbox};
use crate::config::ImapConfig;
use crate::error::MailboxError;

const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Times an operation is retried on a fresh connection after the link drops.
const RETRY_COUNT: usize = 3;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Mailbox backed by a live IMAP connection.
pub struct ImapMailbox {
    connection: Arc<Mutex<Connection<TlsStream>>>,
}

impl ImapMailbox {
    /// Connect over TLS and log in.
    pub async fn connect(config: &ImapConfig) -> Result<Self, MailboxError> {
        let config = config.clone();
        let connection =
            tokio::task::spawn_blocking(move || Connection::open(move || open_tls(&config)))
                .await
                .map_err(|e| MailboxError::Task(e.to_string()))??;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// End the session, if one is open. Errors are ignored; the connection
    /// is going away.
    pub async fn logout(&self) {
        let _ = self
            .with_connection(|c| {
                c.logout();
                Ok(())
            })
            .await;
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, MailboxError>
    where
        F: FnOnce(&mut Connection<TlsStream>) -> Result<T, MailboxError> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut guard = connection
                .lock()
                .map_err(|_| MailboxError::Task("IMAP connection lock poisoned".into()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| MailboxError::Task(e.to_string()))?
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn select_folder(&self, folder: &str) -> Result<(), MailboxError> {
        let folder = folder.to_string();
        self.with_connection(move |c| c.select(&folder)).await
    }

    async fn list_messages(&self) -> Result<Vec<MailMessage>, MailboxError> {
        self.with_connection(|c| c.run(|s| s.fetch_all())).await
    }

    async fn mark_deleted(&self, uids: &[u32]) -> Result<(), MailboxError> {
        let uids = uids.to_vec();
        self.with_connection(move |c| c.run(|s| s.mark_deleted(&uids)))
            .await
    }

    async fn expunge(&self) -> Result<(), MailboxError> {
        self.with_connection(|c| c.run(|s| s.command("EXPUNGE").map(|_| ())))
            .await
    }
}

/// Dial the server over TLS and log in.
fn open_tls(config: &ImapConfig) -> Result<Session<TlsStream>, MailboxError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
        MailboxError::Connect {
            host: config.host.clone(),
            port: config.port,
            reason: e.to_string(),
        }
    })?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| MailboxError::Tls(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailboxError::Tls(e.to_string()))?;

    let session = Session::login(
        rustls::StreamOwned::new(conn, tcp),
        &config.username,
        config.password.expose_secret(),
    )?;
    debug!(host = %config.host, user = %config.username, "IMAP login succeeded");
    Ok(session)
}

// ── Connection ──────────────────────────────────────────────────────

type Dial<S> = Box<dyn FnMut() -> Result<Session<S>, MailboxError> + Send>;

/// A session plus what it takes to replace it when the link drops.
struct Connection<S> {
    session: Option<Session<S>>,
    /// Folder to select again after reconnecting.
    selected: Option<String>,
    dial: Dial<S>,
}

impl<S: Read + Write> Connection<S> {
    /// Dial once. A failure here is returned as is, without retries.
    fn open<D>(mut dial: D) -> Result<Self, MailboxError>
    where
        D: FnMut() -> Result<Session<S>, MailboxError> + Send + 'static,
    {
        let session = dial()?;
        Ok(Self {
            session: Some(session),
            selected: None,
            dial: Box::new(dial),
        })
    }

    fn select(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.run(|s| s.select(folder))?;
        self.selected = Some(folder.to_string());
        Ok(())
    }

    /// Run `op` on the session, reconnecting when the connection is lost.
    ///
    /// Server refusals (`NO`/`BAD`) are returned without a retry.
    fn run<T, F>(&mut self, mut op: F) -> Result<T, MailboxError>
    where
        F: FnMut(&mut Session<S>) -> Result<T, MailboxError>,
    {
        let mut retries = 0;
        loop {
            match self.attempt(&mut op) {
                Err(e) if e.is_connection_lost() && retries < RETRY_COUNT => {
                    retries += 1;
                    warn!(retry = retries, error = %e, "IMAP connection lost, reconnecting");
                    self.session = None;
                }
                result => return result,
            }
        }
    }

    fn attempt<T, F>(&mut self, op: &mut F) -> Result<T, MailboxError>
    where
        F: FnMut(&mut Session<S>) -> Result<T, MailboxError>,
    {
        let session = match self.session.take() {
            Some(session) => session,
            None => self.reconnect()?,
        };
        op(self.session.insert(session))
    }

    fn reconnect(&mut self) -> Result<Session<S>, MailboxError> {
        let mut session = (self.dial)()?;
        if let Some(folder) = &self.selected {
            session.select(folder)?;
        }
        debug!(folder = ?self.selected, "IMAP session re-established");
        Ok(session)
    }

    /// Log out of the open session. Never dials.
    fn logout(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.command("LOGOUT") {
                debug!(error = %e, "IMAP logout failed");
            }
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// One untagged response line with its literals inlined as bytes.
#[derive(Debug, Default)]
struct Untagged {
    text: String,
    literals: Vec<Vec<u8>>,
}

struct Session<S> {
    stream: BufReader<S>,
    tag: u32,
}

impl<S: Read + Write> Session<S> {
    /// Read the server greeting and log in.
    fn login(stream: S, username: &str, password: &str) -> Result<Self, MailboxError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            tag: 0,
        };

        let greeting = session.read_line()?;
        trace!(line = %greeting.trim_end(), "imap <");
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailboxError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }

        session.command(&format!("LOGIN {} {}", quote(username), quote(password)))?;
        Ok(session)
    }

    fn select(&mut self, folder: &str) -> Result<(), MailboxError> {
        self.command(&format!("SELECT {}", quote(folder))).map(|_| ())
    }

    /// Send a tagged command and collect its untagged responses.
    fn command(&mut self, cmd: &str) -> Result<Vec<Untagged>, MailboxError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        if cmd.starts_with("LOGIN ") {
            trace!(tag = %tag, "imap > LOGIN <redacted>");
        } else {
            trace!(tag = %tag, command = %cmd, "imap >");
        }

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut untagged = Vec::new();
        loop {
            let response = self.read_response()?;
            trace!(line = %response.text, literals = response.literals.len(), "imap <");
            match tagged_status(&response.text, &tag) {
                Some(Ok(())) => return Ok(untagged),
                Some(Err(status)) => {
                    // never echo credentials
                    let command = if cmd.starts_with("LOGIN ") {
                        "LOGIN".to_string()
                    } else {
                        cmd.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
                    };
                    return Err(MailboxError::Command {
                        command,
                        response: status,
                    });
                }
                None => untagged.push(response),
            }
        }
    }

    /// Fetch every message in the selected folder.
    fn fetch_all(&mut self) -> Result<Vec<MailMessage>, MailboxError> {
        let search = self.command("UID SEARCH ALL")?;
        let uids = parse_search(search.iter().map(|u| u.text.as_str()));
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let responses = self.command(&format!("UID FETCH {set} (UID BODY.PEEK[])"))?;

        let mut messages = Vec::new();
        for response in responses {
            if !response.text.contains("FETCH") {
                continue;
            }
            let Some(uid) = fetch_uid(&response.text) else {
                warn!(line = %response.text, "FETCH response without UID");
                continue;
            };
            let Some(raw) = response.literals.first() else {
                warn!(uid, "FETCH response without message body");
                continue;
            };
            match parse_message(uid, raw) {
                Some(message) => messages.push(message),
                None => warn!(uid, "Could not parse message, leaving it in the mailbox"),
            }
        }
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    /// Flag each uid in order.
    fn mark_deleted(&mut self, uids: &[u32]) -> Result<(), MailboxError> {
        for uid in uids {
            self.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Deleted)"))?;
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Closed);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read one response, pulling in any `{n}` literals it announces.
    fn read_response(&mut self) -> Result<Untagged, MailboxError> {
        let mut response = Untagged::default();
        loop {
            let line = self.read_line()?;
            let line = line.trim_end_matches(['\r', '\n']);
            response.text.push_str(line);

            let Some(len) = literal_len(line) else {
                return Ok(response);
            };
            let mut literal = vec![0u8; len];
            self.stream.read_exact(&mut literal)?;
            response.literals.push(literal);
        }
    }
}

// ── Protocol helpers ────────────────────────────────────────────────

/// Quote a string as an IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Length of the literal announced at the end of `line`, e.g. `{42}`.
fn literal_len(line: &str) -> Option<usize> {
    let open = line.strip_suffix('}')?.rfind('{')?;
    line[open + 1..line.len() - 1].parse().ok()
}

/// `Some(Ok)` for a tagged OK, `Some(Err)` for NO/BAD, `None` for other lines.
fn tagged_status(line: &str, tag: &str) -> Option<Result<(), String>> {
    let rest = line.strip_prefix(tag)?.strip_prefix(' ')?;
    if rest.starts_with("OK") {
        Some(Ok(()))
    } else {
        Some(Err(rest.to_string()))
    }
}

/// Collect UIDs from `* SEARCH` lines.
fn parse_search<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<u32> {
    lines
        .into_iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// Pull the `UID n` item out of a FETCH response.
fn fetch_uid(text: &str) -> Option<u32> {
    let mut tokens = text.split_whitespace();
    while let Some(token) = tokens.next() {
        if token.trim_start_matches('(').eq_ignore_ascii_case("UID") {
            return tokens
                .next()?
                .trim_end_matches(')')
                .parse()
                .ok();
        }
    }
    None
}

fn parse_message(uid: u32, raw: &[u8]) -> Option<MailMessage> {
    let parsed = MessageParser::default().parse(raw)?;
    let html = parsed
        .body_html(0)
        .or_else(|| parsed.body_text(0))
        .map(|b| b.into_owned())
        .unwrap_or_default();
    Some(MailMessage {
        uid,
        from: sender_addresses(parsed.from()),
        subject: parsed.subject().unwrap_or_default().to_string(),
        html,
    })
}

/// Sender addresses from the From header, groups flattened and blanks
/// dropped.
fn sender_addresses(from: Option<&mail_parser::Address>) -> Vec<String> {
    from.into_iter()
        .flat_map(|from| from.iter())
        .filter_map(|addr| addr.address.as_deref())
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect()
}
