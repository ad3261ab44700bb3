//! libssh2 backed sessions
//!
//! libssh2 is blocking, so every call runs on the blocking thread pool.

use super::{CommandOutput, RemoteSession, SshConnector};
use crate::error::{Result, SkyhookError};
use async_trait::async_trait;
use ssh2::{Channel, Session};
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Timeout for the TCP connect and the SSH handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between polls of a command's output streams
const READ_POLL: Duration = Duration::from_millis(20);

/// Public key authentication with a private key file
pub struct Ssh2Connector {
    private_key: PathBuf,
    passphrase: Option<String>,
}

impl Ssh2Connector {
    pub fn new(private_key: PathBuf) -> Self {
        Self {
            private_key,
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase;
        self
    }

    pub fn private_key(&self) -> &Path {
        &self.private_key
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }
}

fn dial(host: &str, port: u16, user: &str, key: &Path, passphrase: Option<&str>) -> Result<Session> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| SkyhookError::NetworkUnavailable(format!("resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| SkyhookError::NetworkUnavailable(format!("no address for {}", host)))?;

    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|e| SkyhookError::NetworkUnavailable(format!("connect {}: {}", addr, e)))?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(CONNECT_TIMEOUT.as_millis() as u32);
    session.handshake()?;
    session.userauth_pubkey_file(user, None, key, passphrase)?;

    if !session.authenticated() {
        return Err(SkyhookError::NetworkUnavailable(format!(
            "ssh authentication as {} failed",
            user
        )));
    }

    // installs can stay quiet for a long time
    session.set_timeout(0);
    Ok(session)
}

#[async_trait]
impl SshConnector for Ssh2Connector {
    async fn connect(&self, host: &str, port: u16, user: &str) -> Result<Box<dyn RemoteSession>> {
        let host = host.to_string();
        let user = user.to_string();
        let key = self.private_key.clone();
        let passphrase = self.passphrase.clone();

        let session = tokio::task::spawn_blocking(move || {
            dial(&host, port, &user, &key, passphrase.as_deref())
        })
        .await
        .map_err(|e| SkyhookError::Internal(format!("ssh task: {}", e)))??;

        Ok(Box::new(Ssh2Session {
            session: Arc::new(Mutex::new(session)),
        }))
    }
}

/// An authenticated SSH session
pub struct Ssh2Session {
    session: Arc<Mutex<Session>>,
}

/// Read what `reader` has buffered without waiting; true if anything arrived
fn drain<R: Read>(reader: &mut R, into: &mut Vec<u8>) -> std::io::Result<bool> {
    let mut chunk = [0u8; 8192];
    let mut progressed = false;
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(progressed),
            Ok(n) => {
                into.extend_from_slice(&chunk[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(progressed),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Collect stdout and stderr until the remote side closes both.
///
/// The two streams share one flow control window, so they are read in turn
/// rather than one after the other.
fn read_streams(channel: &mut Channel) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        let mut progressed = drain(channel, &mut stdout)?;
        progressed |= drain(&mut channel.stderr(), &mut stderr)?;

        if !progressed {
            if channel.eof() {
                break;
            }
            std::thread::sleep(READ_POLL);
        }
    }

    Ok((stdout, stderr))
}

fn exec(session: &Session, command: &str) -> Result<CommandOutput> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    session.set_blocking(false);
    let streams = read_streams(&mut channel);
    session.set_blocking(true);
    let (stdout, stderr) = streams?;

    channel.wait_close()?;
    let status = channel.exit_status()?;

    Ok(CommandOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

#[async_trait]
impl RemoteSession for Ssh2Session {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let session = self.session.clone();
        let command = command.to_string();

        tokio::task::spawn_blocking(move || {
            let session = session
                .lock()
                .map_err(|_| SkyhookError::Internal("ssh session lock poisoned".to_string()))?;
            exec(&session, &command)
        })
        .await
        .map_err(|e| SkyhookError::Internal(format!("ssh task: {}", e)))?
    }
}
