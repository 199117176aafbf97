//! In-process stand-in for a PostgreSQL server
//!
//! Speaks just enough of the startup protocol: declines `SSLRequest`, asks
//! for a cleartext password, then either completes startup or answers with
//! an `ErrorResponse`.

#![allow(dead_code)]

use pg_secrets_connector::credentials::DsnTemplate;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const SSL_REQUEST_CODE: i32 = 80877103;

/// How the server answers a password
#[derive(Debug, Clone)]
pub enum Policy {
    /// Accept exactly this password, reject others with 28P01
    Password(String),
    /// Reject every password with this SQLSTATE
    AlwaysFail(&'static str),
    /// Accept the connection and never answer
    Silent,
}

pub struct FakePostgres {
    pub port: u16,
    seen: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakePostgres {
    pub async fn start(policy: Policy) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let next_pid = Arc::new(AtomicI32::new(1000));

        let task = {
            let seen = seen.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let policy = policy.clone();
                    let seen = seen.clone();
                    let pid = next_pid.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let _ = serve(stream, policy, seen, pid).await;
                    });
                }
            })
        };

        Self { port, seen, task }
    }

    /// Template pointing at this server as role `postgres`
    pub fn template(&self) -> DsnTemplate {
        DsnTemplate::new("127.0.0.1", "postgres")
            .port(self.port)
            .user("postgres")
    }

    pub fn dsn(&self, password: &str) -> String {
        self.template().render(Some(password)).unwrap()
    }

    /// Passwords received, in arrival order
    pub fn passwords_seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Drop for FakePostgres {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn error_response(code: &str, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', "FATAL"), (b'C', code), (b'M', message)] {
        body.push(field);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    frame(b'E', &body)
}

async fn read_untagged(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = stream.read_i32().await? as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

async fn serve(
    mut stream: TcpStream,
    policy: Policy,
    seen: Arc<Mutex<Vec<String>>>,
    pid: i32,
) -> std::io::Result<()> {
    let mut startup = read_untagged(&mut stream).await?;
    if startup[..] == SSL_REQUEST_CODE.to_be_bytes() {
        stream.write_all(b"N").await?;
        startup = read_untagged(&mut stream).await?;
    }
    let _ = startup;

    if matches!(policy, Policy::Silent) {
        // Hold the socket open until the client gives up
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink).await;
        return Ok(());
    }

    stream.write_all(&frame(b'R', &3i32.to_be_bytes())).await?;

    let tag = stream.read_u8().await?;
    assert_eq!(tag, b'p', "expected PasswordMessage");
    let mut password = read_untagged(&mut stream).await?;
    password.pop();
    let password = String::from_utf8(password).unwrap();
    seen.lock().unwrap().push(password.clone());

    let rejection = match &policy {
        Policy::Password(expected) if *expected == password => None,
        Policy::Password(_) => Some("28P01"),
        Policy::AlwaysFail(code) => Some(*code),
        Policy::Silent => unreachable!(),
    };

    if let Some(code) = rejection {
        stream
            .write_all(&error_response(
                code,
                "password authentication failed for user \"postgres\"",
            ))
            .await?;
        return Ok(());
    }

    let mut reply = frame(b'R', &0i32.to_be_bytes());
    reply.extend(frame(b'S', b"server_version\x0016.2\0"));
    let mut key = pid.to_be_bytes().to_vec();
    key.extend_from_slice(&42i32.to_be_bytes());
    reply.extend(frame(b'K', &key));
    reply.extend(frame(b'Z', b"I"));
    stream.write_all(&reply).await?;

    // Wait for Terminate or hang-up
    let mut sink = Vec::new();
    let _ = stream.read_to_end(&mut sink).await;
    Ok(())
}
