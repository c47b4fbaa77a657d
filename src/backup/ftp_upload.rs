// databasebackup/src/backup/ftp_upload.rs
use async_trait::async_trait;
use std::fs::File;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use suppaftp::{FtpError, FtpStream};
use suppaftp::types::FileType;
use tracing::{debug, info, warn};
use url::Url;

use super::transport::{Transport, remote_file_name, transport_error};
use crate::config::UploadTarget;
use crate::errors::{TransportError, TransportStage};

const DEFAULT_FTP_PORT: u16 = 21;
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Plain FTP uploads. Credentials cross the wire unencrypted.
///
/// `io_timeout` bounds the connect and every single read or write on both the
/// control and the data connection, so a server that stops answering ends the
/// session instead of parking a blocking thread.
#[derive(Debug, Clone)]
pub struct FtpTransport {
    io_timeout: Duration,
}

impl Default for FtpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_IO_TIMEOUT)
    }
}

impl FtpTransport {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

#[async_trait]
impl Transport for FtpTransport {
    async fn deliver(
        &self,
        target: &UploadTarget,
        local_path: &Path,
    ) -> Result<(), TransportError> {
        // suppaftp's client is blocking; keep it off the runtime threads.
        let owned_target = target.clone();
        let owned_path: PathBuf = local_path.to_path_buf();
        let io_timeout = self.io_timeout;
        tokio::task::spawn_blocking(move || upload_file(&owned_target, &owned_path, io_timeout))
        .await
        .map_err(|e| transport_error(target, TransportStage::Store, format!("upload task aborted: {}", e)))?
    }
}

/// `host`, `host:port` or `ftp://host[:port]` to a `host:port` authority.
pub fn ftp_authority(host: &str) -> Result<String, String> {
    let host = host.trim();
    if host.contains("://") {
        let url = Url::parse(host).map_err(|e| format!("invalid FTP host {:?}: {}", host, e))?;
        let name = url
            .host_str()
            .ok_or_else(|| format!("FTP host {:?} has no host name", host))?;
        return Ok(format!("{}:{}", name, url.port().unwrap_or(DEFAULT_FTP_PORT)));
    }
    if host.contains(':') {
        Ok(host.to_string())
    } else {
        Ok(format!("{}:{}", host, DEFAULT_FTP_PORT))
    }
}

fn resolve_address(host: &str) -> Result<SocketAddr, String> {
    let authority = ftp_authority(host)?;
    authority
        .to_socket_addrs()
        .map_err(|e| format!("could not resolve {}: {}", authority, e))?
        .next()
        .ok_or_else(|| format!("{} resolved to no addresses", authority))
}

fn open_stream(addr: SocketAddr, io_timeout: Duration) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, io_timeout)?;
    stream.set_read_timeout(Some(io_timeout))?;
    stream.set_write_timeout(Some(io_timeout))?;
    Ok(stream)
}

/// Uploads `local_path` to the target over FTP.
///
/// Once connected, the session is always closed with QUIT before returning.
fn upload_file(
    target: &UploadTarget,
    local_path: &Path,
    io_timeout: Duration,
) -> Result<(), TransportError> {
    let label = target.label();
    let addr = resolve_address(&target.host)
        .map_err(|e| transport_error(target, TransportStage::Connect, e))?;

    let control = open_stream(addr, io_timeout)
        .map_err(|e| transport_error(target, TransportStage::Connect, e))?;
    let mut ftp = FtpStream::connect_with_stream(control)
        .map_err(|e| transport_error(target, TransportStage::Connect, e))?
        .passive_stream_builder(move |data_addr| {
            open_stream(data_addr, io_timeout).map_err(FtpError::ConnectionError)
        });
    debug!("Connected to FTP server for {}", label);

    let result = store_in_session(&mut ftp, target, local_path);

    if let Err(e) = ftp.quit() {
        debug!("FTP QUIT for {} failed: {}", label, e);
    }
    result
}

fn store_in_session(
    ftp: &mut FtpStream,
    target: &UploadTarget,
    local_path: &Path,
) -> Result<(), TransportError> {
    ftp.login(target.username.as_str(), target.password.as_str())
        .map_err(|e| transport_error(target, TransportStage::Authenticate, e))?;
    debug!("Logged in to {}", target.label());

    // Some servers park users in a fixed home directory; a refused CWD is not
    // fatal, STOR decides whether the upload works.
    let remote_directory = target.remote_directory.trim();
    if !remote_directory.is_empty() {
        if let Err(e) = ftp.cwd(remote_directory) {
            warn!(
                "⚠️ Could not change to remote directory {} on {}: {}. Uploading to the current directory instead.",
                remote_directory,
                target.label(),
                transport_error(target, TransportStage::ChangeDirectory, e).message
            );
        }
    }
    if let Ok(current) = ftp.pwd() {
        debug!("Current remote path on {}: {}", target.label(), current);
    }

    ftp.transfer_type(FileType::Binary)
        .map_err(|e| transport_error(target, TransportStage::Store, e))?;

    let remote_name = remote_file_name(target, local_path)?;
    let file = File::open(local_path).map_err(|e| {
        transport_error(
            target,
            TransportStage::OpenLocal,
            format!("{}: {}", local_path.display(), e),
        )
    })?;
    let mut reader = BufReader::new(file);

    let bytes = ftp
        .put_file(remote_name.as_str(), &mut reader)
        .map_err(|e| transport_error(target, TransportStage::Store, e))?;

    info!(
        "✅ Uploaded {} ({} bytes) to {}",
        remote_name,
        bytes,
        target.label()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use std::io::{BufRead, Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Script {
        RejectLogin,
        RefuseCwd,
        SilentAfterGreeting,
    }

    #[derive(Debug, Default)]
    struct Session {
        commands: Vec<String>,
        stored: Option<(String, Vec<u8>)>,
    }

    /// Minimal single-session FTP server on loopback that answers by `script`
    /// and records every command it receives.
    fn spawn_ftp_server(
        script: Script,
    ) -> io::Result<(SocketAddr, thread::JoinHandle<io::Result<Session>>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        Ok((addr, thread::spawn(move || serve_session(listener, script))))
    }

    fn serve_session(listener: TcpListener, script: Script) -> io::Result<Session> {
        let (control, _) = listener.accept()?;
        control.set_read_timeout(Some(Duration::from_secs(10)))?;
        let mut writer = control.try_clone()?;
        let mut reader = io::BufReader::new(control);
        let mut session = Session::default();
        let mut data_listener: Option<TcpListener> = None;

        writer.write_all(b"220 ready\r\n")?;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let command = line.trim_end().to_string();
            session.commands.push(command.clone());
            let verb = command.split(' ').next().unwrap_or_default();

            if verb == "QUIT" {
                if script != Script::SilentAfterGreeting {
                    writer.write_all(b"221 bye\r\n")?;
                }
                break;
            }
            if script == Script::SilentAfterGreeting {
                continue;
            }

            let reply = match verb {
                "USER" => "331 password required".to_string(),
                "PASS" if script == Script::RejectLogin => "530 Login incorrect".to_string(),
                "PASS" => "230 logged in".to_string(),
                "CWD" => "550 no such directory".to_string(),
                "PWD" => "257 \"/\" is current directory".to_string(),
                "TYPE" => "200 type set".to_string(),
                "PASV" => {
                    let data = TcpListener::bind("127.0.0.1:0")?;
                    let port = data.local_addr()?.port();
                    data_listener = Some(data);
                    format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})",
                        port / 256,
                        port % 256
                    )
                }
                "STOR" => {
                    let data = data_listener
                        .take()
                        .ok_or_else(|| io::Error::other("STOR before PASV"))?;
                    writer.write_all(b"150 opening data connection\r\n")?;
                    let (mut stream, _) = data.accept()?;
                    let mut bytes = Vec::new();
                    stream.read_to_end(&mut bytes)?;
                    let name = command.trim_start_matches("STOR ").to_string();
                    session.stored = Some((name, bytes));
                    "226 transfer complete".to_string()
                }
                _ => "502 not implemented".to_string(),
            };
            writer.write_all(format!("{}\r\n", reply).as_bytes())?;
        }
        Ok(session)
    }

    fn target(host: &str) -> UploadTarget {
        UploadTarget {
            host: host.to_string(),
            username: "uploader".to_string(),
            password: "hunter2".to_string(),
            remote_directory: "/nightly".to_string(),
            protocol: Protocol::Ftp,
            region: None,
        }
    }

    #[test]
    fn test_authority_defaults_port() {
        assert_eq!(ftp_authority("ftp.example.com"), Ok("ftp.example.com:21".to_string()));
        assert_eq!(ftp_authority("ftp.example.com:2121"), Ok("ftp.example.com:2121".to_string()));
        assert_eq!(ftp_authority("ftp://ftp.example.com"), Ok("ftp.example.com:21".to_string()));
        assert_eq!(ftp_authority("ftp://10.0.0.5:2121/"), Ok("10.0.0.5:2121".to_string()));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() -> anyhow::Result<()> {
        // Bind then drop to get a local port with nothing listening on it.
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("bu_shop_1.sql.tar.gz");
        std::fs::write(&archive, b"archive")?;

        let err = FtpTransport::new(Duration::from_secs(2))
            .deliver(&target(&format!("127.0.0.1:{}", port)), &archive)
            .await
            .expect_err("nothing is listening");
        assert_eq!(err.stage, TransportStage::Connect);
        assert!(!err.message.contains("hunter2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_login_still_quits() -> anyhow::Result<()> {
        let (addr, server) = spawn_ftp_server(Script::RejectLogin)?;
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("bu_shop_1.sql.tar.gz");
        std::fs::write(&archive, b"archive")?;

        let err = FtpTransport::new(Duration::from_secs(5))
            .deliver(&target(&addr.to_string()), &archive)
            .await
            .expect_err("server rejects the password");
        assert_eq!(err.stage, TransportStage::Authenticate);
        assert!(err.message.contains("530"));
        assert!(!err.message.contains("hunter2"));

        let session = server.join().expect("server thread")?;
        assert_eq!(session.commands, vec!["USER uploader", "PASS hunter2", "QUIT"]);
        assert!(session.stored.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_refused_cwd_still_stores() -> anyhow::Result<()> {
        let (addr, server) = spawn_ftp_server(Script::RefuseCwd)?;
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("bu_shop_1.sql.tar.gz");
        std::fs::write(&archive, b"archive bytes")?;

        FtpTransport::new(Duration::from_secs(5))
            .deliver(&target(&addr.to_string()), &archive)
            .await?;

        let session = server.join().expect("server thread")?;
        let position = |verb: &str| session.commands.iter().position(|c| c.starts_with(verb));
        let cwd = position("CWD").expect("CWD was sent");
        let stor = position("STOR").expect("STOR was sent");
        assert_eq!(session.commands[cwd], "CWD /nightly");
        assert!(cwd < stor);
        assert_eq!(session.commands.last().map(String::as_str), Some("QUIT"));
        assert_eq!(
            session.stored,
            Some(("bu_shop_1.sql.tar.gz".to_string(), b"archive bytes".to_vec()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_silent_server_times_out_and_quits() -> anyhow::Result<()> {
        let (addr, server) = spawn_ftp_server(Script::SilentAfterGreeting)?;
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("bu_shop_1.sql.tar.gz");
        std::fs::write(&archive, b"archive")?;

        let started = Instant::now();
        let err = FtpTransport::new(Duration::from_millis(300))
            .deliver(&target(&addr.to_string()), &archive)
            .await
            .expect_err("server never answers USER");
        assert_eq!(err.stage, TransportStage::Authenticate);
        assert!(started.elapsed() < Duration::from_secs(5));

        let session = server.join().expect("server thread")?;
        assert_eq!(session.commands, vec!["USER uploader", "QUIT"]);
        Ok(())
    }
}
