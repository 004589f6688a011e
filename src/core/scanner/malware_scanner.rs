// src/core/scanner/malware_scanner.rs

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::ScannerAdapter;
use crate::config::Config;
use crate::core::error::ToolError;
use crate::core::models::{Availability, ScanRun, ScanTarget, ScannerKind};
use crate::core::normalizer::{self, reply_lines};

const TOOL: &str = "clamd";
/// Chunk size for INSTREAM uploads; well under clamd's default StreamMaxLength.
const STREAM_CHUNK: usize = 64 * 1024;

pub const DEFAULT_SOCKET: &str = "/var/run/clamav/clamd.ctl";
pub const DEFAULT_TCP_PORT: u16 = 3310;

/// Where the clamd daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClamdEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl std::fmt::Display for ClamdEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// `Path` asks the daemon to open the file itself (SCAN); `Stream` uploads the
/// bytes (INSTREAM), for daemons that cannot read the caller's files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ClamdMode {
    #[default]
    Path,
    Stream,
}

pub struct MalwareAdapter {
    endpoint: ClamdEndpoint,
    mode: ClamdMode,
    timeout: Duration,
}

impl MalwareAdapter {
    pub fn new(endpoint: ClamdEndpoint, mode: ClamdMode, timeout: Duration) -> Self {
        Self {
            endpoint,
            mode,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.clamd.clone(), config.clamd_mode, config.daemon_timeout)
    }

    /// Sends one command and reads the reply until the daemon closes the connection.
    async fn exchange(&self, command: &[u8], upload: Option<&Path>) -> std::io::Result<String> {
        match &self.endpoint {
            ClamdEndpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                talk(stream, command, upload).await
            }
            ClamdEndpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                talk(stream, command, upload).await
            }
        }
    }

    /// Runs one exchange under the adapter's time bound.
    async fn bounded(&self, command: &[u8], upload: Option<&Path>) -> Result<String, ToolError> {
        match timeout(self.timeout, self.exchange(command, upload)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(ToolError::Io {
                tool: TOOL.to_string(),
                source: e,
            }),
            Err(_) => Err(ToolError::Timeout {
                tool: TOOL.to_string(),
                after: self.timeout,
            }),
        }
    }

    /// `zPING` must be answered with `PONG`.
    pub async fn ping(&self) -> Result<(), ToolError> {
        let reply = self.bounded(b"zPING\0", None).await?;
        if reply_lines(&reply).next() == Some("PONG") {
            Ok(())
        } else {
            Err(ToolError::malformed("clamd", format!("unexpected PING reply {reply:?}")))
        }
    }

    pub async fn version(&self) -> Option<String> {
        self.bounded(b"zVERSION\0", None)
            .await
            .ok()
            .and_then(|reply| reply_lines(&reply).next().map(str::to_string))
    }

    async fn scan(&self, target: &ScanTarget) -> Result<String, ToolError> {
        let path = target
            .path()
            .ok_or_else(|| ToolError::malformed("clamd", "malware scans need a filesystem target"))?;
        match self.mode {
            ClamdMode::Path => {
                // The daemon resolves paths relative to its own cwd.
                let absolute = tokio::fs::canonicalize(&path).await.map_err(|e| ToolError::Io {
                    tool: TOOL.to_string(),
                    source: e,
                })?;
                let command = format!("zSCAN {}\0", absolute.display());
                self.bounded(command.as_bytes(), None).await
            }
            ClamdMode::Stream => self.bounded(b"zINSTREAM\0", Some(&path)).await,
        }
    }
}

async fn talk<S>(mut stream: S, command: &[u8], upload: Option<&Path>) -> std::io::Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(command).await?;
    if let Some(path) = upload {
        let mut file = tokio::fs::File::open(path).await?;
        let mut chunk = vec![0u8; STREAM_CHUNK];
        loop {
            let read = file.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            stream.write_all(&(read as u32).to_be_bytes()).await?;
            stream.write_all(&chunk[..read]).await?;
        }
        stream.write_all(&0u32.to_be_bytes()).await?;
    }
    stream.flush().await?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

#[async_trait]
impl ScannerAdapter for MalwareAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Malware
    }

    fn scans_per_file(&self) -> bool {
        true
    }

    async fn invoke(&self, target: &ScanTarget) -> Result<ScanRun, ToolError> {
        let started_at = Utc::now();
        info!(%target, endpoint = %self.endpoint, mode = %self.mode, "Starting malware scan.");

        if let Err(e) = self.ping().await {
            warn!(endpoint = %self.endpoint, error = %e, "clamd is unreachable.");
            return Ok(ScanRun::unavailable(
                ScannerKind::Malware,
                target.clone(),
                started_at,
                Availability::Unreachable,
            ));
        }
        let version = self.version().await;

        let reply = self.scan(target).await?;
        debug!(%target, reply = %reply.trim_end_matches('\0'), "clamd replied.");

        if let Some(line) = reply_lines(&reply).find(|l| l.ends_with(" ERROR")) {
            return Err(ToolError::Execution {
                tool: TOOL.to_string(),
                status: None,
                stderr: line.to_string(),
            });
        }

        let findings = normalizer::normalize(ScannerKind::Malware, target, &reply)?;
        info!(%target, findings = findings.len(), "Malware scan finished.");
        Ok(ScanRun::completed(ScannerKind::Malware, target.clone(), started_at, findings)
            .with_tool_version(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::models::{RunStatus, Severity};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    /// Minimal clamd stand-in: answers PING/VERSION, flags files whose content
    /// contains "EICAR", and records every command it receives.
    fn fake_clamd(socket: PathBuf, stall_scans: bool) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let listener = UnixListener::bind(&socket).unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut conn, _)) = listener.accept().await else { break };
                let log = log.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut byte = [0u8; 1];
                    while conn.read_exact(&mut byte).await.is_ok() && byte[0] != 0 {
                        buf.push(byte[0]);
                    }
                    let command = String::from_utf8_lossy(&buf).into_owned();
                    log.lock().unwrap().push(command.clone());

                    let reply = if command == "zPING" {
                        "PONG\0".to_string()
                    } else if command == "zVERSION" {
                        "ClamAV 1.2.1/27100\0".to_string()
                    } else if let Some(path) = command.strip_prefix("zSCAN ") {
                        if stall_scans {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                        let body = std::fs::read_to_string(path).unwrap_or_default();
                        if body.contains("EICAR") {
                            format!("{path}: Win.Test.EICAR_HDB-1 FOUND\0")
                        } else if body.is_empty() {
                            format!("{path}: lstat() failed: No such file or directory. ERROR\0")
                        } else {
                            format!("{path}: OK\0")
                        }
                    } else if command == "zINSTREAM" {
                        let mut body = Vec::new();
                        loop {
                            let mut len = [0u8; 4];
                            conn.read_exact(&mut len).await.unwrap();
                            let len = u32::from_be_bytes(len) as usize;
                            if len == 0 {
                                break;
                            }
                            let mut chunk = vec![0u8; len];
                            conn.read_exact(&mut chunk).await.unwrap();
                            body.extend_from_slice(&chunk);
                        }
                        if String::from_utf8_lossy(&body).contains("EICAR") {
                            "stream: Eicar-Signature FOUND\0".to_string()
                        } else {
                            "stream: OK\0".to_string()
                        }
                    } else {
                        "UNKNOWN COMMAND\0".to_string()
                    };
                    let _ = conn.write_all(reply.as_bytes()).await;
                    let _ = conn.shutdown().await;
                });
            }
        });
        seen
    }

    fn adapter(socket: &Path, mode: ClamdMode) -> MalwareAdapter {
        MalwareAdapter::new(
            ClamdEndpoint::Unix(socket.to_path_buf()),
            mode,
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn test_unreachable_daemon_yields_unavailable_run() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("sample.txt");
        std::fs::write(&file, "hello").unwrap();

        let adapter = adapter(&dir.path().join("missing.sock"), ClamdMode::Path);
        let run = adapter.invoke(&ScanTarget::file(&file)).await.unwrap();
        assert_eq!(run.availability, Availability::Unreachable);
        assert_eq!(run.status, RunStatus::Unavailable);
        assert!(run.findings.is_empty());
    }

    #[tokio::test]
    async fn test_found_and_clean_files() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("clamd.sock");
        let seen = fake_clamd(socket.clone(), false);

        let infected = dir.path().join("eicar.com");
        std::fs::write(&infected, "X5O!P%@AP EICAR test").unwrap();
        let clean = dir.path().join("notes.txt");
        std::fs::write(&clean, "hello").unwrap();

        let adapter = adapter(&socket, ClamdMode::Path);
        let run = adapter.invoke(&ScanTarget::file(&infected)).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.tool_version.as_deref(), Some("ClamAV 1.2.1/27100"));
        assert_eq!(run.findings.len(), 1);
        assert_eq!(run.findings[0].severity, Severity::Found);
        assert_eq!(run.findings[0].identifier, "Win.Test.EICAR_HDB-1");

        let run = adapter.invoke(&ScanTarget::file(&clean)).await.unwrap();
        assert_eq!(run.findings.len(), 1);
        assert_eq!(run.findings[0].severity, Severity::Clean);

        let commands = seen.lock().unwrap().clone();
        assert_eq!(commands[0], "zPING");
        assert!(commands.iter().any(|c| c.starts_with("zSCAN /")));
    }

    #[tokio::test]
    async fn test_stream_mode_uploads_content() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("clamd.sock");
        let seen = fake_clamd(socket.clone(), false);

        let infected = dir.path().join("payload.bin");
        std::fs::write(&infected, "...EICAR...").unwrap();

        let run = adapter(&socket, ClamdMode::Stream)
            .invoke(&ScanTarget::file(&infected))
            .await
            .unwrap();
        assert_eq!(run.findings[0].identifier, "Eicar-Signature");
        assert!(seen.lock().unwrap().iter().any(|c| c == "zINSTREAM"));
    }

    #[tokio::test]
    async fn test_error_reply_is_execution_error() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("clamd.sock");
        fake_clamd(socket.clone(), false);

        let empty = dir.path().join("empty");
        std::fs::write(&empty, "").unwrap();
        let err = adapter(&socket, ClamdMode::Path)
            .invoke(&ScanTarget::file(&empty))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecutionError);
    }

    #[tokio::test]
    async fn test_stalled_scan_times_out() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("clamd.sock");
        fake_clamd(socket.clone(), true);

        let file = dir.path().join("slow.txt");
        std::fs::write(&file, "hello").unwrap();
        let err = adapter(&socket, ClamdMode::Path)
            .invoke(&ScanTarget::file(&file))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[test]
    fn test_mode_parsing() {
        use std::str::FromStr;
        assert_eq!(ClamdMode::from_str("stream").unwrap(), ClamdMode::Stream);
        assert_eq!(ClamdMode::default().to_string(), "path");
        assert_eq!(
            ClamdEndpoint::Tcp("127.0.0.1:3310".to_string()).to_string(),
            "tcp:127.0.0.1:3310"
        );
    }
}
