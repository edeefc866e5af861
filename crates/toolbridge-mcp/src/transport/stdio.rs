//! Stdio transport implementation for process-based MCP servers

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use toolbridge_config::ProcessConfig;
use toolbridge_core::{BridgeError, Result};
use tracing::{debug, error, info, warn};

use super::Transport;
use crate::types::JsonRpcMessage;

/// How long a server gets to exit on its own after stdin is closed
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Stdio transport for process-based MCP servers
pub struct StdioTransport {
    server: String,
    command: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    incoming: mpsc::Receiver<JsonRpcMessage>,
    readers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("server", &self.server)
            .field("command", &self.command)
            .field("running", &self.child.is_some())
            .finish()
    }
}

impl StdioTransport {
    /// Spawn the configured server process and start reading its output
    pub async fn spawn(server: &str, config: &ProcessConfig) -> Result<Self> {
        info!(
            "Starting MCP server '{}' via stdio: {} {:?}",
            server, config.command, config.args
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| BridgeError::ConnectionError {
            server: server.to_string(),
            message: format!("failed to spawn '{}': {}", config.command, e),
        })?;

        let missing_pipe = |pipe: &str| BridgeError::ConnectionError {
            server: server.to_string(),
            message: format!("failed to capture process {}", pipe),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let (tx, incoming) = mpsc::channel::<JsonRpcMessage>(100);

        let stdout_server = server.to_string();
        let stdout_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        debug!("Received from MCP server '{}': {}", stdout_server, trimmed);
                        match JsonRpcMessage::parse(trimmed) {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(
                                    "Non-JSON-RPC output from '{}': {} - {}",
                                    stdout_server, trimmed, e
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        info!("MCP server '{}' stdout closed", stdout_server);
                        break;
                    }
                    Err(e) => {
                        error!("Error reading from MCP server '{}' stdout: {}", stdout_server, e);
                        break;
                    }
                }
            }
        });

        let stderr_server = server.to_string();
        let stderr_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    debug!("MCP server '{}' stderr: {}", stderr_server, trimmed);
                }
            }
        });

        Ok(Self {
            server: server.to_string(),
            command: config.command.clone(),
            child: Some(child),
            stdin: Some(stdin),
            incoming,
            readers: vec![stdout_reader, stderr_reader],
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| BridgeError::ConnectionError {
            server: self.server.clone(),
            message: "process stdin not available".into(),
        })?;

        let mut json = message.to_json()?;
        debug!("Sending to MCP server '{}': {}", self.server, json);
        json.push('\n');

        let write = async {
            stdin.write_all(json.as_bytes()).await?;
            stdin.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        write.await.map_err(|e| BridgeError::ConnectionError {
            server: self.server.clone(),
            message: format!("failed to write to stdin: {}", e),
        })
    }

    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>> {
        Ok(self.incoming.recv().await)
    }

    fn is_connected(&self) -> bool {
        self.child.is_some() && !self.incoming.is_closed()
    }

    async fn close(&mut self) -> Result<()> {
        // Closing stdin is the polite shutdown signal for stdio servers
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(mut child) = self.child.take() {
            info!("Closing stdio transport for MCP server '{}'", self.server);
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("MCP server '{}' exited with {}", self.server, status),
                Ok(Err(e)) => warn!("Failed to wait for MCP server '{}': {}", self.server, e),
                Err(_) => {
                    debug!("MCP server '{}' still running, killing it", self.server);
                    if let Err(e) = child.kill().await {
                        error!("Failed to kill MCP server '{}' process: {}", self.server, e);
                    }
                }
            }
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }
        self.incoming.close();
        Ok(())
    }
}
