//! AT command channel with CRLF line framing

use bytes::BytesMut;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, info};

use crate::error::{NodeError, Result};
use crate::serial::SerialPortIO;

/// Request/response channel to an AT-command modem
///
/// Each command is written with a CRLF terminator; response lines are
/// collected until `OK` or an error result code arrives. Echoed commands and
/// blank lines are dropped.
pub struct AtChannel<P> {
    port: P,
    rx: BytesMut,
    command_timeout: Duration,
    dump: bool,
}

impl<P> std::fmt::Debug for AtChannel<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtChannel")
            .field("command_timeout", &self.command_timeout)
            .field("buffered", &self.rx.len())
            .finish_non_exhaustive()
    }
}

impl<P: SerialPortIO> AtChannel<P> {
    pub fn new(port: P, command_timeout: Duration) -> Self {
        Self {
            port,
            rx: BytesMut::with_capacity(512),
            command_timeout,
            dump: false,
        }
    }

    /// Logs AT traffic at `info` instead of `debug`
    pub fn with_dump(mut self, dump: bool) -> Self {
        self.dump = dump;
        self
    }

    fn trace(&self, direction: &str, text: &str) {
        if self.dump {
            info!("{} {}", direction, text);
        } else {
            debug!("{} {}", direction, text);
        }
    }

    /// Runs `cmd` with the default command timeout
    pub async fn command(&mut self, cmd: &str) -> Result<Vec<String>> {
        self.command_with_timeout(cmd, self.command_timeout).await
    }

    /// Runs `cmd` and returns the information lines preceding `OK`.
    ///
    /// # Errors
    ///
    /// - `Modem`: `ERROR`/`+CME ERROR` result, or no result within `timeout`
    /// - `Serial`: the port failed
    pub async fn command_with_timeout(&mut self, cmd: &str, timeout: Duration) -> Result<Vec<String>> {
        // Unsolicited leftovers would be mistaken for this command's answer
        self.rx.clear();
        if let Err(e) = self.port.clear_input().await {
            debug!("Failed to clear modem input: {}", e);
        }

        self.trace(">>", cmd);
        let mut frame = Vec::with_capacity(cmd.len() + 2);
        frame.extend_from_slice(cmd.as_bytes());
        frame.extend_from_slice(b"\r\n");

        self.port
            .write_all(&frame)
            .await
            .map_err(|e| NodeError::Serial(format!("Failed to write {}: {}", cmd, e)))?;
        self.port
            .flush()
            .await
            .map_err(|e| NodeError::Serial(format!("Failed to flush serial port: {}", e)))?;

        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let Some(line) = self.read_line(deadline).await? else {
                return Err(NodeError::Modem(format!("{} timed out", cmd)));
            };

            if line == cmd {
                continue;
            }
            if line == "OK" {
                return Ok(lines);
            }
            if line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR") {
                return Err(NodeError::Modem(format!("{}: {}", cmd, line)));
            }
            lines.push(line);
        }
    }

    async fn read_line(&mut self, deadline: Instant) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.rx.iter().position(|&b| b == b'\n') {
                let raw = self.rx.split_to(pos + 1);
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                self.trace("<<", &line);
                return Ok(Some(line));
            }

            let mut chunk = [0u8; 256];
            match timeout_at(deadline, self.port.read(&mut chunk)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Err(NodeError::Serial("serial port closed".to_string())),
                Ok(Ok(n)) => self.rx.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(NodeError::Serial(format!("Failed to read: {}", e))),
            }
        }
    }
}

/// Value of an `+TAG: a,b,c` response line split on commas, quotes kept
pub(crate) fn response_fields<'a>(lines: &'a [String], tag: &str) -> Option<Vec<&'a str>> {
    lines.iter().find_map(|line| {
        line.strip_prefix(tag)
            .map(|rest| rest.trim_start_matches(':').trim().split(',').map(str::trim).collect())
    })
}

/// Strips surrounding double quotes
pub(crate) fn unquote(field: &str) -> &str {
    field.trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use std::io;

    fn channel(port: &MockSerialPort) -> AtChannel<MockSerialPort> {
        AtChannel::new(port.clone(), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_collects_lines_until_ok() {
        let port = MockSerialPort::new();
        port.reply_lines(&["+CSQ: 21,99", "OK"]);
        let mut at = channel(&port);

        let lines = at.command("AT+CSQ").await.unwrap();

        assert_eq!(lines, vec!["+CSQ: 21,99"]);
        assert_eq!(port.get_written_data(), vec![b"AT+CSQ\r\n".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_skips_echo() {
        let port = MockSerialPort::new();
        port.reply(b"AT+COPS?\r\r\n+COPS: 0,0,\"STC\",7\r\n\r\nOK\r\n");
        let mut at = channel(&port);

        let lines = at.command("AT+COPS?").await.unwrap();
        assert_eq!(lines, vec!["+COPS: 0,0,\"STC\",7"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_error_result() {
        let port = MockSerialPort::new();
        port.reply_lines(&["+CME ERROR: SIM not inserted"]);
        let mut at = channel(&port);

        match at.command("AT+CPIN?").await {
            Err(NodeError::Modem(msg)) => assert!(msg.contains("SIM not inserted")),
            other => panic!("Expected Modem error, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_times_out_on_silence() {
        let port = MockSerialPort::new();
        port.silence();
        let mut at = channel(&port);
        let start = Instant::now();

        let result = at.command("AT").await;

        assert!(matches!(result, Err(NodeError::Modem(_))));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_discards_stale_input() {
        let port = MockSerialPort::new();
        port.reply_lines(&["+CSQ: 10,99", "OK", "+APP PDP: ACTIVE"]);
        port.reply_lines(&["OK"]);
        let mut at = channel(&port);

        at.command("AT+CSQ").await.unwrap();
        assert!(at.command("AT").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_drops_unsolicited_bytes() {
        let port = MockSerialPort::new();
        port.arrive(b"\r\n+CPIN: READY\r\n");
        port.reply_lines(&["OK"]);
        let mut at = channel(&port);

        assert!(at.command("AT").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_serial_error() {
        let port = MockSerialPort::new();
        port.set_write_error(io::ErrorKind::BrokenPipe);
        let mut at = channel(&port);

        assert!(matches!(at.command("AT").await, Err(NodeError::Serial(_))));
    }

    #[test]
    fn test_response_fields() {
        let lines = vec!["+CREG: 0,5".to_string()];
        assert_eq!(response_fields(&lines, "+CREG"), Some(vec!["0", "5"]));
        assert_eq!(response_fields(&lines, "+CEREG"), None);
        assert_eq!(unquote("\"STC\""), "STC");
    }
}
