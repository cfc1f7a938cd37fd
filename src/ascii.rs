//! Zaber ASCII protocol link (partial).
//!
//! Commands are single lines addressed to a device and axis:
//!
//! ```text
//! /1 1 get motion.tracking.limit.max\n
//! ```
//!
//! and each command is answered by exactly one reply line:
//!
//! ```text
//! @01 1 OK IDLE -- 25000000
//! │   │ │  │    │  └ data
//! │   │ │  │    └ warning flag (`--` when none)
//! │   │ │  └ axis status
//! │   │ └ OK or RJ (rejected)
//! │   └ axis
//! └ device
//! ```
//!
//! Info (`#`) and alert (`!`) lines may arrive in between and are skipped.
//! Message ids, checksums and multi-line streams are not supported.
//!
//! [`AsciiLink`] implements the driver boundary's [`MotionLink`], handing out
//! [`Axis`] and [`DeviceUnit`] handles that share one port lock, so commands
//! from different axes never interleave on the wire.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::driver::{Axis, DeviceUnit, DriverResult, MotionLink, Target};
use crate::error::DriverError;
use crate::transport::{self, wrap_shared, DynLink, Endpoint, SharedLink};

/// Format a command line for `target`.
pub fn format_command(target: Target, text: &str) -> String {
    if text.is_empty() {
        format!("/{} {}\n", target.device, target.axis)
    } else {
        format!("/{} {} {}\n", target.device, target.axis, text)
    }
}

/// A parsed reply line.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Device and axis the reply came from.
    pub target: Target,
    /// `false` when the device answered `RJ`.
    pub accepted: bool,
    /// `true` when the device reported `BUSY`.
    pub busy: bool,
    /// Highest-priority warning flag, `--` when none.
    pub warning: String,
    /// Reply payload, empty when there is none.
    pub data: String,
}

impl Reply {
    /// Data field as a number.
    pub fn number(&self) -> DriverResult<f64> {
        self.data
            .trim()
            .parse()
            .map_err(|_| DriverError::Protocol(format!("expected a number, got '{}'", self.data)))
    }
}

/// Parse one line from the device.
///
/// Returns `Ok(None)` for info and alert lines.
pub fn parse_reply(line: &str) -> DriverResult<Option<Reply>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let malformed = || DriverError::Protocol(format!("malformed reply '{line}'"));

    match line.chars().next() {
        Some('#') | Some('!') => return Ok(None),
        Some('@') => {}
        _ => return Err(malformed()),
    }

    let mut fields = line[1..].splitn(6, ' ');
    let mut next = || fields.next().ok_or_else(malformed);
    let device: u8 = next()?.parse().map_err(|_| malformed())?;
    let axis: u8 = next()?.parse().map_err(|_| malformed())?;
    let accepted = match next()? {
        "OK" => true,
        "RJ" => false,
        _ => return Err(malformed()),
    };
    let busy = match next()? {
        "IDLE" => false,
        "BUSY" => true,
        _ => return Err(malformed()),
    };
    let warning = next()?.to_string();
    let data = fields.next().unwrap_or_default().to_string();

    Ok(Some(Reply {
        target: Target::new(device, axis),
        accepted,
        busy,
        warning,
        data,
    }))
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// A controller chain spoken to over the ASCII protocol.
#[derive(Clone)]
pub struct AsciiLink {
    port: SharedLink,
    read_timeout: Duration,
}

impl AsciiLink {
    /// Wrap an open link; replies slower than `read_timeout` fail.
    pub fn new(link: DynLink, read_timeout: Duration) -> Self {
        Self {
            port: wrap_shared(link),
            read_timeout,
        }
    }

    /// Open `endpoint` and wrap it.
    pub async fn open(endpoint: &Endpoint, read_timeout: Duration) -> DriverResult<Self> {
        Ok(Self::new(transport::open(endpoint).await?, read_timeout))
    }

    /// Send one command and wait for its reply.
    ///
    /// A rejected command is returned as [`DriverError::Rejected`].
    pub async fn command(&self, target: Target, text: &str) -> DriverResult<Reply> {
        let mut port = self.port.lock().await;
        let line = format_command(target, text);
        debug!(command = line.trim_end(), "ascii send");
        port.get_mut().write_all(line.as_bytes()).await?;
        port.get_mut().flush().await?;

        loop {
            let mut buf = String::new();
            let read = timeout(self.read_timeout, port.read_line(&mut buf))
                .await
                .map_err(|_| {
                    DriverError::Transport(format!(
                        "no reply from {target} within {:?}",
                        self.read_timeout
                    ))
                })??;
            if read == 0 {
                return Err(DriverError::Transport("link closed".to_string()));
            }
            trace!(line = buf.trim_end(), "ascii recv");
            if buf.trim().is_empty() {
                continue;
            }

            let Some(reply) = parse_reply(&buf)? else {
                continue;
            };
            if reply.target != target {
                debug!(expected = %target, got = %reply.target, "skipping reply for another target");
                continue;
            }
            if !reply.accepted {
                return Err(DriverError::Rejected(format!("{} ({})", reply.data, text)));
            }
            return Ok(reply);
        }
    }

    /// Number of axes on `device`; `NotFound` if nobody answers.
    async fn axis_count(&self, device: u8) -> DriverResult<u8> {
        let reply = self
            .command(Target::device(device), "get system.axiscount")
            .await
            .map_err(|err| match err {
                DriverError::Transport(_) => {
                    DriverError::NotFound(format!("device {device} does not respond"))
                }
                other => other,
            })?;
        let count = reply.number()?;
        Ok(count as u8)
    }
}

#[async_trait]
impl MotionLink for AsciiLink {
    async fn axis(&self, target: Target) -> DriverResult<Arc<dyn Axis>> {
        let count = self.axis_count(target.device).await?;
        if target.axis == 0 || target.axis > count {
            return Err(DriverError::NotFound(format!(
                "axis {} on device {} ({} axes)",
                target.axis, target.device, count
            )));
        }
        Ok(Arc::new(AsciiAxis {
            link: self.clone(),
            target,
        }))
    }

    async fn device(&self, address: u8) -> DriverResult<Arc<dyn DeviceUnit>> {
        self.axis_count(address).await?;
        Ok(Arc::new(AsciiDevice { address }))
    }
}

/// One axis on an [`AsciiLink`].
pub struct AsciiAxis {
    link: AsciiLink,
    target: Target,
}

#[async_trait]
impl Axis for AsciiAxis {
    fn target(&self) -> Target {
        self.target
    }

    async fn is_busy(&self) -> DriverResult<bool> {
        Ok(self.link.command(self.target, "").await?.busy)
    }

    async fn get_setting(&self, name: &str) -> DriverResult<f64> {
        self.link
            .command(self.target, &format!("get {name}"))
            .await?
            .number()
    }

    async fn set_setting(&self, name: &str, value: f64) -> DriverResult<()> {
        self.link
            .command(self.target, &format!("set {name} {}", format_value(value)))
            .await?;
        Ok(())
    }
}

struct AsciiDevice {
    address: u8,
}

impl DeviceUnit for AsciiDevice {
    fn address(&self) -> u8 {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Answer each command line with whatever `respond` returns.
    fn simulated_device(
        device_side: DuplexStream,
        respond: impl Fn(&str) -> Vec<String> + Send + 'static,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(device_side);
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                for reply in respond(&line) {
                    write.write_all(reply.as_bytes()).await.unwrap();
                }
                seen.push(line);
            }
            seen
        })
    }

    fn link(host_side: DuplexStream) -> AsciiLink {
        AsciiLink::new(Box::new(host_side), Duration::from_millis(200))
    }

    #[test]
    fn command_formatting() {
        assert_eq!(
            format_command(Target::new(1, 2), "get pos"),
            "/1 2 get pos\n"
        );
        assert_eq!(format_command(Target::new(3, 1), ""), "/3 1\n");
    }

    #[test]
    fn reply_parsing() {
        let reply = parse_reply("@01 1 OK BUSY -- 25000000\r\n").unwrap().unwrap();
        assert_eq!(reply.target, Target::new(1, 1));
        assert!(reply.accepted);
        assert!(reply.busy);
        assert_eq!(reply.warning, "--");
        assert_eq!(reply.number().unwrap(), 25_000_000.0);

        let rejected = parse_reply("@02 0 RJ IDLE -- BADCOMMAND").unwrap().unwrap();
        assert!(!rejected.accepted);
        assert_eq!(rejected.data, "BADCOMMAND");

        assert!(parse_reply("#01 0 info line").unwrap().is_none());
        assert!(parse_reply("!01 1 IDLE --").unwrap().is_none());
        assert!(parse_reply("@xx 1 OK IDLE -- 0").is_err());
        assert!(parse_reply("garbage").is_err());
    }

    #[test]
    fn whole_values_are_sent_as_integers() {
        assert_eq!(format_value(12_250_000.0), "12250000");
        assert_eq!(format_value(0.5), "0.5");
    }

    #[tokio::test]
    async fn get_setting_skips_info_lines() {
        let (host, device) = tokio::io::duplex(256);
        let sim = simulated_device(device, |line| match line {
            "/1 1 get motion.tracking.limit.max" => vec![
                "#01 1 tracking limits are in native units\r\n".into(),
                "@01 1 OK IDLE -- 25000000\r\n".into(),
            ],
            _ => vec!["@01 1 RJ IDLE -- BADCOMMAND\r\n".into()],
        });

        let link = link(host);
        let axis = AsciiAxis {
            link: link.clone(),
            target: Target::new(1, 1),
        };
        assert_eq!(
            axis.get_setting("motion.tracking.limit.max").await.unwrap(),
            25_000_000.0
        );
        assert!(matches!(
            axis.get_setting("nope").await,
            Err(DriverError::Rejected(_))
        ));

        drop(axis);
        drop(link);
        let seen = sim.await.unwrap();
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn axis_lookup_checks_axis_count() {
        let (host, device) = tokio::io::duplex(256);
        let _sim = simulated_device(device, |line| match line {
            "/1 0 get system.axiscount" => vec!["@01 0 OK IDLE -- 1\r\n".into()],
            "/1 1" => vec!["@01 1 OK BUSY -- 0\r\n".into()],
            _ => vec![],
        });

        let link = link(host);
        let axis = link.axis(Target::new(1, 1)).await.unwrap();
        assert!(axis.is_busy().await.unwrap());

        assert!(matches!(
            link.axis(Target::new(1, 2)).await,
            Err(DriverError::NotFound(_))
        ));
        // Device 5 never answers.
        assert!(matches!(
            link.device(5).await,
            Err(DriverError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn set_setting_sends_native_integer() {
        let (host, device) = tokio::io::duplex(256);
        let sim = simulated_device(device, |line| {
            vec![format!(
                "@01 1 OK IDLE -- {}\r\n",
                if line.starts_with("/1 1 set") { "0" } else { "BADCOMMAND" }
            )]
        });

        let link = link(host);
        let axis = AsciiAxis {
            link: link.clone(),
            target: Target::new(1, 1),
        };
        axis.set_setting("motion.tracking.limit.min", 2_000_000.0)
            .await
            .unwrap();

        drop(axis);
        drop(link);
        assert_eq!(
            sim.await.unwrap(),
            vec!["/1 1 set motion.tracking.limit.min 2000000".to_string()]
        );
    }
}
