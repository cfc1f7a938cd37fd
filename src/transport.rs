//! Byte transports for controller links.
//!
//! A Zaber controller chain is reached either through a serial port or
//! through a TCP bridge; both end up as a [`DynLink`], so protocol code
//! never cares which one it talks to.
//!
//! # Feature Flag
//!
//! Serial ports need the `serial` feature (on by default). TCP is always
//! available.

use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::info;

use crate::driver::DriverResult;
use crate::error::DriverError;

/// Default baud rate of Zaber ASCII devices.
pub const DEFAULT_BAUD: u32 = 115_200;

// =============================================================================
// Link Traits
// =============================================================================

/// Anything a line protocol can be spoken over.
///
/// This includes `tokio_serial::SerialStream`, `TcpStream` and
/// `tokio::io::DuplexStream` (testing).
pub trait LinkIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkIO for T {}

/// Type-erased link.
pub type DynLink = Box<dyn LinkIO>;

/// Link shared between axes of one chain, with buffered line reads.
pub type SharedLink = Arc<Mutex<BufReader<DynLink>>>;

/// Share one link between handles.
pub fn wrap_shared(link: DynLink) -> SharedLink {
    Arc::new(Mutex::new(BufReader::new(link)))
}

// =============================================================================
// Endpoints
// =============================================================================

/// Where a controller chain is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A local serial device.
    Serial {
        /// Device path, e.g. `/dev/ttyUSB0`.
        path: String,
        /// Line rate in baud.
        baud: u32,
    },
    /// A TCP-to-serial bridge.
    Tcp {
        /// Hostname or IP address.
        host: String,
        /// TCP port.
        port: u16,
    },
}

impl Endpoint {
    /// Serial endpoint at the controller's default baud rate.
    pub fn serial(path: impl Into<String>) -> Self {
        Endpoint::Serial {
            path: path.into(),
            baud: DEFAULT_BAUD,
        }
    }

    /// Parse `host` or `host:port`, filling in `default_port` when absent.
    pub fn tcp(address: &str, default_port: u16) -> DriverResult<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(DriverError::Transport("empty TCP address".to_string()));
        }
        match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| DriverError::Transport(format!("invalid TCP port in '{address}'")))?;
                Ok(Endpoint::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            None => Ok(Endpoint::Tcp {
                host: address.to_string(),
                port: default_port,
            }),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Serial { path, baud } => write!(f, "{path}@{baud}"),
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Open the transport behind `endpoint`.
pub async fn open(endpoint: &Endpoint) -> DriverResult<DynLink> {
    let link: DynLink = match endpoint {
        Endpoint::Serial { path, baud } => Box::new(open_serial(path, *baud).await?),
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(|e| DriverError::Transport(format!("connect to {endpoint}: {e}")))?;
            stream.set_nodelay(true)?;
            Box::new(stream)
        }
    };
    info!(%endpoint, "link opened");
    Ok(link)
}

/// Open a serial port on a blocking thread with 8N1, no flow control.
#[cfg(feature = "serial")]
async fn open_serial(path: &str, baud: u32) -> DriverResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let path_owned = path.to_string();
    spawn_blocking(move || {
        tokio_serial::new(&path_owned, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| DriverError::Transport(format!("open serial port {path_owned}: {e}")))
    })
    .await
    .map_err(|e| DriverError::Transport(format!("serial open task failed: {e}")))?
}

#[cfg(not(feature = "serial"))]
async fn open_serial(path: &str, _baud: u32) -> DriverResult<TcpStream> {
    Err(DriverError::Transport(format!(
        "cannot open {path}: built without the `serial` feature"
    )))
}
