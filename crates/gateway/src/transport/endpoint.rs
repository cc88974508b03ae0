//! Platform endpoint: Unix domain sockets on Unix, named pipes on Windows
//!
//! Both sides only ever see a boxed duplex byte stream, so framing and
//! routing are identical on every platform.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional byte stream a connection can run over
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn DuplexStream>;

#[cfg(unix)]
mod imp {
    use super::BoxedStream;
    use log::{debug, warn};
    use std::io;
    use std::path::PathBuf;
    use tokio::net::{UnixListener, UnixStream};

    pub fn endpoint_address(pipe_name: &str) -> String {
        endpoint_path(pipe_name).to_string_lossy().into_owned()
    }

    fn endpoint_path(pipe_name: &str) -> PathBuf {
        if pipe_name.contains('/') {
            PathBuf::from(pipe_name)
        } else {
            std::env::temp_dir().join(format!("{pipe_name}.sock"))
        }
    }

    pub struct PipeListener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl PipeListener {
        pub fn bind(pipe_name: &str, _max_instances: usize, _buffer_size: usize) -> io::Result<Self> {
            let path = endpoint_path(pipe_name);
            if path.exists() {
                debug!("Removing stale socket {}", path.display());
                std::fs::remove_file(&path)?;
            }
            let listener = UnixListener::bind(&path)?;
            Ok(Self { listener, path })
        }

        pub async fn accept(&self) -> io::Result<BoxedStream> {
            let (stream, _) = self.listener.accept().await?;
            Ok(Box::new(stream))
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove socket {}: {}", self.path.display(), e);
            }
        }
    }

    pub async fn connect(pipe_name: &str) -> io::Result<BoxedStream> {
        let stream = UnixStream::connect(endpoint_path(pipe_name)).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(windows)]
mod imp {
    use super::BoxedStream;
    use parking_lot::Mutex;
    use std::io;
    use std::time::Duration;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

    const ERROR_PIPE_BUSY: i32 = 231;
    const BUSY_RETRY: Duration = Duration::from_millis(50);

    pub fn endpoint_address(pipe_name: &str) -> String {
        format!(r"\\.\pipe\{pipe_name}")
    }

    /// Each accept consumes one pipe instance; the next is created on demand.
    pub struct PipeListener {
        address: String,
        max_instances: usize,
        buffer_size: u32,
        reserved: Mutex<Option<NamedPipeServer>>,
    }

    impl PipeListener {
        pub fn bind(pipe_name: &str, max_instances: usize, buffer_size: usize) -> io::Result<Self> {
            let address = endpoint_address(pipe_name);
            let buffer_size = u32::try_from(buffer_size).unwrap_or(u32::MAX);
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .max_instances(max_instances)
                .in_buffer_size(buffer_size)
                .out_buffer_size(buffer_size)
                .create(&address)?;
            Ok(Self {
                address,
                max_instances,
                buffer_size,
                reserved: Mutex::new(Some(first)),
            })
        }

        fn instance(&self) -> io::Result<NamedPipeServer> {
            if let Some(server) = self.reserved.lock().take() {
                return Ok(server);
            }
            ServerOptions::new()
                .max_instances(self.max_instances)
                .in_buffer_size(self.buffer_size)
                .out_buffer_size(self.buffer_size)
                .create(&self.address)
        }

        pub async fn accept(&self) -> io::Result<BoxedStream> {
            let server = self.instance()?;
            server.connect().await?;
            Ok(Box::new(server))
        }
    }

    pub async fn connect(pipe_name: &str) -> io::Result<BoxedStream> {
        let address = endpoint_address(pipe_name);
        loop {
            match ClientOptions::new().open(&address) {
                Ok(client) => return Ok(Box::new(client)),
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                    tokio::time::sleep(BUSY_RETRY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub use imp::{PipeListener, endpoint_address};

/// Open a client stream to `pipe_name`
pub async fn connect(pipe_name: &str) -> io::Result<BoxedStream> {
    imp::connect(pipe_name).await
}
