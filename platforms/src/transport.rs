use std::{
    fmt::Debug,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    path::Path,
    time::Duration,
};

use log::debug;

use crate::{Error, Result};

/// A blocking request/response line transport to the mechanism.
pub trait Transport: Debug + Send {
    /// Writes `line` followed by the command terminator and blocks until a reply line arrives.
    ///
    /// The returned reply has its trailing line terminator stripped.
    fn write_line(&mut self, line: &str) -> Result<String>;
}

/// A [`Transport`] over any byte stream.
#[derive(Debug)]
pub struct LineTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
    command_terminator: String,
}

pub type DeviceTransport = LineTransport<File, File>;

pub type TcpTransport = LineTransport<TcpStream, TcpStream>;

impl<R: Read, W: Write> LineTransport<R, W> {
    pub fn new(reader: R, writer: W, command_terminator: impl Into<String>) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            command_terminator: command_terminator.into(),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader.into_inner(), self.writer)
    }
}

impl DeviceTransport {
    /// Opens a serial device node such as `/dev/ttyS0`.
    ///
    /// Line settings (baud rate, parity) are expected to be configured outside this process.
    pub fn open_device(path: impl AsRef<Path>, command_terminator: &str) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let reader = file.try_clone()?;
        debug!(target: "transport", "opened device {}", path.as_ref().display());
        Ok(Self::new(reader, file, command_terminator))
    }
}

impl TcpTransport {
    /// Connects to a TCP serial bridge.
    ///
    /// `read_timeout` bounds how long a single reply may take. `None` blocks indefinitely.
    pub fn connect(
        addr: impl ToSocketAddrs,
        read_timeout: Option<Duration>,
        command_terminator: &str,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(read_timeout)?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;
        Ok(Self::new(reader, stream, command_terminator))
    }
}

impl<R, W> Transport for LineTransport<R, W>
where
    R: Read + Debug + Send,
    W: Write + Debug + Send,
{
    fn write_line(&mut self, line: &str) -> Result<String> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(self.command_terminator.as_bytes())?;
        self.writer.flush()?;

        let mut reply = Vec::new();
        let read = self.reader.read_until(b'\n', &mut reply)?;
        if read == 0 {
            return Err(Error::TransportClosed);
        }

        let reply = String::from_utf8_lossy(&reply);
        Ok(reply.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn write_line_appends_terminator_and_reads_one_line() {
        let mut transport = LineTransport::new(
            Cursor::new(b"* 500\r\n* 12\n".to_vec()),
            Vec::new(),
            " ",
        );

        assert_eq!(transport.write_line("pp500"), Ok("* 500".to_string()));
        assert_eq!(transport.write_line("tp12"), Ok("* 12".to_string()));

        let (_, written) = transport.into_inner();
        assert_eq!(written, b"pp500 tp12 ");
    }

    #[test]
    fn write_line_closed_on_eof() {
        let mut transport = LineTransport::new(Cursor::new(Vec::new()), Vec::new(), " ");

        assert_eq!(transport.write_line("pp"), Err(Error::TransportClosed));
    }

    #[test]
    fn write_line_returns_partial_line_before_eof() {
        let mut transport = LineTransport::new(Cursor::new(b"* -300".to_vec()), Vec::new(), " ");

        assert_eq!(transport.write_line("pp"), Ok("* -300".to_string()));
    }
}
