use futures::SinkExt;
use serde::Serialize;
use slog::{o, error, debug, trace};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

pub const DEFAULT_ADDRESS: ([u8; 4], u16) = ([127, 0, 0, 1], 50001);
pub const DEFAULT_TXID: &str = "fd8d6e525f580e0df9ab84eb9eb3c22a23053b84684146c07f9d1d71e20c5354";
pub const DEFAULT_REQUEST_ID: u64 = 1;
/// Maximum number of bytes taken from the single read of the response.
pub const READ_LIMIT: usize = 100_000;

#[derive(serde::Serialize)]
struct Request<P> {
    id: u64,
    method: &'static str,
    params: P,
}

#[derive(serde_tuple::Serialize_tuple)]
struct GetTransaction {
    txid: bitcoin::Txid,
    verbose: bool,
}

/// JSON with a space after every `:` and `,`, the same separators Python's `json.dumps` uses.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Everything a single `blockchain.transaction.get` round trip needs.
#[derive(Debug, Clone)]
pub struct Query {
    pub address: SocketAddr,
    pub txid: bitcoin::Txid,
    pub verbose: bool,
    pub id: u64,
    pub read_limit: usize,
}

impl Query {
    pub fn new(txid: bitcoin::Txid) -> Self {
        Query {
            address: SocketAddr::from(DEFAULT_ADDRESS),
            txid,
            verbose: true,
            id: DEFAULT_REQUEST_ID,
            read_limit: READ_LIMIT,
        }
    }

    pub fn from_defaults() -> Result<Self, Error> {
        let txid = DEFAULT_TXID.parse::<bitcoin::Txid>().map_err(into_dyn_err)?;
        Ok(Query::new(txid))
    }

    fn request(&self) -> Request<GetTransaction> {
        Request {
            id: self.id,
            method: "blockchain.transaction.get",
            params: GetTransaction {
                txid: self.txid,
                verbose: self.verbose,
            },
        }
    }

    /// The request as sent on the wire, without the line terminator.
    pub fn request_line(&self) -> Result<String, Error> {
        let mut line = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut line, SpacedFormatter);
        self.request().serialize(&mut serializer).map_err(into_dyn_err)?;
        String::from_utf8(line).map_err(into_dyn_err)
    }
}

pub type Error = std::sync::Arc<dyn std::error::Error + Sync + Send>;

#[derive(Debug)]
struct NotUtf8 {
    len: usize,
    source: std::str::Utf8Error,
}

impl fmt::Display for NotUtf8 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "response of {} bytes is not valid UTF-8", self.len)
    }
}

impl std::error::Error for NotUtf8 {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Connects to `query.address` and performs a single [`exchange`] on the fresh connection.
pub async fn query_transaction(query: &Query, logger: &slog::Logger) -> Result<String, Error> {
    let logger = logger.new(o!("electrum_address" => query.address));

    let connection = tokio::net::TcpStream::connect(query.address).await.map_err(into_dyn_err)?;
    debug!(logger, "Connected to Electrum server");
    exchange(connection, query, &logger).await
}

/// Writes one newline-terminated request and returns the text of exactly one read.
///
/// At most `query.read_limit` bytes are taken. Anything the server sends beyond the first read
/// is left unread, so large responses come back truncated.
pub async fn exchange<S>(stream: S, query: &Query, logger: &slog::Logger) -> Result<String, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let mut electrum_sender = tokio_util::codec::FramedWrite::new(writer, tokio_util::codec::LinesCodec::new());

    let req_line = query.request_line()?;
    trace!(logger, "Sending request"; "request" => req_line.clone());
    electrum_sender.send(req_line).await.map_err(into_dyn_err)?;

    let mut buffer = vec![0u8; query.read_limit];
    let received = match reader.read(&mut buffer).await {
        Ok(received) => received,
        Err(error) => {
            error!(logger, "Failed to receive response"; "error" => %error);
            return Err(into_dyn_err(error));
        },
    };
    buffer.truncate(received);
    trace!(logger, "Received response"; "bytes" => received);

    String::from_utf8(buffer).map_err(|error| into_dyn_err(NotUtf8 { len: received, source: error.utf8_error() }))
}

pub fn into_dyn_err<E: std::error::Error + Send + Sync + 'static>(error: E) -> Error {
    Arc::new(error)
}
