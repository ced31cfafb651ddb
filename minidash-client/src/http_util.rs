use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderValue, Method, Request, Response, Uri, header, response};
use itertools::Itertools;
use log::{debug, trace};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs, lookup_host},
    task::JoinSet,
};
use tokio_native_tls::{TlsConnector as TokioTlsConnector, native_tls::TlsConnector};

use crate::error::FetchError;

const HAPPY_EYEBALLS_DELAY: Duration = Duration::from_millis(150);
const MAX_HEADERS: usize = 64;
const MAX_RESPONSE_SIZE: usize = 1 << 20;

trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

/// Build `GET {base}/{path}`, tolerating a trailing slash on `base`.
pub fn get_request(base: &str, path: &str) -> Result<Request<Bytes>, FetchError> {
    let uri = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
    .parse::<Uri>()
    .map_err(|e| FetchError::transport(format!("URL error: {e}")))?;

    if !matches!(uri.scheme_str(), Some("http" | "https")) {
        return Err(FetchError::transport(
            "URL error: scheme must be http or https",
        ));
    }

    let authority = uri
        .authority()
        .ok_or_else(|| FetchError::transport("URL error: no host name"))?
        .as_str();
    let host = authority
        .find('@')
        .map(|idx| authority.split_at(idx + 1).1)
        .unwrap_or(authority);

    if host.is_empty() {
        return Err(FetchError::transport("URL error: empty host name"));
    }

    let req = Request::builder()
        .method(Method::GET)
        .header(header::HOST, host)
        .header(header::CONNECTION, "close")
        .header(header::ACCEPT, "application/json")
        .header(header::ACCEPT_ENCODING, "identity")
        .header(
            header::USER_AGENT,
            HeaderValue::from_static(concat!("minidash/", env!("CARGO_PKG_VERSION"))),
        )
        .uri(&uri)
        .body(Bytes::new())?;

    Ok(req)
}

/// Send `req` on a fresh connection and read the response until the peer
/// closes it.
pub async fn send_request(
    req: Request<Bytes>,
    prefer_ipv6: bool,
) -> Result<Response<Bytes>, FetchError> {
    let mut stream = connect(req.uri(), prefer_ipv6).await?;

    stream.write_all(&assemble_http_request(&req)).await?;
    stream.flush().await?;

    let mut buffer = BytesMut::with_capacity(1024);
    while stream.read_buf(&mut buffer).await? != 0 {
        if buffer.len() > MAX_RESPONSE_SIZE {
            return Err(FetchError::transport(
                "HTTP error: response exceeds 1 MiB",
            ));
        }
    }

    let buffer = buffer.freeze();
    trace!("Response: {:?}", String::from_utf8_lossy(&buffer));
    parse_http_response(buffer)
}

async fn connect(uri: &Uri, prefer_ipv6: bool) -> Result<Box<dyn AsyncReadWrite>, FetchError> {
    let tls = uri.scheme_str() == Some("https");
    let host = uri
        .host()
        .ok_or_else(|| FetchError::transport("URL error: no host name"))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

    trace!("connecting to ({host}, {port})");
    let stream = connect_happy_eyeballs((host, port), prefer_ipv6).await?;

    if tls {
        let connector = TokioTlsConnector::from(TlsConnector::new()?);
        let tls_stream = connector.connect(host, stream).await?;
        Ok(Box::new(tls_stream))
    } else {
        Ok(Box::new(stream))
    }
}

async fn connect_happy_eyeballs<A: ToSocketAddrs>(
    addr: A,
    prefer_ipv6: bool,
) -> Result<TcpStream, FetchError> {
    let addrs = {
        let (v4, v6): (Vec<_>, Vec<_>) = lookup_host(addr)
            .await
            .map_err(|e| FetchError::transport(format!("DNS error: {e}")))?
            .partition(|a| a.is_ipv4());

        let (first, second) = if prefer_ipv6 { (v6, v4) } else { (v4, v6) };
        first.into_iter().interleave(second).collect::<Vec<_>>()
    };

    let mut attempts = JoinSet::new();
    let mut last_error = None;
    let mut settle = |res: Result<std::io::Result<TcpStream>, tokio::task::JoinError>| match res {
        Ok(Ok(stream)) => {
            debug!(
                "connection established with {}",
                stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or("<unknown>".to_string())
            );
            Some(stream)
        }
        Ok(Err(e)) => {
            trace!("connection attempt failed: {e}");
            last_error = Some(e);
            None
        }
        Err(e) => {
            trace!("connection attempt panicked: {e}");
            None
        }
    };

    for addr in addrs {
        attempts.spawn(TcpStream::connect(addr));
        while !attempts.is_empty() {
            tokio::select! {
                biased;

                Some(res) = attempts.join_next() => {
                    if let Some(stream) = settle(res) {
                        return Ok(stream);
                    }
                }
                _ = tokio::time::sleep(HAPPY_EYEBALLS_DELAY) => {
                    break;
                }
            }
        }
    }

    while let Some(res) = attempts.join_next().await {
        if let Some(stream) = settle(res) {
            return Ok(stream);
        }
    }

    Err(match last_error {
        Some(e) => FetchError::from(e),
        None => FetchError::transport("I/O error: host name resolved to no address"),
    })
}

fn assemble_http_request(req: &Request<Bytes>) -> Bytes {
    let mut buffer = BytesMut::with_capacity(256);

    buffer.put_slice(
        format!(
            "{} {} {:?}\r\n",
            req.method(),
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
            req.version()
        )
        .as_bytes(),
    );

    for (name, value) in req.headers() {
        buffer.put_slice(name.as_str().as_bytes());
        buffer.put_slice(b": ");
        buffer.put_slice(value.as_bytes());
        buffer.put_slice(b"\r\n");
    }

    buffer.put_slice(b"\r\n");
    buffer.put_slice(req.body());

    trace!("Request: {:?}", String::from_utf8_lossy(&buffer));

    buffer.freeze()
}

fn parse_http_response(bytes: Bytes) -> Result<Response<Bytes>, FetchError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    let httparse::Status::Complete(body_start) = resp.parse(&bytes)? else {
        return Err(FetchError::transport(
            "HTTP error: connection closed before the response headers completed",
        ));
    };

    let mut builder = response::Builder::new()
        .status(resp.code.unwrap_or(200))
        .version(match resp.version.unwrap_or(1) {
            0 => http::Version::HTTP_10,
            _ => http::Version::HTTP_11,
        });
    for header in resp.headers.iter() {
        builder = builder.header(header.name, header.value);
    }

    let head = builder.body(())?;
    let raw_body = bytes.slice(body_start..);

    let chunked = head
        .headers()
        .get(header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    let content_length = head
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());

    let body = if chunked {
        decode_chunked(&raw_body)?
    } else if let Some(len) = content_length {
        if raw_body.len() < len {
            return Err(FetchError::transport(format!(
                "HTTP error: body truncated ({} of {len} bytes)",
                raw_body.len()
            )));
        }
        raw_body.slice(..len)
    } else {
        raw_body
    };

    Ok(head.map(|_| body))
}

fn decode_chunked(mut raw: &[u8]) -> Result<Bytes, FetchError> {
    let mut body = BytesMut::with_capacity(raw.len());
    loop {
        let httparse::Status::Complete((consumed, size)) = httparse::parse_chunk_size(raw)
            .map_err(|_| FetchError::transport("HTTP error: invalid chunk size"))?
        else {
            return Err(FetchError::transport("HTTP error: truncated chunk header"));
        };
        raw = &raw[consumed..];

        if size == 0 {
            return Ok(body.freeze());
        }

        // chunk data is followed by CRLF
        let framed = usize::try_from(size)
            .ok()
            .and_then(|size| size.checked_add(2))
            .ok_or_else(|| FetchError::transport("HTTP error: chunk too large"))?;
        if raw.len() < framed {
            return Err(FetchError::transport("HTTP error: truncated chunk"));
        }
        body.put_slice(&raw[..framed - 2]);
        raw = &raw[framed..];
    }
}
