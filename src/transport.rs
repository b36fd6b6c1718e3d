//! Blocking byte-stream transport
//!
//! A thin wrapper over `TcpStream`, optionally wrapped in rustls for LDAPS.
//! The client only needs connect, read-exact, write-all and close; any
//! failure is surfaced to it as an error and the connection is considered
//! dead from that point on.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerName, StreamOwned};

use crate::error::{LdapError, Result};

/// TLS knobs for LDAPS connections.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// Skip certificate verification. Lab domain controllers routinely run
    /// with self-signed certificates; production callers leave this off.
    pub accept_invalid_certificates: bool,
    /// Name presented for SNI and certificate matching when it differs
    /// from the target host.
    pub server_name: Option<String>,
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

/// One open connection to a directory server.
pub struct Transport {
    stream: Stream,
    peer: SocketAddr,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .field("tls", &matches!(self.stream, Stream::Tls(_)))
            .finish()
    }
}

impl Transport {
    /// Connect to `host:port` within `timeout`, wrapping the stream in TLS
    /// when `tls` is given. The same timeout bounds later reads and writes.
    pub fn open(host: &str, port: u16, timeout: Duration, tls: Option<&TlsOptions>) -> Result<Self> {
        let mut last_err = None;
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        let mut sock = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(s) => {
                    sock = Some((s, addr));
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let (sock, peer) = sock.ok_or_else(|| {
            LdapError::Io(last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "host name resolved to no address")
            }))
        })?;
        sock.set_read_timeout(Some(timeout))?;
        sock.set_write_timeout(Some(timeout))?;
        sock.set_nodelay(true)?;

        let stream = match tls {
            None => Stream::Plain(sock),
            Some(options) => {
                let name = options.server_name.as_deref().unwrap_or(host);
                let server_name =
                    ServerName::try_from(name).map_err(|_| LdapError::InvalidServerName)?;
                let conn = ClientConnection::new(Arc::new(client_config(options)), server_name)?;
                Stream::Tls(Box::new(StreamOwned::new(conn, sock)))
            }
        };
        debug!("connected to {peer} (tls: {})", tls.is_some());
        Ok(Transport { stream, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.stream {
            Stream::Plain(s) => s.write_all(bytes)?,
            Stream::Tls(s) => s.write_all(bytes)?,
        }
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match &mut self.stream {
            Stream::Plain(s) => s.read_exact(buf)?,
            Stream::Tls(s) => s.read_exact(buf)?,
        }
        Ok(())
    }

    /// Best-effort shutdown; errors are ignored, the connection is gone
    /// either way.
    pub fn close(self) {
        match self.stream {
            Stream::Plain(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            Stream::Tls(mut s) => {
                s.conn.send_close_notify();
                let _ = s.flush();
                let _ = s.sock.shutdown(Shutdown::Both);
            }
        }
    }
}

fn client_config(options: &TlsOptions) -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if options.accept_invalid_certificates {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(danger::NoCertificateVerification));
    }
    config
}

mod danger {
    use std::time::SystemTime;

    use rustls::client::{ServerCertVerified, ServerCertVerifier};
    use rustls::{Certificate, ServerName};

    pub(super) struct NoCertificateVerification;

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &Certificate,
            _intermediates: &[Certificate],
            _server_name: &ServerName,
            _scts: &mut dyn Iterator<Item = &[u8]>,
            _ocsp_response: &[u8],
            _now: SystemTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }
    }
}
