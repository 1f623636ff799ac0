//! # チャネルテスト用共通ヘルパー
//!
//! 相互TLSで待ち受けるモック署名サーバー群。
//! 受信したリクエストと、ハンドシェイクで提示されたクライアント証明書を記録する。
//!
//! `test-util` フィーチャーを有効にすると、下流クレートのテストからも使える。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::Path;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, Error as TlsError, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::identity::{decode_pkcs8_pem, Identity};

pub const SERVER_CERT: &[u8] = include_bytes!("../../testdata/server.crt");
pub const SERVER_KEY: &str = include_str!("../../testdata/server.key");
pub const OTHER_CERT: &[u8] = include_bytes!("../../testdata/other.crt");
pub const OTHER_KEY: &str = include_str!("../../testdata/other.key");
pub const CLIENT_CERT: &[u8] = include_bytes!("../../testdata/client.crt");
pub const CLIENT_KEY: &str = include_str!("../../testdata/client.key");

/// モックサーバーが受け取ったリクエスト。
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// `/sign/{target}` の `target` 部分
    pub target: String,
    pub content_type: Option<String>,
    pub content_length: Option<String>,
    pub body: Vec<u8>,
}

/// 起動済みのモック署名サーバー。
pub struct MockSigningServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    client_certs: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockSigningServer {
    /// 受け取ったリクエストの一覧。
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// ハンドシェイクごとに提示されたクライアント証明書（DER）の一覧。
    pub fn client_certs(&self) -> Vec<Vec<u8>> {
        self.client_certs.lock().unwrap().clone()
    }
}

fn ring_signature_algorithms() -> WebPkiSupportedAlgorithms {
    rustls::crypto::ring::default_provider().signature_verification_algorithms
}

/// 提示されたクライアント証明書を記録して受理する検証器。
#[derive(Debug)]
struct RecordingClientVerifier {
    seen: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ClientCertVerifier for RecordingClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, TlsError> {
        self.seen.lock().unwrap().push(end_entity.as_ref().to_vec());
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &ring_signature_algorithms())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &ring_signature_algorithms())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ring_signature_algorithms().supported_schemes()
    }
}

/// TLSハンドシェイクまで済ませてから接続を渡すリスナー。
/// ハンドシェイクに失敗した接続は捨てて次を待つ。
struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let Ok((stream, addr)) = self.tcp.accept().await else {
                continue;
            };
            match self.acceptor.accept(stream).await {
                Ok(tls) => return (tls, addr),
                Err(_) => continue,
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.tcp.local_addr()
    }
}

/// モック署名サーバーを起動する。
///
/// `cert`/`key` をサーバー証明書として提示し、`/sign/{target}` へのPOSTに
/// `status` と `response` を返す。クライアント証明書は必須。
pub async fn start_signing_server(
    cert: &[u8],
    key: &str,
    status: StatusCode,
    response: Vec<u8>,
) -> MockSigningServer {
    let cert_der = Identity::from_bytes(cert).unwrap().der().clone();
    let key_der = decode_pkcs8_pem(key).unwrap();

    let client_certs = Arc::new(Mutex::new(Vec::new()));
    let verifier = Arc::new(RecordingClientVerifier {
        seen: Arc::clone(&client_certs),
    });

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS12])
    .unwrap()
    .with_client_cert_verifier(verifier)
    .with_single_cert(vec![cert_der], PrivateKeyDer::Pkcs8(key_der))
    .unwrap();

    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&requests);
    let app = axum::Router::new().route(
        "/sign/{target}",
        post(
            move |Path(target): Path<String>, headers: HeaderMap, body: Bytes| {
                let recorded = Arc::clone(&recorded);
                let response = response.clone();
                async move {
                    let header_value = |name: header::HeaderName| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string)
                    };
                    recorded.lock().unwrap().push(RecordedRequest {
                        target,
                        content_type: header_value(header::CONTENT_TYPE),
                        content_length: header_value(header::CONTENT_LENGTH),
                        body: body.to_vec(),
                    });
                    (status, response)
                }
            },
        ),
    );

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = TlsListener {
        tcp,
        acceptor: TlsAcceptor::from(Arc::new(config)),
    };
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockSigningServer {
        addr,
        requests,
        client_certs,
    }
}

/// 接続を受け付けるだけで何も返さないサーバーを起動する。
pub async fn start_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}
