//! # TLS設定
//!
//! [`TrustPolicy`] をrustlsのコールバックに接続し、署名サーバー向けの
//! `rustls::ClientConfig` を組み立てる。
//!
//! - `PinnedServerVerifier`: サーバー証明書をピン留めで検証する。
//!   ホスト名（SNI）は意図的に見ない。
//! - `FixedClientIdentity`: サーバーの要求内容に関係なく、設定済みの
//!   クライアント証明書を1組だけ提示する。
//!
//! どちらの設定も TLS 1.2 固定・ringプロバイダで構築する。
//! 署名サーバーが話すバージョンに固定し、下位へのネゴシエーションは行わない。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ResolvesClientCert;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::sign::CertifiedKey;
use rustls::{CertificateError, DigitallySignedStruct, Error as TlsError, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::error::{Result, WardenError};
use crate::trust::TrustPolicy;

/// ringプロバイダの署名検証アルゴリズム一覧。
fn ring_signature_algorithms() -> &'static WebPkiSupportedAlgorithms {
    use std::sync::LazyLock;
    static ALGORITHMS: LazyLock<WebPkiSupportedAlgorithms> =
        LazyLock::new(|| rustls::crypto::ring::default_provider().signature_verification_algorithms);
    &ALGORITHMS
}

// ---------------------------------------------------------------------------
// サーバー証明書の検証（ピン留め）
// ---------------------------------------------------------------------------

/// ピン留めによるサーバー証明書検証器。
///
/// 接続ごとに作り直し、拒否したかどうかを記録する。rustlsのエラーは
/// 通信層で汎用のI/Oエラーに包まれるため、分類はこの記録で行う。
#[derive(Debug)]
pub struct PinnedServerVerifier {
    trust: Arc<TrustPolicy>,
    rejected: AtomicBool,
}

impl PinnedServerVerifier {
    pub fn new(trust: Arc<TrustPolicy>) -> Self {
        Self {
            trust,
            rejected: AtomicBool::new(false),
        }
    }

    /// この検証器がサーバー証明書を拒否したか。
    pub fn rejected(&self) -> bool {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        // ホスト名はピン留めで置き換えるため検証しない
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        let mut chain = Vec::with_capacity(1 + intermediates.len());
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());

        match self.trust.verify_server(Some(chain.as_slice())) {
            Ok(()) => {
                tracing::debug!(chain_len = chain.len(), "サーバー証明書がピン留めと一致しました");
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => {
                self.rejected.store(true, Ordering::SeqCst);
                tracing::warn!(chain_len = chain.len(), "{e}");
                Err(TlsError::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, ring_signature_algorithms())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, ring_signature_algorithms())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ring_signature_algorithms().supported_schemes()
    }
}

// ---------------------------------------------------------------------------
// クライアント証明書の提示
// ---------------------------------------------------------------------------

/// 常に同じクライアント証明書を返すリゾルバ。
#[derive(Debug)]
pub struct FixedClientIdentity {
    certified: Arc<CertifiedKey>,
}

impl FixedClientIdentity {
    /// 信頼ポリシーに設定されたクライアント証明書から構築する。
    pub fn from_policy(trust: &TrustPolicy) -> Result<Self> {
        let (identity, key) = trust.present_client_identity()?;
        let certified = CertifiedKey::new(vec![identity.der().clone()], key.signing_key());
        Ok(Self {
            certified: Arc::new(certified),
        })
    }
}

impl ResolvesClientCert for FixedClientIdentity {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.certified))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// 署名サーバー向けの `rustls::ClientConfig` を構築する。
///
/// 信頼ポリシーが未設定なら通信前に [`WardenError::ConfigInvalid`] を返す。
/// 返す検証器は接続後の失敗分類（ピン留め拒否か否か）に使う。
pub fn build_client_tls_config(
    trust: &Arc<TrustPolicy>,
) -> Result<(rustls::ClientConfig, Arc<PinnedServerVerifier>)> {
    trust.ensure_configured()?;

    let verifier = Arc::new(PinnedServerVerifier::new(Arc::clone(trust)));
    let resolver = Arc::new(FixedClientIdentity::from_policy(trust)?);

    let provider: Arc<CryptoProvider> = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12])
        .map_err(|e| WardenError::ConfigInvalid(format!("TLSバージョン設定: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::clone(&verifier) as Arc<dyn ServerCertVerifier>)
        .with_client_cert_resolver(resolver);

    Ok((config, verifier))
}
