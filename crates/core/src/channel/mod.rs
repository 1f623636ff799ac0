//! # 署名リクエスト送信チャネル
//!
//! 1回の呼び出しで、署名サーバーとのTLS接続を1本張り、成果物をアップロードして
//! 署名済みバイト列を受け取る。
//!
//! ## 状態遷移（呼び出しごと）
//! ```text
//! Idle → ChannelNegotiating → Uploading → AwaitingResponse → Complete
//!   └──────────┴──────────────────┴──────────────┴───────→ Failed
//! ```
//! `Complete` と `Failed` は終端で、そこから遷移しない。
//!
//! ## 方針
//! - リトライしない。失敗したら部分的な結果は捨て、再送は呼び出し側が新しい呼び出しで行う。
//! - 接続は呼び出しごとに作り、使い回さない。どの終了経路でも接続を閉じる。
//! - ステータス 299 以下のみ成功。それ以外はボディを読まずに [`WardenError::RemoteRejected`]。

pub mod https;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use https::HttpsTransport;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::{Result, WardenError};
use crate::tls::build_client_tls_config;
use crate::trust::TrustPolicy;

// ---------------------------------------------------------------------------
// タイムアウト
// ---------------------------------------------------------------------------

/// TCP接続とTLSハンドシェイクの上限（秒）
pub const DEFAULT_HANDSHAKE_TIMEOUT_SEC: u64 = 30;

/// アップロード完了までの上限（秒）
pub const DEFAULT_UPLOAD_TIMEOUT_SEC: u64 = 300;

/// レスポンスボディ読み取りの上限（秒）
pub const DEFAULT_RESPONSE_TIMEOUT_SEC: u64 = 300;

/// 各段階のタイムアウト。応答しない・悪意あるサーバーで無期限に止まらないようにする。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP接続 + TLSハンドシェイク
    pub handshake: Duration,
    /// アップロード完了（レスポンスヘッダー受信まで）
    pub upload: Duration,
    /// レスポンスボディの読み取り
    pub response: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SEC),
            upload: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SEC),
            response: Duration::from_secs(DEFAULT_RESPONSE_TIMEOUT_SEC),
        }
    }
}

// ---------------------------------------------------------------------------
// 状態遷移
// ---------------------------------------------------------------------------

/// 1回の送信の状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// 送信前
    Idle,
    /// TCP接続・TLSハンドシェイク中
    ChannelNegotiating,
    /// ペイロード送信中
    Uploading,
    /// レスポンス待ち・受信中
    AwaitingResponse,
    /// 署名済みバイト列を受け取った
    Complete,
    /// 失敗した
    Failed,
}

impl ChannelState {
    /// 成功経路での次の状態。
    fn successor(self) -> Option<Self> {
        match self {
            ChannelState::Idle => Some(ChannelState::ChannelNegotiating),
            ChannelState::ChannelNegotiating => Some(ChannelState::Uploading),
            ChannelState::Uploading => Some(ChannelState::AwaitingResponse),
            ChannelState::AwaitingResponse => Some(ChannelState::Complete),
            ChannelState::Complete | ChannelState::Failed => None,
        }
    }

    /// 成功経路上の順序。
    fn order(self) -> u8 {
        match self {
            ChannelState::Idle => 0,
            ChannelState::ChannelNegotiating => 1,
            ChannelState::Uploading => 2,
            ChannelState::AwaitingResponse => 3,
            ChannelState::Complete => 4,
            ChannelState::Failed => u8::MAX,
        }
    }

    /// 終端状態か。
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Complete | ChannelState::Failed)
    }

    /// `next` へ遷移できるか。
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == ChannelState::Failed || self.successor() == Some(next)
    }
}

/// 1回の送信の状態を記録する。
///
/// アップロード中のボディストリームと送信処理の両方から更新されるため共有する。
#[derive(Debug)]
pub struct StateTracker {
    state: Mutex<ChannelState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Idle),
        }
    }

    /// 現在の状態。
    pub fn current(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `next` へ遷移する。許されない遷移なら何もせず `false` を返す。
    pub fn advance(&self, next: ChannelState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.can_transition_to(next) {
            return false;
        }
        tracing::debug!(from = ?*state, to = ?next, "チャネル状態遷移");
        *state = next;
        true
    }

    /// 成功経路を順にたどって `target` まで進める。既に到達済み・終端なら何もしない。
    pub fn reach(&self, target: ChannelState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.order() < target.order() {
            let Some(next) = state.successor() else {
                return;
            };
            tracing::debug!(from = ?*state, to = ?next, "チャネル状態遷移");
            *state = next;
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// 通信層
// ---------------------------------------------------------------------------

/// 1回分のアップロード要求。
pub struct UploadRequest {
    /// 送信先URL
    pub url: String,
    /// 信頼ポリシーを組み込んだTLS設定
    pub tls: rustls::ClientConfig,
    /// アップロードするペイロード（所有権ごと渡し、複製しない）
    pub payload: Vec<u8>,
    /// 各段階のタイムアウト
    pub timeouts: Timeouts,
    /// 状態記録
    pub tracker: Arc<StateTracker>,
}

/// 署名サーバーとの1往復を行う通信層。
///
/// 本番は [`HttpsTransport`]。テストでは接続回数を数える実装に差し替える。
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// ペイロードを送り、成功ステータスならレスポンスボディ全体を返す。
    async fn exchange(&self, request: UploadRequest) -> Result<Vec<u8>>;
}

/// レスポンスステータスを分類する。299以下を成功とする。
pub fn check_status(status: u16) -> Result<()> {
    if status > 299 {
        return Err(WardenError::RemoteRejected(status));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SubmissionChannel
// ---------------------------------------------------------------------------

/// 署名リクエスト送信チャネル。
///
/// 信頼ポリシーは構築時に注入し、以後変更しない。複数スレッドから
/// 独立に [`SubmissionChannel::submit`] を呼んでも共有状態は読み取りのみ。
pub struct SubmissionChannel {
    trust: Arc<TrustPolicy>,
    transport: Box<dyn Transport>,
    timeouts: Timeouts,
}

impl SubmissionChannel {
    /// HTTPS通信層でチャネルを作る。
    pub fn new(trust: Arc<TrustPolicy>) -> Self {
        Self::with_transport(trust, Box::new(HttpsTransport))
    }

    /// 通信層を指定してチャネルを作る。
    pub fn with_transport(trust: Arc<TrustPolicy>, transport: Box<dyn Transport>) -> Self {
        Self {
            trust,
            transport,
            timeouts: Timeouts::default(),
        }
    }

    /// タイムアウトを差し替える。
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// ペイロードを署名サーバーに送り、署名済みバイト列を返す。
    ///
    /// 信頼ポリシーが未設定なら、通信を一切行わずに [`WardenError::ConfigInvalid`] を返す。
    pub async fn submit(&self, endpoint: Endpoint, payload: Vec<u8>) -> Result<Vec<u8>> {
        let tracker = Arc::new(StateTracker::new());
        let result = self.run(&endpoint, payload, &tracker).await;

        match &result {
            Ok(body) => {
                tracker.reach(ChannelState::Complete);
                tracing::info!(
                    target_name = %endpoint.target_name(),
                    bytes = body.len(),
                    "署名済みデータを受信しました"
                );
            }
            Err(e) => {
                let failed_at = tracker.current();
                tracker.advance(ChannelState::Failed);
                tracing::error!(
                    target_name = %endpoint.target_name(),
                    state = ?failed_at,
                    "署名リクエストに失敗: {e}"
                );
            }
        }
        result
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        payload: Vec<u8>,
        tracker: &Arc<StateTracker>,
    ) -> Result<Vec<u8>> {
        let (tls, verifier) = build_client_tls_config(&self.trust)?;

        let url = endpoint.url();
        tracing::info!(url = %url, bytes = payload.len(), "署名リクエストを送信します");
        tracker.advance(ChannelState::ChannelNegotiating);

        let request = UploadRequest {
            url,
            tls,
            payload,
            timeouts: self.timeouts,
            tracker: Arc::clone(tracker),
        };

        match self.transport.exchange(request).await {
            Ok(body) => Ok(body),
            Err(_) if verifier.rejected() => Err(WardenError::CertificateRejected),
            Err(e) => Err(e),
        }
    }
}
