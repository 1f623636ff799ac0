//! # HTTPS通信層
//!
//! reqwestで署名サーバーにPOSTする。TLSは [`crate::tls`] で組み立てた
//! `rustls::ClientConfig` をそのまま使う。
//!
//! ## リクエスト
//! - `POST {url}`
//! - `Content-Type: application/octet-stream`
//! - `Content-Length: {payload.len()}`
//! - ボディ: ペイロードを64KB単位で切り出して送る（複製しない）
//!
//! 呼び出しごとにクライアントを作り、接続プールは使わない。
//! クライアントを破棄した時点で接続は閉じる。リダイレクトは追わない（3xxは拒否扱い）。

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};

use super::{check_status, ChannelState, StateTracker, Transport, UploadRequest};
use crate::error::{error_chain, Result, WardenError};

/// アップロードボディの切り出し単位（64KB）
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// 成果物のContent-Type
const OCTET_STREAM: &str = "application/octet-stream";

/// reqwestによるHTTPS通信層。
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpsTransport;

#[async_trait::async_trait]
impl Transport for HttpsTransport {
    async fn exchange(&self, request: UploadRequest) -> Result<Vec<u8>> {
        let UploadRequest {
            url,
            tls,
            payload,
            timeouts,
            tracker,
        } = request;

        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .https_only(true)
            .http1_only()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .connect_timeout(timeouts.handshake)
            .build()
            .map_err(|e| {
                WardenError::ConfigInvalid(format!(
                    "HTTPクライアントの構築に失敗: {}",
                    error_chain(&e)
                ))
            })?;

        let content_length = payload.len();
        let body = reqwest::Body::wrap_stream(UploadBody::new(payload, Arc::clone(&tracker)));
        let pending = client
            .post(&url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(CONTENT_LENGTH, content_length)
            .body(body)
            .send();

        let response = tokio::time::timeout(timeouts.handshake + timeouts.upload, pending)
            .await
            .map_err(|_| WardenError::Io(format!("アップロードがタイムアウトしました ({url})")))?
            .map_err(|e| {
                WardenError::Io(format!(
                    "署名サーバーとの通信に失敗 ({url}): {}",
                    error_chain(&e)
                ))
            })?;
        tracker.reach(ChannelState::AwaitingResponse);

        let status = response.status().as_u16();
        tracing::debug!(status, "署名サーバーからレスポンスを受信");
        // 失敗ステータスのボディは読まずに接続ごと破棄する
        check_status(status)?;

        let body = tokio::time::timeout(timeouts.response, response.bytes())
            .await
            .map_err(|_| {
                WardenError::Io(format!("レスポンス読み取りがタイムアウトしました ({url})"))
            })?
            .map_err(|e| {
                WardenError::Io(format!(
                    "レスポンスの読み取りに失敗 ({url}): {}",
                    error_chain(&e)
                ))
            })?;

        Ok(Vec::from(body))
    }
}

/// ペイロードを64KB単位で流すボディストリーム。
///
/// 最初に読まれた時点で `Uploading`、読み切った時点で `AwaitingResponse` に進める。
struct UploadBody {
    payload: Bytes,
    offset: usize,
    started: bool,
    tracker: Arc<StateTracker>,
}

impl UploadBody {
    fn new(payload: Vec<u8>, tracker: Arc<StateTracker>) -> Self {
        Self {
            payload: Bytes::from(payload),
            offset: 0,
            started: false,
            tracker,
        }
    }
}

impl Stream for UploadBody {
    type Item = std::result::Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if !this.started {
            this.started = true;
            this.tracker.reach(ChannelState::Uploading);
        }

        if this.offset >= this.payload.len() {
            this.tracker.reach(ChannelState::AwaitingResponse);
            return Poll::Ready(None);
        }

        let end = usize::min(this.offset + UPLOAD_CHUNK_SIZE, this.payload.len());
        let chunk = this.payload.slice(this.offset..end);
        this.offset = end;
        Poll::Ready(Some(Ok(chunk)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.payload.len() - self.offset).div_ceil(UPLOAD_CHUNK_SIZE);
        (remaining, Some(remaining))
    }
}
