//! # 成果物の入出力
//!
//! 出力は同じディレクトリの一時ファイルに書いてから置き換える。
//! 書き込みに失敗しても途中までの成果物は残らない。既存の出力ファイルの
//! パーミッションは引き継ぐ。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use warden_core::{Result, WardenError};

/// 入力ファイルを読み込む。
pub async fn read_input(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        WardenError::Io(format!(
            "入力ファイルの読み込みに失敗 ({}): {e}",
            path.display()
        ))
    })
}

/// 署名済みバイト列を出力ファイルに書き込む。
pub async fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    let temp = temp_path(path)?;
    if let Err(e) = write_and_rename(&temp, path, data).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(WardenError::Io(format!(
            "出力ファイルの書き込みに失敗 ({}): {e}",
            path.display()
        )));
    }
    Ok(())
}

async fn write_and_rename(temp: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(temp, data).await?;
    if let Ok(existing) = tokio::fs::metadata(path).await {
        tokio::fs::set_permissions(temp, existing.permissions()).await?;
    }
    tokio::fs::rename(temp, path).await
}

/// 同一プロセス内で一時ファイル名を区別する連番
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// `dir/name` に対する一時ファイル `dir/.name.{pid}-{seq}.warden-tmp`。
fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        WardenError::Io(format!("出力先がファイルではありません: {}", path.display()))
    })?;
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    Ok(path.with_file_name(format!(
        ".{}.{}-{seq}.warden-tmp",
        name.to_string_lossy(),
        std::process::id()
    )))
}
