//! 応答ブロックの切り出し
//!
//! デバッガツールはコマンドの処理を終えてアイドル状態になるとプロンプト
//! （例: `(lldb)`）を出力します。この出力を区切りとして、生の出力ストリームを
//! 1コマンド分の応答ブロックに分割します。
//!
//! 長さプレフィックスやチェックサムは存在しないため、正当な出力の中に
//! マーカー文字列が現れると誤って分割されます。

/// 応答フレーマー
#[derive(Debug, Clone)]
pub struct ResponseFramer {
    /// プロンプトマーカー
    marker: Vec<u8>,
    /// 未処理の出力（マーカー待ち）
    buffer: Vec<u8>,
}

impl ResponseFramer {
    /// 指定したマーカーで分割するフレーマーを作成する
    pub fn new(marker: impl Into<Vec<u8>>) -> Self {
        Self {
            marker: marker.into(),
            buffer: Vec::new(),
        }
    }

    /// 出力データを追加し、完成した応答ブロックを返す
    ///
    /// マーカーが複数回の読み取りにまたがって届いた場合でも、
    /// 一度にまとめて渡した場合と同じ結果になります。
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);

        let mut blocks = Vec::new();
        if self.marker.is_empty() {
            return blocks;
        }

        while let Some(pos) = find(&self.buffer, &self.marker) {
            let block = String::from_utf8_lossy(&self.buffer[..pos]).trim().to_string();
            self.buffer.drain(..pos + self.marker.len());
            blocks.push(block);
        }

        blocks
    }

    /// マーカー待ちのデータを取得する
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// バッファを破棄する
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// バイト列中の部分列を検索する
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
